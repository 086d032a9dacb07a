//! Evaluation engine: contexts, casting, coercion, ordering and the updating
//! driver.

pub mod casting;
pub mod coercion;
pub mod doc_order;
pub mod runtime;
pub mod updating;
