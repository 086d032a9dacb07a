//! An evaluation substrate for XQuery Update Facility expressions over
//! caller-supplied document models.
//!
//! The crate does not parse a surface syntax and does not store documents.
//! Hosts hand it an expression tree, a node handle type and a [`model::Navigator`];
//! evaluation produces lazy value sequences and, for updating expressions, a
//! pending update list describing intended effects without applying them.
//! Navigation may suspend at any step: suspension travels as a value through
//! the sequence protocol and the driver awaits it, so the same engine serves
//! fully in-memory trees and asynchronously backed stores.

pub mod consts;
pub mod engine;
pub mod expr;
pub mod model;
pub mod simple_node;
pub mod xdm;

pub use engine::runtime::{
    DynamicContext, DynamicContextBuilder, Error, ErrorCode, FunctionRegistry, ParamSpec,
    StaticContext, StaticContextBuilder,
};
pub use engine::updating::{
    EvaluationOptions, PendingUpdate, TransferableUpdate, UpdateKind, UpdateList,
    UpdatingResult, evaluate_updating,
};
pub use expr::{Axis, Expr, NodeTest, evaluate_stream};
pub use model::{Navigator, NodeKind, QName, XdmNode};
pub use xdm::{
    ExpandedName, Occurrence, SequenceType, TypeTag, XdmAtomicValue, XdmItem, XdmSequence,
    XdmSequenceStream, is_subtype,
};
