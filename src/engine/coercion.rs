//! Argument coercion against declared parameter types.
//!
//! Coercion is layered lazily over the argument stream: cardinality hints that
//! already prove a multiplicity violation fail at wiring time, everything else
//! is checked item by item as the callee pulls. Per-item conversion applies,
//! in order: exact subtype match, atomization of nodes when an atomic type is
//! expected, untyped casting, then numeric/URI promotion.

use std::sync::Arc;

use crate::engine::casting::{atomize, cast_atomic, promote_atomic};
use crate::engine::runtime::{Error, ErrorCode, ParamSpec};
use crate::model::XdmNode;
use crate::xdm::stream::{CardinalityCase, IterationStep, SequenceCursor};
use crate::xdm::{Occurrence, TypeTag, XdmItem, XdmSequenceStream, is_subtype};

/// Wrap `actual` so that items conform to `decl` when pulled.
///
/// `function_name` only feeds diagnostics; multiplicity and type errors name
/// the function whose parameter was violated.
pub fn transform_argument<N: XdmNode>(
    decl: &ParamSpec,
    actual: XdmSequenceStream<N>,
    function_name: &str,
) -> Result<XdmSequenceStream<N>, Error> {
    match (actual.classify(), decl.occurrence) {
        (CardinalityCase::Multiple, Occurrence::One | Occurrence::Optional) => {
            return Err(too_many(function_name, decl));
        }
        (CardinalityCase::Empty, Occurrence::One | Occurrence::Plus) => {
            return Err(too_few(function_name, decl));
        }
        _ => {}
    }
    Ok(XdmSequenceStream::from_cursor(CoercionCursor {
        inner: actual,
        decl: *decl,
        function_name: function_name.to_string(),
        seen: 0,
    }))
}

fn too_many(function_name: &str, decl: &ParamSpec) -> Error {
    Error::from_code(
        ErrorCode::XPTY0004,
        format!("argument to {function_name} has more than one item, expected {decl}"),
    )
}

fn too_few(function_name: &str, decl: &ParamSpec) -> Error {
    Error::from_code(
        ErrorCode::XPTY0004,
        format!("argument to {function_name} is an empty sequence, expected {decl}"),
    )
}

/// One argument item converted to the declared item type.
fn coerce_item<N: XdmNode>(
    item: XdmItem<N>,
    decl: &ParamSpec,
    function_name: &str,
) -> Result<XdmItem<N>, Error> {
    let target = decl.ty;
    if is_subtype(item.type_tag(), target) {
        return Ok(item);
    }
    let atomic = match &item {
        XdmItem::Node(_) if is_subtype(target, TypeTag::AnyAtomic) => atomize(&item)?,
        XdmItem::Atomic(a) => a.clone(),
        other => {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!(
                    "argument to {function_name} has type {}, expected {decl}",
                    other.type_tag()
                ),
            ));
        }
    };
    if is_subtype(atomic.type_tag(), target) {
        return Ok(XdmItem::Atomic(atomic));
    }
    if atomic.type_tag() == TypeTag::UntypedAtomic {
        // Untyped data casts to the declared type; a numeric union target
        // takes the double lexical space.
        let concrete = if target == TypeTag::Numeric {
            TypeTag::Double
        } else {
            target
        };
        let cast = cast_atomic(&atomic, concrete).map_err(|e| {
            let source: Arc<dyn std::error::Error + Send + Sync> = Arc::new(e);
            Error::from_code(
                ErrorCode::XPTY0004,
                format!("argument to {function_name} cannot be cast from xs:untypedAtomic to {decl}"),
            )
            .with_source(source)
        })?;
        return Ok(XdmItem::Atomic(cast));
    }
    let promoted = promote_atomic(&atomic, target).map_err(|_| {
        Error::from_code(
            ErrorCode::XPTY0004,
            format!(
                "argument to {function_name} has type {}, expected {decl}",
                atomic.type_tag()
            ),
        )
    })?;
    Ok(XdmItem::Atomic(promoted))
}

struct CoercionCursor<N> {
    inner: XdmSequenceStream<N>,
    decl: ParamSpec,
    function_name: String,
    seen: usize,
}

impl<N: XdmNode> SequenceCursor<N> for CoercionCursor<N> {
    fn next_step(&mut self) -> Result<IterationStep<N>, Error> {
        match self.inner.next_step()? {
            IterationStep::Ready(item) => {
                self.seen += 1;
                if self.seen > 1
                    && matches!(
                        self.decl.occurrence,
                        Occurrence::One | Occurrence::Optional
                    )
                {
                    return Err(too_many(&self.function_name, &self.decl));
                }
                Ok(IterationStep::Ready(coerce_item(
                    item,
                    &self.decl,
                    &self.function_name,
                )?))
            }
            IterationStep::Pending(aw) => Ok(IterationStep::Pending(aw)),
            IterationStep::Done => {
                if self.seen == 0
                    && matches!(self.decl.occurrence, Occurrence::One | Occurrence::Plus)
                {
                    return Err(too_few(&self.function_name, &self.decl));
                }
                Ok(IterationStep::Done)
            }
        }
    }
}
