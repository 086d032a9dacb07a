//! The updating evaluation driver.
//!
//! Updating expressions do not mutate documents. They evaluate to a pending
//! update list: a batch of intended effects the host applies (or rejects)
//! after evaluation finishes. The driver owns the top-level lifecycle
//! (created, running, suspended, completed), awaits producer suspensions, and
//! runs the compatibility check over the merged list before releasing it.
//! All-or-nothing: an error anywhere discards values and updates alike.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::Instrument;

use crate::engine::runtime::{
    DynamicContextBuilder, Error, ErrorCode, StaticContextBuilder,
};
use crate::expr::Expr;
use crate::model::{Navigator, QName, XdmNode};
use crate::xdm::stream::Awaitable;
use crate::xdm::{ExpandedName, XdmItem, XdmSequence};

/// One intended effect against a target node.
#[derive(Debug, Clone)]
pub enum PendingUpdate<N> {
    InsertInto { target: N, content: Vec<N> },
    InsertBefore { target: N, content: Vec<N> },
    InsertAfter { target: N, content: Vec<N> },
    Delete { target: N },
    ReplaceNode { target: N, replacement: Vec<N> },
    ReplaceValue { target: N, value: String },
    Rename { target: N, new_name: QName },
}

impl<N: XdmNode> PendingUpdate<N> {
    pub fn target(&self) -> &N {
        match self {
            PendingUpdate::InsertInto { target, .. }
            | PendingUpdate::InsertBefore { target, .. }
            | PendingUpdate::InsertAfter { target, .. }
            | PendingUpdate::Delete { target }
            | PendingUpdate::ReplaceNode { target, .. }
            | PendingUpdate::ReplaceValue { target, .. }
            | PendingUpdate::Rename { target, .. } => target,
        }
    }

    /// Flatten into the host-facing record shape.
    pub fn to_transferable(&self) -> TransferableUpdate<N> {
        let (kind, target) = match self {
            PendingUpdate::InsertInto { target, .. } => (UpdateKind::InsertInto, target),
            PendingUpdate::InsertBefore { target, .. } => (UpdateKind::InsertBefore, target),
            PendingUpdate::InsertAfter { target, .. } => (UpdateKind::InsertAfter, target),
            PendingUpdate::Delete { target } => (UpdateKind::Delete, target),
            PendingUpdate::ReplaceNode { target, .. } => (UpdateKind::ReplaceNode, target),
            PendingUpdate::ReplaceValue { target, .. } => (UpdateKind::ReplaceValue, target),
            PendingUpdate::Rename { target, .. } => (UpdateKind::Rename, target),
        };
        TransferableUpdate {
            kind,
            target: target.clone(),
            content: match self {
                PendingUpdate::InsertInto { content, .. }
                | PendingUpdate::InsertBefore { content, .. }
                | PendingUpdate::InsertAfter { content, .. } => content.clone(),
                PendingUpdate::ReplaceNode { replacement, .. } => replacement.clone(),
                _ => Vec::new(),
            },
            new_name: match self {
                PendingUpdate::Rename { new_name, .. } => Some(new_name.clone()),
                _ => None,
            },
            new_value: match self {
                PendingUpdate::ReplaceValue { value, .. } => Some(value.clone()),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    InsertInto,
    InsertBefore,
    InsertAfter,
    Delete,
    ReplaceNode,
    ReplaceValue,
    Rename,
}

/// Host-facing update record: one flat shape for every kind, with the unused
/// fields empty.
#[derive(Debug, Clone)]
pub struct TransferableUpdate<N> {
    pub kind: UpdateKind,
    pub target: N,
    pub content: Vec<N>,
    pub new_name: Option<QName>,
    pub new_value: Option<String>,
}

/// Ordered batch of pending updates produced by one evaluation.
pub struct UpdateList<N> {
    updates: Vec<PendingUpdate<N>>,
}

impl<N> Default for UpdateList<N> {
    fn default() -> Self {
        Self {
            updates: Vec::new(),
        }
    }
}

impl<N: XdmNode> UpdateList<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, update: PendingUpdate<N>) {
        self.updates.push(update);
    }

    /// Concatenate another list, preserving its order after this one.
    pub fn merge(&mut self, other: UpdateList<N>) {
        self.updates.extend(other.updates);
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingUpdate<N>> {
        self.updates.iter()
    }

    /// Whole-list compatibility check, run once over the merged batch.
    ///
    /// Two replace-node updates may not share a target (`XUDY0016`), nor two
    /// replace-value updates (`XUDY0017`), nor two renames (`XUDY0015`).
    pub fn check_conflicts(&self) -> Result<(), Error> {
        let mut replaced_nodes: HashSet<&N> = HashSet::new();
        let mut replaced_values: HashSet<&N> = HashSet::new();
        let mut renamed: HashSet<&N> = HashSet::new();
        for update in &self.updates {
            match update {
                PendingUpdate::ReplaceNode { target, .. } => {
                    if !replaced_nodes.insert(target) {
                        return Err(Error::from_code(
                            ErrorCode::XUDY0016,
                            "two replace node updates share a target",
                        ));
                    }
                }
                PendingUpdate::ReplaceValue { target, .. } => {
                    if !replaced_values.insert(target) {
                        return Err(Error::from_code(
                            ErrorCode::XUDY0017,
                            "two replace value updates share a target",
                        ));
                    }
                }
                PendingUpdate::Rename { target, .. } => {
                    if !renamed.insert(target) {
                        return Err(Error::from_code(
                            ErrorCode::XUDY0015,
                            "two rename updates share a target",
                        ));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn into_transferable(self) -> Vec<TransferableUpdate<N>> {
        self.updates.iter().map(PendingUpdate::to_transferable).collect()
    }
}

/// One step of an updating producer.
pub enum UpdatingStep<N> {
    Pending(Awaitable),
    Complete(UpdatingOutcome<N>),
}

/// Final outcome of one updating producer: the value part and the update part.
pub struct UpdatingOutcome<N> {
    pub values: XdmSequence<N>,
    pub updates: UpdateList<N>,
}

/// A resumable evaluation of one updating expression. `step` either completes
/// or hands back an awaitable; after awaiting, calling `step` again resumes in
/// place.
pub trait UpdatingProducer<N>: Send {
    fn step(&mut self) -> Result<UpdatingStep<N>, Error>;
}

/// Top-level evaluation options.
#[derive(Default)]
pub struct EvaluationOptions {
    /// Emit state-transition events through `tracing` at debug level.
    pub debug_tracing: bool,
    /// Prefix/URI pairs bound into the static context before evaluation.
    pub namespaces: Vec<(String, String)>,
    /// Module name to location hints, kept on the static context.
    pub module_imports: HashMap<String, String>,
}

/// What an updating evaluation yields: the value sequence (usually empty for
/// pure updating expressions) plus the pending update list in host shape.
#[derive(Debug)]
pub struct UpdatingResult<N> {
    pub values: XdmSequence<N>,
    pub pending_updates: Vec<TransferableUpdate<N>>,
}

/// Evaluate an updating expression to completion.
///
/// Rejects non-updating expressions with `XUST0001` before any evaluation
/// step runs. On success the pending updates have passed the compatibility
/// check; on any error nothing is released.
pub async fn evaluate_updating<N: XdmNode>(
    expr: &Expr,
    context_item: Option<XdmItem<N>>,
    navigator: Arc<dyn Navigator<N>>,
    variables: HashMap<ExpandedName, XdmSequence<N>>,
    options: EvaluationOptions,
) -> Result<UpdatingResult<N>, Error> {
    let mut static_builder = StaticContextBuilder::new();
    for (name, location) in &options.module_imports {
        static_builder = static_builder.with_module_import(name.clone(), location.clone());
    }
    let mut static_ctx = static_builder.build();
    for (prefix, uri) in &options.namespaces {
        static_ctx.bind_prefix(prefix, uri)?;
    }

    let mut dyn_builder = DynamicContextBuilder::new(navigator);
    if let Some(item) = context_item {
        dyn_builder = dyn_builder.with_context_item(item);
    }
    let mut dyn_ctx = dyn_builder.build();
    dyn_ctx.variables = variables;

    if !expr.is_updating() {
        return Err(Error::from_code(
            ErrorCode::XUST0001,
            "top-level expression is not an updating expression",
        ));
    }

    let span = if options.debug_tracing {
        tracing::debug_span!("updating_evaluation")
    } else {
        tracing::Span::none()
    };
    let drive = async move {
        tracing::debug!(state = "created", "updating evaluation starting");
        let mut producer = crate::expr::updating_producer(expr.clone(), dyn_ctx, static_ctx)?;
        tracing::debug!(state = "running", "updating evaluation running");
        loop {
            match producer.step()? {
                UpdatingStep::Pending(awaitable) => {
                    tracing::debug!(state = "suspended", "awaiting navigator resolution");
                    awaitable.await;
                    tracing::debug!(state = "running", "resumed after suspension");
                }
                UpdatingStep::Complete(outcome) => {
                    outcome.updates.check_conflicts()?;
                    tracing::debug!(
                        state = "completed",
                        updates = outcome.updates.len(),
                        values = outcome.values.len(),
                        "updating evaluation completed"
                    );
                    return Ok(UpdatingResult {
                        values: outcome.values,
                        pending_updates: outcome.updates.into_transferable(),
                    });
                }
            }
        }
    };
    drive.instrument(span).await
}
