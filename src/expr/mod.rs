//! Expression tree and its evaluation.
//!
//! The substrate takes a pre-built expression tree; parsing a surface syntax
//! into it is the host's concern. Value expressions evaluate to lazy streams,
//! updating expressions evaluate through [`UpdatingProducer`]s that yield
//! pending update lists. The two worlds are kept apart statically: an
//! updating expression in a value position is `XUST0001`, and so is a
//! non-updating expression handed to the updating driver.

use std::sync::Arc;

use crate::engine::coercion::transform_argument;
use crate::engine::doc_order::{OrderingContext, sort_and_dedupe};
use crate::engine::runtime::{
    CallCtx, DynamicContext, Error, ErrorCode, StaticContext,
};
use crate::engine::updating::{
    PendingUpdate, UpdateList, UpdatingOutcome, UpdatingProducer, UpdatingStep,
};
use crate::model::{Navigator, NodeKind, QName, XdmNode};
use crate::xdm::stream::{
    Collector, FetchSlot, IterationStep, Resolved, SequenceCursor,
};
use crate::xdm::{
    ExpandedName, SequenceType, XdmAtomicValue, XdmItem, XdmSequence, XdmSequenceStream,
    is_subtype,
};

/// Navigation axes supported by path steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Attribute,
    Parent,
    SelfAxis,
    PrecedingSibling,
}

/// Node filter applied by a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    AnyKind,
    Kind(NodeKind),
    Name(ExpandedName),
}

impl NodeTest {
    /// A name test only selects named nodes (elements and attributes).
    pub fn matches<N: XdmNode>(&self, node: &N) -> bool {
        match self {
            NodeTest::AnyKind => true,
            NodeTest::Kind(k) => node.kind() == *k,
            NodeTest::Name(expected) => {
                if !matches!(node.kind(), NodeKind::Element | NodeKind::Attribute) {
                    return false;
                }
                match node.name() {
                    Some(q) => q.local == expected.local && q.ns_uri == expected.ns_uri,
                    None => false,
                }
            }
        }
    }
}

/// The expression tree.
///
/// `Rename` carries the new name lexically; the prefix resolves against the
/// static context when the producer is built, so an unbound prefix fails
/// before any evaluation step runs.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(XdmAtomicValue),
    ContextItem,
    VarRef(ExpandedName),
    Sequence(Vec<Expr>),
    Path { left: Box<Expr>, right: Box<Expr> },
    Step { axis: Axis, test: NodeTest },
    InstanceOf { operand: Box<Expr>, ty: SequenceType },
    FunctionCall { name: ExpandedName, args: Vec<Expr> },
    InsertInto { source: Box<Expr>, target: Box<Expr> },
    InsertBefore { source: Box<Expr>, target: Box<Expr> },
    InsertAfter { source: Box<Expr>, target: Box<Expr> },
    Delete { target: Box<Expr> },
    ReplaceNode { target: Box<Expr>, replacement: Box<Expr> },
    ReplaceValue { target: Box<Expr>, value: Box<Expr> },
    Rename { target: Box<Expr>, new_name: String },
}

impl Expr {
    /// Static updating classification, total over the tree.
    pub fn is_updating(&self) -> bool {
        match self {
            Expr::InsertInto { .. }
            | Expr::InsertBefore { .. }
            | Expr::InsertAfter { .. }
            | Expr::Delete { .. }
            | Expr::ReplaceNode { .. }
            | Expr::ReplaceValue { .. }
            | Expr::Rename { .. } => true,
            Expr::Sequence(items) => items.iter().any(Expr::is_updating),
            _ => false,
        }
    }
}

fn updating_in_value_position() -> Error {
    Error::from_code(
        ErrorCode::XUST0001,
        "updating expression used in a value position",
    )
}

/// Evaluate a value expression to a lazy stream.
pub fn evaluate_stream<N: XdmNode>(
    expr: &Expr,
    ctx: &DynamicContext<N>,
    sctx: &StaticContext,
) -> Result<XdmSequenceStream<N>, Error> {
    match expr {
        Expr::Literal(a) => Ok(XdmSequenceStream::singleton(XdmItem::Atomic(a.clone()))),
        Expr::ContextItem => Ok(XdmSequenceStream::singleton(ctx.context_item()?)),
        Expr::VarRef(name) => Ok(XdmSequenceStream::from_vec(ctx.variable(name)?)),
        Expr::Sequence(items) => {
            if items.iter().any(Expr::is_updating) {
                return Err(updating_in_value_position());
            }
            let mut streams = std::collections::VecDeque::new();
            for item in items {
                streams.push_back(evaluate_stream(item, ctx, sctx)?);
            }
            Ok(XdmSequenceStream::from_cursor(ConcatCursor { streams }))
        }
        Expr::Path { left, right } => {
            let left_stream = evaluate_stream(left, ctx, sctx)?;
            Ok(XdmSequenceStream::from_cursor(PathCursor {
                ctx: ctx.clone(),
                sctx: sctx.clone(),
                right: (**right).clone(),
                acc: Vec::new(),
                ordering: OrderingContext::new(),
                state: PathState::DrainLeft(Collector::new(left_stream)),
            }))
        }
        Expr::Step { axis, test } => {
            let origin = match ctx.context_item()? {
                XdmItem::Node(n) => n,
                other => {
                    return Err(Error::from_code(
                        ErrorCode::XPTY0004,
                        format!("axis step applied to a {} item", other.type_tag()),
                    ));
                }
            };
            Ok(XdmSequenceStream::from_cursor(AxisCursor {
                nav: ctx.navigator.clone(),
                axis: *axis,
                test: test.clone(),
                origin,
                state: AxisState::Start,
                list_slot: FetchSlot::Idle,
                opt_slot: FetchSlot::Idle,
            }))
        }
        Expr::InstanceOf { operand, ty } => {
            let input = evaluate_stream(operand, ctx, sctx)?;
            let ty = ty.clone();
            Ok(XdmSequenceStream::from_cursor(
                crate::xdm::stream::CollectingCursor::new(input, move |items: XdmSequence<N>| {
                    Ok(vec![XdmItem::Atomic(XdmAtomicValue::Boolean(
                        sequence_matches(&items, &ty),
                    ))])
                }),
            ))
        }
        Expr::FunctionCall { name, args } => {
            let entry =
                ctx.functions
                    .resolve(name, args.len(), sctx.default_function_namespace.as_deref())?;
            let body = entry.body.clone();
            let params = entry.params.clone();
            let fname = name.to_string();
            let mut coerced = Vec::with_capacity(args.len());
            for (arg, param) in args.iter().zip(params.iter()) {
                let raw = evaluate_stream(arg, ctx, sctx)?;
                coerced.push(transform_argument(param, raw, &fname)?);
            }
            let call_ctx = CallCtx {
                dyn_ctx: ctx,
                static_ctx: sctx,
            };
            body(&call_ctx, coerced)
        }
        Expr::InsertInto { .. }
        | Expr::InsertBefore { .. }
        | Expr::InsertAfter { .. }
        | Expr::Delete { .. }
        | Expr::ReplaceNode { .. }
        | Expr::ReplaceValue { .. }
        | Expr::Rename { .. } => Err(updating_in_value_position()),
    }
}

fn sequence_matches<N: XdmNode>(items: &XdmSequence<N>, ty: &SequenceType) -> bool {
    match ty {
        SequenceType::Empty => items.is_empty(),
        SequenceType::Typed { ty, occurrence } => {
            use crate::xdm::Occurrence;
            let len_ok = match occurrence {
                Occurrence::One => items.len() == 1,
                Occurrence::Optional => items.len() <= 1,
                Occurrence::Plus => !items.is_empty(),
                Occurrence::Star => true,
            };
            len_ok && items.iter().all(|it| is_subtype(it.type_tag(), *ty))
        }
    }
}

struct ConcatCursor<N> {
    streams: std::collections::VecDeque<XdmSequenceStream<N>>,
}

impl<N: XdmNode> SequenceCursor<N> for ConcatCursor<N> {
    fn next_step(&mut self) -> Result<IterationStep<N>, Error> {
        loop {
            let Some(front) = self.streams.front_mut() else {
                return Ok(IterationStep::Done);
            };
            match front.next_step()? {
                IterationStep::Ready(it) => return Ok(IterationStep::Ready(it)),
                IterationStep::Pending(aw) => return Ok(IterationStep::Pending(aw)),
                IterationStep::Done => {
                    self.streams.pop_front();
                }
            }
        }
    }
}

enum AxisState<N> {
    Start,
    List(std::vec::IntoIter<N>),
    Walk { cursor: N },
    Done,
}

struct AxisCursor<N: XdmNode> {
    nav: Arc<dyn Navigator<N>>,
    axis: Axis,
    test: NodeTest,
    origin: N,
    state: AxisState<N>,
    list_slot: FetchSlot<Vec<N>>,
    opt_slot: FetchSlot<Option<N>>,
}

impl<N: XdmNode> SequenceCursor<N> for AxisCursor<N> {
    fn next_step(&mut self) -> Result<IterationStep<N>, Error> {
        loop {
            match &mut self.state {
                AxisState::Start => match self.axis {
                    Axis::SelfAxis => {
                        self.state = AxisState::Done;
                        if self.test.matches(&self.origin) {
                            return Ok(IterationStep::Ready(XdmItem::Node(self.origin.clone())));
                        }
                    }
                    Axis::Child => {
                        let origin = self.origin.clone();
                        let nav = self.nav.clone();
                        match self.list_slot.poll_with(|| nav.children(&origin))? {
                            Resolved::Later(aw) => return Ok(IterationStep::Pending(aw)),
                            Resolved::Now(list) => {
                                self.state = AxisState::List(list.into_iter());
                            }
                        }
                    }
                    Axis::Attribute => {
                        let origin = self.origin.clone();
                        let nav = self.nav.clone();
                        match self.list_slot.poll_with(|| nav.attributes(&origin))? {
                            Resolved::Later(aw) => return Ok(IterationStep::Pending(aw)),
                            Resolved::Now(list) => {
                                self.state = AxisState::List(list.into_iter());
                            }
                        }
                    }
                    Axis::Parent => {
                        let origin = self.origin.clone();
                        let nav = self.nav.clone();
                        match self.opt_slot.poll_with(|| nav.parent(&origin))? {
                            Resolved::Later(aw) => return Ok(IterationStep::Pending(aw)),
                            Resolved::Now(parent) => {
                                self.state = AxisState::Done;
                                if let Some(p) = parent {
                                    if self.test.matches(&p) {
                                        return Ok(IterationStep::Ready(XdmItem::Node(p)));
                                    }
                                }
                            }
                        }
                    }
                    Axis::PrecedingSibling => {
                        self.state = AxisState::Walk {
                            cursor: self.origin.clone(),
                        };
                    }
                },
                AxisState::List(iter) => match iter.next() {
                    Some(n) => {
                        if self.test.matches(&n) {
                            return Ok(IterationStep::Ready(XdmItem::Node(n)));
                        }
                    }
                    None => self.state = AxisState::Done,
                },
                AxisState::Walk { cursor } => {
                    let cur = cursor.clone();
                    let nav = self.nav.clone();
                    match self.opt_slot.poll_with(|| nav.previous_sibling(&cur))? {
                        Resolved::Later(aw) => return Ok(IterationStep::Pending(aw)),
                        Resolved::Now(Some(prev)) => {
                            *cursor = prev.clone();
                            if self.test.matches(&prev) {
                                return Ok(IterationStep::Ready(XdmItem::Node(prev)));
                            }
                        }
                        Resolved::Now(None) => self.state = AxisState::Done,
                    }
                }
                AxisState::Done => return Ok(IterationStep::Done),
            }
        }
    }
}

enum PathState<N: XdmNode> {
    DrainLeft(Collector<N>),
    MapItems {
        inputs: std::vec::IntoIter<XdmItem<N>>,
        current: Option<Collector<N>>,
    },
    Normalize(Vec<N>),
    Emitting(std::vec::IntoIter<XdmItem<N>>),
    Finished,
}

/// Relative evaluation of the right side over each item of the left side,
/// followed by order normalization when the combined result is nodes.
struct PathCursor<N: XdmNode> {
    ctx: DynamicContext<N>,
    sctx: StaticContext,
    right: Expr,
    acc: XdmSequence<N>,
    ordering: OrderingContext<N>,
    state: PathState<N>,
}

impl<N: XdmNode> PathCursor<N> {
    fn finish_mapping(&mut self) -> Result<(), Error> {
        let any_node = self.acc.iter().any(|it| matches!(it, XdmItem::Node(_)));
        let all_nodes = self.acc.iter().all(|it| matches!(it, XdmItem::Node(_)));
        if any_node && !all_nodes {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                "path result mixes nodes and atomic values",
            ));
        }
        if all_nodes && !self.acc.is_empty() {
            let nodes = std::mem::take(&mut self.acc)
                .into_iter()
                .map(|it| match it {
                    XdmItem::Node(n) => n,
                    _ => unreachable!(),
                })
                .collect();
            self.state = PathState::Normalize(nodes);
        } else {
            let out = std::mem::take(&mut self.acc);
            self.state = PathState::Emitting(out.into_iter());
        }
        Ok(())
    }
}

impl<N: XdmNode> SequenceCursor<N> for PathCursor<N> {
    fn next_step(&mut self) -> Result<IterationStep<N>, Error> {
        loop {
            match &mut self.state {
                PathState::DrainLeft(collector) => match collector.drive()? {
                    Resolved::Later(aw) => return Ok(IterationStep::Pending(aw)),
                    Resolved::Now(()) => {
                        let state = std::mem::replace(&mut self.state, PathState::Finished);
                        let PathState::DrainLeft(collector) = state else {
                            unreachable!()
                        };
                        self.state = PathState::MapItems {
                            inputs: collector.into_items().into_iter(),
                            current: None,
                        };
                    }
                },
                PathState::MapItems { inputs, current } => {
                    if let Some(collector) = current.as_mut() {
                        match collector.drive()? {
                            Resolved::Later(aw) => return Ok(IterationStep::Pending(aw)),
                            Resolved::Now(()) => {
                                let Some(done) = current.take() else {
                                    unreachable!()
                                };
                                self.acc.extend(done.into_items());
                            }
                        }
                        continue;
                    }
                    match inputs.next() {
                        Some(item) => {
                            if !matches!(item, XdmItem::Node(_)) {
                                return Err(Error::from_code(
                                    ErrorCode::XPTY0004,
                                    format!(
                                        "path step applied to a {} item",
                                        item.type_tag()
                                    ),
                                ));
                            }
                            let focus = self.ctx.with_focus(item);
                            let stream = evaluate_stream(&self.right, &focus, &self.sctx)?;
                            *current = Some(Collector::new(stream));
                        }
                        None => self.finish_mapping()?,
                    }
                }
                PathState::Normalize(nodes) => {
                    let nav = self.ctx.navigator.clone();
                    match sort_and_dedupe(nav.as_ref(), &mut self.ordering, nodes.clone())? {
                        Resolved::Later(aw) => return Ok(IterationStep::Pending(aw)),
                        Resolved::Now(sorted) => {
                            let out: XdmSequence<N> =
                                sorted.into_iter().map(XdmItem::Node).collect();
                            self.state = PathState::Emitting(out.into_iter());
                        }
                    }
                }
                PathState::Emitting(iter) => match iter.next() {
                    Some(it) => return Ok(IterationStep::Ready(it)),
                    None => self.state = PathState::Finished,
                },
                PathState::Finished => return Ok(IterationStep::Done),
            }
        }
    }
}

/// Build a producer for an updating expression. Non-updating expressions are
/// rejected here, before any evaluation step runs, as is an unresolvable
/// rename prefix.
pub fn updating_producer<N: XdmNode>(
    expr: Expr,
    ctx: DynamicContext<N>,
    sctx: StaticContext,
) -> Result<Box<dyn UpdatingProducer<N>>, Error> {
    match expr {
        Expr::Sequence(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                parts.push(updating_producer(item, ctx.clone(), sctx.clone())?);
            }
            Ok(Box::new(SequenceProducer {
                parts: parts.into_iter(),
                current: None,
                values: Vec::new(),
                updates: UpdateList::new(),
            }))
        }
        Expr::InsertInto { source, target } => Ok(Box::new(SingleUpdateProducer::new(
            ctx,
            sctx,
            UpdateOp::InsertInto,
            Some(*source),
            *target,
        ))),
        Expr::InsertBefore { source, target } => Ok(Box::new(SingleUpdateProducer::new(
            ctx,
            sctx,
            UpdateOp::InsertBefore,
            Some(*source),
            *target,
        ))),
        Expr::InsertAfter { source, target } => Ok(Box::new(SingleUpdateProducer::new(
            ctx,
            sctx,
            UpdateOp::InsertAfter,
            Some(*source),
            *target,
        ))),
        Expr::Delete { target } => Ok(Box::new(SingleUpdateProducer::new(
            ctx,
            sctx,
            UpdateOp::Delete,
            None,
            *target,
        ))),
        Expr::ReplaceNode {
            target,
            replacement,
        } => Ok(Box::new(SingleUpdateProducer::new(
            ctx,
            sctx,
            UpdateOp::ReplaceNode,
            Some(*replacement),
            *target,
        ))),
        Expr::ReplaceValue { target, value } => Ok(Box::new(SingleUpdateProducer::new(
            ctx,
            sctx,
            UpdateOp::ReplaceValue,
            Some(*value),
            *target,
        ))),
        Expr::Rename { target, new_name } => {
            let resolved = resolve_lexical_name(&new_name, &sctx)?;
            Ok(Box::new(SingleUpdateProducer::new(
                ctx,
                sctx,
                UpdateOp::Rename { new_name: resolved },
                None,
                *target,
            )))
        }
        other => {
            // Non-updating expressions contribute their values and an empty
            // update list; the driver rejects fully non-updating top levels
            // before producers are built.
            let stream = evaluate_stream(&other, &ctx, &sctx)?;
            Ok(Box::new(ValueProducer {
                collector: Collector::new(stream),
            }))
        }
    }
}

struct ValueProducer<N: XdmNode> {
    collector: Collector<N>,
}

impl<N: XdmNode> UpdatingProducer<N> for ValueProducer<N> {
    fn step(&mut self) -> Result<UpdatingStep<N>, Error> {
        match self.collector.drive()? {
            Resolved::Later(aw) => Ok(UpdatingStep::Pending(aw)),
            Resolved::Now(()) => Ok(UpdatingStep::Complete(UpdatingOutcome {
                values: self.collector.take_items(),
                updates: UpdateList::new(),
            })),
        }
    }
}

/// Resolve a lexical QName against the in-scope namespace bindings.
fn resolve_lexical_name(lexical: &str, sctx: &StaticContext) -> Result<QName, Error> {
    match lexical.split_once(':') {
        Some((prefix, local)) => {
            let uri = sctx.resolve_prefix(prefix).ok_or_else(|| {
                Error::from_code(
                    ErrorCode::XPST0081,
                    format!("namespace prefix '{prefix}' is not bound"),
                )
            })?;
            Ok(QName {
                prefix: Some(prefix.to_string()),
                local: local.to_string(),
                ns_uri: Some(uri.to_string()),
            })
        }
        None => Ok(QName::local_only(lexical)),
    }
}

struct SequenceProducer<N: XdmNode> {
    parts: std::vec::IntoIter<Box<dyn UpdatingProducer<N>>>,
    current: Option<Box<dyn UpdatingProducer<N>>>,
    values: XdmSequence<N>,
    updates: UpdateList<N>,
}

impl<N: XdmNode> UpdatingProducer<N> for SequenceProducer<N> {
    fn step(&mut self) -> Result<UpdatingStep<N>, Error> {
        loop {
            if let Some(producer) = &mut self.current {
                match producer.step()? {
                    UpdatingStep::Pending(aw) => return Ok(UpdatingStep::Pending(aw)),
                    UpdatingStep::Complete(outcome) => {
                        self.values.extend(outcome.values);
                        self.updates.merge(outcome.updates);
                        self.current = None;
                    }
                }
                continue;
            }
            match self.parts.next() {
                Some(p) => self.current = Some(p),
                None => {
                    return Ok(UpdatingStep::Complete(UpdatingOutcome {
                        values: std::mem::take(&mut self.values),
                        updates: std::mem::take(&mut self.updates),
                    }));
                }
            }
        }
    }
}

enum UpdateOp {
    InsertInto,
    InsertBefore,
    InsertAfter,
    Delete,
    ReplaceNode,
    ReplaceValue,
    Rename { new_name: QName },
}

enum UpdateStage<N: XdmNode> {
    Init,
    CollectPrimary(Collector<N>),
    CollectTarget {
        primary: XdmSequence<N>,
        collector: Collector<N>,
    },
    CheckParent {
        primary: XdmSequence<N>,
        target: N,
        slot: FetchSlot<Option<N>>,
    },
    Finished,
}

/// Evaluates one updating operation: primary operand first (content,
/// replacement or value, when the operation has one), then the target, then
/// the target-shape checks, ending in exactly one pending update (or one per
/// delete target).
struct SingleUpdateProducer<N: XdmNode> {
    ctx: DynamicContext<N>,
    sctx: StaticContext,
    op: UpdateOp,
    primary_expr: Option<Expr>,
    target_expr: Expr,
    stage: UpdateStage<N>,
}

impl<N: XdmNode> SingleUpdateProducer<N> {
    fn new(
        ctx: DynamicContext<N>,
        sctx: StaticContext,
        op: UpdateOp,
        primary_expr: Option<Expr>,
        target_expr: Expr,
    ) -> Self {
        Self {
            ctx,
            sctx,
            op,
            primary_expr,
            target_expr,
            stage: UpdateStage::Init,
        }
    }

    fn complete(&self, updates: UpdateList<N>) -> UpdatingStep<N> {
        UpdatingStep::Complete(UpdatingOutcome {
            values: Vec::new(),
            updates,
        })
    }

    /// Target validation shared by all operations that take a single target.
    fn single_target(
        &self,
        targets: &XdmSequence<N>,
        allowed: &[NodeKind],
        wrong_kind: ErrorCode,
        what: &str,
    ) -> Result<N, Error> {
        if targets.is_empty() {
            return Err(Error::from_code(
                ErrorCode::XUDY0027,
                format!("{what} target is the empty sequence"),
            ));
        }
        if targets.len() > 1 {
            return Err(Error::from_code(
                wrong_kind,
                format!("{what} target is a sequence of more than one item"),
            ));
        }
        match &targets[0] {
            XdmItem::Node(n) if allowed.contains(&n.kind()) => Ok(n.clone()),
            XdmItem::Node(n) => Err(Error::from_code(
                wrong_kind,
                format!("{what} target is a {:?} node", n.kind()),
            )),
            other => Err(Error::from_code(
                wrong_kind,
                format!("{what} target is a {} item", other.type_tag()),
            )),
        }
    }

    /// Build the final update once operands are validated.
    fn finalize(&mut self, primary: XdmSequence<N>, target: N) -> Result<UpdatingStep<N>, Error> {
        let mut updates = UpdateList::new();
        match &self.op {
            UpdateOp::InsertInto => {
                let content = require_content_nodes(primary, "insert")?;
                updates.push(PendingUpdate::InsertInto { target, content });
            }
            UpdateOp::InsertBefore => {
                let content = require_content_nodes(primary, "insert")?;
                updates.push(PendingUpdate::InsertBefore { target, content });
            }
            UpdateOp::InsertAfter => {
                let content = require_content_nodes(primary, "insert")?;
                updates.push(PendingUpdate::InsertAfter { target, content });
            }
            UpdateOp::Delete => unreachable!(),
            UpdateOp::ReplaceNode => {
                let replacement = require_content_nodes(primary, "replace")?;
                if target.kind() == NodeKind::Attribute {
                    if replacement.iter().any(|n| n.kind() != NodeKind::Attribute) {
                        return Err(Error::from_code(
                            ErrorCode::XUTY0011,
                            "replacement for an attribute must be attribute nodes",
                        ));
                    }
                } else if replacement.iter().any(|n| n.kind() == NodeKind::Attribute) {
                    return Err(Error::from_code(
                        ErrorCode::XUTY0010,
                        "replacement for a non-attribute node must not contain attributes",
                    ));
                }
                updates.push(PendingUpdate::ReplaceNode {
                    target,
                    replacement,
                });
            }
            UpdateOp::ReplaceValue => {
                let value = match primary.first() {
                    None => String::new(),
                    Some(item) => crate::engine::casting::atomize(item)?.lexical(),
                };
                updates.push(PendingUpdate::ReplaceValue { target, value });
            }
            UpdateOp::Rename { new_name } => {
                updates.push(PendingUpdate::Rename {
                    target,
                    new_name: new_name.clone(),
                });
            }
        }
        Ok(self.complete(updates))
    }
}

fn require_content_nodes<N: XdmNode>(
    items: XdmSequence<N>,
    what: &str,
) -> Result<Vec<N>, Error> {
    items
        .into_iter()
        .map(|it| match it {
            XdmItem::Node(n) => Ok(n),
            other => Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("{what} content contains a {} item", other.type_tag()),
            )),
        })
        .collect()
}

const REPLACEABLE: &[NodeKind] = &[
    NodeKind::Element,
    NodeKind::Attribute,
    NodeKind::Text,
    NodeKind::Comment,
    NodeKind::ProcessingInstruction,
];

const CHILD_KINDS: &[NodeKind] = &[
    NodeKind::Element,
    NodeKind::Text,
    NodeKind::Comment,
    NodeKind::ProcessingInstruction,
];

impl<N: XdmNode> UpdatingProducer<N> for SingleUpdateProducer<N> {
    fn step(&mut self) -> Result<UpdatingStep<N>, Error> {
        loop {
            match &mut self.stage {
                UpdateStage::Init => {
                    self.stage = match self.primary_expr.take() {
                        Some(expr) => {
                            let stream = evaluate_stream(&expr, &self.ctx, &self.sctx)?;
                            UpdateStage::CollectPrimary(Collector::new(stream))
                        }
                        None => {
                            let stream =
                                evaluate_stream(&self.target_expr, &self.ctx, &self.sctx)?;
                            UpdateStage::CollectTarget {
                                primary: Vec::new(),
                                collector: Collector::new(stream),
                            }
                        }
                    };
                }
                UpdateStage::CollectPrimary(collector) => match collector.drive()? {
                    Resolved::Later(aw) => return Ok(UpdatingStep::Pending(aw)),
                    Resolved::Now(()) => {
                        let stage = std::mem::replace(&mut self.stage, UpdateStage::Finished);
                        let UpdateStage::CollectPrimary(collector) = stage else {
                            unreachable!()
                        };
                        let stream = evaluate_stream(&self.target_expr, &self.ctx, &self.sctx)?;
                        self.stage = UpdateStage::CollectTarget {
                            primary: collector.into_items(),
                            collector: Collector::new(stream),
                        };
                    }
                },
                UpdateStage::CollectTarget { collector, .. } => match collector.drive()? {
                    Resolved::Later(aw) => return Ok(UpdatingStep::Pending(aw)),
                    Resolved::Now(()) => {
                        let stage = std::mem::replace(&mut self.stage, UpdateStage::Finished);
                        let UpdateStage::CollectTarget { primary, collector } = stage else {
                            unreachable!()
                        };
                        let targets = collector.into_items();
                        match &self.op {
                            UpdateOp::Delete => {
                                // Any number of node targets; empty is a no-op.
                                let mut updates = UpdateList::new();
                                for item in targets {
                                    match item {
                                        XdmItem::Node(n) => {
                                            updates.push(PendingUpdate::Delete { target: n });
                                        }
                                        other => {
                                            return Err(Error::from_code(
                                                ErrorCode::XUTY0007,
                                                format!(
                                                    "delete target contains a {} item",
                                                    other.type_tag()
                                                ),
                                            ));
                                        }
                                    }
                                }
                                return Ok(self.complete(updates));
                            }
                            UpdateOp::InsertInto => {
                                let target = self.single_target(
                                    &targets,
                                    &[NodeKind::Element, NodeKind::Document],
                                    ErrorCode::XUTY0005,
                                    "insert",
                                )?;
                                return self.finalize(primary, target);
                            }
                            UpdateOp::InsertBefore | UpdateOp::InsertAfter => {
                                let target = self.single_target(
                                    &targets,
                                    CHILD_KINDS,
                                    ErrorCode::XUTY0006,
                                    "insert",
                                )?;
                                self.stage = UpdateStage::CheckParent {
                                    primary,
                                    target,
                                    slot: FetchSlot::Idle,
                                };
                            }
                            UpdateOp::ReplaceNode => {
                                let target = self.single_target(
                                    &targets,
                                    REPLACEABLE,
                                    ErrorCode::XUTY0008,
                                    "replace",
                                )?;
                                if target.kind() == NodeKind::Attribute {
                                    // Attributes have an owner, not a child
                                    // position; no parent check needed.
                                    return self.finalize(primary, target);
                                }
                                self.stage = UpdateStage::CheckParent {
                                    primary,
                                    target,
                                    slot: FetchSlot::Idle,
                                };
                            }
                            UpdateOp::ReplaceValue => {
                                let target = self.single_target(
                                    &targets,
                                    REPLACEABLE,
                                    ErrorCode::XUTY0008,
                                    "replace value",
                                )?;
                                return self.finalize(primary, target);
                            }
                            UpdateOp::Rename { .. } => {
                                let target = self.single_target(
                                    &targets,
                                    &[
                                        NodeKind::Element,
                                        NodeKind::Attribute,
                                        NodeKind::ProcessingInstruction,
                                    ],
                                    ErrorCode::XUTY0012,
                                    "rename",
                                )?;
                                return self.finalize(primary, target);
                            }
                        }
                    }
                },
                UpdateStage::CheckParent { target, slot, .. } => {
                    let node = target.clone();
                    let nav = self.ctx.navigator.clone();
                    match slot.poll_with(|| nav.parent(&node))? {
                        Resolved::Later(aw) => return Ok(UpdatingStep::Pending(aw)),
                        Resolved::Now(Some(_)) => {
                            let stage =
                                std::mem::replace(&mut self.stage, UpdateStage::Finished);
                            let UpdateStage::CheckParent {
                                primary, target, ..
                            } = stage
                            else {
                                unreachable!()
                            };
                            return self.finalize(primary, target);
                        }
                        Resolved::Now(None) => {
                            let code = match self.op {
                                UpdateOp::ReplaceNode => ErrorCode::XUDY0009,
                                _ => ErrorCode::XUDY0030,
                            };
                            return Err(Error::from_code(
                                code,
                                "update target has no parent",
                            ));
                        }
                    }
                }
                UpdateStage::Finished => {
                    return Ok(self.complete(UpdateList::new()));
                }
            }
        }
    }
}
