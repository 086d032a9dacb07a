//! A small in-memory node implementation plus two navigators.
//!
//! `SimpleNode` exists for tests, demos and embedders that already hold the
//! whole document: every relation answers synchronously through
//! [`SimpleNavigator`]. [`SuspendingNavigator`] wraps the same tree but
//! suspends exactly once per distinct relation lookup, which exercises the
//! engine's resume paths without a real asynchronous document store.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::task::{Context, Poll};

use futures::FutureExt;

use crate::model::{Navigator, NodeKind, QName, XdmNode};
use crate::xdm::stream::{Fetch, SharedFetch};

struct NodeData {
    kind: NodeKind,
    name: Option<QName>,
    value: String,
    parent: RwLock<Weak<NodeData>>,
    children: RwLock<Vec<SimpleNode>>,
    attributes: RwLock<Vec<SimpleNode>>,
}

/// Reference-counted node handle; equality and hashing are node identity.
#[derive(Clone)]
pub struct SimpleNode(Arc<NodeData>);

impl SimpleNode {
    fn new(kind: NodeKind, name: Option<QName>, value: impl Into<String>) -> Self {
        Self(Arc::new(NodeData {
            kind,
            name,
            value: value.into(),
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
            attributes: RwLock::new(Vec::new()),
        }))
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn parent(&self) -> Option<SimpleNode> {
        read_lock(&self.0.parent).upgrade().map(SimpleNode)
    }

    pub fn children(&self) -> Vec<SimpleNode> {
        read_lock(&self.0.children).clone()
    }

    pub fn attributes(&self) -> Vec<SimpleNode> {
        read_lock(&self.0.attributes).clone()
    }

    fn adopt(&self, child: &SimpleNode) {
        *write_lock(&child.0.parent) = Arc::downgrade(&self.0);
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl PartialEq for SimpleNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for SimpleNode {}

impl std::hash::Hash for SimpleNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl core::fmt::Debug for SimpleNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimpleNode")
            .field("kind", &self.0.kind)
            .field("name", &self.0.name)
            .finish_non_exhaustive()
    }
}

impl XdmNode for SimpleNode {
    fn kind(&self) -> NodeKind {
        self.0.kind
    }

    fn name(&self) -> Option<QName> {
        self.0.name.clone()
    }

    fn string_value(&self) -> String {
        match self.0.kind {
            NodeKind::Element | NodeKind::Document => {
                let mut out = String::new();
                collect_text(self, &mut out);
                out
            }
            _ => self.0.value.clone(),
        }
    }
}

fn collect_text(node: &SimpleNode, out: &mut String) {
    for child in node.children() {
        match child.kind() {
            NodeKind::Text => out.push_str(&child.0.value),
            NodeKind::Element => collect_text(&child, out),
            _ => {}
        }
    }
}

pub fn doc(children: Vec<SimpleNode>) -> SimpleNode {
    let node = SimpleNode::new(NodeKind::Document, None, "");
    for child in &children {
        node.adopt(child);
    }
    *write_lock(&node.0.children) = children;
    node
}

pub fn elem(name: &str, children: Vec<SimpleNode>) -> SimpleNode {
    elem_attrs(name, Vec::new(), children)
}

pub fn elem_attrs(name: &str, attrs: Vec<SimpleNode>, children: Vec<SimpleNode>) -> SimpleNode {
    let node = SimpleNode::new(NodeKind::Element, Some(QName::local_only(name)), "");
    for child in children.iter().chain(attrs.iter()) {
        node.adopt(child);
    }
    *write_lock(&node.0.children) = children;
    *write_lock(&node.0.attributes) = attrs;
    node
}

pub fn attr(name: &str, value: &str) -> SimpleNode {
    SimpleNode::new(NodeKind::Attribute, Some(QName::local_only(name)), value)
}

pub fn attr_ns(ns_uri: &str, prefix: &str, local: &str, value: &str) -> SimpleNode {
    SimpleNode::new(
        NodeKind::Attribute,
        Some(QName {
            prefix: Some(prefix.to_string()),
            local: local.to_string(),
            ns_uri: Some(ns_uri.to_string()),
        }),
        value,
    )
}

pub fn text(value: &str) -> SimpleNode {
    SimpleNode::new(NodeKind::Text, None, value)
}

pub fn comment(value: &str) -> SimpleNode {
    SimpleNode::new(NodeKind::Comment, None, value)
}

pub fn pi(target: &str, value: &str) -> SimpleNode {
    SimpleNode::new(
        NodeKind::ProcessingInstruction,
        Some(QName::local_only(target)),
        value,
    )
}

/// Fully synchronous navigation over a [`SimpleNode`] tree.
#[derive(Default)]
pub struct SimpleNavigator;

fn previous_sibling_of(node: &SimpleNode) -> Option<SimpleNode> {
    let parent = node.parent()?;
    let siblings = parent.children();
    let i = siblings.iter().position(|s| s == node)?;
    i.checked_sub(1).map(|i| siblings[i].clone())
}

impl Navigator<SimpleNode> for SimpleNavigator {
    fn parent(&self, node: &SimpleNode) -> Fetch<Option<SimpleNode>> {
        Fetch::Ready(node.parent())
    }

    fn children(&self, node: &SimpleNode) -> Fetch<Vec<SimpleNode>> {
        Fetch::Ready(node.children())
    }

    fn previous_sibling(&self, node: &SimpleNode) -> Fetch<Option<SimpleNode>> {
        Fetch::Ready(previous_sibling_of(node))
    }

    fn attributes(&self, node: &SimpleNode) -> Fetch<Vec<SimpleNode>> {
        Fetch::Ready(node.attributes())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Relation {
    Parent,
    Children,
    PreviousSibling,
    Attributes,
}

type OptMap = Mutex<HashMap<(Relation, usize), SharedFetch<Option<SimpleNode>>>>;
type ListMap = Mutex<HashMap<(Relation, usize), SharedFetch<Vec<SimpleNode>>>>;

/// Navigation that suspends exactly once per distinct relation lookup.
///
/// The first call for a given (relation, node) pair answers `Pending`; after
/// the awaitable resolves, the identical call answers `Ready`, which is the
/// resolution-caching contract the engine relies on when it retries.
#[derive(Default)]
pub struct SuspendingNavigator {
    optional: OptMap,
    lists: ListMap,
    suspensions: AtomicUsize,
}

struct YieldOnce {
    polled: bool,
}

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.polled {
            Poll::Ready(())
        } else {
            self.polled = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

impl SuspendingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lookups that went through a suspension so far.
    pub fn suspension_count(&self) -> usize {
        self.suspensions.load(AtomicOrdering::Relaxed)
    }

    fn lookup_opt(&self, relation: Relation, node: &SimpleNode, value: Option<SimpleNode>) -> Fetch<Option<SimpleNode>> {
        let mut map = match self.optional.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let key = (relation, node.id());
        if let Some(shared) = map.get(&key) {
            if let Some(Ok(v)) = shared.peek() {
                return Fetch::Ready(v.clone());
            }
            return Fetch::Pending(shared.clone());
        }
        self.suspensions.fetch_add(1, AtomicOrdering::Relaxed);
        let shared = async move {
            YieldOnce { polled: false }.await;
            Ok(value)
        }
        .boxed()
        .shared();
        map.insert(key, shared.clone());
        Fetch::Pending(shared)
    }

    fn lookup_list(&self, relation: Relation, node: &SimpleNode, value: Vec<SimpleNode>) -> Fetch<Vec<SimpleNode>> {
        let mut map = match self.lists.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let key = (relation, node.id());
        if let Some(shared) = map.get(&key) {
            if let Some(Ok(v)) = shared.peek() {
                return Fetch::Ready(v.clone());
            }
            return Fetch::Pending(shared.clone());
        }
        self.suspensions.fetch_add(1, AtomicOrdering::Relaxed);
        let shared = async move {
            YieldOnce { polled: false }.await;
            Ok(value)
        }
        .boxed()
        .shared();
        map.insert(key, shared.clone());
        Fetch::Pending(shared)
    }
}

impl Navigator<SimpleNode> for SuspendingNavigator {
    fn parent(&self, node: &SimpleNode) -> Fetch<Option<SimpleNode>> {
        self.lookup_opt(Relation::Parent, node, node.parent())
    }

    fn children(&self, node: &SimpleNode) -> Fetch<Vec<SimpleNode>> {
        self.lookup_list(Relation::Children, node, node.children())
    }

    fn previous_sibling(&self, node: &SimpleNode) -> Fetch<Option<SimpleNode>> {
        self.lookup_opt(Relation::PreviousSibling, node, previous_sibling_of(node))
    }

    fn attributes(&self, node: &SimpleNode) -> Fetch<Vec<SimpleNode>> {
        self.lookup_list(Relation::Attributes, node, node.attributes())
    }
}
