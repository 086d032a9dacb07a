//! Abstract document model: node handles and the navigation capability.
//!
//! The engine never owns node storage. It holds opaque handles (`N`) plus a
//! caller-supplied [`Navigator`] to walk structural relations. Intrinsic node
//! properties (kind, name, string value) live on the handle itself; anything
//! that crosses the tree goes through the navigator and may suspend.

use crate::xdm::TypeTag;
use crate::xdm::stream::Fetch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

impl NodeKind {
    pub fn type_tag(self) -> TypeTag {
        match self {
            NodeKind::Document => TypeTag::Document,
            NodeKind::Element => TypeTag::Element,
            NodeKind::Attribute => TypeTag::Attribute,
            NodeKind::Text => TypeTag::Text,
            NodeKind::Comment => TypeTag::Comment,
            NodeKind::ProcessingInstruction => TypeTag::ProcessingInstruction,
        }
    }
}

/// Lexical node name as it appears in a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub ns_uri: Option<String>,
}

impl QName {
    pub fn local_only(local: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local: local.into(),
            ns_uri: None,
        }
    }
}

/// A node handle. Equality is node identity; two handles compare equal exactly
/// when they address the same node.
pub trait XdmNode: Clone + Eq + std::hash::Hash + core::fmt::Debug + Send + Sync + 'static {
    fn kind(&self) -> NodeKind;
    fn name(&self) -> Option<QName>;
    fn string_value(&self) -> String;
}

/// Tree-navigation capability supplied by the caller; outlives the evaluation.
///
/// Each method either answers synchronously (`Fetch::Ready`) or suspends
/// (`Fetch::Pending`). Resolution caching contract: once the awaitable behind
/// a pending fetch has resolved, repeating the identical call must answer
/// `Ready`. The engine relies on this to resume multi-fetch operations from
/// where they suspended.
pub trait Navigator<N: Clone>: Send + Sync {
    fn parent(&self, node: &N) -> Fetch<Option<N>>;
    fn children(&self, node: &N) -> Fetch<Vec<N>>;
    fn previous_sibling(&self, node: &N) -> Fetch<Option<N>>;
    fn attributes(&self, node: &N) -> Fetch<Vec<N>>;
}
