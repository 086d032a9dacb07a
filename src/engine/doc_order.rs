//! Total document-order comparison and order-based normalization.
//!
//! The comparator is total over any pair of nodes the navigator can reach,
//! including nodes from different trees: each distinct root is assigned a rank
//! the first time it is seen, and unrelated trees order by rank. Ranks are
//! append-only for the lifetime of one [`OrderingContext`], which makes the
//! relation stable within an evaluation.
//!
//! Every entry point is suspension-aware: it either answers `Resolved::Now` or
//! hands back an awaitable, and the caller retries the identical call after
//! awaiting. Retries are productive because navigators answer `Ready` for
//! relations they have already resolved.

use std::cmp::Ordering;

use smallvec::{SmallVec, smallvec};

use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{Navigator, NodeKind, XdmNode};
use crate::xdm::stream::{Resolved, fetch_now};

/// Cross-tree tie-break registry. One per top-level evaluation.
pub struct OrderingContext<N> {
    roots: Vec<N>,
}

impl<N: XdmNode> Default for OrderingContext<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: XdmNode> OrderingContext<N> {
    pub fn new() -> Self {
        Self { roots: Vec::new() }
    }

    /// First-seen rank of a detached root. Never re-ranks.
    fn rank_of(&mut self, node: &N) -> usize {
        if let Some(i) = self.roots.iter().position(|r| r == node) {
            return i;
        }
        self.roots.push(node.clone());
        self.roots.len() - 1
    }
}

type Chain<N> = SmallVec<[N; 8]>;

/// Root-first ancestor chain, ending in the node itself.
fn ancestor_chain<N: XdmNode>(
    nav: &dyn Navigator<N>,
    node: &N,
) -> Result<Resolved<Chain<N>>, Error> {
    let mut chain: Chain<N> = smallvec![node.clone()];
    loop {
        let cur = chain[chain.len() - 1].clone();
        match fetch_now(nav.parent(&cur))? {
            Resolved::Later(aw) => return Ok(Resolved::Later(aw)),
            Resolved::Now(None) => break,
            Resolved::Now(Some(p)) => chain.push(p),
        }
    }
    chain.reverse();
    Ok(Resolved::Now(chain))
}

macro_rules! try_now {
    ($e:expr) => {
        match $e? {
            Resolved::Now(v) => v,
            Resolved::Later(aw) => return Ok(Resolved::Later(aw)),
        }
    };
}

/// Compare two nodes in document order.
///
/// Attributes order after their owner element and before its children-side
/// subtree successors; two attributes of one element order by namespace URI,
/// then local name.
pub fn compare_node_positions<N: XdmNode>(
    nav: &dyn Navigator<N>,
    ctx: &mut OrderingContext<N>,
    a: &N,
    b: &N,
) -> Result<Resolved<Ordering>, Error> {
    if a == b {
        return Ok(Resolved::Now(Ordering::Equal));
    }

    let a_attr = a.kind() == NodeKind::Attribute;
    let b_attr = b.kind() == NodeKind::Attribute;
    if a_attr && b_attr {
        let owner_a = try_now!(fetch_now(nav.parent(a)));
        let owner_b = try_now!(fetch_now(nav.parent(b)));
        if let (Some(oa), Some(ob)) = (&owner_a, &owner_b) {
            if oa == ob {
                return Ok(Resolved::Now(attribute_name_order(a, b)));
            }
            return compare_node_positions(nav, ctx, oa, ob);
        }
        // A detached attribute is the root of its own (single-node) tree.
    } else if a_attr {
        if let Some(oa) = try_now!(fetch_now(nav.parent(a))) {
            if &oa == b {
                return Ok(Resolved::Now(Ordering::Greater));
            }
            return compare_node_positions(nav, ctx, &oa, b);
        }
    } else if b_attr {
        if let Some(ob) = try_now!(fetch_now(nav.parent(b))) {
            if &ob == a {
                return Ok(Resolved::Now(Ordering::Less));
            }
            return compare_node_positions(nav, ctx, a, &ob);
        }
    }

    let chain_a = try_now!(ancestor_chain(nav, a));
    let chain_b = try_now!(ancestor_chain(nav, b));

    if chain_a[0] != chain_b[0] {
        let ra = ctx.rank_of(&chain_a[0]);
        let rb = ctx.rank_of(&chain_b[0]);
        return Ok(Resolved::Now(ra.cmp(&rb)));
    }

    // Shared root: find the first divergence.
    let mut i = 0;
    while i < chain_a.len() && i < chain_b.len() && chain_a[i] == chain_b[i] {
        i += 1;
    }
    if i == chain_a.len() {
        // a is a strict ancestor of b
        return Ok(Resolved::Now(Ordering::Less));
    }
    if i == chain_b.len() {
        return Ok(Resolved::Now(Ordering::Greater));
    }

    let parent = &chain_a[i - 1];
    let siblings = try_now!(fetch_now(nav.children(parent)));
    let pos_a = siblings.iter().position(|s| s == &chain_a[i]);
    let pos_b = siblings.iter().position(|s| s == &chain_b[i]);
    match (pos_a, pos_b) {
        (Some(x), Some(y)) => Ok(Resolved::Now(x.cmp(&y))),
        _ => Err(Error::from_code(
            ErrorCode::ORDR0001,
            "navigator did not list a node among its parent's children",
        )),
    }
}

fn attribute_name_order<N: XdmNode>(a: &N, b: &N) -> Ordering {
    let key = |n: &N| n.name().map(|q| (q.ns_uri, q.local)).unwrap_or_default();
    key(a).cmp(&key(b))
}

/// Resolve every navigator relation a sort over `nodes` can touch, so the
/// comparison phase never suspends.
fn prefetch_for_sort<N: XdmNode>(
    nav: &dyn Navigator<N>,
    nodes: &[N],
) -> Result<Resolved<()>, Error> {
    for node in nodes {
        let chain = try_now!(ancestor_chain(nav, node));
        // Sibling scans may need the child list of any chain node.
        for link in &chain {
            if matches!(link.kind(), NodeKind::Element | NodeKind::Document) {
                let _ = try_now!(fetch_now(nav.children(link)));
            }
        }
    }
    Ok(Resolved::Now(()))
}

/// Sort into document order and drop duplicate node identities.
///
/// Duplicates are adjacent after an order-consistent sort, so deduplication is
/// a single adjacent-identity pass.
pub fn sort_and_dedupe<N: XdmNode>(
    nav: &dyn Navigator<N>,
    ctx: &mut OrderingContext<N>,
    mut nodes: Vec<N>,
) -> Result<Resolved<Vec<N>>, Error> {
    try_now!(prefetch_for_sort(nav, &nodes));

    let mut failure: Option<Error> = None;
    nodes.sort_by(|x, y| {
        if failure.is_some() {
            return Ordering::Equal;
        }
        match compare_node_positions(nav, ctx, x, y) {
            Ok(Resolved::Now(ord)) => ord,
            Ok(Resolved::Later(_)) => {
                failure = Some(Error::from_code(
                    ErrorCode::ASYN0001,
                    "navigator suspended inside an order comparison after prefetch",
                ));
                Ordering::Equal
            }
            Err(e) => {
                failure = Some(e);
                Ordering::Equal
            }
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    nodes.dedup();
    Ok(Resolved::Now(nodes))
}
