use std::cmp::Ordering;

use xquf_engine::engine::doc_order::{OrderingContext, compare_node_positions, sort_and_dedupe};
use xquf_engine::simple_node::{SimpleNavigator, attr, attr_ns, doc, elem, elem_attrs, text};
use xquf_engine::xdm::stream::Resolved;

fn now<T>(r: Resolved<T>) -> T {
    match r {
        Resolved::Now(v) => v,
        Resolved::Later(_) => panic!("synchronous navigator suspended"),
    }
}

#[test]
fn ancestors_precede_descendants_and_siblings_keep_child_order() {
    let nav = SimpleNavigator;
    let mut ctx = OrderingContext::new();

    let first = elem("first", vec![]);
    let second = text("x");
    let root = elem("root", vec![first.clone(), second.clone()]);
    let document = doc(vec![root.clone()]);

    let cmp = |a, b, ctx: &mut OrderingContext<_>| now(compare_node_positions(&nav, ctx, a, b).unwrap());

    assert_eq!(cmp(&document, &root, &mut ctx), Ordering::Less);
    assert_eq!(cmp(&root, &first, &mut ctx), Ordering::Less);
    assert_eq!(cmp(&first, &second, &mut ctx), Ordering::Less);
    assert_eq!(cmp(&second, &first, &mut ctx), Ordering::Greater);
    assert_eq!(cmp(&first, &first, &mut ctx), Ordering::Equal);
}

#[test]
fn attributes_follow_their_element_and_precede_its_children() {
    let nav = SimpleNavigator;
    let mut ctx = OrderingContext::new();

    let a_beta = attr("beta", "2");
    let a_alpha = attr("alpha", "1");
    let child = elem("child", vec![]);
    let owner = elem_attrs(
        "owner",
        vec![a_beta.clone(), a_alpha.clone()],
        vec![child.clone()],
    );
    let _document = doc(vec![owner.clone()]);

    let mut cmp =
        |a, b| now(compare_node_positions(&nav, &mut ctx, a, b).unwrap());

    assert_eq!(cmp(&owner, &a_alpha), Ordering::Less);
    assert_eq!(cmp(&a_alpha, &owner), Ordering::Greater);
    assert_eq!(cmp(&a_alpha, &child), Ordering::Less);
    // Same owner: attribute order is name order.
    assert_eq!(cmp(&a_alpha, &a_beta), Ordering::Less);
    assert_eq!(cmp(&a_beta, &a_alpha), Ordering::Greater);
}

#[test]
fn same_local_name_attributes_in_different_namespaces_stay_distinct() {
    let nav = SimpleNavigator;
    let mut ctx = OrderingContext::new();

    let plain = attr("id", "1");
    let namespaced = attr_ns("http://example.com/meta", "m", "id", "2");
    let owner = elem_attrs("owner", vec![plain.clone(), namespaced.clone()], vec![]);
    let _document = doc(vec![owner.clone()]);

    let forward = now(compare_node_positions(&nav, &mut ctx, &plain, &namespaced).unwrap());
    assert_ne!(forward, Ordering::Equal);
    let backward = now(compare_node_positions(&nav, &mut ctx, &namespaced, &plain).unwrap());
    assert_eq!(backward, forward.reverse());
}

#[test]
fn detached_trees_order_by_first_seen_rank_and_stay_stable() {
    let nav = SimpleNavigator;
    let mut ctx = OrderingContext::new();

    let in_a = elem("leaf-a", vec![]);
    let _tree_a = doc(vec![elem("a", vec![in_a.clone()])]);
    let in_b = elem("leaf-b", vec![]);
    let _tree_b = doc(vec![elem("b", vec![in_b.clone()])]);

    let first = now(compare_node_positions(&nav, &mut ctx, &in_a, &in_b).unwrap());
    assert_ne!(first, Ordering::Equal);
    // Antisymmetric and stable across repeated queries.
    let reversed = now(compare_node_positions(&nav, &mut ctx, &in_b, &in_a).unwrap());
    assert_eq!(reversed, first.reverse());
    let again = now(compare_node_positions(&nav, &mut ctx, &in_a, &in_b).unwrap());
    assert_eq!(again, first);
}

#[test]
fn sort_and_dedupe_yields_document_order_without_duplicates() {
    let nav = SimpleNavigator;
    let mut ctx = OrderingContext::new();

    let c1 = elem("c1", vec![]);
    let c2 = elem("c2", vec![]);
    let c3 = text("tail");
    let root = elem("root", vec![c1.clone(), c2.clone(), c3.clone()]);
    let document = doc(vec![root.clone()]);

    let input = vec![
        c3.clone(),
        root.clone(),
        c1.clone(),
        c3.clone(),
        document.clone(),
        c2.clone(),
        c1.clone(),
    ];
    let sorted = now(sort_and_dedupe(&nav, &mut ctx, input).unwrap());
    assert_eq!(sorted, vec![document, root, c1, c2, c3]);
}

#[test]
fn sort_and_dedupe_is_idempotent() {
    let nav = SimpleNavigator;
    let mut ctx = OrderingContext::new();

    let c1 = elem("c1", vec![]);
    let c2 = elem("c2", vec![]);
    let root = elem("root", vec![c1.clone(), c2.clone()]);
    let _document = doc(vec![root.clone()]);

    let once = now(sort_and_dedupe(&nav, &mut ctx, vec![c2, root, c1, ]).unwrap());
    let twice = now(sort_and_dedupe(&nav, &mut ctx, once.clone()).unwrap());
    assert_eq!(once, twice);
}

#[test]
fn attributes_slot_between_their_element_and_its_content() {
    let nav = SimpleNavigator;
    let mut ctx = OrderingContext::new();

    let a = attr("a", "1");
    let b = attr("b", "2");
    let t = text("content");
    let e = elem_attrs("e", vec![a.clone(), b.clone()], vec![t.clone()]);
    let _document = doc(vec![e.clone()]);

    let sorted = now(sort_and_dedupe(&nav, &mut ctx, vec![t.clone(), b.clone(), e.clone(), a.clone()]).unwrap());
    assert_eq!(sorted, vec![e, a, b, t]);
}
