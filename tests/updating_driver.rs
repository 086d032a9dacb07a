use std::collections::HashMap;
use std::sync::Arc;

use futures::executor::block_on;

use xquf_engine::expr::{Axis, Expr, NodeTest};
use xquf_engine::simple_node::{SimpleNavigator, SuspendingNavigator, attr, doc, elem, text, SimpleNode};
use xquf_engine::{
    ErrorCode, EvaluationOptions, ExpandedName, UpdateKind, XdmAtomicValue, XdmItem,
    XdmSequence, evaluate_updating,
};

fn child_step() -> Expr {
    Expr::Step {
        axis: Axis::Child,
        test: NodeTest::AnyKind,
    }
}

fn var(name: &str) -> Expr {
    Expr::VarRef(ExpandedName::local(name))
}

fn vars(
    entries: Vec<(&str, XdmSequence<SimpleNode>)>,
) -> HashMap<ExpandedName, XdmSequence<SimpleNode>> {
    entries
        .into_iter()
        .map(|(n, v)| (ExpandedName::local(n), v))
        .collect()
}

#[test]
fn non_updating_expressions_are_rejected_up_front() {
    let root = elem("root", vec![]);
    let err = block_on(evaluate_updating(
        &Expr::Literal(XdmAtomicValue::Integer(1)),
        Some(XdmItem::Node(root)),
        Arc::new(SimpleNavigator),
        HashMap::new(),
        EvaluationOptions::default(),
    ))
    .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XUST0001);
}

#[test]
fn insert_into_produces_one_pending_update_and_no_mutation() {
    let new_node = elem("new", vec![]);
    let root = elem("root", vec![]);
    let _document = doc(vec![root.clone()]);

    let expr = Expr::InsertInto {
        source: Box::new(var("new")),
        target: Box::new(Expr::ContextItem),
    };
    let result = block_on(evaluate_updating(
        &expr,
        Some(XdmItem::Node(root.clone())),
        Arc::new(SimpleNavigator),
        vars(vec![("new", vec![XdmItem::Node(new_node.clone())])]),
        EvaluationOptions::default(),
    ))
    .unwrap();

    assert!(result.values.is_empty());
    assert_eq!(result.pending_updates.len(), 1);
    let update = &result.pending_updates[0];
    assert_eq!(update.kind, UpdateKind::InsertInto);
    assert_eq!(update.target, root.clone());
    assert_eq!(update.content, vec![new_node]);
    // The document itself is untouched.
    assert!(root.children().is_empty());
}

#[test]
fn insert_into_rejects_non_container_targets() {
    let t = text("x");
    let root = elem("root", vec![t.clone()]);
    let _document = doc(vec![root]);

    let expr = Expr::InsertInto {
        source: Box::new(var("new")),
        target: Box::new(var("t")),
    };
    let err = block_on(evaluate_updating(
        &expr,
        None,
        Arc::new(SimpleNavigator),
        vars(vec![
            ("new", vec![XdmItem::Node(elem("new", vec![]))]),
            ("t", vec![XdmItem::Node(t)]),
        ]),
        EvaluationOptions::default(),
    ))
    .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XUTY0005);
}

#[test]
fn insert_before_requires_a_parent() {
    let detached = elem("orphan", vec![]);
    let expr = Expr::InsertBefore {
        source: Box::new(var("new")),
        target: Box::new(var("t")),
    };
    let err = block_on(evaluate_updating(
        &expr,
        None,
        Arc::new(SimpleNavigator),
        vars(vec![
            ("new", vec![XdmItem::Node(elem("new", vec![]))]),
            ("t", vec![XdmItem::Node(detached)]),
        ]),
        EvaluationOptions::default(),
    ))
    .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XUDY0030);
}

#[test]
fn delete_collects_one_update_per_target() {
    let c1 = elem("c1", vec![]);
    let c2 = elem("c2", vec![]);
    let root = elem("root", vec![c1.clone(), c2.clone()]);

    let expr = Expr::Delete {
        target: Box::new(child_step()),
    };
    let result = block_on(evaluate_updating(
        &expr,
        Some(XdmItem::Node(root.clone())),
        Arc::new(SuspendingNavigator::new()),
        HashMap::new(),
        EvaluationOptions::default(),
    ))
    .unwrap();

    assert_eq!(result.pending_updates.len(), 2);
    assert!(result
        .pending_updates
        .iter()
        .all(|u| u.kind == UpdateKind::Delete));
    assert_eq!(result.pending_updates[0].target, c1);
    assert_eq!(result.pending_updates[1].target, c2);
    // Deleting nothing is a valid no-op.
    let empty = block_on(evaluate_updating(
        &Expr::Delete {
            target: Box::new(var("none")),
        },
        None,
        Arc::new(SimpleNavigator),
        vars(vec![("none", vec![])]),
        EvaluationOptions::default(),
    ))
    .unwrap();
    assert!(empty.pending_updates.is_empty());
}

#[test]
fn replace_value_carries_the_new_string_value() {
    let target = attr("id", "old");
    let _owner = doc(vec![elem("root", vec![])]);

    let expr = Expr::ReplaceValue {
        target: Box::new(var("t")),
        value: Box::new(Expr::Literal(XdmAtomicValue::Integer(42))),
    };
    let result = block_on(evaluate_updating(
        &expr,
        None,
        Arc::new(SimpleNavigator),
        vars(vec![("t", vec![XdmItem::Node(target.clone())])]),
        EvaluationOptions::default(),
    ))
    .unwrap();
    let update = &result.pending_updates[0];
    assert_eq!(update.kind, UpdateKind::ReplaceValue);
    assert_eq!(update.new_value.as_deref(), Some("42"));
}

#[test]
fn conflicting_replace_node_updates_fail_the_whole_evaluation() {
    let replacement_a = elem("a", vec![]);
    let replacement_b = elem("b", vec![]);
    let victim = elem("victim", vec![]);
    let _document = doc(vec![elem("root", vec![victim.clone()])]);

    let expr = Expr::Sequence(vec![
        Expr::ReplaceNode {
            target: Box::new(var("t")),
            replacement: Box::new(var("a")),
        },
        Expr::ReplaceNode {
            target: Box::new(var("t")),
            replacement: Box::new(var("b")),
        },
    ]);
    let err = block_on(evaluate_updating(
        &expr,
        None,
        Arc::new(SimpleNavigator),
        vars(vec![
            ("t", vec![XdmItem::Node(victim)]),
            ("a", vec![XdmItem::Node(replacement_a)]),
            ("b", vec![XdmItem::Node(replacement_b)]),
        ]),
        EvaluationOptions::default(),
    ))
    .unwrap_err();
    // All-or-nothing: nothing is released on conflict.
    assert_eq!(err.code_enum(), ErrorCode::XUDY0016);
}

#[test]
fn replace_node_of_a_parentless_target_is_rejected() {
    let orphan = elem("orphan", vec![]);
    let expr = Expr::ReplaceNode {
        target: Box::new(var("t")),
        replacement: Box::new(var("r")),
    };
    let err = block_on(evaluate_updating(
        &expr,
        None,
        Arc::new(SimpleNavigator),
        vars(vec![
            ("t", vec![XdmItem::Node(orphan)]),
            ("r", vec![XdmItem::Node(elem("r", vec![]))]),
        ]),
        EvaluationOptions::default(),
    ))
    .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XUDY0009);
}

#[test]
fn replacing_an_attribute_requires_attribute_content() {
    let target = attr("id", "1");
    let expr = Expr::ReplaceNode {
        target: Box::new(var("t")),
        replacement: Box::new(var("r")),
    };
    let err = block_on(evaluate_updating(
        &expr,
        None,
        Arc::new(SimpleNavigator),
        vars(vec![
            ("t", vec![XdmItem::Node(target)]),
            ("r", vec![XdmItem::Node(elem("nope", vec![]))]),
        ]),
        EvaluationOptions::default(),
    ))
    .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XUTY0011);
}

#[test]
fn rename_resolves_the_new_name_against_bound_prefixes() {
    let target = elem("old", vec![]);
    let _document = doc(vec![target.clone()]);

    let expr = Expr::Rename {
        target: Box::new(var("t")),
        new_name: "ex:renamed".to_string(),
    };
    let options = EvaluationOptions {
        namespaces: vec![("ex".to_string(), "http://example.com/ns".to_string())],
        ..EvaluationOptions::default()
    };
    let result = block_on(evaluate_updating(
        &expr,
        None,
        Arc::new(SimpleNavigator),
        vars(vec![("t", vec![XdmItem::Node(target.clone())])]),
        options,
    ))
    .unwrap();
    let update = &result.pending_updates[0];
    assert_eq!(update.kind, UpdateKind::Rename);
    let name = update.new_name.clone().unwrap();
    assert_eq!(name.local, "renamed");
    assert_eq!(name.ns_uri.as_deref(), Some("http://example.com/ns"));
}

#[test]
fn rename_with_an_unbound_prefix_fails_before_evaluation() {
    let target = elem("old", vec![]);
    let expr = Expr::Rename {
        target: Box::new(var("t")),
        new_name: "nope:renamed".to_string(),
    };
    let err = block_on(evaluate_updating(
        &expr,
        None,
        Arc::new(SimpleNavigator),
        vars(vec![("t", vec![XdmItem::Node(target)])]),
        EvaluationOptions::default(),
    ))
    .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPST0081);
}

#[test]
fn rebinding_the_xml_prefix_is_a_static_error() {
    let options = EvaluationOptions {
        namespaces: vec![("xml".to_string(), "http://example.com/not-xml".to_string())],
        ..EvaluationOptions::default()
    };
    let err = block_on(evaluate_updating(
        &Expr::Delete {
            target: Box::new(var("t")),
        },
        None,
        Arc::new(SimpleNavigator),
        vars(vec![("t", vec![])]),
        options,
    ))
    .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XQST0033);
}

#[test]
fn mid_sequence_failure_releases_nothing() {
    let c1 = elem("c1", vec![]);
    let c2 = elem("c2", vec![]);
    let bad_target = text("not a container");
    let root = elem("root", vec![c1.clone(), c2.clone(), bad_target.clone()]);
    let _document = doc(vec![root]);

    // Two valid deletes followed by an invalid insert: the whole evaluation
    // fails with the insert's error and yields no partial update list.
    let expr = Expr::Sequence(vec![
        Expr::Delete {
            target: Box::new(var("c1")),
        },
        Expr::Delete {
            target: Box::new(var("c2")),
        },
        Expr::InsertInto {
            source: Box::new(var("new")),
            target: Box::new(var("bad")),
        },
    ]);
    let err = block_on(evaluate_updating(
        &expr,
        None,
        Arc::new(SimpleNavigator),
        vars(vec![
            ("c1", vec![XdmItem::Node(c1)]),
            ("c2", vec![XdmItem::Node(c2)]),
            ("new", vec![XdmItem::Node(elem("new", vec![]))]),
            ("bad", vec![XdmItem::Node(bad_target)]),
        ]),
        EvaluationOptions::default(),
    ))
    .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XUTY0005);
}

#[test]
fn sequences_merge_values_and_update_lists_in_order() {
    let c1 = elem("c1", vec![]);
    let root = elem("root", vec![c1.clone()]);
    let _document = doc(vec![root.clone()]);

    let expr = Expr::Sequence(vec![
        Expr::Delete {
            target: Box::new(var("c")),
        },
        Expr::Rename {
            target: Box::new(var("r")),
            new_name: "renamed".to_string(),
        },
    ]);
    let result = block_on(evaluate_updating(
        &expr,
        None,
        Arc::new(SuspendingNavigator::new()),
        vars(vec![
            ("c", vec![XdmItem::Node(c1.clone())]),
            ("r", vec![XdmItem::Node(root.clone())]),
        ]),
        EvaluationOptions::default(),
    ))
    .unwrap();
    assert_eq!(result.pending_updates.len(), 2);
    assert_eq!(result.pending_updates[0].kind, UpdateKind::Delete);
    assert_eq!(result.pending_updates[0].target, c1);
    assert_eq!(result.pending_updates[1].kind, UpdateKind::Rename);
    assert_eq!(result.pending_updates[1].target, root);
}
