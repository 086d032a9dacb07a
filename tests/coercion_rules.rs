use rstest::rstest;

use xquf_engine::engine::coercion::transform_argument;
use xquf_engine::simple_node::{elem, text, SimpleNode};
use xquf_engine::{
    ErrorCode, Occurrence, ParamSpec, TypeTag, XdmAtomicValue, XdmItem, XdmSequenceStream,
};

fn stream_of(items: Vec<XdmItem<SimpleNode>>) -> XdmSequenceStream<SimpleNode> {
    XdmSequenceStream::from_vec(items)
}

fn atomic(a: XdmAtomicValue) -> XdmItem<SimpleNode> {
    XdmItem::Atomic(a)
}

#[rstest]
#[case(Occurrence::One)]
#[case(Occurrence::Optional)]
fn known_multiplicity_violations_fail_before_iteration(#[case] occurrence: Occurrence) {
    let decl = ParamSpec {
        ty: TypeTag::Item,
        occurrence,
    };
    let two = stream_of(vec![
        atomic(XdmAtomicValue::Integer(1)),
        atomic(XdmAtomicValue::Integer(2)),
    ]);
    let err = transform_argument(&decl, two, "fn:zero-or-one").unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
    assert!(err.message.contains("fn:zero-or-one"));
}

#[rstest]
#[case(Occurrence::One)]
#[case(Occurrence::Plus)]
fn known_empty_violations_fail_before_iteration(#[case] occurrence: Occurrence) {
    let decl = ParamSpec {
        ty: TypeTag::Item,
        occurrence,
    };
    let err = transform_argument(&decl, stream_of(vec![]), "fn:exactly-one").unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
}

#[rstest]
#[case(Occurrence::Optional)]
#[case(Occurrence::Star)]
fn empty_sequences_satisfy_relaxed_occurrences(#[case] occurrence: Occurrence) {
    let decl = ParamSpec {
        ty: TypeTag::Item,
        occurrence,
    };
    let out = transform_argument(&decl, stream_of(vec![]), "fn:string")
        .unwrap()
        .materialize()
        .unwrap();
    assert!(out.is_empty());
}

#[test]
fn exact_subtype_matches_pass_through_unchanged() {
    let decl = ParamSpec {
        ty: TypeTag::Decimal,
        occurrence: Occurrence::One,
    };
    // xs:integer is a subtype of xs:decimal; the value keeps its subtype.
    let out = transform_argument(
        &decl,
        stream_of(vec![atomic(XdmAtomicValue::Integer(4))]),
        "fn:round",
    )
    .unwrap()
    .materialize()
    .unwrap();
    assert_eq!(out, vec![atomic(XdmAtomicValue::Integer(4))]);
}

#[test]
fn nodes_atomize_then_cast_for_atomic_parameters() {
    let decl = ParamSpec {
        ty: TypeTag::Numeric,
        occurrence: Occurrence::One,
    };
    let node = elem("n", vec![text("2.5")]);
    let out = transform_argument(&decl, stream_of(vec![XdmItem::Node(node)]), "fn:abs")
        .unwrap()
        .materialize()
        .unwrap();
    // Untyped data takes the double lexical space for numeric parameters.
    assert_eq!(out, vec![atomic(XdmAtomicValue::Double(2.5))]);
}

#[test]
fn untyped_values_cast_to_the_declared_type() {
    let decl = ParamSpec {
        ty: TypeTag::Integer,
        occurrence: Occurrence::One,
    };
    let out = transform_argument(
        &decl,
        stream_of(vec![atomic(XdmAtomicValue::UntypedAtomic("17".into()))]),
        "fn:abs",
    )
    .unwrap()
    .materialize()
    .unwrap();
    assert_eq!(out, vec![atomic(XdmAtomicValue::Integer(17))]);
}

#[test]
fn untyped_cast_failures_become_type_errors_naming_the_function() {
    let decl = ParamSpec {
        ty: TypeTag::Integer,
        occurrence: Occurrence::One,
    };
    let err = transform_argument(
        &decl,
        stream_of(vec![atomic(XdmAtomicValue::UntypedAtomic("x".into()))]),
        "fn:abs",
    )
    .unwrap()
    .materialize()
    .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
    assert!(err.message.contains("fn:abs"));
    // The underlying cast failure stays available as the source.
    let source = std::error::Error::source(&err).unwrap();
    assert!(source.to_string().contains("FORG0001"));
}

#[test]
fn typed_values_promote_but_do_not_cast() {
    let decl = ParamSpec {
        ty: TypeTag::Double,
        occurrence: Occurrence::One,
    };
    let out = transform_argument(
        &decl,
        stream_of(vec![atomic(XdmAtomicValue::Integer(3))]),
        "fn:sqrt",
    )
    .unwrap()
    .materialize()
    .unwrap();
    assert_eq!(out, vec![atomic(XdmAtomicValue::Double(3.0))]);

    // A typed string never silently becomes a number.
    let err = transform_argument(
        &decl,
        stream_of(vec![atomic(XdmAtomicValue::String("3".into()))]),
        "fn:sqrt",
    )
    .unwrap()
    .materialize()
    .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
    assert!(err.message.contains("fn:sqrt"));
}

#[test]
fn second_item_fails_lazily_for_singular_parameters() {
    let decl = ParamSpec {
        ty: TypeTag::Item,
        occurrence: Occurrence::Optional,
    };
    // This cursor advertises no cardinality, so the violation is only
    // observable while pulling.
    struct TwoInts(i64);
    impl xquf_engine::xdm::SequenceCursor<SimpleNode> for TwoInts {
        fn next_step(
            &mut self,
        ) -> Result<xquf_engine::xdm::IterationStep<SimpleNode>, xquf_engine::Error> {
            self.0 += 1;
            Ok(if self.0 <= 2 {
                xquf_engine::xdm::IterationStep::Ready(atomic(XdmAtomicValue::Integer(self.0)))
            } else {
                xquf_engine::xdm::IterationStep::Done
            })
        }
    }
    let inner = XdmSequenceStream::from_cursor(TwoInts(0));
    let err = transform_argument(&decl, inner, "fn:zero-or-one")
        .unwrap()
        .materialize()
        .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
}
