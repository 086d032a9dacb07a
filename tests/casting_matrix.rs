use rstest::rstest;

use xquf_engine::engine::casting::{atomize, cast_atomic, promote_atomic};
use xquf_engine::simple_node::{attr, elem, text};
use xquf_engine::{ErrorCode, TypeTag, XdmAtomicValue, XdmItem};

#[rstest]
#[case(XdmAtomicValue::Integer(0), false)]
#[case(XdmAtomicValue::Integer(7), true)]
#[case(XdmAtomicValue::Double(f64::NAN), false)]
#[case(XdmAtomicValue::Double(0.0), false)]
#[case(XdmAtomicValue::Double(3.5), true)]
#[case(XdmAtomicValue::Float(f32::NAN), false)]
#[case(XdmAtomicValue::String("true".into()), true)]
#[case(XdmAtomicValue::String("1".into()), true)]
#[case(XdmAtomicValue::String("false".into()), false)]
#[case(XdmAtomicValue::String("0".into()), false)]
#[case(XdmAtomicValue::UntypedAtomic(" true ".into()), true)]
fn boolean_cast_matrix(#[case] input: XdmAtomicValue, #[case] expected: bool) {
    let out = cast_atomic(&input, TypeTag::Boolean).unwrap();
    assert_eq!(out, XdmAtomicValue::Boolean(expected));
}

#[rstest]
#[case("yes")]
#[case("TRUE")]
#[case("2")]
#[case("")]
fn boolean_cast_rejects_bad_lexical_forms(#[case] input: &str) {
    let err = cast_atomic(&XdmAtomicValue::String(input.into()), TypeTag::Boolean).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::FORG0001);
}

#[test]
fn boolean_cast_rejects_temporal_sources() {
    let dt = cast_atomic(
        &XdmAtomicValue::String("2023-04-05T06:07:08+00:00".into()),
        TypeTag::DateTime,
    )
    .unwrap();
    let err = cast_atomic(&dt, TypeTag::Boolean).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
}

#[rstest]
#[case("42", 42)]
#[case(" -7 ", -7)]
fn integer_cast_from_string(#[case] input: &str, #[case] expected: i64) {
    let out = cast_atomic(&XdmAtomicValue::String(input.into()), TypeTag::Integer).unwrap();
    assert_eq!(out, XdmAtomicValue::Integer(expected));
}

#[test]
fn double_cast_accepts_special_lexical_forms() {
    let inf = cast_atomic(&XdmAtomicValue::String("INF".into()), TypeTag::Double).unwrap();
    assert_eq!(inf, XdmAtomicValue::Double(f64::INFINITY));
    let nan = cast_atomic(&XdmAtomicValue::String("NaN".into()), TypeTag::Double).unwrap();
    match nan {
        XdmAtomicValue::Double(d) => assert!(d.is_nan()),
        other => panic!("expected a double, got {other:?}"),
    }
}

#[test]
fn string_cast_renders_numeric_special_values() {
    let s = cast_atomic(&XdmAtomicValue::Double(f64::NEG_INFINITY), TypeTag::String).unwrap();
    assert_eq!(s, XdmAtomicValue::String("-INF".into()));
}

#[test]
fn promotion_widens_along_the_numeric_hierarchy() {
    assert_eq!(
        promote_atomic(&XdmAtomicValue::Integer(3), TypeTag::Double).unwrap(),
        XdmAtomicValue::Double(3.0)
    );
    assert_eq!(
        promote_atomic(&XdmAtomicValue::Float(1.5), TypeTag::Double).unwrap(),
        XdmAtomicValue::Double(1.5)
    );
    assert_eq!(
        promote_atomic(&XdmAtomicValue::AnyUri("http://example.com/".into()), TypeTag::String)
            .unwrap(),
        XdmAtomicValue::String("http://example.com/".into())
    );
}

#[test]
fn promotion_never_narrows() {
    let err = promote_atomic(&XdmAtomicValue::Double(1.0), TypeTag::Integer).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
}

#[test]
fn nodes_atomize_to_untyped_over_their_string_value() {
    let e = elem("n", vec![text("12"), elem("inner", vec![text("3")])]);
    let atomic = atomize(&XdmItem::Node(e)).unwrap();
    assert_eq!(atomic, XdmAtomicValue::UntypedAtomic("123".into()));

    let a = attr("id", "x1");
    let atomic = atomize(&XdmItem::Node(a)).unwrap();
    assert_eq!(atomic, XdmAtomicValue::UntypedAtomic("x1".into()));
}
