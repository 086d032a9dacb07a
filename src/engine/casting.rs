//! Atomization, XSD casting and numeric promotion.
//!
//! Casting is a pure function of (source tag, target tag, raw value); there is
//! no hidden state and no access to the document model beyond the string value
//! already carried by the node handle.

use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::xdm::{TypeTag, XdmAtomicValue, XdmItem};

/// Convert an item to its atomic content.
///
/// Nodes atomize to `xs:untypedAtomic` over their string value (the substrate
/// carries no schema typing). Functions, maps and arrays are not atomizable.
pub fn atomize<N: XdmNode>(item: &XdmItem<N>) -> Result<XdmAtomicValue, Error> {
    match item {
        XdmItem::Atomic(a) => Ok(a.clone()),
        XdmItem::Node(n) => Ok(XdmAtomicValue::UntypedAtomic(n.string_value())),
        XdmItem::Function(f) => Err(Error::from_code(
            ErrorCode::FOTY0013,
            match &f.name {
                Some(name) => format!("function {name} cannot be atomized"),
                None => "anonymous function items cannot be atomized".to_string(),
            },
        )),
        XdmItem::Map(_) => Err(Error::from_code(
            ErrorCode::FOTY0013,
            "maps cannot be atomized",
        )),
        XdmItem::Array(_) => Err(Error::from_code(
            ErrorCode::FOTY0013,
            "arrays cannot be atomized",
        )),
    }
}

/// Cast an atomic value to a target atomic type.
pub fn cast_atomic(a: &XdmAtomicValue, target: TypeTag) -> Result<XdmAtomicValue, Error> {
    use XdmAtomicValue::*;
    match target {
        TypeTag::AnyAtomic => Ok(a.clone()),
        TypeTag::String => Ok(String(a.lexical())),
        TypeTag::UntypedAtomic => Ok(UntypedAtomic(a.lexical())),
        TypeTag::AnyUri => match a {
            AnyUri(u) => Ok(AnyUri(u.clone())),
            String(s) | UntypedAtomic(s) => Ok(AnyUri(s.trim().to_string())),
            other => Err(not_castable(other, target)),
        },
        TypeTag::Boolean => match a {
            Boolean(b) => Ok(Boolean(*b)),
            // Numeric sources: false iff zero or NaN
            Integer(i) => Ok(Boolean(*i != 0)),
            Decimal(d) => Ok(Boolean(*d != 0.0 && !d.is_nan())),
            Double(d) => Ok(Boolean(*d != 0.0 && !d.is_nan())),
            Float(f) => Ok(Boolean(*f != 0.0 && !f.is_nan())),
            String(s) | UntypedAtomic(s) => match s.trim() {
                "true" | "1" => Ok(Boolean(true)),
                "false" | "0" => Ok(Boolean(false)),
                _ => Err(Error::from_code(
                    ErrorCode::FORG0001,
                    format!("'{s}' is not a valid xs:boolean lexical form"),
                )),
            },
            other => Err(not_castable(other, target)),
        },
        TypeTag::Integer => match a {
            Integer(i) => Ok(Integer(*i)),
            Boolean(b) => Ok(Integer(i64::from(*b))),
            Decimal(d) | Double(d) => {
                if d.is_finite() {
                    Ok(Integer(d.trunc() as i64))
                } else {
                    Err(Error::from_code(
                        ErrorCode::FORG0001,
                        "non-finite value is not a valid xs:integer",
                    ))
                }
            }
            Float(f) => cast_atomic(&Double(*f as f64), target),
            String(s) | UntypedAtomic(s) => s.trim().parse::<i64>().map(Integer).map_err(|_| {
                Error::from_code(
                    ErrorCode::FORG0001,
                    format!("'{s}' is not a valid xs:integer lexical form"),
                )
            }),
            other => Err(not_castable(other, target)),
        },
        TypeTag::Decimal => match a {
            Decimal(d) => Ok(Decimal(*d)),
            Integer(i) => Ok(Decimal(*i as f64)),
            Boolean(b) => Ok(Decimal(f64::from(u8::from(*b)))),
            Double(d) => {
                if d.is_finite() {
                    Ok(Decimal(*d))
                } else {
                    Err(Error::from_code(
                        ErrorCode::FORG0001,
                        "non-finite value is not a valid xs:decimal",
                    ))
                }
            }
            Float(f) => cast_atomic(&Double(*f as f64), target),
            String(s) | UntypedAtomic(s) => {
                let t = s.trim();
                if t.eq_ignore_ascii_case("nan") || t.to_ascii_uppercase().contains("INF") {
                    return Err(Error::from_code(
                        ErrorCode::FORG0001,
                        format!("'{s}' is not a valid xs:decimal lexical form"),
                    ));
                }
                t.parse::<f64>().map(Decimal).map_err(|_| {
                    Error::from_code(
                        ErrorCode::FORG0001,
                        format!("'{s}' is not a valid xs:decimal lexical form"),
                    )
                })
            }
            other => Err(not_castable(other, target)),
        },
        TypeTag::Double => match a {
            Double(d) => Ok(Double(*d)),
            Float(f) => Ok(Double(*f as f64)),
            Decimal(d) => Ok(Double(*d)),
            Integer(i) => Ok(Double(*i as f64)),
            Boolean(b) => Ok(Double(f64::from(u8::from(*b)))),
            String(s) | UntypedAtomic(s) => parse_double(s).map(Double),
            other => Err(not_castable(other, target)),
        },
        TypeTag::Float => match a {
            Float(f) => Ok(Float(*f)),
            Double(d) => Ok(Float(*d as f32)),
            Decimal(d) => Ok(Float(*d as f32)),
            Integer(i) => Ok(Float(*i as f32)),
            Boolean(b) => Ok(Float(f32::from(u8::from(*b)))),
            String(s) | UntypedAtomic(s) => parse_double(s).map(|d| Float(d as f32)),
            other => Err(not_castable(other, target)),
        },
        TypeTag::DateTime => match a {
            DateTime(dt) => Ok(DateTime(*dt)),
            String(s) | UntypedAtomic(s) => {
                let parsed = chrono::DateTime::parse_from_rfc3339(s.trim()).map_err(|_| {
                    Error::from_code(
                        ErrorCode::FORG0001,
                        format!("'{s}' is not a valid xs:dateTime lexical form"),
                    )
                })?;
                Ok(DateTime(parsed))
            }
            other => Err(not_castable(other, target)),
        },
        // Numeric union is a cast target only through one of its members
        TypeTag::Numeric => Err(Error::from_code(
            ErrorCode::XPTY0004,
            "xs:numeric is not a concrete cast target; cast to one of its member types",
        )),
        _ => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("casting to {target} is not supported"),
        )),
    }
}

fn parse_double(s: &str) -> Result<f64, Error> {
    let t = s.trim();
    match t {
        "NaN" => Ok(f64::NAN),
        "INF" => Ok(f64::INFINITY),
        "-INF" => Ok(f64::NEG_INFINITY),
        _ => t.parse::<f64>().map_err(|_| {
            Error::from_code(
                ErrorCode::FORG0001,
                format!("'{s}' is not a valid xs:double lexical form"),
            )
        }),
    }
}

fn not_castable(a: &XdmAtomicValue, target: TypeTag) -> Error {
    Error::from_code(
        ErrorCode::XPTY0004,
        format!("casting from {} to {target} is not supported", a.type_tag()),
    )
}

/// Numeric-hierarchy widening, applied only after an exact subtype match and
/// an untyped cast have both failed. `xs:anyURI` promotes to `xs:string`.
pub fn promote_atomic(a: &XdmAtomicValue, target: TypeTag) -> Result<XdmAtomicValue, Error> {
    use XdmAtomicValue::*;
    let promoted = match (a, target) {
        (Integer(i), TypeTag::Decimal) => Some(Decimal(*i as f64)),
        (Integer(i), TypeTag::Double) => Some(Double(*i as f64)),
        (Integer(i), TypeTag::Float) => Some(Float(*i as f32)),
        (Decimal(d), TypeTag::Double) => Some(Double(*d)),
        (Decimal(d), TypeTag::Float) => Some(Float(*d as f32)),
        (Float(f), TypeTag::Double) => Some(Double(*f as f64)),
        (Integer(i), TypeTag::Numeric) => Some(Integer(*i)),
        (Decimal(d), TypeTag::Numeric) => Some(Decimal(*d)),
        (Double(d), TypeTag::Numeric) => Some(Double(*d)),
        (Float(f), TypeTag::Numeric) => Some(Float(*f)),
        (AnyUri(u), TypeTag::String) => Some(String(u.clone())),
        _ => None,
    };
    promoted.ok_or_else(|| {
        Error::from_code(
            ErrorCode::XPTY0004,
            format!("cannot promote {} to {target}", a.type_tag()),
        )
    })
}
