//! The XDM value model: atomic values, items and sequences.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use core::fmt;
use std::sync::Arc;

use crate::engine::runtime::Error;
use crate::model::XdmNode;

pub mod stream;
pub mod types;

pub use stream::{Awaitable, Cardinality, Fetch, IterationStep, SequenceCursor, XdmSequenceStream};
pub use types::{Occurrence, SequenceType, TypeTag, is_subtype};

/// A namespace-expanded name. Prefixes are a lexical concern and are resolved
/// away before names reach the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpandedName {
    pub ns_uri: Option<String>,
    pub local: String,
}

impl ExpandedName {
    pub fn new(ns_uri: Option<String>, local: impl Into<String>) -> Self {
        Self {
            ns_uri,
            local: local.into(),
        }
    }

    pub fn local(local: impl Into<String>) -> Self {
        Self::new(None, local)
    }
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns_uri {
            Some(ns) => write!(f, "Q{{{}}}{}", ns, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// Atomic value universe used by the substrate.
///
/// Numeric subtypes are stored distinctly so instance-of and promotion stay
/// precise; temporal values keep their timezone offset when one was given.
#[derive(Debug, Clone, PartialEq)]
pub enum XdmAtomicValue {
    Boolean(bool),
    String(String),
    UntypedAtomic(String),
    AnyUri(String),
    QName {
        ns_uri: Option<String>,
        prefix: Option<String>,
        local: String,
    },
    Integer(i64),
    Decimal(f64),
    Double(f64),
    Float(f32),
    DateTime(DateTime<FixedOffset>),
    Date {
        date: NaiveDate,
        tz: Option<FixedOffset>,
    },
    Time {
        time: NaiveTime,
        tz: Option<FixedOffset>,
    },
}

impl XdmAtomicValue {
    /// The semantic type of this value in the lattice.
    pub fn type_tag(&self) -> TypeTag {
        use XdmAtomicValue::*;
        match self {
            Boolean(_) => TypeTag::Boolean,
            String(_) => TypeTag::String,
            UntypedAtomic(_) => TypeTag::UntypedAtomic,
            AnyUri(_) => TypeTag::AnyUri,
            QName { .. } => TypeTag::QName,
            Integer(_) => TypeTag::Integer,
            Decimal(_) => TypeTag::Decimal,
            Double(_) => TypeTag::Double,
            Float(_) => TypeTag::Float,
            DateTime(_) => TypeTag::DateTime,
            Date { .. } => TypeTag::Date,
            Time { .. } => TypeTag::Time,
        }
    }

    /// Canonical-ish lexical form, used for casts to string and for
    /// diagnostics. Numeric special values follow the XPath lexical space.
    pub fn lexical(&self) -> String {
        use XdmAtomicValue::*;
        match self {
            Boolean(b) => if *b { "true" } else { "false" }.to_string(),
            String(s) | UntypedAtomic(s) | AnyUri(s) => s.clone(),
            QName { prefix, local, .. } => match prefix {
                Some(p) => format!("{p}:{local}"),
                None => local.clone(),
            },
            Integer(i) => i.to_string(),
            Decimal(d) => fmt_double(*d),
            Double(d) => fmt_double(*d),
            Float(f) => fmt_double(*f as f64),
            DateTime(dt) => dt.to_rfc3339(),
            Date { date, tz } => match tz {
                Some(tz) => format!("{date}{tz}"),
                None => date.to_string(),
            },
            Time { time, tz } => match tz {
                Some(tz) => format!("{time}{tz}"),
                None => time.to_string(),
            },
        }
    }
}

fn fmt_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d == f64::INFINITY {
        "INF".to_string()
    } else if d == f64::NEG_INFINITY {
        "-INF".to_string()
    } else {
        d.to_string()
    }
}

/// Callable payload of a function item. The simple materialized signature is
/// enough for the substrate; lazily-evaluated built-ins live in the registry.
pub type SequenceFn<N> =
    Arc<dyn Fn(Vec<XdmSequence<N>>) -> Result<XdmSequence<N>, Error> + Send + Sync>;

/// A first-class function item.
#[derive(Clone)]
pub struct FunctionItem<N> {
    pub name: Option<ExpandedName>,
    pub arity: usize,
    pub body: SequenceFn<N>,
}

impl<N> fmt::Debug for FunctionItem<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionItem")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// An XDM map: ordered key/value entries with atomic keys.
#[derive(Debug, Clone)]
pub struct XdmMap<N>(pub Arc<Vec<(XdmAtomicValue, XdmSequence<N>)>>);

/// An XDM array: an ordered list of member sequences.
#[derive(Debug, Clone)]
pub struct XdmArray<N>(pub Arc<Vec<XdmSequence<N>>>);

/// One item in a sequence. Immutable once constructed; the payload variant
/// always matches the branch of [`TypeTag`] reported by [`XdmItem::type_tag`].
#[derive(Debug, Clone)]
pub enum XdmItem<N> {
    Node(N),
    Atomic(XdmAtomicValue),
    Function(FunctionItem<N>),
    Map(XdmMap<N>),
    Array(XdmArray<N>),
}

pub type XdmSequence<N> = Vec<XdmItem<N>>;

impl<N: XdmNode> XdmItem<N> {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            XdmItem::Node(n) => n.kind().type_tag(),
            XdmItem::Atomic(a) => a.type_tag(),
            XdmItem::Function(_) => TypeTag::FunctionItem,
            XdmItem::Map(_) => TypeTag::MapItem,
            XdmItem::Array(_) => TypeTag::ArrayItem,
        }
    }
}

impl<N: PartialEq> PartialEq for XdmItem<N> {
    fn eq(&self, other: &Self) -> bool {
        use XdmItem::*;
        match (self, other) {
            // Node equality is identity equality, supplied by the node handle.
            (Node(a), Node(b)) => a == b,
            (Atomic(a), Atomic(b)) => a == b,
            (Function(a), Function(b)) => Arc::ptr_eq(&a.body, &b.body),
            (Map(a), Map(b)) => Arc::ptr_eq(&a.0, &b.0) || a.0 == b.0,
            (Array(a), Array(b)) => Arc::ptr_eq(&a.0, &b.0) || a.0 == b.0,
            _ => false,
        }
    }
}

impl<N> From<XdmAtomicValue> for XdmItem<N> {
    fn from(a: XdmAtomicValue) -> Self {
        XdmItem::Atomic(a)
    }
}
