//! The closed item-type lattice and the subtype predicate.
//!
//! Every value in the data model carries a [`TypeTag`] drawn from this single
//! hierarchy. The lattice is a DAG with one root (`item()`); subtype queries go
//! through [`is_subtype`], which is total and reflexive. No runtime class
//! identity and no string-named types are involved, so the relation can be
//! tested exhaustively.

use core::fmt;

/// Semantic type of one XDM item.
///
/// Numeric subtypes follow the XML Schema hierarchy: `integer` derives from
/// `decimal`; `decimal`, `double` and `float` sit under the `numeric` union.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    // Root
    Item,
    // Node kinds
    Node,
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
    // Function items (maps and arrays are functions in XDM 3.1)
    FunctionItem,
    MapItem,
    ArrayItem,
    // Atomics
    AnyAtomic,
    UntypedAtomic,
    Boolean,
    String,
    AnyUri,
    QName,
    Numeric,
    Decimal,
    Integer,
    Double,
    Float,
    DateTime,
    Date,
    Time,
}

impl TypeTag {
    /// Immediate supertype in the lattice; `None` only for the root.
    pub fn parent(self) -> Option<TypeTag> {
        use TypeTag::*;
        match self {
            Item => None,
            Node | FunctionItem | AnyAtomic => Some(Item),
            Document | Element | Attribute | Text | Comment | ProcessingInstruction => Some(Node),
            MapItem | ArrayItem => Some(FunctionItem),
            UntypedAtomic | Boolean | String | AnyUri | QName | Numeric | DateTime | Date
            | Time => Some(AnyAtomic),
            Decimal | Double | Float => Some(Numeric),
            Integer => Some(Decimal),
        }
    }

    /// True for tags on the atomic branch of the lattice.
    pub fn is_atomic(self) -> bool {
        is_subtype(self, TypeTag::AnyAtomic)
    }

    /// True for tags on the node branch of the lattice.
    pub fn is_node(self) -> bool {
        is_subtype(self, TypeTag::Node)
    }
}

/// Whether `tag` is `candidate_ancestor` or derives from it.
///
/// Total over all tag pairs and reflexive: `is_subtype(t, t)` always holds.
pub fn is_subtype(tag: TypeTag, candidate_ancestor: TypeTag) -> bool {
    let mut cur = Some(tag);
    while let Some(t) = cur {
        if t == candidate_ancestor {
            return true;
        }
        cur = t.parent();
    }
    false
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TypeTag::*;
        let s = match self {
            Item => "item()",
            Node => "node()",
            Document => "document-node()",
            Element => "element()",
            Attribute => "attribute()",
            Text => "text()",
            Comment => "comment()",
            ProcessingInstruction => "processing-instruction()",
            FunctionItem => "function(*)",
            MapItem => "map(*)",
            ArrayItem => "array(*)",
            AnyAtomic => "xs:anyAtomicType",
            UntypedAtomic => "xs:untypedAtomic",
            Boolean => "xs:boolean",
            String => "xs:string",
            AnyUri => "xs:anyURI",
            QName => "xs:QName",
            Numeric => "xs:numeric",
            Decimal => "xs:decimal",
            Integer => "xs:integer",
            Double => "xs:double",
            Float => "xs:float",
            DateTime => "xs:dateTime",
            Date => "xs:date",
            Time => "xs:time",
        };
        f.write_str(s)
    }
}

/// Arity contract on a declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Occurrence {
    /// Exactly one item.
    One,
    /// Zero or one item (`?`).
    Optional,
    /// One or more items (`+`).
    Plus,
    /// Zero or more items (`*`).
    Star,
}

impl Occurrence {
    pub fn suffix(self) -> &'static str {
        match self {
            Occurrence::One => "",
            Occurrence::Optional => "?",
            Occurrence::Plus => "+",
            Occurrence::Star => "*",
        }
    }
}

/// Declared type of a sequence: a type plus an occurrence indicator, or the
/// empty sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceType {
    Empty,
    Typed { ty: TypeTag, occurrence: Occurrence },
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceType::Empty => f.write_str("empty-sequence()"),
            SequenceType::Typed { ty, occurrence } => {
                write!(f, "{}{}", ty, occurrence.suffix())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflexive_for_every_tag() {
        use TypeTag::*;
        for t in [
            Item, Node, Document, Element, Attribute, Text, Comment, ProcessingInstruction,
            FunctionItem, MapItem, ArrayItem, AnyAtomic, UntypedAtomic, Boolean, String, AnyUri,
            QName, Numeric, Decimal, Integer, Double, Float, DateTime, Date, Time,
        ] {
            assert!(is_subtype(t, t), "{t} not reflexive");
            assert!(is_subtype(t, Item), "{t} not under item()");
        }
    }

    #[test]
    fn numeric_chain() {
        assert!(is_subtype(TypeTag::Integer, TypeTag::Decimal));
        assert!(is_subtype(TypeTag::Integer, TypeTag::Numeric));
        assert!(is_subtype(TypeTag::Integer, TypeTag::AnyAtomic));
        assert!(!is_subtype(TypeTag::Decimal, TypeTag::Integer));
        assert!(!is_subtype(TypeTag::Double, TypeTag::Decimal));
    }

    #[test]
    fn nodes_and_functions_are_disjoint_from_atomics() {
        assert!(is_subtype(TypeTag::Element, TypeTag::Node));
        assert!(is_subtype(TypeTag::MapItem, TypeTag::FunctionItem));
        assert!(!is_subtype(TypeTag::Element, TypeTag::AnyAtomic));
        assert!(!is_subtype(TypeTag::MapItem, TypeTag::Node));
        assert!(!is_subtype(TypeTag::Boolean, TypeTag::Node));
    }
}
