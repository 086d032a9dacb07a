//! Evaluation contexts, the error type and the function registry.

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use crate::consts::ERR_NS;
use crate::model::{Navigator, XdmNode};
use crate::xdm::{ExpandedName, XdmItem, XdmSequence, XdmSequenceStream};

/// Canonicalized set of error codes the substrate emits. Intentionally small;
/// variants are introduced when first needed and `Unknown` stays as the safe
/// fallback for codes carried in from elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Casting / lexical forms
    FORG0001, // invalid lexical form for a cast
    FORG0004, // one-or-more violated
    FORG0005, // exactly-one violated
    FOTY0013, // atomization not supported (function/map/array)
    // Type errors
    XPTY0004, // subtype/cast/promotion/arity mismatch
    XPDY0002, // context item undefined
    XPST0008, // undeclared variable
    XPST0017, // unknown function / wrong arity
    XPST0081, // unresolvable namespace prefix
    XQST0033, // conflicting namespace binding
    // XQuery Update Facility
    XUST0001, // updating expression in a non-updating position (or vice versa)
    XUTY0005, // insert target must be a single element or document node
    XUTY0006, // insert before/after target must be a child node
    XUTY0007, // delete target must be a sequence of nodes
    XUTY0008, // replace target must be a single elem/attr/text/comment/pi
    XUTY0010, // replacement for a non-attribute node must be a single node
    XUTY0011, // replacement for an attribute must be attribute nodes
    XUTY0012, // rename target must be a single element, attribute or pi
    XUDY0009, // replace target has no parent
    XUDY0015, // same target in more than one rename
    XUDY0016, // same target in more than one replace node
    XUDY0017, // same target in more than one replace value
    XUDY0027, // update target is the empty sequence
    XUDY0030, // insert before/after target has no parent
    // Project specific, following the same QName convention
    ASYN0001, // producer suspended during a synchronous drain
    ORDR0001, // navigator returned inconsistent structure during ordering
    // Fallback
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            FORG0001 => "FORG0001",
            FORG0004 => "FORG0004",
            FORG0005 => "FORG0005",
            FOTY0013 => "FOTY0013",
            XPTY0004 => "XPTY0004",
            XPDY0002 => "XPDY0002",
            XPST0008 => "XPST0008",
            XPST0017 => "XPST0017",
            XPST0081 => "XPST0081",
            XQST0033 => "XQST0033",
            XUST0001 => "XUST0001",
            XUTY0005 => "XUTY0005",
            XUTY0006 => "XUTY0006",
            XUTY0007 => "XUTY0007",
            XUTY0008 => "XUTY0008",
            XUTY0010 => "XUTY0010",
            XUTY0011 => "XUTY0011",
            XUTY0012 => "XUTY0012",
            XUDY0009 => "XUDY0009",
            XUDY0015 => "XUDY0015",
            XUDY0016 => "XUDY0016",
            XUDY0017 => "XUDY0017",
            XUDY0027 => "XUDY0027",
            XUDY0030 => "XUDY0030",
            ASYN0001 => "ASYN0001",
            ORDR0001 => "ORDR0001",
            Unknown => "UNKNOWN",
        }
    }

    /// QName of this code in the xqt-errors namespace.
    pub fn qname(&self) -> ExpandedName {
        ExpandedName::new(Some(ERR_NS.to_string()), self.as_str())
    }

    pub fn from_local(s: &str) -> Self {
        use ErrorCode::*;
        match s {
            "FORG0001" => FORG0001,
            "FORG0004" => FORG0004,
            "FORG0005" => FORG0005,
            "FOTY0013" => FOTY0013,
            "XPTY0004" => XPTY0004,
            "XPDY0002" => XPDY0002,
            "XPST0008" => XPST0008,
            "XPST0017" => XPST0017,
            "XPST0081" => XPST0081,
            "XQST0033" => XQST0033,
            "XUST0001" => XUST0001,
            "XUTY0005" => XUTY0005,
            "XUTY0006" => XUTY0006,
            "XUTY0007" => XUTY0007,
            "XUTY0008" => XUTY0008,
            "XUTY0010" => XUTY0010,
            "XUTY0011" => XUTY0011,
            "XUTY0012" => XUTY0012,
            "XUDY0009" => XUDY0009,
            "XUDY0015" => XUDY0015,
            "XUDY0016" => XUDY0016,
            "XUDY0017" => XUDY0017,
            "XUDY0027" => XUDY0027,
            "XUDY0030" => XUDY0030,
            "ASYN0001" => ASYN0001,
            "ORDR0001" => ORDR0001,
            _ => Unknown,
        }
    }
}

/// Engine error: a stable, matchable code plus a human-readable message.
///
/// The code is the error *kind*; diagnostic detail stays in the message so
/// callers can match on kinds without parsing text, and rendering never needs
/// access to node serialization.
#[derive(Debug, Clone, thiserror::Error)]
pub struct Error {
    pub code: ExpandedName,
    pub message: String,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new_qname(code: ExpandedName, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
            source: None,
        }
    }

    pub fn from_code(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self::new_qname(code.qname(), msg)
    }

    /// Structured code for matching; codes outside the xqt-errors namespace
    /// map to `Unknown`.
    pub fn code_enum(&self) -> ErrorCode {
        if self.code.ns_uri.as_deref() == Some(ERR_NS) {
            ErrorCode::from_local(&self.code.local)
        } else {
            ErrorCode::Unknown
        }
    }

    pub fn format_code(&self) -> String {
        if self.code.ns_uri.as_deref() == Some(ERR_NS) {
            format!("err:{}", self.code.local)
        } else {
            self.code.to_string()
        }
    }

    pub fn with_source(
        mut self,
        source: impl Into<Option<Arc<dyn std::error::Error + Send + Sync>>>,
    ) -> Self {
        self.source = source.into();
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {} ({})", self.message, self.format_code())
    }
}

#[derive(Debug, Clone, Default)]
pub struct NamespaceBindings {
    pub by_prefix: HashMap<String, String>,
}

/// Static (compile-time) evaluation context: namespace bindings and module
/// import locations. Captured once per top-level evaluation; the dynamic
/// context never overrides it.
#[derive(Debug, Clone)]
pub struct StaticContext {
    pub default_function_namespace: Option<String>,
    pub namespaces: NamespaceBindings,
    pub module_imports: HashMap<String, String>,
}

impl Default for StaticContext {
    fn default() -> Self {
        let mut ns = NamespaceBindings::default();
        // Implicit xml binding; never overridable
        ns.by_prefix
            .insert("xml".to_string(), crate::consts::XML_URI.to_string());
        Self {
            default_function_namespace: Some(crate::consts::FNS.to_string()),
            namespaces: ns,
            module_imports: HashMap::new(),
        }
    }
}

impl StaticContext {
    /// Resolve a lexical prefix against the in-scope bindings.
    pub fn resolve_prefix(&self, prefix: &str) -> Option<&str> {
        self.namespaces.by_prefix.get(prefix).map(String::as_str)
    }

    /// Bind a prefix, rejecting conflicting rebinds with `XQST0033`.
    pub fn bind_prefix(&mut self, prefix: &str, uri: &str) -> Result<(), Error> {
        if let Some(existing) = self.namespaces.by_prefix.get(prefix) {
            if existing != uri {
                return Err(Error::from_code(
                    ErrorCode::XQST0033,
                    format!("prefix '{prefix}' is already bound to '{existing}'"),
                ));
            }
            return Ok(());
        }
        self.namespaces
            .by_prefix
            .insert(prefix.to_string(), uri.to_string());
        Ok(())
    }
}

pub struct StaticContextBuilder {
    ctx: StaticContext,
}

impl Default for StaticContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: StaticContext::default(),
        }
    }

    pub fn with_default_function_namespace(mut self, uri: impl Into<String>) -> Self {
        self.ctx.default_function_namespace = Some(uri.into());
        self
    }

    /// Register a namespace prefix. Attempts to override the reserved `xml`
    /// prefix are ignored.
    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        let p = prefix.into();
        if p == "xml" {
            return self;
        }
        self.ctx.namespaces.by_prefix.insert(p, uri.into());
        self
    }

    pub fn with_module_import(
        mut self,
        name: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        self.ctx.module_imports.insert(name.into(), location.into());
        self
    }

    pub fn build(self) -> StaticContext {
        self.ctx
    }
}

/// Dynamic (run-time) evaluation context.
#[derive(Clone)]
pub struct DynamicContext<N> {
    pub context_item: Option<XdmItem<N>>,
    pub variables: HashMap<ExpandedName, XdmSequence<N>>,
    pub navigator: Arc<dyn Navigator<N>>,
    pub functions: Arc<FunctionRegistry<N>>,
}

impl<N: XdmNode> DynamicContext<N> {
    pub fn variable(&self, name: &ExpandedName) -> Result<XdmSequence<N>, Error> {
        self.variables.get(name).cloned().ok_or_else(|| {
            Error::from_code(ErrorCode::XPST0008, format!("undeclared variable ${name}"))
        })
    }

    pub fn context_item(&self) -> Result<XdmItem<N>, Error> {
        self.context_item
            .clone()
            .ok_or_else(|| Error::from_code(ErrorCode::XPDY0002, "context item is undefined"))
    }

    /// Derived context with a different focus, used when mapping a
    /// sub-expression over each item of an intermediate result.
    pub fn with_focus(&self, item: XdmItem<N>) -> Self {
        let mut ctx = self.clone();
        ctx.context_item = Some(item);
        ctx
    }
}

pub struct DynamicContextBuilder<N> {
    ctx: DynamicContext<N>,
}

impl<N: XdmNode> DynamicContextBuilder<N> {
    pub fn new(navigator: Arc<dyn Navigator<N>>) -> Self {
        Self {
            ctx: DynamicContext {
                context_item: None,
                variables: HashMap::new(),
                navigator,
                functions: Arc::new(default_function_registry::<N>()),
            },
        }
    }

    pub fn with_context_item(mut self, item: impl Into<XdmItem<N>>) -> Self {
        self.ctx.context_item = Some(item.into());
        self
    }

    pub fn with_variable(mut self, name: ExpandedName, value: XdmSequence<N>) -> Self {
        self.ctx.variables.insert(name, value);
        self
    }

    pub fn with_functions(mut self, reg: Arc<FunctionRegistry<N>>) -> Self {
        self.ctx.functions = reg;
        self
    }

    pub fn build(self) -> DynamicContext<N> {
        self.ctx
    }
}

/// Declared parameter contract, driving argument coercion at call sites.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub ty: crate::xdm::TypeTag,
    pub occurrence: crate::xdm::Occurrence,
}

impl fmt::Display for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.ty, self.occurrence.suffix())
    }
}

pub struct CallCtx<'a, N> {
    pub dyn_ctx: &'a DynamicContext<N>,
    pub static_ctx: &'a StaticContext,
}

pub type FunctionImpl<N> = Arc<
    dyn for<'a> Fn(&CallCtx<'a, N>, Vec<XdmSequenceStream<N>>) -> Result<XdmSequenceStream<N>, Error>
        + Send
        + Sync,
>;

pub struct FunctionEntry<N> {
    pub params: Vec<ParamSpec>,
    pub body: FunctionImpl<N>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionKey {
    pub name: ExpandedName,
    pub arity: usize,
}

/// Function registry keyed by expanded name and exact arity.
pub struct FunctionRegistry<N> {
    fns: HashMap<FunctionKey, FunctionEntry<N>>,
}

impl<N> Default for FunctionRegistry<N> {
    fn default() -> Self {
        Self {
            fns: HashMap::new(),
        }
    }
}

impl<N> FunctionRegistry<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: ExpandedName, params: Vec<ParamSpec>, f: F)
    where
        F: for<'a> Fn(&CallCtx<'a, N>, Vec<XdmSequenceStream<N>>) -> Result<XdmSequenceStream<N>, Error>
            + Send
            + Sync
            + 'static,
    {
        let arity = params.len();
        self.fns.insert(
            FunctionKey { name, arity },
            FunctionEntry {
                params,
                body: Arc::new(f),
            },
        );
    }

    /// Convenience: register in a namespace with local name.
    pub fn register_ns<F>(&mut self, ns_uri: &str, local: &str, params: Vec<ParamSpec>, f: F)
    where
        F: for<'a> Fn(&CallCtx<'a, N>, Vec<XdmSequenceStream<N>>) -> Result<XdmSequenceStream<N>, Error>
            + Send
            + Sync
            + 'static,
    {
        self.register(
            ExpandedName::new(Some(ns_uri.to_string()), local),
            params,
            f,
        );
    }

    /// Resolve by name and arity, applying the default function namespace to
    /// prefixless names.
    pub fn resolve(
        &self,
        name: &ExpandedName,
        arity: usize,
        default_ns: Option<&str>,
    ) -> Result<&FunctionEntry<N>, Error> {
        let key = FunctionKey {
            name: name.clone(),
            arity,
        };
        if let Some(entry) = self.fns.get(&key) {
            return Ok(entry);
        }
        if name.ns_uri.is_none() {
            if let Some(ns) = default_ns {
                let effective = FunctionKey {
                    name: ExpandedName::new(Some(ns.to_string()), name.local.clone()),
                    arity,
                };
                if let Some(entry) = self.fns.get(&effective) {
                    return Ok(entry);
                }
            }
        }
        Err(Error::from_code(
            ErrorCode::XPST0017,
            format!("unknown function {name}#{arity}"),
        ))
    }
}

/// Built-ins registered by default. The full standard library is out of scope;
/// these are representative consumers of the coercion protocol.
pub fn default_function_registry<N: XdmNode>() -> FunctionRegistry<N> {
    use crate::xdm::stream::CollectingCursor;
    use crate::xdm::{Occurrence, TypeTag, XdmAtomicValue};

    let mut reg = FunctionRegistry::new();
    let fns = crate::consts::FNS;

    reg.register_ns(
        fns,
        "count",
        vec![ParamSpec {
            ty: TypeTag::Item,
            occurrence: Occurrence::Star,
        }],
        |_ctx, mut args| {
            let arg = args.remove(0);
            Ok(XdmSequenceStream::from_cursor(CollectingCursor::new(
                arg,
                |items: XdmSequence<N>| {
                    Ok(vec![XdmItem::Atomic(XdmAtomicValue::Integer(
                        items.len() as i64
                    ))])
                },
            )))
        },
    );

    reg.register_ns(
        fns,
        "string",
        vec![ParamSpec {
            ty: TypeTag::Item,
            occurrence: Occurrence::Optional,
        }],
        |_ctx, mut args| {
            let arg = args.remove(0);
            Ok(XdmSequenceStream::from_cursor(CollectingCursor::new(
                arg,
                |items: XdmSequence<N>| {
                    let text = match items.first() {
                        None => String::new(),
                        Some(item) => {
                            let atomic = crate::engine::casting::atomize(item)?;
                            atomic.lexical()
                        }
                    };
                    Ok(vec![XdmItem::Atomic(XdmAtomicValue::String(text))])
                },
            )))
        },
    );

    reg.register_ns(
        fns,
        "abs",
        vec![ParamSpec {
            ty: TypeTag::Numeric,
            occurrence: Occurrence::Optional,
        }],
        |_ctx, mut args| {
            let arg = args.remove(0);
            Ok(arg.map_items(|item| match item {
                XdmItem::Atomic(XdmAtomicValue::Integer(i)) => {
                    Ok(XdmItem::Atomic(XdmAtomicValue::Integer(i.abs())))
                }
                XdmItem::Atomic(XdmAtomicValue::Decimal(d)) => {
                    Ok(XdmItem::Atomic(XdmAtomicValue::Decimal(d.abs())))
                }
                XdmItem::Atomic(XdmAtomicValue::Double(d)) => {
                    Ok(XdmItem::Atomic(XdmAtomicValue::Double(d.abs())))
                }
                XdmItem::Atomic(XdmAtomicValue::Float(f)) => {
                    Ok(XdmItem::Atomic(XdmAtomicValue::Float(f.abs())))
                }
                other => Err(Error::from_code(
                    ErrorCode::XPTY0004,
                    format!("fn:abs expects a numeric argument, got {}", other.type_tag()),
                )),
            }))
        },
    );

    reg.register_ns(
        fns,
        "exactly-one",
        vec![ParamSpec {
            ty: TypeTag::Item,
            occurrence: Occurrence::Star,
        }],
        |_ctx, mut args| {
            let arg = args.remove(0);
            Ok(XdmSequenceStream::from_cursor(CollectingCursor::new(
                arg,
                |items: XdmSequence<N>| {
                    if items.len() == 1 {
                        Ok(items)
                    } else {
                        Err(Error::from_code(
                            ErrorCode::FORG0005,
                            format!("fn:exactly-one got a sequence of {} items", items.len()),
                        ))
                    }
                },
            )))
        },
    );

    reg
}
