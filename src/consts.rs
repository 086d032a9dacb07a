//! Well-known namespace URIs.

/// XML Schema datatypes namespace (`xs:` prefix by convention).
pub const XS: &str = "http://www.w3.org/2001/XMLSchema";

/// Default function namespace (`fn:` prefix by convention).
pub const FNS: &str = "http://www.w3.org/2005/xpath-functions";

/// Namespace for W3C-defined XPath/XQuery error codes (xqt-errors).
pub const ERR_NS: &str = "http://www.w3.org/2005/xqt-errors";

/// Reserved `xml` prefix binding; cannot be overridden.
pub const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";
