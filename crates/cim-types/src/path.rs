//! Class and instance paths.

use std::fmt;

use crate::element::Element;
use crate::nocase::NocaseMap;
use crate::types::CimType;
use crate::value::CimValue;
use crate::CimError;

fn eq_opt_nocase(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        (None, None) => true,
        _ => false,
    }
}

/// `LOCALNAMESPACEPATH` element for a `/`-separated namespace.
pub fn local_namespace_path(namespace: &str) -> Element {
    Element::new("LOCALNAMESPACEPATH").children(
        namespace
            .split('/')
            .filter(|part| !part.is_empty())
            .map(|part| Element::new("NAMESPACE").attr("NAME", part)),
    )
}

fn namespace_path(host: &str, namespace: &str) -> Element {
    Element::new("NAMESPACEPATH")
        .child(Element::new("HOST").text(host))
        .child(local_namespace_path(namespace))
}

/// Path to a CIM class (`CLASSNAME`, `LOCALCLASSPATH` or `CLASSPATH`).
#[derive(Debug, Clone)]
pub struct CimClassName {
    pub classname: String,
    pub host: Option<String>,
    pub namespace: Option<String>,
}

impl CimClassName {
    pub fn new<S: Into<String>>(classname: S) -> Self {
        Self {
            classname: classname.into(),
            host: None,
            namespace: None,
        }
    }

    pub fn with_namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Copy without host and namespace, as sent inline in requests.
    pub fn local(&self) -> Self {
        Self::new(self.classname.clone())
    }

    /// Serialize using the most specific element the set fields allow.
    pub fn to_element(&self) -> Element {
        let classname = Element::new("CLASSNAME").attr("NAME", self.classname.as_str());
        match (&self.host, &self.namespace) {
            (Some(host), Some(ns)) => Element::new("CLASSPATH")
                .child(namespace_path(host, ns))
                .child(classname),
            (None, Some(ns)) => Element::new("LOCALCLASSPATH")
                .child(local_namespace_path(ns))
                .child(classname),
            _ => classname,
        }
    }
}

impl PartialEq for CimClassName {
    fn eq(&self, other: &Self) -> bool {
        self.classname.eq_ignore_ascii_case(&other.classname)
            && eq_opt_nocase(&self.host, &other.host)
            && eq_opt_nocase(&self.namespace, &other.namespace)
    }
}

impl fmt::Display for CimClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_uri_prefix(f, &self.host, &self.namespace)?;
        f.write_str(&self.classname)
    }
}

impl From<&str> for CimClassName {
    fn from(value: &str) -> Self {
        CimClassName::new(value)
    }
}

impl From<String> for CimClassName {
    fn from(value: String) -> Self {
        CimClassName::new(value)
    }
}

/// Path to a CIM instance: class name plus keybindings.
///
/// An unnamed single key (a bare `KEYVALUE`/`VALUE.REFERENCE` in
/// `INSTANCENAME`) is stored under the empty key name. A key whose value
/// the server left empty is `None`.
#[derive(Debug, Clone)]
pub struct CimInstanceName {
    pub classname: String,
    pub keybindings: NocaseMap<Option<CimValue>>,
    pub host: Option<String>,
    pub namespace: Option<String>,
}

impl CimInstanceName {
    pub fn new<S: Into<String>>(classname: S) -> Self {
        Self {
            classname: classname.into(),
            keybindings: NocaseMap::new(),
            host: None,
            namespace: None,
        }
    }

    /// Builder: add a keybinding.
    pub fn key<K: Into<String>, V: Into<CimValue>>(mut self, name: K, value: V) -> Self {
        self.keybindings.insert(name, Some(value.into()));
        self
    }

    pub fn with_namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Copy without host and namespace.
    pub fn local(&self) -> Self {
        Self {
            classname: self.classname.clone(),
            keybindings: self.keybindings.clone(),
            host: None,
            namespace: None,
        }
    }

    fn instancename_element(&self) -> Element {
        let mut elem = Element::new("INSTANCENAME").attr("CLASSNAME", self.classname.as_str());
        for (name, value) in self.keybindings.iter() {
            let key_elem = keyvalue_element(value.as_ref());
            if name.is_empty() && self.keybindings.len() == 1 {
                elem = elem.child(key_elem);
            } else {
                elem = elem.child(Element::new("KEYBINDING").attr("NAME", name).child(key_elem));
            }
        }
        elem
    }

    pub fn to_element(&self) -> Element {
        let name = self.instancename_element();
        match (&self.host, &self.namespace) {
            (Some(host), Some(ns)) => Element::new("INSTANCEPATH")
                .child(namespace_path(host, ns))
                .child(name),
            (None, Some(ns)) => Element::new("LOCALINSTANCEPATH")
                .child(local_namespace_path(ns))
                .child(name),
            _ => name,
        }
    }

    /// Value of the `CIMObject` HTTP header: `namespace:Class.key="v",...`.
    pub fn to_cimobject(&self, namespace: &str) -> String {
        let mut out = format!("{}:{}", namespace, self.classname);
        write_keys(&mut out, &self.keybindings);
        out
    }

    /// Parse an untyped WBEM URI: `[//host/][namespace:]Class.key=value,...`.
    ///
    /// String values are double quoted; `TRUE`/`FALSE` become booleans;
    /// other bare values must be numbers.
    pub fn from_wbem_uri(uri: &str) -> Result<Self, CimError> {
        let invalid = |why: &str| CimError::value(format!("invalid WBEM URI {uri:?}: {why}"));
        let mut rest = uri.trim();
        let mut host = None;
        if let Some(after) = rest.strip_prefix("//") {
            let (h, tail) = after.split_once('/').ok_or_else(|| invalid("host without path"))?;
            host = Some(h.to_string());
            rest = tail;
        } else if let Some(after) = rest.strip_prefix('/') {
            rest = after;
        }
        let (ns_and_class, keys) = match rest.find('.') {
            Some(dot) => (&rest[..dot], Some(&rest[dot + 1..])),
            None => (rest, None),
        };
        let (namespace, classname) = match ns_and_class.rsplit_once(':') {
            Some((ns, class)) => (Some(ns.trim_matches('/').to_string()), class),
            None => (None, ns_and_class),
        };
        if classname.is_empty() {
            return Err(invalid("missing class name"));
        }
        let mut path = CimInstanceName::new(classname);
        path.host = host;
        path.namespace = namespace.filter(|ns| !ns.is_empty());
        if let Some(keys) = keys {
            for (name, raw) in split_keybindings(keys).map_err(|why| invalid(&why))? {
                let value = parse_uri_key_value(&raw).ok_or_else(|| invalid("bad key value"))?;
                path.keybindings.insert(name, Some(value));
            }
        }
        Ok(path)
    }
}

fn keyvalue_element(value: Option<&CimValue>) -> Element {
    match value {
        None => Element::new("KEYVALUE"),
        Some(CimValue::Reference(path)) => {
            Element::new("VALUE.REFERENCE").child(path.to_element())
        }
        Some(other) => {
            let ty = other.cim_type().unwrap_or(CimType::String);
            Element::new("KEYVALUE")
                .attr("VALUETYPE", ty.key_value_type())
                .attr("TYPE", ty.name())
                .text(other.to_value_text())
        }
    }
}

fn write_uri_prefix(
    f: &mut fmt::Formatter<'_>,
    host: &Option<String>,
    namespace: &Option<String>,
) -> fmt::Result {
    if let Some(host) = host {
        write!(f, "//{host}/")?;
    }
    if let Some(ns) = namespace {
        write!(f, "{ns}:")?;
    }
    Ok(())
}

fn write_keys(out: &mut String, keys: &NocaseMap<Option<CimValue>>) {
    let mut sorted: Vec<_> = keys.iter().collect();
    sorted.sort_by_key(|(k, _)| k.to_ascii_lowercase());
    for (idx, (name, value)) in sorted.into_iter().enumerate() {
        out.push(if idx == 0 { '.' } else { ',' });
        if !name.is_empty() {
            out.push_str(name);
            out.push('=');
        }
        let Some(value) = value else {
            out.push_str("NULL");
            continue;
        };
        match value {
            CimValue::String(_) | CimValue::Char16(_) | CimValue::DateTime(_) => {
                out.push('"');
                for c in value.to_value_text().chars() {
                    if c == '"' || c == '\\' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
            }
            CimValue::Reference(path) => {
                out.push('"');
                out.push_str(&path.to_string().replace('\\', "\\\\").replace('"', "\\\""));
                out.push('"');
            }
            other => out.push_str(&other.to_value_text()),
        }
    }
}

fn split_keybindings(keys: &str) -> Result<Vec<(String, String)>, String> {
    let mut result = Vec::new();
    let mut chars = keys.chars().peekable();
    loop {
        let name: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if name.is_empty() {
            return Err("empty key name".into());
        }
        let mut raw = String::new();
        if chars.peek() == Some(&'"') {
            raw.push('"');
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            raw.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    c => raw.push(c),
                }
            }
            if !closed {
                return Err("unterminated string".into());
            }
            raw.push('"');
            match chars.next() {
                None | Some(',') => {}
                Some(c) => return Err(format!("unexpected {c:?} after string")),
            }
        } else {
            raw = chars.by_ref().take_while(|c| *c != ',').collect();
        }
        result.push((name.trim().to_string(), raw));
        if chars.peek().is_none() {
            break;
        }
    }
    Ok(result)
}

fn parse_uri_key_value(raw: &str) -> Option<CimValue> {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return Some(CimValue::String(raw[1..raw.len() - 1].to_string()));
    }
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Some(CimValue::Boolean(true));
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Some(CimValue::Boolean(false));
    }
    if let Ok(v) = trimmed.parse::<i64>() {
        return Some(CimValue::Sint64(v));
    }
    if let Ok(v) = trimmed.parse::<u64>() {
        return Some(CimValue::Uint64(v));
    }
    trimmed.parse::<f64>().ok().map(CimValue::Real64)
}

impl PartialEq for CimInstanceName {
    fn eq(&self, other: &Self) -> bool {
        self.classname.eq_ignore_ascii_case(&other.classname)
            && self.keybindings == other.keybindings
            && eq_opt_nocase(&self.host, &other.host)
            && eq_opt_nocase(&self.namespace, &other.namespace)
    }
}

impl fmt::Display for CimInstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_uri_prefix(f, &self.host, &self.namespace)?;
        let mut out = self.classname.clone();
        write_keys(&mut out, &self.keybindings);
        f.write_str(&out)
    }
}

/// Either kind of object path.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectPath {
    Class(CimClassName),
    Instance(CimInstanceName),
}

impl ObjectPath {
    pub fn classname(&self) -> &str {
        match self {
            ObjectPath::Class(p) => &p.classname,
            ObjectPath::Instance(p) => &p.classname,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            ObjectPath::Class(p) => p.namespace.as_deref(),
            ObjectPath::Instance(p) => p.namespace.as_deref(),
        }
    }

    pub fn host(&self) -> Option<&str> {
        match self {
            ObjectPath::Class(p) => p.host.as_deref(),
            ObjectPath::Instance(p) => p.host.as_deref(),
        }
    }

    pub fn set_namespace(&mut self, namespace: Option<String>) {
        match self {
            ObjectPath::Class(p) => p.namespace = namespace,
            ObjectPath::Instance(p) => p.namespace = namespace,
        }
    }

    pub fn set_host(&mut self, host: Option<String>) {
        match self {
            ObjectPath::Class(p) => p.host = host,
            ObjectPath::Instance(p) => p.host = host,
        }
    }

    /// Copy without host and namespace.
    pub fn local(&self) -> Self {
        match self {
            ObjectPath::Class(p) => ObjectPath::Class(p.local()),
            ObjectPath::Instance(p) => ObjectPath::Instance(p.local()),
        }
    }

    pub fn to_element(&self) -> Element {
        match self {
            ObjectPath::Class(p) => p.to_element(),
            ObjectPath::Instance(p) => p.to_element(),
        }
    }

    pub fn as_instance(&self) -> Option<&CimInstanceName> {
        match self {
            ObjectPath::Instance(p) => Some(p),
            ObjectPath::Class(_) => None,
        }
    }

    pub fn as_class(&self) -> Option<&CimClassName> {
        match self {
            ObjectPath::Class(p) => Some(p),
            ObjectPath::Instance(_) => None,
        }
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectPath::Class(p) => p.fmt(f),
            ObjectPath::Instance(p) => p.fmt(f),
        }
    }
}

impl From<CimClassName> for ObjectPath {
    fn from(value: CimClassName) -> Self {
        ObjectPath::Class(value)
    }
}

impl From<CimInstanceName> for ObjectPath {
    fn from(value: CimInstanceName) -> Self {
        ObjectPath::Instance(value)
    }
}

/// A bare name addresses a class.
impl From<&str> for ObjectPath {
    fn from(value: &str) -> Self {
        ObjectPath::Class(CimClassName::new(value))
    }
}

impl From<String> for ObjectPath {
    fn from(value: String) -> Self {
        ObjectPath::Class(CimClassName::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classname_elements_follow_populated_fields() {
        let cn = CimClassName::new("CIM_Foo");
        assert_eq!(cn.to_element().to_xml(), "<CLASSNAME NAME=\"CIM_Foo\"/>");
        let local = cn.clone().with_namespace("root/cimv2");
        assert_eq!(
            local.to_element().to_xml(),
            "<LOCALCLASSPATH><LOCALNAMESPACEPATH><NAMESPACE NAME=\"root\"/>\
             <NAMESPACE NAME=\"cimv2\"/></LOCALNAMESPACEPATH><CLASSNAME NAME=\"CIM_Foo\"/>\
             </LOCALCLASSPATH>"
        );
        assert_eq!(local.with_host("h:5988").to_element().name, "CLASSPATH");
    }

    #[test]
    fn instancename_equality_is_case_insensitive() {
        let a = CimInstanceName::new("CIM_Foo").key("Name", "x").with_namespace("root/cimv2");
        let b = CimInstanceName::new("cim_foo").key("NAME", "x").with_namespace("ROOT/cimv2");
        assert_eq!(a, b);
        assert_ne!(a, b.clone().with_host("other"));
    }

    #[test]
    fn keybinding_serialization() {
        let p = CimInstanceName::new("CIM_Foo").key("Id", 5u32).key("Flag", true);
        let xml = p.to_element().to_xml();
        assert!(xml.contains(
            "<KEYBINDING NAME=\"Id\"><KEYVALUE VALUETYPE=\"numeric\" TYPE=\"uint32\">5</KEYVALUE>"
        ));
        assert!(xml.contains("VALUETYPE=\"boolean\" TYPE=\"boolean\">TRUE<"));
    }

    #[test]
    fn null_key_value() {
        let mut p = CimInstanceName::new("CIM_Foo").key("Id", 5u32);
        p.keybindings.insert("Flag", None);
        assert_eq!(p.to_string(), "CIM_Foo.Flag=NULL,Id=5");
        let xml = p.to_element().to_xml();
        assert!(xml.contains("<KEYBINDING NAME=\"Flag\"><KEYVALUE"), "{xml}");
        assert!(!xml.contains("VALUETYPE=\"boolean\""), "{xml}");
    }

    #[test]
    fn wbem_uri_roundtrip() {
        let p = CimInstanceName::from_wbem_uri(r#"//h:5988/root/cimv2:CIM_Foo.Name="a\"b",Id=42,On=true"#)
            .expect("uri");
        assert_eq!(p.host.as_deref(), Some("h:5988"));
        assert_eq!(p.namespace.as_deref(), Some("root/cimv2"));
        assert_eq!(p.keybindings.get("name"), Some(&Some(CimValue::String("a\"b".into()))));
        assert_eq!(p.keybindings.get("id"), Some(&Some(CimValue::Sint64(42))));
        assert_eq!(p.keybindings.get("on"), Some(&Some(CimValue::Boolean(true))));
        assert_eq!(
            p.to_cimobject("root/cimv2"),
            r#"root/cimv2:CIM_Foo.Id=42,Name="a\"b",On=TRUE"#
        );
        assert!(CimInstanceName::from_wbem_uri("ns:.x=1").is_err());
    }
}
