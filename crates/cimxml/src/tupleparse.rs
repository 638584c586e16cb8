//! CIM-XML grammar parser (DSP0201).
//!
//! Walks an element tree produced by [`xml_to_tupletree`] and converts each
//! recognized element into a typed object. Every handler validates its
//! element with [`check_node`] before looking at attributes or children, so
//! a grammar violation always names the element and what was wrong with it.
//!
//! Two deviations from a strict reading of the grammar are accepted and
//! reported through [`Parser::tolerated_issues`]: instance paths without
//! keybindings, and empty boolean values (read as NULL). A `KEYVALUE` whose
//! `VALUETYPE` disagrees with its `TYPE` is also tolerated; `TYPE` wins.

use std::borrow::Cow;
use std::fmt;

use cim_types::{
    CimClass, CimClassName, CimDateTime, CimInstance, CimInstanceName, CimMethod, CimParameter,
    CimProperty, CimQualifier, CimQualifierDeclaration, CimType, CimValue, Element,
    EmbeddedObject, ObjectPath, Scope,
};
use tracing::warn;

use crate::status::CimStatus;
use crate::tupletree::xml_to_tupletree;
use crate::{ParseError, VersionKind};

macro_rules! element_kinds {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Every CIM-XML element the parser has a handler for.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum ElementKind {
            $($variant),*
        }

        impl ElementKind {
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(ElementKind::$variant),)*
                    _ => None,
                }
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $(ElementKind::$variant => $name),*
                }
            }
        }
    };
}

element_kinds! {
    Cim => "CIM",
    Message => "MESSAGE",
    SimpleReq => "SIMPLEREQ",
    SimpleRsp => "SIMPLERSP",
    SimpleExpReq => "SIMPLEEXPREQ",
    SimpleExpRsp => "SIMPLEEXPRSP",
    IMethodCall => "IMETHODCALL",
    MethodCall => "METHODCALL",
    ExpMethodCall => "EXPMETHODCALL",
    IMethodResponse => "IMETHODRESPONSE",
    MethodResponse => "METHODRESPONSE",
    ExpMethodResponse => "EXPMETHODRESPONSE",
    Error => "ERROR",
    IReturnValue => "IRETURNVALUE",
    ReturnValue => "RETURNVALUE",
    IParamValue => "IPARAMVALUE",
    ParamValue => "PARAMVALUE",
    ExpParamValue => "EXPPARAMVALUE",
    Value => "VALUE",
    ValueArray => "VALUE.ARRAY",
    ValueNull => "VALUE.NULL",
    ValueReference => "VALUE.REFERENCE",
    ValueRefArray => "VALUE.REFARRAY",
    ValueObject => "VALUE.OBJECT",
    ValueNamedInstance => "VALUE.NAMEDINSTANCE",
    ValueNamedObject => "VALUE.NAMEDOBJECT",
    ValueObjectWithPath => "VALUE.OBJECTWITHPATH",
    ValueObjectWithLocalPath => "VALUE.OBJECTWITHLOCALPATH",
    ValueInstanceWithPath => "VALUE.INSTANCEWITHPATH",
    ObjectPath => "OBJECTPATH",
    NamespacePath => "NAMESPACEPATH",
    LocalNamespacePath => "LOCALNAMESPACEPATH",
    Host => "HOST",
    Namespace => "NAMESPACE",
    ClassPath => "CLASSPATH",
    LocalClassPath => "LOCALCLASSPATH",
    ClassName => "CLASSNAME",
    InstancePath => "INSTANCEPATH",
    LocalInstancePath => "LOCALINSTANCEPATH",
    InstanceName => "INSTANCENAME",
    KeyBinding => "KEYBINDING",
    KeyValue => "KEYVALUE",
    Class => "CLASS",
    Instance => "INSTANCE",
    Qualifier => "QUALIFIER",
    QualifierDeclaration => "QUALIFIER.DECLARATION",
    Scope => "SCOPE",
    Property => "PROPERTY",
    PropertyArray => "PROPERTY.ARRAY",
    PropertyReference => "PROPERTY.REFERENCE",
    Method => "METHOD",
    Parameter => "PARAMETER",
    ParameterReference => "PARAMETER.REFERENCE",
    ParameterArray => "PARAMETER.ARRAY",
    ParameterRefArray => "PARAMETER.REFARRAY",
}

/// Non-fatal deviation from the CIM-XML grammar that was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToleratedIssue {
    pub element: String,
    pub message: String,
}

impl fmt::Display for ToleratedIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.element, self.message)
    }
}

/// Content of an `ERROR` element.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInfo {
    pub code: u32,
    pub description: Option<String>,
    pub instances: Vec<CimInstance>,
}

impl ErrorInfo {
    pub fn status(&self) -> CimStatus {
        CimStatus::from_raw(self.code)
    }
}

/// One object in a result list (`IRETURNVALUE`) or an `IPARAMVALUE`.
///
/// Classes and instances keep the path the wire carried for them in their
/// `path` field.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    ClassName(CimClassName),
    InstanceName(CimInstanceName),
    Class(CimClass),
    Instance(CimInstance),
    QualifierDeclaration(CimQualifierDeclaration),
    /// Untyped `VALUE`, `VALUE.ARRAY` or `VALUE.REFERENCE`.
    Value(CimValue),
}

impl Item {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Item::ClassName(_) => "class path",
            Item::InstanceName(_) => "instance path",
            Item::Class(_) => "class",
            Item::Instance(_) => "instance",
            Item::QualifierDeclaration(_) => "qualifier declaration",
            Item::Value(_) => "value",
        }
    }
}

/// `PARAMVALUE` (or `RETURNVALUE`, with an empty name).
#[derive(Debug, Clone, PartialEq)]
pub struct ParamValue {
    pub name: String,
    pub param_type: Option<CimType>,
    pub embedded_object: Option<EmbeddedObject>,
    pub value: Option<CimValue>,
}

/// `IPARAMVALUE` or `EXPPARAMVALUE`.
#[derive(Debug, Clone, PartialEq)]
pub struct IParamValue {
    pub name: String,
    pub value: Option<Item>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Intrinsic,
    Extrinsic,
    Export,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodResponse {
    pub kind: MethodKind,
    pub name: String,
    pub error: Option<ErrorInfo>,
    /// `IRETURNVALUE` content; `None` if the element was absent.
    pub items: Option<Vec<Item>>,
    /// `RETURNVALUE` of an extrinsic method.
    pub return_value: Option<ParamValue>,
    pub out_params: Vec<ParamValue>,
}

impl MethodResponse {
    /// Output parameter by case-insensitive name.
    pub fn out_param(&self, name: &str) -> Option<&ParamValue> {
        self.out_params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub kind: MethodKind,
    pub name: String,
    /// Target namespace of an intrinsic call.
    pub namespace: Option<String>,
    /// Target object of an extrinsic call.
    pub target: Option<ObjectPath>,
    pub iparams: Vec<IParamValue>,
    pub params: Vec<ParamValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Request(MethodCall),
    Response(MethodResponse),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub protocol_version: String,
    pub cim_version: String,
    pub dtd_version: String,
    pub body: MessageBody,
}

/// Untyped content of a value element, before its CIM type is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Scalar(String),
    Array(Vec<Option<String>>),
    Reference(ObjectPath),
    RefArray(Vec<Option<ObjectPath>>),
}

/// Result of [`Parser::parse_any`].
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Message(Message),
    Body(MessageBody),
    Error(ErrorInfo),
    ReturnItems(Vec<Item>),
    ReturnValue(ParamValue),
    ParamValue(ParamValue),
    IParamValue(IParamValue),
    Raw(RawValue),
    Null,
    Path(ObjectPath),
    NamespacePath { host: Option<String>, namespace: String },
    Text(String),
    KeyBinding(String, Option<CimValue>),
    KeyValue(Option<CimValue>),
    Item(Item),
    Qualifier(CimQualifier),
    Property(CimProperty),
    Method(CimMethod),
    Parameter(CimParameter),
    Scope(Scope),
}

fn unexpected(parent: &str, parsed: &Parsed) -> ParseError {
    ParseError::cimxml(format!(
        "Element {parent} has unexpected content {parsed:?}"
    ))
}

fn describe_children(kids: &[Element]) -> String {
    if kids.is_empty() {
        "none".to_string()
    } else {
        kids.iter()
            .map(|k| k.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn abbreviate(text: &str) -> String {
    const MAX: usize = 40;
    let trimmed = text.trim();
    if trimmed.chars().count() > MAX {
        format!("{}...", trimmed.chars().take(MAX).collect::<String>())
    } else {
        trimmed.to_string()
    }
}

/// Validate an element's name, attributes, child element names and text.
///
/// Attributes outside `required` and `optional` are errors. With
/// `children: Some(set)` every child element must be in `set` (an empty set
/// forbids child elements). Non-whitespace text is only accepted with
/// `allow_pcdata`. All violations are reported in one error.
pub fn check_node(
    node: &Element,
    name: &str,
    required: &[&str],
    optional: &[&str],
    children: Option<&[&str]>,
    allow_pcdata: bool,
) -> Result<(), ParseError> {
    if node.name != name {
        return Err(ParseError::cimxml(format!(
            "Expecting element {name}, got {}",
            node.name
        )));
    }
    let mut problems = Vec::new();

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|attr| node.get_attr(attr).is_none())
        .collect();
    if !missing.is_empty() {
        problems.push(format!("missing required attribute(s) {}", missing.join(", ")));
    }

    let invalid: Vec<&str> = node
        .attrs
        .iter()
        .map(|(k, _)| k.as_str())
        .filter(|k| !required.contains(k) && !optional.contains(k))
        .collect();
    if !invalid.is_empty() {
        problems.push(format!("invalid attribute(s) {}", invalid.join(", ")));
    }

    if let Some(allowed) = children {
        let bad: Vec<&str> = node
            .element_children()
            .map(|c| c.name.as_str())
            .filter(|n| !allowed.contains(n))
            .collect();
        if !bad.is_empty() {
            if allowed.is_empty() {
                problems.push(format!(
                    "child element(s) {} where none are allowed",
                    bad.join(", ")
                ));
            } else {
                problems.push(format!(
                    "invalid child element(s) {} (allowed: {})",
                    bad.join(", "),
                    allowed.join(", ")
                ));
            }
        }
    }

    if !allow_pcdata {
        let text = node.text_content();
        if !text.trim().is_empty() {
            problems.push(format!("unexpected text content {:?}", abbreviate(&text)));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ParseError::cimxml(format!(
            "Element {name} has {}",
            problems.join("; ")
        )))
    }
}

fn required_attr(node: &Element, name: &str) -> Result<String, ParseError> {
    node.get_attr(name).map(str::to_string).ok_or_else(|| {
        ParseError::cimxml(format!(
            "Element {} is missing required attribute {name}",
            node.name
        ))
    })
}

fn optional_attr(node: &Element, name: &str) -> Option<String> {
    node.get_attr(name).map(str::to_string)
}

fn bool_attr(node: &Element, name: &str) -> Result<Option<bool>, ParseError> {
    match node.get_attr(name) {
        None => Ok(None),
        Some(v) if v.trim().eq_ignore_ascii_case("true") => Ok(Some(true)),
        Some(v) if v.trim().eq_ignore_ascii_case("false") => Ok(Some(false)),
        Some(v) => Err(ParseError::cimxml(format!(
            "Element {} attribute {name} has invalid boolean value {v:?}",
            node.name
        ))),
    }
}

fn type_attr(node: &Element, name: &str) -> Result<Option<CimType>, ParseError> {
    node.get_attr(name)
        .map(|v| {
            CimType::from_name(v).ok_or_else(|| {
                ParseError::cimxml(format!(
                    "Element {} attribute {name} has invalid CIM type {v:?}",
                    node.name
                ))
            })
        })
        .transpose()
}

fn required_type(node: &Element, name: &str) -> Result<CimType, ParseError> {
    type_attr(node, name)?.ok_or_else(|| {
        ParseError::cimxml(format!(
            "Element {} is missing required attribute {name}",
            node.name
        ))
    })
}

fn u32_attr(node: &Element, name: &str) -> Result<Option<u32>, ParseError> {
    node.get_attr(name)
        .map(|v| {
            v.trim().parse::<u32>().map_err(|_| {
                ParseError::cimxml(format!(
                    "Element {} attribute {name} has invalid integer value {v:?}",
                    node.name
                ))
            })
        })
        .transpose()
}

/// `EmbeddedObject` attribute, also accepted in upper case.
fn embedded_attr(node: &Element) -> Result<Option<EmbeddedObject>, ParseError> {
    let Some(value) = node
        .get_attr("EmbeddedObject")
        .or_else(|| node.get_attr("EMBEDDEDOBJECT"))
    else {
        return Ok(None);
    };
    EmbeddedObject::from_attr(value).map(Some).ok_or_else(|| {
        ParseError::cimxml(format!(
            "Element {} has invalid EmbeddedObject value {value:?}",
            node.name
        ))
    })
}

/// Split `node` into two children with the given names, in order.
fn child_pair(node: Element, first: &str, second: &str) -> Result<(Element, Element), ParseError> {
    let parent = node.name.clone();
    let kids: Vec<Element> = node.into_element_children().collect();
    let names: Vec<&str> = kids.iter().map(|k| k.name.as_str()).collect();
    if names != [first, second] {
        return Err(ParseError::cimxml(format!(
            "Element {parent} must have child elements {first}, {second}; got {}",
            describe_children(&kids)
        )));
    }
    let [a, b]: [Element; 2] = kids
        .try_into()
        .map_err(|_| ParseError::cimxml(format!("Element {parent} has a malformed child list")))?;
    Ok((a, b))
}

fn key_type_compatible(valuetype: &str, ty: CimType) -> bool {
    match valuetype {
        "boolean" => ty == CimType::Boolean,
        "numeric" => ty.is_numeric(),
        _ => matches!(ty, CimType::String | CimType::Char16 | CimType::DateTime),
    }
}

enum Number {
    Int(i128),
    Real(f64),
    /// Hex literal wider than any CIM integer type.
    HexOverflow,
}

fn parse_number(text: &str) -> Option<Number> {
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        return Some(match i128::from_str_radix(hex, 16) {
            Ok(value) => Number::Int(if negative { -value } else { value }),
            Err(_) => Number::HexOverflow,
        });
    }
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(value) = digits.parse::<i128>() {
            return Some(Number::Int(if negative { -value } else { value }));
        }
    }
    trimmed.parse::<f64>().ok().map(Number::Real)
}

fn unpack_numeric(text: &str, cim_type: Option<CimType>) -> Result<CimValue, ParseError> {
    let number = parse_number(text).ok_or_else(|| {
        ParseError::cimxml(match cim_type {
            Some(ty) => format!("Invalid numeric value {:?} for CIM type {ty}", abbreviate(text)),
            None => format!("Invalid numeric value {:?}", abbreviate(text)),
        })
    })?;
    Ok(match (cim_type, number) {
        (_, Number::HexOverflow) => {
            return Err(ParseError::Value(format!(
                "Numeric value {:?} is out of range",
                abbreviate(text)
            )))
        }
        (Some(ty), Number::Int(v)) if ty.is_integer() => CimValue::from_integer(ty, v)?,
        (Some(ty), Number::Int(v)) => CimValue::from_real(ty, v as f64)?,
        (Some(ty), Number::Real(v)) => CimValue::from_real(ty, v)?,
        (None, Number::Int(v)) => match (i64::try_from(v), u64::try_from(v)) {
            (Ok(v), _) => CimValue::Sint64(v),
            (_, Ok(v)) => CimValue::Uint64(v),
            _ => CimValue::Real64(v as f64),
        },
        (None, Number::Real(v)) => CimValue::Real64(v),
    })
}

fn unpack_char16(text: &str) -> Result<CimValue, ParseError> {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if (c as u32) <= 0xFFFF => Ok(CimValue::Char16(c)),
        (Some(c), None) => Err(ParseError::cimxml(format!(
            "Char16 value U+{:X} is outside the UCS-2 range",
            c as u32
        ))),
        (None, _) => Err(ParseError::cimxml("Char16 value is empty")),
        _ => Err(ParseError::cimxml(format!(
            "Char16 value {:?} has more than one character",
            abbreviate(text)
        ))),
    }
}

/// Grammar parser; holds the tolerated issues seen so far.
#[derive(Debug, Default)]
pub struct Parser {
    issues: Vec<ToleratedIssue>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tolerated_issues(&self) -> &[ToleratedIssue] {
        &self.issues
    }

    pub fn take_tolerated_issues(&mut self) -> Vec<ToleratedIssue> {
        std::mem::take(&mut self.issues)
    }

    fn tolerate(&mut self, element: &str, message: String) {
        warn!(element, "tolerated server issue: {message}");
        self.issues.push(ToleratedIssue {
            element: element.to_string(),
            message,
        });
    }

    /// Tokenize and parse a complete CIM-XML document.
    pub fn parse_document(&mut self, bytes: &[u8]) -> Result<Message, ParseError> {
        let root = xml_to_tupletree(bytes)?;
        if root.name != "CIM" {
            return Err(ParseError::cimxml(format!(
                "Expecting root element CIM, got {}",
                root.name
            )));
        }
        self.parse_cim(root)
    }

    /// Dispatch an element to its handler by name.
    pub fn parse_any(&mut self, node: Element) -> Result<Parsed, ParseError> {
        let kind = ElementKind::from_name(&node.name).ok_or_else(|| {
            ParseError::cimxml(format!("Unknown element {}", node.name))
        })?;
        Ok(match kind {
            ElementKind::Cim => Parsed::Message(self.parse_cim(node)?),
            ElementKind::Message => Parsed::Message(self.parse_message(node)?),
            ElementKind::SimpleReq
            | ElementKind::SimpleRsp
            | ElementKind::SimpleExpReq
            | ElementKind::SimpleExpRsp => Parsed::Body(self.parse_simple(node, kind)?),
            ElementKind::IMethodCall => {
                Parsed::Body(MessageBody::Request(self.parse_imethodcall(node)?))
            }
            ElementKind::MethodCall => {
                Parsed::Body(MessageBody::Request(self.parse_methodcall(node)?))
            }
            ElementKind::ExpMethodCall => {
                Parsed::Body(MessageBody::Request(self.parse_expmethodcall(node)?))
            }
            ElementKind::IMethodResponse
            | ElementKind::MethodResponse
            | ElementKind::ExpMethodResponse => {
                Parsed::Body(MessageBody::Response(self.parse_response(node, kind)?))
            }
            ElementKind::Error => Parsed::Error(self.parse_error(node)?),
            ElementKind::IReturnValue => Parsed::ReturnItems(self.parse_ireturnvalue(node)?),
            ElementKind::ReturnValue => Parsed::ReturnValue(self.parse_returnvalue(node)?),
            ElementKind::ParamValue => Parsed::ParamValue(self.parse_paramvalue(node)?),
            ElementKind::IParamValue => Parsed::IParamValue(self.parse_iparamvalue(node)?),
            ElementKind::ExpParamValue => Parsed::IParamValue(self.parse_expparamvalue(node)?),
            ElementKind::Value => Parsed::Raw(RawValue::Scalar(self.parse_value(node)?)),
            ElementKind::ValueArray => Parsed::Raw(RawValue::Array(self.parse_value_array(node)?)),
            ElementKind::ValueNull => {
                check_node(&node, "VALUE.NULL", &[], &[], Some(&[]), false)?;
                Parsed::Null
            }
            ElementKind::ValueReference => Parsed::Path(self.parse_value_reference(node)?),
            ElementKind::ValueRefArray => {
                Parsed::Raw(RawValue::RefArray(self.parse_value_refarray(node)?))
            }
            ElementKind::ValueObject => Parsed::Item(self.parse_value_object(node)?),
            ElementKind::ValueNamedInstance => {
                Parsed::Item(Item::Instance(self.parse_value_namedinstance(node)?))
            }
            ElementKind::ValueNamedObject => Parsed::Item(self.parse_value_namedobject(node)?),
            ElementKind::ValueObjectWithPath => {
                Parsed::Item(self.parse_value_objectwithpath(node, false)?)
            }
            ElementKind::ValueObjectWithLocalPath => {
                Parsed::Item(self.parse_value_objectwithpath(node, true)?)
            }
            ElementKind::ValueInstanceWithPath => {
                Parsed::Item(Item::Instance(self.parse_value_instancewithpath(node)?))
            }
            ElementKind::ObjectPath => Parsed::Path(self.parse_objectpath(node)?),
            ElementKind::NamespacePath => {
                let (host, namespace) = self.parse_namespacepath(node)?;
                Parsed::NamespacePath {
                    host: Some(host),
                    namespace,
                }
            }
            ElementKind::LocalNamespacePath => Parsed::NamespacePath {
                host: None,
                namespace: self.parse_localnamespacepath(node)?,
            },
            ElementKind::Host => Parsed::Text(self.parse_host(node)?),
            ElementKind::Namespace => Parsed::Text(self.parse_namespace(node)?),
            ElementKind::ClassPath => Parsed::Path(ObjectPath::Class(self.parse_classpath(node)?)),
            ElementKind::LocalClassPath => {
                Parsed::Path(ObjectPath::Class(self.parse_localclasspath(node)?))
            }
            ElementKind::ClassName => Parsed::Path(ObjectPath::Class(self.parse_classname(node)?)),
            ElementKind::InstancePath => {
                Parsed::Path(ObjectPath::Instance(self.parse_instancepath(node)?))
            }
            ElementKind::LocalInstancePath => {
                Parsed::Path(ObjectPath::Instance(self.parse_localinstancepath(node)?))
            }
            ElementKind::InstanceName => {
                Parsed::Path(ObjectPath::Instance(self.parse_instancename(node)?))
            }
            ElementKind::KeyBinding => {
                let (name, value) = self.parse_keybinding(node)?;
                Parsed::KeyBinding(name, value)
            }
            ElementKind::KeyValue => Parsed::KeyValue(self.parse_keyvalue(node)?),
            ElementKind::Class => Parsed::Item(Item::Class(self.parse_class(node)?)),
            ElementKind::Instance => Parsed::Item(Item::Instance(self.parse_instance(node)?)),
            ElementKind::Qualifier => Parsed::Qualifier(self.parse_qualifier(node)?),
            ElementKind::QualifierDeclaration => Parsed::Item(Item::QualifierDeclaration(
                self.parse_qualifier_declaration(node)?,
            )),
            ElementKind::Scope => Parsed::Scope(self.parse_scope(node)?),
            ElementKind::Property => Parsed::Property(self.parse_property(node)?),
            ElementKind::PropertyArray => Parsed::Property(self.parse_property_array(node)?),
            ElementKind::PropertyReference => {
                Parsed::Property(self.parse_property_reference(node)?)
            }
            ElementKind::Method => Parsed::Method(self.parse_method(node)?),
            ElementKind::Parameter
            | ElementKind::ParameterReference
            | ElementKind::ParameterArray
            | ElementKind::ParameterRefArray => {
                Parsed::Parameter(self.parse_parameter(node, kind)?)
            }
        })
    }

    // ---- cardinality helpers ----

    /// Exactly one child element, which must be in `names`.
    pub fn one_child(&mut self, node: Element, names: &[&str]) -> Result<Parsed, ParseError> {
        let parent = node.name.clone();
        let mut kids: Vec<Element> = node.into_element_children().collect();
        if kids.len() != 1 || !names.contains(&kids[0].name.as_str()) {
            return Err(ParseError::cimxml(format!(
                "Element {parent} must have exactly one child element from ({}), got {}",
                names.join(" | "),
                describe_children(&kids)
            )));
        }
        let kid = kids
            .pop()
            .ok_or_else(|| ParseError::cimxml(format!("Element {parent} has no child")))?;
        self.parse_any(kid)
    }

    /// Zero or one child element from `names`.
    pub fn optional_child(
        &mut self,
        node: Element,
        names: &[&str],
    ) -> Result<Option<Parsed>, ParseError> {
        let parent = node.name.clone();
        let mut kids: Vec<Element> = node.into_element_children().collect();
        if kids.len() > 1 || kids.iter().any(|k| !names.contains(&k.name.as_str())) {
            return Err(ParseError::cimxml(format!(
                "Element {parent} may have at most one child element from ({}), got {}",
                names.join(" | "),
                describe_children(&kids)
            )));
        }
        kids.pop().map(|kid| self.parse_any(kid)).transpose()
    }

    /// Any number of child elements, each from `names`.
    pub fn list_of_various(
        &mut self,
        node: Element,
        names: &[&str],
    ) -> Result<Vec<Parsed>, ParseError> {
        let parent = node.name.clone();
        let kids: Vec<Element> = node.into_element_children().collect();
        if let Some(bad) = kids.iter().find(|k| !names.contains(&k.name.as_str())) {
            return Err(ParseError::cimxml(format!(
                "Element {parent} has invalid child element {} (allowed: {})",
                bad.name,
                names.join(", ")
            )));
        }
        kids.into_iter().map(|kid| self.parse_any(kid)).collect()
    }

    /// Any number of child elements, all with the same name from `names`.
    pub fn list_of_same(
        &mut self,
        node: Element,
        names: &[&str],
    ) -> Result<Vec<(String, Parsed)>, ParseError> {
        let parent = node.name.clone();
        let kids: Vec<Element> = node.into_element_children().collect();
        if let Some(first) = kids.first() {
            if !names.contains(&first.name.as_str()) {
                return Err(ParseError::cimxml(format!(
                    "Element {parent} has invalid child element {} (allowed: {})",
                    first.name,
                    names.join(", ")
                )));
            }
            if let Some(other) = kids.iter().find(|k| k.name != first.name) {
                return Err(ParseError::cimxml(format!(
                    "Element {parent} has child elements of different kinds: {} and {}",
                    first.name, other.name
                )));
            }
        }
        kids.into_iter()
            .map(|kid| {
                let name = kid.name.clone();
                self.parse_any(kid).map(|parsed| (name, parsed))
            })
            .collect()
    }

    /// Child elements from `names`; other children are skipped.
    pub fn list_of_matching(
        &mut self,
        node: Element,
        names: &[&str],
    ) -> Result<Vec<Parsed>, ParseError> {
        node.into_element_children()
            .filter(|kid| names.contains(&kid.name.as_str()))
            .map(|kid| self.parse_any(kid))
            .collect()
    }

    // ---- messages ----

    fn parse_cim(&mut self, node: Element) -> Result<Message, ParseError> {
        check_node(&node, "CIM", &["CIMVERSION", "DTDVERSION"], &[], Some(&["MESSAGE"]), false)?;
        let cim_version = required_attr(&node, "CIMVERSION")?;
        let dtd_version = required_attr(&node, "DTDVERSION")?;
        if !cim_version.starts_with("2.") {
            return Err(ParseError::Version {
                kind: VersionKind::Cim,
                message: format!("CIMVERSION is {cim_version}, expected 2.x"),
            });
        }
        if !dtd_version.starts_with("2.") {
            return Err(ParseError::Version {
                kind: VersionKind::Dtd,
                message: format!("DTDVERSION is {dtd_version}, expected 2.x"),
            });
        }
        match self.one_child(node, &["MESSAGE"])? {
            Parsed::Message(mut message) => {
                message.cim_version = cim_version;
                message.dtd_version = dtd_version;
                Ok(message)
            }
            other => Err(unexpected("CIM", &other)),
        }
    }

    fn parse_message(&mut self, node: Element) -> Result<Message, ParseError> {
        let bodies = ["SIMPLEREQ", "SIMPLERSP", "SIMPLEEXPREQ", "SIMPLEEXPRSP"];
        check_node(&node, "MESSAGE", &["ID", "PROTOCOLVERSION"], &[], Some(&bodies), false)?;
        let id = required_attr(&node, "ID")?;
        let protocol_version = required_attr(&node, "PROTOCOLVERSION")?;
        if !protocol_version.starts_with("1.") {
            return Err(ParseError::Version {
                kind: VersionKind::Protocol,
                message: format!("PROTOCOLVERSION is {protocol_version}, expected 1.x"),
            });
        }
        match self.one_child(node, &bodies)? {
            Parsed::Body(body) => Ok(Message {
                id,
                protocol_version,
                cim_version: String::new(),
                dtd_version: String::new(),
                body,
            }),
            other => Err(unexpected("MESSAGE", &other)),
        }
    }

    fn parse_simple(&mut self, node: Element, kind: ElementKind) -> Result<MessageBody, ParseError> {
        let allowed: &[&str] = match kind {
            ElementKind::SimpleReq => &["IMETHODCALL", "METHODCALL"],
            ElementKind::SimpleRsp => &["IMETHODRESPONSE", "METHODRESPONSE"],
            ElementKind::SimpleExpReq => &["EXPMETHODCALL"],
            _ => &["EXPMETHODRESPONSE"],
        };
        check_node(&node, kind.name(), &[], &[], Some(allowed), false)?;
        match self.one_child(node, allowed)? {
            Parsed::Body(body) => Ok(body),
            other => Err(unexpected(kind.name(), &other)),
        }
    }

    fn parse_imethodcall(&mut self, node: Element) -> Result<MethodCall, ParseError> {
        check_node(
            &node,
            "IMETHODCALL",
            &["NAME"],
            &[],
            Some(&["LOCALNAMESPACEPATH", "IPARAMVALUE"]),
            false,
        )?;
        let name = required_attr(&node, "NAME")?;
        let mut kids = node.into_element_children();
        let namespace = match kids.next() {
            Some(first) if first.name == "LOCALNAMESPACEPATH" => {
                self.parse_localnamespacepath(first)?
            }
            _ => {
                return Err(ParseError::cimxml(
                    "Element IMETHODCALL must start with LOCALNAMESPACEPATH",
                ))
            }
        };
        let mut iparams = Vec::new();
        for kid in kids {
            if kid.name != "IPARAMVALUE" {
                return Err(ParseError::cimxml(format!(
                    "Element IMETHODCALL has misplaced child element {}",
                    kid.name
                )));
            }
            iparams.push(self.parse_iparamvalue(kid)?);
        }
        Ok(MethodCall {
            kind: MethodKind::Intrinsic,
            name,
            namespace: Some(namespace),
            target: None,
            iparams,
            params: Vec::new(),
        })
    }

    fn parse_methodcall(&mut self, node: Element) -> Result<MethodCall, ParseError> {
        check_node(
            &node,
            "METHODCALL",
            &["NAME"],
            &[],
            Some(&["LOCALINSTANCEPATH", "LOCALCLASSPATH", "PARAMVALUE"]),
            false,
        )?;
        let name = required_attr(&node, "NAME")?;
        let mut kids = node.into_element_children();
        let target = match kids.next() {
            Some(first) if first.name == "LOCALINSTANCEPATH" => {
                ObjectPath::Instance(self.parse_localinstancepath(first)?)
            }
            Some(first) if first.name == "LOCALCLASSPATH" => {
                ObjectPath::Class(self.parse_localclasspath(first)?)
            }
            _ => {
                return Err(ParseError::cimxml(
                    "Element METHODCALL must start with LOCALINSTANCEPATH or LOCALCLASSPATH",
                ))
            }
        };
        let mut params = Vec::new();
        for kid in kids {
            if kid.name != "PARAMVALUE" {
                return Err(ParseError::cimxml(format!(
                    "Element METHODCALL has misplaced child element {}",
                    kid.name
                )));
            }
            params.push(self.parse_paramvalue(kid)?);
        }
        Ok(MethodCall {
            kind: MethodKind::Extrinsic,
            name,
            namespace: target.namespace().map(str::to_string),
            target: Some(target),
            iparams: Vec::new(),
            params,
        })
    }

    fn parse_expmethodcall(&mut self, node: Element) -> Result<MethodCall, ParseError> {
        check_node(&node, "EXPMETHODCALL", &["NAME"], &[], Some(&["EXPPARAMVALUE"]), false)?;
        let name = required_attr(&node, "NAME")?;
        let iparams = self
            .list_of_various(node, &["EXPPARAMVALUE"])?
            .into_iter()
            .map(|p| match p {
                Parsed::IParamValue(v) => Ok(v),
                other => Err(unexpected("EXPMETHODCALL", &other)),
            })
            .collect::<Result<_, _>>()?;
        Ok(MethodCall {
            kind: MethodKind::Export,
            name,
            namespace: None,
            target: None,
            iparams,
            params: Vec::new(),
        })
    }

    fn parse_response(
        &mut self,
        node: Element,
        kind: ElementKind,
    ) -> Result<MethodResponse, ParseError> {
        let (method_kind, allowed): (MethodKind, &[&str]) = match kind {
            ElementKind::IMethodResponse => (
                MethodKind::Intrinsic,
                &["ERROR", "IRETURNVALUE", "PARAMVALUE"],
            ),
            ElementKind::MethodResponse => (
                MethodKind::Extrinsic,
                &["ERROR", "RETURNVALUE", "PARAMVALUE"],
            ),
            _ => (MethodKind::Export, &["ERROR", "IRETURNVALUE"]),
        };
        let elem = kind.name();
        check_node(&node, elem, &["NAME"], &[], None, false)?;
        let name = required_attr(&node, "NAME")?;

        let mut response = MethodResponse {
            kind: method_kind,
            name,
            error: None,
            items: None,
            return_value: None,
            out_params: Vec::new(),
        };
        let parts = self.list_of_matching(node, allowed)?;
        let part_count = parts.len();
        for part in parts {
            match part {
                Parsed::Error(err) => {
                    if part_count != 1 {
                        return Err(ParseError::cimxml(format!(
                            "Element {elem} has ERROR together with other result elements"
                        )));
                    }
                    response.error = Some(err);
                }
                Parsed::ReturnItems(items) => {
                    if response.items.replace(items).is_some() {
                        return Err(ParseError::cimxml(format!(
                            "Element {elem} has more than one IRETURNVALUE"
                        )));
                    }
                }
                Parsed::ReturnValue(value) => {
                    if response.return_value.replace(value).is_some() {
                        return Err(ParseError::cimxml(format!(
                            "Element {elem} has more than one RETURNVALUE"
                        )));
                    }
                }
                Parsed::ParamValue(param) => response.out_params.push(param),
                other => return Err(unexpected(elem, &other)),
            }
        }
        Ok(response)
    }

    fn parse_error(&mut self, node: Element) -> Result<ErrorInfo, ParseError> {
        check_node(&node, "ERROR", &["CODE"], &["DESCRIPTION"], Some(&["INSTANCE"]), false)?;
        let code_text = required_attr(&node, "CODE")?;
        let code = code_text.trim().parse::<u32>().map_err(|_| {
            ParseError::cimxml(format!("Element ERROR has invalid CODE {code_text:?}"))
        })?;
        let description = optional_attr(&node, "DESCRIPTION");
        let instances = self
            .list_of_various(node, &["INSTANCE"])?
            .into_iter()
            .map(|p| match p {
                Parsed::Item(Item::Instance(inst)) => Ok(inst),
                other => Err(unexpected("ERROR", &other)),
            })
            .collect::<Result<_, _>>()?;
        Ok(ErrorInfo {
            code,
            description,
            instances,
        })
    }

    fn parse_ireturnvalue(&mut self, node: Element) -> Result<Vec<Item>, ParseError> {
        const ALLOWED: [&str; 16] = [
            "CLASSNAME",
            "INSTANCENAME",
            "VALUE",
            "VALUE.OBJECTWITHPATH",
            "VALUE.OBJECTWITHLOCALPATH",
            "VALUE.OBJECT",
            "OBJECTPATH",
            "QUALIFIER.DECLARATION",
            "VALUE.ARRAY",
            "VALUE.REFERENCE",
            "CLASS",
            "INSTANCE",
            "INSTANCEPATH",
            "VALUE.NAMEDINSTANCE",
            "VALUE.INSTANCEWITHPATH",
            "VALUE.NAMEDOBJECT",
        ];
        check_node(&node, "IRETURNVALUE", &[], &[], Some(&ALLOWED), false)?;
        self.list_of_same(node, &ALLOWED)?
            .into_iter()
            .map(|(name, parsed)| into_item(&name, parsed))
            .collect()
    }

    fn parse_returnvalue(&mut self, node: Element) -> Result<ParamValue, ParseError> {
        check_node(
            &node,
            "RETURNVALUE",
            &[],
            &["PARAMTYPE", "EmbeddedObject", "EMBEDDEDOBJECT"],
            Some(&["VALUE", "VALUE.REFERENCE"]),
            false,
        )?;
        let param_type = type_attr(&node, "PARAMTYPE")?;
        let embedded_object = embedded_attr(&node)?;
        let value = match self.optional_child(node, &["VALUE", "VALUE.REFERENCE"])? {
            None => None,
            Some(parsed) => self.typed_value("RETURNVALUE", parsed, param_type, embedded_object)?,
        };
        Ok(ParamValue {
            name: String::new(),
            param_type,
            embedded_object,
            value,
        })
    }

    fn parse_paramvalue(&mut self, node: Element) -> Result<ParamValue, ParseError> {
        const ALLOWED: [&str; 9] = [
            "VALUE",
            "VALUE.REFERENCE",
            "VALUE.ARRAY",
            "VALUE.REFARRAY",
            "CLASSNAME",
            "INSTANCENAME",
            "CLASS",
            "INSTANCE",
            "VALUE.NAMEDINSTANCE",
        ];
        check_node(
            &node,
            "PARAMVALUE",
            &["NAME"],
            &["PARAMTYPE", "EmbeddedObject", "EMBEDDEDOBJECT"],
            Some(&ALLOWED),
            false,
        )?;
        let name = required_attr(&node, "NAME")?;
        let param_type = type_attr(&node, "PARAMTYPE")?;
        let embedded_object = embedded_attr(&node)?;
        let value = match self.optional_child(node, &ALLOWED)? {
            None => None,
            Some(parsed) => self.typed_value("PARAMVALUE", parsed, param_type, embedded_object)?,
        };
        Ok(ParamValue {
            name,
            param_type,
            embedded_object,
            value,
        })
    }

    /// Apply a parameter type to the parsed child of a (RETURN|PARAM)VALUE.
    ///
    /// Without `PARAMTYPE`, `VALUE` and `VALUE.ARRAY` content is decoded as
    /// string rather than the numeric default of [`Parser::unpack_value`].
    /// Out parameters such as `EnumerationContext` are opaque strings that
    /// servers send untyped, and some of them look like numbers. Callers
    /// that expect another type convert the string themselves.
    fn typed_value(
        &mut self,
        parent: &str,
        parsed: Parsed,
        param_type: Option<CimType>,
        embedded: Option<EmbeddedObject>,
    ) -> Result<Option<CimValue>, ParseError> {
        match parsed {
            Parsed::Raw(raw) => {
                let ty = match (&raw, param_type) {
                    (RawValue::Scalar(_) | RawValue::Array(_), None) => Some(CimType::String),
                    _ => param_type,
                };
                self.unpack_value(raw, ty, embedded)
            }
            Parsed::Path(path) => Ok(Some(CimValue::Reference(path))),
            Parsed::Item(Item::Instance(inst)) => Ok(Some(CimValue::Instance(Box::new(inst)))),
            Parsed::Item(Item::Class(class)) => Ok(Some(CimValue::Class(Box::new(class)))),
            other => Err(unexpected(parent, &other)),
        }
    }

    fn parse_iparamvalue(&mut self, node: Element) -> Result<IParamValue, ParseError> {
        const ALLOWED: [&str; 9] = [
            "VALUE",
            "VALUE.ARRAY",
            "VALUE.REFERENCE",
            "INSTANCENAME",
            "CLASSNAME",
            "QUALIFIER.DECLARATION",
            "CLASS",
            "INSTANCE",
            "VALUE.NAMEDINSTANCE",
        ];
        check_node(&node, "IPARAMVALUE", &["NAME"], &[], Some(&ALLOWED), false)?;
        let name = required_attr(&node, "NAME")?;
        let mut kids: Vec<Element> = node.into_element_children().collect();
        if kids.len() > 1 {
            return Err(ParseError::cimxml(format!(
                "Element IPARAMVALUE {name} may have at most one child element, got {}",
                describe_children(&kids)
            )));
        }
        let value = match kids.pop() {
            None => None,
            Some(kid) => {
                let elem = kid.name.clone();
                let parsed = self.parse_any(kid)?;
                Some(into_item(&elem, parsed)?)
            }
        };
        Ok(IParamValue { name, value })
    }

    fn parse_expparamvalue(&mut self, node: Element) -> Result<IParamValue, ParseError> {
        check_node(&node, "EXPPARAMVALUE", &["NAME"], &[], Some(&["INSTANCE"]), false)?;
        let name = required_attr(&node, "NAME")?;
        let value = match self.optional_child(node, &["INSTANCE"])? {
            None => None,
            Some(Parsed::Item(item)) => Some(item),
            Some(other) => return Err(unexpected("EXPPARAMVALUE", &other)),
        };
        Ok(IParamValue { name, value })
    }

    // ---- values ----

    fn parse_value(&mut self, node: Element) -> Result<String, ParseError> {
        check_node(&node, "VALUE", &[], &[], Some(&[]), true)?;
        Ok(node.text_content())
    }

    fn parse_value_array(&mut self, node: Element) -> Result<Vec<Option<String>>, ParseError> {
        check_node(&node, "VALUE.ARRAY", &[], &[], Some(&["VALUE", "VALUE.NULL"]), false)?;
        self.list_of_various(node, &["VALUE", "VALUE.NULL"])?
            .into_iter()
            .map(|p| match p {
                Parsed::Raw(RawValue::Scalar(text)) => Ok(Some(text)),
                Parsed::Null => Ok(None),
                other => Err(unexpected("VALUE.ARRAY", &other)),
            })
            .collect()
    }

    fn parse_value_reference(&mut self, node: Element) -> Result<ObjectPath, ParseError> {
        const ALLOWED: [&str; 6] = [
            "CLASSPATH",
            "LOCALCLASSPATH",
            "CLASSNAME",
            "INSTANCEPATH",
            "LOCALINSTANCEPATH",
            "INSTANCENAME",
        ];
        check_node(&node, "VALUE.REFERENCE", &[], &[], Some(&ALLOWED), false)?;
        match self.one_child(node, &ALLOWED)? {
            Parsed::Path(path) => Ok(path),
            other => Err(unexpected("VALUE.REFERENCE", &other)),
        }
    }

    fn parse_value_refarray(
        &mut self,
        node: Element,
    ) -> Result<Vec<Option<ObjectPath>>, ParseError> {
        let allowed = ["VALUE.REFERENCE", "VALUE.NULL"];
        check_node(&node, "VALUE.REFARRAY", &[], &[], Some(&allowed), false)?;
        self.list_of_various(node, &allowed)?
            .into_iter()
            .map(|p| match p {
                Parsed::Path(path) => Ok(Some(path)),
                Parsed::Null => Ok(None),
                other => Err(unexpected("VALUE.REFARRAY", &other)),
            })
            .collect()
    }

    fn parse_value_object(&mut self, node: Element) -> Result<Item, ParseError> {
        check_node(&node, "VALUE.OBJECT", &[], &[], Some(&["CLASS", "INSTANCE"]), false)?;
        match self.one_child(node, &["CLASS", "INSTANCE"])? {
            Parsed::Item(item) => Ok(item),
            other => Err(unexpected("VALUE.OBJECT", &other)),
        }
    }

    fn parse_value_namedinstance(&mut self, node: Element) -> Result<CimInstance, ParseError> {
        check_node(
            &node,
            "VALUE.NAMEDINSTANCE",
            &[],
            &[],
            Some(&["INSTANCENAME", "INSTANCE"]),
            false,
        )?;
        let (name, inst) = child_pair(node, "INSTANCENAME", "INSTANCE")?;
        let path = self.parse_instancename(name)?;
        let mut instance = self.parse_instance(inst)?;
        instance.path = Some(path);
        Ok(instance)
    }

    fn parse_value_namedobject(&mut self, node: Element) -> Result<Item, ParseError> {
        check_node(
            &node,
            "VALUE.NAMEDOBJECT",
            &[],
            &[],
            Some(&["CLASS", "INSTANCENAME", "INSTANCE"]),
            false,
        )?;
        let is_class = node
            .element_children()
            .next()
            .map_or(false, |k| k.name == "CLASS");
        if is_class {
            match self.one_child(node, &["CLASS"])? {
                Parsed::Item(item) => Ok(item),
                other => Err(unexpected("VALUE.NAMEDOBJECT", &other)),
            }
        } else {
            let (name, inst) = child_pair(node, "INSTANCENAME", "INSTANCE")?;
            let path = self.parse_instancename(name)?;
            let mut instance = self.parse_instance(inst)?;
            instance.path = Some(path);
            Ok(Item::Instance(instance))
        }
    }

    fn parse_value_objectwithpath(&mut self, node: Element, local: bool) -> Result<Item, ParseError> {
        let (elem, class_path, inst_path) = if local {
            ("VALUE.OBJECTWITHLOCALPATH", "LOCALCLASSPATH", "LOCALINSTANCEPATH")
        } else {
            ("VALUE.OBJECTWITHPATH", "CLASSPATH", "INSTANCEPATH")
        };
        check_node(
            &node,
            elem,
            &[],
            &[],
            Some(&[class_path, inst_path, "CLASS", "INSTANCE"]),
            false,
        )?;
        let is_class = node
            .element_children()
            .next()
            .map_or(false, |k| k.name == class_path);
        if is_class {
            let (path, class) = child_pair(node, class_path, "CLASS")?;
            let path = if local {
                self.parse_localclasspath(path)?
            } else {
                self.parse_classpath(path)?
            };
            let mut class = self.parse_class(class)?;
            class.path = Some(path);
            Ok(Item::Class(class))
        } else {
            let (path, inst) = child_pair(node, inst_path, "INSTANCE")?;
            let path = if local {
                self.parse_localinstancepath(path)?
            } else {
                self.parse_instancepath(path)?
            };
            let mut instance = self.parse_instance(inst)?;
            instance.path = Some(path);
            Ok(Item::Instance(instance))
        }
    }

    fn parse_value_instancewithpath(&mut self, node: Element) -> Result<CimInstance, ParseError> {
        check_node(
            &node,
            "VALUE.INSTANCEWITHPATH",
            &[],
            &[],
            Some(&["INSTANCEPATH", "INSTANCE"]),
            false,
        )?;
        let (path, inst) = child_pair(node, "INSTANCEPATH", "INSTANCE")?;
        let path = self.parse_instancepath(path)?;
        let mut instance = self.parse_instance(inst)?;
        instance.path = Some(path);
        Ok(instance)
    }

    /// Decode raw value content as `cim_type`.
    ///
    /// With `embedded` set, scalar strings are parsed as embedded objects.
    pub fn unpack_value(
        &mut self,
        raw: RawValue,
        cim_type: Option<CimType>,
        embedded: Option<EmbeddedObject>,
    ) -> Result<Option<CimValue>, ParseError> {
        let one = |parser: &mut Self, text: &str| match embedded {
            Some(_) => parser.unpack_embedded(text),
            None => parser.unpack_single_value(text, cim_type),
        };
        match raw {
            RawValue::Scalar(text) => one(self, &text),
            RawValue::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Some(text) => one(self, &text),
                    None => Ok(None),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(|values| Some(CimValue::Array(values))),
            RawValue::Reference(path) => Ok(Some(CimValue::Reference(path))),
            RawValue::RefArray(items) => Ok(Some(CimValue::Array(
                items
                    .into_iter()
                    .map(|p| p.map(CimValue::Reference))
                    .collect(),
            ))),
        }
    }

    /// Decode the text of one `VALUE` element as `cim_type`.
    ///
    /// Without a type the text must be numeric. An empty boolean yields
    /// `None` and records a tolerated issue.
    pub fn unpack_single_value(
        &mut self,
        text: &str,
        cim_type: Option<CimType>,
    ) -> Result<Option<CimValue>, ParseError> {
        match cim_type {
            Some(CimType::String) => Ok(Some(CimValue::String(text.to_string()))),
            Some(CimType::Boolean) => self.unpack_boolean(text),
            Some(CimType::Char16) => unpack_char16(text).map(Some),
            Some(CimType::DateTime) => text
                .parse::<CimDateTime>()
                .map(|dt| Some(CimValue::DateTime(dt)))
                .map_err(|err| ParseError::cimxml(format!("Invalid datetime value: {err}"))),
            Some(CimType::Reference) => Err(ParseError::cimxml(
                "A reference value cannot be carried in a VALUE element",
            )),
            numeric => unpack_numeric(text, numeric).map(Some),
        }
    }

    fn unpack_boolean(&mut self, text: &str) -> Result<Option<CimValue>, ParseError> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("true") {
            Ok(Some(CimValue::Boolean(true)))
        } else if trimmed.eq_ignore_ascii_case("false") {
            Ok(Some(CimValue::Boolean(false)))
        } else if trimmed.is_empty() {
            self.tolerate("VALUE", "empty boolean value read as NULL".to_string());
            Ok(None)
        } else {
            Err(ParseError::cimxml(format!(
                "Invalid boolean value {:?}",
                abbreviate(text)
            )))
        }
    }

    fn unpack_embedded(&mut self, text: &str) -> Result<Option<CimValue>, ParseError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        // Some servers escape the fragment twice.
        let fragment: Cow<'_, str> = if text.trim_start().starts_with("&lt;") {
            quick_xml::escape::unescape(text).map_err(|err| {
                ParseError::Xml(format!("cannot unescape embedded object: {err}"))
            })?
        } else {
            Cow::Borrowed(text)
        };
        let root = xml_to_tupletree(fragment.as_bytes())?;
        match root.name.as_str() {
            "INSTANCE" => Ok(Some(CimValue::Instance(Box::new(self.parse_instance(root)?)))),
            "CLASS" => Ok(Some(CimValue::Class(Box::new(self.parse_class(root)?)))),
            other => Err(ParseError::cimxml(format!(
                "Embedded object must be an INSTANCE or CLASS element, got {other}"
            ))),
        }
    }

    // ---- paths ----

    fn parse_objectpath(&mut self, node: Element) -> Result<ObjectPath, ParseError> {
        check_node(&node, "OBJECTPATH", &[], &[], Some(&["INSTANCEPATH", "CLASSPATH"]), false)?;
        match self.one_child(node, &["INSTANCEPATH", "CLASSPATH"])? {
            Parsed::Path(path) => Ok(path),
            other => Err(unexpected("OBJECTPATH", &other)),
        }
    }

    fn parse_namespacepath(&mut self, node: Element) -> Result<(String, String), ParseError> {
        check_node(
            &node,
            "NAMESPACEPATH",
            &[],
            &[],
            Some(&["HOST", "LOCALNAMESPACEPATH"]),
            false,
        )?;
        let (host, local) = child_pair(node, "HOST", "LOCALNAMESPACEPATH")?;
        Ok((self.parse_host(host)?, self.parse_localnamespacepath(local)?))
    }

    fn parse_localnamespacepath(&mut self, node: Element) -> Result<String, ParseError> {
        check_node(&node, "LOCALNAMESPACEPATH", &[], &[], Some(&["NAMESPACE"]), false)?;
        let parts = self
            .list_of_various(node, &["NAMESPACE"])?
            .into_iter()
            .map(|p| match p {
                Parsed::Text(name) => Ok(name),
                other => Err(unexpected("LOCALNAMESPACEPATH", &other)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        if parts.is_empty() {
            return Err(ParseError::cimxml(
                "Element LOCALNAMESPACEPATH must have at least one NAMESPACE child",
            ));
        }
        Ok(parts.join("/"))
    }

    fn parse_host(&mut self, node: Element) -> Result<String, ParseError> {
        check_node(&node, "HOST", &[], &[], Some(&[]), true)?;
        let host = node.text_content().trim().to_string();
        if host.is_empty() {
            return Err(ParseError::cimxml("Element HOST is empty"));
        }
        Ok(host)
    }

    fn parse_namespace(&mut self, node: Element) -> Result<String, ParseError> {
        check_node(&node, "NAMESPACE", &["NAME"], &[], Some(&[]), false)?;
        required_attr(&node, "NAME")
    }

    fn parse_classpath(&mut self, node: Element) -> Result<CimClassName, ParseError> {
        check_node(&node, "CLASSPATH", &[], &[], Some(&["NAMESPACEPATH", "CLASSNAME"]), false)?;
        let (nsp, name) = child_pair(node, "NAMESPACEPATH", "CLASSNAME")?;
        let (host, namespace) = self.parse_namespacepath(nsp)?;
        let mut path = self.parse_classname(name)?;
        path.host = Some(host);
        path.namespace = Some(namespace);
        Ok(path)
    }

    fn parse_localclasspath(&mut self, node: Element) -> Result<CimClassName, ParseError> {
        check_node(
            &node,
            "LOCALCLASSPATH",
            &[],
            &[],
            Some(&["LOCALNAMESPACEPATH", "CLASSNAME"]),
            false,
        )?;
        let (nsp, name) = child_pair(node, "LOCALNAMESPACEPATH", "CLASSNAME")?;
        let namespace = self.parse_localnamespacepath(nsp)?;
        let mut path = self.parse_classname(name)?;
        path.namespace = Some(namespace);
        Ok(path)
    }

    fn parse_classname(&mut self, node: Element) -> Result<CimClassName, ParseError> {
        check_node(&node, "CLASSNAME", &["NAME"], &[], Some(&[]), false)?;
        Ok(CimClassName::new(required_attr(&node, "NAME")?))
    }

    fn parse_instancepath(&mut self, node: Element) -> Result<CimInstanceName, ParseError> {
        check_node(
            &node,
            "INSTANCEPATH",
            &[],
            &[],
            Some(&["NAMESPACEPATH", "INSTANCENAME"]),
            false,
        )?;
        let (nsp, name) = child_pair(node, "NAMESPACEPATH", "INSTANCENAME")?;
        let (host, namespace) = self.parse_namespacepath(nsp)?;
        let mut path = self.parse_instancename(name)?;
        path.host = Some(host);
        path.namespace = Some(namespace);
        Ok(path)
    }

    fn parse_localinstancepath(&mut self, node: Element) -> Result<CimInstanceName, ParseError> {
        check_node(
            &node,
            "LOCALINSTANCEPATH",
            &[],
            &[],
            Some(&["LOCALNAMESPACEPATH", "INSTANCENAME"]),
            false,
        )?;
        let (nsp, name) = child_pair(node, "LOCALNAMESPACEPATH", "INSTANCENAME")?;
        let namespace = self.parse_localnamespacepath(nsp)?;
        let mut path = self.parse_instancename(name)?;
        path.namespace = Some(namespace);
        Ok(path)
    }

    fn parse_instancename(&mut self, node: Element) -> Result<CimInstanceName, ParseError> {
        let allowed = ["KEYBINDING", "KEYVALUE", "VALUE.REFERENCE"];
        check_node(&node, "INSTANCENAME", &["CLASSNAME"], &[], Some(&allowed), false)?;
        let mut path = CimInstanceName::new(required_attr(&node, "CLASSNAME")?);
        let keys = self.list_of_various(node, &allowed)?;
        if keys.is_empty() {
            self.tolerate(
                "INSTANCENAME",
                format!("instance path of class {} has no keybindings", path.classname),
            );
            return Ok(path);
        }
        let named = keys
            .iter()
            .filter(|k| matches!(k, Parsed::KeyBinding(..)))
            .count();
        if named != keys.len() && (named > 0 || keys.len() > 1) {
            return Err(ParseError::cimxml(format!(
                "Element INSTANCENAME of class {} must have KEYBINDING children or a single \
                 KEYVALUE/VALUE.REFERENCE child",
                path.classname
            )));
        }
        for key in keys {
            match key {
                Parsed::KeyBinding(name, value) => {
                    path.keybindings.insert(name, value);
                }
                Parsed::KeyValue(value) => {
                    path.keybindings.insert("", value);
                }
                Parsed::Path(reference) => {
                    path.keybindings.insert("", Some(CimValue::Reference(reference)));
                }
                other => return Err(unexpected("INSTANCENAME", &other)),
            }
        }
        Ok(path)
    }

    fn parse_keybinding(
        &mut self,
        node: Element,
    ) -> Result<(String, Option<CimValue>), ParseError> {
        let allowed = ["KEYVALUE", "VALUE.REFERENCE"];
        check_node(&node, "KEYBINDING", &["NAME"], &[], Some(&allowed), false)?;
        let name = required_attr(&node, "NAME")?;
        let value = match self.one_child(node, &allowed)? {
            Parsed::KeyValue(value) => value,
            Parsed::Path(path) => Some(CimValue::Reference(path)),
            other => return Err(unexpected("KEYBINDING", &other)),
        };
        Ok((name, value))
    }

    /// `None` for an empty boolean key, which is tolerated.
    fn parse_keyvalue(&mut self, node: Element) -> Result<Option<CimValue>, ParseError> {
        check_node(&node, "KEYVALUE", &[], &["VALUETYPE", "TYPE"], Some(&[]), true)?;
        let valuetype = node.get_attr("VALUETYPE").unwrap_or("string").to_string();
        if !matches!(valuetype.as_str(), "string" | "boolean" | "numeric") {
            return Err(ParseError::cimxml(format!(
                "Element KEYVALUE has invalid VALUETYPE {valuetype:?}"
            )));
        }
        let cim_type = type_attr(&node, "TYPE")?;
        let text = node.text_content();
        let effective = match cim_type {
            Some(ty) => {
                if !key_type_compatible(&valuetype, ty) {
                    self.tolerate(
                        "KEYVALUE",
                        format!("VALUETYPE {valuetype} does not match TYPE {ty}; using TYPE"),
                    );
                }
                Some(ty)
            }
            None => match valuetype.as_str() {
                "boolean" => Some(CimType::Boolean),
                "numeric" => None,
                _ => Some(CimType::String),
            },
        };
        self.unpack_single_value(&text, effective)
    }

    // ---- objects ----

    fn parse_class(&mut self, node: Element) -> Result<CimClass, ParseError> {
        let allowed = [
            "QUALIFIER",
            "PROPERTY",
            "PROPERTY.ARRAY",
            "PROPERTY.REFERENCE",
            "METHOD",
        ];
        check_node(&node, "CLASS", &["NAME"], &["SUPERCLASS"], Some(&allowed), false)?;
        let mut class = CimClass::new(required_attr(&node, "NAME")?);
        class.superclass = optional_attr(&node, "SUPERCLASS");
        for part in self.list_of_various(node, &allowed)? {
            match part {
                Parsed::Qualifier(q) => {
                    class.qualifiers.insert(q.name.clone(), q);
                }
                Parsed::Property(p) => {
                    class.properties.insert(p.name.clone(), p);
                }
                Parsed::Method(m) => {
                    class.methods.insert(m.name.clone(), m);
                }
                other => return Err(unexpected("CLASS", &other)),
            }
        }
        Ok(class)
    }

    fn parse_instance(&mut self, node: Element) -> Result<CimInstance, ParseError> {
        let allowed = [
            "QUALIFIER",
            "PROPERTY",
            "PROPERTY.ARRAY",
            "PROPERTY.REFERENCE",
        ];
        check_node(&node, "INSTANCE", &["CLASSNAME"], &["xml:lang"], Some(&allowed), false)?;
        let mut instance = CimInstance::new(required_attr(&node, "CLASSNAME")?);
        for part in self.list_of_various(node, &allowed)? {
            match part {
                Parsed::Qualifier(q) => {
                    instance.qualifiers.insert(q.name.clone(), q);
                }
                Parsed::Property(p) => {
                    instance.properties.insert(p.name.clone(), p);
                }
                other => return Err(unexpected("INSTANCE", &other)),
            }
        }
        Ok(instance)
    }

    fn parse_qualifier(&mut self, node: Element) -> Result<CimQualifier, ParseError> {
        check_node(
            &node,
            "QUALIFIER",
            &["NAME", "TYPE"],
            &[
                "PROPAGATED",
                "OVERRIDABLE",
                "TOSUBCLASS",
                "TOINSTANCE",
                "TRANSLATABLE",
                "xml:lang",
            ],
            Some(&["VALUE", "VALUE.ARRAY"]),
            false,
        )?;
        let cim_type = required_type(&node, "TYPE")?;
        let mut qualifier = CimQualifier::new(required_attr(&node, "NAME")?, cim_type, None);
        qualifier.propagated = bool_attr(&node, "PROPAGATED")?;
        qualifier.overridable = bool_attr(&node, "OVERRIDABLE")?;
        qualifier.tosubclass = bool_attr(&node, "TOSUBCLASS")?;
        qualifier.toinstance = bool_attr(&node, "TOINSTANCE")?;
        qualifier.translatable = bool_attr(&node, "TRANSLATABLE")?;
        qualifier.value = match self.optional_child(node, &["VALUE", "VALUE.ARRAY"])? {
            None => None,
            Some(Parsed::Raw(raw)) => self.unpack_value(raw, Some(cim_type), None)?,
            Some(other) => return Err(unexpected("QUALIFIER", &other)),
        };
        Ok(qualifier)
    }

    fn parse_qualifier_declaration(
        &mut self,
        node: Element,
    ) -> Result<CimQualifierDeclaration, ParseError> {
        check_node(
            &node,
            "QUALIFIER.DECLARATION",
            &["NAME", "TYPE"],
            &[
                "ISARRAY",
                "ARRAYSIZE",
                "OVERRIDABLE",
                "TOSUBCLASS",
                "TOINSTANCE",
                "TRANSLATABLE",
            ],
            Some(&["SCOPE", "VALUE", "VALUE.ARRAY"]),
            false,
        )?;
        let name = required_attr(&node, "NAME")?;
        let cim_type = required_type(&node, "TYPE")?;
        let is_array_attr = bool_attr(&node, "ISARRAY")?;
        let mut decl = CimQualifierDeclaration::new(name, cim_type, is_array_attr.unwrap_or(false));
        decl.array_size = u32_attr(&node, "ARRAYSIZE")?;
        decl.overridable = bool_attr(&node, "OVERRIDABLE")?;
        decl.tosubclass = bool_attr(&node, "TOSUBCLASS")?;
        decl.toinstance = bool_attr(&node, "TOINSTANCE")?;
        decl.translatable = bool_attr(&node, "TRANSLATABLE")?;

        let mut seen_value = false;
        for part in self.list_of_various(node, &["SCOPE", "VALUE", "VALUE.ARRAY"])? {
            match part {
                Parsed::Scope(scope) => decl.scopes = scope,
                Parsed::Raw(raw) if !seen_value => {
                    seen_value = true;
                    let raw_is_array = matches!(raw, RawValue::Array(_));
                    match is_array_attr {
                        Some(flag) if flag != raw_is_array => {
                            return Err(ParseError::cimxml(format!(
                                "QUALIFIER.DECLARATION {} has ISARRAY={flag} but a {} value",
                                decl.name,
                                if raw_is_array { "VALUE.ARRAY" } else { "VALUE" }
                            )))
                        }
                        None => decl.is_array = raw_is_array,
                        _ => {}
                    }
                    decl.value = self.unpack_value(raw, Some(cim_type), None)?;
                }
                other => return Err(unexpected("QUALIFIER.DECLARATION", &other)),
            }
        }
        Ok(decl)
    }

    fn parse_scope(&mut self, node: Element) -> Result<Scope, ParseError> {
        let names: Vec<&str> = Scope::ATTRS.iter().map(|(name, _)| *name).collect();
        check_node(&node, "SCOPE", &[], &names, Some(&[]), false)?;
        let mut scope = Scope::empty();
        for (name, flag) in Scope::ATTRS {
            if bool_attr(&node, name)?.unwrap_or(false) {
                scope |= flag;
            }
        }
        Ok(scope)
    }

    fn property_common(
        &mut self,
        node: Element,
        elem: &str,
        mut prop: CimProperty,
        value_elem: &str,
    ) -> Result<CimProperty, ParseError> {
        prop.class_origin = optional_attr(&node, "CLASSORIGIN");
        prop.propagated = bool_attr(&node, "PROPAGATED")?;
        let mut raw_value = None;
        for part in self.list_of_various(node, &["QUALIFIER", value_elem])? {
            match part {
                Parsed::Qualifier(q) => {
                    prop.qualifiers.insert(q.name.clone(), q);
                }
                Parsed::Raw(raw) if raw_value.is_none() => raw_value = Some(raw),
                Parsed::Path(path) if raw_value.is_none() => {
                    raw_value = Some(RawValue::Reference(path))
                }
                other => return Err(unexpected(elem, &other)),
            }
        }
        if let Some(raw) = raw_value {
            prop.value = self.unpack_value(raw, Some(prop.cim_type), prop.embedded_object)?;
        }
        Ok(prop)
    }

    fn parse_property(&mut self, node: Element) -> Result<CimProperty, ParseError> {
        check_node(
            &node,
            "PROPERTY",
            &["NAME", "TYPE"],
            &["CLASSORIGIN", "PROPAGATED", "EmbeddedObject", "EMBEDDEDOBJECT", "xml:lang"],
            Some(&["QUALIFIER", "VALUE"]),
            false,
        )?;
        let mut prop = CimProperty::declare(
            required_attr(&node, "NAME")?,
            required_type(&node, "TYPE")?,
            false,
        );
        prop.embedded_object = self.property_embedded(&node, prop.cim_type)?;
        self.property_common(node, "PROPERTY", prop, "VALUE")
    }

    fn parse_property_array(&mut self, node: Element) -> Result<CimProperty, ParseError> {
        check_node(
            &node,
            "PROPERTY.ARRAY",
            &["NAME", "TYPE"],
            &[
                "ARRAYSIZE",
                "CLASSORIGIN",
                "PROPAGATED",
                "EmbeddedObject",
                "EMBEDDEDOBJECT",
                "xml:lang",
            ],
            Some(&["QUALIFIER", "VALUE.ARRAY"]),
            false,
        )?;
        let mut prop = CimProperty::declare(
            required_attr(&node, "NAME")?,
            required_type(&node, "TYPE")?,
            true,
        );
        prop.array_size = u32_attr(&node, "ARRAYSIZE")?;
        prop.embedded_object = self.property_embedded(&node, prop.cim_type)?;
        self.property_common(node, "PROPERTY.ARRAY", prop, "VALUE.ARRAY")
    }

    fn parse_property_reference(&mut self, node: Element) -> Result<CimProperty, ParseError> {
        check_node(
            &node,
            "PROPERTY.REFERENCE",
            &["NAME"],
            &["REFERENCECLASS", "CLASSORIGIN", "PROPAGATED"],
            Some(&["QUALIFIER", "VALUE.REFERENCE"]),
            false,
        )?;
        let mut prop =
            CimProperty::declare(required_attr(&node, "NAME")?, CimType::Reference, false);
        prop.reference_class = optional_attr(&node, "REFERENCECLASS");
        self.property_common(node, "PROPERTY.REFERENCE", prop, "VALUE.REFERENCE")
    }

    fn property_embedded(
        &mut self,
        node: &Element,
        cim_type: CimType,
    ) -> Result<Option<EmbeddedObject>, ParseError> {
        let embedded = embedded_attr(node)?;
        if embedded.is_some() && cim_type != CimType::String {
            return Err(ParseError::cimxml(format!(
                "Element {} {} has EmbeddedObject but TYPE {cim_type}",
                node.name,
                node.get_attr("NAME").unwrap_or_default()
            )));
        }
        Ok(embedded)
    }

    fn parse_method(&mut self, node: Element) -> Result<CimMethod, ParseError> {
        let allowed = [
            "QUALIFIER",
            "PARAMETER",
            "PARAMETER.REFERENCE",
            "PARAMETER.ARRAY",
            "PARAMETER.REFARRAY",
        ];
        check_node(
            &node,
            "METHOD",
            &["NAME"],
            &["TYPE", "CLASSORIGIN", "PROPAGATED"],
            Some(&allowed),
            false,
        )?;
        let mut method = CimMethod::new(required_attr(&node, "NAME")?, type_attr(&node, "TYPE")?);
        method.class_origin = optional_attr(&node, "CLASSORIGIN");
        method.propagated = bool_attr(&node, "PROPAGATED")?;
        for part in self.list_of_various(node, &allowed)? {
            match part {
                Parsed::Qualifier(q) => {
                    method.qualifiers.insert(q.name.clone(), q);
                }
                Parsed::Parameter(p) => {
                    method.parameters.insert(p.name.clone(), p);
                }
                other => return Err(unexpected("METHOD", &other)),
            }
        }
        Ok(method)
    }

    fn parse_parameter(&mut self, node: Element, kind: ElementKind) -> Result<CimParameter, ParseError> {
        let elem = kind.name();
        let (required, optional): (&[&str], &[&str]) = match kind {
            ElementKind::Parameter => (&["NAME", "TYPE"], &[]),
            ElementKind::ParameterReference => (&["NAME"], &["REFERENCECLASS"]),
            ElementKind::ParameterArray => (&["NAME", "TYPE"], &["ARRAYSIZE"]),
            _ => (&["NAME"], &["REFERENCECLASS", "ARRAYSIZE"]),
        };
        check_node(&node, elem, required, optional, Some(&["QUALIFIER"]), false)?;
        let is_reference = matches!(
            kind,
            ElementKind::ParameterReference | ElementKind::ParameterRefArray
        );
        let is_array = matches!(
            kind,
            ElementKind::ParameterArray | ElementKind::ParameterRefArray
        );
        let cim_type = if is_reference {
            CimType::Reference
        } else {
            required_type(&node, "TYPE")?
        };
        let mut param = CimParameter::new(required_attr(&node, "NAME")?, cim_type, is_array);
        param.reference_class = optional_attr(&node, "REFERENCECLASS");
        param.array_size = u32_attr(&node, "ARRAYSIZE")?;
        for part in self.list_of_various(node, &["QUALIFIER"])? {
            match part {
                Parsed::Qualifier(q) => {
                    param.qualifiers.insert(q.name.clone(), q);
                }
                other => return Err(unexpected(elem, &other)),
            }
        }
        Ok(param)
    }
}

/// Convert the parsed child of a result list into an [`Item`].
fn into_item(element: &str, parsed: Parsed) -> Result<Item, ParseError> {
    let by_value = element == "VALUE.REFERENCE";
    Ok(match parsed {
        Parsed::Item(item) => item,
        Parsed::Path(path) if by_value => Item::Value(CimValue::Reference(path)),
        Parsed::Path(ObjectPath::Class(path)) => Item::ClassName(path),
        Parsed::Path(ObjectPath::Instance(path)) => Item::InstanceName(path),
        Parsed::Raw(RawValue::Scalar(text)) => Item::Value(CimValue::String(text)),
        Parsed::Raw(RawValue::Array(items)) => Item::Value(CimValue::Array(
            items.into_iter().map(|v| v.map(CimValue::String)).collect(),
        )),
        other => {
            return Err(ParseError::cimxml(format!(
                "Element {element} cannot appear as a result item: {other:?}"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> Result<Parsed, ParseError> {
        let root = xml_to_tupletree(xml.as_bytes())?;
        Parser::new().parse_any(root)
    }

    fn response(body: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
             <CIM CIMVERSION=\"2.0\" DTDVERSION=\"2.0\"><MESSAGE ID=\"1001\" PROTOCOLVERSION=\"1.0\">\
             <SIMPLERSP>{body}</SIMPLERSP></MESSAGE></CIM>"
        )
    }

    #[test]
    fn get_instance_response() {
        let xml = response(
            "<IMETHODRESPONSE NAME=\"GetInstance\"><IRETURNVALUE>\
             <INSTANCE CLASSNAME=\"CIM_Foo\">\
             <PROPERTY NAME=\"Name\" TYPE=\"string\"><VALUE>foo</VALUE></PROPERTY>\
             <PROPERTY NAME=\"Count\" TYPE=\"uint16\"><VALUE>0x10</VALUE></PROPERTY>\
             <PROPERTY.ARRAY NAME=\"Flags\" TYPE=\"boolean\"><VALUE.ARRAY><VALUE>TRUE</VALUE>\
             <VALUE.NULL/></VALUE.ARRAY></PROPERTY.ARRAY>\
             </INSTANCE></IRETURNVALUE></IMETHODRESPONSE>",
        );
        let msg = Parser::new().parse_document(xml.as_bytes()).expect("parse");
        assert_eq!(msg.id, "1001");
        assert_eq!(msg.cim_version, "2.0");
        let MessageBody::Response(resp) = msg.body else {
            panic!("expected a response");
        };
        assert_eq!(resp.kind, MethodKind::Intrinsic);
        let items = resp.items.expect("items");
        let [Item::Instance(inst)] = items.as_slice() else {
            panic!("expected one instance");
        };
        assert_eq!(inst.get("name"), Some(&CimValue::from("foo")));
        assert_eq!(inst.get("Count"), Some(&CimValue::Uint16(16)));
        assert_eq!(
            inst.get("Flags"),
            Some(&CimValue::Array(vec![Some(CimValue::Boolean(true)), None]))
        );
    }

    #[test]
    fn error_response_carries_code_and_instances() {
        let xml = response(
            "<IMETHODRESPONSE NAME=\"GetClass\"><ERROR CODE=\"6\" DESCRIPTION=\"gone\">\
             <INSTANCE CLASSNAME=\"CIM_Error\"/></ERROR></IMETHODRESPONSE>",
        );
        let msg = Parser::new().parse_document(xml.as_bytes()).expect("parse");
        let MessageBody::Response(resp) = msg.body else {
            panic!("expected a response");
        };
        let err = resp.error.expect("error");
        assert_eq!(err.status(), CimStatus::NotFound);
        assert_eq!(err.description.as_deref(), Some("gone"));
        assert_eq!(err.instances.len(), 1);
    }

    #[test]
    fn version_checks() {
        let xml = "<CIM CIMVERSION=\"3.0\" DTDVERSION=\"2.0\"/>";
        assert!(matches!(
            Parser::new().parse_document(xml.as_bytes()),
            Err(ParseError::Version { kind: VersionKind::Cim, .. })
        ));
        let xml = "<CIM CIMVERSION=\"2.0\" DTDVERSION=\"2.0\">\
                   <MESSAGE ID=\"1\" PROTOCOLVERSION=\"2.0\"/></CIM>";
        assert!(matches!(
            Parser::new().parse_document(xml.as_bytes()),
            Err(ParseError::Version { kind: VersionKind::Protocol, .. })
        ));
    }

    #[test]
    fn check_node_aggregates_violations() {
        let err = parse("<CLASSNAME BOGUS=\"1\"><VALUE/>text</CLASSNAME>").unwrap_err();
        let ParseError::CimXml(msg) = err else {
            panic!("expected CIM-XML error");
        };
        assert!(msg.contains("missing required attribute(s) NAME"), "{msg}");
        assert!(msg.contains("invalid attribute(s) BOGUS"), "{msg}");
        assert!(msg.contains("child element(s) VALUE where none are allowed"), "{msg}");
        assert!(msg.contains("unexpected text content"), "{msg}");
    }

    #[test]
    fn unknown_element_is_rejected() {
        let err = parse("<FOO/>").unwrap_err();
        assert!(matches!(err, ParseError::CimXml(msg) if msg.contains("Unknown element FOO")));
    }

    #[test]
    fn numeric_decoding_boundaries() {
        let mut parser = Parser::new();
        assert_eq!(
            parser.unpack_single_value("0xFF", Some(CimType::Uint8)),
            Ok(Some(CimValue::Uint8(255)))
        );
        assert!(matches!(
            parser.unpack_single_value("256", Some(CimType::Uint8)),
            Err(ParseError::Value(_))
        ));
        assert!(matches!(
            parser.unpack_single_value("not-a-number", None),
            Err(ParseError::CimXml(_))
        ));
        assert!(matches!(
            parser.unpack_single_value("0x1FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF", Some(CimType::Uint64)),
            Err(ParseError::Value(_))
        ));
        assert!(matches!(
            parser.unpack_single_value("0x1FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF", None),
            Err(ParseError::Value(_))
        ));
        assert_eq!(
            parser.unpack_single_value("-0x10", Some(CimType::Sint8)),
            Ok(Some(CimValue::Sint8(-16)))
        );
        assert_eq!(
            parser.unpack_single_value("1.5", Some(CimType::Real32)),
            Ok(Some(CimValue::Real32(1.5)))
        );
        assert!(matches!(
            parser.unpack_single_value("1.5", Some(CimType::Uint32)),
            Err(ParseError::Value(_))
        ));
        assert_eq!(
            parser.unpack_single_value(" 42 ", None),
            Ok(Some(CimValue::Sint64(42)))
        );
    }

    #[test]
    fn boolean_char16_and_datetime() {
        let mut parser = Parser::new();
        assert_eq!(
            parser.unpack_single_value(" True ", Some(CimType::Boolean)),
            Ok(Some(CimValue::Boolean(true)))
        );
        assert!(parser.unpack_single_value("yes", Some(CimType::Boolean)).is_err());
        assert_eq!(parser.unpack_single_value("", Some(CimType::Boolean)), Ok(None));
        assert_eq!(parser.tolerated_issues().len(), 1);

        assert_eq!(
            parser.unpack_single_value("x", Some(CimType::Char16)),
            Ok(Some(CimValue::Char16('x')))
        );
        assert!(parser.unpack_single_value("", Some(CimType::Char16)).is_err());
        assert!(parser.unpack_single_value("xy", Some(CimType::Char16)).is_err());
        assert!(parser.unpack_single_value("\u{1F600}", Some(CimType::Char16)).is_err());

        assert!(matches!(
            parser.unpack_single_value("20140924193040.654321+120", Some(CimType::DateTime)),
            Ok(Some(CimValue::DateTime(_)))
        ));
        assert!(matches!(
            parser.unpack_single_value("2014", Some(CimType::DateTime)),
            Err(ParseError::CimXml(_))
        ));
    }

    #[test]
    fn keyless_instance_name_is_tolerated() {
        let mut parser = Parser::new();
        let root = xml_to_tupletree(b"<INSTANCENAME CLASSNAME=\"CIM_Singleton\"/>").expect("xml");
        let parsed = parser.parse_any(root).expect("parse");
        let Parsed::Path(ObjectPath::Instance(path)) = parsed else {
            panic!("expected instance path");
        };
        assert!(path.keybindings.is_empty());
        let issues = parser.take_tolerated_issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].element, "INSTANCENAME");
        assert!(parser.tolerated_issues().is_empty());
    }

    #[test]
    fn empty_boolean_key_is_tolerated() {
        let mut parser = Parser::new();
        let root = xml_to_tupletree(
            b"<INSTANCENAME CLASSNAME=\"CIM_Foo\"><KEYBINDING NAME=\"Flag\">\
              <KEYVALUE VALUETYPE=\"boolean\"></KEYVALUE></KEYBINDING></INSTANCENAME>",
        )
        .expect("xml");
        let Parsed::Path(ObjectPath::Instance(path)) = parser.parse_any(root).expect("parse") else {
            panic!("expected instance path");
        };
        assert_eq!(path.keybindings.get("flag"), Some(&None));
        assert_eq!(parser.tolerated_issues().len(), 1);
    }

    #[test]
    fn keybindings_and_type_mismatch() {
        let mut parser = Parser::new();
        let root = xml_to_tupletree(
            b"<INSTANCEPATH><NAMESPACEPATH><HOST>srv</HOST><LOCALNAMESPACEPATH>\
              <NAMESPACE NAME=\"root\"/><NAMESPACE NAME=\"cimv2\"/></LOCALNAMESPACEPATH>\
              </NAMESPACEPATH><INSTANCENAME CLASSNAME=\"CIM_Foo\">\
              <KEYBINDING NAME=\"Id\"><KEYVALUE VALUETYPE=\"string\" TYPE=\"uint32\">7</KEYVALUE></KEYBINDING>\
              <KEYBINDING NAME=\"Name\"><KEYVALUE>abc</KEYVALUE></KEYBINDING>\
              </INSTANCENAME></INSTANCEPATH>",
        )
        .expect("xml");
        let Parsed::Path(ObjectPath::Instance(path)) = parser.parse_any(root).expect("parse") else {
            panic!("expected instance path");
        };
        assert_eq!(path.host.as_deref(), Some("srv"));
        assert_eq!(path.namespace.as_deref(), Some("root/cimv2"));
        assert_eq!(path.keybindings.get("id"), Some(&Some(CimValue::Uint32(7))));
        assert_eq!(path.keybindings.get("NAME"), Some(&Some(CimValue::from("abc"))));
        assert_eq!(parser.tolerated_issues().len(), 1);
    }

    #[test]
    fn embedded_instance_property() {
        let xml = "<PROPERTY NAME=\"Data\" TYPE=\"string\" EmbeddedObject=\"instance\"><VALUE>\
                   &lt;INSTANCE CLASSNAME=&quot;CIM_Inner&quot;&gt;&lt;PROPERTY NAME=&quot;X&quot; \
                   TYPE=&quot;sint32&quot;&gt;&lt;VALUE&gt;-3&lt;/VALUE&gt;&lt;/PROPERTY&gt;\
                   &lt;/INSTANCE&gt;</VALUE></PROPERTY>";
        let Parsed::Property(prop) = parse(xml).expect("parse") else {
            panic!("expected property");
        };
        let Some(CimValue::Instance(inner)) = prop.value else {
            panic!("expected embedded instance");
        };
        assert_eq!(inner.classname, "CIM_Inner");
        assert_eq!(inner.get("x"), Some(&CimValue::Sint32(-3)));

        // Escaped twice.
        let xml = "<PROPERTY NAME=\"Data\" TYPE=\"string\" EMBEDDEDOBJECT=\"object\"><VALUE>\
                   &amp;lt;CLASS NAME=&amp;quot;CIM_C&amp;quot;/&amp;gt;</VALUE></PROPERTY>";
        let Parsed::Property(prop) = parse(xml).expect("parse") else {
            panic!("expected property");
        };
        assert!(matches!(prop.value, Some(CimValue::Class(c)) if c.classname == "CIM_C"));
    }

    #[test]
    fn embedded_instance_array() {
        let xml = "<PROPERTY.ARRAY NAME=\"Items\" TYPE=\"string\" EmbeddedObject=\"instance\">\
                   <VALUE.ARRAY><VALUE>&lt;INSTANCE CLASSNAME=&quot;CIM_A&quot;/&gt;</VALUE>\
                   <VALUE.NULL/><VALUE>&lt;INSTANCE CLASSNAME=&quot;CIM_B&quot;/&gt;</VALUE>\
                   </VALUE.ARRAY></PROPERTY.ARRAY>";
        let Parsed::Property(prop) = parse(xml).expect("parse") else {
            panic!("expected property");
        };
        let Some(CimValue::Array(items)) = prop.value else {
            panic!("expected array");
        };
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], Some(CimValue::Instance(i)) if i.classname == "CIM_A"));
        assert!(items[1].is_none());
        assert!(matches!(&items[2], Some(CimValue::Instance(i)) if i.classname == "CIM_B"));
    }

    #[test]
    fn embedded_value_must_be_cim_xml() {
        let malformed = "<PROPERTY NAME=\"Data\" TYPE=\"string\" EmbeddedObject=\"object\">\
                         <VALUE>&lt;INSTANCE CLASSNAME=&quot;CIM_A&quot;&gt;</VALUE></PROPERTY>";
        assert!(matches!(parse(malformed), Err(ParseError::Xml(_))));

        let not_an_object = "<PROPERTY NAME=\"Data\" TYPE=\"string\" EmbeddedObject=\"object\">\
                             <VALUE>&lt;VALUE&gt;1&lt;/VALUE&gt;</VALUE></PROPERTY>";
        assert!(matches!(parse(not_an_object), Err(ParseError::CimXml(_))));

        let bad_grammar = "<PROPERTY NAME=\"Data\" TYPE=\"string\" EmbeddedObject=\"instance\">\
                           <VALUE>&lt;INSTANCE/&gt;</VALUE></PROPERTY>";
        assert!(matches!(parse(bad_grammar), Err(ParseError::CimXml(_))));
    }

    #[test]
    fn untyped_param_value_stays_string() {
        let Parsed::ParamValue(param) =
            parse("<PARAMVALUE NAME=\"EnumerationContext\"><VALUE>00123</VALUE></PARAMVALUE>")
                .expect("parse")
        else {
            panic!("expected PARAMVALUE");
        };
        assert_eq!(param.param_type, None);
        assert_eq!(param.value, Some(CimValue::from("00123")));

        let Parsed::ParamValue(param) =
            parse("<PARAMVALUE NAME=\"Count\" PARAMTYPE=\"uint16\"><VALUE>12</VALUE></PARAMVALUE>")
                .expect("parse")
        else {
            panic!("expected PARAMVALUE");
        };
        assert_eq!(param.value, Some(CimValue::Uint16(12)));
    }

    #[test]
    fn result_list_must_be_homogeneous() {
        let err = parse(
            "<IRETURNVALUE><CLASSNAME NAME=\"A\"/><INSTANCENAME CLASSNAME=\"B\">\
             <KEYBINDING NAME=\"k\"><KEYVALUE>1</KEYVALUE></KEYBINDING></INSTANCENAME></IRETURNVALUE>",
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::CimXml(msg) if msg.contains("different kinds")));
    }

    #[test]
    fn method_response_with_out_params() {
        let xml = response(
            "<METHODRESPONSE NAME=\"Reset\"><RETURNVALUE PARAMTYPE=\"uint32\"><VALUE>0</VALUE>\
             </RETURNVALUE><PARAMVALUE NAME=\"Job\" PARAMTYPE=\"reference\"><VALUE.REFERENCE>\
             <INSTANCENAME CLASSNAME=\"CIM_Job\"><KEYBINDING NAME=\"Id\">\
             <KEYVALUE VALUETYPE=\"numeric\">5</KEYVALUE></KEYBINDING></INSTANCENAME>\
             </VALUE.REFERENCE></PARAMVALUE><PARAMVALUE NAME=\"Note\"><VALUE>hi</VALUE></PARAMVALUE>\
             </METHODRESPONSE>",
        );
        let msg = Parser::new().parse_document(xml.as_bytes()).expect("parse");
        let MessageBody::Response(resp) = msg.body else {
            panic!("expected a response");
        };
        assert_eq!(
            resp.return_value.as_ref().and_then(|r| r.value.clone()),
            Some(CimValue::Uint32(0))
        );
        let job = resp.out_param("job").and_then(|p| p.value.as_ref());
        assert!(matches!(job, Some(CimValue::Reference(ObjectPath::Instance(p))) if p.classname == "CIM_Job"));
        assert_eq!(
            resp.out_param("Note").and_then(|p| p.value.clone()),
            Some(CimValue::from("hi"))
        );
    }

    #[test]
    fn class_roundtrip_through_xml() {
        let class = CimClass::new("CIM_Foo")
            .with_superclass("CIM_Base")
            .with_qualifier(CimQualifier::flag("Abstract", true))
            .with_property(
                CimProperty::declare("Name", CimType::String, false)
                    .with_qualifier(CimQualifier::flag("Key", true)),
            )
            .with_property({
                let mut p = CimProperty::declare("Ref", CimType::Reference, false);
                p.reference_class = Some("CIM_Other".into());
                p
            })
            .with_method({
                let mut m = CimMethod::new("Reset", Some(CimType::Uint32));
                m.parameters.insert(
                    "Force",
                    CimParameter::new("Force", CimType::Boolean, false),
                );
                m
            });
        let xml = class.to_element().to_xml();
        let Parsed::Item(Item::Class(parsed)) = parse(&xml).expect("parse") else {
            panic!("expected class");
        };
        assert_eq!(parsed, class);
    }
}
