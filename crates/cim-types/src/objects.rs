//! Classes, instances, properties, methods, parameters and qualifiers.

use bitflags::bitflags;
use tracing::debug;

use crate::element::Element;
use crate::nocase::NocaseMap;
use crate::path::{CimClassName, CimInstanceName};
use crate::types::CimType;
use crate::value::CimValue;
use crate::CimError;

/// Kind of object carried by an embedded-object string property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddedObject {
    /// An instance or a class.
    Object,
    /// An instance only.
    Instance,
}

impl EmbeddedObject {
    pub fn as_str(self) -> &'static str {
        match self {
            EmbeddedObject::Object => "object",
            EmbeddedObject::Instance => "instance",
        }
    }

    pub fn from_attr(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("object") {
            Some(EmbeddedObject::Object)
        } else if value.eq_ignore_ascii_case("instance") {
            Some(EmbeddedObject::Instance)
        } else {
            None
        }
    }
}

bitflags! {
    /// Element kinds a qualifier declaration may be applied to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Scope: u8 {
        const CLASS = 1 << 0;
        const ASSOCIATION = 1 << 1;
        const REFERENCE = 1 << 2;
        const PROPERTY = 1 << 3;
        const METHOD = 1 << 4;
        const PARAMETER = 1 << 5;
        const INDICATION = 1 << 6;
    }
}

impl Scope {
    /// Attribute names of the `SCOPE` element, in DTD order.
    pub const ATTRS: [(&'static str, Scope); 7] = [
        ("CLASS", Scope::CLASS),
        ("ASSOCIATION", Scope::ASSOCIATION),
        ("REFERENCE", Scope::REFERENCE),
        ("PROPERTY", Scope::PROPERTY),
        ("METHOD", Scope::METHOD),
        ("PARAMETER", Scope::PARAMETER),
        ("INDICATION", Scope::INDICATION),
    ];
}

fn qualifier_elements(quals: &NocaseMap<CimQualifier>) -> impl Iterator<Item = Element> + '_ {
    quals.values().map(CimQualifier::to_element)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CimQualifier {
    pub name: String,
    pub cim_type: CimType,
    pub value: Option<CimValue>,
    pub propagated: Option<bool>,
    pub overridable: Option<bool>,
    pub tosubclass: Option<bool>,
    pub toinstance: Option<bool>,
    pub translatable: Option<bool>,
}

impl CimQualifier {
    pub fn new<S: Into<String>>(name: S, cim_type: CimType, value: Option<CimValue>) -> Self {
        Self {
            name: name.into(),
            cim_type,
            value,
            propagated: None,
            overridable: None,
            tosubclass: None,
            toinstance: None,
            translatable: None,
        }
    }

    /// Boolean qualifier such as `Key` or `Association`.
    pub fn flag<S: Into<String>>(name: S, value: bool) -> Self {
        Self::new(name, CimType::Boolean, Some(CimValue::Boolean(value)))
    }

    pub fn to_element(&self) -> Element {
        let elem = Element::new("QUALIFIER")
            .attr("NAME", self.name.as_str())
            .attr("TYPE", self.cim_type.name())
            .bool_attr("PROPAGATED", self.propagated)
            .bool_attr("OVERRIDABLE", self.overridable)
            .bool_attr("TOSUBCLASS", self.tosubclass)
            .bool_attr("TOINSTANCE", self.toinstance)
            .bool_attr("TRANSLATABLE", self.translatable);
        match &self.value {
            Some(v) => elem.child(v.to_element()),
            None => elem,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CimProperty {
    pub name: String,
    pub cim_type: CimType,
    pub value: Option<CimValue>,
    pub is_array: bool,
    pub array_size: Option<u32>,
    pub reference_class: Option<String>,
    pub embedded_object: Option<EmbeddedObject>,
    pub class_origin: Option<String>,
    pub propagated: Option<bool>,
    pub qualifiers: NocaseMap<CimQualifier>,
}

impl CimProperty {
    /// Declare a property without a value.
    pub fn declare<S: Into<String>>(name: S, cim_type: CimType, is_array: bool) -> Self {
        Self {
            name: name.into(),
            cim_type,
            value: None,
            is_array,
            array_size: None,
            reference_class: None,
            embedded_object: None,
            class_origin: None,
            propagated: None,
            qualifiers: NocaseMap::new(),
        }
    }

    /// Property holding `value`, typed after it.
    ///
    /// Fails for arrays that contain only NULL entries, whose type cannot be
    /// inferred; use [`CimProperty::declare`] for those.
    pub fn new<S: Into<String>>(name: S, value: CimValue) -> Result<Self, CimError> {
        let name = name.into();
        let cim_type = value.cim_type().ok_or_else(|| {
            CimError::value(format!("cannot infer the CIM type of property {name}"))
        })?;
        let mut prop = Self::declare(name, cim_type, value.is_array());
        prop.embedded_object = embedded_kind(&value);
        prop.value = Some(value);
        Ok(prop)
    }

    pub fn with_qualifier(mut self, qualifier: CimQualifier) -> Self {
        self.qualifiers.insert(qualifier.name.clone(), qualifier);
        self
    }

    /// True if the property carries a `Key` qualifier set to true.
    pub fn is_key(&self) -> bool {
        self.qualifiers
            .get("Key")
            .and_then(|q| q.value.as_ref())
            .and_then(CimValue::as_bool)
            .unwrap_or(false)
    }

    pub fn to_element(&self) -> Element {
        let name = if self.cim_type == CimType::Reference {
            "PROPERTY.REFERENCE"
        } else if self.is_array {
            "PROPERTY.ARRAY"
        } else {
            "PROPERTY"
        };
        let mut elem = Element::new(name).attr("NAME", self.name.as_str());
        if self.cim_type == CimType::Reference {
            elem = elem.opt_attr("REFERENCECLASS", self.reference_class.as_deref());
        } else {
            elem = elem.attr("TYPE", self.cim_type.name());
            if self.is_array {
                elem = elem.opt_attr("ARRAYSIZE", self.array_size.map(|n| n.to_string()));
            }
        }
        elem = elem
            .opt_attr("CLASSORIGIN", self.class_origin.as_deref())
            .bool_attr("PROPAGATED", self.propagated)
            .opt_attr("EmbeddedObject", self.embedded_object.map(EmbeddedObject::as_str))
            .children(qualifier_elements(&self.qualifiers));
        match &self.value {
            Some(v) => elem.child(v.to_element()),
            None => elem,
        }
    }
}

fn embedded_kind(value: &CimValue) -> Option<EmbeddedObject> {
    let first = match value {
        CimValue::Array(items) => items.iter().flatten().next()?,
        v => v,
    };
    match first {
        CimValue::Instance(_) => Some(EmbeddedObject::Instance),
        CimValue::Class(_) => Some(EmbeddedObject::Object),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CimParameter {
    pub name: String,
    pub cim_type: CimType,
    pub is_array: bool,
    pub array_size: Option<u32>,
    pub reference_class: Option<String>,
    pub qualifiers: NocaseMap<CimQualifier>,
}

impl CimParameter {
    pub fn new<S: Into<String>>(name: S, cim_type: CimType, is_array: bool) -> Self {
        Self {
            name: name.into(),
            cim_type,
            is_array,
            array_size: None,
            reference_class: None,
            qualifiers: NocaseMap::new(),
        }
    }

    pub fn to_element(&self) -> Element {
        let elem = match (self.cim_type == CimType::Reference, self.is_array) {
            (true, false) => Element::new("PARAMETER.REFERENCE")
                .attr("NAME", self.name.as_str())
                .opt_attr("REFERENCECLASS", self.reference_class.as_deref()),
            (true, true) => Element::new("PARAMETER.REFARRAY")
                .attr("NAME", self.name.as_str())
                .opt_attr("REFERENCECLASS", self.reference_class.as_deref())
                .opt_attr("ARRAYSIZE", self.array_size.map(|n| n.to_string())),
            (false, false) => Element::new("PARAMETER")
                .attr("NAME", self.name.as_str())
                .attr("TYPE", self.cim_type.name()),
            (false, true) => Element::new("PARAMETER.ARRAY")
                .attr("NAME", self.name.as_str())
                .attr("TYPE", self.cim_type.name())
                .opt_attr("ARRAYSIZE", self.array_size.map(|n| n.to_string())),
        };
        elem.children(qualifier_elements(&self.qualifiers))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CimMethod {
    pub name: String,
    /// `None` for methods without a declared return type.
    pub return_type: Option<CimType>,
    pub class_origin: Option<String>,
    pub propagated: Option<bool>,
    pub parameters: NocaseMap<CimParameter>,
    pub qualifiers: NocaseMap<CimQualifier>,
}

impl CimMethod {
    pub fn new<S: Into<String>>(name: S, return_type: Option<CimType>) -> Self {
        Self {
            name: name.into(),
            return_type,
            class_origin: None,
            propagated: None,
            parameters: NocaseMap::new(),
            qualifiers: NocaseMap::new(),
        }
    }

    pub fn to_element(&self) -> Element {
        Element::new("METHOD")
            .attr("NAME", self.name.as_str())
            .opt_attr("TYPE", self.return_type.map(CimType::name))
            .opt_attr("CLASSORIGIN", self.class_origin.as_deref())
            .bool_attr("PROPAGATED", self.propagated)
            .children(qualifier_elements(&self.qualifiers))
            .children(self.parameters.values().map(CimParameter::to_element))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CimInstance {
    pub classname: String,
    pub properties: NocaseMap<CimProperty>,
    pub qualifiers: NocaseMap<CimQualifier>,
    pub path: Option<CimInstanceName>,
}

impl CimInstance {
    pub fn new<S: Into<String>>(classname: S) -> Self {
        Self {
            classname: classname.into(),
            properties: NocaseMap::new(),
            qualifiers: NocaseMap::new(),
            path: None,
        }
    }

    /// Builder: add a property whose type is inferred from the value.
    pub fn with_property<S: Into<String>, V: Into<CimValue>>(
        mut self,
        name: S,
        value: V,
    ) -> Result<Self, CimError> {
        self.set_property(CimProperty::new(name, value.into())?);
        Ok(self)
    }

    pub fn set_property(&mut self, property: CimProperty) {
        self.properties.insert(property.name.clone(), property);
    }

    /// Value of a property, `None` if absent or NULL.
    pub fn get(&self, name: &str) -> Option<&CimValue> {
        self.properties.get(name).and_then(|p| p.value.as_ref())
    }

    /// Build an instance of `class` from property values.
    ///
    /// Every name must be declared by the class and every non-NULL value must
    /// match the declared type (integers are converted between sizes).
    /// With `include_missing`, declared properties without a value are added
    /// with their class default. A path is built when all key properties
    /// have values.
    pub fn from_class<I, K>(
        class: &CimClass,
        values: I,
        include_missing: bool,
    ) -> Result<Self, CimError>
    where
        I: IntoIterator<Item = (K, Option<CimValue>)>,
        K: Into<String>,
    {
        let mut inst = CimInstance::new(class.classname.clone());
        for (name, value) in values {
            let name = name.into();
            let decl = class.properties.get(&name).ok_or_else(|| {
                CimError::model(format!(
                    "property {name} is not declared in class {}",
                    class.classname
                ))
            })?;
            let value = value.map(|v| conform_value(decl, v)).transpose()?;
            let mut prop = CimProperty::declare(decl.name.clone(), decl.cim_type, decl.is_array);
            prop.reference_class = decl.reference_class.clone();
            prop.embedded_object = decl.embedded_object;
            prop.value = value;
            inst.set_property(prop);
        }
        if include_missing {
            for decl in class.properties.values() {
                if !inst.properties.contains_key(&decl.name) {
                    let mut prop =
                        CimProperty::declare(decl.name.clone(), decl.cim_type, decl.is_array);
                    prop.reference_class = decl.reference_class.clone();
                    prop.embedded_object = decl.embedded_object;
                    prop.value = decl.value.clone();
                    inst.set_property(prop);
                }
            }
        }

        let keys: Vec<&CimProperty> = class.properties.values().filter(|p| p.is_key()).collect();
        if !keys.is_empty() {
            let mut path = CimInstanceName::new(class.classname.clone());
            path.namespace = class.path.as_ref().and_then(|p| p.namespace.clone());
            for key in &keys {
                if let Some(v) = inst.get(&key.name) {
                    path.keybindings.insert(key.name.clone(), Some(v.clone()));
                }
            }
            if path.keybindings.len() == keys.len() {
                inst.path = Some(path);
            }
        }
        debug!(
            class = %class.classname,
            properties = inst.properties.len(),
            has_path = inst.path.is_some(),
            "instance built from class"
        );
        Ok(inst)
    }

    pub fn to_element(&self) -> Element {
        Element::new("INSTANCE")
            .attr("CLASSNAME", self.classname.as_str())
            .children(qualifier_elements(&self.qualifiers))
            .children(self.properties.values().map(CimProperty::to_element))
    }

    /// `VALUE.NAMEDINSTANCE` element; the instance must have a path.
    pub fn to_named_element(&self) -> Result<Element, CimError> {
        let path = self.path.as_ref().ok_or_else(|| {
            CimError::value(format!("instance of {} has no path", self.classname))
        })?;
        Ok(Element::new("VALUE.NAMEDINSTANCE")
            .child(path.local().to_element())
            .child(self.to_element()))
    }
}

fn conform_value(decl: &CimProperty, value: CimValue) -> Result<CimValue, CimError> {
    let mismatch = |found: &CimValue| {
        CimError::model(format!(
            "property {} is declared as {}{} but the value has type {}{}",
            decl.name,
            decl.cim_type,
            if decl.is_array { "[]" } else { "" },
            found
                .cim_type()
                .map(|t| t.name())
                .unwrap_or("unknown"),
            if found.is_array() { "[]" } else { "" },
        ))
    };
    if value.is_array() != decl.is_array {
        return Err(mismatch(&value));
    }
    let conform_scalar = |v: CimValue| -> Result<CimValue, CimError> {
        match v.cim_type() {
            Some(t) if t == decl.cim_type => Ok(v),
            Some(t) if t.is_integer() && decl.cim_type.is_integer() => v
                .as_i128()
                .ok_or_else(|| mismatch(&v))
                .and_then(|i| {
                    CimValue::from_integer(decl.cim_type, i)
                        .map_err(|e| CimError::model(format!("property {}: {e}", decl.name)))
                }),
            _ => Err(mismatch(&v)),
        }
    };
    match value {
        CimValue::Array(items) => items
            .into_iter()
            .map(|item| item.map(&conform_scalar).transpose())
            .collect::<Result<Vec<_>, _>>()
            .map(CimValue::Array),
        scalar => conform_scalar(scalar),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CimClass {
    pub classname: String,
    pub superclass: Option<String>,
    pub properties: NocaseMap<CimProperty>,
    pub methods: NocaseMap<CimMethod>,
    pub qualifiers: NocaseMap<CimQualifier>,
    pub path: Option<CimClassName>,
}

impl CimClass {
    pub fn new<S: Into<String>>(classname: S) -> Self {
        Self {
            classname: classname.into(),
            superclass: None,
            properties: NocaseMap::new(),
            methods: NocaseMap::new(),
            qualifiers: NocaseMap::new(),
            path: None,
        }
    }

    pub fn with_superclass<S: Into<String>>(mut self, superclass: S) -> Self {
        self.superclass = Some(superclass.into());
        self
    }

    pub fn with_property(mut self, property: CimProperty) -> Self {
        self.properties.insert(property.name.clone(), property);
        self
    }

    pub fn with_method(mut self, method: CimMethod) -> Self {
        self.methods.insert(method.name.clone(), method);
        self
    }

    pub fn with_qualifier(mut self, qualifier: CimQualifier) -> Self {
        self.qualifiers.insert(qualifier.name.clone(), qualifier);
        self
    }

    pub fn to_element(&self) -> Element {
        Element::new("CLASS")
            .attr("NAME", self.classname.as_str())
            .opt_attr("SUPERCLASS", self.superclass.as_deref())
            .children(qualifier_elements(&self.qualifiers))
            .children(self.properties.values().map(CimProperty::to_element))
            .children(self.methods.values().map(CimMethod::to_element))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CimQualifierDeclaration {
    pub name: String,
    pub cim_type: CimType,
    pub value: Option<CimValue>,
    pub is_array: bool,
    pub array_size: Option<u32>,
    pub scopes: Scope,
    pub overridable: Option<bool>,
    pub tosubclass: Option<bool>,
    pub toinstance: Option<bool>,
    pub translatable: Option<bool>,
}

impl CimQualifierDeclaration {
    pub fn new<S: Into<String>>(name: S, cim_type: CimType, is_array: bool) -> Self {
        Self {
            name: name.into(),
            cim_type,
            value: None,
            is_array,
            array_size: None,
            scopes: Scope::empty(),
            overridable: None,
            tosubclass: None,
            toinstance: None,
            translatable: None,
        }
    }

    pub fn to_element(&self) -> Element {
        let mut elem = Element::new("QUALIFIER.DECLARATION")
            .attr("NAME", self.name.as_str())
            .attr("TYPE", self.cim_type.name())
            .attr("ISARRAY", if self.is_array { "true" } else { "false" })
            .opt_attr("ARRAYSIZE", self.array_size.map(|n| n.to_string()))
            .bool_attr("OVERRIDABLE", self.overridable)
            .bool_attr("TOSUBCLASS", self.tosubclass)
            .bool_attr("TOINSTANCE", self.toinstance)
            .bool_attr("TRANSLATABLE", self.translatable);
        if !self.scopes.is_empty() {
            let mut scope = Element::new("SCOPE");
            for (attr, flag) in Scope::ATTRS {
                if self.scopes.contains(flag) {
                    scope = scope.attr(attr, "true");
                }
            }
            elem = elem.child(scope);
        }
        match &self.value {
            Some(v) => elem.child(v.to_element()),
            None => elem,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_class() -> CimClass {
        CimClass::new("CIM_Foo")
            .with_property(
                CimProperty::declare("Name", CimType::String, false)
                    .with_qualifier(CimQualifier::flag("Key", true)),
            )
            .with_property(CimProperty::declare("Count", CimType::Uint32, false))
            .with_property(CimProperty::declare("Tags", CimType::String, true))
    }

    #[test]
    fn from_class_builds_path_from_keys() {
        let class = sample_class();
        let inst = CimInstance::from_class(
            &class,
            [
                ("name", Some(CimValue::from("a"))),
                ("Count", Some(CimValue::Uint8(3))),
            ],
            true,
        )
        .expect("instance");
        assert_eq!(inst.get("count"), Some(&CimValue::Uint32(3)));
        assert!(inst.properties.contains_key("Tags"));
        let path = inst.path.expect("path");
        assert_eq!(path.keybindings.get("Name"), Some(&Some(CimValue::from("a"))));
    }

    #[test]
    fn from_class_rejects_undeclared_and_mismatched() {
        let class = sample_class();
        let err = CimInstance::from_class(&class, [("Bogus", Some(CimValue::from(1u8)))], false)
            .unwrap_err();
        assert!(matches!(err, CimError::Model(_)));
        let err = CimInstance::from_class(&class, [("Count", Some(CimValue::from("x")))], false)
            .unwrap_err();
        assert!(matches!(err, CimError::Model(_)));
        let err = CimInstance::from_class(&class, [("Tags", Some(CimValue::from("x")))], false)
            .unwrap_err();
        assert!(matches!(err, CimError::Model(_)));
    }

    #[test]
    fn property_elements() {
        let prop = CimProperty::new("Tags", CimValue::Array(vec![Some("a".into()), None]))
            .expect("property");
        assert_eq!(
            prop.to_element().to_xml(),
            "<PROPERTY.ARRAY NAME=\"Tags\" TYPE=\"string\"><VALUE.ARRAY><VALUE>a</VALUE>\
             <VALUE.NULL/></VALUE.ARRAY></PROPERTY.ARRAY>"
        );
        assert!(CimProperty::new("Empty", CimValue::Array(vec![None])).is_err());
    }

    #[test]
    fn qualifier_declaration_scope() {
        let mut decl = CimQualifierDeclaration::new("Key", CimType::Boolean, false);
        decl.scopes = Scope::PROPERTY | Scope::REFERENCE;
        decl.value = Some(CimValue::Boolean(false));
        let xml = decl.to_element().to_xml();
        assert!(xml.contains("<SCOPE REFERENCE=\"true\" PROPERTY=\"true\"/>"));
        assert!(xml.ends_with("<VALUE>FALSE</VALUE></QUALIFIER.DECLARATION>"));
    }
}
