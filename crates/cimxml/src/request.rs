//! CIM-XML request documents.
//!
//! [`RequestBuilder`] assembles `CIM > MESSAGE > SIMPLEREQ` (or
//! `SIMPLEEXPREQ`) envelopes around one method call. Parameters are added
//! with the `iparam_*` (intrinsic) and [`RequestBuilder::param`]
//! (extrinsic) helpers; absent optional parameters are simply omitted.

use bytes::Bytes;
use cim_types::path::local_namespace_path;
use cim_types::{CimValue, Element, EmbeddedObject, ObjectPath};
use quick_xml::events::Event;
use quick_xml::{Reader, Writer};

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\" ?>\n";
pub const CIM_VERSION: &str = "2.0";
pub const DTD_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Envelope {
    Request,
    Export,
}

/// Builder for one CIM-XML request message.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    id: String,
    envelope: Envelope,
    call: Element,
}

impl RequestBuilder {
    /// `IMETHODCALL` against `namespace`.
    pub fn intrinsic(id: impl Into<String>, method: &str, namespace: &str) -> Self {
        Self {
            id: id.into(),
            envelope: Envelope::Request,
            call: Element::new("IMETHODCALL")
                .attr("NAME", method)
                .child(local_namespace_path(namespace)),
        }
    }

    /// `METHODCALL` on an instance or class. The target must carry a
    /// namespace; the host is never sent.
    pub fn extrinsic(id: impl Into<String>, method: &str, target: &ObjectPath) -> Self {
        let namespace = target.namespace().unwrap_or_default();
        let target = match target {
            ObjectPath::Class(cn) => Element::new("LOCALCLASSPATH")
                .child(local_namespace_path(namespace))
                .child(Element::new("CLASSNAME").attr("NAME", cn.classname.as_str())),
            ObjectPath::Instance(inst) => Element::new("LOCALINSTANCEPATH")
                .child(local_namespace_path(namespace))
                .child(inst.local().to_element()),
        };
        Self {
            id: id.into(),
            envelope: Envelope::Request,
            call: Element::new("METHODCALL").attr("NAME", method).child(target),
        }
    }

    /// `EXPMETHODCALL` for indication delivery.
    pub fn export(id: impl Into<String>, method: &str) -> Self {
        Self {
            id: id.into(),
            envelope: Envelope::Export,
            call: Element::new("EXPMETHODCALL").attr("NAME", method),
        }
    }

    /// Intrinsic parameter with a prebuilt value element.
    pub fn iparam(mut self, name: &str, value: Option<Element>) -> Self {
        if let Some(value) = value {
            let tag = match self.envelope {
                Envelope::Export => "EXPPARAMVALUE",
                Envelope::Request => "IPARAMVALUE",
            };
            self.call = self
                .call
                .child(Element::new(tag).attr("NAME", name).child(value));
        }
        self
    }

    pub fn iparam_bool(self, name: &str, value: Option<bool>) -> Self {
        self.iparam(
            name,
            value.map(|b| Element::new("VALUE").text(if b { "TRUE" } else { "FALSE" })),
        )
    }

    pub fn iparam_str(self, name: &str, value: Option<&str>) -> Self {
        self.iparam(name, value.map(|s| Element::new("VALUE").text(s)))
    }

    pub fn iparam_u32(self, name: &str, value: Option<u32>) -> Self {
        self.iparam(name, value.map(|n| Element::new("VALUE").text(n.to_string())))
    }

    /// `VALUE.ARRAY` of strings, e.g. a PropertyList.
    pub fn iparam_strings(self, name: &str, value: Option<&[String]>) -> Self {
        self.iparam(
            name,
            value.map(|items| {
                Element::new("VALUE.ARRAY").children(
                    items
                        .iter()
                        .map(|s| Element::new("VALUE").text(s.as_str())),
                )
            }),
        )
    }

    /// `CLASSNAME` parameter.
    pub fn iparam_classname(self, name: &str, value: Option<&str>) -> Self {
        self.iparam(
            name,
            value.map(|cn| Element::new("CLASSNAME").attr("NAME", cn)),
        )
    }

    /// Extrinsic parameter. Embedded objects are sent as escaped strings
    /// with an `EmbeddedObject` attribute.
    pub fn param(mut self, name: &str, value: Option<&CimValue>) -> Self {
        let mut elem = Element::new("PARAMVALUE").attr("NAME", name);
        if let Some(value) = value {
            if let Some(ty) = value.cim_type() {
                elem = elem.attr("PARAMTYPE", ty.name());
            }
            elem = elem.opt_attr("EmbeddedObject", embedded_kind(value).map(EmbeddedObject::as_str));
            elem = elem.child(value.to_element());
        }
        self.call = self.call.child(elem);
        self
    }

    /// Complete `CIM` document element.
    pub fn build(self) -> Element {
        let simple = match self.envelope {
            Envelope::Request => "SIMPLEREQ",
            Envelope::Export => "SIMPLEEXPREQ",
        };
        Element::new("CIM")
            .attr("CIMVERSION", CIM_VERSION)
            .attr("DTDVERSION", DTD_VERSION)
            .child(
                Element::new("MESSAGE")
                    .attr("ID", self.id)
                    .attr("PROTOCOLVERSION", PROTOCOL_VERSION)
                    .child(Element::new(simple).child(self.call)),
            )
    }

    /// Serialized request body, with XML declaration.
    pub fn to_bytes(self) -> Bytes {
        let mut out = String::from(XML_DECLARATION);
        out.push_str(&self.build().to_xml());
        Bytes::from(out)
    }
}

fn embedded_kind(value: &CimValue) -> Option<EmbeddedObject> {
    let first = match value {
        CimValue::Array(items) => items.iter().flatten().next()?,
        other => other,
    };
    match first {
        CimValue::Instance(_) => Some(EmbeddedObject::Instance),
        CimValue::Class(_) => Some(EmbeddedObject::Object),
        _ => None,
    }
}

/// Indent an XML document for display. Input that does not parse is
/// returned unchanged.
pub fn pretty_print(xml: &[u8]) -> String {
    let fallback = || String::from_utf8_lossy(xml).into_owned();
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(event) => {
                if writer.write_event(event).is_err() {
                    return fallback();
                }
            }
            Err(_) => return fallback(),
        }
    }
    String::from_utf8(writer.into_inner()).unwrap_or_else(|_| fallback())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MessageBody, Parser};
    use cim_types::{CimInstance, CimInstanceName, CimType};

    #[test]
    fn intrinsic_envelope_roundtrips_through_parser() {
        let props = vec!["Name".to_string(), "Status".to_string()];
        let body = RequestBuilder::intrinsic("1001", "EnumerateInstances", "root/cimv2")
            .iparam_classname("ClassName", Some("CIM_Foo"))
            .iparam_bool("DeepInheritance", Some(true))
            .iparam_bool("IncludeQualifiers", None)
            .iparam_strings("PropertyList", Some(&props))
            .to_bytes();
        let text = std::str::from_utf8(&body).expect("utf8");
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\" ?>"));

        let msg = Parser::new().parse_document(&body).expect("parse");
        assert_eq!(msg.id, "1001");
        let MessageBody::Request(call) = msg.body else {
            panic!("expected request");
        };
        assert_eq!(call.name, "EnumerateInstances");
        assert_eq!(call.namespace.as_deref(), Some("root/cimv2"));
        let names: Vec<&str> = call.iparams.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["ClassName", "DeepInheritance", "PropertyList"]);
    }

    #[test]
    fn extrinsic_envelope_drops_host() {
        let target = ObjectPath::Instance(
            CimInstanceName::new("CIM_Foo")
                .key("Id", 3u32)
                .with_namespace("root/cimv2")
                .with_host("server"),
        );
        let inst = CimInstance::new("CIM_Arg")
            .with_property("X", true)
            .expect("property");
        let embedded = CimValue::Instance(Box::new(inst));
        let body = RequestBuilder::extrinsic("7", "Reset", &target)
            .param("Force", Some(&CimValue::Boolean(true)))
            .param("Arg", Some(&embedded))
            .param("Unset", None)
            .to_bytes();
        let text = std::str::from_utf8(&body).expect("utf8");
        assert!(!text.contains("server"));
        assert!(text.contains("EmbeddedObject=\"instance\""));

        let msg = Parser::new().parse_document(&body).expect("parse");
        let MessageBody::Request(call) = msg.body else {
            panic!("expected request");
        };
        assert_eq!(call.namespace.as_deref(), Some("root/cimv2"));
        assert_eq!(call.params.len(), 3);
        assert_eq!(call.params[0].param_type, Some(CimType::Boolean));
        assert_eq!(call.params[0].value, Some(CimValue::Boolean(true)));
        assert!(matches!(&call.params[1].value, Some(CimValue::Instance(i)) if i.classname == "CIM_Arg"));
        assert_eq!(call.params[2].value, None);
    }

    #[test]
    fn export_envelope() {
        let body = RequestBuilder::export("9", "ExportIndication")
            .iparam("NewIndication", Some(CimInstance::new("CIM_Alert").to_element()))
            .to_bytes();
        let text = std::str::from_utf8(&body).expect("utf8");
        assert!(text.contains("<SIMPLEEXPREQ><EXPMETHODCALL NAME=\"ExportIndication\">"));
        let msg = Parser::new().parse_document(&body).expect("parse");
        assert!(matches!(msg.body, MessageBody::Request(ref c) if c.iparams.len() == 1));
    }

    #[test]
    fn pretty_print_indents() {
        let out = pretty_print(b"<A><B x=\"1\"/></A>");
        assert!(out.contains("\n  <B"), "{out}");
        assert_eq!(pretty_print(b"<A><B></A>"), "<A><B></A>");
    }
}
