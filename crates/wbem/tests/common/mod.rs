//! Scripted transport for driving `WbemConnection` without a server.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use wbem::http::{HttpResponse, TransportError};
use wbem::{ConnectionConfig, Transport, WbemConnection};

#[derive(Debug, Clone)]
pub struct SentRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl SentRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn method(&self) -> &str {
        self.header("CIMMethod").unwrap_or_default()
    }
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Result<HttpResponse, TransportError>>,
    sent: Vec<SentRequest>,
}

/// Replies in order with queued responses and records every request.
#[derive(Clone, Default)]
pub struct FakeTransport(Arc<Mutex<Script>>);

impl FakeTransport {
    pub fn push(&self, reply: HttpResponse) -> &Self {
        self.0.lock().unwrap().replies.push_back(Ok(reply));
        self
    }

    pub fn push_err(&self, err: TransportError) -> &Self {
        self.0.lock().unwrap().replies.push_back(Err(err));
        self
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.0.lock().unwrap().sent.clone()
    }

    /// Requests sent for one CIM method.
    pub fn count(&self, method: &str) -> usize {
        self.sent().iter().filter(|r| r.method() == method).count()
    }

    pub fn connect(&self, config: ConnectionConfig) -> WbemConnection {
        let fake = self.clone();
        WbemConnection::with_transport("http://srv", config, move || {
            Ok(Box::new(fake.clone()) as Box<dyn Transport>)
        })
        .unwrap()
    }
}

impl Transport for FakeTransport {
    fn post(
        &mut self,
        url: &str,
        headers: &[(String, String)],
        body: Bytes,
        _timeout: Option<Duration>,
    ) -> Result<HttpResponse, TransportError> {
        let mut script = self.0.lock().unwrap();
        script.sent.push(SentRequest {
            url: url.to_string(),
            headers: headers.to_vec(),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
        script
            .replies
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connection("no scripted reply".into())))
    }
}

pub fn http_reply(status: u16, headers: &[(&str, &str)], body: String) -> HttpResponse {
    HttpResponse {
        version: "HTTP/1.1".into(),
        status,
        reason: if status == 200 { "OK".into() } else { "Error".into() },
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        body: Bytes::from(body),
    }
}

fn envelope(body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <CIM CIMVERSION=\"2.0\" DTDVERSION=\"2.0\">\
         <MESSAGE ID=\"1001\" PROTOCOLVERSION=\"1.0\"><SIMPLERSP>{body}</SIMPLERSP></MESSAGE></CIM>"
    )
}

/// 200 reply carrying an IMETHODRESPONSE.
pub fn imethod(name: &str, inner: &str) -> HttpResponse {
    http_reply(
        200,
        &[("Content-Type", "application/xml; charset=\"utf-8\"")],
        envelope(&format!("<IMETHODRESPONSE NAME=\"{name}\">{inner}</IMETHODRESPONSE>")),
    )
}

pub fn cim_error(name: &str, code: u32) -> HttpResponse {
    imethod(name, &format!("<ERROR CODE=\"{code}\" DESCRIPTION=\"scripted\"/>"))
}

pub fn pull_params(eos: bool, context: Option<&str>) -> String {
    let mut out = format!(
        "<PARAMVALUE NAME=\"EndOfSequence\" PARAMTYPE=\"boolean\"><VALUE>{}</VALUE></PARAMVALUE>",
        if eos { "TRUE" } else { "FALSE" }
    );
    if let Some(context) = context {
        out.push_str(&format!(
            "<PARAMVALUE NAME=\"EnumerationContext\" PARAMTYPE=\"string\"><VALUE>{context}</VALUE></PARAMVALUE>"
        ));
    }
    out
}

pub fn instance(class: &str, name: &str) -> String {
    format!(
        "<INSTANCE CLASSNAME=\"{class}\">\
         <PROPERTY NAME=\"Name\" TYPE=\"string\"><VALUE>{name}</VALUE></PROPERTY></INSTANCE>"
    )
}

pub fn instance_name(class: &str, name: &str) -> String {
    format!(
        "<INSTANCENAME CLASSNAME=\"{class}\">\
         <KEYBINDING NAME=\"Name\"><KEYVALUE VALUETYPE=\"string\">{name}</KEYVALUE></KEYBINDING>\
         </INSTANCENAME>"
    )
}

/// VALUE.NAMEDINSTANCE as returned by EnumerateInstances.
pub fn named_instance(class: &str, name: &str) -> String {
    format!(
        "<VALUE.NAMEDINSTANCE>{}{}</VALUE.NAMEDINSTANCE>",
        instance_name(class, name),
        instance(class, name)
    )
}

/// VALUE.INSTANCEWITHPATH as returned by the pull operations.
pub fn instance_with_path(class: &str, name: &str) -> String {
    format!(
        "<VALUE.INSTANCEWITHPATH><INSTANCEPATH><NAMESPACEPATH><HOST>srv</HOST>\
         <LOCALNAMESPACEPATH><NAMESPACE NAME=\"root\"/><NAMESPACE NAME=\"cimv2\"/>\
         </LOCALNAMESPACEPATH></NAMESPACEPATH>{}</INSTANCEPATH>{}</VALUE.INSTANCEWITHPATH>",
        instance_name(class, name),
        instance(class, name)
    )
}

pub fn returning(items: &[String]) -> String {
    format!("<IRETURNVALUE>{}</IRETURNVALUE>", items.concat())
}
