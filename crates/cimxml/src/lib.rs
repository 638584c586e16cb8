//! CIM-XML wire format: XML tokenizer, DSP0201 grammar parser, request
//! envelopes and the CIM status code table.

pub mod request;
pub mod status;
pub mod tupleparse;
pub mod tupletree;

use cim_types::CimError;
use thiserror::Error;

pub use request::{pretty_print, RequestBuilder};
pub use status::CimStatus;
pub use tupleparse::{
    ErrorInfo, IParamValue, Item, Message, MessageBody, MethodCall, MethodKind, MethodResponse,
    ParamValue, Parsed, Parser, RawValue, ToleratedIssue,
};
pub use tupletree::xml_to_tupletree;

/// Which version attribute was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionKind {
    /// `CIMVERSION` on the `CIM` element.
    Cim,
    /// `DTDVERSION` on the `CIM` element.
    Dtd,
    /// `PROTOCOLVERSION` on the `MESSAGE` element.
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Ill-formed XML, invalid UTF-8 or characters not allowed in XML.
    #[error("XML error: {0}")]
    Xml(String),
    /// Well-formed XML that violates the CIM-XML grammar.
    #[error("CIM-XML error: {0}")]
    CimXml(String),
    /// A value outside the domain of its CIM type.
    #[error("value error: {0}")]
    Value(String),
    #[error("unsupported {kind:?} version: {message}")]
    Version { kind: VersionKind, message: String },
}

impl ParseError {
    pub(crate) fn cimxml<S: Into<String>>(msg: S) -> Self {
        ParseError::CimXml(msg.into())
    }
}

impl From<CimError> for ParseError {
    fn from(err: CimError) -> Self {
        match err {
            CimError::Value(msg) => ParseError::Value(msg),
            CimError::Type(msg) | CimError::Model(msg) => ParseError::CimXml(msg),
        }
    }
}
