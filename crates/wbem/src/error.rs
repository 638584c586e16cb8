//! Client error taxonomy.

use std::fmt;

use bytes::Bytes;
use cim_types::{CimError, CimInstance};
use cimxml::{CimStatus, ErrorInfo, ParseError, VersionKind};
use thiserror::Error;
use wbem_http::{HttpFailure, TransportError, UrlError};

/// Which layer rejected a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Well-formed XML that violates the CIM-XML grammar.
    CimXml,
    /// Ill-formed XML, invalid UTF-8 or characters not allowed in XML.
    Xml,
    /// HTTP headers that do not belong to a CIM-XML reply.
    Header,
}

/// Operation failure reported by the server in an `ERROR` element.
#[derive(Debug, Clone, PartialEq)]
pub struct CimStatusError {
    pub status: CimStatus,
    pub description: Option<String>,
    pub instances: Vec<CimInstance>,
}

impl CimStatusError {
    pub fn new(status: CimStatus, description: Option<String>) -> Self {
        Self {
            status,
            description,
            instances: Vec::new(),
        }
    }

    pub fn code(&self) -> u32 {
        self.status.to_raw()
    }

    /// Server description, or the default text for the status code.
    pub fn description(&self) -> &str {
        self.description
            .as_deref()
            .unwrap_or_else(|| self.status.description())
    }
}

impl From<ErrorInfo> for CimStatusError {
    fn from(info: ErrorInfo) -> Self {
        Self {
            status: info.status(),
            description: info.description,
            instances: info.instances,
        }
    }
}

impl fmt::Display for CimStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.description())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("HTTP error {0}")]
    Http(HttpFailure),
    #[error("{kind:?} parse error: {message}")]
    Parse { kind: ParseErrorKind, message: String },
    #[error("unsupported {kind:?} version: {message}")]
    Version { kind: VersionKind, message: String },
    #[error("CIM error {0}")]
    Cim(CimStatusError),
    /// Instance data does not match its class declaration.
    #[error("model error: {0}")]
    Model(String),
    /// Caller input or a reply value outside its domain.
    #[error("value error: {0}")]
    Value(String),
    #[error("type error: {0}")]
    Type(String),
    /// The connection was closed with [`crate::WbemConnection::close`].
    #[error("connection is closed")]
    Closed,
}

/// Client error, with the raw request and reply of the failed operation
/// when there were any.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}")]
pub struct Error {
    kind: ErrorKind,
    request: Option<Bytes>,
    response: Option<Bytes>,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    /// Request payload that produced this error.
    pub fn request(&self) -> Option<&[u8]> {
        self.request.as_deref()
    }

    /// Reply payload, if the exchange got that far.
    pub fn response(&self) -> Option<&[u8]> {
        self.response.as_deref()
    }

    pub fn cim_status(&self) -> Option<&CimStatusError> {
        match &self.kind {
            ErrorKind::Cim(err) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn value<S: Into<String>>(msg: S) -> Self {
        ErrorKind::Value(msg.into()).into()
    }

    pub(crate) fn cimxml<S: Into<String>>(msg: S) -> Self {
        ErrorKind::Parse {
            kind: ParseErrorKind::CimXml,
            message: msg.into(),
        }
        .into()
    }

    /// Attach payloads, keeping any that are already set.
    pub(crate) fn with_payload(mut self, request: Option<Bytes>, response: Option<Bytes>) -> Self {
        if self.request.is_none() {
            self.request = request;
        }
        if self.response.is_none() {
            self.response = response;
        }
        self
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            request: None,
            response: None,
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        let kind = match err {
            ParseError::Xml(message) => ErrorKind::Parse {
                kind: ParseErrorKind::Xml,
                message,
            },
            ParseError::CimXml(message) => ErrorKind::Parse {
                kind: ParseErrorKind::CimXml,
                message,
            },
            ParseError::Value(message) => ErrorKind::Value(message),
            ParseError::Version { kind, message } => ErrorKind::Version { kind, message },
        };
        kind.into()
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        let kind = match err {
            TransportError::Connection(msg) => ErrorKind::Connection(msg),
            TransportError::Auth(msg) => ErrorKind::Auth(msg),
            TransportError::Timeout(msg) => ErrorKind::Timeout(msg),
            TransportError::Http(failure) => ErrorKind::Http(failure),
            TransportError::Header(message) => ErrorKind::Parse {
                kind: ParseErrorKind::Header,
                message,
            },
        };
        kind.into()
    }
}

impl From<CimError> for Error {
    fn from(err: CimError) -> Self {
        let kind = match err {
            CimError::Value(msg) => ErrorKind::Value(msg),
            CimError::Type(msg) => ErrorKind::Type(msg),
            CimError::Model(msg) => ErrorKind::Model(msg),
        };
        kind.into()
    }
}

impl From<UrlError> for Error {
    fn from(err: UrlError) -> Self {
        ErrorKind::Value(err.to_string()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_uses_default_description() {
        let err = CimStatusError::new(CimStatus::NotFound, None);
        assert_eq!(err.code(), 6);
        assert_eq!(
            err.to_string(),
            "6 (CIM_ERR_NOT_FOUND): Requested object could not be found"
        );
        let err = CimStatusError::new(CimStatus::Failed, Some("disk on fire".into()));
        assert_eq!(err.description(), "disk on fire");
    }

    #[test]
    fn lower_layer_errors_map_to_kinds() {
        let err: Error = ParseError::Xml("bad".into()).into();
        assert!(matches!(
            err.kind(),
            ErrorKind::Parse {
                kind: ParseErrorKind::Xml,
                ..
            }
        ));
        let err: Error = TransportError::Header("text/html".into()).into();
        assert!(matches!(
            err.kind(),
            ErrorKind::Parse {
                kind: ParseErrorKind::Header,
                ..
            }
        ));
        let err: Error = CimError::Model("undeclared".into()).into();
        assert!(matches!(err.kind(), ErrorKind::Model(_)));
    }

    #[test]
    fn payloads_are_attached_once() {
        let err = Error::value("x")
            .with_payload(Some(Bytes::from_static(b"req")), None)
            .with_payload(Some(Bytes::from_static(b"other")), Some(Bytes::from_static(b"rsp")));
        assert_eq!(err.request(), Some(&b"req"[..]));
        assert_eq!(err.response(), Some(&b"rsp"[..]));
        assert_eq!(err.to_string(), "value error: x");
    }
}
