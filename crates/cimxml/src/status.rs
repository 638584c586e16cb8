//! CIM status codes (DSP0200, table "CIM status codes").

use std::fmt;

/// Status code carried by an `ERROR` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CimStatus {
    Failed,
    AccessDenied,
    InvalidNamespace,
    InvalidParameter,
    InvalidClass,
    NotFound,
    NotSupported,
    ClassHasChildren,
    ClassHasInstances,
    InvalidSuperclass,
    AlreadyExists,
    NoSuchProperty,
    TypeMismatch,
    QueryLanguageNotSupported,
    InvalidQuery,
    MethodNotAvailable,
    MethodNotFound,
    UnexpectedResponse,
    InvalidResponseDestination,
    NamespaceNotEmpty,
    InvalidEnumerationContext,
    InvalidOperationTimeout,
    PullHasBeenAbandoned,
    PullCannotBeAbandoned,
    FilteredEnumerationNotSupported,
    ContinuationOnErrorNotSupported,
    ServerLimitsExceeded,
    ServerIsShuttingDown,
    /// A code outside the table.
    Unknown(u32),
}

/// `(status, raw code, symbolic name, default description)`.
const TABLE: [(CimStatus, u32, &str, &str); 28] = [
    (CimStatus::Failed, 1, "CIM_ERR_FAILED", "A general error occurred"),
    (CimStatus::AccessDenied, 2, "CIM_ERR_ACCESS_DENIED", "Resource not available"),
    (CimStatus::InvalidNamespace, 3, "CIM_ERR_INVALID_NAMESPACE", "The target namespace does not exist"),
    (CimStatus::InvalidParameter, 4, "CIM_ERR_INVALID_PARAMETER", "Parameter value(s) invalid"),
    (CimStatus::InvalidClass, 5, "CIM_ERR_INVALID_CLASS", "The specified class does not exist"),
    (CimStatus::NotFound, 6, "CIM_ERR_NOT_FOUND", "Requested object could not be found"),
    (CimStatus::NotSupported, 7, "CIM_ERR_NOT_SUPPORTED", "Operation not supported"),
    (CimStatus::ClassHasChildren, 8, "CIM_ERR_CLASS_HAS_CHILDREN", "Class has subclasses"),
    (CimStatus::ClassHasInstances, 9, "CIM_ERR_CLASS_HAS_INSTANCES", "Class has instances"),
    (CimStatus::InvalidSuperclass, 10, "CIM_ERR_INVALID_SUPERCLASS", "Superclass does not exist"),
    (CimStatus::AlreadyExists, 11, "CIM_ERR_ALREADY_EXISTS", "Object already exists"),
    (CimStatus::NoSuchProperty, 12, "CIM_ERR_NO_SUCH_PROPERTY", "Property does not exist"),
    (CimStatus::TypeMismatch, 13, "CIM_ERR_TYPE_MISMATCH", "Value incompatible with type"),
    (CimStatus::QueryLanguageNotSupported, 14, "CIM_ERR_QUERY_LANGUAGE_NOT_SUPPORTED", "Query language not supported"),
    (CimStatus::InvalidQuery, 15, "CIM_ERR_INVALID_QUERY", "Query not valid"),
    (CimStatus::MethodNotAvailable, 16, "CIM_ERR_METHOD_NOT_AVAILABLE", "Extrinsic method not executed"),
    (CimStatus::MethodNotFound, 17, "CIM_ERR_METHOD_NOT_FOUND", "Extrinsic method does not exist"),
    (CimStatus::UnexpectedResponse, 18, "CIM_ERR_UNEXPECTED_RESPONSE", "Unexpected response from the target"),
    (CimStatus::InvalidResponseDestination, 19, "CIM_ERR_INVALID_RESPONSE_DESTINATION", "Invalid response destination"),
    (CimStatus::NamespaceNotEmpty, 20, "CIM_ERR_NAMESPACE_NOT_EMPTY", "Namespace not empty"),
    (CimStatus::InvalidEnumerationContext, 21, "CIM_ERR_INVALID_ENUMERATION_CONTEXT", "Enumeration context is invalid"),
    (CimStatus::InvalidOperationTimeout, 22, "CIM_ERR_INVALID_OPERATION_TIMEOUT", "Operation timeout not supported"),
    (CimStatus::PullHasBeenAbandoned, 23, "CIM_ERR_PULL_HAS_BEEN_ABANDONED", "Pull operation has been abandoned"),
    (CimStatus::PullCannotBeAbandoned, 24, "CIM_ERR_PULL_CANNOT_BE_ABANDONED", "Attempt to abandon a pull operation failed"),
    (CimStatus::FilteredEnumerationNotSupported, 25, "CIM_ERR_FILTERED_ENUMERATION_NOT_SUPPORTED", "Filtered pulled enumeration not supported"),
    (CimStatus::ContinuationOnErrorNotSupported, 26, "CIM_ERR_CONTINUATION_ON_ERROR_NOT_SUPPORTED", "WBEM server does not support continuation on error"),
    (CimStatus::ServerLimitsExceeded, 27, "CIM_ERR_SERVER_LIMITS_EXCEEDED", "WBEM server limits exceeded"),
    (CimStatus::ServerIsShuttingDown, 28, "CIM_ERR_SERVER_IS_SHUTTING_DOWN", "WBEM server is shutting down"),
];

impl CimStatus {
    /// Convert from the `CODE` attribute value.
    pub fn from_raw(raw: u32) -> Self {
        TABLE
            .iter()
            .find(|(_, code, _, _)| *code == raw)
            .map(|(status, _, _, _)| *status)
            .unwrap_or(CimStatus::Unknown(raw))
    }

    pub fn to_raw(self) -> u32 {
        match self {
            CimStatus::Unknown(code) => code,
            known => TABLE
                .iter()
                .find(|(status, _, _, _)| *status == known)
                .map(|(_, code, _, _)| *code)
                .unwrap_or(0),
        }
    }

    fn entry(self) -> Option<&'static (CimStatus, u32, &'static str, &'static str)> {
        TABLE.iter().find(|(status, _, _, _)| *status == self)
    }

    /// Symbolic name, e.g. `CIM_ERR_NOT_SUPPORTED`.
    pub fn name(self) -> &'static str {
        self.entry().map(|e| e.2).unwrap_or("Unknown status code")
    }

    /// Default human readable description.
    pub fn description(self) -> &'static str {
        self.entry().map(|e| e.3).unwrap_or("Unknown status code")
    }
}

impl fmt::Display for CimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.to_raw(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_roundtrip() {
        for raw in 1..=28 {
            let status = CimStatus::from_raw(raw);
            assert!(!matches!(status, CimStatus::Unknown(_)), "code {raw}");
            assert_eq!(status.to_raw(), raw);
            assert!(status.name().starts_with("CIM_ERR_"));
        }
        assert_eq!(CimStatus::from_raw(7), CimStatus::NotSupported);
        assert_eq!(CimStatus::from_raw(99), CimStatus::Unknown(99));
        assert_eq!(CimStatus::Unknown(99).name(), "Unknown status code");
        assert_eq!(CimStatus::NotFound.to_string(), "6 (CIM_ERR_NOT_FOUND)");
    }
}
