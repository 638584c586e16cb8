//! CIM object model: typed values, paths, classes, instances and qualifiers.
//!
//! Every object can render itself as a CIM-XML [`Element`] (DSP0201), which is
//! the same tree type the `cimxml` crate produces when reading responses.

pub mod datetime;
pub mod element;
pub mod nocase;
pub mod objects;
pub mod path;
pub mod types;
pub mod value;

use thiserror::Error;

pub use datetime::CimDateTime;
pub use element::{Content, Element};
pub use nocase::NocaseMap;
pub use objects::{
    CimClass, CimInstance, CimMethod, CimParameter, CimProperty, CimQualifier,
    CimQualifierDeclaration, EmbeddedObject, Scope,
};
pub use path::{CimClassName, CimInstanceName, ObjectPath};
pub use types::CimType;
pub use value::CimValue;

/// Errors raised by the object model itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CimError {
    /// A value is outside the domain of its CIM type.
    #[error("value error: {0}")]
    Value(String),
    /// A value has the wrong kind for the requested operation.
    #[error("type error: {0}")]
    Type(String),
    /// Instance data does not match the declared class shape.
    #[error("model error: {0}")]
    Model(String),
}

impl CimError {
    pub(crate) fn value<S: Into<String>>(msg: S) -> Self {
        CimError::Value(msg.into())
    }

    pub(crate) fn model<S: Into<String>>(msg: S) -> Self {
        CimError::Model(msg.into())
    }
}
