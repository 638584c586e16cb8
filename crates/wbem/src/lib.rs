#![cfg_attr(docsrs, feature(doc_cfg))]
//! WBEM client facade: CIM operations over CIM-XML/HTTP.
//!
//! A [`WbemConnection`] talks to one WBEM server. It offers the traditional
//! intrinsic operations, extrinsic method invocation, the pull operations
//! and `iter_*` cursors that use pull operations when the server has them.
//!
//! ```rust,no_run
//! use wbem::{ConnectionConfig, IterOptions, WbemConnection};
//!
//! # fn run() -> Result<(), wbem::Error> {
//! let config = ConnectionConfig {
//!     credentials: Some(("user".into(), "secret".into())),
//!     ..ConnectionConfig::default()
//! };
//! let mut conn = WbemConnection::new("https://cimom.example.com", config)?;
//! for instance in conn.iter_enumerate_instances(
//!     None,
//!     "CIM_ComputerSystem",
//!     &Default::default(),
//!     &IterOptions::default(),
//! )? {
//!     let instance = instance?;
//!     println!("{}", instance.classname);
//! }
//! # Ok(())
//! # }
//! ```

pub use cim_types;
pub use cimxml;
pub use wbem_http as http;

pub mod capability;
pub mod connection;
pub mod error;
pub mod iter;
pub mod operations;
pub mod options;
pub mod pull;
mod subclass;

pub use capability::{Capabilities, PullFamily};
pub use cim_types::{
    CimClass, CimClassName, CimInstance, CimInstanceName, CimQualifierDeclaration, CimValue,
    NocaseMap, ObjectPath,
};
pub use cimxml::{CimStatus, ToleratedIssue};
pub use connection::{ConnectionConfig, TransportFactory, WbemConnection, DEFAULT_NAMESPACE};
pub use error::{CimStatusError, Error, ErrorKind, ParseErrorKind};
pub use iter::EnumerationCursor;
pub use operations::{AssociatedObject, MethodResult};
pub use options::{
    AssociatorsOptions, EnumerateClassesOptions, EnumerateInstancesOptions, GetClassOptions,
    GetInstanceOptions, IterOptions, ModifyInstanceOptions, OpenOptions, ReferencesOptions,
    DEFAULT_ITER_MAX_OBJECT_COUNT,
};
pub use pull::{EnumerationContext, PullResult, QueryResult};
pub use wbem_http::{OperationRecorder, Statistics, TracingRecorder, Transport};
