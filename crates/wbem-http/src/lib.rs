//! CIM-XML over HTTP: endpoint URLs, the POST exchange with retries and the
//! classification of failed exchanges.

pub mod classify;
pub mod exchange;
pub mod recorder;
pub mod stats;
pub mod transport;
pub mod url;

use std::fmt;

use thiserror::Error;

pub use classify::check_response;
pub use exchange::{wbem_request, CimHeaders, Exchange, ExchangeConfig, ExchangeError};
pub use recorder::{OperationOutcome, OperationRecorder, StagedHttpRequest, StagedHttpResponse, TracingRecorder};
pub use stats::{OperationStats, OperationTimer, Statistics};
pub use transport::{HttpResponse, HttpTransport, Transport, TransportConfig};
pub use url::{parse_url, ParsedUrl, UrlError};

/// Transport constants.
pub mod consts {
    use std::time::Duration;

    pub const DEFAULT_SCHEME: &str = "http";
    /// IANA port for CIM-XML over HTTP.
    pub const HTTP_PORT: u16 = 5988;
    /// IANA port for CIM-XML over HTTPS.
    pub const HTTPS_PORT: u16 = 5989;
    /// Request target of every CIM-XML POST.
    pub const CIMOM_PATH: &str = "/cimom";
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Automatic retries after a failed connection attempt.
    pub const CONNECT_RETRIES: usize = 2;
    /// Automatic retries after a failure while reading the reply.
    pub const READ_RETRIES: usize = 2;
    pub const MAX_REDIRECTS: usize = 2;
    /// Base delay of the exponential retry backoff.
    pub const BACKOFF_FACTOR: Duration = Duration::from_millis(100);
    /// Upper bound for the random jitter added to each backoff (inclusive).
    pub const BACKOFF_JITTER: Duration = Duration::from_millis(20);
    pub const CONTENT_TYPE: &str = "application/xml; charset=\"utf-8\"";
}

/// Non-200 HTTP reply to a CIM-XML request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    pub status: u16,
    pub reason: String,
    /// Value of the `CIMError` response header.
    pub cim_error: Option<String>,
    /// Vendor detail headers such as `PGErrorDetail`, URL-decoded.
    pub details: Vec<(String, String)>,
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.status, self.reason)?;
        if let Some(cim_error) = &self.cim_error {
            write!(f, ", CIMError: {cim_error}")?;
        }
        for (name, value) in &self.details {
            write!(f, ", {name}: {value}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Socket, TLS or other transport-level failure.
    #[error("connection error: {0}")]
    Connection(String),
    /// HTTP 401.
    #[error("authentication error: {0}")]
    Auth(String),
    /// Read timeout or exhausted retry budget.
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("HTTP error {0}")]
    Http(HttpFailure),
    /// A 200 reply whose headers are not those of a CIM-XML response.
    #[error("HTTP header error: {0}")]
    Header(String),
}
