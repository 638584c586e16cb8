//! One CIM-XML request/reply exchange: header framing, recorder staging and
//! reply classification on top of a [`Transport`].

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, trace};

use crate::classify::check_response;
use crate::recorder::{OperationRecorder, StagedHttpRequest, StagedHttpResponse};
use crate::transport::Transport;
use crate::{consts, TransportError};

/// CIM-XML extension headers of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CimHeaders {
    /// Intrinsic or extrinsic operation. `object` is the namespace, or the
    /// untyped object path for extrinsic calls.
    MethodCall { method: String, object: String },
    /// Export (indication delivery) request.
    Export { method: String },
}

impl CimHeaders {
    fn pairs(&self) -> Vec<(String, String)> {
        match self {
            CimHeaders::MethodCall { method, object } => vec![
                ("CIMOperation".into(), "MethodCall".into()),
                ("CIMMethod".into(), header_value(method)),
                ("CIMObject".into(), header_value(object)),
            ],
            CimHeaders::Export { method } => vec![
                ("CIMExport".into(), "MethodRequest".into()),
                ("CIMExportMethod".into(), header_value(method)),
            ],
        }
    }
}

/// Printable ASCII is sent as is; anything else is percent-encoded.
fn header_value(text: &str) -> String {
    if text.bytes().all(|b| (0x20..0x7f).contains(&b)) {
        text.to_string()
    } else {
        urlencoding::encode(text).into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeConfig<'a> {
    /// Normalized `scheme://host:port`.
    pub url: &'a str,
    pub conn_id: &'a str,
    /// `(user, password)` for HTTP Basic authentication.
    pub credentials: Option<(&'a str, &'a str)>,
    pub timeout: Option<Duration>,
}

/// A successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub body: Bytes,
    /// `WBEMServerResponseTime`, converted from microseconds.
    pub server_response_time: Option<Duration>,
}

/// A failed exchange, with the reply body if one arrived.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error}")]
pub struct ExchangeError {
    pub error: TransportError,
    pub reply: Option<Bytes>,
}

impl From<TransportError> for ExchangeError {
    fn from(error: TransportError) -> Self {
        Self { error, reply: None }
    }
}

/// POST `body` to `<url>/cimom` and classify the reply.
///
/// Recorders see the request, then the reply status line and headers, then
/// the reply body. Reply fields are staged as `None` before the exchange.
pub fn wbem_request(
    transport: &mut dyn Transport,
    config: &ExchangeConfig<'_>,
    cim_headers: &CimHeaders,
    body: Bytes,
    recorders: &mut [Box<dyn OperationRecorder>],
) -> Result<Exchange, ExchangeError> {
    let url = format!("{}{}", config.url, consts::CIMOM_PATH);
    let mut headers = vec![
        ("Content-type".to_string(), consts::CONTENT_TYPE.to_string()),
        ("Content-length".to_string(), body.len().to_string()),
    ];
    headers.extend(cim_headers.pairs());

    let staged = StagedHttpRequest {
        version: "HTTP/1.1".into(),
        url: config.url.to_string(),
        target: consts::CIMOM_PATH.to_string(),
        method: "POST".into(),
        headers: headers.clone(),
        payload: body.clone(),
    };
    for recorder in recorders.iter_mut() {
        recorder.stage_http_request(config.conn_id, &staged);
        recorder.stage_http_response1(config.conn_id, None);
        recorder.stage_http_response2(None);
    }

    // Credentials are added after staging so recorders never see them.
    if let Some((user, password)) = config.credentials {
        let token = STANDARD.encode(format!("{user}:{password}"));
        headers.push(("Authorization".into(), format!("Basic {token}")));
    }

    debug!(conn_id = config.conn_id, %url, bytes = body.len(), "sending CIM-XML request");
    trace!(conn_id = config.conn_id, payload = %String::from_utf8_lossy(&body), "request payload");
    let reply = transport.post(&url, &headers, body, config.timeout)?;
    debug!(
        conn_id = config.conn_id,
        status = reply.status,
        bytes = reply.body.len(),
        "received CIM-XML reply"
    );
    trace!(conn_id = config.conn_id, payload = %String::from_utf8_lossy(&reply.body), "reply payload");

    let staged = StagedHttpResponse {
        version: reply.version.clone(),
        status: reply.status,
        reason: reply.reason.clone(),
        headers: reply.headers.clone(),
    };
    for recorder in recorders.iter_mut() {
        recorder.stage_http_response1(config.conn_id, Some(&staged));
        recorder.stage_http_response2(Some(&reply.body));
    }

    match check_response(&reply) {
        Ok(server_response_time) => Ok(Exchange {
            body: reply.body,
            server_response_time,
        }),
        Err(error) => Err(ExchangeError {
            error,
            reply: Some(reply.body),
        }),
    }
}
