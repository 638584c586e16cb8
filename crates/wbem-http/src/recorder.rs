//! Operation recorders.
//!
//! The connection stages every operation into each attached recorder at
//! fixed points: the call and its arguments, the HTTP request, the reply
//! status line and headers, the reply body, and finally the result. Fields
//! of the reply are staged as `None` before the exchange so a failed
//! exchange never leaves data from a previous operation behind.

use bytes::Bytes;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedHttpRequest {
    pub version: String,
    pub url: String,
    pub target: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedHttpResponse {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

/// Result of one operation in display form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Success(String),
    Failure(String),
}

pub trait OperationRecorder: Send {
    fn enabled(&self) -> bool;
    fn enable(&mut self);
    fn disable(&mut self);

    /// Drop anything staged so far.
    fn reset(&mut self) {}

    /// Operation name and its arguments in display form.
    fn stage_operation(&mut self, conn_id: &str, method: &str, args: &[(String, String)]);

    fn stage_http_request(&mut self, conn_id: &str, request: &StagedHttpRequest);

    /// Status line and headers, or `None` before (or without) a reply.
    fn stage_http_response1(&mut self, conn_id: &str, response: Option<&StagedHttpResponse>);

    /// Reply body, or `None` before (or without) a reply.
    fn stage_http_response2(&mut self, payload: Option<&[u8]>);

    fn stage_result(&mut self, outcome: &OperationOutcome);
}

/// Recorder that writes operations through `tracing`: calls and results at
/// `info`, HTTP traffic at `debug`.
#[derive(Debug, Clone)]
pub struct TracingRecorder {
    enabled: bool,
    max_len: Option<usize>,
    conn_id: String,
    method: String,
}

impl TracingRecorder {
    /// `max_len` limits logged payloads and arguments, in characters.
    pub fn new(max_len: Option<usize>) -> Self {
        Self {
            enabled: true,
            max_len,
            conn_id: String::new(),
            method: String::new(),
        }
    }

    fn clip(&self, text: &str) -> String {
        match self.max_len {
            Some(max) if text.chars().count() > max => {
                let mut out: String = text.chars().take(max).collect();
                out.push_str("...");
                out
            }
            _ => text.to_string(),
        }
    }
}

impl Default for TracingRecorder {
    fn default() -> Self {
        Self::new(None)
    }
}

impl OperationRecorder for TracingRecorder {
    fn enabled(&self) -> bool {
        self.enabled
    }

    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn reset(&mut self) {
        self.conn_id.clear();
        self.method.clear();
    }

    fn stage_operation(&mut self, conn_id: &str, method: &str, args: &[(String, String)]) {
        self.conn_id = conn_id.to_string();
        self.method = method.to_string();
        if !self.enabled {
            return;
        }
        let args = args
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        info!(conn_id, method, args = %self.clip(&args), "operation request");
    }

    fn stage_http_request(&mut self, conn_id: &str, request: &StagedHttpRequest) {
        if !self.enabled {
            return;
        }
        let payload = String::from_utf8_lossy(&request.payload);
        debug!(
            conn_id,
            url = %request.url,
            target = %request.target,
            headers = ?request.headers,
            payload = %self.clip(&payload),
            "http request"
        );
    }

    fn stage_http_response1(&mut self, conn_id: &str, response: Option<&StagedHttpResponse>) {
        if !self.enabled {
            return;
        }
        if let Some(response) = response {
            debug!(
                conn_id,
                status = response.status,
                reason = %response.reason,
                headers = ?response.headers,
                "http response"
            );
        }
    }

    fn stage_http_response2(&mut self, payload: Option<&[u8]>) {
        if !self.enabled {
            return;
        }
        if let Some(payload) = payload {
            let text = String::from_utf8_lossy(payload);
            debug!(conn_id = %self.conn_id, payload = %self.clip(&text), "http response body");
        }
    }

    fn stage_result(&mut self, outcome: &OperationOutcome) {
        if !self.enabled {
            return;
        }
        match outcome {
            OperationOutcome::Success(text) => {
                info!(conn_id = %self.conn_id, method = %self.method, result = %self.clip(text), "operation result");
            }
            OperationOutcome::Failure(text) => {
                warn!(conn_id = %self.conn_id, method = %self.method, error = %self.clip(text), "operation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_marks_truncation() {
        let recorder = TracingRecorder::new(Some(4));
        assert_eq!(recorder.clip("abcdef"), "abcd...");
        assert_eq!(recorder.clip("abc"), "abc");
        assert_eq!(TracingRecorder::default().clip("abcdef"), "abcdef");
    }

    #[test]
    fn staging_works_when_disabled() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let mut recorder = TracingRecorder::new(Some(16));
        recorder.disable();
        assert!(!recorder.enabled());
        recorder.stage_operation("1-1", "GetClass", &[("ClassName".into(), "CIM_Foo".into())]);
        recorder.stage_http_response1("1-1", None);
        recorder.stage_http_response2(None);
        recorder.stage_result(&OperationOutcome::Failure("boom".into()));
        assert_eq!(recorder.method, "GetClass");

        recorder.enable();
        recorder.stage_result(&OperationOutcome::Success("ok".into()));
        recorder.reset();
        assert!(recorder.method.is_empty());
    }
}
