//! HTTP POST exchange over reqwest.
//!
//! The client API is blocking: [`HttpTransport`] owns a current-thread
//! tokio runtime and drives each request to completion on it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use fastrand::Rng;
use reqwest::{redirect, Certificate, Client, Identity, Proxy};
use tokio::runtime::{Builder, Runtime};
use tokio::time;
use tracing::{debug, trace, warn};

use crate::{consts, TransportError};

/// Raw HTTP reply, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// e.g. `HTTP/1.1`.
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// One POST exchange with a WBEM server.
pub trait Transport: Send {
    /// POST `body` to `url` with `headers`. Non-200 replies are returned,
    /// not raised; only failures to complete the exchange are errors.
    fn post(
        &mut self,
        url: &str,
        headers: &[(String, String)],
        body: Bytes,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, TransportError>;

    /// Release the underlying session. Later calls to `post` fail.
    fn close(&mut self) {}
}

/// TLS and proxy settings for [`HttpTransport`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportConfig {
    /// PEM bundle of CA certificates trusted in addition to the system roots.
    pub ca_certs: Option<PathBuf>,
    /// PEM client certificate.
    pub cert_file: Option<PathBuf>,
    /// PEM private key for `cert_file`, if not contained in it.
    pub key_file: Option<PathBuf>,
    /// Skip server certificate verification.
    pub no_verification: bool,
    /// Proxy URL by scheme (`http`, `https`, or anything else for all).
    pub proxies: Vec<(String, String)>,
}

pub struct HttpTransport {
    client: Option<Client>,
    runtime: Runtime,
    rng: Rng,
    secure: bool,
}

fn read_pem(what: &str, path: &Path) -> Result<Vec<u8>, TransportError> {
    std::fs::read(path).map_err(|err| {
        TransportError::Connection(format!("cannot read {what} {}: {err}", path.display()))
    })
}

impl HttpTransport {
    /// Build the HTTP client. `secure` only affects error messages; the
    /// scheme of each request URL selects TLS.
    pub fn new(config: &TransportConfig, secure: bool) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .connect_timeout(consts::CONNECT_TIMEOUT)
            .redirect(redirect::Policy::limited(consts::MAX_REDIRECTS))
            .danger_accept_invalid_certs(config.no_verification);

        if let Some(path) = &config.ca_certs {
            let pem = read_pem("CA certificate file", path)?;
            let cert = Certificate::from_pem(&pem).map_err(|err| {
                TransportError::Connection(format!("invalid CA certificate {}: {err}", path.display()))
            })?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(cert_path) = &config.cert_file {
            let mut pem = read_pem("client certificate", cert_path)?;
            if let Some(key_path) = &config.key_file {
                pem.push(b'\n');
                pem.extend(read_pem("client key", key_path)?);
            }
            let identity = Identity::from_pem(&pem).map_err(|err| {
                TransportError::Connection(format!("invalid client certificate: {err}"))
            })?;
            builder = builder.identity(identity);
        }
        for (scheme, url) in &config.proxies {
            let proxy = match scheme.as_str() {
                "http" => Proxy::http(url.as_str()),
                "https" => Proxy::https(url.as_str()),
                _ => Proxy::all(url.as_str()),
            }
            .map_err(|err| TransportError::Connection(format!("invalid proxy {url:?}: {err}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|err| {
            TransportError::Connection(format!("cannot create HTTP client: {err}"))
        })?;
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| TransportError::Connection(format!("cannot start I/O runtime: {err}")))?;
        Ok(Self {
            client: Some(client),
            runtime,
            rng: Rng::new(),
            secure,
        })
    }
}

impl Transport for HttpTransport {
    fn post(
        &mut self,
        url: &str,
        headers: &[(String, String)],
        body: Bytes,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, TransportError> {
        let client = self
            .client
            .clone()
            .ok_or_else(|| TransportError::Connection("HTTP session is closed".into()))?;
        let secure = self.secure;
        self.runtime.block_on(post_with_retry(
            &client,
            url,
            headers,
            body,
            timeout,
            secure,
            &mut self.rng,
        ))
    }

    fn close(&mut self) {
        self.client = None;
    }
}

async fn post_with_retry(
    client: &Client,
    url: &str,
    headers: &[(String, String)],
    body: Bytes,
    timeout: Option<Duration>,
    secure: bool,
    rng: &mut Rng,
) -> Result<HttpResponse, TransportError> {
    let mut attempt = 0usize;
    let mut connect_failures = 0usize;
    let mut read_failures = 0usize;
    loop {
        attempt += 1;
        let mut request = client.post(url).body(body.clone());
        for (name, value) in headers {
            // reqwest derives Content-Length from the body.
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        trace!(url, attempt, bytes = body.len(), "posting CIM-XML request");

        let err = match request.send().await {
            Ok(response) => match read_response(response).await {
                Ok(reply) => return Ok(reply),
                Err(err) => err,
            },
            Err(err) => err,
        };
        let reason = innermost_reason(&err);
        if err.is_timeout() {
            return Err(TransportError::Timeout(reason));
        }
        if err.is_connect() {
            connect_failures += 1;
            if connect_failures > consts::CONNECT_RETRIES {
                return Err(TransportError::Connection(with_tls_note(reason, secure)));
            }
            warn!(url, attempt, %reason, "connection failed, retrying");
        } else if err.is_body() || err.is_decode() {
            read_failures += 1;
            if read_failures > consts::READ_RETRIES {
                return Err(TransportError::Timeout(format!(
                    "giving up after {attempt} attempts: {reason}"
                )));
            }
            warn!(url, attempt, %reason, "reading reply failed, retrying");
        } else {
            return Err(TransportError::Connection(with_tls_note(reason, secure)));
        }
        let delay = backoff_delay(rng, attempt);
        debug!(attempt, delay = ?delay, "http retry backoff");
        time::sleep(delay).await;
    }
}

async fn read_response(response: reqwest::Response) -> Result<HttpResponse, reqwest::Error> {
    let status = response.status();
    let version = format!("{:?}", response.version());
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let body = response.bytes().await?;
    Ok(HttpResponse {
        version,
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or_default().to_string(),
        headers,
        body,
    })
}

fn backoff_delay(rng: &mut Rng, attempt: usize) -> Duration {
    let multiplier = 1u32 << attempt.saturating_sub(1).min(4);
    let base = consts::BACKOFF_FACTOR.saturating_mul(multiplier);
    let jitter = Duration::from_millis(rng.u64(..=consts::BACKOFF_JITTER.as_millis() as u64));
    base + jitter
}

/// Message of the innermost error in a `source()` chain, without the
/// wrapper text hyper puts in front of connect failures.
pub(crate) fn innermost_reason(err: &(dyn std::error::Error + 'static)) -> String {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    let text = current.to_string();
    text.strip_prefix("error trying to connect: ")
        .unwrap_or(&text)
        .trim()
        .to_string()
}

fn with_tls_note(reason: String, secure: bool) -> String {
    if secure {
        format!("{reason}; TLS library: rustls")
    } else {
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Layer(&'static str, Option<Box<Layer>>);

    impl fmt::Display for Layer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    impl std::error::Error for Layer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            self.1.as_deref().map(|l| l as &(dyn std::error::Error + 'static))
        }
    }

    #[test]
    fn innermost_reason_unwraps_chain() {
        let err = Layer(
            "request failed",
            Some(Box::new(Layer(
                "outer",
                Some(Box::new(Layer("error trying to connect: Connection refused", None))),
            ))),
        );
        assert_eq!(innermost_reason(&err), "Connection refused");
        assert_eq!(
            with_tls_note("refused".into(), true),
            "refused; TLS library: rustls"
        );
        assert_eq!(with_tls_note("refused".into(), false), "refused");
    }

    #[test]
    fn backoff_grows_and_is_bounded() {
        let mut rng = Rng::with_seed(7);
        let first = backoff_delay(&mut rng, 1);
        let second = backoff_delay(&mut rng, 2);
        assert!(first >= consts::BACKOFF_FACTOR);
        assert!(first <= consts::BACKOFF_FACTOR + consts::BACKOFF_JITTER);
        assert!(second >= consts::BACKOFF_FACTOR * 2);
        let late = backoff_delay(&mut rng, 50);
        assert!(late <= consts::BACKOFF_FACTOR * 16 + consts::BACKOFF_JITTER);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let reply = HttpResponse {
            version: "HTTP/1.1".into(),
            status: 200,
            reason: "OK".into(),
            headers: vec![("content-type".into(), "application/xml".into())],
            body: Bytes::new(),
        };
        assert_eq!(reply.header("Content-Type"), Some("application/xml"));
        assert_eq!(reply.header("CIMError"), None);
    }

    #[test]
    fn closed_transport_refuses_requests() {
        let mut transport =
            HttpTransport::new(&TransportConfig::default(), false).expect("client");
        transport.close();
        let err = transport
            .post("http://127.0.0.1:5988/cimom", &[], Bytes::new(), None)
            .unwrap_err();
        assert!(matches!(err, TransportError::Connection(msg) if msg.contains("closed")));
    }
}
