//! Connection to one WBEM server.
//!
//! A [`WbemConnection`] owns its HTTP session and runs one operation at a
//! time. Every public operation goes through [`WbemConnection::operation`],
//! which stages the call into the attached recorders, times it, attaches the
//! raw request and reply to any error and stages the result, on every exit
//! path.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cim_types::{CimClassName, CimInstanceName, CimValue, ObjectPath};
use cimxml::{pretty_print, Item, MessageBody, MethodKind, MethodResponse, Parser, RequestBuilder, ToleratedIssue};
use tracing::{debug, info};
use wbem_http::{
    parse_url, wbem_request, CimHeaders, ExchangeConfig, HttpTransport, OperationOutcome,
    OperationRecorder, ParsedUrl, Statistics, Transport, TransportConfig, TransportError,
};

use crate::capability::Capabilities;
use crate::error::{Error, ErrorKind};

pub const DEFAULT_NAMESPACE: &str = "root/cimv2";

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Creates the HTTP session of a connection (and of its copies).
pub type TransportFactory =
    Arc<dyn Fn() -> Result<Box<dyn Transport>, TransportError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// `(user, password)` for HTTP Basic authentication.
    pub credentials: Option<(String, String)>,
    pub default_namespace: String,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_certs: Option<PathBuf>,
    pub no_verification: bool,
    /// Per-exchange timeout; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Proxy URL by scheme.
    pub proxies: Vec<(String, String)>,
    /// Initial state of every pull capability flag.
    pub use_pull: Option<bool>,
    pub stats_enabled: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            credentials: None,
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            cert_file: None,
            key_file: None,
            ca_certs: None,
            no_verification: false,
            timeout: None,
            proxies: Vec::new(),
            use_pull: None,
            stats_enabled: false,
        }
    }
}

impl ConnectionConfig {
    fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            ca_certs: self.ca_certs.clone(),
            cert_file: self.cert_file.clone(),
            key_file: self.key_file.clone(),
            no_verification: self.no_verification,
            proxies: self.proxies.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct LastExchange {
    request: Option<Bytes>,
    reply: Option<Bytes>,
    request_len: usize,
    reply_len: usize,
    operation_time: Option<Duration>,
    server_response_time: Option<Duration>,
}

/// `(name, value)` of one recorded operation argument.
pub(crate) fn arg(name: &str, value: impl fmt::Debug) -> (String, String) {
    (name.to_string(), format!("{value:?}"))
}

pub(crate) fn normalize_namespace(namespace: &str) -> String {
    namespace.trim_matches('/').to_string()
}

pub struct WbemConnection {
    url: ParsedUrl,
    config: ConnectionConfig,
    conn_id: String,
    factory: TransportFactory,
    transport: Option<Box<dyn Transport>>,
    pub(crate) capabilities: Capabilities,
    statistics: Statistics,
    recorders: Vec<Box<dyn OperationRecorder>>,
    message_seq: u64,
    debug: bool,
    last: LastExchange,
    tolerated: Vec<ToleratedIssue>,
}

impl fmt::Debug for WbemConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WbemConnection")
            .field("conn_id", &self.conn_id)
            .field("url", &self.url.url)
            .field("default_namespace", &self.config.default_namespace)
            .field("closed", &self.transport.is_none())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl WbemConnection {
    /// Connect over HTTP(S). The URL is normalized with defaults, so
    /// `"srv"` means `http://srv:5988`.
    pub fn new(url: &str, config: ConnectionConfig) -> Result<Self, Error> {
        let url = parse_url(url, true)?;
        let transport_config = config.transport_config();
        let secure = url.is_secure();
        let factory: TransportFactory = Arc::new(move || {
            HttpTransport::new(&transport_config, secure)
                .map(|transport| Box::new(transport) as Box<dyn Transport>)
        });
        Self::build(url, config, factory)
    }

    /// Connect through a caller-supplied transport. The factory runs once
    /// now and once for every [`WbemConnection::copy`].
    pub fn with_transport<F>(url: &str, config: ConnectionConfig, factory: F) -> Result<Self, Error>
    where
        F: Fn() -> Result<Box<dyn Transport>, TransportError> + Send + Sync + 'static,
    {
        let url = parse_url(url, true)?;
        Self::build(url, config, Arc::new(factory))
    }

    fn build(url: ParsedUrl, mut config: ConnectionConfig, factory: TransportFactory) -> Result<Self, Error> {
        let transport = factory()?;
        config.default_namespace = normalize_namespace(&config.default_namespace);
        let seq = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        let conn_id = format!("{seq}-{}", std::process::id());
        info!(conn_id, url = %url.url, namespace = %config.default_namespace, "WBEM connection created");
        Ok(Self {
            capabilities: Capabilities::new(config.use_pull),
            statistics: Statistics::new(config.stats_enabled),
            url,
            config,
            conn_id,
            factory,
            transport: Some(transport),
            recorders: Vec::new(),
            message_seq: 0,
            debug: false,
            last: LastExchange::default(),
            tolerated: Vec::new(),
        })
    }

    /// New connection to the same server with the same configuration and a
    /// fresh session, statistics and capability flags. Recorders are not
    /// carried over.
    pub fn copy(&self) -> Result<Self, Error> {
        let mut copy = Self::build(self.url.clone(), self.config.clone(), Arc::clone(&self.factory))?;
        copy.debug = self.debug;
        Ok(copy)
    }

    /// Tear down the session. Every later operation fails with
    /// [`ErrorKind::Closed`].
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            debug!(conn_id = %self.conn_id, "WBEM connection closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Process-unique `counter-pid` identifier used in logs.
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Normalized `scheme://host:port`.
    pub fn url(&self) -> &str {
        &self.url.url
    }

    /// `host:port`.
    pub fn host(&self) -> &str {
        &self.url.hostport
    }

    pub fn scheme(&self) -> &str {
        &self.url.scheme
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn default_namespace(&self) -> &str {
        &self.config.default_namespace
    }

    pub fn set_default_namespace(&mut self, namespace: &str) {
        self.config.default_namespace = normalize_namespace(namespace);
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.config.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.config.timeout = timeout;
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Keep the last request and reply for the `last_*` accessors.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn add_operation_recorder(&mut self, recorder: Box<dyn OperationRecorder>) {
        self.recorders.push(recorder);
    }

    pub fn operation_recorders_mut(&mut self) -> &mut [Box<dyn OperationRecorder>] {
        &mut self.recorders
    }

    pub fn last_raw_request(&self) -> Option<&[u8]> {
        self.last.request.as_deref()
    }

    /// Last request, indented.
    pub fn last_request(&self) -> Option<String> {
        self.last.request.as_deref().map(pretty_print)
    }

    pub fn last_raw_reply(&self) -> Option<&[u8]> {
        self.last.reply.as_deref()
    }

    /// Last reply, indented.
    pub fn last_reply(&self) -> Option<String> {
        self.last.reply.as_deref().map(pretty_print)
    }

    pub fn last_request_len(&self) -> usize {
        self.last.request_len
    }

    pub fn last_reply_len(&self) -> usize {
        self.last.reply_len
    }

    /// Client-side duration of the last operation.
    pub fn last_operation_time(&self) -> Option<Duration> {
        self.last.operation_time
    }

    pub fn last_server_response_time(&self) -> Option<Duration> {
        self.last.server_response_time
    }

    /// Grammar deviations accepted while parsing the last reply.
    pub fn last_tolerated_issues(&self) -> &[ToleratedIssue] {
        &self.tolerated
    }

    /// Effective namespace: explicit argument, else the namespace of a path
    /// argument, else the default namespace.
    pub(crate) fn resolve_namespace(&self, explicit: Option<&str>, from_path: Option<&str>) -> String {
        normalize_namespace(
            explicit
                .or(from_path)
                .unwrap_or(&self.config.default_namespace),
        )
    }

    /// Run one public operation.
    pub(crate) fn operation<T, F>(
        &mut self,
        name: &'static str,
        args: Vec<(String, String)>,
        call: F,
    ) -> Result<T, Error>
    where
        T: fmt::Debug,
        F: FnOnce(&mut Self) -> Result<T, Error>,
    {
        if self.transport.is_none() {
            return Err(ErrorKind::Closed.into());
        }
        self.last = LastExchange::default();
        self.tolerated.clear();
        for recorder in self.recorders.iter_mut() {
            recorder.reset();
            recorder.stage_operation(&self.conn_id, name, &args);
        }

        let timer = self.statistics.start_timer(name);
        let result = call(self)
            .map_err(|err| err.with_payload(self.last.request.clone(), self.last.reply.clone()));
        let elapsed = timer.stop(
            self.last.request_len,
            self.last.reply_len,
            self.last.server_response_time,
            result.is_err(),
        );
        self.last.operation_time = Some(elapsed);
        if !self.debug {
            self.last.request = None;
            self.last.reply = None;
        }

        if self.recorders.iter().any(|r| r.enabled()) {
            let outcome = match &result {
                Ok(value) => OperationOutcome::Success(format!("{value:?}")),
                Err(err) => OperationOutcome::Failure(err.to_string()),
            };
            for recorder in self.recorders.iter_mut() {
                recorder.stage_result(&outcome);
            }
        }
        match &result {
            Ok(_) => debug!(conn_id = %self.conn_id, operation = name, ?elapsed, "operation completed"),
            Err(err) => debug!(conn_id = %self.conn_id, operation = name, ?elapsed, error = %err, "operation failed"),
        }
        result
    }

    fn next_message_id(&mut self) -> String {
        self.message_seq += 1;
        format!("{}:{}", self.conn_id, self.message_seq)
    }

    fn exchange(&mut self, headers: &CimHeaders, body: Bytes) -> Result<Bytes, Error> {
        self.last.request_len = body.len();
        self.last.request = Some(body.clone());
        let transport = self
            .transport
            .as_deref_mut()
            .ok_or_else(|| Error::from(ErrorKind::Closed))?;
        let config = ExchangeConfig {
            url: &self.url.url,
            conn_id: &self.conn_id,
            credentials: self
                .config
                .credentials
                .as_ref()
                .map(|(user, password)| (user.as_str(), password.as_str())),
            timeout: self.config.timeout,
        };
        match wbem_request(transport, &config, headers, body, &mut self.recorders) {
            Ok(exchange) => {
                self.last.reply_len = exchange.body.len();
                self.last.reply = Some(exchange.body.clone());
                self.last.server_response_time = exchange.server_response_time;
                Ok(exchange.body)
            }
            Err(failure) => {
                if let Some(reply) = failure.reply {
                    self.last.reply_len = reply.len();
                    self.last.reply = Some(reply);
                }
                Err(failure.error.into())
            }
        }
    }

    fn parse_reply(&mut self, body: &[u8], expected: MethodKind, method: &str) -> Result<MethodResponse, Error> {
        let mut parser = Parser::new();
        let parsed = parser.parse_document(body);
        self.tolerated.extend(parser.take_tolerated_issues());
        let mut response = match parsed?.body {
            MessageBody::Response(response) => response,
            MessageBody::Request(call) => {
                return Err(Error::cimxml(format!(
                    "expected a response to {method}, got a request for {}",
                    call.name
                )))
            }
        };
        if response.kind != expected || !response.name.eq_ignore_ascii_case(method) {
            return Err(Error::cimxml(format!(
                "expected a {expected:?} response to {method}, got a {:?} response to {}",
                response.kind, response.name
            )));
        }
        if let Some(info) = response.error.take() {
            return Err(ErrorKind::Cim(info.into()).into());
        }
        Ok(response)
    }

    /// Intrinsic method call against `namespace`.
    pub(crate) fn imethodcall<F>(&mut self, method: &str, namespace: &str, params: F) -> Result<MethodResponse, Error>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let id = self.next_message_id();
        let body = params(RequestBuilder::intrinsic(id, method, namespace)).to_bytes();
        let headers = CimHeaders::MethodCall {
            method: method.to_string(),
            object: namespace.to_string(),
        };
        let reply = self.exchange(&headers, body)?;
        self.parse_reply(&reply, MethodKind::Intrinsic, method)
    }

    /// Extrinsic method call. `target` must carry its namespace.
    pub(crate) fn methodcall(
        &mut self,
        method: &str,
        target: &ObjectPath,
        params: &[(&str, Option<CimValue>)],
    ) -> Result<MethodResponse, Error> {
        let namespace = target.namespace().unwrap_or_default();
        let object = match target {
            ObjectPath::Instance(path) => path.to_cimobject(namespace),
            ObjectPath::Class(path) => format!("{namespace}:{}", path.classname),
        };
        let id = self.next_message_id();
        let body = params
            .iter()
            .fold(RequestBuilder::extrinsic(id, method, target), |req, (name, value)| {
                req.param(name, value.as_ref())
            })
            .to_bytes();
        let headers = CimHeaders::MethodCall {
            method: method.to_string(),
            object,
        };
        let reply = self.exchange(&headers, body)?;
        self.parse_reply(&reply, MethodKind::Extrinsic, method)
    }

    /// Export request (indication delivery).
    pub(crate) fn export_call<F>(&mut self, method: &str, params: F) -> Result<MethodResponse, Error>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let id = self.next_message_id();
        let body = params(RequestBuilder::export(id, method)).to_bytes();
        let headers = CimHeaders::Export {
            method: method.to_string(),
        };
        let reply = self.exchange(&headers, body)?;
        self.parse_reply(&reply, MethodKind::Export, method)
    }

    /// Class path of an object that lives on this server.
    pub(crate) fn class_path(&self, classname: &str, namespace: &str) -> CimClassName {
        CimClassName::new(classname)
            .with_namespace(namespace)
            .with_host(self.url.hostport.as_str())
    }

    /// Fill in what a returned class path omits. A host the server sent is
    /// kept.
    pub(crate) fn stamp_class_path(&self, path: &mut CimClassName, namespace: &str) {
        if path.namespace.is_none() {
            path.namespace = Some(namespace.to_string());
        }
        if path.host.is_none() {
            path.host = Some(self.url.hostport.clone());
        }
    }
}

/// Fill in the namespace a returned instance path omits.
pub(crate) fn stamp_instance_path(path: &mut CimInstanceName, namespace: &str) {
    if path.namespace.is_none() {
        path.namespace = Some(namespace.to_string());
    }
}

/// The only item of a single-object result.
pub(crate) fn single_item(method: &str, response: MethodResponse) -> Result<Item, Error> {
    let mut items = response.items.unwrap_or_default();
    if items.len() != 1 {
        return Err(Error::cimxml(format!(
            "{method} response must contain exactly one object, got {}",
            items.len()
        )));
    }
    items
        .pop()
        .ok_or_else(|| Error::cimxml(format!("{method} response is empty")))
}

pub(crate) fn unexpected_item(method: &str, expected: &str, item: &Item) -> Error {
    Error::cimxml(format!(
        "{method} response contains a {} where a {expected} was expected",
        item.kind_name()
    ))
}

/// Convert every result item with `pick`, failing on the first mismatch.
pub(crate) fn collect_items<T>(
    method: &str,
    expected: &str,
    items: Option<Vec<Item>>,
    mut pick: impl FnMut(Item) -> Result<T, Item>,
) -> Result<Vec<T>, Error> {
    items
        .unwrap_or_default()
        .into_iter()
        .map(|item| pick(item).map_err(|other| unexpected_item(method, expected, &other)))
        .collect()
}

pub(crate) fn require_name(param: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::value(format!("{param} must not be empty")));
    }
    Ok(())
}
