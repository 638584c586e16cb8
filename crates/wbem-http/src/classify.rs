//! Classification of HTTP replies to CIM-XML requests.

use std::time::Duration;

use tracing::debug;

use crate::transport::HttpResponse;
use crate::{HttpFailure, TransportError};

/// The only authentication scheme the client sends.
const SUPPORTED_AUTH_SCHEME: &str = "Basic";
/// Vendor headers copied into [`HttpFailure::details`].
const DETAIL_HEADERS: [&str; 1] = ["PGErrorDetail"];
const XML_MEDIA_TYPES: [&str; 2] = ["application/xml", "text/xml"];

/// Accept a 200 reply with an XML content type and return the server's
/// self-reported processing time, if any. Everything else is an error.
pub fn check_response(reply: &HttpResponse) -> Result<Option<Duration>, TransportError> {
    match reply.status {
        200 => {}
        401 => return Err(TransportError::Auth(auth_message(reply))),
        _ => {
            let failure = HttpFailure {
                status: reply.status,
                reason: reply.reason.clone(),
                cim_error: reply.header("CIMError").map(str::to_string),
                details: DETAIL_HEADERS
                    .iter()
                    .filter_map(|name| {
                        reply.header(name).map(|value| {
                            let decoded = urlencoding::decode(value)
                                .map(|v| v.into_owned())
                                .unwrap_or_else(|_| value.to_string());
                            (name.to_string(), decoded)
                        })
                    })
                    .collect(),
            };
            debug!(status = failure.status, cim_error = ?failure.cim_error, "non-200 reply");
            return Err(TransportError::Http(failure));
        }
    }

    let content_type = reply.header("Content-Type").unwrap_or_default();
    let media = content_type.trim().to_ascii_lowercase();
    if !XML_MEDIA_TYPES.iter().any(|t| media.starts_with(t)) {
        return Err(TransportError::Header(format!(
            "unexpected Content-Type {content_type:?} in 200 reply (expected application/xml)"
        )));
    }

    Ok(reply
        .header("WBEMServerResponseTime")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_micros))
}

/// Message for a 401 reply, based on the schemes the server offers.
fn auth_message(reply: &HttpResponse) -> String {
    let Some(header) = reply.header("WWW-Authenticate") else {
        return "server rejected the request (401); check credentials and permissions".into();
    };
    let schemes: Vec<&str> = header
        .split(',')
        .filter_map(|part| part.split_whitespace().next())
        .filter(|token| !token.contains('='))
        .collect();
    if schemes
        .iter()
        .any(|s| s.eq_ignore_ascii_case(SUPPORTED_AUTH_SCHEME))
    {
        format!(
            "server rejected the {SUPPORTED_AUTH_SCHEME} credentials (401); \
             check user, password and permissions"
        )
    } else {
        format!(
            "server does not support the {SUPPORTED_AUTH_SCHEME:?} authentication scheme \
             this client requires; it offers: {}",
            schemes.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn reply(status: u16, headers: &[(&str, &str)]) -> HttpResponse {
        HttpResponse {
            version: "HTTP/1.1".into(),
            status,
            reason: "Reason".into(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: Bytes::new(),
        }
    }

    #[test]
    fn negotiate_only_server_names_missing_basic() {
        let err = check_response(&reply(401, &[("WWW-Authenticate", "Negotiate")])).unwrap_err();
        let TransportError::Auth(msg) = err else {
            panic!("expected auth error");
        };
        assert!(msg.contains("does not support the \"Basic\""), "{msg}");
        assert!(msg.contains("Negotiate"), "{msg}");
    }

    #[test]
    fn basic_offered_means_bad_credentials() {
        let err = check_response(&reply(
            401,
            &[("www-authenticate", "Negotiate, Basic realm=\"cimom\"")],
        ))
        .unwrap_err();
        assert!(matches!(err, TransportError::Auth(msg) if msg.contains("credentials")));
    }

    #[test]
    fn other_status_carries_cim_error_and_details() {
        let err = check_response(&reply(
            400,
            &[
                ("CIMError", "request-not-valid"),
                ("PGErrorDetail", "bad%20request%3A%20x"),
            ],
        ))
        .unwrap_err();
        let TransportError::Http(failure) = err else {
            panic!("expected HTTP error");
        };
        assert_eq!(failure.status, 400);
        assert_eq!(failure.cim_error.as_deref(), Some("request-not-valid"));
        assert_eq!(
            failure.details,
            vec![("PGErrorDetail".to_string(), "bad request: x".to_string())]
        );
    }

    #[test]
    fn success_requires_xml_content_type() {
        let err = check_response(&reply(200, &[("Content-Type", "text/html")])).unwrap_err();
        assert!(matches!(err, TransportError::Header(_)));
        assert!(check_response(&reply(200, &[])).is_err());

        let ok = check_response(&reply(
            200,
            &[
                ("Content-Type", "application/xml; charset=\"utf-8\""),
                ("WBEMServerResponseTime", "1500"),
            ],
        ))
        .expect("accepted");
        assert_eq!(ok, Some(Duration::from_micros(1500)));
        assert_eq!(
            check_response(&reply(200, &[("content-type", "text/xml")])).expect("accepted"),
            None
        );
    }
}
