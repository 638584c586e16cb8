//! WBEM server URL normalization.

use thiserror::Error;

use crate::consts;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid WBEM server URL {url:?}: {reason}")]
pub struct UrlError {
    pub url: String,
    pub reason: String,
}

/// Normalized endpoint: `scheme://host:port`, never with a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    /// `http` or `https`, lower case.
    pub scheme: String,
    /// Host name, IPv4 literal, or bracketed IPv6 literal with a `-` zone id.
    pub host: String,
    pub port: u16,
    /// `host:port`.
    pub hostport: String,
    /// `scheme://host:port`.
    pub url: String,
}

impl ParsedUrl {
    pub fn is_secure(&self) -> bool {
        self.scheme == "https"
    }
}

/// Parse and canonicalize a WBEM server URL.
///
/// With `allow_defaults`, a missing scheme becomes `http` and a missing
/// port becomes 5988 (`http`) or 5989 (`https`); otherwise both are
/// required. IPv6 literals are accepted bracketed (`[::1]`, `[fe80::1%eth0]`,
/// `[fe80::1-eth0]`) or unbracketed without a port (`fe80::1%eth0`) and are
/// always returned bracketed with a `-` zone delimiter.
pub fn parse_url(url: &str, allow_defaults: bool) -> Result<ParsedUrl, UrlError> {
    let fail = |reason: String| UrlError {
        url: url.to_string(),
        reason,
    };
    let trimmed = url.trim();

    let (scheme, rest) = match trimmed.find("://") {
        Some(idx) => (trimmed[..idx].to_ascii_lowercase(), &trimmed[idx + 3..]),
        None if allow_defaults => (consts::DEFAULT_SCHEME.to_string(), trimmed),
        None => return Err(fail("missing scheme".into())),
    };
    let default_port = match scheme.as_str() {
        "http" => consts::HTTP_PORT,
        "https" => consts::HTTPS_PORT,
        other => {
            return Err(fail(format!(
                "unsupported scheme {other:?} (expected http or https)"
            )))
        }
    };

    let authority = rest.split('/').next().unwrap_or_default();
    let (host, port_text) = split_host_port(authority).map_err(fail)?;
    if host.is_empty() || host == "[]" {
        return Err(fail("missing host".into()));
    }
    let port = match port_text {
        Some(text) => text
            .parse::<u16>()
            .map_err(|_| fail(format!("invalid port {text:?}")))?,
        None if allow_defaults => default_port,
        None => return Err(fail("missing port".into())),
    };

    let hostport = format!("{host}:{port}");
    Ok(ParsedUrl {
        url: format!("{scheme}://{hostport}"),
        scheme,
        host,
        port,
        hostport,
    })
}

fn split_host_port(authority: &str) -> Result<(String, Option<&str>), String> {
    if let Some(inner) = authority.strip_prefix('[') {
        let close = inner
            .find(']')
            .ok_or_else(|| "unterminated IPv6 literal".to_string())?;
        let port = match &inner[close + 1..] {
            "" => None,
            tail => Some(
                tail.strip_prefix(':')
                    .ok_or_else(|| format!("unexpected text {tail:?} after IPv6 literal"))?,
            ),
        };
        return Ok((format!("[{}]", normalize_zone(&inner[..close])), port));
    }
    if authority.matches(':').count() > 1 {
        // Unbracketed IPv6 text form cannot carry a port.
        return Ok((format!("[{}]", normalize_zone(authority)), None));
    }
    Ok(match authority.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), Some(port)),
        None => (authority.to_string(), None),
    })
}

/// `%25zone` (URI-encoded) and `%zone` both become `-zone`.
fn normalize_zone(addr: &str) -> String {
    if addr.contains("%25") {
        addr.replacen("%25", "-", 1)
    } else {
        addr.replacen('%', "-", 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triple(url: &str) -> (String, String, String) {
        let parsed = parse_url(url, true).expect("valid url");
        (parsed.scheme, parsed.hostport, parsed.url)
    }

    #[test]
    fn defaults_scheme_and_port() {
        assert_eq!(
            triple("10.11.12.13"),
            (
                "http".into(),
                "10.11.12.13:5988".into(),
                "http://10.11.12.13:5988".into()
            )
        );
        assert_eq!(triple("HTTPS://srv").2, "https://srv:5989");
        assert_eq!(triple("https://srv:1234/cimom").2, "https://srv:1234");
    }

    #[test]
    fn ipv6_forms_are_bracketed_with_dash_zone() {
        assert_eq!(
            triple("http://[2001:db8::1234%eth0]").1,
            "[2001:db8::1234-eth0]:5988"
        );
        assert_eq!(triple("[fe80::1%25en1]:5989").1, "[fe80::1-en1]:5989");
        assert_eq!(triple("https://[fe80::1-en1]").1, "[fe80::1-en1]:5989");
        assert_eq!(triple("2001:db8::1234%eth0").1, "[2001:db8::1234-eth0]:5988");
        assert_eq!(triple("::1").1, "[::1]:5988");
    }

    #[test]
    fn normalization_is_idempotent() {
        for input in ["10.11.12.13", "https://[2001:db8::1%eth0]:5999", "Srv.Example.com"] {
            let once = parse_url(input, true).expect("first pass");
            let twice = parse_url(&once.url, false).expect("second pass");
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn rejects_bad_components() {
        assert!(parse_url("srv", false).is_err());
        assert!(parse_url("http://srv", false).is_err());
        let err = parse_url("ftp://srv", true).unwrap_err();
        assert!(err.reason.contains("ftp"));
        assert!(parse_url("http://srv:99999", true).is_err());
        assert!(parse_url("http://srv:abc", true).is_err());
        assert!(parse_url("http://", true).is_err());
        assert!(parse_url("http://[::1", true).is_err());
        assert!(parse_url("http://[::1]x", true).is_err());
    }
}
