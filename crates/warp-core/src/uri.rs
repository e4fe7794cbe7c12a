//! Resource URI parsing.
//!
//! The loading pipeline treats URIs as opaque strings; only handlers look
//! inside them. [`ResourceUri`] is the shared helper handlers use to split a
//! URI into scheme, authority and path without each re-implementing it.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUri {
    raw: String,
    /// Lowercased scheme without the `://` separator (e.g. `file`, `asset`).
    scheme: String,
    /// Everything after `scheme://`.
    rest: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UriError {
    #[error("missing scheme in resource URI: {0}")]
    MissingScheme(String),
    #[error("invalid resource URI: {0}")]
    InvalidUri(String),
}

impl ResourceUri {
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| UriError::MissingScheme(uri.to_string()))?;

        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(UriError::InvalidUri(uri.to_string()));
        }

        Ok(ResourceUri {
            raw: uri.to_string(),
            scheme: scheme.to_ascii_lowercase(),
            rest: rest.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The part after `scheme://`, untouched.
    pub fn rest(&self) -> &str {
        &self.rest
    }

    /// `host[:port]` for hierarchical URIs such as `http://host:8080/a`.
    pub fn authority(&self) -> &str {
        match self.rest.find(['/', '?', '#']) {
            Some(idx) => &self.rest[..idx],
            None => &self.rest,
        }
    }

    /// Path plus query of a hierarchical URI, always starting with `/`.
    /// Fragments are stripped.
    pub fn path_and_query(&self) -> String {
        let after = &self.rest[self.authority().len()..];
        let without_fragment = after.split('#').next().unwrap_or("");
        if without_fragment.starts_with('/') {
            without_fragment.to_string()
        } else {
            format!("/{without_fragment}")
        }
    }

    /// Split the authority into host and port, falling back to `default_port`.
    pub fn host_port(&self, default_port: u16) -> Result<(String, u16), UriError> {
        let authority = self.authority();
        if authority.is_empty() {
            return Err(UriError::InvalidUri(self.raw.clone()));
        }
        let invalid = || UriError::InvalidUri(self.raw.clone());

        // Bracketed IPv6 literal: `[::1]:8080`.
        if let Some(stripped) = authority.strip_prefix('[') {
            let (host, after) = stripped.split_once(']').ok_or_else(invalid)?;
            let port = match after.strip_prefix(':') {
                Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
                None if after.is_empty() => default_port,
                None => return Err(invalid()),
            };
            return Ok((host.to_string(), port));
        }

        match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid())?;
                Ok((host.to_string(), port))
            }
            None => Ok((authority.to_string(), default_port)),
        }
    }
}

/// Case-insensitive check that `uri` starts with a scheme prefix such as
/// `asset://`.
pub fn has_scheme_prefix(uri: &str, prefix: &str) -> bool {
    uri.len() >= prefix.len()
        && uri.is_char_boundary(prefix.len())
        && uri[..prefix.len()].eq_ignore_ascii_case(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file() {
        let uri = ResourceUri::parse("file:///var/data/a.txt").unwrap();
        assert_eq!(uri.scheme(), "file");
        assert_eq!(uri.rest(), "/var/data/a.txt");
    }

    #[test]
    fn test_scheme_is_lowercased() {
        let uri = ResourceUri::parse("ASSET://logo.png").unwrap();
        assert_eq!(uri.scheme(), "asset");
        assert_eq!(uri.as_str(), "ASSET://logo.png");
    }

    #[test]
    fn test_missing_scheme() {
        assert_eq!(
            ResourceUri::parse("logo.png"),
            Err(UriError::MissingScheme("logo.png".to_string()))
        );
    }

    #[test]
    fn test_invalid_scheme() {
        assert!(matches!(
            ResourceUri::parse("a b://x"),
            Err(UriError::InvalidUri(_))
        ));
        assert!(matches!(
            ResourceUri::parse("://x"),
            Err(UriError::InvalidUri(_))
        ));
    }

    #[test]
    fn test_http_parts() {
        let uri = ResourceUri::parse("http://example.com:8080/a/b?q=1#frag").unwrap();
        assert_eq!(uri.authority(), "example.com:8080");
        assert_eq!(uri.path_and_query(), "/a/b?q=1");
        assert_eq!(
            uri.host_port(80).unwrap(),
            ("example.com".to_string(), 8080)
        );
    }

    #[test]
    fn test_http_default_port_and_root_path() {
        let uri = ResourceUri::parse("http://example.com").unwrap();
        assert_eq!(uri.path_and_query(), "/");
        assert_eq!(uri.host_port(80).unwrap(), ("example.com".to_string(), 80));
    }

    #[test]
    fn test_bad_port() {
        let uri = ResourceUri::parse("http://example.com:http/").unwrap();
        assert!(uri.host_port(80).is_err());
    }

    #[test]
    fn test_ipv6_authority() {
        let uri = ResourceUri::parse("http://[::1]:9000/x").unwrap();
        assert_eq!(uri.host_port(80).unwrap(), ("::1".to_string(), 9000));
        let uri = ResourceUri::parse("http://[::1]/x").unwrap();
        assert_eq!(uri.host_port(80).unwrap(), ("::1".to_string(), 80));
    }

    #[test]
    fn test_scheme_prefix() {
        assert!(has_scheme_prefix("asset://logo.png", "asset://"));
        assert!(has_scheme_prefix("Asset://logo.png", "asset://"));
        assert!(!has_scheme_prefix("file:///x", "asset://"));
        assert!(!has_scheme_prefix("as", "asset://"));
    }
}
