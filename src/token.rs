// src/token.rs

//! Transport encoding of negotiation tokens.
//!
//! Tokens travel base64 encoded behind the scheme name:
//! `Authorization: Negotiate <token>` from the client and
//! `WWW-Authenticate: Negotiate [<token>]` from the server.

use base64::Engine as _;
use http::{HeaderMap, HeaderValue};

use crate::error;
use crate::scheme::AuthScheme;

/// A credential presented by a client on one request.
///
/// The subject is normally absent since the token itself carries the
/// identity. Dropped once the realm has seen it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticationToken {
    scheme: AuthScheme,
    subject: Option<String>,
    token: Vec<u8>,
}

impl AuthenticationToken {
    /// Create a token for `scheme` carrying the decoded `token` bytes.
    pub fn new(scheme: AuthScheme, token: Vec<u8>) -> Self {
        AuthenticationToken {
            scheme,
            subject: None,
            token,
        }
    }

    /// Attach a subject name.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Parse an `Authorization` header value.
    ///
    /// Returns `Ok(None)` when the value is not a `scheme` login attempt and a
    /// negotiation error when it is one but the token is not valid base64.
    pub fn from_authorization(
        scheme: AuthScheme,
        value: &HeaderValue,
    ) -> crate::Result<Option<Self>> {
        let Some(encoded) = value.to_str().ok().and_then(|v| strip_scheme(scheme, v)) else {
            return Ok(None);
        };
        let token = decode(encoded)?;
        Ok(Some(AuthenticationToken::new(scheme, token)))
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// The raw, decoded token.
    pub fn token(&self) -> &[u8] {
        &self.token
    }
}

/// Encode token bytes for the wire.
pub fn encode(token: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(token)
}

/// Decode a base64 token. Malformed input is a negotiation error.
pub fn decode(encoded: &str) -> crate::Result<Vec<u8>> {
    let encoded = encoded.trim();
    if encoded.is_empty() {
        return Err(error::negotiation("empty negotiation token"));
    }
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(error::negotiation)
}

/// Build the `<scheme> <base64>` header value carrying `token`.
pub fn header_value(scheme: AuthScheme, token: &[u8]) -> crate::Result<HeaderValue> {
    let value = format!("{} {}", scheme.as_str(), encode(token));
    HeaderValue::from_str(&value).map_err(error::negotiation)
}

/// Strip a leading scheme name, returning the remainder.
///
/// `"Negotiate abc"` yields `Some("abc")`, a bare `"Negotiate"` yields
/// `Some("")`, and any other scheme yields `None`.
pub(crate) fn strip_scheme(scheme: AuthScheme, value: &str) -> Option<&str> {
    let value = value.trim();
    let name = scheme.as_str();
    if value.len() < name.len() || !value.is_char_boundary(name.len()) {
        return None;
    }
    let (head, rest) = value.split_at(name.len());
    if !head.eq_ignore_ascii_case(name) {
        return None;
    }
    if rest.is_empty() {
        Some(rest)
    } else if rest.starts_with(' ') {
        Some(rest.trim_start())
    } else {
        None
    }
}

/// A server challenge for one scheme.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Challenge {
    /// A bare `Negotiate`: start a new exchange.
    Initial,
    /// `Negotiate <token>`: continue the exchange with the server's token.
    Continue(Vec<u8>),
}

/// Find the `scheme` challenge among the `WWW-Authenticate` headers.
///
/// Challenges whose token is not valid base64 are ignored, matching how a
/// client treats a challenge it cannot act on.
pub fn parse_challenge(headers: &HeaderMap, scheme: AuthScheme) -> Option<Challenge> {
    let mut challenge = None;

    for value in headers.get_all(http::header::WWW_AUTHENTICATE) {
        let Some(rest) = value.to_str().ok().and_then(|v| strip_scheme(scheme, v)) else {
            continue;
        };

        if rest.is_empty() {
            challenge.get_or_insert(Challenge::Initial);
        } else {
            match decode(rest) {
                Ok(token) => return Some(Challenge::Continue(token)),
                Err(e) => log::debug!("ignoring malformed {} challenge: {}", scheme, e),
            }
        }
    }

    challenge
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_scheme() {
        assert_eq!(strip_scheme(AuthScheme::Negotiate, "Negotiate abc"), Some("abc"));
        assert_eq!(strip_scheme(AuthScheme::Negotiate, "negotiate  abc "), Some("abc"));
        assert_eq!(strip_scheme(AuthScheme::Negotiate, "Negotiate"), Some(""));
        assert_eq!(strip_scheme(AuthScheme::Negotiate, "NegotiateX abc"), None);
        assert_eq!(strip_scheme(AuthScheme::Negotiate, "Basic abc"), None);
        assert_eq!(strip_scheme(AuthScheme::Negotiate, "Neg"), None);
    }

    #[test]
    fn test_from_authorization() {
        let value = HeaderValue::from_static("Negotiate YWJj");
        let token = AuthenticationToken::from_authorization(AuthScheme::Negotiate, &value)
            .unwrap()
            .unwrap();
        assert_eq!(token.token(), b"abc");
        assert!(token.subject().is_none());

        let value = HeaderValue::from_static("Basic YWJj");
        assert!(AuthenticationToken::from_authorization(AuthScheme::Negotiate, &value)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_from_authorization_garbage() {
        let value = HeaderValue::from_static("Negotiate !!not-base64!!");
        let err = AuthenticationToken::from_authorization(AuthScheme::Negotiate, &value)
            .unwrap_err();
        assert!(err.is_negotiation());

        let value = HeaderValue::from_static("Negotiate");
        assert!(AuthenticationToken::from_authorization(AuthScheme::Negotiate, &value).is_err());
    }

    #[test]
    fn test_header_value() {
        let value = header_value(AuthScheme::Negotiate, b"abc").unwrap();
        assert_eq!(value, "Negotiate YWJj");
    }

    #[test]
    fn test_parse_challenge_bare() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Negotiate"),
        );
        assert_eq!(
            parse_challenge(&headers, AuthScheme::Negotiate),
            Some(Challenge::Initial)
        );
    }

    #[test]
    fn test_parse_challenge_with_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"test\""),
        );
        headers.append(
            http::header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Negotiate"),
        );
        headers.append(
            http::header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Negotiate YWJj"),
        );
        assert_eq!(
            parse_challenge(&headers, AuthScheme::Negotiate),
            Some(Challenge::Continue(b"abc".to_vec()))
        );
    }

    #[test]
    fn test_parse_challenge_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"test\""),
        );
        assert_eq!(parse_challenge(&headers, AuthScheme::Negotiate), None);
        assert_eq!(parse_challenge(&HeaderMap::new(), AuthScheme::Negotiate), None);
    }
}
