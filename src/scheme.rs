// src/scheme.rs

//! HTTP authentication schemes understood by this crate.

use std::fmt;
use std::str::FromStr;

use crate::error::{self, Error};

/// Delimiter between scheme names in the `enabled-schemes` setting.
pub const DELIMITER: char = ',';

/// An HTTP authentication scheme.
///
/// Only `Negotiate` (SPNEGO, RFC 4559) is implemented. Parsing is
/// case-insensitive and rejects anything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AuthScheme {
    /// SPNEGO carrying Kerberos tokens.
    Negotiate,
}

impl AuthScheme {
    /// The scheme token as it appears in `Authorization` and
    /// `WWW-Authenticate` headers.
    pub const fn as_str(&self) -> &'static str {
        match self {
            AuthScheme::Negotiate => "Negotiate",
        }
    }

    /// Returns true if `name` names this scheme, ignoring ASCII case.
    pub fn matches(&self, name: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(name.trim())
    }

    /// Parse a comma-delimited list of scheme names.
    ///
    /// Empty input yields an empty list. Duplicates are collapsed, order of
    /// first appearance is kept.
    pub fn parse_list(value: &str) -> crate::Result<Vec<AuthScheme>> {
        let mut schemes = Vec::new();
        for name in value.split(DELIMITER) {
            if name.trim().is_empty() {
                continue;
            }
            let scheme = name.parse::<AuthScheme>()?;
            if !schemes.contains(&scheme) {
                schemes.push(scheme);
            }
        }
        Ok(schemes)
    }
}

impl FromStr for AuthScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if AuthScheme::Negotiate.matches(s) {
            Ok(AuthScheme::Negotiate)
        } else {
            Err(error::unsupported_scheme(format!(
                "unrecognized authentication scheme {:?}",
                s.trim()
            )))
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
