// src/server/mod.rs

//! The accepting side: a realm that validates tokens and a tower layer that
//! challenges unauthenticated requests.
//!
//! The host decides whether to install anything by calling [`bind`] with the
//! server configuration. It also has to tell the filter, per request, whether
//! the connection is encrypted and which connection it arrived on, by
//! inserting a [`ConnectionInfo`] into the request extensions.

use std::fmt;
use std::sync::Arc;

use crate::auth::ContextProvider;
use crate::config::ServerSecurityConfig;
use crate::scheme::AuthScheme;
use crate::token::AuthenticationToken;

mod filter;
mod realm;

pub use self::filter::{ChallengeFilter, ChallengeLayer, ResponseFuture};
pub use self::realm::{NegotiateRealm, ATTEMPT_TIMEOUT, MAX_LEGS};

/// Identifies one negotiation attempt, normally the connection it runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-request facts supplied by the hosting HTTP server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    id: AttemptId,
    secure: bool,
}

impl ConnectionInfo {
    pub fn new(id: u64, secure: bool) -> Self {
        ConnectionInfo {
            id: AttemptId(id),
            secure,
        }
    }

    pub fn id(&self) -> AttemptId {
        self.id
    }

    /// Whether the request arrived over TLS.
    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

/// A verified client identity, e.g. `alice@EXAMPLE.COM`.
///
/// Inserted into the request extensions of every admitted request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Principal {
    name: String,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Principal { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The part before `@`.
    pub fn short_name(&self) -> &str {
        crate::auth::without_realm(&self.name)
    }

    /// The part after `@`, if any.
    pub fn realm(&self) -> Option<&str> {
        self.name.rsplit_once('@').map(|(_, realm)| realm)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// What a realm made of a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The client is authenticated. `token` is owed to the client for mutual
    /// authentication.
    Authenticated {
        principal: Principal,
        token: Option<Vec<u8>>,
    },
    /// The exchange needs another leg; send `token` in the challenge.
    Continue(Vec<u8>),
    /// This realm does not handle the token.
    NoMatch,
}

/// A per-scheme validation strategy used by the [`ChallengeFilter`].
pub trait Authenticator: Send + Sync + 'static {
    fn scheme(&self) -> AuthScheme;

    /// Validate a client token.
    ///
    /// # Errors
    ///
    /// Negotiation failures; the filter answers them with a fresh challenge.
    fn authenticate(
        &self,
        attempt: AttemptId,
        token: &AuthenticationToken,
    ) -> crate::Result<Outcome>;

    /// Forget any state kept for `attempt`, e.g. when its connection closes.
    fn release(&self, attempt: AttemptId);
}

/// Build the challenge layer described by `config`.
///
/// Logs in once per enabled scheme. Returns `Ok(None)` when no scheme is
/// enabled, in which case requests are not authenticated at all.
///
/// # Errors
///
/// Incomplete configuration and failed logins abort startup.
pub fn bind<P>(config: &ServerSecurityConfig, provider: P) -> crate::Result<Option<ChallengeLayer>>
where
    P: ContextProvider,
{
    config.validate()?;

    let (Some(service_name), Some(realm_file)) = (config.service(), config.krb5_conf_path())
    else {
        log::info!("http security is not configured; requests are not authenticated");
        return Ok(None);
    };

    let provider = Arc::new(provider);
    let mut layer = ChallengeLayer::new();
    for scheme in config.auth_schemes() {
        let authenticator: Arc<dyn Authenticator> = match scheme {
            AuthScheme::Negotiate => Arc::new(NegotiateRealm::login(
                provider.clone(),
                service_name,
                realm_file,
            )?),
        };
        layer = layer.authenticator(authenticator);
    }
    Ok(Some(layer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_parts() {
        let principal = Principal::new("alice@EXAMPLE.COM");
        assert_eq!(principal.short_name(), "alice");
        assert_eq!(principal.realm(), Some("EXAMPLE.COM"));
        assert_eq!(principal.to_string(), "alice@EXAMPLE.COM");

        let principal = Principal::new("alice");
        assert_eq!(principal.realm(), None);
    }

    #[test]
    fn test_bind_disabled() {
        let layer = bind(
            &ServerSecurityConfig::default(),
            crate::auth::memory::MemoryKdc::new("EXAMPLE.COM"),
        )
        .unwrap();
        assert!(layer.is_none());
    }

    #[test]
    fn test_bind_incomplete() {
        let config = ServerSecurityConfig::new().auth_scheme(AuthScheme::Negotiate);
        let err = bind(&config, crate::auth::memory::MemoryKdc::new("EXAMPLE.COM")).unwrap_err();
        assert!(err.is_config());
    }
}
