// src/client/provider.rs

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use http::header::AUTHORIZATION;
use http::{HeaderName, HeaderValue, Request};
use url::Url;

use crate::auth::{self, ContextProvider, Credential, Role, SecurityContext, Step};
use crate::config::ClientSecurityConfig;
use crate::error;
use crate::scheme::AuthScheme;
use crate::token::{self, Challenge};

/// A header to attach to requests for `uri` and everything below it.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticationResult {
    uri: Url,
    name: HeaderName,
    value: HeaderValue,
}

impl AuthenticationResult {
    /// An `Authorization` header for `uri`. Query and fragment are dropped.
    pub fn new(uri: &Url, value: HeaderValue) -> Self {
        AuthenticationResult {
            uri: base_uri(uri),
            name: AUTHORIZATION,
            value,
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.name
    }

    pub fn header_value(&self) -> &HeaderValue {
        &self.value
    }

    /// Set the header on `req`, replacing any previous value.
    pub fn apply<B>(&self, req: &mut Request<B>) {
        req.headers_mut().insert(self.name.clone(), self.value.clone());
    }
}

impl fmt::Debug for AuthenticationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut value = self.value.clone();
        value.set_sensitive(true);
        f.debug_struct("AuthenticationResult")
            .field("uri", &self.uri.as_str())
            .field("name", &self.name)
            .field("value", &value)
            .finish()
    }
}

/// `uri` without query and fragment.
pub(crate) fn base_uri(uri: &Url) -> Url {
    let mut base = uri.clone();
    base.set_query(None);
    base.set_fragment(None);
    base
}

/// A client-side scheme that can answer challenges.
pub trait Authentication: Send + Sync + 'static {
    fn scheme(&self) -> AuthScheme;

    /// Whether this authentication answers `scheme` challenges for `uri`.
    fn matches(&self, scheme: &str, uri: &Url) -> bool;

    /// Produce the header answering `challenge` for a request to `uri`.
    ///
    /// `Ok(None)` means there is nothing (more) to send and the server's
    /// response has to be surfaced as is.
    ///
    /// # Errors
    ///
    /// A negotiation error if the security context fails. The exchange is
    /// over and its context released.
    fn authenticate(
        &self,
        challenge: &Challenge,
        uri: &Url,
    ) -> crate::Result<Option<AuthenticationResult>>;

    /// Release the state of the current exchange.
    fn reset(&self);
}

/// Answers `Negotiate` challenges with tokens for one service.
///
/// Holds the initiating credential acquired at construction and at most one
/// security context, the one of the exchange in progress. Exchanges are
/// expected to run one at a time; [`NegotiateClient`](super::NegotiateClient)
/// makes sure they do.
pub struct NegotiateProvider<P: ContextProvider> {
    provider: Arc<P>,
    credential: Arc<P::Credential>,
    service_uri: Url,
    target: String,
    context: Mutex<Option<P::Context>>,
}

impl<P: ContextProvider> NegotiateProvider<P> {
    /// Log in from the ticket cache and prepare to talk to `service_uri`.
    ///
    /// # Errors
    ///
    /// Incomplete configuration, a configured scheme other than `Negotiate`,
    /// a service URI without host, or a failed login.
    pub fn new(config: &ClientSecurityConfig, service_uri: Url, provider: Arc<P>) -> crate::Result<Self> {
        config.validate()?;
        let (Some(scheme), Some(service_name), Some(realm_file)) =
            (config.scheme(), config.service(), config.krb5_conf_path())
        else {
            return Err(error::config("client authentication is not configured"));
        };
        if scheme != AuthScheme::Negotiate {
            return Err(error::unsupported_scheme(format!(
                "no client support for {scheme}"
            )));
        }

        let credential = provider.login(service_name, realm_file, Role::Initiate)?;
        log::debug!(
            "initiating {} logins as {}",
            AuthScheme::Negotiate,
            credential.principal()
        );
        Self::with_credential(provider, Arc::new(credential), service_name, service_uri)
    }

    /// Share an initiating credential acquired elsewhere.
    ///
    /// # Errors
    ///
    /// A config error if `service_uri` has no host.
    pub fn with_credential(
        provider: Arc<P>,
        credential: Arc<P::Credential>,
        service_name: &str,
        service_uri: Url,
    ) -> crate::Result<Self> {
        let host = service_uri
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| {
                error::config("service uri has no host").with_uri(service_uri.clone())
            })?;
        let target = auth::service_principal(service_name, Some(host))?;

        Ok(NegotiateProvider {
            provider,
            credential,
            service_uri,
            target,
            context: Mutex::new(None),
        })
    }

    /// Request tickets for `principal` instead of the one derived from the
    /// service URI, e.g. when the service is reached through an address or
    /// an alias.
    pub fn with_target(mut self, principal: impl Into<String>) -> Self {
        self.target = principal.into();
        self
    }

    /// The principal tickets are requested for, e.g. `HTTP/web.example.com`.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn service_uri(&self) -> &Url {
        &self.service_uri
    }

    fn lock(&self) -> MutexGuard<'_, Option<P::Context>> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P: ContextProvider> Authentication for NegotiateProvider<P> {
    fn scheme(&self) -> AuthScheme {
        AuthScheme::Negotiate
    }

    fn matches(&self, scheme: &str, uri: &Url) -> bool {
        AuthScheme::Negotiate.matches(scheme) && uri.origin() == self.service_uri.origin()
    }

    fn authenticate(
        &self,
        challenge: &Challenge,
        uri: &Url,
    ) -> crate::Result<Option<AuthenticationResult>> {
        let mut slot = self.lock();

        let (context, input) = match challenge {
            Challenge::Initial => {
                let context =
                    self.provider
                        .create_context(&self.credential, &self.target, Role::Initiate)?;
                (slot.insert(context), &[][..])
            }
            Challenge::Continue(input) => match slot.as_mut() {
                Some(context) => (context, input.as_slice()),
                None => {
                    log::debug!("no exchange in progress for {}; ignoring challenge", uri);
                    return Ok(None);
                }
            },
        };

        if context.is_established() {
            return Ok(None);
        }

        let output = match context.step(input) {
            Ok(Step::Continue(output)) | Ok(Step::Established(Some(output))) => output,
            Ok(Step::Established(None)) => {
                log::debug!("security context with {} established", self.target);
                return Ok(None);
            }
            Err(e) => {
                *slot = None;
                log::warn!("negotiation with {} failed: {}", self.target, e);
                return Err(e.with_uri(base_uri(uri)));
            }
        };

        let value = token::header_value(AuthScheme::Negotiate, &output).map_err(|e| {
            *slot = None;
            e
        })?;
        Ok(Some(AuthenticationResult::new(uri, value)))
    }

    fn reset(&self) {
        *self.lock() = None;
    }
}

impl<P: ContextProvider> fmt::Debug for NegotiateProvider<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiateProvider")
            .field("target", &self.target)
            .field("service_uri", &self.service_uri.as_str())
            .finish()
    }
}

/// Builds the client authentications a configuration asks for.
#[derive(Debug)]
pub struct AuthenticationProvider {
    config: ClientSecurityConfig,
    service_uri: Url,
}

impl AuthenticationProvider {
    pub fn new(config: ClientSecurityConfig, service_uri: Url) -> Self {
        AuthenticationProvider {
            config,
            service_uri,
        }
    }

    /// One authentication per configured scheme. Empty when client
    /// authentication is disabled.
    ///
    /// # Errors
    ///
    /// See [`NegotiateProvider::new`].
    pub fn authentications<P: ContextProvider>(
        &self,
        provider: P,
    ) -> crate::Result<Vec<Arc<dyn Authentication>>> {
        let Some(scheme) = self.config.scheme() else {
            if self.config.enabled() {
                self.config.validate()?;
            }
            return Ok(Vec::new());
        };

        let authentication: Arc<dyn Authentication> = match scheme {
            AuthScheme::Negotiate => Arc::new(NegotiateProvider::new(
                &self.config,
                self.service_uri.clone(),
                Arc::new(provider),
            )?),
        };
        Ok(vec![authentication])
    }
}
