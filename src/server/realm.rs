// src/server/realm.rs

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::auth::{ContextProvider, Credential, Role, SecurityContext, Step};
use crate::error;
use crate::scheme::AuthScheme;
use crate::server::{AttemptId, Authenticator, Outcome, Principal};
use crate::token::AuthenticationToken;

/// Maximum accept steps one attempt may take before it is abandoned.
pub const MAX_LEGS: usize = 5;

/// How long an unfinished attempt is kept waiting for its next leg.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

struct Attempt<C> {
    context: C,
    legs: usize,
    touched: Instant,
}

impl<C> Attempt<C> {
    fn new(context: C) -> Self {
        Attempt {
            context,
            legs: 0,
            touched: Instant::now(),
        }
    }
}

/// Validates `Negotiate` tokens against the service credential.
///
/// Every attempt owns its own accepting context. Contexts of unfinished
/// multi-leg exchanges are parked here, keyed by [`AttemptId`], until the next
/// leg arrives on the same connection, the attempt finishes, fails, times out
/// or is [released](NegotiateRealm::release).
pub struct NegotiateRealm<P: ContextProvider> {
    provider: Arc<P>,
    credential: Arc<P::Credential>,
    attempts: Mutex<HashMap<AttemptId, Attempt<P::Context>>>,
    timeout: Duration,
}

impl<P: ContextProvider> NegotiateRealm<P> {
    /// Create a realm around an already acquired accepting credential.
    pub fn new(provider: Arc<P>, credential: Arc<P::Credential>) -> Self {
        NegotiateRealm {
            provider,
            credential,
            attempts: Mutex::new(HashMap::new()),
            timeout: ATTEMPT_TIMEOUT,
        }
    }

    /// Log in as `service_name` on the local host.
    ///
    /// # Errors
    ///
    /// Fails with a credential error if the login is rejected.
    pub fn login(provider: Arc<P>, service_name: &str, realm_file: &Path) -> crate::Result<Self> {
        let credential = provider.login(service_name, realm_file, Role::Accept)?;
        log::info!(
            "accepting {} logins as {} (realm file {})",
            AuthScheme::Negotiate,
            credential.principal(),
            realm_file.display()
        );
        Ok(Self::new(provider, Arc::new(credential)))
    }

    /// Override [`ATTEMPT_TIMEOUT`].
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The service principal this realm accepts for.
    pub fn principal(&self) -> &str {
        self.credential.principal()
    }

    /// Run one accept step for `attempt`.
    ///
    /// The context is taken out of the arena for the duration of the step, so
    /// steps of different attempts never wait on each other. If a parked
    /// context rejects the token, the client may have given up on that
    /// exchange and started over on the same connection: the parked context
    /// is dropped and the token gets one more try on a fresh context.
    ///
    /// # Errors
    ///
    /// A rejected token, a context that outgrew [`MAX_LEGS`] or a context that
    /// could not be created. The attempt is discarded in all cases.
    pub fn validate(
        &self,
        attempt: AttemptId,
        token: &AuthenticationToken,
    ) -> crate::Result<Outcome> {
        if token.scheme() != AuthScheme::Negotiate {
            return Ok(Outcome::NoMatch);
        }

        let (mut entry, step) = match self.take(attempt) {
            Some(mut parked) => match parked.context.step(token.token()) {
                Ok(step) => (parked, step),
                Err(e) => {
                    log::debug!(
                        "negotiation {} restarts after leg {} was rejected: {}",
                        attempt,
                        parked.legs + 1,
                        e
                    );
                    self.first_step(attempt, token)?
                }
            },
            None => self.first_step(attempt, token)?,
        };
        entry.legs += 1;
        entry.touched = Instant::now();

        match step {
            Step::Continue(_) if entry.legs >= MAX_LEGS => {
                log::warn!("negotiation {} abandoned after {} legs", attempt, entry.legs);
                Err(error::negotiation(format!(
                    "exchange did not complete within {MAX_LEGS} legs"
                )))
            }
            Step::Continue(output) => {
                log::trace!("negotiation {} continues after leg {}", attempt, entry.legs);
                self.lock().insert(attempt, entry);
                Ok(Outcome::Continue(output))
            }
            Step::Established(output) => {
                let principal = Principal::new(entry.context.peer_name()?);
                log::debug!(
                    "negotiation {} established for {} in {} leg(s)",
                    attempt,
                    principal,
                    entry.legs
                );
                Ok(Outcome::Authenticated {
                    principal,
                    token: output,
                })
            }
        }
    }

    fn first_step(
        &self,
        attempt: AttemptId,
        token: &AuthenticationToken,
    ) -> crate::Result<(Attempt<P::Context>, Step)> {
        let mut entry = Attempt::new(self.provider.create_context(
            &self.credential,
            self.credential.principal(),
            Role::Accept,
        )?);
        let step = entry.context.step(token.token()).map_err(|e| {
            log::warn!("negotiation {} failed: {}", attempt, e);
            e
        })?;
        Ok((entry, step))
    }

    /// Drop any context parked for `attempt`.
    pub fn release(&self, attempt: AttemptId) {
        if self.lock().remove(&attempt).is_some() {
            log::trace!("negotiation {} released", attempt);
        }
    }

    /// Number of unfinished attempts.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn take(&self, attempt: AttemptId) -> Option<Attempt<P::Context>> {
        let mut attempts = self.lock();
        let timeout = self.timeout;
        attempts.retain(|id, entry| {
            let live = entry.touched.elapsed() < timeout;
            if !live {
                log::debug!("negotiation {} expired", id);
            }
            live
        });
        attempts.remove(&attempt)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AttemptId, Attempt<P::Context>>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P: ContextProvider> Authenticator for NegotiateRealm<P> {
    fn scheme(&self) -> AuthScheme {
        AuthScheme::Negotiate
    }

    fn authenticate(
        &self,
        attempt: AttemptId,
        token: &AuthenticationToken,
    ) -> crate::Result<Outcome> {
        self.validate(attempt, token)
    }

    fn release(&self, attempt: AttemptId) {
        NegotiateRealm::release(self, attempt)
    }
}

impl<P: ContextProvider> fmt::Debug for NegotiateRealm<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiateRealm")
            .field("principal", &self.principal())
            .field("pending", &self.pending())
            .finish()
    }
}
