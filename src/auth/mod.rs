// src/auth/mod.rs

//! Credentials and security contexts.
//!
//! A [`ContextProvider`] is the security library: it performs the one-time
//! login for a role and hands out one [`SecurityContext`] per negotiation
//! attempt. Two are provided:
//!
//! - [`memory::MemoryKdc`], an in-process ticket authority that needs no
//!   Kerberos infrastructure (tests, local development);
//! - `gssapi::Gssapi` (feature `gssapi`), backed by the system GSS-API
//!   library.

use std::path::Path;

use crate::error;

#[cfg(feature = "gssapi")]
pub mod gssapi;
pub mod memory;

/// Which end of the exchange a credential or context serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// The server side. Logs in with a keytab.
    Accept,
    /// The client side. Logs in from the ticket cache.
    Initiate,
}

/// The outcome of one successful context step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// More input from the peer is needed. The token must be sent to it.
    Continue(Vec<u8>),
    /// The context is established. A final token may still be owed to the
    /// peer (the mutual-authentication reply on the accepting side).
    Established(Option<Vec<u8>>),
}

/// A long-lived identity obtained by a login.
pub trait Credential: Send + Sync + 'static {
    /// The principal this credential speaks for, e.g. `HTTP/web.example.com@EXAMPLE.COM`.
    fn principal(&self) -> &str;
}

/// A stateful negotiation handle, owned by exactly one attempt.
pub trait SecurityContext: Send + 'static {
    /// Feed the peer's token (empty on the initiator's first call) and produce
    /// the next step.
    ///
    /// # Errors
    ///
    /// Any fault of the underlying mechanism (corrupt token, wrong service
    /// ticket, clock skew, expired ticket) is a negotiation error. The context
    /// must not be stepped again afterwards.
    fn step(&mut self, input: &[u8]) -> crate::Result<Step>;

    fn is_established(&self) -> bool;

    /// The authenticated peer. For an accepting context this is the client
    /// principal; only available once established.
    fn peer_name(&mut self) -> crate::Result<String>;
}

/// The security library seam.
pub trait ContextProvider: Send + Sync + 'static {
    type Credential: Credential;
    type Context: SecurityContext;

    /// Acquire credentials for `role`. Comparatively expensive; run once at
    /// startup and share the result.
    ///
    /// # Errors
    ///
    /// A missing realm file, rejected keytab or ticket cache, or an
    /// unresolvable host name is a credential error.
    fn login(
        &self,
        service_name: &str,
        realm_file: &Path,
        role: Role,
    ) -> crate::Result<Self::Credential>;

    /// Create a fresh context bound to `credential`. `target` is the service
    /// principal of the peer when initiating and our own when accepting.
    ///
    /// # Errors
    ///
    /// Fails with a credential error if `credential` was not acquired for
    /// `role`, or a negotiation error if the mechanism refuses the target.
    fn create_context(
        &self,
        credential: &Self::Credential,
        target: &str,
        role: Role,
    ) -> crate::Result<Self::Context>;
}

/// Build the service principal `service/host` for `hostname`.
///
/// The host is lower-cased. A missing, empty or wildcard (`0.0.0.0`) host is
/// replaced by the canonical name of the local host.
///
/// # Errors
///
/// Fails with a credential error if the local host name cannot be determined.
pub fn service_principal(service: &str, hostname: Option<&str>) -> crate::Result<String> {
    let host = match hostname.map(str::trim) {
        Some(host) if !host.is_empty() && host != "0.0.0.0" => host.to_owned(),
        _ => local_hostname()?,
    };
    Ok(format!("{}/{}", service, host.to_lowercase()))
}

fn local_hostname() -> crate::Result<String> {
    let name = hostname::get().map_err(error::credential)?;
    let name = name
        .into_string()
        .map_err(|name| error::credential(format!("host name {name:?} is not valid unicode")))?;
    Ok(canonical_hostname(&name))
}

/// The fully qualified name the resolver reports for `name`, or `name` itself
/// if it does not resolve.
pub(crate) fn canonical_hostname(name: &str) -> String {
    match resolve_canonical(name) {
        Some(canonical) => canonical,
        None => {
            log::debug!("no canonical name for host {}, using it as is", name);
            name.to_owned()
        }
    }
}

#[cfg(unix)]
fn resolve_canonical(name: &str) -> Option<String> {
    let hints = dns_lookup::AddrInfoHints {
        flags: libc::AI_CANONNAME,
        ..dns_lookup::AddrInfoHints::default()
    };
    dns_lookup::getaddrinfo(Some(name), None, Some(hints))
        .ok()?
        .filter_map(Result::ok)
        .find_map(|info| info.canonname.filter(|canonical| !canonical.is_empty()))
}

#[cfg(not(unix))]
fn resolve_canonical(_name: &str) -> Option<String> {
    None
}

/// Drop the `@REALM` suffix of a principal name.
pub(crate) fn without_realm(principal: &str) -> &str {
    principal
        .rsplit_once('@')
        .map_or(principal, |(name, _)| name)
}
