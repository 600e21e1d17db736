// src/auth/gssapi.rs

//! System GSS-API mechanism (MIT Kerberos or Heimdal) through `libgssapi`.
//!
//! The realm file is handed to the library through `KRB5_CONFIG` before the
//! first credential is acquired. Acceptors read their key from the default
//! keytab (`KRB5_KTNAME`), initiators use the default ticket cache.

use std::path::Path;

use libgssapi::{
    context::{ClientCtx, CtxFlags, SecurityContext as _, ServerCtx},
    credential::{Cred, CredUsage},
    name::Name,
    oid::{OidSet, GSS_MECH_KRB5, GSS_MECH_SPNEGO, GSS_NT_HOSTBASED_SERVICE},
};

use crate::auth::{self, ContextProvider, Credential, Role, SecurityContext, Step};
use crate::config::RealmFile;
use crate::error;

/// The GSS-API security library.
#[derive(Clone, Debug, Default)]
pub struct Gssapi {
    _priv: (),
}

impl Gssapi {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct GssCredential {
    principal: String,
    role: Role,
    // Keeps the credential acquired at login alive for the process lifetime.
    // Contexts acquire their own handle from the same keytab or cache.
    _cred: Cred,
}

impl std::fmt::Debug for GssCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GssCredential")
            .field("principal", &self.principal)
            .field("role", &self.role)
            .finish()
    }
}

impl Credential for GssCredential {
    fn principal(&self) -> &str {
        &self.principal
    }
}

fn mechanisms() -> Result<OidSet, libgssapi::error::Error> {
    let mut mechs = OidSet::new()?;
    mechs.add(&GSS_MECH_SPNEGO)?;
    mechs.add(&GSS_MECH_KRB5)?;
    Ok(mechs)
}

/// `service/host[@REALM]` to the host-based form `service@host`.
fn host_based(principal: &str) -> String {
    auth::without_realm(principal).replacen('/', "@", 1)
}

fn import_service(principal: &str) -> Result<Name, libgssapi::error::Error> {
    let name = Name::new(host_based(principal).as_bytes(), Some(&GSS_NT_HOSTBASED_SERVICE))?;
    name.canonicalize(Some(&GSS_MECH_KRB5))
}

fn acquire(role: Role, principal: Option<&str>) -> crate::Result<Cred> {
    let mechs = mechanisms().map_err(error::credential)?;
    match role {
        Role::Accept => {
            let name = principal
                .map(import_service)
                .transpose()
                .map_err(error::credential)?;
            Cred::acquire(name.as_ref(), None, CredUsage::Accept, Some(&mechs))
        }
        Role::Initiate => Cred::acquire(None, None, CredUsage::Initiate, Some(&mechs)),
    }
    .map_err(error::credential)
}

impl ContextProvider for Gssapi {
    type Credential = GssCredential;
    type Context = GssContext;

    fn login(
        &self,
        service_name: &str,
        realm_file: &Path,
        role: Role,
    ) -> crate::Result<GssCredential> {
        let realm_file = RealmFile::load(realm_file)?;
        std::env::set_var("KRB5_CONFIG", realm_file.path());

        let principal = match role {
            Role::Accept => auth::service_principal(service_name, None)?,
            Role::Initiate => String::new(),
        };
        let cred = acquire(role, Some(principal.as_str()).filter(|p| !p.is_empty()))?;

        let principal = match role {
            Role::Accept => match realm_file.default_realm() {
                Some(realm) => format!("{principal}@{realm}"),
                None => principal,
            },
            Role::Initiate => cred
                .name()
                .map(|name| name.to_string())
                .map_err(error::credential)?,
        };

        Ok(GssCredential {
            principal,
            role,
            _cred: cred,
        })
    }

    fn create_context(
        &self,
        credential: &GssCredential,
        target: &str,
        role: Role,
    ) -> crate::Result<GssContext> {
        if credential.role != role {
            return Err(error::credential(format!(
                "credential for {} cannot be used in the {:?} role",
                credential.principal, role
            )));
        }
        match role {
            Role::Accept => {
                let cred = acquire(role, Some(credential.principal.as_str()))?;
                Ok(GssContext::Server(ServerCtx::new(Some(cred))))
            }
            Role::Initiate => {
                let cred = acquire(role, None)?;
                let target = import_service(target).map_err(error::negotiation)?;
                Ok(GssContext::Client(ClientCtx::new(
                    Some(cred),
                    target,
                    CtxFlags::GSS_C_MUTUAL_FLAG,
                    Some(&GSS_MECH_SPNEGO),
                )))
            }
        }
    }
}

pub enum GssContext {
    Server(ServerCtx),
    Client(ClientCtx),
}

impl std::fmt::Debug for GssContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let role = match self {
            GssContext::Server(_) => Role::Accept,
            GssContext::Client(_) => Role::Initiate,
        };
        f.debug_struct("GssContext")
            .field("role", &role)
            .field("established", &self.is_established())
            .finish()
    }
}

impl SecurityContext for GssContext {
    fn step(&mut self, input: &[u8]) -> crate::Result<Step> {
        let (token, complete) = match self {
            GssContext::Server(ctx) => {
                let token = ctx.step(input).map_err(error::negotiation)?;
                (token, ctx.is_complete())
            }
            GssContext::Client(ctx) => {
                let input = Some(input).filter(|i| !i.is_empty());
                let token = ctx.step(input, None).map_err(error::negotiation)?;
                (token, ctx.is_complete())
            }
        };
        let token = token.map(|buf| buf.to_vec());
        Ok(match (token, complete) {
            (token, true) => Step::Established(token),
            (Some(token), false) => Step::Continue(token),
            (None, false) => {
                return Err(error::negotiation(
                    "context needs more input but produced no token",
                ))
            }
        })
    }

    fn is_established(&self) -> bool {
        match self {
            GssContext::Server(ctx) => ctx.is_complete(),
            GssContext::Client(ctx) => ctx.is_complete(),
        }
    }

    fn peer_name(&mut self) -> crate::Result<String> {
        let name = match self {
            GssContext::Server(ctx) => ctx.source_name(),
            GssContext::Client(ctx) => ctx.target_name(),
        };
        name.map(|name| name.to_string()).map_err(error::negotiation)
    }
}
