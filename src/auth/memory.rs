// src/auth/memory.rs

//! An in-process ticket authority.
//!
//! `MemoryKdc` stands in for Kerberos where no KDC is available. It knows a
//! realm, the service principals it holds keys for and the client whose
//! tickets are "cached". Its tokens are opaque to callers and go through the
//! same header framing as real SPNEGO tokens, so servers and clients built on
//! it exercise the full negotiation path.
//!
//! The exchange is either one leg (client token, server accepts and replies
//! with a mutual-authentication token) or two legs, where the server first
//! answers with a continuation challenge the client has to echo back.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::auth::{self, ContextProvider, Credential, Role, SecurityContext, Step};
use crate::config::RealmFile;
use crate::error;

const MAGIC: &[u8] = b"MEMKRB";

const AP_REQ: u8 = 1;
const CHALLENGE: u8 = 2;
const CHALLENGE_REPLY: u8 = 3;
const AP_REP: u8 = 4;

#[derive(Clone, Debug)]
pub struct MemoryKdc {
    realm: String,
    services: HashSet<String>,
    client: Option<String>,
    two_legs: bool,
    nonces: Arc<AtomicU64>,
}

impl MemoryKdc {
    pub fn new(realm: impl Into<String>) -> Self {
        MemoryKdc {
            realm: realm.into(),
            services: HashSet::new(),
            client: None,
            two_legs: false,
            nonces: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Put a key for `service_principal` (`service/host`, no realm) in the
    /// keytab.
    pub fn with_service(mut self, service_principal: impl Into<String>) -> Self {
        self.services.insert(service_principal.into().to_lowercase());
        self
    }

    /// Put a ticket-granting ticket for `name` (no realm) in the ticket cache.
    pub fn with_client(mut self, name: impl Into<String>) -> Self {
        self.client = Some(name.into());
        self
    }

    /// Require a continuation round trip before the server accepts.
    pub fn two_legs(mut self, enabled: bool) -> Self {
        self.two_legs = enabled;
        self
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    fn qualify(&self, name: &str) -> String {
        format!("{}@{}", auth::without_realm(name), self.realm)
    }

    fn has_key(&self, service_principal: &str) -> bool {
        self.services
            .contains(&auth::without_realm(service_principal).to_lowercase())
    }

    fn next_nonce(&self) -> u64 {
        self.nonces.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Clone, Debug)]
pub struct MemoryCredential {
    principal: String,
    role: Role,
}

impl Credential for MemoryCredential {
    fn principal(&self) -> &str {
        &self.principal
    }
}

impl ContextProvider for MemoryKdc {
    type Credential = MemoryCredential;
    type Context = MemoryContext;

    fn login(
        &self,
        service_name: &str,
        realm_file: &Path,
        role: Role,
    ) -> crate::Result<MemoryCredential> {
        let realm_file = RealmFile::load(realm_file)?;
        if let Some(realm) = realm_file.default_realm() {
            if realm != self.realm {
                return Err(error::credential(format!(
                    "default realm {realm} in {} is not served by this KDC ({})",
                    realm_file.path().display(),
                    self.realm
                )));
            }
        }

        let principal = match role {
            Role::Accept => {
                let spn = auth::service_principal(service_name, None)?;
                if !self.has_key(&spn) {
                    return Err(error::credential(format!("no key for {spn} in keytab")));
                }
                self.qualify(&spn)
            }
            Role::Initiate => match &self.client {
                Some(client) => self.qualify(client),
                None => return Err(error::credential("no credentials in ticket cache")),
            },
        };

        Ok(MemoryCredential { principal, role })
    }

    fn create_context(
        &self,
        credential: &MemoryCredential,
        target: &str,
        role: Role,
    ) -> crate::Result<MemoryContext> {
        if credential.role != role {
            return Err(error::credential(format!(
                "credential for {} cannot be used in the {:?} role",
                credential.principal, role
            )));
        }
        Ok(MemoryContext {
            kdc: self.clone(),
            role,
            own: credential.principal.clone(),
            target: self.qualify(target),
            state: State::New,
        })
    }
}

#[derive(Debug)]
enum State {
    New,
    /// Initiator sent its ticket and waits for the server.
    Requested,
    /// Acceptor sent a challenge and waits for the echo.
    Challenged { client: String, nonce: u64 },
    Established { peer: String },
}

#[derive(Debug)]
pub struct MemoryContext {
    kdc: MemoryKdc,
    role: Role,
    own: String,
    target: String,
    state: State,
}

impl MemoryContext {
    fn initiate(&mut self, input: &[u8]) -> crate::Result<Step> {
        match &self.state {
            State::New => {
                if !input.is_empty() {
                    return Err(error::negotiation("unexpected token before the first leg"));
                }
                if !self.kdc.has_key(&self.target) {
                    return Err(error::negotiation(format!(
                        "server not found in Kerberos database: {}",
                        self.target
                    )));
                }
                let nonce = self.kdc.next_nonce().to_string();
                let token = encode(AP_REQ, &[&self.own, &self.target, &nonce]);
                self.state = State::Requested;
                Ok(Step::Continue(token))
            }
            State::Requested => {
                let (kind, fields) = decode(input)?;
                match (kind, fields.as_slice()) {
                    (CHALLENGE, [nonce]) => {
                        let token = encode(CHALLENGE_REPLY, &[&self.own, nonce]);
                        self.state = State::Established {
                            peer: self.target.clone(),
                        };
                        Ok(Step::Established(Some(token)))
                    }
                    (AP_REP, [server]) if *server == self.target => {
                        self.state = State::Established {
                            peer: self.target.clone(),
                        };
                        Ok(Step::Established(None))
                    }
                    (AP_REP, [server]) => Err(error::negotiation(format!(
                        "mutual authentication failed: expected {}, got {server}",
                        self.target
                    ))),
                    _ => Err(error::negotiation("unexpected token from server")),
                }
            }
            _ => Err(error::negotiation("context already established")),
        }
    }

    fn accept(&mut self, input: &[u8]) -> crate::Result<Step> {
        let (kind, fields) = decode(input)?;
        match (&self.state, kind, fields.as_slice()) {
            (State::New, AP_REQ, [client, target, _nonce]) => {
                if auth::without_realm(target) != auth::without_realm(&self.own) {
                    return Err(error::negotiation(format!(
                        "ticket for {target} cannot be accepted by {}",
                        self.own
                    )));
                }
                if !client.ends_with(&format!("@{}", self.kdc.realm)) {
                    return Err(error::negotiation(format!("{client} is not in our realm")));
                }
                let client = client.to_string();
                if self.kdc.two_legs {
                    let nonce = self.kdc.next_nonce();
                    self.state = State::Challenged { client, nonce };
                    Ok(Step::Continue(encode(CHALLENGE, &[&nonce.to_string()])))
                } else {
                    self.state = State::Established { peer: client };
                    Ok(Step::Established(Some(encode(AP_REP, &[&self.own]))))
                }
            }
            (State::Challenged { client, nonce }, CHALLENGE_REPLY, [from, echoed]) => {
                if from != client || *echoed != nonce.to_string() {
                    return Err(error::negotiation("challenge reply does not match"));
                }
                self.state = State::Established {
                    peer: client.clone(),
                };
                Ok(Step::Established(Some(encode(AP_REP, &[&self.own]))))
            }
            (State::Established { .. }, _, _) => {
                Err(error::negotiation("context already established"))
            }
            _ => Err(error::negotiation("unexpected token from client")),
        }
    }
}

impl SecurityContext for MemoryContext {
    fn step(&mut self, input: &[u8]) -> crate::Result<Step> {
        match self.role {
            Role::Initiate => self.initiate(input),
            Role::Accept => self.accept(input),
        }
    }

    fn is_established(&self) -> bool {
        matches!(self.state, State::Established { .. })
    }

    fn peer_name(&mut self) -> crate::Result<String> {
        match &self.state {
            State::Established { peer } => Ok(peer.clone()),
            _ => Err(error::negotiation("context is not established")),
        }
    }
}

fn encode(kind: u8, fields: &[&str]) -> Vec<u8> {
    let mut token = Vec::with_capacity(MAGIC.len() + 1 + fields.iter().map(|f| f.len() + 1).sum::<usize>());
    token.extend_from_slice(MAGIC);
    token.push(kind);
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            token.push(0);
        }
        token.extend_from_slice(field.as_bytes());
    }
    token
}

fn decode(token: &[u8]) -> crate::Result<(u8, Vec<&str>)> {
    let body = token
        .strip_prefix(MAGIC)
        .ok_or_else(|| error::negotiation("defective token detected"))?;
    let (&kind, fields) = body
        .split_first()
        .ok_or_else(|| error::negotiation("truncated token"))?;
    let fields = std::str::from_utf8(fields).map_err(error::negotiation)?;
    Ok((kind, fields.split('\0').collect()))
}
