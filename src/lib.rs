// src/lib.rs

#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # http-spnego
//!
//! Mutual authentication of HTTP clients and servers with the SPNEGO
//! ("Negotiate") scheme, usually backed by Kerberos.
//!
//! - The **server** side is a [tower] layer. It answers requests arriving over
//!   secure connections without valid credentials with
//!   `401 Unauthorized` + `WWW-Authenticate: Negotiate`, runs multi-leg
//!   exchanges one accept step per request, and hands the verified
//!   [`Principal`](server::Principal) to the wrapped service.
//! - The **client** side answers those challenges with
//!   `Authorization: Negotiate <token>` and caches what worked for a few
//!   seconds so follow-up requests skip the extra round trip.
//!
//! The security library itself sits behind
//! [`ContextProvider`](auth::ContextProvider). Enable the `gssapi` feature for
//! the system GSS-API library, or use the in-memory
//! [`MemoryKdc`](auth::memory::MemoryKdc) where no KDC is around.
//!
//! ## Server
//!
//! ```no_run
//! use http_spnego::{auth::memory::MemoryKdc, server, ServerSecurityConfig};
//!
//! # fn run() -> http_spnego::Result<()> {
//! let config = ServerSecurityConfig::new()
//!     .with_schemes("negotiate")?
//!     .krb5_conf("/etc/krb5.conf")
//!     .service_name("HTTP");
//!
//! if let Some(layer) = server::bind(&config, MemoryKdc::new("EXAMPLE.COM"))? {
//!     // wrap the application service with `layer`
//! #   let _ = layer;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The host inserts a [`ConnectionInfo`](server::ConnectionInfo) into every
//! request so the filter knows which connection a leg belongs to and whether
//! it is encrypted.
//!
//! ## Client
//!
//! ```no_run
//! use http_spnego::{auth::memory::MemoryKdc, client::NegotiateClient, AuthScheme};
//! use http_spnego::ClientSecurityConfig;
//!
//! # async fn run() -> http_spnego::Result<()> {
//! let config = ClientSecurityConfig::new()
//!     .auth_scheme(AuthScheme::Negotiate)
//!     .krb5_conf("/etc/krb5.conf")
//!     .service_name("HTTP");
//! let service = url::Url::parse("https://svc.example.com/").unwrap();
//! let client = NegotiateClient::from_config(config, service, MemoryKdc::new("EXAMPLE.COM"))?;
//!
//! let request = http::Request::get("https://svc.example.com/api").body(()).unwrap();
//! let response = client
//!     .execute(request, |req| async move {
//!         // hand `req` to an HTTP client here
//!         Ok::<_, std::convert::Infallible>(http::Response::new(req.into_body()))
//!     })
//!     .await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```
//!
//! ## Optional Features
//!
//! - **gssapi**: Kerberos/SPNEGO through `libgssapi`.

pub use http::header::{HeaderName, HeaderValue};
pub use url::Url;

pub use self::config::{ClientSecurityConfig, RealmFile, ServerSecurityConfig};
pub use self::error::{Error, Result};
pub use self::scheme::AuthScheme;
pub use self::token::{AuthenticationToken, Challenge};

pub mod auth;
pub mod client;
pub mod config;
mod error;
pub mod scheme;
pub mod server;
pub mod token;
