// src/client/mod.rs

//! The initiating side.
//!
//! [`NegotiateProvider`] turns server challenges into `Authorization` headers
//! for one service. [`AuthenticationStore`] holds the registered
//! authentications together with a short-lived [`ResultCache`] of headers
//! that already worked, and [`NegotiateClient`] drives whole exchanges over a
//! caller-supplied transport.

mod cache;
mod negotiate;
mod provider;
mod store;

pub use self::cache::{ResultCache, DEFAULT_CAPACITY, DEFAULT_TTL};
pub use self::negotiate::{NegotiateClient, MAX_ROUNDTRIPS};
pub use self::provider::{
    Authentication, AuthenticationProvider, AuthenticationResult, NegotiateProvider,
};
pub use self::store::AuthenticationStore;
