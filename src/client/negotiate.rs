// src/client/negotiate.rs

//! The client exchange: answer `401` challenges until the server admits the
//! request, reusing recent results where possible.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use http::{Request, Response, StatusCode};
use url::Url;

use crate::auth::ContextProvider;
use crate::client::provider::{Authentication, AuthenticationProvider};
use crate::client::store::AuthenticationStore;
use crate::config::ClientSecurityConfig;
use crate::error::{self, BoxError};
use crate::scheme::AuthScheme;
use crate::token::{self, Challenge};

/// Maximum authenticated requests sent for one exchange.
pub const MAX_ROUNDTRIPS: usize = 5;

/// Runs requests through [`AuthenticationStore`] authentications.
///
/// Exchanges for the same origin are serialized: an authentication holds the
/// context of one exchange at a time, and a caller that waited behind another
/// exchange gets to reuse its result.
#[derive(Debug)]
pub struct NegotiateClient {
    store: Arc<AuthenticationStore>,
    exchanges: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl NegotiateClient {
    pub fn new(store: Arc<AuthenticationStore>) -> Self {
        NegotiateClient {
            store,
            exchanges: DashMap::new(),
        }
    }

    /// A client with the authentications `config` asks for on `service_uri`.
    ///
    /// # Errors
    ///
    /// See [`AuthenticationProvider::authentications`].
    pub fn from_config<P: ContextProvider>(
        config: ClientSecurityConfig,
        service_uri: Url,
        provider: P,
    ) -> crate::Result<Self> {
        let store = AuthenticationStore::new();
        for authentication in
            AuthenticationProvider::new(config, service_uri).authentications(provider)?
        {
            store.add_authentication(authentication);
        }
        Ok(NegotiateClient::new(Arc::new(store)))
    }

    pub fn store(&self) -> &AuthenticationStore {
        &self.store
    }

    /// Send `request` with `send`, authenticating as needed.
    ///
    /// 1. A cached result covering the URI is applied up front. If the server
    ///    still answers `401`, the result is invalidated.
    /// 2. On a `401` with a challenge an authentication matches, a fresh
    ///    exchange runs for up to [`MAX_ROUNDTRIPS`] authenticated requests.
    /// 3. The result of a successful exchange is cached.
    ///
    /// Responses the exchange cannot improve on, such as a `401` with no
    /// usable challenge or a rejected token, are returned as they are.
    ///
    /// # Errors
    ///
    /// Transport errors from `send`, negotiation failures of the security
    /// context (including failed mutual authentication) and running out of
    /// round trips.
    pub async fn execute<B, R, F, Fut, E>(
        &self,
        request: Request<B>,
        mut send: F,
    ) -> crate::Result<Response<R>>
    where
        B: Clone,
        F: FnMut(Request<B>) -> Fut,
        Fut: Future<Output = Result<Response<R>, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let url = request_url(&request)?;
        let original = clone_request(&request);

        let response = match self.store.find_result(&url) {
            Some(result) => {
                let mut request = request;
                result.apply(&mut request);
                let response = send(request).await.map_err(transport(&url))?;
                if response.status() != StatusCode::UNAUTHORIZED {
                    return Ok(response);
                }
                log::debug!("cached authentication for {} rejected", result.uri());
                self.store.remove_result(result.uri());
                response
            }
            None => {
                let response = send(request).await.map_err(transport(&url))?;
                if response.status() != StatusCode::UNAUTHORIZED {
                    return Ok(response);
                }
                response
            }
        };

        self.negotiate(&original, &url, response, &mut send).await
    }

    async fn negotiate<B, R, F, Fut, E>(
        &self,
        original: &Request<B>,
        url: &Url,
        mut response: Response<R>,
        send: &mut F,
    ) -> crate::Result<Response<R>>
    where
        B: Clone,
        F: FnMut(Request<B>) -> Fut,
        Fut: Future<Output = Result<Response<R>, E>>,
        E: Into<BoxError>,
    {
        let scheme = AuthScheme::Negotiate;
        let Some(authentication) = self.store.find_authentication(scheme.as_str(), url) else {
            log::debug!("no authentication for {}", url);
            return Ok(response);
        };
        if token::parse_challenge(response.headers(), scheme).is_none() {
            return Ok(response);
        }

        let lock = self.exchange_lock(url);
        let _exclusive = lock.lock().await;

        // Another exchange may have finished while this one waited.
        if let Some(result) = self.store.find_result(url) {
            let mut request = clone_request(original);
            result.apply(&mut request);
            response = send(request).await.map_err(transport(url))?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }
            self.store.remove_result(result.uri());
        }

        let Some(mut challenge) = token::parse_challenge(response.headers(), scheme) else {
            return Ok(response);
        };
        let exchange = Exchange(&*authentication);

        for round in 1..=MAX_ROUNDTRIPS {
            let Some(result) = exchange.0.authenticate(&challenge, url)? else {
                log::debug!("nothing to answer {} with; returning server response", url);
                return Ok(response);
            };

            let mut request = clone_request(original);
            result.apply(&mut request);
            response = send(request).await.map_err(transport(url))?;

            let next = token::parse_challenge(response.headers(), scheme);
            if response.status() == StatusCode::UNAUTHORIZED {
                match next {
                    Some(next @ Challenge::Continue(_)) => {
                        log::trace!("round {} for {} continues", round, url);
                        challenge = next;
                        continue;
                    }
                    _ => {
                        log::debug!("server rejected {} token for {}", scheme, url);
                        return Ok(response);
                    }
                }
            }

            if response.status().is_success() {
                if let Some(reply @ Challenge::Continue(_)) = next {
                    log::debug!("mutual authentication token received from {}", url);
                    exchange.0.authenticate(&reply, url)?;
                }
                self.store.add_result(result);
            }
            return Ok(response);
        }

        Err(error::negotiation("too many authentication round-trips").with_uri(url.clone()))
    }

    fn exchange_lock(&self, url: &Url) -> Arc<tokio::sync::Mutex<()>> {
        self.exchanges
            .entry(url.origin().ascii_serialization())
            .or_default()
            .clone()
    }
}

/// Releases the exchange's security context when it ends, including when the
/// exchange future is dropped.
struct Exchange<'a>(&'a dyn Authentication);

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        self.0.reset();
    }
}

fn transport<E: Into<BoxError>>(url: &Url) -> impl FnOnce(E) -> crate::Error + '_ {
    move |e| error::transport(e).with_uri(url.clone())
}

fn request_url<B>(request: &Request<B>) -> crate::Result<Url> {
    Url::parse(&request.uri().to_string())
        .map_err(|e| error::config(format!("request uri {} is not absolute: {e}", request.uri())))
}

fn clone_request<B: Clone>(request: &Request<B>) -> Request<B> {
    let mut clone = Request::new(request.body().clone());
    *clone.method_mut() = request.method().clone();
    *clone.uri_mut() = request.uri().clone();
    *clone.version_mut() = request.version();
    *clone.headers_mut() = request.headers().clone();
    clone
}
