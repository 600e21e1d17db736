// src/server/filter.rs

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use pin_project_lite::pin_project;
use tower::{Layer, Service};

use crate::server::{AttemptId, Authenticator, ConnectionInfo, Outcome, Principal};
use crate::token::{self, AuthenticationToken};

/// Installs a [`ChallengeFilter`] in front of a service.
#[derive(Clone, Default)]
pub struct ChallengeLayer {
    authenticators: Arc<Vec<Arc<dyn Authenticator>>>,
}

impl ChallengeLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the strategy for one scheme. Challenges are offered in
    /// registration order.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        Arc::make_mut(&mut self.authenticators).push(authenticator);
        self
    }

    /// Tell every strategy that `attempt` is over, e.g. when its connection
    /// closes.
    pub fn release(&self, attempt: AttemptId) {
        for authenticator in self.authenticators.iter() {
            authenticator.release(attempt);
        }
    }
}

impl<S> Layer<S> for ChallengeLayer {
    type Service = ChallengeFilter<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ChallengeFilter {
            inner,
            authenticators: self.authenticators.clone(),
        }
    }
}

impl fmt::Debug for ChallengeLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let schemes: Vec<_> = self.authenticators.iter().map(|a| a.scheme()).collect();
        f.debug_struct("ChallengeLayer")
            .field("schemes", &schemes)
            .finish()
    }
}

/// Admits authenticated requests over secure connections and answers the
/// rest with `401 Unauthorized`.
///
/// Requests without a [`ConnectionInfo`] extension, or whose connection is
/// not secure, pass through untouched. An admitted request carries its
/// [`Principal`] in the extensions.
#[derive(Clone)]
pub struct ChallengeFilter<S> {
    inner: S,
    authenticators: Arc<Vec<Arc<dyn Authenticator>>>,
}

enum Admission {
    Admit {
        principal: Principal,
        mutual: Option<HeaderValue>,
    },
    Challenge(HeaderMap),
}

impl<S> ChallengeFilter<S> {
    fn admit(&self, attempt: AttemptId, headers: &HeaderMap) -> Admission {
        let Some(value) = headers.get(AUTHORIZATION) else {
            // A bare request starts over; nothing parked for the connection
            // can be continued.
            self.release(attempt);
            return Admission::Challenge(self.challenges());
        };

        for authenticator in self.authenticators.iter() {
            let scheme = authenticator.scheme();
            let token = match AuthenticationToken::from_authorization(scheme, value) {
                Ok(Some(token)) => token,
                Ok(None) => continue,
                Err(e) => {
                    log::debug!("malformed {} credentials on {}: {}", scheme, attempt, e);
                    break;
                }
            };

            match authenticator.authenticate(attempt, &token) {
                Ok(Outcome::Authenticated { principal, token }) => {
                    let mutual = token.and_then(|token| {
                        token::header_value(scheme, &token)
                            .map_err(|e| log::warn!("dropping mutual token: {}", e))
                            .ok()
                    });
                    return Admission::Admit { principal, mutual };
                }
                Ok(Outcome::Continue(token)) => match token::header_value(scheme, &token) {
                    Ok(value) => {
                        let mut headers = HeaderMap::new();
                        headers.append(WWW_AUTHENTICATE, value);
                        return Admission::Challenge(headers);
                    }
                    Err(e) => {
                        authenticator.release(attempt);
                        log::warn!("dropping continuation token: {}", e);
                        break;
                    }
                },
                Ok(Outcome::NoMatch) => continue,
                Err(e) => {
                    log::debug!("{} login on {} rejected: {}", scheme, attempt, e);
                    break;
                }
            }
        }

        Admission::Challenge(self.challenges())
    }

    fn release(&self, attempt: AttemptId) {
        for authenticator in self.authenticators.iter() {
            authenticator.release(attempt);
        }
    }

    fn challenges(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for authenticator in self.authenticators.iter() {
            headers.append(
                WWW_AUTHENTICATE,
                HeaderValue::from_static(authenticator.scheme().as_str()),
            );
        }
        headers
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ChallengeFilter<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: Default,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let Some(info) = req.extensions().get::<ConnectionInfo>().copied() else {
            log::debug!(
                "no connection info on {} {}, passing through unauthenticated",
                req.method(),
                req.uri()
            );
            return ResponseFuture::inner(self.inner.call(req), None);
        };
        if !info.is_secure() {
            return ResponseFuture::inner(self.inner.call(req), None);
        }

        match self.admit(info.id(), req.headers()) {
            Admission::Admit { principal, mutual } => {
                log::trace!("{} admitted on {}", principal, info.id());
                req.extensions_mut().insert(principal);
                ResponseFuture::inner(self.inner.call(req), mutual)
            }
            Admission::Challenge(headers) => {
                let mut res = Response::new(ResBody::default());
                *res.status_mut() = StatusCode::UNAUTHORIZED;
                *res.headers_mut() = headers;
                ResponseFuture::challenge(res)
            }
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for ChallengeFilter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeFilter")
            .field("inner", &self.inner)
            .finish()
    }
}

pin_project! {
    /// Response future of [`ChallengeFilter`].
    pub struct ResponseFuture<F, B> {
        #[pin]
        kind: Kind<F, B>,
    }
}

pin_project! {
    #[project = KindProj]
    enum Kind<F, B> {
        Inner {
            #[pin]
            future: F,
            mutual: Option<HeaderValue>,
        },
        Challenge {
            response: Option<Response<B>>,
        },
    }
}

impl<F, B> ResponseFuture<F, B> {
    fn inner(future: F, mutual: Option<HeaderValue>) -> Self {
        ResponseFuture {
            kind: Kind::Inner { future, mutual },
        }
    }

    fn challenge(response: Response<B>) -> Self {
        ResponseFuture {
            kind: Kind::Challenge {
                response: Some(response),
            },
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<B>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().kind.project() {
            KindProj::Inner { future, mutual } => {
                let mut res = ready!(future.poll(cx))?;
                if let Some(value) = mutual.take() {
                    res.headers_mut().append(WWW_AUTHENTICATE, value);
                }
                Poll::Ready(Ok(res))
            }
            KindProj::Challenge { response } => Poll::Ready(Ok(response
                .take()
                .expect("ResponseFuture polled after completion"))),
        }
    }
}

impl<F, B> fmt::Debug for ResponseFuture<F, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture").finish()
    }
}
