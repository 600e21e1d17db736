// tests/negotiate_integration.rs

//! Integration tests over real sockets: a hyper server guarded by the
//! challenge filter and a hyper client driven by `NegotiateClient`.

mod support;
use support::server;

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use http_spnego::auth::{self, memory::MemoryKdc};
use http_spnego::client::{AuthenticationStore, NegotiateClient, NegotiateProvider};
use http_spnego::server::{ChallengeLayer, NegotiateRealm, Principal};
use http_spnego::{AuthScheme, ClientSecurityConfig, Url};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tower::{service_fn, Layer, ServiceExt};

type HttpClient = Client<hyper_util::client::legacy::connect::HttpConnector, String>;

/// One client connection. Every leg of an exchange has to reach the server
/// over the same connection.
type Connection = Arc<tokio::sync::Mutex<hyper::client::conn::http1::SendRequest<String>>>;

fn kdc(two_legs: bool) -> MemoryKdc {
    MemoryKdc::new("EXAMPLE.COM")
        .with_service(auth::service_principal("HTTP", None).unwrap())
        .with_client("alice")
        .two_legs(two_legs)
}

/// Starts a server guarded by the filter. `hits` counts requests that reached
/// the application.
fn guarded(name: &str, two_legs: bool, secure: bool, hits: Arc<AtomicUsize>) -> server::Server {
    let realm = NegotiateRealm::login(
        Arc::new(kdc(two_legs)),
        "HTTP",
        &support::realm_file(name),
    )
    .unwrap();
    let app = ChallengeLayer::new()
        .authenticator(Arc::new(realm))
        .layer(service_fn(move |req: Request<String>| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                let body = req
                    .extensions()
                    .get::<Principal>()
                    .map_or_else(|| "anonymous".to_owned(), |p| p.to_string());
                Ok::<_, Infallible>(Response::new(body))
            }
        }));

    let func = move |req: Request<hyper::body::Incoming>| {
        let app = app.clone();
        async move {
            let (parts, body) = req.into_parts();
            let body = body.collect().await.unwrap().to_bytes();
            let req = Request::from_parts(parts, String::from_utf8(body.to_vec()).unwrap());
            match app.oneshot(req).await {
                Ok(res) => res,
                Err(never) => match never {},
            }
        }
    };
    if secure {
        server::http(func)
    } else {
        server::plain(func)
    }
}

fn negotiate_client(name: &str, base: &Url, two_legs: bool) -> NegotiateClient {
    let config = ClientSecurityConfig::new()
        .auth_scheme(AuthScheme::Negotiate)
        .krb5_conf(support::realm_file(name))
        .service_name("HTTP");
    let provider = NegotiateProvider::new(&config, base.clone(), Arc::new(kdc(two_legs)))
        .unwrap()
        .with_target(auth::service_principal("HTTP", None).unwrap());
    let store = AuthenticationStore::new();
    store.add_authentication(Arc::new(provider));
    NegotiateClient::new(Arc::new(store))
}

fn http_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build_http()
}

async fn connect(server: &server::Server) -> Connection {
    let stream = tokio::net::TcpStream::connect(server.addr()).await.unwrap();
    let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });
    Arc::new(tokio::sync::Mutex::new(sender))
}

async fn get(
    client: &NegotiateClient,
    connection: &Connection,
    uri: &str,
    sent: &AtomicUsize,
) -> http_spnego::Result<(StatusCode, String)> {
    let req = Request::get(uri).body(String::new()).unwrap();
    let res = client
        .execute(req, |req| {
            sent.fetch_add(1, Ordering::SeqCst);
            let connection = connection.clone();
            async move {
                let mut sender = connection.lock().await;
                sender.ready().await?;
                sender.send_request(req).await
            }
        })
        .await?;
    let status = res.status();
    let body = res.into_body().collect().await.unwrap().to_bytes();
    Ok((status, String::from_utf8(body.to_vec()).unwrap()))
}

#[tokio::test]
async fn test_no_credentials_is_challenged() {
    let _ = env_logger::try_init();
    let hits = Arc::new(AtomicUsize::new(0));
    let server = guarded("it-challenge", false, true, hits.clone());

    let res = http_client()
        .request(
            Request::get(format!("http://{}/", server.addr()))
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.headers()[WWW_AUTHENTICATE], "Negotiate");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_plain_connection_is_not_authenticated() {
    let hits = Arc::new(AtomicUsize::new(0));
    let server = guarded("it-plain", false, false, hits.clone());

    let res = http_client()
        .request(
            Request::get(format!("http://{}/", server.addr()))
                .header(AUTHORIZATION, "Negotiate Z2FyYmFnZQ==")
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"anonymous");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_single_leg_then_cached() {
    let _ = env_logger::try_init();
    let hits = Arc::new(AtomicUsize::new(0));
    let server = guarded("it-single", false, true, hits.clone());
    let base = Url::parse(&format!("http://{}/api/v1", server.addr())).unwrap();
    let client = negotiate_client("it-single", &base, false);
    let http = connect(&server).await;
    let sent = AtomicUsize::new(0);

    let (status, body) = get(&client, &http, base.as_str(), &sent).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "alice@EXAMPLE.COM");
    assert_eq!(sent.load(Ordering::SeqCst), 2);

    // Below the authenticated URI the cached header goes out up front.
    let below = format!("{}/resource/42", base);
    let (status, body) = get(&client, &http, &below, &sent).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "alice@EXAMPLE.COM");
    assert_eq!(sent.load(Ordering::SeqCst), 3);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_two_legs_and_stale_cache() {
    let _ = env_logger::try_init();
    let hits = Arc::new(AtomicUsize::new(0));
    let server = guarded("it-two-legs", true, true, hits.clone());
    let base = Url::parse(&format!("http://{}/", server.addr())).unwrap();
    let client = negotiate_client("it-two-legs", &base, true);
    let http = connect(&server).await;
    let sent = AtomicUsize::new(0);

    let (status, body) = get(&client, &http, base.as_str(), &sent).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "alice@EXAMPLE.COM");
    // Bare request, ticket, challenge reply.
    assert_eq!(sent.load(Ordering::SeqCst), 3);
    assert!(client.store().find_result(&base).is_some());

    // A challenge reply is only good once: the cached header is rejected,
    // dropped, and the exchange runs again.
    let (status, body) = get(&client, &http, base.as_str(), &sent).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "alice@EXAMPLE.COM");
    assert_eq!(sent.load(Ordering::SeqCst), 6);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    let server = server::http(|_req| async { Response::new(String::new()) });
    let base = Url::parse(&format!("http://{}/", server.addr())).unwrap();
    drop(server);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let client = negotiate_client("it-unreachable", &base, false);
    let http = http_client();
    let err = client
        .execute(
            Request::get(base.as_str()).body(String::new()).unwrap(),
            |req| http.request(req),
        )
        .await
        .unwrap_err();
    assert!(err.is_transport());
    assert_eq!(err.uri(), Some(&base));
}
