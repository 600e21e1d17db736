use std::convert::Infallible;
use std::future::Future;
use std::net;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use http_spnego::server::ConnectionInfo;
use hyper_util::rt::TokioIo;
use tokio::runtime;
use tokio::sync::oneshot;

pub struct Server {
    addr: net::SocketAddr,
    connections: Arc<AtomicU64>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl Server {
    pub fn addr(&self) -> net::SocketAddr {
        self.addr
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// A server whose connections claim to be encrypted, as if TLS were
/// terminated in front of it.
pub fn http<F, Fut>(func: F) -> Server
where
    F: Fn(http::Request<hyper::body::Incoming>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = http::Response<String>> + Send + 'static,
{
    serve(true, func)
}

/// A server whose connections are plain text.
pub fn plain<F, Fut>(func: F) -> Server
where
    F: Fn(http::Request<hyper::body::Incoming>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = http::Response<String>> + Send + 'static,
{
    serve(false, func)
}

fn serve<F, Fut>(secure: bool, func: F) -> Server
where
    F: Fn(http::Request<hyper::body::Incoming>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = http::Response<String>> + Send + 'static,
{
    let test_name = thread::current()
        .name()
        .unwrap_or("<unknown>")
        .to_string();

    let listener = net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicU64::new(0));
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let counter = connections.clone();
    thread::Builder::new()
        .name(format!("test({})-support-server", test_name))
        .spawn(move || {
            let rt = runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("new rt");
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                loop {
                    tokio::select! {
                        _ = &mut shutdown_rx => break,
                        accepted = listener.accept() => {
                            let (io, _) = accepted.expect("accepted");
                            let id = counter.fetch_add(1, Ordering::SeqCst) + 1;
                            let func = func.clone();
                            let svc = hyper::service::service_fn(move |mut req| {
                                req.extensions_mut().insert(ConnectionInfo::new(id, secure));
                                let fut = func(req);
                                async move { Ok::<_, Infallible>(fut.await) }
                            });
                            tokio::spawn(async move {
                                let _ = hyper::server::conn::http1::Builder::new()
                                    .serve_connection(TokioIo::new(io), svc)
                                    .await;
                            });
                        }
                    }
                }
                // Let in-flight connections wind down.
                tokio::time::sleep(Duration::from_millis(10)).await;
            });
        })
        .expect("thread spawn");

    Server {
        addr,
        connections,
        shutdown_tx: Some(shutdown_tx),
    }
}
