//! # HTTP Server
//!
//! HTTP/1.1 server built on Hyper and Tokio.
//! Implements graceful shutdown with signal handling.
//!
//! ## Key Features
//!
//! - One task per connection, each request dispatched through the [`Application`]
//! - Graceful shutdown on Ctrl-C with a bounded drain
//! - Connection keep-alive support
//! - `x-request-id` generated when missing and echoed on the response

use crate::application::Application;
use crate::error::{Error, Result};
use crate::request::{Request, RequestBody, REQUEST_ID_HEADER};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpSocket};
use tracing::{error, info, warn};

/// Bind the configured address
///
/// # Errors
///
/// Returns `Error::BindError` with the failing address.
pub fn bind(address: SocketAddr) -> Result<TcpListener> {
    let bind_error = |source: std::io::Error| Error::BindError {
        address: address.to_string(),
        source,
    };

    let socket = if address.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_error)?;
    socket.set_reuseaddr(true).map_err(bind_error)?;
    #[cfg(not(windows))]
    {
        socket.set_reuseport(true).map_err(bind_error)?;
    }
    socket.bind(address).map_err(bind_error)?;
    socket.listen(1024).map_err(bind_error)
}

/// Serve `app` on its configured address until Ctrl-C
///
/// # Errors
///
/// Returns `Error::BindError` if the address cannot be bound, or the accept
/// error that stopped the loop.
pub async fn serve(app: Application) -> Result<()> {
    let listener = bind(app.config().address)?;
    serve_with_shutdown(app, listener, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves
///
/// # Errors
///
/// Returns the accept error that stopped the loop.
pub async fn serve_with_shutdown<S>(app: Application, listener: TcpListener, shutdown: S) -> Result<()>
where
    S: std::future::Future<Output = ()>,
{
    let addr = listener.local_addr()?;
    info!("Server listening on http://{}", addr);

    let active = Arc::new(AtomicUsize::new(0));
    let keep_alive = app.config().keep_alive;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                let (stream, remote_addr) = accept_result?;
                let io = TokioIo::new(stream);
                let app = app.clone();
                let active = Arc::clone(&active);

                tokio::task::spawn(async move {
                    active.fetch_add(1, Ordering::Relaxed);

                    let service = service_fn(move |req| {
                        let app = app.clone();
                        async move { Ok::<_, Infallible>(handle_request(&app, req, remote_addr).await) }
                    });
                    if let Err(err) = http1::Builder::new()
                        .keep_alive(keep_alive)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection: {:?}", err);
                    }
                    active.fetch_sub(1, Ordering::Relaxed);
                });
            }
            () = &mut shutdown => {
                info!("Shutdown signal received, stopping server...");
                break;
            }
        }
    }

    let timeout = app.config().shutdown_timeout;
    let drain = async {
        while active.load(Ordering::Relaxed) > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    if tokio::time::timeout(timeout, drain).await.is_err() {
        warn!(
            connections = active.load(Ordering::Relaxed),
            "Shutdown timeout elapsed with open connections"
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C signal handler: {}", err);
        std::future::pending::<()>().await;
    }
}

/// Convert, dispatch, and log one hyper request
async fn handle_request(
    app: &Application,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> hyper::Response<Full<Bytes>> {
    let started = Instant::now();
    let version = req.version();
    let (parts, body) = req.into_parts();

    let mut request = Request::from_parts(parts, Some(remote_addr));
    let request_id = match request.request_id() {
        Some(id) => id.to_string(),
        None => {
            let id = generate_request_id();
            request.set_header(REQUEST_ID_HEADER, &id);
            id
        }
    };
    let method = request.method().clone();
    let path = request.path().to_string();

    let response = app.handle(request, RequestBody::new(body)).await;
    response.set_header(REQUEST_ID_HEADER, &request_id);

    info!(
        remote_addr = %remote_addr,
        method = %method,
        path = %path,
        version = ?version,
        status = response.status().as_u16(),
        elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
        request_id = %request_id,
        "Request completed"
    );
    response.into_hyper()
}

static REQUEST_COUNTER: AtomicUsize = AtomicUsize::new(1);

fn generate_request_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", now.as_nanos(), counter)
}
