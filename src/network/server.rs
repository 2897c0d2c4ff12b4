// HTTP server using Hyper
// Tuned TCP listener, auto-negotiated HTTP/1.1 or HTTP/2 connections, request conversion

use crate::host::Host;
use crate::http::{Request, Response};
use crate::network::NetworkConfig;
use anyhow::Result;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use socket2::{Domain, Protocol, Socket, Type};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Accept connections until `shutdown` is cancelled
#[instrument(skip(config, host, shutdown))]
pub async fn serve(config: NetworkConfig, host: Arc<Host>, shutdown: CancellationToken) -> Result<()> {
    let addr = config.socket_addr()?;
    let socket = create_optimized_socket(&addr, &config)?;

    let std_listener: std::net::TcpListener = socket.into();
    std_listener.set_nonblocking(true)?;
    let listener = TcpListener::from_std(std_listener)?;

    info!("HTTP server listening on {}", addr);

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer_addr)) => {
                let host = host.clone();
                let shutdown = shutdown.clone();
                debug!(peer = %peer_addr, "New connection");
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer_addr, host, shutdown).await {
                        debug!(peer = %peer_addr, error = %e, "Connection error");
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }

    info!("HTTP server stopped accepting connections");
    Ok(())
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    host: Arc<Host>,
    shutdown: CancellationToken,
) -> Result<()> {
    let service = service_fn(move |req: hyper::Request<Incoming>| {
        let host = host.clone();
        async move { Ok::<_, Infallible>(handle_request(req, peer_addr, host).await) }
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            result.map_err(|e| anyhow::anyhow!("{}", e))?;
        }
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                debug!(peer = %peer_addr, error = %e, "Connection ended during shutdown");
            }
        }
    }
    Ok(())
}

async fn handle_request(
    req: hyper::Request<Incoming>,
    peer_addr: SocketAddr,
    host: Arc<Host>,
) -> hyper::Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(peer = %peer_addr, error = %e, "Failed to read request body");
            return plain(hyper::StatusCode::BAD_REQUEST);
        }
    };

    let request = into_container_request(parts, body).with_remote_addr(peer_addr);
    let response = host.invoke(request).await;
    into_hyper_response(response)
}

fn plain(status: hyper::StatusCode) -> hyper::Response<Full<Bytes>> {
    let mut response = hyper::Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Container request from the transport's request head and collected body
pub fn into_container_request(parts: hyper::http::request::Parts, body: Bytes) -> Request {
    let uri = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let mut request = Request::new(parts.method, &uri).with_body(body);
    *request.headers_mut() = parts.headers;
    request
}

/// Transport response from a processed container response
pub fn into_hyper_response(response: Response) -> hyper::Response<Full<Bytes>> {
    let (status, headers, body) = response.into_parts();
    let mut out = hyper::Response::new(Full::new(body));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

/// Create a TCP listener socket with the configured tuning
pub(crate) fn create_optimized_socket(addr: &SocketAddr, config: &NetworkConfig) -> Result<Socket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    if config.so_reuseaddr {
        socket.set_reuse_address(true)?;
    }

    // Disable Nagle's algorithm for low latency
    socket.set_nodelay(config.tcp_nodelay)?;

    socket.set_send_buffer_size(config.tcp_send_buffer_size)?;
    socket.set_recv_buffer_size(config.tcp_recv_buffer_size)?;

    socket.set_keepalive(true)?;

    socket.bind(&(*addr).into())?;
    socket.listen(config.backlog)?;

    info!(
        addr = %addr,
        send_buffer = config.tcp_send_buffer_size,
        recv_buffer = config.tcp_recv_buffer_size,
        nodelay = config.tcp_nodelay,
        backlog = config.backlog,
        "TCP listener socket created"
    );

    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::{Method, StatusCode};

    #[test]
    fn test_request_conversion_keeps_query_and_headers() {
        let (parts, _) = hyper::Request::builder()
            .method(Method::POST)
            .uri("http://localhost:8080/shop/cart?id=7")
            .header("cookie", "JSESSIONID=abc")
            .body(())
            .unwrap()
            .into_parts();
        let request = into_container_request(parts, Bytes::from_static(b"payload"));

        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.request_uri(), "/shop/cart");
        assert_eq!(request.query(), Some("id=7"));
        assert_eq!(request.requested_session_id().as_deref(), Some("abc"));
        assert_eq!(request.body().as_ref(), b"payload");
    }

    #[test]
    fn test_response_conversion() {
        let mut response = Response::new();
        response.set_status(StatusCode::CREATED);
        response.set_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        response.write_str("made");

        let out = into_hyper_response(response);
        assert_eq!(out.status(), StatusCode::CREATED);
        assert_eq!(out.headers()[CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn test_socket_binds_ephemeral_port() {
        let config = NetworkConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        assert!(create_optimized_socket(&addr, &config).is_ok());
    }
}
