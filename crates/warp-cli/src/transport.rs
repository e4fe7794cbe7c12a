//! HTTP transport for the network handler.
//!
//! One `GET` per connection over hyper's HTTP/1 client. Plain `http://`
//! only; bodies are collected in full, so a connection that closes before
//! the declared length arrives is an error rather than a short success.

use bytes::Bytes;
use http::header::{CONNECTION, HOST};
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::debug;
use warp_core::ResourceUri;
use warpgrid_vfs::MetaMap;
use warpgrid_vfs::handlers::{FetchFuture, FetchResponse, Fetcher};

pub struct HttpFetcher;

impl Fetcher for HttpFetcher {
    fn fetch(&self, uri: String, headers: MetaMap) -> FetchFuture {
        Box::pin(async move { get(&uri, &headers).await })
    }
}

async fn get(uri: &str, headers: &MetaMap) -> Result<FetchResponse, String> {
    let parsed = ResourceUri::parse(uri).map_err(|e| e.to_string())?;
    if parsed.scheme() != "http" {
        return Err(format!(
            "unsupported scheme {}:// (only http is available)",
            parsed.scheme()
        ));
    }
    let (host, port) = parsed.host_port(80).map_err(|e| e.to_string())?;

    let stream = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| format!("connect {host}:{port}: {e}"))?;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| format!("handshake with {host}:{port}: {e}"))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "http connection closed with error");
        }
    });

    let request = build_request(&host, port, &parsed.path_and_query(), headers)?;
    let response = sender
        .send_request(request)
        .await
        .map_err(|e| format!("request to {uri} failed: {e}"))?;

    let status = response.status().as_u16();
    let headers = response_headers(response.headers());
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| format!("reading body of {uri}: {e}"))?
        .to_bytes()
        .to_vec();

    debug!(uri, status, bytes = body.len(), "http response received");
    Ok(FetchResponse {
        status,
        headers,
        body,
    })
}

/// `GET` request carrying the request metadata as headers.
fn build_request(
    host: &str,
    port: u16,
    path: &str,
    headers: &MetaMap,
) -> Result<http::Request<Empty<Bytes>>, String> {
    let authority = if port == 80 {
        host.to_string()
    } else {
        format!("{host}:{port}")
    };

    let mut builder = http::Request::builder()
        .method(http::Method::GET)
        .uri(path)
        .header(HOST, authority)
        .header("user-agent", concat!("warp/", env!("CARGO_PKG_VERSION")));
    for (key, value) in headers {
        if key.eq_ignore_ascii_case(HOST.as_str()) || key.eq_ignore_ascii_case(CONNECTION.as_str())
        {
            continue;
        }
        builder = builder.header(key.as_str(), value.as_str());
    }
    builder
        .header(CONNECTION, "close")
        .body(Empty::new())
        .map_err(|e| format!("invalid request: {e}"))
}

/// Flatten response headers into metadata; repeated names are joined with `, `.
fn response_headers(headers: &http::HeaderMap) -> MetaMap {
    let mut meta = MetaMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        meta.entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    meta
}
