//! Raw S3 request forwarding.
//!
//! When another node owns a bucket, the local node proxies the request
//! verbatim: method, path, query, headers, and a streamed body, and
//! relays the peer's response bytes straight back.

use bytes::Bytes;
use futures::Stream;
use http::HeaderMap;
use std::time::Duration;
use tracing::debug;

use maxiofs_common::{Error, Result};

/// Hop-by-hop headers that must not be forwarded. The Host header IS
/// forwarded: the owning node re-verifies the client's SigV4 signature,
/// which covers the host the client signed against.
const HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// A forwarded response: status, headers, and the body stream.
pub struct ForwardedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: reqwest::Response,
}

/// Forward a request to a peer node's S3 listener and stream back its
/// response.
pub async fn forward_request<S, E>(
    http: &reqwest::Client,
    base_url: &str,
    method: &http::Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: S,
) -> Result<ForwardedResponse>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let url = format!("{}{}", base_url.trim_end_matches('/'), path_and_query);
    debug!(%url, %method, "forwarding request to owning node");

    let mut req = http
        .request(method.clone(), &url)
        .timeout(Duration::from_secs(300));

    for (name, value) in headers {
        if HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        req = req.header(name, value);
    }

    let resp = req
        .body(reqwest::Body::wrap_stream(body))
        .send()
        .await
        .map_err(|e| Error::ConnectionFailed(format!("forward to {url}: {e}")))?;

    let status = resp.status().as_u16();
    let mut out_headers = HeaderMap::new();
    for (name, value) in resp.headers() {
        if HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        out_headers.insert(name.clone(), value.clone());
    }

    Ok(ForwardedResponse {
        status,
        headers: out_headers,
        body: resp,
    })
}
