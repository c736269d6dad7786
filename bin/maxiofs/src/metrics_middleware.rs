//! Metrics middleware for automatic S3 operation tracking
//!
//! Intercepts all requests and records metrics based on HTTP method and
//! path patterns.

use axum::{body::Body, extract::Request, http::Method, middleware::Next, response::Response};
use maxiofs_s3::{s3_metrics, S3Operation};
use std::time::Instant;

/// Extract S3 operation type from HTTP method and path
fn extract_operation(method: &Method, path: &str) -> Option<S3Operation> {
    let path = path.split('?').next().unwrap_or(path);
    let path = path.trim_start_matches('/');
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (method, segments.as_slice()) {
        // Service level (GET /)
        (m, []) if m == Method::GET => Some(S3Operation::ListBuckets),

        // Bucket operations
        (m, [_bucket]) if m == Method::GET => Some(S3Operation::ListObjects),
        (m, [_bucket]) if m == Method::PUT => Some(S3Operation::CreateBucket),
        (m, [_bucket]) if m == Method::DELETE => Some(S3Operation::DeleteBucket),
        (m, [_bucket]) if m == Method::HEAD => Some(S3Operation::HeadBucket),
        // POST /{bucket}?delete is batch delete
        (m, [_bucket]) if m == Method::POST => Some(S3Operation::DeleteObjects),

        // Object operations
        (m, [_bucket, ..]) if m == Method::GET => Some(S3Operation::GetObject),
        (m, [_bucket, ..]) if m == Method::PUT => Some(S3Operation::PutObject),
        (m, [_bucket, ..]) if m == Method::DELETE => Some(S3Operation::DeleteObject),
        (m, [_bucket, ..]) if m == Method::HEAD => Some(S3Operation::HeadObject),
        (m, [_bucket, ..]) if m == Method::POST => Some(S3Operation::InitiateMultipartUpload),

        _ => None,
    }
}

/// Refine operation type based on query parameters
fn refine_operation(op: S3Operation, query: Option<&str>) -> S3Operation {
    let query = match query {
        Some(q) if !q.is_empty() => q,
        _ => return op,
    };

    match op {
        S3Operation::PutObject if query.contains("uploadId") && query.contains("partNumber") => {
            S3Operation::UploadPart
        }
        S3Operation::GetObject if query.contains("uploadId") => S3Operation::ListParts,
        S3Operation::DeleteObject if query.contains("uploadId") => {
            S3Operation::AbortMultipartUpload
        }
        S3Operation::InitiateMultipartUpload if query.contains("uploadId") => {
            S3Operation::CompleteMultipartUpload
        }
        S3Operation::ListObjects if query.contains("versions") => S3Operation::ListObjectVersions,
        _ => op,
    }
}

/// Metrics middleware that records per-operation metrics
pub async fn metrics_layer(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path();
    let query = uri.query();

    // Skip metrics and health endpoints
    if path == "/metrics" || path == "/health" {
        return next.run(request).await;
    }

    let operation = extract_operation(&method, path).map(|op| refine_operation(op, query));

    s3_metrics().connection_opened();

    let request_bytes = request
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let response = next.run(request).await;

    if let Some(op) = operation {
        let status_code = response.status().as_u16();
        let latency_us = start.elapsed().as_micros() as u64;
        let response_bytes = response
            .headers()
            .get(axum::http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        s3_metrics().record_operation(op, status_code, request_bytes, response_bytes, latency_us);
    }
    s3_metrics().connection_closed();

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_and_refine() {
        assert_eq!(
            extract_operation(&Method::GET, "/"),
            Some(S3Operation::ListBuckets)
        );
        assert_eq!(
            extract_operation(&Method::PUT, "/bucket"),
            Some(S3Operation::CreateBucket)
        );
        assert_eq!(
            extract_operation(&Method::PUT, "/bucket/a/b/c"),
            Some(S3Operation::PutObject)
        );
        assert_eq!(
            refine_operation(S3Operation::PutObject, Some("uploadId=x&partNumber=2")),
            S3Operation::UploadPart
        );
        assert_eq!(
            refine_operation(S3Operation::ListObjects, Some("versions")),
            S3Operation::ListObjectVersions
        );
    }
}
