//! Object-level S3 handlers: PUT/GET/HEAD/DELETE, copy, per-object ACL,
//! retention and legal hold, with aws-chunked decoding and byte ranges.

use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    Extension,
};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;

use super::{
    acl_for_request, acl_to_xml, actor_of, check_access, concrete_range, parse_range_header,
    resolve_bucket, tenant_quota,
};
use crate::auth_middleware::AuthContext;
use crate::state::AppState;
use maxiofs_blob::ByteStream;
use maxiofs_common::{now_secs, Error, ObjectKey, ObjectLockMode};
use maxiofs_engine::object::PutObjectInput;
use maxiofs_engine::types::{BucketRecord, VersionRecord};
use maxiofs_s3::xml::{self, to_xml_document};
use maxiofs_s3::error_response;

fn xml_response(body: String) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/xml")
        .body(Body::from(body))
        .unwrap()
}

fn empty_response(status: StatusCode) -> Response {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .unwrap()
}

/// Extract user metadata from request headers (x-amz-meta-* headers)
fn extract_user_metadata(headers: &HeaderMap) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    for (name, value) in headers.iter() {
        let name_str = name.as_str().to_lowercase();
        if let Some(key) = name_str.strip_prefix("x-amz-meta-") {
            if let Ok(value_str) = value.to_str() {
                metadata.insert(key.to_string(), value_str.to_string());
            }
        }
    }
    metadata
}

fn bypass_governance(headers: &HeaderMap) -> bool {
    headers
        .get("x-amz-bypass-governance-retention")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Whether the body arrives in the aws-chunked framing
fn is_aws_chunked(headers: &HeaderMap) -> bool {
    let encoded = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("aws-chunked"));
    let streaming = headers
        .get("x-amz-content-sha256")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("STREAMING-"));
    encoded || streaming
}

/// Strip aws-chunked framing: `<hex-size>[;chunk-signature=…]\r\n` +
/// payload + `\r\n`, terminated by a zero-length chunk. Per-chunk
/// signatures are not re-verified; the seed signature authenticated the
/// request.
pub(crate) fn decode_aws_chunked<S>(input: S) -> ByteStream
where
    S: Stream<Item = Result<Bytes, Error>> + Send + Unpin + 'static,
{
    struct State<S> {
        input: S,
        buf: BytesMut,
        /// Payload bytes still expected in the current chunk
        remaining: usize,
        done: bool,
        exhausted: bool,
    }

    let state = State {
        input,
        buf: BytesMut::new(),
        remaining: 0,
        done: false,
        exhausted: false,
    };

    let stream = futures::stream::unfold(state, |mut st| async move {
        loop {
            if st.done {
                return None;
            }

            // Emit payload bytes already buffered
            if st.remaining > 0 && !st.buf.is_empty() {
                let take = st.remaining.min(st.buf.len());
                let out = st.buf.split_to(take).freeze();
                st.remaining -= take;
                return Some((Ok(out), st));
            }

            // At a chunk boundary: consume the trailing CRLF, then the
            // next size line
            if st.remaining == 0 {
                // Drop a leading CRLF left over from the previous chunk
                while st.buf.starts_with(b"\r\n") {
                    let _ = st.buf.split_to(2);
                }
                if let Some(pos) = st.buf.windows(2).position(|w| w == b"\r\n") {
                    let line = st.buf.split_to(pos);
                    let _ = st.buf.split_to(2);
                    let line = String::from_utf8_lossy(&line);
                    let size_hex = line.split(';').next().unwrap_or("0").trim();
                    let size = match usize::from_str_radix(size_hex, 16) {
                        Ok(s) => s,
                        Err(_) => {
                            st.done = true;
                            return Some((
                                Err(Error::invalid_request("malformed aws-chunked framing")),
                                st,
                            ));
                        }
                    };
                    if size == 0 {
                        // Final chunk; trailing headers are ignored
                        st.done = true;
                        return None;
                    }
                    st.remaining = size;
                    continue;
                }
            }

            if st.exhausted {
                if st.remaining > 0 || !st.buf.is_empty() {
                    st.done = true;
                    return Some((
                        Err(Error::invalid_request("truncated aws-chunked body")),
                        st,
                    ));
                }
                return None;
            }

            match st.input.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => st.exhausted = true,
            }
        }
    });
    Box::pin(stream)
}

fn body_stream(body: Body, headers: &HeaderMap) -> ByteStream {
    let raw: ByteStream = Box::pin(
        body.into_data_stream()
            .map(|chunk| chunk.map_err(|e| Error::Storage(format!("body read: {e}")))),
    );
    if is_aws_chunked(headers) {
        decode_aws_chunked(raw)
    } else {
        raw
    }
}

/// PUT /{bucket}/{key}: plain upload, part upload, copy, ACL,
/// retention, legal hold
pub async fn put_object_dispatch(
    State(state): State<Arc<AppState>>,
    Path((bucket_name, key)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    Extension(ctx): Extension<AuthContext>,
    request: Request,
) -> Response {
    let bucket = match resolve_bucket(&state, &bucket_name) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let actor = actor_of(Some(&ctx));
    let headers = request.headers().clone();

    // Part upload
    if let (Some(upload_id), Some(part_number)) = (params.get("uploadId"), params.get("partNumber"))
    {
        if let Err(resp) = check_access(
            &state,
            actor.as_ref(),
            &bucket,
            "s3:PutObject",
            Some(&key),
            None,
            None,
        ) {
            return resp;
        }
        let Ok(part_number) = part_number.parse::<u32>() else {
            return error_response(
                &Error::invalid_argument("partNumber must be an integer"),
                Some(&key),
            );
        };
        let body = body_stream(request.into_body(), &headers);
        return match state
            .engine
            .upload_part(&bucket, upload_id, part_number, body)
            .await
        {
            Ok(part) => Response::builder()
                .status(StatusCode::OK)
                .header(header::ETAG, format!("\"{}\"", part.etag))
                .body(Body::empty())
                .unwrap(),
            Err(e) => error_response(&e, Some(&key)),
        };
    }

    if params.contains_key("acl") {
        return put_object_acl(&state, &bucket, &key, &ctx, &params, request).await;
    }
    if params.contains_key("retention") {
        return put_retention(&state, &bucket, &key, &ctx, &params, request).await;
    }
    if params.contains_key("legal-hold") {
        return put_legal_hold(&state, &bucket, &key, &ctx, &params, request).await;
    }

    // Server-side copy
    if let Some(copy_source) = headers
        .get("x-amz-copy-source")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
    {
        return copy_object(&state, &bucket, &key, &ctx, &copy_source, &headers).await;
    }

    // Plain PUT
    if let Err(resp) = check_access(
        &state,
        actor.as_ref(),
        &bucket,
        "s3:PutObject",
        Some(&key),
        None,
        None,
    ) {
        return resp;
    }
    let object_key = match ObjectKey::new(key.clone()) {
        Ok(k) => k,
        Err(e) => return error_response(&e.into(), Some(&key)),
    };

    let (owner_id, owner_display) = actor
        .as_ref()
        .map(|a| (a.user_id.clone(), a.arn.clone()))
        .unwrap_or_else(|| (bucket.owner_user_id.clone(), bucket.owner_display_name.clone()));
    let acl = match acl_for_request(&headers, None, &owner_id, &owner_display) {
        Ok(acl) => acl,
        Err(e) => return error_response(&e, Some(&key)),
    };

    let input = PutObjectInput {
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string(),
        user_metadata: extract_user_metadata(&headers),
        content_md5: headers
            .get("content-md5")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        storage_class: headers
            .get("x-amz-storage-class")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("STANDARD")
            .to_string(),
        acl,
        quota_max_bytes: tenant_quota(&state, &bucket),
    };

    let body = body_stream(request.into_body(), &headers);
    match state.engine.put_object(&bucket, &object_key, body, input).await {
        Ok(out) => {
            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header(header::ETAG, format!("\"{}\"", out.etag));
            if let Some(vid) = &out.version_id {
                builder = builder.header("x-amz-version-id", vid);
            }
            builder.body(Body::empty()).unwrap()
        }
        Err(e) => error_response(&e, Some(&key)),
    }
}

async fn copy_object(
    state: &AppState,
    dst_bucket: &BucketRecord,
    dst_key: &str,
    ctx: &AuthContext,
    copy_source: &str,
    headers: &HeaderMap,
) -> Response {
    let actor = actor_of(Some(ctx));

    // x-amz-copy-source: /{bucket}/{key}[?versionId=...]
    let source = copy_source.trim_start_matches('/');
    let (source_path, source_version) = match source.split_once("?versionId=") {
        Some((path, vid)) => (path, Some(vid.to_string())),
        None => (source, None),
    };
    let Some((src_bucket_name, src_key)) = source_path.split_once('/') else {
        return error_response(
            &Error::invalid_argument("x-amz-copy-source must be /bucket/key"),
            Some(dst_key),
        );
    };

    let src_bucket = match resolve_bucket(state, src_bucket_name) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    let src_acl = state
        .engine
        .get_object_acl(&src_bucket, src_key, source_version.as_deref())
        .ok();
    if let Err(resp) = check_access(
        state,
        actor.as_ref(),
        &src_bucket,
        "s3:GetObject",
        Some(src_key),
        src_acl.as_ref(),
        None,
    ) {
        return resp;
    }
    if let Err(resp) = check_access(
        state,
        actor.as_ref(),
        dst_bucket,
        "s3:PutObject",
        Some(dst_key),
        None,
        None,
    ) {
        return resp;
    }

    let object_key = match ObjectKey::new(dst_key.to_string()) {
        Ok(k) => k,
        Err(e) => return error_response(&e.into(), Some(dst_key)),
    };

    // Metadata directive: COPY (default) carries the source metadata
    let replace = headers
        .get("x-amz-metadata-directive")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("REPLACE"));
    let source_record = match state
        .engine
        .resolve_version(&src_bucket, src_key, source_version.as_deref())
    {
        Ok(r) => r,
        Err(e) => return error_response(&e, Some(src_key)),
    };

    let (owner_id, owner_display) = actor
        .as_ref()
        .map(|a| (a.user_id.clone(), a.arn.clone()))
        .unwrap_or_else(|| {
            (
                dst_bucket.owner_user_id.clone(),
                dst_bucket.owner_display_name.clone(),
            )
        });

    let input = PutObjectInput {
        content_type: if replace {
            headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string()
        } else {
            source_record.content_type.clone()
        },
        user_metadata: if replace {
            extract_user_metadata(headers)
        } else {
            source_record.user_metadata.clone()
        },
        content_md5: None,
        storage_class: source_record.storage_class.clone(),
        acl: maxiofs_auth::acl::Acl::private(&owner_id, &owner_display),
        quota_max_bytes: tenant_quota(state, dst_bucket),
    };

    match state
        .engine
        .copy_object(
            &src_bucket,
            src_key,
            source_version.as_deref(),
            dst_bucket,
            &object_key,
            input,
        )
        .await
    {
        Ok(out) => xml_response(to_xml_document(&xml::CopyObjectResult {
            etag: format!("\"{}\"", out.etag),
            last_modified: xml::timestamp_to_iso(now_secs()),
        })),
        Err(e) => error_response(&e, Some(dst_key)),
    }
}

/// GET /{bucket}/{key}: object data, list-parts, ACL, retention,
/// legal-hold
pub async fn get_object_dispatch(
    State(state): State<Arc<AppState>>,
    Path((bucket_name, key)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
) -> Response {
    let bucket = match resolve_bucket(&state, &bucket_name) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let actor = actor_of(Some(&ctx));
    let version_id = params.get("versionId").cloned();

    if let Some(upload_id) = params.get("uploadId") {
        return super::multipart::list_parts(&state, &bucket, &key, upload_id, &params, actor.as_ref())
            .await;
    }
    if params.contains_key("acl") {
        let object_acl = state
            .engine
            .get_object_acl(&bucket, &key, version_id.as_deref());
        let object_acl = match object_acl {
            Ok(acl) => acl,
            Err(e) => return error_response(&e, Some(&key)),
        };
        if let Err(resp) = check_access(
            &state,
            actor.as_ref(),
            &bucket,
            "s3:GetObjectAcl",
            Some(&key),
            Some(&object_acl),
            None,
        ) {
            return resp;
        }
        return xml_response(to_xml_document(&acl_to_xml(&object_acl)));
    }
    if params.contains_key("retention") {
        let record = match state
            .engine
            .resolve_version(&bucket, &key, version_id.as_deref())
        {
            Ok(r) => r,
            Err(e) => return error_response(&e, Some(&key)),
        };
        let Some(mode) = record.lock_mode else {
            return error_response(
                &Error::invalid_request("no retention configuration on this version"),
                Some(&key),
            );
        };
        return xml_response(to_xml_document(&xml::RetentionXml {
            mode: mode.as_str().to_string(),
            retain_until_date: xml::timestamp_to_iso(record.retain_until),
        }));
    }
    if params.contains_key("legal-hold") {
        let record = match state
            .engine
            .resolve_version(&bucket, &key, version_id.as_deref())
        {
            Ok(r) => r,
            Err(e) => return error_response(&e, Some(&key)),
        };
        return xml_response(to_xml_document(&xml::LegalHoldXml {
            status: if record.legal_hold { "ON" } else { "OFF" }.to_string(),
        }));
    }

    // Plain GET
    let object_acl = state
        .engine
        .get_object_acl(&bucket, &key, version_id.as_deref())
        .ok();
    if let Err(resp) = check_access(
        &state,
        actor.as_ref(),
        &bucket,
        if version_id.is_some() {
            "s3:GetObjectVersion"
        } else {
            "s3:GetObject"
        },
        Some(&key),
        object_acl.as_ref(),
        None,
    ) {
        return resp;
    }

    // Resolve first so suffix ranges can be made concrete
    let record = match state
        .engine
        .resolve_version(&bucket, &key, version_id.as_deref())
    {
        Ok(r) => r,
        Err(e) => return error_response(&e, Some(&key)),
    };

    let range_spec = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_header);
    let range = match range_spec {
        None => None,
        Some(spec) => match concrete_range(spec, record.size) {
            Ok(r) => Some(r),
            Err(e) => return error_response(&e, Some(&key)),
        },
    };

    match state
        .engine
        .get_object(&bucket, &key, version_id.as_deref(), range)
        .await
    {
        Ok((record, stream, effective_range)) => {
            object_data_response(&record, Some(stream), effective_range)
        }
        Err(e) => error_response(&e, Some(&key)),
    }
}

/// HEAD /{bucket}/{key}
pub async fn head_object(
    State(state): State<Arc<AppState>>,
    Path((bucket_name, key)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    let bucket = match resolve_bucket(&state, &bucket_name) {
        Ok(b) => b,
        Err(_) => return empty_response(StatusCode::NOT_FOUND),
    };
    let actor = actor_of(Some(&ctx));
    let version_id = params.get("versionId").cloned();

    let object_acl = state
        .engine
        .get_object_acl(&bucket, &key, version_id.as_deref())
        .ok();
    if check_access(
        &state,
        actor.as_ref(),
        &bucket,
        "s3:GetObject",
        Some(&key),
        object_acl.as_ref(),
        None,
    )
    .is_err()
    {
        return empty_response(StatusCode::FORBIDDEN);
    }

    match state
        .engine
        .resolve_version(&bucket, &key, version_id.as_deref())
    {
        Ok(record) if record.is_delete_marker => empty_response(StatusCode::NOT_FOUND),
        Ok(record) => object_data_response(&record, None, None),
        Err(e) => empty_response(
            StatusCode::from_u16(e.http_status_code()).unwrap_or(StatusCode::NOT_FOUND),
        ),
    }
}

/// Build the object data/metadata response shared by GET and HEAD.
fn object_data_response(
    record: &VersionRecord,
    stream: Option<ByteStream>,
    range: Option<(u64, u64)>,
) -> Response {
    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, record.content_type.as_str())
        .header(header::ETAG, format!("\"{}\"", record.etag))
        .header(header::LAST_MODIFIED, xml::timestamp_to_http_date(record.created_at))
        .header(header::ACCEPT_RANGES, "bytes");

    if record.version_id != maxiofs_common::NULL_VERSION_ID {
        builder = builder.header("x-amz-version-id", record.version_id.as_str());
    }
    if record.encryption.is_some() {
        builder = builder.header("x-amz-server-side-encryption", "AES256");
    }
    if let Some(mode) = record.lock_mode {
        builder = builder
            .header("x-amz-object-lock-mode", mode.as_str())
            .header(
                "x-amz-object-lock-retain-until-date",
                xml::timestamp_to_iso(record.retain_until),
            );
    }
    if record.legal_hold {
        builder = builder.header("x-amz-object-lock-legal-hold", "ON");
    }
    for (k, v) in &record.user_metadata {
        builder = builder.header(format!("x-amz-meta-{k}"), v);
    }

    match (stream, range) {
        (Some(stream), Some((start, end))) => builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_LENGTH, end - start + 1)
            .header(
                header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{}", record.size),
            )
            .body(Body::from_stream(stream.map(
                |chunk| -> Result<Bytes, std::io::Error> {
                    chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
                },
            )))
            .unwrap(),
        (Some(stream), None) => builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, record.size)
            .body(Body::from_stream(stream.map(
                |chunk| -> Result<Bytes, std::io::Error> {
                    chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
                },
            )))
            .unwrap(),
        (None, _) => builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, record.size)
            .body(Body::empty())
            .unwrap(),
    }
}

/// DELETE /{bucket}/{key}: object delete or multipart abort
pub async fn delete_object_dispatch(
    State(state): State<Arc<AppState>>,
    Path((bucket_name, key)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
) -> Response {
    let bucket = match resolve_bucket(&state, &bucket_name) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let actor = actor_of(Some(&ctx));

    if let Some(upload_id) = params.get("uploadId") {
        if let Err(resp) = check_access(
            &state,
            actor.as_ref(),
            &bucket,
            "s3:AbortMultipartUpload",
            Some(&key),
            None,
            None,
        ) {
            return resp;
        }
        return match state.engine.abort_multipart(&bucket, upload_id).await {
            Ok(()) => empty_response(StatusCode::NO_CONTENT),
            Err(e) => error_response(&e, Some(&key)),
        };
    }

    let version_id = params.get("versionId").cloned();
    if let Err(resp) = check_access(
        &state,
        actor.as_ref(),
        &bucket,
        if version_id.is_some() {
            "s3:DeleteObjectVersion"
        } else {
            "s3:DeleteObject"
        },
        Some(&key),
        None,
        None,
    ) {
        return resp;
    }

    match state
        .engine
        .delete_object(&bucket, &key, version_id.as_deref(), bypass_governance(&headers))
        .await
    {
        Ok(out) => {
            let mut builder = Response::builder().status(StatusCode::NO_CONTENT);
            if out.delete_marker {
                builder = builder.header("x-amz-delete-marker", "true");
            }
            if let Some(vid) = &out.version_id {
                builder = builder.header("x-amz-version-id", vid);
            }
            builder.body(Body::empty()).unwrap()
        }
        Err(e) => error_response(&e, Some(&key)),
    }
}

// ── Object subresource writers ───────────────────────────────────────────────

async fn put_object_acl(
    state: &AppState,
    bucket: &BucketRecord,
    key: &str,
    ctx: &AuthContext,
    params: &HashMap<String, String>,
    request: Request,
) -> Response {
    let actor = actor_of(Some(ctx));
    let version_id = params.get("versionId").cloned();

    let current = state
        .engine
        .get_object_acl(bucket, key, version_id.as_deref());
    let current = match current {
        Ok(acl) => acl,
        Err(e) => return error_response(&e, Some(key)),
    };
    if let Err(resp) = check_access(
        state,
        actor.as_ref(),
        bucket,
        "s3:PutObjectAcl",
        Some(key),
        Some(&current),
        None,
    ) {
        return resp;
    }

    let headers = request.headers().clone();
    let body = match axum::body::to_bytes(request.into_body(), 1024 * 1024).await {
        Ok(b) => b,
        Err(_) => return error_response(&Error::MalformedXml, Some(key)),
    };
    let acl = match acl_for_request(
        &headers,
        Some(&body),
        &current.owner_id,
        &current.owner_display_name,
    ) {
        Ok(acl) => acl,
        Err(e) => return error_response(&e, Some(key)),
    };
    match state
        .engine
        .put_object_acl(bucket, key, version_id.as_deref(), acl)
    {
        Ok(()) => empty_response(StatusCode::OK),
        Err(e) => error_response(&e, Some(key)),
    }
}

async fn put_retention(
    state: &AppState,
    bucket: &BucketRecord,
    key: &str,
    ctx: &AuthContext,
    params: &HashMap<String, String>,
    request: Request,
) -> Response {
    let actor = actor_of(Some(ctx));
    if let Err(resp) = check_access(
        state,
        actor.as_ref(),
        bucket,
        "s3:PutObjectRetention",
        Some(key),
        None,
        None,
    ) {
        return resp;
    }

    let headers = request.headers().clone();
    let body = match axum::body::to_bytes(request.into_body(), 64 * 1024).await {
        Ok(b) => b,
        Err(_) => return error_response(&Error::MalformedXml, Some(key)),
    };
    let retention: xml::RetentionXml = match quick_xml::de::from_reader(body.as_ref()) {
        Ok(r) => r,
        Err(_) => return error_response(&Error::MalformedXml, Some(key)),
    };

    let Some(mode) = ObjectLockMode::parse(&retention.mode) else {
        return error_response(
            &Error::invalid_argument(format!("unknown retention mode {}", retention.mode)),
            Some(key),
        );
    };
    let retain_until = match chrono::DateTime::parse_from_rfc3339(&retention.retain_until_date) {
        Ok(dt) => dt.timestamp().max(0) as u64,
        Err(_) => {
            return error_response(
                &Error::invalid_argument("RetainUntilDate must be RFC 3339"),
                Some(key),
            )
        }
    };

    match state.engine.put_object_retention(
        bucket,
        key,
        params.get("versionId").map(String::as_str),
        mode,
        retain_until,
        bypass_governance(&headers),
    ) {
        Ok(()) => empty_response(StatusCode::OK),
        Err(e) => error_response(&e, Some(key)),
    }
}

async fn put_legal_hold(
    state: &AppState,
    bucket: &BucketRecord,
    key: &str,
    ctx: &AuthContext,
    params: &HashMap<String, String>,
    request: Request,
) -> Response {
    let actor = actor_of(Some(ctx));
    if let Err(resp) = check_access(
        state,
        actor.as_ref(),
        bucket,
        "s3:PutObjectLegalHold",
        Some(key),
        None,
        None,
    ) {
        return resp;
    }

    let body = match axum::body::to_bytes(request.into_body(), 64 * 1024).await {
        Ok(b) => b,
        Err(_) => return error_response(&Error::MalformedXml, Some(key)),
    };
    let hold: xml::LegalHoldXml = match quick_xml::de::from_reader(body.as_ref()) {
        Ok(h) => h,
        Err(_) => return error_response(&Error::MalformedXml, Some(key)),
    };
    let on = match hold.status.as_str() {
        "ON" => true,
        "OFF" => false,
        other => {
            return error_response(
                &Error::invalid_argument(format!("legal hold status must be ON or OFF, got {other}")),
                Some(key),
            )
        }
    };

    match state.engine.put_object_legal_hold(
        bucket,
        key,
        params.get("versionId").map(String::as_str),
        on,
    ) {
        Ok(()) => empty_response(StatusCode::OK),
        Err(e) => error_response(&e, Some(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    async fn collect(mut s: ByteStream) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        while let Some(chunk) = s.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    fn chunks(parts: Vec<&[u8]>) -> impl Stream<Item = Result<Bytes, Error>> + Send + Unpin {
        stream::iter(
            parts
                .into_iter()
                .map(|p| Ok(Bytes::copy_from_slice(p)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_decode_aws_chunked() {
        let framed = b"5;chunk-signature=abc\r\nhello\r\n7;chunk-signature=def\r\n world!\r\n0;chunk-signature=end\r\n\r\n";
        let decoded = collect(decode_aws_chunked(chunks(vec![framed]))).await.unwrap();
        assert_eq!(decoded, b"hello world!");
    }

    #[tokio::test]
    async fn test_decode_aws_chunked_split_frames() {
        // Framing split across arbitrary chunk boundaries
        let framed: &[u8] = b"5;chunk-signature=abc\r\nhello\r\n0\r\n\r\n";
        let (a, b) = framed.split_at(9);
        let decoded = collect(decode_aws_chunked(chunks(vec![a, b]))).await.unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[tokio::test]
    async fn test_decode_aws_chunked_truncated() {
        let framed: &[u8] = b"ff\r\nshort";
        let result = collect(decode_aws_chunked(chunks(vec![framed]))).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_is_aws_chunked() {
        let mut headers = HeaderMap::new();
        assert!(!is_aws_chunked(&headers));
        headers.insert(
            "x-amz-content-sha256",
            "STREAMING-AWS4-HMAC-SHA256-PAYLOAD".parse().unwrap(),
        );
        assert!(is_aws_chunked(&headers));
    }

    #[test]
    fn test_extract_user_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-meta-owner", "alice".parse().unwrap());
        headers.insert("content-type", "text/plain".parse().unwrap());
        let meta = extract_user_metadata(&headers);
        assert_eq!(meta.len(), 1);
        assert_eq!(meta["owner"], "alice");
    }
}
