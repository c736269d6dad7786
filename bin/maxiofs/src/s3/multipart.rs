//! Multipart upload handlers: initiate, complete, list-parts, and the
//! bucket-level upload listing. Part upload and abort are dispatched
//! from the object PUT/DELETE handlers.

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    Extension,
};
use std::collections::HashMap;
use std::sync::Arc;

use super::{acl_for_request, actor_of, check_access, resolve_bucket, tenant_quota};
use crate::auth_middleware::AuthContext;
use crate::state::AppState;
use maxiofs_auth::Actor;
use maxiofs_common::{Error, ObjectKey};
use maxiofs_engine::multipart::CompletedPart;
use maxiofs_engine::types::BucketRecord;
use maxiofs_s3::error_response;
use maxiofs_s3::xml::{self, to_xml_document};

fn xml_response(body: String) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/xml")
        .body(Body::from(body))
        .unwrap()
}

/// POST /{bucket}/{key}?uploads or ?uploadId= (initiate or complete)
pub async fn post_object(
    State(state): State<Arc<AppState>>,
    Path((bucket_name, key)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let bucket = match resolve_bucket(&state, &bucket_name) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let actor = actor_of(Some(&ctx));

    if params.contains_key("uploads") {
        return initiate(&state, &bucket, &key, actor.as_ref(), &headers).await;
    }
    if let Some(upload_id) = params.get("uploadId") {
        return complete(&state, &bucket, &key, upload_id, actor.as_ref(), &body).await;
    }
    error_response(
        &Error::MethodNotAllowed("POST on an object requires ?uploads or ?uploadId".into()),
        Some(&key),
    )
}

async fn initiate(
    state: &AppState,
    bucket: &BucketRecord,
    key: &str,
    actor: Option<&Actor>,
    headers: &HeaderMap,
) -> Response {
    if let Err(resp) = check_access(state, actor, bucket, "s3:PutObject", Some(key), None, None) {
        return resp;
    }
    let object_key = match ObjectKey::new(key.to_string()) {
        Ok(k) => k,
        Err(e) => return error_response(&e.into(), Some(key)),
    };

    let (owner_id, owner_display) = actor
        .map(|a| (a.user_id.clone(), a.arn.clone()))
        .unwrap_or_else(|| (bucket.owner_user_id.clone(), bucket.owner_display_name.clone()));
    let acl = match acl_for_request(headers, None, &owner_id, &owner_display) {
        Ok(acl) => acl,
        Err(e) => return error_response(&e, Some(key)),
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let user_metadata = {
        let mut meta = HashMap::new();
        for (name, value) in headers.iter() {
            let name = name.as_str().to_lowercase();
            if let Some(k) = name.strip_prefix("x-amz-meta-") {
                if let Ok(v) = value.to_str() {
                    meta.insert(k.to_string(), v.to_string());
                }
            }
        }
        meta
    };

    let initiator = actor.map(|a| a.user_id.as_str()).unwrap_or("anonymous");
    match state.engine.initiate_multipart(
        bucket,
        &object_key,
        content_type,
        user_metadata,
        acl,
        initiator,
    ) {
        Ok(upload) => xml_response(to_xml_document(&xml::InitiateMultipartUploadResult {
            bucket: bucket.name.clone(),
            key: key.to_string(),
            upload_id: upload.upload_id,
        })),
        Err(e) => error_response(&e, Some(key)),
    }
}

async fn complete(
    state: &AppState,
    bucket: &BucketRecord,
    key: &str,
    upload_id: &str,
    actor: Option<&Actor>,
    body: &[u8],
) -> Response {
    if let Err(resp) = check_access(state, actor, bucket, "s3:PutObject", Some(key), None, None) {
        return resp;
    }

    let request: xml::CompleteMultipartUploadXml = match quick_xml::de::from_reader(body) {
        Ok(req) => req,
        Err(_) => return error_response(&Error::MalformedXml, Some(key)),
    };
    let parts: Vec<CompletedPart> = request
        .parts
        .into_iter()
        .map(|p| CompletedPart {
            part_number: p.part_number,
            etag: p.etag,
        })
        .collect();

    let quota = tenant_quota(state, bucket);
    match state
        .engine
        .complete_multipart(bucket, upload_id, parts, quota)
        .await
    {
        Ok(out) => {
            let mut response = xml_response(to_xml_document(&xml::CompleteMultipartUploadResult {
                location: format!("/{}/{key}", bucket.name),
                bucket: bucket.name.clone(),
                key: key.to_string(),
                etag: format!("\"{}\"", out.etag),
            }));
            if let Some(vid) = &out.version_id {
                if let Ok(value) = vid.parse() {
                    response.headers_mut().insert("x-amz-version-id", value);
                }
            }
            response
        }
        Err(e) => error_response(&e, Some(key)),
    }
}

/// GET /{bucket}/{key}?uploadId= (list parts)
pub async fn list_parts(
    state: &AppState,
    bucket: &BucketRecord,
    key: &str,
    upload_id: &str,
    params: &HashMap<String, String>,
    actor: Option<&Actor>,
) -> Response {
    if let Err(resp) = check_access(state, actor, bucket, "s3:ListParts", Some(key), None, None) {
        return resp;
    }

    let marker = params
        .get("part-number-marker")
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    let max_parts = params
        .get("max-parts")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(1000)
        .min(10_000);

    match state.engine.list_parts(bucket, upload_id, marker, max_parts) {
        Ok((parts, truncated)) => xml_response(to_xml_document(&xml::ListPartsResult {
            bucket: bucket.name.clone(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            part_number_marker: marker,
            max_parts: max_parts as u32,
            is_truncated: truncated,
            parts: parts
                .into_iter()
                .map(|p| xml::PartItem {
                    part_number: p.part_number,
                    last_modified: xml::timestamp_to_iso(p.uploaded_at),
                    etag: format!("\"{}\"", p.etag),
                    size: p.size,
                })
                .collect(),
        })),
        Err(e) => error_response(&e, Some(key)),
    }
}

/// GET /{bucket}?uploads (list in-progress uploads)
pub async fn list_uploads(
    state: &AppState,
    bucket: &BucketRecord,
    actor: Option<&Actor>,
) -> Response {
    if let Err(resp) = check_access(
        state,
        actor,
        bucket,
        "s3:ListBucketMultipartUploads",
        None,
        None,
        None,
    ) {
        return resp;
    }

    match state.engine.list_multipart_uploads(bucket) {
        Ok(uploads) => xml_response(to_xml_document(&xml::ListMultipartUploadsResult {
            bucket: bucket.name.clone(),
            max_uploads: 1000,
            is_truncated: false,
            uploads: uploads
                .into_iter()
                .map(|u| xml::UploadItem {
                    key: u.key,
                    upload_id: u.upload_id,
                    initiated: xml::timestamp_to_iso(u.started_at),
                    storage_class: "STANDARD".to_string(),
                })
                .collect(),
        })),
        Err(e) => error_response(&e, Some(&bucket.name)),
    }
}
