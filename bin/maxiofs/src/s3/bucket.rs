//! Bucket-level S3 handlers: lifecycle of buckets themselves plus every
//! query-parameter subresource (versioning, policy, ACL, CORS,
//! lifecycle, notification, encryption, object-lock, public access
//! block), listings, and batch delete.

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    Extension,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use super::{acl_for_request, acl_to_xml, actor_of, check_access, resolve_bucket};
use crate::auth_middleware::AuthContext;
use crate::state::AppState;
use maxiofs_auth::acl::PublicAccessBlock;
use maxiofs_common::{Error, ObjectLockMode, VersioningState};
use maxiofs_engine::bucket::CreateBucketOpts;
use maxiofs_engine::object::ObjectIdentifier;
use maxiofs_engine::types::{
    CorsRule, LifecycleRule, NotificationTarget, ObjectLockConfig,
};
use maxiofs_s3::xml::{self, to_xml_document};
use maxiofs_s3::{error_response, s3_error_response};

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

/// List all buckets visible to the caller (GET /)
pub async fn list_buckets(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    let Some(actor) = actor_of(Some(&ctx)) else {
        return error_response(&Error::AccessDenied, Some("/"));
    };

    let buckets = match state.engine.list_buckets(actor.tenant_id.as_deref()) {
        Ok(b) => b,
        Err(e) => return error_response(&e, Some("/")),
    };

    let result = xml::ListBucketsResult {
        owner: xml::Owner {
            id: actor.user_id.clone(),
            display_name: actor.arn.clone(),
        },
        buckets: xml::Buckets {
            bucket: buckets
                .into_iter()
                .map(|b| xml::BucketEntry {
                    name: b.name,
                    creation_date: xml::timestamp_to_iso(b.created_at),
                })
                .collect(),
        },
    };
    xml_response(to_xml_document(&result))
}

/// PUT /{bucket} and its subresources
pub async fn put_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let actor = actor_of(Some(&ctx));

    if params.contains_key("versioning") {
        return put_versioning(&state, &bucket_name, &ctx, &body).await;
    }
    if params.contains_key("policy") {
        return put_policy(&state, &bucket_name, &ctx, &body).await;
    }
    if params.contains_key("acl") {
        return put_acl(&state, &bucket_name, &ctx, &headers, &body).await;
    }
    if params.contains_key("lifecycle") {
        return put_lifecycle(&state, &bucket_name, &ctx, &body).await;
    }
    if params.contains_key("cors") {
        return put_cors(&state, &bucket_name, &ctx, &body).await;
    }
    if params.contains_key("notification") {
        return put_notification(&state, &bucket_name, &ctx, &body).await;
    }
    if params.contains_key("encryption") {
        return put_encryption(&state, &bucket_name, &ctx, &body).await;
    }
    if params.contains_key("object-lock") {
        return put_object_lock(&state, &bucket_name, &ctx, &body).await;
    }
    if params.contains_key("publicAccessBlock") {
        return put_public_access_block(&state, &bucket_name, &ctx, &body).await;
    }

    // Plain PUT /{bucket}: create
    let Some(actor) = actor else {
        return error_response(&Error::AccessDenied, Some(&bucket_name));
    };

    // The owning tenant comes from the actor; global users name one
    // explicitly
    let tenant = match &actor.tenant_id {
        Some(tid) => state.identity.get_tenant(tid),
        None => match headers.get("x-maxiofs-tenant").and_then(|v| v.to_str().ok()) {
            Some(name) => state.identity.get_tenant_by_name(name),
            None => {
                return error_response(
                    &Error::invalid_request(
                        "global users must pass x-maxiofs-tenant when creating buckets",
                    ),
                    Some(&bucket_name),
                )
            }
        },
    };
    let tenant = match tenant {
        Ok(t) => t,
        Err(e) => return error_response(&e.into(), Some(&bucket_name)),
    };

    let object_lock = headers
        .get("x-amz-bucket-object-lock-enabled")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    match state.engine.create_bucket(
        &tenant,
        &actor.user_id,
        &actor.arn,
        &bucket_name,
        CreateBucketOpts { object_lock },
    ) {
        Ok(_) => {
            // Buckets created here are owned by this node
            if let Some(node_id) = state.cluster.self_id() {
                state.cluster.set_bucket_location(&bucket_name, &node_id).ok();
            }
            Response::builder()
                .status(StatusCode::OK)
                .header(header::LOCATION, format!("/{bucket_name}"))
                .body(Body::empty())
                .unwrap()
        }
        Err(e) => error_response(&e, Some(&bucket_name)),
    }
}

/// GET /{bucket}: listings and subresource reads
pub async fn get_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    let bucket_name = bucket_name.trim_end_matches('/').to_string();
    let bucket = match resolve_bucket(&state, &bucket_name) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let actor = actor_of(Some(&ctx));

    if params.contains_key("location") {
        if let Err(resp) = check_access(
            &state,
            actor.as_ref(),
            &bucket,
            "s3:GetBucketLocation",
            None,
            None,
            None,
        ) {
            return resp;
        }
        return xml_response(to_xml_document(&xml::LocationConstraint {
            region: bucket.region.clone(),
        }));
    }
    if params.contains_key("versioning") {
        if let Err(resp) = check_access(
            &state,
            actor.as_ref(),
            &bucket,
            "s3:GetBucketVersioning",
            None,
            None,
            None,
        ) {
            return resp;
        }
        let status = match bucket.versioning {
            VersioningState::Unversioned => None,
            VersioningState::Enabled => Some("Enabled".to_string()),
            VersioningState::Suspended => Some("Suspended".to_string()),
        };
        return xml_response(to_xml_document(&xml::VersioningConfigurationXml { status }));
    }
    if params.contains_key("policy") {
        if let Err(resp) = check_access(
            &state,
            actor.as_ref(),
            &bucket,
            "s3:GetBucketPolicy",
            None,
            None,
            None,
        ) {
            return resp;
        }
        return match &bucket.policy_json {
            Some(json) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.clone()))
                .unwrap(),
            None => s3_error_response(
                "NoSuchBucketPolicy",
                "the bucket policy does not exist",
                404,
                Some(&bucket_name),
            ),
        };
    }
    if params.contains_key("acl") {
        if let Err(resp) = check_access(
            &state,
            actor.as_ref(),
            &bucket,
            "s3:GetBucketAcl",
            None,
            None,
            None,
        ) {
            return resp;
        }
        return xml_response(to_xml_document(&acl_to_xml(&bucket.acl)));
    }
    if params.contains_key("lifecycle") {
        if let Err(resp) = check_access(
            &state,
            actor.as_ref(),
            &bucket,
            "s3:GetLifecycleConfiguration",
            None,
            None,
            None,
        ) {
            return resp;
        }
        let rules: Vec<xml::LifecycleRuleXml> = bucket
            .lifecycle
            .iter()
            .map(|r| xml::LifecycleRuleXml {
                id: Some(r.id.clone()),
                status: if r.enabled { "Enabled" } else { "Disabled" }.to_string(),
                prefix: Some(r.prefix.clone()),
                filter: None,
                expiration: r.expiration_days.map(|days| xml::ExpirationXml {
                    days: Some(days),
                    expired_object_delete_marker: r.expired_object_delete_marker.then_some(true),
                }),
                noncurrent_version_expiration: r.noncurrent_days.map(|days| {
                    xml::NoncurrentVersionExpirationXml {
                        noncurrent_days: days,
                    }
                }),
            })
            .collect();
        return xml_response(to_xml_document(&xml::LifecycleConfigurationXml { rules }));
    }
    if params.contains_key("cors") {
        if let Err(resp) = check_access(
            &state,
            actor.as_ref(),
            &bucket,
            "s3:GetBucketCors",
            None,
            None,
            None,
        ) {
            return resp;
        }
        let rules: Vec<xml::CorsRuleXml> = bucket
            .cors
            .iter()
            .map(|r| xml::CorsRuleXml {
                allowed_origins: r.allowed_origins.clone(),
                allowed_methods: r.allowed_methods.clone(),
                allowed_headers: r.allowed_headers.clone(),
                expose_headers: r.expose_headers.clone(),
                max_age_seconds: r.max_age_seconds,
            })
            .collect();
        return xml_response(to_xml_document(&xml::CorsConfigurationXml { rules }));
    }
    if params.contains_key("notification") {
        if let Err(resp) = check_access(
            &state,
            actor.as_ref(),
            &bucket,
            "s3:GetBucketNotification",
            None,
            None,
            None,
        ) {
            return resp;
        }
        let webhooks: Vec<xml::WebhookConfigurationXml> = bucket
            .notifications
            .iter()
            .map(|t| xml::WebhookConfigurationXml {
                events: t.events.clone(),
                prefix: (!t.prefix.is_empty()).then(|| t.prefix.clone()),
                url: t.webhook_url.clone(),
            })
            .collect();
        return xml_response(to_xml_document(&xml::NotificationConfigurationXml {
            webhooks,
        }));
    }
    if params.contains_key("encryption") {
        if let Err(resp) = check_access(
            &state,
            actor.as_ref(),
            &bucket,
            "s3:GetEncryptionConfiguration",
            None,
            None,
            None,
        ) {
            return resp;
        }
        return match &bucket.encryption {
            Some(cfg) => xml_response(to_xml_document(&xml::EncryptionConfigurationXml {
                rules: vec![xml::EncryptionRuleXml {
                    apply: Some(xml::EncryptionDefaultXml {
                        sse_algorithm: cfg.algorithm.clone(),
                    }),
                }],
            })),
            None => s3_error_response(
                "ServerSideEncryptionConfigurationNotFoundError",
                "the server side encryption configuration was not found",
                404,
                Some(&bucket_name),
            ),
        };
    }
    if params.contains_key("object-lock") {
        if let Err(resp) = check_access(
            &state,
            actor.as_ref(),
            &bucket,
            "s3:GetBucketObjectLockConfiguration",
            None,
            None,
            None,
        ) {
            return resp;
        }
        return match &bucket.object_lock {
            Some(cfg) => xml_response(to_xml_document(&xml::ObjectLockConfigurationXml {
                object_lock_enabled: Some("Enabled".to_string()),
                rule: cfg.default_mode.map(|mode| xml::ObjectLockRuleXml {
                    default_retention: Some(xml::DefaultRetentionXml {
                        mode: Some(mode.as_str().to_string()),
                        days: cfg.default_days,
                    }),
                }),
            })),
            None => error_response(
                &Error::ObjectLockNotEnabled(bucket_name.clone()),
                Some(&bucket_name),
            ),
        };
    }
    if params.contains_key("publicAccessBlock") {
        if let Err(resp) = check_access(
            &state,
            actor.as_ref(),
            &bucket,
            "s3:GetBucketPublicAccessBlock",
            None,
            None,
            None,
        ) {
            return resp;
        }
        let pab = bucket.public_access_block;
        return xml_response(to_xml_document(&xml::PublicAccessBlockXml {
            block_public_acls: pab.block_public_acls,
            ignore_public_acls: pab.ignore_public_acls,
            block_public_policy: pab.block_public_policy,
            restrict_public_buckets: pab.restrict_public_buckets,
        }));
    }
    if params.contains_key("uploads") {
        return super::multipart::list_uploads(&state, &bucket, actor.as_ref()).await;
    }
    if params.contains_key("versions") {
        return list_versions(&state, &bucket, actor.as_ref(), &params).await;
    }

    list_objects(&state, &bucket, actor.as_ref(), &params).await
}

async fn list_objects(
    state: &AppState,
    bucket: &maxiofs_engine::types::BucketRecord,
    actor: Option<&maxiofs_auth::Actor>,
    params: &HashMap<String, String>,
) -> Response {
    if let Err(resp) = check_access(state, actor, bucket, "s3:ListBucket", None, None, None) {
        return resp;
    }

    let prefix = params.get("prefix").cloned().unwrap_or_default();
    let delimiter = params.get("delimiter").filter(|d| !d.is_empty()).cloned();
    let max_keys = params
        .get("max-keys")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(1000)
        .min(10_000);
    // V2 continuation-token, V1 marker, and start-after all resume the scan
    let continuation = params
        .get("continuation-token")
        .or_else(|| params.get("marker"))
        .or_else(|| params.get("start-after"))
        .cloned();

    let listing = match state.engine.list_objects(
        bucket,
        &prefix,
        delimiter.as_deref(),
        continuation.as_deref(),
        max_keys,
    ) {
        Ok(l) => l,
        Err(e) => return error_response(&e, Some(&bucket.name)),
    };

    let key_count = (listing.objects.len() + listing.common_prefixes.len()) as u32;
    let result = xml::ListBucketResult {
        name: bucket.name.clone(),
        prefix,
        delimiter,
        max_keys: max_keys as u32,
        key_count,
        is_truncated: listing.is_truncated,
        next_continuation_token: listing.next_token,
        common_prefixes: listing
            .common_prefixes
            .into_iter()
            .map(|prefix| xml::CommonPrefix { prefix })
            .collect(),
        contents: listing
            .objects
            .into_iter()
            .map(|v| xml::ObjectContent {
                key: v.key,
                last_modified: xml::timestamp_to_iso(v.created_at),
                etag: format!("\"{}\"", v.etag),
                size: v.size,
                storage_class: v.storage_class,
            })
            .collect(),
    };
    xml_response(to_xml_document(&result))
}

async fn list_versions(
    state: &AppState,
    bucket: &maxiofs_engine::types::BucketRecord,
    actor: Option<&maxiofs_auth::Actor>,
    params: &HashMap<String, String>,
) -> Response {
    if let Err(resp) = check_access(
        state,
        actor,
        bucket,
        "s3:ListBucketVersions",
        None,
        None,
        None,
    ) {
        return resp;
    }

    let prefix = params.get("prefix").cloned().unwrap_or_default();
    let max_keys = params
        .get("max-keys")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(1000)
        .min(10_000);
    let key_marker = params.get("key-marker").cloned();

    let listing = match state
        .engine
        .list_object_versions(bucket, &prefix, key_marker.as_deref(), max_keys)
    {
        Ok(l) => l,
        Err(e) => return error_response(&e, Some(&bucket.name)),
    };

    let mut versions = Vec::new();
    let mut delete_markers = Vec::new();
    for v in listing.versions {
        if v.is_delete_marker {
            delete_markers.push(xml::DeleteMarkerEntry {
                key: v.key,
                version_id: v.version_id,
                is_latest: v.is_latest,
                last_modified: xml::timestamp_to_iso(v.created_at),
            });
        } else {
            versions.push(xml::VersionEntry {
                key: v.key,
                version_id: v.version_id,
                is_latest: v.is_latest,
                last_modified: xml::timestamp_to_iso(v.created_at),
                etag: format!("\"{}\"", v.etag),
                size: v.size,
                storage_class: v.storage_class,
            });
        }
    }

    let result = xml::ListVersionsResult {
        name: bucket.name.clone(),
        prefix,
        max_keys: max_keys as u32,
        is_truncated: listing.is_truncated,
        next_key_marker: listing.next_key_marker,
        versions,
        delete_markers,
    };
    xml_response(to_xml_document(&result))
}

/// HEAD /{bucket}
pub async fn head_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket_name): Path<String>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    let bucket_name = bucket_name.trim_end_matches('/').to_string();
    let bucket = match resolve_bucket(&state, &bucket_name) {
        Ok(b) => b,
        Err(_) => return empty_response(StatusCode::NOT_FOUND),
    };
    let actor = actor_of(Some(&ctx));
    if check_access(&state, actor.as_ref(), &bucket, "s3:ListBucket", None, None, None).is_err() {
        return empty_response(StatusCode::FORBIDDEN);
    }
    Response::builder()
        .status(StatusCode::OK)
        .header("x-amz-bucket-region", bucket.region)
        .body(Body::empty())
        .unwrap()
}

/// DELETE /{bucket} and ?policy
pub async fn delete_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    let bucket = match resolve_bucket(&state, &bucket_name) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let actor = actor_of(Some(&ctx));

    if params.contains_key("policy") {
        if let Err(resp) = check_access(
            &state,
            actor.as_ref(),
            &bucket,
            "s3:PutBucketPolicy",
            None,
            None,
            None,
        ) {
            return resp;
        }
        return match state.engine.delete_bucket_policy(&bucket_name) {
            Ok(()) => empty_response(StatusCode::NO_CONTENT),
            Err(e) => error_response(&e, Some(&bucket_name)),
        };
    }

    if let Err(resp) = check_access(
        &state,
        actor.as_ref(),
        &bucket,
        "s3:DeleteBucket",
        None,
        None,
        None,
    ) {
        return resp;
    }
    match state.engine.delete_bucket(&bucket_name) {
        Ok(()) => {
            state.cluster.remove_bucket_location(&bucket_name).ok();
            empty_response(StatusCode::NO_CONTENT)
        }
        Err(e) => error_response(&e, Some(&bucket_name)),
    }
}

/// POST /{bucket}?delete (batch delete)
pub async fn post_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !params.contains_key("delete") {
        return error_response(
            &Error::MethodNotAllowed("POST on a bucket requires ?delete".into()),
            Some(&bucket_name),
        );
    }
    let bucket = match resolve_bucket(&state, &bucket_name) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let actor = actor_of(Some(&ctx));
    if let Err(resp) = check_access(
        &state,
        actor.as_ref(),
        &bucket,
        "s3:DeleteObject",
        None,
        None,
        None,
    ) {
        return resp;
    }

    let request: xml::DeleteObjectsRequest = match quick_xml::de::from_reader(body.as_ref()) {
        Ok(req) => req,
        Err(_) => return error_response(&Error::MalformedXml, Some(&bucket_name)),
    };
    if request.objects.len() > 1000 {
        return error_response(
            &Error::invalid_request("batch delete is limited to 1000 keys"),
            Some(&bucket_name),
        );
    }

    let bypass = headers
        .get("x-amz-bypass-governance-retention")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    let identifiers: Vec<ObjectIdentifier> = request
        .objects
        .into_iter()
        .map(|o| ObjectIdentifier {
            key: o.key,
            version_id: o.version_id,
        })
        .collect();

    let results = state.engine.delete_objects(&bucket, identifiers, bypass).await;

    let mut deleted = Vec::new();
    let mut errors = Vec::new();
    for (id, outcome) in results {
        match outcome {
            Ok(out) => {
                if !request.quiet {
                    deleted.push(xml::DeletedObject {
                        key: id.key,
                        version_id: out.version_id,
                        delete_marker: out.delete_marker.then_some(true),
                    });
                }
            }
            Err(e) => errors.push(xml::DeleteError {
                key: id.key,
                code: e.s3_error_code().to_string(),
                message: e.to_string(),
            }),
        }
    }

    // Always 200 with a per-key status body
    xml_response(to_xml_document(&xml::DeleteObjectsResult { deleted, errors }))
}

// ── PUT subresources ─────────────────────────────────────────────────────────

async fn put_versioning(
    state: &AppState,
    bucket_name: &str,
    ctx: &AuthContext,
    body: &[u8],
) -> Response {
    let bucket = match resolve_bucket(state, bucket_name) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_access(
        state,
        actor_of(Some(ctx)).as_ref(),
        &bucket,
        "s3:PutBucketVersioning",
        None,
        None,
        None,
    ) {
        return resp;
    }

    let cfg: xml::VersioningConfigurationXml = match quick_xml::de::from_reader(body) {
        Ok(cfg) => cfg,
        Err(_) => return error_response(&Error::MalformedXml, Some(bucket_name)),
    };
    let target = match cfg.status.as_deref() {
        Some("Enabled") => VersioningState::Enabled,
        Some("Suspended") => VersioningState::Suspended,
        other => {
            return error_response(
                &Error::invalid_argument(format!("invalid versioning status {other:?}")),
                Some(bucket_name),
            )
        }
    };
    match state.engine.put_bucket_versioning(bucket_name, target) {
        Ok(()) => empty_response(StatusCode::OK),
        Err(e) => error_response(&e, Some(bucket_name)),
    }
}

async fn put_policy(
    state: &AppState,
    bucket_name: &str,
    ctx: &AuthContext,
    body: &[u8],
) -> Response {
    let bucket = match resolve_bucket(state, bucket_name) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_access(
        state,
        actor_of(Some(ctx)).as_ref(),
        &bucket,
        "s3:PutBucketPolicy",
        None,
        None,
        None,
    ) {
        return resp;
    }
    let json = match std::str::from_utf8(body) {
        Ok(s) => s,
        Err(_) => return error_response(&Error::invalid_request("policy must be UTF-8"), Some(bucket_name)),
    };
    match state.engine.put_bucket_policy(bucket_name, json) {
        Ok(()) => empty_response(StatusCode::NO_CONTENT),
        Err(e) => error_response(&e, Some(bucket_name)),
    }
}

async fn put_acl(
    state: &AppState,
    bucket_name: &str,
    ctx: &AuthContext,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let bucket = match resolve_bucket(state, bucket_name) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_access(
        state,
        actor_of(Some(ctx)).as_ref(),
        &bucket,
        "s3:PutBucketAcl",
        None,
        None,
        None,
    ) {
        return resp;
    }
    let acl = match acl_for_request(
        headers,
        Some(body),
        &bucket.owner_user_id,
        &bucket.owner_display_name,
    ) {
        Ok(acl) => acl,
        Err(e) => return error_response(&e, Some(bucket_name)),
    };
    match state.engine.put_bucket_acl(bucket_name, acl) {
        Ok(()) => empty_response(StatusCode::OK),
        Err(e) => error_response(&e, Some(bucket_name)),
    }
}

async fn put_lifecycle(
    state: &AppState,
    bucket_name: &str,
    ctx: &AuthContext,
    body: &[u8],
) -> Response {
    let bucket = match resolve_bucket(state, bucket_name) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_access(
        state,
        actor_of(Some(ctx)).as_ref(),
        &bucket,
        "s3:PutLifecycleConfiguration",
        None,
        None,
        None,
    ) {
        return resp;
    }

    let cfg: xml::LifecycleConfigurationXml = match quick_xml::de::from_reader(body) {
        Ok(cfg) => cfg,
        Err(_) => return error_response(&Error::MalformedXml, Some(bucket_name)),
    };
    let rules: Vec<LifecycleRule> = cfg
        .rules
        .into_iter()
        .enumerate()
        .map(|(i, r)| LifecycleRule {
            id: r.id.unwrap_or_else(|| format!("rule-{}", i + 1)),
            enabled: r.status == "Enabled",
            prefix: r
                .prefix
                .or_else(|| r.filter.and_then(|f| f.prefix))
                .unwrap_or_default(),
            expiration_days: r.expiration.as_ref().and_then(|e| e.days),
            noncurrent_days: r
                .noncurrent_version_expiration
                .as_ref()
                .map(|n| n.noncurrent_days),
            expired_object_delete_marker: r
                .expiration
                .as_ref()
                .and_then(|e| e.expired_object_delete_marker)
                .unwrap_or(false),
        })
        .collect();

    match state.engine.put_bucket_lifecycle(bucket_name, rules) {
        Ok(()) => empty_response(StatusCode::OK),
        Err(e) => error_response(&e, Some(bucket_name)),
    }
}

async fn put_cors(state: &AppState, bucket_name: &str, ctx: &AuthContext, body: &[u8]) -> Response {
    let bucket = match resolve_bucket(state, bucket_name) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_access(
        state,
        actor_of(Some(ctx)).as_ref(),
        &bucket,
        "s3:PutBucketCORS",
        None,
        None,
        None,
    ) {
        return resp;
    }
    let cfg: xml::CorsConfigurationXml = match quick_xml::de::from_reader(body) {
        Ok(cfg) => cfg,
        Err(_) => return error_response(&Error::MalformedXml, Some(bucket_name)),
    };
    let rules: Vec<CorsRule> = cfg
        .rules
        .into_iter()
        .map(|r| CorsRule {
            allowed_origins: r.allowed_origins,
            allowed_methods: r.allowed_methods,
            allowed_headers: r.allowed_headers,
            expose_headers: r.expose_headers,
            max_age_seconds: r.max_age_seconds,
        })
        .collect();
    match state.engine.put_bucket_cors(bucket_name, rules) {
        Ok(()) => empty_response(StatusCode::OK),
        Err(e) => error_response(&e, Some(bucket_name)),
    }
}

async fn put_notification(
    state: &AppState,
    bucket_name: &str,
    ctx: &AuthContext,
    body: &[u8],
) -> Response {
    let bucket = match resolve_bucket(state, bucket_name) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_access(
        state,
        actor_of(Some(ctx)).as_ref(),
        &bucket,
        "s3:PutBucketNotification",
        None,
        None,
        None,
    ) {
        return resp;
    }
    let cfg: xml::NotificationConfigurationXml = match quick_xml::de::from_reader(body) {
        Ok(cfg) => cfg,
        Err(_) => return error_response(&Error::MalformedXml, Some(bucket_name)),
    };
    let targets: Vec<NotificationTarget> = cfg
        .webhooks
        .into_iter()
        .map(|w| NotificationTarget {
            events: w.events,
            prefix: w.prefix.unwrap_or_default(),
            webhook_url: w.url,
        })
        .collect();
    match state.engine.put_bucket_notifications(bucket_name, targets) {
        Ok(()) => empty_response(StatusCode::OK),
        Err(e) => error_response(&e, Some(bucket_name)),
    }
}

async fn put_encryption(
    state: &AppState,
    bucket_name: &str,
    ctx: &AuthContext,
    body: &[u8],
) -> Response {
    let bucket = match resolve_bucket(state, bucket_name) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_access(
        state,
        actor_of(Some(ctx)).as_ref(),
        &bucket,
        "s3:PutEncryptionConfiguration",
        None,
        None,
        None,
    ) {
        return resp;
    }
    let cfg: xml::EncryptionConfigurationXml = match quick_xml::de::from_reader(body) {
        Ok(cfg) => cfg,
        Err(_) => return error_response(&Error::MalformedXml, Some(bucket_name)),
    };
    let enabled = cfg
        .rules
        .iter()
        .any(|r| r.apply.as_ref().is_some_and(|a| a.sse_algorithm == "AES256"));
    match state.engine.put_bucket_encryption(bucket_name, enabled) {
        Ok(()) => empty_response(StatusCode::OK),
        Err(e) => error_response(&e, Some(bucket_name)),
    }
}

async fn put_object_lock(
    state: &AppState,
    bucket_name: &str,
    ctx: &AuthContext,
    body: &[u8],
) -> Response {
    let bucket = match resolve_bucket(state, bucket_name) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_access(
        state,
        actor_of(Some(ctx)).as_ref(),
        &bucket,
        "s3:PutBucketObjectLockConfiguration",
        None,
        None,
        None,
    ) {
        return resp;
    }
    let cfg: xml::ObjectLockConfigurationXml = match quick_xml::de::from_reader(body) {
        Ok(cfg) => cfg,
        Err(_) => return error_response(&Error::MalformedXml, Some(bucket_name)),
    };
    if cfg.object_lock_enabled.as_deref() != Some("Enabled") {
        return error_response(
            &Error::invalid_argument("ObjectLockEnabled must be \"Enabled\""),
            Some(bucket_name),
        );
    }
    let retention = cfg.rule.and_then(|r| r.default_retention);
    let config = ObjectLockConfig {
        default_mode: retention
            .as_ref()
            .and_then(|r| r.mode.as_deref())
            .and_then(ObjectLockMode::parse),
        default_days: retention.and_then(|r| r.days),
    };
    match state.engine.put_bucket_object_lock(bucket_name, config) {
        Ok(()) => empty_response(StatusCode::OK),
        Err(e) => error_response(&e, Some(bucket_name)),
    }
}

async fn put_public_access_block(
    state: &AppState,
    bucket_name: &str,
    ctx: &AuthContext,
    body: &[u8],
) -> Response {
    let bucket = match resolve_bucket(state, bucket_name) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_access(
        state,
        actor_of(Some(ctx)).as_ref(),
        &bucket,
        "s3:PutBucketPublicAccessBlock",
        None,
        None,
        None,
    ) {
        return resp;
    }
    let cfg: xml::PublicAccessBlockXml = match quick_xml::de::from_reader(body) {
        Ok(cfg) => cfg,
        Err(_) => return error_response(&Error::MalformedXml, Some(bucket_name)),
    };
    let pab = PublicAccessBlock {
        block_public_acls: cfg.block_public_acls,
        ignore_public_acls: cfg.ignore_public_acls,
        block_public_policy: cfg.block_public_policy,
        restrict_public_buckets: cfg.restrict_public_buckets,
    };
    match state.engine.put_public_access_block(bucket_name, pab) {
        Ok(()) => empty_response(StatusCode::OK),
        Err(e) => {
            error!(bucket = bucket_name, error = %e, "public access block update failed");
            error_response(&e, Some(bucket_name))
        }
    }
}
