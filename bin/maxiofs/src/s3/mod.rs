//! S3 REST surface.
//!
//! Routing follows the AWS model: a handful of wildcard routes with
//! query-parameter dispatch inside each handler. Every bucket-scoped
//! request first consults the cluster router; requests for buckets
//! owned by a healthy peer are forwarded verbatim.

pub mod bucket;
pub mod multipart;
pub mod object;

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, head, post, put},
    Router,
};
use std::net::IpAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::auth_middleware::{auth_layer, AuthContext};
use crate::metrics_middleware::metrics_layer;
use crate::state::AppState;
use maxiofs_auth::acl::Acl;
use maxiofs_auth::policy::BucketPolicy;
use maxiofs_auth::{authorize, Actor, AuthzInput};
use maxiofs_cluster::forward::forward_request;
use maxiofs_cluster::router::Placement;
use maxiofs_common::Error;
use maxiofs_engine::types::BucketRecord;
use maxiofs_s3::{error_response, s3_error_response};

/// Build the S3 data-plane router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(crate::metrics_handler))
        // Service endpoint (list buckets)
        .route("/", get(bucket::list_buckets))
        // Bucket operations (query-param subresources dispatched inside)
        .route("/{bucket}", put(bucket::put_bucket))
        .route("/{bucket}", get(bucket::get_bucket))
        .route("/{bucket}", delete(bucket::delete_bucket))
        .route("/{bucket}", head(bucket::head_bucket))
        .route("/{bucket}", post(bucket::post_bucket))
        // Trailing-slash aliases (s3fs compatibility)
        .route("/{bucket}/", get(bucket::get_bucket))
        .route("/{bucket}/", head(bucket::head_bucket))
        // Object operations
        .route("/{bucket}/{*key}", put(object::put_object_dispatch))
        .route("/{bucket}/{*key}", get(object::get_object_dispatch))
        .route("/{bucket}/{*key}", head(object::head_object))
        .route("/{bucket}/{*key}", delete(object::delete_object_dispatch))
        .route("/{bucket}/{*key}", post(multipart::post_object))
        .layer(middleware::from_fn_with_state(state.clone(), cluster_layer))
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
        .layer(middleware::from_fn(metrics_layer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness endpoint, also used by peer health probes.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Forward requests whose bucket lives on another node. Runs after
/// authentication so local credential checks still apply first.
async fn cluster_layer(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if path == "/" || path == "/health" || path == "/metrics" {
        return next.run(request).await;
    }
    let bucket = path
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string();
    if bucket.is_empty() {
        return next.run(request).await;
    }

    match state.cluster.placement(&bucket) {
        Ok(Placement::Local) => next.run(request).await,
        Ok(Placement::Remote(node)) => {
            debug!(bucket, node = %node.name, "forwarding to owning node");
            let (parts, body) = request.into_parts();
            let path_and_query = parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| parts.uri.path().to_string());

            match forward_request(
                &state.http,
                &node.url,
                &parts.method,
                &path_and_query,
                &parts.headers,
                body.into_data_stream(),
            )
            .await
            {
                Ok(forwarded) => {
                    let mut builder = Response::builder().status(forwarded.status);
                    for (name, value) in &forwarded.headers {
                        builder = builder.header(name, value);
                    }
                    builder
                        .body(Body::from_stream(forwarded.body.bytes_stream()))
                        .unwrap_or_else(|_| {
                            error_response(&Error::internal("forward response build failed"), None)
                        })
                }
                Err(e) => error_response(&e, Some(&bucket)),
            }
        }
        Ok(Placement::Unavailable(node)) => s3_error_response(
            "ServiceUnavailable",
            &format!("bucket {bucket} is owned by unavailable node {node}"),
            503,
            Some(&bucket),
        ),
        Err(e) => error_response(&e, Some(&bucket)),
    }
}

// ── Shared handler helpers ───────────────────────────────────────────────────

/// Pull the authenticated actor out of request extensions.
pub(crate) fn actor_of(ctx: Option<&AuthContext>) -> Option<Actor> {
    ctx.and_then(|c| c.actor.clone())
}

/// Authorize one S3 operation against a resolved bucket. Returns the
/// error response to send on denial.
pub(crate) fn check_access(
    state: &AppState,
    actor: Option<&Actor>,
    bucket: &BucketRecord,
    action: &str,
    key: Option<&str>,
    object_acl: Option<&Acl>,
    source_ip: Option<IpAddr>,
) -> Result<(), Response> {
    let resource = match key {
        Some(k) => format!("arn:aws:s3:::{}/{k}", bucket.name),
        None => format!("arn:aws:s3:::{}", bucket.name),
    };
    let policy = bucket
        .policy_json
        .as_deref()
        .and_then(|json| BucketPolicy::from_json(json).ok());

    let input = AuthzInput {
        actor,
        action,
        resource: &resource,
        bucket_tenant: &bucket.tenant_id,
        bucket_owner: &bucket.owner_user_id,
        object_acl,
        policy: policy.as_ref(),
        bucket_acl: &bucket.acl,
        public_access_block: bucket.public_access_block,
        source_ip,
    };

    match authorize(&input) {
        maxiofs_auth::authorize::Decision::Allow => Ok(()),
        maxiofs_auth::authorize::Decision::Deny => {
            let (user_id, username) = actor
                .map(|a| (a.user_id.clone(), a.arn.clone()))
                .unwrap_or_else(|| ("anonymous".into(), "anonymous".into()));
            state
                .engine
                .audit(
                    &user_id,
                    &username,
                    action,
                    &resource,
                    false,
                    source_ip.map(|ip| ip.to_string()),
                )
                .ok();
            Err(error_response(&Error::AccessDenied, Some(&resource)))
        }
    }
}

/// Resolve a bucket or render the S3 error.
pub(crate) fn resolve_bucket(state: &AppState, name: &str) -> Result<BucketRecord, Response> {
    state
        .engine
        .resolve_bucket(name)
        .map_err(|e| error_response(&e, Some(name)))
}

/// Look up the tenant storage quota for a bucket (0 = unlimited).
pub(crate) fn tenant_quota(state: &AppState, bucket: &BucketRecord) -> u64 {
    state
        .identity
        .get_tenant(&bucket.tenant_id)
        .map(|t| t.quotas.max_storage_bytes)
        .unwrap_or(0)
}

/// Parsed Range header, before validation against the object size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RangeSpec {
    /// bytes=a-b or bytes=a-
    FromTo(u64, Option<u64>),
    /// bytes=-n (last n bytes)
    Suffix(u64),
}

/// Parse an HTTP Range header. Returns `None` for absent or malformed
/// headers (malformed ranges are ignored per RFC 7233).
pub(crate) fn parse_range_header(value: &str) -> Option<RangeSpec> {
    let spec = value.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start = start.trim();
    let end = end.trim();

    if start.is_empty() {
        let suffix: u64 = end.parse().ok()?;
        return Some(RangeSpec::Suffix(suffix));
    }
    let start: u64 = start.parse().ok()?;
    if end.is_empty() {
        return Some(RangeSpec::FromTo(start, None));
    }
    let end: u64 = end.parse().ok()?;
    if start > end {
        return None;
    }
    Some(RangeSpec::FromTo(start, Some(end)))
}

/// Resolve a RangeSpec against the object size into an inclusive range.
pub(crate) fn concrete_range(spec: RangeSpec, size: u64) -> Result<(u64, Option<u64>), Error> {
    match spec {
        RangeSpec::FromTo(start, end) => Ok((start, end)),
        RangeSpec::Suffix(n) => {
            if n == 0 || size == 0 {
                return Err(Error::InvalidRange("empty suffix range".into()));
            }
            let start = size.saturating_sub(n);
            Ok((start, Some(size - 1)))
        }
    }
}

// ── ACL wire conversion ──────────────────────────────────────────────────────

use maxiofs_auth::acl::{Grant, Grantee, Permission};
use maxiofs_s3::xml::{
    AccessControlListXml, AccessControlPolicyXml, GrantXml, GranteeXml, OwnerXml,
};

const ALL_USERS_URI: &str = "http://acs.amazonaws.com/groups/global/AllUsers";
const AUTH_USERS_URI: &str = "http://acs.amazonaws.com/groups/global/AuthenticatedUsers";

/// Render an ACL as the AccessControlPolicy wire shape.
pub(crate) fn acl_to_xml(acl: &Acl) -> AccessControlPolicyXml {
    AccessControlPolicyXml {
        owner: OwnerXml {
            id: acl.owner_id.clone(),
            display_name: Some(acl.owner_display_name.clone()),
        },
        access_control_list: AccessControlListXml {
            grants: acl
                .grants
                .iter()
                .map(|grant| GrantXml {
                    grantee: match &grant.grantee {
                        Grantee::CanonicalUser { id, display_name } => GranteeXml {
                            id: Some(id.clone()),
                            display_name: Some(display_name.clone()),
                            uri: None,
                        },
                        Grantee::AllUsers => GranteeXml {
                            id: None,
                            display_name: None,
                            uri: Some(ALL_USERS_URI.to_string()),
                        },
                        Grantee::AuthenticatedUsers => GranteeXml {
                            id: None,
                            display_name: None,
                            uri: Some(AUTH_USERS_URI.to_string()),
                        },
                    },
                    permission: grant.permission.as_str().to_string(),
                })
                .collect(),
        },
    }
}

/// Parse an AccessControlPolicy body back into an ACL.
pub(crate) fn acl_from_xml(xml: &AccessControlPolicyXml) -> Result<Acl, Error> {
    let mut grants = Vec::with_capacity(xml.access_control_list.grants.len());
    for grant in &xml.access_control_list.grants {
        let permission = Permission::parse(&grant.permission)
            .ok_or_else(|| Error::invalid_argument(format!("unknown permission {}", grant.permission)))?;
        let grantee = match (&grant.grantee.id, &grant.grantee.uri) {
            (Some(id), _) => Grantee::CanonicalUser {
                id: id.clone(),
                display_name: grant.grantee.display_name.clone().unwrap_or_default(),
            },
            (None, Some(uri)) if uri == ALL_USERS_URI => Grantee::AllUsers,
            (None, Some(uri)) if uri == AUTH_USERS_URI => Grantee::AuthenticatedUsers,
            _ => return Err(Error::invalid_argument("grantee needs an ID or group URI")),
        };
        grants.push(Grant { grantee, permission });
    }
    Ok(Acl {
        owner_id: xml.owner.id.clone(),
        owner_display_name: xml.owner.display_name.clone().unwrap_or_default(),
        grants,
    })
}

/// Resolve the ACL for a write request: canned `x-amz-acl` header, XML
/// body, or the private default.
pub(crate) fn acl_for_request(
    headers: &axum::http::HeaderMap,
    body: Option<&[u8]>,
    owner_id: &str,
    owner_display: &str,
) -> Result<Acl, Error> {
    if let Some(canned) = headers.get("x-amz-acl").and_then(|v| v.to_str().ok()) {
        return Acl::canned(canned, owner_id, owner_display)
            .ok_or_else(|| Error::invalid_argument(format!("unknown canned ACL {canned}")));
    }
    if let Some(body) = body {
        if !body.is_empty() {
            let xml: AccessControlPolicyXml = quick_xml::de::from_reader(body)
                .map_err(|_| Error::MalformedXml)?;
            return acl_from_xml(&xml);
        }
    }
    Ok(Acl::private(owner_id, owner_display))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_header() {
        assert_eq!(
            parse_range_header("bytes=0-99"),
            Some(RangeSpec::FromTo(0, Some(99)))
        );
        assert_eq!(
            parse_range_header("bytes=100-"),
            Some(RangeSpec::FromTo(100, None))
        );
        assert_eq!(parse_range_header("bytes=-50"), Some(RangeSpec::Suffix(50)));
        assert_eq!(parse_range_header("bytes=9-3"), None);
        assert_eq!(parse_range_header("lines=1-2"), None);
    }

    #[test]
    fn test_concrete_range() {
        assert_eq!(
            concrete_range(RangeSpec::Suffix(3), 10).unwrap(),
            (7, Some(9))
        );
        // Oversized suffix clamps to the whole object
        assert_eq!(
            concrete_range(RangeSpec::Suffix(100), 10).unwrap(),
            (0, Some(9))
        );
        assert!(concrete_range(RangeSpec::Suffix(0), 10).is_err());
    }
}
