//! Console management API (`/api/v1`, JSON).
//!
//! Auth (login with throttling and optional TOTP, sessions), tenants,
//! users, access keys, bucket management views, metrics summary, audit
//! logs, and the cluster surface including the HMAC-signed internal
//! endpoints used by peers.

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Extension, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::state::AppState;
use maxiofs_auth::session::SessionClaims;
use maxiofs_auth::user::{Role, TenantQuotas};
use maxiofs_auth::AuthError;
use maxiofs_cluster::rpc;
use maxiofs_common::{Error, ObjectKey};
use maxiofs_engine::object::PutObjectInput;
use maxiofs_engine::types::{ReplicationDestination, ReplicationRule};

/// Build the console router.
pub fn router(state: Arc<AppState>) -> Router {
    let internal = Router::new()
        .route("/cluster/internal/replicate", post(internal_replicate_put))
        .route("/cluster/internal/replicate", delete(internal_replicate_delete))
        .route("/cluster/internal/sync", post(internal_sync))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            internal_auth_layer,
        ));

    let authed = Router::new()
        .route("/auth/me", get(auth_me))
        .route("/auth/logout", post(auth_logout))
        .route("/auth/2fa/enable", post(mfa_enable))
        .route("/auth/2fa/verify", post(mfa_verify))
        .route("/auth/2fa/disable", post(mfa_disable))
        .route("/tenants", get(list_tenants).post(create_tenant))
        .route("/tenants/{id}", get(get_tenant).put(update_tenant).delete(delete_tenant))
        .route("/users", get(list_users).post(create_user))
        .route("/users/{id}", get(get_user).put(update_user).delete(delete_user))
        .route("/users/{id}/password", put(set_password))
        .route("/users/{id}/access-keys", get(list_access_keys).post(create_access_key))
        .route("/access-keys/{id}", delete(delete_access_key))
        .route("/buckets", get(list_buckets_view))
        .route("/buckets/{name}/objects", get(list_bucket_objects))
        .route("/metrics", get(metrics_summary))
        .route("/audit-logs", get(list_audit_logs))
        .route("/cluster/initialize", post(cluster_initialize))
        .route("/cluster/nodes", get(cluster_nodes).post(cluster_add_node))
        .route("/cluster/nodes/{id}", delete(cluster_remove_node))
        .route("/cluster/health", get(cluster_health))
        .route("/cluster/buckets", get(cluster_bucket_locations).put(cluster_set_location))
        .route("/cluster/replication", get(list_replication_rules).post(create_replication_rule))
        .route("/cluster/replication/{id}", delete(delete_replication_rule))
        .layer(middleware::from_fn_with_state(state.clone(), session_layer));

    Router::new()
        .route("/health", get(crate::s3::health_check))
        .route("/metrics", get(crate::metrics_handler))
        .nest(
            "/api/v1",
            Router::new()
                .route("/auth/login", post(auth_login))
                .merge(internal)
                .merge(authed),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Errors & middleware ──────────────────────────────────────────────────────

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn domain_error(e: &Error) -> Response {
    json_error(
        StatusCode::from_u16(e.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        e.to_string(),
    )
}

fn auth_error(e: AuthError) -> Response {
    let e: Error = e.into();
    domain_error(&e)
}

/// Bearer-JWT session middleware for the management surface.
async fn session_layer(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = token else {
        return json_error(StatusCode::UNAUTHORIZED, "missing bearer token");
    };
    match state.sessions.verify(token) {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(_) => json_error(StatusCode::UNAUTHORIZED, "invalid or expired session"),
    }
}

/// HMAC verification for the internal cluster endpoints.
async fn internal_auth_layer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Ok(Some(token)) = state.cluster.node_token() else {
        return json_error(StatusCode::FORBIDDEN, "cluster not initialized");
    };

    let headers = request.headers();
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };
    let (Some(timestamp), Some(body_sha), Some(signature)) = (
        get(rpc::HDR_TIMESTAMP),
        get(rpc::HDR_BODY_SHA256),
        get(rpc::HDR_SIGNATURE),
    ) else {
        return json_error(StatusCode::FORBIDDEN, "missing RPC signature headers");
    };
    let Ok(timestamp) = timestamp.parse::<u64>() else {
        return json_error(StatusCode::FORBIDDEN, "bad RPC timestamp");
    };

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();
    // The console router nests under /api/v1; peers sign the full path
    let signed_path = format!("/api/v1{path_and_query}");

    if let Err(e) = rpc::verify_rpc(
        &token,
        request.method().as_str(),
        &signed_path,
        &body_sha,
        timestamp,
        &signature,
    ) {
        warn!(error = %e, "internal RPC signature rejected");
        return json_error(StatusCode::FORBIDDEN, "invalid RPC signature");
    }
    next.run(request).await
}

fn require_admin(claims: &SessionClaims) -> Result<(), Response> {
    if claims.roles.contains(&Role::Admin) {
        Ok(())
    } else {
        Err(json_error(StatusCode::FORBIDDEN, "admin role required"))
    }
}

fn require_global_admin(claims: &SessionClaims) -> Result<(), Response> {
    if claims.roles.contains(&Role::Admin) && claims.tenant.is_none() {
        Ok(())
    } else {
        Err(json_error(StatusCode::FORBIDDEN, "global admin required"))
    }
}

// ── Auth ─────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
    totp_code: Option<String>,
}

#[derive(Serialize)]
struct UserView {
    id: String,
    username: String,
    display_name: String,
    email: Option<String>,
    roles: Vec<Role>,
    tenant_id: Option<String>,
    mfa_enabled: bool,
}

impl From<maxiofs_auth::User> for UserView {
    fn from(u: maxiofs_auth::User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            display_name: u.display_name,
            email: u.email,
            roles: u.roles,
            tenant_id: u.tenant_id,
            mfa_enabled: u.mfa_secret.is_some(),
        }
    }
}

async fn auth_login(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<LoginRequest>,
) -> Response {
    if !state.throttle.allow(addr.ip()) {
        return json_error(StatusCode::TOO_MANY_REQUESTS, "too many login attempts");
    }

    match state
        .identity
        .authenticate(&req.username, &req.password, req.totp_code.as_deref())
    {
        Ok(user) => match state.sessions.issue(&user) {
            Ok(token) => {
                state
                    .engine
                    .audit(&user.id, &user.username, "console:Login", "console", true, Some(addr.ip().to_string()))
                    .ok();
                Json(json!({ "token": token, "user": UserView::from(user) })).into_response()
            }
            Err(e) => auth_error(e),
        },
        Err(e) => {
            state
                .engine
                .audit("unknown", &req.username, "console:Login", "console", false, Some(addr.ip().to_string()))
                .ok();
            auth_error(e)
        }
    }
}

async fn auth_me(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
) -> Response {
    match state.identity.get_user(&claims.sub) {
        Ok(user) => Json(UserView::from(user)).into_response(),
        Err(e) => auth_error(e),
    }
}

async fn auth_logout(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
) -> Response {
    state.sessions.revoke(&claims);
    StatusCode::NO_CONTENT.into_response()
}

async fn mfa_enable(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
) -> Response {
    match state.identity.enable_mfa(&claims.sub) {
        Ok(secret) => Json(json!({ "secret": secret })).into_response(),
        Err(e) => auth_error(e),
    }
}

#[derive(Deserialize)]
struct MfaVerifyRequest {
    code: String,
}

async fn mfa_verify(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<MfaVerifyRequest>,
) -> Response {
    match state.identity.verify_mfa(&claims.sub, &req.code) {
        Ok(valid) => Json(json!({ "valid": valid })).into_response(),
        Err(e) => auth_error(e),
    }
}

async fn mfa_disable(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
) -> Response {
    match state.identity.disable_mfa(&claims.sub) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => auth_error(e),
    }
}

// ── Tenants ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateTenantRequest {
    name: String,
    display_name: Option<String>,
    #[serde(default)]
    quotas: TenantQuotas,
}

async fn list_tenants(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
) -> Response {
    if let Err(resp) = require_global_admin(&claims) {
        return resp;
    }
    match state.identity.list_tenants() {
        Ok(tenants) => {
            let views: Vec<_> = tenants
                .into_iter()
                .map(|t| {
                    let usage = state.identity.tenant_usage(&t.id).unwrap_or_default();
                    json!({ "tenant": t, "usage": usage })
                })
                .collect();
            Json(views).into_response()
        }
        Err(e) => auth_error(e),
    }
}

async fn create_tenant(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<CreateTenantRequest>,
) -> Response {
    if let Err(resp) = require_global_admin(&claims) {
        return resp;
    }
    let display = req.display_name.unwrap_or_else(|| req.name.clone());
    match state.identity.create_tenant(&req.name, &display, req.quotas) {
        Ok(tenant) => {
            state
                .engine
                .audit(&claims.sub, &claims.name, "console:CreateTenant", &tenant.name, true, None)
                .ok();
            (StatusCode::CREATED, Json(tenant)).into_response()
        }
        Err(e) => auth_error(e),
    }
}

async fn get_tenant(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_admin(&claims) {
        return resp;
    }
    match state.identity.get_tenant(&id) {
        Ok(tenant) => {
            let usage = state.identity.tenant_usage(&tenant.id).unwrap_or_default();
            Json(json!({ "tenant": tenant, "usage": usage })).into_response()
        }
        Err(e) => auth_error(e),
    }
}

#[derive(Deserialize)]
struct UpdateTenantRequest {
    display_name: Option<String>,
    status: Option<maxiofs_auth::user::TenantStatus>,
    quotas: Option<TenantQuotas>,
}

async fn update_tenant(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTenantRequest>,
) -> Response {
    if let Err(resp) = require_global_admin(&claims) {
        return resp;
    }
    let mut tenant = match state.identity.get_tenant(&id) {
        Ok(t) => t,
        Err(e) => return auth_error(e),
    };
    if let Some(display) = req.display_name {
        tenant.display_name = display;
    }
    if let Some(status) = req.status {
        tenant.status = status;
    }
    if let Some(quotas) = req.quotas {
        tenant.quotas = quotas;
    }
    match state.identity.update_tenant(&tenant) {
        Ok(()) => Json(tenant).into_response(),
        Err(e) => auth_error(e),
    }
}

async fn delete_tenant(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_global_admin(&claims) {
        return resp;
    }
    match state.identity.delete_tenant(&id) {
        Ok(()) => {
            state
                .engine
                .audit(&claims.sub, &claims.name, "console:DeleteTenant", &id, true, None)
                .ok();
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => auth_error(e),
    }
}

// ── Users ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateUserRequest {
    username: String,
    password: String,
    roles: Vec<Role>,
    tenant_id: Option<String>,
}

/// Tenant admins only manage users inside their own tenant.
fn scope_check(claims: &SessionClaims, target_tenant: Option<&str>) -> Result<(), Response> {
    match &claims.tenant {
        None => Ok(()),
        Some(own) if target_tenant == Some(own.as_str()) => Ok(()),
        _ => Err(json_error(
            StatusCode::FORBIDDEN,
            "cannot manage users outside your tenant",
        )),
    }
}

async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
) -> Response {
    if let Err(resp) = require_admin(&claims) {
        return resp;
    }
    match state.identity.list_users(claims.tenant.as_deref()) {
        Ok(users) => {
            Json(users.into_iter().map(UserView::from).collect::<Vec<_>>()).into_response()
        }
        Err(e) => auth_error(e),
    }
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<CreateUserRequest>,
) -> Response {
    if let Err(resp) = require_admin(&claims) {
        return resp;
    }
    if let Err(resp) = scope_check(&claims, req.tenant_id.as_deref()) {
        return resp;
    }
    match state
        .identity
        .create_user(&req.username, &req.password, req.roles, req.tenant_id)
    {
        Ok(user) => {
            state
                .engine
                .audit(&claims.sub, &claims.name, "console:CreateUser", &user.username, true, None)
                .ok();
            (StatusCode::CREATED, Json(UserView::from(user))).into_response()
        }
        Err(e) => auth_error(e),
    }
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Path(id): Path<String>,
) -> Response {
    let user = match state.identity.get_user(&id) {
        Ok(u) => u,
        Err(e) => return auth_error(e),
    };
    // Users may view themselves; admins per scope
    if claims.sub != user.id {
        if let Err(resp) = require_admin(&claims) {
            return resp;
        }
        if let Err(resp) = scope_check(&claims, user.tenant_id.as_deref()) {
            return resp;
        }
    }
    Json(UserView::from(user)).into_response()
}

#[derive(Deserialize)]
struct UpdateUserRequest {
    display_name: Option<String>,
    email: Option<String>,
    roles: Option<Vec<Role>>,
    status: Option<maxiofs_auth::user::UserStatus>,
}

async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Response {
    if let Err(resp) = require_admin(&claims) {
        return resp;
    }
    let mut user = match state.identity.get_user(&id) {
        Ok(u) => u,
        Err(e) => return auth_error(e),
    };
    if let Err(resp) = scope_check(&claims, user.tenant_id.as_deref()) {
        return resp;
    }
    if let Some(display) = req.display_name {
        user.display_name = display;
    }
    if let Some(email) = req.email {
        user.email = Some(email);
    }
    if let Some(roles) = req.roles {
        user.roles = roles;
    }
    if let Some(status) = req.status {
        user.status = status;
    }
    match state.identity.update_user(&user) {
        Ok(()) => Json(UserView::from(user)).into_response(),
        Err(e) => auth_error(e),
    }
}

#[derive(Deserialize)]
struct SetPasswordRequest {
    password: String,
}

async fn set_password(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Path(id): Path<String>,
    Json(req): Json<SetPasswordRequest>,
) -> Response {
    if claims.sub != id {
        if let Err(resp) = require_admin(&claims) {
            return resp;
        }
    }
    match state.identity.set_password(&id, &req.password) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => auth_error(e),
    }
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_admin(&claims) {
        return resp;
    }
    let user = match state.identity.get_user(&id) {
        Ok(u) => u,
        Err(e) => return auth_error(e),
    };
    if let Err(resp) = scope_check(&claims, user.tenant_id.as_deref()) {
        return resp;
    }
    match state.identity.delete_user(&id) {
        Ok(()) => {
            state
                .engine
                .audit(&claims.sub, &claims.name, "console:DeleteUser", &user.username, true, None)
                .ok();
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => auth_error(e),
    }
}

// ── Access keys ──────────────────────────────────────────────────────────────

async fn list_access_keys(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Path(user_id): Path<String>,
) -> Response {
    if claims.sub != user_id {
        if let Err(resp) = require_admin(&claims) {
            return resp;
        }
    }
    match state.identity.list_access_keys(&user_id) {
        Ok(keys) => {
            // Secrets never leave the store after creation
            let views: Vec<_> = keys
                .into_iter()
                .map(|k| {
                    json!({
                        "access_key_id": k.access_key_id,
                        "created_at": k.created_at,
                        "last_used_at": k.last_used_at,
                        "status": k.status,
                    })
                })
                .collect();
            Json(views).into_response()
        }
        Err(e) => auth_error(e),
    }
}

async fn create_access_key(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Path(user_id): Path<String>,
) -> Response {
    if claims.sub != user_id {
        if let Err(resp) = require_admin(&claims) {
            return resp;
        }
    }
    match state.identity.create_access_key(&user_id) {
        Ok((key, secret)) => {
            info!(user = %user_id, access_key = %key.access_key_id, "access key created");
            // The one and only time the secret is returned
            (
                StatusCode::CREATED,
                Json(json!({
                    "access_key_id": key.access_key_id,
                    "secret_access_key": secret,
                    "created_at": key.created_at,
                })),
            )
                .into_response()
        }
        Err(e) => auth_error(e),
    }
}

async fn delete_access_key(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Path(access_key_id): Path<String>,
) -> Response {
    if let Err(resp) = require_admin(&claims) {
        return resp;
    }
    match state.identity.delete_access_key(&access_key_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => auth_error(e),
    }
}

// ── Buckets (management view) ────────────────────────────────────────────────

async fn list_buckets_view(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
) -> Response {
    let buckets = match state.engine.list_buckets(claims.tenant.as_deref()) {
        Ok(b) => b,
        Err(e) => return domain_error(&e),
    };
    let views: Vec<_> = buckets
        .iter()
        .map(|b| {
            let stats = state.engine.bucket_stats(b).unwrap_or_default();
            json!({
                "name": b.name,
                "tenant_id": b.tenant_id,
                "region": b.region,
                "created_at": b.created_at,
                "versioning": b.versioning,
                "object_lock": b.object_lock.is_some(),
                "encryption": b.encryption.is_some(),
                "objects": stats.objects,
                "bytes": stats.bytes,
            })
        })
        .collect();
    Json(views).into_response()
}

async fn list_bucket_objects(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let bucket = match state.engine.resolve_bucket(&name) {
        Ok(b) => b,
        Err(e) => return domain_error(&e),
    };
    if let Some(tenant) = &claims.tenant {
        if *tenant != bucket.tenant_id {
            return json_error(StatusCode::FORBIDDEN, "bucket belongs to another tenant");
        }
    }

    let prefix = params.get("prefix").cloned().unwrap_or_default();
    let token = params.get("token").cloned();
    let listing = match state
        .engine
        .list_objects(&bucket, &prefix, Some("/"), token.as_deref(), 1000)
    {
        Ok(l) => l,
        Err(e) => return domain_error(&e),
    };

    Json(json!({
        "objects": listing.objects.iter().map(|o| json!({
            "key": o.key,
            "size": o.size,
            "etag": o.etag,
            "content_type": o.content_type,
            "last_modified": o.created_at,
            "version_id": o.version_id,
        })).collect::<Vec<_>>(),
        "prefixes": listing.common_prefixes,
        "truncated": listing.is_truncated,
        "next_token": listing.next_token,
    }))
    .into_response()
}

// ── Metrics & audit ──────────────────────────────────────────────────────────

async fn metrics_summary(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
) -> Response {
    if let Err(resp) = require_admin(&claims) {
        return resp;
    }
    let tenants = state.identity.list_tenants().unwrap_or_default();
    let tenant_usage: Vec<_> = tenants
        .iter()
        .map(|t| {
            let usage = state.identity.tenant_usage(&t.id).unwrap_or_default();
            json!({ "tenant": t.name, "usage": usage })
        })
        .collect();
    let backlog = state.engine.replication_backlog().unwrap_or(0);

    Json(json!({
        "tenants": tenant_usage,
        "replication_backlog": backlog,
        "events_delivered": state.engine.stats.events_delivered.load(std::sync::atomic::Ordering::Relaxed),
        "events_dropped": state.engine.stats.events_dropped.load(std::sync::atomic::Ordering::Relaxed),
        "lifecycle_deleted": state.engine.stats.lifecycle_deleted.load(std::sync::atomic::Ordering::Relaxed),
    }))
    .into_response()
}

async fn list_audit_logs(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(resp) = require_admin(&claims) {
        return resp;
    }
    let limit = params
        .get("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(100)
        .min(1000);
    match state.engine.list_audit(None, limit) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => domain_error(&e),
    }
}

// ── Cluster ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct InitializeClusterRequest {
    name: String,
}

async fn cluster_initialize(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<InitializeClusterRequest>,
) -> Response {
    if let Err(resp) = require_global_admin(&claims) {
        return resp;
    }
    let advertise = if state.config.cluster.advertise_url.is_empty() {
        format!("http://{}", state.config.s3.listen)
    } else {
        state.config.cluster.advertise_url.clone()
    };
    let console_url = format!("http://{}", state.config.console.listen);
    match state.cluster.initialize(&req.name, &advertise, &console_url) {
        Ok(node) => {
            let token = state.cluster.node_token().ok().flatten();
            Json(json!({ "node": node, "node_token": token })).into_response()
        }
        Err(e) => domain_error(&e),
    }
}

#[derive(Deserialize)]
struct AddNodeRequest {
    name: String,
    url: String,
    console_url: String,
}

async fn cluster_add_node(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<AddNodeRequest>,
) -> Response {
    if let Err(resp) = require_global_admin(&claims) {
        return resp;
    }
    match state.cluster.add_node(&req.name, &req.url, &req.console_url) {
        Ok(node) => (StatusCode::CREATED, Json(node)).into_response(),
        Err(e) => domain_error(&e),
    }
}

async fn cluster_nodes(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
) -> Response {
    if let Err(resp) = require_admin(&claims) {
        return resp;
    }
    match state.cluster.list_nodes() {
        Ok(nodes) => Json(nodes).into_response(),
        Err(e) => domain_error(&e),
    }
}

async fn cluster_remove_node(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_global_admin(&claims) {
        return resp;
    }
    match state.cluster.remove_node(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => domain_error(&e),
    }
}

async fn cluster_health(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
) -> Response {
    if let Err(resp) = require_admin(&claims) {
        return resp;
    }
    match state.cluster.list_nodes() {
        Ok(nodes) => {
            let views: Vec<_> = nodes
                .iter()
                .map(|n| {
                    json!({
                        "id": n.id,
                        "name": n.name,
                        "status": n.status,
                        "consecutive_failures": n.consecutive_failures,
                        "last_seen": n.last_seen,
                    })
                })
                .collect();
            Json(views).into_response()
        }
        Err(e) => domain_error(&e),
    }
}

async fn cluster_bucket_locations(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
) -> Response {
    if let Err(resp) = require_admin(&claims) {
        return resp;
    }
    match state.cluster.bucket_locations() {
        Ok(locations) => Json(
            locations
                .into_iter()
                .map(|(bucket, node)| json!({ "bucket": bucket, "node_id": node }))
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => domain_error(&e),
    }
}

#[derive(Deserialize)]
struct SetLocationRequest {
    bucket: String,
    node_id: String,
}

async fn cluster_set_location(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<SetLocationRequest>,
) -> Response {
    if let Err(resp) = require_global_admin(&claims) {
        return resp;
    }
    match state.cluster.set_bucket_location(&req.bucket, &req.node_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => domain_error(&e),
    }
}

// ── Replication rules ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateReplicationRuleRequest {
    source_bucket: String,
    destination: DestinationRequest,
    #[serde(default = "default_sync_interval")]
    sync_interval_secs: u64,
    #[serde(default)]
    replicate_deletes: bool,
}

fn default_sync_interval() -> u64 {
    60
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum DestinationRequest {
    Node {
        node_id: String,
        bucket: String,
    },
    External {
        endpoint: String,
        region: String,
        bucket: String,
        access_key_id: String,
        secret_access_key: String,
    },
}

async fn list_replication_rules(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
) -> Response {
    if let Err(resp) = require_admin(&claims) {
        return resp;
    }
    match state.engine.replication_rules() {
        Ok(rules) => Json(rules).into_response(),
        Err(e) => domain_error(&e),
    }
}

async fn create_replication_rule(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<CreateReplicationRuleRequest>,
) -> Response {
    if let Err(resp) = require_global_admin(&claims) {
        return resp;
    }

    let destination = match req.destination {
        DestinationRequest::Node { node_id, bucket } => {
            ReplicationDestination::Node { node_id, bucket }
        }
        DestinationRequest::External {
            endpoint,
            region,
            bucket,
            access_key_id,
            secret_access_key,
        } => {
            let sealed = match state.engine.seal_rule_secret(&secret_access_key) {
                Ok(s) => s,
                Err(e) => return domain_error(&e),
            };
            ReplicationDestination::External {
                endpoint,
                region,
                bucket,
                access_key_id,
                secret_sealed: sealed,
            }
        }
    };

    let rule = ReplicationRule {
        id: uuid::Uuid::new_v4().to_string(),
        enabled: true,
        source_bucket: req.source_bucket,
        destination,
        sync_interval_secs: req.sync_interval_secs,
        replicate_deletes: req.replicate_deletes,
        created_at: maxiofs_common::now_secs(),
    };
    match state.engine.put_replication_rule(&rule) {
        Ok(()) => (StatusCode::CREATED, Json(rule)).into_response(),
        Err(e) => domain_error(&e),
    }
}

async fn delete_replication_rule(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<SessionClaims>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_global_admin(&claims) {
        return resp;
    }
    match state.engine.delete_replication_rule(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => domain_error(&e),
    }
}

// ── Internal (HMAC-signed) ───────────────────────────────────────────────────

/// Replication ingest from a peer node: stream the body straight into
/// the local object engine.
async fn internal_replicate_put(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let (Some(bucket_name), Some(key)) = (params.get("bucket"), params.get("key")) else {
        return json_error(StatusCode::BAD_REQUEST, "bucket and key are required");
    };
    let bucket = match state.engine.resolve_bucket(bucket_name) {
        Ok(b) => b,
        Err(e) => return domain_error(&e),
    };
    let object_key = match ObjectKey::new(key.clone()) {
        Ok(k) => k,
        Err(e) => {
            let e: Error = e.into();
            return domain_error(&e);
        }
    };

    let input = PutObjectInput {
        content_type: headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string(),
        user_metadata: HashMap::new(),
        content_md5: None,
        storage_class: "STANDARD".to_string(),
        acl: bucket.acl.clone(),
        quota_max_bytes: 0,
    };
    let stream: maxiofs_blob::ByteStream = Box::pin(
        body.into_data_stream()
            .map(|chunk| chunk.map_err(|e| Error::Storage(format!("replica body: {e}")))),
    );

    match state.engine.put_object(&bucket, &object_key, stream, input).await {
        Ok(out) => Json(json!({ "etag": out.etag, "version_id": out.version_id })).into_response(),
        Err(e) => domain_error(&e),
    }
}

async fn internal_replicate_delete(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let (Some(bucket_name), Some(key)) = (params.get("bucket"), params.get("key")) else {
        return json_error(StatusCode::BAD_REQUEST, "bucket and key are required");
    };
    let bucket = match state.engine.resolve_bucket(bucket_name) {
        Ok(b) => b,
        Err(e) => return domain_error(&e),
    };
    match state.engine.delete_object(&bucket, key, None, false).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => domain_error(&e),
    }
}

/// Cluster sync payload: membership plus identity records, so a
/// forwarded S3 request can be signature-checked on any node. Access
/// key secrets stay sealed; every node must share the same master key.
#[derive(Deserialize)]
struct SyncPayload {
    #[serde(default)]
    nodes: Vec<maxiofs_cluster::NodeRecord>,
    #[serde(default)]
    tenants: Vec<maxiofs_auth::Tenant>,
    #[serde(default)]
    users: Vec<maxiofs_auth::User>,
    #[serde(default)]
    access_keys: Vec<maxiofs_auth::AccessKey>,
}

/// Membership and identity sync pushed from a peer.
async fn internal_sync(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SyncPayload>,
) -> Response {
    let mut accepted = 0usize;
    for node in &payload.nodes {
        if let Err(e) = state.cluster.put_node(node) {
            return domain_error(&e);
        }
        accepted += 1;
    }
    for tenant in &payload.tenants {
        if let Err(e) = state.identity.import_tenant(tenant) {
            return auth_error(e);
        }
        accepted += 1;
    }
    for user in &payload.users {
        if let Err(e) = state.identity.import_user(user) {
            return auth_error(e);
        }
        accepted += 1;
    }
    for key in &payload.access_keys {
        if let Err(e) = state.identity.import_access_key(key) {
            return auth_error(e);
        }
        accepted += 1;
    }
    Json(json!({ "accepted": accepted })).into_response()
}
