//! Authentication middleware for the S3 listener.
//!
//! Supports SigV4 (header and presigned query forms) and legacy SigV2.
//! Requests with no credentials at all pass through as anonymous; the
//! per-operation authorization decides whether anonymous access is
//! allowed (public ACLs / policies).

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

use crate::state::AppState;
use maxiofs_auth::sigv4::{parse_request, ParsedAuth};
use maxiofs_auth::{sigv2, Actor, AuthError, AuthResult};
use maxiofs_common::Error;
use maxiofs_s3::error_response;

/// Authentication outcome attached to every request.
#[derive(Clone)]
pub struct AuthContext {
    /// `None` for anonymous requests
    pub actor: Option<Actor>,
    /// Raw auth result, kept for audit logging
    pub auth: Option<AuthResult>,
}

/// S3 authentication middleware.
pub async fn auth_layer(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if path == "/health" || path == "/metrics" {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();

    let parsed = match parse_request(&parts) {
        Ok(parsed) => parsed,
        Err(AuthError::MissingAuthHeader) => {
            // Anonymous request; authorization decides later
            let mut request = Request::from_parts(parts, body);
            request.extensions_mut().insert(AuthContext {
                actor: None,
                auth: None,
            });
            return next.run(request).await;
        }
        Err(e) => return auth_failure(e, parts.uri.path()),
    };

    let (key, user, secret) = match state.identity.resolve_access_key(parsed.access_key_id()) {
        Ok(found) => found,
        Err(e) => {
            debug!(access_key = parsed.access_key_id(), error = %e, "credential lookup failed");
            return auth_failure(e, parts.uri.path());
        }
    };

    let verification = match &parsed {
        ParsedAuth::V4Header {
            signed_headers,
            signature,
            ..
        } => state
            .sigv4
            .verify_header(&parts, signed_headers, signature, &secret),
        ParsedAuth::V4Presigned {
            signed_headers,
            signature,
            amz_date,
            expires,
            ..
        } => state.sigv4.verify_presigned(
            &parts,
            signed_headers,
            signature,
            amz_date,
            *expires,
            &secret,
        ),
        ParsedAuth::V2Header { signature, .. } => sigv2::verify(&parts, signature, &secret),
    };

    if let Err(e) = verification {
        debug!(access_key = %key.access_key_id, error = %e, "signature verification failed");
        return auth_failure(e, parts.uri.path());
    }

    debug!(user = %user.username, access_key = %key.access_key_id, "request authenticated");

    let actor = Actor {
        user_id: user.id.clone(),
        arn: user.arn(),
        tenant_id: user.tenant_id.clone(),
        roles: user.roles.clone(),
    };
    let auth = AuthResult {
        user_id: user.id,
        user_arn: actor.arn.clone(),
        tenant_id: actor.tenant_id.clone(),
        roles: actor.roles.clone(),
        access_key_id: key.access_key_id,
    };

    let mut request = Request::from_parts(parts, body);
    request.extensions_mut().insert(AuthContext {
        actor: Some(actor),
        auth: Some(auth),
    });
    next.run(request).await
}

fn auth_failure(e: AuthError, resource: &str) -> Response {
    let err: Error = e.into();
    error_response(&err, Some(resource))
}
