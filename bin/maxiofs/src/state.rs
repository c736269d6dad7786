//! Shared application state for both listeners.

use std::sync::Arc;

use maxiofs_auth::sigv4::SigV4Verifier;
use maxiofs_auth::{IdentityStore, LoginThrottle, SessionManager};
use maxiofs_cluster::ClusterRouter;
use maxiofs_common::Config;
use maxiofs_engine::Engine;

/// State shared by every handler on both the S3 and console listeners.
pub struct AppState {
    pub config: Config,
    pub engine: Arc<Engine>,
    pub identity: Arc<IdentityStore>,
    pub cluster: Arc<ClusterRouter>,
    pub sessions: Arc<SessionManager>,
    pub throttle: Arc<LoginThrottle>,
    pub sigv4: SigV4Verifier,
    /// Outbound client for forwarded S3 requests
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: Config,
        engine: Arc<Engine>,
        identity: Arc<IdentityStore>,
        cluster: Arc<ClusterRouter>,
        sessions: Arc<SessionManager>,
    ) -> Arc<Self> {
        let region = config.s3.region.clone();
        Arc::new(Self {
            config,
            engine,
            identity,
            cluster,
            sessions,
            throttle: Arc::new(LoginThrottle::new()),
            sigv4: SigV4Verifier::new(region),
            http: reqwest::Client::new(),
        })
    }
}
