//! MaxIOFS cluster layer
//!
//! Bucket→node placement, health-aware routing, HMAC-authenticated
//! inter-node RPC, and raw request forwarding to the owning node.

pub mod forward;
pub mod health;
pub mod router;
pub mod rpc;
pub mod shipper;

pub use health::HealthChecker;
pub use router::{ClusterRouter, NodeRecord, NodeStatus};
pub use rpc::{sign_rpc, verify_rpc, RpcSignature, REPLAY_WINDOW_SECS};
pub use shipper::ClusterShipper;
