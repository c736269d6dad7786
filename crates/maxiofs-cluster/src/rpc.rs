//! Inter-node RPC authentication.
//!
//! Internal calls are signed `HMAC-SHA256(nodeToken,
//! method\npath\nbodySha256\ntimestamp)` with a five-minute replay
//! window. The four values travel in `x-maxiofs-*` headers; the
//! receiving node recomputes and compares in constant time.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use maxiofs_common::{now_secs, Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Accepted clock drift / replay window for signed RPCs
pub const REPLAY_WINDOW_SECS: u64 = 300;

/// Header names for the signed RPC material
pub const HDR_NODE_ID: &str = "x-maxiofs-node-id";
pub const HDR_TIMESTAMP: &str = "x-maxiofs-timestamp";
pub const HDR_BODY_SHA256: &str = "x-maxiofs-body-sha256";
pub const HDR_SIGNATURE: &str = "x-maxiofs-signature";

/// The computed signature material for one RPC
#[derive(Debug, Clone)]
pub struct RpcSignature {
    pub timestamp: u64,
    pub body_sha256: String,
    pub signature: String,
}

/// Sign an outbound internal RPC.
#[must_use]
pub fn sign_rpc(token: &str, method: &str, path: &str, body: &[u8]) -> RpcSignature {
    let timestamp = now_secs();
    let body_sha256 = hex::encode(Sha256::digest(body));
    let signature = compute(token, method, path, &body_sha256, timestamp);
    RpcSignature {
        timestamp,
        body_sha256,
        signature,
    }
}

/// Sign with a precomputed body hash (streaming bodies).
#[must_use]
pub fn sign_rpc_hashed(token: &str, method: &str, path: &str, body_sha256: &str) -> RpcSignature {
    let timestamp = now_secs();
    let signature = compute(token, method, path, body_sha256, timestamp);
    RpcSignature {
        timestamp,
        body_sha256: body_sha256.to_string(),
        signature,
    }
}

/// Verify an inbound internal RPC.
pub fn verify_rpc(
    token: &str,
    method: &str,
    path: &str,
    body_sha256: &str,
    timestamp: u64,
    signature: &str,
) -> Result<()> {
    let now = now_secs();
    if now.abs_diff(timestamp) > REPLAY_WINDOW_SECS {
        return Err(Error::RequestTimeTooSkewed);
    }
    let expected = compute(token, method, path, body_sha256, timestamp);
    if !constant_time_eq(&expected, signature) {
        return Err(Error::SignatureDoesNotMatch);
    }
    Ok(())
}

fn compute(token: &str, method: &str, path: &str, body_sha256: &str, timestamp: u64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(token.as_bytes()).expect("HMAC can take key of any size");
    mac.update(format!("{method}\n{path}\n{body_sha256}\n{timestamp}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let sig = sign_rpc("token", "POST", "/internal/replicate", b"payload");
        verify_rpc(
            "token",
            "POST",
            "/internal/replicate",
            &sig.body_sha256,
            sig.timestamp,
            &sig.signature,
        )
        .unwrap();
    }

    #[test]
    fn test_wrong_token_rejected() {
        let sig = sign_rpc("token", "POST", "/p", b"x");
        assert!(matches!(
            verify_rpc("other", "POST", "/p", &sig.body_sha256, sig.timestamp, &sig.signature),
            Err(Error::SignatureDoesNotMatch)
        ));
    }

    #[test]
    fn test_tampered_path_rejected() {
        let sig = sign_rpc("token", "POST", "/p", b"x");
        assert!(verify_rpc(
            "token",
            "POST",
            "/other",
            &sig.body_sha256,
            sig.timestamp,
            &sig.signature
        )
        .is_err());
    }

    #[test]
    fn test_replay_window() {
        let sig = sign_rpc("token", "GET", "/p", b"");
        let stale = sig.timestamp - REPLAY_WINDOW_SECS - 1;
        let stale_sig = {
            // Re-sign at the stale timestamp so only the window check fails
            let body_sha = hex::encode(Sha256::digest(b""));
            compute("token", "GET", "/p", &body_sha, stale)
        };
        assert!(matches!(
            verify_rpc("token", "GET", "/p", &sig.body_sha256, stale, &stale_sig),
            Err(Error::RequestTimeTooSkewed)
        ));
    }
}
