//! AWS SigV4 presigned URL generation
//!
//! Generates pre-signed GET/PUT URLs for the S3 endpoint. The generated
//! URLs are verified by the same SigV4 query-string path as any other
//! presigned request.
//!
//! Reference: https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-query-string-auth.html

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::sigv4::{derive_signing_key, hmac_sha256, url_encode};

/// Generate a presigned S3 URL for `method` (GET or PUT).
///
/// # Arguments
/// - `endpoint` — base URL of the S3 listener (e.g. `http://localhost:8080`)
/// - `region` — region string used in the credential scope
/// - `access_key_id` / `secret_access_key` — signing credentials
/// - `bucket` / `key` — target object
/// - `expires_in` — URL validity window (capped at 7 days by the verifier)
///
/// The returned URL can be used with a plain HTTP request and no
/// additional headers.
pub fn presign_url(
    method: &str,
    endpoint: &str,
    region: &str,
    access_key_id: &str,
    secret_access_key: &str,
    bucket: &str,
    key: &str,
    expires_in: Duration,
) -> String {
    let now = Utc::now();
    let date_str = now.format("%Y%m%d").to_string();
    let datetime_str = now.format("%Y%m%dT%H%M%SZ").to_string();
    let expires_secs = expires_in.as_secs();

    let service = "s3";
    let credential_scope = format!("{date_str}/{region}/{service}/aws4_request");
    let credential = format!("{access_key_id}/{credential_scope}");

    // The host header value (stripped of scheme)
    let host = endpoint
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');

    // Canonical query string (parameters must be sorted)
    let canonical_qs = format!(
        "X-Amz-Algorithm=AWS4-HMAC-SHA256\
         &X-Amz-Credential={cred}\
         &X-Amz-Date={dt}\
         &X-Amz-Expires={exp}\
         &X-Amz-SignedHeaders=host",
        cred = url_encode(&credential),
        dt = datetime_str,
        exp = expires_secs,
    );

    // Canonical URI: /{bucket}/{key} (each segment percent-encoded except '/')
    let canonical_uri = format!(
        "/{}/{}",
        url_encode(bucket),
        key.split('/').map(url_encode).collect::<Vec<_>>().join("/")
    );

    let canonical_headers = format!("host:{host}\n");
    let signed_headers = "host";

    // Canonical request (payload is UNSIGNED for presigned requests)
    let canonical_request = format!(
        "{method}\n{uri}\n{qs}\n{headers}\n{signed_hdr}\nUNSIGNED-PAYLOAD",
        uri = canonical_uri,
        qs = canonical_qs,
        headers = canonical_headers,
        signed_hdr = signed_headers,
    );

    // String to sign
    let cr_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{dt}\n{scope}\n{hash}",
        dt = datetime_str,
        scope = credential_scope,
        hash = cr_hash,
    );

    let signing_key = derive_signing_key(secret_access_key, &date_str, region, service);
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    format!(
        "{endpoint}{uri}?{qs}&X-Amz-Signature={sig}",
        endpoint = endpoint.trim_end_matches('/'),
        uri = canonical_uri,
        qs = canonical_qs,
        sig = signature,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sigv4::{parse_request, ParsedAuth, SigV4Verifier};

    #[test]
    fn test_presign_produces_valid_url() {
        let url = presign_url(
            "GET",
            "http://localhost:8080",
            "us-east-1",
            "MXIOKEY",
            "secret",
            "my-bucket",
            "path/to/file.bin",
            Duration::from_secs(3600),
        );
        assert!(url.starts_with("http://localhost:8080/my-bucket/path/to/file.bin"));
        assert!(url.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(url.contains("X-Amz-Signature="));
        assert!(url.contains("X-Amz-Expires=3600"));
    }

    #[test]
    fn test_presigned_url_verifies() {
        let url = presign_url(
            "PUT",
            "http://localhost:8080",
            "us-east-1",
            "MXIOKEY",
            "topsecret",
            "b",
            "hello.txt",
            Duration::from_secs(60),
        );

        // Reconstruct the request a client would send
        let path_and_query = url.strip_prefix("http://localhost:8080").unwrap();
        let req = http::Request::builder()
            .method("PUT")
            .uri(path_and_query)
            .header("host", "localhost:8080")
            .body(())
            .unwrap();
        let (parts, ()) = req.into_parts();

        let parsed = parse_request(&parts).unwrap();
        let ParsedAuth::V4Presigned {
            signed_headers,
            signature,
            amz_date,
            expires,
            ..
        } = parsed
        else {
            panic!("expected presigned parse");
        };

        let verifier = SigV4Verifier::new("us-east-1");
        verifier
            .verify_presigned(&parts, &signed_headers, &signature, &amz_date, expires, "topsecret")
            .unwrap();

        // Wrong secret fails
        assert!(verifier
            .verify_presigned(&parts, &signed_headers, &signature, &amz_date, expires, "other")
            .is_err());
    }
}
