//! AWS Signature V4 verification
//!
//! Implements AWS Signature Version 4 for authenticating S3 API
//! requests, in both the Authorization-header form and the query-string
//! (presigned URL) form.
//! Reference: https://docs.aws.amazon.com/AmazonS3/latest/API/sig-v4-authenticating-requests.html

use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use http::request::Parts;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Maximum presigned URL lifetime (7 days)
pub const MAX_PRESIGN_EXPIRES: u64 = 604_800;

/// Clock skew tolerance for signed requests
const MAX_SKEW_MINUTES: i64 = 15;

/// Parsed authentication material from a request
#[derive(Debug)]
pub enum ParsedAuth {
    /// SigV4 via the Authorization header
    V4Header {
        access_key_id: String,
        signed_headers: Vec<String>,
        signature: String,
    },
    /// SigV4 via query parameters (presigned URL)
    V4Presigned {
        access_key_id: String,
        signed_headers: Vec<String>,
        signature: String,
        /// `X-Amz-Date` value (ISO8601 basic)
        amz_date: String,
        /// `X-Amz-Expires` in seconds
        expires: u64,
    },
    /// Legacy SigV2 via the Authorization header
    V2Header {
        access_key_id: String,
        signature: String,
    },
}

impl ParsedAuth {
    pub fn access_key_id(&self) -> &str {
        match self {
            Self::V4Header { access_key_id, .. }
            | Self::V4Presigned { access_key_id, .. }
            | Self::V2Header { access_key_id, .. } => access_key_id,
        }
    }
}

/// Extract authentication material from a request. Presigned query
/// parameters win over the Authorization header.
pub fn parse_request(parts: &Parts) -> Result<ParsedAuth, AuthError> {
    let query_params = parse_query(parts.uri.query().unwrap_or(""));

    if query_params
        .get("X-Amz-Algorithm")
        .is_some_and(|v| v == "AWS4-HMAC-SHA256")
    {
        let credential = query_params
            .get("X-Amz-Credential")
            .ok_or(AuthError::InvalidCredentialFormat)?;
        let access_key_id = credential
            .split('/')
            .next()
            .ok_or(AuthError::InvalidCredentialFormat)?
            .to_string();
        let signature = query_params
            .get("X-Amz-Signature")
            .ok_or(AuthError::InvalidAuthHeader)?
            .clone();
        let amz_date = query_params
            .get("X-Amz-Date")
            .ok_or(AuthError::MissingDateHeader)?
            .clone();
        let expires = query_params
            .get("X-Amz-Expires")
            .ok_or(AuthError::InvalidAuthHeader)?
            .parse::<u64>()
            .map_err(|_| AuthError::InvalidAuthHeader)?;
        let signed_headers = query_params
            .get("X-Amz-SignedHeaders")
            .map(|s| s.split(';').map(|h| h.to_lowercase()).collect())
            .unwrap_or_else(|| vec!["host".to_string()]);

        return Ok(ParsedAuth::V4Presigned {
            access_key_id,
            signed_headers,
            signature,
            amz_date,
            expires,
        });
    }

    let header = parts
        .headers
        .get("authorization")
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    if header.starts_with("AWS4-HMAC-SHA256") {
        let re = Regex::new(
            r"AWS4-HMAC-SHA256\s+Credential=([^/]+)/[^,]+,\s*SignedHeaders=([^,]+),\s*Signature=(\w+)",
        )
        .unwrap();
        let captures = re.captures(header).ok_or(AuthError::InvalidAuthHeader)?;
        Ok(ParsedAuth::V4Header {
            access_key_id: captures.get(1).unwrap().as_str().to_string(),
            signed_headers: captures
                .get(2)
                .unwrap()
                .as_str()
                .split(';')
                .map(|s| s.to_lowercase())
                .collect(),
            signature: captures.get(3).unwrap().as_str().to_string(),
        })
    } else if let Some(credentials) = header.strip_prefix("AWS ") {
        let parts: Vec<&str> = credentials.splitn(2, ':').collect();
        if parts.len() != 2 {
            return Err(AuthError::InvalidAuthHeader);
        }
        Ok(ParsedAuth::V2Header {
            access_key_id: parts[0].to_string(),
            signature: parts[1].to_string(),
        })
    } else {
        Err(AuthError::InvalidSignatureVersion)
    }
}

/// AWS Signature V4 verifier
pub struct SigV4Verifier {
    service: String,
    region: String,
}

impl SigV4Verifier {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            service: "s3".to_string(),
            region: region.into(),
        }
    }

    /// Verify the Authorization-header form.
    pub fn verify_header(
        &self,
        parts: &Parts,
        signed_headers: &[String],
        signature: &str,
        secret_key: &str,
    ) -> Result<(), AuthError> {
        let date_str = get_request_date(parts)?;
        let date = parse_amz_date(&date_str)?;

        let now = Utc::now();
        if now.signed_duration_since(date).num_minutes().abs() > MAX_SKEW_MINUTES {
            return Err(AuthError::RequestExpired);
        }

        let payload_hash = parts
            .headers
            .get("x-amz-content-sha256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("UNSIGNED-PAYLOAD")
            .to_string();

        let canonical_request =
            build_canonical_request(parts, signed_headers, &payload_hash, false)?;

        let date_stamp = date.format("%Y%m%d").to_string();
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let string_to_sign = build_string_to_sign(&canonical_request, &date_str, &credential_scope);

        let signing_key =
            derive_signing_key(secret_key, &date_stamp, &self.region, &self.service);
        let calculated = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        if !constant_time_eq(&calculated, signature) {
            tracing::debug!(
                "SigV4 mismatch:\n  Canonical Request:\n{}\n  String to Sign:\n{}\n  Calculated: {}\n  Provided: {}",
                canonical_request,
                string_to_sign,
                calculated,
                signature
            );
            return Err(AuthError::SignatureMismatch);
        }
        Ok(())
    }

    /// Verify the presigned query-string form.
    pub fn verify_presigned(
        &self,
        parts: &Parts,
        signed_headers: &[String],
        signature: &str,
        amz_date: &str,
        expires: u64,
        secret_key: &str,
    ) -> Result<(), AuthError> {
        if expires > MAX_PRESIGN_EXPIRES {
            return Err(AuthError::ExpiresTooLarge);
        }

        let signing_time = parse_amz_date(amz_date)?;
        let now = Utc::now();

        // Not yet valid (beyond skew) or already expired
        if signing_time.signed_duration_since(now).num_minutes() > MAX_SKEW_MINUTES {
            return Err(AuthError::RequestExpired);
        }
        if now > signing_time + chrono::Duration::seconds(expires as i64) {
            return Err(AuthError::RequestExpired);
        }

        let canonical_request =
            build_canonical_request(parts, signed_headers, "UNSIGNED-PAYLOAD", true)?;

        let date_stamp = signing_time.format("%Y%m%d").to_string();
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let string_to_sign = build_string_to_sign(&canonical_request, amz_date, &credential_scope);

        let signing_key =
            derive_signing_key(secret_key, &date_stamp, &self.region, &self.service);
        let calculated = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        if !constant_time_eq(&calculated, signature) {
            tracing::debug!(
                "Presigned SigV4 mismatch:\n  Canonical Request:\n{}\n  Calculated: {}\n  Provided: {}",
                canonical_request,
                calculated,
                signature
            );
            return Err(AuthError::SignatureMismatch);
        }
        Ok(())
    }
}

/// Get the request date from headers
fn get_request_date(parts: &Parts) -> Result<String, AuthError> {
    if let Some(date) = parts.headers.get("x-amz-date") {
        return date
            .to_str()
            .map(|s| s.to_string())
            .map_err(|_| AuthError::InvalidDateFormat);
    }
    if let Some(date) = parts.headers.get("date") {
        return date
            .to_str()
            .map(|s| s.to_string())
            .map_err(|_| AuthError::InvalidDateFormat);
    }
    Err(AuthError::MissingDateHeader)
}

/// Parse ISO8601 basic format (20130524T000000Z)
fn parse_amz_date(date_str: &str) -> Result<DateTime<Utc>, AuthError> {
    NaiveDateTime::parse_from_str(date_str, "%Y%m%dT%H%M%SZ")
        .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        .map_err(|_| AuthError::InvalidDateFormat)
}

/// Build the canonical request string. For the presigned form the
/// `X-Amz-Signature` parameter is excluded from the canonical query.
fn build_canonical_request(
    parts: &Parts,
    signed_headers: &[String],
    payload_hash: &str,
    presigned: bool,
) -> Result<String, AuthError> {
    let method = parts.method.as_str();
    let path = parts.uri.path();
    let canonical_uri = if path.is_empty() { "/" } else { path };

    let canonical_query =
        build_canonical_query_string(parts.uri.query().unwrap_or(""), presigned);

    let mut headers_map: BTreeMap<String, String> = BTreeMap::new();
    for header_name in signed_headers {
        let value = parts
            .headers
            .get(header_name.as_str())
            .ok_or_else(|| AuthError::MissingSignedHeader(header_name.clone()))?
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?
            .trim()
            .to_string();
        headers_map.insert(header_name.clone(), value);
    }

    let canonical_headers: String = headers_map
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect();

    let mut sorted_signed = signed_headers.to_vec();
    sorted_signed.sort();
    let signed_headers_str = sorted_signed.join(";");

    Ok(format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers_str}\n{payload_hash}"
    ))
}

/// Build canonical query string (decoded, re-encoded AWS-style, sorted)
fn build_canonical_query_string(query: &str, exclude_signature: bool) -> String {
    if query.is_empty() {
        return String::new();
    }

    let mut params: Vec<(String, String)> = query
        .split('&')
        .filter_map(|param| {
            let mut parts = param.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            let decoded_key = url_decode(key);
            if exclude_signature && decoded_key == "X-Amz-Signature" {
                return None;
            }
            let decoded_value = url_decode(value);
            Some((url_encode(&decoded_key), url_encode(&decoded_value)))
        })
        .collect();

    params.sort();

    params
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build the string to sign
fn build_string_to_sign(canonical_request: &str, date_str: &str, credential_scope: &str) -> String {
    let canonical_request_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("AWS4-HMAC-SHA256\n{date_str}\n{credential_scope}\n{canonical_request_hash}")
}

/// Derive the SigV4 signing key
pub(crate) fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Vec<u8> {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Calculate HMAC-SHA256
pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Split a raw query string into decoded key/value pairs
fn parse_query(query: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for param in query.split('&') {
        if param.is_empty() {
            continue;
        }
        let mut parts = param.splitn(2, '=');
        let key = url_decode(parts.next().unwrap_or(""));
        let value = url_decode(parts.next().unwrap_or(""));
        out.insert(key, value);
    }
    out
}

/// URL encode a string (AWS style: unreserved characters pass through)
pub(crate) fn url_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(b as char);
            }
            _ => {
                result.push_str(&format!("%{b:02X}"));
            }
        }
    }
    result
}

/// URL decode a string
pub(crate) fn url_decode(s: &str) -> String {
    let mut result = Vec::new();
    let mut bytes = s.bytes().peekable();

    while let Some(b) = bytes.next() {
        if b == b'%' {
            let hi = bytes.next();
            let lo = bytes.next();
            if let (Some(hi), Some(lo)) = (hi, lo) {
                if let Ok(byte) = u8::from_str_radix(&format!("{}{}", hi as char, lo as char), 16) {
                    result.push(byte);
                    continue;
                }
            }
            result.push(b'%');
            if let Some(hi) = hi {
                result.push(hi);
            }
            if let Some(lo) = lo {
                result.push(lo);
            }
        } else if b == b'+' {
            result.push(b' ');
        } else {
            result.push(b);
        }
    }
    String::from_utf8_lossy(&result).to_string()
}

/// Constant-time string comparison to prevent timing attacks
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
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
    fn test_url_encode() {
        assert_eq!(url_encode("hello"), "hello");
        assert_eq!(url_encode("hello world"), "hello%20world");
        assert_eq!(url_encode("a/b"), "a%2Fb");
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("hello%20world"), "hello world");
        assert_eq!(url_decode("a%2Fb"), "a/b");
        assert_eq!(url_decode("plain"), "plain");
    }

    #[test]
    fn test_derive_signing_key_known_vector() {
        // AWS documentation example key derivation
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20150830",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn test_parse_header_auth() {
        let req = http::Request::builder()
            .uri("/bucket/key")
            .header(
                "authorization",
                "AWS4-HMAC-SHA256 Credential=MXIOKEY/20260101/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-date, Signature=abc123",
            )
            .body(())
            .unwrap();
        let (parts, ()) = req.into_parts();
        let parsed = parse_request(&parts).unwrap();
        match parsed {
            ParsedAuth::V4Header {
                access_key_id,
                signed_headers,
                signature,
            } => {
                assert_eq!(access_key_id, "MXIOKEY");
                assert_eq!(signed_headers, vec!["host", "x-amz-date"]);
                assert_eq!(signature, "abc123");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_presigned_query() {
        let req = http::Request::builder()
            .uri("/b/k?X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-Credential=MXIOKEY%2F20260101%2Fus-east-1%2Fs3%2Faws4_request&X-Amz-Date=20260101T000000Z&X-Amz-Expires=60&X-Amz-SignedHeaders=host&X-Amz-Signature=deadbeef")
            .body(())
            .unwrap();
        let (parts, ()) = req.into_parts();
        match parse_request(&parts).unwrap() {
            ParsedAuth::V4Presigned {
                access_key_id,
                expires,
                amz_date,
                ..
            } => {
                assert_eq!(access_key_id, "MXIOKEY");
                assert_eq!(expires, 60);
                assert_eq!(amz_date, "20260101T000000Z");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_v2_header() {
        let req = http::Request::builder()
            .uri("/b/k")
            .header("authorization", "AWS MXIOKEY:c2lnbmF0dXJl")
            .body(())
            .unwrap();
        let (parts, ()) = req.into_parts();
        assert!(matches!(
            parse_request(&parts).unwrap(),
            ParsedAuth::V2Header { .. }
        ));
    }

    #[test]
    fn test_header_verify_roundtrip() {
        // Sign a request using the same derivation the verifier uses,
        // then check the verifier accepts it.
        let secret = "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY";
        let region = "us-east-1";
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        let req = http::Request::builder()
            .method("GET")
            .uri("/bucket/key.txt?max-keys=10")
            .header("host", "localhost:8080")
            .header("x-amz-date", amz_date.clone())
            .body(())
            .unwrap();
        let (parts, ()) = req.into_parts();

        let signed_headers = vec!["host".to_string(), "x-amz-date".to_string()];
        let canonical =
            build_canonical_request(&parts, &signed_headers, "UNSIGNED-PAYLOAD", false).unwrap();
        let scope = format!("{date_stamp}/{region}/s3/aws4_request");
        let sts = build_string_to_sign(&canonical, &amz_date, &scope);
        let key = derive_signing_key(secret, &date_stamp, region, "s3");
        let signature = hex::encode(hmac_sha256(&key, sts.as_bytes()));

        let verifier = SigV4Verifier::new(region);
        verifier
            .verify_header(&parts, &signed_headers, &signature, secret)
            .unwrap();

        // Tampered signature must fail
        assert!(matches!(
            verifier.verify_header(&parts, &signed_headers, "0000", secret),
            Err(AuthError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_presigned_expires_cap() {
        let verifier = SigV4Verifier::new("us-east-1");
        let req = http::Request::builder()
            .uri("/b/k")
            .header("host", "h")
            .body(())
            .unwrap();
        let (parts, ()) = req.into_parts();
        let err = verifier
            .verify_presigned(
                &parts,
                &["host".to_string()],
                "sig",
                "20260101T000000Z",
                MAX_PRESIGN_EXPIRES + 1,
                "secret",
            )
            .unwrap_err();
        assert!(matches!(err, AuthError::ExpiresTooLarge));
    }
}
