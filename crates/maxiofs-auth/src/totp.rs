//! Time-based one-time passwords (RFC 6238) for console 2FA.
//!
//! SHA-1 HMAC, 6 digits, 30-second step, one step of skew in either
//! direction.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

const STEP_SECS: u64 = 30;
const DIGITS: u32 = 6;

const BASE32_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Generate a new random TOTP secret, base32-encoded for authenticator
/// app enrollment.
#[must_use]
pub fn generate_secret() -> String {
    let mut raw = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut raw);
    base32_encode(&raw)
}

/// Verify a submitted code against the secret at time `now` (epoch
/// seconds), accepting the previous and next step.
#[must_use]
pub fn verify_code(secret_b32: &str, code: &str, now: u64) -> bool {
    let Some(secret) = base32_decode(secret_b32) else {
        return false;
    };
    let counter = now / STEP_SECS;
    for c in [counter.wrapping_sub(1), counter, counter + 1] {
        if hotp(&secret, c) == code {
            return true;
        }
    }
    false
}

/// Current code for a secret; used by the enrollment verify step.
#[must_use]
pub fn current_code(secret_b32: &str, now: u64) -> Option<String> {
    let secret = base32_decode(secret_b32)?;
    Some(hotp(&secret, now / STEP_SECS))
}

fn hotp(secret: &[u8], counter: u64) -> String {
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[19] & 0x0f) as usize;
    let code = ((u32::from(digest[offset]) & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);
    format!("{:06}", code % 10u32.pow(DIGITS))
}

fn base32_encode(data: &[u8]) -> String {
    let mut out = String::new();
    let mut buffer = 0u64;
    let mut bits = 0u32;
    for &byte in data {
        buffer = (buffer << 8) | u64::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let idx = ((buffer >> bits) & 0x1f) as usize;
            out.push(BASE32_ALPHABET[idx] as char);
        }
    }
    if bits > 0 {
        let idx = ((buffer << (5 - bits)) & 0x1f) as usize;
        out.push(BASE32_ALPHABET[idx] as char);
    }
    out
}

fn base32_decode(s: &str) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let mut buffer = 0u64;
    let mut bits = 0u32;
    for c in s.bytes() {
        if c == b'=' {
            continue;
        }
        let val = BASE32_ALPHABET
            .iter()
            .position(|&a| a == c.to_ascii_uppercase())? as u64;
        buffer = (buffer << 5) | val;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base32_roundtrip() {
        let data = b"12345678901234567890";
        let encoded = base32_encode(data);
        assert_eq!(base32_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_rfc6238_vector() {
        // RFC 6238 test secret "12345678901234567890", T = 59 -> 94287082
        let secret = base32_encode(b"12345678901234567890");
        let code = current_code(&secret, 59).unwrap();
        assert_eq!(code, "287082");
    }

    #[test]
    fn test_verify_accepts_adjacent_step() {
        let secret = generate_secret();
        let now = 1_700_000_000;
        let code = current_code(&secret, now).unwrap();
        assert!(verify_code(&secret, &code, now));
        assert!(verify_code(&secret, &code, now + STEP_SECS));
        assert!(!verify_code(&secret, &code, now + 3 * STEP_SECS));
    }

    #[test]
    fn test_bad_secret_rejected() {
        assert!(!verify_code("!!notbase32!!", "123456", 0));
    }
}
