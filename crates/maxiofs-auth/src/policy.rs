//! Bucket policy structures and evaluation
//!
//! Implements S3-compatible bucket policies with IAM-like semantics:
//! explicit Deny beats Allow, absence of a matching Allow is an
//! implicit deny.

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// A bucket policy document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BucketPolicy {
    /// Policy version (typically "2012-10-17")
    #[serde(default = "default_version")]
    pub version: String,
    /// Policy ID (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Policy statements
    #[serde(rename = "Statement")]
    pub statements: Vec<PolicyStatement>,
}

fn default_version() -> String {
    "2012-10-17".to_string()
}

impl Default for BucketPolicy {
    fn default() -> Self {
        Self {
            version: default_version(),
            id: None,
            statements: Vec::new(),
        }
    }
}

impl BucketPolicy {
    /// Parse a policy from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// True when any statement allows the wildcard principal
    #[must_use]
    pub fn grants_public_access(&self) -> bool {
        self.statements
            .iter()
            .any(|s| s.effect == Effect::Allow && matches!(s.principal, Principal::Wildcard))
    }
}

/// A policy statement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    /// Statement ID (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Effect: Allow or Deny
    pub effect: Effect,
    /// Principal: who this statement applies to
    pub principal: Principal,
    /// Actions this statement covers
    pub action: StringOrVec,
    /// Resources this statement covers
    pub resource: StringOrVec,
    /// Conditions for this statement (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Conditions>,
}

/// Policy effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// Principal specification
#[derive(Debug, Clone)]
pub enum Principal {
    /// Wildcard ("*") - applies to everyone
    Wildcard,
    /// Specific principals (user ARNs)
    Aws(Vec<String>),
}

impl Principal {
    /// Does this principal clause cover `arn`? Anonymous callers pass
    /// `None` and only match the wildcard.
    #[must_use]
    pub fn matches(&self, arn: Option<&str>) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Aws(arns) => match arn {
                Some(a) => arns.iter().any(|p| p == "*" || p == a),
                None => false,
            },
        }
    }
}

impl Serialize for Principal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Principal::Wildcard => serializer.serialize_str("*"),
            Principal::Aws(arns) => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("AWS", arns)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Principal {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PrincipalVisitor;

        impl<'de> Visitor<'de> for PrincipalVisitor {
            type Value = Principal;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("\"*\" or {\"AWS\": [...]}")
            }

            fn visit_str<E>(self, value: &str) -> Result<Principal, E>
            where
                E: de::Error,
            {
                if value == "*" {
                    Ok(Principal::Wildcard)
                } else {
                    Err(de::Error::custom(format!(
                        "invalid principal string: expected \"*\", got \"{value}\""
                    )))
                }
            }

            fn visit_map<M>(self, mut map: M) -> Result<Principal, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut principals: Option<Vec<String>> = None;

                while let Some(key) = map.next_key::<String>()? {
                    if key == "AWS" {
                        // AWS can be "*", a single string, or an array
                        let value: serde_json::Value = map.next_value()?;
                        match value {
                            serde_json::Value::String(s) if s == "*" => {
                                return Ok(Principal::Wildcard);
                            }
                            serde_json::Value::String(s) => {
                                principals = Some(vec![s]);
                            }
                            serde_json::Value::Array(arr) => {
                                let arns: Result<Vec<String>, _> = arr
                                    .into_iter()
                                    .map(|v| {
                                        v.as_str().map(|s| s.to_string()).ok_or_else(|| {
                                            de::Error::custom("expected string in AWS array")
                                        })
                                    })
                                    .collect();
                                principals = Some(arns?);
                            }
                            _ => {
                                return Err(de::Error::custom(
                                    "AWS must be \"*\", string, or array",
                                ));
                            }
                        }
                    } else {
                        let _: serde_json::Value = map.next_value()?;
                    }
                }

                principals
                    .map(Principal::Aws)
                    .ok_or_else(|| de::Error::custom("missing AWS key in principal"))
            }
        }

        deserializer.deserialize_any(PrincipalVisitor)
    }
}

/// One string or a list of strings, as policy JSON allows both
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrVec {
    One(String),
    Many(Vec<String>),
}

impl StringOrVec {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        match self {
            Self::One(s) => std::slice::from_ref(s).iter().map(String::as_str),
            Self::Many(v) => v[..].iter().map(String::as_str),
        }
    }
}

/// Condition block: operator -> condition key -> expected value(s)
pub type Conditions = HashMap<String, HashMap<String, serde_json::Value>>;

/// Decision from evaluating a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny,
    /// No statement matched
    ImplicitDeny,
}

/// Evaluation context for one request
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Caller ARN; `None` for anonymous requests
    pub principal_arn: Option<String>,
    /// Action, e.g. `s3:GetObject`
    pub action: String,
    /// Resource ARN, e.g. `arn:aws:s3:::bucket/key`
    pub resource: String,
    /// Source address for IP conditions
    pub source_ip: Option<IpAddr>,
}

impl RequestContext {
    pub fn new(
        principal_arn: Option<&str>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            principal_arn: principal_arn.map(String::from),
            action: action.into(),
            resource: resource.into(),
            source_ip: None,
        }
    }

    #[must_use]
    pub fn with_source_ip(mut self, ip: IpAddr) -> Self {
        self.source_ip = Some(ip);
        self
    }
}

/// Evaluates bucket policies against request contexts
#[derive(Debug, Default)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Evaluate the policy. Deny statements are checked first and win.
    pub fn evaluate(&self, policy: &BucketPolicy, ctx: &RequestContext) -> PolicyDecision {
        let mut allowed = false;

        for statement in &policy.statements {
            if !self.statement_matches(statement, ctx) {
                continue;
            }
            match statement.effect {
                Effect::Deny => return PolicyDecision::Deny,
                Effect::Allow => allowed = true,
            }
        }

        if allowed {
            PolicyDecision::Allow
        } else {
            PolicyDecision::ImplicitDeny
        }
    }

    fn statement_matches(&self, statement: &PolicyStatement, ctx: &RequestContext) -> bool {
        if !statement.principal.matches(ctx.principal_arn.as_deref()) {
            return false;
        }
        if !statement
            .action
            .iter()
            .any(|pattern| wildcard_match(pattern, &ctx.action))
        {
            return false;
        }
        if !statement
            .resource
            .iter()
            .any(|pattern| wildcard_match(pattern, &ctx.resource))
        {
            return false;
        }
        if let Some(conditions) = &statement.condition {
            if !self.conditions_match(conditions, ctx) {
                return false;
            }
        }
        true
    }

    fn conditions_match(&self, conditions: &Conditions, ctx: &RequestContext) -> bool {
        for (operator, keys) in conditions {
            match operator.as_str() {
                "IpAddress" => {
                    if !self.ip_condition(keys, ctx, true) {
                        return false;
                    }
                }
                "NotIpAddress" => {
                    if !self.ip_condition(keys, ctx, false) {
                        return false;
                    }
                }
                "StringEquals" => {
                    for (key, expected) in keys {
                        let actual = match key.as_str() {
                            "s3:prefix" => continue, // listing-only key, not modeled
                            "aws:PrincipalArn" => ctx.principal_arn.clone(),
                            _ => None,
                        };
                        if !value_matches(expected, actual.as_deref()) {
                            return false;
                        }
                    }
                }
                // Unknown operators fail closed
                _ => return false,
            }
        }
        true
    }

    fn ip_condition(
        &self,
        keys: &HashMap<String, serde_json::Value>,
        ctx: &RequestContext,
        want_match: bool,
    ) -> bool {
        let Some(expected) = keys.get("aws:SourceIp") else {
            return false;
        };
        let Some(ip) = ctx.source_ip else {
            // No source address: IpAddress cannot match, NotIpAddress can
            return !want_match;
        };
        let cidrs: Vec<String> = match expected {
            serde_json::Value::String(s) => vec![s.clone()],
            serde_json::Value::Array(a) => a
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => return false,
        };
        let matched = cidrs.iter().any(|c| cidr_contains(c, ip));
        matched == want_match
    }
}

fn value_matches(expected: &serde_json::Value, actual: Option<&str>) -> bool {
    let Some(actual) = actual else { return false };
    match expected {
        serde_json::Value::String(s) => s == actual,
        serde_json::Value::Array(a) => a.iter().any(|v| v.as_str() == Some(actual)),
        _ => false,
    }
}

/// Glob-style match supporting `*` (any run) and `?` (single char)
fn wildcard_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    // Iterative backtracking matcher
    let (mut pi, mut vi) = (0usize, 0usize);
    let (mut star, mut mark) = (usize::MAX, 0usize);

    while vi < v.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == v[vi]) {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = pi;
            mark = vi;
            pi += 1;
        } else if star != usize::MAX {
            pi = star + 1;
            mark += 1;
            vi = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Minimal CIDR containment check for IPv4/IPv6 literals and prefixes
fn cidr_contains(cidr: &str, ip: IpAddr) -> bool {
    let (net, bits) = match cidr.split_once('/') {
        Some((net, bits)) => {
            let Ok(bits) = bits.parse::<u32>() else {
                return false;
            };
            (net, bits)
        }
        None => (cidr, if ip.is_ipv4() { 32 } else { 128 }),
    };
    let Ok(net_ip) = net.parse::<IpAddr>() else {
        return false;
    };
    match (net_ip, ip) {
        (IpAddr::V4(n), IpAddr::V4(a)) => {
            if bits > 32 {
                return false;
            }
            let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
            (u32::from(n) & mask) == (u32::from(a) & mask)
        }
        (IpAddr::V6(n), IpAddr::V6(a)) => {
            if bits > 128 {
                return false;
            }
            let mask = if bits == 0 {
                0
            } else {
                u128::MAX << (128 - bits)
            };
            (u128::from(n) & mask) == (u128::from(a) & mask)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(json: &str) -> BucketPolicy {
        BucketPolicy::from_json(json).unwrap()
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("s3:*", "s3:GetObject"));
        assert!(wildcard_match("s3:Get*", "s3:GetObject"));
        assert!(wildcard_match("*", "anything"));
        assert!(!wildcard_match("s3:Put*", "s3:GetObject"));
        assert!(wildcard_match("arn:aws:s3:::b/*", "arn:aws:s3:::b/a/b/c"));
        assert!(!wildcard_match("arn:aws:s3:::b/*", "arn:aws:s3:::other/x"));
    }

    #[test]
    fn test_public_read_policy() {
        let p = policy(
            r#"{
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": "*",
                    "Action": "s3:GetObject",
                    "Resource": "arn:aws:s3:::public-bucket/*"
                }]
            }"#,
        );
        assert!(p.grants_public_access());

        let evaluator = PolicyEvaluator::new();
        let ctx = RequestContext::new(None, "s3:GetObject", "arn:aws:s3:::public-bucket/file");
        assert_eq!(evaluator.evaluate(&p, &ctx), PolicyDecision::Allow);

        let ctx = RequestContext::new(None, "s3:PutObject", "arn:aws:s3:::public-bucket/file");
        assert_eq!(evaluator.evaluate(&p, &ctx), PolicyDecision::ImplicitDeny);
    }

    #[test]
    fn test_deny_wins() {
        let p = policy(
            r#"{
                "Statement": [
                    {
                        "Effect": "Allow",
                        "Principal": "*",
                        "Action": "s3:*",
                        "Resource": "arn:aws:s3:::b/*"
                    },
                    {
                        "Effect": "Deny",
                        "Principal": {"AWS": "arn:aws:iam::t1:user/mallory"},
                        "Action": "s3:*",
                        "Resource": "arn:aws:s3:::b/*"
                    }
                ]
            }"#,
        );
        let evaluator = PolicyEvaluator::new();

        let ctx = RequestContext::new(
            Some("arn:aws:iam::t1:user/mallory"),
            "s3:GetObject",
            "arn:aws:s3:::b/k",
        );
        assert_eq!(evaluator.evaluate(&p, &ctx), PolicyDecision::Deny);

        let ctx = RequestContext::new(
            Some("arn:aws:iam::t1:user/alice"),
            "s3:GetObject",
            "arn:aws:s3:::b/k",
        );
        assert_eq!(evaluator.evaluate(&p, &ctx), PolicyDecision::Allow);
    }

    #[test]
    fn test_principal_forms() {
        // Single-string AWS principal
        let p = policy(
            r#"{
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": {"AWS": "arn:aws:iam::t:user/a"},
                    "Action": ["s3:GetObject", "s3:PutObject"],
                    "Resource": ["arn:aws:s3:::b/*"]
                }]
            }"#,
        );
        let evaluator = PolicyEvaluator::new();
        let ctx = RequestContext::new(
            Some("arn:aws:iam::t:user/a"),
            "s3:PutObject",
            "arn:aws:s3:::b/k",
        );
        assert_eq!(evaluator.evaluate(&p, &ctx), PolicyDecision::Allow);

        // Anonymous caller does not match a named principal
        let ctx = RequestContext::new(None, "s3:PutObject", "arn:aws:s3:::b/k");
        assert_eq!(evaluator.evaluate(&p, &ctx), PolicyDecision::ImplicitDeny);
    }

    #[test]
    fn test_ip_condition() {
        let p = policy(
            r#"{
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": "*",
                    "Action": "s3:GetObject",
                    "Resource": "arn:aws:s3:::b/*",
                    "Condition": {"IpAddress": {"aws:SourceIp": "10.0.0.0/8"}}
                }]
            }"#,
        );
        let evaluator = PolicyEvaluator::new();

        let inside = RequestContext::new(None, "s3:GetObject", "arn:aws:s3:::b/k")
            .with_source_ip("10.1.2.3".parse().unwrap());
        assert_eq!(evaluator.evaluate(&p, &inside), PolicyDecision::Allow);

        let outside = RequestContext::new(None, "s3:GetObject", "arn:aws:s3:::b/k")
            .with_source_ip("192.168.1.1".parse().unwrap());
        assert_eq!(evaluator.evaluate(&p, &outside), PolicyDecision::ImplicitDeny);
    }

    #[test]
    fn test_roundtrip_serialization() {
        let p = policy(
            r#"{
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": {"AWS": ["arn:aws:iam::t:user/a", "arn:aws:iam::t:user/b"]},
                    "Action": "s3:GetObject",
                    "Resource": "arn:aws:s3:::b/*"
                }]
            }"#,
        );
        let json = p.to_json().unwrap();
        let back = BucketPolicy::from_json(&json).unwrap();
        assert_eq!(back.statements.len(), 1);
        assert!(matches!(&back.statements[0].principal, Principal::Aws(v) if v.len() == 2));
    }

    #[test]
    fn test_cidr_contains() {
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        assert!(cidr_contains("10.0.0.0/8", ip));
        assert!(cidr_contains("10.0.0.5", ip));
        assert!(!cidr_contains("10.0.0.4", ip));
        assert!(!cidr_contains("bogus", ip));
    }
}
