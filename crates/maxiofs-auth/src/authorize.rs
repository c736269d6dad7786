//! Combined authorization decision.
//!
//! Evaluation order: identity-based role policy, bucket policy, bucket
//! ACL, object ACL, public-access block. An explicit policy Deny wins
//! everywhere; absent an allow from any source, access is refused. The
//! owner of a resource always retains FULL_CONTROL for ACL-governed
//! operations.

use std::net::IpAddr;

use crate::acl::{Acl, Permission, PublicAccessBlock};
use crate::policy::{BucketPolicy, PolicyDecision, PolicyEvaluator, RequestContext};
use crate::user::Role;

/// The authenticated caller, as handlers see it
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub arn: String,
    /// `None` = global actor (sees all tenants)
    pub tenant_id: Option<String>,
    pub roles: Vec<Role>,
}

impl Actor {
    /// Can this actor act on resources owned by `tenant`?
    #[must_use]
    pub fn scopes_tenant(&self, tenant: &str) -> bool {
        match &self.tenant_id {
            None => true,
            Some(t) => t == tenant,
        }
    }

    #[must_use]
    pub fn is_global_admin(&self) -> bool {
        self.tenant_id.is_none() && self.roles.contains(&Role::Admin)
    }
}

/// Everything the authorization decision looks at
pub struct AuthzInput<'a> {
    /// `None` for anonymous requests
    pub actor: Option<&'a Actor>,
    /// Action name, e.g. `s3:GetObject`
    pub action: &'a str,
    /// Resource ARN, e.g. `arn:aws:s3:::bucket/key`
    pub resource: &'a str,
    /// Tenant owning the bucket
    pub bucket_tenant: &'a str,
    /// User owning the bucket
    pub bucket_owner: &'a str,
    pub policy: Option<&'a BucketPolicy>,
    pub bucket_acl: &'a Acl,
    /// Present for object-level operations
    pub object_acl: Option<&'a Acl>,
    pub public_access_block: PublicAccessBlock,
    pub source_ip: Option<IpAddr>,
}

/// Final decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Is `action` satisfied by the read-only role?
fn is_read_action(action: &str) -> bool {
    matches!(
        action,
        "s3:GetObject"
            | "s3:GetObjectVersion"
            | "s3:GetObjectAcl"
            | "s3:GetObjectRetention"
            | "s3:GetObjectLegalHold"
            | "s3:ListBucket"
            | "s3:ListBucketVersions"
            | "s3:ListBucketMultipartUploads"
            | "s3:ListParts"
            | "s3:GetBucketAcl"
            | "s3:GetBucketPolicy"
            | "s3:GetBucketVersioning"
            | "s3:GetBucketLocation"
            | "s3:GetBucketCors"
            | "s3:GetEncryptionConfiguration"
            | "s3:GetLifecycleConfiguration"
            | "s3:GetBucketNotification"
            | "s3:GetBucketObjectLockConfiguration"
            | "s3:GetBucketPublicAccessBlock"
            | "s3:ListAllMyBuckets"
    )
}

/// The ACL permission governing `action`, where one applies
fn acl_permission_for(action: &str) -> Option<Permission> {
    match action {
        "s3:GetObject" | "s3:GetObjectVersion" | "s3:ListBucket" | "s3:ListBucketVersions" => {
            Some(Permission::Read)
        }
        "s3:PutObject" | "s3:DeleteObject" | "s3:DeleteObjectVersion" => Some(Permission::Write),
        "s3:GetObjectAcl" | "s3:GetBucketAcl" => Some(Permission::ReadAcp),
        "s3:PutObjectAcl" | "s3:PutBucketAcl" => Some(Permission::WriteAcp),
        _ => None,
    }
}

/// Decide whether the request is allowed.
pub fn authorize(input: &AuthzInput<'_>) -> Decision {
    let evaluator = PolicyEvaluator::new();
    let ctx = RequestContext {
        principal_arn: input.actor.map(|a| a.arn.clone()),
        action: input.action.to_string(),
        resource: input.resource.to_string(),
        source_ip: input.source_ip,
    };

    // Explicit policy deny beats everything, including ownership
    let policy_decision = input
        .policy
        .map(|p| evaluator.evaluate(p, &ctx))
        .unwrap_or(PolicyDecision::ImplicitDeny);
    if policy_decision == PolicyDecision::Deny {
        return Decision::Deny;
    }

    if let Some(actor) = input.actor {
        // Global admins manage everything
        if actor.is_global_admin() {
            return Decision::Allow;
        }

        // Identity-based role policy, scoped to the bucket's tenant
        if actor.scopes_tenant(input.bucket_tenant) {
            let role_allows = actor.roles.iter().any(|role| match role {
                Role::Admin => true,
                Role::Write => true,
                Role::Read => is_read_action(input.action),
            });
            if role_allows {
                return Decision::Allow;
            }
        }

        // Resource owner retains FULL_CONTROL for ACL-governed ops
        let owner_id = input
            .object_acl
            .map(|a| a.owner_id.as_str())
            .unwrap_or(input.bucket_owner);
        if actor.user_id == owner_id || actor.user_id == input.bucket_owner {
            return Decision::Allow;
        }
    }

    // Bucket policy allow, unless public principals are restricted
    if policy_decision == PolicyDecision::Allow {
        let public_grant = input
            .policy
            .is_some_and(BucketPolicy::grants_public_access);
        let blocked =
            input.public_access_block.restrict_public_buckets && public_grant && {
                // Restriction hits anonymous and cross-tenant callers
                match input.actor {
                    None => true,
                    Some(a) => !a.scopes_tenant(input.bucket_tenant),
                }
            };
        if !blocked {
            return Decision::Allow;
        }
    }

    // ACL grants
    if let Some(wanted) = acl_permission_for(input.action) {
        let ignore_public = input.public_access_block.ignore_public_acls;
        let user_id = input.actor.map(|a| a.user_id.as_str());

        let acl = input.object_acl.unwrap_or(input.bucket_acl);
        if acl.allows(user_id, wanted, ignore_public) {
            return Decision::Allow;
        }
        // Bucket READ also satisfies object reads (bucket-granted listing)
        if input.object_acl.is_some() && input.bucket_acl.allows(user_id, wanted, ignore_public) {
            return Decision::Allow;
        }
    }

    Decision::Deny
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(user_id: &str, tenant: Option<&str>, roles: Vec<Role>) -> Actor {
        Actor {
            user_id: user_id.to_string(),
            arn: format!(
                "arn:aws:iam::{}:user/{user_id}",
                tenant.unwrap_or("global")
            ),
            tenant_id: tenant.map(String::from),
            roles,
        }
    }

    fn base_input<'a>(
        actor_ref: Option<&'a Actor>,
        action: &'a str,
        bucket_acl: &'a Acl,
    ) -> AuthzInput<'a> {
        AuthzInput {
            actor: actor_ref,
            action,
            resource: "arn:aws:s3:::b/k",
            bucket_tenant: "t1",
            bucket_owner: "owner",
            policy: None,
            bucket_acl,
            object_acl: None,
            public_access_block: PublicAccessBlock::default(),
            source_ip: None,
        }
    }

    #[test]
    fn test_owner_allowed() {
        let acl = Acl::private("owner", "Owner");
        let a = actor("owner", Some("t1"), vec![]);
        let input = base_input(Some(&a), "s3:PutObjectAcl", &acl);
        assert_eq!(authorize(&input), Decision::Allow);
    }

    #[test]
    fn test_anonymous_denied_by_default() {
        let acl = Acl::private("owner", "Owner");
        let input = base_input(None, "s3:GetObject", &acl);
        assert_eq!(authorize(&input), Decision::Deny);
    }

    #[test]
    fn test_anonymous_allowed_via_public_acl() {
        let acl = Acl::canned("public-read", "owner", "Owner").unwrap();
        let input = base_input(None, "s3:GetObject", &acl);
        assert_eq!(authorize(&input), Decision::Allow);

        // PAB ignore_public_acls shuts it off
        let mut input = base_input(None, "s3:GetObject", &acl);
        input.public_access_block.ignore_public_acls = true;
        assert_eq!(authorize(&input), Decision::Deny);
    }

    #[test]
    fn test_tenant_role_scoping() {
        let acl = Acl::private("owner", "Owner");

        // Reader in the right tenant can read but not write
        let reader = actor("u-read", Some("t1"), vec![Role::Read]);
        let input = base_input(Some(&reader), "s3:GetObject", &acl);
        assert_eq!(authorize(&input), Decision::Allow);
        let input = base_input(Some(&reader), "s3:PutObject", &acl);
        assert_eq!(authorize(&input), Decision::Deny);

        // Writer in another tenant gets nothing
        let outsider = actor("u-out", Some("t2"), vec![Role::Write]);
        let input = base_input(Some(&outsider), "s3:GetObject", &acl);
        assert_eq!(authorize(&input), Decision::Deny);
    }

    #[test]
    fn test_global_admin_allowed() {
        let acl = Acl::private("owner", "Owner");
        let admin = actor("root", None, vec![Role::Admin]);
        let input = base_input(Some(&admin), "s3:DeleteObject", &acl);
        assert_eq!(authorize(&input), Decision::Allow);
    }

    #[test]
    fn test_policy_deny_beats_owner() {
        let acl = Acl::private("owner", "Owner");
        let a = actor("owner", Some("t1"), vec![Role::Admin]);
        let policy = BucketPolicy::from_json(
            r#"{
                "Statement": [{
                    "Effect": "Deny",
                    "Principal": "*",
                    "Action": "s3:DeleteObject",
                    "Resource": "arn:aws:s3:::b/*"
                }]
            }"#,
        )
        .unwrap();
        let mut input = base_input(Some(&a), "s3:DeleteObject", &acl);
        input.policy = Some(&policy);
        assert_eq!(authorize(&input), Decision::Deny);
    }

    #[test]
    fn test_restrict_public_buckets() {
        let acl = Acl::private("owner", "Owner");
        let policy = BucketPolicy::from_json(
            r#"{
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": "*",
                    "Action": "s3:GetObject",
                    "Resource": "arn:aws:s3:::b/*"
                }]
            }"#,
        )
        .unwrap();

        let mut input = base_input(None, "s3:GetObject", &acl);
        input.policy = Some(&policy);
        assert_eq!(authorize(&input), Decision::Allow);

        input.public_access_block.restrict_public_buckets = true;
        assert_eq!(authorize(&input), Decision::Deny);
    }

    #[test]
    fn test_object_acl_grants_cross_tenant_read() {
        let bucket_acl = Acl::private("owner", "Owner");
        let mut object_acl = Acl::private("owner", "Owner");
        object_acl.grants.push(crate::acl::Grant {
            grantee: crate::acl::Grantee::CanonicalUser {
                id: "friend".into(),
                display_name: "Friend".into(),
            },
            permission: Permission::Read,
        });

        let friend = actor("friend", Some("t2"), vec![]);
        let mut input = base_input(Some(&friend), "s3:GetObject", &bucket_acl);
        input.object_acl = Some(&object_acl);
        assert_eq!(authorize(&input), Decision::Allow);
    }
}
