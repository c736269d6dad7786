//! Access control lists and the public-access block.

use serde::{Deserialize, Serialize};

/// ACL permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    FullControl,
    Read,
    Write,
    ReadAcp,
    WriteAcp,
}

impl Permission {
    /// S3 wire value
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullControl => "FULL_CONTROL",
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::ReadAcp => "READ_ACP",
            Self::WriteAcp => "WRITE_ACP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FULL_CONTROL" => Some(Self::FullControl),
            "READ" => Some(Self::Read),
            "WRITE" => Some(Self::Write),
            "READ_ACP" => Some(Self::ReadAcp),
            "WRITE_ACP" => Some(Self::WriteAcp),
            _ => None,
        }
    }

    /// Does holding `self` satisfy a request for `wanted`?
    #[must_use]
    pub fn implies(self, wanted: Permission) -> bool {
        self == Self::FullControl || self == wanted
    }
}

/// Who a grant applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Grantee {
    /// A specific user
    CanonicalUser { id: String, display_name: String },
    /// Everyone, including anonymous requests
    AllUsers,
    /// Any authenticated caller
    AuthenticatedUsers,
}

/// One ACL grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub grantee: Grantee,
    pub permission: Permission,
}

/// An access control list attached to a bucket or object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    /// Owner user ID; always retains FULL_CONTROL
    pub owner_id: String,
    pub owner_display_name: String,
    pub grants: Vec<Grant>,
}

impl Acl {
    /// Default private ACL: owner only
    pub fn private(owner_id: impl Into<String>, owner_display_name: impl Into<String>) -> Self {
        let owner_id = owner_id.into();
        let owner_display_name = owner_display_name.into();
        Self {
            grants: vec![Grant {
                grantee: Grantee::CanonicalUser {
                    id: owner_id.clone(),
                    display_name: owner_display_name.clone(),
                },
                permission: Permission::FullControl,
            }],
            owner_id,
            owner_display_name,
        }
    }

    /// Build a canned ACL by its S3 name. Unknown names yield `None`.
    pub fn canned(name: &str, owner_id: &str, owner_display_name: &str) -> Option<Self> {
        let mut acl = Self::private(owner_id, owner_display_name);
        match name {
            "private" => {}
            "public-read" => acl.grants.push(Grant {
                grantee: Grantee::AllUsers,
                permission: Permission::Read,
            }),
            "public-read-write" => {
                acl.grants.push(Grant {
                    grantee: Grantee::AllUsers,
                    permission: Permission::Read,
                });
                acl.grants.push(Grant {
                    grantee: Grantee::AllUsers,
                    permission: Permission::Write,
                });
            }
            "authenticated-read" => acl.grants.push(Grant {
                grantee: Grantee::AuthenticatedUsers,
                permission: Permission::Read,
            }),
            _ => return None,
        }
        Some(acl)
    }

    /// Check whether a caller holds `wanted`. `user_id` is `None` for
    /// anonymous requests. `ignore_public` drops AllUsers /
    /// AuthenticatedUsers grants (the public-access block).
    #[must_use]
    pub fn allows(&self, user_id: Option<&str>, wanted: Permission, ignore_public: bool) -> bool {
        if user_id == Some(self.owner_id.as_str()) {
            return true;
        }
        self.grants.iter().any(|grant| {
            if !grant.permission.implies(wanted) {
                return false;
            }
            match &grant.grantee {
                Grantee::CanonicalUser { id, .. } => user_id == Some(id.as_str()),
                Grantee::AllUsers => !ignore_public,
                Grantee::AuthenticatedUsers => !ignore_public && user_id.is_some(),
            }
        })
    }

    /// True when the ACL grants anything to AllUsers
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.grants
            .iter()
            .any(|g| g.grantee == Grantee::AllUsers)
    }
}

/// S3 public access block configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublicAccessBlock {
    /// Reject ACL writes that would grant public access
    pub block_public_acls: bool,
    /// Evaluate requests as if public ACL grants did not exist
    pub ignore_public_acls: bool,
    /// Reject bucket policies that grant public access
    pub block_public_policy: bool,
    /// Refuse public-principal access granted by policy
    pub restrict_public_buckets: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_always_allowed() {
        let acl = Acl::private("u1", "User One");
        assert!(acl.allows(Some("u1"), Permission::WriteAcp, true));
        assert!(!acl.allows(Some("u2"), Permission::Read, false));
        assert!(!acl.allows(None, Permission::Read, false));
    }

    #[test]
    fn test_canned_public_read() {
        let acl = Acl::canned("public-read", "u1", "User One").unwrap();
        assert!(acl.is_public());
        assert!(acl.allows(None, Permission::Read, false));
        assert!(!acl.allows(None, Permission::Write, false));
        // Public grant suppressed by the public access block
        assert!(!acl.allows(None, Permission::Read, true));
    }

    #[test]
    fn test_canned_authenticated_read() {
        let acl = Acl::canned("authenticated-read", "u1", "User One").unwrap();
        assert!(!acl.is_public());
        assert!(acl.allows(Some("u2"), Permission::Read, false));
        assert!(!acl.allows(None, Permission::Read, false));
    }

    #[test]
    fn test_unknown_canned_name() {
        assert!(Acl::canned("bucket-owner-fantasy", "u", "U").is_none());
    }

    #[test]
    fn test_full_control_implies_everything() {
        let mut acl = Acl::private("u1", "User One");
        acl.grants.push(Grant {
            grantee: Grantee::CanonicalUser {
                id: "u2".into(),
                display_name: "Two".into(),
            },
            permission: Permission::FullControl,
        });
        for wanted in [
            Permission::Read,
            Permission::Write,
            Permission::ReadAcp,
            Permission::WriteAcp,
        ] {
            assert!(acl.allows(Some("u2"), wanted, true));
        }
    }

    #[test]
    fn test_acl_roundtrip() {
        let acl = Acl::canned("public-read-write", "u1", "One").unwrap();
        let json = serde_json::to_string(&acl).unwrap();
        let back: Acl = serde_json::from_str(&json).unwrap();
        assert_eq!(acl, back);
    }
}
