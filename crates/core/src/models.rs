//! Domain model types used throughout membersync.
//!
//! The directory-facing types deserialize straight from the API payloads;
//! the diff and plan types are the values handed from one pipeline stage to
//! the next.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Directory state
// ---------------------------------------------------------------------------

/// Group role value that marks a group administrator.
pub const GROUP_ADMIN_ROLE: &str = "admin";

/// A member of the group, with the organizations they belong to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    /// Members invited but never signed up come back without an email and
    /// are dropped at snapshot time.
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group_role: Option<String>,
    #[serde(default)]
    pub orgs: Vec<OrgMembership>,
}

impl Member {
    pub fn email(&self) -> &str {
        self.email.as_deref().unwrap_or_default()
    }

    pub fn has_email(&self, email: &str) -> bool {
        self.email
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case(email))
    }

    pub fn is_group_admin(&self) -> bool {
        self.group_role
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case(GROUP_ADMIN_ROLE))
    }
}

/// One `(organization, role)` pair held by a member. The directory allows a
/// single role per organization per user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrgMembership {
    pub name: String,
    pub role: String,
}

/// An organization inside the group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
}

/// A role defined on the group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub name: String,
    pub public_id: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// An invitation already sent but not yet accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingInvite {
    pub org_id: String,
    pub email: String,
    pub role: String,
}

/// An auto-provision request already issued but not yet materialized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingProvision {
    pub org_id: String,
    pub email: String,
    pub role: Option<String>,
}

// ---------------------------------------------------------------------------
// Desired state
// ---------------------------------------------------------------------------

/// A single row of the desired membership list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DesiredMembership {
    pub user_email: String,
    pub org: String,
    pub role: String,
    #[serde(default)]
    pub group: String,
}

impl DesiredMembership {
    pub fn new(
        user_email: impl Into<String>,
        org: impl Into<String>,
        role: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            user_email: user_email.into(),
            org: org.into(),
            role: role.into(),
            group: group.into(),
        }
    }
}

impl std::fmt::Display for DesiredMembership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} | {} | {}", self.org, self.user_email, self.role)
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// A desired membership that is not yet reflected in the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingAddition {
    pub membership: DesiredMembership,
    /// The user already belongs to the org (with some other role), so a role
    /// change is needed rather than a new membership.
    pub user_exists_in_org: bool,
}

/// Why a held membership no longer matches the desired list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// No desired row mentions this user in this org.
    NotDesired,
    /// A desired row exists for this user and org but with another role.
    RoleChanged,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotDesired => write!(f, "not_desired"),
            Self::RoleChanged => write!(f, "role_changed"),
        }
    }
}

/// A held membership that does not match the desired list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingRemoval {
    pub user_email: String,
    pub role: String,
    pub org: String,
    pub reason: RemovalReason,
}

/// Output of the reconciler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MembershipDiff {
    pub additions: Vec<PendingAddition>,
    pub removals: Vec<PendingRemoval>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}
