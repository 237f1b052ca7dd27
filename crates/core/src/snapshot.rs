//! In-memory model of a group's current membership state.
//!
//! [`GroupDirectorySnapshot::fetch`] populates the model once per run. Each
//! category (members, organizations, roles, pending requests) is fetched
//! independently; a failed fetch is logged and leaves that category empty so
//! the run can proceed on partial data.
//!
//! Pending invitations and provisions are returned as a separate
//! [`PendingRequests`] value. The snapshot itself is read-only for the rest
//! of the run; only the planner appends to the pending set.

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::directory::{ApiSurface, DirectoryRequest, DirectoryTransport};
use crate::errors::ReconcileError;
use crate::models::{Member, Organization, PendingInvite, PendingProvision, Role};

/// API version used when listing invitations on the REST API.
pub const INVITES_LIST_VERSION: &str = "2022-11-14";

/// How users unknown to the group are brought in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProvisioningPolicy {
    /// Send an invitation email.
    #[default]
    Invite,
    /// Create an auto-provision request.
    AutoProvision,
}

impl ProvisioningPolicy {
    pub fn from_flag(auto_provision: bool) -> Self {
        if auto_provision {
            Self::AutoProvision
        } else {
            Self::Invite
        }
    }
}

/// Current members, organizations and roles of one group.
#[derive(Debug, Clone, Default)]
pub struct GroupDirectorySnapshot {
    group_id: String,
    members: Vec<Member>,
    organizations: Vec<Organization>,
    roles: Vec<Role>,
}

/// Everything fetched for one run.
#[derive(Debug, Clone, Default)]
pub struct FetchedDirectory {
    pub snapshot: GroupDirectorySnapshot,
    pub pending: PendingRequests,
}

impl GroupDirectorySnapshot {
    /// Build a snapshot from already-fetched data. Members without an email
    /// are dropped.
    pub fn new(
        group_id: impl Into<String>,
        members: Vec<Member>,
        organizations: Vec<Organization>,
        roles: Vec<Role>,
    ) -> Self {
        let total = members.len();
        let members: Vec<Member> = members.into_iter().filter(|m| m.email.is_some()).collect();
        if members.len() != total {
            debug!(dropped = total - members.len(), "dropped members without an email");
        }
        Self {
            group_id: group_id.into(),
            members,
            organizations,
            roles,
        }
    }

    /// Populate a snapshot from the directory.
    ///
    /// `desired_orgs` lists the organization names referenced by the desired
    /// membership rows; pending requests are only fetched for those that
    /// exist in the group.
    pub async fn fetch(
        transport: &dyn DirectoryTransport,
        group_id: &str,
        desired_orgs: &[String],
        policy: ProvisioningPolicy,
    ) -> FetchedDirectory {
        info!(group_id, "building group directory snapshot");

        let members: Vec<Member> = fetch_json(
            transport,
            DirectoryRequest::get(ApiSurface::V1, format!("/group/{}/members", group_id)),
            "group members",
        )
        .await
        .unwrap_or_default();

        let organizations = fetch_json::<OrgListing>(
            transport,
            DirectoryRequest::get(ApiSurface::V1, "/orgs"),
            "organizations",
        )
        .await
        .map(|listing| listing.orgs)
        .unwrap_or_default();

        let roles: Vec<Role> = fetch_json(
            transport,
            DirectoryRequest::get(ApiSurface::V1, format!("/group/{}/roles", group_id)),
            "group roles",
        )
        .await
        .unwrap_or_default();

        let snapshot = Self::new(group_id, members, organizations, roles);

        let mut pending = PendingRequests::default();
        let org_ids: Vec<&str> = unique(desired_orgs)
            .into_iter()
            .filter_map(|name| snapshot.resolve_org_id(name).ok())
            .collect();

        match policy {
            ProvisioningPolicy::Invite => {
                info!(orgs = org_ids.len(), "fetching pending invites");
                for org_id in org_ids {
                    let path = format!("/orgs/{}/invites?version={}", org_id, INVITES_LIST_VERSION);
                    if let Some(listing) = fetch_json::<InviteListing>(
                        transport,
                        DirectoryRequest::get(ApiSurface::Rest, path),
                        "pending invites",
                    )
                    .await
                    {
                        pending
                            .invites
                            .extend(listing.data.into_iter().map(|i| i.into_pending(org_id)));
                    }
                }
            }
            ProvisioningPolicy::AutoProvision => {
                info!(orgs = org_ids.len(), "fetching pending user provisions");
                for org_id in org_ids {
                    if let Some(provisions) = fetch_json::<Vec<ProvisionEntry>>(
                        transport,
                        DirectoryRequest::get(ApiSurface::V1, format!("/org/{}/provision", org_id)),
                        "pending provisions",
                    )
                    .await
                    {
                        pending.provisions.extend(provisions.into_iter().map(|p| {
                            PendingProvision {
                                org_id: org_id.to_string(),
                                email: p.email,
                                role: p.role,
                            }
                        }));
                    }
                }
            }
        }

        info!(
            members = snapshot.members.len(),
            organizations = snapshot.organizations.len(),
            roles = snapshot.roles.len(),
            pending_invites = pending.invites.len(),
            pending_provisions = pending.provisions.len(),
            "snapshot built"
        );

        FetchedDirectory { snapshot, pending }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn organizations(&self) -> &[Organization] {
        &self.organizations
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Id of the first organization with exactly this name.
    pub fn resolve_org_id(&self, name: &str) -> Result<&str, ReconcileError> {
        self.organizations
            .iter()
            .find(|o| o.name == name)
            .map(|o| o.id.as_str())
            .ok_or_else(|| ReconcileError::OrgIdNotFound(name.to_string()))
    }

    /// Id of the member with this email (case-insensitive).
    pub fn resolve_user_id(&self, email: &str) -> Option<&str> {
        self.member(email).map(|m| m.id.as_str())
    }

    pub fn user_exists(&self, email: &str) -> bool {
        self.member(email).is_some()
    }

    pub fn is_group_admin(&self, email: &str) -> bool {
        self.members
            .iter()
            .any(|m| m.has_email(email) && m.is_group_admin())
    }

    fn member(&self, email: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.has_email(email))
    }
}

// ---------------------------------------------------------------------------
// Pending requests
// ---------------------------------------------------------------------------

/// In-flight invitations and provisions for one run.
#[derive(Debug, Clone, Default)]
pub struct PendingRequests {
    invites: Vec<PendingInvite>,
    provisions: Vec<PendingProvision>,
}

impl PendingRequests {
    pub fn new(invites: Vec<PendingInvite>, provisions: Vec<PendingProvision>) -> Self {
        Self {
            invites,
            provisions,
        }
    }

    pub fn invites(&self) -> &[PendingInvite] {
        &self.invites
    }

    pub fn provisions(&self) -> &[PendingProvision] {
        &self.provisions
    }

    /// An invite is pending for this email in any organization.
    pub fn invite_exists_in_group(&self, email: &str) -> bool {
        self.invites
            .iter()
            .any(|i| i.email.eq_ignore_ascii_case(email))
    }

    pub fn provision_exists(&self, email: &str, org_id: &str) -> bool {
        self.provisions
            .iter()
            .any(|p| p.org_id == org_id && p.email.eq_ignore_ascii_case(email))
    }

    pub fn record_invite(&mut self, invite: PendingInvite) {
        self.invites.push(invite);
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize)]
struct OrgListing {
    #[serde(default)]
    orgs: Vec<Organization>,
}

#[derive(Debug, serde::Deserialize)]
struct InviteListing {
    #[serde(default)]
    data: Vec<InviteResource>,
}

#[derive(Debug, serde::Deserialize)]
struct InviteResource {
    attributes: InviteAttributes,
    #[serde(default)]
    relationships: Option<serde_json::Value>,
}

#[derive(Debug, serde::Deserialize)]
struct InviteAttributes {
    email: String,
    #[serde(default)]
    role: Option<String>,
}

impl InviteResource {
    /// The org id from the resource relationships, falling back to the org
    /// the listing was requested for.
    fn into_pending(self, requested_org: &str) -> PendingInvite {
        let org_id = self
            .relationships
            .as_ref()
            .and_then(|r| r.pointer("/org/data/id"))
            .and_then(|id| id.as_str())
            .unwrap_or(requested_org)
            .to_string();
        PendingInvite {
            org_id,
            email: self.attributes.email,
            role: self.attributes.role.unwrap_or_default(),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionEntry {
    email: String,
    #[serde(default)]
    role: Option<String>,
}

async fn fetch_json<T: DeserializeOwned>(
    transport: &dyn DirectoryTransport,
    request: DirectoryRequest,
    what: &str,
) -> Option<T> {
    let value = match transport.request(&request).await {
        Ok(value) => value,
        Err(e) => {
            warn!(what, path = %request.path, error = %e.message(), "snapshot fetch failed, continuing without it");
            return None;
        }
    };
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(what, path = %request.path, error = %e, "unexpected snapshot payload, continuing without it");
            None
        }
    }
}

/// Distinct names in first-seen order.
fn unique(names: &[String]) -> Vec<&str> {
    let mut seen = Vec::new();
    for name in names {
        if !seen.contains(&name.as_str()) {
            seen.push(name.as_str());
        }
    }
    seen
}
