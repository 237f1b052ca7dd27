//! Turns a [`MembershipDiff`] into directory operations.
//!
//! The planner is sequential and owns the only mutation of the run's
//! [`PendingRequests`]: an invite planned for one row is visible to the
//! duplicate-suppression check of every later row.
//!
//! Output is a [`Plan`] with two queues. The dependent queue holds role
//! updates that may only run once the add-to-org operation they reference
//! has succeeded.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::directory::{ApiSurface, DirectoryRequest};
use crate::errors::ReconcileError;
use crate::models::{
    DesiredMembership, MembershipDiff, PendingAddition, PendingInvite, PendingRemoval,
    RemovalReason,
};
use crate::roles::RoleResolver;
use crate::snapshot::{GroupDirectorySnapshot, PendingRequests, ProvisioningPolicy};

/// API version used when creating invitations on the REST API.
pub const INVITE_CREATE_VERSION: &str = "2022-10-06";

/// Role every new org membership is created with before any custom role is
/// applied.
const INITIAL_ORG_ROLE: &str = "collaborator";

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S+@\S+\.\S+").expect("EMAIL_PATTERN is a valid regex"));

/// Loose `local@domain.tld` shape check.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

// ---------------------------------------------------------------------------
// Plan types
// ---------------------------------------------------------------------------

/// Identifier of an operation within one plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u32);

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    UpdateRole,
    AddToOrg,
    Provision,
    Invite,
    Remove,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpdateRole => write!(f, "update_role"),
            Self::AddToOrg => write!(f, "add_to_org"),
            Self::Provision => write!(f, "provision"),
            Self::Invite => write!(f, "invite"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

/// A single directory mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub request: DirectoryRequest,
    /// Operation that must have succeeded before this one is dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<OperationId>,
    pub description: String,
}

/// A row deliberately left alone, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedRow {
    pub membership: DesiredMembership,
    pub reason: String,
}

/// A row or removal that could not be planned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RejectedRow {
    pub subject: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    pub independent: Vec<PlannedOperation>,
    pub dependent: Vec<PlannedOperation>,
    pub skipped: Vec<SkippedRow>,
    pub rejected: Vec<RejectedRow>,
    /// Role-change removals made redundant by a role update.
    pub superseded_removals: usize,
}

impl Plan {
    pub fn operation_count(&self) -> usize {
        self.independent.len() + self.dependent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operation_count() == 0
    }

    /// All operations in dispatch order.
    pub fn operations(&self) -> impl Iterator<Item = &PlannedOperation> {
        self.independent.iter().chain(self.dependent.iter())
    }
}

/// Switches that change how additions are planned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanningPolicy {
    pub provisioning: ProvisioningPolicy,
    /// Disable the cross-org pending-invite suppression.
    pub invite_to_all_orgs: bool,
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

pub struct OperationPlanner<'a> {
    snapshot: &'a GroupDirectorySnapshot,
    roles: &'a RoleResolver,
    policy: PlanningPolicy,
    next_id: u32,
}

impl<'a> OperationPlanner<'a> {
    pub fn new(
        snapshot: &'a GroupDirectorySnapshot,
        roles: &'a RoleResolver,
        policy: PlanningPolicy,
    ) -> Self {
        Self {
            snapshot,
            roles,
            policy,
            next_id: 1,
        }
    }

    pub fn plan(mut self, diff: &MembershipDiff, pending: &mut PendingRequests) -> Plan {
        let mut plan = Plan::default();

        for addition in &diff.additions {
            if let Err(e) = self.plan_addition(addition, pending, &mut plan) {
                warn!(membership = %addition.membership, error = %e, "rejecting membership row");
                plan.rejected.push(RejectedRow {
                    subject: addition.membership.to_string(),
                    error: e.to_string(),
                });
            }
        }

        for removal in &diff.removals {
            if removal.reason == RemovalReason::RoleChanged {
                debug!(
                    email = %removal.user_email,
                    org = %removal.org,
                    role = %removal.role,
                    "role change handled by update, no removal needed"
                );
                plan.superseded_removals += 1;
                continue;
            }
            match self.removal_operation(removal) {
                Ok(op) => plan.independent.push(op),
                Err(e) => {
                    warn!(email = %removal.user_email, org = %removal.org, error = %e, "cannot plan removal");
                    plan.rejected.push(RejectedRow {
                        subject: format!("{} | {} | {}", removal.org, removal.user_email, removal.role),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            independent = plan.independent.len(),
            dependent = plan.dependent.len(),
            skipped = plan.skipped.len(),
            rejected = plan.rejected.len(),
            "operations planned"
        );
        plan
    }

    fn plan_addition(
        &mut self,
        addition: &PendingAddition,
        pending: &mut PendingRequests,
        plan: &mut Plan,
    ) -> Result<(), ReconcileError> {
        let row = &addition.membership;
        let role_id = self.validate(row)?;
        let email = row.user_email.as_str();
        let user_exists = self.snapshot.user_exists(email);

        if pending.invite_exists_in_group(email)
            && self.policy.provisioning == ProvisioningPolicy::Invite
            && !user_exists
            && !self.policy.invite_to_all_orgs
        {
            info!(email, org = %row.org, "skipping, invitation already pending");
            plan.skipped.push(skip(row, "invitation pending in group"));
            return Ok(());
        }

        let org_id = self.snapshot.resolve_org_id(&row.org)?.to_string();

        if user_exists {
            let user_id = self
                .snapshot
                .resolve_user_id(email)
                .ok_or_else(|| ReconcileError::UserIdNotFound(email.to_string()))?
                .to_string();

            if addition.user_exists_in_org {
                let op = self.update_role(&org_id, &user_id, &role_id, row, None);
                plan.independent.push(op);
            } else if self.snapshot.is_group_admin(email) {
                info!(email, "skipping, already a group admin");
                plan.skipped.push(skip(row, "group admin"));
            } else {
                let add = self.next(
                    OperationKind::AddToOrg,
                    DirectoryRequest::post(
                        ApiSurface::V1,
                        format!("/group/{}/org/{}/members", self.snapshot.group_id(), org_id),
                        json!({ "userId": user_id, "role": INITIAL_ORG_ROLE }),
                    ),
                    None,
                    format!("add {} to \"{}\" as {}", email, row.org, INITIAL_ORG_ROLE),
                );
                let update = self.update_role(&org_id, &user_id, &role_id, row, Some(add.id));
                plan.independent.push(add);
                plan.dependent.push(update);
            }
            return Ok(());
        }

        match self.policy.provisioning {
            ProvisioningPolicy::AutoProvision => {
                if pending.provision_exists(email, &org_id) {
                    info!(email, org = %row.org, org_id = %org_id, "skipping, already provisioned");
                    plan.skipped.push(skip(row, "provision pending in org"));
                    return Ok(());
                }
                info!(email, org = %row.org, org_id = %org_id, "provisioning user");
                let op = self.next(
                    OperationKind::Provision,
                    DirectoryRequest::post(
                        ApiSurface::V1,
                        format!("/org/{}/provision", org_id),
                        json!({ "email": email, "rolePublicId": role_id }),
                    ),
                    None,
                    format!("provision {} to \"{}\" as {}", email, row.org, row.role),
                );
                plan.independent.push(op);
            }
            ProvisioningPolicy::Invite => {
                info!(email, org = %row.org, org_id = %org_id, "inviting user");
                let op = self.next(
                    OperationKind::Invite,
                    DirectoryRequest::post(
                        ApiSurface::Rest,
                        format!("/orgs/{}/invites?version={}", org_id, INVITE_CREATE_VERSION),
                        json!({ "email": email, "role": role_id }),
                    ),
                    None,
                    format!("invite {} to \"{}\" as {}", email, row.org, row.role),
                );
                plan.independent.push(op);
                pending.record_invite(PendingInvite {
                    org_id,
                    email: email.to_string(),
                    role: row.role.clone(),
                });
            }
        }

        Ok(())
    }

    /// Role must resolve and the email must look like one. Returns the role
    /// public id.
    fn validate(&self, row: &DesiredMembership) -> Result<String, ReconcileError> {
        let role_id = self.roles.resolve(&row.role)?.to_string();
        if !is_valid_email(&row.user_email) {
            return Err(ReconcileError::InvalidEmail(row.user_email.clone()));
        }
        Ok(role_id)
    }

    fn update_role(
        &mut self,
        org_id: &str,
        user_id: &str,
        role_id: &str,
        row: &DesiredMembership,
        depends_on: Option<OperationId>,
    ) -> PlannedOperation {
        self.next(
            OperationKind::UpdateRole,
            DirectoryRequest::put(
                format!("/org/{}/members/update/{}", org_id, user_id),
                json!({ "rolePublicId": role_id }),
            ),
            depends_on,
            format!("set {} role in \"{}\" to {}", row.user_email, row.org, row.role),
        )
    }

    fn removal_operation(&mut self, removal: &PendingRemoval) -> Result<PlannedOperation, ReconcileError> {
        let org_id = self.snapshot.resolve_org_id(&removal.org)?.to_string();
        let user_id = self
            .snapshot
            .resolve_user_id(&removal.user_email)
            .ok_or_else(|| ReconcileError::UserIdNotFound(removal.user_email.clone()))?
            .to_string();
        Ok(self.next(
            OperationKind::Remove,
            DirectoryRequest::delete(format!("/org/{}/members/{}", org_id, user_id)),
            None,
            format!("remove {} ({}) from \"{}\"", removal.user_email, removal.role, removal.org),
        ))
    }

    fn next(
        &mut self,
        kind: OperationKind,
        request: DirectoryRequest,
        depends_on: Option<OperationId>,
        description: String,
    ) -> PlannedOperation {
        let id = OperationId(self.next_id);
        self.next_id += 1;
        PlannedOperation {
            id,
            kind,
            request,
            depends_on,
            description,
        }
    }
}

fn skip(row: &DesiredMembership, reason: &str) -> SkippedRow {
    SkippedRow {
        membership: row.clone(),
        reason: reason.to_string(),
    }
}
