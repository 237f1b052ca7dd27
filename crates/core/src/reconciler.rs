//! Desired-versus-current membership diff.
//!
//! Additions and removals use different notions of "already matches":
//!
//! * for additions a literal role match on `ADMIN` / `COLLABORATOR` does not
//!   count when the group defines a custom role with that name, because the
//!   member holds the default role rather than the custom one;
//! * for removals the comparison is always literal, so a member is never
//!   removed because of custom-role shadowing.
//!
//! Group admins are skipped on both sides.

use tracing::{debug, info};

use crate::models::{
    DesiredMembership, Member, MembershipDiff, PendingAddition, PendingRemoval, RemovalReason,
};
use crate::roles::{RoleLabel, RoleResolver};
use crate::snapshot::GroupDirectorySnapshot;

/// Computes a [`MembershipDiff`] for one group. Holds no state of its own.
pub struct Reconciler<'a> {
    snapshot: &'a GroupDirectorySnapshot,
    roles: &'a RoleResolver,
}

impl<'a> Reconciler<'a> {
    pub fn new(snapshot: &'a GroupDirectorySnapshot, roles: &'a RoleResolver) -> Self {
        Self { snapshot, roles }
    }

    pub fn diff(&self, desired: &[DesiredMembership]) -> MembershipDiff {
        let diff = MembershipDiff {
            additions: self.additions(desired),
            removals: self.removals(desired),
        };
        info!(
            additions = diff.additions.len(),
            removals = diff.removals.len(),
            "membership diff computed"
        );
        diff
    }

    pub fn additions(&self, desired: &[DesiredMembership]) -> Vec<PendingAddition> {
        let mut additions = Vec::new();

        for row in desired {
            let mut user_exists_in_org = false;
            let mut matched = false;

            for member in self.managed_members() {
                if !member.has_email(&row.user_email) {
                    continue;
                }
                for held in member.orgs.iter().filter(|o| o.name == row.org) {
                    user_exists_in_org = true;
                    if RoleLabel::same(&held.role, &row.role) && !self.roles.is_shadowed(&row.role) {
                        matched = true;
                    }
                }
            }

            if matched {
                debug!(membership = %row, "membership up to date");
                continue;
            }
            debug!(membership = %row, user_exists_in_org, "pending addition");
            additions.push(PendingAddition {
                membership: row.clone(),
                user_exists_in_org,
            });
        }

        additions
    }

    pub fn removals(&self, desired: &[DesiredMembership]) -> Vec<PendingRemoval> {
        let mut removals = Vec::new();

        for member in self.managed_members() {
            let email = member.email();
            for held in &member.orgs {
                let mut rows = desired
                    .iter()
                    .filter(|d| d.user_email.eq_ignore_ascii_case(email) && d.org == held.name)
                    .peekable();

                let reason = if rows.peek().is_none() {
                    RemovalReason::NotDesired
                } else if rows.any(|d| RoleLabel::same(&d.role, &held.role)) {
                    continue;
                } else {
                    RemovalReason::RoleChanged
                };

                debug!(email, org = %held.name, role = %held.role, %reason, "pending removal");
                removals.push(PendingRemoval {
                    user_email: email.to_string(),
                    role: held.role.clone(),
                    org: held.name.clone(),
                    reason,
                });
            }
        }

        removals
    }

    fn managed_members(&self) -> impl Iterator<Item = &'a Member> {
        self.snapshot
            .members()
            .iter()
            .filter(|m| !m.is_group_admin())
    }
}
