//! Shared fixtures for the integration tests: an in-memory directory that
//! serves scripted snapshot data and records every request it receives.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use membersync_core::directory::{ApiSurface, DirectoryRequest, DirectoryTransport, Verb};
use membersync_core::errors::DirectoryError;
use membersync_core::models::DesiredMembership;

pub const GROUP_ID: &str = "g-acme";
pub const GROUP_NAME: &str = "Acme Group";

// ===========================================================================
// Fake directory
// ===========================================================================

#[derive(Default)]
pub struct FakeDirectory {
    members: Vec<Value>,
    orgs: Vec<Value>,
    roles: Vec<Value>,
    invites: HashMap<String, Vec<Value>>,
    provisions: HashMap<String, Vec<Value>>,
    failing: HashSet<String>,
    mutation_delay: Duration,
    calls: Mutex<Vec<DirectoryRequest>>,
}

impl FakeDirectory {
    /// Directory with the two default roles and the `Acme` / `Beta` orgs.
    pub fn new() -> Self {
        Self::default()
            .with_org("o-acme", "Acme")
            .with_org("o-beta", "Beta")
            .with_role("Org Admin", "id-org-admin")
            .with_role("Org Collaborator", "id-org-collab")
    }

    pub fn with_member(mut self, id: &str, email: &str, group_role: Option<&str>, orgs: &[(&str, &str)]) -> Self {
        let orgs: Vec<Value> = orgs
            .iter()
            .map(|(name, role)| json!({ "name": name, "role": role }))
            .collect();
        self.members.push(json!({
            "id": id,
            "email": email,
            "groupRole": group_role,
            "orgs": orgs,
        }));
        self
    }

    pub fn with_org(mut self, id: &str, name: &str) -> Self {
        self.orgs.push(json!({ "id": id, "name": name }));
        self
    }

    pub fn with_role(mut self, name: &str, public_id: &str) -> Self {
        self.roles.push(json!({ "name": name, "publicId": public_id }));
        self
    }

    pub fn with_invite(mut self, org_id: &str, email: &str) -> Self {
        self.invites.entry(org_id.to_string()).or_default().push(json!({
            "id": format!("inv-{}", email),
            "type": "org_invitation",
            "attributes": { "email": email, "role": "id-org-collab" },
            "relationships": { "org": { "data": { "id": org_id, "type": "org" } } }
        }));
        self
    }

    pub fn with_provision(mut self, org_id: &str, email: &str) -> Self {
        self.provisions
            .entry(org_id.to_string())
            .or_default()
            .push(json!({ "email": email, "role": "collaborator" }));
        self
    }

    /// Requests whose path contains `fragment` fail with HTTP 500.
    pub fn failing(mut self, fragment: &str) -> Self {
        self.failing.insert(fragment.to_string());
        self
    }

    pub fn with_mutation_delay(mut self, delay: Duration) -> Self {
        self.mutation_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<DirectoryRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Mutating requests in completion order.
    pub fn mutations(&self) -> Vec<DirectoryRequest> {
        self.calls()
            .into_iter()
            .filter(|r| r.verb.is_mutating())
            .collect()
    }

    fn read(&self, request: &DirectoryRequest) -> Value {
        let path = request.path.as_str();
        if path == format!("/group/{}/members", GROUP_ID) {
            return Value::Array(self.members.clone());
        }
        if path == "/orgs" {
            return json!({ "orgs": self.orgs });
        }
        if path == format!("/group/{}/roles", GROUP_ID) {
            return Value::Array(self.roles.clone());
        }
        if request.api == ApiSurface::Rest {
            if let Some(org_id) = path
                .strip_prefix("/orgs/")
                .and_then(|rest| rest.split('/').next())
            {
                let data = self.invites.get(org_id).cloned().unwrap_or_default();
                return json!({ "data": data });
            }
        }
        if let Some(org_id) = path
            .strip_prefix("/org/")
            .and_then(|rest| rest.strip_suffix("/provision"))
        {
            return Value::Array(self.provisions.get(org_id).cloned().unwrap_or_default());
        }
        Value::Null
    }
}

#[async_trait]
impl DirectoryTransport for FakeDirectory {
    async fn request(&self, request: &DirectoryRequest) -> Result<Value, DirectoryError> {
        if request.verb != Verb::Get && !self.mutation_delay.is_zero() {
            tokio::time::sleep(self.mutation_delay).await;
        }
        self.calls.lock().unwrap().push(request.clone());

        if self.failing.iter().any(|f| request.path.contains(f.as_str())) {
            return Err(DirectoryError::ApiError {
                status: 500,
                message: format!("scripted failure for {}", request.path),
            });
        }
        if request.verb.is_mutating() {
            return Ok(json!({}));
        }
        Ok(self.read(request))
    }
}

// ===========================================================================
// Helpers
// ===========================================================================

pub fn row(email: &str, org: &str, role: &str) -> DesiredMembership {
    DesiredMembership::new(email, org, role, GROUP_NAME)
}
