//! Translation of human role labels into directory role identifiers.
//!
//! Labels are compared upper-cased. `ADMIN` and `COLLABORATOR` are special:
//! when the group does not define a role with that literal name, the label
//! falls back to the directory's built-in `ORG ADMIN` / `ORG COLLABORATOR`
//! role. When the group *does* define one, the custom role shadows the
//! default and the resolver remembers that it did.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::ReconcileError;
use crate::models::Role;

/// An upper-cased role label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleLabel {
    Admin,
    Collaborator,
    Custom(String),
}

impl RoleLabel {
    pub fn parse(label: &str) -> Self {
        let upper = label.trim().to_uppercase();
        match upper.as_str() {
            "ADMIN" => Self::Admin,
            "COLLABORATOR" => Self::Collaborator,
            _ => Self::Custom(upper),
        }
    }

    /// Two labels name the same role once trimmed and case-folded.
    pub fn same(a: &str, b: &str) -> bool {
        Self::parse(a) == Self::parse(b)
    }
}

impl std::fmt::Display for RoleLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Admin => write!(f, "ADMIN"),
            Self::Collaborator => write!(f, "COLLABORATOR"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Labels that fall back to a built-in directory role when the group does
/// not define a role of the same name.
pub const DEFAULT_ROLE_ALIASES: [(RoleLabel, &str); 2] = [
    (RoleLabel::Admin, "ORG ADMIN"),
    (RoleLabel::Collaborator, "ORG COLLABORATOR"),
];

/// Maps role labels to role public ids for a single group.
#[derive(Debug, Clone, Default)]
pub struct RoleResolver {
    ids: HashMap<RoleLabel, String>,
    custom_admin_exists: bool,
    custom_collaborator_exists: bool,
}

impl RoleResolver {
    pub fn new(roles: &[Role]) -> Self {
        let mut ids = HashMap::new();
        for role in roles {
            ids.insert(RoleLabel::parse(&role.name), role.public_id.clone());
        }

        let mut resolver = Self {
            custom_admin_exists: ids.contains_key(&RoleLabel::Admin),
            custom_collaborator_exists: ids.contains_key(&RoleLabel::Collaborator),
            ids,
        };

        for (label, default_name) in &DEFAULT_ROLE_ALIASES {
            if resolver.ids.contains_key(label) {
                continue;
            }
            let default = RoleLabel::Custom((*default_name).to_string());
            match resolver.ids.get(&default).cloned() {
                Some(id) => {
                    debug!(label = %label, default = default_name, "aliasing label to default role");
                    resolver.ids.insert(label.clone(), id);
                }
                None => warn!(label = %label, default = default_name, "default role missing from group"),
            }
        }

        resolver
    }

    /// Resolve a label to its role public id.
    pub fn resolve(&self, label: &str) -> Result<&str, ReconcileError> {
        self.ids
            .get(&RoleLabel::parse(label))
            .map(String::as_str)
            .ok_or_else(|| ReconcileError::InvalidRole(label.to_string()))
    }

    /// A role literally named `Admin` exists on the group.
    pub fn custom_admin_exists(&self) -> bool {
        self.custom_admin_exists
    }

    /// A role literally named `Collaborator` exists on the group.
    pub fn custom_collaborator_exists(&self) -> bool {
        self.custom_collaborator_exists
    }

    /// Whether `label` names a default role that a custom role of the same
    /// name shadows. A literal match against such a label is a match against
    /// the default role, not the custom one.
    pub fn is_shadowed(&self, label: &str) -> bool {
        match RoleLabel::parse(label) {
            RoleLabel::Admin => self.custom_admin_exists,
            RoleLabel::Collaborator => self.custom_collaborator_exists,
            RoleLabel::Custom(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str, id: &str) -> Role {
        Role {
            name: name.into(),
            public_id: id.into(),
            description: None,
        }
    }

    fn default_roles() -> Vec<Role> {
        vec![
            role("Org Admin", "id-org-admin"),
            role("Org Collaborator", "id-org-collab"),
        ]
    }

    #[test]
    fn test_role_label_parse() {
        assert_eq!(RoleLabel::parse("admin"), RoleLabel::Admin);
        assert_eq!(RoleLabel::parse(" Collaborator "), RoleLabel::Collaborator);
        assert_eq!(
            RoleLabel::parse("Org Admin"),
            RoleLabel::Custom("ORG ADMIN".into())
        );
        assert_eq!(RoleLabel::parse("security lead").to_string(), "SECURITY LEAD");
    }

    #[test]
    fn test_same_role_ignores_case_and_padding() {
        assert!(RoleLabel::same(" admin ", "ADMIN"));
        assert!(RoleLabel::same("Security Lead", "security lead "));
        assert!(!RoleLabel::same("admin", "collaborator"));
    }

    #[test]
    fn test_defaults_are_aliased() {
        let resolver = RoleResolver::new(&default_roles());
        assert_eq!(resolver.resolve("ADMIN").unwrap(), "id-org-admin");
        assert_eq!(resolver.resolve("collaborator").unwrap(), "id-org-collab");
        assert_eq!(resolver.resolve("org admin").unwrap(), "id-org-admin");
        assert!(!resolver.custom_admin_exists());
        assert!(!resolver.custom_collaborator_exists());
        assert!(!resolver.is_shadowed("admin"));
    }

    #[test]
    fn test_custom_admin_shadows_default() {
        let mut roles = default_roles();
        roles.push(role("Admin", "id-custom-admin"));
        let resolver = RoleResolver::new(&roles);

        assert_eq!(resolver.resolve("admin").unwrap(), "id-custom-admin");
        assert_eq!(resolver.resolve("Org Admin").unwrap(), "id-org-admin");
        assert!(resolver.custom_admin_exists());
        assert!(!resolver.custom_collaborator_exists());
        assert!(resolver.is_shadowed("ADMIN"));
        assert!(!resolver.is_shadowed("collaborator"));
    }

    #[test]
    fn test_custom_roles_resolve_by_name() {
        let mut roles = default_roles();
        roles.push(role("Security Lead", "id-sec-lead"));
        let resolver = RoleResolver::new(&roles);
        assert_eq!(resolver.resolve("security lead").unwrap(), "id-sec-lead");
    }

    #[test]
    fn test_unknown_label_is_invalid_role() {
        let resolver = RoleResolver::new(&default_roles());
        assert_eq!(
            resolver.resolve("owner"),
            Err(ReconcileError::InvalidRole("owner".into()))
        );
    }

    #[test]
    fn test_missing_defaults_leave_label_unmapped() {
        let resolver = RoleResolver::new(&[]);
        assert!(matches!(
            resolver.resolve("admin"),
            Err(ReconcileError::InvalidRole(_))
        ));
    }
}
