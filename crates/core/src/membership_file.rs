//! Loader for the desired-membership JSON file.
//!
//! ```json
//! { "members": [
//!     { "userEmail": "bob@acme.com", "org": "Acme", "role": "Admin", "group": "Acme Group" }
//! ] }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{labels_match, GroupConfig};
use crate::errors::MembershipFileError;
use crate::models::DesiredMembership;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MembershipFile {
    #[serde(default)]
    pub members: Vec<DesiredMembership>,
}

impl MembershipFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MembershipFileError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading membership file");

        if !path.exists() {
            return Err(MembershipFileError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let file: MembershipFile =
            serde_json::from_str(&contents).map_err(|e| MembershipFileError::ParseError {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?;

        debug!(rows = file.members.len(), "membership file parsed");
        Ok(file)
    }

    /// Rows whose `group` label refers to `group`.
    pub fn rows_for_group(&self, group: &GroupConfig) -> Vec<DesiredMembership> {
        let rows: Vec<DesiredMembership> = self
            .members
            .iter()
            .filter(|m| group.matches_label(&m.group))
            .cloned()
            .collect();
        debug!(group = %group.name, rows = rows.len(), "membership rows selected");
        rows
    }

    /// Distinct group labels in first-seen order.
    pub fn group_labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = Vec::new();
        for m in &self.members {
            let label = m.group.trim();
            if !labels.iter().any(|l| labels_match(l, label)) {
                labels.push(label);
            }
        }
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn group(name: &str) -> GroupConfig {
        GroupConfig {
            name: name.into(),
            id: "g1".into(),
            token_env: "TOKEN".into(),
            token: None,
        }
    }

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(contents.as_bytes()).unwrap();
        tmp
    }

    #[test]
    fn test_load_membership_file() {
        let tmp = write_file(
            r#"{ "members": [
                { "userEmail": "bob@acme.com", "org": "Acme", "role": "Admin", "group": "Acme Group" },
                { "userEmail": "eve@acme.com", "org": "Beta", "role": "Collaborator", "group": "acme group " },
                { "userEmail": "zed@other.com", "org": "Zeta", "role": "Admin", "group": "Other" }
            ] }"#,
        );
        let file = MembershipFile::load(tmp.path()).unwrap();
        assert_eq!(file.members.len(), 3);
        assert_eq!(file.members[0].user_email, "bob@acme.com");

        let rows = file.rows_for_group(&group("ACME GROUP"));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].org, "Beta");

        assert_eq!(file.group_labels(), vec!["Acme Group", "Other"]);
        assert!(file.rows_for_group(&group("Missing")).is_empty());
    }

    #[test]
    fn test_missing_group_field_defaults_to_empty() {
        let tmp = write_file(r#"{ "members": [ { "userEmail": "a@b.co", "org": "O", "role": "r" } ] }"#);
        let file = MembershipFile::load(tmp.path()).unwrap();
        assert_eq!(file.members[0].group, "");
    }

    #[test]
    fn test_load_missing_file() {
        let result = MembershipFile::load("/nonexistent/memberships.json");
        assert!(matches!(result, Err(MembershipFileError::FileNotFound(_))));
    }

    #[test]
    fn test_load_invalid_json() {
        let tmp = write_file("{ not json");
        let result = MembershipFile::load(tmp.path());
        assert!(matches!(result, Err(MembershipFileError::ParseError { .. })));
    }
}
