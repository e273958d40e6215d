//! Sensitivity labels and the policy document that defines them
//!
//! A policy is a JSON document:
//!
//! ```json
//! {
//!   "labels": [
//!     { "id": "general", "name": "General", "sensitivity": 1 },
//!     { "id": "secret", "name": "Secret", "sensitivity": 3,
//!       "protection": { "template_id": "tpl-secret" },
//!       "children": [ { "id": "secret-legal", "name": "Legal", "sensitivity": 4 } ] }
//!   ],
//!   "default_label_id": "general",
//!   "is_labeling_required": false,
//!   "more_info_url": "https://contoso.example/labels"
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{MipError, Result};
use crate::protection::UserRights;

fn default_true() -> bool {
    true
}

/// Protection a label applies
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabelProtection {
    #[serde(default)]
    pub template_id: Option<String>,
    /// Ad-hoc rights, used when no template is named
    #[serde(default)]
    pub rights: Vec<UserRights>,
}

impl LabelProtection {
    pub fn is_adhoc(&self) -> bool {
        self.template_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Higher is more sensitive
    #[serde(default)]
    pub sensitivity: i32,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub tooltip: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Set when the policy is loaded
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub children: Vec<Label>,
    #[serde(default)]
    pub protection: Option<LabelProtection>,
    #[serde(default)]
    pub custom_settings: BTreeMap<String, String>,
}

impl Label {
    pub fn new(id: impl Into<String>, name: impl Into<String>, sensitivity: i32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            sensitivity,
            color: String::new(),
            tooltip: String::new(),
            active: true,
            parent_id: None,
            children: Vec::new(),
            protection: None,
            custom_settings: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_child(mut self, child: Label) -> Self {
        self.children.push(child);
        self
    }

    #[must_use]
    pub fn with_protection(mut self, protection: LabelProtection) -> Self {
        self.protection = Some(protection);
        self
    }

    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// This label followed by all of its descendants
    pub fn flatten(&self) -> Vec<&Label> {
        let mut all = vec![self];
        for child in &self.children {
            all.extend(child.flatten());
        }
        all
    }
}

/// A parsed, validated policy
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyData {
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub default_label_id: Option<String>,
    #[serde(default)]
    pub is_labeling_required: bool,
    #[serde(default = "default_true")]
    pub is_downgrade_justification_required: bool,
    #[serde(default)]
    pub more_info_url: String,
    #[serde(default)]
    pub policy_ttl_days: Option<u64>,
}

impl PolicyData {
    pub fn from_json(json: &str) -> Result<Self> {
        let mut policy: PolicyData = serde_json::from_str(json)?;
        policy.link_parents();
        policy.validate()?;
        Ok(policy)
    }

    fn link_parents(&mut self) {
        fn link(label: &mut Label, parent: Option<&str>) {
            label.parent_id = parent.map(str::to_string);
            let id = label.id.clone();
            for child in &mut label.children {
                link(child, Some(&id));
            }
        }
        for label in &mut self.labels {
            link(label, None);
        }
    }

    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for label in self.all_labels() {
            if label.id.trim().is_empty() {
                return Err(MipError::bad_input("Label ids must not be empty"));
            }
            if !seen.insert(label.id.to_ascii_lowercase()) {
                return Err(MipError::bad_input(format!("Duplicate label id {}", label.id)));
            }
        }
        if let Some(default) = &self.default_label_id {
            if self.find(default).is_none() {
                return Err(MipError::bad_input(format!(
                    "Default label {} is not part of the policy",
                    default
                )));
            }
        }
        Ok(())
    }

    /// Every label of the policy, parents before children
    pub fn all_labels(&self) -> Vec<&Label> {
        self.labels.iter().flat_map(Label::flatten).collect()
    }

    pub fn find(&self, label_id: &str) -> Option<&Label> {
        self.all_labels()
            .into_iter()
            .find(|l| l.id.eq_ignore_ascii_case(label_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const POLICY: &str = r#"{
        "labels": [
            { "id": "general", "name": "General", "sensitivity": 1 },
            { "id": "secret", "name": "Secret", "sensitivity": 3,
              "protection": { "template_id": "tpl-secret" },
              "children": [ { "id": "secret-legal", "name": "Legal", "sensitivity": 4, "active": false } ] }
        ],
        "default_label_id": "general"
    }"#;

    #[test]
    fn test_parse_links_children_to_parents() -> Result<()> {
        let policy = PolicyData::from_json(POLICY)?;
        assert_eq!(policy.all_labels().len(), 3);
        let legal = policy.find("SECRET-LEGAL").ok_or_else(|| MipError::internal("missing"))?;
        assert_eq!(legal.parent_id.as_deref(), Some("secret"));
        assert!(!legal.active);
        assert!(policy.is_downgrade_justification_required);
        let secret = policy.find("secret").ok_or_else(|| MipError::internal("missing"))?;
        assert_eq!(
            secret.protection.as_ref().and_then(|p| p.template_id.as_deref()),
            Some("tpl-secret")
        );
        Ok(())
    }

    #[test]
    fn test_invalid_policies_are_rejected() {
        let duplicate = r#"{"labels":[{"id":"a","name":"A"},{"id":"A","name":"B"}]}"#;
        assert_eq!(PolicyData::from_json(duplicate).unwrap_err().kind(), ErrorKind::BadInput);

        let bad_default = r#"{"labels":[{"id":"a","name":"A"}],"default_label_id":"b"}"#;
        assert_eq!(PolicyData::from_json(bad_default).unwrap_err().kind(), ErrorKind::BadInput);

        assert_eq!(PolicyData::from_json("not json").unwrap_err().kind(), ErrorKind::BadInput);
    }
}
