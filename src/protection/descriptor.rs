//! What protection to apply: a template reference or an explicit rights list
//!
//! # Example
//!
//! ```
//! use infoprotect::{ProtectionDescriptorBuilder, UserRights};
//!
//! # fn example() -> infoprotect::Result<()> {
//! let descriptor = ProtectionDescriptorBuilder::from_user_rights(vec![
//!     UserRights::new(["bob@contoso.com"], ["VIEW", "PRINT"]),
//!     UserRights::new(["fabrikam.com"], ["VIEW"]),
//! ])
//! .name("Project X")
//! .allow_offline_access(true)
//! .build()?;
//! assert_eq!(descriptor.rights_for("Bob@Contoso.com"), vec!["PRINT", "VIEW"]);
//! assert_eq!(descriptor.rights_for("carol@fabrikam.com"), vec!["VIEW"]);
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delegates::email_domain;
use crate::error::{MipError, Result};
use crate::protection::rights::{self, Role, ANYONE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProtectionType {
    TemplateBased,
    #[default]
    Custom,
}

/// Rights granted to a set of users or domains
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserRights {
    pub users: Vec<String>,
    pub rights: Vec<String>,
}

impl UserRights {
    pub fn new<U, R>(users: U, rights: R) -> Self
    where
        U: IntoIterator,
        U::Item: Into<String>,
        R: IntoIterator,
        R::Item: AsRef<str>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
            rights: rights::normalize_all(rights),
        }
    }
}

/// Roles granted to a set of users or domains
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserRoles {
    pub users: Vec<String>,
    pub roles: Vec<Role>,
}

impl UserRoles {
    pub fn new<U>(users: U, roles: impl IntoIterator<Item = Role>) -> Self
    where
        U: IntoIterator,
        U::Item: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
            roles: roles.into_iter().collect(),
        }
    }
}

/// True if the principal entry covers `email`: same address, the address's
/// domain (`contoso.com` or `@contoso.com`), or [`ANYONE`]
pub(crate) fn principal_matches(principal: &str, email: &str) -> bool {
    let principal = principal.trim();
    if principal.eq_ignore_ascii_case(ANYONE) || principal.eq_ignore_ascii_case(email.trim()) {
        return true;
    }
    if principal.contains('@') && !principal.starts_with('@') {
        return false;
    }
    let wanted = principal.trim_start_matches('@');
    email_domain(email)
        .map(|domain| domain.eq_ignore_ascii_case(wanted))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProtectionDescriptor {
    protection_type: ProtectionType,
    template_id: Option<String>,
    label_id: Option<String>,
    user_rights: Vec<UserRights>,
    user_roles: Vec<UserRoles>,
    name: String,
    description: String,
    referrer: Option<String>,
    owner: String,
    content_id: Option<String>,
    content_valid_until: Option<DateTime<Utc>>,
    allow_offline_access: bool,
    encrypted_app_data: BTreeMap<String, String>,
    signed_app_data: BTreeMap<String, String>,
    double_key_url: Option<String>,
}

impl ProtectionDescriptor {
    pub fn protection_type(&self) -> ProtectionType {
        self.protection_type
    }

    pub fn template_id(&self) -> Option<&str> {
        self.template_id.as_deref()
    }

    pub fn label_id(&self) -> Option<&str> {
        self.label_id.as_deref()
    }

    pub fn user_rights(&self) -> &[UserRights] {
        &self.user_rights
    }

    pub fn user_roles(&self) -> &[UserRoles] {
        &self.user_roles
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn referrer(&self) -> Option<&str> {
        self.referrer.as_deref()
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    pub fn content_valid_until(&self) -> Option<DateTime<Utc>> {
        self.content_valid_until
    }

    pub fn does_allow_offline_access(&self) -> bool {
        self.allow_offline_access
    }

    pub fn encrypted_app_data(&self) -> &BTreeMap<String, String> {
        &self.encrypted_app_data
    }

    pub fn signed_app_data(&self) -> &BTreeMap<String, String> {
        &self.signed_app_data
    }

    pub fn double_key_url(&self) -> Option<&str> {
        self.double_key_url.as_deref()
    }

    pub fn is_double_key(&self) -> bool {
        self.double_key_url.as_deref().map_or(false, |u| !u.is_empty())
    }

    /// True once `now` is past the content expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.content_valid_until.map_or(false, |until| now > until)
    }

    /// Rights granted to `email` by the rights and roles lists, sorted
    pub fn rights_for(&self, email: &str) -> Vec<String> {
        let mut granted = BTreeSet::new();
        for entry in &self.user_rights {
            if entry.users.iter().any(|u| principal_matches(u, email)) {
                granted.extend(entry.rights.iter().map(|r| rights::normalize(r)));
            }
        }
        for entry in &self.user_roles {
            if entry.users.iter().any(|u| principal_matches(u, email)) {
                for role in &entry.roles {
                    granted.extend(role.rights().iter().map(|r| r.to_string()));
                }
            }
        }
        granted.into_iter().collect()
    }

    pub(crate) fn set_owner(&mut self, owner: &str) {
        self.owner = owner.to_string();
    }

    pub(crate) fn set_content_id(&mut self, content_id: &str) {
        self.content_id = Some(content_id.to_string());
    }

    pub(crate) fn take_encrypted_app_data(&mut self) -> BTreeMap<String, String> {
        std::mem::take(&mut self.encrypted_app_data)
    }

    pub(crate) fn set_encrypted_app_data(&mut self, data: BTreeMap<String, String>) {
        self.encrypted_app_data = data;
    }

    /// Replace a template reference with the template's resolved rights
    pub(crate) fn resolve_template(&mut self, template: &TemplateDescriptor) {
        self.user_rights = template.rights.clone();
        if self.name.is_empty() {
            self.name = template.name.clone();
        }
        if self.description.is_empty() {
            self.description = template.description.clone();
        }
    }
}

/// Builder for [`ProtectionDescriptor`]
#[derive(Debug, Clone, Default)]
pub struct ProtectionDescriptorBuilder {
    descriptor: ProtectionDescriptor,
}

impl ProtectionDescriptorBuilder {
    pub fn from_template(template_id: impl Into<String>) -> Self {
        Self {
            descriptor: ProtectionDescriptor {
                protection_type: ProtectionType::TemplateBased,
                template_id: Some(template_id.into()),
                ..ProtectionDescriptor::default()
            },
        }
    }

    pub fn from_user_rights(user_rights: Vec<UserRights>) -> Self {
        Self {
            descriptor: ProtectionDescriptor {
                user_rights,
                ..ProtectionDescriptor::default()
            },
        }
    }

    pub fn from_user_roles(user_roles: Vec<UserRoles>) -> Self {
        Self {
            descriptor: ProtectionDescriptor {
                user_roles,
                ..ProtectionDescriptor::default()
            },
        }
    }

    /// Start from an existing descriptor, e.g. one read from a license
    pub fn from_descriptor(descriptor: ProtectionDescriptor) -> Self {
        Self { descriptor }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.descriptor.name = name.into();
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = description.into();
        self
    }

    #[must_use]
    pub fn label_id(mut self, label_id: impl Into<String>) -> Self {
        self.descriptor.label_id = Some(label_id.into());
        self
    }

    /// Where users without rights can request access
    #[must_use]
    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.descriptor.referrer = Some(referrer.into());
        self
    }

    #[must_use]
    pub fn content_id(mut self, content_id: impl Into<String>) -> Self {
        self.descriptor.content_id = Some(content_id.into());
        self
    }

    #[must_use]
    pub fn content_valid_until(mut self, until: DateTime<Utc>) -> Self {
        self.descriptor.content_valid_until = Some(until);
        self
    }

    #[must_use]
    pub fn allow_offline_access(mut self, allow: bool) -> Self {
        self.descriptor.allow_offline_access = allow;
        self
    }

    #[must_use]
    pub fn encrypted_app_data(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.descriptor
            .encrypted_app_data
            .insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn signed_app_data(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.descriptor
            .signed_app_data
            .insert(name.into(), value.into());
        self
    }

    /// Double-key protection; requires the DoubleKey feature at publish time
    #[must_use]
    pub fn double_key_url(mut self, url: impl Into<String>) -> Self {
        self.descriptor.double_key_url = Some(url.into());
        self
    }

    pub fn build(self) -> Result<ProtectionDescriptor> {
        let d = self.descriptor;
        match d.protection_type {
            ProtectionType::TemplateBased => {
                if d.template_id.as_deref().map_or(true, |t| t.trim().is_empty()) {
                    return Err(MipError::bad_input("Template id must not be empty"));
                }
            }
            ProtectionType::Custom => {
                if d.user_rights.is_empty() && d.user_roles.is_empty() {
                    return Err(MipError::bad_input(
                        "Custom protection needs at least one user rights or roles entry",
                    ));
                }
                let users = d
                    .user_rights
                    .iter()
                    .map(|e| (&e.users, e.rights.is_empty()))
                    .chain(d.user_roles.iter().map(|e| (&e.users, e.roles.is_empty())));
                for (users, nothing_granted) in users {
                    if users.is_empty() || users.iter().any(|u| u.trim().is_empty()) {
                        return Err(MipError::bad_input("Rights entries need non-empty users"));
                    }
                    if nothing_granted {
                        return Err(MipError::bad_input(
                            "Rights entries must grant at least one right or role",
                        ));
                    }
                }
            }
        }
        Ok(d)
    }
}

/// Entry of an engine's template catalogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub archived: bool,
    pub rights: Vec<UserRights>,
}

impl TemplateDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, rights: Vec<UserRights>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            archived: false,
            rights,
        }
    }

    #[must_use]
    pub fn archived(mut self, archived: bool) -> Self {
        self.archived = archived;
        self
    }
}
