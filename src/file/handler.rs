//! Read and change the label and protection of one file
//!
//! Changes are staged on the handler and written by [`FileHandler::commit`];
//! the input is never modified in place.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::LogLevel;
use crate::context::mip_log;
use crate::error::{BadInputCode, MipError, NoPermissionsCategory, Result};
use crate::file::container::{
    AssignmentMethod, Container, LabelMetadata, CONTENT_BITS_ENCRYPT,
};
use crate::file::engine::FileEngine;
use crate::flighting::FlightingFeature;
use crate::policy::Label;
use crate::protection::rights;
use crate::protection::{
    ConsumptionSettings, ProtectionDescriptor, ProtectionDescriptorBuilder, ProtectionHandler,
    PublishingSettings,
};

/// The label on a file and how it got there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLabel {
    pub label: Label,
    pub creation_time: DateTime<Utc>,
    pub assignment_method: AssignmentMethod,
    pub is_protection_applied_from_label: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelingOptions {
    pub assignment_method: AssignmentMethod,
    /// Required when lowering sensitivity under a policy that asks for it
    pub justification_message: Option<String>,
    /// Written to the file metadata next to the label entries
    pub extended_properties: BTreeMap<String, String>,
}

impl LabelingOptions {
    pub fn new(assignment_method: AssignmentMethod) -> Self {
        Self {
            assignment_method,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn justification(mut self, message: impl Into<String>) -> Self {
        self.justification_message = Some(message.into());
        self
    }

    #[must_use]
    pub fn extended_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extended_properties.insert(key.into(), value.into());
        self
    }

    fn has_justification(&self) -> bool {
        self.justification_message
            .as_deref()
            .is_some_and(|j| !j.trim().is_empty())
    }
}

enum ProtectionChange {
    Keep,
    Apply(Arc<ProtectionHandler>),
    Remove,
}

pub struct FileHandler {
    engine: Arc<FileEngine>,
    content_identifier: String,
    input_path: Option<PathBuf>,
    input: Container,
    label: Option<ContentLabel>,
    action_id: Option<String>,
    extended_properties: BTreeMap<String, String>,
    change: ProtectionChange,
    /// Consumption handler of the input, opened on first use
    existing_protection: Mutex<Option<Result<Arc<ProtectionHandler>>>>,
    modified: bool,
}

impl FileHandler {
    pub(crate) fn open(
        engine: Arc<FileEngine>,
        bytes: Vec<u8>,
        input_path: Option<PathBuf>,
        content_identifier: &str,
    ) -> Result<Self> {
        let input = if Container::is_container(&bytes) {
            Container::read(&bytes)?
        } else {
            let mut container = Container::default();
            container.manifest.content_length = bytes.len() as u64;
            container.payload = bytes;
            container
        };
        let label = input.label().map(|metadata| {
            let label = engine
                .get_label_by_id(&metadata.label_id)
                .cloned()
                .unwrap_or_else(|_| Label::new(metadata.label_id.clone(), metadata.name.clone(), 0));
            ContentLabel {
                is_protection_applied_from_label: label.protection.is_some()
                    && metadata.content_bits & CONTENT_BITS_ENCRYPT != 0,
                label,
                creation_time: metadata.set_date,
                assignment_method: metadata.method,
            }
        });
        let action_id = input.label().and_then(|metadata| metadata.action_id);
        Ok(Self {
            engine,
            content_identifier: content_identifier.to_string(),
            input_path,
            input,
            label,
            action_id,
            extended_properties: BTreeMap::new(),
            change: ProtectionChange::Keep,
            existing_protection: Mutex::new(None),
            modified: false,
        })
    }

    /// Whether `bytes` hold a protected container
    pub fn is_protected(bytes: &[u8]) -> bool {
        Container::is_container(bytes)
            && Container::read(bytes).is_ok_and(|container| container.is_protected())
    }

    pub fn is_labeled_or_protected(bytes: &[u8]) -> bool {
        Container::is_container(bytes)
            && Container::read(bytes)
                .is_ok_and(|container| container.is_protected() || container.label().is_some())
    }

    /// Publishing license of a protected container
    pub fn serialized_publishing_license(bytes: &[u8]) -> Result<Vec<u8>> {
        let container = Container::read(bytes)?;
        let license = container
            .manifest
            .publishing_license
            .ok_or_else(|| MipError::bad_input("File is not protected"))?;
        Ok(BASE64.decode(license)?)
    }

    pub fn content_identifier(&self) -> &str {
        &self.content_identifier
    }

    pub fn label(&self) -> Option<&ContentLabel> {
        self.label.as_ref()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Metadata the next commit writes
    pub fn properties(&self) -> Vec<(String, String)> {
        self.output_metadata(self.is_protected_after_commit())
            .into_iter()
            .collect()
    }

    /// Protection as it stands after the staged changes
    pub fn protection(&self) -> Result<Option<Arc<ProtectionHandler>>> {
        match &self.change {
            ProtectionChange::Apply(handler) => Ok(Some(handler.clone())),
            ProtectionChange::Remove => Ok(None),
            ProtectionChange::Keep => self.existing_protection(),
        }
    }

    fn existing_protection(&self) -> Result<Option<Arc<ProtectionHandler>>> {
        let Some(license) = &self.input.manifest.publishing_license else {
            return Ok(None);
        };
        let mut slot = self.existing_protection.lock();
        if slot.is_none() {
            let opened = BASE64.decode(license).map_err(MipError::from).and_then(|pl| {
                self.engine
                    .protection_engine()
                    .create_protection_handler_for_consumption(
                        &ConsumptionSettings::from_license(pl).content_name(self.content_identifier.clone()),
                    )
            });
            *slot = Some(opened);
        }
        match slot.as_ref() {
            Some(Ok(handler)) => Ok(Some(handler.clone())),
            Some(Err(err)) => Err(err.clone()),
            None => Ok(None),
        }
    }

    fn is_protected_after_commit(&self) -> bool {
        match self.change {
            ProtectionChange::Apply(_) => true,
            ProtectionChange::Remove => false,
            ProtectionChange::Keep => self.input.is_protected(),
        }
    }

    /// Content as the current user sees it; needs VIEW on protected input
    pub fn decrypted_bytes(&self) -> Result<Vec<u8>> {
        match self.existing_protection()? {
            Some(handler) => {
                if !handler.access_check(rights::VIEW) {
                    return Err(self.permission_error(&handler, "View"));
                }
                handler.decrypt_content(&self.input.payload)
            }
            None => Ok(self.input.payload.clone()),
        }
    }

    fn permission_error(&self, handler: &ProtectionHandler, action: &str) -> MipError {
        MipError::no_permissions(
            NoPermissionsCategory::AccessDenied,
            format!("{} is not permitted on {}", action, self.content_identifier),
            handler.protection_descriptor().referrer().unwrap_or(""),
            handler.owner(),
        )
    }

    pub fn set_label(&mut self, label_id: &str, options: &LabelingOptions) -> Result<()> {
        let label = self.engine.get_label_by_id(label_id)?.clone();
        if !label.active {
            return Err(MipError::label_disabled(format!("Label {} is disabled", label.id)));
        }
        if let Some(current) = &self.label {
            let same = current.label.id.eq_ignore_ascii_case(&label.id);
            if !same
                && current.assignment_method == AssignmentMethod::Privileged
                && options.assignment_method != AssignmentMethod::Privileged
            {
                return Err(MipError::privileged_required(format!(
                    "Label {} was set with privilege",
                    current.label.id
                )));
            }
            if label.sensitivity < current.label.sensitivity
                && self.engine.policy_engine().is_downgrade_justification_required()
                && !options.has_justification()
            {
                return Err(MipError::justification_required(format!(
                    "Lowering {} to {} needs a justification",
                    current.label.name, label.name
                )));
            }
        }

        let previous_from_label = self
            .label
            .as_ref()
            .is_some_and(|l| l.is_protection_applied_from_label);
        let mut from_label = false;
        if let Some(protection) = &label.protection {
            let builder = match &protection.template_id {
                Some(template_id) => ProtectionDescriptorBuilder::from_template(template_id.clone()),
                None => ProtectionDescriptorBuilder::from_user_rights(protection.rights.clone()),
            };
            self.set_protection(builder.label_id(label.id.clone()).build()?)?;
            from_label = true;
        } else if previous_from_label {
            self.remove_protection()?;
        }

        mip_log!(
            self.engine.context(),
            LogLevel::Info,
            "Labeling {} as {} ({})",
            self.content_identifier,
            label.id,
            options.assignment_method.as_str()
        );
        self.extended_properties
            .extend(options.extended_properties.clone());
        self.action_id = self
            .engine
            .context()
            .is_feature_enabled(FlightingFeature::EnableActionIdForV0Metadata)
            .then(|| Uuid::new_v4().to_string());
        self.label = Some(ContentLabel {
            label,
            creation_time: Utc::now(),
            assignment_method: options.assignment_method,
            is_protection_applied_from_label: from_label,
        });
        self.modified = true;
        Ok(())
    }

    pub fn delete_label(&mut self, options: &LabelingOptions) -> Result<()> {
        let Some(current) = &self.label else {
            return Ok(());
        };
        if current.assignment_method == AssignmentMethod::Privileged
            && options.assignment_method != AssignmentMethod::Privileged
        {
            return Err(MipError::privileged_required(format!(
                "Label {} was set with privilege",
                current.label.id
            )));
        }
        if self.engine.policy_engine().is_downgrade_justification_required() && !options.has_justification() {
            return Err(MipError::justification_required(format!(
                "Removing {} needs a justification",
                current.label.name
            )));
        }
        if current.is_protection_applied_from_label {
            self.remove_protection()?;
        }
        self.label = None;
        self.action_id = None;
        self.modified = true;
        Ok(())
    }

    /// Stage protection with `descriptor`; protected input is republished
    pub fn set_protection(&mut self, descriptor: ProtectionDescriptor) -> Result<()> {
        let size = self.input.manifest.content_length.max(if self.input.is_protected() {
            0
        } else {
            self.input.payload.len() as u64
        });
        let limit = self.engine.max_file_size_for_protection();
        if size > limit {
            return Err(MipError::bad_input_with_code(
                format!("{} bytes exceeds the protection limit of {} bytes", size, limit),
                BadInputCode::FileIsTooLargeForProtection,
            ));
        }
        let mut settings = PublishingSettings::new(descriptor);
        if let Some(existing) = self.existing_protection()? {
            settings = settings.republish(existing.serialized_publishing_license().to_vec());
        }
        let handler = self
            .engine
            .protection_engine()
            .create_protection_handler_for_publishing(&settings)?;
        self.change = ProtectionChange::Apply(handler);
        self.modified = true;
        Ok(())
    }

    /// Stage removal; needs EXPORT or EXTRACT on protected input
    pub fn remove_protection(&mut self) -> Result<()> {
        if let Some(existing) = self.existing_protection()? {
            if !existing.access_check(rights::EXPORT) && !existing.access_check(rights::EXTRACT) {
                return Err(self.permission_error(&existing, "Removing protection"));
            }
            self.change = ProtectionChange::Remove;
        } else {
            self.change = ProtectionChange::Keep;
        }
        if let Some(label) = &mut self.label {
            label.is_protection_applied_from_label = false;
        }
        self.modified = true;
        Ok(())
    }

    fn output_metadata(&self, protected: bool) -> BTreeMap<String, String> {
        let mut metadata = self.input.manifest.metadata.clone();
        LabelMetadata::clear(&mut metadata);
        metadata.extend(self.extended_properties.clone());
        if let Some(label) = &self.label {
            LabelMetadata {
                label_id: label.label.id.clone(),
                name: label.label.name.clone(),
                site_id: self.engine.tenant_id().to_string(),
                set_date: label.creation_time,
                method: label.assignment_method,
                content_bits: if protected { CONTENT_BITS_ENCRYPT } else { 0 },
                action_id: self.action_id.clone(),
            }
            .write_to(&mut metadata);
        }
        metadata
    }

    /// Serialized output with the staged changes applied
    fn build_output(&self) -> Result<Vec<u8>> {
        let mut output = Container::default();
        match &self.change {
            ProtectionChange::Keep => {
                output.manifest.publishing_license = self.input.manifest.publishing_license.clone();
                output.manifest.content_length = self.input.manifest.content_length;
                output.payload = self.input.payload.clone();
            }
            ProtectionChange::Apply(handler) => {
                let plaintext = self.decrypted_bytes()?;
                output.manifest.publishing_license =
                    Some(BASE64.encode(handler.serialized_publishing_license()));
                output.manifest.content_length = plaintext.len() as u64;
                output.payload = handler.encrypt_content(&plaintext)?;
            }
            ProtectionChange::Remove => {
                output.payload = self.decrypted_bytes()?;
                output.manifest.content_length = output.payload.len() as u64;
            }
        }
        output.manifest.metadata = self.output_metadata(output.is_protected());
        if !output.is_protected() && output.manifest.metadata.is_empty() {
            return Ok(output.payload);
        }
        Ok(output.write()?)
    }

    /// Write the changed file to `output_path`; `false` when nothing changed
    pub fn commit(&mut self, output_path: impl AsRef<Path>) -> Result<bool> {
        let output_path = output_path.as_ref();
        if let Some(input_path) = self.input_path.as_deref() {
            if is_same_file(input_path, output_path) {
                return Err(MipError::bad_input("Output path must differ from the input path"));
            }
        }
        if !self.modified {
            return Ok(false);
        }
        let bytes = self.build_output()?;
        let dir = match output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(&bytes)?;
        temp.persist(output_path)
            .map_err(|e| MipError::file_io(format!("Failed to write {}: {}", output_path.display(), e)))?;
        self.committed(output_path.display().to_string());
        Ok(true)
    }

    /// Write the changed file to `writer`; `false` when nothing changed
    pub fn commit_to_writer<W: Write>(&mut self, writer: &mut W) -> Result<bool> {
        if !self.modified {
            return Ok(false);
        }
        writer.write_all(&self.build_output()?)?;
        self.committed("stream".to_string());
        Ok(true)
    }

    fn committed(&mut self, destination: String) {
        mip_log!(
            self.engine.context(),
            LogLevel::Info,
            "Committed {} to {}",
            self.content_identifier,
            destination
        );
        self.modified = false;
    }
}

impl std::fmt::Debug for FileHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandler")
            .field("content_identifier", &self.content_identifier)
            .field("label", &self.label.as_ref().map(|l| &l.label.id))
            .field("is_protected", &self.input.is_protected())
            .field("modified", &self.modified)
            .finish()
    }
}

/// Equal paths, or two existing paths that resolve to the same file
fn is_same_file(input: &Path, output: &Path) -> bool {
    if input == output {
        return true;
    }
    match (std::fs::canonicalize(input), std::fs::canonicalize(output)) {
        (Ok(input), Ok(output)) => input == output,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_of_one_file_are_the_same() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("report.docx");
        std::fs::write(&input, b"x")?;
        std::fs::create_dir(dir.path().join("sub"))?;

        assert!(is_same_file(&input, &input));
        assert!(is_same_file(&input, &dir.path().join("sub/../report.docx")));
        assert!(is_same_file(&input, &dir.path().join(".").join("report.docx")));
        assert!(!is_same_file(&input, &dir.path().join("report.protected.docx")));
        Ok(())
    }
}
