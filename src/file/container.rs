//! On-disk layout of labeled and protected files
//!
//! A container is a ZIP archive with two stored entries: `manifest.json`,
//! holding label metadata and the base64 publishing license, and `payload`,
//! holding the content (ciphertext when a license is present).

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::MipError;

pub const MANIFEST_ENTRY: &str = "manifest.json";
pub const PAYLOAD_ENTRY: &str = "payload";
pub const CONTAINER_VERSION: u32 = 1;

const LABEL_PREFIX: &str = "MSIP_Label_";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// `ContentBits` flag recorded when the content is encrypted
pub const CONTENT_BITS_ENCRYPT: u32 = 0x8;

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid container structure: {0}")]
    Structure(String),
    #[error("Unsupported container version {0}")]
    Version(u32),
}

impl From<ContainerError> for MipError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::Io(e) => MipError::file_io(e.to_string()),
            ContainerError::Version(v) => {
                MipError::content_format_not_supported(format!("Unsupported container version {}", v))
            }
            other => MipError::bad_input(other.to_string()),
        }
    }
}

/// How a label was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AssignmentMethod {
    #[default]
    Standard,
    /// Set by an administrator or user decision; only privileged operations replace it
    Privileged,
    Auto,
}

impl AssignmentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentMethod::Standard => "Standard",
            AssignmentMethod::Privileged => "Privileged",
            AssignmentMethod::Auto => "Auto",
        }
    }
}

impl FromStr for AssignmentMethod {
    type Err = MipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            AssignmentMethod::Standard,
            AssignmentMethod::Privileged,
            AssignmentMethod::Auto,
        ]
        .into_iter()
        .find(|m| m.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| MipError::bad_input(format!("Unknown assignment method: {}", s)))
    }
}

/// Label entries of a container's metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMetadata {
    pub label_id: String,
    pub name: String,
    pub site_id: String,
    pub set_date: DateTime<Utc>,
    pub method: AssignmentMethod,
    pub content_bits: u32,
    pub action_id: Option<String>,
}

impl LabelMetadata {
    fn key(label_id: &str, field: &str) -> String {
        format!("{}{}_{}", LABEL_PREFIX, label_id, field)
    }

    /// Append this label's `MSIP_Label_<id>_*` entries
    pub fn write_to(&self, metadata: &mut BTreeMap<String, String>) {
        let id = self.label_id.as_str();
        metadata.insert(Self::key(id, "Enabled"), "true".to_string());
        metadata.insert(Self::key(id, "SetDate"), self.set_date.to_rfc3339());
        metadata.insert(Self::key(id, "Method"), self.method.as_str().to_string());
        metadata.insert(Self::key(id, "Name"), self.name.clone());
        metadata.insert(Self::key(id, "SiteId"), self.site_id.clone());
        metadata.insert(Self::key(id, "ContentBits"), self.content_bits.to_string());
        if let Some(action_id) = &self.action_id {
            metadata.insert(Self::key(id, "ActionId"), action_id.clone());
        }
    }

    /// The enabled label recorded in `metadata`, if any
    pub fn read_from(metadata: &BTreeMap<String, String>) -> Option<Self> {
        let label_id = metadata.iter().find_map(|(key, value)| {
            key.strip_prefix(LABEL_PREFIX)
                .and_then(|rest| rest.strip_suffix("_Enabled"))
                .filter(|_| value.eq_ignore_ascii_case("true"))
        })?;
        let field = |name: &str| metadata.get(&Self::key(label_id, name));
        Some(Self {
            label_id: label_id.to_string(),
            name: field("Name").cloned().unwrap_or_default(),
            site_id: field("SiteId").cloned().unwrap_or_default(),
            set_date: field("SetDate")
                .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
            method: field("Method")
                .and_then(|m| m.parse().ok())
                .unwrap_or_default(),
            content_bits: field("ContentBits")
                .and_then(|b| b.parse().ok())
                .unwrap_or(0),
            action_id: field("ActionId").cloned(),
        })
    }

    /// Drop every `MSIP_Label_*` entry
    pub fn clear(metadata: &mut BTreeMap<String, String>) {
        metadata.retain(|key, _| !key.starts_with(LABEL_PREFIX));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    pub version: u32,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Base64 of the serialized publishing license
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publishing_license: Option<String>,
    /// Length of the unprotected content
    #[serde(default)]
    pub content_length: u64,
}

impl Default for FileManifest {
    fn default() -> Self {
        Self {
            version: CONTAINER_VERSION,
            metadata: BTreeMap::new(),
            publishing_license: None,
            content_length: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Container {
    pub manifest: FileManifest,
    pub payload: Vec<u8>,
}

impl Container {
    /// Cheap check for the container layout; does not validate the manifest
    pub fn is_container(bytes: &[u8]) -> bool {
        bytes.starts_with(ZIP_MAGIC)
            && ZipArchive::new(Cursor::new(bytes))
                .map(|archive| archive.file_names().any(|name| name == MANIFEST_ENTRY))
                .unwrap_or(false)
    }

    pub fn read(bytes: &[u8]) -> Result<Self, ContainerError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let manifest: FileManifest = {
            let mut entry = archive.by_name(MANIFEST_ENTRY).map_err(|_| {
                ContainerError::Structure(format!("Missing {}", MANIFEST_ENTRY))
            })?;
            let mut json = String::new();
            entry.read_to_string(&mut json)?;
            serde_json::from_str(&json)?
        };
        if manifest.version != CONTAINER_VERSION {
            return Err(ContainerError::Version(manifest.version));
        }
        let payload = {
            let mut entry = archive.by_name(PAYLOAD_ENTRY).map_err(|_| {
                ContainerError::Structure(format!("Missing {}", PAYLOAD_ENTRY))
            })?;
            let mut payload = Vec::new();
            entry.read_to_end(&mut payload)?;
            payload
        };
        Ok(Self { manifest, payload })
    }

    pub fn write(&self) -> Result<Vec<u8>, ContainerError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file::<_, ()>(
            MANIFEST_ENTRY,
            FileOptions::default().compression_method(zip::CompressionMethod::Stored),
        )?;
        writer.write_all(serde_json::to_string_pretty(&self.manifest)?.as_bytes())?;
        writer.start_file::<_, ()>(
            PAYLOAD_ENTRY,
            FileOptions::default().compression_method(zip::CompressionMethod::Stored),
        )?;
        writer.write_all(&self.payload)?;
        Ok(writer.finish()?.into_inner())
    }

    pub fn label(&self) -> Option<LabelMetadata> {
        LabelMetadata::read_from(&self.manifest.metadata)
    }

    pub fn is_protected(&self) -> bool {
        self.manifest.publishing_license.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn label() -> LabelMetadata {
        LabelMetadata {
            label_id: "3f7c".to_string(),
            name: "Confidential".to_string(),
            site_id: "contoso.com".to_string(),
            set_date: Utc::now(),
            method: AssignmentMethod::Privileged,
            content_bits: CONTENT_BITS_ENCRYPT,
            action_id: None,
        }
    }

    #[test]
    fn test_container_layout() -> Result<(), ContainerError> {
        let mut container = Container {
            payload: b"ciphertext".to_vec(),
            ..Default::default()
        };
        container.manifest.publishing_license = Some("PEw+".to_string());
        label().write_to(&mut container.manifest.metadata);

        let bytes = container.write()?;
        assert!(Container::is_container(&bytes));
        assert!(!Container::is_container(b"PK\x03\x04 but not a zip"));
        assert!(!Container::is_container(b"plain text"));

        let read = Container::read(&bytes)?;
        assert_eq!(read, container);
        assert!(read.is_protected());
        let metadata = read.label().ok_or_else(|| ContainerError::Structure("no label".into()))?;
        assert_eq!(metadata.label_id, "3f7c");
        assert_eq!(metadata.method, AssignmentMethod::Privileged);
        assert_eq!(metadata.content_bits, CONTENT_BITS_ENCRYPT);
        Ok(())
    }

    #[test]
    fn test_metadata_keys() {
        let mut metadata = BTreeMap::new();
        label().write_to(&mut metadata);
        assert_eq!(metadata.get("MSIP_Label_3f7c_Enabled").map(String::as_str), Some("true"));
        assert_eq!(metadata.get("MSIP_Label_3f7c_Method").map(String::as_str), Some("Privileged"));
        metadata.insert("Author".to_string(), "alice".to_string());

        LabelMetadata::clear(&mut metadata);
        assert_eq!(metadata.len(), 1);
        assert!(LabelMetadata::read_from(&metadata).is_none());
    }

    #[test]
    fn test_errors_convert() -> Result<(), ContainerError> {
        let container = Container {
            manifest: FileManifest {
                version: 9,
                ..Default::default()
            },
            payload: Vec::new(),
        };
        let err: MipError = Container::read(&container.write()?).unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::ContentFormatNotSupported);

        let err: MipError = Container::read(b"not a zip").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::BadInput);
        Ok(())
    }
}
