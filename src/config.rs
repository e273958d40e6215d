//! Configuration handed to [`MipContext::create`](crate::MipContext::create)
//!
//! A [`MipConfiguration`] is assembled once with [`MipConfigurationBuilder`]
//! and never mutated afterwards; every profile and engine created from the
//! context reads it through shared references.
//!
//! # Example
//!
//! ```
//! use infoprotect::{ApplicationInfo, FlightingFeature, LogLevel, MipConfiguration};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let app = ApplicationInfo::new("00000000-0000-0000-0000-000000000001", "Sample", "1.0");
//! let config = MipConfiguration::builder(app, "/tmp/mip")
//!     .log_level(LogLevel::Warning)
//!     .feature(FlightingFeature::DoubleKey, true)
//!     .build()?;
//! assert!(config.features().is_enabled(FlightingFeature::DoubleKey));
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::delegates::{
    HttpDelegate, JsonDelegate, LoggerDelegate, StorageDelegate, TaskDispatcherDelegate,
    XmlDelegate,
};
use crate::error::{MipError, Result};
use crate::flighting::{FeatureSettings, FlightingFeature};

/// Identity of the host application
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub application_id: String,
    pub application_name: String,
    pub application_version: String,
}

impl ApplicationInfo {
    pub fn new(
        application_id: impl Into<String>,
        application_name: impl Into<String>,
        application_version: impl Into<String>,
    ) -> Self {
        Self {
            application_id: application_id.into(),
            application_name: application_name.into(),
            application_version: application_version.into(),
        }
    }

    /// Id must be present; name and version must be printable ASCII without `;`
    pub fn validate(&self) -> Result<()> {
        if self.application_id.trim().is_empty() {
            return Err(MipError::bad_input("Application id must not be empty"));
        }
        for (field, value) in [
            ("name", &self.application_name),
            ("version", &self.application_version),
        ] {
            if value.chars().any(|c| !c.is_ascii() || c.is_ascii_control() || c == ';') {
                return Err(MipError::bad_input(format!(
                    "Application {} must be ASCII without ';': {}",
                    field, value
                )));
            }
        }
        Ok(())
    }
}

/// Log severity, ordered from most to least verbose
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum LogLevel {
    Trace,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "Trace",
            LogLevel::Info => "Info",
            LogLevel::Warning => "Warning",
            LogLevel::Error => "Error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Azure cloud an engine talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Cloud {
    #[default]
    Unknown,
    Custom,
    Test,
    Commercial,
    Germany,
    UsDod,
    UsGcc,
    UsGccHigh,
    UsSec,
    UsNat,
    China01,
}

impl Cloud {
    pub fn as_str(self) -> &'static str {
        match self {
            Cloud::Unknown => "Unknown",
            Cloud::Custom => "Custom",
            Cloud::Test => "Test",
            Cloud::Commercial => "Commercial",
            Cloud::Germany => "Germany",
            Cloud::UsDod => "US_DoD",
            Cloud::UsGcc => "US_GCC",
            Cloud::UsGccHigh => "US_GCC_High",
            Cloud::UsSec => "US_Sec",
            Cloud::UsNat => "US_Nat",
            Cloud::China01 => "China_01",
        }
    }

    /// Well-known service base url, if the cloud has one
    pub fn default_endpoint_base_url(self) -> Option<&'static str> {
        match self {
            Cloud::Commercial | Cloud::UsGcc => Some("https://api.aadrm.com"),
            Cloud::Germany => Some("https://api.aadrm.de"),
            Cloud::UsDod | Cloud::UsGccHigh => Some("https://api.aadrm.us"),
            Cloud::China01 => Some("https://api.aadrm.cn"),
            _ => None,
        }
    }
}

impl FromStr for Cloud {
    type Err = MipError;

    fn from_str(s: &str) -> Result<Self> {
        [
            Cloud::Unknown,
            Cloud::Custom,
            Cloud::Test,
            Cloud::Commercial,
            Cloud::Germany,
            Cloud::UsDod,
            Cloud::UsGcc,
            Cloud::UsGccHigh,
            Cloud::UsSec,
            Cloud::UsNat,
            Cloud::China01,
        ]
        .into_iter()
        .find(|c| c.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| MipError::bad_input(format!("Unknown cloud: {}", s)))
    }
}

/// Where a profile keeps its caches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CacheStorageType {
    #[default]
    InMemory,
    OnDisk,
    OnDiskEncrypted,
}

/// Well-known custom setting keys
pub mod custom_settings {
    pub const POLICY_DATA: &str = "policy_data";
    pub const EXPORT_POLICY_FILE: &str = "export_policy_file";
    pub const SENSITIVITY_TYPES_DATA: &str = "sensitivity_types_data";
    pub const POLICY_FILE: &str = "policy_file";
    pub const SENSITIVITY_TYPES_FILE: &str = "sensitivity_types_file";
    pub const LABEL_CUSTOM_PROPERTIES_SYNC_ENABLED: &str = "label_custom_properties_sync_enabled";
    pub const POLICY_TTL_DAYS: &str = "PolicyTtlDays";
    pub const SENSITIVITY_POLICY_TTL_DAYS: &str = "SensitivityPolicyTtlDays";
    pub const ENFORCE_MSG_PFILE_PROTECTION: &str = "EnforceMsgPfileProtection";
    pub const ENABLE_MSG_FILE_TYPE: &str = "enable_msg_file_type";
    pub const CONTAINER_DECRYPTION_OPTION: &str = "container_decrytion_option";
    pub const ENABLE_POWER_BI_FILE_TYPE: &str = "enable_power_bi_file_type";
    pub const KEEP_PDF_LINEARIZATION: &str = "keep_pdf_linearization";
    pub const ENABLE_DEPRECATED_REMOVE_ACTIONS: &str = "enable_deprecated_remove_actions";
    pub const LOG_MATCHED_CONTENT_TO_TRACE: &str = "LogMatchedContentToTrace";
    pub const TASK_TIMEOUT_MS: &str = "TaskTimeoutMs";
    pub const LABEL_WITHOUT_POLICY: &str = "label_without_policy";
    pub const MAX_FILE_SIZE_FOR_PROTECTION: &str = "max_file_size_for_protection";
    pub const MAX_POLICY_XML_VERSION: &str = "max_policy_xml_version";
    pub const DELEGATE_APPLICATION_INFO: &str = "delegate_application_info";
    pub const CO_AUTH_METADATA: &str = "co_auth_metadata";
    pub const LABELS_FOR_ALL_CONTENT_FORMATS: &str = "labels_for_all_content_formats";
}

/// Ordered name/value pairs with typed lookups; later entries win
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomSettings(Vec<(String, String)>);

impl CustomSettings {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// Keys compare case-insensitively
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)?.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        }
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key)?.trim().parse().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CustomSettings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Diagnostic and runtime overrides
#[derive(Clone)]
pub struct DiagnosticConfiguration {
    pub host_name_override: Option<String>,
    pub library_name_override: Option<String>,
    pub http_delegate: Option<Arc<dyn HttpDelegate>>,
    pub task_dispatcher: Option<Arc<dyn TaskDispatcherDelegate>>,
    pub is_network_detection_enabled: bool,
    pub is_local_caching_enabled: bool,
    pub is_trace_logging_enabled: bool,
    pub is_minimal_telemetry_enabled: bool,
    pub is_fast_shutdown_enabled: bool,
    pub custom_settings: CustomSettings,
    /// Event name to property names masked in audit output
    pub masked_properties: BTreeMap<String, Vec<String>>,
}

impl Default for DiagnosticConfiguration {
    fn default() -> Self {
        Self {
            host_name_override: None,
            library_name_override: None,
            http_delegate: None,
            task_dispatcher: None,
            is_network_detection_enabled: true,
            is_local_caching_enabled: true,
            is_trace_logging_enabled: false,
            is_minimal_telemetry_enabled: false,
            is_fast_shutdown_enabled: false,
            custom_settings: CustomSettings::default(),
            masked_properties: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for DiagnosticConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticConfiguration")
            .field("host_name_override", &self.host_name_override)
            .field("library_name_override", &self.library_name_override)
            .field("has_http_delegate", &self.http_delegate.is_some())
            .field("has_task_dispatcher", &self.task_dispatcher.is_some())
            .field("is_network_detection_enabled", &self.is_network_detection_enabled)
            .field("is_local_caching_enabled", &self.is_local_caching_enabled)
            .field("is_trace_logging_enabled", &self.is_trace_logging_enabled)
            .field("is_fast_shutdown_enabled", &self.is_fast_shutdown_enabled)
            .finish_non_exhaustive()
    }
}

/// Immutable process-level configuration
#[derive(Clone)]
pub struct MipConfiguration {
    application_info: ApplicationInfo,
    mip_path: PathBuf,
    log_level: LogLevel,
    offline_only: bool,
    features: FeatureSettings,
    diagnostics: DiagnosticConfiguration,
    logger_delegate: Option<Arc<dyn LoggerDelegate>>,
    storage_delegate: Option<Arc<dyn StorageDelegate>>,
    json_delegate: Option<Arc<dyn JsonDelegate>>,
    xml_delegate: Option<Arc<dyn XmlDelegate>>,
}

impl MipConfiguration {
    pub fn builder(
        application_info: ApplicationInfo,
        mip_path: impl AsRef<Path>,
    ) -> MipConfigurationBuilder {
        MipConfigurationBuilder {
            application_info,
            mip_path: mip_path.as_ref().to_path_buf(),
            log_level: LogLevel::default(),
            offline_only: false,
            features: FeatureSettings::default(),
            diagnostics: DiagnosticConfiguration::default(),
            logger_delegate: None,
            storage_delegate: None,
            json_delegate: None,
            xml_delegate: None,
        }
    }

    pub fn application_info(&self) -> &ApplicationInfo {
        &self.application_info
    }

    pub fn mip_path(&self) -> &Path {
        &self.mip_path
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn is_offline_only(&self) -> bool {
        self.offline_only
    }

    pub fn features(&self) -> &FeatureSettings {
        &self.features
    }

    pub fn diagnostics(&self) -> &DiagnosticConfiguration {
        &self.diagnostics
    }

    pub fn logger_delegate(&self) -> Option<&Arc<dyn LoggerDelegate>> {
        self.logger_delegate.as_ref()
    }

    pub fn storage_delegate(&self) -> Option<&Arc<dyn StorageDelegate>> {
        self.storage_delegate.as_ref()
    }

    pub fn json_delegate(&self) -> Option<&Arc<dyn JsonDelegate>> {
        self.json_delegate.as_ref()
    }

    pub fn xml_delegate(&self) -> Option<&Arc<dyn XmlDelegate>> {
        self.xml_delegate.as_ref()
    }
}

impl fmt::Debug for MipConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MipConfiguration")
            .field("application_info", &self.application_info)
            .field("mip_path", &self.mip_path)
            .field("log_level", &self.log_level)
            .field("offline_only", &self.offline_only)
            .field("features", &self.features)
            .field("diagnostics", &self.diagnostics)
            .finish_non_exhaustive()
    }
}

/// Builder for [`MipConfiguration`]
pub struct MipConfigurationBuilder {
    application_info: ApplicationInfo,
    mip_path: PathBuf,
    log_level: LogLevel,
    offline_only: bool,
    features: FeatureSettings,
    diagnostics: DiagnosticConfiguration,
    logger_delegate: Option<Arc<dyn LoggerDelegate>>,
    storage_delegate: Option<Arc<dyn StorageDelegate>>,
    json_delegate: Option<Arc<dyn JsonDelegate>>,
    xml_delegate: Option<Arc<dyn XmlDelegate>>,
}

impl MipConfigurationBuilder {
    /// Minimum level forwarded to the logger delegate
    #[must_use]
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Never reach out to the network
    #[must_use]
    pub fn offline_only(mut self, offline_only: bool) -> Self {
        self.offline_only = offline_only;
        self
    }

    #[must_use]
    pub fn feature(mut self, feature: FlightingFeature, enabled: bool) -> Self {
        self.features.set(feature, enabled);
        self
    }

    #[must_use]
    pub fn features(mut self, features: FeatureSettings) -> Self {
        self.features = features;
        self
    }

    #[must_use]
    pub fn diagnostics(mut self, diagnostics: DiagnosticConfiguration) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    #[must_use]
    pub fn logger_delegate(mut self, delegate: Arc<dyn LoggerDelegate>) -> Self {
        self.logger_delegate = Some(delegate);
        self
    }

    #[must_use]
    pub fn storage_delegate(mut self, delegate: Arc<dyn StorageDelegate>) -> Self {
        self.storage_delegate = Some(delegate);
        self
    }

    #[must_use]
    pub fn json_delegate(mut self, delegate: Arc<dyn JsonDelegate>) -> Self {
        self.json_delegate = Some(delegate);
        self
    }

    #[must_use]
    pub fn xml_delegate(mut self, delegate: Arc<dyn XmlDelegate>) -> Self {
        self.xml_delegate = Some(delegate);
        self
    }

    /// Validate and freeze the configuration
    pub fn build(self) -> Result<MipConfiguration> {
        self.application_info.validate()?;
        if self.mip_path.as_os_str().is_empty() {
            return Err(MipError::bad_input("MIP path must not be empty"));
        }
        Ok(MipConfiguration {
            application_info: self.application_info,
            mip_path: self.mip_path,
            log_level: self.log_level,
            offline_only: self.offline_only,
            features: self.features,
            diagnostics: self.diagnostics,
            logger_delegate: self.logger_delegate,
            storage_delegate: self.storage_delegate,
            json_delegate: self.json_delegate,
            xml_delegate: self.xml_delegate,
        })
    }
}
