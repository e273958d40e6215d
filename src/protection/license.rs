//! License data model shared by publishing and consumption

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protection::descriptor::ProtectionDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum PreLicenseFormat {
    #[default]
    Xml,
    Json,
}

/// Localized name and description of a license
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LicenseNameAndDescriptionItem {
    pub lcid: u32,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LicenseDescriptor {
    pub id: String,
    pub names: Vec<LicenseNameAndDescriptionItem>,
}

/// Where a license can be redeemed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LicenseConnectionInfo {
    pub extranet_url: String,
    pub intranet_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LicenseApplicationData {
    pub name: String,
    pub value: String,
}

/// Fields read out of a publishing license
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedPublishingLicense {
    pub domains: Vec<String>,
    pub server_public_certificate: String,
    pub content_id: String,
    pub issuer_id: String,
    pub double_key_algorithm: String,
    pub owner: String,
    pub connection_info: LicenseConnectionInfo,
    pub descriptor: LicenseDescriptor,
    pub protection_descriptor: Option<ProtectionDescriptor>,
    pub referral_info_url: String,
    pub signed_application_data: Vec<LicenseApplicationData>,
    pub issued_time: Option<DateTime<Utc>>,
}

/// A serialized publishing license plus, once parsed, its contents
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PublishingLicenseInfo {
    serialized_publishing_license: Vec<u8>,
    serialized_pre_license: Vec<u8>,
    parsed: Option<ParsedPublishingLicense>,
}

impl PublishingLicenseInfo {
    pub fn new(serialized_publishing_license: Vec<u8>) -> Self {
        Self {
            serialized_publishing_license,
            ..Self::default()
        }
    }

    pub fn with_pre_license(serialized_publishing_license: Vec<u8>, serialized_pre_license: Vec<u8>) -> Self {
        Self {
            serialized_publishing_license,
            serialized_pre_license,
            parsed: None,
        }
    }

    pub fn set_parsed_data(&mut self, parsed: ParsedPublishingLicense) {
        self.parsed = Some(parsed);
    }

    pub fn is_license_parsed(&self) -> bool {
        self.parsed.is_some()
    }

    pub fn has_pre_license(&self) -> bool {
        !self.serialized_pre_license.is_empty()
    }

    pub fn is_double_key_license(&self) -> bool {
        self.parsed
            .as_ref()
            .map_or(false, |p| !p.double_key_algorithm.is_empty())
    }

    pub fn serialized_publishing_license(&self) -> &[u8] {
        &self.serialized_publishing_license
    }

    pub fn serialized_pre_license(&self) -> &[u8] {
        &self.serialized_pre_license
    }

    pub fn parsed(&self) -> Option<&ParsedPublishingLicense> {
        self.parsed.as_ref()
    }

    pub fn domains(&self) -> &[String] {
        self.parsed
            .as_ref()
            .map(|p| p.domains.as_slice())
            .unwrap_or(&[])
    }

    pub fn server_public_certificate(&self) -> &str {
        self.parsed_str(|p| &p.server_public_certificate)
    }

    pub fn content_id(&self) -> &str {
        self.parsed_str(|p| &p.content_id)
    }

    pub fn issuer_id(&self) -> &str {
        self.parsed_str(|p| &p.issuer_id)
    }

    pub fn double_key_algorithm(&self) -> &str {
        self.parsed_str(|p| &p.double_key_algorithm)
    }

    pub fn owner(&self) -> &str {
        self.parsed_str(|p| &p.owner)
    }

    pub fn referral_info_url(&self) -> &str {
        self.parsed_str(|p| &p.referral_info_url)
    }

    pub fn connection_info(&self) -> Option<&LicenseConnectionInfo> {
        self.parsed.as_ref().map(|p| &p.connection_info)
    }

    pub fn descriptor(&self) -> Option<&LicenseDescriptor> {
        self.parsed.as_ref().map(|p| &p.descriptor)
    }

    pub fn protection_descriptor(&self) -> Option<&ProtectionDescriptor> {
        self.parsed.as_ref().and_then(|p| p.protection_descriptor.as_ref())
    }

    pub fn signed_application_data(&self) -> &[LicenseApplicationData] {
        self.parsed
            .as_ref()
            .map(|p| p.signed_application_data.as_slice())
            .unwrap_or(&[])
    }

    pub fn issued_time(&self) -> Option<DateTime<Utc>> {
        self.parsed.as_ref().and_then(|p| p.issued_time)
    }

    fn parsed_str<'a>(&'a self, field: impl Fn(&'a ParsedPublishingLicense) -> &'a String) -> &'a str {
        self.parsed.as_ref().map_or("", |p| field(p).as_str())
    }
}

/// Request for a use license issued to someone other than the publisher
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PublishingUseLicenseRequest {
    pub delegated_user_email: String,
}

/// Inputs for creating a publishing handler
#[derive(Debug, Clone)]
pub struct PublishingSettings {
    pub descriptor: ProtectionDescriptor,
    pub is_audited_extraction_allowed: bool,
    pub is_deprecated_algorithm_preferred: bool,
    pub delegated_user_email: Option<String>,
    pub publishing_format: PreLicenseFormat,
    /// License to republish; its content key and content id are kept
    pub republishing_license: Option<Vec<u8>>,
    pub pre_license_user: Option<PublishingUseLicenseRequest>,
}

impl PublishingSettings {
    pub fn new(descriptor: ProtectionDescriptor) -> Self {
        Self {
            descriptor,
            is_audited_extraction_allowed: false,
            is_deprecated_algorithm_preferred: false,
            delegated_user_email: None,
            publishing_format: PreLicenseFormat::Xml,
            republishing_license: None,
            pre_license_user: None,
        }
    }

    #[must_use]
    pub fn audited_extraction_allowed(mut self, allowed: bool) -> Self {
        self.is_audited_extraction_allowed = allowed;
        self
    }

    /// Encrypt with ECB instead of CBC4K
    #[must_use]
    pub fn deprecated_algorithm_preferred(mut self, preferred: bool) -> Self {
        self.is_deprecated_algorithm_preferred = preferred;
        self
    }

    #[must_use]
    pub fn delegated_user(mut self, email: impl Into<String>) -> Self {
        self.delegated_user_email = Some(email.into());
        self
    }

    #[must_use]
    pub fn json_format(mut self, json: bool) -> Self {
        self.publishing_format = if json {
            PreLicenseFormat::Json
        } else {
            PreLicenseFormat::Xml
        };
        self
    }

    #[must_use]
    pub fn republish(mut self, serialized_publishing_license: Vec<u8>) -> Self {
        self.republishing_license = Some(serialized_publishing_license);
        self
    }

    #[must_use]
    pub fn pre_license_for(mut self, email: impl Into<String>) -> Self {
        self.pre_license_user = Some(PublishingUseLicenseRequest {
            delegated_user_email: email.into(),
        });
        self
    }
}

/// Inputs for creating a consumption handler
#[derive(Debug, Clone)]
pub struct ConsumptionSettings {
    pub license_info: Arc<PublishingLicenseInfo>,
    pub is_offline_only: bool,
    pub delegated_user_email: Option<String>,
    pub content_name: String,
}

impl ConsumptionSettings {
    pub fn new(license_info: Arc<PublishingLicenseInfo>) -> Self {
        Self {
            license_info,
            is_offline_only: false,
            delegated_user_email: None,
            content_name: String::new(),
        }
    }

    /// Convenience for raw license bytes
    pub fn from_license(serialized_publishing_license: Vec<u8>) -> Self {
        Self::new(Arc::new(PublishingLicenseInfo::new(serialized_publishing_license)))
    }

    #[must_use]
    pub fn offline_only(mut self, offline_only: bool) -> Self {
        self.is_offline_only = offline_only;
        self
    }

    #[must_use]
    pub fn delegated_user(mut self, email: impl Into<String>) -> Self {
        self.delegated_user_email = Some(email.into());
        self
    }

    #[must_use]
    pub fn content_name(mut self, name: impl Into<String>) -> Self {
        self.content_name = name.into();
        self
    }
}

/// Inputs for issuing licenses on behalf of other users
#[derive(Debug, Clone)]
pub struct DelegationLicenseSettings {
    pub license_info: Arc<PublishingLicenseInfo>,
    pub users: Vec<String>,
    pub acquire_end_user_licenses: bool,
}

impl DelegationLicenseSettings {
    pub fn new(license_info: Arc<PublishingLicenseInfo>, users: Vec<String>) -> Self {
        Self {
            license_info,
            users,
            acquire_end_user_licenses: false,
        }
    }

    #[must_use]
    pub fn acquire_end_user_licenses(mut self, acquire: bool) -> Self {
        self.acquire_end_user_licenses = acquire;
        self
    }
}

/// Licenses issued for one delegated user
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DelegationLicense {
    pub user: String,
    pub serialized_json_license: Vec<u8>,
    pub serialized_xrml_license: Vec<u8>,
    pub user_licenses: BTreeMap<PreLicenseFormat, Vec<u8>>,
}

impl DelegationLicense {
    /// End-user license in `format`, empty when none was acquired
    pub fn user_license(&self, format: PreLicenseFormat) -> &[u8] {
        self.user_licenses
            .get(&format)
            .map(|l| l.as_slice())
            .unwrap_or(&[])
    }
}
