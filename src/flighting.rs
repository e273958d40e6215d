//! Named feature toggles
//!
//! Each [`FlightingFeature`] has a fixed default. A [`FeatureSettings`] value
//! records the overrides an application asked for; every lookup that has no
//! override yields the default.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::error::MipError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FlightingFeature {
    ServiceDiscovery,
    AuthInfoCache,
    LinuxEncryptedCache,
    SingleDomainName,
    PolicyAuth,
    UrlRedirectCache,
    PreLicensing,
    DoubleKey,
    VariablePolicyTtl,
    VariableTextMarking,
    OptimizePdfMemory,
    RemoveDeletedLabelMd,
    EnforceTls12,
    MatchCloudType,
    EnableAuditAndTelemetryForSovereignClouds,
    EnableActionIdForV0Metadata,
    PowerBiCustomSettings,
    KeyStoreBasedOnStoragePath,
    EventDateTimeTokenUseUtc,
    CrossTenantUserCert,
    EncryptedDatabaseIntegrityChecking,
    EnableFipsValidatedCryptography,
}

impl FlightingFeature {
    pub const ALL: [FlightingFeature; 22] = [
        FlightingFeature::ServiceDiscovery,
        FlightingFeature::AuthInfoCache,
        FlightingFeature::LinuxEncryptedCache,
        FlightingFeature::SingleDomainName,
        FlightingFeature::PolicyAuth,
        FlightingFeature::UrlRedirectCache,
        FlightingFeature::PreLicensing,
        FlightingFeature::DoubleKey,
        FlightingFeature::VariablePolicyTtl,
        FlightingFeature::VariableTextMarking,
        FlightingFeature::OptimizePdfMemory,
        FlightingFeature::RemoveDeletedLabelMd,
        FlightingFeature::EnforceTls12,
        FlightingFeature::MatchCloudType,
        FlightingFeature::EnableAuditAndTelemetryForSovereignClouds,
        FlightingFeature::EnableActionIdForV0Metadata,
        FlightingFeature::PowerBiCustomSettings,
        FlightingFeature::KeyStoreBasedOnStoragePath,
        FlightingFeature::EventDateTimeTokenUseUtc,
        FlightingFeature::CrossTenantUserCert,
        FlightingFeature::EncryptedDatabaseIntegrityChecking,
        FlightingFeature::EnableFipsValidatedCryptography,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FlightingFeature::ServiceDiscovery => "ServiceDiscovery",
            FlightingFeature::AuthInfoCache => "AuthInfoCache",
            FlightingFeature::LinuxEncryptedCache => "LinuxEncryptedCache",
            FlightingFeature::SingleDomainName => "SingleDomainName",
            FlightingFeature::PolicyAuth => "PolicyAuth",
            FlightingFeature::UrlRedirectCache => "UrlRedirectCache",
            FlightingFeature::PreLicensing => "PreLicensing",
            FlightingFeature::DoubleKey => "DoubleKey",
            FlightingFeature::VariablePolicyTtl => "VariablePolicyTtl",
            FlightingFeature::VariableTextMarking => "VariableTextMarking",
            FlightingFeature::OptimizePdfMemory => "OptimizePdfMemory",
            FlightingFeature::RemoveDeletedLabelMd => "RemoveDeletedLabelMd",
            FlightingFeature::EnforceTls12 => "EnforceTls12",
            FlightingFeature::MatchCloudType => "MatchCloudType",
            FlightingFeature::EnableAuditAndTelemetryForSovereignClouds => {
                "EnableAuditAndTelemetryForSovereignClouds"
            }
            FlightingFeature::EnableActionIdForV0Metadata => "EnableActionIdForV0Metadata",
            FlightingFeature::PowerBiCustomSettings => "PowerBiCustomSettings",
            FlightingFeature::KeyStoreBasedOnStoragePath => "KeyStoreBasedOnStoragePath",
            FlightingFeature::EventDateTimeTokenUseUtc => "EventDateTimeTokenUseUtc",
            FlightingFeature::CrossTenantUserCert => "CrossTenantUserCert",
            FlightingFeature::EncryptedDatabaseIntegrityChecking => {
                "EncryptedDatabaseIntegrityChecking"
            }
            FlightingFeature::EnableFipsValidatedCryptography => "EnableFipsValidatedCryptography",
        }
    }

    /// Default value of this feature when no override is supplied
    pub fn default_value(self) -> bool {
        DEFAULT_FEATURE_SETTINGS
            .get(&self)
            .copied()
            .unwrap_or(false)
    }
}

impl fmt::Display for FlightingFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FlightingFeature {
    type Err = MipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FlightingFeature::ALL
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| MipError::bad_input(format!("Unknown flighting feature: {}", s)))
    }
}

lazy_static! {
    static ref DEFAULT_FEATURE_SETTINGS: BTreeMap<FlightingFeature, bool> = {
        use FlightingFeature::*;
        [
            (ServiceDiscovery, false),
            (AuthInfoCache, true),
            (LinuxEncryptedCache, false),
            (SingleDomainName, true),
            (PolicyAuth, true),
            (UrlRedirectCache, true),
            (PreLicensing, true),
            (DoubleKey, false),
            (VariablePolicyTtl, true),
            (VariableTextMarking, true),
            (OptimizePdfMemory, true),
            (RemoveDeletedLabelMd, true),
            (EnforceTls12, true),
            (MatchCloudType, false),
            (EnableAuditAndTelemetryForSovereignClouds, false),
            (EnableActionIdForV0Metadata, true),
            (PowerBiCustomSettings, true),
            (KeyStoreBasedOnStoragePath, true),
            (EventDateTimeTokenUseUtc, false),
            (CrossTenantUserCert, true),
            (EncryptedDatabaseIntegrityChecking, true),
            (EnableFipsValidatedCryptography, false),
        ]
        .into_iter()
        .collect()
    };
}

/// The full default feature map
pub fn default_feature_settings() -> BTreeMap<FlightingFeature, bool> {
    DEFAULT_FEATURE_SETTINGS.clone()
}

/// Application overrides on top of the defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSettings {
    overrides: BTreeMap<FlightingFeature, bool>,
}

impl FeatureSettings {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_override(mut self, feature: FlightingFeature, enabled: bool) -> Self {
        self.overrides.insert(feature, enabled);
        self
    }

    pub fn set(&mut self, feature: FlightingFeature, enabled: bool) {
        self.overrides.insert(feature, enabled);
    }

    pub fn overrides(&self) -> &BTreeMap<FlightingFeature, bool> {
        &self.overrides
    }

    pub fn is_enabled(&self, feature: FlightingFeature) -> bool {
        self.overrides
            .get(&feature)
            .copied()
            .unwrap_or_else(|| feature.default_value())
    }

    /// Defaults merged with overrides
    pub fn effective(&self) -> BTreeMap<FlightingFeature, bool> {
        let mut merged = default_feature_settings();
        merged.extend(self.overrides.iter().map(|(f, v)| (*f, *v)));
        merged
    }
}
