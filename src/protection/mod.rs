//! Rights-protection of content
//!
//! [`ProtectionProfile`] → [`ProtectionEngine`] → [`ProtectionHandler`]: a
//! profile owns the caches and delegates, an engine acts for one identity,
//! and a handler encrypts or decrypts the content of one publishing license.

mod cache;
pub mod cipher;
mod codec;
pub mod descriptor;
pub mod engine;
pub mod handler;
mod keystore;
pub mod license;
pub mod profile;
pub mod rights;

pub use cipher::{AesCryptoProvider, CipherMode, ContentKey, CryptoProvider};
pub use descriptor::{
    ProtectionDescriptor, ProtectionDescriptorBuilder, ProtectionType, TemplateDescriptor,
    UserRights, UserRoles,
};
pub use engine::{ProtectionEngine, ProtectionEngineSettings};
pub use handler::ProtectionHandler;
pub use license::{
    ConsumptionSettings, DelegationLicense, DelegationLicenseSettings, LicenseApplicationData,
    LicenseConnectionInfo, LicenseDescriptor, LicenseNameAndDescriptionItem,
    ParsedPublishingLicense, PreLicenseFormat, PublishingLicenseInfo, PublishingSettings,
    PublishingUseLicenseRequest,
};
pub use profile::{ProtectionProfile, ProtectionProfileSettings};
pub use rights::Role;
