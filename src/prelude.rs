//! Commonly used types in one import
//!
//! ```
//! use infoprotect::prelude::*;
//!
//! let rights = UserRights::new(["bob@contoso.com"], ["VIEW"]);
//! assert!(ProtectionDescriptorBuilder::from_user_rights(vec![rights]).build().is_ok());
//! ```

pub use crate::async_op::{AsyncControl, AsyncOperation, OperationContext};
pub use crate::config::{
    ApplicationInfo, CacheStorageType, Cloud, CustomSettings, DiagnosticConfiguration, LogLevel,
    MipConfiguration,
};
pub use crate::context::MipContext;
pub use crate::delegates::{
    AuthDelegate, Consent, ConsentDelegate, FileStorageDelegate, FixedConsentDelegate,
    HttpDelegate, Identity, InMemoryStorageDelegate, JsonDelegate, LoggerDelegate, OAuth2Challenge, OAuth2Token,
    StaticTokenAuthDelegate, StorageDelegate, TaskDispatcherDelegate, TokioTaskDispatcher,
    XmlDelegate,
};
pub use crate::error::{ErrorKind, MipError, Result};
pub use crate::file::{
    AssignmentMethod, ContentLabel, FileEngine, FileEngineSettings, FileHandler, FileInput,
    FileProfile, FileProfileSettings, LabelingOptions,
};
pub use crate::flighting::{FeatureSettings, FlightingFeature};
pub use crate::policy::{Label, PolicyEngine, PolicyEngineSettings, PolicyProfile, PolicyProfileSettings};
pub use crate::protection::{
    CipherMode, ConsumptionSettings, DelegationLicenseSettings, PreLicenseFormat,
    ProtectionDescriptor, ProtectionDescriptorBuilder, ProtectionEngine, ProtectionEngineSettings,
    ProtectionHandler, ProtectionProfile, ProtectionProfileSettings, PublishingLicenseInfo,
    PublishingSettings, TemplateDescriptor, UserRights, UserRoles,
};
