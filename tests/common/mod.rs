//! Shared helpers for the infoprotect integration tests

#![allow(dead_code)]

use std::sync::Arc;

use infoprotect::prelude::*;
use tempfile::TempDir;

pub const ALICE: &str = "alice@contoso.com";
pub const BOB: &str = "bob@contoso.com";
pub const MALLORY: &str = "mallory@fabrikam.com";

pub const TEST_PLAINTEXT: &[u8] = b"Quarterly results: revenue up, costs down. Do not forward.";

/// Label policy used by the file and policy tests
pub const POLICY_JSON: &str = r#"{
    "labels": [
        { "id": "public", "name": "Public", "sensitivity": 0 },
        { "id": "general", "name": "General", "sensitivity": 1 },
        { "id": "confidential", "name": "Confidential", "sensitivity": 2,
          "protection": { "rights": [
              { "users": ["contoso.com"], "rights": ["VIEW", "EDIT"] }
          ] },
          "children": [
              { "id": "confidential-finance", "name": "Finance", "sensitivity": 3,
                "protection": { "template_id": "tpl-finance" } }
          ] },
        { "id": "retired", "name": "Retired", "sensitivity": 1, "active": false }
    ],
    "default_label_id": "general",
    "more_info_url": "https://contoso.example/labels"
}"#;

pub fn context(dir: &TempDir) -> Result<Arc<MipContext>> {
    context_with(dir, |builder| builder)
}

pub fn context_with<F>(dir: &TempDir, configure: F) -> Result<Arc<MipContext>>
where
    F: FnOnce(infoprotect::config::MipConfigurationBuilder) -> infoprotect::config::MipConfigurationBuilder,
{
    let builder = MipConfiguration::builder(
        ApplicationInfo::new("00000000-0000-0000-0000-000000000001", "Integration Tests", "1.0.0"),
        dir.path(),
    );
    let configuration = configure(builder).build()?;
    MipContext::create(Arc::new(configuration))
}

pub fn auth() -> Arc<StaticTokenAuthDelegate> {
    Arc::new(StaticTokenAuthDelegate::new("test-token"))
}

pub fn protection_profile(context: Arc<MipContext>) -> Result<Arc<ProtectionProfile>> {
    ProtectionProfile::load(ProtectionProfileSettings::new(
        context,
        CacheStorageType::InMemory,
        Arc::new(FixedConsentDelegate(Consent::AcceptAlways)),
    ))
}

pub fn protection_engine(profile: &ProtectionProfile, email: &str) -> Result<Arc<ProtectionEngine>> {
    profile.add_engine(
        ProtectionEngineSettings::new(Identity::new(email))
            .auth_delegate(auth())
            .template(finance_template()),
    )
}

pub fn finance_template() -> TemplateDescriptor {
    TemplateDescriptor::new(
        "tpl-finance",
        "Finance only",
        vec![UserRights::new([ALICE], ["VIEW", "EDIT", "EXPORT"])],
    )
}

/// Alice owns it, Bob may view it
pub fn shared_with_bob() -> Result<ProtectionDescriptor> {
    ProtectionDescriptorBuilder::from_user_rights(vec![UserRights::new([BOB], ["VIEW"])])
        .name("Shared with Bob")
        .referrer("mailto:alice@contoso.com")
        .build()
}

pub fn file_profile(context: Arc<MipContext>) -> Result<Arc<FileProfile>> {
    FileProfile::load(FileProfileSettings::new(
        context,
        CacheStorageType::InMemory,
        Arc::new(FixedConsentDelegate(Consent::AcceptAlways)),
    ))
}

pub fn file_engine(profile: &FileProfile, email: &str) -> Result<Arc<FileEngine>> {
    profile.add_engine(
        FileEngineSettings::new(Identity::new(email))
            .auth_delegate(auth())
            .policy_data(POLICY_JSON)
            .template(finance_template()),
    )
}
