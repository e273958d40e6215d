//! Label policy of one identity

use std::sync::Arc;

use uuid::Uuid;

use crate::config::{custom_settings, CustomSettings, LogLevel};
use crate::context::{mip_log, MipContext};
use crate::delegates::{AuthDelegate, Identity, OAuth2Challenge};
use crate::error::{MipError, NoPolicyCategory, Result};
use crate::flighting::FlightingFeature;
use crate::policy::label::{Label, LabelProtection, PolicyData};

const DEFAULT_POLICY_TTL_DAYS: u64 = 30;
const POLICY_RESOURCE: &str = "https://syncservice.o365syncservice.com/";

#[derive(Clone)]
pub struct PolicyEngineSettings {
    /// Generated when empty
    pub engine_id: String,
    pub identity: Identity,
    pub auth_delegate: Option<Arc<dyn AuthDelegate>>,
    pub client_data: String,
    pub locale: String,
    /// Consulted before the context's custom settings
    pub custom_settings: CustomSettings,
    pub session_id: String,
    /// Load the engine even when the policy has no labels
    pub allow_empty_policy: bool,
}

impl PolicyEngineSettings {
    pub fn new(identity: Identity) -> Self {
        Self {
            engine_id: String::new(),
            identity,
            auth_delegate: None,
            client_data: String::new(),
            locale: "en-US".to_string(),
            custom_settings: CustomSettings::default(),
            session_id: String::new(),
            allow_empty_policy: false,
        }
    }

    #[must_use]
    pub fn engine_id(mut self, engine_id: impl Into<String>) -> Self {
        self.engine_id = engine_id.into();
        self
    }

    #[must_use]
    pub fn auth_delegate(mut self, delegate: Arc<dyn AuthDelegate>) -> Self {
        self.auth_delegate = Some(delegate);
        self
    }

    #[must_use]
    pub fn client_data(mut self, client_data: impl Into<String>) -> Self {
        self.client_data = client_data.into();
        self
    }

    #[must_use]
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    #[must_use]
    pub fn custom_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_settings.push(key, value);
        self
    }

    /// Policy JSON, see [`PolicyData`]
    #[must_use]
    pub fn policy_data(self, json: impl Into<String>) -> Self {
        self.custom_setting(custom_settings::POLICY_DATA, json)
    }

    #[must_use]
    pub fn allow_empty_policy(mut self, allow: bool) -> Self {
        self.allow_empty_policy = allow;
        self
    }
}

impl std::fmt::Debug for PolicyEngineSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngineSettings")
            .field("engine_id", &self.engine_id)
            .field("identity", &self.identity)
            .field("locale", &self.locale)
            .finish_non_exhaustive()
    }
}

pub struct PolicyEngine {
    settings: PolicyEngineSettings,
    policy: PolicyData,
    policy_ttl_days: u64,
    sensitivity_policy_ttl_days: u64,
}

impl PolicyEngine {
    pub(crate) fn create(context: &Arc<MipContext>, mut settings: PolicyEngineSettings) -> Result<Arc<Self>> {
        context.ensure_active()?;
        if settings.engine_id.trim().is_empty() {
            settings.engine_id = Uuid::new_v4().to_string();
        }
        if context.is_feature_enabled(FlightingFeature::PolicyAuth) && !context.is_offline_only() {
            authenticate(&settings)?;
        }

        let setting = |key: &str| {
            settings
                .custom_settings
                .get(key)
                .or_else(|| context.custom_settings().get(key))
                .map(str::to_string)
        };
        let policy = match (setting(custom_settings::POLICY_DATA), setting(custom_settings::POLICY_FILE)) {
            (Some(json), _) => PolicyData::from_json(&json)?,
            (None, Some(path)) => PolicyData::from_json(&std::fs::read_to_string(&path).map_err(|e| {
                MipError::file_io(format!("Failed to read policy file {}: {}", path, e))
            })?)?,
            (None, None) => PolicyData::default(),
        };
        let label_without_policy = settings
            .custom_settings
            .get_bool(custom_settings::LABEL_WITHOUT_POLICY)
            .or_else(|| context.custom_settings().get_bool(custom_settings::LABEL_WITHOUT_POLICY))
            .unwrap_or(false);
        if policy.labels.is_empty() && !settings.allow_empty_policy && !label_without_policy {
            return Err(MipError::no_policy(
                NoPolicyCategory::Labels,
                format!("No labels are configured for {}", settings.identity.email),
            ));
        }

        let mut policy_ttl_days = policy.policy_ttl_days.unwrap_or(DEFAULT_POLICY_TTL_DAYS);
        let mut sensitivity_policy_ttl_days = policy_ttl_days;
        if context.is_feature_enabled(FlightingFeature::VariablePolicyTtl) {
            let days = |key: &str| setting(key).and_then(|d| d.trim().parse::<u64>().ok());
            if let Some(ttl) = days(custom_settings::POLICY_TTL_DAYS) {
                policy_ttl_days = ttl;
                sensitivity_policy_ttl_days = ttl;
            }
            if let Some(ttl) = days(custom_settings::SENSITIVITY_POLICY_TTL_DAYS) {
                sensitivity_policy_ttl_days = ttl;
            }
        }

        mip_log!(
            context,
            LogLevel::Info,
            "Created policy engine {} with {} labels",
            settings.engine_id,
            policy.all_labels().len()
        );
        Ok(Arc::new(Self {
            settings,
            policy,
            policy_ttl_days,
            sensitivity_policy_ttl_days,
        }))
    }

    pub fn engine_id(&self) -> &str {
        &self.settings.engine_id
    }

    pub fn settings(&self) -> &PolicyEngineSettings {
        &self.settings
    }

    pub fn client_data(&self) -> &str {
        &self.settings.client_data
    }

    /// Top-level labels with their children
    pub fn list_sensitivity_labels(&self) -> Result<&[Label]> {
        if self.policy.labels.is_empty() {
            return Err(MipError::no_policy(
                NoPolicyCategory::Labels,
                "The policy defines no labels",
            ));
        }
        Ok(&self.policy.labels)
    }

    pub fn get_label_by_id(&self, label_id: &str) -> Result<&Label> {
        self.policy
            .find(label_id)
            .ok_or_else(|| MipError::label_not_found(format!("Label {} not found", label_id)))
    }

    pub fn default_sensitivity_label(&self) -> Option<&Label> {
        self.policy
            .default_label_id
            .as_deref()
            .and_then(|id| self.policy.find(id))
    }

    pub fn protection_for_label(&self, label_id: &str) -> Result<Option<&LabelProtection>> {
        Ok(self.get_label_by_id(label_id)?.protection.as_ref())
    }

    pub fn policy_ttl_days(&self) -> u64 {
        self.policy_ttl_days
    }

    /// Lifetime of cached sensitivity-type data; follows the policy TTL
    /// unless set on its own
    pub fn sensitivity_policy_ttl_days(&self) -> u64 {
        self.sensitivity_policy_ttl_days
    }

    pub fn more_info_url(&self) -> &str {
        &self.policy.more_info_url
    }

    pub fn is_labeling_required(&self) -> bool {
        self.policy.is_labeling_required
    }

    pub fn is_downgrade_justification_required(&self) -> bool {
        self.policy.is_downgrade_justification_required
    }
}

fn authenticate(settings: &PolicyEngineSettings) -> Result<()> {
    let auth = settings
        .auth_delegate
        .as_ref()
        .ok_or_else(|| MipError::no_auth_token("Policy engines need an auth delegate"))?;
    let challenge = OAuth2Challenge {
        authority: "https://login.windows.net/common".to_string(),
        resource: POLICY_RESOURCE.to_string(),
        scope: String::new(),
        claims: String::new(),
    };
    match auth.acquire_oauth2_token(&settings.identity, &challenge, None) {
        Some(token) if token.is_valid() => Ok(()),
        _ => Err(MipError::no_auth_token("No token for the policy service")),
    }
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("engine_id", &self.settings.engine_id)
            .field("labels", &self.policy.all_labels().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApplicationInfo, DiagnosticConfiguration, MipConfiguration};
    use crate::delegates::StaticTokenAuthDelegate;
    use crate::error::ErrorKind;

    const POLICY: &str = r#"{"labels":[{"id":"public","name":"Public","sensitivity":0},
        {"id":"confidential","name":"Confidential","sensitivity":2}],
        "default_label_id":"public","more_info_url":"https://contoso.example/help"}"#;

    fn context(dir: &tempfile::TempDir, ttl_flight: bool) -> Result<Arc<MipContext>> {
        let mut diagnostics = DiagnosticConfiguration::default();
        diagnostics.custom_settings = CustomSettings::default().with(custom_settings::POLICY_TTL_DAYS, "7");
        let config = MipConfiguration::builder(
            ApplicationInfo::new("app-id", "Policy Test", "1.0"),
            dir.path(),
        )
        .feature(FlightingFeature::VariablePolicyTtl, ttl_flight)
        .diagnostics(diagnostics)
        .build()?;
        MipContext::create(Arc::new(config))
    }

    fn settings() -> PolicyEngineSettings {
        PolicyEngineSettings::new(Identity::new("alice@contoso.com"))
            .auth_delegate(Arc::new(StaticTokenAuthDelegate::new("token")))
    }

    #[test]
    fn test_labels_and_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = PolicyEngine::create(&context(&dir, true)?, settings().policy_data(POLICY))?;
        assert_eq!(engine.list_sensitivity_labels()?.len(), 2);
        assert_eq!(engine.default_sensitivity_label().map(|l| l.id.as_str()), Some("public"));
        assert_eq!(engine.get_label_by_id("CONFIDENTIAL")?.sensitivity, 2);
        assert_eq!(engine.get_label_by_id("nope").unwrap_err().kind(), ErrorKind::LabelNotFound);
        assert_eq!(engine.more_info_url(), "https://contoso.example/help");
        assert_eq!(engine.policy_ttl_days(), 7);
        assert!(!engine.engine_id().is_empty());
        Ok(())
    }

    #[test]
    fn test_ttl_setting_needs_flight() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = PolicyEngine::create(&context(&dir, false)?, settings().policy_data(POLICY))?;
        assert_eq!(engine.policy_ttl_days(), DEFAULT_POLICY_TTL_DAYS);
        assert_eq!(engine.sensitivity_policy_ttl_days(), DEFAULT_POLICY_TTL_DAYS);
        Ok(())
    }

    #[test]
    fn test_sensitivity_ttl_overrides_policy_ttl() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let context = context(&dir, true)?;
        let engine = PolicyEngine::create(&context, settings().policy_data(POLICY))?;
        assert_eq!(engine.sensitivity_policy_ttl_days(), 7);

        let engine = PolicyEngine::create(
            &context,
            settings()
                .policy_data(POLICY)
                .custom_setting(custom_settings::SENSITIVITY_POLICY_TTL_DAYS, "2"),
        )?;
        assert_eq!(engine.policy_ttl_days(), 7);
        assert_eq!(engine.sensitivity_policy_ttl_days(), 2);
        Ok(())
    }

    #[test]
    fn test_missing_policy() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let context = context(&dir, true)?;
        let err = PolicyEngine::create(&context, settings()).unwrap_err();
        assert_eq!(err.no_policy_category(), Some(NoPolicyCategory::Labels));

        let engine = PolicyEngine::create(&context, settings().allow_empty_policy(true))?;
        assert_eq!(engine.list_sensitivity_labels().unwrap_err().kind(), ErrorKind::NoPolicy);
        Ok(())
    }

    #[test]
    fn test_policy_auth_requires_token() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = PolicyEngineSettings::new(Identity::new("alice@contoso.com")).policy_data(POLICY);
        let err = PolicyEngine::create(&context(&dir, true)?, settings).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoAuthToken);
        Ok(())
    }
}
