//! One identity's view of labeling and protection for files

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::async_op::{dispatch, AsyncOperation};
use crate::config::{custom_settings, CustomSettings, LogLevel};
use crate::context::{mip_log, MipContext};
use crate::delegates::{AuthDelegate, Identity, TaskDispatcherDelegate};
use crate::error::{MipError, Result};
use crate::file::handler::FileHandler;
use crate::policy::{Label, PolicyEngine, PolicyEngineSettings};
use crate::protection::{ProtectionEngine, ProtectionEngineSettings, TemplateDescriptor};

/// Largest payload protected unless `max_file_size_for_protection` says otherwise
pub const DEFAULT_MAX_FILE_SIZE_FOR_PROTECTION: u64 = 6 * 1024 * 1024 * 1024;

#[derive(Clone)]
pub struct FileEngineSettings {
    /// Generated when empty
    pub engine_id: String,
    pub identity: Identity,
    pub auth_delegate: Option<Arc<dyn AuthDelegate>>,
    pub client_data: String,
    pub locale: String,
    pub custom_settings: CustomSettings,
    pub session_id: String,
    pub templates: Vec<TemplateDescriptor>,
    /// Load without a label policy; labeling calls then fail with NoPolicy
    pub is_protection_only_engine: bool,
}

impl FileEngineSettings {
    pub fn new(identity: Identity) -> Self {
        Self {
            engine_id: String::new(),
            identity,
            auth_delegate: None,
            client_data: String::new(),
            locale: "en-US".to_string(),
            custom_settings: CustomSettings::default(),
            session_id: String::new(),
            templates: Vec::new(),
            is_protection_only_engine: false,
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

    #[must_use]
    pub fn policy_data(self, json: impl Into<String>) -> Self {
        self.custom_setting(custom_settings::POLICY_DATA, json)
    }

    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    #[must_use]
    pub fn template(mut self, template: TemplateDescriptor) -> Self {
        self.templates.push(template);
        self
    }

    #[must_use]
    pub fn protection_only(mut self, protection_only: bool) -> Self {
        self.is_protection_only_engine = protection_only;
        self
    }

    pub(crate) fn policy_settings(&self) -> PolicyEngineSettings {
        let mut settings = PolicyEngineSettings::new(self.identity.clone())
            .engine_id(self.engine_id.clone())
            .client_data(self.client_data.clone())
            .locale(self.locale.clone())
            .allow_empty_policy(self.is_protection_only_engine);
        settings.auth_delegate = self.auth_delegate.clone();
        settings.custom_settings = self.custom_settings.clone();
        settings.session_id = self.session_id.clone();
        settings
    }

    /// Protection settings whose label templates come from `policy`
    pub(crate) fn protection_settings(&self, policy: &PolicyEngine) -> ProtectionEngineSettings {
        let mut settings = ProtectionEngineSettings::new(self.identity.clone())
            .engine_id(self.engine_id.clone())
            .client_data(self.client_data.clone())
            .locale(self.locale.clone())
            .custom_settings(self.custom_settings.clone())
            .session_id(self.session_id.clone());
        settings.auth_delegate = self.auth_delegate.clone();
        settings.templates = self.templates.clone();
        for label in policy.list_sensitivity_labels().unwrap_or_default().iter().flat_map(Label::flatten) {
            if let Some(template_id) = label.protection.as_ref().and_then(|p| p.template_id.as_deref()) {
                settings = settings.label_template(label.id.clone(), template_id);
            }
        }
        settings
    }
}

impl std::fmt::Debug for FileEngineSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEngineSettings")
            .field("engine_id", &self.engine_id)
            .field("identity", &self.identity)
            .field("is_protection_only_engine", &self.is_protection_only_engine)
            .finish_non_exhaustive()
    }
}

/// Source of a file handler
#[derive(Debug, Clone)]
pub enum FileInput {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

impl From<Vec<u8>> for FileInput {
    fn from(bytes: Vec<u8>) -> Self {
        FileInput::Bytes(bytes)
    }
}

impl From<&[u8]> for FileInput {
    fn from(bytes: &[u8]) -> Self {
        FileInput::Bytes(bytes.to_vec())
    }
}

impl From<PathBuf> for FileInput {
    fn from(path: PathBuf) -> Self {
        FileInput::Path(path)
    }
}

impl From<&std::path::Path> for FileInput {
    fn from(path: &std::path::Path) -> Self {
        FileInput::Path(path.to_path_buf())
    }
}

pub struct FileEngine {
    settings: FileEngineSettings,
    context: Arc<MipContext>,
    dispatcher: Arc<dyn TaskDispatcherDelegate>,
    policy: Arc<PolicyEngine>,
    protection: Arc<ProtectionEngine>,
}

impl FileEngine {
    pub(crate) fn new(
        settings: FileEngineSettings,
        context: Arc<MipContext>,
        dispatcher: Arc<dyn TaskDispatcherDelegate>,
        policy: Arc<PolicyEngine>,
        protection: Arc<ProtectionEngine>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            context,
            dispatcher,
            policy,
            protection,
        })
    }

    pub fn engine_id(&self) -> &str {
        &self.settings.engine_id
    }

    pub fn settings(&self) -> &FileEngineSettings {
        &self.settings
    }

    pub fn client_data(&self) -> &str {
        &self.settings.client_data
    }

    pub fn context(&self) -> &Arc<MipContext> {
        &self.context
    }

    pub fn policy_engine(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    pub fn protection_engine(&self) -> &Arc<ProtectionEngine> {
        &self.protection
    }

    pub fn tenant_id(&self) -> &str {
        self.protection.tenant_id()
    }

    pub fn list_sensitivity_labels(&self) -> Result<&[Label]> {
        self.policy.list_sensitivity_labels()
    }

    pub fn default_sensitivity_label(&self) -> Option<&Label> {
        self.policy.default_sensitivity_label()
    }

    pub fn get_label_by_id(&self, label_id: &str) -> Result<&Label> {
        self.policy.get_label_by_id(label_id)
    }

    pub fn more_info_url(&self) -> &str {
        self.policy.more_info_url()
    }

    pub fn is_labeling_required(&self) -> bool {
        self.policy.is_labeling_required()
    }

    pub fn policy_ttl_days(&self) -> u64 {
        self.policy.policy_ttl_days()
    }

    /// Whether Outlook `.msg` files may be opened
    pub fn is_msg_file_type_enabled(&self) -> bool {
        self.settings
            .custom_settings
            .get_bool(custom_settings::ENABLE_MSG_FILE_TYPE)
            .or_else(|| {
                self.context
                    .custom_settings()
                    .get_bool(custom_settings::ENABLE_MSG_FILE_TYPE)
            })
            .unwrap_or(false)
    }

    pub fn max_file_size_for_protection(&self) -> u64 {
        self.settings
            .custom_settings
            .get_u64(custom_settings::MAX_FILE_SIZE_FOR_PROTECTION)
            .or_else(|| {
                self.context
                    .custom_settings()
                    .get_u64(custom_settings::MAX_FILE_SIZE_FOR_PROTECTION)
            })
            .unwrap_or(DEFAULT_MAX_FILE_SIZE_FOR_PROTECTION)
    }

    /// Open `input` for inspection and modification.
    ///
    /// `content_identifier` names the content in logs and audit data, usually
    /// the file path.
    pub fn create_file_handler(
        self: &Arc<Self>,
        input: impl Into<FileInput>,
        content_identifier: &str,
    ) -> Result<FileHandler> {
        self.context.ensure_active()?;
        let input = input.into();
        let named = match &input {
            FileInput::Path(path) => path.as_path(),
            FileInput::Bytes(_) => Path::new(content_identifier),
        };
        let is_msg = named
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("msg"));
        if is_msg && !self.is_msg_file_type_enabled() {
            return Err(MipError::content_format_not_supported(format!(
                "{} is an Outlook message; set {} to open it",
                content_identifier,
                custom_settings::ENABLE_MSG_FILE_TYPE
            )));
        }
        let (bytes, input_path) = match input {
            FileInput::Bytes(bytes) => (bytes, None),
            FileInput::Path(path) => {
                let bytes = std::fs::read(&path).map_err(|e| {
                    MipError::file_io(format!("Failed to read {}: {}", path.display(), e))
                })?;
                (bytes, Some(path))
            }
        };
        mip_log!(
            self.context,
            LogLevel::Trace,
            "Creating file handler for {} ({} bytes)",
            content_identifier,
            bytes.len()
        );
        FileHandler::open(self.clone(), bytes, input_path, content_identifier)
    }

    pub fn create_file_handler_async(
        self: &Arc<Self>,
        input: FileInput,
        content_identifier: impl Into<String>,
    ) -> AsyncOperation<FileHandler> {
        let engine = self.clone();
        let content_identifier = content_identifier.into();
        dispatch(&self.dispatcher, "create-file-handler", move || {
            engine.create_file_handler(input, &content_identifier)
        })
        .within(self.context.task_timeout())
    }
}

impl std::fmt::Debug for FileEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEngine")
            .field("engine_id", &self.settings.engine_id)
            .field("tenant_id", &self.tenant_id())
            .finish()
    }
}
