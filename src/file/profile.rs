//! Root object of the file chain
//!
//! A file profile owns a policy profile and a protection profile over one
//! storage; each file engine pairs the policy and protection engines added
//! under its id.

use std::sync::Arc;

use uuid::Uuid;

use crate::async_op::{dispatch, AsyncOperation};
use crate::config::{CacheStorageType, LogLevel};
use crate::context::{mip_log, MipContext};
use crate::delegates::{ConsentDelegate, HttpDelegate, MipComponent, TaskDispatcherDelegate};
use crate::error::Result;
use crate::file::engine::{FileEngine, FileEngineSettings};
use crate::policy::{PolicyProfile, PolicyProfileSettings};
use crate::protection::{ProtectionProfile, ProtectionProfileSettings};
use crate::registry::EngineRegistry;

#[derive(Clone)]
pub struct FileProfileSettings {
    pub context: Arc<MipContext>,
    pub cache_storage_type: CacheStorageType,
    pub consent_delegate: Arc<dyn ConsentDelegate>,
    pub http_delegate: Option<Arc<dyn HttpDelegate>>,
    pub task_dispatcher: Option<Arc<dyn TaskDispatcherDelegate>>,
    pub session_id: String,
    pub can_cache_licenses: bool,
}

impl FileProfileSettings {
    pub fn new(
        context: Arc<MipContext>,
        cache_storage_type: CacheStorageType,
        consent_delegate: Arc<dyn ConsentDelegate>,
    ) -> Self {
        Self {
            context,
            cache_storage_type,
            consent_delegate,
            http_delegate: None,
            task_dispatcher: None,
            session_id: Uuid::new_v4().to_string(),
            can_cache_licenses: true,
        }
    }

    #[must_use]
    pub fn http_delegate(mut self, delegate: Arc<dyn HttpDelegate>) -> Self {
        self.http_delegate = Some(delegate);
        self
    }

    #[must_use]
    pub fn task_dispatcher(mut self, dispatcher: Arc<dyn TaskDispatcherDelegate>) -> Self {
        self.task_dispatcher = Some(dispatcher);
        self
    }

    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    #[must_use]
    pub fn can_cache_licenses(mut self, can_cache: bool) -> Self {
        self.can_cache_licenses = can_cache;
        self
    }

    fn dispatcher(&self) -> Arc<dyn TaskDispatcherDelegate> {
        self.task_dispatcher
            .clone()
            .unwrap_or_else(|| self.context.task_dispatcher().clone())
    }
}

impl std::fmt::Debug for FileProfileSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileProfileSettings")
            .field("cache_storage_type", &self.cache_storage_type)
            .field("session_id", &self.session_id)
            .field("can_cache_licenses", &self.can_cache_licenses)
            .finish_non_exhaustive()
    }
}

pub struct FileProfile {
    settings: FileProfileSettings,
    dispatcher: Arc<dyn TaskDispatcherDelegate>,
    policy: Arc<PolicyProfile>,
    protection: Arc<ProtectionProfile>,
    engines: EngineRegistry<FileEngine>,
}

impl FileProfile {
    pub fn load(settings: FileProfileSettings) -> Result<Arc<Self>> {
        let context = settings.context.clone();
        context.ensure_active()?;
        let storage = context.profile_storage(settings.cache_storage_type)?;
        let dispatcher = settings.dispatcher();

        let policy = PolicyProfile::load_with_storage(
            PolicyProfileSettings::new(context.clone(), settings.cache_storage_type)
                .task_dispatcher(dispatcher.clone())
                .session_id(settings.session_id.clone()),
            storage.clone(),
        )?;
        let mut protection_settings = ProtectionProfileSettings::new(
            context.clone(),
            settings.cache_storage_type,
            settings.consent_delegate.clone(),
        )
        .task_dispatcher(dispatcher.clone())
        .session_id(settings.session_id.clone())
        .can_cache_licenses(settings.can_cache_licenses);
        if let Some(http) = &settings.http_delegate {
            protection_settings = protection_settings.http_delegate(http.clone());
        }
        let protection = ProtectionProfile::load_with_storage(protection_settings, storage.clone())?;
        let engines = EngineRegistry::open(&context, &storage, MipComponent::File)?;

        mip_log!(
            context,
            LogLevel::Info,
            "Loaded file profile (session {})",
            settings.session_id
        );
        Ok(Arc::new(Self {
            settings,
            dispatcher,
            policy,
            protection,
            engines,
        }))
    }

    pub fn load_async(settings: FileProfileSettings) -> AsyncOperation<Arc<Self>> {
        let dispatcher = settings.dispatcher();
        let timeout = settings.context.task_timeout();
        dispatch(&dispatcher, "load-file-profile", move || Self::load(settings))
            .within(timeout)
    }

    pub fn settings(&self) -> &FileProfileSettings {
        &self.settings
    }

    pub fn add_engine(&self, mut settings: FileEngineSettings) -> Result<Arc<FileEngine>> {
        if settings.engine_id.trim().is_empty() {
            settings.engine_id = Uuid::new_v4().to_string();
        }
        let engine_id = settings.engine_id.clone();
        let policy = self.policy.add_engine(settings.policy_settings())?;
        let protection = match self.protection.add_engine(settings.protection_settings(&policy)) {
            Ok(protection) => protection,
            Err(err) => {
                let _ = self.policy.delete_engine(&engine_id);
                return Err(err);
            }
        };
        let client_data = settings.client_data.clone();
        let engine = FileEngine::new(
            settings,
            self.settings.context.clone(),
            self.dispatcher.clone(),
            policy,
            protection,
        );
        if let Err(err) = self.engines.add(&engine_id, &client_data, engine.clone()) {
            let _ = self.policy.delete_engine(&engine_id);
            let _ = self.protection.delete_engine(&engine_id);
            return Err(err);
        }
        Ok(engine)
    }

    pub fn add_engine_async(self: &Arc<Self>, settings: FileEngineSettings) -> AsyncOperation<Arc<FileEngine>> {
        let profile = self.clone();
        dispatch(&self.dispatcher, "add-file-engine", move || {
            profile.add_engine(settings)
        })
        .within(self.settings.context.task_timeout())
    }

    pub fn engine(&self, engine_id: &str) -> Option<Arc<FileEngine>> {
        self.engines.get(engine_id)
    }

    pub fn list_engines(&self) -> Result<Vec<String>> {
        self.settings.context.ensure_active()?;
        self.engines.list()
    }

    pub fn list_engines_async(self: &Arc<Self>) -> AsyncOperation<Vec<String>> {
        let profile = self.clone();
        dispatch(&self.dispatcher, "list-file-engines", move || profile.list_engines())
            .within(self.settings.context.task_timeout())
    }

    pub fn delete_engine(&self, engine_id: &str) -> Result<()> {
        self.settings.context.ensure_active()?;
        self.engines.delete(engine_id)?;
        self.policy.delete_engine(engine_id)?;
        self.protection.delete_engine(engine_id)
    }

    pub fn delete_engine_async(self: &Arc<Self>, engine_id: impl Into<String>) -> AsyncOperation<()> {
        let profile = self.clone();
        let engine_id = engine_id.into();
        dispatch(&self.dispatcher, "delete-file-engine", move || {
            profile.delete_engine(&engine_id)
        })
        .within(self.settings.context.task_timeout())
    }
}

impl std::fmt::Debug for FileProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileProfile")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
