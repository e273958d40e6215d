//! Root object of the labeling chain

use std::sync::Arc;

use crate::async_op::{dispatch, AsyncOperation};
use crate::config::{CacheStorageType, LogLevel};
use crate::context::{mip_log, MipContext};
use crate::delegates::{ApplicationStorage, MipComponent, StorageDelegate, TaskDispatcherDelegate};
use crate::error::Result;
use crate::policy::engine::{PolicyEngine, PolicyEngineSettings};
use crate::registry::EngineRegistry;

#[derive(Clone)]
pub struct PolicyProfileSettings {
    pub context: Arc<MipContext>,
    pub cache_storage_type: CacheStorageType,
    pub storage_delegate: Option<Arc<dyn StorageDelegate>>,
    pub task_dispatcher: Option<Arc<dyn TaskDispatcherDelegate>>,
    pub session_id: String,
}

impl PolicyProfileSettings {
    pub fn new(context: Arc<MipContext>, cache_storage_type: CacheStorageType) -> Self {
        Self {
            context,
            cache_storage_type,
            storage_delegate: None,
            task_dispatcher: None,
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    #[must_use]
    pub fn storage_delegate(mut self, delegate: Arc<dyn StorageDelegate>) -> Self {
        self.storage_delegate = Some(delegate);
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

    fn dispatcher(&self) -> Arc<dyn TaskDispatcherDelegate> {
        self.task_dispatcher
            .clone()
            .unwrap_or_else(|| self.context.task_dispatcher().clone())
    }
}

impl std::fmt::Debug for PolicyProfileSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyProfileSettings")
            .field("cache_storage_type", &self.cache_storage_type)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

pub struct PolicyProfile {
    settings: PolicyProfileSettings,
    dispatcher: Arc<dyn TaskDispatcherDelegate>,
    engines: EngineRegistry<PolicyEngine>,
}

impl PolicyProfile {
    pub fn load(settings: PolicyProfileSettings) -> Result<Arc<Self>> {
        settings.context.ensure_active()?;
        let storage = match &settings.storage_delegate {
            Some(storage) => ApplicationStorage::wrap(storage.clone()),
            None => settings.context.profile_storage(settings.cache_storage_type)?,
        };
        Self::load_with_storage(settings, storage)
    }

    /// Load over storage already resolved by the caller
    pub(crate) fn load_with_storage(
        settings: PolicyProfileSettings,
        storage: Arc<dyn StorageDelegate>,
    ) -> Result<Arc<Self>> {
        let context = settings.context.clone();
        context.ensure_active()?;
        let engines = EngineRegistry::open(&context, &storage, MipComponent::Policy)?;
        mip_log!(
            context,
            LogLevel::Info,
            "Loaded policy profile (session {})",
            settings.session_id
        );
        Ok(Arc::new(Self {
            dispatcher: settings.dispatcher(),
            settings,
            engines,
        }))
    }

    pub fn load_async(settings: PolicyProfileSettings) -> AsyncOperation<Arc<Self>> {
        let dispatcher = settings.dispatcher();
        let timeout = settings.context.task_timeout();
        dispatch(&dispatcher, "load-policy-profile", move || Self::load(settings))
            .within(timeout)
    }

    pub fn settings(&self) -> &PolicyProfileSettings {
        &self.settings
    }

    pub fn add_engine(&self, settings: PolicyEngineSettings) -> Result<Arc<PolicyEngine>> {
        let engine = PolicyEngine::create(&self.settings.context, settings)?;
        self.engines
            .add(engine.engine_id(), engine.client_data(), engine.clone())?;
        Ok(engine)
    }

    pub fn add_engine_async(self: &Arc<Self>, settings: PolicyEngineSettings) -> AsyncOperation<Arc<PolicyEngine>> {
        let profile = self.clone();
        dispatch(&self.dispatcher, "add-policy-engine", move || {
            profile.add_engine(settings)
        })
        .within(self.settings.context.task_timeout())
    }

    pub fn engine(&self, engine_id: &str) -> Option<Arc<PolicyEngine>> {
        self.engines.get(engine_id)
    }

    pub fn list_engines(&self) -> Result<Vec<String>> {
        self.settings.context.ensure_active()?;
        self.engines.list()
    }

    pub fn list_engines_async(self: &Arc<Self>) -> AsyncOperation<Vec<String>> {
        let profile = self.clone();
        dispatch(&self.dispatcher, "list-policy-engines", move || profile.list_engines())
            .within(self.settings.context.task_timeout())
    }

    pub fn delete_engine(&self, engine_id: &str) -> Result<()> {
        self.settings.context.ensure_active()?;
        self.engines.delete(engine_id)
    }

    pub fn delete_engine_async(self: &Arc<Self>, engine_id: impl Into<String>) -> AsyncOperation<()> {
        let profile = self.clone();
        let engine_id = engine_id.into();
        dispatch(&self.dispatcher, "delete-policy-engine", move || {
            profile.delete_engine(&engine_id)
        })
        .within(self.settings.context.task_timeout())
    }
}

impl std::fmt::Debug for PolicyProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyProfile")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
