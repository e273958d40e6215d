//! Root object of the protection chain
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use infoprotect::prelude::*;
//!
//! # fn example(context: Arc<MipContext>) -> infoprotect::Result<()> {
//! let profile = ProtectionProfile::load(ProtectionProfileSettings::new(
//!     context,
//!     CacheStorageType::InMemory,
//!     Arc::new(FixedConsentDelegate(Consent::AcceptAlways)),
//! ))?;
//! let engine = profile.add_engine(
//!     ProtectionEngineSettings::new(Identity::new("alice@contoso.com"))
//!         .auth_delegate(Arc::new(StaticTokenAuthDelegate::new("token"))),
//! )?;
//! assert_eq!(engine.tenant_id(), "contoso.com");
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::async_op::{dispatch, AsyncOperation};
use crate::config::{CacheStorageType, CustomSettings, LogLevel};
use crate::context::{mip_log, MipContext};
use crate::delegates::{
    ApplicationHttp, ApplicationStorage, ConsentDelegate, HttpDelegate, MipComponent,
    StorageDelegate, TaskDispatcherDelegate,
};
use crate::error::Result;
use crate::protection::cache::LicenseCache;
use crate::protection::codec;
use crate::protection::engine::{ProtectionEngine, ProtectionEngineSettings};
use crate::protection::keystore::TenantKeystore;
use crate::protection::license::PublishingLicenseInfo;
use crate::registry::EngineRegistry;

#[derive(Clone)]
pub struct ProtectionProfileSettings {
    pub context: Arc<MipContext>,
    pub cache_storage_type: CacheStorageType,
    pub consent_delegate: Arc<dyn ConsentDelegate>,
    pub http_delegate: Option<Arc<dyn HttpDelegate>>,
    pub storage_delegate: Option<Arc<dyn StorageDelegate>>,
    pub task_dispatcher: Option<Arc<dyn TaskDispatcherDelegate>>,
    pub session_id: String,
    pub can_cache_licenses: bool,
    pub custom_settings: CustomSettings,
    /// Service url prefix to its replacement
    pub redirection_uris: BTreeMap<String, String>,
}

impl ProtectionProfileSettings {
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
            storage_delegate: None,
            task_dispatcher: None,
            session_id: uuid::Uuid::new_v4().to_string(),
            can_cache_licenses: true,
            custom_settings: CustomSettings::default(),
            redirection_uris: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn http_delegate(mut self, delegate: Arc<dyn HttpDelegate>) -> Self {
        self.http_delegate = Some(delegate);
        self
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

    #[must_use]
    pub fn can_cache_licenses(mut self, can_cache: bool) -> Self {
        self.can_cache_licenses = can_cache;
        self
    }

    #[must_use]
    pub fn custom_settings(mut self, settings: CustomSettings) -> Self {
        self.custom_settings = settings;
        self
    }

    #[must_use]
    pub fn redirect(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.redirection_uris.insert(from.into(), to.into());
        self
    }

    fn dispatcher(&self) -> Arc<dyn TaskDispatcherDelegate> {
        self.task_dispatcher
            .clone()
            .unwrap_or_else(|| self.context.task_dispatcher().clone())
    }
}

impl std::fmt::Debug for ProtectionProfileSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionProfileSettings")
            .field("cache_storage_type", &self.cache_storage_type)
            .field("session_id", &self.session_id)
            .field("can_cache_licenses", &self.can_cache_licenses)
            .field("redirection_uris", &self.redirection_uris)
            .finish_non_exhaustive()
    }
}

/// Collaborators the profile hands to each of its engines
pub(crate) struct ProfileServices {
    pub context: Arc<MipContext>,
    pub http: Arc<dyn HttpDelegate>,
    pub dispatcher: Arc<dyn TaskDispatcherDelegate>,
    pub consent: Arc<dyn ConsentDelegate>,
    pub keystore: TenantKeystore,
    pub license_cache: Option<LicenseCache>,
    redirection_uris: BTreeMap<String, String>,
}

impl ProfileServices {
    /// Apply the first matching redirection prefix
    pub fn redirect(&self, url: &str) -> String {
        for (from, to) in &self.redirection_uris {
            if let Some(rest) = url
                .get(..from.len())
                .filter(|prefix| prefix.eq_ignore_ascii_case(from))
                .and_then(|_| url.get(from.len()..))
            {
                return format!("{}{}", to, rest);
            }
        }
        url.to_string()
    }
}

pub struct ProtectionProfile {
    settings: ProtectionProfileSettings,
    services: Arc<ProfileServices>,
    engines: EngineRegistry<ProtectionEngine>,
}

impl ProtectionProfile {
    pub fn load(settings: ProtectionProfileSettings) -> Result<Arc<Self>> {
        settings.context.ensure_active()?;
        let storage = match &settings.storage_delegate {
            Some(storage) => ApplicationStorage::wrap(storage.clone()),
            None => settings.context.profile_storage(settings.cache_storage_type)?,
        };
        Self::load_with_storage(settings, storage)
    }

    /// Load over storage already resolved by the caller
    pub(crate) fn load_with_storage(
        settings: ProtectionProfileSettings,
        storage: Arc<dyn StorageDelegate>,
    ) -> Result<Arc<Self>> {
        let context = settings.context.clone();
        context.ensure_active()?;
        let license_cache = if settings.can_cache_licenses {
            Some(LicenseCache::open(&context, &storage)?)
        } else {
            None
        };
        let services = Arc::new(ProfileServices {
            context: context.clone(),
            http: match &settings.http_delegate {
                Some(http) => ApplicationHttp::wrap(http.clone()),
                None => context.http_delegate().clone(),
            },
            dispatcher: settings.dispatcher(),
            consent: settings.consent_delegate.clone(),
            keystore: TenantKeystore::open(&context, &storage)?,
            license_cache,
            redirection_uris: settings.redirection_uris.clone(),
        });
        let engines = EngineRegistry::open(&context, &storage, MipComponent::Protection)?;

        mip_log!(
            context,
            LogLevel::Info,
            "Loaded protection profile (session {}, cache {:?})",
            settings.session_id,
            settings.cache_storage_type
        );
        Ok(Arc::new(Self {
            settings,
            services,
            engines,
        }))
    }

    pub fn load_async(settings: ProtectionProfileSettings) -> AsyncOperation<Arc<Self>> {
        let dispatcher = settings.dispatcher();
        let timeout = settings.context.task_timeout();
        dispatch(&dispatcher, "load-protection-profile", move || Self::load(settings))
            .within(timeout)
    }

    pub fn settings(&self) -> &ProtectionProfileSettings {
        &self.settings
    }

    pub fn context(&self) -> &Arc<MipContext> {
        &self.services.context
    }

    /// Ids of every engine known to the profile's storage
    pub fn list_engines(&self) -> Result<Vec<String>> {
        self.services.context.ensure_active()?;
        self.engines.list()
    }

    pub fn list_engines_async(self: &Arc<Self>) -> AsyncOperation<Vec<String>> {
        let profile = self.clone();
        dispatch(&self.services.dispatcher, "list-protection-engines", move || {
            profile.list_engines()
        })
        .within(self.services.context.task_timeout())
    }

    pub fn add_engine(&self, settings: ProtectionEngineSettings) -> Result<Arc<ProtectionEngine>> {
        let engine = ProtectionEngine::create(self.services.clone(), settings)?;
        self.engines
            .add(engine.engine_id(), engine.client_data(), engine.clone())?;
        Ok(engine)
    }

    pub fn add_engine_async(
        self: &Arc<Self>,
        settings: ProtectionEngineSettings,
    ) -> AsyncOperation<Arc<ProtectionEngine>> {
        let profile = self.clone();
        dispatch(&self.services.dispatcher, "add-protection-engine", move || {
            profile.add_engine(settings)
        })
        .within(self.services.context.task_timeout())
    }

    /// A loaded engine by id
    pub fn engine(&self, engine_id: &str) -> Option<Arc<ProtectionEngine>> {
        self.engines.get(engine_id)
    }

    pub fn delete_engine(&self, engine_id: &str) -> Result<()> {
        self.services.context.ensure_active()?;
        self.engines.delete(engine_id)?;
        mip_log!(
            self.services.context,
            LogLevel::Info,
            "Deleted protection engine {}",
            engine_id
        );
        Ok(())
    }

    pub fn delete_engine_async(self: &Arc<Self>, engine_id: impl Into<String>) -> AsyncOperation<()> {
        let profile = self.clone();
        let engine_id = engine_id.into();
        dispatch(&self.services.dispatcher, "delete-protection-engine", move || {
            profile.delete_engine(&engine_id)
        })
        .within(self.services.context.task_timeout())
    }

    /// Read the public fields of a publishing license without opening it
    pub fn get_publishing_license_info(&self, serialized: &[u8]) -> Result<PublishingLicenseInfo> {
        self.get_publishing_license_info_with_pre_license(serialized, &[])
    }

    pub fn get_publishing_license_info_with_pre_license(
        &self,
        serialized: &[u8],
        pre_license: &[u8],
    ) -> Result<PublishingLicenseInfo> {
        let context = &self.services.context;
        let license = codec::decode_publishing_license(
            serialized,
            context.json_delegate().as_ref(),
            context.xml_delegate().as_ref(),
        )?;
        let mut info =
            PublishingLicenseInfo::with_pre_license(serialized.to_vec(), pre_license.to_vec());
        info.set_parsed_data(license.body.to_parsed());
        Ok(info)
    }

    /// Version of this SDK
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

impl std::fmt::Debug for ProtectionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionProfile")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
