//! Process-scoped SDK state
//!
//! A [`MipContext`] owns the resolved delegates and the effective feature
//! flags. Profiles hold an `Arc` to it; nothing in the crate reads global
//! state.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use crate::config::{
    custom_settings, ApplicationInfo, CacheStorageType, CustomSettings, LogLevel, MipConfiguration,
};
use crate::delegates::{
    ApplicationHttp, ApplicationJson, ApplicationStorage, ApplicationXml, FileStorageDelegate,
    HttpDelegate, InMemoryStorageDelegate, JsonDelegate, LoggerDelegate,
    OfflineHttpDelegate, QuickXmlDelegate, SerdeJsonDelegate, StorageDelegate,
    TaskDispatcherDelegate, TokioTaskDispatcher, TracingLoggerDelegate, XmlDelegate,
};
use crate::error::{MipError, Result};
use crate::flighting::FlightingFeature;

/// Log through the context's logger delegate with call-site information
macro_rules! mip_log {
    ($ctx:expr, $level:expr, $($arg:tt)+) => {
        $ctx.log($level, &format!($($arg)+), module_path!(), file!(), line!())
    };
}
pub(crate) use mip_log;

pub struct MipContext {
    configuration: Arc<MipConfiguration>,
    features: BTreeMap<FlightingFeature, bool>,
    threshold: LogLevel,
    logger: Arc<dyn LoggerDelegate>,
    http: Arc<dyn HttpDelegate>,
    storage: Arc<dyn StorageDelegate>,
    application_storage: bool,
    disk_storage: Mutex<HashMap<CacheStorageType, Arc<dyn StorageDelegate>>>,
    json: Arc<dyn JsonDelegate>,
    xml: Arc<dyn XmlDelegate>,
    dispatcher: Arc<dyn TaskDispatcherDelegate>,
    shut_down: AtomicBool,
}

impl MipContext {
    /// Validate the configuration, prepare the MIP path and resolve delegates
    pub fn create(configuration: Arc<MipConfiguration>) -> Result<Arc<Self>> {
        configuration.application_info().validate()?;
        std::fs::create_dir_all(configuration.mip_path()).map_err(|e| {
            MipError::file_io(format!(
                "Failed to create MIP path {}: {}",
                configuration.mip_path().display(),
                e
            ))
        })?;

        let features = configuration.features().effective();
        let diagnostics = configuration.diagnostics();
        let threshold = if diagnostics.is_trace_logging_enabled {
            LogLevel::Trace
        } else {
            configuration.log_level()
        };

        let logger = configuration
            .logger_delegate()
            .cloned()
            .unwrap_or_else(|| Arc::new(TracingLoggerDelegate::new()));
        let http = match &diagnostics.http_delegate {
            Some(http) => ApplicationHttp::wrap(http.clone()),
            None => Arc::new(OfflineHttpDelegate),
        };
        let integrity = features
            .get(&FlightingFeature::EncryptedDatabaseIntegrityChecking)
            .copied()
            .unwrap_or(true);
        let application_storage = configuration.storage_delegate().is_some();
        let storage = match configuration.storage_delegate() {
            Some(storage) => ApplicationStorage::wrap(storage.clone()),
            None => Arc::new(InMemoryStorageDelegate::new(integrity)),
        };
        let json = match configuration.json_delegate() {
            Some(json) => ApplicationJson::wrap(json.clone()),
            None => Arc::new(SerdeJsonDelegate),
        };
        let xml = match configuration.xml_delegate() {
            Some(xml) => ApplicationXml::wrap(xml.clone()),
            None => Arc::new(QuickXmlDelegate),
        };
        let dispatcher = match &diagnostics.task_dispatcher {
            Some(dispatcher) => dispatcher.clone(),
            None => Arc::new(TokioTaskDispatcher::new()?) as Arc<dyn TaskDispatcherDelegate>,
        };

        logger.init(configuration.mip_path());
        info!(
            application = %configuration.application_info().application_id,
            path = %configuration.mip_path().display(),
            offline = configuration.is_offline_only(),
            "mip context created"
        );

        Ok(Arc::new(Self {
            configuration,
            features,
            threshold,
            logger,
            http,
            storage,
            application_storage,
            disk_storage: Mutex::new(HashMap::new()),
            json,
            xml,
            dispatcher,
            shut_down: AtomicBool::new(false),
        }))
    }

    pub fn configuration(&self) -> &MipConfiguration {
        &self.configuration
    }

    pub fn application_info(&self) -> &ApplicationInfo {
        self.configuration.application_info()
    }

    pub fn mip_path(&self) -> &Path {
        self.configuration.mip_path()
    }

    pub fn is_offline_only(&self) -> bool {
        self.configuration.is_offline_only()
    }

    pub fn threshold_log_level(&self) -> LogLevel {
        self.threshold
    }

    pub fn is_feature_enabled(&self, feature: FlightingFeature) -> bool {
        self.features
            .get(&feature)
            .copied()
            .unwrap_or_else(|| feature.default_value())
    }

    /// Effective value of every feature
    pub fn flighting_features(&self) -> &BTreeMap<FlightingFeature, bool> {
        &self.features
    }

    pub fn custom_settings(&self) -> &CustomSettings {
        &self.configuration.diagnostics().custom_settings
    }

    /// Limit on how long an `_async` operation may run, from the
    /// `TaskTimeoutMs` custom setting; zero or absent means no limit
    pub fn task_timeout(&self) -> Option<Duration> {
        self.custom_settings()
            .get_u64(custom_settings::TASK_TIMEOUT_MS)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn is_local_caching_enabled(&self) -> bool {
        self.configuration.diagnostics().is_local_caching_enabled
    }

    pub fn logger_delegate(&self) -> &Arc<dyn LoggerDelegate> {
        &self.logger
    }

    pub fn http_delegate(&self) -> &Arc<dyn HttpDelegate> {
        &self.http
    }

    pub fn storage_delegate(&self) -> &Arc<dyn StorageDelegate> {
        &self.storage
    }

    /// Storage a profile uses when its settings carry no storage delegate
    ///
    /// In-memory caching (or caching disabled) gives the profile a private
    /// store. Otherwise the application's storage delegate is used, and
    /// without one the on-disk store under the MIP path, shared by every
    /// profile of this context.
    pub(crate) fn profile_storage(&self, cache: CacheStorageType) -> Result<Arc<dyn StorageDelegate>> {
        let integrity = self.is_feature_enabled(FlightingFeature::EncryptedDatabaseIntegrityChecking);
        if cache == CacheStorageType::InMemory || !self.is_local_caching_enabled() {
            return Ok(Arc::new(InMemoryStorageDelegate::new(integrity)));
        }
        if self.application_storage {
            return Ok(self.storage.clone());
        }
        let mut disk = self.disk_storage.lock();
        if let Some(storage) = disk.get(&cache) {
            return Ok(storage.clone());
        }
        let root = self.mip_path().join(match cache {
            CacheStorageType::OnDiskEncrypted => "storage-encrypted",
            _ => "storage",
        });
        let storage: Arc<dyn StorageDelegate> = Arc::new(FileStorageDelegate::open(
            &root,
            cache == CacheStorageType::OnDiskEncrypted,
            integrity,
        )?);
        disk.insert(cache, storage.clone());
        Ok(storage)
    }

    pub fn json_delegate(&self) -> &Arc<dyn JsonDelegate> {
        &self.json
    }

    pub fn xml_delegate(&self) -> &Arc<dyn XmlDelegate> {
        &self.xml
    }

    pub fn task_dispatcher(&self) -> &Arc<dyn TaskDispatcherDelegate> {
        &self.dispatcher
    }

    /// Forward to the logger delegate when `level` meets the threshold
    pub fn log(&self, level: LogLevel, message: &str, function: &str, file: &str, line: u32) {
        if level >= self.threshold {
            self.logger.write_to_log(level, message, function, file, line);
        }
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(MipError::not_supported("MIP context has been shut down"))
        } else {
            Ok(())
        }
    }

    /// Cancel pending work and flush the logger; returns `false` when already shut down
    pub fn shut_down(&self) -> bool {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.dispatcher.cancel_all_tasks();
        if !self.configuration.diagnostics().is_fast_shutdown_enabled {
            self.logger.flush();
        }
        info!("mip context shut down");
        true
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MipContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MipContext")
            .field("configuration", &self.configuration)
            .field("threshold", &self.threshold)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
