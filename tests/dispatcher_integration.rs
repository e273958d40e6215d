mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use infoprotect::config::custom_settings;
use infoprotect::delegates::Task;
use infoprotect::prelude::*;
use parking_lot::Mutex;

/// Queues tasks until the test releases them
#[derive(Default)]
struct QueueDispatcher {
    queue: Mutex<Vec<(String, Task)>>,
}

impl QueueDispatcher {
    fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    fn run_all(&self) {
        let tasks: Vec<(String, Task)> = self.queue.lock().drain(..).collect();
        for (_, task) in tasks {
            task();
        }
    }
}

impl TaskDispatcherDelegate for QueueDispatcher {
    fn dispatch_task(&self, task_id: &str, task: Task) {
        self.queue.lock().push((task_id.to_string(), task));
    }

    fn dispatch_task_delayed(&self, task_id: &str, task: Task, _delay: Duration) {
        self.dispatch_task(task_id, task);
    }

    fn execute_task_on_independent_thread(&self, task_id: &str, task: Task) {
        self.dispatch_task(task_id, task);
    }

    fn cancel_task(&self, task_id: &str) -> bool {
        let mut queue = self.queue.lock();
        let before = queue.len();
        queue.retain(|(id, _)| id != task_id);
        queue.len() != before
    }

    fn cancel_all_tasks(&self) -> bool {
        let mut queue = self.queue.lock();
        let had_tasks = !queue.is_empty();
        queue.clear();
        had_tasks
    }
}

fn context_on(dir: &tempfile::TempDir, dispatcher: Arc<QueueDispatcher>) -> Result<Arc<MipContext>> {
    let mut diagnostics = DiagnosticConfiguration::default();
    diagnostics.task_dispatcher = Some(dispatcher as Arc<dyn TaskDispatcherDelegate>);
    context_with(dir, |b| b.diagnostics(diagnostics))
}

#[tokio::test]
async fn test_operations_run_on_application_dispatcher() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let dispatcher = Arc::new(QueueDispatcher::default());
    let profile = protection_profile(context_on(&dir, dispatcher.clone())?)?;
    protection_engine(&profile, ALICE)?;

    let operation = profile.list_engines_async();
    assert_eq!(dispatcher.pending(), 1);
    dispatcher.run_all();
    assert_eq!(operation.await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_operation_never_runs() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let dispatcher = Arc::new(QueueDispatcher::default());
    let profile = protection_profile(context_on(&dir, dispatcher.clone())?)?;

    let operation = profile.add_engine_async(
        ProtectionEngineSettings::new(Identity::new(ALICE))
            .engine_id("never")
            .auth_delegate(auth()),
    );
    let control = operation.control();
    assert!(control.cancel());
    assert!(!control.cancel());
    assert!(control.is_cancelled());
    assert_eq!(dispatcher.pending(), 0);

    let err = operation.await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperationCancelled);
    assert!(profile.engine("never").is_none());
    Ok(())
}

#[tokio::test]
async fn test_shut_down_cancels_pending_work() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let dispatcher = Arc::new(QueueDispatcher::default());
    let context = context_on(&dir, dispatcher.clone())?;
    let profile = protection_profile(context.clone())?;

    let operation = profile.list_engines_async();
    assert!(context.shut_down());
    assert_eq!(dispatcher.pending(), 0);
    assert_eq!(operation.await.unwrap_err().kind(), ErrorKind::OperationCancelled);
    Ok(())
}

#[tokio::test]
async fn test_task_timeout_cancels_stalled_operations() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let dispatcher = Arc::new(QueueDispatcher::default());
    let mut diagnostics = DiagnosticConfiguration::default();
    diagnostics.task_dispatcher = Some(dispatcher.clone() as Arc<dyn TaskDispatcherDelegate>);
    diagnostics.custom_settings = CustomSettings::default().with(custom_settings::TASK_TIMEOUT_MS, "25");
    let context = context_with(&dir, |b| b.diagnostics(diagnostics))?;
    assert_eq!(context.task_timeout(), Some(Duration::from_millis(25)));
    let profile = protection_profile(context)?;

    let operation = profile.list_engines_async();
    let control = operation.control();
    assert_eq!(dispatcher.pending(), 1);
    let err = operation.await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperationCancelled);
    assert!(control.is_cancelled());
    assert_eq!(dispatcher.pending(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispatcher_on_existing_runtime() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let dispatcher = Arc::new(TokioTaskDispatcher::with_handle(tokio::runtime::Handle::current()));
    let profile = ProtectionProfile::load(
        ProtectionProfileSettings::new(
            context(&dir)?,
            CacheStorageType::InMemory,
            Arc::new(FixedConsentDelegate(Consent::AcceptAlways)),
        )
        .task_dispatcher(dispatcher.clone()),
    )?;

    let engine = profile
        .add_engine_async(ProtectionEngineSettings::new(Identity::new(BOB)).auth_delegate(auth()))
        .await?;
    let templates = engine.get_templates_async().await?;
    assert!(templates.is_empty());

    let (tx, rx) = tokio::sync::oneshot::channel();
    dispatcher.dispatch_task_delayed(
        "delayed",
        Box::new(move || {
            let _ = tx.send(());
        }),
        Duration::from_millis(20),
    );
    assert!(rx.await.is_ok());
    Ok(())
}

#[test]
fn test_context_configuration() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let context = context_with(&dir, |b| {
        b.feature(FlightingFeature::DoubleKey, true)
            .feature(FlightingFeature::PreLicensing, false)
            .offline_only(true)
            .log_level(LogLevel::Warning)
    })?;
    assert!(context.is_feature_enabled(FlightingFeature::DoubleKey));
    assert!(!context.is_feature_enabled(FlightingFeature::PreLicensing));
    assert!(context.is_feature_enabled(FlightingFeature::VariablePolicyTtl));
    assert_eq!(
        context.flighting_features().get(&FlightingFeature::CrossTenantUserCert),
        Some(&true)
    );
    assert!(context.is_offline_only());
    assert_eq!(context.threshold_log_level(), LogLevel::Warning);
    assert_eq!(context.mip_path(), dir.path());
    assert_eq!(context.application_info().application_name, "Integration Tests");
    Ok(())
}

#[test]
fn test_invalid_application_info() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let err = MipConfiguration::builder(ApplicationInfo::new("", "App", "1.0"), dir.path())
        .build()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadInput);

    let err = MipConfiguration::builder(ApplicationInfo::new("id", "App;Name", "1.0"), dir.path())
        .build()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadInput);
    Ok(())
}
