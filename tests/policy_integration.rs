mod common;

use std::path::Path;
use std::sync::Arc;

use common::*;
use infoprotect::config::custom_settings;
use infoprotect::error::NoPolicyCategory;
use infoprotect::prelude::*;
use parking_lot::Mutex;

/// Keeps every log line so tests can look for them
#[derive(Default)]
struct RecordingLogger {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingLogger {
    fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|(_, line)| line.contains(needle))
    }
}

impl LoggerDelegate for RecordingLogger {
    fn init(&self, _storage_path: &Path) {}

    fn flush(&self) {}

    fn write_to_log(&self, level: LogLevel, message: &str, _function: &str, _file: &str, _line: u32) {
        self.lines.lock().push((level, message.to_string()));
    }
}

fn policy_profile(context: Arc<MipContext>) -> Result<Arc<PolicyProfile>> {
    PolicyProfile::load(PolicyProfileSettings::new(context, CacheStorageType::InMemory))
}

fn settings(email: &str) -> PolicyEngineSettings {
    PolicyEngineSettings::new(Identity::new(email)).auth_delegate(auth())
}

#[test]
fn test_label_hierarchy() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = policy_profile(context(&dir)?)?;
    let engine = profile.add_engine(settings(ALICE).policy_data(POLICY_JSON))?;

    let labels = engine.list_sensitivity_labels()?;
    let ids: Vec<&str> = labels.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, ["public", "general", "confidential", "retired"]);

    let confidential = engine.get_label_by_id("confidential")?;
    assert_eq!(confidential.children.len(), 1);
    assert!(confidential.protection.as_ref().is_some_and(|p| p.is_adhoc()));
    let finance = engine.get_label_by_id("confidential-finance")?;
    assert_eq!(finance.parent_id.as_deref(), Some("confidential"));
    assert_eq!(
        engine
            .protection_for_label("confidential-finance")?
            .and_then(|p| p.template_id.as_deref()),
        Some("tpl-finance")
    );
    assert!(engine.protection_for_label("public")?.is_none());
    assert!(!engine.get_label_by_id("retired")?.active);
    assert!(engine.is_downgrade_justification_required());
    Ok(())
}

#[test]
fn test_policy_from_file_in_context_settings() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let policy_path = dir.path().join("policy.json");
    std::fs::write(&policy_path, POLICY_JSON)?;

    let mut diagnostics = DiagnosticConfiguration::default();
    diagnostics.custom_settings = CustomSettings::default()
        .with(custom_settings::POLICY_FILE, policy_path.display().to_string())
        .with(custom_settings::POLICY_TTL_DAYS, "3");
    let context = context_with(&dir, |b| b.diagnostics(diagnostics))?;
    let profile = policy_profile(context)?;

    let engine = profile.add_engine(settings(ALICE))?;
    assert_eq!(engine.default_sensitivity_label().map(|l| l.name.as_str()), Some("General"));
    assert_eq!(engine.policy_ttl_days(), 3);

    let engine = profile.add_engine(settings(BOB).custom_setting(custom_settings::POLICY_TTL_DAYS, "14"))?;
    assert_eq!(engine.policy_ttl_days(), 14);
    Ok(())
}

#[test]
fn test_missing_policy_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = policy_profile(context(&dir)?)?;
    let missing = dir.path().join("absent.json");
    let err = profile
        .add_engine(settings(ALICE).custom_setting(custom_settings::POLICY_FILE, missing.display().to_string()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileIo);
    Ok(())
}

#[test]
fn test_empty_policy() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = policy_profile(context(&dir)?)?;

    let err = profile.add_engine(settings(ALICE)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoPolicy);
    assert_eq!(err.no_policy_category(), Some(NoPolicyCategory::Labels));
    assert!(profile.list_engines()?.is_empty());

    let engine = profile.add_engine(settings(ALICE).custom_setting(custom_settings::LABEL_WITHOUT_POLICY, "true"))?;
    assert!(engine.default_sensitivity_label().is_none());
    assert_eq!(engine.list_sensitivity_labels().unwrap_err().kind(), ErrorKind::NoPolicy);
    Ok(())
}

#[test]
fn test_invalid_policy_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = policy_profile(context(&dir)?)?;
    let duplicate = r#"{"labels":[{"id":"a","name":"A"},{"id":"A","name":"Again"}]}"#;
    assert_eq!(
        profile.add_engine(settings(ALICE).policy_data(duplicate)).unwrap_err().kind(),
        ErrorKind::BadInput
    );
    let bad_default = r#"{"labels":[{"id":"a","name":"A"}],"default_label_id":"b"}"#;
    assert_eq!(
        profile.add_engine(settings(ALICE).policy_data(bad_default)).unwrap_err().kind(),
        ErrorKind::BadInput
    );
    Ok(())
}

#[test]
fn test_policy_auth_flight() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = policy_profile(context(&dir)?)?;
    let anonymous = PolicyEngineSettings::new(Identity::new(ALICE)).policy_data(POLICY_JSON);
    assert_eq!(
        profile.add_engine(anonymous.clone()).unwrap_err().kind(),
        ErrorKind::NoAuthToken
    );

    let dir = tempfile::tempdir()?;
    let context = context_with(&dir, |b| b.feature(FlightingFeature::PolicyAuth, false))?;
    let profile = policy_profile(context)?;
    assert!(profile.add_engine(anonymous).is_ok());
    Ok(())
}

#[test]
fn test_engine_creation_is_logged() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let logger = Arc::new(RecordingLogger::default());
    let context = context_with(&dir, |b| b.logger_delegate(logger.clone()))?;
    let profile = policy_profile(context)?;
    let engine = profile.add_engine(settings(ALICE).engine_id("logged").policy_data(POLICY_JSON))?;
    assert_eq!(engine.engine_id(), "logged");
    assert!(logger.contains("Created policy engine logged"));
    assert!(logger.lines.lock().iter().all(|(level, _)| *level >= LogLevel::Info));
    Ok(())
}

#[test]
fn test_shut_down_context_rejects_work() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let context = context(&dir)?;
    let profile = policy_profile(context.clone())?;
    assert!(context.shut_down());
    assert!(!context.shut_down());

    let err = profile.add_engine(settings(ALICE).policy_data(POLICY_JSON)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupportedOperation);
    assert!(policy_profile(context).is_err());
    Ok(())
}

#[tokio::test]
async fn test_async_engine_management() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = PolicyProfile::load_async(PolicyProfileSettings::new(
        context(&dir)?,
        CacheStorageType::InMemory,
    ))
    .await?;
    let engine = profile
        .add_engine_async(settings(ALICE).engine_id("async").policy_data(POLICY_JSON))
        .await?;
    assert_eq!(engine.list_sensitivity_labels()?.len(), 4);
    assert_eq!(profile.list_engines_async().await?, vec!["async".to_string()]);

    profile.delete_engine_async("async").await?;
    assert!(profile.engine("async").is_none());
    let err = profile.delete_engine_async("async").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadInput);
    Ok(())
}
