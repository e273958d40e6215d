mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::*;
use infoprotect::error::{BadInputCode, NetworkCategory};
use infoprotect::prelude::*;
use infoprotect::protection::rights;
use infoprotect::NoPermissionsCategory;

fn publish(engine: &ProtectionEngine, descriptor: ProtectionDescriptor) -> Result<Arc<ProtectionHandler>> {
    engine.create_protection_handler_for_publishing(&PublishingSettings::new(descriptor))
}

#[test]
fn test_publish_then_consume_as_recipient() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = protection_profile(context(&dir)?)?;
    let alice = protection_engine(&profile, ALICE)?;
    let bob = protection_engine(&profile, BOB)?;

    let publishing = publish(&alice, shared_with_bob()?)?;
    assert_eq!(publishing.owner(), ALICE);
    assert!(publishing.is_issued_to_owner());
    assert!(publishing.access_check(rights::EDIT_RIGHTS_DATA));
    assert_eq!(publishing.cipher_mode(), CipherMode::Cbc4k);
    assert!(!publishing.does_use_deprecated_algorithms());

    let ciphertext = publishing.encrypt_content(TEST_PLAINTEXT)?;
    assert_ne!(&ciphertext[..TEST_PLAINTEXT.len()], TEST_PLAINTEXT);

    let consumption = bob.create_protection_handler_for_consumption(&ConsumptionSettings::from_license(
        publishing.serialized_publishing_license().to_vec(),
    ))?;
    assert_eq!(consumption.rights(), ["VIEW".to_string()]);
    assert!(consumption.access_check("view"));
    assert!(!consumption.access_check(rights::EDIT));
    assert_eq!(consumption.issued_to(), BOB);
    assert!(!consumption.is_issued_to_owner());
    assert_eq!(consumption.content_id(), publishing.content_id());
    assert_eq!(consumption.decrypt_content(&ciphertext)?, TEST_PLAINTEXT);
    Ok(())
}

#[test]
fn test_user_without_rights_is_denied() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = protection_profile(context(&dir)?)?;
    let alice = protection_engine(&profile, ALICE)?;
    let mallory = protection_engine(&profile, MALLORY)?;

    let publishing = publish(&alice, shared_with_bob()?)?;
    let err = mallory
        .create_protection_handler_for_consumption(&ConsumptionSettings::from_license(
            publishing.serialized_publishing_license().to_vec(),
        ))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoPermissions);
    assert!(err.is_a(ErrorKind::AccessDenied));
    assert_eq!(err.no_permissions_category(), Some(NoPermissionsCategory::AccessDenied));
    assert_eq!(err.owner(), Some(ALICE));
    assert_eq!(err.referrer(), Some("mailto:alice@contoso.com"));
    Ok(())
}

#[test]
fn test_chunked_encryption_matches_single_call() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = protection_profile(context(&dir)?)?;
    let alice = protection_engine(&profile, ALICE)?;
    let handler = publish(&alice, shared_with_bob()?)?;

    let plaintext: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let block = handler.block_size();
    assert_eq!(block, 4096);

    let mut ciphertext = Vec::new();
    let chunks: Vec<&[u8]> = plaintext.chunks(block).collect();
    for (index, chunk) in chunks.iter().enumerate() {
        let is_final = index + 1 == chunks.len();
        let mut out = vec![0u8; handler.protected_content_length(chunk.len() as u64, is_final) as usize];
        let written = handler.encrypt_buffer((index * block) as u64, chunk, &mut out, is_final)?;
        ciphertext.extend_from_slice(&out[..written]);
    }
    assert_eq!(
        ciphertext.len() as u64,
        handler.protected_content_length(plaintext.len() as u64, true)
    );
    assert_eq!(ciphertext, handler.encrypt_content(&plaintext)?);
    assert_eq!(handler.decrypt_content(&ciphertext)?, plaintext);

    let mut too_small = vec![0u8; 8];
    let err = handler.encrypt_buffer(0, &plaintext[..block], &mut too_small, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientBuffer);
    Ok(())
}

#[test]
fn test_deprecated_algorithm_uses_ecb() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = protection_profile(context(&dir)?)?;
    let alice = protection_engine(&profile, ALICE)?;
    let handler = alice.create_protection_handler_for_publishing(
        &PublishingSettings::new(shared_with_bob()?).deprecated_algorithm_preferred(true),
    )?;
    assert_eq!(handler.cipher_mode(), CipherMode::Ecb);
    assert!(handler.does_use_deprecated_algorithms());
    assert_eq!(handler.protected_content_length(100, true), 100);

    let plaintext = [7u8; 64];
    let ciphertext = handler.encrypt_content(&plaintext)?;
    assert_eq!(&ciphertext[..16], &ciphertext[16..32]);
    assert_eq!(handler.decrypt_content(&ciphertext)?, plaintext);
    Ok(())
}

#[test]
fn test_json_license_is_detected_on_consumption() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = protection_profile(context(&dir)?)?;
    let alice = protection_engine(&profile, ALICE)?;
    let bob = protection_engine(&profile, BOB)?;

    let publishing = alice.create_protection_handler_for_publishing(
        &PublishingSettings::new(shared_with_bob()?).json_format(true),
    )?;
    assert_eq!(publishing.serialized_publishing_license().first(), Some(&b'{'));
    let consumption = bob.create_protection_handler_for_consumption(&ConsumptionSettings::from_license(
        publishing.serialized_publishing_license().to_vec(),
    ))?;
    assert_eq!(consumption.content_id(), publishing.content_id());
    Ok(())
}

#[test]
fn test_tampered_license_is_not_trusted() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = protection_profile(context(&dir)?)?;
    let alice = protection_engine(&profile, ALICE)?;
    let bob = protection_engine(&profile, BOB)?;

    let publishing = publish(&alice, shared_with_bob()?)?;
    let original = String::from_utf8(publishing.serialized_publishing_license().to_vec())
        .map_err(|e| MipError::internal(e.to_string()))?;
    let tampered = original.replace("<Owner>alice@contoso.com</Owner>", "<Owner>bob@contoso.com</Owner>");
    assert_ne!(original, tampered);

    let err = bob
        .create_protection_handler_for_consumption(&ConsumptionSettings::from_license(tampered.into_bytes()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadInput);
    assert_eq!(err.bad_input_code(), Some(BadInputCode::LicenseNotTrusted));
    Ok(())
}

#[test]
fn test_expired_content_still_opens_for_owner() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = protection_profile(context(&dir)?)?;
    let alice = protection_engine(&profile, ALICE)?;
    let bob = protection_engine(&profile, BOB)?;

    let descriptor = ProtectionDescriptorBuilder::from_user_rights(vec![UserRights::new([BOB], ["VIEW"])])
        .content_valid_until(Utc::now() - Duration::hours(1))
        .build()?;
    let publishing = publish(&alice, descriptor)?;
    let settings = ConsumptionSettings::from_license(publishing.serialized_publishing_license().to_vec());

    let err = bob.create_protection_handler_for_consumption(&settings).unwrap_err();
    assert_eq!(err.no_permissions_category(), Some(NoPermissionsCategory::AccessExpired));

    let owner = alice.create_protection_handler_for_consumption(&settings)?;
    assert!(owner.access_check(rights::OWNER));
    assert!(owner.access_check(rights::PRINT));
    Ok(())
}

#[test]
fn test_pre_license_allows_offline_consumption() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = protection_profile(context(&dir)?)?;
    let alice = protection_engine(&profile, ALICE)?;
    let bob = protection_engine(&profile, BOB)?;

    let publishing = alice.create_protection_handler_for_publishing(
        &PublishingSettings::new(shared_with_bob()?).pre_license_for(BOB),
    )?;
    let pre_license = publishing.serialized_pre_license(PreLicenseFormat::Json).to_vec();
    assert!(!pre_license.is_empty());
    assert!(!publishing.serialized_pre_license(PreLicenseFormat::Xml).is_empty());

    let pl = publishing.serialized_publishing_license().to_vec();
    let err = bob
        .create_protection_handler_for_consumption(&ConsumptionSettings::from_license(pl.clone()).offline_only(true))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(err.network_category(), Some(NetworkCategory::Offline));

    let info = Arc::new(PublishingLicenseInfo::with_pre_license(pl, pre_license));
    let handler = bob.create_protection_handler_for_consumption(&ConsumptionSettings::new(info).offline_only(true))?;
    assert_eq!(handler.rights(), ["VIEW".to_string()]);
    assert!(!handler.serialized_pre_license(PreLicenseFormat::Json).is_empty());
    Ok(())
}

#[test]
fn test_cached_license_serves_offline_access() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = protection_profile(context(&dir)?)?;
    let alice = protection_engine(&profile, ALICE)?;
    let bob = protection_engine(&profile, BOB)?;

    let descriptor = ProtectionDescriptorBuilder::from_user_rights(vec![UserRights::new([BOB], ["VIEW", "PRINT"])])
        .allow_offline_access(true)
        .build()?;
    let publishing = publish(&alice, descriptor)?;
    let settings = ConsumptionSettings::from_license(publishing.serialized_publishing_license().to_vec());

    bob.create_protection_handler_for_consumption(&settings)?;
    let offline = bob.create_protection_handler_for_consumption(&settings.clone().offline_only(true))?;
    assert_eq!(offline.rights(), ["PRINT".to_string(), "VIEW".to_string()]);
    Ok(())
}

#[test]
fn test_republishing_keeps_content_id_and_needs_rights() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = protection_profile(context(&dir)?)?;
    let alice = protection_engine(&profile, ALICE)?;
    let bob = protection_engine(&profile, BOB)?;

    let original = publish(&alice, shared_with_bob()?)?;
    let ciphertext = original.encrypt_content(TEST_PLAINTEXT)?;
    let widened = ProtectionDescriptorBuilder::from_user_rights(vec![UserRights::new(["contoso.com"], ["VIEW", "PRINT"])])
        .build()?;
    let settings = PublishingSettings::new(widened).republish(original.serialized_publishing_license().to_vec());

    let err = bob.create_protection_handler_for_publishing(&settings).unwrap_err();
    assert_eq!(err.no_permissions_category(), Some(NoPermissionsCategory::NotOwner));

    let republished = alice.create_protection_handler_for_publishing(&settings)?;
    assert_eq!(republished.content_id(), original.content_id());
    assert_eq!(republished.decrypt_content(&ciphertext)?, TEST_PLAINTEXT);
    Ok(())
}

#[test]
fn test_templates() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = protection_profile(context(&dir)?)?;
    let engine = profile.add_engine(
        ProtectionEngineSettings::new(Identity::new(ALICE))
            .auth_delegate(auth())
            .template(finance_template())
            .template(TemplateDescriptor::new("tpl-old", "Old", vec![UserRights::new([ALICE], ["VIEW"])]).archived(true))
            .label_template("finance-label", "tpl-finance"),
    )?;

    let templates = engine.get_templates()?;
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0].id, "tpl-finance");

    let handler = publish(&engine, ProtectionDescriptorBuilder::from_template("tpl-finance").build()?)?;
    assert!(handler.access_check(rights::EXPORT));

    let err = publish(&engine, ProtectionDescriptorBuilder::from_template("tpl-old").build()?).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplateArchived);
    let err = publish(&engine, ProtectionDescriptorBuilder::from_template("tpl-missing").build()?).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
    assert!(err.is_a(ErrorKind::BadInput));

    let granted = engine.get_rights_for_label_id("doc-1", "finance-label", ALICE, None)?;
    assert!(granted.contains(&"OWNER".to_string()));
    let granted = engine.get_rights_for_label_id("doc-1", "finance-label", ALICE, Some(BOB))?;
    assert!(granted.is_empty());
    let err = engine.get_rights_for_label_id("doc-1", "unknown", ALICE, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LabelNotFound);
    Ok(())
}

#[test]
fn test_double_key_requires_feature() -> Result<()> {
    let descriptor = || {
        ProtectionDescriptorBuilder::from_user_rights(vec![UserRights::new([BOB], ["VIEW"])])
            .double_key_url("https://dke.contoso.com/keys/finance")
            .build()
    };

    let dir = tempfile::tempdir()?;
    let profile = protection_profile(context(&dir)?)?;
    let alice = protection_engine(&profile, ALICE)?;
    let err = publish(&alice, descriptor()?).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DoubleKeyDisabled);

    let dir = tempfile::tempdir()?;
    let context = context_with(&dir, |b| b.feature(FlightingFeature::DoubleKey, true))?;
    let profile = protection_profile(context)?;
    let alice = protection_engine(&profile, ALICE)?;
    let handler = publish(&alice, descriptor()?)?;
    let info = profile.get_publishing_license_info(handler.serialized_publishing_license())?;
    assert!(info.is_double_key_license());
    Ok(())
}

#[test]
fn test_consent_and_authentication_failures() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let context = context(&dir)?;
    let rejecting = ProtectionProfile::load(ProtectionProfileSettings::new(
        context.clone(),
        CacheStorageType::InMemory,
        Arc::new(FixedConsentDelegate(Consent::Reject)),
    ))?;
    let alice = protection_engine(&rejecting, ALICE)?;
    assert_eq!(publish(&alice, shared_with_bob()?).unwrap_err().kind(), ErrorKind::ConsentDenied);

    let profile = protection_profile(context)?;
    let anonymous = profile.add_engine(ProtectionEngineSettings::new(Identity::new(ALICE)))?;
    let err = publish(&anonymous, shared_with_bob()?).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoAuthToken);
    assert!(err.is_a(ErrorKind::AccessDenied));

    let empty_token = profile.add_engine(
        ProtectionEngineSettings::new(Identity::new(ALICE))
            .auth_delegate(Arc::new(StaticTokenAuthDelegate::new(""))),
    )?;
    assert_eq!(publish(&empty_token, shared_with_bob()?).unwrap_err().kind(), ErrorKind::NoAuthToken);
    Ok(())
}

#[test]
fn test_offline_context_publishes_without_token() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let context = context_with(&dir, |b| b.offline_only(true))?;
    let profile = protection_profile(context)?;
    let engine = profile.add_engine(ProtectionEngineSettings::new(Identity::new(ALICE)))?;
    let handler = publish(&engine, shared_with_bob()?)?;
    assert_eq!(handler.issued_to(), ALICE);
    Ok(())
}

#[test]
fn test_publishing_license_info() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = protection_profile(context(&dir)?)?;
    let alice = protection_engine(&profile, ALICE)?;
    let handler = publish(&alice, shared_with_bob()?)?;

    let info = profile.get_publishing_license_info(handler.serialized_publishing_license())?;
    assert!(info.is_license_parsed());
    assert!(!info.has_pre_license());
    assert!(!info.is_double_key_license());
    assert_eq!(info.content_id(), handler.content_id());
    assert_eq!(info.owner(), ALICE);
    assert_eq!(info.issuer_id(), "contoso.com");
    assert_eq!(info.domains(), ["contoso.com".to_string()]);
    assert_eq!(info.referral_info_url(), "mailto:alice@contoso.com");
    assert_eq!(info.serialized_publishing_license(), handler.serialized_publishing_license());

    let err = profile.get_publishing_license_info(b"plain text").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContentFormatNotSupported);
    Ok(())
}

#[test]
fn test_delegation_licenses_skip_users_without_rights() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = protection_profile(context(&dir)?)?;
    let alice = protection_engine(&profile, ALICE)?;
    let handler = publish(&alice, shared_with_bob()?)?;
    let info = Arc::new(PublishingLicenseInfo::new(handler.serialized_publishing_license().to_vec()));

    let licenses = alice.create_delegation_licenses(
        &DelegationLicenseSettings::new(info.clone(), vec![BOB.to_string(), MALLORY.to_string()])
            .acquire_end_user_licenses(true),
    )?;
    assert_eq!(licenses.len(), 1);
    assert_eq!(licenses[0].user, BOB);
    assert!(licenses[0].serialized_json_license.starts_with(b"{"));
    assert!(!licenses[0].serialized_xrml_license.is_empty());
    assert!(!licenses[0].user_license(PreLicenseFormat::Xml).is_empty());

    let err = alice
        .create_delegation_licenses(&DelegationLicenseSettings::new(info, Vec::new()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadInput);
    Ok(())
}

#[test]
fn test_engine_management() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = protection_profile(context(&dir)?)?;
    let engine = profile.add_engine(
        ProtectionEngineSettings::new(Identity::new(ALICE))
            .engine_id("engine-a")
            .client_data("opaque"),
    )?;
    assert_eq!(engine.client_data(), "opaque");
    assert_eq!(engine.tenant_id(), "contoso.com");
    assert_eq!(profile.list_engines()?, vec!["engine-a".to_string()]);
    assert!(profile.engine("engine-a").is_some());

    let err = profile
        .add_engine(ProtectionEngineSettings::new(Identity::new("not-an-email")))
        .unwrap_err();
    assert_eq!(err.no_permissions_category(), Some(NoPermissionsCategory::InvalidEmail));

    profile.delete_engine("engine-a")?;
    assert!(profile.list_engines()?.is_empty());
    assert_eq!(profile.delete_engine("engine-a").unwrap_err().kind(), ErrorKind::BadInput);
    assert!(!ProtectionProfile::version().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_async_publish_and_consume() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let profile = protection_profile(context(&dir)?)?;
    let alice = profile
        .add_engine_async(ProtectionEngineSettings::new(Identity::new(ALICE)).auth_delegate(auth()))
        .await?;
    let bob = profile
        .add_engine_async(ProtectionEngineSettings::new(Identity::new(BOB)).auth_delegate(auth()))
        .await?;

    let publishing = alice
        .create_protection_handler_for_publishing_async(PublishingSettings::new(shared_with_bob()?))
        .await?;
    let ciphertext = publishing.encrypt_content(TEST_PLAINTEXT)?;
    let consumption = bob
        .create_protection_handler_for_consumption_async(ConsumptionSettings::from_license(
            publishing.serialized_publishing_license().to_vec(),
        ))
        .await?;
    assert_eq!(consumption.decrypt_content(&ciphertext)?, TEST_PLAINTEXT);

    let mut engines = profile.list_engines_async().await?;
    engines.sort();
    let mut expected = vec![alice.engine_id().to_string(), bob.engine_id().to_string()];
    expected.sort();
    assert_eq!(engines, expected);
    Ok(())
}
