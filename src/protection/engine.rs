//! Per-identity protection operations
//!
//! An engine publishes content for its identity's tenant and consumes content
//! published by any trusted tenant. Licensing is performed in-process: the
//! content key is wrapped under the issuer's tenant key and the license body is
//! bound to the content key, so a license cannot be altered without the key.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::async_op::{dispatch, AsyncOperation};
use crate::config::{Cloud, CustomSettings, LogLevel};
use crate::context::mip_log;
use crate::delegates::{
    AuthDelegate, Consent, HttpRequest, HttpResponse, Identity, OAuth2Challenge,
};
use crate::error::{MipError, NetworkCategory, NoPermissionsCategory, Result};
use crate::flighting::FlightingFeature;
use crate::protection::cipher::{AesCryptoProvider, CipherMode, ContentKey};
use crate::protection::codec::{
    self, Binding, LicenseBody, SealedLicense, SealedUseLicense, UseLicenseBody, LICENSE_VERSION,
};
use crate::protection::descriptor::{
    ProtectionDescriptor, ProtectionDescriptorBuilder, ProtectionType, TemplateDescriptor,
};
use crate::protection::handler::{HandlerParts, ProtectionHandler};
use crate::protection::license::{
    ConsumptionSettings, DelegationLicense, DelegationLicenseSettings, LicenseConnectionInfo,
    PreLicenseFormat, PublishingSettings,
};
use crate::protection::profile::ProfileServices;
use crate::protection::rights;

const AUTHORITY: &str = "https://login.windows.net/common";
const DOUBLE_KEY_ALGORITHM: &str = "DKE-AES256";
/// Lifetime of a use license cached for offline access
const CACHED_LICENSE_DAYS: i64 = 30;

/// Settings of one protection engine
#[derive(Clone)]
pub struct ProtectionEngineSettings {
    /// Generated when empty
    pub engine_id: String,
    pub identity: Identity,
    pub auth_delegate: Option<Arc<dyn AuthDelegate>>,
    /// Opaque application data stored with the engine
    pub client_data: String,
    pub locale: String,
    pub custom_settings: CustomSettings,
    pub session_id: String,
    pub cloud: Cloud,
    pub cloud_endpoint_base_url: Option<String>,
    pub underlying_application_id: String,
    pub allow_cloud_service_only: bool,
    /// Template catalogue of the tenant
    pub templates: Vec<TemplateDescriptor>,
    /// Label id to template id
    pub label_templates: BTreeMap<String, String>,
}

impl ProtectionEngineSettings {
    pub fn new(identity: Identity) -> Self {
        Self {
            engine_id: String::new(),
            identity,
            auth_delegate: None,
            client_data: String::new(),
            locale: "en-US".to_string(),
            custom_settings: CustomSettings::default(),
            session_id: String::new(),
            cloud: Cloud::default(),
            cloud_endpoint_base_url: None,
            underlying_application_id: String::new(),
            allow_cloud_service_only: false,
            templates: Vec::new(),
            label_templates: BTreeMap::new(),
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
    pub fn custom_settings(mut self, settings: CustomSettings) -> Self {
        self.custom_settings = settings;
        self
    }

    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    #[must_use]
    pub fn cloud(mut self, cloud: Cloud) -> Self {
        self.cloud = cloud;
        self
    }

    #[must_use]
    pub fn cloud_endpoint_base_url(mut self, url: impl Into<String>) -> Self {
        self.cloud_endpoint_base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn underlying_application_id(mut self, id: impl Into<String>) -> Self {
        self.underlying_application_id = id.into();
        self
    }

    #[must_use]
    pub fn allow_cloud_service_only(mut self, allow: bool) -> Self {
        self.allow_cloud_service_only = allow;
        self
    }

    #[must_use]
    pub fn template(mut self, template: TemplateDescriptor) -> Self {
        self.templates.push(template);
        self
    }

    #[must_use]
    pub fn label_template(mut self, label_id: impl Into<String>, template_id: impl Into<String>) -> Self {
        self.label_templates.insert(label_id.into(), template_id.into());
        self
    }
}

impl std::fmt::Debug for ProtectionEngineSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionEngineSettings")
            .field("engine_id", &self.engine_id)
            .field("identity", &self.identity)
            .field("has_auth_delegate", &self.auth_delegate.is_some())
            .field("locale", &self.locale)
            .field("cloud", &self.cloud)
            .field("templates", &self.templates.len())
            .finish_non_exhaustive()
    }
}

/// A publishing license opened with the issuer's key
struct OpenedLicense {
    body: LicenseBody,
    content_key: ContentKey,
    /// Descriptor with its encrypted application data restored
    descriptor: ProtectionDescriptor,
}

/// Rights of `user` under `descriptor`; the owner also holds OWNER
fn rights_in(descriptor: &ProtectionDescriptor, user: &str) -> Vec<String> {
    let mut granted = descriptor.rights_for(user);
    if !user.is_empty() && descriptor.owner().eq_ignore_ascii_case(user) {
        granted.push(rights::OWNER.to_string());
    }
    rights::normalize_all(granted)
}

pub struct ProtectionEngine {
    settings: ProtectionEngineSettings,
    services: Arc<ProfileServices>,
    tenant_id: String,
    service_url: String,
    consent_remembered: AtomicBool,
}

impl ProtectionEngine {
    pub(crate) fn create(services: Arc<ProfileServices>, mut settings: ProtectionEngineSettings) -> Result<Arc<Self>> {
        services.context.ensure_active()?;
        settings.identity.email = settings.identity.email.trim().to_string();
        if settings.identity.email.is_empty() {
            return Err(MipError::bad_input("Engine identity must have an email"));
        }
        let tenant_id = settings.identity.domain().ok_or_else(|| {
            MipError::no_permissions(
                NoPermissionsCategory::InvalidEmail,
                format!("{} is not a valid email address", settings.identity.email),
                "",
                "",
            )
        })?;
        if settings.engine_id.trim().is_empty() {
            settings.engine_id = Uuid::new_v4().to_string();
        }

        let base_url = settings
            .cloud_endpoint_base_url
            .clone()
            .or_else(|| settings.cloud.default_endpoint_base_url().map(str::to_string))
            .unwrap_or_else(|| format!("https://{}/_rms", tenant_id));
        let service_url = services.redirect(base_url.trim_end_matches('/'));

        let engine = Self {
            settings,
            services,
            tenant_id,
            service_url,
            consent_remembered: AtomicBool::new(false),
        };
        let context = &engine.services.context;
        if context.is_feature_enabled(FlightingFeature::ServiceDiscovery) && !context.is_offline_only() {
            engine.discover_service()?;
        }
        mip_log!(
            context,
            LogLevel::Info,
            "Created protection engine {} for tenant {}",
            engine.settings.engine_id,
            engine.tenant_id
        );
        Ok(Arc::new(engine))
    }

    pub fn engine_id(&self) -> &str {
        &self.settings.engine_id
    }

    pub fn settings(&self) -> &ProtectionEngineSettings {
        &self.settings
    }

    pub fn client_data(&self) -> &str {
        &self.settings.client_data
    }

    /// Issuer of every license this engine publishes
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Licensing service the engine authenticates against
    pub fn service_url(&self) -> &str {
        &self.service_url
    }

    /// Non-archived templates of the tenant
    pub fn get_templates(&self) -> Result<Vec<TemplateDescriptor>> {
        self.services.context.ensure_active()?;
        if !self.services.context.is_offline_only() {
            self.connect()?;
        }
        Ok(self
            .settings
            .templates
            .iter()
            .filter(|t| !t.archived)
            .cloned()
            .collect())
    }

    pub fn get_templates_async(self: &Arc<Self>) -> AsyncOperation<Vec<TemplateDescriptor>> {
        let engine = self.clone();
        dispatch(&self.services.dispatcher, "get-templates", move || engine.get_templates())
            .within(self.services.context.task_timeout())
    }

    /// Rights `delegated_user` (or the engine identity) would hold on a
    /// document protected with the template behind `label_id`
    pub fn get_rights_for_label_id(
        &self,
        document_id: &str,
        label_id: &str,
        owner_email: &str,
        delegated_user: Option<&str>,
    ) -> Result<Vec<String>> {
        self.services.context.ensure_active()?;
        let template_id = self
            .settings
            .label_templates
            .get(label_id)
            .ok_or_else(|| MipError::label_not_found(format!("Label {} has no protection", label_id)))?;
        let template = self.find_template(template_id)?;
        let mut descriptor = ProtectionDescriptorBuilder::from_template(template.id.clone()).build()?;
        descriptor.resolve_template(&template);
        descriptor.set_owner(owner_email);
        let user = self.effective_user(delegated_user);
        mip_log!(
            self.services.context,
            LogLevel::Trace,
            "Resolving rights of {} for label {} on document {}",
            user,
            label_id,
            document_id
        );
        Ok(rights_in(&descriptor, &user))
    }

    pub fn create_protection_handler_for_publishing(
        &self,
        settings: &PublishingSettings,
    ) -> Result<Arc<ProtectionHandler>> {
        let context = &self.services.context;
        context.ensure_active()?;

        let mut descriptor = settings.descriptor.clone();
        if descriptor.is_double_key() && !context.is_feature_enabled(FlightingFeature::DoubleKey) {
            return Err(MipError::double_key_disabled(
                "Double key protection is not enabled",
            ));
        }
        if descriptor.protection_type() == ProtectionType::TemplateBased {
            let template = self.find_template(descriptor.template_id().unwrap_or(""))?;
            descriptor.resolve_template(&template);
        }
        if !context.is_offline_only() {
            self.connect()?;
        }

        let issued_to = self.effective_user(settings.delegated_user_email.as_deref());
        let (content_key, content_id) = match &settings.republishing_license {
            Some(previous) => {
                let opened = self.open_license(previous)?;
                let held = rights_in(&opened.descriptor, &issued_to);
                if !rights::allows(&held, rights::EDIT_RIGHTS_DATA) {
                    return Err(MipError::no_permissions(
                        NoPermissionsCategory::NotOwner,
                        format!("{} may not change the protection of {}", issued_to, opened.body.content_id),
                        opened.descriptor.referrer().unwrap_or(""),
                        opened.descriptor.owner(),
                    ));
                }
                (opened.content_key, opened.body.content_id)
            }
            None => (
                ContentKey::generate(),
                descriptor
                    .content_id()
                    .map(str::to_string)
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
            ),
        };
        descriptor.set_content_id(&content_id);
        if descriptor.owner().is_empty() {
            descriptor.set_owner(&issued_to);
        }

        let cipher_mode = if settings.is_deprecated_algorithm_preferred {
            CipherMode::Ecb
        } else {
            CipherMode::Cbc4k
        };
        let tenant_key = self.services.keystore.get_or_create(&self.tenant_id)?;
        let app_data = descriptor.take_encrypted_app_data();
        let encrypted_app_data = if app_data.is_empty() {
            String::new()
        } else {
            codec::seal(content_key.as_slice(), &serde_json::to_vec(&app_data)?)?
        };

        let body = LicenseBody {
            version: LICENSE_VERSION,
            content_id: content_id.clone(),
            issuer_id: self.tenant_id.clone(),
            owner: descriptor.owner().to_string(),
            issued_time: Utc::now(),
            cipher_mode,
            domains: vec![self.tenant_id.clone()],
            server_public_certificate: tenant_key.key_id().to_string(),
            connection_info: LicenseConnectionInfo {
                extranet_url: format!("{}/licensing", self.service_url),
                intranet_url: String::new(),
            },
            referral_info_url: descriptor.referrer().unwrap_or("").to_string(),
            double_key_algorithm: if descriptor.is_double_key() {
                DOUBLE_KEY_ALGORITHM.to_string()
            } else {
                String::new()
            },
            audited_extraction_allowed: settings.is_audited_extraction_allowed,
            descriptor: descriptor.clone(),
            encrypted_app_data,
            wrapped_content_key: codec::seal(tenant_key.as_slice(), content_key.as_slice())?,
        };
        let license = SealedLicense {
            binding: Binding::hs256(codec::bind(&content_key, &body)?),
            body,
        };
        let publishing_license = codec::encode_publishing_license(&license, settings.publishing_format)?;

        let mut pre_licenses = BTreeMap::new();
        if let Some(request) = &settings.pre_license_user {
            if context.is_feature_enabled(FlightingFeature::PreLicensing) {
                let user = request.delegated_user_email.trim();
                let granted = rights_in(&descriptor, user);
                if granted.is_empty() {
                    mip_log!(
                        context,
                        LogLevel::Warning,
                        "No pre-license for {}: the user holds no rights on {}",
                        user,
                        content_id
                    );
                } else {
                    let pre_license = self.issue_use_license(
                        &content_key,
                        &license.body,
                        user,
                        granted,
                        descriptor.content_valid_until(),
                    )?;
                    for format in [PreLicenseFormat::Xml, PreLicenseFormat::Json] {
                        pre_licenses.insert(format, codec::encode_use_license(&pre_license, format)?);
                    }
                }
            } else {
                mip_log!(context, LogLevel::Info, "Pre-licensing is disabled; skipping pre-license");
            }
        }

        descriptor.set_encrypted_app_data(app_data);
        let granted = rights_in(&descriptor, &issued_to);
        mip_log!(
            context,
            LogLevel::Info,
            "Published content {} with {} for {}",
            content_id,
            cipher_mode,
            issued_to
        );
        Ok(Arc::new(ProtectionHandler::new(HandlerParts {
            provider: Arc::new(AesCryptoProvider::new(&content_key, cipher_mode)?),
            descriptor,
            rights: granted,
            issued_to,
            content_id,
            audited_extract_allowed: settings.is_audited_extraction_allowed,
            publishing_license,
            pre_licenses,
        })))
    }

    pub fn create_protection_handler_for_publishing_async(
        self: &Arc<Self>,
        settings: PublishingSettings,
    ) -> AsyncOperation<Arc<ProtectionHandler>> {
        let engine = self.clone();
        dispatch(&self.services.dispatcher, "create-publishing-handler", move || {
            engine.create_protection_handler_for_publishing(&settings)
        })
        .within(self.services.context.task_timeout())
    }

    pub fn create_protection_handler_for_consumption(
        &self,
        settings: &ConsumptionSettings,
    ) -> Result<Arc<ProtectionHandler>> {
        let context = &self.services.context;
        context.ensure_active()?;

        let info = &settings.license_info;
        let opened = self.open_license(info.serialized_publishing_license())?;
        let user = self.effective_user(settings.delegated_user_email.as_deref());
        let content_id = opened.body.content_id.clone();
        let owner = opened.descriptor.owner().to_string();
        let referrer = opened.descriptor.referrer().unwrap_or("").to_string();
        let is_owner = owner.eq_ignore_ascii_case(&user);

        if !is_owner && opened.descriptor.is_expired(Utc::now()) {
            return Err(MipError::no_permissions(
                NoPermissionsCategory::AccessExpired,
                format!("Access to {} has expired", content_id),
                &referrer,
                &owner,
            ));
        }

        let offline = settings.is_offline_only || context.is_offline_only();
        let mut granted = None;
        if info.has_pre_license() {
            match self.accept_use_license(info.serialized_pre_license(), &opened, &user) {
                Ok(rights) => granted = rights,
                Err(err) => mip_log!(context, LogLevel::Warning, "Ignoring pre-license: {}", err),
            }
        }
        if granted.is_none() && (!offline || opened.descriptor.does_allow_offline_access()) {
            granted = self.cached_rights(&opened, &user)?;
        }

        let granted = match granted {
            Some(granted) => granted,
            None if offline => {
                return Err(MipError::network(
                    NetworkCategory::Offline,
                    format!("Consuming {} requires a use license from the service", content_id),
                    &opened.body.connection_info.extranet_url,
                    "",
                    0,
                ));
            }
            None => {
                self.connect()?;
                let granted = rights_in(&opened.descriptor, &user);
                if !granted.is_empty() {
                    self.cache_use_license(&opened, &user, &granted)?;
                }
                granted
            }
        };
        if granted.is_empty() {
            return Err(MipError::no_permissions(
                NoPermissionsCategory::AccessDenied,
                format!("{} has no rights to {}", user, content_id),
                &referrer,
                &owner,
            ));
        }

        let mut pre_licenses = BTreeMap::new();
        if info.has_pre_license() {
            let format = codec::detect_format(info.serialized_pre_license())?;
            pre_licenses.insert(format, info.serialized_pre_license().to_vec());
        }
        mip_log!(
            context,
            LogLevel::Info,
            "Consuming content {} as {} with rights {:?}",
            content_id,
            user,
            granted
        );
        Ok(Arc::new(ProtectionHandler::new(HandlerParts {
            provider: Arc::new(AesCryptoProvider::new(&opened.content_key, opened.body.cipher_mode)?),
            audited_extract_allowed: opened.body.audited_extraction_allowed,
            descriptor: opened.descriptor,
            rights: granted,
            issued_to: user,
            content_id,
            publishing_license: info.serialized_publishing_license().to_vec(),
            pre_licenses,
        })))
    }

    pub fn create_protection_handler_for_consumption_async(
        self: &Arc<Self>,
        settings: ConsumptionSettings,
    ) -> AsyncOperation<Arc<ProtectionHandler>> {
        let engine = self.clone();
        dispatch(&self.services.dispatcher, "create-consumption-handler", move || {
            engine.create_protection_handler_for_consumption(&settings)
        })
        .within(self.services.context.task_timeout())
    }

    /// Issue use licenses for other users of content published by this tenant.
    /// Users without rights are skipped.
    pub fn create_delegation_licenses(
        &self,
        settings: &DelegationLicenseSettings,
    ) -> Result<Vec<DelegationLicense>> {
        let context = &self.services.context;
        context.ensure_active()?;
        if settings.users.is_empty() {
            return Err(MipError::bad_input("Delegation needs at least one user"));
        }
        let opened = self.open_license(settings.license_info.serialized_publishing_license())?;
        if !opened.body.issuer_id.eq_ignore_ascii_case(&self.tenant_id) {
            return Err(MipError::no_permissions(
                NoPermissionsCategory::UnknownTenant,
                format!(
                    "Tenant {} cannot delegate content issued by {}",
                    self.tenant_id, opened.body.issuer_id
                ),
                opened.descriptor.referrer().unwrap_or(""),
                opened.descriptor.owner(),
            ));
        }
        if !context.is_offline_only() {
            self.connect()?;
        }

        let mut licenses = Vec::with_capacity(settings.users.len());
        for user in &settings.users {
            let user = user.trim();
            let granted = rights_in(&opened.descriptor, user);
            if granted.is_empty() {
                mip_log!(
                    context,
                    LogLevel::Warning,
                    "Skipping delegation for {}: no rights on {}",
                    user,
                    opened.body.content_id
                );
                continue;
            }
            let delegation = self.issue_use_license(
                &opened.content_key,
                &opened.body,
                user,
                granted.clone(),
                opened.descriptor.content_valid_until(),
            )?;
            let mut license = DelegationLicense {
                user: user.to_string(),
                serialized_json_license: codec::encode_use_license(&delegation, PreLicenseFormat::Json)?,
                serialized_xrml_license: codec::encode_use_license(&delegation, PreLicenseFormat::Xml)?,
                user_licenses: BTreeMap::new(),
            };
            if settings.acquire_end_user_licenses {
                let end_user = self.issue_use_license(
                    &opened.content_key,
                    &opened.body,
                    user,
                    granted,
                    Some(self.cached_license_expiry(&opened.descriptor)),
                )?;
                for format in [PreLicenseFormat::Xml, PreLicenseFormat::Json] {
                    license
                        .user_licenses
                        .insert(format, codec::encode_use_license(&end_user, format)?);
                }
            }
            licenses.push(license);
        }
        Ok(licenses)
    }

    pub fn create_delegation_licenses_async(
        self: &Arc<Self>,
        settings: DelegationLicenseSettings,
    ) -> AsyncOperation<Vec<DelegationLicense>> {
        let engine = self.clone();
        dispatch(&self.services.dispatcher, "create-delegation-licenses", move || {
            engine.create_delegation_licenses(&settings)
        })
        .within(self.services.context.task_timeout())
    }

    fn effective_user(&self, delegated: Option<&str>) -> String {
        delegated
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(self.settings.identity.email.as_str())
            .to_string()
    }

    fn find_template(&self, template_id: &str) -> Result<TemplateDescriptor> {
        let template = self
            .settings
            .templates
            .iter()
            .find(|t| t.id.eq_ignore_ascii_case(template_id.trim()))
            .ok_or_else(|| MipError::template_not_found(format!("Template {} not found", template_id)))?;
        if template.archived {
            return Err(MipError::template_archived(format!(
                "Template {} is archived",
                template_id
            )));
        }
        Ok(template.clone())
    }

    /// Ask for consent to the service url, then authenticate
    fn connect(&self) -> Result<String> {
        if !self.consent_remembered.load(Ordering::SeqCst) {
            match self.services.consent.get_user_consent(&self.service_url) {
                Consent::AcceptAlways => self.consent_remembered.store(true, Ordering::SeqCst),
                Consent::Accept => {}
                Consent::Reject => {
                    return Err(MipError::consent_denied(format!(
                        "Consent to contact {} was rejected",
                        self.service_url
                    )))
                }
            }
        }
        self.acquire_token()
    }

    fn acquire_token(&self) -> Result<String> {
        let auth = self
            .settings
            .auth_delegate
            .as_ref()
            .ok_or_else(|| MipError::no_auth_token("No auth delegate is configured"))?;
        let challenge = OAuth2Challenge {
            authority: AUTHORITY.to_string(),
            resource: self.service_url.clone(),
            scope: format!("{}/.default", self.service_url),
            claims: String::new(),
        };
        match auth.acquire_oauth2_token(&self.settings.identity, &challenge, None) {
            Some(token) if token.is_valid() => Ok(token.access_token),
            Some(token) => Err(MipError::no_auth_token(
                token
                    .error
                    .unwrap_or_else(|| "Auth delegate returned an empty token".to_string()),
            )),
            None => Err(MipError::no_auth_token("Auth delegate did not return a token")),
        }
    }

    fn discover_service(&self) -> Result<()> {
        let token = self.connect()?;
        let mut request = HttpRequest::get(format!("{}/my/v2/servicediscovery", self.service_url));
        request.headers.insert("Authorization", format!("Bearer {}", token));
        let operation = self.services.http.send(&request, None)?;
        let response = operation.response.ok_or_else(|| {
            MipError::operation_cancelled(format!("Service discovery request {} was cancelled", request.id))
        })?;
        check_response(&request, &response)?;
        tracing::debug!(url = request.sanitized_url(), "service discovery succeeded");
        Ok(())
    }

    fn open_license(&self, serialized: &[u8]) -> Result<OpenedLicense> {
        let context = &self.services.context;
        let sealed = codec::decode_publishing_license(
            serialized,
            context.json_delegate().as_ref(),
            context.xml_delegate().as_ref(),
        )?;
        let body = sealed.body;
        if !body.issuer_id.eq_ignore_ascii_case(&self.tenant_id)
            && !context.is_feature_enabled(FlightingFeature::CrossTenantUserCert)
        {
            return Err(MipError::no_permissions(
                NoPermissionsCategory::UnknownTenant,
                format!(
                    "Content issued by {} cannot be opened from tenant {}",
                    body.issuer_id, self.tenant_id
                ),
                body.descriptor.referrer().unwrap_or(""),
                &body.owner,
            ));
        }

        let tenant_key = self
            .services
            .keystore
            .issuer_key(&body.issuer_id, &body.server_public_certificate)?;
        let key_bytes = Zeroizing::new(codec::open(tenant_key.as_slice(), &body.wrapped_content_key)?);
        let content_key = ContentKey::from_slice(&key_bytes)?;
        codec::verify_binding(&content_key, &body, &sealed.binding.value)?;

        let mut descriptor = body.descriptor.clone();
        if !body.encrypted_app_data.is_empty() {
            let plain = codec::open(content_key.as_slice(), &body.encrypted_app_data)?;
            descriptor.set_encrypted_app_data(serde_json::from_slice(&plain)?);
        }
        Ok(OpenedLicense {
            body,
            content_key,
            descriptor,
        })
    }

    fn issue_use_license(
        &self,
        content_key: &ContentKey,
        license: &LicenseBody,
        user: &str,
        granted: Vec<String>,
        valid_until: Option<DateTime<Utc>>,
    ) -> Result<SealedUseLicense> {
        let body = UseLicenseBody {
            version: LICENSE_VERSION,
            content_id: license.content_id.clone(),
            issuer_id: license.issuer_id.clone(),
            user: user.to_ascii_lowercase(),
            rights: granted,
            issued_time: Utc::now(),
            valid_until,
        };
        Ok(SealedUseLicense {
            binding: Binding::hs256(codec::bind(content_key, &body)?),
            body,
        })
    }

    /// Rights from a use license, or `None` if it belongs to other content,
    /// another user, or has expired
    fn accept_use_license(
        &self,
        serialized: &[u8],
        opened: &OpenedLicense,
        user: &str,
    ) -> Result<Option<Vec<String>>> {
        let context = &self.services.context;
        let license = codec::decode_use_license(
            serialized,
            context.json_delegate().as_ref(),
            context.xml_delegate().as_ref(),
        )?;
        codec::verify_binding(&opened.content_key, &license.body, &license.binding.value)?;
        if license.body.content_id != opened.body.content_id
            || !license.body.user.eq_ignore_ascii_case(user)
            || license.body.valid_until.map_or(false, |until| Utc::now() > until)
        {
            return Ok(None);
        }
        Ok(Some(rights::normalize_all(license.body.rights)))
    }

    fn cached_license_expiry(&self, descriptor: &ProtectionDescriptor) -> DateTime<Utc> {
        let limit = Utc::now() + Duration::days(CACHED_LICENSE_DAYS);
        descriptor
            .content_valid_until()
            .map_or(limit, |until| until.min(limit))
    }

    fn cached_rights(&self, opened: &OpenedLicense, user: &str) -> Result<Option<Vec<String>>> {
        let Some(cache) = &self.services.license_cache else {
            return Ok(None);
        };
        let Some(serialized) = cache.load(&opened.body.content_id, user)? else {
            return Ok(None);
        };
        match self.accept_use_license(&serialized, opened, user) {
            Ok(Some(granted)) => Ok(Some(granted)),
            Ok(None) => {
                cache.evict(&opened.body.content_id, user)?;
                Ok(None)
            }
            Err(err) => {
                mip_log!(
                    self.services.context,
                    LogLevel::Warning,
                    "Discarding unreadable cached license for {}: {}",
                    opened.body.content_id,
                    err
                );
                cache.evict(&opened.body.content_id, user)?;
                Ok(None)
            }
        }
    }

    fn cache_use_license(&self, opened: &OpenedLicense, user: &str, granted: &[String]) -> Result<()> {
        let Some(cache) = &self.services.license_cache else {
            return Ok(());
        };
        let license = self.issue_use_license(
            &opened.content_key,
            &opened.body,
            user,
            granted.to_vec(),
            Some(self.cached_license_expiry(&opened.descriptor)),
        )?;
        cache.store(
            &opened.body.content_id,
            user,
            &codec::encode_use_license(&license, PreLicenseFormat::Json)?,
        )
    }
}

fn check_response(request: &HttpRequest, response: &HttpResponse) -> Result<()> {
    let category = match response.status_code {
        200..=299 => return Ok(()),
        429 => NetworkCategory::Throttled,
        503 => NetworkCategory::ServiceUnavailable,
        _ => NetworkCategory::FailureResponseCode,
    };
    Err(MipError::network(
        category,
        format!("Service returned HTTP {}", response.status_code),
        request.sanitized_url(),
        &request.id,
        response.status_code,
    ))
}

impl std::fmt::Debug for ProtectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionEngine")
            .field("engine_id", &self.settings.engine_id)
            .field("tenant_id", &self.tenant_id)
            .field("service_url", &self.service_url)
            .finish_non_exhaustive()
    }
}
