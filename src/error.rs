//! Unified error type for the infoprotect public API
//!
//! Every fallible operation returns [`MipError`]: a tagged value carrying the
//! coarse [`ErrorKind`], a human readable message, an ordered map of debug
//! information and, for the categories that have one, a structured
//! [`ErrorDetail`]. Kinds form a shallow family tree (see
//! [`ErrorKind::parent`]) so callers can match either precisely or broadly.
//!
//! # Example
//!
//! ```
//! use infoprotect::{ErrorKind, MipError, NoPermissionsCategory};
//!
//! let err = MipError::no_permissions(
//!     NoPermissionsCategory::AccessDenied,
//!     "user has no rights",
//!     "https://contoso.com/request-access",
//!     "owner@contoso.com",
//! );
//! assert_eq!(err.kind(), ErrorKind::NoPermissions);
//! assert!(err.is_a(ErrorKind::AccessDenied));
//! assert_eq!(err.owner(), Some("owner@contoso.com"));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T, E = MipError> = std::result::Result<T, E>;

/// Debug info keys promoted from structured error details
pub mod debug_keys {
    pub const BAD_INPUT_CODE: &str = "BadInputError.Code";
    pub const NETWORK_CATEGORY: &str = "NetworkError.Category";
    pub const SANITIZED_URL: &str = "HttpRequest.SanitizedUrl";
    pub const REQUEST_ID: &str = "HttpRequest.Id";
    pub const STATUS_CODE: &str = "HttpResponse.StatusCode";
    pub const NO_PERMISSIONS_CATEGORY: &str = "NoPermissionsError.Category";
    pub const NO_PERMISSIONS_REFERRER: &str = "NoPermissionsError.Referrer";
    pub const NO_PERMISSIONS_OWNER: &str = "NoPermissionsError.Owner";
    pub const SERVICE_DISABLED_EXTENT: &str = "ServiceDisabledError.Extent";
    pub const NO_POLICY_CATEGORY: &str = "NoPolicyError.Category";
    pub const STACK_TRACE: &str = "StackTrace";
    pub const HRESULT: &str = "HResult";
}

/// Coarse error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    BadInput,
    InsufficientBuffer,
    FileIo,
    Network,
    Internal,
    JustificationRequired,
    NotSupportedOperation,
    PrivilegedRequired,
    AccessDenied,
    ConsentDenied,
    NoPermissions,
    NoAuthToken,
    DisabledService,
    ProxyAuth,
    NoPolicy,
    OperationCancelled,
    AdhocProtectionRequired,
    DeprecatedApi,
    TemplateNotFound,
    LabelNotFound,
    LabelDisabled,
    DoubleKeyDisabled,
    LicenseNotRegistered,
    ContentFormatNotSupported,
    TemplateArchived,
    CustomerKeyUnavailable,
    DelegateResponse,
}

impl ErrorKind {
    /// Every kind, in declaration order
    pub const ALL: [ErrorKind; 27] = [
        ErrorKind::BadInput,
        ErrorKind::InsufficientBuffer,
        ErrorKind::FileIo,
        ErrorKind::Network,
        ErrorKind::Internal,
        ErrorKind::JustificationRequired,
        ErrorKind::NotSupportedOperation,
        ErrorKind::PrivilegedRequired,
        ErrorKind::AccessDenied,
        ErrorKind::ConsentDenied,
        ErrorKind::NoPermissions,
        ErrorKind::NoAuthToken,
        ErrorKind::DisabledService,
        ErrorKind::ProxyAuth,
        ErrorKind::NoPolicy,
        ErrorKind::OperationCancelled,
        ErrorKind::AdhocProtectionRequired,
        ErrorKind::DeprecatedApi,
        ErrorKind::TemplateNotFound,
        ErrorKind::LabelNotFound,
        ErrorKind::LabelDisabled,
        ErrorKind::DoubleKeyDisabled,
        ErrorKind::LicenseNotRegistered,
        ErrorKind::ContentFormatNotSupported,
        ErrorKind::TemplateArchived,
        ErrorKind::CustomerKeyUnavailable,
        ErrorKind::DelegateResponse,
    ];

    /// The broader kind this one specializes, if any
    pub fn parent(self) -> Option<ErrorKind> {
        match self {
            ErrorKind::NoPermissions
            | ErrorKind::NoAuthToken
            | ErrorKind::DisabledService
            | ErrorKind::CustomerKeyUnavailable => Some(ErrorKind::AccessDenied),
            ErrorKind::InsufficientBuffer
            | ErrorKind::TemplateNotFound
            | ErrorKind::TemplateArchived
            | ErrorKind::ContentFormatNotSupported
            | ErrorKind::LabelNotFound
            | ErrorKind::LabelDisabled
            | ErrorKind::LicenseNotRegistered => Some(ErrorKind::BadInput),
            ErrorKind::ProxyAuth => Some(ErrorKind::Network),
            _ => None,
        }
    }

    /// Default error name reported for this kind
    pub fn default_name(self) -> &'static str {
        match self {
            ErrorKind::BadInput => "BadInputError",
            ErrorKind::InsufficientBuffer => "InsufficientBufferError",
            ErrorKind::FileIo => "FileIOError",
            ErrorKind::Network => "NetworkError",
            ErrorKind::Internal => "InternalError",
            ErrorKind::JustificationRequired => "JustificationRequiredError",
            ErrorKind::NotSupportedOperation => "NotSupportedOperationError",
            ErrorKind::PrivilegedRequired => "PrivilegedRequiredError",
            ErrorKind::AccessDenied => "AccessDeniedError",
            ErrorKind::ConsentDenied => "ConsentDeniedError",
            ErrorKind::NoPermissions => "NoPermissionsError",
            ErrorKind::NoAuthToken => "NoAuthTokenError",
            ErrorKind::DisabledService => "ServiceDisabledError",
            ErrorKind::ProxyAuth => "ProxyAuthenticationError",
            ErrorKind::NoPolicy => "NoPolicyError",
            ErrorKind::OperationCancelled => "OperationCancelledError",
            ErrorKind::AdhocProtectionRequired => "AdhocProtectionRequiredError",
            ErrorKind::DeprecatedApi => "DeprecatedApiError",
            ErrorKind::TemplateNotFound => "TemplateNotFoundError",
            ErrorKind::LabelNotFound => "LabelNotFoundError",
            ErrorKind::LabelDisabled => "LabelDisabledError",
            ErrorKind::DoubleKeyDisabled => "DoubleKeyDisabledError",
            ErrorKind::LicenseNotRegistered => "LicenseNotRegisteredError",
            ErrorKind::ContentFormatNotSupported => "ContentFormatNotSupportedError",
            ErrorKind::TemplateArchived => "TemplateArchivedError",
            ErrorKind::CustomerKeyUnavailable => "CustomerKeyUnavailableError",
            ErrorKind::DelegateResponse => "DelegateResponseError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_name())
    }
}

macro_rules! detail_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        pub enum $name {
            #[default]
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

detail_enum!(
    /// Sub-category of a bad input error
    BadInputCode {
        General => "General",
        FileIsTooLargeForProtection => "FileIsTooLargeForProtection",
        ParameterParsing => "ParameterParsing",
        LicenseNotTrusted => "LicenseNotTrusted",
        DoubleKey => "DoubleKey",
    }
);

detail_enum!(
    /// Sub-category of a network error
    NetworkCategory {
        Unknown => "Unknown",
        FailureResponseCode => "FailureResponseCode",
        BadResponse => "BadResponse",
        UnexpectedResponse => "UnexpectedResponse",
        NoConnection => "NoConnection",
        Proxy => "Proxy",
        Ssl => "SSL",
        Timeout => "Timeout",
        Offline => "Offline",
        Throttled => "Throttled",
        Cancelled => "Cancelled",
        FunctionNotImplemented => "FunctionNotImplemented",
        ServiceUnavailable => "ServiceUnavailable",
    }
);

detail_enum!(
    /// Reason the user lacks permission
    NoPermissionsCategory {
        Unknown => "Unknown",
        UserNotFound => "UserNotFound",
        AccessDenied => "AccessDenied",
        AccessExpired => "AccessExpired",
        InvalidEmail => "InvalidEmail",
        UnknownTenant => "UnknownTenant",
        NotOwner => "NotOwner",
        NotPremiumLicenseUser => "NotPremiumLicenseUser",
    }
);

detail_enum!(
    /// Scope at which a service is disabled
    ServiceDisabledExtent {
        User => "User",
        Device => "Device",
        Platform => "Platform",
        Tenant => "Tenant",
    }
);

detail_enum!(
    /// Which part of the policy is missing
    NoPolicyCategory {
        SyncFile => "SyncFile",
        Labels => "Labels",
        Rules => "Rules",
    }
);

/// Structured payload of the error categories that carry extra fields
#[derive(Debug, Clone, Default)]
pub enum ErrorDetail {
    #[default]
    None,
    BadInput {
        code: BadInputCode,
    },
    Network {
        category: NetworkCategory,
        status_code: i32,
    },
    NoPermissions {
        category: NoPermissionsCategory,
        referrer: String,
        owner: String,
    },
    ServiceDisabled {
        extent: ServiceDisabledExtent,
    },
    NoPolicy {
        category: NoPolicyCategory,
    },
    DelegateResponse {
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },
}

/// Error value returned by every fallible operation in the crate
///
/// Cloning preserves kind, name, message and debug info, which is what lets an
/// error cross a task-dispatch boundary and be handed back to a caller.
#[derive(Debug, Clone, Error)]
#[error("{formatted}")]
pub struct MipError {
    kind: ErrorKind,
    name: String,
    message: String,
    formatted: String,
    debug_info: BTreeMap<String, String>,
    detail: ErrorDetail,
}

fn strip_line_breaks(message: &str) -> String {
    message.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

impl MipError {
    /// Create an error of the given kind with the default name
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut err = Self {
            kind,
            name: kind.default_name().to_string(),
            formatted: strip_line_breaks(&message),
            message,
            debug_info: BTreeMap::new(),
            detail: ErrorDetail::None,
        };
        if kind == ErrorKind::BadInput || kind.parent() == Some(ErrorKind::BadInput) {
            err = err.with_detail(ErrorDetail::BadInput {
                code: BadInputCode::General,
            });
        }
        err
    }

    /// Create an error with an explicit debug info map
    pub fn with_debug_map(
        kind: ErrorKind,
        message: impl Into<String>,
        debug_info: BTreeMap<String, String>,
    ) -> Self {
        let mut err = Self::new(kind, message);
        for (key, value) in debug_info {
            err.add_debug_info(key, value);
        }
        err
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::bad_input_with_code(message, BadInputCode::General)
    }

    pub fn bad_input_with_code(message: impl Into<String>, code: BadInputCode) -> Self {
        let mut err = Self::new(ErrorKind::BadInput, message);
        err.debug_info.clear();
        err.formatted = strip_line_breaks(&err.message);
        err.with_detail(ErrorDetail::BadInput { code })
    }

    pub fn insufficient_buffer(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InsufficientBuffer, message)
    }

    pub fn file_io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FileIo, message)
    }

    /// Network failure; empty url/request id and a zero status are omitted
    pub fn network(
        category: NetworkCategory,
        message: impl Into<String>,
        sanitized_url: &str,
        request_id: &str,
        status_code: i32,
    ) -> Self {
        Self::new(ErrorKind::Network, message)
            .with_network_detail(category, sanitized_url, request_id, status_code)
    }

    /// Proxy authentication failure, always [`NetworkCategory::Proxy`]
    pub fn proxy_auth(
        message: impl Into<String>,
        sanitized_url: &str,
        request_id: &str,
        status_code: i32,
    ) -> Self {
        Self::new(ErrorKind::ProxyAuth, message).with_network_detail(
            NetworkCategory::Proxy,
            sanitized_url,
            request_id,
            status_code,
        )
    }

    fn with_network_detail(
        self,
        category: NetworkCategory,
        sanitized_url: &str,
        request_id: &str,
        status_code: i32,
    ) -> Self {
        let mut err = self.with_detail(ErrorDetail::Network {
            category,
            status_code,
        });
        err.add_debug_info(debug_keys::SANITIZED_URL, sanitized_url);
        err.add_debug_info(debug_keys::REQUEST_ID, request_id);
        if status_code != 0 {
            err.add_debug_info(debug_keys::STATUS_CODE, status_code.to_string());
        }
        err
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotSupportedOperation, message)
    }

    pub fn privileged_required(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PrivilegedRequired, message)
    }

    pub fn justification_required(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::JustificationRequired, message)
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AccessDenied, message)
    }

    /// Missing rights; referrer and owner are reported when non-empty
    pub fn no_permissions(
        category: NoPermissionsCategory,
        message: impl Into<String>,
        referrer: &str,
        owner: &str,
    ) -> Self {
        let mut err = Self::new(ErrorKind::NoPermissions, message).with_detail(
            ErrorDetail::NoPermissions {
                category,
                referrer: referrer.to_string(),
                owner: owner.to_string(),
            },
        );
        err.add_debug_info(debug_keys::NO_PERMISSIONS_REFERRER, referrer);
        err.add_debug_info(debug_keys::NO_PERMISSIONS_OWNER, owner);
        err
    }

    pub fn no_auth_token(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoAuthToken, message)
    }

    pub fn service_disabled(
        extent: ServiceDisabledExtent,
        message: impl Into<String>,
        request_id: &str,
    ) -> Self {
        let mut err = Self::new(ErrorKind::DisabledService, message)
            .with_detail(ErrorDetail::ServiceDisabled { extent });
        err.add_debug_info(debug_keys::REQUEST_ID, request_id);
        err
    }

    pub fn consent_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConsentDenied, message)
    }

    pub fn no_policy(category: NoPolicyCategory, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoPolicy, message).with_detail(ErrorDetail::NoPolicy { category })
    }

    pub fn operation_cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationCancelled, message)
    }

    pub fn adhoc_protection_required(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AdhocProtectionRequired, message)
    }

    pub fn deprecated_api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeprecatedApi, message)
    }

    pub fn template_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TemplateNotFound, message)
    }

    pub fn template_archived(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TemplateArchived, message)
    }

    pub fn label_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LabelNotFound, message)
    }

    pub fn label_disabled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LabelDisabled, message)
    }

    pub fn double_key_disabled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DoubleKeyDisabled, message)
    }

    pub fn license_not_registered(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LicenseNotRegistered, message)
    }

    pub fn content_format_not_supported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ContentFormatNotSupported, message)
    }

    pub fn customer_key_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CustomerKeyUnavailable, message)
    }

    /// Wrap a failure raised by an application-supplied delegate
    pub fn delegate_response<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut err = Self::new(ErrorKind::DelegateResponse, source.to_string());
        err.detail = ErrorDetail::DelegateResponse {
            source: Some(Arc::new(source)),
        };
        err
    }

    /// Re-tag an existing error as a delegate response, keeping message and debug info
    /// The original error is kept as [`delegate_source`](Self::delegate_source).
    pub fn delegate_response_from(error: MipError) -> Self {
        let source: Arc<dyn std::error::Error + Send + Sync> = Arc::new(error.clone());
        Self {
            kind: ErrorKind::DelegateResponse,
            name: ErrorKind::DelegateResponse.default_name().to_string(),
            detail: ErrorDetail::DelegateResponse {
                source: Some(source),
            },
            ..error
        }
    }

    /// Delegate failure described by a platform status code and optional stack trace
    pub fn delegate_response_with_hresult(
        message: impl Into<String>,
        hresult: i64,
        stack_trace: &str,
    ) -> Self {
        let mut err = Self::new(ErrorKind::DelegateResponse, message);
        err.detail = ErrorDetail::DelegateResponse { source: None };
        err.add_debug_info(debug_keys::HRESULT, format!("0x{:08X}", hresult));
        err.add_debug_info(debug_keys::STACK_TRACE, stack_trace);
        err
    }

    /// Override the reported error name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_debug_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_debug_info(key, value);
        self
    }

    fn with_detail(mut self, detail: ErrorDetail) -> Self {
        match &detail {
            ErrorDetail::BadInput { code } => {
                self.add_debug_info(debug_keys::BAD_INPUT_CODE, code.as_str())
            }
            ErrorDetail::Network { category, .. } => {
                self.add_debug_info(debug_keys::NETWORK_CATEGORY, category.as_str())
            }
            ErrorDetail::NoPermissions { category, .. } => {
                self.add_debug_info(debug_keys::NO_PERMISSIONS_CATEGORY, category.as_str())
            }
            ErrorDetail::ServiceDisabled { extent } => {
                self.add_debug_info(debug_keys::SERVICE_DISABLED_EXTENT, extent.as_str())
            }
            ErrorDetail::NoPolicy { category } => {
                self.add_debug_info(debug_keys::NO_POLICY_CATEGORY, category.as_str())
            }
            ErrorDetail::None | ErrorDetail::DelegateResponse { .. } => {}
        }
        self.detail = detail;
        self
    }

    /// Attach a debug entry; empty keys or values are ignored
    pub fn add_debug_info(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if key.is_empty() || value.is_empty() {
            return;
        }
        self.formatted.push_str(&format!(", {}={}", key, value));
        self.debug_info.insert(key, value);
    }

    /// Replace the message, re-rendering the formatted form
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
        let mut formatted = strip_line_breaks(&self.message);
        for (key, value) in &self.debug_info {
            formatted.push_str(&format!(", {}={}", key, value));
        }
        self.formatted = formatted;
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The message as supplied, without debug info
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Message without line breaks followed by `, key=value` debug entries
    pub fn formatted_message(&self) -> &str {
        &self.formatted
    }

    pub fn debug_info(&self) -> &BTreeMap<String, String> {
        &self.debug_info
    }

    pub fn detail(&self) -> &ErrorDetail {
        &self.detail
    }

    /// True if this error's kind equals `kind` or specializes it
    pub fn is_a(&self, kind: ErrorKind) -> bool {
        let mut current = Some(self.kind);
        while let Some(k) = current {
            if k == kind {
                return true;
            }
            current = k.parent();
        }
        false
    }

    pub fn bad_input_code(&self) -> Option<BadInputCode> {
        match self.detail {
            ErrorDetail::BadInput { code } => Some(code),
            _ => None,
        }
    }

    pub fn network_category(&self) -> Option<NetworkCategory> {
        match self.detail {
            ErrorDetail::Network { category, .. } => Some(category),
            _ => None,
        }
    }

    pub fn response_status_code(&self) -> Option<i32> {
        match self.detail {
            ErrorDetail::Network { status_code, .. } => Some(status_code),
            _ => None,
        }
    }

    pub fn no_permissions_category(&self) -> Option<NoPermissionsCategory> {
        match self.detail {
            ErrorDetail::NoPermissions { category, .. } => Some(category),
            _ => None,
        }
    }

    pub fn referrer(&self) -> Option<&str> {
        match &self.detail {
            ErrorDetail::NoPermissions { referrer, .. } => Some(referrer.as_str()),
            _ => None,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        match &self.detail {
            ErrorDetail::NoPermissions { owner, .. } => Some(owner.as_str()),
            _ => None,
        }
    }

    pub fn service_disabled_extent(&self) -> Option<ServiceDisabledExtent> {
        match self.detail {
            ErrorDetail::ServiceDisabled { extent } => Some(extent),
            _ => None,
        }
    }

    pub fn no_policy_category(&self) -> Option<NoPolicyCategory> {
        match self.detail {
            ErrorDetail::NoPolicy { category } => Some(category),
            _ => None,
        }
    }

    /// The application error wrapped by a delegate response, if any
    pub fn delegate_source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match &self.detail {
            ErrorDetail::DelegateResponse { source } => source.as_deref(),
            _ => None,
        }
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self.kind {
            ErrorKind::BadInput => match self.bad_input_code() {
                Some(BadInputCode::FileIsTooLargeForProtection) => "MIP_E_FILE_TOO_LARGE",
                Some(BadInputCode::ParameterParsing) => "MIP_E_PARAMETER_PARSING",
                Some(BadInputCode::LicenseNotTrusted) => "MIP_E_LICENSE_NOT_TRUSTED",
                Some(BadInputCode::DoubleKey) => "MIP_E_DOUBLE_KEY",
                _ => "MIP_E_BAD_INPUT",
            },
            ErrorKind::InsufficientBuffer => "MIP_E_INSUFFICIENT_BUFFER",
            ErrorKind::FileIo => "MIP_E_FILE_IO",
            ErrorKind::Network => "MIP_E_NETWORK",
            ErrorKind::Internal => "MIP_E_INTERNAL",
            ErrorKind::JustificationRequired => "MIP_E_JUSTIFICATION_REQUIRED",
            ErrorKind::NotSupportedOperation => "MIP_E_NOT_SUPPORTED",
            ErrorKind::PrivilegedRequired => "MIP_E_PRIVILEGED_REQUIRED",
            ErrorKind::AccessDenied => "MIP_E_ACCESS_DENIED",
            ErrorKind::ConsentDenied => "MIP_E_CONSENT_DENIED",
            ErrorKind::NoPermissions => "MIP_E_NO_PERMISSIONS",
            ErrorKind::NoAuthToken => "MIP_E_NO_AUTH_TOKEN",
            ErrorKind::DisabledService => "MIP_E_SERVICE_DISABLED",
            ErrorKind::ProxyAuth => "MIP_E_PROXY_AUTH",
            ErrorKind::NoPolicy => "MIP_E_NO_POLICY",
            ErrorKind::OperationCancelled => "MIP_E_OPERATION_CANCELLED",
            ErrorKind::AdhocProtectionRequired => "MIP_E_ADHOC_PROTECTION_REQUIRED",
            ErrorKind::DeprecatedApi => "MIP_E_DEPRECATED_API",
            ErrorKind::TemplateNotFound => "MIP_E_TEMPLATE_NOT_FOUND",
            ErrorKind::LabelNotFound => "MIP_E_LABEL_NOT_FOUND",
            ErrorKind::LabelDisabled => "MIP_E_LABEL_DISABLED",
            ErrorKind::DoubleKeyDisabled => "MIP_E_DOUBLE_KEY_DISABLED",
            ErrorKind::LicenseNotRegistered => "MIP_E_LICENSE_NOT_REGISTERED",
            ErrorKind::ContentFormatNotSupported => "MIP_E_CONTENT_FORMAT_NOT_SUPPORTED",
            ErrorKind::TemplateArchived => "MIP_E_TEMPLATE_ARCHIVED",
            ErrorKind::CustomerKeyUnavailable => "MIP_E_CUSTOMER_KEY_UNAVAILABLE",
            ErrorKind::DelegateResponse => "MIP_E_DELEGATE_RESPONSE",
        }
    }

    /// Returns true if the error is potentially retryable
    ///
    /// Transient network conditions may succeed after a delay.
    pub fn is_retryable(&self) -> bool {
        match self.network_category() {
            Some(
                NetworkCategory::Timeout
                | NetworkCategory::Throttled
                | NetworkCategory::ServiceUnavailable
                | NetworkCategory::NoConnection,
            ) => true,
            _ => self.kind == ErrorKind::OperationCancelled,
        }
    }

    /// Returns a suggestion for resolving this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self.kind {
            ErrorKind::InsufficientBuffer => {
                Some("Size the output with protected_content_length before encrypting")
            }
            ErrorKind::JustificationRequired => {
                Some("Provide a justification message when lowering or removing a label")
            }
            ErrorKind::PrivilegedRequired => {
                Some("Use the privileged assignment method to replace a privileged label")
            }
            ErrorKind::NoPermissions => {
                Some("Ask the content owner or the referrer for access to this content")
            }
            ErrorKind::NoAuthToken => {
                Some("Make sure the auth delegate returns a token for the engine identity")
            }
            ErrorKind::ConsentDenied => Some("The user must consent before contacting the service"),
            ErrorKind::NoPolicy => Some("Supply policy data through the policy_data custom setting"),
            ErrorKind::Network if self.network_category() == Some(NetworkCategory::Offline) => {
                Some("Acquire a pre-license or consume the content once while online")
            }
            ErrorKind::TemplateNotFound | ErrorKind::TemplateArchived => {
                Some("List the engine templates to find an active template id")
            }
            ErrorKind::DoubleKeyDisabled => Some("Enable the DoubleKey flighting feature"),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MipError {
    fn from(err: std::io::Error) -> Self {
        MipError::file_io(err.to_string())
    }
}

impl From<serde_json::Error> for MipError {
    fn from(err: serde_json::Error) -> Self {
        MipError::bad_input_with_code(err.to_string(), BadInputCode::ParameterParsing)
    }
}

impl From<base64::DecodeError> for MipError {
    fn from(err: base64::DecodeError) -> Self {
        MipError::bad_input_with_code(
            format!("Base64 decode error: {}", err),
            BadInputCode::ParameterParsing,
        )
    }
}
