//! Collaborator interfaces supplied by the host application
//!
//! Every delegate is an object-safe trait shared as `Arc<dyn …>`. The crate
//! ships a working default for each one, so a context can be created
//! without any overrides:
//!
//! | delegate | default |
//! |---|---|
//! | [`LoggerDelegate`] | [`TracingLoggerDelegate`] |
//! | [`HttpDelegate`] | [`OfflineHttpDelegate`] |
//! | [`StorageDelegate`] | [`InMemoryStorageDelegate`] |
//! | [`TaskDispatcherDelegate`] | [`TokioTaskDispatcher`] |
//! | [`JsonDelegate`] | [`SerdeJsonDelegate`] |
//! | [`XmlDelegate`] | [`QuickXmlDelegate`] |
//!
//! Profiles with an on-disk cache and no application storage use a
//! [`FileStorageDelegate`] under the MIP path.
//!
//! [`AuthDelegate`] and [`ConsentDelegate`] have no defaults; engines and
//! profiles take them explicitly.

mod app;
mod auth;
mod http;
mod json;
mod logger;
mod storage;
mod task;
mod xml;

pub(crate) use app::{ApplicationHttp, ApplicationJson, ApplicationStorage, ApplicationXml};
pub use auth::{
    AuthDelegate, Consent, ConsentDelegate, FixedConsentDelegate, Identity, OAuth2Challenge,
    OAuth2Token, StaticTokenAuthDelegate,
};
pub(crate) use auth::email_domain;
pub use http::{
    HttpCallback, HttpDelegate, HttpHeaders, HttpOperation, HttpRequest, HttpRequestType,
    HttpResponse, OfflineHttpDelegate,
};
pub use json::{JsonDelegate, JsonDocument, SerdeJsonDelegate};
pub use logger::{LoggerDelegate, TracingLoggerDelegate};
pub use storage::{
    FileStorageDelegate, InMemoryStorageDelegate, MipComponent, StorageDelegate, StorageSettings,
    StorageTable,
};
pub use task::{Task, TaskDispatcherDelegate, TokioTaskDispatcher};
pub use xml::{QuickXmlDelegate, XmlDelegate, XmlDocument, XmlNode, XmlReader, XmlReaderEvent};

use crate::error::MipError;

/// Result of a delegate call; application failures are surfaced as
/// [`ErrorKind::DelegateResponse`](crate::ErrorKind::DelegateResponse)
pub type DelegateResponse<T> = Result<T, MipError>;

/// Reclassify an error returned by an application delegate
pub(crate) fn from_delegate(err: MipError) -> MipError {
    if err.kind() == crate::ErrorKind::DelegateResponse {
        err
    } else {
        MipError::delegate_response_from(err)
    }
}
