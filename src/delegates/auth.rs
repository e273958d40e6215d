use serde::{Deserialize, Serialize};

use crate::async_op::OperationContext;

/// The user an engine acts for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Identity {
    pub email: String,
    pub name: String,
}

impl Identity {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: String::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Lower-cased domain part of the email, if any
    pub fn domain(&self) -> Option<String> {
        email_domain(&self.email)
    }
}

pub(crate) fn email_domain(email: &str) -> Option<String> {
    let (_, domain) = email.rsplit_once('@')?;
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_ascii_lowercase())
    }
}

/// What the service asks the application to authenticate against
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OAuth2Challenge {
    pub authority: String,
    pub resource: String,
    pub scope: String,
    pub claims: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Token {
    pub access_token: String,
    pub error: Option<String>,
}

impl OAuth2Token {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            error: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && self.error.is_none()
    }
}

/// Supplies OAuth2 tokens; `None` means authentication failed
pub trait AuthDelegate: Send + Sync {
    fn acquire_oauth2_token(
        &self,
        identity: &Identity,
        challenge: &OAuth2Challenge,
        context: Option<&OperationContext>,
    ) -> Option<OAuth2Token>;
}

/// Hands out the same token for every challenge
#[derive(Debug, Clone)]
pub struct StaticTokenAuthDelegate {
    token: String,
}

impl StaticTokenAuthDelegate {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl AuthDelegate for StaticTokenAuthDelegate {
    fn acquire_oauth2_token(
        &self,
        _identity: &Identity,
        _challenge: &OAuth2Challenge,
        _context: Option<&OperationContext>,
    ) -> Option<OAuth2Token> {
        if self.token.is_empty() {
            None
        } else {
            Some(OAuth2Token::new(self.token.clone()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Consent {
    AcceptAlways,
    Accept,
    Reject,
}

/// Asked before the SDK contacts a service url for the first time
pub trait ConsentDelegate: Send + Sync {
    fn get_user_consent(&self, url: &str) -> Consent;
}

/// Always answers with the same consent
#[derive(Debug, Clone, Copy)]
pub struct FixedConsentDelegate(pub Consent);

impl ConsentDelegate for FixedConsentDelegate {
    fn get_user_consent(&self, _url: &str) -> Consent {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_domain() {
        assert_eq!(
            Identity::new("Alice@Contoso.COM").domain().as_deref(),
            Some("contoso.com")
        );
        assert_eq!(Identity::new("no-at-sign").domain(), None);
        assert_eq!(Identity::new("trailing@").domain(), None);
    }

    #[test]
    fn test_static_token_delegate() {
        let identity = Identity::new("a@b.com");
        let challenge = OAuth2Challenge::default();
        let token = StaticTokenAuthDelegate::new("tok").acquire_oauth2_token(&identity, &challenge, None);
        assert!(token.map(|t| t.is_valid()).unwrap_or(false));
        assert!(StaticTokenAuthDelegate::new("")
            .acquire_oauth2_token(&identity, &challenge, None)
            .is_none());
    }
}
