//! Content encryption for one publishing license
//!
//! A handler is produced by a [`ProtectionEngine`](crate::protection::ProtectionEngine)
//! either for publishing new content or for consuming existing content. It
//! is immutable and shared through an `Arc`.
//!
//! # Example
//!
//! ```
//! # use infoprotect::prelude::*;
//! # fn example(handler: &ProtectionHandler) -> infoprotect::Result<()> {
//! let plaintext = b"quarterly numbers";
//! let mut ciphertext = vec![0u8; handler.protected_content_length(plaintext.len() as u64, true) as usize];
//! let written = handler.encrypt_buffer(0, plaintext, &mut ciphertext, true)?;
//! ciphertext.truncate(written);
//!
//! let mut roundtrip = vec![0u8; ciphertext.len()];
//! let read = handler.decrypt_buffer(0, &ciphertext, &mut roundtrip, true)?;
//! assert_eq!(&roundtrip[..read], plaintext);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::protection::cipher::{CipherMode, CryptoProvider};
use crate::protection::descriptor::ProtectionDescriptor;
use crate::protection::license::PreLicenseFormat;
use crate::protection::rights;

/// Everything a handler is built from
pub(crate) struct HandlerParts {
    pub provider: Arc<dyn CryptoProvider>,
    pub descriptor: ProtectionDescriptor,
    pub rights: Vec<String>,
    pub issued_to: String,
    pub content_id: String,
    pub audited_extract_allowed: bool,
    pub publishing_license: Vec<u8>,
    pub pre_licenses: BTreeMap<PreLicenseFormat, Vec<u8>>,
}

pub struct ProtectionHandler {
    provider: Arc<dyn CryptoProvider>,
    descriptor: ProtectionDescriptor,
    rights: Vec<String>,
    issued_to: String,
    content_id: String,
    audited_extract_allowed: bool,
    publishing_license: Vec<u8>,
    pre_licenses: BTreeMap<PreLicenseFormat, Vec<u8>>,
}

impl ProtectionHandler {
    pub(crate) fn new(parts: HandlerParts) -> Self {
        Self {
            provider: parts.provider,
            descriptor: parts.descriptor,
            rights: rights::effective(parts.rights),
            issued_to: parts.issued_to,
            content_id: parts.content_id,
            audited_extract_allowed: parts.audited_extract_allowed,
            publishing_license: parts.publishing_license,
            pre_licenses: parts.pre_licenses,
        }
    }

    /// Encrypt `input`, which starts at `offset` of the plaintext.
    ///
    /// `offset` must be a multiple of [`block_size`](Self::block_size), and so
    /// must `input.len()` unless `is_final` is set. Returns the number of bytes
    /// written to `output`.
    pub fn encrypt_buffer(&self, offset: u64, input: &[u8], output: &mut [u8], is_final: bool) -> Result<usize> {
        self.provider.encrypt(offset, input, output, is_final)
    }

    /// Decrypt `input`, which starts at `offset` of the ciphertext
    pub fn decrypt_buffer(&self, offset: u64, input: &[u8], output: &mut [u8], is_final: bool) -> Result<usize> {
        self.provider.decrypt(offset, input, output, is_final)
    }

    /// Encrypt a whole payload in one call
    pub fn encrypt_content(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; self.protected_content_length(plaintext.len() as u64, true) as usize];
        let written = self.encrypt_buffer(0, plaintext, &mut output, true)?;
        output.truncate(written);
        Ok(output)
    }

    /// Decrypt a whole payload produced by [`encrypt_content`](Self::encrypt_content)
    pub fn decrypt_content(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; ciphertext.len()];
        let written = self.decrypt_buffer(0, ciphertext, &mut output, true)?;
        output.truncate(written);
        Ok(output)
    }

    pub fn protected_content_length(&self, unprotected_size: u64, includes_final_block: bool) -> u64 {
        self.provider
            .protected_content_length(unprotected_size, includes_final_block)
    }

    pub fn block_size(&self) -> usize {
        self.provider.block_size()
    }

    /// Rights of the user the handler was issued to, sorted. OWNER comes
    /// expanded to every well-known right.
    pub fn rights(&self) -> &[String] {
        &self.rights
    }

    /// True iff `right` is in [`rights`](Self::rights)
    pub fn access_check(&self, right: &str) -> bool {
        let wanted = rights::normalize(right);
        self.rights.iter().any(|r| *r == wanted)
    }

    pub fn issued_to(&self) -> &str {
        &self.issued_to
    }

    pub fn owner(&self) -> &str {
        self.descriptor.owner()
    }

    pub fn is_issued_to_owner(&self) -> bool {
        !self.issued_to.is_empty() && self.issued_to.eq_ignore_ascii_case(self.owner())
    }

    pub fn protection_descriptor(&self) -> &ProtectionDescriptor {
        &self.descriptor
    }

    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    pub fn does_use_deprecated_algorithms(&self) -> bool {
        self.cipher_mode().is_deprecated()
    }

    pub fn is_audited_extract_allowed(&self) -> bool {
        self.audited_extract_allowed
    }

    pub fn serialized_publishing_license(&self) -> &[u8] {
        &self.publishing_license
    }

    /// Pre-license generated at publish time, empty when none was requested
    pub fn serialized_pre_license(&self, format: PreLicenseFormat) -> &[u8] {
        self.pre_licenses
            .get(&format)
            .map(|l| l.as_slice())
            .unwrap_or(&[])
    }

    pub fn cipher_mode(&self) -> CipherMode {
        self.provider.cipher_mode()
    }

    pub fn crypto_provider(&self) -> &Arc<dyn CryptoProvider> {
        &self.provider
    }
}

impl std::fmt::Debug for ProtectionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionHandler")
            .field("content_id", &self.content_id)
            .field("issued_to", &self.issued_to)
            .field("cipher_mode", &self.cipher_mode())
            .field("rights", &self.rights)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::protection::cipher::{AesCryptoProvider, ContentKey};
    use crate::protection::descriptor::{ProtectionDescriptorBuilder, UserRights};

    fn handler(mode: CipherMode, granted: &[&str]) -> Result<ProtectionHandler> {
        let mut descriptor = ProtectionDescriptorBuilder::from_user_rights(vec![UserRights::new(
            ["bob@contoso.com"],
            granted.iter().copied(),
        )])
        .build()?;
        descriptor.set_owner("alice@contoso.com");
        Ok(ProtectionHandler::new(HandlerParts {
            provider: Arc::new(AesCryptoProvider::new(&ContentKey::generate(), mode)?),
            descriptor,
            rights: granted.iter().map(|r| r.to_string()).collect(),
            issued_to: "bob@contoso.com".into(),
            content_id: "cid".into(),
            audited_extract_allowed: false,
            publishing_license: b"<PublishingLicense/>".to_vec(),
            pre_licenses: BTreeMap::new(),
        }))
    }

    #[test]
    fn test_access_check_matches_rights() -> Result<()> {
        let h = handler(CipherMode::Cbc4k, &["view", "Print"])?;
        assert_eq!(h.rights(), ["PRINT".to_string(), "VIEW".to_string()]);
        for right in rights::ALL_RIGHTS {
            assert_eq!(h.access_check(right), h.rights().iter().any(|r| r == right));
        }
        assert!(h.access_check("view"));
        assert!(!h.is_issued_to_owner());
        assert_eq!(h.owner(), "alice@contoso.com");
        Ok(())
    }

    #[test]
    fn test_content_roundtrip_across_block_boundaries() -> Result<()> {
        let h = handler(CipherMode::Cbc4k, &["VIEW"])?;
        let plaintext: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let ciphertext = h.encrypt_content(&plaintext)?;
        assert_eq!(ciphertext.len() as u64, h.protected_content_length(10_000, true));
        assert_eq!(h.decrypt_content(&ciphertext)?, plaintext);
        Ok(())
    }

    #[test]
    fn test_chunked_encryption_matches_one_shot() -> Result<()> {
        let h = handler(CipherMode::Cbc4k, &["VIEW"])?;
        let plaintext = vec![7u8; 4096 * 2 + 100];
        let one_shot = h.encrypt_content(&plaintext)?;

        let mut chunked = Vec::new();
        let mut offset = 0usize;
        for chunk in plaintext.chunks(h.block_size()) {
            let is_final = offset + chunk.len() == plaintext.len();
            let mut out = vec![0u8; h.protected_content_length(chunk.len() as u64, is_final) as usize];
            let written = h.encrypt_buffer(offset as u64, chunk, &mut out, is_final)?;
            chunked.extend_from_slice(&out[..written]);
            offset += chunk.len();
        }
        assert_eq!(chunked, one_shot);
        Ok(())
    }

    #[test]
    fn test_deprecated_mode_is_reported() -> Result<()> {
        let h = handler(CipherMode::Ecb, &["OWNER"])?;
        assert!(h.does_use_deprecated_algorithms());
        assert!(h.access_check("EXPORT"));
        assert_eq!(h.rights().len(), rights::ALL_RIGHTS.len());
        assert!(h.serialized_pre_license(PreLicenseFormat::Json).is_empty());
        let err = h.encrypt_content(b"not a multiple of 16").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadInput);
        Ok(())
    }
}
