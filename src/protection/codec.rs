//! Serialized license formats
//!
//! A publishing license (PL) carries the protection descriptor, the issuer
//! and the content key wrapped under the issuer's tenant key. A use license
//! states the rights of one user; it is what pre-licenses, delegation
//! licenses and cached licenses are made of.
//!
//! Both documents exist in an XML and a JSON form carrying the same body. The
//! body is bound to the content key with HMAC-SHA256 over its canonical JSON
//! encoding, so either form verifies the same way. The format is specific to
//! this crate.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::delegates::{JsonDelegate, XmlDelegate, XmlDocument, XmlNode};
use crate::error::{BadInputCode, MipError, Result};
use crate::protection::cipher::{CipherMode, ContentKey};
use crate::protection::descriptor::ProtectionDescriptor;
use crate::protection::license::{
    LicenseApplicationData, LicenseConnectionInfo, LicenseDescriptor,
    LicenseNameAndDescriptionItem, ParsedPublishingLicense, PreLicenseFormat,
};

type HmacSha256 = Hmac<Sha256>;

pub(crate) const LICENSE_VERSION: u32 = 1;
const BINDING_ALGORITHM: &str = "HS256";
const PL_ROOT: &str = "PublishingLicense";
const UL_ROOT: &str = "UseLicense";
const NONCE_SIZE: usize = 12;

fn parsing(message: impl Into<String>) -> MipError {
    MipError::bad_input_with_code(message, BadInputCode::ParameterParsing)
}

fn untrusted(message: impl Into<String>) -> MipError {
    MipError::bad_input_with_code(message, BadInputCode::LicenseNotTrusted)
}

/// AES-256-GCM seal, returned as base64 of nonce || ciphertext
pub(crate) fn seal(key: &[u8], plaintext: &[u8]) -> Result<String> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| MipError::internal(format!("Encryption failed: {}", e)))?;
    Ok(BASE64.encode([nonce.as_slice(), sealed.as_slice()].concat()))
}

/// Inverse of [`seal`]; tampering is reported as an untrusted license
pub(crate) fn open(key: &[u8], sealed_b64: &str) -> Result<Vec<u8>> {
    let sealed = BASE64.decode(sealed_b64)?;
    if sealed.len() <= NONCE_SIZE {
        return Err(parsing("Sealed value is truncated"));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| untrusted("Sealed value failed authentication"))
}

/// Base64 HMAC-SHA256 of the canonical JSON encoding of `body`
pub(crate) fn bind<T: Serialize>(key: &ContentKey, body: &T) -> Result<String> {
    let canonical = serde_json::to_vec(body)
        .map_err(|e| MipError::internal(format!("Failed to encode license body: {}", e)))?;
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_slice())
        .map_err(|_| MipError::internal("HMAC initialization failed"))?;
    mac.update(&canonical);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a binding produced by [`bind`]
pub(crate) fn verify_binding<T: Serialize>(key: &ContentKey, body: &T, expected_b64: &str) -> Result<()> {
    let actual = BASE64.decode(bind(key, body)?)?;
    let expected = BASE64
        .decode(expected_b64)
        .map_err(|_| untrusted("License binding is not valid base64"))?;
    if actual.ct_eq(&expected).into() {
        Ok(())
    } else {
        Err(untrusted("License binding does not match its content"))
    }
}

/// XML documents start with `<`, JSON documents with `{`
pub(crate) fn detect_format(serialized: &[u8]) -> Result<PreLicenseFormat> {
    let text = std::str::from_utf8(serialized).map_err(|_| parsing("License is not UTF-8"))?;
    let text = text.trim_start_matches('\u{feff}').trim_start();
    match text.chars().next() {
        Some('<') => Ok(PreLicenseFormat::Xml),
        Some('{') => Ok(PreLicenseFormat::Json),
        Some(_) => Err(MipError::content_format_not_supported(
            "License is neither XML nor JSON",
        )),
        None => Err(parsing("License is empty")),
    }
}

fn rfc3339(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| parsing(format!("Invalid timestamp {}: {}", text, e)))
}

fn parse_bool(text: &str) -> Result<bool> {
    match text.trim() {
        "true" => Ok(true),
        "false" | "" => Ok(false),
        other => Err(parsing(format!("Invalid boolean: {}", other))),
    }
}

/// Signed content of a publishing license
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LicenseBody {
    pub version: u32,
    pub content_id: String,
    pub issuer_id: String,
    pub owner: String,
    pub issued_time: DateTime<Utc>,
    pub cipher_mode: CipherMode,
    pub domains: Vec<String>,
    pub server_public_certificate: String,
    pub connection_info: LicenseConnectionInfo,
    pub referral_info_url: String,
    pub double_key_algorithm: String,
    pub audited_extraction_allowed: bool,
    /// Descriptor with its encrypted application data removed
    pub descriptor: ProtectionDescriptor,
    /// Sealed under the content key; empty when there is none
    pub encrypted_app_data: String,
    /// Content key sealed under the issuer's tenant key
    pub wrapped_content_key: String,
}

impl LicenseBody {
    pub fn to_parsed(&self) -> ParsedPublishingLicense {
        ParsedPublishingLicense {
            domains: self.domains.clone(),
            server_public_certificate: self.server_public_certificate.clone(),
            content_id: self.content_id.clone(),
            issuer_id: self.issuer_id.clone(),
            double_key_algorithm: self.double_key_algorithm.clone(),
            owner: self.owner.clone(),
            connection_info: self.connection_info.clone(),
            descriptor: LicenseDescriptor {
                id: self
                    .descriptor
                    .template_id()
                    .unwrap_or(&self.content_id)
                    .to_string(),
                names: vec![LicenseNameAndDescriptionItem {
                    lcid: 1033,
                    name: self.descriptor.name().to_string(),
                    description: self.descriptor.description().to_string(),
                }],
            },
            protection_descriptor: Some(self.descriptor.clone()),
            referral_info_url: self.referral_info_url.clone(),
            signed_application_data: self
                .descriptor
                .signed_app_data()
                .iter()
                .map(|(name, value)| LicenseApplicationData {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
            issued_time: Some(self.issued_time),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Binding {
    pub alg: String,
    pub value: String,
}

impl Binding {
    pub fn hs256(value: String) -> Self {
        Self {
            alg: BINDING_ALGORITHM.to_string(),
            value,
        }
    }

    fn check_algorithm(&self) -> Result<()> {
        if self.alg == BINDING_ALGORITHM {
            Ok(())
        } else {
            Err(untrusted(format!("Unsupported binding algorithm {}", self.alg)))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SealedLicense {
    pub body: LicenseBody,
    pub binding: Binding,
}

/// Signed rights of one user for one piece of content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UseLicenseBody {
    pub version: u32,
    pub content_id: String,
    pub issuer_id: String,
    pub user: String,
    pub rights: Vec<String>,
    pub issued_time: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SealedUseLicense {
    pub body: UseLicenseBody,
    pub binding: Binding,
}

#[derive(Serialize, Deserialize)]
struct JsonEnvelope<T> {
    format: String,
    #[serde(flatten)]
    license: T,
}

fn encode_json<T: Serialize>(format: &str, license: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(&JsonEnvelope {
        format: format.to_string(),
        license,
    })
    .map_err(|e| MipError::internal(format!("Failed to encode license: {}", e)))
}

fn decode_json<T: serde::de::DeserializeOwned>(
    json: &dyn JsonDelegate,
    expected_format: &str,
    serialized: &[u8],
) -> Result<T> {
    let text = std::str::from_utf8(serialized).map_err(|_| parsing("License is not UTF-8"))?;
    let envelope: JsonEnvelope<T> = json.parse(text)?.to_typed()?;
    if envelope.format != expected_format {
        return Err(MipError::content_format_not_supported(format!(
            "Expected a {} license, found {}",
            expected_format, envelope.format
        )));
    }
    Ok(envelope.license)
}

fn parse_xml(xml: &dyn XmlDelegate, serialized: &[u8], root_name: &str) -> Result<XmlNode> {
    let text = std::str::from_utf8(serialized).map_err(|_| parsing("License is not UTF-8"))?;
    let root = xml.parse_data(text)?.into_root();
    if root.name != root_name {
        return Err(MipError::content_format_not_supported(format!(
            "Expected <{}>, found <{}>",
            root_name, root.name
        )));
    }
    let version: u32 = root
        .attribute("version")
        .unwrap_or("")
        .parse()
        .map_err(|_| parsing("License version is missing"))?;
    if version != LICENSE_VERSION {
        return Err(MipError::content_format_not_supported(format!(
            "Unsupported license version {}",
            version
        )));
    }
    Ok(root)
}

fn binding_node(binding: &Binding) -> XmlNode {
    XmlNode::new("Binding")
        .with_attribute("alg", binding.alg.as_str())
        .with_text(binding.value.as_str())
}

fn read_binding(root: &XmlNode) -> Result<Binding> {
    let node = root
        .child("Binding")
        .ok_or_else(|| untrusted("License has no binding"))?;
    Ok(Binding {
        alg: node.attribute("alg").unwrap_or("").to_string(),
        value: node.text.clone(),
    })
}

fn text_node(name: &str, text: impl Into<String>) -> XmlNode {
    XmlNode::new(name).with_text(text)
}

pub(crate) fn encode_publishing_license(
    license: &SealedLicense,
    format: PreLicenseFormat,
) -> Result<Vec<u8>> {
    match format {
        PreLicenseFormat::Json => encode_json("publishing-license", license),
        PreLicenseFormat::Xml => {
            let body = &license.body;
            let descriptor = serde_json::to_vec(&body.descriptor)
                .map_err(|e| MipError::internal(format!("Failed to encode descriptor: {}", e)))?;
            let mut domains = XmlNode::new("Domains");
            for domain in &body.domains {
                domains = domains.with_child(text_node("Domain", domain.as_str()));
            }
            let root = XmlNode::new(PL_ROOT)
                .with_attribute("version", body.version.to_string())
                .with_child(text_node("ContentId", body.content_id.as_str()))
                .with_child(text_node("Issuer", body.issuer_id.as_str()))
                .with_child(text_node("Owner", body.owner.as_str()))
                .with_child(text_node("IssuedTime", rfc3339(&body.issued_time)))
                .with_child(text_node("CipherMode", body.cipher_mode.as_str()))
                .with_child(domains)
                .with_child(text_node(
                    "ServerPublicCertificate",
                    body.server_public_certificate.as_str(),
                ))
                .with_child(
                    XmlNode::new("ConnectionInfo")
                        .with_attribute("extranet", body.connection_info.extranet_url.as_str())
                        .with_attribute("intranet", body.connection_info.intranet_url.as_str()),
                )
                .with_child(text_node("ReferralInfoUrl", body.referral_info_url.as_str()))
                .with_child(text_node("DoubleKeyAlgorithm", body.double_key_algorithm.as_str()))
                .with_child(text_node(
                    "AuditedExtractionAllowed",
                    body.audited_extraction_allowed.to_string(),
                ))
                .with_child(
                    XmlNode::new("Descriptor")
                        .with_attribute("encoding", "base64-json")
                        .with_text(BASE64.encode(descriptor)),
                )
                .with_child(text_node("EncryptedAppData", body.encrypted_app_data.as_str()))
                .with_child(text_node("WrappedContentKey", body.wrapped_content_key.as_str()))
                .with_child(binding_node(&license.binding));
            Ok(XmlDocument::new(root).serialize().into_bytes())
        }
    }
}

pub(crate) fn decode_publishing_license(
    serialized: &[u8],
    json: &dyn JsonDelegate,
    xml: &dyn XmlDelegate,
) -> Result<SealedLicense> {
    let license = match detect_format(serialized)? {
        PreLicenseFormat::Json => decode_json::<SealedLicense>(json, "publishing-license", serialized)?,
        PreLicenseFormat::Xml => {
            let root = parse_xml(xml, serialized, PL_ROOT)?;
            let descriptor_json = BASE64.decode(root.child_text("Descriptor").trim())?;
            let descriptor: ProtectionDescriptor = serde_json::from_slice(&descriptor_json)?;
            let connection = root.child("ConnectionInfo");
            let body = LicenseBody {
                version: LICENSE_VERSION,
                content_id: root.child_text("ContentId").to_string(),
                issuer_id: root.child_text("Issuer").to_string(),
                owner: root.child_text("Owner").to_string(),
                issued_time: parse_time(root.child_text("IssuedTime"))?,
                cipher_mode: root.child_text("CipherMode").parse()?,
                domains: root
                    .child("Domains")
                    .map(|d| d.children_named("Domain").map(|n| n.text.clone()).collect())
                    .unwrap_or_default(),
                server_public_certificate: root.child_text("ServerPublicCertificate").to_string(),
                connection_info: LicenseConnectionInfo {
                    extranet_url: connection
                        .and_then(|c| c.attribute("extranet"))
                        .unwrap_or("")
                        .to_string(),
                    intranet_url: connection
                        .and_then(|c| c.attribute("intranet"))
                        .unwrap_or("")
                        .to_string(),
                },
                referral_info_url: root.child_text("ReferralInfoUrl").to_string(),
                double_key_algorithm: root.child_text("DoubleKeyAlgorithm").to_string(),
                audited_extraction_allowed: parse_bool(root.child_text("AuditedExtractionAllowed"))?,
                descriptor,
                encrypted_app_data: root.child_text("EncryptedAppData").to_string(),
                wrapped_content_key: root.child_text("WrappedContentKey").to_string(),
            };
            SealedLicense {
                body,
                binding: read_binding(&root)?,
            }
        }
    };
    license.binding.check_algorithm()?;
    if license.body.content_id.is_empty() || license.body.issuer_id.is_empty() {
        return Err(parsing("License is missing its content id or issuer"));
    }
    Ok(license)
}

pub(crate) fn encode_use_license(
    license: &SealedUseLicense,
    format: PreLicenseFormat,
) -> Result<Vec<u8>> {
    match format {
        PreLicenseFormat::Json => encode_json("use-license", license),
        PreLicenseFormat::Xml => {
            let body = &license.body;
            let mut rights = XmlNode::new("Rights");
            for right in &body.rights {
                rights = rights.with_child(text_node("Right", right.as_str()));
            }
            let mut root = XmlNode::new(UL_ROOT)
                .with_attribute("version", body.version.to_string())
                .with_child(text_node("ContentId", body.content_id.as_str()))
                .with_child(text_node("Issuer", body.issuer_id.as_str()))
                .with_child(text_node("User", body.user.as_str()))
                .with_child(rights)
                .with_child(text_node("IssuedTime", rfc3339(&body.issued_time)));
            if let Some(until) = &body.valid_until {
                root = root.with_child(text_node("ValidUntil", rfc3339(until)));
            }
            root = root.with_child(binding_node(&license.binding));
            Ok(XmlDocument::new(root).serialize().into_bytes())
        }
    }
}

pub(crate) fn decode_use_license(
    serialized: &[u8],
    json: &dyn JsonDelegate,
    xml: &dyn XmlDelegate,
) -> Result<SealedUseLicense> {
    let license = match detect_format(serialized)? {
        PreLicenseFormat::Json => decode_json::<SealedUseLicense>(json, "use-license", serialized)?,
        PreLicenseFormat::Xml => {
            let root = parse_xml(xml, serialized, UL_ROOT)?;
            let valid_until = match root.child("ValidUntil") {
                Some(node) => Some(parse_time(&node.text)?),
                None => None,
            };
            SealedUseLicense {
                body: UseLicenseBody {
                    version: LICENSE_VERSION,
                    content_id: root.child_text("ContentId").to_string(),
                    issuer_id: root.child_text("Issuer").to_string(),
                    user: root.child_text("User").to_string(),
                    rights: root
                        .child("Rights")
                        .map(|r| r.children_named("Right").map(|n| n.text.clone()).collect())
                        .unwrap_or_default(),
                    issued_time: parse_time(root.child_text("IssuedTime"))?,
                    valid_until,
                },
                binding: read_binding(&root)?,
            }
        }
    };
    license.binding.check_algorithm()?;
    Ok(license)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegates::{QuickXmlDelegate, SerdeJsonDelegate};
    use crate::error::ErrorKind;
    use crate::protection::descriptor::{ProtectionDescriptorBuilder, UserRights};

    fn sample_license(key: &ContentKey) -> Result<SealedLicense> {
        let descriptor = ProtectionDescriptorBuilder::from_user_rights(vec![UserRights::new(
            ["bob@contoso.com"],
            ["VIEW", "EDIT"],
        )])
        .name("Confidential <draft> & notes")
        .signed_app_data("Department", "Legal")
        .build()?;
        let body = LicenseBody {
            version: LICENSE_VERSION,
            content_id: "5d3c4a2e-0000-4000-8000-000000000001".into(),
            issuer_id: "contoso.com".into(),
            owner: "alice@contoso.com".into(),
            issued_time: Utc::now(),
            cipher_mode: CipherMode::Cbc4k,
            domains: vec!["contoso.com".into()],
            server_public_certificate: "key-id".into(),
            connection_info: LicenseConnectionInfo {
                extranet_url: "https://contoso.example/licensing".into(),
                intranet_url: String::new(),
            },
            referral_info_url: String::new(),
            double_key_algorithm: String::new(),
            audited_extraction_allowed: true,
            descriptor,
            encrypted_app_data: String::new(),
            wrapped_content_key: seal(&[9u8; 32], key.as_slice())?,
        };
        let binding = Binding::hs256(bind(key, &body)?);
        Ok(SealedLicense { body, binding })
    }

    #[test]
    fn test_both_formats_decode_to_the_same_verified_body() -> Result<()> {
        let key = ContentKey::generate();
        let license = sample_license(&key)?;
        for format in [PreLicenseFormat::Xml, PreLicenseFormat::Json] {
            let bytes = encode_publishing_license(&license, format)?;
            assert_eq!(detect_format(&bytes)?, format);
            let decoded = decode_publishing_license(&bytes, &SerdeJsonDelegate, &QuickXmlDelegate)?;
            assert_eq!(decoded, license);
            verify_binding(&key, &decoded.body, &decoded.binding.value)?;
        }
        Ok(())
    }

    #[test]
    fn test_binding_is_hmac_sha256_of_the_json_body() -> Result<()> {
        let key = ContentKey::from_slice(&[7u8; 32])?;
        let binding = bind(&key, &"license body")?;
        assert_eq!(binding, "443igMV6FQ9R8PJUYvzZ22EiqLrgvLk48tdih2KSpo4=");
        verify_binding(&key, &"license body", &binding)?;
        Ok(())
    }

    #[test]
    fn test_tampered_body_fails_binding() -> Result<()> {
        let key = ContentKey::generate();
        let license = sample_license(&key)?;
        let xml = String::from_utf8(encode_publishing_license(&license, PreLicenseFormat::Xml)?)
            .map_err(|e| MipError::internal(e.to_string()))?;
        let tampered = xml.replace("alice@contoso.com", "mallory@contoso.com");
        let decoded =
            decode_publishing_license(tampered.as_bytes(), &SerdeJsonDelegate, &QuickXmlDelegate)?;
        let err = verify_binding(&key, &decoded.body, &decoded.binding.value).unwrap_err();
        assert_eq!(err.bad_input_code(), Some(BadInputCode::LicenseNotTrusted));
        Ok(())
    }

    #[test]
    fn test_use_license_formats() -> Result<()> {
        let key = ContentKey::generate();
        let body = UseLicenseBody {
            version: LICENSE_VERSION,
            content_id: "cid".into(),
            issuer_id: "contoso.com".into(),
            user: "bob@contoso.com".into(),
            rights: vec!["VIEW".into()],
            issued_time: Utc::now(),
            valid_until: Some(Utc::now()),
        };
        let license = SealedUseLicense {
            binding: Binding::hs256(bind(&key, &body)?),
            body,
        };
        for format in [PreLicenseFormat::Xml, PreLicenseFormat::Json] {
            let bytes = encode_use_license(&license, format)?;
            let decoded = decode_use_license(&bytes, &SerdeJsonDelegate, &QuickXmlDelegate)?;
            assert_eq!(decoded, license);
        }
        Ok(())
    }

    #[test]
    fn test_wrong_document_kind_is_rejected() -> Result<()> {
        let key = ContentKey::generate();
        let license = sample_license(&key)?;
        let bytes = encode_publishing_license(&license, PreLicenseFormat::Json)?;
        let err = decode_use_license(&bytes, &SerdeJsonDelegate, &QuickXmlDelegate).unwrap_err();
        assert!(err.is_a(ErrorKind::BadInput));
        Ok(())
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(b"  <x/>").ok(), Some(PreLicenseFormat::Xml));
        assert_eq!(
            detect_format(b"garbage").unwrap_err().kind(),
            ErrorKind::ContentFormatNotSupported
        );
        assert_eq!(detect_format(b"").unwrap_err().kind(), ErrorKind::BadInput);
    }

    #[test]
    fn test_seal_open() -> Result<()> {
        let key = [3u8; 32];
        let sealed = seal(&key, b"secret")?;
        assert_eq!(open(&key, &sealed)?, b"secret");
        let err = open(&[4u8; 32], &sealed).unwrap_err();
        assert_eq!(err.bad_input_code(), Some(BadInputCode::LicenseNotTrusted));
        Ok(())
    }
}
