//! Tenant keys used to wrap content keys
//!
//! Each issuing tenant has one symmetric key, created on first publish and
//! persisted in the `tenant_keys` storage table with the key column encrypted.

use std::path::PathBuf;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::Mutex;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::context::MipContext;
use crate::delegates::{MipComponent, StorageDelegate, StorageTable};
use crate::error::{BadInputCode, MipError, Result};
use crate::flighting::FlightingFeature;

const TABLE: &str = "tenant_keys";
const COLUMNS: [&str; 3] = ["tenant_id", "key_id", "key"];
const TENANT_KEY_SIZE: usize = 32;

/// Key of one issuing tenant
pub(crate) struct TenantKey {
    key_id: String,
    key: Zeroizing<Vec<u8>>,
}

impl TenantKey {
    fn from_material(key: Zeroizing<Vec<u8>>) -> Self {
        let key_id = BASE64.encode(Sha256::digest(&key[..]));
        Self { key_id, key }
    }

    /// Fingerprint of the key, published as the license's server certificate
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.key[..]
    }
}

impl std::fmt::Debug for TenantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantKey")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

pub(crate) struct TenantKeystore {
    table: Arc<dyn StorageTable>,
    create_lock: Mutex<()>,
}

impl TenantKeystore {
    pub fn open(context: &MipContext, storage: &Arc<dyn StorageDelegate>) -> Result<Self> {
        let path = if context.is_feature_enabled(FlightingFeature::KeyStoreBasedOnStoragePath) {
            context.mip_path().join("keystore")
        } else {
            PathBuf::new()
        };
        let table = storage
            .create_storage_table(&path, MipComponent::Protection, TABLE, &COLUMNS, &["key"], &["tenant_id"])?;
        Ok(Self {
            table,
            create_lock: Mutex::new(()),
        })
    }

    pub fn find(&self, tenant_id: &str) -> Result<Option<TenantKey>> {
        let rows = self
            .table
            .find(&["tenant_id"], &[tenant_id.to_ascii_lowercase().as_str()])?;
        match rows.into_iter().next() {
            Some(row) => {
                let encoded = row
                    .get(2)
                    .ok_or_else(|| MipError::internal("Tenant key row is missing its key"))?;
                let key = Zeroizing::new(BASE64.decode(encoded)?);
                if key.len() != TENANT_KEY_SIZE {
                    return Err(MipError::internal("Stored tenant key has the wrong length"));
                }
                Ok(Some(TenantKey::from_material(key)))
            }
            None => Ok(None),
        }
    }

    /// Key of `tenant_id`, generated and stored on first use
    pub fn get_or_create(&self, tenant_id: &str) -> Result<TenantKey> {
        let _guard = self.create_lock.lock();
        if let Some(key) = self.find(tenant_id)? {
            return Ok(key);
        }
        let mut material = Zeroizing::new(vec![0u8; TENANT_KEY_SIZE]);
        OsRng.fill_bytes(&mut material[..]);
        let key = TenantKey::from_material(material);
        let encoded = Zeroizing::new(BASE64.encode(key.as_slice()));
        let tenant = tenant_id.to_ascii_lowercase();
        self.table
            .insert(&[tenant.as_str(), key.key_id(), encoded.as_str()])?;
        tracing::debug!(tenant = tenant_id, key_id = key.key_id(), "created tenant key");
        Ok(key)
    }

    /// Key a license was issued under; unknown issuers are untrusted
    pub fn issuer_key(&self, issuer_id: &str, key_id: &str) -> Result<TenantKey> {
        let key = self.find(issuer_id)?.ok_or_else(|| {
            MipError::bad_input_with_code(
                format!("No key is known for issuer {}", issuer_id),
                BadInputCode::LicenseNotTrusted,
            )
        })?;
        if !key_id.is_empty() && key.key_id() != key_id {
            return Err(MipError::bad_input_with_code(
                format!("License was issued under an unknown key of {}", issuer_id),
                BadInputCode::LicenseNotTrusted,
            ));
        }
        Ok(key)
    }
}
