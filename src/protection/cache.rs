//! Use licenses issued to this profile, keyed by content id and user

use std::sync::Arc;

use crate::context::MipContext;
use crate::delegates::{MipComponent, StorageDelegate, StorageTable};
use crate::error::{MipError, Result};

const TABLE: &str = "licenses";
const COLUMNS: [&str; 3] = ["content_id", "user", "license"];

pub(crate) struct LicenseCache {
    table: Arc<dyn StorageTable>,
}

impl LicenseCache {
    pub fn open(context: &MipContext, storage: &Arc<dyn StorageDelegate>) -> Result<Self> {
        let table = storage
            .create_storage_table(
                context.mip_path(),
                MipComponent::Protection,
                TABLE,
                &COLUMNS,
                &["license"],
                &["content_id", "user"],
            )?;
        Ok(Self { table })
    }

    pub fn store(&self, content_id: &str, user: &str, license: &[u8]) -> Result<()> {
        let license = std::str::from_utf8(license)
            .map_err(|_| MipError::internal("Use license is not UTF-8"))?;
        let user = user.to_ascii_lowercase();
        self.table
            .insert(&[content_id, user.as_str(), license])
    }

    pub fn load(&self, content_id: &str, user: &str) -> Result<Option<Vec<u8>>> {
        let user = user.to_ascii_lowercase();
        let rows = self
            .table
            .find(&["content_id", "user"], &[content_id, user.as_str()])?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().nth(2))
            .map(String::into_bytes))
    }

    pub fn evict(&self, content_id: &str, user: &str) -> Result<()> {
        let user = user.to_ascii_lowercase();
        self.table
            .delete(&["content_id", "user"], &[content_id, user.as_str()])
            .map(|_| ())
    }
}
