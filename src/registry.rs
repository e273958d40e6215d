//! Engine bookkeeping shared by the protection, policy and file profiles
//!
//! Live engines are held in memory; their ids are also recorded in the
//! profile's `engines` storage table so that `list` reports engines added by
//! earlier sessions over the same storage.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::context::MipContext;
use crate::delegates::{MipComponent, StorageDelegate, StorageTable};
use crate::error::{MipError, Result};

const TABLE: &str = "engines";
const COLUMNS: [&str; 3] = ["engine_id", "client_data", "added_at"];

pub(crate) struct EngineRegistry<E> {
    live: RwLock<BTreeMap<String, Arc<E>>>,
    table: Arc<dyn StorageTable>,
}

impl<E> EngineRegistry<E> {
    pub fn open(
        context: &MipContext,
        storage: &Arc<dyn StorageDelegate>,
        component: MipComponent,
    ) -> Result<Self> {
        let table = storage
            .create_storage_table(context.mip_path(), component, TABLE, &COLUMNS, &[], &["engine_id"])?;
        Ok(Self {
            live: RwLock::new(BTreeMap::new()),
            table,
        })
    }

    /// Register a loaded engine; a second live engine with the same id is rejected
    pub fn add(&self, engine_id: &str, client_data: &str, engine: Arc<E>) -> Result<()> {
        let mut live = self.live.write();
        if live.contains_key(engine_id) {
            return Err(MipError::bad_input(format!(
                "Engine {} is already loaded",
                engine_id
            )));
        }
        let added_at = Utc::now().to_rfc3339();
        self.table
            .insert(&[engine_id, client_data, added_at.as_str()])?;
        live.insert(engine_id.to_string(), engine);
        Ok(())
    }

    pub fn get(&self, engine_id: &str) -> Option<Arc<E>> {
        self.live.read().get(engine_id).cloned()
    }

    /// Ids of every known engine, live or persisted, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .table
            .list()?
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect();
        ids.extend(self.live.read().keys().cloned());
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Unload and forget an engine
    pub fn delete(&self, engine_id: &str) -> Result<()> {
        let was_live = self.live.write().remove(engine_id).is_some();
        let removed = self
            .table
            .delete(&["engine_id"], &[engine_id])?;
        if !was_live && removed == 0 {
            return Err(MipError::bad_input(format!("Unknown engine {}", engine_id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApplicationInfo, MipConfiguration};
    use crate::delegates::InMemoryStorageDelegate;
    use crate::error::ErrorKind;

    fn registry(
        storage: &Arc<dyn StorageDelegate>,
        dir: &tempfile::TempDir,
    ) -> Result<EngineRegistry<String>> {
        let config = MipConfiguration::builder(
            ApplicationInfo::new("app-id", "Registry Test", "1.0"),
            dir.path(),
        )
        .build()?;
        EngineRegistry::open(&*MipContext::create(Arc::new(config))?, storage, MipComponent::Protection)
    }

    #[test]
    fn test_add_get_delete() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage: Arc<dyn StorageDelegate> = Arc::new(InMemoryStorageDelegate::default());
        let registry = registry(&storage, &dir)?;
        registry.add("b", "", Arc::new("engine b".to_string()))?;
        registry.add("a", "data", Arc::new("engine a".to_string()))?;
        assert_eq!(registry.list()?, vec!["a", "b"]);
        assert_eq!(registry.get("a").as_deref().map(String::as_str), Some("engine a"));

        let err = registry.add("a", "", Arc::new(String::new())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadInput);

        registry.delete("a")?;
        assert!(registry.get("a").is_none());
        assert_eq!(registry.list()?, vec!["b"]);
        assert_eq!(registry.delete("a").unwrap_err().kind(), ErrorKind::BadInput);
        Ok(())
    }

    #[test]
    fn test_persisted_ids_survive_a_new_registry() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage: Arc<dyn StorageDelegate> = Arc::new(InMemoryStorageDelegate::default());
        registry(&storage, &dir)?.add("kept", "", Arc::new(String::new()))?;

        let reopened = registry(&storage, &dir)?;
        assert_eq!(reopened.list()?, vec!["kept"]);
        assert!(reopened.get("kept").is_none());
        reopened.delete("kept")?;
        assert!(reopened.list()?.is_empty());
        Ok(())
    }
}
