use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::{Mutex, RwLock};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::delegates::DelegateResponse;
use crate::error::MipError;

/// SDK component that owns a storage table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MipComponent {
    Policy,
    File,
    Protection,
}

impl MipComponent {
    pub fn as_str(self) -> &'static str {
        match self {
            MipComponent::Policy => "Policy",
            MipComponent::File => "File",
            MipComponent::Protection => "Protection",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageSettings {
    pub is_remote: bool,
    pub is_in_memory_supported: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            is_remote: false,
            is_in_memory_supported: true,
        }
    }
}

/// A table of string rows addressed by column name
pub trait StorageTable: Send + Sync {
    /// Insert a row; a row with the same key-column values is replaced
    fn insert(&self, values: &[&str]) -> DelegateResponse<()>;

    fn list(&self) -> DelegateResponse<Vec<Vec<String>>>;

    /// Set `update_columns` on every row matching all query columns; returns rows touched
    fn update(
        &self,
        update_columns: &[&str],
        update_values: &[&str],
        query_columns: &[&str],
        query_values: &[&str],
    ) -> DelegateResponse<usize>;

    /// Returns rows removed
    fn delete(&self, query_columns: &[&str], query_values: &[&str]) -> DelegateResponse<usize>;

    fn find(
        &self,
        query_columns: &[&str],
        query_values: &[&str],
    ) -> DelegateResponse<Vec<Vec<String>>>;
}

/// Factory for storage tables
pub trait StorageDelegate: Send + Sync {
    fn create_storage_table(
        &self,
        path: &Path,
        component: MipComponent,
        table_name: &str,
        all_columns: &[&str],
        encrypted_columns: &[&str],
        key_columns: &[&str],
    ) -> DelegateResponse<Arc<dyn StorageTable>>;

    fn storage_settings(&self) -> StorageSettings {
        StorageSettings::default()
    }
}

type TableId = (PathBuf, MipComponent, String);

/// Process-local storage; encrypted columns are sealed with AES-256-GCM
pub struct InMemoryStorageDelegate {
    integrity_checking: bool,
    tables: Mutex<HashMap<TableId, Arc<Table>>>,
}

impl InMemoryStorageDelegate {
    /// With `integrity_checking`, sealed cells are bound to their table and column
    pub fn new(integrity_checking: bool) -> Self {
        Self {
            integrity_checking,
            tables: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStorageDelegate {
    fn default() -> Self {
        Self::new(true)
    }
}

impl StorageDelegate for InMemoryStorageDelegate {
    fn create_storage_table(
        &self,
        path: &Path,
        component: MipComponent,
        table_name: &str,
        all_columns: &[&str],
        encrypted_columns: &[&str],
        key_columns: &[&str],
    ) -> DelegateResponse<Arc<dyn StorageTable>> {
        let schema = TableSchema::new(table_name, all_columns, encrypted_columns, key_columns)?;
        let id = (path.to_path_buf(), component, table_name.to_string());

        let mut tables = self.tables.lock();
        if let Some(existing) = tables.get(&id) {
            if existing.schema.columns != schema.columns {
                return Err(MipError::bad_input(format!(
                    "Table {} already exists with a different schema",
                    table_name
                )));
            }
            return Ok(existing.clone() as Arc<dyn StorageTable>);
        }

        debug!(table = table_name, component = component.as_str(), "creating storage table");
        let table = Arc::new(Table::new(
            schema,
            self.integrity_checking,
            Some(random_key()),
            Vec::new(),
            None,
        ));
        tables.insert(id, table.clone());
        Ok(table as Arc<dyn StorageTable>)
    }
}

const KEY_FILE: &str = "storage.key";

/// Storage that keeps each table as a JSON file
///
/// Tables land under the `path` handed to
/// [`create_storage_table`](StorageDelegate::create_storage_table), resolved
/// against the delegate's root when relative. With `encrypted`, encrypted
/// columns are sealed under a key kept in `<root>/storage.key`; otherwise
/// they are written as plain text.
pub struct FileStorageDelegate {
    root: PathBuf,
    integrity_checking: bool,
    key: Option<Zeroizing<[u8; 32]>>,
    tables: Mutex<HashMap<TableId, Arc<Table>>>,
}

impl FileStorageDelegate {
    pub fn open(root: &Path, encrypted: bool, integrity_checking: bool) -> DelegateResponse<Self> {
        std::fs::create_dir_all(root).map_err(|e| {
            MipError::file_io(format!("Failed to create storage directory {}: {}", root.display(), e))
        })?;
        let key = if encrypted {
            Some(load_or_create_key(&root.join(KEY_FILE))?)
        } else {
            None
        };
        Ok(Self {
            root: root.to_path_buf(),
            integrity_checking,
            key,
            tables: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_file(&self, path: &Path, component: MipComponent, table_name: &str) -> PathBuf {
        // relative paths (including the empty one) resolve against the root
        let dir = self.root.join(path);
        dir.join(format!(
            "{}.{}.json",
            component.as_str().to_ascii_lowercase(),
            table_name
        ))
    }
}

impl StorageDelegate for FileStorageDelegate {
    fn create_storage_table(
        &self,
        path: &Path,
        component: MipComponent,
        table_name: &str,
        all_columns: &[&str],
        encrypted_columns: &[&str],
        key_columns: &[&str],
    ) -> DelegateResponse<Arc<dyn StorageTable>> {
        let schema = TableSchema::new(table_name, all_columns, encrypted_columns, key_columns)?;
        let id = (path.to_path_buf(), component, table_name.to_string());

        let mut tables = self.tables.lock();
        if let Some(existing) = tables.get(&id) {
            if existing.schema.columns != schema.columns {
                return Err(MipError::bad_input(format!(
                    "Table {} already exists with a different schema",
                    table_name
                )));
            }
            return Ok(existing.clone() as Arc<dyn StorageTable>);
        }

        let file = self.table_file(path, component, table_name);
        let rows = read_rows(&file, &schema)?;
        debug!(
            table = table_name,
            component = component.as_str(),
            file = %file.display(),
            rows = rows.len(),
            "opening storage table"
        );
        let table = Arc::new(Table::new(
            schema,
            self.integrity_checking,
            self.key.clone(),
            rows,
            Some(file),
        ));
        tables.insert(id, table.clone());
        Ok(table as Arc<dyn StorageTable>)
    }

    fn storage_settings(&self) -> StorageSettings {
        StorageSettings {
            is_remote: false,
            is_in_memory_supported: false,
        }
    }
}

fn random_key() -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(&mut key[..]);
    key
}

fn load_or_create_key(file: &Path) -> DelegateResponse<Zeroizing<[u8; 32]>> {
    match std::fs::read(file) {
        Ok(bytes) => {
            let bytes = Zeroizing::new(bytes);
            let mut key = Zeroizing::new([0u8; 32]);
            if bytes.len() != key.len() {
                return Err(MipError::internal(format!(
                    "Storage key {} has the wrong length",
                    file.display()
                )));
            }
            key.copy_from_slice(&bytes);
            Ok(key)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let key = random_key();
            let mut options = std::fs::OpenOptions::new();
            options.write(true).create_new(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut out = options.open(file)?;
            out.write_all(&key[..])?;
            out.sync_all()?;
            Ok(key)
        }
        Err(e) => Err(MipError::file_io(format!(
            "Failed to read storage key {}: {}",
            file.display(),
            e
        ))),
    }
}

/// On-disk form of a table
#[derive(Serialize, Deserialize)]
struct StoredTable {
    columns: Vec<String>,
    rows: Vec<Vec<StoredCell>>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum StoredCell {
    Plain(String),
    Sealed(String),
}

fn read_rows(file: &Path, schema: &TableSchema) -> DelegateResponse<Vec<Vec<Cell>>> {
    let raw = match std::fs::read(file) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(MipError::file_io(format!(
                "Failed to read storage table {}: {}",
                file.display(),
                e
            )))
        }
    };
    let stored: StoredTable = serde_json::from_slice(&raw)
        .map_err(|e| MipError::internal(format!("Storage table {} is corrupt: {}", file.display(), e)))?;
    if stored.columns != schema.columns {
        return Err(MipError::bad_input(format!(
            "Table {} on disk has a different schema",
            schema.name
        )));
    }
    stored
        .rows
        .into_iter()
        .map(|row| {
            if row.len() != schema.columns.len() {
                return Err(MipError::internal(format!(
                    "Storage table {} has a malformed row",
                    file.display()
                )));
            }
            row.into_iter()
                .map(|cell| -> DelegateResponse<Cell> {
                    match cell {
                        StoredCell::Plain(value) => Ok(Cell::Plain(value)),
                        StoredCell::Sealed(encoded) => Ok(Cell::Sealed(BASE64.decode(encoded)?)),
                    }
                })
                .collect::<DelegateResponse<Vec<Cell>>>()
        })
        .collect()
}

fn write_rows(file: &Path, schema: &TableSchema, rows: &[Vec<Cell>]) -> DelegateResponse<()> {
    let stored = StoredTable {
        columns: schema.columns.clone(),
        rows: rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| match cell {
                        Cell::Plain(value) => StoredCell::Plain(value.clone()),
                        Cell::Sealed(bytes) => StoredCell::Sealed(BASE64.encode(bytes)),
                    })
                    .collect()
            })
            .collect(),
    };
    let dir = file
        .parent()
        .ok_or_else(|| MipError::file_io(format!("No directory for {}", file.display())))?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut tmp, &stored)
        .map_err(|e| MipError::internal(format!("Failed to encode storage table: {}", e)))?;
    tmp.as_file().sync_all()?;
    tmp.persist(file)
        .map_err(|e| MipError::file_io(format!("Failed to write {}: {}", file.display(), e)))?;
    Ok(())
}

#[derive(Debug, Clone)]
struct TableSchema {
    name: String,
    columns: Vec<String>,
    encrypted: Vec<bool>,
    keys: Vec<usize>,
}

impl TableSchema {
    fn new(
        name: &str,
        all_columns: &[&str],
        encrypted_columns: &[&str],
        key_columns: &[&str],
    ) -> DelegateResponse<Self> {
        if name.is_empty() || all_columns.is_empty() {
            return Err(MipError::bad_input("Storage table needs a name and columns"));
        }
        let columns: Vec<String> = all_columns.iter().map(|c| c.to_string()).collect();
        let index_of = |column: &str| {
            columns
                .iter()
                .position(|c| c == column)
                .ok_or_else(|| {
                    MipError::bad_input(format!(
                        "Column {} is not a column of table {}",
                        column, name
                    ))
                })
        };

        let mut encrypted = vec![false; columns.len()];
        for column in encrypted_columns {
            encrypted[index_of(*column)?] = true;
        }
        let keys = key_columns
            .iter()
            .map(|c| index_of(*c))
            .collect::<DelegateResponse<Vec<_>>>()?;

        Ok(Self {
            name: name.to_string(),
            columns,
            encrypted,
            keys,
        })
    }

    fn indices(&self, columns: &[&str], values: &[&str]) -> DelegateResponse<Vec<usize>> {
        if columns.len() != values.len() {
            return Err(MipError::bad_input(format!(
                "Expected {} values for table {}, got {}",
                columns.len(),
                self.name,
                values.len()
            )));
        }
        columns
            .iter()
            .map(|column| {
                self.columns
                    .iter()
                    .position(|c| c == column)
                    .ok_or_else(|| MipError::bad_input(format!("Unknown column {}", column)))
            })
            .collect()
    }
}

#[derive(Clone)]
enum Cell {
    Plain(String),
    Sealed(Vec<u8>),
}

/// Rows shared by both delegates; `backing` is rewritten after every change
struct Table {
    schema: TableSchema,
    integrity_checking: bool,
    key: Option<Zeroizing<[u8; 32]>>,
    rows: RwLock<Vec<Vec<Cell>>>,
    backing: Option<PathBuf>,
}

impl Table {
    fn new(
        schema: TableSchema,
        integrity_checking: bool,
        key: Option<Zeroizing<[u8; 32]>>,
        rows: Vec<Vec<Cell>>,
        backing: Option<PathBuf>,
    ) -> Self {
        Self {
            schema,
            integrity_checking,
            key,
            rows: RwLock::new(rows),
            backing,
        }
    }

    fn persist(&self, rows: &[Vec<Cell>]) -> DelegateResponse<()> {
        match &self.backing {
            Some(file) => write_rows(file, &self.schema, rows),
            None => Ok(()),
        }
    }

    fn aad(&self, column: usize) -> Vec<u8> {
        if self.integrity_checking {
            format!("{}\0{}", self.schema.name, self.schema.columns[column]).into_bytes()
        } else {
            Vec::new()
        }
    }

    fn seal(&self, column: usize, value: &str) -> DelegateResponse<Cell> {
        let key = match &self.key {
            Some(key) if self.schema.encrypted[column] => key,
            _ => return Ok(Cell::Plain(value.to_string())),
        };
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
        let mut nonce = [0u8; 12];
        OsRng.fill_bytes(&mut nonce);
        let aad = self.aad(column);
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: value.as_bytes(),
                    aad: &aad,
                },
            )
            .map_err(|e| MipError::internal(format!("Failed to seal column: {}", e)))?;
        Ok(Cell::Sealed([nonce.as_slice(), sealed.as_slice()].concat()))
    }

    fn open(&self, column: usize, cell: &Cell) -> DelegateResponse<String> {
        match cell {
            Cell::Plain(value) => Ok(value.clone()),
            Cell::Sealed(bytes) => {
                if bytes.len() < 12 {
                    return Err(MipError::internal("Sealed cell is truncated"));
                }
                let key = self
                    .key
                    .as_ref()
                    .ok_or_else(|| MipError::internal("Sealed cell in a table without a key"))?;
                let (nonce, sealed) = bytes.split_at(12);
                let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
                let aad = self.aad(column);
                let plain = cipher
                    .decrypt(
                        Nonce::from_slice(nonce),
                        Payload {
                            msg: sealed,
                            aad: &aad,
                        },
                    )
                    .map_err(|_| MipError::internal("Sealed cell failed integrity check"))?;
                String::from_utf8(plain)
                    .map_err(|_| MipError::internal("Sealed cell is not valid UTF-8"))
            }
        }
    }

    fn open_row(&self, row: &[Cell]) -> DelegateResponse<Vec<String>> {
        row.iter()
            .enumerate()
            .map(|(i, cell)| self.open(i, cell))
            .collect()
    }

    fn matches(&self, row: &[Cell], indices: &[usize], values: &[&str]) -> DelegateResponse<bool> {
        for (index, expected) in indices.iter().zip(values) {
            if self.open(*index, &row[*index])? != *expected {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl StorageTable for Table {
    fn insert(&self, values: &[&str]) -> DelegateResponse<()> {
        if values.len() != self.schema.columns.len() {
            return Err(MipError::bad_input(format!(
                "Table {} has {} columns, got {} values",
                self.schema.name,
                self.schema.columns.len(),
                values.len()
            )));
        }
        let row = values
            .iter()
            .enumerate()
            .map(|(i, v)| self.seal(i, v))
            .collect::<DelegateResponse<Vec<_>>>()?;

        let key_values: Vec<&str> = self.schema.keys.iter().map(|i| values[*i]).collect();
        let mut rows = self.rows.write();
        if !self.schema.keys.is_empty() {
            let mut kept = Vec::with_capacity(rows.len());
            for existing in rows.drain(..) {
                if !self.matches(&existing, &self.schema.keys, &key_values)? {
                    kept.push(existing);
                }
            }
            *rows = kept;
        }
        rows.push(row);
        self.persist(&rows)
    }

    fn list(&self) -> DelegateResponse<Vec<Vec<String>>> {
        self.rows.read().iter().map(|row| self.open_row(row)).collect()
    }

    fn update(
        &self,
        update_columns: &[&str],
        update_values: &[&str],
        query_columns: &[&str],
        query_values: &[&str],
    ) -> DelegateResponse<usize> {
        let targets = self.schema.indices(update_columns, update_values)?;
        let query = self.schema.indices(query_columns, query_values)?;
        let mut rows = self.rows.write();
        let mut touched = 0;
        for row in rows.iter_mut() {
            if self.matches(row, &query, query_values)? {
                for (index, value) in targets.iter().zip(update_values) {
                    row[*index] = self.seal(*index, value)?;
                }
                touched += 1;
            }
        }
        if touched > 0 {
            self.persist(&rows)?;
        }
        Ok(touched)
    }

    fn delete(&self, query_columns: &[&str], query_values: &[&str]) -> DelegateResponse<usize> {
        let query = self.schema.indices(query_columns, query_values)?;
        let mut rows = self.rows.write();
        let before = rows.len();
        let mut kept = Vec::with_capacity(before);
        for row in rows.drain(..) {
            if !self.matches(&row, &query, query_values)? {
                kept.push(row);
            }
        }
        *rows = kept;
        let removed = before - rows.len();
        if removed > 0 {
            self.persist(&rows)?;
        }
        Ok(removed)
    }

    fn find(
        &self,
        query_columns: &[&str],
        query_values: &[&str],
    ) -> DelegateResponse<Vec<Vec<String>>> {
        let query = self.schema.indices(query_columns, query_values)?;
        let rows = self.rows.read();
        let mut found = Vec::new();
        for row in rows.iter() {
            if self.matches(row, &query, query_values)? {
                found.push(self.open_row(row)?);
            }
        }
        Ok(found)
    }
}
