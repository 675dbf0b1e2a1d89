use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteOptions, DB};
use serde::{de::DeserializeOwned, Serialize};
use anyhow::{Context, Result};
use tracing::info;

use crate::error::PaymentError;

// Entries are bincode-encoded: compact, and the history never leaves this process.

pub const CF_HISTORY: &str = "history";
/// Inputs held by submitted or in-flight attempts, keyed by output reference.
pub const CF_RESERVATIONS: &str = "reservations";

/// Storage failures surface to the pipeline as `PaymentError::Storage`.
pub(crate) fn storage_err(e: anyhow::Error) -> PaymentError {
    PaymentError::Storage(format!("{:#}", e))
}

pub struct Store {
    pub db: DB,
    path: String,
}

impl Store {
    /// Perform database health check
    pub fn health_check(&self) -> Result<()> {
        let test_key = b"health_check";
        self.db.put(test_key, b"ok").with_context(|| "Database write test failed")?;
        let value = self.db.get(test_key).with_context(|| "Database read test failed")?;
        if value.as_deref() != Some(b"ok") {
            anyhow::bail!("Database read/write consistency check failed");
        }
        self.db.delete(test_key).with_context(|| "Database delete test failed")?;
        Ok(())
    }

    pub fn open(base_path: &str) -> Result<Self> {
        let db_path = base_path.to_string();
        let cf_names = ["default", CF_HISTORY, CF_RESERVATIONS];

        let mut cf_opts = Options::default();
        // History is tiny; keep memtables small.
        cf_opts.set_write_buffer_size(4 * 1024 * 1024);
        cf_opts.set_max_write_buffer_number(2);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf_names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, cf_opts.clone()))
            .collect();

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_keep_log_file_num(4);
        std::fs::create_dir_all(&db_path).ok();

        let db = DB::open_cf_descriptors(&db_opts, &db_path, cf_descriptors)
            .with_context(|| format!("Failed to open database at '{db_path}'"))?;

        let store = Store { db, path: db_path };
        store.health_check().with_context(|| "Database health check failed during initialization")?;
        info!(path = %store.path, "wallet store opened");
        Ok(store)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn put<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let data = bincode::serialize(value)
            .with_context(|| format!("Failed to serialize value for key '{key:?}' in CF '{cf}'"))?;
        let handle = self.db.cf_handle(cf)
            .ok_or_else(|| anyhow::anyhow!("Column family '{}' not found", cf))?;
        // History must survive a crash right after a submission.
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db
            .put_cf_opt(handle, key, &data, &write_opts)
            .with_context(|| format!("Failed to PUT to database for key '{key:?}' in CF '{cf}'"))?;
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let handle = self.db.cf_handle(cf)
            .ok_or_else(|| anyhow::anyhow!("Column family '{}' not found", cf))?;
        match self.db.get_cf(handle, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)
                .with_context(|| format!("Failed to decode value for key '{key:?}' in CF '{cf}'"))?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, cf: &str, key: &[u8]) -> Result<()> {
        let handle = self.db.cf_handle(cf)
            .ok_or_else(|| anyhow::anyhow!("Column family '{}' not found", cf))?;
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db
            .delete_cf_opt(handle, key, &write_opts)
            .with_context(|| format!("Failed to DELETE key '{key:?}' in CF '{cf}'"))?;
        Ok(())
    }

    /// All values in key order.
    pub fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let handle = self.db.cf_handle(cf)
            .ok_or_else(|| anyhow::anyhow!("Column family '{}' not found", cf))?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(handle, IteratorMode::Start) {
            let (key, value) = item?;
            let decoded = bincode::deserialize(&value)
                .with_context(|| format!("Failed to decode value for key '{key:?}' in CF '{cf}'"))?;
            out.push(decoded);
        }
        Ok(out)
    }
}
