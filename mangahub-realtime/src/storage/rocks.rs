//! RocksDB-backed [`ProgressStore`].

use std::path::{Path, PathBuf};

use mangahub_core::{ProgressRecord, ProgressStore, StoreError};
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteOptions,
};
use serde::{Deserialize, Serialize};

const CF_PROGRESS: &str = "progress";

/// Separates `user_id` from `manga_id` in a key. Neither id may contain it.
const KEY_SEPARATOR: u8 = 0x00;

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// fsync on every write
    pub sync_writes: bool,
    pub max_open_files: i32,
    /// Block cache size in bytes
    pub block_cache_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("mangahub_data"),
            sync_writes: false,
            max_open_files: 512,
            block_cache_size: 64 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches, for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_writes: false,
            max_open_files: 64,
            block_cache_size: 4 * 1024 * 1024,
        }
    }
}

fn backend(e: rocksdb::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Progress records in one RocksDB column family.
pub struct RocksProgressStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RocksProgressStore {
    /// Open (creating if missing) the store at `config.path`.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(10.0, false);

        let mut cf_opts = Options::default();
        cf_opts.set_block_based_table_factory(&block_opts);
        cf_opts.set_compression_type(DBCompressionType::Lz4);

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            vec![ColumnFamilyDescriptor::new(CF_PROGRESS, cf_opts)],
        )
        .map_err(backend)?;

        log::info!("Opened progress store at {}", config.path.display());
        Ok(Self { db, config })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush_cf(self.cf()?).map_err(backend)
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(CF_PROGRESS)
            .ok_or_else(|| StoreError::Backend(format!("Column family '{CF_PROGRESS}' not found")))
    }

    /// `user_id 0x00`, the prefix shared by every key of one user.
    fn user_prefix(user_id: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(user_id.len() + 1);
        prefix.extend_from_slice(user_id.as_bytes());
        prefix.push(KEY_SEPARATOR);
        prefix
    }

    fn record_key(user_id: &str, manga_id: &str) -> Vec<u8> {
        let mut key = Self::user_prefix(user_id);
        key.extend_from_slice(manga_id.as_bytes());
        key
    }

    fn encode(record: &ProgressRecord) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(record, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<ProgressRecord, StoreError> {
        let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(record)
    }
}

impl ProgressStore for RocksProgressStore {
    fn load(&self, user_id: &str, manga_id: &str) -> Result<Option<ProgressRecord>, StoreError> {
        let key = Self::record_key(user_id, manga_id);
        match self.db.get_cf(self.cf()?, &key).map_err(backend)? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save(&self, record: &ProgressRecord) -> Result<(), StoreError> {
        if record.user_id.as_bytes().contains(&KEY_SEPARATOR) {
            return Err(StoreError::Backend("user_id contains a NUL byte".to_string()));
        }
        let key = Self::record_key(&record.user_id, &record.manga_id);
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db
            .put_cf_opt(self.cf()?, &key, Self::encode(record)?, &write_opts)
            .map_err(backend)
    }

    fn exists_record(&self, user_id: &str, manga_id: &str) -> Result<bool, StoreError> {
        let key = Self::record_key(user_id, manga_id);
        Ok(self.db.get_pinned_cf(self.cf()?, &key).map_err(backend)?.is_some())
    }

    fn list_records(&self, user_id: &str) -> Result<Vec<ProgressRecord>, StoreError> {
        let prefix = Self::user_prefix(user_id);
        let iter = self
            .db
            .iterator_cf(self.cf()?, IteratorMode::From(&prefix, Direction::Forward));

        let mut records = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(backend)?;
            if !key.starts_with(&prefix) {
                break;
            }
            records.push(Self::decode(&value)?);
        }
        Ok(records)
    }
}
