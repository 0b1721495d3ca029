//! RocksDB-backed persistence for the engine's state.
//!
//! Column families hold pool records, per-pool staking state, the shared
//! reward ledgers and metadata. Per-venue allocated balances are never
//! persisted; they are recomputed from the venue adapters on load. Every
//! snapshot is written through a single atomic [`WriteBatch`].

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};

use weir_alloc::engine::EngineState;
use weir_alloc::pool::Pool;
use weir_core::error::WeirError;
use weir_core::types::PoolId;

// --- Column family names ---

const CF_POOLS: &str = "pools";
const CF_STAKING: &str = "staking";
const CF_LEDGERS: &str = "ledgers";
const CF_META: &str = "meta";

const ALL_CFS: &[&str] = &[CF_POOLS, CF_STAKING, CF_LEDGERS, CF_META];

// --- Fixed keys ---

const LEDGER_INFLATION: &[u8] = b"inflation";
const LEDGER_FEES: &[u8] = b"fees";
const LEDGER_LOCKS: &[u8] = b"locks";
const META_SCHEDULE: &[u8] = b"schedule";
const META_CUMULATIVE_FEES: &[u8] = b"cumulative_fees";
const META_FORMAT: &[u8] = b"format";

const FORMAT_VERSION: u64 = 1;

/// RocksDB-backed store for [`EngineState`].
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a database at the given path, creating any missing
    /// column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WeirError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| WeirError::Storage(e.to_string()))?;
        Ok(Self { db })
    }

    /// Persist a full engine snapshot atomically. Pools removed since the
    /// last snapshot are deleted.
    pub fn save(&self, state: &EngineState) -> Result<(), WeirError> {
        let pools_cf = self.cf_handle(CF_POOLS)?;
        let staking_cf = self.cf_handle(CF_STAKING)?;
        let ledgers_cf = self.cf_handle(CF_LEDGERS)?;
        let meta_cf = self.cf_handle(CF_META)?;

        let mut batch = WriteBatch::default();

        for stale in self.stored_pool_ids()? {
            if !state.pools.contains_key(&stale) {
                batch.delete_cf(&pools_cf, stale.as_str().as_bytes());
                batch.delete_cf(&staking_cf, stale.as_str().as_bytes());
            }
        }
        for (id, pool) in &state.pools {
            batch.put_cf(&pools_cf, id.as_str().as_bytes(), encode(pool)?);
        }
        for (id, staking) in &state.staking {
            batch.put_cf(&staking_cf, id.as_str().as_bytes(), encode(staking)?);
        }
        batch.put_cf(&ledgers_cf, LEDGER_INFLATION, encode(&state.inflation_ledger)?);
        batch.put_cf(&ledgers_cf, LEDGER_FEES, encode(&state.fee_ledger)?);
        batch.put_cf(&ledgers_cf, LEDGER_LOCKS, encode(&state.locks)?);
        batch.put_cf(&meta_cf, META_SCHEDULE, encode(&state.schedule)?);
        batch.put_cf(&meta_cf, META_CUMULATIVE_FEES, encode(&state.cumulative_fees)?);
        batch.put_cf(&meta_cf, META_FORMAT, FORMAT_VERSION.to_le_bytes());

        self.db
            .write(batch)
            .map_err(|e| WeirError::Storage(e.to_string()))?;
        tracing::info!(pools = state.pools.len(), "engine state persisted");
        Ok(())
    }

    /// Load the last persisted snapshot; `None` if the store is empty.
    pub fn load(&self) -> Result<Option<EngineState>, WeirError> {
        let meta_cf = self.cf_handle(CF_META)?;
        match self
            .db
            .get_cf(&meta_cf, META_FORMAT)
            .map_err(|e| WeirError::Storage(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 8 => {
                let version = u64::from_le_bytes(bytes.try_into().expect("length checked"));
                if version != FORMAT_VERSION {
                    return Err(WeirError::Storage(format!(
                        "unsupported store format {version}"
                    )));
                }
            }
            Some(_) => return Err(WeirError::Storage("invalid format marker".into())),
            None => return Ok(None),
        }

        let pools_cf = self.cf_handle(CF_POOLS)?;
        let staking_cf = self.cf_handle(CF_STAKING)?;
        let ledgers_cf = self.cf_handle(CF_LEDGERS)?;

        let mut pools = std::collections::BTreeMap::new();
        for item in self.db.iterator_cf(&pools_cf, rocksdb::IteratorMode::Start) {
            let (key, value) = item.map_err(|e| WeirError::Storage(e.to_string()))?;
            let id = pool_id_from_key(&key)?;
            let pool: Pool = decode(&value)?;
            pools.insert(id, pool);
        }

        let mut staking = std::collections::BTreeMap::new();
        for item in self.db.iterator_cf(&staking_cf, rocksdb::IteratorMode::Start) {
            let (key, value) = item.map_err(|e| WeirError::Storage(e.to_string()))?;
            let id = pool_id_from_key(&key)?;
            staking.insert(id, decode(&value)?);
        }

        let state = EngineState {
            pools,
            staking,
            inflation_ledger: decode(&self.must_get(&ledgers_cf, LEDGER_INFLATION)?)?,
            fee_ledger: decode(&self.must_get(&ledgers_cf, LEDGER_FEES)?)?,
            locks: decode(&self.must_get(&ledgers_cf, LEDGER_LOCKS)?)?,
            schedule: decode(&self.must_get(meta_cf, META_SCHEDULE)?)?,
            cumulative_fees: decode(&self.must_get(meta_cf, META_CUMULATIVE_FEES)?)?,
        };
        tracing::info!(pools = state.pools.len(), "engine state loaded");
        Ok(Some(state))
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), WeirError> {
        self.db
            .flush()
            .map_err(|e| WeirError::Storage(e.to_string()))
    }

    fn stored_pool_ids(&self) -> Result<Vec<PoolId>, WeirError> {
        let cf = self.cf_handle(CF_POOLS)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (key, _) = item.map_err(|e| WeirError::Storage(e.to_string()))?;
            out.push(pool_id_from_key(&key)?);
        }
        Ok(out)
    }

    fn must_get(
        &self,
        cf: &rocksdb::ColumnFamily,
        key: &[u8],
    ) -> Result<Vec<u8>, WeirError> {
        self.db
            .get_cf(cf, key)
            .map_err(|e| WeirError::Storage(e.to_string()))?
            .ok_or_else(|| {
                WeirError::Storage(format!("missing key {}", String::from_utf8_lossy(key)))
            })
    }

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, WeirError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| WeirError::Storage(format!("missing column family {name}")))
    }
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, WeirError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| WeirError::Storage(e.to_string()))
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, WeirError> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| WeirError::Storage(e.to_string()))
}

fn pool_id_from_key(key: &[u8]) -> Result<PoolId, WeirError> {
    std::str::from_utf8(key)
        .map(PoolId::from)
        .map_err(|e| WeirError::Storage(e.to_string()))
}
