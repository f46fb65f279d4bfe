//! Append-only trade ledger backed by sled.
//!
//! Every mutation runs under one writer lock: authorize against the registry, write all
//! of its keys atomically, then publish the notification. A rejected call leaves
//! storage, the registry and the event stream untouched. Reads never take the writer
//! lock.
//!
//! Trades are appended inside a sled transaction that reads `meta/count` as the next
//! position, so several handles over one database never hand out the same position.
use super::access::{AccessLevel, AccessRegistry, Actor};
use super::config::LedgerConfig;
use super::error::{LedgerError, Result};
use super::events::{EventSink, LedgerEvent, NoopSink};
use super::trade::{Clock, SystemClock, TimeStamp, Trade, TradeDetails, TradeId, TradeReceipt};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use sled::Batch;
use sled::transaction::{ConflictableTransactionResult, abort};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

const OWNER_KEY: &[u8] = b"meta/owner";
const COUNT_KEY: &[u8] = b"meta/count";
const TRADE_PREFIX: &[u8] = b"trade/";
const INDEX_PREFIX: &[u8] = b"index/";
const ACL_PREFIX: &[u8] = b"acl/";

fn prefixed(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + suffix.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(suffix);
    key
}

// big-endian positions keep sled's key order equal to insertion order
fn trade_key(position: u64) -> Vec<u8> {
    prefixed(TRADE_PREFIX, &position.to_be_bytes())
}

fn index_key(trade_id: TradeId) -> Vec<u8> {
    prefixed(INDEX_PREFIX, &trade_id.to_be_bytes())
}

fn acl_key(actor: &Actor) -> Vec<u8> {
    prefixed(ACL_PREFIX, actor.as_str().as_bytes())
}

fn decode_u64(bytes: &[u8], what: &str) -> Result<u64> {
    <[u8; 8]>::try_from(bytes)
        .map(u64::from_be_bytes)
        .map_err(|_| LedgerError::Corrupted(format!("{what} is not an 8 byte integer")))
}

fn read_count(instance: &sled::Db) -> Result<u64> {
    match instance.get(COUNT_KEY)? {
        Some(bytes) => decode_u64(&bytes, "trade count"),
        None => Err(LedgerError::Corrupted("ledger has no trade count".into())),
    }
}

fn decode_actor(bytes: &[u8]) -> Result<Actor> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| LedgerError::Corrupted("stored actor is not utf-8".into()))?;
    Actor::parse(text)
}

pub struct TradeLedger {
    instance: Arc<sled::Db>,
    config: LedgerConfig,
    registry: RwLock<AccessRegistry>,
    count: AtomicU64,
    writer: Mutex<()>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl TradeLedger {
    /// Open the database described by `config`. A fresh database is initialized with
    /// `creator` as owner; an existing one keeps its stored owner and `creator` is
    /// ignored.
    pub fn open(config: LedgerConfig, creator: Actor) -> Result<Self> {
        let db = config.open_db()?;
        Self::with_config(Arc::new(db), config, creator)
    }

    /// A throwaway ledger that lives only as long as the value.
    pub fn temporary(creator: Actor) -> Result<Self> {
        Self::open(LedgerConfig::temporary(), creator)
    }

    pub fn new(instance: Arc<sled::Db>, creator: Actor) -> Result<Self> {
        Self::with_config(instance, LedgerConfig::default(), creator)
    }

    pub fn with_config(instance: Arc<sled::Db>, config: LedgerConfig, creator: Actor) -> Result<Self> {
        let (registry, count) = match instance.get(OWNER_KEY)? {
            Some(owner) => Self::load_state(&instance, decode_actor(&owner)?)?,
            None => Self::initialize_state(&instance, &config, creator)?,
        };
        Ok(Self::assemble(instance, config, registry, count))
    }

    /// Open a ledger that must already exist. Fails with `InvalidArgument` when the
    /// location holds no initialized ledger, and writes nothing in that case.
    pub fn open_existing(config: LedgerConfig) -> Result<Self> {
        if config.temporary || !config.path().exists() {
            return Err(LedgerError::InvalidArgument(format!(
                "no ledger at {}",
                config.path().display()
            )));
        }

        let instance = Arc::new(config.open_db()?);
        let owner = match instance.get(OWNER_KEY)? {
            Some(owner) => decode_actor(&owner)?,
            None => {
                return Err(LedgerError::InvalidArgument(format!(
                    "{} holds no initialized ledger",
                    config.path().display()
                )));
            }
        };
        let (registry, count) = Self::load_state(&instance, owner)?;
        Ok(Self::assemble(instance, config, registry, count))
    }

    fn assemble(
        instance: Arc<sled::Db>,
        config: LedgerConfig,
        registry: AccessRegistry,
        count: u64,
    ) -> Self {
        Self {
            instance,
            config,
            registry: RwLock::new(registry),
            count: AtomicU64::new(count),
            writer: Mutex::new(()),
            sink: Arc::new(NoopSink),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn initialize_state(
        instance: &sled::Db,
        config: &LedgerConfig,
        creator: Actor,
    ) -> Result<(AccessRegistry, u64)> {
        let registry = AccessRegistry::initialize(creator)?;

        let mut batch = Batch::default();
        batch.insert(OWNER_KEY, registry.owner().as_str().as_bytes());
        batch.insert(COUNT_KEY, 0u64.to_be_bytes().to_vec());
        batch.insert(acl_key(registry.owner()), vec![AccessLevel::Admin.as_u8()]);
        instance.apply_batch(batch)?;
        if config.flush_on_write {
            instance.flush()?;
        }

        info!(owner = %registry.owner(), "initialized new ledger");
        Ok((registry, 0))
    }

    fn load_state(instance: &sled::Db, owner: Actor) -> Result<(AccessRegistry, u64)> {
        let count = read_count(instance)?;

        let mut levels = HashMap::new();
        for entry in instance.scan_prefix(ACL_PREFIX) {
            let (key, value) = entry?;
            let actor = decode_actor(&key[ACL_PREFIX.len()..])?;
            let level = match value.first() {
                Some(byte) => AccessLevel::try_from(*byte)
                    .map_err(|_| LedgerError::Corrupted(format!("bad level byte for {actor}")))?,
                None => return Err(LedgerError::Corrupted(format!("empty level for {actor}"))),
            };
            levels.insert(actor, level);
        }

        info!(owner = %owner, count, grants = levels.len(), "reopened ledger");
        Ok((AccessRegistry::restore(owner, levels), count))
    }

    // runs after the write is applied, so a failed flush is logged and not returned
    fn flush_if_configured(&self) {
        if !self.config.flush_on_write {
            return;
        }
        match self.instance.flush() {
            Ok(bytes) => debug!(bytes, "ledger flushed"),
            Err(e) => error!("flush after commit failed: {e}"),
        }
    }

    /// Force everything written so far to disk. Returns the number of bytes flushed.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.instance.flush()?)
    }

    /// Append a trade. Requires `Recorder`; a seen `trade_id` is rejected without any
    /// effect.
    pub fn record_trade(&self, caller: &Actor, details: TradeDetails) -> Result<TradeReceipt> {
        let _writer = self.writer.lock();

        self.registry
            .read()
            .require(caller, AccessLevel::Recorder, "record trades")
            .inspect_err(|e| warn!(actor = %caller, trade_id = %details.trade_id, "{e}"))?;

        let trade = details.finalise(self.clock.now());
        let encoded = trade.encode()?;
        let digest = sha256::digest(&encoded);
        let index = index_key(trade.trade_id);

        // sled may rerun the closure on conflict, so it only reads and inserts
        let position = self
            .instance
            .transaction(|tx| -> ConflictableTransactionResult<u64, LedgerError> {
                if tx.get(index.as_slice())?.is_some() {
                    return abort(LedgerError::DuplicateIdentifier(trade.trade_id));
                }
                let position = match tx.get(COUNT_KEY)? {
                    Some(bytes) => match decode_u64(&bytes, "trade count") {
                        Ok(position) => position,
                        Err(e) => return abort(e),
                    },
                    None => {
                        return abort(LedgerError::Corrupted("ledger has no trade count".into()));
                    }
                };

                tx.insert(trade_key(position), encoded.as_slice())?;
                tx.insert(index.as_slice(), &position.to_be_bytes()[..])?;
                tx.insert(COUNT_KEY, &(position + 1).to_be_bytes()[..])?;
                Ok(position)
            })
            .map_err(LedgerError::from)
            .inspect_err(|e| warn!(actor = %caller, trade_id = %trade.trade_id, "{e}"))?;
        self.count.fetch_max(position + 1, Ordering::AcqRel);
        self.flush_if_configured();

        info!(
            actor = %caller,
            trade_id = %trade.trade_id,
            symbol = %trade.symbol,
            position,
            "trade recorded"
        );
        self.sink.publish(&LedgerEvent::from(&trade));

        Ok(TradeReceipt {
            position,
            timestamp: trade.timestamp,
            digest,
        })
    }

    /// Emit an incident notification. Requires `Recorder`; nothing is stored.
    pub fn log_incident(&self, caller: &Actor, description: &str) -> Result<TimeStamp<Utc>> {
        let _writer = self.writer.lock();

        self.registry
            .read()
            .require(caller, AccessLevel::Recorder, "log incidents")
            .inspect_err(|e| warn!(actor = %caller, "{e}"))?;

        let timestamp = self.clock.now();
        info!(actor = %caller, %timestamp, description, "incident logged");
        self.sink.publish(&LedgerEvent::IncidentLogged {
            timestamp: timestamp.clone(),
            description: description.to_string(),
            reporter: caller.clone(),
        });

        Ok(timestamp)
    }

    /// Owner only. The new owner is granted `Admin`; the previous owner keeps its
    /// explicit grant.
    pub fn transfer_ownership(&self, caller: &Actor, new_owner: Actor) -> Result<()> {
        let _writer = self.writer.lock();

        let mut next = self.registry.read().clone();
        let previous = next
            .transfer_ownership(caller, new_owner.clone())
            .inspect_err(|e| warn!(actor = %caller, "{e}"))?;

        let mut batch = Batch::default();
        batch.insert(OWNER_KEY, new_owner.as_str().as_bytes());
        batch.insert(acl_key(&new_owner), vec![AccessLevel::Admin.as_u8()]);
        self.instance.apply_batch(batch)?;
        *self.registry.write() = next;
        self.flush_if_configured();

        info!(previous = %previous, new = %new_owner, "ownership transferred");
        self.sink.publish(&LedgerEvent::OwnershipTransferred {
            previous,
            new: new_owner,
        });

        Ok(())
    }

    /// Owner or `Admin` only. Overwrites the target's granted level.
    pub fn set_access_level(&self, caller: &Actor, target: Actor, level: AccessLevel) -> Result<()> {
        let _writer = self.writer.lock();

        let mut next = self.registry.read().clone();
        next.set_access_level(caller, target.clone(), level)
            .inspect_err(|e| warn!(actor = %caller, target = %target, "{e}"))?;

        let mut batch = Batch::default();
        batch.insert(acl_key(&target), vec![level.as_u8()]);
        self.instance.apply_batch(batch)?;
        *self.registry.write() = next;
        self.flush_if_configured();

        info!(actor = %caller, target = %target, %level, "access level changed");
        self.sink.publish(&LedgerEvent::AccessLevelChanged {
            actor: target,
            level,
        });

        Ok(())
    }

    /// Number of stored trades, including those appended through other handles on the
    /// same database.
    pub fn count(&self) -> u64 {
        match read_count(&self.instance) {
            Ok(stored) => self.count.fetch_max(stored, Ordering::AcqRel).max(stored),
            Err(e) => {
                warn!("falling back to the cached trade count: {e}");
                self.count.load(Ordering::Acquire)
            }
        }
    }

    pub fn get_trade(&self, position: u64) -> Result<Trade> {
        let count = self.count();
        if position >= count {
            return Err(LedgerError::OutOfRange { position, count });
        }

        match self.instance.get(trade_key(position))? {
            Some(bytes) => Trade::decode(&bytes),
            None => Err(LedgerError::Corrupted(format!(
                "trade at position {position} is missing"
            ))),
        }
    }

    pub fn exists(&self, trade_id: TradeId) -> Result<bool> {
        Ok(self.instance.contains_key(index_key(trade_id))?)
    }

    pub fn position_of(&self, trade_id: TradeId) -> Result<Option<u64>> {
        self.instance
            .get(index_key(trade_id))?
            .map(|bytes| decode_u64(&bytes, "index position"))
            .transpose()
    }

    pub fn find_trade(&self, trade_id: TradeId) -> Result<Option<Trade>> {
        match self.position_of(trade_id)? {
            Some(position) => self.get_trade(position).map(Some),
            None => Ok(None),
        }
    }

    /// The last `limit` trades with their positions, oldest first.
    pub fn recent_trades(&self, limit: usize) -> Result<Vec<(u64, Trade)>> {
        let count = self.count();
        let start = count.saturating_sub(limit as u64);
        (start..count)
            .map(|position| self.get_trade(position).map(|trade| (position, trade)))
            .collect()
    }

    /// [`TradeLedger::recent_trades`] with the configured limit.
    pub fn recent(&self) -> Result<Vec<(u64, Trade)>> {
        self.recent_trades(self.config.recent_limit)
    }

    pub fn resolve(&self, actor: &Actor) -> AccessLevel {
        self.registry.read().resolve(actor)
    }

    pub fn authorize(&self, actor: &Actor, minimum: AccessLevel) -> bool {
        self.registry.read().authorize(actor, minimum)
    }

    pub fn owner(&self) -> Actor {
        self.registry.read().owner().clone()
    }

    pub fn access_entries(&self) -> Vec<(Actor, AccessLevel)> {
        self.registry.read().entries()
    }

    /// Walk the stored trades and check that the index and count agree with them.
    /// Returns the number of trades verified.
    pub fn verify(&self) -> Result<u64> {
        let count = self.count();
        let mut seen = 0u64;

        for entry in self.instance.scan_prefix(TRADE_PREFIX) {
            let (key, value) = entry?;
            let position = decode_u64(&key[TRADE_PREFIX.len()..], "trade key")?;
            if position != seen {
                return Err(LedgerError::Corrupted(format!(
                    "expected trade at position {seen}, found {position}"
                )));
            }

            let trade = Trade::decode(&value)?;
            if self.position_of(trade.trade_id)? != Some(position) {
                return Err(LedgerError::Corrupted(format!(
                    "index for trade {} does not point at position {position}",
                    trade.trade_id
                )));
            }
            seen += 1;
        }

        let indexed = self.instance.scan_prefix(INDEX_PREFIX).count() as u64;
        if seen != count || indexed != count {
            return Err(LedgerError::Corrupted(format!(
                "count is {count} but found {seen} trades and {indexed} index entries"
            )));
        }

        debug!(count, "ledger verified");
        Ok(seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;

    fn details(id: u64) -> TradeDetails {
        TradeDetails::new(id)
            .set_symbol("BTCUSD")
            .set_price_cents(6_500_000)
            .set_quantity(2)
            .set_buy_order_id(10)
            .set_sell_order_id(11)
    }

    #[test]
    fn keys_sort_in_insertion_order() {
        assert!(trade_key(1) < trade_key(2));
        assert!(trade_key(255) < trade_key(256));
    }

    #[test]
    fn rejected_mutations_emit_nothing() {
        let owner = Actor::generate().unwrap();
        let outsider = Actor::generate().unwrap();
        let log = Arc::new(EventLog::new());
        let ledger = TradeLedger::temporary(owner.clone())
            .unwrap()
            .with_sink(log.clone());

        ledger.record_trade(&owner, details(1)).unwrap();
        assert_eq!(log.len(), 1);

        assert!(ledger.record_trade(&owner, details(1)).is_err());
        assert!(ledger.record_trade(&outsider, details(2)).is_err());
        assert!(ledger.log_incident(&outsider, "nope").is_err());
        assert!(
            ledger
                .set_access_level(&outsider, outsider.clone(), AccessLevel::Admin)
                .is_err()
        );
        assert!(ledger.transfer_ownership(&outsider, outsider.clone()).is_err());

        assert_eq!(log.len(), 1);
        assert_eq!(ledger.count(), 1);
    }

    #[test]
    fn verify_counts_every_trade() {
        let owner = Actor::generate().unwrap();
        let ledger = TradeLedger::temporary(owner.clone()).unwrap();
        assert_eq!(ledger.verify().unwrap(), 0);

        for id in [5, 3, 9] {
            ledger.record_trade(&owner, details(id)).unwrap();
        }
        assert_eq!(ledger.verify().unwrap(), 3);
    }

    #[test]
    fn append_continues_from_stored_count() {
        let owner = Actor::generate().unwrap();
        let ledger = TradeLedger::temporary(owner.clone()).unwrap();
        ledger.record_trade(&owner, details(1)).unwrap();

        // a write that reached storage without the handle seeing it acknowledged
        let landed = details(2).finalise(TimeStamp::new());
        let mut batch = Batch::default();
        batch.insert(trade_key(1), landed.encode().unwrap());
        batch.insert(index_key(TradeId(2)), 1u64.to_be_bytes().to_vec());
        batch.insert(COUNT_KEY, 2u64.to_be_bytes().to_vec());
        ledger.instance.apply_batch(batch).unwrap();

        assert_eq!(ledger.count(), 2);
        let receipt = ledger.record_trade(&owner, details(3)).unwrap();
        assert_eq!(receipt.position, 2);
        assert_eq!(ledger.get_trade(1).unwrap().trade_id, landed.trade_id);
        assert_eq!(ledger.verify().unwrap(), 3);

        let err = ledger.record_trade(&owner, details(2)).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateIdentifier(TradeId(2))));
    }

    #[test]
    fn flushed_writes_are_acknowledged_in_order() {
        let owner = Actor::generate().unwrap();
        let ledger = TradeLedger::open(
            LedgerConfig::temporary().with_flush_on_write(true),
            owner.clone(),
        )
        .unwrap();

        let first = ledger.record_trade(&owner, details(1)).unwrap();
        let second = ledger.record_trade(&owner, details(2)).unwrap();
        assert_eq!((first.position, second.position), (0, 1));
        assert!(ledger.flush().is_ok());
        assert_eq!(ledger.verify().unwrap(), 2);
    }

    #[test]
    fn verify_flags_a_dangling_index() {
        let owner = Actor::generate().unwrap();
        let ledger = TradeLedger::temporary(owner.clone()).unwrap();
        ledger.record_trade(&owner, details(1)).unwrap();

        ledger
            .instance
            .insert(index_key(TradeId(2)), 7u64.to_be_bytes().to_vec())
            .unwrap();

        assert!(matches!(ledger.verify(), Err(LedgerError::Corrupted(_))));
    }
}
