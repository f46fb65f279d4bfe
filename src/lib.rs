pub mod access;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod trade;
pub mod utils;

pub use access::{AccessLevel, AccessRegistry, Actor};
pub use config::LedgerConfig;
pub use error::{ErrorKind, LedgerError, Result};
pub use events::{EventLog, EventSink, LedgerEvent, NoopSink, SequencedEvent};
pub use ledger::TradeLedger;
pub use trade::{Clock, ManualClock, SystemClock, TimeStamp, Trade, TradeDetails, TradeId, TradeReceipt};
