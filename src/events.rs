//! Notifications emitted after every accepted mutation.
//!
//! Events are not ledger state. They are published while the ledger still holds its
//! writer lock, so any sink observes them in exactly the order mutations were applied.
use super::access::{AccessLevel, Actor};
use super::trade::{TimeStamp, Trade, TradeId};
use chrono::Utc;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    TradeRecorded {
        trade_id: TradeId,
        symbol: String,
        price_cents: u64,
        quantity: u64,
        buy_order_id: u64,
        sell_order_id: u64,
        timestamp: TimeStamp<Utc>,
    },
    IncidentLogged {
        timestamp: TimeStamp<Utc>,
        description: String,
        reporter: Actor,
    },
    AccessLevelChanged {
        actor: Actor,
        level: AccessLevel,
    },
    OwnershipTransferred {
        previous: Actor,
        new: Actor,
    },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::TradeRecorded { .. } => "TradeRecorded",
            LedgerEvent::IncidentLogged { .. } => "IncidentLogged",
            LedgerEvent::AccessLevelChanged { .. } => "AccessLevelChanged",
            LedgerEvent::OwnershipTransferred { .. } => "OwnershipTransferred",
        }
    }
}

impl From<&Trade> for LedgerEvent {
    fn from(trade: &Trade) -> Self {
        LedgerEvent::TradeRecorded {
            trade_id: trade.trade_id,
            symbol: trade.symbol.clone(),
            price_cents: trade.price_cents,
            quantity: trade.quantity,
            buy_order_id: trade.buy_order_id,
            sell_order_id: trade.sell_order_id,
            timestamp: trade.timestamp.clone(),
        }
    }
}

/// Anything that wants to observe ledger mutations.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &LedgerEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn publish(&self, _: &LedgerEvent) {}
}

/// An event paired with its position in the notification stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedEvent {
    pub sequence: u64,
    pub event: LedgerEvent,
}

#[derive(Debug, Default)]
struct EventLogInner {
    history: Vec<SequencedEvent>,
    subscribers: Vec<Sender<SequencedEvent>>,
}

/// In-memory append-only audit stream with live subscriptions.
#[derive(Debug, Default)]
pub struct EventLog {
    inner: Mutex<EventLogInner>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receives every event published after this call.
    pub fn subscribe(&self) -> Receiver<SequencedEvent> {
        let (tx, rx) = channel::unbounded();
        self.inner.lock().subscribers.push(tx);
        rx
    }

    pub fn events(&self) -> Vec<SequencedEvent> {
        self.inner.lock().history.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for EventLog {
    fn publish(&self, event: &LedgerEvent) {
        let mut inner = self.inner.lock();
        let sequenced = SequencedEvent {
            sequence: inner.history.len() as u64,
            event: event.clone(),
        };

        // drop subscribers whose receiver has gone away
        inner
            .subscribers
            .retain(|tx| tx.send(sequenced.clone()).is_ok());
        debug!(
            sequence = sequenced.sequence,
            event = event.name(),
            subscribers = inner.subscribers.len(),
            "event published"
        );
        inner.history.push(sequenced);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incident(text: &str) -> LedgerEvent {
        LedgerEvent::IncidentLogged {
            timestamp: TimeStamp::new(),
            description: text.into(),
            reporter: Actor::generate().unwrap(),
        }
    }

    #[test]
    fn log_numbers_events_in_publish_order() {
        let log = EventLog::new();
        log.publish(&incident("first"));
        log.publish(&incident("second"));

        let events = log.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 0);
        assert_eq!(events[1].sequence, 1);
    }

    #[test]
    fn subscribers_only_see_later_events() {
        let log = EventLog::new();
        log.publish(&incident("before"));

        let rx = log.subscribe();
        log.publish(&incident("after"));

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].sequence, 1);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let log = EventLog::new();
        drop(log.subscribe());
        log.publish(&incident("nobody listening"));

        assert!(log.inner.lock().subscribers.is_empty());
        assert_eq!(log.len(), 1);
    }
}
