//! Low-stock notifications derived from published movements.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use stockledger_core::{ProductCode, Quantity};
use stockledger_events::{EventBus, EventEnvelope, Subscription};
use stockledger_inventory::LedgerEvent;

/// A product just dropped to (or below) its minimum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub product: ProductCode,
    pub quantity_before: Quantity,
    pub quantity_after: Quantity,
    pub quantity_minimum: Quantity,
    pub sequence: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Handle to stop and join a background monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl MonitorHandle {
    /// Request shutdown and wait for the thread to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Watches `stock.moved` events for low-stock transitions.
///
/// Only the crossing is reported: a movement that leaves an already-low
/// product low does not alert again.
#[derive(Debug, Default, Clone, Copy)]
pub struct LowStockMonitor;

impl LowStockMonitor {
    pub fn evaluate(event: &LedgerEvent) -> Option<LowStockAlert> {
        let LedgerEvent::StockMoved {
            entry,
            quantity_minimum,
        } = event;

        let crossed = entry.quantity_before() > *quantity_minimum
            && entry.quantity_after() <= *quantity_minimum;
        if !crossed {
            return None;
        }

        warn!(
            code = %entry.product(),
            quantity = %entry.quantity_after(),
            minimum = %quantity_minimum,
            "product reached low stock"
        );
        Some(LowStockAlert {
            product: entry.product().clone(),
            quantity_before: entry.quantity_before(),
            quantity_after: entry.quantity_after(),
            quantity_minimum: *quantity_minimum,
            sequence: entry.sequence(),
            occurred_at: entry.occurred_at(),
        })
    }

    /// Evaluate everything already waiting on `sub` without blocking.
    pub fn poll(sub: &Subscription<EventEnvelope<LedgerEvent>>) -> Vec<LowStockAlert> {
        sub.drain()
            .iter()
            .filter_map(|envelope| Self::evaluate(envelope.payload()))
            .collect()
    }

    /// Subscribe to `bus` and feed alerts to `sink` on a background thread.
    pub fn spawn<B, F>(bus: &B, mut sink: F) -> std::io::Result<MonitorHandle>
    where
        B: EventBus<EventEnvelope<LedgerEvent>>,
        F: FnMut(LowStockAlert) + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe();

        let join = thread::Builder::new()
            .name("low-stock-monitor".to_string())
            .spawn(move || {
                let tick = Duration::from_millis(250);
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }
                    match sub.recv_timeout(tick) {
                        Ok(envelope) => {
                            if let Some(alert) = Self::evaluate(envelope.payload()) {
                                sink(alert);
                            }
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => continue,
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("low-stock monitor stopped");
            })?;

        Ok(MonitorHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rust_decimal_macros::dec;
    use stockledger_core::{CategoryId, UserId};
    use stockledger_events::InMemoryEventBus;
    use stockledger_inventory::{MovementMeta, NewProduct, Product};

    use crate::ledger::MovementLedger;
    use crate::store::{InMemoryLedgerStore, LedgerStore};

    fn ledger() -> MovementLedger<InMemoryLedgerStore, Arc<InMemoryEventBus<EventEnvelope<LedgerEvent>>>> {
        let store = InMemoryLedgerStore::new();
        let mut input = NewProduct::new(ProductCode::new("SKU").unwrap(), "Widget", CategoryId::new());
        input.initial_quantity = dec!(10);
        input.minimum_quantity = dec!(5);
        store.insert_product(&Product::register(input, Utc::now()).unwrap()).unwrap();
        MovementLedger::new(store, Arc::new(InMemoryEventBus::new()))
    }

    fn exit(ledger: &MovementLedger<InMemoryLedgerStore, Arc<InMemoryEventBus<EventEnvelope<LedgerEvent>>>>, qty: rust_decimal::Decimal) {
        ledger
            .record_exit(&ProductCode::new("SKU").unwrap(), qty, MovementMeta::new("sale", UserId::new()))
            .unwrap();
    }

    #[test]
    fn alerts_only_on_crossing() {
        let ledger = ledger();
        let sub = ledger.bus().subscribe();

        exit(&ledger, dec!(3)); // 10 -> 7
        exit(&ledger, dec!(2)); // 7 -> 5, crosses
        exit(&ledger, dec!(1)); // 5 -> 4, already low

        let alerts = LowStockMonitor::poll(&sub);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].quantity_before.value(), dec!(7));
        assert_eq!(alerts[0].quantity_after.value(), dec!(5));
    }

    #[test]
    fn background_monitor_delivers_alerts() {
        let ledger = ledger();
        let (tx, rx) = mpsc::channel();
        let handle = LowStockMonitor::spawn(ledger.bus(), move |alert| {
            let _ = tx.send(alert);
        })
        .unwrap();

        exit(&ledger, dec!(6));

        let alert = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(alert.quantity_after.value(), dec!(4));
        handle.shutdown();
    }
}
