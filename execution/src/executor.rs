//! Drives due TWAP slices through an order venue

use crate::twap::ExecutionSchedule;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Venue that accepts limit orders
#[async_trait]
pub trait OrderPlacer: Send + Sync {
    /// Place a limit order for `amount` (quote currency) at `price`, returning the venue order id
    async fn place_limit_order(&self, symbol: &str, amount: f64, price: Decimal) -> anyhow::Result<String>;

    /// Current mid price, used as the TWAP limit price
    async fn mid_price(&self, symbol: &str) -> anyhow::Result<Decimal>;
}

/// Outcome of one `execute_due` pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub executed: Vec<u32>,
    pub failed: Vec<u32>,
    pub order_ids: Vec<String>,
}

/// Places due slices one at a time
pub struct TwapExecutor<P: OrderPlacer> {
    placer: P,
}

impl<P: OrderPlacer> TwapExecutor<P> {
    pub fn new(placer: P) -> Self {
        Self { placer }
    }

    pub fn placer(&self) -> &P {
        &self.placer
    }

    /// Place every pending slice scheduled at or before `now`.
    ///
    /// A placement error marks that slice FAILED; the remaining slices still run.
    pub async fn execute_due(&self, schedule: &mut ExecutionSchedule, now: DateTime<Utc>) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for interval in schedule.due(now) {
            let amount = match schedule.slices.iter().find(|s| s.interval == interval) {
                Some(slice) => slice.amount,
                None => continue,
            };

            let outcome = match self.placer.mid_price(&schedule.symbol).await {
                Ok(price) => self
                    .placer
                    .place_limit_order(&schedule.symbol, amount, price)
                    .await
                    .map(|order_id| (order_id, price)),
                Err(e) => Err(e),
            };

            let transition = match outcome {
                Ok((order_id, price)) => {
                    info!(
                        symbol = %schedule.symbol,
                        interval,
                        amount,
                        %price,
                        %order_id,
                        "TWAP slice placed"
                    );
                    report.executed.push(interval);
                    report.order_ids.push(order_id);
                    schedule.mark_executed(interval)
                }
                Err(e) => {
                    warn!(symbol = %schedule.symbol, interval, error = %e, "TWAP slice failed");
                    report.failed.push(interval);
                    schedule.mark_failed(interval, e.to_string())
                }
            };

            if let Err(e) = transition {
                warn!(interval, error = %e, "Slice state not updated");
            }
        }

        report
    }
}
