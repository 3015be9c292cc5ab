use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use execution::{OrderPlacer, TwapConfig, TwapExecutor, TwapScheduler};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, Ordering};

/// Venue that rejects every fourth order
struct DemoVenue {
    orders: AtomicU32,
}

#[async_trait]
impl OrderPlacer for DemoVenue {
    async fn place_limit_order(&self, symbol: &str, amount: f64, price: Decimal) -> Result<String> {
        let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
        if n % 4 == 0 {
            anyhow::bail!("venue rejected order {} (insufficient liquidity)", n);
        }
        println!("  order #{} {} ${:.2} @ {}", n, symbol, amount, price);
        Ok(format!("demo-{}", n))
    }

    async fn mid_price(&self, _symbol: &str) -> Result<Decimal> {
        Ok(Decimal::new(6_745_012, 2))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== TWAP Execution Example ===\n");

    let scheduler = TwapScheduler::new(TwapConfig::default());
    let start = Utc::now();
    let mut schedule = scheduler.schedule_at("BTC/USDT", 1_000.0, 60, 12, start)?;

    println!("Schedule {} for {}:", schedule.id, schedule.symbol);
    for slice in &schedule.slices {
        println!("  #{:>2} ${:.2} at {}", slice.interval, slice.amount, slice.scheduled_time.format("%H:%M"));
    }
    println!();

    let executor = TwapExecutor::new(DemoVenue {
        orders: AtomicU32::new(0),
    });

    // Pretend half an hour has passed
    let report = executor.execute_due(&mut schedule, start + Duration::minutes(30)).await;
    println!(
        "\nAfter 30 minutes: {} executed, {} failed, ${:.2} filled of ${:.2}",
        report.executed.len(),
        report.failed.len(),
        schedule.executed_amount(),
        schedule.total_amount()
    );

    let report = executor.execute_due(&mut schedule, start + Duration::minutes(60)).await;
    println!(
        "After 60 minutes: {} more executed, {} more failed, complete: {}",
        report.executed.len(),
        report.failed.len(),
        schedule.is_complete()
    );

    for slice in schedule.slices.iter().filter(|s| s.failure_reason.is_some()) {
        println!("  slice #{} {}: {}", slice.interval, slice.status, slice.failure_reason.as_deref().unwrap_or(""));
    }

    Ok(())
}
