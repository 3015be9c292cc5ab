//! Time-weighted slicing of a single order

use chrono::{DateTime, Duration, Utc};
use common::Symbol;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while building or updating a schedule
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScheduleError {
    #[error("total amount must be positive and finite, got {0}")]
    InvalidAmount(f64),

    #[error("at least one interval is required")]
    NoIntervals,

    #[error("duration must be at least one minute")]
    NoDuration,

    #[error("schedule has no slice #{0}")]
    UnknownSlice(u32),

    #[error("slice #{interval} is already {status}")]
    InvalidTransition { interval: u32, status: SliceStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SliceStatus {
    Pending,
    Executed,
    Failed,
}

impl std::fmt::Display for SliceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SliceStatus::Pending => write!(f, "PENDING"),
            SliceStatus::Executed => write!(f, "EXECUTED"),
            SliceStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// One child order of a TWAP schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledSlice {
    /// 1-based position in the schedule
    pub interval: u32,
    pub amount: f64,
    pub scheduled_time: DateTime<Utc>,
    pub status: SliceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Ordered child orders for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSchedule {
    pub id: Uuid,
    pub symbol: Symbol,
    pub slices: Vec<ScheduledSlice>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionSchedule {
    pub fn total_amount(&self) -> f64 {
        self.slices.iter().map(|s| s.amount).sum()
    }

    pub fn executed_amount(&self) -> f64 {
        self.slices
            .iter()
            .filter(|s| s.status == SliceStatus::Executed)
            .map(|s| s.amount)
            .sum()
    }

    pub fn pending(&self) -> impl Iterator<Item = &ScheduledSlice> {
        self.slices.iter().filter(|s| s.status == SliceStatus::Pending)
    }

    /// Pending slices whose time has come
    pub fn due(&self, now: DateTime<Utc>) -> Vec<u32> {
        self.pending()
            .filter(|s| s.scheduled_time <= now)
            .map(|s| s.interval)
            .collect()
    }

    /// True once no slice is pending
    pub fn is_complete(&self) -> bool {
        self.pending().next().is_none()
    }

    pub fn mark_executed(&mut self, interval: u32) -> Result<(), ScheduleError> {
        let slice = self.pending_slice(interval)?;
        slice.status = SliceStatus::Executed;
        Ok(())
    }

    pub fn mark_failed(&mut self, interval: u32, reason: impl Into<String>) -> Result<(), ScheduleError> {
        let slice = self.pending_slice(interval)?;
        slice.status = SliceStatus::Failed;
        slice.failure_reason = Some(reason.into());
        Ok(())
    }

    fn pending_slice(&mut self, interval: u32) -> Result<&mut ScheduledSlice, ScheduleError> {
        let slice = self
            .slices
            .iter_mut()
            .find(|s| s.interval == interval)
            .ok_or(ScheduleError::UnknownSlice(interval))?;

        if slice.status != SliceStatus::Pending {
            return Err(ScheduleError::InvalidTransition {
                interval,
                status: slice.status,
            });
        }
        Ok(slice)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwapConfig {
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: u32,
    #[serde(default = "default_intervals")]
    pub intervals: u32,
}

fn default_duration_minutes() -> u32 {
    60
}

fn default_intervals() -> u32 {
    12
}

impl Default for TwapConfig {
    fn default() -> Self {
        Self {
            duration_minutes: default_duration_minutes(),
            intervals: default_intervals(),
        }
    }
}

/// Builds evenly spaced, evenly sized execution schedules
#[derive(Debug, Clone, Default)]
pub struct TwapScheduler {
    config: TwapConfig,
}

impl TwapScheduler {
    pub fn new(config: TwapConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TwapConfig {
        &self.config
    }

    /// Schedule with the configured duration and interval count, starting now
    pub fn schedule(&self, symbol: &str, total_amount: f64) -> Result<ExecutionSchedule, ScheduleError> {
        self.schedule_at(
            symbol,
            total_amount,
            self.config.duration_minutes,
            self.config.intervals,
            Utc::now(),
        )
    }

    /// Split `total_amount` into `intervals` slices spaced `duration / intervals` apart.
    ///
    /// Slice `i` (0-based) runs at `start + i * duration / intervals`. The last
    /// slice absorbs the rounding remainder so the amounts sum to the total.
    pub fn schedule_at(
        &self,
        symbol: &str,
        total_amount: f64,
        duration_minutes: u32,
        intervals: u32,
        start: DateTime<Utc>,
    ) -> Result<ExecutionSchedule, ScheduleError> {
        if !(total_amount.is_finite() && total_amount > 0.0) {
            return Err(ScheduleError::InvalidAmount(total_amount));
        }
        if intervals == 0 {
            return Err(ScheduleError::NoIntervals);
        }
        if duration_minutes == 0 {
            return Err(ScheduleError::NoDuration);
        }

        let per_slice = total_amount / intervals as f64;
        let duration_ms = i64::from(duration_minutes) * 60_000;

        let mut allocated = 0.0;
        let slices = (0..intervals)
            .map(|i| {
                let amount = if i + 1 == intervals {
                    total_amount - allocated
                } else {
                    per_slice
                };
                allocated += amount;

                let offset = Duration::milliseconds(duration_ms * i64::from(i) / i64::from(intervals));
                ScheduledSlice {
                    interval: i + 1,
                    amount,
                    scheduled_time: start + offset,
                    status: SliceStatus::Pending,
                    failure_reason: None,
                }
            })
            .collect();

        Ok(ExecutionSchedule {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            slices,
            created_at: start,
        })
    }
}
