//! Order execution scheduling.
//!
//! Large orders are split into equal, equally spaced TWAP slices. Placing a
//! slice is delegated to an [`OrderPlacer`]; each slice ends EXECUTED or FAILED.

mod executor;
mod twap;

pub use executor::{ExecutionReport, OrderPlacer, TwapExecutor};
pub use twap::{ExecutionSchedule, ScheduleError, ScheduledSlice, SliceStatus, TwapConfig, TwapScheduler};
