//! Synheart Stride - On-device step acquisition and daily reconciliation
//!
//! Stride tracks a user's steps from whichever source the device offers
//! (motion-sensor pedometer or OS health-data aggregation), reconciles them
//! into a durable counter with UTC day-boundary semantics, and fires a
//! boundary-aligned daily reset.
//!
//! ## Modules
//!
//! - **Acquisition**: [`provider`] backends driven by the [`controller`]
//! - **Reconciliation**: [`reconcile`] arithmetic over the persisted [`types::StepRecord`]
//! - **Daily reset**: [`scheduler`] with priority-ordered handlers
//! - **Persistence**: [`store`] substrate and the dirty-tracked [`record`]
//!
//! The host wires everything through [`runtime::StepRuntimeBuilder`] and
//! drives it by calling `tick` periodically.

pub mod bridge;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod provider;
pub mod reconcile;
pub mod record;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::{BridgeErrorCode, StepQueryResult, StepRecordsResult};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StrideConfig;
pub use controller::{ControllerState, StepController};
pub use error::{StepError, StoreError};
pub use provider::{HistoricalProvider, NoneProvider, PedometerProvider, StepProvider};
pub use record::DirtyTracked;
pub use runtime::{StepRuntime, StepRuntimeBuilder};
pub use scheduler::{DailyResetScheduler, ResetReport};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use types::{ProviderKind, StepRecord, StepSnapshot, StepSource};

/// Stride library version
pub const STRIDE_VERSION: &str = env!("CARGO_PKG_VERSION");
