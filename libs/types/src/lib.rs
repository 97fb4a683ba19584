//! Shared domain types for the cross-DEX arbitrage execution engine.
//!
//! Every entity here mirrors a concept from the system's data model: the
//! opportunities detectors publish, the pool/pair state the simulator reads,
//! the pending swaps the simulator replays, and the execution results the
//! pipeline reports back onto the bus. Types carry their invariants as
//! constructors/doc comments rather than leaving them implicit in call sites.

pub mod bus;
pub mod error;
pub mod execution;
pub mod gas;
pub mod lock;
pub mod opportunity;
pub mod pool;
pub mod provider;
pub mod risk;
pub mod swap;
pub mod util;
pub mod weth;

pub use bus::{AckToken, BusMessage};
pub use error::ErrorTag;
pub use execution::ExecutionResult;
pub use gas::GasBaselineEntry;
pub use lock::LockRecord;
pub use opportunity::{Chain, Dex, Opportunity, OpportunityKind, PathHop};
pub use pool::{Pool, PoolIndex};
pub use provider::ProviderHealth;
pub use risk::{DrawdownState, RiskState};
pub use swap::{DexKind, PendingSwapIntent};
pub use util::{CancellableTimeout, RollingAverage};
