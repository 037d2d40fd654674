//! Spread computation, anomaly detection and confirmation

pub mod confirm;
pub mod spread;
pub mod spread_engine;

pub use confirm::{ConfirmOutcome, ConfirmationExecutor, PrimaryLiquidityModel, TopOfBookLiquidity};
pub use spread::{calc_bps, compute_spread, SpreadMode, SpreadView};
pub use spread_engine::{step, AnomalyTransition, SpreadEngine, StepResult, TickSummary};
