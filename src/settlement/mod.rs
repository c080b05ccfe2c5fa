pub mod engine;
pub mod fees;

pub use engine::{SettlementConfig, SettlementEngine, SettlementError};
