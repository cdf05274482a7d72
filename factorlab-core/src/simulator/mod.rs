//! Trade simulator: ranked lists + parameter set → trades and equity curve

pub mod engine;
pub mod panel;
pub mod rules;

pub use engine::{
    pending_actions, DailyMark, DayOutcome, PendingOrder, SimulationError, SimulationResult,
    SimulationState, Simulator,
};
pub use panel::{DayPrices, PricePanel};
pub use rules::{FillPrice, SimulationRules};
