//! Domain types for FactorLab

pub mod bar;
pub mod factor;
pub mod ids;
pub mod params;
pub mod portfolio;
pub mod trade;
pub mod window;

pub use bar::Bar;
pub use factor::{FactorDirection, FactorSnapshot, FactorSource, FactorSpec, RankScore};
pub use ids::{IterationId, ParamsHash};
pub use params::{normalize_weights, ParameterSet, ParamsError, WEIGHT_SUM_TOLERANCE};
pub use portfolio::{Holding, PortfolioState};
pub use trade::{TradeAction, TradeReason, TradeRecord};
pub use window::{BacktestWindow, DateRange, WindowError};

/// Instrument identifier alias
pub type InstrumentId = String;
