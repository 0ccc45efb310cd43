pub mod cancel;
pub mod data;
pub mod engine;
pub mod execution;
pub mod indicators;
pub mod metrics;
pub mod optimizer;
pub mod portfolio;
pub mod risk;
pub mod strategy;
pub mod sweep;

pub use cancel::CancellationToken;
pub use data::{bars_from_closes, generate_synthetic_bars, load_file, MarketDataSeries};
pub use engine::{BacktestEngine, BacktestOutcome, RejectedSignal, RunStatus};
pub use execution::{ExecutionSimulator, OrderRequest, OrderType, ReferencePrice, SlippageModel};
pub use indicators::{IndicatorCache, IndicatorKind};
pub use metrics::PerformanceMetricsCalculator;
pub use optimizer::{OptimizationMode, PortfolioOptimizer, ReturnMatrix, ReturnSeries};
pub use portfolio::Portfolio;
pub use risk::{RiskAnalyticsEngine, StressScenario};
pub use strategy::{BuyAndHold, RsiReversion, SmaCrossover, Strategy, StrategyKind};
pub use sweep::{ParameterSweep, SweepCase, SweepResult, SweepRun};

// Re-export common types
pub use common::{
    AnalyticsConfig, AnalyticsError, BacktestConfig, Bar, EquityPoint, Fill, FillTiming,
    FrontierPoint, OptimizationResult, OptimizerConfig, PerformanceReport, Result, RiskConfig,
    RiskReport, Side, Signal, SignalAction, Trade, VarEstimate, VarMethod,
};
