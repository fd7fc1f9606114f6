pub mod backtest;
pub mod statistics;

pub use backtest::{run_momentum_backtest, BacktestError, BacktestParams, BacktestReport};
pub use statistics::{build_statistical_report, StatisticalReport};
