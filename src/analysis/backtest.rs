use crate::storage::repository::DrawDto;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// 5 位 0-9 和值的理论中位数，缺少 big_small 标签时用它判大小
pub const BIG_SMALL_MIDPOINT: i32 = 23;

/// 曲线只保留最近 50 个点用于展示
pub const EQUITY_CURVE_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BacktestParams {
    pub window: u64,
    pub short_window: usize,
    pub long_window: usize,
    pub stake: f64,
    pub payout_multiplier: f64,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BacktestError {
    #[error("invalid backtest parameters: {0}")]
    InvalidParams(String),
    #[error("insufficient draws for backtest: have {have}, need {need}")]
    InsufficientDraws { have: usize, need: usize },
    #[error("backtest produced no trades")]
    NoTrades,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EquityPoint {
    pub period: String,
    pub draw_time: i64,
    pub signal: String,
    pub actual: String,
    pub pnl: f64,
    pub equity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BacktestReport {
    pub period: String,
    pub window: u64,
    pub short_window: usize,
    pub long_window: usize,
    pub stake: f64,
    pub payout_multiplier: f64,
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub avg_return: f64,
    pub pnl: f64,
    pub equity_curve: Vec<EquityPoint>,
}

impl BacktestParams {
    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.window == 0 {
            return Err(BacktestError::InvalidParams("window must be >= 1".into()));
        }
        if self.short_window == 0 || self.long_window == 0 {
            return Err(BacktestError::InvalidParams(
                "moving average windows must be >= 1".into(),
            ));
        }
        if self.short_window >= self.long_window {
            return Err(BacktestError::InvalidParams(format!(
                "short_window ({}) must be smaller than long_window ({})",
                self.short_window, self.long_window
            )));
        }
        if !(self.stake > 0.0) {
            return Err(BacktestError::InvalidParams("stake must be positive".into()));
        }
        Ok(())
    }
}

fn mean(values: &VecDeque<i32>) -> f64 {
    values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
}

fn actual_outcome(draw: &DrawDto) -> String {
    if !draw.big_small.is_empty() {
        return draw.big_small.clone();
    }
    if draw.sum >= BIG_SMALL_MIDPOINT {
        "big".to_string()
    } else {
        "small".to_string()
    }
}

/// 和值均线交叉（动量）策略回测。draws 必须按时间升序（旧 -> 新）。
pub fn run_momentum_backtest(
    draws: &[DrawDto],
    params: &BacktestParams,
) -> Result<BacktestReport, BacktestError> {
    params.validate()?;
    if draws.len() < params.long_window {
        return Err(BacktestError::InsufficientDraws {
            have: draws.len(),
            need: params.long_window,
        });
    }

    let mut queue_short: VecDeque<i32> = VecDeque::with_capacity(params.short_window);
    let mut queue_long: VecDeque<i32> = VecDeque::with_capacity(params.long_window);
    let mut equity = 0.0;
    let mut wins = 0u64;
    let mut losses = 0u64;
    let mut trades = 0u64;
    let mut equity_curve: VecDeque<EquityPoint> = VecDeque::with_capacity(EQUITY_CURVE_LIMIT);

    for draw in draws {
        if queue_short.len() == params.short_window {
            queue_short.pop_front();
        }
        if queue_long.len() == params.long_window {
            queue_long.pop_front();
        }
        queue_short.push_back(draw.sum);
        queue_long.push_back(draw.sum);
        if queue_long.len() < params.long_window || queue_short.len() < params.short_window {
            continue;
        }

        let signal = if mean(&queue_short) >= mean(&queue_long) {
            "big"
        } else {
            "small"
        };
        let actual = actual_outcome(draw);
        let pnl = if signal == actual {
            wins += 1;
            params.stake * params.payout_multiplier
        } else {
            losses += 1;
            -params.stake
        };
        equity += pnl;
        trades += 1;

        if equity_curve.len() == EQUITY_CURVE_LIMIT {
            equity_curve.pop_front();
        }
        equity_curve.push_back(EquityPoint {
            period: draw.period.clone(),
            draw_time: draw.draw_time,
            signal: signal.to_string(),
            actual,
            pnl,
            equity,
        });
    }

    if trades == 0 {
        return Err(BacktestError::NoTrades);
    }

    Ok(BacktestReport {
        period: draws.last().map(|d| d.period.clone()).unwrap_or_default(),
        window: params.window,
        short_window: params.short_window,
        long_window: params.long_window,
        stake: params.stake,
        payout_multiplier: params.payout_multiplier,
        trades,
        wins,
        losses,
        win_rate: wins as f64 / trades as f64,
        avg_return: equity / (trades as f64 * params.stake),
        pnl: equity,
        equity_curve: equity_curve.into_iter().collect(),
    })
}
