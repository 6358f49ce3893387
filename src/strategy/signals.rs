use crate::indicators::ema_series;

/// Minimum completed bars before an entry is considered
pub const MIN_BARS_FOR_ENTRY: usize = 60;

pub const EMA_FAST: usize = 20;
pub const EMA_SLOW: usize = 50;

const STOP_RATIO: f64 = 0.95;
const TP1_RATIO: f64 = 1.05;
const TP2_RATIO: f64 = 1.10;

/// Risk:reward reported when entry <= stop makes the ratio undefined
const FALLBACK_RISK_REWARD: f64 = 1.5;

pub const ENTRY_REASON: &str = "EMA20 crossed above EMA50";

/// Price levels attached to an entry signal
#[derive(Debug, Clone, PartialEq)]
pub struct EntryLevels {
    pub entry: f64,
    pub stop: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub risk_reward: f64,
}

/// Which exit rule fired. When several hold at once the check order is
/// hard stop, then take-profit, then trend-exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitRule {
    HardStop,
    TakeProfit,
    TrendExit,
}

impl ExitRule {
    pub fn reason(&self) -> &'static str {
        match self {
            ExitRule::HardStop => "close at or below stop",
            ExitRule::TakeProfit => "close reached TP2",
            ExitRule::TrendExit => "close fell below EMA50",
        }
    }
}

/// Entry rule: EMA20 crossed above EMA50 on the latest completed bar
/// (strictly above now, at-or-below on the previous bar). Fewer than
/// [`MIN_BARS_FOR_ENTRY`] closes never produces a signal.
pub fn entry_decision(closes: &[f64]) -> Option<EntryLevels> {
    if closes.len() < MIN_BARS_FOR_ENTRY {
        return None;
    }

    let fast = ema_series(closes, EMA_FAST);
    let slow = ema_series(closes, EMA_SLOW);
    let n = closes.len();

    let crossed_up = fast[n - 1] > slow[n - 1] && fast[n - 2] <= slow[n - 2];
    if !crossed_up {
        return None;
    }

    let entry = closes[n - 1];
    let stop = entry * STOP_RATIO;
    let tp1 = entry * TP1_RATIO;
    let tp2 = entry * TP2_RATIO;
    let risk_reward = if entry > stop {
        round2((tp1 - entry) / (entry - stop))
    } else {
        FALLBACK_RISK_REWARD
    };

    Some(EntryLevels {
        entry,
        stop,
        tp1,
        tp2,
        risk_reward,
    })
}

/// Exit rules for an open long, any one sufficient: latest close at or
/// below the stop, at or above TP2, or below the current EMA50.
pub fn exit_decision(closes: &[f64], stop: f64, tp2: f64) -> Option<ExitRule> {
    let last = *closes.last()?;

    if last <= stop {
        return Some(ExitRule::HardStop);
    }
    if last >= tp2 {
        return Some(ExitRule::TakeProfit);
    }

    let slow = ema_series(closes, EMA_SLOW);
    if last < *slow.last()? {
        return Some(ExitRule::TrendExit);
    }

    None
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
