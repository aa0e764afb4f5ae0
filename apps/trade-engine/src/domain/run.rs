//! Per-tick run records.
//!
//! Every scheduler tick persists exactly one [`RunRecord`], whatever
//! the outcome, so the audit trail shows what each cycle decided and
//! why.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one run cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunResult {
    /// A new position was opened.
    Opened,
    /// The open position was closed.
    Closed,
    /// Flat, and the strategy produced no entry signal.
    NoSignal,
    /// Open position, no exit trigger fired on this bar.
    Hold,
    /// Cycle yielded no trade change for an operational reason
    /// (lock held elsewhere, daily cap, skip-classified error).
    Skipped,
    /// Entry for this bar was already evaluated.
    SkippedEntry,
    /// The cycle failed.
    Failed,
}

impl RunResult {
    /// Record string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Opened => "OPENED",
            Self::Closed => "CLOSED",
            Self::NoSignal => "NO_SIGNAL",
            Self::Hold => "HOLD",
            Self::Skipped => "SKIPPED",
            Self::SkippedEntry => "SKIPPED_ENTRY",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record for one scheduler tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique per-tick id: safe bar close time plus epoch millis.
    pub run_id: String,
    /// Strategy model the cycle ran for.
    pub model_id: String,
    /// Close time of the bar the cycle evaluated.
    pub bar_close_time: DateTime<Utc>,
    /// When the cycle executed.
    pub executed_at: DateTime<Utc>,
    /// Cycle outcome.
    pub result: RunResult,
    /// One-line human summary of what the cycle decided.
    pub summary: String,
    /// Short machine reason code, where one applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Trade touched by this cycle, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,
    /// Strategy metrics captured at decision time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<BTreeMap<String, serde_json::Value>>,
}

/// Build the per-tick run id from the bar close time and wall clock.
#[must_use]
pub fn build_run_id(bar_close_time: DateTime<Utc>, executed_at: DateTime<Utc>) -> String {
    let safe_bar: String = bar_close_time
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        .chars()
        .map(|c| if c == ':' || c == '+' { '_' } else { c })
        .collect();
    format!("{safe_bar}_{}", executed_at.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_id_combines_bar_and_clock() {
        let bar = Utc.with_ymd_and_hms(2026, 2, 22, 20, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 2, 22, 20, 0, 3).unwrap();
        let id = build_run_id(bar, now);
        assert_eq!(id, format!("2026-02-22T20_00_00Z_{}", now.timestamp_millis()));
    }

    #[test]
    fn result_strings_are_stable() {
        assert_eq!(RunResult::SkippedEntry.as_str(), "SKIPPED_ENTRY");
        assert_eq!(RunResult::NoSignal.to_string(), "NO_SIGNAL");
    }
}
