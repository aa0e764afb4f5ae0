//! Execution error classification.
//!
//! Venue and RPC failures arrive as free-form strings. Classification
//! maps them onto a small taxonomy so the orchestrators can decide
//! skip/fail/retry by matching on an action instead of string-poking
//! at every call site.
//!
//! Custom program error codes take priority over substring markers: a
//! numeric code is exact, a marker is a heuristic.

use serde::{Deserialize, Serialize};

/// Failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Price moved beyond the tolerated slippage.
    Slippage,
    /// No route, thin liquidity, token not tradable.
    MarketCondition,
    /// Wallet cannot cover the amount.
    InsufficientFunds,
    /// Structurally broken request; retrying cannot help.
    Fatal,
    /// Unrecognized failure.
    Unknown,
}

/// What an orchestrator should do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorAction {
    /// Leave the position unchanged; safe to re-evaluate next cycle.
    Skip,
    /// Terminal for this attempt.
    Fail,
    /// Re-attempt within budget.
    Retry,
}

/// Classification of one raw error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    /// Failure category.
    pub kind: ErrorKind,
    /// Recommended action.
    pub action: ErrorAction,
    /// On-chain custom program error code, when one was present.
    pub custom_code: Option<u32>,
}

const SLIPPAGE_CUSTOM_CODES: &[u32] = &[6001, 6017];
const INSUFFICIENT_FUNDS_CUSTOM_CODES: &[u32] = &[6024];
const FATAL_CUSTOM_CODES: &[u32] = &[6008, 6014, 6025];

const SLIPPAGE_MARKERS: &[&str] = &[
    "slippage tolerance exceeded",
    "slippage exceeded",
    "exact out amount not matched",
];

const MARKET_CONDITION_MARKERS: &[&str] = &[
    "no routes found",
    "no_routes_found",
    "could not find any route",
    "could_not_find_any_route",
    "route plan does not consume all the amount",
    "route_plan_does_not_consume_all_the_amount",
    "token not tradable",
    "token_not_tradable",
    "zero-amount leg",
    "zero_amount_leg",
    "insufficient liquidity",
    "price impact too high",
];

const INSUFFICIENT_FUNDS_MARKERS: &[&str] = &["insufficient funds", "insufficient lamports"];

const FATAL_MARKERS: &[&str] = &[
    "invalid params",
    "invalid argument",
    "unsupported pair",
    "must be > 0",
    "must be object",
    "account not found",
    "owner mismatch",
    "signature verification failed",
    "not enough account keys",
    "incorrect token program id",
    "invalid token account",
];

// Second, independent net on top of the classifier. These strings
// disqualify a retry even when the classifier itself says UNKNOWN.
const NON_RETRIABLE_MARKERS: &[&str] = &[
    "invalid params",
    "invalid argument",
    "unsupported pair",
    "account not found",
    "owner mismatch",
    "signature verification failed",
    "error processing instruction 0",
];

/// Extract an on-chain custom program error code from a raw message.
///
/// Tries, in order: hex (`custom program error: 0x...`), decimal
/// (`custom NNNN`), dict-style (`'custom': N`). First match wins.
#[must_use]
pub fn extract_custom_program_error_code(message: &str) -> Option<u32> {
    #[allow(clippy::expect_used)] // patterns are compile-time constants
    fn patterns() -> &'static [regex::Regex; 3] {
        use std::sync::OnceLock;

        static PATTERNS: OnceLock<[regex::Regex; 3]> = OnceLock::new();
        PATTERNS.get_or_init(|| {
            [
                regex::Regex::new(r"custom program error:\s*0x([0-9a-f]+)")
                    .expect("hex pattern is valid"),
                regex::Regex::new(r"\bcustom\s+(\d{3,5})\b").expect("decimal pattern is valid"),
                regex::Regex::new(r#"['"]custom['"]\s*:\s*(\d+)"#).expect("dict pattern is valid"),
            ]
        })
    }

    let normalized = normalize(message);
    let [hex, decimal, dict] = patterns();

    if let Some(captures) = hex.captures(&normalized) {
        if let Ok(code) = u32::from_str_radix(&captures[1], 16) {
            return Some(code);
        }
    }
    if let Some(captures) = decimal.captures(&normalized) {
        if let Ok(code) = captures[1].parse() {
            return Some(code);
        }
    }
    if let Some(captures) = dict.captures(&normalized) {
        if let Ok(code) = captures[1].parse() {
            return Some(code);
        }
    }
    None
}

/// Classify a raw execution error message.
#[must_use]
pub fn classify_execution_error(message: &str) -> ErrorClassification {
    let normalized = normalize(message);
    let custom_code = extract_custom_program_error_code(&normalized);

    if let Some(code) = custom_code {
        if SLIPPAGE_CUSTOM_CODES.contains(&code) {
            return classification(ErrorKind::Slippage, ErrorAction::Skip, custom_code);
        }
        if INSUFFICIENT_FUNDS_CUSTOM_CODES.contains(&code) {
            return classification(ErrorKind::InsufficientFunds, ErrorAction::Skip, custom_code);
        }
        if FATAL_CUSTOM_CODES.contains(&code) {
            return classification(ErrorKind::Fatal, ErrorAction::Fail, custom_code);
        }
    }

    if contains_any(&normalized, SLIPPAGE_MARKERS) {
        return classification(ErrorKind::Slippage, ErrorAction::Skip, custom_code);
    }
    if contains_any(&normalized, MARKET_CONDITION_MARKERS) {
        return classification(ErrorKind::MarketCondition, ErrorAction::Skip, custom_code);
    }
    if contains_any(&normalized, INSUFFICIENT_FUNDS_MARKERS) {
        return classification(ErrorKind::InsufficientFunds, ErrorAction::Skip, custom_code);
    }
    if contains_any(&normalized, FATAL_MARKERS) {
        return classification(ErrorKind::Fatal, ErrorAction::Fail, custom_code);
    }

    classification(ErrorKind::Unknown, ErrorAction::Retry, custom_code)
}

/// Whether a slippage failure is hiding in the message.
#[must_use]
pub fn is_slippage_error_message(message: &str) -> bool {
    classify_execution_error(message).kind == ErrorKind::Slippage
}

/// Whether the market condition (routing/liquidity) failed, as opposed
/// to this request being wrong.
#[must_use]
pub fn is_market_condition_error_message(message: &str) -> bool {
    classify_execution_error(message).kind == ErrorKind::MarketCondition
}

/// Whether a retry of the same request is pointless.
///
/// True when the classifier recommends anything other than RETRY, or
/// when one of the dedicated non-retriable markers appears.
#[must_use]
pub fn is_non_retriable_error_message(message: &str) -> bool {
    if classify_execution_error(message).action != ErrorAction::Retry {
        return true;
    }
    contains_any(&normalize(message), NON_RETRIABLE_MARKERS)
}

/// Default bound for [`summarize_error_for_log`].
pub const DEFAULT_ERROR_SUMMARY_LENGTH: usize = 300;

/// Reduce a verbose RPC error payload to a loggable one-liner.
///
/// Extracts a nested `'message': '...'` field when present (the useful
/// part of a JSON-RPC error blob), then truncates to `max_length`
/// characters, ending with `...` when cut.
#[must_use]
pub fn summarize_error_for_log(message: &str, max_length: usize) -> String {
    #[allow(clippy::expect_used)] // pattern is a compile-time constant
    fn nested_message() -> &'static regex::Regex {
        use std::sync::OnceLock;

        static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
        PATTERN.get_or_init(|| {
            regex::Regex::new(r#"['"]message['"]\s*:\s*['"]([^'"]*)['"]"#)
                .expect("message pattern is valid")
        })
    }

    let core = nested_message()
        .captures(message)
        .map_or_else(|| message.trim().to_string(), |c| c[1].to_string());

    if core.chars().count() <= max_length || max_length < 4 {
        return core;
    }
    let kept: String = core.chars().take(max_length - 3).collect();
    format!("{kept}...")
}

fn normalize(message: &str) -> String {
    message.trim().to_lowercase()
}

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| haystack.contains(marker))
}

const fn classification(
    kind: ErrorKind,
    action: ErrorAction,
    custom_code: Option<u32>,
) -> ErrorClassification {
    ErrorClassification {
        kind,
        action,
        custom_code,
    }
}
