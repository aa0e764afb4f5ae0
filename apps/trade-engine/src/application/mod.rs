//! Application layer: port definitions and the orchestration use
//! cases built on them.

pub mod ports;
pub mod use_cases;
