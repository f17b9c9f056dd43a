//! Deterministic random number generation
//!
//! Uses xorshift64* for fast, reproducible draws.
//! CRITICAL: Every random decision the scheduler makes (spawn trials, kind
//! mix, lane choice, durations, obstacle positions) MUST go through this module.

mod xorshift;

pub use xorshift::RngManager;
