//! Pure domain logic for the CONVAL recalculation workflow.
//!
//! Nothing in this crate performs I/O or reads the clock. The I/O side
//! (HTTP client, timers, the per-estimate session task) lives in
//! `quotation-conval` and drives the types defined here.

pub mod error;
pub mod gate;
pub mod job;
pub mod recalc;
pub mod timing;
pub mod types;
