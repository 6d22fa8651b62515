//! CONVAL recalculation client library.
//!
//! Provides the HTTP client for the CONVAL endpoints, the queue poller,
//! cancellable timers, the dependent-data refresher and the per-estimate
//! session task that drives the `quotation-core` state machine.

pub mod api;
pub mod config;
pub mod controller;
pub mod messages;
pub mod poller;
pub mod refresher;
pub mod session;
pub mod timer;
