//! ROUNDWAGER: automated betting agent for on-chain up/down prediction rounds.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod ledger;
pub mod feeds;
pub mod strategy;
pub mod engine;
pub mod storage;
pub mod notify;
pub mod dashboard;
