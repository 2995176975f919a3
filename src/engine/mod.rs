//! Core engine: the per-tick betting loop and its background tasks.

pub mod accountant;
pub mod balance;
pub mod betting_loop;
pub mod executor;
pub mod heartbeat;
pub mod settlement;
