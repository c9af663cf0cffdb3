//! API-process half of the pipeline: the command surface that turns user
//! actions into store mutations and enqueued jobs, and the event hub that
//! fans the worker's lifecycle events out to connected clients.

mod commands;
mod hub;

pub use commands::Commands;
pub use hub::EventHub;
