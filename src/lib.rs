//! Inference job queue broker.
//!
//! Producers enqueue request payloads; worker nodes lease them, run them
//! against a model and submit results; clients poll until each job reaches
//! a terminal state. See [`queue`] for the core, [`server`] and
//! [`client::HttpQueue`] for the HTTP binding.

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod queue;
pub mod server;
pub mod shutdown;
pub mod ui;
pub mod worker;
