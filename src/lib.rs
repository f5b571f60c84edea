pub mod api;
pub mod config;
pub mod error;
pub mod export;
pub mod language;
pub mod llm;
pub mod policy;
pub mod queue;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod workflow;
