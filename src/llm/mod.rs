pub mod claude;
pub mod generator;
pub mod parse;
pub mod prompt;
pub mod scripted;

use async_trait::async_trait;

use crate::error::ServiceError;

pub use claude::ClaudeClient;
pub use generator::StageGenerator;
pub use scripted::ScriptedGenerator;

/// The external text-generation service: one prompt in, one response out.
///
/// `model` is the run's configured model name; implementations that serve a
/// single model may ignore it.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, model: &str, prompt: &str) -> std::result::Result<String, ServiceError>;
}
