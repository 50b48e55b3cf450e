//! Model infrastructure module
//!
//! - `types` - Request, Response, Error types
//! - `traits` - the `ModelProvider` seam used by the orchestrator
//! - `anthropic` - Messages API client

pub mod anthropic;
pub mod traits;
pub mod types;

pub use anthropic::AnthropicClient;
pub use traits::ModelProvider;
pub use types::{ModelError, ModelRequest, ModelResponse};
