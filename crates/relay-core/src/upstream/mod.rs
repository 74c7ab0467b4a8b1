//! Copilot backend layer
//!
//! Token exchange, endpoint discovery, model listing, and chat completions
//! (buffered and streaming) against the OpenAI-shaped Copilot API.

pub mod client;
pub mod error;
pub mod models;
pub mod sse;

pub use client::{ApiToken, CopilotClient};
pub use error::{UpstreamError, UpstreamResult};
pub use models::ModelDescriptor;
pub use sse::StreamEvent;
