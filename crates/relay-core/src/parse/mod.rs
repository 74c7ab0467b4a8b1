//! Inbound request parsing

pub mod anthropic;

pub use anthropic::parse_anthropic_request;
