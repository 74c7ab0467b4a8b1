//! Authentication for Copilot Relay
//!
//! OAuth 2.0 device-authorization grant against GitHub. Token persistence
//! is handled by the credentials module in storage/.

pub mod browser;
pub mod device_flow;

pub use browser::open_browser;
pub use device_flow::{DeviceAuthFlow, DeviceAuthResult, DeviceCodeResponse};
