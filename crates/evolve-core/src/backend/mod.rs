//! Concrete [`crate::gateway::Agent`] backends.

pub mod http;

pub use http::{HttpAgentFactory, HttpBackendConfig, HttpChatAgent};
