//! gemini-relay - credential-gated relay for the Gemini generateContent API
//!
//! This library provides the core functionality for the relay, including
//! configuration, credential handling, streaming and the OpenAI-compatible
//! mapping.

pub mod auth;
pub mod compat;
pub mod config;
pub mod error;
pub mod proxy;

pub use config::Config;
pub use error::{Error, Result};
