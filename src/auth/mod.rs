//! Inbound credential handling.
//!
//! This module handles:
//! - Extracting the client's credential from headers or query parameters
//! - Checking it against the configured gate key
//! - Choosing the upstream key the request is forwarded with

pub mod credentials;
pub mod pool;

pub use credentials::{CredentialChain, CredentialSource};
pub use pool::{Gatekeeper, KeyPool, UpstreamCredential};
