//! Client facade
//!
//! Wraps one provider built from host configuration and adds the
//! connection checks the dashboard shows in its settings view.

pub mod core;
pub mod status;

pub use core::{default_endpoint, AiClient};
pub use status::ConnectionStatus;
