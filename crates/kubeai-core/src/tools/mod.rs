//! Built-in tools
//!
//! Definitions advertised to the model plus a process runner hosts can use
//! to execute them. Approval stays with the host.

pub mod command;
pub mod definitions;

pub use command::CommandRunner;
pub use definitions::{bash_tool, default_tools, kubectl_tool, BASH_TOOL, KUBECTL_TOOL};
