//! CLI command implementations.
//!
//! - [`issue`] - Certificate issuance
//! - [`wait`] - Readiness polling
//! - [`setup`] - Mount, root and role provisioning

pub mod issue;
pub mod setup;
pub mod wait;

pub use issue::IssueCommand;
pub use setup::SetupCommand;
pub use wait::WaitCommand;
