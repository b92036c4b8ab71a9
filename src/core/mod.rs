// Public modules
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod outbound;
pub mod pipeline;
pub mod platform;
pub mod presets;
pub mod programs;
pub mod protocol;
pub mod server;
pub mod session;
pub mod variables;

// Public modules for CLI access
pub mod defaults;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
pub use outbound::{MessageSink, Outbound};
