//! CLI response envelope shared by every command.

mod response;

pub use response::*;
