//! Generic utility primitives with zero domain knowledge.
//!
//! - `io` - File I/O with consistent error handling
//! - `template` - Literal token substitution

pub mod io;
pub(crate) mod template;
