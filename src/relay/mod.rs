//! Room relay core
//!
//! Connection registry, room directory, and the router that fans chat
//! messages out to room members.

mod directory;
mod registry;
mod router;

pub use directory::*;
pub use registry::*;
pub use router::*;
