//! In-memory virtual filesystem.
//!
//! Each loaded collection gets its own isolated instance, addressed by an
//! opaque id through [`VfsRegistry`]. Paths are POSIX-style and are
//! normalized against `/` before every lookup.

mod import;
mod registry;
mod store;

pub use import::ImportOptions;
pub use registry::VfsRegistry;
pub use store::{normalize, VfsStat};
