//! Filesystem helpers shared by loaders and the bundle container.
pub mod fs;
