//! Import resolution for the engine.
//!
//! This module provides:
//! - The [`ImportResolver`] callback contract and its [`ResolverBridge`] implementation
//! - Standard library and project file maps
//! - Asynchronous project file prefetching

mod bridge;
mod files;

pub use bridge::{ImportResolver, ResolverBridge, ResolverResult};
pub use files::{join_relative, normalize, DirectorySource, FileSource, ProjectFiles, StdLib};
