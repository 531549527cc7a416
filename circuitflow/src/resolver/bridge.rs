//! The resolver callback handed to the engine.
//!
//! The engine calls [`ImportResolver::resolve`] synchronously for every import
//! statement it meets, depth-first in source order. The bridge answers from the
//! standard library and the project snapshot installed for the current compile,
//! and tracks the chain of modules still being resolved so that a cycle is
//! reported instead of recursed into.

use super::files::{join_relative, ProjectFiles, StdLib};
use crate::errors::ResolveError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// A resolved import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverResult {
    /// Raw program text of the module.
    pub source: String,
    /// Canonical location, used as the base for nested imports.
    pub location: String,
}

/// Callback invoked by the engine for each import it encounters.
pub trait ImportResolver: Send {
    /// Resolves `import_path` as written in the module at `current_location`.
    fn resolve(&self, current_location: &str, import_path: &str)
        -> Result<ResolverResult, ResolveError>;
}

#[derive(Debug, Default)]
struct BridgeState {
    files: ProjectFiles,
    chain: Vec<String>,
    failure: Option<ResolveError>,
    calls: usize,
}

/// The import resolver installed into the engine.
///
/// Clones share state: the worker keeps one handle to install project files
/// and collect failures, the engine holds another to resolve.
#[derive(Debug, Clone)]
pub struct ResolverBridge {
    stdlib: Arc<StdLib>,
    default_extension: Option<String>,
    state: Arc<Mutex<BridgeState>>,
}

impl ResolverBridge {
    /// Creates a bridge over a standard library.
    #[must_use]
    pub fn new(stdlib: StdLib) -> Self {
        Self {
            stdlib: Arc::new(stdlib),
            default_extension: None,
            state: Arc::new(Mutex::new(BridgeState::default())),
        }
    }

    /// Also tries `path.<extension>` for imports written without one.
    #[must_use]
    pub fn with_default_extension(mut self, extension: Option<String>) -> Self {
        self.default_extension = extension;
        self
    }

    /// Installs the project snapshot and root location for a new compile.
    pub fn begin_compile(&self, root_location: &str, files: ProjectFiles) {
        let mut state = self.state.lock();
        state.files = files;
        state.chain = vec![super::files::normalize(root_location)];
        state.failure = None;
        state.calls = 0;
    }

    /// Ends a compile, returning the first resolution failure if any.
    pub fn finish_compile(&self) -> Option<ResolveError> {
        let mut state = self.state.lock();
        state.chain.clear();
        state.failure.take()
    }

    /// Returns how many times the callback ran during the current or last compile.
    #[must_use]
    pub fn resolution_count(&self) -> usize {
        self.state.lock().calls
    }

    /// Looks an import up without touching the resolution chain.
    ///
    /// Pure function of the installed standard library and project files.
    pub fn lookup(
        &self,
        current_location: &str,
        import_path: &str,
    ) -> Result<ResolverResult, ResolveError> {
        let state = self.state.lock();
        self.lookup_in(&state.files, current_location, import_path)
    }

    fn lookup_in(
        &self,
        files: &ProjectFiles,
        current_location: &str,
        import_path: &str,
    ) -> Result<ResolverResult, ResolveError> {
        for name in self.candidates(import_path) {
            if let Some(source) = self.stdlib.get(&name) {
                return Ok(ResolverResult {
                    source: source.to_string(),
                    location: name,
                });
            }
        }

        let joined = join_relative(current_location, import_path);
        for location in self.candidates(&joined) {
            if let Some(source) = files.get(&location) {
                return Ok(ResolverResult {
                    source: source.to_string(),
                    location,
                });
            }
            // Standard library modules importing their siblings relatively.
            if let Some(source) = self.stdlib.get(&location) {
                return Ok(ResolverResult {
                    source: source.to_string(),
                    location,
                });
            }
        }

        Err(ResolveError::unresolved(import_path, current_location))
    }

    fn candidates(&self, path: &str) -> Vec<String> {
        let mut names = vec![path.to_string()];
        if let Some(ext) = &self.default_extension {
            let file_name = path.rsplit('/').next().unwrap_or(path);
            if !file_name.contains('.') {
                names.push(format!("{path}.{ext}"));
            }
        }
        names
    }
}

impl ImportResolver for ResolverBridge {
    fn resolve(
        &self,
        current_location: &str,
        import_path: &str,
    ) -> Result<ResolverResult, ResolveError> {
        let mut state = self.state.lock();
        state.calls += 1;

        // Depth-first: every module deeper than the importer has finished.
        match state.chain.iter().rposition(|l| l == current_location) {
            Some(pos) => state.chain.truncate(pos + 1),
            None => {
                state.chain.clear();
                state.chain.push(current_location.to_string());
            }
        }

        let result = self
            .lookup_in(&state.files, current_location, import_path)
            .and_then(|resolved| {
                if state.chain.contains(&resolved.location) {
                    let mut chain = state.chain.clone();
                    chain.push(resolved.location);
                    Err(ResolveError::cyclic(chain))
                } else {
                    Ok(resolved)
                }
            });

        match &result {
            Ok(resolved) => {
                debug!(
                    from = %current_location,
                    import = %import_path,
                    location = %resolved.location,
                    depth = state.chain.len(),
                    "Resolved import"
                );
                state.chain.push(resolved.location.clone());
            }
            Err(err) => {
                warn!(from = %current_location, import = %import_path, error = %err, "Import resolution failed");
                if state.failure.is_none() {
                    state.failure = Some(err.clone());
                }
            }
        }

        result
    }
}
