//! Toolchain resolution.
//!
//! Maps a language to an executable path. Resolution order:
//! 1. an override from the [`EnvironmentProvider`] (e.g. an active virtualenv)
//! 2. each executable name in each conventional install directory
//! 3. the language's extra absolute candidates
//! 4. `PATH` (GUI-launched hosts often have a minimal one, so this comes last)
//!
//! The first existing path wins. When nothing matches, resolution fails with
//! the language's install hint before any process is spawned.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::language::LanguageSpec;

/// Supplies per-language interpreter overrides, e.g. from an active virtual
/// environment.
pub trait EnvironmentProvider: Send + Sync {
    /// Override executable for `language`, if any.
    fn interpreter_override(&self, language: &str) -> Option<PathBuf>;
}

/// Environment provider that never overrides.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEnvironment;

impl EnvironmentProvider for NoEnvironment {
    fn interpreter_override(&self, _language: &str) -> Option<PathBuf> {
        None
    }
}

/// Resolves language toolchains to executables.
#[derive(Debug, Clone)]
pub struct ToolchainResolver {
    /// Directories searched for each executable name, in order.
    search_dirs: Vec<PathBuf>,

    /// Whether to fall back to a `PATH` lookup.
    use_path: bool,
}

impl ToolchainResolver {
    /// Create a resolver over the conventional install directories.
    pub fn new() -> Self {
        Self {
            search_dirs: conventional_dirs(),
            use_path: true,
        }
    }

    /// Create a resolver that searches only `dirs` and never consults `PATH`.
    pub fn with_search_dirs(dirs: Vec<PathBuf>) -> Self {
        Self {
            search_dirs: dirs,
            use_path: false,
        }
    }

    /// Directories searched by this resolver.
    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Resolve the executable for `spec`.
    ///
    /// # Errors
    /// Returns [`Error::ToolchainNotFound`] carrying the install hint.
    pub fn resolve(&self, spec: &LanguageSpec, override_path: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = override_path {
            if path.is_file() {
                tracing::debug!("Using {} override {}", spec.name, path.display());
                return Ok(path.to_path_buf());
            }
            tracing::warn!(
                "Ignoring {} override {}: file does not exist",
                spec.name,
                path.display()
            );
        }

        for exe in spec.toolchain.executables {
            for dir in &self.search_dirs {
                let candidate = dir.join(exe);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }

        for extra in spec.toolchain.extra_paths {
            let candidate = PathBuf::from(expand_home(extra));
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        if self.use_path {
            for exe in spec.toolchain.executables {
                if let Ok(found) = which::which(exe) {
                    return Ok(found);
                }
            }
        }

        Err(Error::toolchain_not_found(spec.name, spec.toolchain.install_hint))
    }
}

impl Default for ToolchainResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand `{home}` to the user's home directory.
pub(crate) fn expand_home(template: &str) -> String {
    if !template.contains("{home}") {
        return template.to_string();
    }
    let home = dirs::home_dir()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();
    template.replace("{home}", &home)
}

/// Conventional install locations, most specific first.
fn conventional_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/opt/homebrew/bin"),
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/usr/local/go/bin"),
    ];
    if let Some(home) = dirs::home_dir() {
        dirs.push(home.join(".cargo/bin"));
        dirs.push(home.join("go/bin"));
        dirs.push(home.join(".local/bin"));
    }
    dirs.push(PathBuf::from("/usr/bin"));
    dirs.push(PathBuf::from("/bin"));
    dirs
}
