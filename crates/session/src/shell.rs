//! Shell resolution.

use std::path::PathBuf;

/// Flag that makes the shell run a single command string.
#[cfg(unix)]
pub const ONE_SHOT_FLAG: &str = "-c";

/// Flag that makes the shell run a single command string.
#[cfg(windows)]
pub const ONE_SHOT_FLAG: &str = "/c";

/// Fallback shell when nothing else is configured.
const FALLBACK_SHELL: &str = "/bin/sh";

/// Locates the shell used for `exec` and `shell` requests.
pub trait ShellLocator: Send + Sync {
    /// Path of the shell binary.
    fn shell_path(&self) -> PathBuf;
}

/// Shell locator driven by configuration.
///
/// Returns the shell in this order of preference:
/// 1. The configured shell, resolved through `PATH` when it is a bare name
/// 2. The `$SHELL` environment variable
/// 3. `/bin/sh`
#[derive(Debug, Clone, Default)]
pub struct ConfiguredShell {
    shell: Option<String>,
}

impl ConfiguredShell {
    /// Creates a locator for the given configured shell, if any.
    pub fn new(shell: Option<String>) -> Self {
        Self {
            shell: shell.filter(|s| !s.is_empty()),
        }
    }
}

impl ShellLocator for ConfiguredShell {
    fn shell_path(&self) -> PathBuf {
        if let Some(shell) = &self.shell {
            let path = PathBuf::from(shell);
            if path.is_absolute() {
                return path;
            }
            match which::which(shell) {
                Ok(resolved) => return resolved,
                Err(e) => tracing::warn!(
                    shell = %shell,
                    error = %e,
                    "Configured shell not found in PATH, falling back"
                ),
            }
        }

        std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(FALLBACK_SHELL))
    }
}
