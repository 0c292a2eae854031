//! Locating the external executables the control plane drives.

use std::path::{Path, PathBuf};

use crate::error::{ControlError, Result};

/// Supplies paths to executables.
pub trait AssetProvisioner: Send + Sync {
    /// Returns the path of the executable called `name`, if available.
    fn path_to_executable(&self, name: &str) -> Option<PathBuf>;
}

/// Resolves executables from explicit paths or the `PATH` environment.
///
/// A name containing a path separator is used as given and must point at
/// an executable file. A bare name is searched in `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathProvisioner;

impl AssetProvisioner for PathProvisioner {
    fn path_to_executable(&self, name: &str) -> Option<PathBuf> {
        let path = Path::new(name);
        if path.components().count() > 1 || path.is_absolute() {
            return is_executable(path).then(|| path.to_path_buf());
        }
        which::which(name).ok()
    }
}

/// Resolves `name` through `provisioner`.
///
/// # Errors
/// [`ControlError::Setup`] if the executable is not available.
pub fn resolve(provisioner: &dyn AssetProvisioner, name: &str) -> Result<PathBuf> {
    match provisioner.path_to_executable(name) {
        Some(path) => {
            tracing::debug!(name, path = %path.display(), "Resolved executable");
            Ok(path)
        }
        None => Err(ControlError::setup(
            name,
            "not found or not executable",
        )),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
