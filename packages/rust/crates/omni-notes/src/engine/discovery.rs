//! Port files used to route callers to one running engine process.
//!
//! The file holds the listening port as plain text. Workspace callers use
//! `.omni-notes.port`; CLI callers use the `.cli`-suffixed variant.

use crate::error::{EngineError, EngineResult};
use std::path::{Path, PathBuf};

/// Port file name for workspace callers.
pub const PORT_FILE_NAME: &str = ".omni-notes.port";
/// Suffix appended for CLI callers.
pub const CLI_PORT_SUFFIX: &str = ".cli";

/// Which caller convention a port file follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortCaller {
    /// Editor/workspace integration.
    Workspace,
    /// Command-line client.
    Cli,
}

/// Port file location under `root`.
#[must_use]
pub fn port_file_path(root: &Path, caller: PortCaller) -> PathBuf {
    match caller {
        PortCaller::Workspace => root.join(PORT_FILE_NAME),
        PortCaller::Cli => root.join(format!("{PORT_FILE_NAME}{CLI_PORT_SUFFIX}")),
    }
}

/// Write the port file (temp file + rename); returns its path.
///
/// # Errors
///
/// Returns I/O errors.
pub async fn write_port_file(root: &Path, caller: PortCaller, port: u16) -> EngineResult<PathBuf> {
    let path = port_file_path(root, caller);
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, port.to_string())
        .await
        .map_err(|err| EngineError::io(&tmp, err))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|err| EngineError::io(&path, err))?;
    log::debug!("Wrote port {port} to {}", path.display());
    Ok(path)
}

/// Read the port; `Ok(None)` when the file is absent or does not hold a port.
///
/// # Errors
///
/// Returns I/O errors other than "not found".
pub async fn read_port_file(root: &Path, caller: PortCaller) -> EngineResult<Option<u16>> {
    let path = port_file_path(root, caller);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(content.trim().parse::<u16>().ok()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(EngineError::io(&path, err)),
    }
}

/// Remove the port file; returns whether it existed.
///
/// # Errors
///
/// Returns I/O errors other than "not found".
pub async fn remove_port_file(root: &Path, caller: PortCaller) -> EngineResult<bool> {
    let path = port_file_path(root, caller);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(EngineError::io(&path, err)),
    }
}
