//! The `install` subcommand: copy the running binary into the shared
//! volume so the rewritten user containers can invoke it.

use crate::error::AgentError;
use std::path::{Path, PathBuf};
use tracing::info;

const BINARY_NAME: &str = "piggy-env";

/// Copies the current executable to the destination. A directory receives a
/// `piggy-env` file. The copy is world-executable because the user
/// containers run under arbitrary uids.
pub fn install(destination: &Path) -> Result<PathBuf, AgentError> {
    let failure = |source: std::io::Error| AgentError::Install {
        destination: destination.to_path_buf(),
        source,
    };
    let source = std::env::current_exe().map_err(failure)?;
    let target = if destination.is_dir() {
        destination.join(BINARY_NAME)
    } else {
        destination.to_path_buf()
    };
    std::fs::copy(&source, &target).map_err(failure)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o777))
            .map_err(failure)?;
    }
    info!(target = %target.display(), "installed piggy-env");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn installs_into_directory() {
        let dir = tempdir().unwrap();
        let target = install(dir.path()).unwrap();
        assert_eq!(target, dir.path().join("piggy-env"));
        let metadata = std::fs::metadata(&target).unwrap();
        assert!(metadata.is_file());
        assert_eq!(metadata.permissions().mode() & 0o777, 0o777);
    }

    #[test]
    fn installs_to_explicit_file() {
        let dir = tempdir().unwrap();
        let destination = dir.path().join("agent");
        let target = install(&destination).unwrap();
        assert_eq!(target, destination);
        assert!(target.is_file());
    }

    #[test]
    fn missing_destination_directory_errors() {
        let err = install(Path::new("/definitely/not/here/agent")).unwrap_err();
        assert!(matches!(err, AgentError::Install { .. }));
    }
}
