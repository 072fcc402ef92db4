//! Validation of storage roots and of names resolved beneath them.

use std::path::{Component, Path};

use crate::{Result, SpoolError};

const SENSITIVE_PREFIXES: [&str; 9] = [
    "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
];

/// Validate a storage root directory
///
/// # Security Checks
/// - Rejects paths containing `..` (directory traversal)
/// - Rejects relative paths
/// - Rejects paths inside sensitive system directories
pub fn validate_root(path: &Path) -> Result<()> {
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(SpoolError::InvalidPath(format!(
            "storage path cannot contain '..' components: {}",
            path.display()
        )));
    }

    if !path.is_absolute() {
        return Err(SpoolError::InvalidPath(format!(
            "storage path must be absolute: {}",
            path.display()
        )));
    }

    if let Some(prefix) = SENSITIVE_PREFIXES.iter().find(|p| path.starts_with(p)) {
        return Err(SpoolError::InvalidPath(format!(
            "storage path cannot be in system directory {prefix}: {}",
            path.display()
        )));
    }

    Ok(())
}

/// Validate a blob name before it is joined onto a storage root.
///
/// Names are `/` separated, relative, and every segment must be a plain
/// file name: no empty segments, no `.` or `..`, no backslashes or NULs.
pub fn validate_blob_name(name: &str) -> Result<()> {
    let invalid = || SpoolError::InvalidName(name.to_string());

    if name.is_empty() || name.starts_with('/') || name.contains(['\\', '\0']) {
        return Err(invalid());
    }

    if name
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(invalid());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_root_rejects_parent_dir() {
        let err = validate_root(&PathBuf::from("/var/lib/../etc")).unwrap_err();
        assert!(err.to_string().contains("cannot contain '..'"));
    }

    #[test]
    fn test_root_rejects_relative() {
        let err = validate_root(&PathBuf::from("relative/path")).unwrap_err();
        assert!(err.to_string().contains("must be absolute"));
    }

    #[test]
    #[cfg(unix)]
    fn test_root_rejects_system_directories() {
        for path in ["/etc/sendgate", "/proc/blobs", "/dev/queue"] {
            let err = validate_root(&PathBuf::from(path)).unwrap_err();
            assert!(err.to_string().contains("system directory"), "{path}");
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_root_accepts_regular_directory() {
        assert!(validate_root(&PathBuf::from("/var/lib/sendgate/blobs")).is_ok());
    }

    #[test]
    fn test_blob_names() {
        assert!(validate_blob_name("01HZX/report.pdf").is_ok());
        assert!(validate_blob_name("single").is_ok());

        for bad in ["", "/abs", "a//b", "a/../b", "../x", "a/./b", "a\\b", "trailing/"] {
            assert!(validate_blob_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
