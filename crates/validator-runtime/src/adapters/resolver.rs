//! # Artifact Resolver
//!
//! Locates the single root folder of an unzipped SIP.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Return the only entry of `destination` if it is a directory.
///
/// Zero entries, several entries, a lone file, or an unreadable or missing
/// `destination` all yield `None`. Only reads the filesystem.
#[must_use]
pub fn resolve_root(destination: &Path) -> Option<PathBuf> {
    let entries = match std::fs::read_dir(destination) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(destination = %destination.display(), error = %e, "Destination not readable");
            return None;
        }
    };

    let mut only = None;
    for entry in entries {
        let Ok(entry) = entry else {
            return None;
        };
        if only.is_some() {
            debug!(destination = %destination.display(), "More than one entry in destination");
            return None;
        }
        only = Some(entry.path());
    }

    only.filter(|path| path.is_dir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_single_subfolder_is_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("case1");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("METS.xml"), "<mets/>").unwrap();

        assert_eq!(resolve_root(dir.path()), Some(root));
    }

    #[test]
    fn test_empty_destination() {
        let dir = tempdir().unwrap();
        assert_eq!(resolve_root(dir.path()), None);
    }

    #[test]
    fn test_two_subfolders() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        assert_eq!(resolve_root(dir.path()), None);
    }

    #[test]
    fn test_folder_next_to_file() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("readme.txt"), "x").unwrap();
        assert_eq!(resolve_root(dir.path()), None);
    }

    #[test]
    fn test_single_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("sip.zip"), "x").unwrap();
        assert_eq!(resolve_root(dir.path()), None);
    }

    #[test]
    fn test_missing_destination() {
        let dir = tempdir().unwrap();
        assert_eq!(resolve_root(&dir.path().join("does-not-exist")), None);
    }

    #[test]
    fn test_destination_is_a_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, "x").unwrap();
        assert_eq!(resolve_root(&file), None);
    }
}
