//! Local file tree enumeration and fingerprinting.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::error::SyncError;

/// A regular file found under a sync root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    /// Path relative to the root, always `/`-separated.
    pub relative_path: String,
    /// Absolute (or root-joined) path on disk.
    pub path: PathBuf,
}

/// Enumerates regular files below a root directory.
///
/// Symlinks are not followed and are never reported, neither are directories.
#[derive(Debug, Clone)]
pub struct FileWalker {
    root: PathBuf,
}

impl FileWalker {
    /// Creates a walker for `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root being walked.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists every regular file, sorted by relative path.
    ///
    /// # Errors
    ///
    /// Fails if the root is not a directory or an entry cannot be read.
    pub fn walk(&self) -> Result<Vec<WalkedFile>, SyncError> {
        if !self.root.is_dir() {
            return Err(SyncError::InvalidRoot {
                path: self.root.clone(),
            });
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(|e| SyncError::Walk {
                path: e.path().map_or_else(|| self.root.clone(), Path::to_path_buf),
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            files.push(WalkedFile {
                relative_path: to_slash_path(relative).ok_or_else(|| SyncError::InvalidPath {
                    path: entry.path().to_path_buf(),
                })?,
                path: entry.path().to_path_buf(),
            });
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(files)
    }
}

/// Joins the normal components of `path` with `/`.
///
/// Returns `None` if a component is not valid UTF-8.
fn to_slash_path(path: &Path) -> Option<String> {
    let parts = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_str()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

/// Hex-encoded SHA-256 of a file's contents.
///
/// # Errors
///
/// Returns [`SyncError::Read`] if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<String, SyncError> {
    let read_err = |source| SyncError::Read {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(read_err)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();

    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buffer).map_err(read_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_sorted_with_slash_paths() {
        let temp = TempDir::new().expect("temp dir");
        fs::create_dir_all(temp.path().join("css/vendor")).expect("mkdir");
        fs::write(temp.path().join("index.html"), "<html/>").expect("write");
        fs::write(temp.path().join("css/vendor/reset.css"), "*{}").expect("write");
        fs::write(temp.path().join("css/site.css"), "body{}").expect("write");

        let files = FileWalker::new(temp.path()).walk().expect("walk");
        let paths: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();

        assert_eq!(paths, vec!["css/site.css", "css/vendor/reset.css", "index.html"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_excluded() {
        let temp = TempDir::new().expect("temp dir");
        fs::write(temp.path().join("real.txt"), "data").expect("write");
        std::os::unix::fs::symlink(temp.path().join("real.txt"), temp.path().join("link.txt"))
            .expect("symlink");

        let files = FileWalker::new(temp.path()).walk().expect("walk");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "real.txt");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_name_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = TempDir::new().expect("temp dir");
        fs::write(temp.path().join(OsStr::from_bytes(b"a\xff.txt")), "one").expect("write");
        fs::write(temp.path().join(OsStr::from_bytes(b"a\xfe.txt")), "two").expect("write");

        let err = FileWalker::new(temp.path()).walk().expect_err("undecodable name");
        assert!(matches!(err, SyncError::InvalidPath { ref path } if path.starts_with(temp.path())));
    }

    #[test]
    fn test_missing_root() {
        let temp = TempDir::new().expect("temp dir");
        let err = FileWalker::new(temp.path().join("nope")).walk().expect_err("no root");
        assert!(matches!(err, SyncError::InvalidRoot { .. }));
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("a.txt");
        fs::write(&path, "hello").expect("write");

        assert_eq!(
            hash_file(&path).expect("hash"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
