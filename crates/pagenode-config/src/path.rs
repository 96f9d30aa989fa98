//! Path utilities shared by the scanner, the resolver and the registry.
//!
//! Everything that turns a client-supplied string into a filesystem path, or a
//! filesystem path into a client-visible one, goes through here.

use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Cannot resolve {}: {source}", path.display())]
    Unresolvable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Path '{}' is outside directory '{}'", path.display(), dir.display())]
    Outside { path: PathBuf, dir: PathBuf },
}

/// Normalize path, falling back to the original if canonicalization fails.
///
/// Content roots may not exist yet; that's acceptable, a missing root simply
/// serves nothing.
pub fn normalize_or_original(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Validate that path is within directory, returning the canonical path.
///
/// The comparison is component-wise on the canonical forms, so `/srv/pages2`
/// is never accepted as being inside `/srv/pages`. Equality is accepted.
///
/// # Security
/// The check must run on the canonical path. A prefix check on the raw joined
/// path is defeated by `..` segments and symlinks.
pub fn ensure_within(path: impl AsRef<Path>, dir: impl AsRef<Path>) -> Result<PathBuf, PathError> {
    let path = path.as_ref();
    let dir = dir.as_ref();

    let canonical_path = path
        .canonicalize()
        .map_err(|source| PathError::Unresolvable {
            path: path.to_path_buf(),
            source,
        })?;
    let canonical_dir = dir
        .canonicalize()
        .map_err(|source| PathError::Unresolvable {
            path: dir.to_path_buf(),
            source,
        })?;

    if canonical_path.starts_with(&canonical_dir) {
        Ok(canonical_path)
    } else {
        Err(PathError::Outside {
            path: path.to_path_buf(),
            dir: dir.to_path_buf(),
        })
    }
}

/// Strip a virtual namespace prefix (e.g. `/page/`) from a request path.
///
/// Paths without the prefix have their leading slashes trimmed instead, so the
/// result is always relative and can never replace the root when joined.
///
/// # Example
/// ```
/// use pagenode_config::path::strip_namespace;
/// assert_eq!(strip_namespace("/page/docs/a.mu", "/page/"), "docs/a.mu");
/// assert_eq!(strip_namespace("/etc/passwd", "/page/"), "etc/passwd");
/// ```
pub fn strip_namespace<'a>(request_path: &'a str, prefix: &str) -> &'a str {
    match request_path.strip_prefix(prefix) {
        Some(rest) => rest.trim_start_matches('/'),
        None => request_path.trim_start_matches('/'),
    }
}

/// Compute the forward-slash relative path from `base` to `target`.
///
/// Returns None if `target` is not under `base`, is `base` itself, or has a
/// component that is not valid UTF-8.
///
/// # Example
/// ```
/// use std::path::Path;
/// use pagenode_config::path::posix_relative;
/// let rel = posix_relative(Path::new("/srv/pages"), Path::new("/srv/pages/docs/a.mu"));
/// assert_eq!(rel.as_deref(), Some("docs/a.mu"));
/// ```
pub fn posix_relative(base: &Path, target: &Path) -> Option<String> {
    let relative = target.strip_prefix(base).ok()?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_str()?),
            _ => return None,
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Hidden entries start with a dot and are never served
pub fn is_hidden(name: &OsStr) -> bool {
    name.as_encoded_bytes().first() == Some(&b'.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_or_original_returns_original_on_failure() {
        let fake_path = Path::new("/nonexistent/path/file.txt");
        let result = normalize_or_original(fake_path);
        assert_eq!(result, fake_path);
    }

    #[test]
    fn test_ensure_within_nested() {
        let temp = tempdir().unwrap();
        let subdir = temp.path().join("subdir");
        fs::create_dir(&subdir).unwrap();
        let file = subdir.join("file.txt");
        fs::write(&file, "test").unwrap();

        assert!(ensure_within(&file, temp.path()).is_ok());
        assert!(ensure_within(&file, &subdir).is_ok());
        assert!(ensure_within(&subdir, &subdir).is_ok());
        assert!(ensure_within(temp.path(), &subdir).is_err());
        assert!(matches!(
            ensure_within("/nonexistent/path", temp.path()),
            Err(PathError::Unresolvable { .. })
        ));
    }

    #[test]
    fn test_ensure_within_rejects_sibling_with_shared_prefix() {
        let temp = tempdir().unwrap();
        let pages = temp.path().join("pages");
        let pages2 = temp.path().join("pages2");
        fs::create_dir(&pages).unwrap();
        fs::create_dir(&pages2).unwrap();
        fs::write(pages2.join("secret.mu"), "x").unwrap();

        let result = ensure_within(pages2.join("secret.mu"), &pages);
        assert!(matches!(result, Err(PathError::Outside { .. })));
    }

    #[test]
    fn test_ensure_within_resolves_dotdot_before_checking() {
        let temp = tempdir().unwrap();
        let pages = temp.path().join("pages");
        fs::create_dir(&pages).unwrap();
        fs::write(temp.path().join("outside.txt"), "x").unwrap();

        let sneaky = pages.join("..").join("outside.txt");
        let err = ensure_within(&sneaky, &pages).unwrap_err();
        assert!(err.to_string().contains("outside"));
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_within_follows_symlinks() {
        let temp = tempdir().unwrap();
        let pages = temp.path().join("pages");
        fs::create_dir(&pages).unwrap();
        fs::write(temp.path().join("target.txt"), "x").unwrap();
        std::os::unix::fs::symlink(temp.path().join("target.txt"), pages.join("link.mu"))
            .unwrap();

        assert!(ensure_within(pages.join("link.mu"), &pages).is_err());
    }

    #[test]
    fn test_strip_namespace() {
        assert_eq!(strip_namespace("/page/index.mu", "/page/"), "index.mu");
        assert_eq!(strip_namespace("/page//index.mu", "/page/"), "index.mu");
        assert_eq!(strip_namespace("/file/a/b.txt", "/page/"), "file/a/b.txt");
        assert_eq!(strip_namespace("///abs", "/page/"), "abs");
        assert_eq!(strip_namespace("", "/page/"), "");
    }

    #[test]
    fn test_posix_relative() {
        let base = Path::new("/home/user/pages");
        assert_eq!(
            posix_relative(base, Path::new("/home/user/pages/a/b/c.mu")).as_deref(),
            Some("a/b/c.mu")
        );
        assert_eq!(posix_relative(base, base), None);
        assert_eq!(posix_relative(base, Path::new("/tmp/file.txt")), None);
    }

    #[test]
    fn test_is_hidden() {
        assert!(is_hidden(OsStr::new(".git")));
        assert!(is_hidden(OsStr::new(".hidden.mu")));
        assert!(!is_hidden(OsStr::new("index.mu")));
        assert!(!is_hidden(OsStr::new("")));
    }
}
