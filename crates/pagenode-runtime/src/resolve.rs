//! Virtual path resolution
//!
//! Turns the path a remote peer asked for into a real path that is guaranteed
//! to lie inside the content root. Containment is checked on the canonical
//! form, after `..` segments and symlinks have been resolved.

use pagenode_config::path::{ensure_within, strip_namespace, PathError};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Request path escapes its content root")]
    Outside,
    #[error("Request path does not resolve: {0}")]
    Unresolvable(#[source] io::Error),
}

impl From<PathError> for ResolveError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::Outside { .. } => ResolveError::Outside,
            PathError::Unresolvable { source, .. } => ResolveError::Unresolvable(source),
        }
    }
}

/// Resolves request paths under one namespace against one root
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    prefix: &'static str,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>, prefix: &'static str) -> Self {
        Self {
            root: root.into(),
            prefix,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `request_path` to a canonical path inside the root.
    ///
    /// The root is re-canonicalized on every call, so a root that is replaced
    /// by a symlink while the node runs is still enforced.
    pub fn resolve(&self, request_path: &str) -> Result<PathBuf, ResolveError> {
        let relative = strip_namespace(request_path, self.prefix);
        let joined = self.root.join(relative);
        Ok(ensure_within(&joined, &self.root)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagenode_config::testing::TestEnvironment;

    #[test]
    fn test_resolves_inside_root() {
        let env = TestEnvironment::new().unwrap();
        let page = env.create_page("docs/a.mu", b"a").unwrap();
        let resolver = PathResolver::new(&env.pages_dir, "/page/");

        assert_eq!(resolver.resolve("/page/docs/a.mu").unwrap(), page);
        // Redundant segments that stay inside are fine
        assert_eq!(resolver.resolve("/page/docs/../docs/./a.mu").unwrap(), page);
    }

    #[test]
    fn test_rejects_traversal() {
        let env = TestEnvironment::new().unwrap();
        std::fs::write(env.root.join("secret.txt"), b"s").unwrap();
        let resolver = PathResolver::new(&env.pages_dir, "/page/");

        assert!(matches!(
            resolver.resolve("/page/../secret.txt"),
            Err(ResolveError::Outside)
        ));
        assert!(resolver.resolve("/page/../../../../etc/passwd").is_err());
    }

    #[test]
    fn test_missing_target_is_unresolvable() {
        let env = TestEnvironment::new().unwrap();
        let resolver = PathResolver::new(&env.pages_dir, "/page/");
        assert!(matches!(
            resolver.resolve("/page/nope.mu"),
            Err(ResolveError::Unresolvable(_))
        ));
    }

    #[test]
    fn test_path_without_prefix_stays_relative() {
        let env = TestEnvironment::new().unwrap();
        let file = env.create_file("etc/passwd", b"decoy").unwrap();
        let resolver = PathResolver::new(&env.files_dir, "/file/");

        // An absolute-looking path is still joined under the root
        assert_eq!(resolver.resolve("/etc/passwd").unwrap(), file);
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escape() {
        let env = TestEnvironment::new().unwrap();
        std::fs::write(env.root.join("outside.mu"), b"o").unwrap();
        std::os::unix::fs::symlink(env.root.join("outside.mu"), env.pages_dir.join("link.mu"))
            .unwrap();
        let resolver = PathResolver::new(&env.pages_dir, "/page/");

        assert!(matches!(
            resolver.resolve("/page/link.mu"),
            Err(ResolveError::Outside)
        ));
    }

    #[test]
    fn test_rejects_sibling_sharing_prefix() {
        let env = TestEnvironment::new().unwrap();
        let sibling = env.create_dir("pages2").unwrap();
        std::fs::write(sibling.join("x.mu"), b"x").unwrap();
        let resolver = PathResolver::new(&env.pages_dir, "/page/");

        assert!(resolver.resolve("/page/../pages2/x.mu").is_err());
    }
}
