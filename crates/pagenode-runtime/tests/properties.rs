//! Property tests for path resolution and content scanning

use pagenode_config::testing::TestEnvironment;
use pagenode_runtime::resolve::PathResolver;
use pagenode_runtime::scan::{scan, ScanFilter};
use pagenode_runtime::PAGE_PREFIX;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Pages root with some content, a secret next to it and (on unix) a symlink
/// pointing out of it
fn traversal_fixture() -> TestEnvironment {
    let env = TestEnvironment::new().unwrap();
    env.create_page("index.mu", b"home").unwrap();
    env.create_page("sub/a.mu", b"a").unwrap();
    std::fs::write(env.root.join("passwd"), b"secret").unwrap();
    #[cfg(unix)]
    std::os::unix::fs::symlink(&env.root, env.pages_dir.join("link")).unwrap();
    env
}

fn segment() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "..", ".", "", "sub", "a.mu", "index.mu", "link", "passwd", "pages", "etc", "%2e%2e",
        "..%2f", "\\..", "...",
    ])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn resolve_never_leaves_root(
        segments in prop::collection::vec(segment(), 0..8),
        namespaced in any::<bool>(),
    ) {
        let env = traversal_fixture();
        let resolver = PathResolver::new(&env.pages_dir, PAGE_PREFIX);

        let joined = segments.join("/");
        let request = if namespaced {
            format!("{PAGE_PREFIX}{joined}")
        } else {
            joined
        };

        if let Ok(path) = resolver.resolve(&request) {
            prop_assert!(path.starts_with(&env.pages_dir), "{request} -> {}", path.display());
        }
    }

    #[test]
    fn resolve_rejects_classic_escapes(prefix in prop::sample::select(vec!["", "/", "/page/", "/page/sub/"])) {
        let env = traversal_fixture();
        let resolver = PathResolver::new(&env.pages_dir, PAGE_PREFIX);

        for attack in ["../../etc/passwd", "./a/../../..", "../passwd", "sub/../../passwd"] {
            let request = format!("{prefix}{attack}");
            prop_assert!(resolver.resolve(&request).is_err(), "{request}");
        }
    }
}

/// One generated entry: directory components plus a file name
fn tree_entry() -> impl Strategy<Value = (Vec<&'static str>, &'static str, &'static str)> {
    (
        prop::collection::vec(prop::sample::select(vec!["d1", "d2", ".hd"]), 0..4),
        prop::sample::select(vec!["f1", "f2", ".hf"]),
        prop::sample::select(vec![".mu", ".txt", ""]),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn scan_matches_expected_set(entries in prop::collection::vec(tree_entry(), 0..24)) {
        let env = TestEnvironment::new().unwrap();
        let mut expected_pages = BTreeSet::new();
        let mut expected_files = BTreeSet::new();

        for (dirs, stem, ext) in &entries {
            let mut relative = PathBuf::new();
            for dir in dirs {
                relative.push(dir);
            }
            relative.push(format!("{stem}{ext}"));
            let relative = relative.to_string_lossy().into_owned();

            env.create_page(&relative, b"p").unwrap();
            env.create_file(&relative, b"f").unwrap();

            let hidden = dirs.iter().any(|d| d.starts_with('.')) || stem.starts_with('.');
            if !hidden {
                expected_files.insert(env.files_dir.join(&relative));
                if *ext == ".mu" {
                    expected_pages.insert(env.pages_dir.join(&relative));
                }
            }
        }

        let pages: BTreeSet<_> = scan(&env.pages_dir, &ScanFilter::pages("mu")).unwrap().into_iter().collect();
        let files: BTreeSet<_> = scan(&env.files_dir, &ScanFilter::Files).unwrap().into_iter().collect();

        prop_assert_eq!(pages, expected_pages);
        prop_assert_eq!(files, expected_files);
    }
}
