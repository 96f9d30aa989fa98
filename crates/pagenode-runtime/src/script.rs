//! Script pages
//!
//! A page is a script when its content starts with a shebang and the file is
//! executable by this process. Scripts run with no arguments; their standard
//! output is the response.
//!
//! Request data reaches a script only through environment variables, and only
//! for keys on an explicit allow-list.

use nix::errno::Errno;
use nix::unistd::{access, AccessFlags};
use pagenode_transport::Request;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

/// Marker a script page starts with
pub const SHEBANG: &[u8] = b"#!";

/// Hex link id of the requesting peer
pub const LINK_ID_VAR: &str = "link_id";
/// Hex identity hash of the requesting peer
pub const REMOTE_IDENTITY_VAR: &str = "remote_identity";

/// Request field prefixes allowed into the script environment
pub const ALLOWED_FIELD_PREFIXES: &[&str] = &["field_", "var_"];

const SPAWN_ATTEMPTS: u32 = 3;
const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(20);

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Failed to execute {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} exited with {status}", path.display())]
    Failed { path: PathBuf, status: ExitStatus },
}

pub fn has_shebang(content: &[u8]) -> bool {
    content.starts_with(SHEBANG)
}

/// Whether this process may execute `path`
pub fn is_executable(path: &Path) -> bool {
    access(path, AccessFlags::X_OK).is_ok()
}

/// Whether a request field may be exported to a script.
///
/// The key must carry an allowed prefix followed by at least one character,
/// and neither side may contain anything an environment entry cannot hold.
pub fn is_allowed_field(key: &str, value: &str) -> bool {
    let has_prefix = ALLOWED_FIELD_PREFIXES
        .iter()
        .any(|prefix| key.strip_prefix(prefix).is_some_and(|rest| !rest.is_empty()));

    has_prefix && !key.contains(['=', '\0']) && !value.contains('\0')
}

/// Environment added to a script's inherited environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptEnv {
    vars: BTreeMap<String, String>,
}

impl ScriptEnv {
    pub fn for_request(request: &Request) -> Self {
        let mut vars = BTreeMap::new();

        if let Some(link_id) = &request.link_id {
            vars.insert(LINK_ID_VAR.to_string(), link_id.hex());
        }
        if let Some(identity) = &request.remote_identity {
            vars.insert(REMOTE_IDENTITY_VAR.to_string(), identity.hex());
        }
        if let Some(data) = &request.data {
            for (key, value) in data {
                if is_allowed_field(key, value) {
                    vars.insert(key.clone(), value.clone());
                }
            }
        }

        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Run the script at `path` and capture its standard output.
///
/// Blocks until the script exits. A non-zero exit is an error.
pub fn run_script(path: &Path, env: &ScriptEnv) -> Result<Vec<u8>, ScriptError> {
    let mut attempt = 1;
    let output = loop {
        let result = Command::new(path)
            .envs(env.iter())
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output();

        match result {
            // A page that was just written may still be open for writing in a
            // forked child elsewhere in this process
            Err(e)
                if e.raw_os_error() == Some(Errno::ETXTBSY as i32)
                    && attempt < SPAWN_ATTEMPTS =>
            {
                attempt += 1;
                thread::sleep(SPAWN_RETRY_DELAY);
            }
            Err(source) => {
                return Err(ScriptError::Spawn {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Ok(output) => break output,
        }
    };

    if !output.status.success() {
        return Err(ScriptError::Failed {
            path: path.to_path_buf(),
            status: output.status,
        });
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagenode_transport::{IdentityHash, LinkId, RequestData};

    #[test]
    fn test_has_shebang() {
        assert!(has_shebang(b"#!/bin/sh\necho hi\n"));
        assert!(has_shebang(b"#!"));
        assert!(!has_shebang(b" #!/bin/sh"));
        assert!(!has_shebang(b"#"));
        assert!(!has_shebang(b""));
    }

    #[test]
    fn test_allow_list() {
        assert!(is_allowed_field("field_name", "Ada"));
        assert!(is_allowed_field("var_page", "2"));
        assert!(!is_allowed_field("field_", "empty suffix"));
        assert!(!is_allowed_field("PATH", "/tmp/evil"));
        assert!(!is_allowed_field("LD_PRELOAD", "/tmp/evil.so"));
        assert!(!is_allowed_field("Field_name", "case matters"));
        assert!(!is_allowed_field("field_a=b", "x"));
        assert!(!is_allowed_field("field_nul\0", "x"));
        assert!(!is_allowed_field("field_ok", "nul\0inside"));
    }

    #[test]
    fn test_env_for_request() {
        let mut data = RequestData::new();
        data.insert("field_name".to_string(), "Ada".to_string());
        data.insert("var_x".to_string(), "1".to_string());
        data.insert("HOME".to_string(), "/root".to_string());

        let request = Request::new("/page/form.mu")
            .with_data(data)
            .with_link(LinkId([0x0a; 16]))
            .with_remote_identity(IdentityHash([0xff; 16]));

        let env = ScriptEnv::for_request(&request);
        assert_eq!(env.len(), 4);
        assert_eq!(env.get("field_name"), Some("Ada"));
        assert_eq!(env.get("var_x"), Some("1"));
        assert_eq!(env.get(LINK_ID_VAR), Some("0a".repeat(16).as_str()));
        assert_eq!(env.get(REMOTE_IDENTITY_VAR), Some("ff".repeat(16).as_str()));
        assert_eq!(env.get("HOME"), None);
    }

    #[test]
    fn test_env_without_context_is_empty() {
        let env = ScriptEnv::for_request(&Request::new("/page/a.mu"));
        assert!(env.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_script_captures_stdout_and_env() {
        let env = pagenode_config::testing::TestEnvironment::new().unwrap();
        let script = env
            .create_script("hello.mu", b"#!/bin/sh\nprintf 'hi %s' \"$field_name\"\n")
            .unwrap();

        let mut data = RequestData::new();
        data.insert("field_name".to_string(), "Ada".to_string());
        let script_env = ScriptEnv::for_request(&Request::new("/page/hello.mu").with_data(data));

        assert!(is_executable(&script));
        assert_eq!(run_script(&script, &script_env).unwrap(), b"hi Ada");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_script_nonzero_exit_is_error() {
        let env = pagenode_config::testing::TestEnvironment::new().unwrap();
        let script = env.create_script("fail.mu", b"#!/bin/sh\necho partial\nexit 3\n").unwrap();

        let err = run_script(&script, &ScriptEnv::default()).unwrap_err();
        assert!(matches!(err, ScriptError::Failed { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_plain_page_is_not_executable() {
        let env = pagenode_config::testing::TestEnvironment::new().unwrap();
        let page = env.create_page("plain.mu", b"#!/bin/sh\n").unwrap();
        assert!(!is_executable(&page));
    }
}
