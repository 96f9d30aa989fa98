//! Request handlers for pages and files.
//!
//! Handlers never surface an error to the remote peer. Anything that cannot
//! be served (traversal, missing target, directory, open failure) yields the
//! same fixed [`NOT_ALLOWED`] payload so the reply leaks nothing about the
//! filesystem layout.

use pagenode_config::{log_file_debug, log_page_debug, log_page_warn};
use pagenode_transport::{FileMetadata, Request, Responder, Response};
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use crate::resolve::PathResolver;
use crate::script::{self, ScriptEnv};
use crate::{FILE_PREFIX, PAGE_PREFIX};

/// Served at the index path when the pages root has no index page
pub const DEFAULT_INDEX: &[u8] = b">Default Home Page\n\nThis node is serving pages using rns-page-node, but index.mu was not found.\nPlease add an index.mu file to customize the home page.\n";

/// Reply for any request that cannot be served
pub const NOT_ALLOWED: &[u8] =
    b">Request Not Allowed\n\nYou are not authorised to carry out the request.\n";

/// Responder for the index path when no index page exists
pub fn default_index_responder() -> Responder {
    Arc::new(|_request: &Request| Response::Bytes(DEFAULT_INDEX.to_vec()))
}

/// Serves `/page/...` requests, running script pages
#[derive(Debug, Clone)]
pub struct PageHandler {
    resolver: PathResolver,
}

impl PageHandler {
    pub fn new(pages_root: &Path) -> Self {
        Self {
            resolver: PathResolver::new(pages_root, PAGE_PREFIX),
        }
    }

    pub fn serve(&self, request: &Request) -> Vec<u8> {
        let path = match self.resolver.resolve(&request.path) {
            Ok(path) => path,
            Err(e) => {
                log_page_debug!("Rejected page request", path = request.path, error = e);
                return NOT_ALLOWED.to_vec();
            }
        };

        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) => {
                log_page_debug!("Cannot read page", path = path.display(), error = e);
                return NOT_ALLOWED.to_vec();
            }
        };

        if script::has_shebang(&content) && script::is_executable(&path) {
            let env = ScriptEnv::for_request(request);
            match script::run_script(&path, &env) {
                Ok(output) => return output,
                Err(e) => {
                    log_page_warn!("Script failed, serving raw content", error = e);
                }
            }
        }

        content
    }

    pub fn responder(self: Arc<Self>) -> Responder {
        Arc::new(move |request: &Request| Response::Bytes(self.serve(request)))
    }
}

/// Serves `/file/...` requests as streams
#[derive(Debug, Clone)]
pub struct FileHandler {
    resolver: PathResolver,
}

impl FileHandler {
    pub fn new(files_root: &Path) -> Self {
        Self {
            resolver: PathResolver::new(files_root, FILE_PREFIX),
        }
    }

    /// Open the requested file for streaming.
    ///
    /// The returned handle is owned by the caller, which closes it when the
    /// transfer ends.
    pub fn serve(&self, request: &Request) -> Response {
        let path = match self.resolver.resolve(&request.path) {
            Ok(path) => path,
            Err(e) => {
                log_file_debug!("Rejected file request", path = request.path, error = e);
                return Response::Bytes(NOT_ALLOWED.to_vec());
            }
        };

        if !path.is_file() {
            log_file_debug!("Not a regular file", path = path.display());
            return Response::Bytes(NOT_ALLOWED.to_vec());
        }

        match File::open(&path) {
            Ok(file) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Response::File {
                    file,
                    metadata: FileMetadata { name },
                }
            }
            Err(e) => {
                log_file_debug!("Cannot open file", path = path.display(), error = e);
                Response::Bytes(NOT_ALLOWED.to_vec())
            }
        }
    }

    pub fn responder(self: Arc<Self>) -> Responder {
        Arc::new(move |request: &Request| self.serve(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagenode_config::testing::TestEnvironment;
    use pagenode_transport::RequestData;

    #[test]
    fn test_page_served_verbatim() {
        let env = TestEnvironment::new().unwrap();
        env.create_page("about.mu", b">About\nHello").unwrap();
        let handler = PageHandler::new(&env.pages_dir);

        assert_eq!(handler.serve(&Request::new("/page/about.mu")), b">About\nHello");
    }

    #[test]
    fn test_page_rejections_are_uniform() {
        let env = TestEnvironment::new().unwrap();
        std::fs::write(env.root.join("secret.mu"), b"secret").unwrap();
        env.create_dir("pages/sub").unwrap();
        let handler = PageHandler::new(&env.pages_dir);

        for path in ["/page/../secret.mu", "/page/missing.mu", "/page/sub", "/page/"] {
            assert_eq!(handler.serve(&Request::new(path)), NOT_ALLOWED, "{path}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_script_page_output() {
        let env = TestEnvironment::new().unwrap();
        env.create_script("greet.mu", b"#!/bin/sh\necho \"Hello $var_who\"\n")
            .unwrap();
        let handler = PageHandler::new(&env.pages_dir);

        let mut data = RequestData::new();
        data.insert("var_who".to_string(), "peer".to_string());
        let response = handler.serve(&Request::new("/page/greet.mu").with_data(data));
        assert_eq!(response, b"Hello peer\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_script_falls_back_to_source() {
        let env = TestEnvironment::new().unwrap();
        let source = b"#!/bin/sh\nexit 1\n";
        env.create_script("broken.mu", source).unwrap();
        let handler = PageHandler::new(&env.pages_dir);

        assert_eq!(handler.serve(&Request::new("/page/broken.mu")), source);
    }

    #[test]
    fn test_file_served_as_stream() {
        let env = TestEnvironment::new().unwrap();
        env.create_file("docs/manual.pdf", b"%PDF").unwrap();
        let handler = FileHandler::new(&env.files_dir);

        match handler.serve(&Request::new("/file/docs/manual.pdf")) {
            Response::File { file, metadata } => {
                assert_eq!(metadata.name, "manual.pdf");
                let bytes = Response::File { file, metadata }.into_bytes().unwrap();
                assert_eq!(bytes, b"%PDF");
            }
            Response::Bytes(_) => panic!("expected a file stream"),
        }
    }

    #[test]
    fn test_file_rejections_are_bytes() {
        let env = TestEnvironment::new().unwrap();
        env.create_dir("files/folder").unwrap();
        std::fs::write(env.root.join("outside.txt"), b"o").unwrap();
        let handler = FileHandler::new(&env.files_dir);

        for path in ["/file/folder", "/file/../outside.txt", "/file/nope"] {
            let response = handler.serve(&Request::new(path));
            assert_eq!(response.as_bytes(), Some(NOT_ALLOWED), "{path}");
        }
    }

    #[test]
    fn test_default_index_responder() {
        let responder = default_index_responder();
        let response = responder(&Request::new("/page/index.mu"));
        assert_eq!(response.as_bytes(), Some(DEFAULT_INDEX));
    }
}
