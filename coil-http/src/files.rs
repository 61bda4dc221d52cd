//! Static file serving rooted at a directory.

use std::fs::File;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::body::FileBody;
use crate::error::HttpError;
use crate::message::HttpMessage;
use crate::server::RequestHandler;

/// Serves files from `root`. Requests escaping the root or naming a
/// missing file get a 404.
pub struct FileServer {
    root: PathBuf,
}

impl FileServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a request URI onto a path under the root, refusing any path
    /// that steps outside it.
    fn resolve(&self, uri: &str) -> Option<PathBuf> {
        let path = uri.split('?').next().unwrap_or(uri);
        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(resolved)
    }
}

fn not_found() -> HttpMessage {
    let mut response = HttpMessage::response(404, "Not Found");
    response.set_text_body("404 Not Found");
    response
}

impl RequestHandler for FileServer {
    fn process_request(&mut self, request: &mut HttpMessage) -> Result<HttpMessage, HttpError> {
        if request.method != "GET" && request.method != "HEAD" {
            let mut response = HttpMessage::response(405, "Method Not Allowed");
            response.set_text_body("405 Method Not Allowed");
            return Ok(response);
        }
        let Some(path) = self.resolve(&request.uri) else {
            debug!(uri = %request.uri, "refusing path outside the root");
            return Ok(not_found());
        };
        let file = match File::open(&path) {
            Ok(file) if file.metadata().map(|meta| meta.is_file()).unwrap_or(false) => file,
            _ => {
                debug!(path = %path.display(), "no such file");
                return Ok(not_found());
            }
        };
        let mut response = HttpMessage::response(200, "Ok");
        response.set_body(Box::new(FileBody::new(file)?), Some("text/plain"));
        if request.method == "HEAD" {
            response.drop_body();
        }
        Ok(response)
    }
}
