use serde::Deserialize;

/// Body of `POST /api/v1/index` and `POST /api/v1/remove`.
#[derive(Debug, Deserialize)]
pub struct FilesRequest {
    /// Absolute paths, or paths relative to the watched root.
    pub files: Vec<String>,
}
