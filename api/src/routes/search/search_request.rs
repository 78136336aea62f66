use serde::Deserialize;

/// `GET /api/v1/files` query string.
#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    pub query: String,
    pub top_n: Option<usize>,
}
