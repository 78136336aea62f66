use file_search::{QueryKind, SearchHit};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub kind: QueryKind,
    pub top_n: usize,
    /// Ranked by descending score, ties by path.
    pub results: Vec<SearchHit>,
}
