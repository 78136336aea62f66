use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    /// The query itself is unusable. Not retried; maps to a client error.
    #[error("[File Search] invalid query: {0}")]
    InvalidQuery(String),

    /// A remote dependency failed; no partial result is returned.
    #[error("[File Search] search failed: {0}")]
    SearchFailed(String),
}
