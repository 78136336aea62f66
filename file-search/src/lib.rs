//! Search orchestrator: `search(query) -> ranked (path, score)`.
//!
//! A query carries text, an image, or both. Single-modality queries are
//! embedded and searched directly. Fused queries embed both terms
//! concurrently and combine the vectors *before* searching, since text and
//! image embeddings share one space; one search over the fused vector keeps
//! a single ranking instead of merging two result lists.

mod config;
mod errors;

pub use config::SearchConfig;
pub use errors::SearchError;
pub use vector_index::IndexHit as SearchHit;

use std::sync::Arc;

use embedding_client::{EmbedError, EmbedPayload, Embedder};
use serde::Serialize;
use sync_common::retry_with_backoff;
use tracing::{debug, info, instrument, warn};
use vector_index::{VectorIndex, sort_hits};

/// Extra candidates fetched beyond `top_n` so that ties at the cut-off are
/// decided by path rather than by the store's internal order.
const TIE_MARGIN: usize = 4;

/// Upper bound for the widened candidate window.
const MAX_FETCH: usize = 1024;

/// A search request. Empty text or empty image bytes count as absent.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub text: Option<String>,
    pub image: Option<Vec<u8>>,
    pub top_n: Option<usize>,
}

impl Query {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn image(bytes: Vec<u8>) -> Self {
        Self {
            image: Some(bytes),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_image(mut self, bytes: Vec<u8>) -> Self {
        self.image = Some(bytes);
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = Some(top_n);
        self
    }

    /// Which terms are present. A query with neither is invalid.
    pub fn kind(&self) -> Result<QueryKind, SearchError> {
        match (self.text_term(), self.image_term()) {
            (Some(_), Some(_)) => Ok(QueryKind::Fused),
            (Some(_), None) => Ok(QueryKind::Text),
            (None, Some(_)) => Ok(QueryKind::Image),
            (None, None) => Err(SearchError::InvalidQuery(
                "at least one of text or image is required".into(),
            )),
        }
    }

    fn text_term(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    fn image_term(&self) -> Option<&[u8]> {
        self.image.as_deref().filter(|b| !b.is_empty())
    }
}

/// Which terms a query used; reported back to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Text,
    Image,
    Fused,
}

/// Elementwise `w·text + (1-w)·image`. `None` when the lengths differ.
pub fn fuse_vectors(text: &[f32], image: &[f32], text_weight: f32) -> Option<Vec<f32>> {
    if text.len() != image.len() {
        return None;
    }
    let w = text_weight;
    Some(
        text.iter()
            .zip(image)
            .map(|(t, i)| w * t + (1.0 - w) * i)
            .collect(),
    )
}

pub struct SearchOrchestrator {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    cfg: SearchConfig,
}

impl SearchOrchestrator {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, cfg: SearchConfig) -> Self {
        Self {
            embedder,
            index,
            cfg,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.cfg
    }

    /// Ranked hits, strictly by descending score with ties broken by path,
    /// at most `top_n` long. Either the full ranking or an error.
    #[instrument(skip_all, fields(kind = tracing::field::Empty, top_n = tracing::field::Empty))]
    pub async fn search(&self, query: &Query) -> Result<Vec<SearchHit>, SearchError> {
        let (kind, top_n) = self.validate(query)?;
        tracing::Span::current().record("kind", tracing::field::debug(kind));
        tracing::Span::current().record("top_n", top_n);

        let vector = self.query_vector(query, kind).await?;

        let mut hits = self.ranked_candidates(vector, top_n).await?;
        if let Some(min) = self.cfg.min_score {
            hits.retain(|h| h.score >= min);
        }
        hits.truncate(top_n);

        info!(
            target: "file_search",
            ?kind,
            top_n,
            returned = hits.len(),
            best = hits.first().map(|h| h.score),
            "search served"
        );
        Ok(hits)
    }

    fn validate(&self, query: &Query) -> Result<(QueryKind, usize), SearchError> {
        let kind = query.kind()?;

        let top_n = query.top_n.unwrap_or(self.cfg.default_top_n);
        if top_n == 0 || top_n > self.cfg.max_top_n {
            return Err(SearchError::InvalidQuery(format!(
                "top_n must be within 1..={}, got {top_n}",
                self.cfg.max_top_n
            )));
        }
        Ok((kind, top_n))
    }

    /// Sorted candidates that contain every hit tied with the `top_n`-th one.
    ///
    /// The window starts at `top_n + TIE_MARGIN` and doubles (up to
    /// [`MAX_FETCH`]) while a full page still ends on the cut-off score.
    async fn ranked_candidates(
        &self,
        vector: Vec<f32>,
        top_n: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let cap = MAX_FETCH.max(top_n + TIE_MARGIN);
        let mut fetch = top_n + TIE_MARGIN;
        loop {
            let mut hits = retry_with_backoff(&self.cfg.retry, "search", "vector index", || {
                self.index.search(vector.clone(), fetch)
            })
            .await
            .map_err(|e| SearchError::SearchFailed(e.to_string()))?;
            sort_hits(&mut hits);

            if fetch >= cap || !ties_reach_page_end(&hits, top_n, fetch) {
                return Ok(hits);
            }
            fetch = (fetch * 2).min(cap);
            debug!(target: "file_search", fetch, "cut-off tie fills the page, widening");
        }
    }

    async fn embed(&self, payload: EmbedPayload<'_>) -> Result<Vec<f32>, SearchError> {
        let modality = payload.modality();
        retry_with_backoff(&self.cfg.retry, "embed", modality.as_str(), || {
            self.embedder.embed(payload)
        })
        .await
        .map_err(|e| {
            warn!(target: "file_search", %modality, error = %e, "query embedding failed");
            match e {
                EmbedError::InvalidInput(reason) => SearchError::InvalidQuery(reason),
                other => SearchError::SearchFailed(other.to_string()),
            }
        })
    }

    async fn query_vector(&self, query: &Query, kind: QueryKind) -> Result<Vec<f32>, SearchError> {
        let text = query.text_term().unwrap_or_default();
        let image = query.image_term().unwrap_or_default();

        match kind {
            QueryKind::Text => self.embed(EmbedPayload::Text(text)).await,
            QueryKind::Image => self.embed(EmbedPayload::Image(image)).await,
            QueryKind::Fused => {
                let (t, i) = futures::try_join!(
                    self.embed(EmbedPayload::Text(text)),
                    self.embed(EmbedPayload::Image(image)),
                )?;
                debug!(target: "file_search", weight = self.cfg.text_weight, "fusing text and image vectors");
                fuse_vectors(&t, &i, self.cfg.text_weight).ok_or_else(|| {
                    SearchError::SearchFailed(format!(
                        "text and image embeddings differ in size: {} vs {}",
                        t.len(),
                        i.len()
                    ))
                })
            }
        }
    }
}

/// True when the store filled the page and its last hit scores the same as
/// the `top_n`-th, so more tied hits may exist beyond it.
fn ties_reach_page_end(sorted: &[SearchHit], top_n: usize, fetch: usize) -> bool {
    if sorted.len() < fetch {
        return false;
    }
    match (sorted.get(top_n.saturating_sub(1)), sorted.last()) {
        (Some(cut), Some(last)) => cut.score == last.score,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use sync_common::{Modality, RetryPolicy, fingerprint_bytes};
    use vector_index::{EntryMetadata, IndexError, MemoryIndex};

    /// Text embeds to `text_vec`, images to `image_vec`, or a fixed error.
    struct StubEmbedder {
        text_vec: Vec<f32>,
        image_vec: Vec<f32>,
        fail: Option<fn() -> EmbedError>,
    }

    impl Embedder for StubEmbedder {
        fn dimension(&self) -> usize {
            self.text_vec.len()
        }

        fn embed<'a>(
            &'a self,
            payload: EmbedPayload<'a>,
        ) -> BoxFuture<'a, embedding_client::Result<Vec<f32>>> {
            let out = match (self.fail, payload) {
                (Some(f), _) => Err(f()),
                (None, EmbedPayload::Text(_)) => Ok(self.text_vec.clone()),
                (None, EmbedPayload::Image(_)) => Ok(self.image_vec.clone()),
            };
            async move { out }.boxed()
        }
    }

    /// Fails the first `failures` calls with `Unavailable`, then embeds to `[1, 0]`.
    struct FlakyEmbedder {
        failures: usize,
        calls: AtomicUsize,
    }

    impl Embedder for FlakyEmbedder {
        fn dimension(&self) -> usize {
            2
        }

        fn embed<'a>(
            &'a self,
            _payload: EmbedPayload<'a>,
        ) -> BoxFuture<'a, embedding_client::Result<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let out = if call < self.failures {
                Err(EmbedError::Unavailable("transient 503".into()))
            } else {
                Ok(vec![1.0, 0.0])
            };
            async move { out }.boxed()
        }
    }

    /// Returns its hits in the stored order, cut to `top_n`, like a store
    /// that orders ties arbitrarily. Optionally fails the first call.
    struct ScriptedIndex {
        hits: Vec<SearchHit>,
        fail_first: bool,
        calls: AtomicUsize,
    }

    impl VectorIndex for ScriptedIndex {
        fn dimension(&self) -> usize {
            2
        }

        fn ensure_collection(&self) -> BoxFuture<'_, Result<(), IndexError>> {
            async { Ok(()) }.boxed()
        }

        fn upsert<'a>(
            &'a self,
            _id: &'a str,
            _vector: Vec<f32>,
            _metadata: EntryMetadata,
        ) -> BoxFuture<'a, Result<(), IndexError>> {
            async { Ok(()) }.boxed()
        }

        fn delete<'a>(&'a self, _id: &'a str) -> BoxFuture<'a, Result<(), IndexError>> {
            async { Ok(()) }.boxed()
        }

        fn search(
            &self,
            _vector: Vec<f32>,
            top_n: usize,
        ) -> BoxFuture<'_, Result<Vec<SearchHit>, IndexError>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let out = if self.fail_first && call == 0 {
                Err(IndexError::Unavailable("connection reset".into()))
            } else {
                Ok(self.hits.iter().take(top_n).cloned().collect())
            };
            async move { out }.boxed()
        }
    }

    fn fast_cfg() -> SearchConfig {
        SearchConfig {
            retry: RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..SearchConfig::default()
        }
    }

    fn stub(text_vec: Vec<f32>, image_vec: Vec<f32>) -> Arc<StubEmbedder> {
        Arc::new(StubEmbedder {
            text_vec,
            image_vec,
            fail: None,
        })
    }

    async fn put(index: &MemoryIndex, path: &str, vector: Vec<f32>) {
        let meta = EntryMetadata {
            modality: Modality::Text,
            fingerprint: fingerprint_bytes(path.as_bytes(), 0),
            original_path: path.to_string(),
        };
        index.upsert(path, vector, meta).await.unwrap();
    }

    /// Unit vector whose cosine with `[1, 0]` is `score`.
    fn at_score(score: f32) -> Vec<f32> {
        vec![score, (1.0 - score * score).sqrt()]
    }

    #[tokio::test]
    async fn returns_exactly_top_n_in_descending_order() {
        let index = Arc::new(MemoryIndex::new(2));
        let scores = [0.91, 0.87, 0.80, 0.65, 0.40, 0.12];
        for (i, s) in scores.iter().enumerate() {
            put(&index, &format!("/data/f{i}.png"), at_score(*s)).await;
        }
        let search = SearchOrchestrator::new(
            stub(vec![1.0, 0.0], vec![0.0, 1.0]),
            index,
            SearchConfig::default(),
        );

        let hits = search
            .search(&Query::text("a red bicycle").with_top_n(5))
            .await
            .unwrap();

        let paths: Vec<_> = hits.iter().map(|h| h.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["/data/f0.png", "/data/f1.png", "/data/f2.png", "/data/f3.png", "/data/f4.png"]
        );
        for (hit, expected) in hits.iter().zip(scores) {
            assert!((hit.score - expected).abs() < 1e-4);
        }
    }

    #[tokio::test]
    async fn fused_query_equals_search_with_averaged_vector() {
        let index = Arc::new(MemoryIndex::new(3));
        put(&index, "/data/a", vec![1.0, 0.0, 0.0]).await;
        put(&index, "/data/b", vec![0.0, 1.0, 0.0]).await;
        put(&index, "/data/c", vec![0.6, 0.6, 0.1]).await;
        put(&index, "/data/d", vec![0.0, 0.0, 1.0]).await;

        let t = vec![0.9, 0.1, 0.0];
        let i = vec![0.2, 0.7, 0.3];
        let search = SearchOrchestrator::new(stub(t.clone(), i.clone()), index.clone(), SearchConfig::default());

        let fused = search
            .search(&Query::text("cat").with_image(vec![1, 2, 3]).with_top_n(3))
            .await
            .unwrap();

        let avg: Vec<f32> = t.iter().zip(&i).map(|(a, b)| (a + b) / 2.0).collect();
        assert_eq!(fuse_vectors(&t, &i, 0.5).unwrap(), avg);
        let mut direct = index.search(avg, 3).await.unwrap();
        sort_hits(&mut direct);
        assert_eq!(fused, direct);
    }

    #[test]
    fn weighted_fusion_and_length_mismatch() {
        assert_eq!(fuse_vectors(&[1.0, 0.0], &[0.0, 1.0], 1.0).unwrap(), vec![1.0, 0.0]);
        assert_eq!(fuse_vectors(&[1.0, 0.0], &[0.0, 1.0], 0.0).unwrap(), vec![0.0, 1.0]);
        assert!(fuse_vectors(&[1.0], &[1.0, 2.0], 0.5).is_none());
    }

    #[tokio::test]
    async fn ties_are_ordered_by_path_and_bounded() {
        let index = Arc::new(MemoryIndex::new(2));
        for p in ["/data/d", "/data/b", "/data/c", "/data/a"] {
            put(&index, p, vec![1.0, 0.0]).await;
        }
        let search = SearchOrchestrator::new(stub(vec![1.0, 0.0], vec![0.0, 1.0]), index, SearchConfig::default());

        let hits = search.search(&Query::text("x").with_top_n(3)).await.unwrap();
        let paths: Vec<_> = hits.iter().map(|h| h.path.as_str()).collect();
        assert_eq!(paths, vec!["/data/a", "/data/b", "/data/c"]);
    }

    #[tokio::test]
    async fn invalid_queries_are_rejected() {
        let search = SearchOrchestrator::new(
            stub(vec![1.0, 0.0], vec![0.0, 1.0]),
            Arc::new(MemoryIndex::new(2)),
            SearchConfig::default(),
        );

        for q in [
            Query::default(),
            Query::text("   "),
            Query::image(Vec::new()),
            Query::text("ok").with_top_n(0),
            Query::text("ok").with_top_n(101),
        ] {
            assert!(matches!(search.search(&q).await, Err(SearchError::InvalidQuery(_))));
        }
    }

    #[tokio::test]
    async fn empty_index_yields_empty_result() {
        let search = SearchOrchestrator::new(
            stub(vec![1.0, 0.0], vec![0.0, 1.0]),
            Arc::new(MemoryIndex::new(2)),
            SearchConfig::default(),
        );
        assert!(search.search(&Query::text("anything")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remote_failures_become_search_failed() {
        let index = Arc::new(MemoryIndex::new(2));
        put(&index, "/data/a", vec![1.0, 0.0]).await;

        let timeout = Arc::new(StubEmbedder {
            text_vec: vec![1.0, 0.0],
            image_vec: vec![1.0, 0.0],
            fail: Some(|| EmbedError::Timeout(Duration::from_secs(30))),
        });
        let search = SearchOrchestrator::new(timeout, index.clone(), fast_cfg());
        assert!(matches!(
            search.search(&Query::text("a").with_image(vec![1])).await,
            Err(SearchError::SearchFailed(_))
        ));

        let corrupt = Arc::new(StubEmbedder {
            text_vec: vec![1.0, 0.0],
            image_vec: vec![1.0, 0.0],
            fail: Some(|| EmbedError::InvalidInput("not an image".into())),
        });
        let search = SearchOrchestrator::new(corrupt, index, fast_cfg());
        assert!(matches!(
            search.search(&Query::image(vec![0xff])).await,
            Err(SearchError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn min_score_filters_weak_hits() {
        let index = Arc::new(MemoryIndex::new(2));
        put(&index, "/data/close", at_score(0.9)).await;
        put(&index, "/data/far", at_score(0.1)).await;
        let cfg = SearchConfig {
            min_score: Some(0.5),
            ..SearchConfig::default()
        };
        let search = SearchOrchestrator::new(stub(vec![1.0, 0.0], vec![0.0, 1.0]), index, cfg);

        let hits = search.search(&Query::text("x")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "/data/close");
    }

    #[tokio::test]
    async fn transient_embedding_failure_is_retried() {
        let index = Arc::new(MemoryIndex::new(2));
        put(&index, "/data/a", vec![1.0, 0.0]).await;
        let embedder = Arc::new(FlakyEmbedder {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        let search = SearchOrchestrator::new(embedder.clone(), index, fast_cfg());

        let hits = search.search(&Query::text("x")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_embedding_failure_is_bounded() {
        let embedder = Arc::new(FlakyEmbedder {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let search = SearchOrchestrator::new(embedder.clone(), Arc::new(MemoryIndex::new(2)), fast_cfg());

        assert!(matches!(
            search.search(&Query::text("x")).await,
            Err(SearchError::SearchFailed(_))
        ));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    fn tied_hits_in_reverse_path_order() -> Vec<SearchHit> {
        ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"]
            .iter()
            .rev()
            .map(|n| SearchHit {
                path: format!("/data/{n}"),
                score: 0.9,
            })
            .collect()
    }

    #[tokio::test]
    async fn wide_ties_at_the_cut_off_are_decided_by_path() {
        let index = Arc::new(ScriptedIndex {
            hits: tied_hits_in_reverse_path_order(),
            fail_first: false,
            calls: AtomicUsize::new(0),
        });
        let search = SearchOrchestrator::new(stub(vec![1.0, 0.0], vec![0.0, 1.0]), index.clone(), fast_cfg());

        let hits = search.search(&Query::text("x").with_top_n(3)).await.unwrap();
        let paths: Vec<_> = hits.iter().map(|h| h.path.as_str()).collect();
        assert_eq!(paths, vec!["/data/a", "/data/b", "/data/c"]);
        // 7 tied hits fill the first page, 14 returns all 10.
        assert_eq!(index.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn index_search_is_retried() {
        let index = Arc::new(ScriptedIndex {
            hits: vec![SearchHit {
                path: "/data/a".into(),
                score: 0.5,
            }],
            fail_first: true,
            calls: AtomicUsize::new(0),
        });
        let search = SearchOrchestrator::new(stub(vec![1.0, 0.0], vec![0.0, 1.0]), index.clone(), fast_cfg());

        let hits = search.search(&Query::text("x")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(index.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn page_end_tie_detection() {
        let hit = |path: &str, score| SearchHit {
            path: path.into(),
            score,
        };
        let full_tied = vec![hit("/a", 0.9), hit("/b", 0.8), hit("/c", 0.8)];
        assert!(ties_reach_page_end(&full_tied, 2, 3));
        assert!(!ties_reach_page_end(&full_tied, 1, 3));
        assert!(!ties_reach_page_end(&full_tied, 2, 4));
    }
}
