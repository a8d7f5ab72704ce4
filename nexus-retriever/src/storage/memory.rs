//! In-process implementations of the storage traits.
//!
//! Used by the CLI for ad hoc queries and by tests. Every store counts the
//! calls made to it so tests can check which collaborators a retrieval touched.

use super::{
    CacheBackend, CacheEndpoint, DocumentStore, GraphHit, GraphStore, PayloadFilter, Point,
    ScoredPoint, StoredDocument, VectorSearch, VectorStore,
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use nexus_chunker::{Chunk, ChunkRelationship, DocumentOutline};
use nexus_embed::cosine_similarity;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Vector collections kept in memory, searched by brute-force cosine similarity.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Point>>>,
    searches: AtomicUsize,
    retrievals: AtomicUsize,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `search` calls so far
    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    /// Number of `search` and `retrieve` calls so far
    pub fn read_count(&self) -> usize {
        self.search_count() + self.retrievals.load(Ordering::SeqCst)
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(&self, collection: &str, search: VectorSearch) -> Result<Vec<ScoredPoint>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let collections = self.collections.read().await;
        let Some(points) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<ScoredPoint> = points
            .values()
            .filter(|point| {
                search
                    .filter
                    .as_ref()
                    .is_none_or(|filter| filter.matches(&point.payload))
            })
            .filter_map(|point| {
                let vector = point.vector.as_ref()?;
                let score = cosine_similarity(&search.vector, vector);
                if search.score_threshold.is_some_and(|min| score < min) {
                    return None;
                }
                Some(ScoredPoint {
                    id: point.id.clone(),
                    score,
                    payload: if search.with_payload {
                        point.payload.clone()
                    } else {
                        Default::default()
                    },
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(search.limit);
        Ok(hits)
    }

    async fn retrieve(
        &self,
        collection: &str,
        ids: &[String],
        with_vector: bool,
    ) -> Result<Vec<Point>> {
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        let collections = self.collections.read().await;
        let Some(points) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| points.get(id))
            .map(|point| Point {
                vector: if with_vector { point.vector.clone() } else { None },
                ..point.clone()
            })
            .collect())
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let stored = collections.entry(collection.to_string()).or_default();
        for point in points {
            stored.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn delete_by_filter(&self, collection: &str, filter: &PayloadFilter) -> Result<usize> {
        let mut collections = self.collections.write().await;
        let Some(points) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = points.len();
        points.retain(|_, point| !filter.matches(&point.payload));
        Ok(before - points.len())
    }
}

/// Undirected weighted chunk graph.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    edges: RwLock<HashMap<String, HashMap<String, f32>>>,
    traversals: AtomicUsize,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `traverse` calls so far
    pub fn traversal_count(&self) -> usize {
        self.traversals.load(Ordering::SeqCst)
    }

    pub async fn edge_count(&self) -> usize {
        // Each undirected edge is stored under both endpoints.
        self.edges.read().await.values().map(HashMap::len).sum::<usize>() / 2
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn traverse(
        &self,
        seeds: &[String],
        max_depth: usize,
        limit: usize,
    ) -> Result<Vec<GraphHit>> {
        self.traversals.fetch_add(1, Ordering::SeqCst);
        let edges = self.edges.read().await;
        let seed_set: HashSet<&str> = seeds.iter().map(String::as_str).collect();

        // Best path per node, relaxed one hop at a time up to max_depth.
        let mut best: HashMap<String, GraphHit> = HashMap::new();
        let mut frontier: Vec<(String, f32)> = seeds.iter().map(|s| (s.clone(), 1.0)).collect();
        for depth in 1..=max_depth {
            let mut next = Vec::new();
            for (node, score) in &frontier {
                let Some(neighbors) = edges.get(node) else {
                    continue;
                };
                for (neighbor, weight) in neighbors {
                    if seed_set.contains(neighbor.as_str()) {
                        continue;
                    }
                    let path_score = score * weight;
                    let improved = best
                        .get(neighbor)
                        .is_none_or(|hit| path_score > hit.path_score);
                    if improved {
                        best.insert(
                            neighbor.clone(),
                            GraphHit {
                                chunk_id: neighbor.clone(),
                                distance: depth,
                                path_score,
                            },
                        );
                        next.push((neighbor.clone(), path_score));
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        let mut hits: Vec<GraphHit> = best.into_values().collect();
        hits.sort_by(|a, b| {
            b.path_score
                .total_cmp(&a.path_score)
                .then(a.distance.cmp(&b.distance))
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn upsert_relationships(&self, relationships: &[ChunkRelationship]) -> Result<()> {
        let mut edges = self.edges.write().await;
        for relationship in relationships {
            let (a, b) = (&relationship.source_id, &relationship.target_id);
            for (from, to) in [(a, b), (b, a)] {
                let weight = edges
                    .entry(from.clone())
                    .or_default()
                    .entry(to.clone())
                    .or_insert(relationship.weight);
                // Parallel edges of different types keep the strongest weight.
                *weight = weight.max(relationship.weight);
            }
        }
        Ok(())
    }

    async fn remove_chunks(&self, chunk_ids: &[String]) -> Result<()> {
        let mut edges = self.edges.write().await;
        for id in chunk_ids {
            if let Some(neighbors) = edges.remove(id) {
                for neighbor in neighbors.keys() {
                    if let Some(back) = edges.get_mut(neighbor) {
                        back.remove(id);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Documents and their chunks in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<BTreeMap<String, (StoredDocument, Vec<Chunk>)>>,
    reads: AtomicUsize,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of read calls so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn count_read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document_by_name(&self, name: &str) -> Result<Option<StoredDocument>> {
        self.count_read();
        let documents = self.documents.read().await;
        let needle = name.trim().to_lowercase();
        let exact = documents
            .values()
            .find(|(doc, _)| doc.metadata.title.to_lowercase() == needle);
        let found = exact.or_else(|| {
            documents
                .values()
                .filter(|(doc, _)| doc.metadata.title.to_lowercase().contains(&needle))
                .min_by_key(|(doc, _)| doc.metadata.title.len())
        });
        Ok(found.map(|(doc, _)| doc.clone()))
    }

    async fn get_document_by_id(&self, id: &str) -> Result<Option<StoredDocument>> {
        self.count_read();
        Ok(self.documents.read().await.get(id).map(|(doc, _)| doc.clone()))
    }

    async fn get_document_outline(&self, id: &str) -> Result<Option<DocumentOutline>> {
        self.count_read();
        Ok(self
            .documents
            .read()
            .await
            .get(id)
            .map(|(doc, _)| doc.outline.clone()))
    }

    async fn get_chunks_for_document(&self, id: &str) -> Result<Vec<Chunk>> {
        self.count_read();
        Ok(self
            .documents
            .read()
            .await
            .get(id)
            .map(|(_, chunks)| chunks.clone())
            .unwrap_or_default())
    }

    async fn save_document(&self, document: &StoredDocument, chunks: &[Chunk]) -> Result<()> {
        self.documents.write().await.insert(
            document.id().to_string(),
            (document.clone(), chunks.to_vec()),
        );
        Ok(())
    }
}

/// Key-value cache with lazy TTL expiry.
#[derive(Debug)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    endpoint: CacheEndpoint,
    reachable: bool,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new("127.0.0.1", 6379)
    }
}

impl InMemoryCache {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            endpoint: CacheEndpoint {
                host: host.into(),
                port,
            },
            reachable: true,
        }
    }

    /// A cache whose every call fails, standing in for a backend that is down.
    pub fn unreachable<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            reachable: false,
            ..Self::new(host, port)
        }
    }

    fn check(&self) -> Result<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(anyhow!("connection refused"))
        }
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some((value, expires)) if *expires > now => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.check()?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> Result<usize> {
        self.check()?;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }

    fn endpoint(&self) -> CacheEndpoint {
        self.endpoint.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DOCUMENT_ID, Payload};
    use nexus_chunker::RelationshipType;
    use nexus_embed::normalize_to_f16;
    use serde_json::json;

    fn point(id: &str, vector: &[f32], document: &str) -> Point {
        let mut payload = Payload::new();
        payload.insert(DOCUMENT_ID.to_string(), json!(document));
        Point {
            id: id.to_string(),
            vector: Some(normalize_to_f16(vector)),
            payload,
        }
    }

    #[tokio::test]
    async fn test_vector_search_orders_filters_and_thresholds() -> Result<()> {
        let store = InMemoryVectorStore::new();
        store
            .upsert(
                "chunks",
                vec![
                    point("a", &[1.0, 0.0], "doc-1"),
                    point("b", &[0.8, 0.6], "doc-2"),
                    point("c", &[0.0, 1.0], "doc-1"),
                ],
            )
            .await?;

        let query = normalize_to_f16(&[1.0, 0.0]);
        let hits = store.search("chunks", VectorSearch::new(query.clone(), 10)).await?;
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let filtered = VectorSearch::new(query.clone(), 10)
            .with_filter(Some(PayloadFilter::new().with_any(DOCUMENT_ID, ["doc-1"])))
            .with_score_threshold(0.5);
        let hits = store.search("chunks", filtered).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");

        assert!(store.search("missing", VectorSearch::new(query, 10)).await?.is_empty());
        assert_eq!(store.search_count(), 3);

        let removed = store
            .delete_by_filter("chunks", &PayloadFilter::new().with_any(DOCUMENT_ID, ["doc-1"]))
            .await?;
        assert_eq!(removed, 2);
        assert_eq!(store.len("chunks").await, 1);

        let points = store.retrieve("chunks", &["b".to_string(), "zz".to_string()], false).await?;
        assert_eq!(points.len(), 1);
        assert!(points[0].vector.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_graph_traversal_scores_and_depth() -> Result<()> {
        let graph = InMemoryGraphStore::new();
        let edge = |s: &str, t: &str, w: f32| {
            ChunkRelationship::new(s, t, RelationshipType::Follows, w)
        };
        graph
            .upsert_relationships(&[
                edge("seed", "a", 1.0),
                edge("a", "b", 0.5),
                edge("b", "c", 0.5),
                edge("c", "d", 1.0),
                edge("seed", "b", 0.2),
            ])
            .await?;
        assert_eq!(graph.edge_count().await, 5);

        let hits = graph.traverse(&["seed".to_string()], 3, 10).await?;
        let summary: Vec<(&str, usize)> = hits
            .iter()
            .map(|h| (h.chunk_id.as_str(), h.distance))
            .collect();
        // b is reached directly (0.2) but the two-hop path through a is stronger (0.5).
        assert_eq!(summary, vec![("a", 1), ("b", 2), ("c", 3), ("d", 3)]);
        assert!((hits[1].path_score - 0.5).abs() < 1e-6);
        assert!((hits[2].path_score - 0.25).abs() < 1e-6);

        let limited = graph.traverse(&["seed".to_string()], 1, 10).await?;
        assert_eq!(limited.len(), 2);
        assert_eq!(graph.traversal_count(), 2);

        graph.remove_chunks(&["a".to_string()]).await?;
        let hits = graph.traverse(&["seed".to_string()], 3, 10).await?;
        assert_eq!(hits[0].chunk_id, "b");
        assert_eq!(hits[0].distance, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_cache_ttl_and_clear() -> Result<()> {
        let cache = InMemoryCache::default();
        cache.set("retrieval:v1:a", "1".to_string(), Duration::from_secs(60)).await?;
        cache.set("retrieval:v1:b", "2".to_string(), Duration::ZERO).await?;
        cache.set("other", "3".to_string(), Duration::from_secs(60)).await?;

        assert_eq!(cache.get("retrieval:v1:a").await?, Some("1".to_string()));
        assert_eq!(cache.get("retrieval:v1:b").await?, None);
        assert_eq!(cache.clear("retrieval:").await?, 1);
        assert_eq!(cache.len().await, 1);

        let down = InMemoryCache::unreachable("cache.internal", 7000);
        assert!(down.ping().await.is_err());
        assert_eq!(down.endpoint().port, 7000);
        Ok(())
    }
}
