//! In-process vector backend with exact cosine search.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{CollectionName, Distance, IndexedPoint, ScoredPoint, VectorBackend};
use crate::embeddings::ChunkRecord;
use crate::error::{Error, Result};

struct Collection {
    dimensions: usize,
    points: Vec<IndexedPoint>,
}

/// Thread-safe in-memory backend; points keep insertion order.
#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Collection>> {
        self.collections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Collection>> {
        self.collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every stored payload in insertion order.
    pub fn payloads(&self, name: &CollectionName) -> Vec<ChunkRecord> {
        self.read()
            .get(name.as_str())
            .map(|c| c.points.iter().map(|p| p.payload.clone()).collect())
            .unwrap_or_default()
    }
}

fn not_found(name: &CollectionName) -> Error {
    Error::Remote {
        status: 404,
        body: format!("collection {name} not found"),
    }
}

/// Cosine similarity; zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0f32;
    let mut norm_a = 0f32;
    let mut norm_b = 0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

impl VectorBackend for MemoryBackend {
    fn collection_exists(&self, name: &CollectionName) -> Result<bool> {
        Ok(self.read().contains_key(name.as_str()))
    }

    fn create_collection(
        &self,
        name: &CollectionName,
        dimensions: usize,
        _distance: Distance,
    ) -> Result<()> {
        let mut collections = self.write();
        if collections.contains_key(name.as_str()) {
            return Err(Error::Remote {
                status: 409,
                body: format!("collection {name} already exists"),
            });
        }
        collections.insert(
            name.as_str().to_string(),
            Collection {
                dimensions,
                points: Vec::new(),
            },
        );
        Ok(())
    }

    fn delete_collection(&self, name: &CollectionName) -> Result<bool> {
        Ok(self.write().remove(name.as_str()).is_some())
    }

    fn upsert(&self, name: &CollectionName, points: &[IndexedPoint]) -> Result<()> {
        let mut collections = self.write();
        let collection = collections
            .get_mut(name.as_str())
            .ok_or_else(|| not_found(name))?;
        if let Some(bad) = points
            .iter()
            .find(|p| p.vector.len() != collection.dimensions)
        {
            return Err(Error::Remote {
                status: 400,
                body: format!(
                    "point {} has {} dimensions, collection expects {}",
                    bad.id,
                    bad.vector.len(),
                    collection.dimensions
                ),
            });
        }
        for point in points {
            match collection.points.iter_mut().find(|p| p.id == point.id) {
                Some(existing) => *existing = point.clone(),
                None => collection.points.push(point.clone()),
            }
        }
        Ok(())
    }

    fn search(
        &self,
        name: &CollectionName,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.read();
        let collection = collections.get(name.as_str()).ok_or_else(|| not_found(name))?;
        let mut hits: Vec<ScoredPoint> = collection
            .points
            .iter()
            .map(|point| ScoredPoint {
                id: point.id.to_string(),
                score: cosine_similarity(vector, &point.vector),
                payload: point.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    fn count(&self, name: &CollectionName) -> Result<usize> {
        self.read()
            .get(name.as_str())
            .map(|c| c.points.len())
            .ok_or_else(|| not_found(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::point_id;

    fn point(id: &str, vector: Vec<f32>) -> IndexedPoint {
        IndexedPoint {
            id: point_id(id),
            vector,
            payload: ChunkRecord::new("p", 0, "T", 0, 1, id),
        }
    }

    #[test]
    fn cosine_handles_parallel_orthogonal_and_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn search_orders_by_descending_similarity() {
        let backend = MemoryBackend::new();
        let name = CollectionName::new("c").unwrap();
        backend.create_collection(&name, 2, Distance::Cosine).unwrap();
        backend
            .upsert(
                &name,
                &[
                    point("far", vec![0.0, 1.0]),
                    point("near", vec![1.0, 0.1]),
                    point("mid", vec![1.0, 1.0]),
                ],
            )
            .unwrap();
        let hits = backend.search(&name, &[1.0, 0.0], 2).unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.payload.text.as_str()).collect();
        assert_eq!(texts, vec!["near", "mid"]);
    }

    #[test]
    fn upsert_overwrites_same_id() {
        let backend = MemoryBackend::new();
        let name = CollectionName::new("c").unwrap();
        backend.create_collection(&name, 1, Distance::Cosine).unwrap();
        backend.upsert(&name, &[point("a", vec![1.0])]).unwrap();
        backend.upsert(&name, &[point("a", vec![-1.0])]).unwrap();
        assert_eq!(backend.count(&name).unwrap(), 1);
    }

    #[test]
    fn missing_collection_is_not_found() {
        let backend = MemoryBackend::new();
        let name = CollectionName::new("nope").unwrap();
        assert!(!backend.delete_collection(&name).unwrap());
        assert!(matches!(
            backend.search(&name, &[1.0], 1),
            Err(Error::Remote { status: 404, .. })
        ));
    }
}
