//! In-memory artifact store for tests and dry runs.

use super::{checksum, ArtifactRef, ArtifactStore, StoreFuture};
use crate::error::StoreError;
use crate::grid::TileId;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Artifact store backed by a concurrent map.
///
/// Mirrors the disk backend's semantics (write-once keys, checksum
/// verification) without touching the filesystem. Also counts puts,
/// which the idempotence tests use to assert zero re-invocations.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: DashMap<(TileId, String), (ArtifactRef, Bytes)>,
    puts: AtomicU64,
}

impl MemoryArtifactStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed artifacts.
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Returns true if no artifacts are stored.
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Total successful `put` calls.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Overwrites the stored bytes for a key without updating the ref.
    /// Test hook for simulating on-disk corruption.
    #[cfg(test)]
    pub(crate) fn corrupt(&self, tile: TileId, stage: &str, data: Bytes) {
        if let Some(mut entry) = self.artifacts.get_mut(&(tile, stage.to_string())) {
            entry.1 = data;
        }
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(
        &self,
        tile: TileId,
        stage: &str,
        attempt: u32,
        data: Bytes,
    ) -> StoreFuture<'_, Result<ArtifactRef, StoreError>> {
        let key = (tile, stage.to_string());
        Box::pin(async move {
            if self.artifacts.contains_key(&key) {
                return Err(StoreError::AlreadyExists {
                    tile,
                    stage: key.1,
                });
            }
            let artifact = ArtifactRef {
                tile,
                stage: key.1.clone(),
                attempt,
                checksum: checksum(&data),
            };
            self.artifacts.insert(key, (artifact.clone(), data));
            self.puts.fetch_add(1, Ordering::Relaxed);
            Ok(artifact)
        })
    }

    fn get<'a>(&'a self, artifact: &'a ArtifactRef) -> StoreFuture<'a, Result<Bytes, StoreError>> {
        Box::pin(async move {
            let key = (artifact.tile, artifact.stage.clone());
            let entry = self.artifacts.get(&key).ok_or_else(|| StoreError::NotFound {
                tile: artifact.tile,
                stage: artifact.stage.clone(),
            })?;
            let data = entry.1.clone();
            if checksum(&data) != artifact.checksum {
                return Err(StoreError::Corrupt {
                    tile: artifact.tile,
                    stage: artifact.stage.clone(),
                });
            }
            Ok(data)
        })
    }

    fn exists<'a>(&'a self, tile: TileId, stage: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { self.artifacts.contains_key(&(tile, stage.to_string())) })
    }

    fn lookup<'a>(
        &'a self,
        tile: TileId,
        stage: &'a str,
    ) -> StoreFuture<'a, Option<ArtifactRef>> {
        Box::pin(async move {
            self.artifacts
                .get(&(tile, stage.to_string()))
                .map(|e| e.0.clone())
        })
    }
}
