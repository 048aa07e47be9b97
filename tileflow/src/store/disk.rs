//! Disk-backed artifact store.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<stage>/<row>_<col>.bin    artifact payload
//! <root>/<stage>/<row>_<col>.json   metadata sidecar (ref)
//! ```
//!
//! Writes are atomic from a reader's perspective: the payload lands in
//! a `.tmp` sibling and is renamed into place, and the metadata sidecar
//! is published the same way *after* the payload. `exists`/`lookup`
//! consult only the sidecar, so a crash mid-write leaves the key
//! incomplete rather than half-visible.

use super::{checksum, ArtifactRef, ArtifactStore, StoreFuture};
use crate::error::StoreError;
use crate::grid::TileId;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Artifact store rooted at a directory on a filesystem shared by all
/// workers (local disk for thread pools, network storage for cluster
/// runs).
#[derive(Clone, Debug)]
pub struct DiskArtifactStore {
    root: PathBuf,
}

impl DiskArtifactStore {
    /// Creates a store rooted at `root`. The directory is created on
    /// first write; it may already contain artifacts from a previous
    /// run of the same footprint, which is how restart works.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn data_path(&self, tile: TileId, stage: &str) -> PathBuf {
        self.root
            .join(stage)
            .join(format!("{}_{}.bin", tile.row, tile.col))
    }

    fn meta_path(&self, tile: TileId, stage: &str) -> PathBuf {
        self.root
            .join(stage)
            .join(format!("{}_{}.json", tile.row, tile.col))
    }

    async fn write_atomic(path: &Path, data: &[u8], attempt: u32) -> Result<(), StoreError> {
        let tmp = path.with_extension(format!("a{attempt}.tmp"));
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_meta(&self, tile: TileId, stage: &str) -> Option<ArtifactRef> {
        let raw = fs::read(self.meta_path(tile, stage)).await.ok()?;
        serde_json::from_slice(&raw).ok()
    }
}

impl ArtifactStore for DiskArtifactStore {
    fn put(
        &self,
        tile: TileId,
        stage: &str,
        attempt: u32,
        data: Bytes,
    ) -> StoreFuture<'_, Result<ArtifactRef, StoreError>> {
        let stage = stage.to_string();
        Box::pin(async move {
            if self.read_meta(tile, &stage).await.is_some() {
                return Err(StoreError::AlreadyExists { tile, stage });
            }

            fs::create_dir_all(self.root.join(&stage)).await?;

            let artifact = ArtifactRef {
                tile,
                stage: stage.clone(),
                attempt,
                checksum: checksum(&data),
            };

            // Payload first, sidecar last: the key becomes visible only
            // once both renames have landed.
            Self::write_atomic(&self.data_path(tile, &stage), &data, attempt).await?;
            let meta = serde_json::to_vec(&artifact)
                .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
            Self::write_atomic(&self.meta_path(tile, &stage), &meta, attempt).await?;

            debug!(
                tile_row = tile.row,
                tile_col = tile.col,
                stage = %stage,
                attempt,
                bytes = data.len(),
                "Artifact stored"
            );

            Ok(artifact)
        })
    }

    fn get<'a>(&'a self, artifact: &'a ArtifactRef) -> StoreFuture<'a, Result<Bytes, StoreError>> {
        Box::pin(async move {
            let path = self.data_path(artifact.tile, &artifact.stage);
            let data = match fs::read(&path).await {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StoreError::NotFound {
                        tile: artifact.tile,
                        stage: artifact.stage.clone(),
                    });
                }
                Err(e) => return Err(StoreError::Io(e)),
            };

            if checksum(&data) != artifact.checksum {
                return Err(StoreError::Corrupt {
                    tile: artifact.tile,
                    stage: artifact.stage.clone(),
                });
            }
            Ok(Bytes::from(data))
        })
    }

    fn exists<'a>(&'a self, tile: TileId, stage: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { self.read_meta(tile, stage).await.is_some() })
    }

    fn lookup<'a>(
        &'a self,
        tile: TileId,
        stage: &'a str,
    ) -> StoreFuture<'a, Option<ArtifactRef>> {
        Box::pin(async move { self.read_meta(tile, stage).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, DiskArtifactStore) {
        let dir = TempDir::new().unwrap();
        let store = DiskArtifactStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (_dir, store) = store();
        let tile = TileId::new(5, 6);

        let artifact = store
            .put(tile, "rasterize", 1, Bytes::from_static(b"dsm cell block"))
            .await
            .unwrap();

        let data = store.get(&artifact).await.unwrap();
        assert_eq!(data, Bytes::from_static(b"dsm cell block"));
        assert!(store.exists(tile, "rasterize").await);
    }

    #[tokio::test]
    async fn test_partial_write_not_observable() {
        let (dir, store) = store();
        let tile = TileId::new(0, 0);

        // Simulate a crash between payload and sidecar: payload file
        // present, no metadata.
        fs::create_dir_all(dir.path().join("match")).await.unwrap();
        fs::write(dir.path().join("match").join("0_0.bin"), b"partial")
            .await
            .unwrap();

        assert!(!store.exists(tile, "match").await);
        assert!(store.lookup(tile, "match").await.is_none());

        // A fresh put over the orphaned payload still succeeds.
        let artifact = store
            .put(tile, "match", 1, Bytes::from_static(b"complete"))
            .await
            .unwrap();
        assert_eq!(
            store.get(&artifact).await.unwrap(),
            Bytes::from_static(b"complete")
        );
    }

    #[tokio::test]
    async fn test_write_once() {
        let (_dir, store) = store();
        let tile = TileId::new(1, 2);

        store.put(tile, "match", 1, Bytes::new()).await.unwrap();
        assert!(matches!(
            store.put(tile, "match", 2, Bytes::new()).await,
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_corruption_surfaced_not_retried() {
        let (dir, store) = store();
        let tile = TileId::new(3, 3);

        let artifact = store
            .put(tile, "triangulate", 1, Bytes::from_static(b"cloud"))
            .await
            .unwrap();

        // Flip the on-disk content behind the store's back.
        fs::write(dir.path().join("triangulate").join("3_3.bin"), b"garbage")
            .await
            .unwrap();

        assert!(matches!(
            store.get(&artifact).await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_restart_lookup_survives_new_instance() {
        let (dir, store) = store();
        let tile = TileId::new(7, 8);
        store
            .put(tile, "resample", 1, Bytes::from_static(b"grid"))
            .await
            .unwrap();

        // A brand-new store instance over the same root sees the key.
        let reopened = DiskArtifactStore::new(dir.path());
        let found = reopened.lookup(tile, "resample").await.unwrap();
        assert_eq!(found.attempt, 1);
        assert_eq!(
            reopened.get(&found).await.unwrap(),
            Bytes::from_static(b"grid")
        );
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_dir, store) = store();
        let artifact = ArtifactRef {
            tile: TileId::new(9, 9),
            stage: "match".to_string(),
            attempt: 1,
            checksum: checksum(b""),
        };
        assert!(matches!(
            store.get(&artifact).await,
            Err(StoreError::NotFound { .. })
        ));
    }
}
