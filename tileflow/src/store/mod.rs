//! Artifact storage.
//!
//! Every completed task produces exactly one artifact, keyed by
//! (tile, stage). Artifacts are write-once: once a key is marked
//! complete it is never mutated, only read by downstream tasks and by
//! future runs restarting over the same footprint.
//!
//! Backends implement [`ArtifactStore`], a minimal byte-oriented trait
//! kept dyn-compatible with `Pin<Box<dyn Future>>` methods so the
//! scheduler and worker pools can hold `Arc<dyn ArtifactStore>`.
//!
//! Atomicity contract: a partially written artifact must never be
//! observable through `exists`/`lookup`. The disk backend writes data
//! to a temporary sibling and renames, then publishes a metadata
//! sidecar last.

mod disk;
mod memory;

use crate::error::StoreError;
use crate::grid::TileId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::pin::Pin;

pub use disk::DiskArtifactStore;
pub use memory::MemoryArtifactStore;

/// Boxed future type for dyn-compatible store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handle to a completed artifact.
///
/// Refs are cheap to clone and serialize into the persisted run state.
/// The checksum pins the exact content: a mismatch on read means the
/// stored artifact is corrupt, which is fatal rather than retryable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Tile that produced the artifact.
    pub tile: TileId,
    /// Stage name (stable across runs, unlike stage indices under
    /// pipeline edits).
    pub stage: String,
    /// The successful attempt number (1-based).
    pub attempt: u32,
    /// Hex-encoded SHA-256 of the content.
    pub checksum: String,
}

/// Computes the hex SHA-256 checksum of an artifact payload.
pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Persistent, write-once artifact storage keyed by (tile, stage).
pub trait ArtifactStore: Send + Sync + 'static {
    /// Stores a completed artifact.
    ///
    /// Returns [`StoreError::AlreadyExists`] if the key is already
    /// complete; exactly one successful attempt may publish per key.
    fn put(
        &self,
        tile: TileId,
        stage: &str,
        attempt: u32,
        data: Bytes,
    ) -> StoreFuture<'_, Result<ArtifactRef, StoreError>>;

    /// Retrieves an artifact, verifying its checksum.
    fn get<'a>(&'a self, artifact: &'a ArtifactRef) -> StoreFuture<'a, Result<Bytes, StoreError>>;

    /// Returns true if a completed artifact exists for the key.
    fn exists<'a>(&'a self, tile: TileId, stage: &'a str) -> StoreFuture<'a, bool>;

    /// Returns the ref for a completed key, if present. Used to seed
    /// pre-`Done` tasks on restart.
    fn lookup<'a>(
        &'a self,
        tile: TileId,
        stage: &'a str,
    ) -> StoreFuture<'a, Option<ArtifactRef>>;
}
