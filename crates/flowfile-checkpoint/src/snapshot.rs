//! History snapshot data structures
//!
//! A [`HistorySnapshot`] is an opaque, content-addressed capture of a
//! serialized graph document at one point in time. The `document` bytes are
//! whatever `flowfile-core`'s document serializer produced; this crate never
//! looks inside them.

use crate::error::{Result, SnapshotError};
use serde::{Deserialize, Serialize};

/// One entry in the undo or redo stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySnapshot {
    /// Serialized graph document, optionally zstd-compressed (see `compressed`).
    pub document: Vec<u8>,
    /// Whether `document` is zstd-compressed.
    pub compressed: bool,
    /// Human-readable reason the snapshot was captured (e.g. "add_node", "undo").
    pub reason: String,
    /// Capture time, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Content hash of the *uncompressed* document, used for duplicate detection.
    pub hash: String,
}

impl HistorySnapshot {
    /// Capture a new snapshot from a serialized document.
    ///
    /// `compress` controls whether `document` is stored zstd-compressed; the
    /// hash is always computed over the uncompressed bytes so that
    /// compression settings never affect duplicate detection.
    pub fn capture(document: Vec<u8>, reason: impl Into<String>, compress: bool) -> Result<Self> {
        let hash = hash_document(&document);
        let stored = if compress {
            zstd::encode_all(document.as_slice(), 3)
                .map_err(|e| SnapshotError::Compression(e.to_string()))?
        } else {
            document
        };
        Ok(Self {
            document: stored,
            compressed: compress,
            reason: reason.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            hash,
        })
    }

    /// Recover the original (uncompressed) document bytes.
    pub fn document_bytes(&self) -> Result<Vec<u8>> {
        if self.compressed {
            zstd::decode_all(self.document.as_slice())
                .map_err(|e| SnapshotError::Compression(e.to_string()))
        } else {
            Ok(self.document.clone())
        }
    }
}

/// Stable content hash used for snapshot-equality checks (§4.5's "hash equals
/// the top of the undo stack" rule and the fingerprint-stability property in
/// §8).
pub fn hash_document(document: &[u8]) -> String {
    blake3::hash(document).to_hex().to_string()
}
