//! Lookup of the track payloads a peer already holds locally.

use std::collections::HashSet;
use std::io;
use std::path::Path;

use super::ContentHash;

/// Set of content hashes available on one peer.
#[derive(Debug, Clone, Default)]
pub struct TrackCatalog {
    hashes: HashSet<ContentHash>,
}

impl TrackCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from hashes reported by a client.
    pub fn from_hashes<I>(hashes: I) -> Self
    where
        I: IntoIterator<Item = ContentHash>,
    {
        Self {
            hashes: hashes.into_iter().collect(),
        }
    }

    /// Hash every regular file below `root` into a catalog.
    ///
    /// Each file is treated as one track payload. Unreadable entries are skipped
    /// with a warning.
    pub fn scan_dir(root: &Path) -> io::Result<Self> {
        let mut catalog = Self::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let path = match entry {
                    Ok(entry) => entry.path(),
                    Err(e) => {
                        tracing::warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                        continue;
                    }
                };

                if path.is_dir() {
                    pending.push(path);
                    continue;
                }

                match std::fs::read(&path) {
                    Ok(bytes) => {
                        let hash = ContentHash::of(&bytes);
                        tracing::debug!(path = %path.display(), hash = %hash, "Catalogued track payload");
                        catalog.insert(hash);
                    }
                    Err(e) => tracing::warn!("Failed to read {}: {}", path.display(), e),
                }
            }
        }

        tracing::info!("Found {} track payloads in {}", catalog.len(), root.display());
        Ok(catalog)
    }

    /// Record a payload as locally available.
    pub fn insert(&mut self, hash: ContentHash) -> bool {
        self.hashes.insert(hash)
    }

    /// Whether the peer already has the payload with this hash.
    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.hashes.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContentHash> {
        self.hashes.iter()
    }
}

impl FromIterator<ContentHash> for TrackCatalog {
    fn from_iter<I: IntoIterator<Item = ContentHash>>(iter: I) -> Self {
        Self::from_hashes(iter)
    }
}
