//! Chunk dictionary loading.
//!
//! A chunk dictionary is just another bootstrap, typically one built from a base image. Its
//! chunk references are flattened into a digest → location map that conversions consult
//! before writing any chunk of their own, so content shared with the base never lands in a
//! new blob.

use std::{path::Path, sync::Arc};

use chunkstore::{ContentDigest, DictionaryMap};
use tracing::warn;

use crate::{bootstrap::Bootstrap, bootstrap::InodeKind, LayerError, LayerResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A loaded chunk dictionary: every chunk of a reference bootstrap, resolved to an absolute
/// blob location.
///
/// When the same digest appears more than once in the reference tree the first location wins;
/// chunk identity is the digest, so any occurrence serves.
#[derive(Clone, Debug)]
pub struct ChunkDictionary {
    chunks: Arc<DictionaryMap>,
    blobs: Vec<ContentDigest>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ChunkDictionary {
    /// Loads a dictionary from an encoded bootstrap file on disk.
    pub async fn load(path: impl AsRef<Path>) -> LayerResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        let bootstrap = Bootstrap::decode(&bytes)?;

        Ok(Self::from_bootstrap(&bootstrap))
    }

    /// Builds a dictionary from an already decoded bootstrap.
    pub fn from_bootstrap(bootstrap: &Bootstrap) -> Self {
        let mut chunks = DictionaryMap::new();

        for (_, inode) in bootstrap.walk() {
            let InodeKind::File { chunks: refs } = &inode.kind else {
                continue;
            };
            for chunk_ref in refs {
                let Some(location) = chunk_ref.to_location(bootstrap.blobs()) else {
                    continue;
                };
                chunks.entry(chunk_ref.get_digest()).or_insert(location);
            }
        }

        Self {
            chunks: Arc::new(chunks),
            blobs: bootstrap.blobs().to_vec(),
        }
    }

    /// Loads the dictionary at `path`, if one was requested.
    ///
    /// In strict mode a load failure is an error. Otherwise the failure is logged and the
    /// conversion proceeds without deduplication against the dictionary.
    pub async fn load_optional(
        path: Option<&Path>,
        strict: bool,
    ) -> LayerResult<Option<ChunkDictionary>> {
        let Some(path) = path else {
            return Ok(None);
        };

        match Self::load(path).await {
            Result::Ok(dictionary) => Ok(Some(dictionary)),
            Result::Err(e) if strict => {
                Err(LayerError::DictionaryUnavailable(format!("{}: {}", path.display(), e)))
            }
            Result::Err(e) => {
                warn!(path = %path.display(), error = %e, "chunk dictionary unavailable, converting without it");
                Ok(None)
            }
        }
    }

    /// Returns the shared digest → location map.
    pub fn chunk_map(&self) -> Arc<DictionaryMap> {
        Arc::clone(&self.chunks)
    }

    /// Returns the blob digests the dictionary's locations point into.
    pub fn blobs(&self) -> &[ContentDigest] {
        &self.blobs
    }

    /// Returns the number of distinct chunk digests in the dictionary.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns `true` if the dictionary holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chunkstore::Compression;

    use crate::{
        bootstrap::ChunkRef,
        builder::BootstrapBuilder,
        entry::{EntryMetadata, EntryPath},
    };

    use super::*;

    fn reference_bootstrap() -> LayerResult<Bootstrap> {
        let mut builder = BootstrapBuilder::new();
        let blob_index = builder.local_blob_index();

        let chunk_a = ChunkRef::new(
            ContentDigest::from_bytes(b"chunk-a"),
            blob_index,
            0,
            7,
            7,
            Compression::None,
        );
        let chunk_b = ChunkRef::new(
            ContentDigest::from_bytes(b"chunk-b"),
            blob_index,
            7,
            7,
            7,
            Compression::None,
        );

        builder.push_dir(&EntryPath::parse("dir")?, EntryMetadata::new(0o755, 0, 0, 0, 0))?;
        builder.push_file(
            &EntryPath::parse("dir/file")?,
            EntryMetadata::new(0o644, 0, 0, 0, 14),
            vec![chunk_a, chunk_b],
        )?;

        builder.finish(Some(ContentDigest::from_bytes(b"the reference blob")))
    }

    #[test]
    fn test_dictionary_from_bootstrap() -> anyhow::Result<()> {
        let bootstrap = reference_bootstrap()?;
        let dictionary = ChunkDictionary::from_bootstrap(&bootstrap);

        assert_eq!(dictionary.len(), 2);
        assert_eq!(dictionary.blobs(), bootstrap.blobs());

        let location = dictionary
            .chunk_map()
            .get(&ContentDigest::from_bytes(b"chunk-b"))
            .copied()
            .unwrap();
        assert_eq!(location.get_offset(), 7);
        assert_eq!(location.get_blob(), bootstrap.local_blob_digest().unwrap());

        Ok(())
    }

    #[tokio::test]
    async fn test_dictionary_load_from_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dictionary.bootstrap");

        let bootstrap = reference_bootstrap()?;
        tokio::fs::write(&path, bootstrap.encode()?).await?;

        let dictionary = ChunkDictionary::load(&path).await?;
        assert_eq!(dictionary.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_dictionary_missing_file_strict() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("absent.bootstrap");

        let result = ChunkDictionary::load_optional(Some(&path), true).await;
        assert!(matches!(result, Err(LayerError::DictionaryUnavailable(_))));

        Ok(())
    }

    #[tokio::test]
    async fn test_dictionary_missing_file_lenient() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("absent.bootstrap");

        let dictionary = ChunkDictionary::load_optional(Some(&path), false).await?;
        assert!(dictionary.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_dictionary_not_requested() -> anyhow::Result<()> {
        let dictionary = ChunkDictionary::load_optional(None, true).await?;
        assert!(dictionary.is_none());

        Ok(())
    }
}
