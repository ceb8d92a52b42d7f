//! Merging layer bootstraps into one flattened tree.
//!
//! Layers are ordered lowest to highest and overlaid with OCI overlay semantics: a whiteout
//! deletes the lower entry and its subtree, an opaque directory discards all accumulated
//! lower children, and a same-named upper entry replaces the lower one unless both are
//! directories, in which case their children merge. The result is a single bootstrap with
//! a global blob table, no overlay markers, and no local blob.

use std::{
    collections::BTreeMap,
    io::Cursor,
    path::PathBuf,
};

use chunkstore::{BlobIndexTable, ChunkLocation, ContentDigest};
use futures::future::try_join_all;
use getset::Getters;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::{
    bootstrap::{Bootstrap, ChunkRef, Inode, InodeId, InodeKind},
    dictionary::ChunkDictionary,
    entry::EntryMetadata,
    LayerError, LayerResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One input layer: its published blob digest and a reader over its encoded bootstrap.
pub struct Layer<R> {
    blob_digest: ContentDigest,
    bootstrap: R,
}

/// Options controlling a merge.
#[derive(Clone, Debug, Default, TypedBuilder)]
pub struct MergeOptions {
    /// Path to the chunk dictionary bootstrap the layers were converted against, if any.
    /// Its blobs are placed at the front of the merged blob table.
    #[builder(default, setter(strip_option, into))]
    chunk_dictionary: Option<PathBuf>,
}

/// The result of a merge.
#[derive(Debug, Getters)]
pub struct MergeOutcome {
    /// The flattened bootstrap.
    #[getset(get = "pub with_prefix")]
    bootstrap: Bootstrap,
}

/// A chunk reference resolved to an absolute blob location, so it survives re-indexing onto
/// the merged blob table.
#[derive(Clone, Copy, Debug)]
struct ResolvedChunk {
    digest: ContentDigest,
    location: ChunkLocation,
}

/// The mutable tree the layers are overlaid onto before flattening.
struct OverlayNode {
    metadata: EntryMetadata,
    kind: OverlayKind,
}

enum OverlayKind {
    File(Vec<ResolvedChunk>),
    Dir(BTreeMap<String, OverlayNode>),
    Symlink(String),
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Merges the given layers, lowest first, into one flattened bootstrap.
///
/// Every bootstrap is decoded concurrently and checked against its layer's declared blob
/// digest before any overlay work happens, so a mismatched layer fails the whole merge.
pub async fn merge<R>(layers: Vec<Layer<R>>, options: MergeOptions) -> LayerResult<MergeOutcome>
where
    R: AsyncRead + Send + Unpin,
{
    if layers.is_empty() {
        return Err(LayerError::EmptyLayerList);
    }
    let layer_count = layers.len();

    let dictionary = match options.chunk_dictionary.as_deref() {
        Some(path) => Some(ChunkDictionary::load(path).await.map_err(|e| {
            LayerError::DictionaryUnavailable(format!("{}: {}", path.display(), e))
        })?),
        None => None,
    };

    let bootstraps = try_join_all(
        layers
            .into_iter()
            .enumerate()
            .map(|(index, layer)| decode_layer(index, layer)),
    )
    .await?;

    let mut root = OverlayNode {
        metadata: bootstraps[0].root().metadata,
        kind: OverlayKind::Dir(BTreeMap::new()),
    };
    for bootstrap in &bootstraps {
        root.metadata = bootstrap.root().metadata;
        let OverlayKind::Dir(children) = &mut root.kind else {
            unreachable!("the overlay root is always a directory");
        };
        apply_dir(children, bootstrap, 0)?;
    }

    let mut blob_table = BlobIndexTable::new();
    if let Some(dictionary) = &dictionary {
        for blob in dictionary.blobs() {
            blob_table.intern(*blob);
        }
    }

    let mut inodes = Vec::new();
    flatten(&root, &mut inodes, &mut blob_table);
    let bootstrap = Bootstrap::from_parts(inodes, blob_table.into_digests(), None)?;

    debug!(
        layers = layer_count,
        inodes = bootstrap.inode_count(),
        blobs = bootstrap.blobs().len(),
        "merge finished"
    );

    Ok(MergeOutcome { bootstrap })
}

/// Reads and decodes one layer's bootstrap and verifies its blob digest.
async fn decode_layer<R>(index: usize, layer: Layer<R>) -> LayerResult<Bootstrap>
where
    R: AsyncRead + Send + Unpin,
{
    let mut source = layer.bootstrap;
    let mut bytes = Vec::new();
    source.read_to_end(&mut bytes).await?;

    let bootstrap = Bootstrap::decode(&bytes)?;

    // A bootstrap without a local blob wrote no payload of its own; there is nothing to
    // check it against.
    if let Some(referenced) = bootstrap.local_blob_digest() {
        if referenced != layer.blob_digest {
            return Err(LayerError::BlobDigestMismatch {
                layer: index,
                declared: layer.blob_digest,
                referenced,
            });
        }
    }

    Ok(bootstrap)
}

/// Overlays one bootstrap directory onto the accumulated children.
fn apply_dir(
    acc: &mut BTreeMap<String, OverlayNode>,
    bootstrap: &Bootstrap,
    id: InodeId,
) -> LayerResult<()> {
    let Some(Inode {
        kind:
            InodeKind::Dir {
                entries,
                opaque,
                whiteouts,
            },
        ..
    }) = bootstrap.get(id)
    else {
        unreachable!("apply_dir callers resolve a directory inode");
    };

    if *opaque {
        acc.clear();
    }
    for name in whiteouts {
        acc.remove(name);
    }

    for (name, child_id) in entries {
        let child = bootstrap
            .get(*child_id)
            .ok_or_else(|| LayerError::InvalidBootstrap(format!("missing inode {}", child_id)))?;

        match (&child.kind, acc.get_mut(name)) {
            (
                InodeKind::Dir { .. },
                Some(OverlayNode {
                    metadata,
                    kind: OverlayKind::Dir(existing),
                }),
            ) => {
                *metadata = child.metadata;
                apply_dir(existing, bootstrap, *child_id)?;
            }
            _ => {
                acc.insert(name.clone(), to_overlay(bootstrap, *child_id)?);
            }
        }
    }

    Ok(())
}

/// Converts a bootstrap subtree into overlay nodes, resolving chunk references to absolute
/// locations.
fn to_overlay(bootstrap: &Bootstrap, id: InodeId) -> LayerResult<OverlayNode> {
    let inode = bootstrap
        .get(id)
        .ok_or_else(|| LayerError::InvalidBootstrap(format!("missing inode {}", id)))?;

    let kind = match &inode.kind {
        InodeKind::File { chunks } => {
            let mut resolved = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                let location = chunk.to_location(bootstrap.blobs()).ok_or_else(|| {
                    LayerError::InvalidBootstrap(format!(
                        "chunk references missing blob index {}",
                        chunk.get_blob_index()
                    ))
                })?;
                resolved.push(ResolvedChunk {
                    digest: chunk.get_digest(),
                    location,
                });
            }
            OverlayKind::File(resolved)
        }
        InodeKind::Dir { entries, .. } => {
            let mut children = BTreeMap::new();
            for (name, child_id) in entries {
                children.insert(name.clone(), to_overlay(bootstrap, *child_id)?);
            }
            OverlayKind::Dir(children)
        }
        InodeKind::Symlink { target } => OverlayKind::Symlink(target.clone()),
    };

    Ok(OverlayNode {
        metadata: inode.metadata,
        kind,
    })
}

/// Copies the overlay tree into a dense inode arena in preorder, re-indexing every chunk
/// onto the merged blob table. Overlay markers do not survive: the merged tree has no
/// whiteouts and no opaque directories.
fn flatten(node: &OverlayNode, inodes: &mut Vec<Inode>, blob_table: &mut BlobIndexTable) -> InodeId {
    let id = inodes.len() as InodeId;

    let kind = match &node.kind {
        OverlayKind::File(_) => InodeKind::File { chunks: Vec::new() },
        OverlayKind::Dir(_) => InodeKind::Dir {
            entries: BTreeMap::new(),
            opaque: false,
            whiteouts: Default::default(),
        },
        OverlayKind::Symlink(target) => InodeKind::Symlink {
            target: target.clone(),
        },
    };
    inodes.push(Inode::new(node.metadata, kind));

    match &node.kind {
        OverlayKind::File(resolved) => {
            let chunks = resolved
                .iter()
                .map(|chunk| {
                    let blob_index = blob_table.intern(chunk.location.get_blob());
                    ChunkRef::new(
                        chunk.digest,
                        blob_index,
                        chunk.location.get_offset(),
                        chunk.location.get_compressed_size(),
                        chunk.location.get_uncompressed_size(),
                        chunk.location.get_compression(),
                    )
                })
                .collect();
            inodes[id as usize].kind = InodeKind::File { chunks };
        }
        OverlayKind::Dir(children) => {
            let mut entries = BTreeMap::new();
            for (name, child) in children {
                entries.insert(name.clone(), flatten(child, inodes, blob_table));
            }
            let InodeKind::Dir {
                entries: slot, ..
            } = &mut inodes[id as usize].kind
            else {
                unreachable!("the placeholder kind matches the overlay kind");
            };
            *slot = entries;
        }
        OverlayKind::Symlink(_) => {}
    }

    id
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<R> Layer<R> {
    /// Creates a new merge input layer.
    pub fn new(blob_digest: ContentDigest, bootstrap: R) -> Self {
        Self {
            blob_digest,
            bootstrap,
        }
    }
}

impl MergeOutcome {
    /// Encodes the merged bootstrap.
    pub fn encode(&self) -> LayerResult<Vec<u8>> {
        self.bootstrap.encode()
    }

    /// Consumes the outcome and returns an async reader over the encoded bootstrap.
    pub fn into_reader(self) -> LayerResult<Cursor<Vec<u8>>> {
        Ok(Cursor::new(self.encode()?))
    }

    /// Consumes the outcome and returns the merged bootstrap.
    pub fn into_bootstrap(self) -> Bootstrap {
        self.bootstrap
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
