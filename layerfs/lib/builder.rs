//! Incremental construction of a bootstrap from an archive entry stream.

use std::collections::{BTreeMap, BTreeSet};

use chunkstore::{BlobIndexTable, ContentDigest};

use crate::{
    bootstrap::{Bootstrap, ChunkRef, Inode, InodeId, InodeKind},
    entry::{EntryMetadata, EntryPath},
    LayerError, LayerResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Builds a bootstrap by consuming archive entries strictly in stream order.
///
/// Directory entries create the directory and any missing ancestors. File and symlink
/// entries require their parent directory to have already appeared in the stream; anything
/// else is a malformed archive. A same-named entry later in the stream replaces the earlier
/// one, matching tar extraction semantics.
///
/// Whiteout and opacity markers are recorded on the parent directory inode so merge can
/// apply them against lower layers; they never become visible children of this layer's own
/// tree.
pub struct BootstrapBuilder {
    /// The inode arena. Replaced inodes linger here until `finish` compacts the tree.
    inodes: Vec<Inode>,

    /// The blob digests chunk references point into.
    blob_table: BlobIndexTable,

    /// The reserved table slot for the blob this conversion is writing, if any chunk
    /// needed it. Filled with the real digest at `finish`.
    local_blob: Option<u32>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BootstrapBuilder {
    /// Creates a builder holding only an empty root directory.
    pub fn new() -> Self {
        Self {
            inodes: vec![Inode::new(
                EntryMetadata::new(0o755, 0, 0, 0, 0),
                InodeKind::Dir {
                    entries: BTreeMap::new(),
                    opaque: false,
                    whiteouts: BTreeSet::new(),
                },
            )],
            blob_table: BlobIndexTable::new(),
            local_blob: None,
        }
    }

    /// Records a directory entry, creating missing ancestors along the way.
    pub fn push_dir(&mut self, path: &EntryPath, metadata: EntryMetadata) -> LayerResult<()> {
        let id = self.ensure_dir(path.components())?;
        self.inodes[id as usize].metadata = metadata;

        Ok(())
    }

    /// Records a regular file entry with its resolved chunk list.
    pub fn push_file(
        &mut self,
        path: &EntryPath,
        metadata: EntryMetadata,
        chunks: Vec<ChunkRef>,
    ) -> LayerResult<()> {
        let (parent, name) = self.split_for_child(path)?;
        let inode = Inode::new(metadata, InodeKind::File { chunks });
        self.insert_child(parent, name, inode);

        Ok(())
    }

    /// Records a symlink entry.
    pub fn push_symlink(
        &mut self,
        path: &EntryPath,
        target: String,
        metadata: EntryMetadata,
    ) -> LayerResult<()> {
        let (parent, name) = self.split_for_child(path)?;
        let inode = Inode::new(metadata, InodeKind::Symlink { target });
        self.insert_child(parent, name, inode);

        Ok(())
    }

    /// Records a whiteout: `name` is deleted from lower layers within `dir`.
    ///
    /// The deletion also applies to an entry this same stream produced earlier under that
    /// name, since a whiteout later in the stream supersedes it.
    pub fn push_whiteout(&mut self, dir: &EntryPath, name: &str) -> LayerResult<()> {
        let id = self.locate_dir(dir)?;

        let InodeKind::Dir {
            entries, whiteouts, ..
        } = &mut self.inodes[id as usize].kind
        else {
            unreachable!("locate_dir only returns directories");
        };

        entries.remove(name);
        whiteouts.insert(name.to_string());

        Ok(())
    }

    /// Records an opacity flag: lower-layer children of `path` are discarded during merge.
    pub fn push_opaque(&mut self, path: &EntryPath) -> LayerResult<()> {
        let id = self.locate_dir(path)?;

        let InodeKind::Dir { opaque, .. } = &mut self.inodes[id as usize].kind else {
            unreachable!("locate_dir only returns directories");
        };
        *opaque = true;

        Ok(())
    }

    /// Interns a known blob digest (a dictionary blob) and returns its table index.
    pub fn intern_blob(&mut self, digest: ContentDigest) -> u32 {
        self.blob_table.intern(digest)
    }

    /// Returns the table index of the blob this conversion is writing, reserving it on
    /// first use. Its digest is only known once the blob writer is finalized.
    pub fn local_blob_index(&mut self) -> u32 {
        match self.local_blob {
            Some(index) => index,
            None => {
                let index = self.blob_table.reserve();
                self.local_blob = Some(index);
                index
            }
        }
    }

    /// Finalizes the tree: fills in the local blob digest, drops replaced inodes, and
    /// validates the result.
    pub fn finish(mut self, local_blob_digest: Option<ContentDigest>) -> LayerResult<Bootstrap> {
        if let Some(index) = self.local_blob {
            let digest = local_blob_digest.ok_or_else(|| {
                LayerError::custom(anyhow::anyhow!(
                    "chunks reference the output blob but no blob digest was supplied"
                ))
            })?;
            self.blob_table.fill(index, digest)?;
        }

        let mut compacted = Vec::with_capacity(self.inodes.len());
        compact(&self.inodes, 0, &mut compacted);

        Bootstrap::from_parts(compacted, self.blob_table.into_digests(), self.local_blob)
    }

    /// Creates or locates the directory at `components`, creating missing ancestors.
    fn ensure_dir(&mut self, components: &[String]) -> LayerResult<InodeId> {
        let mut current: InodeId = 0;

        for component in components {
            let existing = {
                let InodeKind::Dir { entries, .. } = &self.inodes[current as usize].kind else {
                    return Err(LayerError::MalformedArchive(format!(
                        "{:?} is not a directory",
                        component
                    )));
                };
                entries.get(component).copied()
            };

            current = match existing {
                Some(id) if self.inodes[id as usize].is_dir() => id,
                _ => {
                    // Either absent or shadowing a non-directory; a fresh directory takes
                    // the name in both cases.
                    let inode = Inode::new(
                        EntryMetadata::new(0o755, 0, 0, 0, 0),
                        InodeKind::Dir {
                            entries: BTreeMap::new(),
                            opaque: false,
                            whiteouts: BTreeSet::new(),
                        },
                    );
                    self.insert_child(current, component, inode)
                }
            };
        }

        Ok(current)
    }

    /// Locates an existing directory; absent ancestors are a malformed archive.
    fn locate_dir(&self, path: &EntryPath) -> LayerResult<InodeId> {
        let mut current: InodeId = 0;

        for component in path.components() {
            let InodeKind::Dir { entries, .. } = &self.inodes[current as usize].kind else {
                return Err(LayerError::MissingParent(path.to_string()));
            };
            current = *entries
                .get(component)
                .ok_or_else(|| LayerError::MissingParent(path.to_string()))?;
        }

        if !self.inodes[current as usize].is_dir() {
            return Err(LayerError::MissingParent(path.to_string()));
        }

        Ok(current)
    }

    /// Splits a child path into its (existing) parent directory id and final name.
    fn split_for_child<'a>(&mut self, path: &'a EntryPath) -> LayerResult<(InodeId, &'a str)> {
        let (_, name) = path.split_last().ok_or_else(|| {
            LayerError::MalformedArchive("entry path names the root".to_string())
        })?;
        let parent = self.locate_dir(&path.parent())?;

        Ok((parent, name))
    }

    /// Pushes an inode and links it under `parent`, replacing any same-named entry.
    fn insert_child(&mut self, parent: InodeId, name: &str, inode: Inode) -> InodeId {
        let id = self.inodes.len() as InodeId;
        self.inodes.push(inode);

        let InodeKind::Dir { entries, .. } = &mut self.inodes[parent as usize].kind else {
            unreachable!("insert_child callers resolve a directory parent");
        };
        entries.insert(name.to_string(), id);

        id
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Copies the subtree rooted at `id` into `out` in preorder, reassigning dense ids and
/// leaving replaced (unreachable) inodes behind.
fn compact(inodes: &[Inode], id: InodeId, out: &mut Vec<Inode>) -> InodeId {
    let new_id = out.len() as InodeId;
    out.push(inodes[id as usize].clone());

    if let InodeKind::Dir {
        entries,
        opaque,
        whiteouts,
    } = &inodes[id as usize].kind
    {
        let mut new_entries = BTreeMap::new();
        for (name, child) in entries {
            new_entries.insert(name.clone(), compact(inodes, *child, out));
        }
        out[new_id as usize].kind = InodeKind::Dir {
            entries: new_entries,
            opaque: *opaque,
            whiteouts: whiteouts.clone(),
        };
    }

    new_id
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for BootstrapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
