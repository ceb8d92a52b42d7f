//! The archive entry model: a closed set of entry kinds a layer stream can contain.

use std::fmt::{self, Display};

use getset::CopyGetters;
use serde::{Deserialize, Serialize};

use crate::{
    config::{OPAQUE_MARKER, WHITEOUT_PREFIX},
    LayerError, LayerResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A normalized, relative archive path: non-empty UTF-8 components with no `.` or `..`.
///
/// The empty component list is the root directory.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntryPath(Vec<String>);

/// The attributes carried by an archive entry header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, CopyGetters)]
#[getset(get_copy = "pub with_prefix")]
pub struct EntryMetadata {
    /// Unix permission bits.
    mode: u32,

    /// Owning user id.
    uid: u64,

    /// Owning group id.
    gid: u64,

    /// Modification time, seconds since the epoch.
    mtime: u64,

    /// Content size in bytes. Zero for directories and symlinks.
    size: u64,
}

/// The raw kind of a tar entry, before marker classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TarEntryKind {
    /// A regular file.
    Regular,

    /// A directory.
    Directory,

    /// A symbolic link.
    Symlink,

    /// Any other tar entry type. Skipped by the pipeline.
    Other,
}

/// One classified archive entry.
///
/// This is the closed set of entry kinds the bootstrap builder handles; a single exhaustive
/// `match` processes them all. Whiteout and opaque markers follow the OCI overlay
/// convention: they describe deletions relative to lower layers and never become visible
/// inodes in the layer's own tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchiveEntry {
    /// A directory.
    Dir {
        /// The directory path.
        path: EntryPath,
        /// Header attributes.
        metadata: EntryMetadata,
    },

    /// A regular file. Content is read separately from the archive stream.
    File {
        /// The file path.
        path: EntryPath,
        /// Header attributes.
        metadata: EntryMetadata,
    },

    /// A symbolic link.
    Symlink {
        /// The link path.
        path: EntryPath,
        /// The link target, stored verbatim.
        target: String,
        /// Header attributes.
        metadata: EntryMetadata,
    },

    /// A whiteout marker: `name` is deleted from lower layers within `dir`.
    Whiteout {
        /// The directory the deletion applies in.
        dir: EntryPath,
        /// The deleted name.
        name: String,
    },

    /// An opaque marker: all lower-layer children of `path` are hidden.
    OpaqueDir {
        /// The directory made opaque.
        path: EntryPath,
    },
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl EntryPath {
    /// Parses and normalizes a raw archive path.
    ///
    /// Leading `/` and `./` segments and trailing `/` are dropped. `..` components are a
    /// malformed-archive error: a layer must not escape its own root.
    pub fn parse(raw: &str) -> LayerResult<Self> {
        let mut components = Vec::new();

        for component in raw.split('/') {
            match component {
                "" | "." => continue,
                ".." => {
                    return Err(LayerError::MalformedArchive(format!(
                        "path {:?} escapes the layer root",
                        raw
                    )))
                }
                _ => components.push(component.to_string()),
            }
        }

        Ok(Self(components))
    }

    /// Returns the path components.
    pub fn components(&self) -> &[String] {
        &self.0
    }

    /// Returns `true` if this is the root directory.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Splits into parent components and final name. `None` for the root.
    pub fn split_last(&self) -> Option<(&[String], &str)> {
        self.0
            .split_last()
            .map(|(name, parent)| (parent, name.as_str()))
    }

    /// Returns the parent path. The root is its own parent.
    pub fn parent(&self) -> EntryPath {
        match self.0.split_last() {
            Some((_, parent)) => EntryPath(parent.to_vec()),
            None => EntryPath(Vec::new()),
        }
    }
}

impl EntryMetadata {
    /// Creates new entry metadata.
    pub fn new(mode: u32, uid: u64, gid: u64, mtime: u64, size: u64) -> Self {
        Self {
            mode,
            uid,
            gid,
            mtime,
            size,
        }
    }
}

impl ArchiveEntry {
    /// Classifies a raw tar entry into the closed entry set.
    ///
    /// Returns `Ok(None)` for tar entry types outside the set (fifos, devices, hard links),
    /// which the pipeline skips. Marker classification is name-based and applies before the
    /// kind is considered, per the OCI overlay convention.
    pub fn classify(
        raw_path: &str,
        kind: TarEntryKind,
        link_target: Option<String>,
        metadata: EntryMetadata,
    ) -> LayerResult<Option<ArchiveEntry>> {
        let path = EntryPath::parse(raw_path)?;

        if let Some((_, name)) = path.split_last() {
            if name == OPAQUE_MARKER {
                return Ok(Some(ArchiveEntry::OpaqueDir {
                    path: path.parent(),
                }));
            }

            if let Some(deleted) = name.strip_prefix(WHITEOUT_PREFIX) {
                if deleted.is_empty() {
                    return Err(LayerError::MalformedArchive(format!(
                        "whiteout {:?} names nothing",
                        raw_path
                    )));
                }

                return Ok(Some(ArchiveEntry::Whiteout {
                    dir: path.parent(),
                    name: deleted.to_string(),
                }));
            }
        }

        match kind {
            TarEntryKind::Directory => Ok(Some(ArchiveEntry::Dir { path, metadata })),
            TarEntryKind::Regular => {
                if path.is_root() {
                    return Err(LayerError::MalformedArchive(
                        "regular file entry with empty path".to_string(),
                    ));
                }
                Ok(Some(ArchiveEntry::File { path, metadata }))
            }
            TarEntryKind::Symlink => {
                let target = link_target.ok_or_else(|| {
                    LayerError::MalformedArchive(format!(
                        "symlink {:?} has no link target",
                        raw_path
                    ))
                })?;
                Ok(Some(ArchiveEntry::Symlink {
                    path,
                    target,
                    metadata,
                }))
            }
            TarEntryKind::Other => Ok(None),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.0.join("/"))
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_normalization() -> anyhow::Result<()> {
        assert_eq!(
            EntryPath::parse("./dir-1/file-1")?.components(),
            &["dir-1", "file-1"]
        );
        assert_eq!(EntryPath::parse("dir-1/")?.components(), &["dir-1"]);
        assert_eq!(EntryPath::parse("/a//b")?.components(), &["a", "b"]);
        assert!(EntryPath::parse("")?.is_root());
        assert!(EntryPath::parse("./")?.is_root());

        Ok(())
    }

    #[test]
    fn test_path_rejects_parent_escapes() {
        assert!(matches!(
            EntryPath::parse("a/../b"),
            Err(LayerError::MalformedArchive(_))
        ));
    }

    #[test]
    fn test_classify_regular_entries() -> anyhow::Result<()> {
        let metadata = EntryMetadata::default();

        let file =
            ArchiveEntry::classify("dir-1/file-1", TarEntryKind::Regular, None, metadata)?;
        assert!(matches!(file, Some(ArchiveEntry::File { .. })));

        let dir = ArchiveEntry::classify("dir-1/", TarEntryKind::Directory, None, metadata)?;
        assert!(matches!(dir, Some(ArchiveEntry::Dir { .. })));

        let symlink = ArchiveEntry::classify(
            "dir-1/link",
            TarEntryKind::Symlink,
            Some("file-1".to_string()),
            metadata,
        )?;
        assert!(matches!(symlink, Some(ArchiveEntry::Symlink { ref target, .. }) if target == "file-1"));

        Ok(())
    }

    #[test]
    fn test_classify_whiteout() -> anyhow::Result<()> {
        let entry = ArchiveEntry::classify(
            "dir-1/.wh.file-1",
            TarEntryKind::Regular,
            None,
            EntryMetadata::default(),
        )?;

        match entry {
            Some(ArchiveEntry::Whiteout { dir, name }) => {
                assert_eq!(dir.components(), &["dir-1"]);
                assert_eq!(name, "file-1");
            }
            other => panic!("expected whiteout, got {:?}", other),
        }

        Ok(())
    }

    #[test]
    fn test_classify_opaque_marker() -> anyhow::Result<()> {
        let entry = ArchiveEntry::classify(
            "dir-2/.wh..wh..opq",
            TarEntryKind::Regular,
            None,
            EntryMetadata::default(),
        )?;

        match entry {
            Some(ArchiveEntry::OpaqueDir { path }) => {
                assert_eq!(path.components(), &["dir-2"]);
            }
            other => panic!("expected opaque marker, got {:?}", other),
        }

        Ok(())
    }

    #[test]
    fn test_classify_skips_unsupported_kinds() -> anyhow::Result<()> {
        let entry = ArchiveEntry::classify(
            "dev/null",
            TarEntryKind::Other,
            None,
            EntryMetadata::default(),
        )?;

        assert!(entry.is_none());

        Ok(())
    }

    #[test]
    fn test_classify_symlink_without_target() {
        let result = ArchiveEntry::classify(
            "broken",
            TarEntryKind::Symlink,
            None,
            EntryMetadata::default(),
        );

        assert!(matches!(result, Err(LayerError::MalformedArchive(_))));
    }

    #[test]
    fn test_classify_empty_whiteout_name() {
        let result = ArchiveEntry::classify(
            "dir/.wh.",
            TarEntryKind::Regular,
            None,
            EntryMetadata::default(),
        );

        assert!(matches!(result, Err(LayerError::MalformedArchive(_))));
    }
}
