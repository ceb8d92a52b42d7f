use std::collections::HashMap;

use crate::{ContentDigest, StoreError, StoreResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An interning table of distinct blob digests, assigned dense indices in insertion order.
///
/// Bootstraps reference blobs by index rather than by digest, so every bootstrap carries one
/// of these tables. During merge, a single global table is populated incrementally: identical
/// blob digests across layers collapse to one entry by construction, never by a post-hoc
/// deduplication pass. Given the same insertion sequence the table is deterministic.
#[derive(Clone, Debug, Default)]
pub struct BlobIndexTable {
    digests: Vec<ContentDigest>,
    index: HashMap<ContentDigest, u32>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BlobIndexTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table from an existing ordered digest list.
    pub fn from_digests(digests: Vec<ContentDigest>) -> Self {
        let index = digests
            .iter()
            .enumerate()
            .map(|(i, digest)| (*digest, i as u32))
            .collect();

        Self { digests, index }
    }

    /// Returns the index for the given digest, inserting it if it is not present yet.
    pub fn intern(&mut self, digest: ContentDigest) -> u32 {
        if let Some(index) = self.index.get(&digest) {
            return *index;
        }

        let index = self.digests.len() as u32;
        self.digests.push(digest);
        self.index.insert(digest, index);

        index
    }

    /// Reserves a slot for a blob whose digest is not known yet.
    ///
    /// The slot must be filled with [`BlobIndexTable::fill`] before the table is read; a
    /// reserved slot holds a zero digest and is not looked up by `intern`.
    pub fn reserve(&mut self) -> u32 {
        let index = self.digests.len() as u32;
        self.digests.push(ContentDigest::from([0u8; 32]));
        index
    }

    /// Fills a previously reserved slot with the now-known digest.
    pub fn fill(&mut self, index: u32, digest: ContentDigest) -> StoreResult<()> {
        let len = self.digests.len();
        let slot = self
            .digests
            .get_mut(index as usize)
            .ok_or(StoreError::BlobIndexOutOfRange { index, len })?;

        *slot = digest;
        self.index.insert(digest, index);

        Ok(())
    }

    /// Returns the digest at the given index.
    pub fn get(&self, index: u32) -> Option<&ContentDigest> {
        self.digests.get(index as usize)
    }

    /// Returns the ordered digest list.
    pub fn digests(&self) -> &[ContentDigest] {
        &self.digests
    }

    /// Consumes the table and returns the ordered digest list.
    pub fn into_digests(self) -> Vec<ContentDigest> {
        self.digests
    }

    /// Returns the number of blobs in the table.
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    /// Returns `true` if the table holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_table_interns_in_insertion_order() {
        let a = ContentDigest::from_bytes(b"a");
        let b = ContentDigest::from_bytes(b"b");

        let mut table = BlobIndexTable::new();
        assert_eq!(table.intern(a), 0);
        assert_eq!(table.intern(b), 1);
        assert_eq!(table.digests(), &[a, b]);
    }

    #[test]
    fn test_index_table_collapses_duplicates() {
        let a = ContentDigest::from_bytes(b"a");
        let b = ContentDigest::from_bytes(b"b");

        let mut table = BlobIndexTable::new();
        table.intern(a);
        table.intern(b);
        assert_eq!(table.intern(a), 0);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_index_table_reserve_and_fill() -> anyhow::Result<()> {
        let known = ContentDigest::from_bytes(b"known");
        let late = ContentDigest::from_bytes(b"late");

        let mut table = BlobIndexTable::new();
        table.intern(known);
        let slot = table.reserve();

        table.fill(slot, late)?;

        assert_eq!(table.get(slot), Some(&late));
        assert_eq!(table.intern(late), slot);

        Ok(())
    }

    #[test]
    fn test_index_table_fill_out_of_range() {
        let mut table = BlobIndexTable::new();
        let result = table.fill(3, ContentDigest::from_bytes(b"x"));

        assert!(matches!(
            result,
            Err(StoreError::BlobIndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_index_table_from_digests() {
        let a = ContentDigest::from_bytes(b"a");
        let b = ContentDigest::from_bytes(b"b");

        let mut table = BlobIndexTable::from_digests(vec![a, b]);
        assert_eq!(table.intern(b), 1);
        assert_eq!(table.len(), 2);
    }
}
