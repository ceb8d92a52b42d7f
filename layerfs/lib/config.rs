//! Constants shared across conversion and merge.

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The current bootstrap format version, written into every encoded bootstrap.
pub const BOOTSTRAP_VERSION: u8 = 1;

/// The OCI whiteout prefix: a layer entry named `.wh.<name>` deletes `<name>` from lower
/// layers.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// The OCI opaque marker: a layer entry with this basename hides all lower-layer children of
/// its directory.
pub const OPAQUE_MARKER: &str = ".wh..wh..opq";

/// The capacity of the in-memory pipe between the caller's archive writes and the conversion
/// pipeline. Bounded so the archive is never materialized in full.
pub const DEFAULT_PIPE_CAPACITY: usize = 512 * 1024;
