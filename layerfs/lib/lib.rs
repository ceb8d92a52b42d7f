//! `layerfs` converts OCI layer archives into a chunk-deduplicated, content-addressed image
//! format and merges converted layers into one flattened filesystem image.
//!
//! The two operations are [`convert::convert`], which streams a tar layer into a content blob
//! plus a filesystem metadata tree (the *bootstrap*), and [`merge::merge`], which composes
//! per-layer bootstraps bottom to top, applying overlay deletion semantics (whiteouts and
//! opaque directories) and a shared cross-layer deduplication dictionary.
//!
//! Serving the merged bootstrap over a filesystem protocol is the job of an external mount
//! runtime; this crate only produces the artifacts that runtime consumes.

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod bootstrap;
pub mod builder;
pub mod config;
pub mod convert;
pub mod dictionary;
pub mod entry;
pub mod merge;

pub use error::*;
