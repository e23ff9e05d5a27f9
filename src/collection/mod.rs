//! Collection assembly and provenance metadata.
//!
//! A collection merges one or more materialized resources into a
//! single virtual filesystem instance, addressed by a deterministic
//! cache key derived from the sorted resource name set.

mod assembler;
mod instructions;
mod metadata;

pub use assembler::{
    collection_key, CollectionAssembler, CollectionCleanup, CollectionResult, LoadRequest,
    COLLECTION_ROOT,
};
pub use instructions::{blob_url_prefix, encode_path_segments};
pub use metadata::{CollectionMetadataStore, ResourceProvenance, VirtualCollectionMetadata};
