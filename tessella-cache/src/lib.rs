//! Tessella Cache - Fragmented Time-Range Cache Engine
//!
//! Retrieval of scientific time-series from range-based download
//! endpoints, without refetching what is already on disk. Requested
//! intervals decompose into fixed-size, epoch-aligned fragments; only
//! missing or stale fragments are fetched (once, however many callers
//! race for them), and the result is stitched back to exactly the
//! requested window.
//!
//! The crate is generic over its collaborators: where fragments persist
//! ([`StoreBackend`]), where they come from ([`UpstreamProvider`]), and
//! who knows a product's declared range ([`ProductRangeOracle`]). Wire
//! formats, transports and catalogs live behind those seams.
//!
//! Entry point: [`FetchCoordinator`].

pub mod assembler;
pub mod coordinator;
pub mod coverage;
pub mod indexer;
pub mod key;
pub mod lmdb_store;
pub mod memory_store;
pub mod record;
pub mod traits;

pub use assembler::{assemble, FragmentPayload};
pub use coordinator::{FetchCoordinator, FetchOutcome};
pub use coverage::CoverageTable;
pub use indexer::fragments_for;
pub use key::FragmentKey;
pub use lmdb_store::LmdbStoreBackend;
pub use memory_store::MemoryStoreBackend;
pub use record::{FragmentData, FragmentRecord, SCHEMA_VERSION};
pub use traits::{
    CacheStats, FragmentResponse, ProductRangeOracle, StoreBackend, UpstreamProvider,
};
