//! Storecopy: parallel, filtering copy of a dense-id graph store
//!
//! This crate copies every live node and relationship of a source store into a
//! fresh target store, dropping what the configured ignore/delete rules exclude
//! and remapping token ids (and optionally node ids) on the way:
//!
//! 1. **Token setup** -- Resolve label, relationship-type and property-key names in the
//!    source, create the surviving ones in the target, build per-category translation tables
//! 2. **Node phase** -- Shard `[0, highest node id]`, scan shards on a worker pool, stream
//!    accepted nodes through a bounded queue into the single bulk loader, record the id map
//! 3. **Relationship phase** -- Same pattern over relationship ids; a relationship whose
//!    endpoints are missing from the frozen id map is dropped
//! 4. **Index files** -- Copy `index.db` and `index/` next to the new store when node ids
//!    were kept stable
//!
//! # Architecture
//!
//! - **Sharded scans** -- Fixed-size id ranges, one rayon task each, capped in flight
//! - **Backpressure** -- crossbeam bounded queue; every wait is time-bounded and re-checks
//!   the shared cancellation flag
//! - **Typed end of stream** -- `Item::EndOfStream`, pushed once by the last shard to finish
//! - **Per-record tolerance** -- Not-in-use slots and filtered records are counted; read
//!   failures are logged to `store-copy.log` and skipped; loader failures abort the phase
//! - **Bounded memory** -- Shard stats are folded into phase totals as tasks complete
//!
//! # Key Modules
//!
//! - [`pipeline`] -- `copy_store` and the directory-level `run_copy`
//! - [`phase`] -- Worker pool orchestration for one entity phase
//! - [`scan`] -- Node and relationship scan workers
//! - [`consumer`] -- Bulk loader drain loop
//! - [`queue`] -- Bounded streaming queue and end-of-stream latch
//! - [`tokens`] -- Token translation tables and ignore sets
//! - [`idmap`] -- Concurrent node id map, frozen map, persistence
//! - [`shard`] -- Id range sharder
//! - [`stats`] -- Shard and phase counters, summaries
//! - [`errorlog`] -- Per-record failure log
//! - [`cancel`] -- Run-wide cancellation with first-cause tracking
//! - [`store`] -- Reader/writer capability traits and the snapshot backend
//! - [`compare`] -- Count-based verification of a finished copy
//! - [`config`] -- Constants and the TOML-backed `CopyConfig`
//!
//! # Example Usage
//!
//! ```bash
//! # Copy, dropping Admin nodes and KNOWS relationships
//! storecopy copy old-store/ new-store/ --delete-labels Admin --ignore-rel-types KNOWS
//!
//! # Compact node ids, 8 scan threads
//! storecopy copy old-store/ new-store/ --keep-node-ids false --threads 8
//!
//! # Verify the result
//! storecopy compare old-store/ new-store/ --ignore-rel-types KNOWS
//! ```

pub mod cancel;
pub mod compare;
pub mod config;
pub mod consumer;
pub mod error;
pub mod errorlog;
pub mod idmap;
pub mod index_files;
pub mod model;
pub mod phase;
pub mod pipeline;
pub mod queue;
pub mod scan;
pub mod shard;
pub mod stats;
pub mod store;
pub mod tokens;
