//! Photo lifecycle and caching engine for a family photo-sharing service.
//!
//! Three cooperating layers:
//!
//! - [`store`]: persistence contracts ([`store::RecordStore`],
//!   [`store::BlobStore`]) and the [`store::FamilyStore`] domain facade with
//!   interchangeable remote and local backends.
//! - [`services::lifecycle`]: the retention state machine (active, trashed,
//!   purged) applied at scale by scheduled jobs.
//! - [`services::cache`]: the client-resident two-tier image cache with
//!   deduplicated fetches and thumbnail derivation.

pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod store;
