//! Ratekeeper Storage
//!
//! Append-only storage for rate observations, correction rules, corridor
//! widths and correction snapshots, plus the small flag store behind the
//! delayed trigger. Observations are partitioned by rate type into the
//! namespaces of a [`RateTypeRegistry`](ratekeeper_common::RateTypeRegistry).
//!
//! Two backends are provided: [`MemoryStore`] and [`PgStore`].

pub mod traits;
pub mod memory;
pub mod postgres;

pub use traits::{
    CorrectionStore, CorridorStore, RateQuery, RateStore, RuleStore, Stores, TriggerStore,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;
