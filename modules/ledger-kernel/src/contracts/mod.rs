//! Value objects crossing the kernel boundary: accounting intents, meaning
//! results, reference snapshots, and the declarative policy registry.

pub mod accounting_intent;
pub mod meaning;
pub mod policy;
pub mod reference_snapshot;
