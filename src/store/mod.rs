//! Lineage persistence for candidate packs and baseline anchors.

mod lineage;

pub use lineage::{LineageStore, RunComparison, StoreError};
