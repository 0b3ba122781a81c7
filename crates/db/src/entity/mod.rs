//! Table entities of the deal ledger. `schema.sql` at the crate root carries the matching DDL.

pub mod clients;
pub mod deals;
pub mod drives;
pub mod manifest_entries;
pub mod manifests;
pub mod pieces;
pub mod proposals;
pub mod providers;
