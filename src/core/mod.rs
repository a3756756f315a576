//! Core functionality modules for the resource manager
//!
//! Value types, on-disk formats, the distribution cache and the core
//! manager that loads, evicts and canonicalizes.

pub mod cache;
pub mod config;
pub mod distidx;
pub mod interner;
pub mod keytypes;
pub mod manager;
pub mod manifest;
pub mod resource_manager;
pub mod resources;
pub mod symapi;
pub mod symbol;
pub mod symgraph;
pub mod testing;
pub mod toplevel;
