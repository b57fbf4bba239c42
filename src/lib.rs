//! Shared library modules for the gavel enrichment pipeline.
//!
//! The binaries (`gavel`, `deadletters`) and the tests wire these together;
//! every component takes its collaborators by handle at construction, so
//! there is no ambient state to initialize.

pub mod bus;
pub mod cache;
pub mod config;
pub mod ens;
pub mod metrics;
pub mod model;
pub mod price;
pub mod queue;
pub mod store;
pub mod worker;
