pub mod aggregate;
pub mod analysis;
pub mod dataset;
pub mod filter;
pub mod ingest;
pub mod layout;
pub mod logging;
pub mod spec;
pub mod state;
pub mod storage;
