pub mod analysis;
pub mod apis;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod observability;
pub mod process;
pub mod schema;
pub mod table;
