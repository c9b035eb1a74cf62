pub mod cache;
pub mod campaign;
pub mod contacts;
pub mod dispatcher;
pub mod memory;
pub mod pg_store;
pub mod recipients;
pub mod scheduler;
pub mod store;
