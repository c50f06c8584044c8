pub mod aggregate;
pub mod config;
pub mod output;
pub mod record;
pub mod store;
pub mod transfer;
