pub mod client_registry;
pub mod config;
pub mod snapshot_broadcaster;
