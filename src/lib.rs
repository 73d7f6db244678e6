pub mod server;
pub mod simulator;
pub mod version;
pub mod web;
