pub mod auth;
pub mod configuration;
pub mod db;
pub mod reviews;
pub mod server;
pub mod telemetry;
