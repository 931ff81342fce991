pub mod app;
pub mod authz;
pub mod config;
pub mod db;
pub mod docs;
pub mod errors;
pub mod events;
pub mod geo;
pub mod jwt;
pub mod migration;
pub mod notifications;
pub mod routes;
pub mod store;
pub mod workflow;

// Re-export commonly used items for tests
pub use app::{create_app, AppState};
