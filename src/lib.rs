pub mod app;
pub mod config;
pub mod db;
pub mod docs;
pub mod errors;
pub mod models;
pub mod permission;
pub mod record;
pub mod routes;
pub mod session;
pub mod utils;

// Re-export commonly used items for tests
pub use app::{create_app, AppState};
pub use config::Settings;
