pub mod brands;
pub mod dashboard;
pub mod device_models;
pub mod health;
pub mod repairs;
pub mod settings;
pub mod spare_parts;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;
