pub mod errors;
pub mod health;
pub mod mappings;
pub mod progress;
pub mod projects;
