mod backend;
mod models;
mod store;

pub use backend::CredentialStore;
pub use models::CredentialEntry;
pub use store::FileCredentialStore;

// Re-export for convenience
pub use async_trait::async_trait;
