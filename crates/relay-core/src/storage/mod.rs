//! Local persistence
//!
//! The only state this service keeps on disk is the credentials file.

pub mod credentials;

pub use credentials::{CredentialStore, StoredCredential};
