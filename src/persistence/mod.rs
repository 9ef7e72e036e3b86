//! Persistence layer: file-backed session storage.

pub mod session_store;
