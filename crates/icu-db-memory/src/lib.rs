//! In-memory storage backend for the ICU intake service.
//!
//! Implements [`IcuRepository`] over plain collections behind a single
//! `tokio::sync::Mutex`, so every operation (admission included) is atomic.
//! Used by the server's tests and by `storage.backend = "memory"`.
//!
//! # Example
//!
//! ```ignore
//! use icu_db_memory::InMemoryRepository;
//! use icu_storage::IcuRepository;
//!
//! let repo = InMemoryRepository::new();
//! let code = repo.admit(&request).await?;
//! let record = repo.find_by_registration_code(&code).await?;
//! ```

mod repository;

pub use repository::InMemoryRepository;

// Re-export the storage contract for convenience
pub use icu_storage::{DynRepository, IcuRepository, StorageError};

/// Creates a new shareable in-memory repository.
pub fn create_repository() -> DynRepository {
    std::sync::Arc::new(InMemoryRepository::new())
}
