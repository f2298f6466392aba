pub mod blob;
pub mod local_database;
pub mod repository;
pub mod sqlite;

pub use blob::{BlobStore, FileBlobStore, InMemoryBlobStore};
pub use local_database::LocalDatabase;
pub use repository::{StorageError, StoreName, StoredRecord, StructuredStore};
