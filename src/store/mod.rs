pub mod blob;
pub mod family_store;
pub mod record;

pub use blob::{BlobStore, MemoryBlobStore, S3BlobStore};
pub use family_store::{
    FamilyStore, LocalFamilyStore, RemoteFamilyStore, StoreSnapshot,
};
pub use record::{Condition, MemoryRecordStore, Record, RecordStore, WriteOp, MAX_BATCH_OPS};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid pairing code")]
    InvalidPairingCode,

    #[error("pairing code expired")]
    PairingCodeExpired,

    #[error("batch of {0} ops exceeds the {1}-op ceiling")]
    BatchTooLarge(usize, usize),

    #[error("invalid image data: {0}")]
    InvalidImage(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend error: {0}")]
    Backend(String),
}
