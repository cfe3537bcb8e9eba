pub mod records;
pub mod storage;

pub use records::setup_record_store;
pub use storage::setup_blob_store;
