use std::env;
use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::info;

use crate::store::{MemoryRecordStore, RecordStore};

/// Pick the record store backend from `RECORD_STORE`. Only the in-memory
/// backend ships today, so demo mode is the default, but it is an explicit
/// mode: an unknown value fails fast instead of silently scanning an empty
/// store.
pub fn setup_record_store() -> Result<Arc<dyn RecordStore>> {
    let mode = env::var("RECORD_STORE").unwrap_or_else(|_| "memory".to_string());
    record_store_from_mode(&mode)
}

fn record_store_from_mode(mode: &str) -> Result<Arc<dyn RecordStore>> {
    match mode {
        "memory" => {
            info!("📒 Record store: in-memory (demo mode)");
            Ok(Arc::new(MemoryRecordStore::new()))
        }
        other => bail!("unsupported RECORD_STORE '{other}' (supported: memory)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_mode_builds_a_store() {
        assert!(record_store_from_mode("memory").is_ok());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = record_store_from_mode("dynamo").unwrap_err();
        assert!(err.to_string().contains("unsupported RECORD_STORE"));
    }
}
