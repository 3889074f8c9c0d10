//! Shared object-key layout for providers that address objects directly.
//!
//! Key format: `{prefix}/{workspace_id}/{algorithm}/{hex}`. The key doubles as the
//! `storage_id` handed back to the queue.

use driftbox_core::ContentHash;

use crate::traits::{StorageError, StorageResult};

/// Build the object key for a content hash within a workspace.
pub fn object_key(prefix: &str, workspace_id: &str, hash: &str) -> StorageResult<String> {
    if workspace_id.is_empty()
        || workspace_id.contains('/')
        || workspace_id.contains("..")
        || workspace_id.chars().any(char::is_control)
    {
        return Err(StorageError::InvalidKey(format!(
            "invalid workspace id: {:?}",
            workspace_id
        )));
    }
    let hash = ContentHash::parse(hash).map_err(|e| StorageError::InvalidKey(e.to_string()))?;
    let prefix = prefix.trim_matches('/');

    let key = if prefix.is_empty() {
        format!("{}/{}/{}", workspace_id, hash.algorithm(), hash.to_hex())
    } else {
        format!(
            "{}/{}/{}/{}",
            prefix,
            workspace_id,
            hash.algorithm(),
            hash.to_hex()
        )
    };
    validate_key(&key)?;
    Ok(key)
}

/// Reject keys that could escape the bucket prefix.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|segment| segment == "..") {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
