use std::path::Path;

use rand::RngCore;

use crate::error::Result;

const ID_FILE_NAME: &str = "id";

/// Loads this node's persistent 64-bit identity from `<data>/id`, generating
/// and persisting a fresh one from a cryptographic random source on first
/// boot. Stable across restarts.
pub async fn load_or_create(data_dir: &Path) -> Result<u64> {
    let path = data_dir.join(ID_FILE_NAME);
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => {
            let id = u64::from_str_radix(contents.trim(), 16).map_err(|e| {
                crate::error::Error::Internal(format!("corrupt node id file {path:?}: {e}"))
            })?;
            Ok(id)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let id = rand::rngs::OsRng.next_u64();
            let tmp = data_dir.join(format!(".{ID_FILE_NAME}.{:x}.tmp", rand::rngs::OsRng.next_u32()));
            tokio::fs::write(&tmp, format!("{id:016x}\n")).await?;
            tokio::fs::rename(&tmp, &path).await?;
            Ok(id)
        }
        Err(e) => Err(e.into()),
    }
}
