//! Small helpers shared by the daemon and the workers.

use std::path::Path;

use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

/// Hash a string using SHA-256
pub fn hash_string(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate `bytes` random bytes, hex encoded
pub fn random_hex(bytes: usize) -> String {
    let mut rng = rand::rng();
    let buf: Vec<u8> = (0..bytes).map(|_| rng.random()).collect();
    hex::encode(buf)
}

/// Suffix appended to content cut at a display limit
pub fn omitted_suffix(omitted: u64) -> String {
    let unit = if omitted == 1 { "byte" } else { "bytes" };
    format!("\n<{} {} omitted>", omitted, unit)
}

/// Read at most `limit` bytes of `path` as (lossy) UTF-8.
///
/// If the file is longer, an omitted-bytes suffix is appended. Unreadable
/// files produce an empty string.
pub async fn read_file_length(path: impl AsRef<Path>, limit: usize) -> String {
    let path = path.as_ref();
    match read_truncated(path, limit).await {
        Ok(content) => content,
        Err(e) => {
            tracing::debug!("Failed to read {}: {}", path.display(), e);
            String::new()
        }
    }
}

async fn read_truncated(path: &Path, limit: usize) -> std::io::Result<String> {
    let file = tokio::fs::File::open(path).await?;
    let actual = file.metadata().await?.len();

    let mut buf = Vec::with_capacity(limit.min(actual as usize));
    file.take(limit as u64).read_to_end(&mut buf).await?;

    let mut content = String::from_utf8_lossy(&buf).into_owned();
    let read = buf.len() as u64;
    if actual > read {
        content.push_str(&omitted_suffix(actual - read));
    }
    Ok(content)
}
