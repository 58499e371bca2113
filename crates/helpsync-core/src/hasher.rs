//! Hasher (C4): deterministic content hash per article.
//!
//! Empty bodies are a hard error -- they must never enter the Lock, since
//! they would collide across unrelated articles and mask genuine content
//! changes.

use sha2::{Digest, Sha256};

use crate::types::{Article, ContentHash, Lock};

/// SHA-256 over `article.body` as UTF-8 bytes, lowercase hex-encoded.
pub fn hash(article: &Article) -> Result<ContentHash, i64> {
    if article.body.is_empty() {
        return Err(article.id);
    }
    let mut hasher = Sha256::new();
    hasher.update(article.body.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Build the current Lock from a harvested, staged, hashed article set.
/// Aborts on the first empty body, returning that article's id.
pub fn build_lock(articles: &[Article]) -> Result<Lock, i64> {
    let mut lock = Lock::new();
    for article in articles {
        lock.insert(article.id, hash(article)?);
    }
    Ok(lock)
}
