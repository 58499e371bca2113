//! Stager (C3): write each article's rendered body to a local working
//! path, ensuring the output directory exists first.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StageError;
use crate::types::Article;

/// Deterministic lowercase hyphen-separated token derived from a human
/// name: unicode-aware lowercasing, letters/digits retained, everything
/// else collapsed to single hyphens, leading/trailing hyphens stripped.
/// Delegates to the `slug` crate, whose `slugify` already implements
/// exactly this contract.
pub fn slug(name: &str) -> String {
    slug::slugify(name)
}

/// Write `article.body` to `{output_dir}/{slug(article.name)}.md`,
/// truncate-overwriting any existing file, and record the resulting path
/// on the article. Two different names may collide to the same slug; the
/// later write wins (known limitation) -- callers that care should report
/// the collision via the Reporter before staging.
pub fn stage(output_dir: &Path, article: &mut Article) -> Result<PathBuf, StageError> {
    fs::create_dir_all(output_dir).map_err(|source| StageError::CreateDir {
        path: output_dir.display().to_string(),
        source,
    })?;

    let path = output_dir.join(format!("{}.md", slug(&article.name)));
    fs::write(&path, &article.body).map_err(|source| StageError::Write {
        path: path.display().to_string(),
        source,
    })?;

    article.staged_path = Some(path.display().to_string());
    Ok(path)
}

/// Stage every article, in order, returning the first failure.
pub fn stage_all(output_dir: &Path, articles: &mut [Article]) -> Result<(), StageError> {
    for article in articles.iter_mut() {
        stage(output_dir, article)?;
    }
    Ok(())
}
