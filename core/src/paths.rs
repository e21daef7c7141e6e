//! Temp-file path helpers.
//!
//! Utterance WAVs and TTS output are ephemeral; everything lands under the
//! configured temp directory, which is created on demand.

use std::path::{Path, PathBuf};

use crate::util::gen_id;
use crate::Result;

/// Ensure the temp directory exists and return its absolute path.
pub fn ensure_temp_dir(temp_dir: &Path) -> Result<PathBuf> {
    let abs = if temp_dir.is_absolute() {
        temp_dir.to_path_buf()
    } else {
        std::env::current_dir()?.join(temp_dir)
    };
    std::fs::create_dir_all(&abs)?;
    Ok(abs)
}

/// Path for a fixed-name file inside the temp directory.
pub fn temp_path(temp_dir: &Path, name: &str) -> Result<PathBuf> {
    Ok(ensure_temp_dir(temp_dir)?.join(name))
}

/// Unique path inside the temp directory; concurrent callers never collide.
pub fn temp_unique_path(temp_dir: &Path, prefix: &str, suffix: &str) -> Result<PathBuf> {
    Ok(ensure_temp_dir(temp_dir)?.join(format!("{}{}{}", prefix, gen_id(), suffix)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_paths_do_not_collide() {
        let root = std::env::temp_dir().join(format!("jarvin_paths_{}", gen_id()));
        let a = temp_unique_path(&root, "up_", ".wav").unwrap();
        let b = temp_unique_path(&root, "up_", ".wav").unwrap();
        assert_ne!(a, b);
        assert!(root.is_dir());
        std::fs::remove_dir_all(&root).ok();
    }
}
