use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Temporary file `atomic_write` uses for `path` in this process
///
/// Names differ per process; writers within one process must not write the
/// same path concurrently.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// Atomically write content to a file
///
/// This function writes to a temporary file in the same directory,
/// syncs to disk, then renames to the target path. Readers observe either
/// the previous content or the new content, never a partial write.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory_exists(parent)?;
    }

    let temp_path = temp_path_for(path);

    {
        let mut file = File::create(&temp_path).with_context(|| {
            format!("Failed to create temporary file: {}", temp_path.display())
        })?;

        file.write_all(content)
            .context("Failed to write to temporary file")?;

        file.sync_all().context("Failed to sync file to disk")?;
    }

    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}

/// Ensure a directory exists, creating it and all parents if needed
pub fn ensure_directory_exists(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() || path.exists() {
        return Ok(());
    }

    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        // Usage data is per-user, keep it private
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to set permissions for: {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write() {
        let temp_dir = tempdir().unwrap();
        let test_file = temp_dir.path().join("state.json");

        let content = b"test content";
        atomic_write(&test_file, content).unwrap();

        let mut file = File::open(&test_file).unwrap();
        let mut read_content = Vec::new();
        file.read_to_end(&mut read_content).unwrap();

        assert_eq!(content, &read_content[..]);
        assert!(!temp_path_for(&test_file).exists());
    }

    #[test]
    fn test_temp_path_is_per_process_sibling() {
        let temp = temp_path_for(Path::new("/data/state.json"));

        assert_eq!(temp.parent(), Some(Path::new("/data")));
        assert_eq!(
            temp.file_name().unwrap().to_string_lossy(),
            format!("state.json.{}.tmp", std::process::id())
        );
    }

    #[test]
    fn test_atomic_write_replaces_existing() {
        let temp_dir = tempdir().unwrap();
        let test_file = temp_dir.path().join("state.json");

        atomic_write(&test_file, b"first").unwrap();
        atomic_write(&test_file, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(&test_file).unwrap(), "second");
    }

    #[test]
    fn test_atomic_write_nested_path() {
        let temp_dir = tempdir().unwrap();
        let test_file = temp_dir.path().join("nested").join("path").join("state.json");

        atomic_write(&test_file, b"nested content").unwrap();

        assert_eq!(std::fs::read(&test_file).unwrap(), b"nested content");
    }

    #[test]
    fn test_ensure_directory_exists_idempotent() {
        let temp_dir = tempdir().unwrap();
        let test_dir = temp_dir.path().join("idempotent_test");

        ensure_directory_exists(&test_dir).unwrap();
        assert!(test_dir.is_dir());

        ensure_directory_exists(&test_dir).unwrap();
        assert!(test_dir.is_dir());
    }
}
