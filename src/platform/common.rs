use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Atomically write content to a file
///
/// This function writes to a temporary file in the same directory,
/// syncs to disk, then renames to the target path. This ensures
/// the write is atomic on Unix and NTFS filesystems.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    // Create parent directory if it doesn't exist
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_directory_exists(parent)?;
    }

    let temp_path = path.with_extension("tmp");

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

    set_permissions_readable_all(path)?;

    Ok(())
}

/// Ensure a directory exists, creating it and all parents if needed
pub fn ensure_directory_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }

    Ok(())
}

/// Make a config file readable by the unprivileged kiosk user
pub fn set_permissions_readable_all(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = std::fs::metadata(path)
            .with_context(|| format!("Failed to get metadata for: {}", path.display()))?;

        let mut permissions = metadata.permissions();

        if path.is_dir() {
            // 755 for directories (rwxr-xr-x)
            permissions.set_mode(0o755);
        } else {
            // 644 for files (rw-r--r--)
            permissions.set_mode(0o644);
        }

        std::fs::set_permissions(path, permissions)
            .with_context(|| format!("Failed to set permissions for: {}", path.display()))?;
    }

    #[cfg(windows)]
    {
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("Failed to get metadata for: {}", path.display()))?;

        let mut permissions = metadata.permissions();
        permissions.set_readonly(false);

        std::fs::set_permissions(path, permissions)
            .with_context(|| format!("Failed to set permissions for: {}", path.display()))?;
    }

    Ok(())
}

/// Exclusive lock proving this is the only running kiosk controller
///
/// Held for the life of the value; the OS drops it if the process dies.
#[derive(Debug)]
pub struct InstanceLock {
    _file: File,
    path: PathBuf,
}

impl InstanceLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Default location of the instance lock file
pub fn get_instance_lock_path() -> PathBuf {
    let dir = directories::ProjectDirs::from("", "", "lockdown-browser")
        .and_then(|dirs| dirs.runtime_dir().map(Path::to_path_buf))
        .unwrap_or_else(std::env::temp_dir);
    dir.join("lockdown-browser.lock")
}

/// Take the single-instance lock, failing if another controller holds it
pub fn acquire_instance_lock(path: &Path) -> Result<InstanceLock> {
    if let Some(parent) = path.parent() {
        ensure_directory_exists(parent)?;
    }

    let file = open_exclusive(path)?;

    Ok(InstanceLock {
        _file: file,
        path: path.to_path_buf(),
    })
}

#[cfg(unix)]
fn open_exclusive(path: &Path) -> Result<File> {
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        anyhow::bail!(
            "Another lockdown session is already running (lock held on {})",
            path.display()
        );
    }

    Ok(file)
}

#[cfg(windows)]
fn open_exclusive(path: &Path) -> Result<File> {
    use std::os::windows::fs::OpenOptionsExt;

    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .share_mode(0)
        .open(path)
        .with_context(|| {
            format!(
                "Another lockdown session is already running (lock held on {})",
                path.display()
            )
        })
}

#[cfg(not(any(unix, windows)))]
fn open_exclusive(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open lock file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write() {
        let temp_dir = tempdir().unwrap();
        let test_file = temp_dir.path().join("kiosk.yaml");

        atomic_write(&test_file, b"session: {}").unwrap();

        assert_eq!(std::fs::read(&test_file).unwrap(), b"session: {}");
        assert!(!test_file.with_extension("tmp").exists());
    }

    #[test]
    fn test_atomic_write_nested_path() {
        let temp_dir = tempdir().unwrap();
        let test_file = temp_dir.path().join("etc").join("lockdown-browser").join("kiosk.yaml");

        atomic_write(&test_file, b"nested").unwrap();

        assert_eq!(std::fs::read(&test_file).unwrap(), b"nested");
    }

    #[test]
    fn test_atomic_write_replaces_existing() {
        let temp_dir = tempdir().unwrap();
        let test_file = temp_dir.path().join("kiosk.yaml");

        atomic_write(&test_file, b"old").unwrap();
        atomic_write(&test_file, b"new").unwrap();

        assert_eq!(std::fs::read(&test_file).unwrap(), b"new");
    }

    #[test]
    fn test_instance_lock_is_exclusive() {
        let temp_dir = tempdir().unwrap();
        let lock_path = temp_dir.path().join("run").join("lockdown-browser.lock");

        let first = acquire_instance_lock(&lock_path).unwrap();
        assert_eq!(first.path(), lock_path.as_path());
        assert!(acquire_instance_lock(&lock_path).is_err());

        drop(first);
        assert!(acquire_instance_lock(&lock_path).is_ok());
    }

    #[test]
    fn test_instance_lock_path_has_lock_name() {
        let path = get_instance_lock_path();
        assert_eq!(path.file_name().unwrap(), "lockdown-browser.lock");
    }
}
