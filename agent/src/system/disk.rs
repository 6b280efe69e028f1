//! Free-space query for the bundle filesystem

use std::path::{Path, PathBuf};

use sysinfo::Disks;

use crate::errors::AgentError;

/// Bytes available on the filesystem that will hold `path`.
///
/// The filesystem is resolved from the parent directory of `path`, so the
/// file itself does not need to exist yet.
pub fn free_bytes(path: &Path) -> Result<u64, AgentError> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("/"));
    let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());

    let disks = Disks::new_with_refreshed_list();
    let mounts: Vec<(PathBuf, u64)> = disks
        .iter()
        .map(|disk| (disk.mount_point().to_path_buf(), disk.available_space()))
        .collect();

    pick_mount(&dir, &mounts).ok_or_else(|| {
        AgentError::Io(std::io::Error::other(format!(
            "Failed to calculate free space for {}",
            path.display()
        )))
    })
}

/// The longest mount point that is a prefix of `dir` wins.
fn pick_mount(dir: &Path, mounts: &[(PathBuf, u64)]) -> Option<u64> {
    mounts
        .iter()
        .filter(|(mount, _)| dir.starts_with(mount))
        .max_by_key(|(mount, _)| mount.as_os_str().len())
        .map(|(_, available)| *available)
}
