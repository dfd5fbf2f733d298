use std::fs;
use std::path::Path;

use crate::error::{GridFuseError, Result};
use crate::fs::GridFs;

/// Mount the filesystem in the foreground and serve until the kernel
/// unmounts it (`umount`/`fusermount -u`, or process exit via AutoUnmount).
pub fn mount_foreground(fs: GridFs, mount_point: &Path) -> Result<()> {
    fs::create_dir_all(mount_point).map_err(|e| {
        GridFuseError::Config(format!(
            "Failed to create mount directory {}: {}",
            mount_point.display(),
            e
        ))
    })?;

    let mount_options = vec![
        fuser::MountOption::FSName("gridfuse".to_string()),
        fuser::MountOption::AutoUnmount,
    ];

    tracing::info!("Mounting gridfuse at {}", mount_point.display());

    fuser::mount2(fs, mount_point, &mount_options)
        .map_err(|e| GridFuseError::Mount(format!("FUSE mount failed: {e}")))?;

    tracing::info!("gridfuse unmounted");
    Ok(())
}
