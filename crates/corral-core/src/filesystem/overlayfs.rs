//! `OverlayFS` management for the container's copy-on-write root.
//!
//! The image's rootfs is bind-mounted onto `lower` and used as the
//! read-only base; writes land in `diff`. The union is mounted at `merged`,
//! which later becomes the container's `/`.

use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use nix::mount::{MsFlags, mount};

use corral_common::constants::PATH_LEN_MAX;
use corral_common::error::{CorralError, Result};
use corral_common::types::ContainerId;

// Headroom kept below PATH_MAX for mount points composed under `merged`.
const MOUNT_POINT_LEN_MAX: usize = 256;

/// The per-container overlay directories under `<container_base>/<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayLayout {
    /// `<container_base>/<id>`.
    pub root: PathBuf,
    /// Bind mount of the image rootfs; the overlay's read-only layer.
    pub lower: PathBuf,
    /// Writable upper layer.
    pub diff: PathBuf,
    /// Overlay scratch directory.
    pub work: PathBuf,
    /// Union mount point; becomes the container root.
    pub merged: PathBuf,
}

impl OverlayLayout {
    /// Computes the layout for `id` under `container_base`.
    ///
    /// # Errors
    ///
    /// Returns an error if the paths would leave too little room below
    /// `PATH_MAX` for mount points inside `merged`.
    pub fn new(container_base: &Path, id: &ContainerId) -> Result<Self> {
        let root = container_base.join(id.as_str());
        if root.as_os_str().len() + MOUNT_POINT_LEN_MAX >= PATH_LEN_MAX {
            return Err(CorralError::config(format!(
                "container data path too long: {}",
                root.display()
            )));
        }
        Ok(Self {
            lower: root.join("lower"),
            diff: root.join("diff"),
            work: root.join("work"),
            merged: root.join("merged"),
            root,
        })
    }

    /// Creates `root` and the four layer directories, all mode 0700.
    ///
    /// The container base is created if missing. The per-container
    /// directory must not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if any directory cannot be created.
    pub fn create_dirs(&self) -> Result<()> {
        if let Some(base) = self.root.parent() {
            std::fs::create_dir_all(base).map_err(|e| CorralError::Io {
                path: base.to_path_buf(),
                source: e,
            })?;
        }
        let mut builder = std::fs::DirBuilder::new();
        let _ = builder.mode(0o700);
        for dir in [&self.root, &self.lower, &self.diff, &self.work, &self.merged] {
            builder.create(dir).map_err(|e| CorralError::Io {
                path: dir.clone(),
                source: e,
            })?;
        }
        tracing::debug!(root = %self.root.display(), "overlay directories created");
        Ok(())
    }

    /// Mount options for the union.
    #[must_use]
    pub fn options(&self) -> String {
        format!(
            "lowerdir={},upperdir={},workdir={}",
            self.lower.display(),
            self.diff.display(),
            self.work.display()
        )
    }

    /// Bind-mounts `image_rootfs` onto `lower` and mounts the union at `merged`.
    ///
    /// # Errors
    ///
    /// Returns an error if the image rootfs is missing or either mount fails.
    pub fn mount(&self, image_rootfs: &Path) -> Result<()> {
        if !image_rootfs.is_dir() {
            return Err(CorralError::config(format!(
                "image rootfs not found: {}",
                image_rootfs.display()
            )));
        }
        mount(
            Some(image_rootfs),
            &self.lower,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|e| CorralError::syscall("bindmount-rootfs", self.lower.display(), e))?;

        let opts = self.options();
        mount(
            Some("overlay"),
            &self.merged,
            Some("overlay"),
            MsFlags::empty(),
            Some(opts.as_str()),
        )
        .map_err(|e| CorralError::syscall("mount-overlay", self.merged.display(), e))?;

        tracing::info!(merged = %self.merged.display(), "overlayfs mounted");
        Ok(())
    }

    /// Recursively deletes the container's data directory.
    ///
    /// A missing directory is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CorralError::Io {
                    path: self.root.clone(),
                    source: e,
                });
            }
        }
        tracing::info!(root = %self.root.display(), "container data removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn id() -> ContainerId {
        ContainerId::derive(Some("ovl"), 5).unwrap()
    }

    #[test]
    fn layout_lives_under_container_id() {
        let layout = OverlayLayout::new(Path::new("/var/lib/corral/containers"), &id()).unwrap();
        let root = Path::new("/var/lib/corral/containers").join(id().as_str());
        assert_eq!(layout.root, root);
        assert_eq!(layout.lower, root.join("lower"));
        assert_eq!(layout.diff, root.join("diff"));
        assert_eq!(layout.work, root.join("work"));
        assert_eq!(layout.merged, root.join("merged"));
    }

    #[test]
    fn options_name_all_three_layers() {
        let layout = OverlayLayout::new(Path::new("/c"), &id()).unwrap();
        let opts = layout.options();
        assert!(opts.starts_with(&format!("lowerdir={}", layout.lower.display())));
        assert!(opts.contains(&format!("upperdir={}", layout.diff.display())));
        assert!(opts.ends_with(&format!("workdir={}", layout.work.display())));
    }

    #[test]
    fn create_dirs_builds_private_quartet_and_refuses_reuse() {
        let base = tempfile::tempdir().unwrap();
        let layout = OverlayLayout::new(&base.path().join("containers"), &id()).unwrap();
        layout.create_dirs().unwrap();
        for dir in [&layout.lower, &layout.diff, &layout.work, &layout.merged] {
            let mode = std::fs::metadata(dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
        assert!(layout.create_dirs().is_err());
    }

    #[test]
    fn remove_deletes_everything_and_tolerates_absence() {
        let base = tempfile::tempdir().unwrap();
        let layout = OverlayLayout::new(base.path(), &id()).unwrap();
        layout.create_dirs().unwrap();
        std::fs::write(layout.diff.join("file"), "data").unwrap();
        layout.remove().unwrap();
        assert!(!layout.root.exists());
        layout.remove().unwrap();
    }

    #[test]
    fn missing_image_is_a_config_error() {
        let base = tempfile::tempdir().unwrap();
        let layout = OverlayLayout::new(base.path(), &id()).unwrap();
        let err = layout.mount(&base.path().join("no-such-image")).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn overlong_base_is_rejected() {
        let base = PathBuf::from("/".to_owned() + &"b".repeat(PATH_LEN_MAX - 100));
        assert!(OverlayLayout::new(&base, &id()).is_err());
    }
}
