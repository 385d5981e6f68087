//! Filesystem composition for container isolation.
//!
//! Builds the container's root inside the child's mount namespace:
//! an `OverlayFS` union over the image, the pseudo-filesystem tree, user
//! bind mounts, and finally `pivot_root` into the result.

pub mod mount;
pub mod overlayfs;
pub mod pivot_root;

use std::path::PathBuf;

use corral_common::error::Result;

use self::mount::MountSpec;
use self::overlayfs::OverlayLayout;

/// Everything needed to compose one container root.
#[derive(Debug, Clone)]
pub struct RootfsPlan {
    /// `<image_base>/<image>/rootfs` on the host.
    pub image_rootfs: PathBuf,
    /// Overlay directories for this container.
    pub layout: OverlayLayout,
    /// User bind mounts, applied in order.
    pub mounts: Vec<MountSpec>,
}

/// Composes the container root and pivots into it.
///
/// Must run in the child, inside its own mount namespace. Every step is
/// fatal except detaching the old root.
///
/// # Errors
///
/// Returns the first failing step's error.
pub fn compose_rootfs(plan: &RootfsPlan) -> Result<()> {
    mount::make_rprivate()?;
    plan.layout.create_dirs()?;
    plan.layout.mount(&plan.image_rootfs)?;

    let root = &plan.layout.merged;
    mount::mount_essential_filesystems(root)?;
    for spec in &plan.mounts {
        mount::apply_bind_mount(root, spec)?;
    }

    pivot_root::pivot_root(root)?;
    pivot_root::detach_old_root();
    pivot_root::finish_root()?;
    tracing::info!("container root ready");
    Ok(())
}
