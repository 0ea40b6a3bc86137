use std::path::{Path, PathBuf};

use crate::config::DISK_FORMAT;

/// On-disk layout under a single root directory.
///
/// ```text
/// <root>/images.toml            optional catalog override
/// <root>/iso/<image-id>         shared base images
/// <root>/disk/<vm>.qcow2        one writable disk per vm name
/// <root>/disk/<vm>.pending      bootstrap started, not yet complete
/// <root>/disk/<vm>.installed    bootstrap completed
/// <root>/tmp/<vm>/              seed scratch files
/// <root>/<vm>-seed.iso          seed image for the current bootstrap
/// ```
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog_file(&self) -> PathBuf {
        self.root.join("images.toml")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("iso")
    }

    pub fn image_file(&self, image: &str) -> PathBuf {
        self.images_dir().join(image)
    }

    pub fn disks_dir(&self) -> PathBuf {
        self.root.join("disk")
    }

    pub fn disk_file(&self, vm_name: &str) -> PathBuf {
        self.disks_dir().join(format!("{vm_name}.{DISK_FORMAT}"))
    }

    pub fn pending_marker_file(&self, vm_name: &str) -> PathBuf {
        self.disks_dir().join(format!("{vm_name}.pending"))
    }

    pub fn installed_marker_file(&self, vm_name: &str) -> PathBuf {
        self.disks_dir().join(format!("{vm_name}.installed"))
    }

    pub fn scratch_dir(&self, vm_name: &str) -> PathBuf {
        self.root.join("tmp").join(vm_name)
    }

    pub fn seed_image_file(&self, vm_name: &str) -> PathBuf {
        self.root.join(format!("{vm_name}-seed.iso"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let paths = Paths::new("/srv/vms");
        assert_eq!(
            paths.image_file("ubuntu-server-arm64"),
            PathBuf::from("/srv/vms/iso/ubuntu-server-arm64")
        );
        assert_eq!(
            paths.disk_file("dev"),
            PathBuf::from("/srv/vms/disk/dev.qcow2")
        );
        assert_eq!(
            paths.installed_marker_file("dev"),
            PathBuf::from("/srv/vms/disk/dev.installed")
        );
        assert_eq!(
            paths.seed_image_file("dev"),
            PathBuf::from("/srv/vms/dev-seed.iso")
        );
    }
}
