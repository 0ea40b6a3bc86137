use vmstrap_system::Arch;

use crate::{
    config::{ConfigurationError, VmConfig},
    qemu::Qemu,
};

/// Per-architecture launch template.
///
/// Supporting a new architecture means adding a variant here and mapping
/// it in [`LaunchProfile::for_arch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchProfile {
    Arm64,
}

impl LaunchProfile {
    pub fn for_arch(arch: Arch) -> Result<Self, ConfigurationError> {
        match arch {
            Arch::Arm64 => Ok(LaunchProfile::Arm64),
            Arch::X86_64 | Arch::Riscv64 => Err(ConfigurationError::UnsupportedArch { arch }),
        }
    }

    pub fn qemu_binary(&self) -> &'static str {
        match self {
            LaunchProfile::Arm64 => "qemu-system-aarch64",
        }
    }

    pub fn firmware_file(&self) -> &'static str {
        match self {
            LaunchProfile::Arm64 => "edk2-aarch64-code.fd",
        }
    }

    pub(crate) fn template(&self, config: &VmConfig) -> Qemu {
        let firmware = config.firmware_dir.join(self.firmware_file());
        match self {
            // hvf when running on Apple silicon, tcg everywhere else
            LaunchProfile::Arm64 => Qemu::new(self.qemu_binary())
                .display_none()
                .serial_mon_stdio()
                .memory(&config.memory)
                .smp(config.cpus)
                .machine("virt,highmem=on")
                .user_net_ssh_forward("virtio-net-pci", config.ssh_port)
                .accel("hvf")
                .accel("tcg")
                .cpu("host")
                .pflash_firmware(&firmware)
                .drive(&config.disk_path),
        }
    }
}
