mod profile;

pub use self::profile::LaunchProfile;

use std::path::Path;
use vmstrap_cmd::Command;
use vmstrap_system::Size;

use crate::config::{ConfigurationError, VmConfig};

/// The exact invocation of the virtualization engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    program: String,
    args: Vec<String>,
}

impl LaunchCommand {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Attach the base image as the installer medium.
    pub fn with_install_medium(mut self, image_path: &Path) -> Self {
        self.args
            .extend(["-cdrom".to_owned(), image_path.display().to_string()]);
        self
    }

    /// Attach the seed image as a read-only virtio disk, where cloud-init
    /// looks for the `cidata` volume.
    pub fn with_seed_drive(mut self, seed_path: &Path) -> Self {
        self.args.extend([
            "-drive".to_owned(),
            format!(
                "file={},format=raw,if=virtio,readonly=on",
                seed_path.display()
            ),
        ]);
        self
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// Build the launch invocation for `config`.
///
/// Pure: no filesystem access and no processes. Architectures without a
/// launch profile fail instead of falling back to another one.
pub fn build_launch_command(config: &VmConfig) -> Result<LaunchCommand, ConfigurationError> {
    let profile = LaunchProfile::for_arch(config.arch)?;
    Ok(profile.template(config).finish())
}

/// Argument-list builder, one method per qemu option family.
#[derive(Debug, Clone)]
pub(crate) struct Qemu {
    program: String,
    args: Vec<String>,
}

impl Qemu {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_owned(),
            args: Vec::new(),
        }
    }

    fn opt(mut self, flag: &str, value: impl ToString) -> Self {
        self.args.push(flag.to_owned());
        self.args.push(value.to_string());
        self
    }

    /// -display none
    pub fn display_none(self) -> Self {
        self.opt("-display", "none")
    }

    /// Serial console and monitor multiplexed onto the terminal: -serial mon:stdio
    pub fn serial_mon_stdio(self) -> Self {
        self.opt("-serial", "mon:stdio")
    }

    /// -m <size>
    pub fn memory(self, size: &Size) -> Self {
        self.opt("-m", size)
    }

    /// Set CPU count: -smp <n>
    pub fn smp(self, cpus: impl ToString) -> Self {
        self.opt("-smp", cpus)
    }

    /// -M <machine>
    pub fn machine(self, machine: &str) -> Self {
        self.opt("-M", machine)
    }

    /// virtio NIC on a user-mode backend forwarding `host_port` to guest ssh.
    pub fn user_net_ssh_forward(self, device: &str, host_port: u16) -> Self {
        self.opt("-device", format!("{device},netdev=n1"))
            .opt("-netdev", format!("user,id=n1,hostfwd=tcp::{host_port}-:22"))
    }

    /// -accel <name>; repeat for fallbacks, qemu tries them in order.
    pub fn accel(self, accel: &str) -> Self {
        self.opt("-accel", accel)
    }

    /// -cpu <model>
    pub fn cpu(self, model: &str) -> Self {
        self.opt("-cpu", model)
    }

    /// Read-only UEFI code in pflash.
    pub fn pflash_firmware(self, firmware: &Path) -> Self {
        self.opt(
            "-drive",
            format!("file={},if=pflash,format=raw,readonly=on", firmware.display()),
        )
    }

    /// -drive file=<path>
    pub fn drive(self, file: &Path) -> Self {
        self.opt("-drive", format!("file={}", file.display()))
    }

    pub fn finish(self) -> LaunchCommand {
        LaunchCommand {
            program: self.program,
            args: self.args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use vmstrap_system::Arch;

    fn config(arch: Arch) -> VmConfig {
        VmConfig {
            name: "dev".to_owned(),
            memory: "4G".parse().unwrap(),
            cpus: "4".parse().unwrap(),
            disk_size: "20G".parse().unwrap(),
            arch,
            image: "ubuntu-server-arm64".to_owned(),
            image_url: "https://example.test/arm64.iso".to_owned(),
            image_path: PathBuf::from("/vms/iso/ubuntu-server-arm64"),
            disk_path: PathBuf::from("/vms/disk/dev.qcow2"),
            ssh_port: 2225,
            firmware_dir: PathBuf::from("/opt/homebrew/share/qemu"),
        }
    }

    #[test]
    fn arm64_launch_arguments() {
        let command = build_launch_command(&config(Arch::Arm64)).unwrap();
        assert_eq!(command.program(), "qemu-system-aarch64");
        assert_eq!(
            command.args(),
            [
                "-display",
                "none",
                "-serial",
                "mon:stdio",
                "-m",
                "4G",
                "-smp",
                "4",
                "-M",
                "virt,highmem=on",
                "-device",
                "virtio-net-pci,netdev=n1",
                "-netdev",
                "user,id=n1,hostfwd=tcp::2225-:22",
                "-accel",
                "hvf",
                "-accel",
                "tcg",
                "-cpu",
                "host",
                "-drive",
                "file=/opt/homebrew/share/qemu/edk2-aarch64-code.fd,if=pflash,format=raw,readonly=on",
                "-drive",
                "file=/vms/disk/dev.qcow2",
            ]
        );
    }

    #[test]
    fn deterministic() {
        let config = config(Arch::Arm64);
        assert_eq!(
            build_launch_command(&config).unwrap(),
            build_launch_command(&config).unwrap()
        );
    }

    #[test]
    fn unsupported_architectures_fail() {
        for arch in [Arch::X86_64, Arch::Riscv64] {
            let err = build_launch_command(&config(arch)).unwrap_err();
            assert!(
                matches!(err, ConfigurationError::UnsupportedArch { arch: a } if a == arch),
                "unexpected error for {arch}: {err}"
            );
        }
    }

    #[test]
    fn install_medium_is_appended_last() {
        let config = config(Arch::Arm64);
        let base = build_launch_command(&config).unwrap();
        let install = base
            .clone()
            .with_install_medium(&config.image_path)
            .with_seed_drive(Path::new("/vms/dev-seed.iso"));

        assert_eq!(&install.args()[..base.args().len()], base.args());
        assert_eq!(
            &install.args()[base.args().len()..],
            [
                "-cdrom",
                "/vms/iso/ubuntu-server-arm64",
                "-drive",
                "file=/vms/dev-seed.iso,format=raw,if=virtio,readonly=on",
            ]
        );
    }

    #[test]
    fn to_command_renders_argv() {
        let command = build_launch_command(&config(Arch::Arm64))
            .unwrap()
            .to_command();
        let argv = command.argv();
        assert_eq!(argv[0], "qemu-system-aarch64");
        assert_eq!(argv.last().unwrap(), "file=/vms/disk/dev.qcow2");
    }
}
