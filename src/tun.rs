//! A minimal TUN device: open, name, read and write raw IP packets.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        use std::os::fd::AsRawFd;

        // TUNSETIFF = _IOW('T', 202, int)
        nix::ioctl_write_ptr_bad!(tun_set_iff, 0x4004_54ca, nix::libc::ifreq);
    }
}

/// A TUN device. Cloning duplicates the file descriptor, so one handle
/// can read while another writes.
pub struct Tun {
    file: File,
    name: String,
}

impl Tun {
    /// Create (or attach to) the named device. The name may contain `%d`
    /// to let the kernel number it.
    #[cfg(target_os = "linux")]
    pub fn new(name: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/net/tun")?;

        let mut request: nix::libc::ifreq = unsafe { std::mem::zeroed() };
        for (slot, byte) in request
            .ifr_name
            .iter_mut()
            .zip(name.bytes().take(nix::libc::IFNAMSIZ - 1))
        {
            *slot = byte as nix::libc::c_char;
        }
        request.ifr_ifru.ifru_flags =
            (nix::libc::IFF_TUN | nix::libc::IFF_NO_PI) as nix::libc::c_short;

        unsafe { tun_set_iff(file.as_raw_fd(), &request) }
            .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;

        let name = unsafe { std::ffi::CStr::from_ptr(request.ifr_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        log::debug!("Attached to TUN device {name}");
        Ok(Self { file, name })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn new(_name: &str) -> std::io::Result<Self> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "TUN devices are only supported on Linux",
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn try_clone(&self) -> std::io::Result<Self> {
        Ok(Self {
            file: self.file.try_clone()?,
            name: self.name.clone(),
        })
    }
}

impl Read for Tun {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for Tun {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}
