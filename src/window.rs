//! The 4-byte register window shared with the SESAM monitor.
//!
//! The monitor sits on the system bus as a tiny memory-mapped device. The host
//! reaches it by mapping the physical page that contains it through `/dev/mem`
//! and doing volatile byte accesses on four consecutive cells.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::{self, NonNull};

use crate::error::{Result, SesamError};

/// Number of bytes the monitor exposes.
pub const WINDOW_SIZE: usize = 4;

/// Physical memory device the window is mapped from.
pub const DEV_MEM: &str = "/dev/mem";

/// The four cells of the window. The meaning of `Data` depends on the
/// operation in progress: the host writes string bytes into it, and the
/// monitor streams benchmark statistics back through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    /// Opcode register, written by the host only.
    Control = 0,
    /// Single-byte data channel.
    Data = 1,
    /// Nonzero while list output is available.
    Ready = 2,
    /// List output stream, valid while `Ready` is nonzero.
    ListData = 3,
}

impl Register {
    pub const ALL: [Register; WINDOW_SIZE] = [
        Register::Control,
        Register::Data,
        Register::Ready,
        Register::ListData,
    ];

    /// Byte offset of this cell inside the window.
    pub fn offset(self) -> usize {
        self as usize
    }

    /// Maps a raw offset back to its register, `None` outside 0..=3.
    pub fn from_offset(offset: usize) -> Option<Self> {
        Self::ALL.get(offset).copied()
    }
}

/// Byte-level access to the monitor's registers.
///
/// Reads take `&mut self` because reading a device cell is not side-effect
/// free: the monitor advances its output stream on every read.
pub trait Registers {
    fn read_byte(&mut self, reg: Register) -> u8;

    fn write_byte(&mut self, reg: Register, value: u8);

    /// Gives the window back. Only owning handles have anything to release.
    fn release(self) -> Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

impl<R: Registers + ?Sized> Registers for &mut R {
    fn read_byte(&mut self, reg: Register) -> u8 {
        (**self).read_byte(reg)
    }

    fn write_byte(&mut self, reg: Register, value: u8) {
        (**self).write_byte(reg, value)
    }
}

/// A live mapping of the monitor's registers.
///
/// The mapping and the device file handle are owned exclusively. They are
/// released by [`MappedWindow::release`], or on drop if the window goes out of
/// scope on an error path.
#[derive(Debug)]
pub struct MappedWindow {
    base: NonNull<u8>,
    map_len: usize,
    page_offset: usize,
    address: u64,
    mapped: bool,
    _device: File,
}

impl MappedWindow {
    /// Maps the window at `physical_address` through `/dev/mem`.
    pub fn acquire(physical_address: u64) -> Result<Self> {
        Self::acquire_from(Path::new(DEV_MEM), physical_address)
    }

    /// Maps the window at offset `physical_address` of `device`.
    pub fn acquire_from(device: &Path, physical_address: u64) -> Result<Self> {
        if physical_address == 0 {
            return Err(SesamError::ZeroAddress);
        }
        let map_err = |source: io::Error| SesamError::Map {
            address: physical_address,
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(device)
            .map_err(map_err)?;

        // mmap wants a page-aligned offset; the window may sit anywhere in its page.
        let page = page_size();
        let page_base = physical_address & !(page - 1);
        let page_offset = (physical_address - page_base) as usize;
        let map_len = page_offset + WINDOW_SIZE;
        let offset = libc::off_t::try_from(page_base).map_err(|_| {
            map_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "address does not fit in a file offset",
            ))
        })?;

        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                offset,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(map_err(io::Error::last_os_error()));
        }
        let base = NonNull::new(raw.cast::<u8>())
            .ok_or_else(|| map_err(io::Error::new(io::ErrorKind::Other, "mmap returned null")))?;

        tracing::debug!(
            address = %format_args!("{physical_address:#x}"),
            map_len,
            "mapped SESAM monitor window"
        );

        Ok(Self {
            base,
            map_len,
            page_offset,
            address: physical_address,
            mapped: true,
            _device: file,
        })
    }

    /// Physical address the window was mapped at.
    pub fn address(&self) -> u64 {
        self.address
    }

    fn cell(&self, reg: Register) -> *mut u8 {
        debug_assert!(self.mapped);
        // In bounds: page_offset + 3 < map_len.
        unsafe { self.base.as_ptr().add(self.page_offset + reg.offset()) }
    }

    fn unmap(&mut self) -> io::Result<()> {
        if !self.mapped {
            return Ok(());
        }
        self.mapped = false;
        let rc = unsafe { libc::munmap(self.base.as_ptr().cast(), self.map_len) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        tracing::debug!(
            address = %format_args!("{:#x}", self.address),
            "unmapped SESAM monitor window"
        );
        Ok(())
    }
}

impl Registers for MappedWindow {
    fn read_byte(&mut self, reg: Register) -> u8 {
        unsafe { ptr::read_volatile(self.cell(reg)) }
    }

    fn write_byte(&mut self, reg: Register, value: u8) {
        unsafe { ptr::write_volatile(self.cell(reg), value) }
    }

    fn release(mut self) -> Result<()> {
        let address = self.address;
        self.unmap()
            .map_err(|source| SesamError::Map { address, source })
        // The device file closes when `self` drops here.
    }
}

impl Drop for MappedWindow {
    fn drop(&mut self) {
        if let Err(e) = self.unmap() {
            tracing::warn!(error = %e, "failed to unmap SESAM monitor window");
        }
    }
}

fn page_size() -> u64 {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}
