// Copyright (C) 2019  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! Register window backed by a memory mapping of the FPGA device file

use super::{PhysicalOffset, RegisterWindow, WINDOW_SIZE};

use crate::error::{self, ErrorKind};
use crate::logging::macros::*;

use failure::ResultExt;

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::atomic::{fence, Ordering};

/// Character device exposing the FPGA register block
pub const DEFAULT_DEVICE_PATH: &str = "/dev/axi_fpga_dev";

/// Mapped FPGA registers
///
/// The mapping lives as long as this object, the device file is kept open alongside it.
pub struct MmapWindow {
    regs: NonNull<u32>,
    _file: File,
}

// The mapping is plain device memory, every access is a single volatile word access.
unsafe impl Send for MmapWindow {}
unsafe impl Sync for MmapWindow {}

impl MmapWindow {
    pub fn open<P: AsRef<Path>>(path: P) -> error::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .with_context(|_| {
                ErrorKind::Window(format!("cannot open '{}'", path.display()))
            })?;

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                WINDOW_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let e = std::io::Error::last_os_error();
            Err(ErrorKind::Window(format!(
                "cannot map {} bytes of '{}': {}",
                WINDOW_SIZE,
                path.display(),
                e
            )))?
        }
        let regs = NonNull::new(ptr as *mut u32).ok_or_else(|| {
            ErrorKind::Window(format!("'{}' mapped at null address", path.display()))
        })?;
        debug!("FPGA registers of '{}' mapped at {:p}", path.display(), regs);

        Ok(Self { regs, _file: file })
    }
}

impl RegisterWindow for MmapWindow {
    #[inline]
    fn read_word(&self, offset: PhysicalOffset) -> u32 {
        // offset is bounded by construction of `PhysicalOffset`
        unsafe { ptr::read_volatile(self.regs.as_ptr().add(offset.word())) }
    }

    #[inline]
    fn write_word(&self, offset: PhysicalOffset, value: u32) {
        unsafe {
            ptr::write_volatile(self.regs.as_ptr().add(offset.word()), value);
        }
        fence(Ordering::SeqCst);
    }
}

impl Drop for MmapWindow {
    fn drop(&mut self) {
        let ret = unsafe { libc::munmap(self.regs.as_ptr() as *mut libc::c_void, WINDOW_SIZE) };
        if ret != 0 {
            warn!(
                "Failed to unmap FPGA registers: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}
