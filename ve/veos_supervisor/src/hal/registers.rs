// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Maps the accelerator's control-register window out of its sysfs
//! resource file, the same `mmap` idiom `user_driver::lockmem` uses for
//! locked DMA memory.

#![expect(unsafe_code)]

use fs_err::OpenOptions;
use std::ffi::c_void;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use ve_hal::RegisterIo;

pub struct MmapRegisterIo {
    addr: *mut c_void,
    len: usize,
}

// SAFETY: the mapping is a plain MMIO-backed region; no thread owns
// exclusive access to the pointer, and all access goes through volatile
// atomic reads/writes below.
unsafe impl Send for MmapRegisterIo {}
// SAFETY: see above.
unsafe impl Sync for MmapRegisterIo {}

impl MmapRegisterIo {
    /// Opens and maps `resource_path` (typically a sysfs `resourceN` file)
    /// read/write, `len` bytes.
    pub fn open(resource_path: impl AsRef<Path>, len: usize) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(resource_path.as_ref())?;

        // SAFETY: `file` is a valid, open file descriptor backing the
        // register window; the result is checked against MAP_FAILED before
        // use.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            anyhow::bail!("mmap of {} failed: {}", resource_path.as_ref().display(), std::io::Error::last_os_error());
        }
        Ok(Self { addr, len })
    }

    fn check(&self, offset: usize, width: usize) {
        assert!(offset + width <= self.len, "register offset {offset} out of bounds (window is {} bytes)", self.len);
    }
}

impl Drop for MmapRegisterIo {
    fn drop(&mut self) {
        // SAFETY: `addr`/`len` are exactly the mapping `open` created.
        unsafe {
            libc::munmap(self.addr, self.len);
        }
    }
}

impl RegisterIo for MmapRegisterIo {
    fn read_u32(&self, offset: usize) -> u32 {
        self.check(offset, 4);
        // SAFETY: bounds checked above; the mapping stays alive for the
        // lifetime of `self`.
        unsafe { (*(self.addr.add(offset) as *const AtomicU32)).load(Ordering::Acquire) }
    }

    fn write_u32(&self, offset: usize, value: u32) {
        self.check(offset, 4);
        // SAFETY: see `read_u32`.
        unsafe { (*(self.addr.add(offset) as *const AtomicU32)).store(value, Ordering::Release) }
    }

    fn read_u64(&self, offset: usize) -> u64 {
        self.check(offset, 8);
        // SAFETY: see `read_u32`.
        unsafe { (*(self.addr.add(offset) as *const AtomicU64)).load(Ordering::Acquire) }
    }

    fn write_u64(&self, offset: usize, value: u64) {
        self.check(offset, 8);
        // SAFETY: see `read_u32`.
        unsafe { (*(self.addr.add(offset) as *const AtomicU64)).store(value, Ordering::Release) }
    }

    fn fence(&self) {
        fence(Ordering::SeqCst);
    }
}
