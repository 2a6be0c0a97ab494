use crate::{Error, Result, backend::State};
use nix::sys::{
    memfd,
    mman::{self, MapFlags, ProtFlags},
};
use std::{
    ffi::c_void,
    fs::File,
    num::NonZeroUsize,
    os::fd::AsFd,
    path::{Path, PathBuf},
    ptr::NonNull,
};
use wayland_client::{
    QueueHandle,
    protocol::{wl_buffer, wl_shm},
};

/// Directory that holds the anonymous buffer files when `memfd` is unavailable
pub fn runtime_dir() -> Result<PathBuf> {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => Err(Error::RuntimeDirUnset),
    }
}

/// Size of one pixel in bytes, for the formats we know how to move around
pub fn bytes_per_pixel(format: wl_shm::Format) -> Option<u32> {
    use wl_shm::Format;

    match format {
        Format::Argb8888
        | Format::Xrgb8888
        | Format::Abgr8888
        | Format::Xbgr8888
        | Format::Rgba8888
        | Format::Rgbx8888
        | Format::Bgra8888
        | Format::Bgrx8888
        | Format::Argb2101010
        | Format::Xrgb2101010
        | Format::Abgr2101010
        | Format::Xbgr2101010 => Some(4),
        Format::Rgb888 | Format::Bgr888 => Some(3),
        Format::Rgb565
        | Format::Bgr565
        | Format::Xrgb1555
        | Format::Argb1555
        | Format::Xbgr1555
        | Format::Abgr1555
        | Format::Xrgb4444
        | Format::Argb4444 => Some(2),
        Format::Xbgr16161616f | Format::Abgr16161616f => Some(8),
        _ => None,
    }
}

/// Layout of a shared pixel buffer as negotiated with the compositor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescription {
    pub format: wl_shm::Format,
    pub width: u32,
    pub height: u32,

    /// Bytes per row
    pub stride: u32,
}

impl BufferDescription {
    /// Tightly packed layout for `format`
    pub fn packed(format: wl_shm::Format, width: u32, height: u32) -> Result<Self> {
        let bpp = bytes_per_pixel(format)
            .ok_or_else(|| Error::UnsupportedFormat(format!("{format:?}")))?;

        let stride = width
            .checked_mul(bpp)
            .ok_or_else(|| Error::BufferLayout(format!("{width}x{height} overflows")))?;

        Ok(Self {
            format,
            width,
            height,
            stride,
        })
    }

    /// Byte size of the mapping, `stride * height`, once the layout is validated.
    ///
    /// Zero-sized images and rows wider than `stride` are rejected, as is
    /// anything that doesn't fit into a `wl_shm_pool`.
    pub fn size(&self) -> Result<usize> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::BufferLayout(format!(
                "zero-sized buffer {}x{}",
                self.width, self.height
            )));
        }

        let min_stride = bytes_per_pixel(self.format).map_or(self.width as u64, |bpp| {
            self.width as u64 * bpp as u64
        });

        if min_stride > self.stride as u64 {
            return Err(Error::BufferLayout(format!(
                "stride {} is smaller than a row of {} bytes",
                self.stride, min_stride
            )));
        }

        let size = self.stride as u64 * self.height as u64;
        if size > i32::MAX as u64 {
            return Err(Error::BufferLayout(format!("{size} bytes is too large")));
        }

        Ok(size as usize)
    }
}

/// Anonymous, close-on-exec file mapped shared into our address space
#[derive(Debug)]
pub struct SharedMemory {
    file: File,
    ptr: NonNull<c_void>,
    len: NonZeroUsize,
}

impl SharedMemory {
    pub fn create(runtime_dir: &Path, len: NonZeroUsize) -> Result<Self> {
        let file = match memfd::memfd_create(c"wayfreeze", memfd::MFdFlags::MFD_CLOEXEC) {
            Ok(fd) => File::from(fd),
            Err(e) => {
                log::debug!("memfd_create failed ({e}), using a file in {runtime_dir:?}");
                tempfile::tempfile_in(runtime_dir)?
            }
        };

        file.set_len(len.get() as u64)?;

        let ptr = unsafe {
            mman::mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                0,
            )?
        };

        Ok(Self { file, ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len.get()
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().cast::<u8>(), self.len.get()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().cast::<u8>(), self.len.get()) }
    }
}

impl AsFd for SharedMemory {
    fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        if let Err(e) = unsafe { mman::munmap(self.ptr, self.len.get()) } {
            log::warn!("failed to unmap {} bytes of shared memory: {e}", self.len);
        }
    }
}

/// Pixel buffer shared with the compositor.
///
/// The `wl_buffer` and the mapping live and die together.
#[derive(Debug)]
pub struct Buffer {
    wl_buffer: wl_buffer::WlBuffer,
    memory: SharedMemory,
    description: BufferDescription,
}

impl Buffer {
    pub(crate) fn allocate(
        wl_shm: &wl_shm::WlShm,
        runtime_dir: &Path,
        description: BufferDescription,
        queue_handle: &QueueHandle<State>,
    ) -> Result<Self> {
        let size = NonZeroUsize::new(description.size()?)
            .ok_or_else(|| Error::BufferLayout("empty buffer".to_string()))?;

        let memory = SharedMemory::create(runtime_dir, size)?;

        // The buffer keeps the backing storage alive on the server side,
        // so the pool can go right away.
        let pool = wl_shm.create_pool(memory.as_fd(), size.get() as i32, queue_handle, ());
        let wl_buffer = pool.create_buffer(
            0,
            description.width as i32,
            description.height as i32,
            description.stride as i32,
            description.format,
            queue_handle,
            (),
        );
        pool.destroy();

        log::debug!(
            "allocated {}x{} {:?} buffer, stride {}",
            description.width,
            description.height,
            description.format,
            description.stride
        );

        Ok(Self {
            wl_buffer,
            memory,
            description,
        })
    }

    pub fn wl_buffer(&self) -> &wl_buffer::WlBuffer {
        &self.wl_buffer
    }

    pub fn description(&self) -> &BufferDescription {
        &self.description
    }

    pub fn data(&self) -> &[u8] {
        self.memory.as_slice()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.memory.as_mut_slice()
    }
}

#[cfg(test)]
impl Buffer {
    /// Buffer backed by real memory but by no compositor object
    pub(crate) fn detached(description: BufferDescription) -> Self {
        let size = NonZeroUsize::new(description.size().unwrap()).unwrap();

        Self {
            wl_buffer: crate::testing::inert(),
            memory: SharedMemory::create(&std::env::temp_dir(), size).unwrap(),
            description,
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.wl_buffer.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::fcntl::{FcntlArg, FdFlag, fcntl};
    use wl_shm::Format;

    fn description(width: u32, height: u32, stride: u32) -> BufferDescription {
        BufferDescription {
            format: Format::Xrgb8888,
            width,
            height,
            stride,
        }
    }

    #[test]
    fn test_size_is_stride_times_height() {
        assert_eq!(description(1080, 1920, 4320).size().unwrap(), 4320 * 1920);
        assert_eq!(description(1000, 10, 4096).size().unwrap(), 4096 * 10);
    }

    #[test]
    fn test_short_stride_is_rejected() {
        assert!(matches!(
            description(1080, 1920, 1080 * 4 - 1).size(),
            Err(Error::BufferLayout(_))
        ));
    }

    #[test]
    fn test_zero_dimensions_are_rejected() {
        assert!(description(0, 10, 0).size().is_err());
        assert!(description(10, 0, 40).size().is_err());
    }

    #[test]
    fn test_oversized_buffer_is_rejected() {
        assert!(description(65535, 65535, 65535 * 4).size().is_err());
    }

    #[test]
    fn test_packed() {
        let packed = BufferDescription::packed(Format::Rgb888, 10, 2).unwrap();
        assert_eq!(packed.stride, 30);
        assert_eq!(packed.size().unwrap(), 60);

        assert!(matches!(
            BufferDescription::packed(Format::Yuyv, 10, 2),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_shared_memory_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = SharedMemory::create(dir.path(), NonZeroUsize::new(4096).unwrap()).unwrap();

        assert_eq!(memory.len(), 4096);
        assert!(memory.as_slice().iter().all(|b| *b == 0));

        memory.as_mut_slice()[4095] = 0xff;
        assert_eq!(memory.as_slice()[4095], 0xff);
        assert_eq!(memory.file.metadata().unwrap().len(), 4096);
    }

    #[test]
    fn test_shared_memory_is_close_on_exec() {
        let dir = tempfile::tempdir().unwrap();
        let memory = SharedMemory::create(dir.path(), NonZeroUsize::new(64).unwrap()).unwrap();

        let flags = FdFlag::from_bits_truncate(fcntl(&memory, FcntlArg::F_GETFD).unwrap());
        assert!(flags.contains(FdFlag::FD_CLOEXEC));
    }
}
