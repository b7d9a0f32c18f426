use crate::device::DrmDevice;
use crate::error::XeResult;
use crate::uapi::xe::{
    DRM_XE_GEM_CPU_CACHING_WB, DRM_XE_GEM_CPU_CACHING_WC, DRM_XE_GEM_CREATE_FLAG_SCANOUT,
    DrmXeGemCreate,
};
use crate::vm::AddressSpace;
use std::io;
use std::marker::PhantomData;
use std::os::fd::RawFd;
use std::os::unix::io::AsRawFd;
use std::ptr::NonNull;

/// `MI_BATCH_BUFFER_END`: opcode 0x0A in bits 31:23. The only command this
/// crate ever emits; a batch containing just this marker retires
/// immediately.
pub const MI_BATCH_BUFFER_END: u32 = 0x0A << 23;

/// Rounds `value` up to the next multiple of `align` (a power of two).
#[must_use]
pub const fn round_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

// ===============================================================================================
// Placement
// ===============================================================================================

/// Result of a memory-region scan: which region instances an allocation may
/// land in, and the page-size contract every bind against those regions
/// must honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Bitmask of eligible region instances. May be zero after a scan that
    /// matched nothing; allocating against a zero mask is what fails.
    pub mask: u32,
    /// Largest `min_page_size` among the matched regions.
    pub min_page_size: u64,
}

impl Placement {
    pub const DEFAULT_PAGE_SIZE: u64 = 4096;

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.mask == 0
    }

    /// Smallest bindable size covering `size` under this placement's page
    /// contract.
    #[must_use]
    pub const fn aligned_size(&self, size: u64) -> u64 {
        round_up(size, self.min_page_size)
    }
}

/// CPU caching policy requested at buffer creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuCaching {
    WriteBack,
    WriteCombined,
}

impl CpuCaching {
    const fn as_raw(self) -> u16 {
        match self {
            Self::WriteBack => DRM_XE_GEM_CPU_CACHING_WB,
            Self::WriteCombined => DRM_XE_GEM_CPU_CACHING_WC,
        }
    }
}

// ===============================================================================================
// Buffer Objects
// ===============================================================================================

/// A GEM buffer tied to one address space.
///
/// Carries the page-size contract of the placement it was created against;
/// bind validation reads it from here. Dropping the object closes the GEM
/// handle.
#[derive(Debug)]
pub struct BufferObject {
    device: DrmDevice,
    handle: u32,
    size: u64,
    min_page_size: u64,
}

impl BufferObject {
    /// Allocates `size` bytes in one of the placement's regions, owned by
    /// `vm`. The kernel may round the size up; the effective size is what
    /// [`BufferObject::size`] reports and what binds should cover.
    ///
    /// # Errors
    /// Any driver-level failure, including allocating against an empty
    /// placement mask.
    pub fn create(
        device: &DrmDevice,
        vm: &AddressSpace,
        size: u64,
        placement: &Placement,
        caching: CpuCaching,
    ) -> XeResult<Self> {
        Self::create_with_flags(device, vm.id(), size, placement, caching, 0)
    }

    /// Like [`BufferObject::create`], but scanout-capable and shareable:
    /// required for a buffer that will be exported to a display session
    /// and attached to an output. Such a buffer is not VM-private (the
    /// kernel refuses to export private buffers), so it carries no owning
    /// VM; it can still be bound into one.
    pub fn create_scanout(
        device: &DrmDevice,
        size: u64,
        placement: &Placement,
        caching: CpuCaching,
    ) -> XeResult<Self> {
        Self::create_with_flags(
            device,
            0,
            size,
            placement,
            caching,
            DRM_XE_GEM_CREATE_FLAG_SCANOUT,
        )
    }

    fn create_with_flags(
        device: &DrmDevice,
        vm_id: u32,
        size: u64,
        placement: &Placement,
        caching: CpuCaching,
        flags: u32,
    ) -> XeResult<Self> {
        let mut args = DrmXeGemCreate {
            size,
            placement: placement.mask,
            flags,
            vm_id,
            cpu_caching: caching.as_raw(),
            ..Default::default()
        };
        device.gem_create(&mut args)?;

        log::debug!(
            "bo created: handle={} size={} placement={:#x}",
            args.handle,
            args.size,
            placement.mask
        );

        Ok(Self {
            device: device.clone(),
            handle: args.handle,
            size: args.size,
            min_page_size: placement.min_page_size,
        })
    }

    #[must_use]
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Effective (kernel-rounded) size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn min_page_size(&self) -> u64 {
        self.min_page_size
    }

    /// Maps the whole buffer read/write into this process.
    ///
    /// The mapping is exclusively held for as long as the returned guard
    /// lives. CPU stores through it become visible to the GPU once a
    /// binding for the buffer exists; no flush is issued in between, which
    /// is an ordering assumption of this design rather than a contract.
    pub fn map(&mut self) -> XeResult<Mapping<'_>> {
        let offset = self.device.gem_mmap_offset(self.handle)?;
        let mapping =
            unsafe { Mapping::map_shared(self.device.as_raw_fd(), offset, self.size as usize)? };
        Ok(mapping)
    }
}

impl Drop for BufferObject {
    fn drop(&mut self) {
        if let Err(e) = self.device.gem_close(self.handle) {
            log::warn!("failed to close bo handle {}: {e}", self.handle);
        }
    }
}

// ===============================================================================================
// CPU Mappings
// ===============================================================================================

/// A shared read/write CPU mapping of a device buffer, unmapped on drop.
///
/// The lifetime pins the owning buffer mutably, so at most one mapping of a
/// buffer exists at a time.
#[derive(Debug)]
pub struct Mapping<'a> {
    ptr: NonNull<u8>,
    len: usize,
    _owner: PhantomData<&'a mut ()>,
}

impl Mapping<'_> {
    /// # Safety
    /// `offset` must be a mappable offset for `fd` covering `len` bytes,
    /// and the caller must tie the returned lifetime to the object that
    /// owns the backing store.
    pub(crate) unsafe fn map_shared(fd: RawFd, offset: u64, len: usize) -> io::Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap succeeded with a NULL mapping"))?;

        Ok(Self {
            ptr,
            len,
            _owner: PhantomData,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Writes the end-of-batch marker at the start of the mapping, turning
    /// the buffer into a valid no-op batch.
    pub fn write_batch_end(&mut self) {
        let words = [MI_BATCH_BUFFER_END, 0];
        let bytes = self.as_mut_slice();
        for (i, word) in words.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&word.to_ne_bytes());
        }
    }
}

impl Drop for Mapping<'_> {
    fn drop(&mut self) {
        let ret = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
        if ret != 0 {
            log::warn!("munmap failed: {}", io::Error::last_os_error());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_is_identity_on_multiples() {
        assert_eq!(round_up(4096, 4096), 4096);
        assert_eq!(round_up(8192, 4096), 8192);
    }

    #[test]
    fn round_up_advances_partial_pages() {
        assert_eq!(round_up(1, 4096), 4096);
        assert_eq!(round_up(4097, 4096), 8192);
        assert_eq!(round_up(0, 4096), 0);
    }

    #[test]
    fn aligned_size_follows_the_region_contract() {
        let placement = Placement {
            mask: 0b1,
            min_page_size: 65536,
        };
        assert_eq!(placement.aligned_size(4096), 65536);
        assert!(!placement.is_empty());
    }

    #[test]
    fn batch_end_marker_matches_command_encoding() {
        assert_eq!(MI_BATCH_BUFFER_END, 0x0500_0000);
    }
}
