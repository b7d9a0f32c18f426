//! DRM-core UAPI shared by every driver: GEM handle close, binary syncobjs
//! and PRIME buffer sharing.

use crate::uapi::{drm_iow, drm_iowr};

// ===============================================================================================
// GEM
// ===============================================================================================

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmGemClose {
    pub handle: u32,
    pub pad: u32,
}

// ===============================================================================================
// Syncobjs
// ===============================================================================================

/// Create an already-signaled syncobj.
pub const DRM_SYNCOBJ_CREATE_SIGNALED: u32 = 1 << 0;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmSyncobjCreate {
    pub handle: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmSyncobjDestroy {
    pub handle: u32,
    pub pad: u32,
}

/// Handle list argument for reset/signal operations.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmSyncobjArray {
    pub handles: u64,
    pub count_handles: u32,
    pub pad: u32,
}

pub const DRM_SYNCOBJ_WAIT_FLAGS_WAIT_ALL: u32 = 1 << 0;
pub const DRM_SYNCOBJ_WAIT_FLAGS_WAIT_FOR_SUBMIT: u32 = 1 << 1;

/// `timeout_nsec` is an absolute CLOCK_MONOTONIC deadline, not a duration.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmSyncobjWait {
    pub handles: u64,
    pub timeout_nsec: i64,
    pub count_handles: u32,
    pub flags: u32,
    pub first_signaled: u32,
    pub pad: u32,
    pub deadline_nsec: u64,
}

// ===============================================================================================
// PRIME (dma-buf sharing)
// ===============================================================================================

pub const DRM_CLOEXEC: u32 = libc::O_CLOEXEC as u32;
pub const DRM_RDWR: u32 = libc::O_RDWR as u32;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmPrimeHandle {
    pub handle: u32,
    pub flags: u32,
    pub fd: i32,
}

// ===============================================================================================
// Ioctl Numbers
// ===============================================================================================

pub const DRM_IOCTL_GEM_CLOSE: u32 = drm_iow::<DrmGemClose>(0x09);
pub const DRM_IOCTL_PRIME_HANDLE_TO_FD: u32 = drm_iowr::<DrmPrimeHandle>(0x2D);
pub const DRM_IOCTL_PRIME_FD_TO_HANDLE: u32 = drm_iowr::<DrmPrimeHandle>(0x2E);
pub const DRM_IOCTL_SYNCOBJ_CREATE: u32 = drm_iowr::<DrmSyncobjCreate>(0xBF);
pub const DRM_IOCTL_SYNCOBJ_DESTROY: u32 = drm_iowr::<DrmSyncobjDestroy>(0xC0);
pub const DRM_IOCTL_SYNCOBJ_WAIT: u32 = drm_iowr::<DrmSyncobjWait>(0xC3);
pub const DRM_IOCTL_SYNCOBJ_RESET: u32 = drm_iowr::<DrmSyncobjArray>(0xC4);

// ===============================================================================================
// ABI Layout Checks
// ===============================================================================================

const _: () = assert!(std::mem::size_of::<DrmGemClose>() == 8);
const _: () = assert!(std::mem::size_of::<DrmSyncobjCreate>() == 8);
const _: () = assert!(std::mem::size_of::<DrmSyncobjDestroy>() == 8);
const _: () = assert!(std::mem::size_of::<DrmSyncobjArray>() == 16);
const _: () = assert!(std::mem::size_of::<DrmSyncobjWait>() == 40);
const _: () = assert!(std::mem::size_of::<DrmPrimeHandle>() == 12);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ioctl_numbers_match_kernel_header() {
        assert_eq!(DRM_IOCTL_GEM_CLOSE, 0x4008_6409);
        assert_eq!(DRM_IOCTL_PRIME_HANDLE_TO_FD, 0xC00C_642D);
        assert_eq!(DRM_IOCTL_PRIME_FD_TO_HANDLE, 0xC00C_642E);
        assert_eq!(DRM_IOCTL_SYNCOBJ_CREATE, 0xC008_64BF);
        assert_eq!(DRM_IOCTL_SYNCOBJ_WAIT, 0xC028_64C3);
        assert_eq!(DRM_IOCTL_SYNCOBJ_RESET, 0xC010_64C4);
    }
}
