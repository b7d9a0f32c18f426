use crate::uapi::drm::{
    DRM_IOCTL_GEM_CLOSE, DRM_IOCTL_PRIME_FD_TO_HANDLE, DRM_IOCTL_PRIME_HANDLE_TO_FD,
    DRM_IOCTL_SYNCOBJ_CREATE, DRM_IOCTL_SYNCOBJ_DESTROY, DRM_IOCTL_SYNCOBJ_RESET,
    DRM_IOCTL_SYNCOBJ_WAIT, DRM_CLOEXEC, DrmGemClose, DrmPrimeHandle, DrmSyncobjArray,
    DrmSyncobjCreate, DrmSyncobjDestroy, DrmSyncobjWait,
};
use crate::uapi::kms::{
    DRM_IOCTL_MODE_ADDFB2, DRM_IOCTL_MODE_CREATE_DUMB, DRM_IOCTL_MODE_DESTROY_DUMB,
    DRM_IOCTL_MODE_GETCONNECTOR, DRM_IOCTL_MODE_GETENCODER, DRM_IOCTL_MODE_GETRESOURCES,
    DRM_IOCTL_MODE_MAP_DUMB, DRM_IOCTL_MODE_RMFB, DRM_IOCTL_MODE_SETCRTC, DrmModeCardRes,
    DrmModeCreateDumb, DrmModeCrtc, DrmModeDestroyDumb, DrmModeFbCmd2, DrmModeGetConnector,
    DrmModeGetEncoder, DrmModeMapDumb,
};
use crate::uapi::xe::{
    DRM_IOCTL_XE_DEVICE_QUERY, DRM_IOCTL_XE_EXEC, DRM_IOCTL_XE_EXEC_QUEUE_CREATE,
    DRM_IOCTL_XE_EXEC_QUEUE_DESTROY, DRM_IOCTL_XE_GEM_CREATE, DRM_IOCTL_XE_GEM_MMAP_OFFSET,
    DRM_IOCTL_XE_VM_BIND, DRM_IOCTL_XE_VM_CREATE, DRM_IOCTL_XE_VM_DESTROY, DrmXeDeviceQuery,
    DrmXeExec, DrmXeExecQueueCreate, DrmXeExecQueueDestroy, DrmXeGemCreate, DrmXeGemMmapOffset,
    DrmXeVmBind, DrmXeVmCreate, DrmXeVmDestroy,
};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::Arc;

/// A handle to a DRM character device (`/dev/dri/renderD*` or
/// `/dev/dri/card*`).
///
/// The file descriptor is wrapped in an `Arc`, so the handle is cheap to
/// clone and share with child objects (VMs, buffer objects, queues, fences)
/// that must outlive the scope that opened the device. Closing the last
/// clone closes the fd, at which point the kernel reclaims every object
/// still alive under it.
#[derive(Clone, Debug)]
pub struct DrmDevice {
    file: Arc<File>,
}

impl DrmDevice {
    /// Opens a DRM node read/write.
    ///
    /// # Errors
    /// Returns an error if the node cannot be opened (missing driver,
    /// permissions, bad path).
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self {
            file: Arc::new(file),
        })
    }

    /// Generic unsafe helper to execute an ioctl.
    ///
    /// # Safety
    /// The caller must ensure that `arg` is the argument type the kernel
    /// expects for `cmd`, including any user pointers embedded in it.
    unsafe fn ioctl<T>(&self, cmd: u32, arg: &mut T) -> io::Result<()> {
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), cmd as _, arg as *mut T) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    // ===========================================================================================
    // Device Queries
    // ===========================================================================================

    /// Runs one device query kind and returns the raw reply bytes.
    ///
    /// The kernel protocol is a size probe followed by a fill call. The
    /// underlying resource set may change between the two, so on a size
    /// mismatch the probe is re-run instead of surfacing the stale size to
    /// the caller; the two-call shape never escapes this method.
    pub fn device_query(&self, kind: u32) -> io::Result<Vec<u8>> {
        for _ in 0..3 {
            let mut query = DrmXeDeviceQuery {
                query: kind,
                ..Default::default()
            };
            unsafe {
                self.ioctl(DRM_IOCTL_XE_DEVICE_QUERY, &mut query)?;
            }

            if query.size == 0 {
                return Ok(Vec::new());
            }

            let mut reply = vec![0u8; query.size as usize];
            query.data = reply.as_mut_ptr() as u64;

            match unsafe { self.ioctl(DRM_IOCTL_XE_DEVICE_QUERY, &mut query) } {
                Ok(()) => return Ok(reply),
                // The resource set grew between probe and fill; re-probe.
                Err(e) if e.raw_os_error() == Some(libc::EINVAL) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "device query size kept changing between probe and fill",
        ))
    }

    // ===========================================================================================
    // VM Management
    // ===========================================================================================

    /// Create a GPU virtual address space and return its id.
    pub fn vm_create(&self, flags: u32) -> io::Result<u32> {
        let mut args = DrmXeVmCreate {
            flags,
            ..Default::default()
        };
        unsafe {
            self.ioctl(DRM_IOCTL_XE_VM_CREATE, &mut args)?;
        }
        Ok(args.vm_id)
    }

    pub fn vm_destroy(&self, vm_id: u32) -> io::Result<()> {
        let mut args = DrmXeVmDestroy {
            vm_id,
            ..Default::default()
        };
        unsafe { self.ioctl(DRM_IOCTL_XE_VM_DESTROY, &mut args) }
    }

    /// Execute a (synchronous) bind batch. Any op array referenced through
    /// `args.input.vector_of_binds` must stay alive across the call.
    pub fn vm_bind(&self, args: &mut DrmXeVmBind) -> io::Result<()> {
        unsafe { self.ioctl(DRM_IOCTL_XE_VM_BIND, args) }
    }

    // ===========================================================================================
    // GEM Buffers
    // ===========================================================================================

    /// Allocate a GEM buffer. On success `args.handle` and `args.size`
    /// (rounded up by the kernel) are populated.
    pub fn gem_create(&self, args: &mut DrmXeGemCreate) -> io::Result<()> {
        unsafe { self.ioctl(DRM_IOCTL_XE_GEM_CREATE, args) }
    }

    /// Query the fake offset used to `mmap` a GEM buffer through this fd.
    pub fn gem_mmap_offset(&self, handle: u32) -> io::Result<u64> {
        let mut args = DrmXeGemMmapOffset {
            handle,
            ..Default::default()
        };
        unsafe {
            self.ioctl(DRM_IOCTL_XE_GEM_MMAP_OFFSET, &mut args)?;
        }
        Ok(args.offset)
    }

    pub fn gem_close(&self, handle: u32) -> io::Result<()> {
        let mut args = DrmGemClose { handle, pad: 0 };
        unsafe { self.ioctl(DRM_IOCTL_GEM_CLOSE, &mut args) }
    }

    // ===========================================================================================
    // Exec Queues & Submission
    // ===========================================================================================

    pub fn exec_queue_create(&self, args: &mut DrmXeExecQueueCreate) -> io::Result<()> {
        unsafe { self.ioctl(DRM_IOCTL_XE_EXEC_QUEUE_CREATE, args) }
    }

    pub fn exec_queue_destroy(&self, exec_queue_id: u32) -> io::Result<()> {
        let mut args = DrmXeExecQueueDestroy {
            exec_queue_id,
            ..Default::default()
        };
        unsafe { self.ioctl(DRM_IOCTL_XE_EXEC_QUEUE_DESTROY, &mut args) }
    }

    /// Submit a batch. The sync array referenced through `args.syncs` must
    /// stay alive across the call.
    pub fn exec(&self, args: &mut DrmXeExec) -> io::Result<()> {
        unsafe { self.ioctl(DRM_IOCTL_XE_EXEC, args) }
    }

    // ===========================================================================================
    // Syncobjs
    // ===========================================================================================

    /// Create an unsignaled binary syncobj and return its handle.
    pub fn syncobj_create(&self, flags: u32) -> io::Result<u32> {
        let mut args = DrmSyncobjCreate { handle: 0, flags };
        unsafe {
            self.ioctl(DRM_IOCTL_SYNCOBJ_CREATE, &mut args)?;
        }
        Ok(args.handle)
    }

    pub fn syncobj_destroy(&self, handle: u32) -> io::Result<()> {
        let mut args = DrmSyncobjDestroy { handle, pad: 0 };
        unsafe { self.ioctl(DRM_IOCTL_SYNCOBJ_DESTROY, &mut args) }
    }

    /// Force a syncobj back to the unsignaled state.
    pub fn syncobj_reset(&self, handle: u32) -> io::Result<()> {
        let mut handle = handle;
        let mut args = DrmSyncobjArray {
            handles: std::ptr::from_mut(&mut handle) as u64,
            count_handles: 1,
            pad: 0,
        };
        unsafe { self.ioctl(DRM_IOCTL_SYNCOBJ_RESET, &mut args) }
    }

    /// Block until the syncobj signals or the absolute CLOCK_MONOTONIC
    /// deadline passes. The kernel reports a missed deadline as `ETIME`.
    pub fn syncobj_wait(&self, handle: u32, deadline_ns: i64) -> io::Result<()> {
        let mut handle = handle;
        let mut args = DrmSyncobjWait {
            handles: std::ptr::from_mut(&mut handle) as u64,
            timeout_nsec: deadline_ns,
            count_handles: 1,
            ..Default::default()
        };
        unsafe { self.ioctl(DRM_IOCTL_SYNCOBJ_WAIT, &mut args) }
    }

    // ===========================================================================================
    // PRIME Buffer Sharing
    // ===========================================================================================

    /// Export a GEM handle as a dma-buf fd, transferable to other sessions.
    pub fn prime_handle_to_fd(&self, handle: u32) -> io::Result<OwnedFd> {
        let mut args = DrmPrimeHandle {
            handle,
            flags: DRM_CLOEXEC,
            fd: -1,
        };
        unsafe {
            self.ioctl(DRM_IOCTL_PRIME_HANDLE_TO_FD, &mut args)?;
        }
        Ok(unsafe { OwnedFd::from_raw_fd(args.fd) })
    }

    /// Import a dma-buf fd as a GEM handle local to this device.
    pub fn prime_fd_to_handle(&self, fd: BorrowedFd<'_>) -> io::Result<u32> {
        let mut args = DrmPrimeHandle {
            handle: 0,
            flags: 0,
            fd: fd.as_raw_fd(),
        };
        unsafe {
            self.ioctl(DRM_IOCTL_PRIME_FD_TO_HANDLE, &mut args)?;
        }
        Ok(args.handle)
    }

    // ===========================================================================================
    // Modesetting
    // ===========================================================================================

    pub fn mode_get_resources(&self, args: &mut DrmModeCardRes) -> io::Result<()> {
        unsafe { self.ioctl(DRM_IOCTL_MODE_GETRESOURCES, args) }
    }

    pub fn mode_get_connector(&self, args: &mut DrmModeGetConnector) -> io::Result<()> {
        unsafe { self.ioctl(DRM_IOCTL_MODE_GETCONNECTOR, args) }
    }

    pub fn mode_get_encoder(&self, encoder_id: u32) -> io::Result<DrmModeGetEncoder> {
        let mut args = DrmModeGetEncoder {
            encoder_id,
            ..Default::default()
        };
        unsafe {
            self.ioctl(DRM_IOCTL_MODE_GETENCODER, &mut args)?;
        }
        Ok(args)
    }

    pub fn mode_add_fb2(&self, args: &mut DrmModeFbCmd2) -> io::Result<()> {
        unsafe { self.ioctl(DRM_IOCTL_MODE_ADDFB2, args) }
    }

    pub fn mode_rm_fb(&self, fb_id: u32) -> io::Result<()> {
        let mut fb_id = fb_id;
        unsafe { self.ioctl(DRM_IOCTL_MODE_RMFB, &mut fb_id) }
    }

    pub fn mode_set_crtc(&self, args: &mut DrmModeCrtc) -> io::Result<()> {
        unsafe { self.ioctl(DRM_IOCTL_MODE_SETCRTC, args) }
    }

    pub fn mode_create_dumb(&self, args: &mut DrmModeCreateDumb) -> io::Result<()> {
        unsafe { self.ioctl(DRM_IOCTL_MODE_CREATE_DUMB, args) }
    }

    pub fn mode_map_dumb(&self, handle: u32) -> io::Result<u64> {
        let mut args = DrmModeMapDumb {
            handle,
            ..Default::default()
        };
        unsafe {
            self.ioctl(DRM_IOCTL_MODE_MAP_DUMB, &mut args)?;
        }
        Ok(args.offset)
    }

    pub fn mode_destroy_dumb(&self, handle: u32) -> io::Result<()> {
        let mut args = DrmModeDestroyDumb { handle };
        unsafe { self.ioctl(DRM_IOCTL_MODE_DESTROY_DUMB, &mut args) }
    }
}

impl AsRawFd for DrmDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
