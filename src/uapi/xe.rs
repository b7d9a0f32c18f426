//! Xe driver UAPI: argument structs and ioctl numbers for the device-query,
//! VM, GEM, exec-queue, bind and exec families.

use crate::uapi::{DRM_COMMAND_BASE, drm_iowr};

// ===============================================================================================
// Device Queries
// ===============================================================================================

pub const DRM_XE_DEVICE_QUERY_ENGINES: u32 = 0;
pub const DRM_XE_DEVICE_QUERY_MEM_REGIONS: u32 = 1;
pub const DRM_XE_DEVICE_QUERY_CONFIG: u32 = 2;
pub const DRM_XE_DEVICE_QUERY_GT_LIST: u32 = 3;

/// Two-phase query transport: with `size == 0` the kernel reports the reply
/// size; with `data` pointing at a buffer of that size it fills the reply.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmXeDeviceQuery {
    pub extensions: u64,
    pub query: u32,
    pub size: u32,
    pub data: u64,
    pub reserved: [u64; 2],
}

pub const DRM_XE_ENGINE_CLASS_RENDER: u16 = 0;
pub const DRM_XE_ENGINE_CLASS_COPY: u16 = 1;
pub const DRM_XE_ENGINE_CLASS_VIDEO_DECODE: u16 = 2;
pub const DRM_XE_ENGINE_CLASS_VIDEO_ENHANCE: u16 = 3;
pub const DRM_XE_ENGINE_CLASS_COMPUTE: u16 = 4;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DrmXeEngineClassInstance {
    pub engine_class: u16,
    pub engine_instance: u16,
    pub gt_id: u16,
    pub pad: u16,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmXeEngine {
    pub instance: DrmXeEngineClassInstance,
    pub reserved: [u64; 3],
}

/// Reply header for `DRM_XE_DEVICE_QUERY_ENGINES`; `num_engines` entries of
/// [`DrmXeEngine`] follow it in the reply buffer.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmXeQueryEngines {
    pub num_engines: u32,
    pub pad: u32,
}

pub const DRM_XE_MEM_REGION_CLASS_SYSMEM: u16 = 0;
pub const DRM_XE_MEM_REGION_CLASS_VRAM: u16 = 1;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmXeMemRegion {
    pub mem_class: u16,
    pub instance: u16,
    pub min_page_size: u32,
    pub total_size: u64,
    pub used: u64,
    pub cpu_visible_size: u64,
    pub cpu_visible_used: u64,
    pub reserved: [u64; 6],
}

/// Reply header for `DRM_XE_DEVICE_QUERY_MEM_REGIONS`; `num_mem_regions`
/// entries of [`DrmXeMemRegion`] follow it.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmXeQueryMemRegions {
    pub num_mem_regions: u32,
    pub pad: u32,
}

// ===============================================================================================
// VM Create / Destroy
// ===============================================================================================

pub const DRM_XE_VM_CREATE_FLAG_SCRATCH_PAGE: u32 = 1 << 0;
pub const DRM_XE_VM_CREATE_FLAG_LR_MODE: u32 = 1 << 1;
pub const DRM_XE_VM_CREATE_FLAG_FAULT_MODE: u32 = 1 << 2;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmXeVmCreate {
    pub extensions: u64,
    pub flags: u32,
    pub vm_id: u32,
    pub reserved: [u64; 2],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmXeVmDestroy {
    pub vm_id: u32,
    pub pad: u32,
    pub reserved: [u64; 2],
}

// ===============================================================================================
// GEM Create / Mmap Offset
// ===============================================================================================

pub const DRM_XE_GEM_CREATE_FLAG_DEFER_BACKING: u32 = 1 << 0;
pub const DRM_XE_GEM_CREATE_FLAG_SCANOUT: u32 = 1 << 1;
pub const DRM_XE_GEM_CREATE_FLAG_NEEDS_VISIBLE_VRAM: u32 = 1 << 2;

pub const DRM_XE_GEM_CPU_CACHING_WB: u16 = 1;
pub const DRM_XE_GEM_CPU_CACHING_WC: u16 = 2;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmXeGemCreate {
    pub extensions: u64,
    pub size: u64,
    pub placement: u32,
    pub flags: u32,
    pub vm_id: u32,
    pub handle: u32,
    pub cpu_caching: u16,
    pub pad: [u16; 3],
    pub reserved: [u64; 2],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmXeGemMmapOffset {
    pub extensions: u64,
    pub handle: u32,
    pub flags: u32,
    pub offset: u64,
    pub reserved: [u64; 2],
}

// ===============================================================================================
// VM Bind
// ===============================================================================================

pub const DRM_XE_VM_BIND_OP_MAP: u32 = 0;
pub const DRM_XE_VM_BIND_OP_UNMAP: u32 = 1;
pub const DRM_XE_VM_BIND_OP_MAP_USERPTR: u32 = 2;
pub const DRM_XE_VM_BIND_OP_UNMAP_ALL: u32 = 3;
pub const DRM_XE_VM_BIND_OP_PREFETCH: u32 = 4;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmXeVmBindOp {
    pub extensions: u64,
    pub obj: u32,
    pub pat_index: u16,
    pub pad: u16,
    pub obj_offset: u64,
    pub range: u64,
    pub addr: u64,
    pub op: u32,
    pub flags: u32,
    pub prefetch_mem_region_instance: u32,
    pub pad2: u32,
    pub reserved: [u64; 3],
}

/// One inline op for `num_binds == 1`, or a user pointer to an array of
/// [`DrmXeVmBindOp`] for larger batches.
#[repr(C)]
#[derive(Copy, Clone)]
pub union DrmXeVmBindInput {
    pub bind: DrmXeVmBindOp,
    pub vector_of_binds: u64,
}

#[repr(C)]
pub struct DrmXeVmBind {
    pub extensions: u64,
    pub vm_id: u32,
    pub exec_queue_id: u32,
    pub pad: u32,
    pub num_binds: u32,
    pub input: DrmXeVmBindInput,
    pub pad2: u32,
    pub num_syncs: u32,
    pub syncs: u64,
    pub reserved: [u64; 2],
}

impl Default for DrmXeVmBind {
    fn default() -> Self {
        // All-zero bytes are a valid initial state for this argument block,
        // union included.
        unsafe { std::mem::zeroed() }
    }
}

// ===============================================================================================
// Exec Queues & Submission
// ===============================================================================================

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmXeExecQueueCreate {
    pub extensions: u64,
    pub width: u16,
    pub num_placements: u16,
    pub vm_id: u32,
    pub flags: u32,
    pub exec_queue_id: u32,
    pub instances: u64,
    pub reserved: [u64; 2],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmXeExecQueueDestroy {
    pub exec_queue_id: u32,
    pub pad: u32,
    pub reserved: [u64; 2],
}

pub const DRM_XE_SYNC_TYPE_SYNCOBJ: u32 = 0;
pub const DRM_XE_SYNC_TYPE_TIMELINE_SYNCOBJ: u32 = 1;
pub const DRM_XE_SYNC_TYPE_USER_FENCE: u32 = 2;

pub const DRM_XE_SYNC_FLAG_SIGNAL: u32 = 1 << 0;

/// Sync-primitive slot of the exec and bind ioctls. The kernel declares the
/// handle as a union with a user-fence address; only the binary-syncobj arm
/// is used here, so the other arm is spelled as explicit padding.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmXeSync {
    pub extensions: u64,
    pub sync_type: u32,
    pub flags: u32,
    pub handle: u32,
    pub pad: u32,
    pub timeline_value: u64,
    pub reserved: [u64; 2],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmXeExec {
    pub extensions: u64,
    pub exec_queue_id: u32,
    pub num_syncs: u32,
    pub syncs: u64,
    pub address: u64,
    pub num_batch_buffer: u16,
    pub pad: [u16; 3],
    pub reserved: [u64; 2],
}

// ===============================================================================================
// Ioctl Numbers
// ===============================================================================================

pub const DRM_XE_DEVICE_QUERY: u32 = 0x00;
pub const DRM_XE_GEM_CREATE: u32 = 0x01;
pub const DRM_XE_GEM_MMAP_OFFSET: u32 = 0x02;
pub const DRM_XE_VM_CREATE: u32 = 0x03;
pub const DRM_XE_VM_DESTROY: u32 = 0x04;
pub const DRM_XE_VM_BIND: u32 = 0x05;
pub const DRM_XE_EXEC_QUEUE_CREATE: u32 = 0x06;
pub const DRM_XE_EXEC_QUEUE_DESTROY: u32 = 0x07;
pub const DRM_XE_EXEC: u32 = 0x09;

pub const DRM_IOCTL_XE_DEVICE_QUERY: u32 =
    drm_iowr::<DrmXeDeviceQuery>(DRM_COMMAND_BASE + DRM_XE_DEVICE_QUERY);
pub const DRM_IOCTL_XE_GEM_CREATE: u32 =
    drm_iowr::<DrmXeGemCreate>(DRM_COMMAND_BASE + DRM_XE_GEM_CREATE);
pub const DRM_IOCTL_XE_GEM_MMAP_OFFSET: u32 =
    drm_iowr::<DrmXeGemMmapOffset>(DRM_COMMAND_BASE + DRM_XE_GEM_MMAP_OFFSET);
pub const DRM_IOCTL_XE_VM_CREATE: u32 =
    drm_iowr::<DrmXeVmCreate>(DRM_COMMAND_BASE + DRM_XE_VM_CREATE);
pub const DRM_IOCTL_XE_VM_DESTROY: u32 =
    drm_iowr::<DrmXeVmDestroy>(DRM_COMMAND_BASE + DRM_XE_VM_DESTROY);
pub const DRM_IOCTL_XE_VM_BIND: u32 = drm_iowr::<DrmXeVmBind>(DRM_COMMAND_BASE + DRM_XE_VM_BIND);
pub const DRM_IOCTL_XE_EXEC_QUEUE_CREATE: u32 =
    drm_iowr::<DrmXeExecQueueCreate>(DRM_COMMAND_BASE + DRM_XE_EXEC_QUEUE_CREATE);
pub const DRM_IOCTL_XE_EXEC_QUEUE_DESTROY: u32 =
    drm_iowr::<DrmXeExecQueueDestroy>(DRM_COMMAND_BASE + DRM_XE_EXEC_QUEUE_DESTROY);
pub const DRM_IOCTL_XE_EXEC: u32 = drm_iowr::<DrmXeExec>(DRM_COMMAND_BASE + DRM_XE_EXEC);

// ===============================================================================================
// ABI Layout Checks
// ===============================================================================================

const _: () = assert!(std::mem::size_of::<DrmXeDeviceQuery>() == 40);
const _: () = assert!(std::mem::size_of::<DrmXeEngineClassInstance>() == 8);
const _: () = assert!(std::mem::size_of::<DrmXeEngine>() == 32);
const _: () = assert!(std::mem::size_of::<DrmXeQueryEngines>() == 8);
const _: () = assert!(std::mem::size_of::<DrmXeMemRegion>() == 88);
const _: () = assert!(std::mem::size_of::<DrmXeQueryMemRegions>() == 8);
const _: () = assert!(std::mem::size_of::<DrmXeVmCreate>() == 32);
const _: () = assert!(std::mem::size_of::<DrmXeVmDestroy>() == 24);
const _: () = assert!(std::mem::size_of::<DrmXeGemCreate>() == 56);
const _: () = assert!(std::mem::size_of::<DrmXeGemMmapOffset>() == 40);
const _: () = assert!(std::mem::size_of::<DrmXeVmBindOp>() == 80);
const _: () = assert!(std::mem::size_of::<DrmXeVmBind>() == 136);
const _: () = assert!(std::mem::size_of::<DrmXeExecQueueCreate>() == 48);
const _: () = assert!(std::mem::size_of::<DrmXeExecQueueDestroy>() == 24);
const _: () = assert!(std::mem::size_of::<DrmXeSync>() == 48);
const _: () = assert!(std::mem::size_of::<DrmXeExec>() == 56);
const _: () = assert!(std::mem::offset_of!(DrmXeVmBind, input) == 24);
const _: () = assert!(std::mem::offset_of!(DrmXeVmBind, syncs) == 112);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ioctl_numbers_match_kernel_header() {
        // _IOWR('d', 0x40, 40) and friends, computed by hand from the
        // kernel's encoding.
        assert_eq!(DRM_IOCTL_XE_DEVICE_QUERY, 0xC028_6440);
        assert_eq!(DRM_IOCTL_XE_GEM_CREATE, 0xC038_6441);
        assert_eq!(DRM_IOCTL_XE_VM_CREATE, 0xC020_6443);
        assert_eq!(DRM_IOCTL_XE_VM_BIND, 0xC088_6445);
        assert_eq!(DRM_IOCTL_XE_EXEC_QUEUE_CREATE, 0xC030_6446);
        assert_eq!(DRM_IOCTL_XE_EXEC, 0xC038_6449);
    }
}
