use crate::device::DrmDevice;
use crate::error::{XeError, XeResult};
use crate::memory::Placement;
use crate::uapi::xe::{
    DRM_XE_DEVICE_QUERY_ENGINES, DRM_XE_DEVICE_QUERY_MEM_REGIONS, DRM_XE_ENGINE_CLASS_COMPUTE,
    DRM_XE_ENGINE_CLASS_COPY, DRM_XE_ENGINE_CLASS_RENDER, DRM_XE_ENGINE_CLASS_VIDEO_DECODE,
    DRM_XE_ENGINE_CLASS_VIDEO_ENHANCE, DRM_XE_MEM_REGION_CLASS_SYSMEM,
    DRM_XE_MEM_REGION_CLASS_VRAM, DrmXeEngine, DrmXeEngineClassInstance, DrmXeMemRegion,
    DrmXeQueryEngines, DrmXeQueryMemRegions,
};
use std::path::Path;

// ===============================================================================================
// Typed Capability Records
// ===============================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineClass {
    Render,
    Copy,
    VideoDecode,
    VideoEnhance,
    Compute,
}

impl EngineClass {
    #[must_use]
    pub const fn as_raw(self) -> u16 {
        match self {
            Self::Render => DRM_XE_ENGINE_CLASS_RENDER,
            Self::Copy => DRM_XE_ENGINE_CLASS_COPY,
            Self::VideoDecode => DRM_XE_ENGINE_CLASS_VIDEO_DECODE,
            Self::VideoEnhance => DRM_XE_ENGINE_CLASS_VIDEO_ENHANCE,
            Self::Compute => DRM_XE_ENGINE_CLASS_COMPUTE,
        }
    }
}

/// One hardware engine instance as reported by the engine query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineInfo {
    pub engine_class: u16,
    pub engine_instance: u16,
    pub gt_id: u16,
}

impl EngineInfo {
    /// The instance triple in the layout the exec-queue ioctl consumes.
    #[must_use]
    pub const fn to_instance(self) -> DrmXeEngineClassInstance {
        DrmXeEngineClassInstance {
            engine_class: self.engine_class,
            engine_instance: self.engine_instance,
            gt_id: self.gt_id,
            pad: 0,
        }
    }
}

/// One memory region as reported by the region query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRegionInfo {
    pub mem_class: u16,
    pub instance: u16,
    pub min_page_size: u32,
    pub total_size: u64,
    pub used: u64,
}

impl MemRegionInfo {
    #[must_use]
    pub const fn class_name(&self) -> &'static str {
        match self.mem_class {
            DRM_XE_MEM_REGION_CLASS_SYSMEM => "SYSMEM",
            DRM_XE_MEM_REGION_CLASS_VRAM => "VRAM",
            _ => "UNKNOWN",
        }
    }
}

// ===============================================================================================
// Device Session
// ===============================================================================================

/// An open render-node session with its capabilities cached.
///
/// The engine and memory-region lists are snapshotted once at open; every
/// later selection works against the snapshot. Sessions are plain values
/// passed to the operations that need them; nothing in this crate keeps a
/// process-global session.
#[derive(Debug)]
pub struct DeviceSession {
    device: DrmDevice,
    engines: Vec<EngineInfo>,
    mem_regions: Vec<MemRegionInfo>,
}

impl DeviceSession {
    /// Opens the render node and snapshots its capabilities.
    ///
    /// # Errors
    /// Fails if the node cannot be opened, a query ioctl fails, or the
    /// driver returns a malformed reply.
    pub fn open<P: AsRef<Path>>(path: P) -> XeResult<Self> {
        let device = DrmDevice::open(path)?;

        let engines = parse_engines(&device.device_query(DRM_XE_DEVICE_QUERY_ENGINES)?)?;
        let mem_regions =
            parse_mem_regions(&device.device_query(DRM_XE_DEVICE_QUERY_MEM_REGIONS)?)?;

        log::debug!(
            "session opened: {} engines, {} memory regions",
            engines.len(),
            mem_regions.len()
        );

        Ok(Self {
            device,
            engines,
            mem_regions,
        })
    }

    #[must_use]
    pub fn device(&self) -> &DrmDevice {
        &self.device
    }

    #[must_use]
    pub fn engines(&self) -> &[EngineInfo] {
        &self.engines
    }

    #[must_use]
    pub fn mem_regions(&self) -> &[MemRegionInfo] {
        &self.mem_regions
    }

    /// The first engine of `class` in query order.
    ///
    /// # Errors
    /// `EngineNotFound` if the device reports no such engine. Callers that
    /// cannot proceed without one treat this as fatal before any
    /// address-space work starts.
    pub fn find_engine(&self, class: EngineClass) -> XeResult<EngineInfo> {
        select_engine(&self.engines, class.as_raw()).ok_or(XeError::EngineNotFound(class.as_raw()))
    }

    /// Placement covering every system-memory region.
    ///
    /// An empty result is not an error here: the scan warns and hands back
    /// a zero mask, and the next allocation against it is what fails.
    #[must_use]
    pub fn sysmem_placement(&self) -> Placement {
        select_placement(&self.mem_regions, DRM_XE_MEM_REGION_CLASS_SYSMEM)
    }
}

// ===============================================================================================
// Reply Parsing & Selection
// ===============================================================================================

/// Reads a `#[repr(C)]` record out of a reply buffer, refusing to read past
/// the end.
fn read_record<T: Copy>(buf: &[u8], offset: usize) -> Option<T> {
    let end = offset.checked_add(std::mem::size_of::<T>())?;
    if end > buf.len() {
        return None;
    }
    // In-bounds and T is a plain-old-data UAPI mirror; unaligned read keeps
    // us independent of the Vec's allocation alignment.
    Some(unsafe { std::ptr::read_unaligned(buf.as_ptr().add(offset).cast::<T>()) })
}

fn truncated(what: &str) -> XeError {
    XeError::Driver(format!("truncated {what} query reply"))
}

fn parse_engines(reply: &[u8]) -> XeResult<Vec<EngineInfo>> {
    let header: DrmXeQueryEngines =
        read_record(reply, 0).ok_or_else(|| truncated("engine"))?;

    let mut engines = Vec::with_capacity(header.num_engines as usize);
    let base = std::mem::size_of::<DrmXeQueryEngines>();
    let stride = std::mem::size_of::<DrmXeEngine>();

    for i in 0..header.num_engines as usize {
        let entry: DrmXeEngine =
            read_record(reply, base + i * stride).ok_or_else(|| truncated("engine"))?;
        engines.push(EngineInfo {
            engine_class: entry.instance.engine_class,
            engine_instance: entry.instance.engine_instance,
            gt_id: entry.instance.gt_id,
        });
    }

    Ok(engines)
}

fn parse_mem_regions(reply: &[u8]) -> XeResult<Vec<MemRegionInfo>> {
    let header: DrmXeQueryMemRegions =
        read_record(reply, 0).ok_or_else(|| truncated("memory region"))?;

    let mut regions = Vec::with_capacity(header.num_mem_regions as usize);
    let base = std::mem::size_of::<DrmXeQueryMemRegions>();
    let stride = std::mem::size_of::<DrmXeMemRegion>();

    for i in 0..header.num_mem_regions as usize {
        let entry: DrmXeMemRegion =
            read_record(reply, base + i * stride).ok_or_else(|| truncated("memory region"))?;
        regions.push(MemRegionInfo {
            mem_class: entry.mem_class,
            instance: entry.instance,
            min_page_size: entry.min_page_size,
            total_size: entry.total_size,
            used: entry.used,
        });
    }

    Ok(regions)
}

fn select_engine(engines: &[EngineInfo], class: u16) -> Option<EngineInfo> {
    engines.iter().copied().find(|e| e.engine_class == class)
}

fn select_placement(regions: &[MemRegionInfo], class: u16) -> Placement {
    let mut mask = 0u32;
    let mut min_page_size = Placement::DEFAULT_PAGE_SIZE;

    for region in regions.iter().filter(|r| r.mem_class == class) {
        mask |= 1 << region.instance;
        min_page_size = min_page_size.max(u64::from(region.min_page_size));
    }

    if mask == 0 {
        log::warn!("no memory region of class {class} found; placement mask is 0, allocation may fail");
    }

    Placement {
        mask,
        min_page_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_reply(classes: &[u16]) -> Vec<u8> {
        let mut reply = Vec::new();
        reply.extend_from_slice(&(classes.len() as u32).to_ne_bytes());
        reply.extend_from_slice(&0u32.to_ne_bytes());
        for (i, &class) in classes.iter().enumerate() {
            let entry = DrmXeEngine {
                instance: DrmXeEngineClassInstance {
                    engine_class: class,
                    engine_instance: i as u16,
                    gt_id: 0,
                    pad: 0,
                },
                reserved: [0; 3],
            };
            let bytes: [u8; 32] = unsafe { std::mem::transmute(entry) };
            reply.extend_from_slice(&bytes);
        }
        reply
    }

    fn region_reply(regions: &[(u16, u16, u32)]) -> Vec<u8> {
        let mut reply = Vec::new();
        reply.extend_from_slice(&(regions.len() as u32).to_ne_bytes());
        reply.extend_from_slice(&0u32.to_ne_bytes());
        for &(class, instance, page) in regions {
            let entry = DrmXeMemRegion {
                mem_class: class,
                instance,
                min_page_size: page,
                total_size: 1 << 30,
                used: 0,
                cpu_visible_size: 0,
                cpu_visible_used: 0,
                reserved: [0; 6],
            };
            let bytes: [u8; 88] = unsafe { std::mem::transmute(entry) };
            reply.extend_from_slice(&bytes);
        }
        reply
    }

    #[test]
    fn first_render_engine_wins_regardless_of_neighbors() {
        let reply = engine_reply(&[
            DRM_XE_ENGINE_CLASS_COPY,
            DRM_XE_ENGINE_CLASS_RENDER,
            DRM_XE_ENGINE_CLASS_RENDER,
        ]);
        let engines = parse_engines(&reply).unwrap();

        let picked = select_engine(&engines, DRM_XE_ENGINE_CLASS_RENDER).unwrap();
        assert_eq!(picked.engine_instance, 1);
    }

    #[test]
    fn missing_engine_class_is_reported() {
        let reply = engine_reply(&[DRM_XE_ENGINE_CLASS_COPY, DRM_XE_ENGINE_CLASS_COMPUTE]);
        let engines = parse_engines(&reply).unwrap();

        assert!(select_engine(&engines, DRM_XE_ENGINE_CLASS_RENDER).is_none());
    }

    #[test]
    fn placement_ors_instances_and_takes_max_page_size() {
        let reply = region_reply(&[
            (DRM_XE_MEM_REGION_CLASS_SYSMEM, 0, 4096),
            (DRM_XE_MEM_REGION_CLASS_VRAM, 1, 65536),
            (DRM_XE_MEM_REGION_CLASS_SYSMEM, 2, 65536),
        ]);
        let regions = parse_mem_regions(&reply).unwrap();

        let placement = select_placement(&regions, DRM_XE_MEM_REGION_CLASS_SYSMEM);
        assert_eq!(placement.mask, 0b101);
        assert_eq!(placement.min_page_size, 65536);
    }

    #[test]
    fn empty_scan_yields_zero_mask_not_an_error() {
        let reply = region_reply(&[(DRM_XE_MEM_REGION_CLASS_VRAM, 0, 65536)]);
        let regions = parse_mem_regions(&reply).unwrap();

        let placement = select_placement(&regions, DRM_XE_MEM_REGION_CLASS_SYSMEM);
        assert_eq!(placement.mask, 0);
        assert_eq!(placement.min_page_size, Placement::DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn truncated_reply_is_a_driver_error() {
        let mut reply = engine_reply(&[DRM_XE_ENGINE_CLASS_RENDER]);
        reply.truncate(reply.len() - 1);

        assert!(matches!(parse_engines(&reply), Err(XeError::Driver(_))));
    }

    #[test]
    fn empty_reply_parses_to_no_engines() {
        assert!(matches!(parse_engines(&[]), Err(XeError::Driver(_))));
        let reply = engine_reply(&[]);
        assert!(parse_engines(&reply).unwrap().is_empty());
    }
}
