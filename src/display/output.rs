use crate::device::DrmDevice;
use crate::error::{XeError, XeResult};
use crate::memory::Mapping;
use crate::uapi::kms::{
    DRM_FORMAT_XRGB8888, DRM_MODE_CONNECTED, DrmModeCardRes, DrmModeCreateDumb, DrmModeCrtc,
    DrmModeFbCmd2, DrmModeGetConnector, DrmModeModeinfo,
};
use std::os::unix::io::AsRawFd;

// ===============================================================================================
// Resource & Connector Enumeration
// ===============================================================================================

/// Object ids reported by the display device.
#[derive(Debug, Default, Clone)]
pub struct ModeResources {
    pub crtcs: Vec<u32>,
    pub connectors: Vec<u32>,
    pub encoders: Vec<u32>,
}

/// One connector's state: where it plugs in, what it is driving now, and
/// the modes the sink advertises.
#[derive(Debug, Default, Clone)]
pub struct Connector {
    pub id: u32,
    pub connection: u32,
    /// Encoder currently driving this connector; 0 if none.
    pub encoder_id: u32,
    pub modes: Vec<DrmModeModeinfo>,
}

impl Connector {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection == DRM_MODE_CONNECTED
    }
}

/// Enumerates CRTCs, connectors and encoders.
///
/// The kernel protocol is count-probe then array-fill; a hotplug between
/// the two makes the fill report new counts, in which case the probe is
/// simply re-run.
pub fn get_resources(device: &DrmDevice) -> XeResult<ModeResources> {
    for _ in 0..3 {
        let mut probe = DrmModeCardRes::default();
        device.mode_get_resources(&mut probe)?;

        let mut crtcs = vec![0u32; probe.count_crtcs as usize];
        let mut connectors = vec![0u32; probe.count_connectors as usize];
        let mut encoders = vec![0u32; probe.count_encoders as usize];

        let mut fill = DrmModeCardRes {
            crtc_id_ptr: crtcs.as_mut_ptr() as u64,
            connector_id_ptr: connectors.as_mut_ptr() as u64,
            encoder_id_ptr: encoders.as_mut_ptr() as u64,
            count_crtcs: probe.count_crtcs,
            count_connectors: probe.count_connectors,
            count_encoders: probe.count_encoders,
            ..Default::default()
        };
        device.mode_get_resources(&mut fill)?;

        if fill.count_crtcs as usize <= crtcs.len()
            && fill.count_connectors as usize <= connectors.len()
            && fill.count_encoders as usize <= encoders.len()
        {
            crtcs.truncate(fill.count_crtcs as usize);
            connectors.truncate(fill.count_connectors as usize);
            encoders.truncate(fill.count_encoders as usize);
            return Ok(ModeResources {
                crtcs,
                connectors,
                encoders,
            });
        }
    }

    Err(XeError::Driver(
        "display resource counts kept changing between probe and fill".into(),
    ))
}

/// Fetches one connector with its mode list.
pub fn get_connector(device: &DrmDevice, connector_id: u32) -> XeResult<Connector> {
    for _ in 0..3 {
        let mut probe = DrmModeGetConnector {
            connector_id,
            ..Default::default()
        };
        device.mode_get_connector(&mut probe)?;

        let mut modes = vec![DrmModeModeinfo::default(); probe.count_modes as usize];

        let mut fill = DrmModeGetConnector {
            connector_id,
            modes_ptr: modes.as_mut_ptr() as u64,
            count_modes: probe.count_modes,
            ..Default::default()
        };
        device.mode_get_connector(&mut fill)?;

        if fill.count_modes as usize <= modes.len() {
            modes.truncate(fill.count_modes as usize);
            return Ok(Connector {
                id: connector_id,
                connection: fill.connection,
                encoder_id: fill.encoder_id,
                modes,
            });
        }
    }

    Err(XeError::Driver(format!(
        "connector {connector_id} mode count kept changing between probe and fill"
    )))
}

// ===============================================================================================
// Output Selection
// ===============================================================================================

/// A fully resolved scanout target: connector, CRTC and the mode to set.
#[derive(Debug, Clone)]
pub struct OutputSelection {
    pub connector_id: u32,
    pub crtc_id: u32,
    pub mode: DrmModeModeinfo,
}

/// Picks the scanout target the way a diagnostic tool does: first connected
/// connector with at least one mode, that connector's first mode (not
/// checked for the preferred flag), and the CRTC of its current encoder,
/// falling back to the first CRTC in the resource list.
pub fn select_output(device: &DrmDevice) -> XeResult<OutputSelection> {
    let resources = get_resources(device)?;

    let mut connectors = Vec::with_capacity(resources.connectors.len());
    for &id in &resources.connectors {
        connectors.push(get_connector(device, id)?);
    }

    let chosen = pick_connector(&connectors).ok_or(XeError::NoOutput)?;

    let encoder_crtc = if chosen.encoder_id != 0 {
        device
            .mode_get_encoder(chosen.encoder_id)
            .ok()
            .map(|enc| enc.crtc_id)
            .filter(|&id| id != 0)
    } else {
        None
    };

    let crtc_id = pick_crtc(encoder_crtc, &resources.crtcs).ok_or(XeError::NoCrtc)?;

    log::info!(
        "output selected: connector={} crtc={} mode={} ({}x{})",
        chosen.id,
        crtc_id,
        chosen.modes[0].name_str(),
        chosen.modes[0].hdisplay,
        chosen.modes[0].vdisplay
    );

    Ok(OutputSelection {
        connector_id: chosen.id,
        crtc_id,
        mode: chosen.modes[0],
    })
}

fn pick_connector(connectors: &[Connector]) -> Option<&Connector> {
    connectors
        .iter()
        .find(|c| c.is_connected() && !c.modes.is_empty())
}

fn pick_crtc(encoder_crtc: Option<u32>, crtcs: &[u32]) -> Option<u32> {
    encoder_crtc.or_else(|| crtcs.first().copied())
}

// ===============================================================================================
// Framebuffers & Modesetting
// ===============================================================================================

/// A registered scanout surface over some GEM handle. Single plane,
/// XRGB8888. Dropping it removes the framebuffer.
#[derive(Debug)]
pub struct Framebuffer {
    device: DrmDevice,
    fb_id: u32,
}

impl Framebuffer {
    /// Registers `handle` as a `width`×`height` XRGB8888 surface with the
    /// given per-plane stride and offset.
    pub fn create(
        device: &DrmDevice,
        handle: u32,
        width: u32,
        height: u32,
        pitch: u32,
        offset: u32,
    ) -> XeResult<Self> {
        let mut args = DrmModeFbCmd2 {
            width,
            height,
            pixel_format: DRM_FORMAT_XRGB8888,
            ..Default::default()
        };
        args.handles[0] = handle;
        args.pitches[0] = pitch;
        args.offsets[0] = offset;
        device.mode_add_fb2(&mut args)?;

        Ok(Self {
            device: device.clone(),
            fb_id: args.fb_id,
        })
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.fb_id
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        if let Err(e) = self.device.mode_rm_fb(self.fb_id) {
            log::warn!("failed to remove framebuffer {}: {e}", self.fb_id);
        }
    }
}

/// Points the selected CRTC at `fb` and lights up the connector with the
/// selected mode. Whatever was on that CRTC before is replaced; there is no
/// saved-state restore path.
pub fn set_mode(device: &DrmDevice, output: &OutputSelection, fb: &Framebuffer) -> XeResult<()> {
    let mut connector_id = output.connector_id;
    let mut args = DrmModeCrtc {
        set_connectors_ptr: std::ptr::from_mut(&mut connector_id) as u64,
        count_connectors: 1,
        crtc_id: output.crtc_id,
        fb_id: fb.id(),
        mode_valid: 1,
        mode: output.mode,
        ..Default::default()
    };
    device.mode_set_crtc(&mut args)?;
    Ok(())
}

// ===============================================================================================
// Dumb Buffers
// ===============================================================================================

/// A CPU-drawable scanout allocation local to a display session; the
/// fallback when no render session feeds the output.
#[derive(Debug)]
pub struct DumbBuffer {
    device: DrmDevice,
    handle: u32,
    width: u32,
    height: u32,
    pitch: u32,
    size: u64,
}

impl DumbBuffer {
    pub fn create(device: &DrmDevice, width: u32, height: u32) -> XeResult<Self> {
        let mut args = DrmModeCreateDumb {
            width,
            height,
            bpp: 32,
            ..Default::default()
        };
        device.mode_create_dumb(&mut args)?;

        Ok(Self {
            device: device.clone(),
            handle: args.handle,
            width,
            height,
            pitch: args.pitch,
            size: args.size,
        })
    }

    #[must_use]
    pub fn handle(&self) -> u32 {
        self.handle
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row, as chosen by the kernel.
    #[must_use]
    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    pub fn map(&mut self) -> XeResult<Mapping<'_>> {
        let offset = self.device.mode_map_dumb(self.handle)?;
        let mapping =
            unsafe { Mapping::map_shared(self.device.as_raw_fd(), offset, self.size as usize)? };
        Ok(mapping)
    }
}

impl Drop for DumbBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.device.mode_destroy_dumb(self.handle) {
            log::warn!("failed to destroy dumb buffer {}: {e}", self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector(id: u32, connection: u32, encoder_id: u32, mode_count: usize) -> Connector {
        Connector {
            id,
            connection,
            encoder_id,
            modes: vec![DrmModeModeinfo::default(); mode_count],
        }
    }

    #[test]
    fn first_connected_connector_with_modes_wins() {
        let connectors = [
            connector(30, DRM_MODE_CONNECTED, 0, 0), // connected but no modes
            connector(31, 2, 0, 3),                  // has modes but disconnected
            connector(32, DRM_MODE_CONNECTED, 40, 2),
            connector(33, DRM_MODE_CONNECTED, 41, 2),
        ];

        assert_eq!(pick_connector(&connectors).unwrap().id, 32);
    }

    #[test]
    fn no_usable_connector_is_reported() {
        let connectors = [connector(30, 2, 0, 1), connector(31, DRM_MODE_CONNECTED, 0, 0)];
        assert!(pick_connector(&connectors).is_none());
    }

    #[test]
    fn crtc_comes_from_the_active_encoder_when_it_has_one() {
        assert_eq!(pick_crtc(Some(7), &[1, 2, 3]), Some(7));
    }

    #[test]
    fn crtc_falls_back_to_the_first_in_the_resource_list() {
        assert_eq!(pick_crtc(None, &[1, 2, 3]), Some(1));
        assert_eq!(pick_crtc(None, &[]), None);
    }
}
