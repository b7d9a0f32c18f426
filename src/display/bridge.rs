use crate::device::DrmDevice;
use crate::display::output::{Framebuffer, OutputSelection, set_mode};
use crate::error::XeResult;
use crate::memory::BufferObject;
use std::os::fd::{AsFd, OwnedFd};

/// Exports `bo` out of its session as a dma-buf descriptor.
///
/// The descriptor is valid across session boundaries (and process
/// boundaries, if passed over a socket); the export is one-way from the
/// producing session.
pub fn export_buffer(device: &DrmDevice, bo: &BufferObject) -> XeResult<OwnedFd> {
    let fd = device.prime_handle_to_fd(bo.handle())?;
    log::debug!("bo handle {} exported as dma-buf", bo.handle());
    Ok(fd)
}

/// A buffer imported from another session's export. The local handle
/// addresses the same physical memory as the exporter's buffer; a CPU
/// write through the exporting session's mapping is observable through
/// this handle.
#[derive(Debug)]
pub struct ImportedBuffer {
    device: DrmDevice,
    handle: u32,
}

impl ImportedBuffer {
    /// Imports a dma-buf descriptor into `device`'s session.
    pub fn import(device: &DrmDevice, descriptor: &OwnedFd) -> XeResult<Self> {
        let handle = device.prime_fd_to_handle(descriptor.as_fd())?;
        log::debug!("dma-buf imported as local handle {handle}");

        Ok(Self {
            device: device.clone(),
            handle,
        })
    }

    #[must_use]
    pub fn handle(&self) -> u32 {
        self.handle
    }
}

impl Drop for ImportedBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.device.gem_close(self.handle) {
            log::warn!("failed to close imported handle {}: {e}", self.handle);
        }
    }
}

/// Attaches an imported buffer to a previously selected output: registers
/// it as an XRGB8888 surface sized to the output's mode with the given
/// stride, and lights it up on the selected CRTC. Replaces whatever was on
/// screen.
///
/// Returns the framebuffer; the surface stays visible for as long as the
/// caller keeps it alive.
pub fn present(
    display: &DrmDevice,
    imported: &ImportedBuffer,
    output: &OutputSelection,
    pitch: u32,
) -> XeResult<Framebuffer> {
    let fb = Framebuffer::create(
        display,
        imported.handle(),
        u32::from(output.mode.hdisplay),
        u32::from(output.mode.vdisplay),
        pitch,
        0,
    )?;
    set_mode(display, output, &fb)?;
    Ok(fb)
}
