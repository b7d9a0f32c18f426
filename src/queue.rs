use crate::device::DrmDevice;
use crate::error::XeResult;
use crate::session::EngineInfo;
use crate::sync::Fence;
use crate::uapi::xe::{
    DRM_XE_SYNC_FLAG_SIGNAL, DRM_XE_SYNC_TYPE_SYNCOBJ, DrmXeExec, DrmXeExecQueueCreate, DrmXeSync,
};
use crate::vm::AddressSpace;

/// An ordered submission channel on one engine instance, in one address
/// space, with a single in-flight slot.
///
/// The queue id is the only handle later submissions use. Dropping the
/// queue destroys it.
#[derive(Debug)]
pub struct ExecQueue {
    device: DrmDevice,
    exec_queue_id: u32,
}

impl ExecQueue {
    /// Creates a width-1 queue on `engine` bound to `vm`.
    pub fn create(device: &DrmDevice, engine: EngineInfo, vm: &AddressSpace) -> XeResult<Self> {
        let mut instance = engine.to_instance();
        let mut args = DrmXeExecQueueCreate {
            width: 1,
            num_placements: 1,
            vm_id: vm.id(),
            instances: std::ptr::from_mut(&mut instance) as u64,
            ..Default::default()
        };
        device.exec_queue_create(&mut args)?;

        log::debug!(
            "exec queue created: id={} class={} instance={} gt={}",
            args.exec_queue_id,
            engine.engine_class,
            engine.engine_instance,
            engine.gt_id
        );

        Ok(Self {
            device: device.clone(),
            exec_queue_id: args.exec_queue_id,
        })
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.exec_queue_id
    }

    /// Submits the batch previously bound at `batch_va`, asking the kernel
    /// to signal every fence in `signal` when the batch retires.
    ///
    /// The caller is responsible for the fence-reuse protocol: a fence
    /// named here must have been reset since it last signaled.
    pub fn submit(&self, batch_va: u64, signal: &[&Fence]) -> XeResult<()> {
        let mut syncs: Vec<DrmXeSync> = signal
            .iter()
            .map(|fence| DrmXeSync {
                sync_type: DRM_XE_SYNC_TYPE_SYNCOBJ,
                flags: DRM_XE_SYNC_FLAG_SIGNAL,
                handle: fence.handle(),
                ..Default::default()
            })
            .collect();

        let mut args = DrmXeExec {
            exec_queue_id: self.exec_queue_id,
            num_syncs: syncs.len() as u32,
            syncs: syncs.as_mut_ptr() as u64,
            address: batch_va,
            num_batch_buffer: 1,
            ..Default::default()
        };
        self.device.exec(&mut args)?;
        Ok(())
    }
}

impl Drop for ExecQueue {
    fn drop(&mut self) {
        if let Err(e) = self.device.exec_queue_destroy(self.exec_queue_id) {
            log::warn!("failed to destroy exec queue {}: {e}", self.exec_queue_id);
        }
    }
}
