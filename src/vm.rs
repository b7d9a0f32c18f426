use crate::device::DrmDevice;
use crate::error::{XeError, XeResult};
use crate::memory::BufferObject;
use crate::uapi::xe::{
    DRM_XE_VM_BIND_OP_MAP, DRM_XE_VM_BIND_OP_UNMAP, DrmXeVmBind, DrmXeVmBindInput, DrmXeVmBindOp,
};
use std::collections::BTreeMap;

// ===============================================================================================
// Bind Batches
// ===============================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOp {
    Map,
    Unmap,
}

/// One map/unmap request inside a batch. The page-size contract is captured
/// from the buffer at batch-build time so validation needs nothing but the
/// batch itself.
#[derive(Debug, Clone, Copy)]
pub struct Binding {
    handle: u32,
    obj_offset: u64,
    va: u64,
    range: u64,
    page_size: u64,
    op: BindOp,
}

/// An all-or-nothing set of bind operations against one address space.
///
/// A batch may carry several unrelated buffers (a command batch and a
/// render target, say); either every entry takes effect or none does.
#[derive(Debug, Default)]
pub struct BindBatch {
    entries: Vec<Binding>,
}

impl BindBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a map of `range` bytes of `bo` (from `obj_offset`) at `va`.
    pub fn map(&mut self, bo: &BufferObject, obj_offset: u64, va: u64, range: u64) -> &mut Self {
        self.entries.push(Binding {
            handle: bo.handle(),
            obj_offset,
            va,
            range,
            page_size: bo.min_page_size(),
            op: BindOp::Map,
        });
        self
    }

    /// Queue removal of the exact live binding (`va`, `range`) of `bo`.
    pub fn unmap(&mut self, bo: &BufferObject, va: u64, range: u64) -> &mut Self {
        self.entries.push(Binding {
            handle: bo.handle(),
            obj_offset: 0,
            va,
            range,
            page_size: bo.min_page_size(),
            op: BindOp::Unmap,
        });
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ===============================================================================================
// Address Spaces
// ===============================================================================================

/// An isolated GPU virtual address space and the ledger of its live
/// bindings. Dropping it destroys the kernel VM.
#[derive(Debug)]
pub struct AddressSpace {
    device: DrmDevice,
    vm_id: u32,
    bindings: BTreeMap<u64, u64>,
}

impl AddressSpace {
    pub fn create(device: &DrmDevice) -> XeResult<Self> {
        let vm_id = device.vm_create(0)?;
        log::debug!("vm created: id={vm_id}");

        Ok(Self {
            device: device.clone(),
            vm_id,
            bindings: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.vm_id
    }

    /// Live (VA, range) bindings in ascending VA order.
    pub fn bindings(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.bindings.iter().map(|(&va, &range)| (va, range))
    }

    /// Applies a bind batch synchronously.
    ///
    /// Every entry is validated against the page-size contract and the
    /// binding ledger before the kernel sees any of them; the whole batch
    /// then goes down in a single bind call. On any failure, validation or
    /// ioctl, the ledger is untouched and nothing was applied.
    ///
    /// # Errors
    /// `MisalignedBinding`, `OverlappingBinding`, `UnknownBinding` from
    /// validation; `Io` from the bind ioctl itself.
    pub fn bind(&mut self, batch: &BindBatch) -> XeResult<()> {
        if batch.entries.is_empty() {
            return Ok(());
        }

        let next = apply_batch(&self.bindings, &batch.entries)?;

        let mut ops: Vec<DrmXeVmBindOp> = batch
            .entries
            .iter()
            .map(|entry| DrmXeVmBindOp {
                obj: match entry.op {
                    BindOp::Map => entry.handle,
                    BindOp::Unmap => 0,
                },
                obj_offset: entry.obj_offset,
                range: entry.range,
                addr: entry.va,
                op: match entry.op {
                    BindOp::Map => DRM_XE_VM_BIND_OP_MAP,
                    BindOp::Unmap => DRM_XE_VM_BIND_OP_UNMAP,
                },
                ..Default::default()
            })
            .collect();

        let mut args = DrmXeVmBind {
            vm_id: self.vm_id,
            num_binds: ops.len() as u32,
            ..Default::default()
        };
        if ops.len() == 1 {
            args.input = DrmXeVmBindInput { bind: ops[0] };
        } else {
            args.input = DrmXeVmBindInput {
                vector_of_binds: ops.as_mut_ptr() as u64,
            };
        }

        self.device.vm_bind(&mut args)?;

        self.bindings = next;
        Ok(())
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        if let Err(e) = self.device.vm_destroy(self.vm_id) {
            log::warn!("failed to destroy vm {}: {e}", self.vm_id);
        }
    }
}

/// Validates `entries` against `current` and returns the ledger as it will
/// look after the batch. Pure: the caller swaps the result in only once the
/// kernel accepted the batch.
fn apply_batch(
    current: &BTreeMap<u64, u64>,
    entries: &[Binding],
) -> XeResult<BTreeMap<u64, u64>> {
    let mut next = current.clone();

    for entry in entries {
        if entry.range == 0
            || !entry.va.is_multiple_of(entry.page_size)
            || !entry.range.is_multiple_of(entry.page_size)
        {
            return Err(XeError::MisalignedBinding {
                va: entry.va,
                range: entry.range,
                page_size: entry.page_size,
            });
        }

        match entry.op {
            BindOp::Map => {
                let end = entry.va + entry.range;
                // Bindings are disjoint, so the highest start below `end`
                // is the only candidate that could reach into [va, end).
                if let Some((&start, &range)) = next.range(..end).next_back()
                    && start + range > entry.va
                {
                    return Err(XeError::OverlappingBinding {
                        va: entry.va,
                        range: entry.range,
                    });
                }
                next.insert(entry.va, entry.range);
            }
            BindOp::Unmap => {
                if next.get(&entry.va) != Some(&entry.range) {
                    return Err(XeError::UnknownBinding {
                        va: entry.va,
                        range: entry.range,
                    });
                }
                next.remove(&entry.va);
            }
        }
    }

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: u64 = 4096;

    fn map_entry(va: u64, range: u64) -> Binding {
        Binding {
            handle: 1,
            obj_offset: 0,
            va,
            range,
            page_size: PAGE,
            op: BindOp::Map,
        }
    }

    fn unmap_entry(va: u64, range: u64) -> Binding {
        Binding {
            op: BindOp::Unmap,
            ..map_entry(va, range)
        }
    }

    #[test]
    fn page_aligned_bind_is_accepted() {
        // The canonical setup: a one-page buffer at VA 0x100_0000.
        let next = apply_batch(&BTreeMap::new(), &[map_entry(0x100_0000, PAGE)]).unwrap();
        assert_eq!(next.get(&0x100_0000), Some(&PAGE));
    }

    #[test]
    fn misaligned_va_fails_the_bind_not_a_later_step() {
        let err = apply_batch(&BTreeMap::new(), &[map_entry(0x100_0800, PAGE)]).unwrap_err();
        assert!(matches!(err, XeError::MisalignedBinding { va: 0x100_0800, .. }));
    }

    #[test]
    fn misaligned_range_fails_the_bind() {
        let err = apply_batch(&BTreeMap::new(), &[map_entry(0x100_0000, 100)]).unwrap_err();
        assert!(matches!(err, XeError::MisalignedBinding { range: 100, .. }));

        let err = apply_batch(&BTreeMap::new(), &[map_entry(0x100_0000, 0)]).unwrap_err();
        assert!(matches!(err, XeError::MisalignedBinding { range: 0, .. }));
    }

    #[test]
    fn alignment_follows_the_region_contract() {
        // 4K-aligned values violate a 64K region contract.
        let mut entry = map_entry(0x100_0000, PAGE);
        entry.page_size = 65536;
        assert!(apply_batch(&BTreeMap::new(), &[entry]).is_err());

        entry.va = 0x101_0000;
        entry.range = 65536;
        assert!(apply_batch(&BTreeMap::new(), &[entry]).is_ok());
    }

    #[test]
    fn overlapping_map_is_rejected() {
        let current = apply_batch(&BTreeMap::new(), &[map_entry(0x100_0000, 4 * PAGE)]).unwrap();

        // Overlap from below, from above, and exact.
        for va in [0x0FF_F000, 0x100_1000, 0x100_0000] {
            let err = apply_batch(&current, &[map_entry(va, 2 * PAGE)]).unwrap_err();
            assert!(matches!(err, XeError::OverlappingBinding { .. }), "va={va:#x}");
        }

        // Adjacent on both sides is fine.
        assert!(apply_batch(&current, &[map_entry(0x0FF_F000, PAGE)]).is_ok());
        assert!(apply_batch(&current, &[map_entry(0x100_4000, PAGE)]).is_ok());
    }

    #[test]
    fn batch_entries_are_checked_against_each_other() {
        let err = apply_batch(
            &BTreeMap::new(),
            &[map_entry(0x100_0000, 2 * PAGE), map_entry(0x100_1000, PAGE)],
        )
        .unwrap_err();
        assert!(matches!(err, XeError::OverlappingBinding { .. }));
    }

    #[test]
    fn failed_batch_applies_nothing() {
        let current = BTreeMap::new();
        let result = apply_batch(
            &current,
            &[map_entry(0x100_0000, PAGE), map_entry(0x200_0100, PAGE)],
        );

        assert!(result.is_err());
        assert!(current.is_empty());
    }

    #[test]
    fn unmap_requires_an_exact_live_binding() {
        let current = apply_batch(&BTreeMap::new(), &[map_entry(0x100_0000, 2 * PAGE)]).unwrap();

        let err = apply_batch(&current, &[unmap_entry(0x100_0000, PAGE)]).unwrap_err();
        assert!(matches!(err, XeError::UnknownBinding { .. }));

        let next = apply_batch(&current, &[unmap_entry(0x100_0000, 2 * PAGE)]).unwrap();
        assert!(next.is_empty());
    }

    #[test]
    fn unmap_then_remap_in_one_batch() {
        let current = apply_batch(&BTreeMap::new(), &[map_entry(0x100_0000, PAGE)]).unwrap();

        let next = apply_batch(
            &current,
            &[unmap_entry(0x100_0000, PAGE), map_entry(0x100_0000, PAGE)],
        )
        .unwrap();
        assert_eq!(next.get(&0x100_0000), Some(&PAGE));
    }
}
