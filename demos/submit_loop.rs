use std::sync::atomic::{AtomicBool, Ordering};
use xe_rs::memory::{BufferObject, CpuCaching};
use xe_rs::queue::ExecQueue;
use xe_rs::session::{DeviceSession, EngineClass};
use xe_rs::submit::{CancelToken, LoopState, QueueCycle, SubmissionLoop};
use xe_rs::sync::Fence;
use xe_rs::vm::{AddressSpace, BindBatch};

const BO_SIZE: u64 = 4096;
const BIND_ADDRESS: u64 = 0x100_0000; // arbitrary GPU VA, page aligned

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
    STOP.store(true, Ordering::Relaxed);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let node = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/dri/renderD128".into());

    // 1. Open the render node and snapshot capabilities
    println!("[+] Opening {node}...");
    let session = DeviceSession::open(&node)?;
    println!(
        "    {} engines, {} memory regions",
        session.engines().len(),
        session.mem_regions().len()
    );

    // 2. Pick the render engine up front; without one there is no point
    //    creating anything address-space-dependent
    let engine = session.find_engine(EngineClass::Render)?;
    println!(
        "[+] Using RENDER engine: instance={} gt={}",
        engine.engine_instance, engine.gt_id
    );

    // 3. Create the address space
    let mut vm = AddressSpace::create(session.device())?;
    println!("[+] VM created: id={}", vm.id());

    // 4. Pick a system-memory placement
    let placement = session.sysmem_placement();
    if placement.is_empty() {
        eprintln!("    WARNING: placement mask is 0, allocation may fail");
    }

    // 5. Allocate the batch buffer and write the end marker
    let mut bo = BufferObject::create(
        session.device(),
        &vm,
        BO_SIZE,
        &placement,
        CpuCaching::WriteBack,
    )?;
    println!("[+] BO created: handle={} size={}", bo.handle(), bo.size());

    let bo_size = bo.size();
    {
        let mut mapping = bo.map()?;
        mapping.write_batch_end();
    }
    println!("    no-op batch written through CPU mapping");

    // 6. Bind it before anything may execute from it
    let mut batch = BindBatch::new();
    batch.map(&bo, 0, BIND_ADDRESS, bo_size);
    vm.bind(&batch)?;
    println!("[+] BO bound at VA {BIND_ADDRESS:#x}");

    // 7. Create the exec queue and the reusable fence
    let queue = ExecQueue::create(session.device(), engine, &vm)?;
    println!("[+] Exec queue created: id={}", queue.id());

    let fence = Fence::create(session.device())?;

    // 8. Submit and wait until interrupted
    println!("[+] Entering submit loop, Ctrl+C to stop");
    let handler = on_sigint as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }

    let cancel = CancelToken::new();
    let mut submission = SubmissionLoop::new(QueueCycle::new(&queue, &fence, BIND_ADDRESS), cancel.clone());

    while submission.state() != LoopState::Terminal {
        if STOP.load(Ordering::Relaxed) {
            cancel.cancel();
        }
        submission.step()?;

        let completed = submission.completed();
        if completed > 0 && completed % 1000 == 0 && submission.state() == LoopState::Idle {
            println!("    {completed} cycles completed");
        }
    }

    println!("[+] Stopped after {} cycles", submission.completed());
    Ok(())
}
