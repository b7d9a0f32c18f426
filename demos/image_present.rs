use std::io::{BufRead, Write};
use std::thread;
use std::time::Duration;
use xe_rs::display::bridge::{ImportedBuffer, export_buffer, present};
use xe_rs::display::output::{DumbBuffer, Framebuffer, OutputSelection, select_output, set_mode};
use xe_rs::device::DrmDevice;
use xe_rs::memory::{BufferObject, CpuCaching};
use xe_rs::queue::ExecQueue;
use xe_rs::session::{DeviceSession, EngineClass};
use xe_rs::submit::{CancelToken, QueueCycle, SubmissionLoop};
use xe_rs::sync::Fence;
use xe_rs::vm::{AddressSpace, BindBatch};

const BATCH_ADDRESS: u64 = 0x100_0000;
const IMAGE_ADDRESS: u64 = 0x200_0000;
const HOLD_SECONDS: u64 = 10;

fn ask_yes_or_quit(question: &str) -> char {
    let stdin = std::io::stdin();
    loop {
        print!("{question} (y/q): ");
        std::io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() {
            continue;
        }

        match line.trim().chars().next() {
            Some('y' | 'Y') => return 'y',
            Some('q' | 'Q') => return 'q',
            _ => println!("Invalid input. Try again."),
        }
    }
}

/// Simple CPU gradient: red along x, green along y, constant blue.
fn fill_gradient(pixels: &mut [u8], width: u32, height: u32, pitch: u32) {
    for y in 0..height {
        for x in 0..width {
            let r = (x * 255 / width.max(1)) as u32;
            let g = (y * 255 / height.max(1)) as u32;
            let argb: u32 = 0xFF00_0000 | (r << 16) | (g << 8) | 0x80;

            let at = (y * pitch + x * 4) as usize;
            pixels[at..at + 4].copy_from_slice(&argb.to_le_bytes());
        }
    }
}

/// Paint, bind, run one no-op submission, then hand the image across the
/// session boundary and scan it out.
fn render_and_present(
    display: &DrmDevice,
    render_node: &str,
    output: &OutputSelection,
) -> Result<(), Box<dyn std::error::Error>> {
    let width = u32::from(output.mode.hdisplay);
    let height = u32::from(output.mode.vdisplay);
    let pitch = width * 4;

    println!("[+] Opening {render_node} for rendering...");
    let session = DeviceSession::open(render_node)?;
    let engine = session.find_engine(EngineClass::Render)?;

    let mut vm = AddressSpace::create(session.device())?;
    let placement = session.sysmem_placement();
    if placement.is_empty() {
        eprintln!("    WARNING: placement mask is 0, allocation may fail");
    }

    // The image and a no-op batch, bound in a single all-or-nothing call.
    // The image crosses the session boundary later, so it must be a
    // shareable scanout allocation.
    // Write-combined: the display engine reads past the CPU cache.
    let mut image = BufferObject::create_scanout(
        session.device(),
        placement.aligned_size(u64::from(pitch) * u64::from(height)),
        &placement,
        CpuCaching::WriteCombined,
    )?;
    let mut batch_bo = BufferObject::create(
        session.device(),
        &vm,
        4096,
        &placement,
        CpuCaching::WriteBack,
    )?;
    println!(
        "[+] BOs created: image handle={} ({} bytes), batch handle={}",
        image.handle(),
        image.size(),
        batch_bo.handle()
    );

    {
        let mut mapping = image.map()?;
        fill_gradient(mapping.as_mut_slice(), width, height, pitch);
    }
    {
        let mut mapping = batch_bo.map()?;
        mapping.write_batch_end();
    }

    let (image_size, batch_size) = (image.size(), batch_bo.size());
    let mut batch = BindBatch::new();
    batch
        .map(&batch_bo, 0, BATCH_ADDRESS, batch_size)
        .map(&image, 0, IMAGE_ADDRESS, image_size);
    vm.bind(&batch)?;
    println!("[+] Batch bound at {BATCH_ADDRESS:#x}, image at {IMAGE_ADDRESS:#x}");

    let queue = ExecQueue::create(session.device(), engine, &vm)?;
    let fence = Fence::create(session.device())?;

    let mut submission = SubmissionLoop::new(
        QueueCycle::new(&queue, &fence, BATCH_ADDRESS),
        CancelToken::new(),
    );
    submission.run_cycles(1)?;
    println!("[+] Batch executed, image is GPU-visible");

    // Across the session boundary: render session out, display session in.
    let descriptor = export_buffer(session.device(), &image)?;
    let imported = ImportedBuffer::import(display, &descriptor)?;
    println!("[+] Image imported into display session as handle {}", imported.handle());

    let _fb = present(display, &imported, output, pitch)?;
    println!("[+] Image is on screen, holding for {HOLD_SECONDS}s...");
    thread::sleep(Duration::from_secs(HOLD_SECONDS));

    Ok(())
}

/// Fallback when no render node is usable: draw into a dumb buffer owned
/// by the display session itself.
fn present_dumb(
    display: &DrmDevice,
    output: &OutputSelection,
) -> Result<(), Box<dyn std::error::Error>> {
    let width = u32::from(output.mode.hdisplay);
    let height = u32::from(output.mode.vdisplay);

    let mut dumb = DumbBuffer::create(display, width, height)?;
    let pitch = dumb.pitch();
    {
        let mut mapping = dumb.map()?;
        fill_gradient(mapping.as_mut_slice(), width, height, pitch);
    }

    let fb = Framebuffer::create(display, dumb.handle(), width, height, pitch, 0)?;
    set_mode(display, output, &fb)?;
    println!("[+] Gradient is on screen, holding for {HOLD_SECONDS}s...");
    thread::sleep(Duration::from_secs(HOLD_SECONDS));

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let card_node = args.next().unwrap_or_else(|| "/dev/dri/card0".into());
    let render_node = args.next().unwrap_or_else(|| "/dev/dri/renderD128".into());

    println!("[+] Opening {card_node} for display...");
    let display = DrmDevice::open(&card_node)?;
    let output = select_output(&display)?;
    println!(
        "    connector={} crtc={} mode={}x{}",
        output.connector_id, output.crtc_id, output.mode.hdisplay, output.mode.vdisplay
    );

    // The previous configuration is not saved; make sure that is wanted.
    if ask_yes_or_quit("Replace the active display configuration?") == 'q' {
        println!("Aborted.");
        return Ok(());
    }

    match render_and_present(&display, &render_node, &output) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Render path failed ({e}), falling back to a dumb buffer.");
            present_dumb(&display, &output)?;
        }
    }

    Ok(())
}
