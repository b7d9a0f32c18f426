use xe_rs::session::DeviceSession;
use xe_rs::uapi::xe::DRM_XE_MEM_REGION_CLASS_SYSMEM;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let node = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/dri/renderD128".into());

    println!("[+] Opening {node}...");
    let session = DeviceSession::open(&node)?;

    let regions = session.mem_regions();
    println!("num_mem_regions = {}\n", regions.len());

    for (i, region) in regions.iter().enumerate() {
        println!("Region {i}:");
        println!("  class         = {} ({})", region.class_name(), region.mem_class);
        println!("  instance      = {}", region.instance);
        println!("  min_page_size = {}", region.min_page_size);
        println!("  total_size    = {}", region.total_size);
        println!("  used          = {}\n", region.used);
    }

    let placement = session.sysmem_placement();
    if regions
        .iter()
        .any(|r| r.mem_class == DRM_XE_MEM_REGION_CLASS_SYSMEM)
    {
        println!(
            "== Effective SYSMEM placement: mask={:#x}, min_page_size={} ==",
            placement.mask, placement.min_page_size
        );
        if placement.min_page_size == 4096 {
            println!("OK: 4K-aligned binds are fine here.");
        } else {
            println!(
                "LARGE PAGE SIZE ({}). 4K buffer sizes / bind ranges will FAIL.",
                placement.min_page_size
            );
        }
    } else {
        println!("No SYSMEM region reported.");
    }

    Ok(())
}
