//! Formatter CLI: initializes one or more backing files with an identical
//! on-disk layout so a daemon can later mount them as a single RAID-backed
//! filesystem (spec §6).

use std::fs::OpenOptions;

use clap::Parser;
use log::{error, info};
use wfs::format;
use wfs::{Disk, RaidMode};

/// `0` = stripe, `1` = mirror, `1v` = verified mirror.
fn parse_raid_mode(raw: &str) -> Result<RaidMode, String> {
    match raw {
        "0" => Ok(RaidMode::Stripe),
        "1" => Ok(RaidMode::Mirror),
        "1v" => Ok(RaidMode::VerifiedMirror),
        other => Err(format!("unknown raid mode {other:?} (expected 0, 1, or 1v)")),
    }
}

#[derive(Parser, Debug)]
#[command(about = "Initializes backing files with the on-disk filesystem layout")]
struct Args {
    /// Redundancy mode: 0 (stripe), 1 (mirror), or 1v (verified mirror)
    #[arg(short = 'r', long = "raid", value_parser = parse_raid_mode)]
    raid_mode: RaidMode,

    /// Backing file; repeat for every disk in the array (>= 2 for mirror modes)
    #[arg(short = 'd', long = "disk", required = true)]
    disks: Vec<String>,

    /// Number of inodes to provision (rounded up to a multiple of 32)
    #[arg(short = 'i', long = "inodes")]
    num_inodes: u32,

    /// Number of data blocks to provision (rounded up to a multiple of 32)
    #[arg(short = 'b', long = "blocks")]
    num_data_blocks: u32,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if matches!(args.raid_mode, RaidMode::Mirror | RaidMode::VerifiedMirror) && args.disks.len() < 2 {
        error!("mirror modes require at least 2 disks, got {}", args.disks.len());
        std::process::exit(1);
    }

    let layout = format::compute_layout(args.num_inodes, args.num_data_blocks);
    info!(
        "layout: {} inodes, {} data blocks, required size {} bytes",
        layout.num_inodes, layout.num_data_blocks, layout.required_size
    );

    let total_disks = args.disks.len() as u32;
    for (disk_index, path) in args.disks.iter().enumerate() {
        if let Err(e) = format_one(path, &layout, args.raid_mode, disk_index as u32, total_disks) {
            error!("failed to initialize disk {path}: {e}");
            std::process::exit(1);
        }
        info!("initialized {path} as disk {disk_index}");
    }

    info!("filesystem initialized on {total_disks} disk(s)");
}

fn format_one(path: &str, layout: &format::Layout, mode: RaidMode, disk_index: u32, total_disks: u32) -> Result<(), String> {
    let file = OpenOptions::new().read(true).write(true).open(path).map_err(|e| e.to_string())?;

    let actual_len = file.metadata().map_err(|e| e.to_string())?.len();
    if actual_len < layout.required_size {
        return Err(format!("disk too small: {actual_len} bytes, {} required", layout.required_size));
    }

    let mmap = unsafe { memmap2::MmapMut::map_mut(&file).map_err(|e| e.to_string())? };
    let mut disk = Disk::from_mmap(mmap);

    let disk_id: u32 = rand::random();
    format::format_disk(&mut disk, layout, mode, disk_index, total_disks, disk_id).map_err(|e| e.to_string())
}
