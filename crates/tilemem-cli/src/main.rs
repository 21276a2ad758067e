//! `tilemem`: buffer placement and transfer tools for tiled accelerators.
//!
//! ```text
//! USAGE:
//!   tilemem info                     Geometry, reserved regions, allocator state
//!   tilemem plan [buffer opts]       Page → bank/offset table for a buffer
//!   tilemem roundtrip [buffer opts]  Write, barrier, read back and compare
//!   tilemem ping-dram                Write/read every DRAM channel
//!   tilemem ping-l1                  Write/read every worker core's L1
//!   tilemem stress                   Random alloc/free churn, leak check
//! ```
//!
//! All commands run against the simulated transport. The architecture comes
//! from `--arch` or `TILEMEM_ARCH` (default `grayskull`).

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Instant;
use tilemem_driver::{
    read_from_buffer, write_to_buffer, Buffer, BufferConfig, Device, DeviceConfig, MemError,
    MemorySpace, ShardSpec, ShardSpecBuffer, SimulatedDevice, TensorMemoryLayout, TransferConfig,
};
use tilemem_grid::{Arch, CoreCoord, CoreRangeSet, ShardOrientation, TILE_HEIGHT, TILE_WIDTH};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tilemem", about = "Tiled accelerator buffer tools", version)]
struct Cli {
    /// Architecture to simulate (grayskull, wormhole_b0).
    #[arg(long, global = true, env = "TILEMEM_ARCH", default_value = "grayskull")]
    arch: Arch,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print geometry, reserved regions and allocator state.
    Info,
    /// Print the page placement of a buffer.
    Plan {
        #[command(flatten)]
        buffer: BufferArgs,
        /// Maximum pages to print.
        #[arg(long, default_value_t = 64)]
        limit: u64,
    },
    /// Write random data to a buffer, barrier, read it back and compare.
    Roundtrip {
        #[command(flatten)]
        buffer: BufferArgs,
        /// Dispatch pages per bank over this many worker threads.
        #[arg(long)]
        per_bank: Option<usize>,
        /// Seed for the random payload.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Write and read back every DRAM channel, then probe one past the last.
    PingDram {
        /// Bytes per channel.
        #[arg(long, default_value_t = 1024)]
        bytes: usize,
    },
    /// Write and read back every worker core's L1, then probe off the grid.
    PingL1 {
        /// Bytes per core.
        #[arg(long, default_value_t = 1024)]
        bytes: usize,
    },
    /// Random allocate/free churn; fails if memory leaks.
    Stress {
        /// Allocate/free steps.
        #[arg(long, default_value_t = 10_000)]
        iterations: usize,
        /// RNG seed.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

#[derive(Args)]
struct BufferArgs {
    /// Bytes per page.
    #[arg(long, default_value_t = 2048)]
    page_size: u64,
    /// Pages of an interleaved buffer.
    #[arg(long, default_value_t = 16)]
    pages: u64,
    /// Memory space.
    #[arg(long, value_enum, default_value_t = SpaceArg::Dram)]
    space: SpaceArg,
    /// Page placement.
    #[arg(long, value_enum, default_value_t = LayoutArg::Interleaved)]
    layout: LayoutArg,
    /// Tensor shape in tiles, `HxW` (sharded layouts).
    #[arg(long, value_parser = parse_shape)]
    tensor: Option<[u32; 2]>,
    /// Shard shape in tiles, `HxW` (sharded layouts, default 1x1).
    #[arg(long, value_parser = parse_shape)]
    shard: Option<[u32; 2]>,
    /// Cores to shard over (default: one per shard).
    #[arg(long)]
    cores: Option<usize>,
    /// Shard orientation.
    #[arg(long, value_enum, default_value_t = OrientationArg::Row)]
    orientation: OrientationArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum SpaceArg {
    Dram,
    L1,
}

impl From<SpaceArg> for MemorySpace {
    fn from(arg: SpaceArg) -> Self {
        match arg {
            SpaceArg::Dram => Self::Dram,
            SpaceArg::L1 => Self::L1,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutArg {
    Interleaved,
    Height,
    Width,
    Block,
}

impl From<LayoutArg> for TensorMemoryLayout {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::Interleaved => Self::Interleaved,
            LayoutArg::Height => Self::HeightSharded,
            LayoutArg::Width => Self::WidthSharded,
            LayoutArg::Block => Self::BlockSharded,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OrientationArg {
    Row,
    Col,
}

impl From<OrientationArg> for ShardOrientation {
    fn from(arg: OrientationArg) -> Self {
        match arg {
            OrientationArg::Row => Self::RowMajor,
            OrientationArg::Col => Self::ColMajor,
        }
    }
}

fn parse_shape(s: &str) -> std::result::Result<[u32; 2], String> {
    let (h, w) = s
        .split_once(|c| c == 'x' || c == 'X')
        .ok_or_else(|| format!("expected HxW, got {s:?}"))?;
    let h = h.trim().parse::<u32>().map_err(|e| format!("height {h:?}: {e}"))?;
    let w = w.trim().parse::<u32>().map_err(|e| format!("width {w:?}: {e}"))?;
    Ok([h, w])
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Info => cmd_info(cli.arch)?,
        Cmd::Plan { buffer, limit } => cmd_plan(cli.arch, &buffer, limit)?,
        Cmd::Roundtrip {
            buffer,
            per_bank,
            seed,
        } => cmd_roundtrip(cli.arch, &buffer, per_bank, seed)?,
        Cmd::PingDram { bytes } => cmd_ping_dram(cli.arch, bytes)?,
        Cmd::PingL1 { bytes } => cmd_ping_l1(cli.arch, bytes)?,
        Cmd::Stress { iterations, seed } => cmd_stress(cli.arch, iterations, seed)?,
    }

    Ok(())
}

fn open_device(arch: Arch, transfer: TransferConfig) -> Result<Arc<Device>> {
    let spec = arch.spec();
    let config = DeviceConfig::for_arch(&spec).with_transfer(transfer);
    let transport = SimulatedDevice::for_arch(spec)?;
    Ok(Device::open(Arc::new(transport), config)?)
}

fn buffer_config(args: &BufferArgs, device: &Device) -> Result<BufferConfig> {
    let space = MemorySpace::from(args.space);
    let layout = TensorMemoryLayout::from(args.layout);
    if !layout.is_sharded() {
        let size = buffer_bytes(args.pages, args.page_size)?;
        return Ok(BufferConfig::interleaved(size, args.page_size).memory_space(space));
    }

    let tensor = args.tensor.context("--tensor HxW is required for sharded layouts")?;
    let shard = args.shard.unwrap_or([1, 1]);
    if shard.contains(&0) {
        bail!("shard shape {}x{} has a zero dimension", shard[0], shard[1]);
    }
    let orientation = ShardOrientation::from(args.orientation);
    let needed = tensor[0].div_ceil(shard[0]) as usize * tensor[1].div_ceil(shard[1]) as usize;
    let cores = CoreRangeSet::first_n_cores(
        args.cores.unwrap_or(needed),
        device.logical_grid_size(),
        orientation,
    )?;

    let spec = ShardSpec::new(cores, shard_elements(shard)?, orientation);
    let shards = ShardSpecBuffer::new(spec, [TILE_HEIGHT, TILE_WIDTH], tensor)?;
    let pages = u64::from(tensor[0]) * u64::from(tensor[1]);
    Ok(BufferConfig::interleaved(buffer_bytes(pages, args.page_size)?, args.page_size)
        .memory_space(space)
        .sharded(layout, shards))
}

/// Shard shape in tiles to elements.
fn shard_elements(shard: [u32; 2]) -> Result<[u32; 2]> {
    let h = shard[0]
        .checked_mul(TILE_HEIGHT)
        .with_context(|| format!("shard height {} tiles overflows", shard[0]))?;
    let w = shard[1]
        .checked_mul(TILE_WIDTH)
        .with_context(|| format!("shard width {} tiles overflows", shard[1]))?;
    Ok([h, w])
}

fn buffer_bytes(pages: u64, page_size: u64) -> Result<u64> {
    pages
        .checked_mul(page_size)
        .with_context(|| format!("{pages} pages of {page_size} bytes overflow"))
}

fn cmd_info(arch: Arch) -> Result<()> {
    let spec = arch.spec();
    let device = open_device(arch, TransferConfig::default())?;
    let grid = device.logical_grid_size();

    println!("Architecture : {}", spec.name);
    println!("Worker grid  : {}x{} ({} cores)", grid.x, grid.y, spec.num_worker_cores());
    println!(
        "DRAM         : {} channels x {} MiB",
        device.num_dram_channels(),
        device.dram_bank_size() >> 20
    );
    println!(
        "L1           : {} KiB per core, buffers from {:#x}",
        device.l1_size() >> 10,
        device.config().reserved_base(MemorySpace::L1)
    );
    for space in [MemorySpace::Dram, MemorySpace::L1] {
        let stats = device.statistics(space);
        println!(
            "{space:<4} banks   : {} x {:#x} allocatable, align {} B, largest free {:#x}",
            stats.num_banks,
            stats.bank_capacity,
            device.config().alignment(space),
            stats.largest_free_block
        );
    }
    let last = device.num_dram_channels() - 1;
    println!(
        "DRAM NOC     : channel 0 -> {}, channel {last} -> {}",
        device.dram_channel_noc(0)?,
        device.dram_channel_noc(last)?
    );
    let corner = CoreCoord::new(grid.x - 1, grid.y - 1);
    println!(
        "NOC          : core (x=0,y=0) -> {}, core {corner} -> {}",
        device.worker_core_from_logical_core(CoreCoord::new(0, 0))?,
        device.worker_core_from_logical_core(corner)?
    );
    Ok(())
}

fn cmd_plan(arch: Arch, args: &BufferArgs, limit: u64) -> Result<()> {
    let device = open_device(arch, TransferConfig::default())?;
    let buffer = Buffer::allocate(&device, buffer_config(args, &device)?)?;
    let space = buffer.memory_space();

    println!(
        "Buffer {}: {} bytes, {} pages of {} B, {} in {space}",
        buffer.id(),
        buffer.size(),
        buffer.num_pages(),
        buffer.page_size(),
        buffer.layout()
    );
    println!(
        "Base {:#x}, {} bank(s) x {} B",
        buffer.address()?,
        buffer.banks().len(),
        buffer.size_per_bank()
    );
    if let Some(shards) = buffer.shard_spec() {
        let [sh, sw] = shards.shape_in_pages();
        let [gh, gw] = shards.shard_grid();
        println!(
            "Shards {sh}x{sw} pages, grid {gh}x{gw} = {} over {} ({})",
            shards.num_shards(),
            shards.grid(),
            shards.orientation()
        );
    }
    println!();
    println!("{:>6}  {:>8}  {:>12}  {:>10}", "page", "bank", "core", "offset");
    for addr in buffer.page_addresses()?.into_iter().take(usize::try_from(limit)?) {
        let core = device.core_for_bank(space, addr.bank)?;
        println!(
            "{:>6}  {:>8}  {:>12}  {:>#10x}",
            addr.page,
            addr.bank.index(),
            core.to_string(),
            addr.offset
        );
    }
    if buffer.num_pages() > limit {
        println!("... {} more", buffer.num_pages() - limit);
    }
    Ok(())
}

fn cmd_roundtrip(arch: Arch, args: &BufferArgs, per_bank: Option<usize>, seed: u64) -> Result<()> {
    let transfer = per_bank.map_or_else(TransferConfig::default, TransferConfig::per_bank);
    let device = open_device(arch, transfer)?;
    let buffer = Buffer::allocate(&device, buffer_config(args, &device)?)?;

    let mut data = vec![0u8; usize::try_from(buffer.size())?];
    StdRng::seed_from_u64(seed).fill(&mut data[..]);

    let start = Instant::now();
    write_to_buffer(&buffer, &data)?;
    device.barrier(buffer.memory_space())?;
    let written = start.elapsed();
    let back = read_from_buffer(&buffer)?;
    let total = start.elapsed();

    if back.as_ref() != data.as_slice() {
        let first = data.iter().zip(back.iter()).position(|(a, b)| a != b).unwrap_or(0);
        bail!(
            "readback mismatch at byte {first} (page {})",
            first as u64 / buffer.page_size()
        );
    }
    info!("Round trip of buffer {} verified", buffer.id());
    println!(
        "OK  {} bytes, {} pages, {} in {}  (write+barrier {:?}, total {:?})",
        buffer.size(),
        buffer.num_pages(),
        buffer.layout(),
        buffer.memory_space(),
        written,
        total
    );
    Ok(())
}

fn cmd_ping_dram(arch: Arch, bytes: usize) -> Result<()> {
    let device = open_device(arch, TransferConfig::default())?;
    let addr = 0;
    for channel in 0..device.num_dram_channels() {
        let data = ping_pattern(bytes, channel);
        device.write_to_dram_channel(channel, addr, &data)?;
    }
    device.dram_barrier()?;
    for channel in 0..device.num_dram_channels() {
        let mut out = vec![0u8; bytes];
        device.read_from_dram_channel(channel, addr, &mut out)?;
        if out != ping_pattern(bytes, channel) {
            bail!("DRAM channel {channel}: readback mismatch");
        }
        println!("DRAM channel {channel:>2}  ok");
    }

    let illegal = device.num_dram_channels();
    match device.write_to_dram_channel(illegal, addr, &[0; 4]) {
        Err(MemError::Bounds { reason }) => println!("DRAM channel {illegal:>2}  rejected ({reason})"),
        Err(e) => bail!("DRAM channel {illegal}: unexpected error {e}"),
        Ok(()) => bail!("DRAM channel {illegal}: write past the last channel was accepted"),
    }
    Ok(())
}

fn cmd_ping_l1(arch: Arch, bytes: usize) -> Result<()> {
    let device = open_device(arch, TransferConfig::default())?;
    let grid = device.logical_grid_size();
    let addr = device.config().reserved_base(MemorySpace::L1);
    let cores: Vec<CoreCoord> = (0..grid.y)
        .flat_map(|y| (0..grid.x).map(move |x| CoreCoord::new(x, y)))
        .collect();

    for (i, core) in cores.iter().enumerate() {
        device.write_to_l1(*core, addr, &ping_pattern(bytes, u32::try_from(i)?))?;
    }
    device.l1_barrier()?;
    for (i, core) in cores.iter().enumerate() {
        let mut out = vec![0u8; bytes];
        device.read_from_l1(*core, addr, &mut out)?;
        if out != ping_pattern(bytes, u32::try_from(i)?) {
            bail!("L1 of core {core}: readback mismatch");
        }
    }
    println!("L1 ok on all {} cores", cores.len());

    let off_grid = CoreCoord::new(grid.x, 0);
    match device.write_to_l1(off_grid, addr, &[0; 4]) {
        Err(MemError::Bounds { reason }) => println!("core {off_grid} rejected ({reason})"),
        Err(e) => bail!("core {off_grid}: unexpected error {e}"),
        Ok(()) => bail!("core {off_grid}: write off the grid was accepted"),
    }
    Ok(())
}

fn ping_pattern(bytes: usize, salt: u32) -> Vec<u8> {
    let salt = salt.to_le_bytes();
    (0..bytes).map(|i| (i as u8) ^ salt[i % 4]).collect()
}

fn cmd_stress(arch: Arch, iterations: usize, seed: u64) -> Result<()> {
    let device = open_device(arch, TransferConfig::default())?;
    let before = [
        device.statistics(MemorySpace::Dram),
        device.statistics(MemorySpace::L1),
    ];
    let mut rng = StdRng::seed_from_u64(seed);
    let mut live: Vec<Buffer> = Vec::new();
    let (mut allocated, mut oom) = (0usize, 0usize);

    for _ in 0..iterations {
        if live.is_empty() || rng.random_bool(0.55) {
            let page_size = 32 * rng.random_range(1..=64u64);
            let pages = rng.random_range(0..=256u64);
            let space = if rng.random_bool(0.5) {
                MemorySpace::Dram
            } else {
                MemorySpace::L1
            };
            let cfg = BufferConfig::interleaved(pages * page_size, page_size).memory_space(space);
            match Buffer::allocate(&device, cfg) {
                Ok(buffer) => {
                    allocated += 1;
                    live.push(buffer);
                }
                Err(MemError::OutOfMemory { .. }) => oom += 1,
                Err(e) => return Err(e.into()),
            }
        } else {
            let index = rng.random_range(0..live.len());
            live.swap_remove(index).free()?;
        }
    }
    let peak = [
        device.statistics(MemorySpace::Dram),
        device.statistics(MemorySpace::L1),
    ];
    for buffer in &mut live {
        buffer.free()?;
    }
    let after = [
        device.statistics(MemorySpace::Dram),
        device.statistics(MemorySpace::L1),
    ];

    println!("{iterations} steps: {allocated} allocations, {oom} out of memory, {} live at end", live.len());
    for (space, stats) in [MemorySpace::Dram, MemorySpace::L1].iter().zip(peak) {
        println!(
            "{space:<4}  in use at end {:#x}, largest free {:#x}",
            stats.total_allocated, stats.largest_free_block
        );
    }
    if after != before {
        bail!("allocator did not return to its initial state: {before:?} -> {after:?}");
    }
    println!("No leaks");
    Ok(())
}
