//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::sync::Arc;
use tilemem_driver::{
    Device, DeviceConfig, ShardSpec, ShardSpecBuffer, SimulatedDevice, SimulatorConfig,
    TransferConfig, WriteVisibility,
};
use tilemem_grid::{ArchSpec, CoreCoord, CoreRangeSet, ShardOrientation};
use tracing_subscriber::EnvFilter;

/// Bytes in one bf16 32×32 tile.
pub const TILE_BYTES: u64 = 2048;

/// Small custom geometry: `grid_x × grid_y` workers, 8 DRAM channels.
pub fn small_arch(grid_x: u32, grid_y: u32) -> ArchSpec {
    ArchSpec::custom("test", CoreCoord::new(grid_x, grid_y), 8, 1 << 24, 1 << 18)
}

/// Route driver logs to the test harness (`RUST_LOG=debug` to see them).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_test_writer()
        .try_init();
}

/// Simulator plus device, keeping a handle on the simulator for
/// fault injection and log inspection.
pub fn open(arch: ArchSpec, transfer: TransferConfig) -> (Arc<SimulatedDevice>, Arc<Device>) {
    init_tracing();
    let sim = Arc::new(
        SimulatedDevice::new(
            SimulatorConfig::new(arch)
                .with_visibility(WriteVisibility::OnBarrier)
                .with_transfer_log(),
        )
        .expect("simulator"),
    );
    let config = DeviceConfig::for_arch(sim.arch()).with_transfer(transfer);
    let device = Device::open(sim.clone(), config).expect("device");
    (sim, device)
}

/// Deterministic non-trivial byte pattern.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) ^ (i >> 8) as u8)
        .collect()
}

/// Tile-paged shard spec over `cores`.
pub fn tile_shards(
    cores: CoreRangeSet,
    shard_tiles: [u32; 2],
    tensor_tiles: [u32; 2],
    orientation: ShardOrientation,
) -> ShardSpecBuffer {
    let spec = ShardSpec::new(cores, [shard_tiles[0] * 32, shard_tiles[1] * 32], orientation);
    ShardSpecBuffer::new(spec, [32, 32], tensor_tiles).expect("shard spec")
}
