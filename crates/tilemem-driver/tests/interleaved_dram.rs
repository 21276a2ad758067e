//! Interleaved DRAM buffers

mod common;

use common::{open, pattern, small_arch};
use tilemem_driver::{
    address_for_page, read_from_buffer, read_from_buffer_into, write_to_buffer, BankId, Buffer,
    BufferConfig, Device, MemError, MemorySpace, TransferConfig,
};
use tilemem_grid::ArchSpec;

#[test]
fn pages_round_robin_over_eight_banks() {
    let device = Device::simulated(ArchSpec::grayskull()).unwrap();
    assert_eq!(device.num_dram_channels(), 8);

    let buffer = Buffer::allocate(&device, BufferConfig::interleaved(1024, 64)).unwrap();
    let base = buffer.address().unwrap();
    for page in 0..16 {
        let addr = address_for_page(&buffer, page).unwrap();
        assert_eq!(addr.bank, BankId((page % 8) as u32));
        assert_eq!(addr.offset, base + (page / 8) * 64);
    }
    assert!(address_for_page(&buffer, 16).unwrap_err().is_bounds());

    let data = pattern(1024, 9);
    write_to_buffer(&buffer, &data).unwrap();
    device.dram_barrier().unwrap();
    assert_eq!(read_from_buffer(&buffer).unwrap().as_ref(), data.as_slice());

    // Page 11 lives in channel 3, one page above the base.
    let mut page = [0u8; 64];
    device.read_from_dram_channel(3, base + 64, &mut page).unwrap();
    assert_eq!(&page[..], &data[11 * 64..12 * 64]);
}

#[test]
fn fewer_pages_than_banks() {
    let device = Device::simulated(ArchSpec::wormhole_b0()).unwrap();
    let buffer = Buffer::allocate(&device, BufferConfig::interleaved(5 * 32, 32)).unwrap();
    assert_eq!(buffer.banks().len(), 5);
    let data = pattern(160, 1);
    write_to_buffer(&buffer, &data).unwrap();
    device.dram_barrier().unwrap();
    let mut out = vec![0u8; 160];
    read_from_buffer_into(&buffer, &mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn interleaved_l1_round_trip_per_bank() {
    let (_sim, device) = open(small_arch(3, 3), TransferConfig::per_bank(4));
    let cfg = BufferConfig::interleaved(100 * 64, 64).memory_space(MemorySpace::L1);
    let buffer = Buffer::allocate(&device, cfg).unwrap();
    assert_eq!(buffer.banks().len(), 9);
    let data = pattern(6400, 7);
    write_to_buffer(&buffer, &data).unwrap();
    device.l1_barrier().unwrap();
    assert_eq!(read_from_buffer(&buffer).unwrap().as_ref(), data.as_slice());
}

#[test]
fn buffers_do_not_alias() {
    let device = Device::simulated(ArchSpec::grayskull()).unwrap();
    let a = Buffer::allocate(&device, BufferConfig::interleaved(2048, 128)).unwrap();
    let b = Buffer::allocate(&device, BufferConfig::interleaved(2048, 128)).unwrap();
    let da = pattern(2048, 1);
    let db = pattern(2048, 2);
    write_to_buffer(&a, &da).unwrap();
    write_to_buffer(&b, &db).unwrap();
    device.dram_barrier().unwrap();
    assert_eq!(read_from_buffer(&a).unwrap().as_ref(), da.as_slice());
    assert_eq!(read_from_buffer(&b).unwrap().as_ref(), db.as_slice());
}

#[test]
fn fault_aborts_remaining_pages() {
    let (sim, device) = open(small_arch(2, 2), TransferConfig::default());
    let buffer = Buffer::allocate(&device, BufferConfig::interleaved(32 * 64, 64)).unwrap();
    sim.inject_fault(MemorySpace::Dram, BankId(5));

    let err = write_to_buffer(&buffer, &pattern(32 * 64, 3)).unwrap_err();
    assert!(
        matches!(err, MemError::PageTransfer { page: 5, bank: BankId(5), .. }),
        "{err}"
    );
    assert!(err.to_string().contains("page 5"));

    // Pages 0..5 were issued; the barrier lands them and nothing after.
    sim.clear_faults();
    device.dram_barrier().unwrap();
    let data = read_from_buffer(&buffer).unwrap();
    let expected = pattern(32 * 64, 3);
    assert_eq!(&data[..5 * 64], &expected[..5 * 64]);
    assert!(data[5 * 64..].iter().all(|&b| b == 0));
}

#[test]
fn dropped_device_is_reported() {
    let device = Device::simulated(ArchSpec::grayskull()).unwrap();
    let buffer = Buffer::allocate(&device, BufferConfig::interleaved(64, 64)).unwrap();
    drop(device);
    assert!(matches!(
        write_to_buffer(&buffer, &[0; 64]),
        Err(MemError::DeviceClosed { .. })
    ));
}
