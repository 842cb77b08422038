//! Register window I/O against the simulated card: LUT validity,
//! clamping, seek, FIFO drains, and the first-claim permission rule.

use std::io::SeekFrom;
use std::sync::Arc;

use ct2_card::CardModel;
use ct2_driver::{Ct2Config, Ct2Error, Device, DeviceRegistry, SimBus};

fn p201() -> (Arc<DeviceRegistry>, Arc<Device>) {
    let registry = DeviceRegistry::new(Ct2Config::default());
    let device = registry.probe(SimBus::new(CardModel::P201)).unwrap();
    (registry, device)
}

#[test]
fn inaccessible_offsets_are_invalid_arguments() {
    let (_registry, device) = p201();
    let session = device.open().unwrap();

    // Reserved slot in bank 1 (14 is reserved on both models).
    let err = session.read_at(14, 1).unwrap_err();
    assert!(matches!(err, Ct2Error::InvalidArgument { .. }));

    // CTRL_IT is reserved to the interrupt pipeline.
    assert!(session.read_at(12, 1).is_err());

    // Read-only register is not writable.
    let err = session.write_at(1, &[0]).unwrap_err();
    assert!(matches!(err, Ct2Error::InvalidArgument { .. }));

    // Past the window entirely.
    assert!(session.read_at(128, 1).is_err());
    assert!(session.write_at(500, &[0]).is_err());
}

#[test]
fn oversized_transfers_clamp_to_the_accessible_run() {
    let (_registry, device) = p201();
    let session = device.open().unwrap();

    // P201 bank 2 write run 7..=40 -> window offsets 71..=104. Writing
    // 64 words at offset 100 must clamp to the 5 remaining registers.
    let data: Vec<u32> = (0..64).collect();
    let written = session.write_at(100, &data).unwrap();
    assert_eq!(written, 5);

    let back = session.read_at(100, 64).unwrap();
    assert_eq!(back.len(), 5);
    assert_eq!(back, &data[..5]);
}

#[test]
fn cursor_io_and_seek() {
    let (_registry, device) = p201();
    let session = device.open().unwrap();

    // Write two words at NIVEAU_OUT/ADAPT_50 through the cursor.
    session.seek(SeekFrom::Start(3)).unwrap();
    assert_eq!(session.write(&[0x11, 0x22]).unwrap(), 2);
    assert_eq!(session.seek(SeekFrom::Current(-2)).unwrap(), 3);
    assert_eq!(session.read(2).unwrap(), vec![0x11, 0x22]);

    // End-relative targets count back from the window length; the
    // length itself is past the last register and refused.
    assert_eq!(session.seek(SeekFrom::End(-1)).unwrap(), 127);
    assert!(session.seek(SeekFrom::End(0)).is_err());
    assert!(session.seek(SeekFrom::Start(128)).is_err());

    // Out-of-range targets are refused and leave the cursor alone.
    assert!(session.seek(SeekFrom::Current(-200)).is_err());
    assert_eq!(session.seek(SeekFrom::Current(0)).unwrap(), 127);
}

#[test]
fn writes_respect_the_first_claim_rule() {
    let (_registry, device) = p201();
    let holder = device.open().unwrap();
    let other = device.open().unwrap();

    // Nobody holds exclusive access: both may write.
    holder.write_at(3, &[1]).unwrap();
    other.write_at(3, &[2]).unwrap();

    holder.request_exclusive().unwrap();
    holder.write_at(3, &[3]).unwrap();
    let err = other.write_at(3, &[4]).unwrap_err();
    assert!(matches!(err, Ct2Error::PermissionDenied { .. }));

    // Plain status reads stay open to everyone.
    other.read_at(1, 1).unwrap();

    holder.release_exclusive().unwrap();
    other.write_at(3, &[5]).unwrap();
}

#[test]
fn side_effectful_reads_need_standing_plain_reads_do_not() {
    let (_registry, device) = p201();
    let holder = device.open().unwrap();
    let other = device.open().unwrap();
    holder.request_exclusive().unwrap();

    // A 2-word read at CMD_DMA covers CTRL_FIFO_DMA, which is
    // read-clear.
    let err = other.read_at(8, 2).unwrap_err();
    assert!(matches!(err, Ct2Error::PermissionDenied { .. }));
    holder.read_at(8, 2).unwrap();

    // The same range short of the sensitive register is fine.
    other.read_at(8, 1).unwrap();
}

#[test]
fn fifo_drain_bounds_and_standing() {
    let registry = DeviceRegistry::new(Ct2Config::default());
    let sim = SimBus::new(CardModel::P201);
    let device = registry.probe(sim.clone()).unwrap();
    let session = device.open().unwrap();

    sim.preload_fifo(&[0xAA, 0xBB, 0xCC]);
    assert_eq!(session.read_fifo(3).unwrap(), vec![0xAA, 0xBB, 0xCC]);

    // Beyond the window, or empty, is invalid.
    assert!(session.read_fifo(device.fifo_len() + 1).is_err());
    assert!(session.read_fifo(0).is_err());

    // Draining pops data, so it follows the first-claim rule.
    let holder = device.open().unwrap();
    holder.request_exclusive().unwrap();
    let err = session.read_fifo(1).unwrap_err();
    assert!(matches!(err, Ct2Error::PermissionDenied { .. }));
}

#[test]
fn test_register_is_exposed_only_by_configuration() {
    let closed = DeviceRegistry::new(Ct2Config::default());
    let device = closed.probe(SimBus::new(CardModel::P201)).unwrap();
    let session = device.open().unwrap();
    assert!(session.read_at(63, 1).is_err());

    let open = DeviceRegistry::new(Ct2Config {
        enable_test_register: true,
        ..Ct2Config::default()
    });
    let device = open.probe(SimBus::new(CardModel::P201)).unwrap();
    let session = device.open().unwrap();
    session.write_at(63, &[0xF0]).unwrap();
    // The read itself is state-changing: the register clears behind it.
    assert_eq!(session.read_at(63, 1).unwrap(), vec![0xF0]);
    assert_eq!(session.read_at(63, 1).unwrap(), vec![0]);
}
