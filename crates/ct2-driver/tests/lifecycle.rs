//! Bring-up staging, rollback on failure, and exact-reverse teardown,
//! observed through the simulator's bus event log.

use ct2_card::{Bar, CardModel};
use ct2_driver::{BusEvent, Ct2Config, Ct2Error, DeviceRegistry, FaultPoint, SimBus};

const BRING_UP: &[BusEvent] = &[
    BusEvent::Enabled,
    BusEvent::Reserved(Bar::BridgeControl),
    BusEvent::FirmwareLoaded,
    BusEvent::Reserved(Bar::Bank1),
    BusEvent::Reserved(Bar::Bank2),
    BusEvent::Reserved(Bar::Fifo),
    BusEvent::NodeRegistered,
];

const TEAR_DOWN: &[BusEvent] = &[
    BusEvent::NodeUnregistered,
    BusEvent::Released(Bar::Fifo),
    BusEvent::Released(Bar::Bank2),
    BusEvent::Released(Bar::Bank1),
    BusEvent::Released(Bar::BridgeControl),
    BusEvent::Disabled,
];

#[test]
fn bring_up_acquires_stages_in_order() {
    let registry = DeviceRegistry::new(Ct2Config::default());
    let sim = SimBus::new(CardModel::C208);
    registry.probe(sim.clone()).unwrap();
    assert_eq!(sim.events(), BRING_UP);
}

#[test]
fn teardown_releases_stages_in_exact_reverse() {
    let registry = DeviceRegistry::new(Ct2Config::default());
    let sim = SimBus::new(CardModel::P201);
    let device = registry.probe(sim.clone()).unwrap();
    registry.remove(&device);

    let events = sim.events();
    assert_eq!(&events[..BRING_UP.len()], BRING_UP);
    assert_eq!(&events[BRING_UP.len()..], TEAR_DOWN);
    assert!(registry.devices().is_empty());
}

#[test]
fn failed_stage_rolls_back_the_completed_prefix() {
    let registry = DeviceRegistry::new(Ct2Config::default());
    let sim = SimBus::with_faults(CardModel::C208, &[FaultPoint::Reserve(Bar::Bank2)]);
    let err = registry.probe(sim.clone()).unwrap_err();
    assert!(matches!(err, Ct2Error::Device { .. }));

    assert_eq!(
        sim.events(),
        &[
            BusEvent::Enabled,
            BusEvent::Reserved(Bar::BridgeControl),
            BusEvent::FirmwareLoaded,
            BusEvent::Reserved(Bar::Bank1),
            BusEvent::Released(Bar::Bank1),
            BusEvent::Released(Bar::BridgeControl),
            BusEvent::Disabled,
        ]
    );
    assert!(registry.devices().is_empty());
}

#[test]
fn late_stage_failure_unwinds_everything() {
    let registry = DeviceRegistry::new(Ct2Config::default());
    let sim = SimBus::with_faults(CardModel::P201, &[FaultPoint::RegisterNode]);
    registry.probe(sim.clone()).unwrap_err();

    assert_eq!(
        sim.events(),
        &[
            BusEvent::Enabled,
            BusEvent::Reserved(Bar::BridgeControl),
            BusEvent::FirmwareLoaded,
            BusEvent::Reserved(Bar::Bank1),
            BusEvent::Reserved(Bar::Bank2),
            BusEvent::Reserved(Bar::Fifo),
            BusEvent::Released(Bar::Fifo),
            BusEvent::Released(Bar::Bank2),
            BusEvent::Released(Bar::Bank1),
            BusEvent::Released(Bar::BridgeControl),
            BusEvent::Disabled,
        ]
    );
}

#[test]
fn self_check_failure_aborts_bring_up() {
    let registry = DeviceRegistry::new(Ct2Config::default());

    // A C208 with a dead power section refuses to come up.
    let sim = SimBus::new(CardModel::C208);
    sim.set_ctrl_gene(0);
    let err = registry.probe(sim.clone()).unwrap_err();
    assert!(matches!(err, Ct2Error::Hardware { .. }));
    assert_eq!(sim.events().last(), Some(&BusEvent::Disabled));

    // The P201 reports no telemetry; a zeroed status register is fine.
    let sim = SimBus::new(CardModel::P201);
    sim.set_ctrl_gene(0);
    registry.probe(sim).unwrap();
}

#[test]
fn unknown_device_id_is_an_invalid_argument() {
    let registry = DeviceRegistry::new(Ct2Config::default());
    let sim = SimBus::misreporting(0xBEEF);
    let err = registry.probe(sim.clone()).unwrap_err();
    assert!(matches!(err, Ct2Error::InvalidArgument { .. }));
    // Rejected before any stage ran.
    assert!(sim.events().is_empty());
}

#[test]
fn teardown_disables_interrupts_first() {
    let registry = DeviceRegistry::new(Ct2Config::default());
    let sim = SimBus::new(CardModel::P201);
    let device = registry.probe(sim.clone()).unwrap();

    let session = device.open().unwrap();
    session.enable_interrupts(0).unwrap();
    drop(session);
    registry.remove(&device);

    let events = sim.events();
    let attached = events
        .iter()
        .position(|e| *e == BusEvent::InterruptsAttached)
        .unwrap();
    let detached = events
        .iter()
        .position(|e| *e == BusEvent::InterruptsDetached)
        .unwrap();
    let node_gone = events
        .iter()
        .position(|e| *e == BusEvent::NodeUnregistered)
        .unwrap();
    assert!(attached < detached);
    assert!(detached < node_gone);
    assert_eq!(events.last(), Some(&BusEvent::Disabled));
}

#[test]
fn registry_tracks_published_devices() {
    let registry = DeviceRegistry::new(Ct2Config::default());
    let first = registry.probe(SimBus::new(CardModel::C208)).unwrap();
    let second = registry.probe(SimBus::new(CardModel::P201)).unwrap();

    assert_eq!(registry.devices().len(), 2);
    assert_eq!(first.name(), "c208.0");
    assert_eq!(second.name(), "p201.1");

    registry.remove(&first);
    let remaining = registry.devices();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name(), "p201.1");
}

#[test]
fn reset_programs_the_power_on_state() {
    let registry = DeviceRegistry::new(Ct2Config::default());
    let sim = SimBus::new(CardModel::P201);
    let device = registry.probe(sim.clone()).unwrap();
    let session = device.open().unwrap();

    // Scribble over a counter configuration, then reset.
    session.write_at(64 + 14, &[0x1]).unwrap();
    session.reset().unwrap();

    // Counters back on the 100 MHz clock, 50 ohm adaptation full open.
    assert_eq!(session.read_at(64 + 14, 1).unwrap(), vec![0x5]);
    assert_eq!(session.read_at(4, 1).unwrap(), vec![0x3FF]);
}
