//! Device lifecycle and device-wide state.
//!
//! Bring-up is an explicit ledger of acquire/release stages; a failure
//! at any stage releases the completed prefix in exact reverse order,
//! and teardown reuses the same reverse walk. The stages follow the
//! card's hardware needs: PCI enable, the bridge-control region (the
//! FPGA is configured through it), the two register banks, the FIFO
//! with its staging buffer, self-check, initial reset, then the
//! character-access node and registry publication.

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use ct2_card::regs::{
    adapt_50, bank1, bank2, conf_cmpt, ctrl_gene, filtre_input, source_output, temps, NUM_COUNTERS,
};
use ct2_card::rwmap::BankId;
use ct2_card::{Bar, CardModel};
use tracing::{debug, info, warn};

use crate::bus::{CardBus, NodeHandle, RegionHandle};
use crate::config::Ct2Config;
use crate::error::{Ct2Error, Result};
use crate::irq::{capture_handler, spawn_distributor, IrqControl, NotificationLatch, SessionNotices};
use crate::lut::LutSet;
use crate::registry::DeviceRegistry;
use crate::session::Session;
use crate::sync::{BlockingLock, CancelToken, FastLock};

/// State guarded by the register fast lock.
///
/// Holding this lock serializes every register and FIFO access on the
/// bus. The staging buffer is preallocated at bring-up so FIFO drains
/// never allocate under the lock.
#[derive(Debug)]
pub(crate) struct RegisterFile {
    pub(crate) staging: Vec<u32>,
}

/// Completed bring-up stages, in completion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    DeviceEnabled,
    BridgeRegion,
    Bank1Region,
    Bank2Region,
    FifoRegion,
    AccessNode,
}

/// Acquired resources plus the order they were acquired in.
#[derive(Debug, Default)]
struct StageLedger {
    completed: Vec<Stage>,
    bridge: Option<RegionHandle>,
    bank1: Option<RegionHandle>,
    bank2: Option<RegionHandle>,
    fifo: Option<RegionHandle>,
    node: Option<NodeHandle>,
}

impl StageLedger {
    fn record(&mut self, stage: Stage) {
        self.completed.push(stage);
    }

    /// Release every completed stage, newest first.
    fn unwind(&mut self, bus: &dyn CardBus, name: &str) {
        while let Some(stage) = self.completed.pop() {
            debug!(device = name, ?stage, "releasing bring-up stage");
            match stage {
                Stage::AccessNode => {
                    if let Some(node) = self.node.take() {
                        bus.unregister_node(node);
                    }
                }
                Stage::FifoRegion => {
                    if let Some(region) = self.fifo.take() {
                        bus.release_region(region);
                    }
                }
                Stage::Bank2Region => {
                    if let Some(region) = self.bank2.take() {
                        bus.release_region(region);
                    }
                }
                Stage::Bank1Region => {
                    if let Some(region) = self.bank1.take() {
                        bus.release_region(region);
                    }
                }
                Stage::BridgeRegion => {
                    if let Some(region) = self.bridge.take() {
                        bus.release_region(region);
                    }
                }
                Stage::DeviceEnabled => bus.disable(),
            }
        }
    }
}

/// Who holds exclusive access and how many FIFO mappings are live.
#[derive(Debug, Default)]
pub(crate) struct AccessArbiter {
    owner: Option<u64>,
    active_mappings: usize,
}

impl AccessArbiter {
    /// The first-claim rule: state-changing operations are open to all
    /// while nobody holds exclusive access, and to the holder once
    /// somebody does.
    pub(crate) fn may_change_state(&self, session: u64) -> bool {
        match self.owner {
            None => true,
            Some(owner) => owner == session,
        }
    }

    pub(crate) fn holds(&self, session: u64) -> bool {
        self.owner == Some(session)
    }

    pub(crate) fn request(&mut self, session: u64) -> Result<()> {
        match self.owner {
            None => {
                self.owner = Some(session);
                Ok(())
            }
            Some(owner) if owner == session => Ok(()),
            Some(_) => Err(Ct2Error::permission_denied(
                "exclusive access held by another session",
            )),
        }
    }

    /// Release by a non-holder is a no-op success; a holder with live
    /// mappings cannot release.
    pub(crate) fn release(&mut self, session: u64) -> Result<()> {
        if !self.holds(session) {
            return Ok(());
        }
        if self.active_mappings > 0 {
            return Err(Ct2Error::busy(format!(
                "{} live FIFO mappings",
                self.active_mappings
            )));
        }
        self.owner = None;
        Ok(())
    }

    pub(crate) fn add_mapping(&mut self) {
        self.active_mappings += 1;
    }

    pub(crate) fn drop_mapping(&mut self) {
        self.active_mappings = self.active_mappings.saturating_sub(1);
    }

    pub(crate) fn active_mappings(&self) -> usize {
        self.active_mappings
    }
}

/// One open session as the device sees it.
#[derive(Debug)]
pub(crate) struct SessionSlot {
    pub(crate) id: u64,
    pub(crate) notices: Arc<SessionNotices>,
}

/// Device state under the blocking lock.
#[derive(Debug)]
pub(crate) struct DeviceInner {
    ledger: StageLedger,
    pub(crate) sessions: Vec<SessionSlot>,
    pub(crate) arbiter: AccessArbiter,
    pub(crate) irq: IrqControl,
    next_session: u64,
}

/// One CT2 card brought up and ready for sessions.
pub struct Device {
    model: CardModel,
    name: String,
    config: Ct2Config,
    fifo_len: usize,
    pub(crate) bus: Arc<dyn CardBus>,
    pub(crate) luts: Arc<LutSet>,
    pub(crate) regs: Arc<FastLock<RegisterFile>>,
    pub(crate) latch: Arc<NotificationLatch>,
    pub(crate) inner: BlockingLock<DeviceInner>,
    registry: Weak<DeviceRegistry>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("model", &self.model)
            .field("name", &self.name)
            .field("address", &self.bus.address())
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Run the staged bring-up against `bus` and return the device,
    /// ready for publication.
    pub(crate) fn bring_up(
        registry: &Arc<DeviceRegistry>,
        bus: Arc<dyn CardBus>,
    ) -> Result<Arc<Self>> {
        let id = bus.device_id();
        let model = CardModel::from_device_id(id).ok_or_else(|| {
            Ct2Error::invalid_argument(format!("unknown PCI device ID {id:#06x}"))
        })?;
        let name = registry.next_name(model);
        info!(
            device = %name,
            model = model.name(),
            address = bus.address(),
            "bringing up card"
        );

        let mut ledger = StageLedger::default();
        match Self::acquire_stages(bus.as_ref(), model, &name, &mut ledger) {
            Ok(()) => {}
            Err(err) => {
                warn!(device = %name, error = %err, "bring-up failed, unwinding");
                ledger.unwind(bus.as_ref(), &name);
                return Err(err);
            }
        }

        let fifo_len = bus.fifo_len();
        let device = Arc::new(Self {
            model,
            name,
            config: *registry.config(),
            fifo_len,
            luts: registry.lut_set(model),
            regs: Arc::new(FastLock::new(RegisterFile {
                staging: vec![0u32; fifo_len],
            })),
            latch: Arc::new(NotificationLatch::default()),
            inner: BlockingLock::new(DeviceInner {
                ledger,
                sessions: Vec::new(),
                arbiter: AccessArbiter::default(),
                irq: IrqControl::default(),
                next_session: 1,
            }),
            registry: Arc::downgrade(registry),
            bus,
        });
        info!(device = device.name(), "card ready");
        Ok(device)
    }

    fn acquire_stages(
        bus: &dyn CardBus,
        model: CardModel,
        name: &str,
        ledger: &mut StageLedger,
    ) -> Result<()> {
        bus.enable()?;
        ledger.record(Stage::DeviceEnabled);

        ledger.bridge = Some(bus.reserve_region(Bar::BridgeControl)?);
        ledger.record(Stage::BridgeRegion);
        bus.load_firmware()?;

        ledger.bank1 = Some(bus.reserve_region(Bar::Bank1)?);
        ledger.record(Stage::Bank1Region);

        ledger.bank2 = Some(bus.reserve_region(Bar::Bank2)?);
        ledger.record(Stage::Bank2Region);

        ledger.fifo = Some(bus.reserve_region(Bar::Fifo)?);
        ledger.record(Stage::FifoRegion);

        self_check(bus, model, name)?;
        program_reset(bus, model);

        ledger.node = Some(bus.register_node(name)?);
        ledger.record(Stage::AccessNode);
        Ok(())
    }

    /// Card model of this device.
    #[must_use]
    pub const fn model(&self) -> CardModel {
        self.model
    }

    /// Registered node name, e.g. `p201.0`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// PCI address of the card.
    #[must_use]
    pub fn address(&self) -> &str {
        self.bus.address()
    }

    /// FIFO window length in 32-bit words.
    #[must_use]
    pub const fn fifo_len(&self) -> usize {
        self.fifo_len
    }

    /// Open a new session on the device.
    pub fn open(self: &Arc<Self>) -> Result<Session> {
        let cancel = CancelToken::new();
        let mut inner = self.inner.lock(&cancel)?;
        let id = inner.next_session;
        inner.next_session += 1;
        let notices = Arc::new(SessionNotices::new(inner.irq.enabled));
        inner.sessions.push(SessionSlot {
            id,
            notices: Arc::clone(&notices),
        });
        debug!(device = self.name(), session = id, "session opened");
        Ok(Session::new(Arc::clone(self), id, notices, cancel))
    }

    /// Disable interrupts if needed, unpublish, and release every
    /// bring-up stage in reverse. Idempotent.
    pub fn shutdown(&self) {
        let worker = {
            let mut inner = self.inner.lock_uncancellable();
            self.stop_distribution(&mut inner)
        };
        self.finish_distribution(worker);

        if let Some(registry) = self.registry.upgrade() {
            registry.unpublish(self);
        }

        let mut inner = self.inner.lock_uncancellable();
        if !inner.ledger.completed.is_empty() {
            info!(device = self.name(), "tearing down card");
        }
        inner.ledger.unwind(self.bus.as_ref(), &self.name);
    }

    // ---- interrupt control (called through sessions) ----

    pub(crate) fn enable_interrupts(
        self: &Arc<Self>,
        session: u64,
        capacity: usize,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut inner = self.inner.lock(cancel)?;
        if !inner.arbiter.may_change_state(session) {
            return Err(Ct2Error::permission_denied("enable interrupts"));
        }
        let capacity = if capacity == 0 {
            self.config.notification_capacity
        } else {
            capacity
        };
        if inner.irq.enabled {
            if inner.irq.capacity == capacity {
                return Ok(());
            }
            return Err(Ct2Error::busy(format!(
                "interrupts already enabled with capacity {}",
                inner.irq.capacity
            )));
        }

        // Speculative: worker and handler exist before the device
        // commits to delivering anything.
        self.latch.rearm();
        let worker = spawn_distributor(Arc::downgrade(self), Arc::clone(&self.latch))?;
        let handler = capture_handler(
            Arc::clone(&self.regs),
            Arc::clone(&self.latch),
            self.model.interrupt_mask(),
        );
        if let Err(err) = self.bus.attach_interrupt_handler(handler) {
            drop(inner);
            self.finish_distribution(Some(worker));
            return Err(err);
        }

        inner.irq = IrqControl {
            enabled: true,
            capacity,
            worker: Some(worker),
        };
        for slot in &inner.sessions {
            slot.notices.set_receives(true);
        }
        info!(device = self.name(), capacity, "interrupts enabled");
        Ok(())
    }

    pub(crate) fn disable_interrupts(
        &self,
        session: u64,
        cancel: &CancelToken,
    ) -> Result<()> {
        let worker = {
            let mut inner = self.inner.lock(cancel)?;
            if !inner.arbiter.may_change_state(session) {
                return Err(Ct2Error::permission_denied("disable interrupts"));
            }
            if !inner.irq.enabled {
                return Ok(());
            }
            self.stop_distribution(&mut inner)
        };
        self.finish_distribution(worker);
        Ok(())
    }

    /// Detach capture, drop undistributed notifications, hang up every
    /// session. Returns the worker for the caller to join once the
    /// blocking lock is released.
    fn stop_distribution(&self, inner: &mut DeviceInner) -> Option<JoinHandle<()>> {
        if !inner.irq.enabled {
            return None;
        }
        self.bus.detach_interrupt_handler();
        self.latch.clear();
        inner.irq.enabled = false;
        inner.irq.capacity = 0;
        for slot in &inner.sessions {
            slot.notices.set_receives(false);
        }
        info!(device = self.name(), "interrupts disabled");
        inner.irq.worker.take()
    }

    fn finish_distribution(&self, worker: Option<JoinHandle<()>>) {
        if let Some(worker) = worker {
            self.latch.request_shutdown();
            let _ = worker.join();
        }
    }

    // ---- register access under the fast lock ----

    pub(crate) fn read_registers(&self, bank: BankId, offset: u16, buf: &mut [u32]) {
        let _regs = self.regs.lock();
        for (i, word) in buf.iter_mut().enumerate() {
            *word = self.bus.read_register(bank, offset + i as u16);
        }
    }

    pub(crate) fn write_registers(&self, bank: BankId, offset: u16, data: &[u32]) {
        let _regs = self.regs.lock();
        for (i, word) in data.iter().enumerate() {
            self.bus.write_register(bank, offset + i as u16, *word);
        }
    }

    /// Copy the first `out.len()` FIFO words out through the staging
    /// buffer.
    pub(crate) fn drain_fifo(&self, out: &mut [u32]) {
        let mut regs = self.regs.lock();
        for i in 0..out.len() {
            regs.staging[i] = self.bus.read_fifo_word(i);
        }
        out.copy_from_slice(&regs.staging[..out.len()]);
    }

    /// Device-level reset, called through a session that passed the
    /// first-claim and interrupts-disabled checks.
    pub(crate) fn reset(&self, session: u64, cancel: &CancelToken) -> Result<()> {
        let inner = self.inner.lock(cancel)?;
        if !inner.arbiter.may_change_state(session) {
            return Err(Ct2Error::permission_denied("device reset"));
        }
        if inner.irq.enabled {
            return Err(Ct2Error::busy("device reset while interrupts are enabled"));
        }
        {
            let _regs = self.regs.lock();
            program_reset(self.bus.as_ref(), self.model);
        }
        drop(inner);
        info!(device = self.name(), "device reset");
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let live = {
            let inner = self.inner.lock_uncancellable();
            !inner.ledger.completed.is_empty()
        };
        if live {
            debug!(device = self.name(), "device dropped while live, tearing down");
            self.shutdown();
        }
    }
}

/// Verify the card is electrically sound and log its identity.
///
/// Only the C208 reports rails and temperatures; the P201 just carries
/// its serial.
fn self_check(bus: &dyn CardBus, model: CardModel, name: &str) -> Result<()> {
    let status = bus.read_register(BankId::Bank1, bank1::CTRL_GENE);
    if model.has_telemetry() {
        if status & ctrl_gene::C208_HEALTHY != ctrl_gene::C208_HEALTHY {
            return Err(Ct2Error::hardware(format!(
                "power section unhealthy, CTRL_GENE {status:#010x}"
            )));
        }
        if status & (ctrl_gene::TEMP_ALERT | ctrl_gene::TEMP_OVERT) != 0 {
            return Err(Ct2Error::hardware(format!(
                "temperature alert, CTRL_GENE {status:#010x}"
            )));
        }
        let heat = bus.read_register(BankId::Bank1, bank1::TEMPS);
        info!(
            device = name,
            card_serial = ctrl_gene::card_serial(status),
            mezzanine_serial = ctrl_gene::mezzanine_serial(status),
            virtex_celsius = temps::virtex(heat),
            regulator_celsius = temps::regulator(heat),
            "self-check passed"
        );
    } else {
        info!(
            device = name,
            card_serial = ctrl_gene::card_serial(status),
            "self-check passed"
        );
    }
    Ok(())
}

/// Program the power-on register state.
///
/// Callers serialize: either bring-up (single threaded) or a session
/// reset holding the register fast lock.
fn program_reset(bus: &dyn CardBus, model: CardModel) {
    let w1 = |off, val| bus.write_register(BankId::Bank1, off, val);
    let w2 = |off, val| bus.write_register(BankId::Bank2, off, val);

    w1(bank1::SOURCE_IT_A, 0);
    w1(bank1::SOURCE_IT_B, 0);
    w1(bank1::NIVEAU_OUT, 0);
    match model {
        CardModel::C208 => {
            w1(bank1::ADAPT_50, adapt_50::C208_ALL);
            w2(bank2::SEL_FILTRE_INPUT_A, filtre_input::all_sync(6));
            w2(bank2::SEL_FILTRE_INPUT_B, filtre_input::all_sync(6));
            for i in 0..3 {
                w2(bank2::C208_SEL_FILTRE_OUTPUT_BASE + i, 0);
            }
            for i in 0..3 {
                w2(bank2::C208_SEL_SOURCE_OUTPUT_BASE + i, source_output::C208_ALL);
            }
        }
        CardModel::P201 => {
            w1(bank1::ADAPT_50, adapt_50::P201_ALL);
            w2(bank2::SEL_FILTRE_INPUT_A, filtre_input::all_sync(6));
            w2(bank2::SEL_FILTRE_INPUT_B, filtre_input::all_sync(4));
            w1(bank1::NIVEAU_IN, 0);
            w2(bank2::P201_SEL_FILTRE_OUTPUT, 0);
            w2(bank2::P201_SEL_SOURCE_OUTPUT, source_output::P201_ALL);
        }
    }
    w1(bank1::SOFT_OUT, 0);
    w1(bank1::CMD_DMA, 0);
    for i in 0..NUM_COUNTERS {
        w2(bank2::CONF_CMPT_BASE + i, conf_cmpt::CLK_100_MHZ);
    }
    for i in 0..6 {
        w2(bank2::SEL_LATCH_BASE + i, 0);
    }
    for i in 0..NUM_COUNTERS {
        w2(bank2::COMPARE_CMPT_BASE + i, 0);
    }
    w1(bank1::COM_GENE, 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arbiter_grants_first_claim_and_holder() {
        let mut arbiter = AccessArbiter::default();
        assert!(arbiter.may_change_state(1));
        assert!(arbiter.may_change_state(2));
        arbiter.request(1).unwrap();
        assert!(arbiter.may_change_state(1));
        assert!(!arbiter.may_change_state(2));
        // Re-request by the holder is idempotent.
        arbiter.request(1).unwrap();
        assert!(arbiter.request(2).is_err());
    }

    #[test]
    fn arbiter_release_semantics() {
        let mut arbiter = AccessArbiter::default();
        arbiter.request(1).unwrap();
        // Non-holder release is a no-op success, holder keeps access.
        arbiter.release(2).unwrap();
        assert!(arbiter.holds(1));
        arbiter.add_mapping();
        assert!(matches!(arbiter.release(1), Err(Ct2Error::Busy { .. })));
        arbiter.drop_mapping();
        arbiter.release(1).unwrap();
        assert!(!arbiter.holds(1));
        arbiter.request(2).unwrap();
    }
}
