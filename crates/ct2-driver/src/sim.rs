//! In-memory CT2 card.
//!
//! `SimBus` implements [`CardBus`] against a register file in RAM, with
//! the side effects a real card shows: read-clear `CTRL_IT` and
//! `CTRL_FIFO_DMA`, soft reset through `COM_GENE`, a healthy power
//! section on `CTRL_GENE`. It keeps an event log of bus-level
//! operations and supports per-operation fault injection, so lifecycle
//! ordering and rollback are observable from tests without hardware.

use std::sync::Arc;

use ct2_card::regs::{bank1, com_gene, ctrl_gene, BANK_LEN};
use ct2_card::rwmap::BankId;
use ct2_card::{Bar, CardModel};

use crate::bus::{CaptureOutcome, CardBus, InterruptHandler, NodeHandle, RegionHandle};
use crate::error::{Ct2Error, Result};

/// Default FIFO window length, words.
pub const SIM_FIFO_LEN: usize = 1024;

/// Bus operations where a fault can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// `enable` fails.
    Enable,
    /// Reserving the given BAR fails.
    Reserve(Bar),
    /// The configuration image refuses to load.
    Firmware,
    /// Node registration fails.
    RegisterNode,
    /// Attaching the interrupt handler fails.
    AttachInterrupts,
}

/// One entry of the simulator's bus event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// Device enabled.
    Enabled,
    /// Device disabled.
    Disabled,
    /// BAR reserved.
    Reserved(Bar),
    /// BAR reservation returned.
    Released(Bar),
    /// Configuration image loaded.
    FirmwareLoaded,
    /// Character-access node registered.
    NodeRegistered,
    /// Character-access node removed.
    NodeUnregistered,
    /// Interrupt handler attached.
    InterruptsAttached,
    /// Interrupt handler detached.
    InterruptsDetached,
}

#[derive(Debug)]
struct SimState {
    enabled: bool,
    bank1: [u32; BANK_LEN as usize],
    bank2: [u32; BANK_LEN as usize],
    fifo: Vec<u32>,
    reserved: Vec<Bar>,
    next_token: u32,
    node: Option<u32>,
    events: Vec<BusEvent>,
}

/// Software CT2 card.
pub struct SimBus {
    model: CardModel,
    reported_id: u16,
    address: String,
    faults: Vec<FaultPoint>,
    state: spin::Mutex<SimState>,
    handler: spin::Mutex<Option<InterruptHandler>>,
}

impl std::fmt::Debug for SimBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimBus")
            .field("model", &self.model)
            .field("address", &self.address)
            .field("faults", &self.faults)
            .finish_non_exhaustive()
    }
}

impl SimBus {
    /// Create a healthy simulated card.
    #[must_use]
    pub fn new(model: CardModel) -> Arc<Self> {
        Self::with_faults(model, &[])
    }

    /// Create a simulated card that fails at the given points.
    #[must_use]
    pub fn with_faults(model: CardModel, faults: &[FaultPoint]) -> Arc<Self> {
        let mut bank1 = [0u32; BANK_LEN as usize];
        // Power section healthy, card serial 0x2A, mezzanine 0x07.
        bank1[bank1::CTRL_GENE as usize] = ctrl_gene::C208_HEALTHY | (0x2A << 8) | (0x07 << 16);
        // Virtex 45 °C, regulator 40 °C.
        bank1[bank1::TEMPS as usize] = (40 << 8) | 45;
        Arc::new(Self {
            model,
            reported_id: model.device_id(),
            address: format!("0000:03:0d.{}", model.device_id() & 1),
            faults: faults.to_vec(),
            state: spin::Mutex::new(SimState {
                enabled: false,
                bank1,
                bank2: [0u32; BANK_LEN as usize],
                fifo: vec![0u32; SIM_FIFO_LEN],
                reserved: Vec::new(),
                next_token: 1,
                node: None,
                events: Vec::new(),
            }),
            handler: spin::Mutex::new(None),
        })
    }

    /// Create a card that reports an arbitrary PCI device ID.
    #[must_use]
    pub fn misreporting(device_id: u16) -> Arc<Self> {
        let mut sim = Self::with_faults(CardModel::C208, &[]);
        // Arc not shared yet.
        if let Some(inner) = Arc::get_mut(&mut sim) {
            inner.reported_id = device_id;
        }
        sim
    }

    fn faulted(&self, point: FaultPoint) -> bool {
        self.faults.contains(&point)
    }

    /// Overwrite `CTRL_GENE`, e.g. to simulate a dropped power rail.
    pub fn set_ctrl_gene(&self, value: u32) {
        self.state.lock().bank1[bank1::CTRL_GENE as usize] = value;
    }

    /// Fill the start of the FIFO window.
    pub fn preload_fifo(&self, words: &[u32]) {
        let mut state = self.state.lock();
        let n = words.len().min(state.fifo.len());
        state.fifo[..n].copy_from_slice(&words[..n]);
    }

    /// Latch interrupt source bits and fire the capture handler, the way
    /// the line would in hardware. Returns what the handler decided, or
    /// `NotMine` when no handler is attached.
    pub fn raise_interrupt(&self, bits: u32) -> CaptureOutcome {
        self.state.lock().bank1[bank1::CTRL_IT as usize] |= bits;
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler(self),
            None => CaptureOutcome::NotMine,
        }
    }

    /// Snapshot of the bus event log.
    #[must_use]
    pub fn events(&self) -> Vec<BusEvent> {
        self.state.lock().events.clone()
    }

    /// Register value as stored, without read side effects.
    #[must_use]
    pub fn peek_register(&self, bank: BankId, offset: u16) -> u32 {
        let state = self.state.lock();
        match bank {
            BankId::Bank1 => state.bank1[offset as usize],
            BankId::Bank2 => state.bank2[offset as usize],
        }
    }

    fn soft_reset(state: &mut SimState) {
        let status = (
            state.bank1[bank1::CTRL_GENE as usize],
            state.bank1[bank1::TEMPS as usize],
        );
        state.bank1 = [0; BANK_LEN as usize];
        state.bank2 = [0; BANK_LEN as usize];
        state.bank1[bank1::CTRL_GENE as usize] = status.0;
        state.bank1[bank1::TEMPS as usize] = status.1;
        for word in &mut state.fifo {
            *word = 0;
        }
    }
}

impl CardBus for SimBus {
    fn device_id(&self) -> u16 {
        self.reported_id
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn enable(&self) -> Result<()> {
        if self.faulted(FaultPoint::Enable) {
            return Err(Ct2Error::device("injected fault: enable"));
        }
        let mut state = self.state.lock();
        state.enabled = true;
        state.events.push(BusEvent::Enabled);
        Ok(())
    }

    fn disable(&self) {
        let mut state = self.state.lock();
        state.enabled = false;
        state.events.push(BusEvent::Disabled);
    }

    fn reserve_region(&self, bar: Bar) -> Result<RegionHandle> {
        if self.faulted(FaultPoint::Reserve(bar)) {
            return Err(Ct2Error::device(format!(
                "injected fault: reserve BAR {}",
                bar.index()
            )));
        }
        let mut state = self.state.lock();
        if state.reserved.contains(&bar) {
            return Err(Ct2Error::device(format!(
                "BAR {} already reserved",
                bar.index()
            )));
        }
        state.reserved.push(bar);
        let token = state.next_token;
        state.next_token += 1;
        state.events.push(BusEvent::Reserved(bar));
        Ok(RegionHandle::new(bar, token))
    }

    fn release_region(&self, region: RegionHandle) {
        let mut state = self.state.lock();
        state.reserved.retain(|&bar| bar != region.bar());
        state.events.push(BusEvent::Released(region.bar()));
    }

    fn load_firmware(&self) -> Result<()> {
        if self.faulted(FaultPoint::Firmware) {
            return Err(Ct2Error::hardware("injected fault: firmware load"));
        }
        self.state.lock().events.push(BusEvent::FirmwareLoaded);
        Ok(())
    }

    fn read_register(&self, bank: BankId, offset: u16) -> u32 {
        let mut state = self.state.lock();
        match bank {
            BankId::Bank1 => {
                let value = state.bank1[offset as usize];
                // Read-clear registers.
                if offset == bank1::CTRL_IT
                    || offset == bank1::CTRL_FIFO_DMA
                    || (offset == bank1::TEST_REG && self.model.has_test_register())
                {
                    state.bank1[offset as usize] = 0;
                }
                value
            }
            BankId::Bank2 => state.bank2[offset as usize],
        }
    }

    fn write_register(&self, bank: BankId, offset: u16, value: u32) {
        let mut state = self.state.lock();
        match bank {
            BankId::Bank1 => {
                if offset == bank1::COM_GENE && value & com_gene::SOFT_RESET != 0 {
                    Self::soft_reset(&mut state);
                    return;
                }
                state.bank1[offset as usize] = value;
            }
            BankId::Bank2 => state.bank2[offset as usize] = value,
        }
    }

    fn fifo_len(&self) -> usize {
        self.state.lock().fifo.len()
    }

    fn read_fifo_word(&self, index: usize) -> u32 {
        self.state.lock().fifo.get(index).copied().unwrap_or(0)
    }

    fn register_node(&self, name: &str) -> Result<NodeHandle> {
        if self.faulted(FaultPoint::RegisterNode) {
            return Err(Ct2Error::device(format!(
                "injected fault: register node {name}"
            )));
        }
        let mut state = self.state.lock();
        let token = state.next_token;
        state.next_token += 1;
        state.node = Some(token);
        state.events.push(BusEvent::NodeRegistered);
        Ok(NodeHandle(token))
    }

    fn unregister_node(&self, node: NodeHandle) {
        let mut state = self.state.lock();
        if state.node == Some(node.0) {
            state.node = None;
        }
        state.events.push(BusEvent::NodeUnregistered);
    }

    fn attach_interrupt_handler(&self, handler: InterruptHandler) -> Result<()> {
        if self.faulted(FaultPoint::AttachInterrupts) {
            return Err(Ct2Error::device("injected fault: attach interrupts"));
        }
        *self.handler.lock() = Some(handler);
        self.state.lock().events.push(BusEvent::InterruptsAttached);
        Ok(())
    }

    fn detach_interrupt_handler(&self) {
        *self.handler.lock() = None;
        self.state.lock().events.push(BusEvent::InterruptsDetached);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_it_reads_clear() {
        let sim = SimBus::new(CardModel::P201);
        sim.raise_interrupt(0x3);
        assert_eq!(sim.read_register(BankId::Bank1, bank1::CTRL_IT), 0x3);
        assert_eq!(sim.read_register(BankId::Bank1, bank1::CTRL_IT), 0);
    }

    #[test]
    fn soft_reset_clears_everything_but_status() {
        let sim = SimBus::new(CardModel::C208);
        sim.write_register(BankId::Bank2, 14, 0x5);
        sim.write_register(BankId::Bank1, bank1::SOFT_OUT, 0x3F);
        let ctrl = sim.peek_register(BankId::Bank1, bank1::CTRL_GENE);
        sim.write_register(BankId::Bank1, bank1::COM_GENE, com_gene::SOFT_RESET);
        assert_eq!(sim.peek_register(BankId::Bank2, 14), 0);
        assert_eq!(sim.peek_register(BankId::Bank1, bank1::SOFT_OUT), 0);
        assert_eq!(sim.peek_register(BankId::Bank1, bank1::CTRL_GENE), ctrl);
    }

    #[test]
    fn double_reservation_is_refused() {
        let sim = SimBus::new(CardModel::C208);
        let handle = sim.reserve_region(Bar::Bank1).unwrap();
        assert!(sim.reserve_region(Bar::Bank1).is_err());
        sim.release_region(handle);
        sim.reserve_region(Bar::Bank1).unwrap();
    }
}
