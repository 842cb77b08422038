//! Bus abstraction for CT2 cards.
//!
//! `CardBus` is the seam between the access core and whatever owns the
//! physical card: a kernel helper, a VFIO group, or the in-memory
//! simulator. Bus enumeration and PCI resource ownership live behind
//! this trait; the core only sequences the operations.

use std::fmt::Debug;
use std::sync::Arc;

use ct2_card::rwmap::BankId;
use ct2_card::Bar;

use crate::error::Result;

/// Token for a reserved BAR region; returned to the bus on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct RegionHandle {
    bar: Bar,
    token: u32,
}

impl RegionHandle {
    /// Create a handle; only bus implementations mint these.
    pub const fn new(bar: Bar, token: u32) -> Self {
        Self { bar, token }
    }

    /// BAR the reservation covers.
    pub const fn bar(&self) -> Bar {
        self.bar
    }

    /// Bus-private reservation token.
    pub const fn token(&self) -> u32 {
        self.token
    }
}

/// Token for a registered character-access node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct NodeHandle(pub u32);

/// What the capture handler made of an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The card raised it and a notification was latched.
    Handled,
    /// Not this card's interrupt (shared line).
    NotMine,
}

/// Interrupt capture callback.
///
/// Invoked by the bus in interrupt context with the bus itself, so the
/// handler can read the interrupt source register without holding its
/// own reference to the bus. Must not block or allocate.
pub type InterruptHandler = Arc<dyn Fn(&dyn CardBus) -> CaptureOutcome + Send + Sync>;

/// Interface a CT2 card presents to the access core.
///
/// Register accessors are non-blocking and unsynchronized; the core
/// serializes them under its fast lock.
pub trait CardBus: Debug + Send + Sync {
    /// PCI device ID of the card behind this bus.
    fn device_id(&self) -> u16;

    /// Bus address for identification and logs (e.g. `0000:03:0d.0`).
    fn address(&self) -> &str;

    /// Power up and enable the PCI function.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses to enable the device.
    fn enable(&self) -> Result<()>;

    /// Disable the PCI function. Infallible by contract; called during
    /// teardown when errors have nowhere to go.
    fn disable(&self);

    /// Reserve one BAR for exclusive use by the core.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is claimed elsewhere or too small.
    fn reserve_region(&self, bar: Bar) -> Result<RegionHandle>;

    /// Return a reservation.
    fn release_region(&self, region: RegionHandle);

    /// Load the FPGA configuration image into the card.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be transferred or the FPGA
    /// does not come up.
    fn load_firmware(&self) -> Result<()>;

    /// Read one register. Non-blocking; may have device-defined side
    /// effects (`CTRL_IT` and `CTRL_FIFO_DMA` are read-clear).
    fn read_register(&self, bank: BankId, offset: u16) -> u32;

    /// Write one register. Non-blocking.
    fn write_register(&self, bank: BankId, offset: u16, value: u32);

    /// FIFO window length in 32-bit words.
    fn fifo_len(&self) -> usize;

    /// Read one FIFO word. Non-blocking. `index` is below
    /// [`fifo_len`](Self::fifo_len).
    fn read_fifo_word(&self, index: usize) -> u32;

    /// Register the character-access node under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the node namespace rejects the registration.
    fn register_node(&self, name: &str) -> Result<NodeHandle>;

    /// Remove a registered node.
    fn unregister_node(&self, node: NodeHandle);

    /// Install the interrupt capture handler and unmask the line.
    ///
    /// # Errors
    ///
    /// Returns an error if the interrupt line cannot be claimed.
    fn attach_interrupt_handler(&self, handler: InterruptHandler) -> Result<()>;

    /// Mask the line and remove the handler. No capture runs after this
    /// returns.
    fn detach_interrupt_handler(&self);
}
