//! Userspace access core for the ESRF CT2 counter/timer cards.
//!
//! The crate sequences everything between a PCI bus slot and a consumer
//! holding register data: staged bring-up with exact-reverse teardown,
//! per-open sessions, exclusive-access arbitration, LUT-checked register
//! I/O over a normalized 128-register window, FIFO drains and read-only
//! FIFO mappings, and a two-stage interrupt pipeline with per-session
//! coalescing notification records.
//!
//! # Quick start
//!
//! ```
//! use ct2_driver::{Ct2Config, DeviceRegistry, SimBus};
//! use ct2_card::CardModel;
//!
//! # fn main() -> ct2_driver::Result<()> {
//! let registry = DeviceRegistry::new(Ct2Config::default());
//! let device = registry.probe(SimBus::new(CardModel::P201))?;
//!
//! let session = device.open()?;
//! session.request_exclusive()?;
//! let status = session.read_at(1, 1)?;
//! println!("CTRL_GENE = {:#010x}", status[0]);
//! session.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! Real hardware enters through the [`bus::CardBus`] seam; [`SimBus`]
//! is the in-memory card used by tests and the CLI self-test.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod bus;
mod config;
mod device;
pub mod discovery;
mod error;
mod irq;
mod lut;
mod registry;
mod session;
pub mod sim;
pub mod sync;

/// Card identification constants (re-exported from ct2-card).
pub mod pci_ids {
    pub use ct2_card::pci::device_id;
    pub use ct2_card::pci::{lspci_filter, CardModel, ALL_DEVICE_IDS, CT2_VENDOR_ID};
}

pub use config::{Ct2Config, DEFAULT_NOTIFICATION_CAPACITY};
pub use device::Device;
pub use discovery::{discover, DiscoveredCard};
pub use error::{Ct2Error, Result};
pub use irq::{Notification, Readiness, WaitOutcome};
pub use lut::{ClampedTransfer, LutSet, RegisterLut};
pub use registry::DeviceRegistry;
pub use session::{FifoMapping, MapProtection, QueueCommand, Session};
pub use sim::{BusEvent, FaultPoint, SimBus};
pub use sync::CancelToken;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Ct2Config, Ct2Error, Device, DeviceRegistry, MapProtection, Notification, QueueCommand,
        Result, Session, SimBus, WaitOutcome,
    };
}
