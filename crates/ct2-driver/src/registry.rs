//! Process-wide device registry.
//!
//! There is deliberately no global: the registry is created explicitly
//! and handed to whoever probes cards, so tests and embedders can run
//! several isolated registries side by side.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ct2_card::CardModel;
use tracing::info;

use crate::bus::CardBus;
use crate::config::Ct2Config;
use crate::device::Device;
use crate::error::Result;
use crate::lut::LutSet;
use crate::sync::BlockingLock;

/// Registry of brought-up devices plus the driver-wide configuration.
#[derive(Debug)]
pub struct DeviceRegistry {
    config: Ct2Config,
    c208_luts: Arc<LutSet>,
    p201_luts: Arc<LutSet>,
    devices: BlockingLock<Vec<Arc<Device>>>,
    next_index: AtomicU32,
}

impl DeviceRegistry {
    /// Create a registry; the register LUTs are built here, once.
    #[must_use]
    pub fn new(config: Ct2Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            c208_luts: Arc::new(LutSet::new(CardModel::C208, &config)),
            p201_luts: Arc::new(LutSet::new(CardModel::P201, &config)),
            devices: BlockingLock::new(Vec::new()),
            next_index: AtomicU32::new(0),
        })
    }

    /// Configuration this registry was created with.
    #[must_use]
    pub fn config(&self) -> &Ct2Config {
        &self.config
    }

    pub(crate) fn lut_set(&self, model: CardModel) -> Arc<LutSet> {
        match model {
            CardModel::C208 => Arc::clone(&self.c208_luts),
            CardModel::P201 => Arc::clone(&self.p201_luts),
        }
    }

    pub(crate) fn next_name(&self, model: CardModel) -> String {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        format!("{}.{index}", model.name().to_lowercase())
    }

    /// Bring up the card behind `bus` and publish it.
    pub fn probe(self: &Arc<Self>, bus: Arc<dyn CardBus>) -> Result<Arc<Device>> {
        let device = Device::bring_up(self, bus)?;
        self.devices.lock_uncancellable().push(Arc::clone(&device));
        info!(device = device.name(), "device published");
        Ok(device)
    }

    /// Snapshot of the published devices.
    #[must_use]
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.lock_uncancellable().clone()
    }

    /// Shut a device down and unpublish it.
    pub fn remove(&self, device: &Arc<Device>) {
        device.shutdown();
    }

    pub(crate) fn unpublish(&self, device: &Device) {
        let mut devices = self.devices.lock_uncancellable();
        devices.retain(|published| !std::ptr::eq(published.as_ref(), device));
    }
}
