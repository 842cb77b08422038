//! Runtime card discovery.
//!
//! Scans PCI sysfs for CT2 cards. Discovery only reports what sits on
//! the bus; bringing a card up still needs a [`CardBus`] implementation
//! that owns its resources.
//!
//! [`CardBus`]: crate::bus::CardBus

use std::path::Path;

use ct2_card::pci::{ALL_DEVICE_IDS, CT2_VENDOR_ID};
use ct2_card::CardModel;

use crate::error::{Ct2Error, Result};

/// A CT2 card found on the PCI bus.
#[derive(Debug, Clone)]
pub struct DiscoveredCard {
    /// PCI bus address (`0000:03:0d.0`, etc.).
    pub address: String,
    /// Which card flavour sits there.
    pub model: CardModel,
}

/// Scan `/sys/bus/pci/devices` for CT2 cards, sorted by address.
///
/// # Errors
///
/// Returns [`Ct2Error::NoDevicesFound`] when the scan finishes without
/// a match, and an I/O error when sysfs itself is unreadable.
pub fn discover() -> Result<Vec<DiscoveredCard>> {
    discover_in(Path::new("/sys/bus/pci/devices"))
}

fn discover_in(root: &Path) -> Result<Vec<DiscoveredCard>> {
    tracing::debug!(root = %root.display(), "scanning for CT2 cards");
    let entries = std::fs::read_dir(root)?;

    let mut cards = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(vendor) = read_hex_sysfs(&path.join("vendor")) else {
            continue;
        };
        let Some(device) = read_hex_sysfs(&path.join("device")) else {
            continue;
        };
        if vendor != CT2_VENDOR_ID || !ALL_DEVICE_IDS.contains(&device) {
            continue;
        }
        let Some(model) = CardModel::from_device_id(device) else {
            continue;
        };
        let address = entry.file_name().to_string_lossy().to_string();
        tracing::info!(address = %address, model = model.name(), "found CT2 card");
        cards.push(DiscoveredCard { address, model });
    }

    if cards.is_empty() {
        return Err(Ct2Error::NoDevicesFound);
    }
    cards.sort_by(|a, b| a.address.cmp(&b.address));
    Ok(cards)
}

fn read_hex_sysfs(path: &Path) -> Option<u16> {
    let content = std::fs::read_to_string(path).ok()?;
    u16::from_str_radix(content.trim().trim_start_matches("0x"), 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scan_picks_out_ct2_cards_by_id() {
        let root = std::env::temp_dir().join(format!("ct2-scan-{}", std::process::id()));
        let make = |addr: &str, vendor: &str, device: &str| {
            let dir = root.join(addr);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("vendor"), vendor).unwrap();
            fs::write(dir.join("device"), device).unwrap();
        };
        make("0000:03:0d.0", "0x10e8", "0xee12");
        make("0000:01:00.0", "0x8086", "0x1234");
        make("0000:02:0a.0", "0x10e8", "0xee10");

        let cards = discover_in(&root).unwrap();
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].address, "0000:02:0a.0");
        assert_eq!(cards[0].model, CardModel::C208);
        assert_eq!(cards[1].model, CardModel::P201);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn real_bus_scan() {
        // Hardware-dependent; just exercise the path.
        match discover() {
            Ok(cards) => println!("found {} CT2 card(s)", cards.len()),
            Err(Ct2Error::NoDevicesFound) => println!("no CT2 cards (expected off-beamline)"),
            Err(e) => println!("scan error: {e}"),
        }
    }
}
