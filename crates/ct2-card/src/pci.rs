//! PCI identity of the CT2 card family.
//!
//! Both cards sit behind an AMCC S5933 bridge, so they share the AMCC
//! vendor ID rather than carrying an ESRF one.

/// AMCC vendor ID (PCI-SIG assigned), shared by every CT2 card.
pub const CT2_VENDOR_ID: u16 = 0x10E8;

/// Device IDs for the CT2 family.
pub mod device_id {
    /// C208 — CompactPCI form factor (`lspci: 10e8:ee10`).
    pub const C208: u16 = 0xEE10;
    /// P201 — PCI form factor (`lspci: 10e8:ee12`).
    pub const P201: u16 = 0xEE12;
}

/// All known CT2 device IDs.
pub const ALL_DEVICE_IDS: &[u16] = &[device_id::C208, device_id::P201];

/// Base address registers of a CT2 card.
///
/// | BAR | Contents                          | Kind      |
/// |-----|-----------------------------------|-----------|
/// | 0   | AMCC bridge operation registers   | I/O ports |
/// | 1   | register bank 1 (control/status)  | I/O ports |
/// | 2   | register bank 2 (configuration)   | I/O ports |
/// | 3   | scaler FIFO                       | memory    |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Bar {
    /// AMCC bridge operation registers.
    BridgeControl = 0,
    /// Register bank 1: runtime control and status.
    Bank1 = 1,
    /// Register bank 2: counter and channel configuration.
    Bank2 = 2,
    /// Scaler FIFO, the only memory-space BAR.
    Fifo = 3,
}

impl Bar {
    /// BAR index as reported by PCI config space.
    #[must_use]
    pub const fn index(self) -> u8 {
        self as u8
    }
}

/// Format a `vendor:device` string for use with `lspci -d`.
#[must_use]
pub fn lspci_filter(id: u16) -> String {
    format!("{CT2_VENDOR_ID:04x}:{id:04x}")
}

/// Card flavour discovered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardModel {
    /// C208 — 12 counters, 12 channels usable in and out, telemetry
    /// mezzanine.
    C208,
    /// P201 — 12 counters, 10 inputs of which the last 2 can drive out,
    /// optional test register.
    P201,
}

impl CardModel {
    /// Identify the model from a PCI device ID.
    #[must_use]
    pub const fn from_device_id(id: u16) -> Option<Self> {
        match id {
            device_id::C208 => Some(Self::C208),
            device_id::P201 => Some(Self::P201),
            _ => None,
        }
    }

    /// PCI device ID of this model.
    #[must_use]
    pub const fn device_id(self) -> u16 {
        match self {
            Self::C208 => device_id::C208,
            Self::P201 => device_id::P201,
        }
    }

    /// Human-readable model name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::C208 => "C208",
            Self::P201 => "P201",
        }
    }

    /// Mask of interrupt source bits the model can actually raise.
    ///
    /// Anything read from `CTRL_IT` outside this mask is noise and must
    /// be discarded before notification.
    #[must_use]
    pub const fn interrupt_mask(self) -> u32 {
        match self {
            Self::C208 => 0x0EFF_FFFF,
            Self::P201 => 0x0EFF_F3FF,
        }
    }

    /// Number of input channels.
    #[must_use]
    pub const fn input_channels(self) -> u8 {
        match self {
            Self::C208 => 12,
            Self::P201 => 10,
        }
    }

    /// Number of output channels. On the P201 only channels 9 and 10
    /// can drive out.
    #[must_use]
    pub const fn output_channels(self) -> u8 {
        match self {
            Self::C208 => 12,
            Self::P201 => 2,
        }
    }

    /// Whether the model carries the manufacturing test register.
    #[must_use]
    pub const fn has_test_register(self) -> bool {
        matches!(self, Self::P201)
    }

    /// Whether the model reports voltage/temperature telemetry.
    #[must_use]
    pub const fn has_telemetry(self) -> bool {
        matches!(self, Self::C208)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_resolution_round_trips() {
        for &id in ALL_DEVICE_IDS {
            let model = CardModel::from_device_id(id).unwrap();
            assert_eq!(model.device_id(), id);
        }
        assert_eq!(CardModel::from_device_id(0xBEEF), None);
    }

    #[test]
    fn lspci_filter_formats_both_models() {
        assert_eq!(lspci_filter(device_id::C208), "10e8:ee10");
        assert_eq!(lspci_filter(device_id::P201), "10e8:ee12");
    }

    #[test]
    fn interrupt_masks_differ_only_in_input_bits() {
        let c208 = CardModel::C208.interrupt_mask();
        let p201 = CardModel::P201.interrupt_mask();
        assert_eq!(c208 & !p201, 0x0C00);
    }

    #[test]
    fn channel_counts_match_the_register_masks() {
        use crate::regs::adapt_50;

        // One 50 Ω adaptation bit per input line.
        assert_eq!(
            u32::from(CardModel::C208.input_channels()),
            adapt_50::C208_ALL.count_ones()
        );
        assert_eq!(
            u32::from(CardModel::P201.input_channels()),
            adapt_50::P201_ALL.count_ones()
        );
        // Every C208 channel drives out; the P201 only channels 9-10.
        assert_eq!(CardModel::C208.output_channels(), 12);
        assert_eq!(CardModel::P201.output_channels(), 2);
    }
}
