//! Register maps and bit-level constants of the CT2 cards.
//!
//! All offsets are in 32-bit register units within a 64-register bank.
//! Bank 1 (BAR 1) holds runtime control and status; bank 2 (BAR 2) holds
//! counter and channel configuration. Registers marked read-clear change
//! device state when read and are treated like writes by access control.

/// Number of registers per bank.
pub const BANK_LEN: u16 = 64;

/// Number of counters on either model.
pub const NUM_COUNTERS: u16 = 12;

/// Bank 1 — runtime control and status.
pub mod bank1 {
    /// General command register.
    pub const COM_GENE: u16 = 0;
    /// General status (power rails, PLL, temperature alerts, serial).
    pub const CTRL_GENE: u16 = 1;
    /// Virtex and regulator temperatures (C208 only).
    pub const TEMPS: u16 = 2;
    /// Output channel level.
    pub const NIVEAU_OUT: u16 = 3;
    /// 50 Ω input adaptation.
    pub const ADAPT_50: u16 = 4;
    /// Software-driven output levels.
    pub const SOFT_OUT: u16 = 5;
    /// Input/output channel readback.
    pub const RD_IN_OUT: u16 = 6;
    /// Counter enable/run readback.
    pub const RD_CTRL_CMPT: u16 = 7;
    /// DMA command register.
    pub const CMD_DMA: u16 = 8;
    /// FIFO/DMA status; reading clears the error flags (read-clear).
    pub const CTRL_FIFO_DMA: u16 = 9;
    /// Interrupt source selection, channels and counters 1-6.
    pub const SOURCE_IT_A: u16 = 10;
    /// Interrupt source selection, counters 7-12 and DMA/FIFO/error.
    pub const SOURCE_IT_B: u16 = 11;
    /// Latched interrupt sources; reading clears them (read-clear).
    ///
    /// Reserved to the interrupt capture stage. Never reachable through
    /// session register I/O on either model.
    pub const CTRL_IT: u16 = 12;
    /// Input channel level (P201 only).
    pub const NIVEAU_IN: u16 = 13;
    /// Counter current values, 12 consecutive registers.
    pub const RD_CMPT_BASE: u16 = 16;
    /// Counter latch values, 12 consecutive registers.
    pub const RD_LATCH_CMPT_BASE: u16 = 28;
    /// Manufacturing test register (P201 only, read-clear, config-gated).
    pub const TEST_REG: u16 = 63;
}

/// Bank 2 — counter and channel configuration.
pub mod bank2 {
    /// Input filter configuration, channels 1-6.
    pub const SEL_FILTRE_INPUT_A: u16 = 0;
    /// Input filter configuration, remaining channels.
    pub const SEL_FILTRE_INPUT_B: u16 = 1;
    /// Output filter configuration base (C208: three registers at 2-4).
    pub const C208_SEL_FILTRE_OUTPUT_BASE: u16 = 2;
    /// Output filter configuration (P201: single register).
    pub const P201_SEL_FILTRE_OUTPUT: u16 = 4;
    /// Output source selection base (C208: three registers at 5-7).
    pub const C208_SEL_SOURCE_OUTPUT_BASE: u16 = 5;
    /// Output source selection (P201: single register).
    pub const P201_SEL_SOURCE_OUTPUT: u16 = 7;
    /// Latch source selection, 6 consecutive registers.
    pub const SEL_LATCH_BASE: u16 = 8;
    /// Counter configuration, 12 consecutive registers.
    pub const CONF_CMPT_BASE: u16 = 14;
    /// Software counter enable/disable (write-only).
    pub const SOFT_ENABLE_DISABLE: u16 = 26;
    /// Software counter start/stop (write-only).
    pub const SOFT_START_STOP: u16 = 27;
    /// Software counter latch trigger (write-only).
    pub const SOFT_LATCH: u16 = 28;
    /// Counter comparator values, 12 consecutive registers.
    pub const COMPARE_CMPT_BASE: u16 = 29;
}

/// `COM_GENE` bits.
pub mod com_gene {
    /// Software reset of the whole card.
    pub const SOFT_RESET: u32 = 0x80;
    /// Enable the on-board oscillator.
    pub const ENAB_OSC: u32 = 0x10;
}

/// `CTRL_GENE` bits and fields.
pub mod ctrl_gene {
    /// Internal PLL locked.
    pub const PLL_OK: u32 = 0x0000_0010;
    /// Temperature alert (must read 0 on a healthy card).
    pub const TEMP_ALERT: u32 = 0x0000_0020;
    /// Overtemperature shutdown latched (must read 0).
    pub const TEMP_OVERT: u32 = 0x0000_0040;
    /// 3.3 V rail good.
    pub const V_3_3_OK: u32 = 0x0400_0000;
    /// 2.5 V rail good.
    pub const V_2_5_OK: u32 = 0x0800_0000;
    /// 1.8 V rail good.
    pub const V_1_8_OK: u32 = 0x1000_0000;
    /// 5 V rail good.
    pub const V_5_OK: u32 = 0x2000_0000;
    /// ±12 V rails good.
    pub const V_12_OK: u32 = 0x4000_0000;

    /// All power-good and PLL bits a healthy C208 must assert.
    pub const C208_HEALTHY: u32 = V_3_3_OK | V_2_5_OK | V_1_8_OK | V_5_OK | V_12_OK | PLL_OK;

    /// Extract the card serial number.
    #[must_use]
    pub const fn card_serial(value: u32) -> u32 {
        (value & 0x0000_FF00) >> 8
    }

    /// Extract the mezzanine serial number (C208 only).
    #[must_use]
    pub const fn mezzanine_serial(value: u32) -> u32 {
        (value & 0x00FF_0000) >> 16
    }
}

/// `TEMPS` fields (C208 only).
pub mod temps {
    /// Virtex FPGA die temperature, °C.
    #[must_use]
    pub const fn virtex(value: u32) -> u32 {
        value & 0x7F
    }

    /// Voltage regulator temperature, °C.
    #[must_use]
    pub const fn regulator(value: u32) -> u32 {
        (value & 0x7F00) >> 8
    }
}

/// `ADAPT_50` full masks (one bit per input channel).
pub mod adapt_50 {
    /// C208: 12 input lines.
    pub const C208_ALL: u32 = 0x0FFF;
    /// P201: 10 input lines.
    pub const P201_ALL: u32 = 0x03FF;
}

/// Input filter configuration layout (`SEL_FILTRE_INPUT_*`).
pub mod filtre_input {
    /// Bits per channel field.
    pub const CHANNEL_WIDTH: u32 = 5;
    /// Offset of the filter-mode subfield within a channel field.
    pub const MODE_SHIFT: u32 = 3;
    /// Filter mode: synchronised to the reference clock.
    pub const MODE_SYNC: u32 = 0x1;

    /// Value programming every one of `channels` fields to sync mode.
    #[must_use]
    pub const fn all_sync(channels: u32) -> u32 {
        let mut value = 0;
        let mut ch = 0;
        while ch < channels {
            value |= (MODE_SYNC << MODE_SHIFT) << (ch * CHANNEL_WIDTH);
            ch += 1;
        }
        value
    }
}

/// Output source selection full masks.
pub mod source_output {
    /// C208: four channel fields per register.
    pub const C208_ALL: u32 = 0x7F7F_7F7F;
    /// P201: two channel fields in the single register.
    pub const P201_ALL: u32 = 0x0000_7F7F;
}

/// `CONF_CMPT` clock source field values.
pub mod conf_cmpt {
    /// Count the internal 100 MHz reference.
    pub const CLK_100_MHZ: u32 = 0x5;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_blocks_do_not_overlap() {
        assert!(bank1::RD_CMPT_BASE + NUM_COUNTERS <= bank1::RD_LATCH_CMPT_BASE);
        assert!(bank1::RD_LATCH_CMPT_BASE + NUM_COUNTERS <= bank1::TEST_REG);
        assert!(bank2::CONF_CMPT_BASE + NUM_COUNTERS <= bank2::SOFT_ENABLE_DISABLE);
        assert!(bank2::COMPARE_CMPT_BASE + NUM_COUNTERS <= BANK_LEN);
    }

    #[test]
    fn sync_filter_value_sets_mode_bit_of_every_field() {
        // 5-bit channel fields, mode subfield at bit 3 of each.
        let mut expected = 0;
        for ch in 0..6 {
            expected |= 0x8u32 << (ch * 5);
        }
        assert_eq!(filtre_input::all_sync(6), expected);
        assert_eq!(filtre_input::all_sync(4).count_ones(), 4);
    }

    #[test]
    fn serial_fields_extract_expected_bytes() {
        assert_eq!(ctrl_gene::card_serial(0x0012_3400), 0x34);
        assert_eq!(ctrl_gene::mezzanine_serial(0x0012_3400), 0x12);
        assert_eq!(temps::virtex(0x2A3B), 0x3B);
        assert_eq!(temps::regulator(0x2A3B), 0x2A);
    }
}
