//! Run-length lookup tables over the register window.
//!
//! Register accessibility is uneven: reserved slots, model-specific
//! registers, and direction-specific registers punch holes into each
//! bank. Rather than consult the run tables on every transfer, each
//! (model, bank, direction) gets a 64-entry table where entry `o` holds
//! the number of consecutive accessible registers starting at `o`, or 0
//! if `o` itself is inaccessible.
//!
//! Tables are built once at registry construction and shared read-only
//! afterwards, so transfers touch them lock-free.

use ct2_card::regs::BANK_LEN;
use ct2_card::rwmap::{self, BankId, Direction, RegisterRun};
use ct2_card::CardModel;

use crate::config::Ct2Config;
use crate::error::{Ct2Error, Result};

/// Run-length table for one bank and direction.
#[derive(Debug, Clone)]
pub struct RegisterLut {
    entries: [u8; BANK_LEN as usize],
}

impl RegisterLut {
    fn from_runs(runs: &[RegisterRun], extra: Option<RegisterRun>) -> Self {
        let mut entries = [0u8; BANK_LEN as usize];
        for run in runs.iter().chain(extra.as_ref()) {
            for off in run.first..=run.last {
                entries[off as usize] = (run.last - off + 1) as u8;
            }
        }
        Self { entries }
    }

    /// Length of the accessible run starting at `offset`, 0 if the
    /// offset itself is inaccessible.
    #[must_use]
    pub fn run_len(&self, offset: u16) -> u16 {
        if offset < BANK_LEN {
            u16::from(self.entries[offset as usize])
        } else {
            0
        }
    }
}

/// The four tables of one model: bank × direction.
#[derive(Debug, Clone)]
pub struct LutSet {
    model: CardModel,
    bank1_read: RegisterLut,
    bank1_write: RegisterLut,
    bank2_read: RegisterLut,
    bank2_write: RegisterLut,
}

/// A transfer request validated and clamped against a LUT set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClampedTransfer {
    /// Bank the window offset landed in.
    pub bank: BankId,
    /// Offset within that bank, register units.
    pub bank_offset: u16,
    /// Transfer length after clamping to the accessible run.
    pub len: u16,
}

impl LutSet {
    /// Build the tables for `model` under `config`.
    #[must_use]
    pub fn new(model: CardModel, config: &Ct2Config) -> Self {
        let test_reg = (model.has_test_register() && config.enable_test_register)
            .then_some(rwmap::P201_TEST_REG_RUN);
        Self {
            model,
            bank1_read: RegisterLut::from_runs(
                rwmap::register_runs(model, BankId::Bank1, Direction::Read),
                test_reg,
            ),
            bank1_write: RegisterLut::from_runs(
                rwmap::register_runs(model, BankId::Bank1, Direction::Write),
                test_reg,
            ),
            bank2_read: RegisterLut::from_runs(
                rwmap::register_runs(model, BankId::Bank2, Direction::Read),
                None,
            ),
            bank2_write: RegisterLut::from_runs(
                rwmap::register_runs(model, BankId::Bank2, Direction::Write),
                None,
            ),
        }
    }

    /// Model these tables were built for.
    #[must_use]
    pub const fn model(&self) -> CardModel {
        self.model
    }

    /// Table for a bank and direction.
    #[must_use]
    pub fn lut(&self, bank: BankId, direction: Direction) -> &RegisterLut {
        match (bank, direction) {
            (BankId::Bank1, Direction::Read) => &self.bank1_read,
            (BankId::Bank1, Direction::Write) => &self.bank1_write,
            (BankId::Bank2, Direction::Read) => &self.bank2_read,
            (BankId::Bank2, Direction::Write) => &self.bank2_write,
        }
    }

    /// Validate a window-relative transfer and clamp its length.
    ///
    /// `offset` and `count` are in register units over the normalized
    /// window. Fails if the offset lies outside the window or on an
    /// inaccessible register; a `count` longer than the accessible run
    /// is clamped, never refused.
    pub fn clamp(&self, offset: u16, count: usize, direction: Direction) -> Result<ClampedTransfer> {
        let (bank, bank_offset) = rwmap::split_offset(offset).ok_or_else(|| {
            Ct2Error::invalid_argument(format!(
                "register offset {offset} outside the {}-register window",
                rwmap::WINDOW_LEN
            ))
        })?;
        let run = self.lut(bank, direction).run_len(bank_offset);
        if run == 0 {
            return Err(Ct2Error::invalid_argument(format!(
                "register offset {offset} is not {} on the {}",
                match direction {
                    Direction::Read => "readable",
                    Direction::Write => "writable",
                },
                self.model.name()
            )));
        }
        if count == 0 {
            return Err(Ct2Error::invalid_argument("zero-length register transfer"));
        }
        let len = run.min(u16::try_from(count).unwrap_or(u16::MAX));
        Ok(ClampedTransfer {
            bank,
            bank_offset,
            len,
        })
    }

    /// Whether the clamped range contains a register whose read changes
    /// device state.
    #[must_use]
    pub fn read_touches_sensitive(&self, transfer: &ClampedTransfer) -> bool {
        if transfer.bank != BankId::Bank1 {
            return false;
        }
        let end = transfer.bank_offset + transfer.len - 1;
        rwmap::read_sensitive_bank1_offsets()
            .iter()
            .any(|&off| off >= transfer.bank_offset && off <= end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ct2_card::regs::bank1;

    fn luts(model: CardModel) -> LutSet {
        LutSet::new(model, &Ct2Config::default())
    }

    #[test]
    fn run_lengths_count_down_to_the_run_end() {
        let set = luts(CardModel::C208);
        let rd = set.lut(BankId::Bank1, Direction::Read);
        // C208 bank 1 read run 0..=11.
        assert_eq!(rd.run_len(0), 12);
        assert_eq!(rd.run_len(11), 1);
        assert_eq!(rd.run_len(12), 0);
        assert_eq!(rd.run_len(15), 0);
        assert_eq!(rd.run_len(16), 24);
    }

    #[test]
    fn reserved_offsets_are_invalid() {
        let set = luts(CardModel::C208);
        let err = set.clamp(41 + 64, 1, Direction::Write).unwrap_err();
        assert!(matches!(err, Ct2Error::InvalidArgument { .. }));
        // Offsets past the window are invalid regardless of direction.
        assert!(set.clamp(128, 1, Direction::Read).is_err());
        assert!(set.clamp(200, 4, Direction::Write).is_err());
    }

    #[test]
    fn oversized_counts_clamp_to_the_run() {
        let set = luts(CardModel::P201);
        // P201 bank 2 write run 7..=40, window offset 64 + 30.
        let t = set.clamp(94, 1000, Direction::Write).unwrap();
        assert_eq!(t.bank, BankId::Bank2);
        assert_eq!(t.bank_offset, 30);
        assert_eq!(t.len, 11);
        // Counts inside the run pass through unchanged.
        let t = set.clamp(94, 3, Direction::Write).unwrap();
        assert_eq!(t.len, 3);
    }

    #[test]
    fn test_register_is_config_gated() {
        let closed = luts(CardModel::P201);
        assert!(closed.clamp(63, 1, Direction::Read).is_err());
        assert!(closed.clamp(63, 1, Direction::Write).is_err());

        let open = LutSet::new(
            CardModel::P201,
            &Ct2Config {
                enable_test_register: true,
                ..Ct2Config::default()
            },
        );
        assert_eq!(open.clamp(63, 1, Direction::Read).unwrap().len, 1);
        assert_eq!(open.clamp(63, 5, Direction::Write).unwrap().len, 1);

        // The C208 has no test register to expose.
        let c208 = LutSet::new(
            CardModel::C208,
            &Ct2Config {
                enable_test_register: true,
                ..Ct2Config::default()
            },
        );
        assert!(c208.clamp(63, 1, Direction::Read).is_err());
    }

    #[test]
    fn sensitive_read_detection_covers_fifo_status() {
        let set = luts(CardModel::C208);
        let over = set.clamp(bank1::CMD_DMA, 2, Direction::Read).unwrap();
        assert!(set.read_touches_sensitive(&over));
        let before = set.clamp(bank1::CMD_DMA, 1, Direction::Read).unwrap();
        assert!(!set.read_touches_sensitive(&before));
        // Plain status reads are never sensitive.
        let status = set.clamp(1, 1, Direction::Read).unwrap();
        assert!(!set.read_touches_sensitive(&status));
    }
}
