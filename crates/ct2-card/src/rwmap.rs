//! The normalized register window presented to card users.
//!
//! The two I/O banks are exposed back to back as a single flat window of
//! 32-bit registers: bank 1 at word offsets 0-63, bank 2 at 64-127.
//! Offsets, counts, and seek positions are all in register units.
//!
//! Not every register in a bank is reachable: reserved slots, the other
//! model's registers, and `CTRL_IT` (owned by the interrupt pipeline)
//! are carved out. The reachable set is described per model, bank, and
//! direction as inclusive runs of consecutive offsets.

use crate::pci::CardModel;

/// Word offset of bank 1 within the window.
pub const BANK1_OFF: u16 = 0;
/// Word offset of bank 2 within the window.
pub const BANK2_OFF: u16 = 64;
/// Total window length in registers.
pub const WINDOW_LEN: u16 = 128;
/// Size of one register in bytes.
pub const REG_SIZE: usize = 4;

/// One of the two register banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BankId {
    /// Runtime control and status (BAR 1).
    Bank1,
    /// Counter and channel configuration (BAR 2).
    Bank2,
}

/// Transfer direction through the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host reads from the card.
    Read,
    /// Host writes to the card.
    Write,
}

/// An inclusive run of consecutive accessible register offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRun {
    /// First accessible offset of the run.
    pub first: u16,
    /// Last accessible offset of the run.
    pub last: u16,
}

const fn run(first: u16, last: u16) -> RegisterRun {
    RegisterRun { first, last }
}

const C208_BANK1_READ: &[RegisterRun] = &[run(0, 11), run(16, 39)];
const C208_BANK1_WRITE: &[RegisterRun] = &[run(0, 0), run(3, 5), run(8, 8), run(10, 11)];
const C208_BANK2_READ: &[RegisterRun] = &[run(0, 25), run(29, 40)];
const C208_BANK2_WRITE: &[RegisterRun] = &[run(0, 40)];

const P201_BANK1_READ: &[RegisterRun] = &[run(0, 1), run(3, 11), run(13, 13), run(16, 39)];
const P201_BANK1_WRITE: &[RegisterRun] =
    &[run(0, 0), run(3, 5), run(8, 8), run(10, 11), run(13, 13)];
const P201_BANK2_READ: &[RegisterRun] = &[run(0, 1), run(4, 4), run(7, 25), run(29, 40)];
const P201_BANK2_WRITE: &[RegisterRun] = &[run(0, 1), run(4, 4), run(7, 40)];

/// Run of the P201 manufacturing test register, appended to the bank 1
/// runs in either direction when the configuration enables it.
pub const P201_TEST_REG_RUN: RegisterRun = run(63, 63);

/// Accessible register runs for a model, bank, and direction.
///
/// The returned runs are sorted and non-overlapping. The P201 test
/// register is not included; callers that enable it append
/// [`P201_TEST_REG_RUN`] to the bank 1 runs themselves.
#[must_use]
pub const fn register_runs(
    model: CardModel,
    bank: BankId,
    direction: Direction,
) -> &'static [RegisterRun] {
    match (model, bank, direction) {
        (CardModel::C208, BankId::Bank1, Direction::Read) => C208_BANK1_READ,
        (CardModel::C208, BankId::Bank1, Direction::Write) => C208_BANK1_WRITE,
        (CardModel::C208, BankId::Bank2, Direction::Read) => C208_BANK2_READ,
        (CardModel::C208, BankId::Bank2, Direction::Write) => C208_BANK2_WRITE,
        (CardModel::P201, BankId::Bank1, Direction::Read) => P201_BANK1_READ,
        (CardModel::P201, BankId::Bank1, Direction::Write) => P201_BANK1_WRITE,
        (CardModel::P201, BankId::Bank2, Direction::Read) => P201_BANK2_READ,
        (CardModel::P201, BankId::Bank2, Direction::Write) => P201_BANK2_WRITE,
    }
}

/// Bank 1 offsets whose *read* changes device state.
///
/// `TEST_REG` only matters when the configuration exposes it; `CTRL_IT`
/// never appears here because it is not reachable through the window at
/// all.
#[must_use]
pub const fn read_sensitive_bank1_offsets() -> &'static [u16] {
    &[crate::regs::bank1::CTRL_FIFO_DMA, crate::regs::bank1::TEST_REG]
}

/// Split a window offset into its bank and in-bank offset.
///
/// Returns `None` for offsets at or past [`WINDOW_LEN`].
#[must_use]
pub const fn split_offset(offset: u16) -> Option<(BankId, u16)> {
    if offset < BANK2_OFF {
        Some((BankId::Bank1, offset))
    } else if offset < WINDOW_LEN {
        Some((BankId::Bank2, offset - BANK2_OFF))
    } else {
        None
    }
}
