//! Silicon model for the ESRF CT2 counter/timer cards (C208, P201).
//!
//! This crate has **no dependencies** and **no hardware access** — it is a
//! pure model of the cards: PCI identity, BAR layout, register maps, bit
//! definitions, and the per-model tables of reachable registers.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`pci`] | Vendor/device IDs, BAR roles, `CardModel` |
//! | [`regs`] | Bank 1/2 register offsets and bit definitions |
//! | [`rwmap`] | The normalized 128-register window and access-run tables |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod pci;
pub mod regs;
pub mod rwmap;

pub use pci::{Bar, CardModel};
pub use rwmap::{BankId, Direction, RegisterRun};
