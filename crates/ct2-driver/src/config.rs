//! Driver configuration.
//!
//! Userspace analog of the kernel module parameters: fixed at registry
//! construction, consulted by LUT construction and interrupt enable.

/// Default capacity selected when interrupt enable is asked for
/// capacity 0.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 32;

/// Driver-wide configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ct2Config {
    /// Capacity used when [`enable_interrupts`] is called with 0.
    ///
    /// [`enable_interrupts`]: crate::device::Device::enable_interrupts
    pub notification_capacity: usize,
    /// Expose the P201 manufacturing test register through session I/O.
    ///
    /// Off by default: reading the register perturbs the card, so it is
    /// opt-in for manufacturing checks only.
    pub enable_test_register: bool,
}

impl Default for Ct2Config {
    fn default() -> Self {
        Self {
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            enable_test_register: false,
        }
    }
}
