//! The two-stage interrupt pipeline.
//!
//! Stage one, **capture**, runs in the bus's interrupt context: it reads
//! the read-clear `CTRL_IT` register under the register fast lock, masks
//! it with the model's interrupt mask, and folds the result into a
//! single-slot coalescing latch. It never blocks and never allocates.
//!
//! Stage two, **distribution**, is a dedicated worker thread: it drains
//! the latch and fans the notification out to every delivery-enabled
//! session under the device's blocking lock, where sleeping is fine.
//!
//! Bursts faster than distribution coalesce in the latch: source bits
//! OR together and the timestamp tracks the newest event. Sessions see
//! the same coalescing in their pending records.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use ct2_card::regs::bank1;
use ct2_card::rwmap::BankId;

use crate::bus::{CaptureOutcome, InterruptHandler};
use crate::sync::FastLock;

/// Interrupt source bits plus the monotonic time of the newest event
/// they cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    /// Accumulated source bits, already masked to the model.
    pub bits: u32,
    /// Time of the newest folded-in event, or of the last acknowledge
    /// when `bits` is zero.
    pub stamp: Instant,
}

/// Outcome of waiting for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Pending bits exist; acknowledge to consume them.
    Ready {
        /// Snapshot of the pending bits, not consumed.
        bits: u32,
    },
    /// The session no longer receives interrupt notifications.
    HangUp,
    /// The timeout elapsed with nothing pending.
    TimedOut,
}

/// Non-blocking readiness snapshot, poll-style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    /// A notification is pending.
    pub readable: bool,
    /// The session is not delivery-enabled.
    pub hang_up: bool,
}

#[derive(Debug, Default)]
struct WorkSignal {
    work: bool,
    shutdown: bool,
}

/// Single-slot coalescing latch between capture and distribution.
#[derive(Debug, Default)]
pub(crate) struct NotificationLatch {
    slot: FastLock<Option<Notification>>,
    signal: Mutex<WorkSignal>,
    wake: Condvar,
}

impl NotificationLatch {
    /// Fold an event into the slot and wake the distributor.
    ///
    /// Capture-context safe: the slot is a fast lock, and the signal
    /// mutex is only ever held for the flag flip.
    pub(crate) fn post(&self, bits: u32, stamp: Instant) {
        {
            let mut slot = self.slot.lock();
            match slot.as_mut() {
                Some(pending) => {
                    pending.bits |= bits;
                    pending.stamp = stamp;
                }
                None => *slot = Some(Notification { bits, stamp }),
            }
        }
        let mut signal = self.signal.lock().unwrap_or_else(PoisonError::into_inner);
        signal.work = true;
        drop(signal);
        self.wake.notify_one();
    }

    /// Consume the latched notification, if any.
    pub(crate) fn take(&self) -> Option<Notification> {
        self.slot.lock().take()
    }

    /// Drop any latched notification without distributing it.
    pub(crate) fn clear(&self) {
        *self.slot.lock() = None;
    }

    /// Park until work or shutdown. Returns `false` on shutdown.
    fn wait_work(&self) -> bool {
        let mut signal = self.signal.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if signal.shutdown {
                return false;
            }
            if signal.work {
                signal.work = false;
                return true;
            }
            signal = self
                .wake
                .wait(signal)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Tell the distributor to exit.
    pub(crate) fn request_shutdown(&self) {
        let mut signal = self.signal.lock().unwrap_or_else(PoisonError::into_inner);
        signal.shutdown = true;
        drop(signal);
        self.wake.notify_one();
    }

    /// Rearm the latch for a fresh enable.
    pub(crate) fn rearm(&self) {
        self.clear();
        let mut signal = self.signal.lock().unwrap_or_else(PoisonError::into_inner);
        signal.work = false;
        signal.shutdown = false;
    }
}

/// Per-session pending record plus its wakeup machinery.
#[derive(Debug)]
pub(crate) struct SessionNotices {
    pending: FastLock<Notification>,
    receives: AtomicBool,
    generation: Mutex<u64>,
    wake: Condvar,
}

impl SessionNotices {
    pub(crate) fn new(receives: bool) -> Self {
        Self {
            pending: FastLock::new(Notification {
                bits: 0,
                stamp: Instant::now(),
            }),
            receives: AtomicBool::new(receives),
            generation: Mutex::new(0),
            wake: Condvar::new(),
        }
    }

    /// Whether distribution currently delivers to this session.
    pub(crate) fn receives(&self) -> bool {
        self.receives.load(Ordering::Acquire)
    }

    pub(crate) fn set_receives(&self, on: bool) {
        self.receives.store(on, Ordering::Release);
        if !on {
            self.notify();
        }
    }

    /// Fold a distributed notification into the pending record.
    pub(crate) fn post(&self, notification: Notification) {
        if !self.receives() {
            return;
        }
        {
            let mut pending = self.pending.lock();
            pending.bits |= notification.bits;
            pending.stamp = notification.stamp;
        }
        self.notify();
    }

    /// Consume the pending record; afterwards the stamp is the
    /// acknowledge time.
    pub(crate) fn acknowledge(&self) -> Notification {
        let mut pending = self.pending.lock();
        let taken = *pending;
        pending.bits = 0;
        pending.stamp = Instant::now();
        taken
    }

    pub(crate) fn peek_bits(&self) -> u32 {
        self.pending.lock().bits
    }

    fn notify(&self) {
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *generation = generation.wrapping_add(1);
        drop(generation);
        self.wake.notify_all();
    }

    /// Park until something is pending, delivery stops, or the deadline
    /// passes.
    pub(crate) fn wait(&self, deadline: Instant) -> WaitOutcome {
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            let bits = self.peek_bits();
            if bits != 0 {
                return WaitOutcome::Ready { bits };
            }
            if !self.receives() {
                return WaitOutcome::HangUp;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            let (next, _) = self
                .wake
                .wait_timeout(generation, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            generation = next;
        }
    }

    pub(crate) fn readiness(&self) -> Readiness {
        Readiness {
            readable: self.peek_bits() != 0,
            hang_up: !self.receives(),
        }
    }
}

/// Build the capture handler for a card.
///
/// The closure owns only the register fast lock and the latch, so the
/// bus holding it creates no reference cycle back to the device.
pub(crate) fn capture_handler(
    regs: Arc<FastLock<crate::device::RegisterFile>>,
    latch: Arc<NotificationLatch>,
    interrupt_mask: u32,
) -> InterruptHandler {
    Arc::new(move |bus| {
        let stamp = Instant::now();
        let bits = {
            let _regs = regs.lock();
            bus.read_register(BankId::Bank1, bank1::CTRL_IT)
        } & interrupt_mask;
        if bits == 0 {
            return CaptureOutcome::NotMine;
        }
        latch.post(bits, stamp);
        CaptureOutcome::Handled
    })
}

/// Start the distribution worker.
///
/// The worker holds only a weak device reference, so a device dropped
/// mid-flight ends distribution instead of being kept alive by it.
pub(crate) fn spawn_distributor(
    device: std::sync::Weak<crate::device::Device>,
    latch: Arc<NotificationLatch>,
) -> crate::error::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("ct2-distribution".into())
        .spawn(move || {
            while latch.wait_work() {
                while let Some(notification) = latch.take() {
                    let Some(device) = device.upgrade() else {
                        return;
                    };
                    let inner = device.inner.lock_uncancellable();
                    for slot in &inner.sessions {
                        slot.notices.post(notification);
                    }
                }
            }
        })
        .map_err(|_| crate::error::Ct2Error::out_of_memory("notification distribution worker"))
}

/// Distributor state while interrupts are enabled.
#[derive(Debug, Default)]
pub(crate) struct IrqControl {
    pub(crate) enabled: bool,
    pub(crate) capacity: usize,
    pub(crate) worker: Option<JoinHandle<()>>,
}
