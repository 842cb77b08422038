//! Sessions: per-open device communication contexts.
//!
//! Every consumer of a card opens its own [`Session`]. Reads of plain
//! status registers are always allowed; anything that changes device
//! state (writes, side-effectful reads, FIFO drains, reset, interrupt
//! control) is subject to the first-claim rule of the access arbiter.
//!
//! Offsets, counts, and the seek cursor are in 32-bit register units
//! over the normalized window: bank 1 at 0-63, bank 2 at 64-127.

use std::io::SeekFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use ct2_card::rwmap::{Direction, WINDOW_LEN};
use tracing::{debug, warn};

use crate::device::{Device, DeviceInner};
use crate::error::{Ct2Error, Result};
use crate::irq::{Notification, Readiness, SessionNotices, WaitOutcome};
use crate::sync::{BlockingGuard, CancelToken};

/// Protection requested for a FIFO mapping.
///
/// The FIFO is a read-only window; anything beyond plain reads is
/// refused at mapping time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapProtection {
    /// Request write access.
    pub write: bool,
    /// Request execute access.
    pub exec: bool,
}

impl MapProtection {
    /// Plain read-only mapping, the only kind the device grants.
    pub const READ_ONLY: Self = Self {
        write: false,
        exec: false,
    };
}

/// Commands against a per-session notification queue.
///
/// The driver coalesces notifications in a single pending record per
/// session instead of queueing them, so everything except [`Detach`]
/// reports [`Ct2Error::NotSupported`].
///
/// [`Detach`]: QueueCommand::Detach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueCommand {
    /// Attach a queue of the given capacity.
    Attach {
        /// Requested queue capacity.
        capacity: usize,
    },
    /// Resize the attached queue.
    Resize {
        /// Requested queue capacity.
        capacity: usize,
    },
    /// Consume all queued notifications.
    Drain,
    /// Discard all queued notifications.
    Flush,
    /// Detach the queue. Accepted as a no-op.
    Detach,
}

/// An open session on a device.
pub struct Session {
    device: Arc<Device>,
    id: u64,
    notices: Arc<SessionNotices>,
    cancel: CancelToken,
    cursor: Mutex<u16>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device.name())
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        device: Arc<Device>,
        id: u64,
        notices: Arc<SessionNotices>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            device,
            id,
            notices,
            cancel,
            cursor: Mutex::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Session identifier, unique per device.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Device this session is open on.
    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Handle for cancelling this session's blocking operations from
    /// another thread.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// First-claim check that keeps the device lock held.
    ///
    /// State-changing transfers run under the returned guard, so a grant
    /// cannot be overtaken by another session claiming exclusive access
    /// while the hardware operation is in flight.
    fn lock_for_state_change(&self, operation: &str) -> Result<BlockingGuard<'_, DeviceInner>> {
        let inner = self.device.inner.lock(&self.cancel)?;
        if inner.arbiter.may_change_state(self.id) {
            Ok(inner)
        } else {
            Err(Ct2Error::permission_denied(operation))
        }
    }

    // ---- register I/O ----

    /// Read registers starting at a window offset.
    ///
    /// The count clamps to the accessible run at `offset`. Reads that
    /// touch a side-effectful register need first-claim standing.
    pub fn read_at(&self, offset: u16, count: usize) -> Result<Vec<u32>> {
        let transfer = self.device.luts.clamp(offset, count, Direction::Read)?;
        let mut buf = vec![0u32; usize::from(transfer.len)];
        let _inner = if self.device.luts.read_touches_sensitive(&transfer) {
            Some(self.lock_for_state_change("state-changing register read")?)
        } else {
            None
        };
        self.device
            .read_registers(transfer.bank, transfer.bank_offset, &mut buf);
        Ok(buf)
    }

    /// Write registers starting at a window offset.
    ///
    /// Returns the number of words written after clamping. Data is
    /// staged before any lock is taken; the copy is wasted work when
    /// the permission check then refuses the write.
    pub fn write_at(&self, offset: u16, data: &[u32]) -> Result<usize> {
        let transfer = self.device.luts.clamp(offset, data.len(), Direction::Write)?;
        let staged = data[..usize::from(transfer.len)].to_vec();
        let _inner = self.lock_for_state_change("register write")?;
        self.device
            .write_registers(transfer.bank, transfer.bank_offset, &staged);
        Ok(staged.len())
    }

    /// Read at the cursor and advance it.
    pub fn read(&self, count: usize) -> Result<Vec<u32>> {
        let offset = self.cursor();
        let words = self.read_at(offset, count)?;
        self.set_cursor(offset + words.len() as u16);
        Ok(words)
    }

    /// Write at the cursor and advance it.
    pub fn write(&self, data: &[u32]) -> Result<usize> {
        let offset = self.cursor();
        let written = self.write_at(offset, data)?;
        self.set_cursor(offset + written as u16);
        Ok(written)
    }

    /// Move the cursor. Targets must land on a window register, so the
    /// window length itself is already out of range.
    pub fn seek(&self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => i64::try_from(n)
                .map_err(|_| Ct2Error::invalid_argument("seek target overflows"))?,
            SeekFrom::Current(delta) => i64::from(self.cursor()) + delta,
            SeekFrom::End(delta) => i64::from(WINDOW_LEN) + delta,
        };
        if !(0..i64::from(WINDOW_LEN)).contains(&target) {
            return Err(Ct2Error::invalid_argument(format!(
                "seek target {target} outside the register window"
            )));
        }
        let target = target as u16;
        self.set_cursor(target);
        Ok(u64::from(target))
    }

    fn cursor(&self) -> u16 {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_cursor(&self, value: u16) {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    // ---- FIFO ----

    /// Drain the first `count` words of the FIFO.
    ///
    /// Draining pops data off the card, so first-claim standing is
    /// required.
    pub fn read_fifo(&self, count: usize) -> Result<Vec<u32>> {
        if count == 0 || count > self.device.fifo_len() {
            return Err(Ct2Error::invalid_argument(format!(
                "FIFO drain of {count} words, window holds {}",
                self.device.fifo_len()
            )));
        }
        let mut out = vec![0u32; count];
        let _inner = self.lock_for_state_change("FIFO drain")?;
        self.device.drain_fifo(&mut out);
        Ok(out)
    }

    /// Map `len` words of the FIFO window starting at `offset`.
    ///
    /// Only the exclusive-access holder may map, only read-only, only
    /// within the window. Live mappings pin exclusive access: they block
    /// both release and close.
    pub fn map_fifo(
        &self,
        offset: usize,
        len: usize,
        protection: MapProtection,
    ) -> Result<FifoMapping> {
        if protection.write || protection.exec {
            return Err(Ct2Error::invalid_argument(
                "FIFO mappings are read-only",
            ));
        }
        let window = self.device.fifo_len();
        if len == 0 || offset.checked_add(len).map_or(true, |end| end > window) {
            return Err(Ct2Error::invalid_argument(format!(
                "mapping {offset}+{len} outside the {window}-word FIFO window"
            )));
        }
        let mut inner = self.device.inner.lock(&self.cancel)?;
        if !inner.arbiter.holds(self.id) {
            return Err(Ct2Error::permission_denied(
                "FIFO mapping without exclusive access",
            ));
        }
        inner.arbiter.add_mapping();
        debug!(
            device = self.device.name(),
            session = self.id,
            offset,
            len,
            "FIFO mapped"
        );
        Ok(FifoMapping {
            device: Arc::clone(&self.device),
            offset,
            len,
            released: AtomicBool::new(false),
        })
    }

    // ---- exclusive access ----

    /// Claim exclusive access. Idempotent for the current holder.
    pub fn request_exclusive(&self) -> Result<()> {
        let mut inner = self.device.inner.lock(&self.cancel)?;
        inner.arbiter.request(self.id)
    }

    /// Give up exclusive access. A no-op success when this session is
    /// not the holder; refused while FIFO mappings are live.
    pub fn release_exclusive(&self) -> Result<()> {
        let mut inner = self.device.inner.lock(&self.cancel)?;
        inner.arbiter.release(self.id)
    }

    /// Whether this session currently holds exclusive access.
    pub fn has_exclusive(&self) -> Result<bool> {
        let inner = self.device.inner.lock(&self.cancel)?;
        Ok(inner.arbiter.holds(self.id))
    }

    // ---- device state ----

    /// Reset the card to its power-on register state.
    ///
    /// Needs first-claim standing and fails with [`Ct2Error::Busy`]
    /// while interrupts are enabled.
    pub fn reset(&self) -> Result<()> {
        self.device.reset(self.id, &self.cancel)
    }

    /// Turn on interrupt delivery. Capacity 0 selects the configured
    /// default; re-enabling at the same capacity is a no-op, at a
    /// different one an error.
    pub fn enable_interrupts(&self, capacity: usize) -> Result<()> {
        self.device
            .enable_interrupts(self.id, capacity, &self.cancel)
    }

    /// Turn off interrupt delivery and discard undistributed
    /// notifications. No-op when already off.
    pub fn disable_interrupts(&self) -> Result<()> {
        self.device.disable_interrupts(self.id, &self.cancel)
    }

    // ---- notifications ----

    /// Consume the pending notification record.
    ///
    /// Returns the accumulated bits (zero if nothing arrived) and the
    /// time of the newest covered event; afterwards the record is empty
    /// and stamped with the acknowledge time.
    #[must_use]
    pub fn acknowledge(&self) -> Notification {
        self.notices.acknowledge()
    }

    /// Block until a notification is pending, delivery stops, or the
    /// timeout elapses.
    pub fn wait_for_notification(&self, timeout: Duration) -> WaitOutcome {
        self.notices.wait(Instant::now() + timeout)
    }

    /// Poll-style readiness snapshot.
    #[must_use]
    pub fn readiness(&self) -> Readiness {
        self.notices.readiness()
    }

    /// Submit a notification-queue command.
    pub fn queue_command(&self, command: QueueCommand) -> Result<()> {
        match command {
            QueueCommand::Detach => Ok(()),
            QueueCommand::Attach { .. } => {
                Err(Ct2Error::not_supported("attach notification queue"))
            }
            QueueCommand::Resize { .. } => {
                Err(Ct2Error::not_supported("resize notification queue"))
            }
            QueueCommand::Drain => Err(Ct2Error::not_supported("drain notification queue")),
            QueueCommand::Flush => Err(Ct2Error::not_supported("flush notification queue")),
        }
    }

    // ---- teardown ----

    /// Close the session.
    ///
    /// Fails with [`Ct2Error::Busy`] while this session holds exclusive
    /// access with live FIFO mappings; otherwise revokes any exclusive
    /// access and removes the session. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut inner = self.device.inner.lock(&self.cancel)?;
        self.close_locked(&mut inner)
    }

    fn close_locked(&self, inner: &mut DeviceInner) -> Result<()> {
        if inner.arbiter.holds(self.id) && inner.arbiter.active_mappings() > 0 {
            return Err(Ct2Error::busy(format!(
                "{} live FIFO mappings",
                inner.arbiter.active_mappings()
            )));
        }
        inner.arbiter.release(self.id)?;
        inner.sessions.retain(|slot| slot.id != self.id);
        self.notices.set_receives(false);
        self.closed.store(true, Ordering::Release);
        debug!(device = self.device.name(), session = self.id, "session closed");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut inner = self.device.inner.lock_uncancellable();
        if let Err(err) = self.close_locked(&mut inner) {
            // Arbitration must stay sound; the registration leaks and
            // exclusive access stays pinned to the dead session.
            warn!(
                device = self.device.name(),
                session = self.id,
                error = %err,
                "session dropped while its FIFO mappings are live"
            );
        }
    }
}

/// A read-only view onto part of the FIFO window.
///
/// Dropping the mapping (or calling [`unmap`](Self::unmap)) releases
/// its pin on the owner's exclusive access.
pub struct FifoMapping {
    device: Arc<Device>,
    offset: usize,
    len: usize,
    released: AtomicBool,
}

impl std::fmt::Debug for FifoMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FifoMapping")
            .field("device", &self.device.name())
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl FifoMapping {
    /// Mapped length, words.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty; never true for a granted mapping.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of the mapping within the FIFO window, words.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Read words through the mapping. `rel` is relative to the mapping
    /// start.
    pub fn read_words(&self, rel: usize, buf: &mut [u32]) -> Result<()> {
        if rel.checked_add(buf.len()).map_or(true, |end| end > self.len) {
            return Err(Ct2Error::invalid_argument(format!(
                "read {rel}+{} outside the {}-word mapping",
                buf.len(),
                self.len
            )));
        }
        for (i, word) in buf.iter_mut().enumerate() {
            *word = self.device.bus.read_fifo_word(self.offset + rel + i);
        }
        Ok(())
    }

    /// Drop the mapping explicitly.
    pub fn unmap(self) {}

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            let mut inner = self.device.inner.lock_uncancellable();
            inner.arbiter.drop_mapping();
        }
    }
}

impl Drop for FifoMapping {
    fn drop(&mut self) {
        self.release();
    }
}
