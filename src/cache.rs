//! Latest-frame cache shared by the capture loop and the stream server.
//!
//! A single slot behind one mutex. Publishing swaps in a new `Arc`, reading
//! clones the `Arc`; neither copies JPEG bytes under the lock. There is no
//! queue: a reader that falls behind simply sees the newest frame next time.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::frame::{EncodedFrame, PublishedFrame};

#[derive(Default)]
struct Slot {
    sequence: u64,
    current: Option<PublishedFrame>,
}

/// Single-slot, last-write-wins store of the most recent encoded frame.
#[derive(Default)]
pub struct FrameCache {
    slot: Mutex<Slot>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame. Returns the sequence number assigned to it
    /// (the first publish is 1).
    pub fn publish(&self, frame: EncodedFrame) -> u64 {
        let mut slot = self.lock();
        slot.sequence += 1;
        let sequence = slot.sequence;
        slot.current = Some(PublishedFrame { sequence, frame });
        sequence
    }

    /// The most recent frame, or `None` before the first publish.
    pub fn read(&self) -> Option<EncodedFrame> {
        self.lock().current.as_ref().map(|p| p.frame.clone())
    }

    /// The most recent frame together with its sequence number.
    pub fn latest(&self) -> Option<PublishedFrame> {
        self.lock().current.clone()
    }

    /// Number of publishes so far.
    pub fn sequence(&self) -> u64 {
        self.lock().sequence
    }

    // The slot is only ever assigned whole values, so a guard recovered from a
    // poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
