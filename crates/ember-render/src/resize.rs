// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use portable_atomic::{AtomicBool, AtomicU64, Ordering};

use crate::RenderSize;

// width in the high half, height in the low half: one store, one load, no
// torn pairs.
fn pack(size: RenderSize) -> u64 {
    (u64::from(size.width) << 32) | u64::from(size.height)
}

fn unpack(bits: u64) -> RenderSize {
    RenderSize {
        width: (bits >> 32) as u32,
        height: bits as u32,
    }
}

/// The only state shared between the host's event thread and the render
/// thread: the last committed surface size and a "resize pending" flag.
#[derive(Debug)]
pub struct ResizeRequest {
    size: AtomicU64,
    pending: AtomicBool,
}

impl ResizeRequest {
    pub fn new(initial: RenderSize) -> Self {
        Self {
            size: AtomicU64::new(pack(initial)),
            pending: AtomicBool::new(false),
        }
    }

    /// Host side. The size is published before the flag so a reader that
    /// observes the flag also observes this size (or a newer one).
    pub fn request(&self, size: RenderSize) {
        self.size.store(pack(size), Ordering::Release);
        self.pending.store(true, Ordering::Release);
    }

    pub fn committed(&self) -> RenderSize {
        unpack(self.size.load(Ordering::Acquire))
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Render side. Clears the flag and returns whether it was set together
    /// with the committed size read after clearing it.
    pub fn take(&self) -> (bool, RenderSize) {
        let pending = self.pending.swap(false, Ordering::AcqRel);
        (pending, self.committed())
    }

    /// Puts a taken request back, e.g. while the surface is minimized.
    pub fn defer(&self) {
        self.pending.store(true, Ordering::Release);
    }
}

/// Cloneable host-thread handle onto a renderer's [`ResizeRequest`].
#[derive(Clone, Debug)]
pub struct ResizeHandle {
    inner: Arc<ResizeRequest>,
}

impl ResizeHandle {
    pub fn new(initial: RenderSize) -> Self {
        Self {
            inner: Arc::new(ResizeRequest::new(initial)),
        }
    }

    pub fn request(&self, width: u32, height: u32) {
        self.inner.request(RenderSize { width, height });
    }

    pub fn committed(&self) -> RenderSize {
        self.inner.committed()
    }

    pub fn shared(&self) -> &ResizeRequest {
        &self.inner
    }
}
