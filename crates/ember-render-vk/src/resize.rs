// SPDX-License-Identifier: CEPL-1.0
use ember_render::{RenderSize, ResizeHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeDecision {
    /// Keep the current chain.
    Unchanged,
    /// Rebuild chain + pipeline for this size.
    Rebuild(RenderSize),
    /// Surface has a zero dimension; skip the frame, keep the request.
    Minimized,
}

/// Render-thread consumer of the host's resize requests.
#[derive(Debug)]
pub struct ResizeCoordinator {
    handle: ResizeHandle,
}

impl ResizeCoordinator {
    pub fn new(initial: RenderSize) -> Self {
        Self {
            handle: ResizeHandle::new(initial),
        }
    }

    pub fn handle(&self) -> ResizeHandle {
        self.handle.clone()
    }

    pub fn committed(&self) -> RenderSize {
        self.handle.committed()
    }

    /// Called once per frame before acquire. `built_for` is the size the
    /// live chain was requested with; `forced` is set after the surface
    /// reported the chain stale.
    pub fn poll(&self, built_for: RenderSize, forced: bool) -> ResizeDecision {
        let shared = self.handle.shared();
        let (pending, size) = shared.take();
        if !pending && !forced {
            return ResizeDecision::Unchanged;
        }
        if size.is_empty() {
            shared.defer();
            return ResizeDecision::Minimized;
        }
        if size == built_for && !forced {
            ResizeDecision::Unchanged
        } else {
            ResizeDecision::Rebuild(size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::viewport_for;
    use ash::vk;

    #[test]
    fn one_request_one_rebuild() {
        let c = ResizeCoordinator::new(RenderSize::new(800, 600));
        let mut built_for = RenderSize::new(800, 600);
        assert_eq!(c.poll(built_for, false), ResizeDecision::Unchanged);

        c.handle().request(1024, 768);
        let d = c.poll(built_for, false);
        assert_eq!(d, ResizeDecision::Rebuild(RenderSize::new(1024, 768)));
        if let ResizeDecision::Rebuild(size) = d {
            built_for = size;
        }

        // next frame: nothing left to do
        assert_eq!(c.poll(built_for, false), ResizeDecision::Unchanged);

        let (vp, sc) = viewport_for(vk::Extent2D {
            width: built_for.width,
            height: built_for.height,
        });
        assert_eq!((vp.x, vp.y, vp.width, vp.height), (0.0, 0.0, 1024.0, 768.0));
        assert_eq!((sc.extent.width, sc.extent.height), (1024, 768));
    }

    #[test]
    fn bursts_collapse_to_last_size() {
        let c = ResizeCoordinator::new(RenderSize::new(800, 600));
        let h = c.handle();
        for w in 801..=900 {
            h.request(w, 600);
        }
        assert_eq!(
            c.poll(RenderSize::new(800, 600), false),
            ResizeDecision::Rebuild(RenderSize::new(900, 600))
        );
        assert_eq!(
            c.poll(RenderSize::new(900, 600), false),
            ResizeDecision::Unchanged
        );
    }

    #[test]
    fn same_size_request_is_a_no_op() {
        let c = ResizeCoordinator::new(RenderSize::new(800, 600));
        c.handle().request(800, 600);
        assert_eq!(
            c.poll(RenderSize::new(800, 600), false),
            ResizeDecision::Unchanged
        );
    }

    #[test]
    fn minimized_defers_until_restored() {
        let c = ResizeCoordinator::new(RenderSize::new(800, 600));
        let built_for = RenderSize::new(800, 600);
        c.handle().request(0, 0);
        for _ in 0..3 {
            assert_eq!(c.poll(built_for, false), ResizeDecision::Minimized);
        }
        c.handle().request(640, 480);
        assert_eq!(
            c.poll(built_for, false),
            ResizeDecision::Rebuild(RenderSize::new(640, 480))
        );
        assert_eq!(
            c.poll(RenderSize::new(640, 480), false),
            ResizeDecision::Unchanged
        );
    }

    #[test]
    fn forced_rebuild_reuses_committed_size() {
        let c = ResizeCoordinator::new(RenderSize::new(800, 600));
        assert_eq!(
            c.poll(RenderSize::new(800, 600), true),
            ResizeDecision::Rebuild(RenderSize::new(800, 600))
        );
    }

    #[test]
    fn request_racing_a_poll_is_never_lost() {
        use std::thread;

        let c = ResizeCoordinator::new(RenderSize::new(1, 1));
        let h = c.handle();
        let writer = thread::spawn(move || {
            for w in 2..=2000u32 {
                h.request(w, w);
            }
        });

        let mut built_for = RenderSize::new(1, 1);
        loop {
            if let ResizeDecision::Rebuild(size) = c.poll(built_for, false) {
                assert_eq!(size.width, size.height);
                built_for = size;
            }
            if writer.is_finished() && !c.handle().shared().is_pending() {
                break;
            }
        }
        writer.join().unwrap();
        if let ResizeDecision::Rebuild(size) = c.poll(built_for, false) {
            built_for = size;
        }
        assert_eq!(built_for, RenderSize::new(2000, 2000));
    }
}
