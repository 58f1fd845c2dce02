// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::{EngineResult, VkResultExt};

/// CPU-side frame bookkeeping: the rotating in-flight slot and which slot
/// last submitted work against each swapchain image. No GPU objects, so the
/// pacing rules can be exercised without a device.
#[derive(Clone, Debug)]
pub struct FramePacer {
    frames_in_flight: usize,
    current: usize,
    image_owner: Vec<Option<usize>>,
}

impl FramePacer {
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        assert!(frames_in_flight > 0, "frames_in_flight must be at least 1");
        Self {
            frames_in_flight,
            current: 0,
            image_owner: vec![None; image_count],
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn current_frame(&self) -> usize {
        self.current
    }

    /// Slot whose fence guards `image`, if any frame has used it since the
    /// last chain rebuild.
    pub fn image_owner(&self, image: usize) -> Option<usize> {
        self.image_owner.get(image).copied().flatten()
    }

    /// Hands `image` to the current slot. Call only after the previous
    /// owner's fence was waited on.
    pub fn bind_image(&mut self, image: usize) {
        if image >= self.image_owner.len() {
            self.image_owner.resize(image + 1, None);
        }
        self.image_owner[image] = Some(self.current);
    }

    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.frames_in_flight;
        self.current
    }

    /// New chain generation: old image indices mean nothing any more.
    pub fn reset_images(&mut self, image_count: usize) {
        self.image_owner.clear();
        self.image_owner.resize(image_count, None);
    }
}

struct FrameSlot {
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
}

/// Per-slot semaphores and fences plus the [`FramePacer`] that rotates them.
pub struct FrameSynchronizer {
    device: ash::Device,
    slots: Vec<FrameSlot>,
    pacer: FramePacer,
}

impl FrameSynchronizer {
    pub fn new(device: &ash::Device, frames_in_flight: usize, image_count: usize) -> EngineResult<Self> {
        let mut sync = FrameSynchronizer {
            device: device.clone(),
            slots: Vec::with_capacity(frames_in_flight),
            pacer: FramePacer::new(frames_in_flight, image_count),
        };

        let sem_ci = vk::SemaphoreCreateInfo::default();
        // Signaled, so the first wait on every slot returns immediately.
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };

        for _ in 0..frames_in_flight {
            // Pushed empty first so Drop sees every handle created so far.
            sync.slots.push(FrameSlot {
                image_available: vk::Semaphore::null(),
                render_finished: vk::Semaphore::null(),
                in_flight: vk::Fence::null(),
            });
            let i = sync.slots.len() - 1;
            unsafe {
                sync.slots[i].image_available = device
                    .create_semaphore(&sem_ci, None)
                    .vk("create_semaphore")?;
                sync.slots[i].render_finished = device
                    .create_semaphore(&sem_ci, None)
                    .vk("create_semaphore")?;
                sync.slots[i].in_flight = device.create_fence(&fence_ci, None).vk("create_fence")?;
            }
        }
        Ok(sync)
    }

    pub fn current_frame(&self) -> usize {
        self.pacer.current_frame()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.pacer.frames_in_flight()
    }

    fn slot(&self) -> &FrameSlot {
        &self.slots[self.pacer.current_frame()]
    }

    pub fn image_available(&self) -> vk::Semaphore {
        self.slot().image_available
    }

    pub fn render_finished(&self) -> vk::Semaphore {
        self.slot().render_finished
    }

    pub fn in_flight(&self) -> vk::Fence {
        self.slot().in_flight
    }

    fn wait(&self, fence: vk::Fence) -> EngineResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }.vk("wait_for_fences")
    }

    /// Blocks until the GPU finished the last frame submitted from this slot.
    pub fn wait_current(&self) -> EngineResult<()> {
        self.wait(self.in_flight())
    }

    /// Waits for whichever slot last rendered into `image_index`, then hands
    /// the image to the current slot.
    pub fn wait_for_image(&mut self, image_index: usize) -> EngineResult<()> {
        match self.pacer.image_owner(image_index) {
            // the current slot's fence was already waited on
            Some(owner) if owner != self.pacer.current_frame() => {
                self.wait(self.slots[owner].in_flight)?;
            }
            _ => {}
        }
        self.pacer.bind_image(image_index);
        Ok(())
    }

    /// Only called between a recorded command buffer and the submit that
    /// signals this fence again.
    pub fn reset_current(&self) -> EngineResult<()> {
        unsafe { self.device.reset_fences(&[self.in_flight()]) }.vk("reset_fences")
    }

    pub fn advance(&mut self) -> usize {
        self.pacer.advance()
    }

    pub fn reset_images(&mut self, image_count: usize) {
        self.pacer.reset_images(image_count);
    }
}

impl Drop for FrameSynchronizer {
    fn drop(&mut self) {
        unsafe {
            for s in &self.slots {
                self.device.destroy_fence(s.in_flight, None);
                self.device.destroy_semaphore(s.render_finished, None);
                self.device.destroy_semaphore(s.image_available, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn slots_rotate_in_order() {
        for n in 1..=4 {
            let mut p = FramePacer::new(n, 3);
            let mut seen = vec![p.current_frame()];
            for _ in 0..(3 * n) {
                seen.push(p.advance());
            }
            let expected: Vec<usize> = (0..=3 * n).map(|i| i % n).collect();
            assert_eq!(seen, expected, "n = {n}");
        }
    }

    #[test]
    fn image_owner_tracks_last_slot() {
        let mut p = FramePacer::new(2, 3);
        // frame 0, slot 0 -> image 0
        assert_eq!(p.image_owner(0), None);
        p.bind_image(0);
        p.advance();
        // frame 1, slot 1 -> image 1
        p.bind_image(1);
        p.advance();
        // frame 2, slot 0 -> image 2
        assert_eq!(p.image_owner(2), None);
        p.bind_image(2);
        p.advance();
        // frame 3, slot 1 gets image 0 back: must wait on slot 0's fence
        assert_eq!(p.current_frame(), 1);
        assert_eq!(p.image_owner(0), Some(0));
        p.bind_image(0);
        assert_eq!(p.image_owner(0), Some(1));
    }

    #[test]
    fn rebuild_forgets_images() {
        let mut p = FramePacer::new(2, 3);
        p.bind_image(0);
        p.bind_image(2);
        p.reset_images(4);
        for i in 0..4 {
            assert_eq!(p.image_owner(i), None);
        }
        assert_eq!(p.image_owner(99), None);
    }

    /// GPU stand-in: one FIFO queue, one fence per slot.
    struct SimGpu {
        signaled: Vec<bool>,
        queue: VecDeque<(u64, usize)>,
    }

    impl SimGpu {
        fn new(slots: usize) -> Self {
            Self {
                signaled: vec![true; slots],
                queue: VecDeque::new(),
            }
        }

        fn submit(&mut self, frame: u64, slot: usize) {
            self.signaled[slot] = false;
            self.queue.push_back((frame, slot));
        }

        /// Completes queued work in order until `slot` is signaled; returns
        /// the frames that had to finish first.
        fn wait(&mut self, slot: usize) -> Vec<u64> {
            let mut retired = Vec::new();
            while !self.signaled[slot] {
                let (frame, s) = self.queue.pop_front().expect("waiting on a fence nobody signals");
                self.signaled[s] = true;
                retired.push(frame);
            }
            retired
        }

        fn in_flight(&self) -> usize {
            self.queue.len()
        }
    }

    #[test]
    fn frame_after_the_bound_waits_for_the_first() {
        const N: usize = 2;
        let mut pacer = FramePacer::new(N, 3);
        let mut gpu = SimGpu::new(N);
        let mut blocked_on = Vec::new();

        // N + 1 frames back to back, the GPU never makes progress on its own.
        for frame in 1..=(N as u64 + 1) {
            let slot = pacer.current_frame();
            blocked_on.push(gpu.wait(slot));
            gpu.submit(frame, slot);
            assert!(gpu.in_flight() <= N, "pipelining deeper than {N}");
            pacer.advance();
        }

        assert!(blocked_on[..N].iter().all(Vec::is_empty));
        assert_eq!(blocked_on[N], vec![1]);
    }

    #[test]
    fn steady_state_never_exceeds_bound() {
        for n in 1..=3 {
            let mut pacer = FramePacer::new(n, 4);
            let mut gpu = SimGpu::new(n);
            for frame in 1..=20u64 {
                let slot = pacer.current_frame();
                let retired = gpu.wait(slot);
                if frame as usize > n {
                    // exactly the frame submitted n ticks ago
                    assert_eq!(retired, vec![frame - n as u64]);
                }
                gpu.submit(frame, slot);
                assert!(gpu.in_flight() <= n);
                pacer.advance();
            }
        }
    }

    #[test]
    #[should_panic(expected = "frames_in_flight must be at least 1")]
    fn zero_slots_rejected() {
        FramePacer::new(0, 2);
    }
}
