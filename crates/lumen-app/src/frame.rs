//! Per-frame state machine and FPS accounting.

use anyhow::Result;
use ash::vk;
use lumen_gpu::GpuError;
use lumen_graph::GraphError;
use std::time::{Duration, Instant};

/// Whether `error` only says the swapchain no longer matches the surface.
pub fn is_swapchain_stale(error: &anyhow::Error) -> bool {
    if let Some(e) = error.downcast_ref::<GraphError>() {
        return e.is_swapchain_stale();
    }
    if let Some(e) = error.downcast_ref::<GpuError>() {
        return e.is_swapchain_stale();
    }
    matches!(
        error.downcast_ref::<vk::Result>().copied(),
        Some(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR)
    )
}

/// The GPU-facing half of a frame, implemented by the window runner.
///
/// [`FrameLoop`] drives these calls in order and handles swapchain staleness;
/// implementors only perform each step.
pub trait FrameBackend {
    /// Block until the device has no work left.
    fn wait_idle(&mut self) -> Result<()>;

    /// Recreate the swapchain and every object derived from it, including the graph.
    fn recreate(&mut self) -> Result<()>;

    /// Return the frame fences and the image-available semaphore to their initial state.
    fn reset_sync(&mut self) -> Result<()>;

    /// Block until the previous frame's submission finished.
    fn wait_for_frame(&mut self) -> Result<()>;

    /// Acquire the next swapchain image. Returns its index and whether the
    /// swapchain is suboptimal.
    fn acquire(&mut self) -> Result<(u32, bool)>;

    /// Record and submit the graph for `image_index`. Returns the semaphore
    /// presentation must wait on.
    fn render(&mut self, image_index: u32) -> Result<vk::Semaphore>;

    /// Present `image_index`. Returns `true` when the swapchain should be recreated.
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<bool>;
}

/// What a call to [`FrameLoop::frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { image_index: u32 },
    /// The swapchain was recreated; nothing was rendered.
    Recreated,
    /// The swapchain went stale mid-frame; it is recreated next frame.
    Skipped,
}

/// Resize-aware frame sequencing over a [`FrameBackend`].
#[derive(Debug, Default)]
pub struct FrameLoop {
    resize_requested: bool,
    frames_presented: u64,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recreate the swapchain at the start of the next frame.
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    pub const fn resize_requested(&self) -> bool {
        self.resize_requested
    }

    pub const fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Run one frame. Out-of-date and suboptimal swapchains are not errors:
    /// the frame is dropped and the swapchain recreated on the next call.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn frame<B: FrameBackend>(&mut self, backend: &mut B) -> Result<FrameOutcome> {
        if self.resize_requested {
            backend.wait_idle()?;
            backend.recreate()?;
            backend.reset_sync()?;
            self.resize_requested = false;
            return Ok(FrameOutcome::Recreated);
        }

        backend.wait_for_frame()?;

        let image_index = match backend.acquire() {
            Ok((_, true)) => return Ok(self.skip("acquire reported a suboptimal swapchain")),
            Ok((image_index, false)) => image_index,
            Err(e) => return self.stale_or_fatal(e),
        };

        let render_finished = match backend.render(image_index) {
            Ok(semaphore) => semaphore,
            Err(e) => return self.stale_or_fatal(e),
        };

        match backend.present(image_index, render_finished) {
            Ok(stale) => {
                if stale {
                    self.request_resize();
                }
                self.frames_presented += 1;
                Ok(FrameOutcome::Presented { image_index })
            }
            Err(e) => self.stale_or_fatal(e),
        }
    }

    fn stale_or_fatal(&mut self, error: anyhow::Error) -> Result<FrameOutcome> {
        if is_swapchain_stale(&error) {
            Ok(self.skip("swapchain out of date"))
        } else {
            Err(error)
        }
    }

    fn skip(&mut self, reason: &str) -> FrameOutcome {
        tracing::debug!("Skipping frame: {reason}");
        self.request_resize();
        FrameOutcome::Skipped
    }
}

/// Frame rate over one-second windows, with min/max/average over the whole run.
#[derive(Debug)]
pub struct FpsCounter {
    window_start: Instant,
    window_frames: u32,
    report_interval: Duration,
    min: f64,
    max: f64,
    sum: f64,
    reports: u32,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            window_frames: 0,
            report_interval: Duration::from_secs(1),
            min: f64::MAX,
            max: 0.0,
            sum: 0.0,
            reports: 0,
        }
    }

    /// Count one frame. Returns the frame rate once every report interval.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        self.window_frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.report_interval {
            return None;
        }

        let fps = f64::from(self.window_frames) / elapsed.as_secs_f64();
        self.window_start = now;
        self.window_frames = 0;
        self.min = self.min.min(fps);
        self.max = self.max.max(fps);
        self.sum += fps;
        self.reports += 1;
        Some(fps)
    }

    /// `(min, max, average)` of every reported rate, if any was reported.
    pub fn stats(&self) -> Option<(f64, f64, f64)> {
        (self.reports > 0).then(|| (self.min, self.max, self.sum / f64::from(self.reports)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        WaitIdle,
        Recreate,
        ResetSync,
        WaitForFrame,
        Acquire,
        Render(u32),
        Present(u32),
    }

    #[derive(Default)]
    struct MockBackend {
        calls: Vec<Call>,
        next_image: u32,
        image_count: u32,
        acquire_result: Option<vk::Result>,
        acquire_suboptimal: bool,
        present_stale: bool,
        render_error: Option<vk::Result>,
        fresh_semaphores: u32,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                image_count: 3,
                ..Self::default()
            }
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_idle(&mut self) -> Result<()> {
            self.calls.push(Call::WaitIdle);
            Ok(())
        }

        fn recreate(&mut self) -> Result<()> {
            self.calls.push(Call::Recreate);
            self.next_image = 0;
            Ok(())
        }

        fn reset_sync(&mut self) -> Result<()> {
            self.calls.push(Call::ResetSync);
            self.fresh_semaphores += 1;
            Ok(())
        }

        fn wait_for_frame(&mut self) -> Result<()> {
            self.calls.push(Call::WaitForFrame);
            Ok(())
        }

        fn acquire(&mut self) -> Result<(u32, bool)> {
            self.calls.push(Call::Acquire);
            if let Some(result) = self.acquire_result.take() {
                return Err(GraphError::from(GpuError::from(result)).into());
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok((index, std::mem::take(&mut self.acquire_suboptimal)))
        }

        fn render(&mut self, image_index: u32) -> Result<vk::Semaphore> {
            self.calls.push(Call::Render(image_index));
            if let Some(result) = self.render_error.take() {
                return Err(GraphError::Vulkan(result).into());
            }
            Ok(vk::Semaphore::from_raw(0x51))
        }

        fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<bool> {
            assert_ne!(wait, vk::Semaphore::null());
            self.calls.push(Call::Present(image_index));
            Ok(std::mem::take(&mut self.present_stale))
        }
    }

    #[test]
    fn frame_waits_acquires_renders_presents() {
        let mut backend = MockBackend::new();
        let mut frames = FrameLoop::new();

        let outcome = frames.frame(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented { image_index: 0 });
        assert_eq!(
            backend.calls,
            [Call::WaitForFrame, Call::Acquire, Call::Render(0), Call::Present(0)]
        );
        assert_eq!(frames.frames_presented(), 1);
    }

    #[test]
    fn resize_waits_idle_before_recreating_and_resets_sync() {
        let mut backend = MockBackend::new();
        let mut frames = FrameLoop::new();
        frames.frame(&mut backend).unwrap();
        backend.calls.clear();

        frames.request_resize();
        assert_eq!(frames.frame(&mut backend).unwrap(), FrameOutcome::Recreated);
        assert_eq!(backend.calls, [Call::WaitIdle, Call::Recreate, Call::ResetSync]);
        assert_eq!(backend.fresh_semaphores, 1);
        assert!(!frames.resize_requested());

        // The next frame acquires again from the recreated swapchain.
        backend.calls.clear();
        assert_eq!(
            frames.frame(&mut backend).unwrap(),
            FrameOutcome::Presented { image_index: 0 }
        );
        assert_eq!(backend.calls[1], Call::Acquire);
    }

    #[test]
    fn out_of_date_acquire_skips_and_recreates_next_frame() {
        let mut backend = MockBackend {
            acquire_result: Some(vk::Result::ERROR_OUT_OF_DATE_KHR),
            ..MockBackend::new()
        };
        let mut frames = FrameLoop::new();

        assert_eq!(frames.frame(&mut backend).unwrap(), FrameOutcome::Skipped);
        assert!(!backend.calls.iter().any(|c| matches!(c, Call::Render(_))));
        assert!(frames.resize_requested());
        assert_eq!(frames.frame(&mut backend).unwrap(), FrameOutcome::Recreated);
    }

    #[test]
    fn suboptimal_acquire_skips_the_frame() {
        let mut backend = MockBackend {
            acquire_suboptimal: true,
            ..MockBackend::new()
        };
        let mut frames = FrameLoop::new();

        assert_eq!(frames.frame(&mut backend).unwrap(), FrameOutcome::Skipped);
        assert_eq!(backend.calls, [Call::WaitForFrame, Call::Acquire]);
        assert!(frames.resize_requested());
    }

    #[test]
    fn stale_present_still_counts_the_frame() {
        let mut backend = MockBackend {
            present_stale: true,
            ..MockBackend::new()
        };
        let mut frames = FrameLoop::new();

        assert_eq!(
            frames.frame(&mut backend).unwrap(),
            FrameOutcome::Presented { image_index: 0 }
        );
        assert!(frames.resize_requested());
        assert_eq!(frames.frames_presented(), 1);
    }

    #[test]
    fn other_errors_are_fatal() {
        let mut backend = MockBackend {
            render_error: Some(vk::Result::ERROR_DEVICE_LOST),
            ..MockBackend::new()
        };
        let mut frames = FrameLoop::new();

        let err = frames.frame(&mut backend).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GraphError>(),
            Some(GraphError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
        ));
        assert!(!frames.resize_requested());
    }

    #[test]
    fn staleness_is_found_through_every_error_layer() {
        let out_of_date = vk::Result::ERROR_OUT_OF_DATE_KHR;
        assert!(is_swapchain_stale(&anyhow::Error::new(out_of_date)));
        assert!(is_swapchain_stale(&GpuError::from(out_of_date).into()));
        assert!(is_swapchain_stale(&GraphError::Vulkan(vk::Result::SUBOPTIMAL_KHR).into()));
        assert!(!is_swapchain_stale(&GraphError::NotCompiled.into()));
        assert!(!is_swapchain_stale(&anyhow::anyhow!("window closed")));
    }

    #[test]
    fn fps_reports_once_per_second() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(start);

        for frame in 1..60u64 {
            assert_eq!(fps.tick(start + Duration::from_millis(frame * 16)), None);
        }
        let rate = fps.tick(start + Duration::from_secs(1)).unwrap();
        assert!((rate - 60.0).abs() < 1e-9);

        assert_eq!(fps.tick(start + Duration::from_millis(1500)), None);
        let rate = fps.tick(start + Duration::from_secs(2)).unwrap();
        assert!((rate - 2.0).abs() < 1e-9);

        let (min, max, avg) = fps.stats().unwrap();
        assert!((min - 2.0).abs() < 1e-9);
        assert!((max - 60.0).abs() < 1e-9);
        assert!((avg - 31.0).abs() < 1e-9);
    }

    #[test]
    fn no_stats_before_first_report() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(start);
        fps.tick(start);
        assert!(fps.stats().is_none());
    }
}
