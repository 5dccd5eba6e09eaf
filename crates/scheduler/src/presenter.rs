//! The presenter: a device specialized for driving a swapchain.
//!
//! `begin_frame` retires the frame slot's previous work, acquires the next
//! swapchain image, and gates all subsequent submissions of the frame behind
//! image readiness. `end_frame` flushes every engine's pending work for the
//! frame, signals presentability, presents, and advances the frame index.

use std::ffi::CString;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use ash::vk;
use tracing::{error, info};

use cadence_platform::{Surface, Window, WinitWindow};
use cadence_rhi::device::Device as RhiDevice;
use cadence_rhi::instance::Instance;
use cadence_rhi::physical_device::{QueueFamily, select_physical_device};
use cadence_rhi::swapchain::{Swapchain, SwapchainConfig};
use cadence_rhi::sync::Semaphore;

use crate::device::{Device, DeviceShared};
use crate::engine::{EngineType, engines_from_queue_flags, resolve_engine_mapping};
use crate::engine_manager::EngineManager;
use crate::error::{SchedulerError, SchedulerResult};
use crate::process::{NoOpProcess, Process};
use crate::sync::BoundedQueue;
use crate::work::DispatchMode;

/// Where the presenter draws to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterMode {
    /// Render to an off-screen image without a window. Not supported yet.
    Offline,
    /// Create a new window with the described resolution.
    NewWindow,
    /// Draw to a window the application already owns.
    ExistingWindow,
}

/// Allowed usages of the presentation images.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageUsage {
    /// Allows transfers from the image.
    pub transfer_source: bool,
    /// Allows transfers to the image.
    pub transfer_destination: bool,
    /// Allows sampling the image as a texture.
    pub sampled: bool,
    /// Allows storage-image access.
    pub storage: bool,
    /// Allows use as a color attachment.
    pub render_target: bool,
    /// Allows use as a depth/stencil attachment.
    pub depth_stencil: bool,
}

impl ImageUsage {
    /// Converts to Vulkan usage flags.
    pub fn to_vk(self) -> vk::ImageUsageFlags {
        let mut flags = vk::ImageUsageFlags::empty();
        if self.transfer_source {
            flags |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if self.transfer_destination {
            flags |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        if self.sampled {
            flags |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.storage {
            flags |= vk::ImageUsageFlags::STORAGE;
        }
        if self.render_target {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if self.depth_stencil {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        flags
    }
}

/// Construction parameters for a [`Presenter`].
#[derive(Clone)]
pub struct PresenterDescription {
    /// Initial surface for the presenter to draw to.
    pub mode: PresenterMode,
    /// Number of frames in flight. `0` is treated as `1`.
    pub frames: usize,
    /// Worker threads populating frame-scoped command lists. With `0`,
    /// frame-async dispatches run synchronously on the main thread.
    pub frame_threads: usize,
    /// Worker threads populating cross-frame command lists. Work dispatched
    /// to them must be flushed explicitly; dropping its task handles raises
    /// an error.
    pub async_threads: usize,
    /// Pixel format of the presentation images.
    pub presentation_format: vk::Format,
    /// Valid usages of the presentation images.
    pub usage: ImageUsage,
    /// Title for a newly created window.
    pub window_name: String,
    /// Resolution for a newly created window. Ignored for existing windows,
    /// which keep their current size.
    pub resolution: vk::Extent2D,
    /// The window to draw to in [`PresenterMode::ExistingWindow`].
    pub existing_window: Option<Arc<WinitWindow>>,
}

impl Default for PresenterDescription {
    fn default() -> Self {
        Self {
            mode: PresenterMode::NewWindow,
            frames: 1,
            frame_threads: 0,
            async_threads: 0,
            presentation_format: vk::Format::R8G8B8A8_SRGB,
            usage: ImageUsage {
                render_target: true,
                ..Default::default()
            },
            window_name: "cadence".to_string(),
            resolution: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            existing_window: None,
        }
    }
}

/// A cheap handle to one swapchain image.
///
/// The image and view are owned by the swapchain; render targets are plain
/// handle bundles and clone freely into recording closures.
#[derive(Clone, Debug)]
pub struct RenderTarget {
    image: vk::Image,
    view: vk::ImageView,
    extent: vk::Extent2D,
    format: vk::Format,
}

impl RenderTarget {
    pub(crate) fn new(
        image: vk::Image,
        view: vk::ImageView,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> Self {
        Self {
            image,
            view,
            extent,
            format,
        }
    }

    /// Width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.extent.width
    }

    /// Height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.extent.height
    }

    /// Pixel format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub(crate) fn image(&self) -> vk::Image {
        self.image
    }

    /// The image view over the whole image.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// The full-image color subresource range.
    pub(crate) fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1)
    }
}

/// Presentation-side state owned by the main thread.
pub(crate) struct PresentState {
    pub(crate) render_targets: Vec<RenderTarget>,
    /// Signalled by acquire, waited by the frame-gating submit.
    pub(crate) image_ready_to_render: Vec<Semaphore>,
    /// Signalled at frame end, waited by present.
    pub(crate) image_ready_to_present: Vec<Semaphore>,
    pub(crate) image_index: u32,
    pub(crate) resolution: vk::Extent2D,
    /// Declared after the semaphores; dropped before the surface.
    pub(crate) swapchain: Swapchain,
    pub(crate) surface: Surface,
}

/// A [`Device`] that owns a swapchain and drives the frame loop.
pub struct Presenter {
    device: Device,
    window: Window,
    workers: Vec<JoinHandle<()>>,
}

impl Presenter {
    /// Creates a presenter, its device, and its worker pool.
    ///
    /// # Errors
    ///
    /// Fails with [`SchedulerError::Configuration`] for unsupported modes,
    /// missing window handles, or hardware without a discrete GPU, a
    /// graphics family, or a present-capable family; and with backend
    /// errors when any Vulkan object fails to build.
    pub fn create_new(description: PresenterDescription) -> SchedulerResult<Self> {
        let frames = description.frames.max(1);
        let frame_workers = description.frame_threads;
        let async_workers = description.async_threads;

        let window = match description.mode {
            PresenterMode::Offline => {
                return Err(SchedulerError::Configuration(
                    "offline presentation is not supported".to_string(),
                ));
            }
            PresenterMode::NewWindow => Window::new(
                description.resolution.width,
                description.resolution.height,
                &description.window_name,
            )?,
            PresenterMode::ExistingWindow => {
                let Some(existing) = description.existing_window.clone() else {
                    return Err(SchedulerError::Configuration(
                        "existing-window mode requires a window handle".to_string(),
                    ));
                };
                Window::from_existing(existing)
            }
        };

        let application_name = CString::new(description.window_name.as_str()).map_err(|_| {
            SchedulerError::Configuration("window name must not contain NUL bytes".to_string())
        })?;

        let surface_extensions = window.required_extensions()?;
        let instance = Instance::new(
            &application_name,
            &surface_extensions,
            cfg!(debug_assertions),
        )?;

        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;

        let total_threads = 1 + frame_workers + async_workers;
        let rhi = RhiDevice::new(&instance, &physical_device, total_threads as u32)?;

        let swapchain = Swapchain::new(
            &instance,
            rhi.clone(),
            surface.handle(),
            &SwapchainConfig {
                format: description.presentation_format,
                usage: description.usage.to_vk(),
                min_image_count: frames as u32 + 1,
            },
            window.width(),
            window.height(),
        )?;

        let resolution = swapchain.extent();
        let render_targets: Vec<RenderTarget> = (0..swapchain.image_count())
            .map(|i| {
                RenderTarget::new(
                    swapchain.image(i),
                    swapchain.image_view(i),
                    resolution,
                    swapchain.format(),
                )
            })
            .collect();

        let mut image_ready_to_render = Vec::with_capacity(frames);
        let mut image_ready_to_present = Vec::with_capacity(frames);
        for _ in 0..frames {
            image_ready_to_render.push(Semaphore::new(rhi.clone())?);
            image_ready_to_present.push(Semaphore::new(rhi.clone())?);
        }

        let mut engines = Vec::with_capacity(rhi.families().len());
        for family in rhi.families() {
            engines.push(EngineManager::new(
                rhi.clone(),
                family,
                frames,
                frame_workers,
                async_workers,
            )?);
        }

        let family_masks: Vec<EngineType> = rhi
            .families()
            .iter()
            .map(|family| engines_from_queue_flags(family.flags))
            .collect();
        let engine_mapping = resolve_engine_mapping(&family_masks);

        let main_engine = engine_mapping[EngineType::GRAPHICS.bits() as usize].ok_or_else(
            || {
                SchedulerError::Configuration(
                    "device exposes no graphics-capable queue family".to_string(),
                )
            },
        )?;
        let present_engine = minimal_present_family(rhi.families()).ok_or_else(|| {
            SchedulerError::Configuration(
                "device cannot present to the window surface".to_string(),
            )
        })?;

        let shared = Arc::new(DeviceShared {
            rhi,
            engines,
            engine_mapping,
            frames,
            frame_workers,
            async_workers,
            main_engine,
            present_engine,
            frame_index: AtomicUsize::new(0),
            frame_queue: BoundedQueue::new(frame_workers * 2),
            async_queue: BoundedQueue::new(async_workers * 2),
            disposed: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(frame_workers + async_workers);
        for thread_index in 1..=frame_workers + async_workers {
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("cadence-worker-{thread_index}"))
                .spawn(move || shared.worker_loop(thread_index))
                .map_err(|e| {
                    SchedulerError::Configuration(format!("failed to spawn worker thread: {e}"))
                })?;
            workers.push(handle);
        }

        info!(
            "Presenter created: {} frame(s) in flight, {} frame worker(s), {} async worker(s)",
            frames, frame_workers, async_workers
        );

        Ok(Self {
            device: Device {
                shared,
                present: PresentState {
                    render_targets,
                    image_ready_to_render,
                    image_ready_to_present,
                    image_index: 0,
                    resolution,
                    swapchain,
                    surface,
                },
                instance,
            },
            window,
            workers,
        })
    }

    /// Opens a frame: retires the slot's previous work and acquires the next
    /// swapchain image.
    ///
    /// On return, every command list the slot submitted last time around is
    /// back in its free list, and all work submitted until `end_frame` is
    /// ordered after image readiness.
    ///
    /// # Errors
    ///
    /// Backend errors abort the frame before any user work has run.
    pub fn begin_frame(&mut self) -> SchedulerResult<()> {
        let shared = &self.device.shared;
        let frame = shared.frame_index.load(Ordering::Acquire);

        for engine in &shared.engines {
            engine.wait_for_completion(frame)?;
        }

        let render_ready = self.device.present.image_ready_to_render[frame].handle();
        let (image_index, _suboptimal) = self
            .device
            .present
            .swapchain
            .acquire_next_image(render_ready)
            .map_err(SchedulerError::Backend)?;
        self.device.present.image_index = image_index;

        // Empty submit waiting the acquire semaphore: orders every later
        // submission of this frame on the main queue behind image readiness.
        let wait_semaphores = [render_ready];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);

        shared.engines[shared.main_engine]
            .queue(0)
            .submit(&shared.rhi, &[submit])
            .map_err(SchedulerError::Backend)?;

        Ok(())
    }

    /// Closes a frame: flushes all pending work, presents, and advances the
    /// frame index.
    ///
    /// # Errors
    ///
    /// Backend errors here leave the acquired image unpresented; no recovery
    /// is attempted.
    pub fn end_frame(&mut self) -> SchedulerResult<()> {
        let shared = &self.device.shared;
        let frame = shared.frame_index.load(Ordering::Acquire);

        for engine in &shared.engines {
            engine.flush(frame)?;
        }

        // Signal presentability behind everything submitted this frame.
        let present_ready = self.device.present.image_ready_to_present[frame].handle();
        let signal_semaphores = [present_ready];
        let submit = vk::SubmitInfo::default().signal_semaphores(&signal_semaphores);
        shared.engines[shared.main_engine]
            .queue(0)
            .submit(&shared.rhi, &[submit])
            .map_err(SchedulerError::Backend)?;

        let image_index = self.device.present.image_index;
        let swapchain = &self.device.present.swapchain;
        let _suboptimal = shared.engines[shared.present_engine]
            .queue(0)
            .with_lock(|queue| swapchain.present(queue, image_index, present_ready))
            .map_err(SchedulerError::Backend)?;

        shared
            .frame_index
            .store((frame + 1) % shared.frames, Ordering::Release);

        Ok(())
    }

    /// The window this presenter draws to.
    #[inline]
    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Mutable window access, needed for event polling.
    #[inline]
    pub fn window_mut(&mut self) -> &mut Window {
        &mut self.window
    }

    /// The underlying scheduling device.
    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Drains and joins the worker pool.
    ///
    /// One no-op piece per worker unblocks the consume loops; flushing and
    /// waiting each piece proves the worker picked it up before joining.
    fn shutdown(&mut self) -> SchedulerResult<()> {
        let shared = self.device.shared.clone();
        if shared.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let noop: Arc<dyn Process> = Arc::new(NoOpProcess);
        for _ in 0..shared.async_workers {
            let task = self.device.dispatch(noop.clone(), DispatchMode::Async)?;
            self.device.flush(&[task], &[])?.wait()?;
        }
        for _ in 0..shared.frame_workers {
            let task = self.device.dispatch(noop.clone(), DispatchMode::AsyncFrame)?;
            self.device.flush(&[task], &[])?.wait()?;
        }

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Worker thread panicked during shutdown");
            }
        }

        info!("Scheduler shut down");
        Ok(())
    }
}

impl std::ops::Deref for Presenter {
    type Target = Device;

    fn deref(&self) -> &Device {
        &self.device
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            error!(error = %err, "Error during presenter shutdown");
        }
    }
}

/// The present-capable family with the fewest engine capabilities.
fn minimal_present_family(families: &[QueueFamily]) -> Option<usize> {
    families
        .iter()
        .enumerate()
        .filter(|(_, family)| family.present_support)
        .min_by_key(|(index, family)| {
            (
                engines_from_queue_flags(family.flags).bits().count_ones(),
                *index,
            )
        })
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_usage_conversion() {
        let usage = ImageUsage {
            render_target: true,
            transfer_destination: true,
            ..Default::default()
        };
        let flags = usage.to_vk();
        assert!(flags.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(flags.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(!flags.contains(vk::ImageUsageFlags::SAMPLED));

        assert_eq!(ImageUsage::default().to_vk(), vk::ImageUsageFlags::empty());
    }

    #[test]
    fn test_description_defaults() {
        let description = PresenterDescription::default();
        assert_eq!(description.frames, 1);
        assert_eq!(description.frame_threads, 0);
        assert_eq!(description.presentation_format, vk::Format::R8G8B8A8_SRGB);
        assert!(description.usage.render_target);
    }

    #[test]
    fn test_minimal_present_family_prefers_lean_families() {
        let families = [
            QueueFamily {
                index: 0,
                flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                queue_count: 4,
                present_support: true,
            },
            QueueFamily {
                index: 1,
                flags: vk::QueueFlags::TRANSFER,
                queue_count: 1,
                present_support: true,
            },
            QueueFamily {
                index: 2,
                flags: vk::QueueFlags::COMPUTE,
                queue_count: 2,
                present_support: false,
            },
        ];
        assert_eq!(minimal_present_family(&families), Some(1));
    }

    #[test]
    fn test_minimal_present_family_requires_present_support() {
        let families = [QueueFamily {
            index: 0,
            flags: vk::QueueFlags::GRAPHICS,
            queue_count: 1,
            present_support: false,
        }];
        assert_eq!(minimal_present_family(&families), None);
    }
}
