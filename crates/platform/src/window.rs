//! Window management using winit.
//!
//! The frame loop drives the window, not the other way around: the window is
//! a passive collaborator exposing [`Window::poll_events`],
//! [`Window::is_closed`] and [`Window::time`]. Internally the winit event
//! loop is pumped with a zero timeout on every poll, which keeps the public
//! surface free of winit's `ApplicationHandler` control flow.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::platform::pump_events::EventLoopExtPumpEvents;
use winit::window::{Window as WinitWindow, WindowAttributes, WindowId};

use cadence_core::{Error, Result, Timer};

/// RAII wrapper for a Vulkan surface.
///
/// Owns a `vk::SurfaceKHR` handle and destroys it on drop. The caller must
/// ensure the Vulkan instance outlives this surface.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Get the raw Vulkan surface handle.
    ///
    /// Valid only as long as this `Surface` instance exists.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Get a reference to the surface loader.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: The handle was created by ash_window::create_surface from
        // the same instance the loader was built on, and this is the only
        // place it is destroyed.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        debug!("Vulkan surface destroyed");
    }
}

/// Collects events of interest while the loop is pumped.
#[derive(Default)]
struct PumpHandler {
    close_requested: bool,
}

impl ApplicationHandler for PumpHandler {
    fn resumed(&mut self, _event_loop: &ActiveEventLoop) {}

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let WindowEvent::CloseRequested = event {
            info!("Close requested");
            self.close_requested = true;
        }
    }
}

/// A window the frame loop polls between frames.
///
/// Created either as a fresh winit window (owning the event loop) or wrapped
/// around an existing winit window (in which case the embedding application
/// pumps events and [`Window::poll_events`] is a no-op).
pub struct Window {
    /// Present when this crate owns the event loop.
    event_loop: Option<EventLoop<()>>,
    window: Arc<WinitWindow>,
    closed: bool,
    timer: Timer,
    width: u32,
    height: u32,
}

impl Window {
    /// Create a new window with the given dimensions and title.
    ///
    /// The window is created non-resizable; the swapchain built against it is
    /// never recreated.
    pub fn new(width: u32, height: u32, title: &str) -> Result<Self> {
        let event_loop = EventLoop::new().map_err(|e| Error::Window(e.to_string()))?;
        event_loop.set_control_flow(ControlFlow::Poll);

        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(false);

        // Pump-driven loops create their window up front rather than inside
        // `resumed`; winit keeps this path available for exactly that use.
        #[allow(deprecated)]
        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        let size = window.inner_size();
        info!("Window created: {}x{}", size.width, size.height);

        Ok(Self {
            event_loop: Some(event_loop),
            window: Arc::new(window),
            closed: false,
            timer: Timer::new(),
            width: size.width,
            height: size.height,
        })
    }

    /// Wrap an existing winit window.
    ///
    /// The embedding application keeps ownership of the event loop;
    /// [`poll_events`](Self::poll_events) does nothing and
    /// [`is_closed`](Self::is_closed) stays false until the wrapper is
    /// dropped.
    pub fn from_existing(window: Arc<WinitWindow>) -> Self {
        let size = window.inner_size();
        info!("Wrapping existing window: {}x{}", size.width, size.height);

        Self {
            event_loop: None,
            window,
            closed: false,
            timer: Timer::new(),
            width: size.width,
            height: size.height,
        }
    }

    /// Pump pending window-system events.
    ///
    /// Must be called once per frame from the thread that created the window.
    pub fn poll_events(&mut self) {
        if let Some(event_loop) = &mut self.event_loop {
            let mut handler = PumpHandler::default();
            let _ = event_loop.pump_app_events(Some(Duration::ZERO), &mut handler);
            if handler.close_requested {
                self.closed = true;
            }
        }
    }

    /// Whether the user asked to close the window.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Seconds since the window was created.
    #[inline]
    pub fn time(&self) -> f64 {
        self.timer.elapsed_secs()
    }

    /// Get a reference to the underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Get an Arc reference to the underlying winit window.
    pub fn inner_arc(&self) -> Arc<WinitWindow> {
        self.window.clone()
    }

    /// Get the current width of the window.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Get the current height of the window.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The Vulkan instance extensions this window's display needs.
    pub fn required_extensions(&self) -> Result<Vec<*const i8>> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
            .map_err(|e| Error::Vulkan(format!("Failed to enumerate surface extensions: {}", e)))?;

        Ok(extensions.to_vec())
    }

    /// Create a Vulkan surface for this window.
    ///
    /// Returns a RAII [`Surface`] that destroys itself on drop.
    ///
    /// # Arguments
    /// * `entry` - The Vulkan entry point
    /// * `instance` - The Vulkan instance (must outlive the returned `Surface`)
    ///
    /// # Errors
    /// Returns an error if the window handles are invalid or surface creation
    /// fails.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: The entry and instance are valid references provided by the
        // caller, and the handles come from a live winit window. The surface
        // is destroyed exactly once, in Surface::drop.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Vulkan(format!("Failed to create Vulkan surface: {}", e)))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}
