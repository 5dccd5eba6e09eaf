//! cadence demo - clear the screen through the frame scheduler.
//!
//! Creates a presenter with three frames in flight, loads a technique that
//! clears the current render target to magenta, and runs the frame loop
//! until the window closes.

use anyhow::Result;
use tracing::info;

use cadence_scheduler::{
    Device, DispatchMode, GraphicsManager, Presenter, PresenterDescription, SchedulerResult,
    Technique, vk,
};

/// Clears the current render target to a fixed color every frame.
struct ClearTechnique {
    color: [f32; 4],
}

impl Technique for ClearTechnique {
    fn on_load(&mut self, _device: &Device) -> SchedulerResult<()> {
        Ok(())
    }

    fn on_dispatch(&mut self, device: &Device) -> SchedulerResult<()> {
        let target = device.current_render_target();
        let color = self.color;
        device.dispatch_fn(
            move |manager: GraphicsManager| manager.clear(&target, color),
            DispatchMode::MainThread,
        )?;
        Ok(())
    }
}

fn main() -> Result<()> {
    cadence_core::init_logging();
    info!("Starting cadence demo");

    let description = PresenterDescription {
        frames: 3,
        window_name: "cadence demo".to_string(),
        resolution: vk::Extent2D {
            width: 1264,
            height: 761,
        },
        ..Default::default()
    };

    let mut presenter = Presenter::create_new(description)?;

    let mut technique: Option<ClearTechnique> = None;
    presenter.load_technique(&mut technique, || ClearTechnique {
        color: [1.0, 0.0, 1.0, 1.0],
    })?;

    let mut current_frame: u64 = 0;

    loop {
        presenter.window_mut().poll_events();
        if presenter.window().is_closed() {
            break;
        }

        presenter.begin_frame()?;
        if let Some(technique) = technique.as_mut() {
            presenter.dispatch_technique(technique)?;
        }
        presenter.end_frame()?;

        current_frame += 1;
        if current_frame % 1000 == 0 {
            let ms_per_frame = presenter.window().time() * 1000.0 / current_frame as f64;
            info!("Time per frame: {:.3} ms", ms_per_frame);
        }
    }

    info!("Demo finished after {} frame(s)", current_frame);
    Ok(())
}
