pub mod headless;

use std::time::Duration;

use motion_pipeline_common::config::{Config, DisplayKind};
use motion_pipeline_common::display::DisplaySink;
use motion_pipeline_preview::{PreviewError, PreviewSink};
use tracing::info;

pub use headless::HeadlessDisplay;

/// Open the display sink selected by `render.display`.
pub fn open_display(config: &Config) -> Result<Box<dyn DisplaySink>, PreviewError> {
    let sink: Box<dyn DisplaySink> = match config.render.display {
        DisplayKind::Headless => Box::new(HeadlessDisplay::with_stdin_quit(Duration::from_millis(
            config.render.frame_interval_ms,
        ))),
        DisplayKind::Preview => Box::new(PreviewSink::start(&config.preview)?),
    };
    info!(sink = sink.name(), "display opened");
    Ok(sink)
}
