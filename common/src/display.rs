use crate::frame::Frame;

/// What the display asks the pipeline to do after showing a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayAction {
    Continue,
    /// The user asked to stop; the renderer raises cancellation.
    Quit,
}

/// Output side of the pipeline: shows annotated frames and relays the
/// user's quit request.
///
/// `close` is called exactly once by the renderer, on every exit path.
pub trait DisplaySink: Send {
    fn show(&mut self, frame: &Frame) -> DisplayAction;

    fn close(&mut self) {}

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
