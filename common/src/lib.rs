pub mod config;
pub mod display;
pub mod frame;

pub use display::{DisplayAction, DisplaySink};
pub use frame::{BoundingBox, DetectionBatch, Frame, GrayFrame, StreamItem};
