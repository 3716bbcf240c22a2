//! Frame annotation: region blur, box outlines and the timestamp overlay.

pub mod annotate;
pub mod font;

pub use annotate::Annotator;
