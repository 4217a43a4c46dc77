//! Computer vision primitives: a typed 2-D raster with multi-scale pyramids,
//! FAST-9 and Harris corner detectors, BRIEF binary descriptors, an affine
//! warp processor, and small lexer/parser utilities for JSON and CSV data.

#[macro_use]
extern crate log;

#[macro_use]
pub mod fatal;

pub mod brief;
pub mod csv;
pub mod data_frame;
mod error;
pub mod fast;
pub mod filter;
pub mod harris;
pub mod image;
pub mod image_io;
pub mod json;
pub mod keypoint;
pub mod lexer;
pub mod mem;
pub mod pyramid;
pub mod strings;
pub mod warp;

pub use error::{Error, Result};
