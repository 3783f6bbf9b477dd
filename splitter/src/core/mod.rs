//! Core split pipeline: codec, grid planning, hole placement, and the
//! engine that drives them in order.

pub mod engine;
pub mod grid;
pub mod hole_placer;
pub mod stl_codec;
