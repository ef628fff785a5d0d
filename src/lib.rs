//! Offline tactical map engine: MBTiles basemaps, live unit tracking with
//! trails, bounds checks and distance overlays, plus a freehand annotation
//! layer. The terminal viewer in `main.rs` is a thin shell over [`session`].

pub mod annotation;
pub mod archive;
pub mod braille;
pub mod config;
pub mod entity;
pub mod error;
pub mod geo;
pub mod hash;
pub mod logging;
pub mod map;
pub mod overlay;
pub mod replay;
pub mod session;
pub mod stream;
pub mod sync;
