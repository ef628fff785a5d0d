pub mod geometry;
pub mod projection;
pub mod renderer;
pub mod tiles;

pub use projection::{TileCoord, Viewport};
pub use renderer::{MapLayers, MapRenderer, Scene};
pub use tiles::{ArchiveTileProvider, TileLayer, TileProvider};
