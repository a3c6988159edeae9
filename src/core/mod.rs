pub mod cluster;
pub mod compositor;
pub mod detector;
pub mod footer;
pub mod geometry;
pub mod glyphs;
pub mod lens;
pub mod metadata;
pub mod similarity;
