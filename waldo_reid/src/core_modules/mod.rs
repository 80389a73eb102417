pub mod adaptive_cache;
pub mod enrollment;
pub mod geometry;
pub mod histogram;
pub mod interfaces;
pub mod matcher;
pub mod pixel;
pub mod region;
pub mod selector;
