pub mod audio;
pub mod clock;
pub mod engine;
pub mod fx;
pub mod render;
pub mod sample;
pub mod shared;
