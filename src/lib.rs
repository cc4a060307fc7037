pub mod checkpoint;
pub mod config;
pub mod decompose;
pub mod errors;
pub mod pipeline;
pub mod quality;
pub mod synth;
pub mod ui;
pub mod util;
