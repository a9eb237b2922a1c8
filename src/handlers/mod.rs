pub mod audio;
pub mod config;
pub mod playback;

pub use audio::*;
pub use config::*;
pub use playback::*;
