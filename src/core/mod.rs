pub mod audio_manager;
pub mod clock;
pub mod frame_source;
pub mod player;
pub mod session;
pub mod transport;
pub mod viewer;
