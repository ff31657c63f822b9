pub mod display;
pub mod pixel;
pub mod progress;
pub mod scaler;

pub use display::DiffRenderer;
pub use pixel::FrameBuffer;
pub use progress::InfoBar;
pub use scaler::{get_zoom, scale, Requested};
