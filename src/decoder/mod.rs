pub mod frame_data;
pub mod video;

pub use frame_data::FrameData;
pub use video::{FrameDecoder, PipeDecoder};
