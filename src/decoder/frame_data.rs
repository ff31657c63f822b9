use crate::renderer::FrameBuffer;

/// Decoded frame travelling from the decoder thread to the player.
#[derive(Clone, Debug)]
pub struct FrameData {
    /// 1-based, same numbering as the on-disk `frame<N>` files.
    pub index: u64,
    pub frame: FrameBuffer,
}

impl FrameData {
    pub fn new(index: u64, frame: FrameBuffer) -> Self {
        Self { index, frame }
    }
}
