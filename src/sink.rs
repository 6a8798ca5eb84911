use smol::channel::{Receiver, Sender};

/// Events delivered to the embedder for a single published stream: one
/// `StreamInfo` when the publisher is authorized, then FLV-framed media
/// bytes in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    StreamInfo { stream_key: String },
    StreamData { bytes: Vec<u8> },
}

pub type MediaSink = Sender<MediaEvent>;
pub type MediaSource = Receiver<MediaEvent>;

/// One-producer one-consumer pair. The channel is bounded: an embedder
/// that stops consuming blocks the connection task instead of buffering
/// without limit.
pub fn media_channel(capacity: usize) -> (MediaSink, MediaSource) {
    smol::channel::bounded(capacity)
}
