use thiserror::Error;

/// Errors surfaced by the RTMP codec and session layers.
///
/// `NotEnoughData` is the only transient variant: the byte source ran dry
/// mid-element and the caller may retry once more bytes arrive. Every
/// other variant is fatal for the connection that produced it.
#[derive(Error, Debug)]
pub enum RtmpError {
    #[error("not enough data")]
    NotEnoughData,

    #[error("malformed packet")]
    MalformedPacket,

    #[error("invalid message format")]
    InvalidMessageFormat,

    #[error("invalid header type")]
    InvalidHeaderType,

    #[error("other header type expected")]
    OtherHeaderTypeExpected,

    #[error("invalid handshake")]
    InvalidHandshake,

    #[error("unknown AMF0 marker: 0x{0:02X}")]
    UnknownAmfMarker(u8),

    #[error("extended flv format unsupported")]
    ExtFormatUnsupported,

    #[error("unauthorized stream key")]
    Unauthorized,

    #[error("unsupported script data")]
    UnsupportedScriptData,

    #[error("read timeout")]
    ReadTimeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RtmpError {
    /// Transient errors are retried in place; everything else unwinds the
    /// connection task.
    pub fn is_transient(&self) -> bool {
        matches!(self, RtmpError::NotEnoughData)
    }
}
