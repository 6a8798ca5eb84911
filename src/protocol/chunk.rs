use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};
use futures::{AsyncRead, AsyncReadExt};

use crate::error::RtmpError;

/// A 3-byte timestamp/delta field of all ones announces a 4-byte extended
/// timestamp after the rest of the chunk header.
pub const EXTENDED_TIMESTAMP_MARKER: u32 = 0xFFFFFF;

/// Pre-negotiation chunk size mandated by the RTMP spec.
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Message header as reconstructed per chunk. fmt=1/2/3 chunks inherit the
/// missing fields from the previous header on the same chunk stream.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageHeader {
    /// Chunk stream id, single-byte encoding (2..=63).
    pub csid: u8,
    pub timestamp: u32,
    pub timestamp_delta: u32,
    pub body_size: u32,
    pub type_id: u8,
    /// Message stream id. 0 for control, 1 for publish traffic.
    pub stream_id: u32,
    pub extended_timestamp: bool,
}

/// A fully-reassembled application-level message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: Vec<u8>,
}

fn fixed_header_len(fmt: u8) -> usize {
    match fmt {
        0 => 11,
        1 => 7,
        2 => 3,
        3 => 0,
        _ => unreachable!("fmt is two bits"),
    }
}

/// Header waiting on its 4-byte extended timestamp.
struct PendingHeader {
    fmt: u8,
    csid: u8,
    /// Timestamp of the previous header on this chunk stream; the extended
    /// value is a delta against it for fmt=1/2/3.
    base_timestamp: u32,
    body_size: u32,
    type_id: u8,
    stream_id: u32,
}

impl PendingHeader {
    fn finalize(self, extended: u32) -> MessageHeader {
        let (timestamp, timestamp_delta) = if self.fmt == 0 {
            (extended, 0)
        } else {
            (self.base_timestamp.wrapping_add(extended), extended)
        };
        MessageHeader {
            csid: self.csid,
            timestamp,
            timestamp_delta,
            body_size: self.body_size,
            type_id: self.type_id,
            stream_id: self.stream_id,
            extended_timestamp: true,
        }
    }
}

enum Parsed {
    Header(MessageHeader),
    NeedsExtended(PendingHeader),
}

/// In-flight reassembly of one message body across its chunks.
struct Assembly {
    header: MessageHeader,
    body: Vec<u8>,
    filled: usize,
    /// Payload bytes left in the chunk currently being copied.
    chunk_remaining: usize,
    /// Chunk size the message was started under; a mid-stream SetChunkSize
    /// only applies to the next message.
    chunk_size: usize,
    cont: Continuation,
}

/// Between-chunk bytes stripped during reassembly: the 1-byte fmt=3 basic
/// header and, for extended-timestamp messages, the repeated 4-byte
/// timestamp trailer.
enum Continuation {
    None,
    Marker,
    Ext { got: usize, buf: [u8; 4] },
}

impl Assembly {
    fn new(header: MessageHeader, chunk_size: u32) -> Self {
        let body_size = header.body_size as usize;
        let chunk_size = chunk_size.max(1) as usize;
        Assembly {
            header,
            body: vec![0u8; body_size],
            filled: 0,
            chunk_remaining: chunk_size.min(body_size),
            chunk_size,
            cont: Continuation::None,
        }
    }
}

enum Stage {
    BasicHeader,
    FixedHeader {
        fmt: u8,
        csid: u8,
        got: usize,
        buf: [u8; 11],
    },
    ExtendedTimestamp {
        pending: PendingHeader,
        got: usize,
        buf: [u8; 4],
    },
    Payload(Assembly),
}

/// Reads one complete message at a time from a chunked byte stream,
/// stitching multi-chunk payloads together under the negotiated chunk size.
///
/// The reader is restartable: when the byte source drains mid-element it
/// fails with `NotEnoughData` and keeps the decode state (current header,
/// payload buffer, and write offset), so the caller can retry once more
/// bytes arrive. Header context is tracked per chunk stream id, so
/// interleaved chunk streams do not corrupt each other.
pub struct MessageReader {
    chunk_size: u32,
    last_headers: HashMap<u8, MessageHeader>,
    stage: Stage,
}

impl MessageReader {
    pub fn new() -> Self {
        MessageReader {
            chunk_size: DEFAULT_CHUNK_SIZE,
            last_headers: HashMap::new(),
            stage: Stage::BasicHeader,
        }
    }

    /// Applies to the next message read; a message already in flight
    /// completes under the size it was started with.
    pub fn set_chunk_size(&mut self, chunk_size: u32) {
        self.chunk_size = chunk_size.max(1);
    }

    /// Last fully-reconstructed header for a chunk stream, if any chunk has
    /// arrived on it.
    pub fn last_header(&self, csid: u8) -> Option<&MessageHeader> {
        self.last_headers.get(&csid)
    }

    pub async fn read_message<R>(&mut self, reader: &mut R) -> Result<Message, RtmpError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let stage = std::mem::replace(&mut self.stage, Stage::BasicHeader);
            match stage {
                Stage::BasicHeader => {
                    let mut byte = [0u8; 1];
                    match reader.read(&mut byte).await {
                        Ok(0) => return Err(RtmpError::NotEnoughData),
                        Ok(_) => {}
                        Err(e) => return Err(e.into()),
                    }
                    let fmt = byte[0] >> 6;
                    let csid = byte[0] & 0x3f;
                    self.stage = Stage::FixedHeader {
                        fmt,
                        csid,
                        got: 0,
                        buf: [0u8; 11],
                    };
                }
                Stage::FixedHeader {
                    fmt,
                    csid,
                    mut got,
                    mut buf,
                } => {
                    let need = fixed_header_len(fmt);
                    while got < need {
                        match reader.read(&mut buf[got..need]).await {
                            Ok(0) => {
                                self.stage = Stage::FixedHeader { fmt, csid, got, buf };
                                return Err(RtmpError::NotEnoughData);
                            }
                            Ok(n) => got += n,
                            Err(e) => {
                                self.stage = Stage::FixedHeader { fmt, csid, got, buf };
                                return Err(e.into());
                            }
                        }
                    }
                    match self.parse_fixed_header(fmt, csid, &buf[..need])? {
                        Parsed::Header(header) => self.begin_payload(header),
                        Parsed::NeedsExtended(pending) => {
                            self.stage = Stage::ExtendedTimestamp {
                                pending,
                                got: 0,
                                buf: [0u8; 4],
                            };
                        }
                    }
                }
                Stage::ExtendedTimestamp {
                    pending,
                    mut got,
                    mut buf,
                } => {
                    while got < 4 {
                        match reader.read(&mut buf[got..4]).await {
                            Ok(0) => {
                                self.stage = Stage::ExtendedTimestamp { pending, got, buf };
                                return Err(RtmpError::NotEnoughData);
                            }
                            Ok(n) => got += n,
                            Err(e) => {
                                self.stage = Stage::ExtendedTimestamp { pending, got, buf };
                                return Err(e.into());
                            }
                        }
                    }
                    let header = pending.finalize(BigEndian::read_u32(&buf));
                    self.begin_payload(header);
                }
                Stage::Payload(mut asm) => {
                    loop {
                        if asm.chunk_remaining == 0 {
                            if asm.filled == asm.body.len() {
                                self.stage = Stage::BasicHeader;
                                return Ok(Message {
                                    header: asm.header,
                                    payload: asm.body,
                                });
                            }
                            match asm.cont {
                                Continuation::None => {
                                    asm.cont = Continuation::Marker;
                                }
                                Continuation::Marker => {
                                    let mut byte = [0u8; 1];
                                    match reader.read(&mut byte).await {
                                        Ok(0) => {
                                            self.stage = Stage::Payload(asm);
                                            return Err(RtmpError::NotEnoughData);
                                        }
                                        Ok(_) => {}
                                        Err(e) => {
                                            self.stage = Stage::Payload(asm);
                                            return Err(e.into());
                                        }
                                    }
                                    if asm.header.extended_timestamp {
                                        asm.cont = Continuation::Ext {
                                            got: 0,
                                            buf: [0u8; 4],
                                        };
                                    } else {
                                        asm.cont = Continuation::None;
                                        asm.chunk_remaining =
                                            asm.chunk_size.min(asm.body.len() - asm.filled);
                                    }
                                }
                                Continuation::Ext { mut got, mut buf } => {
                                    while got < 4 {
                                        match reader.read(&mut buf[got..4]).await {
                                            Ok(0) => {
                                                asm.cont = Continuation::Ext { got, buf };
                                                self.stage = Stage::Payload(asm);
                                                return Err(RtmpError::NotEnoughData);
                                            }
                                            Ok(n) => got += n,
                                            Err(e) => {
                                                asm.cont = Continuation::Ext { got, buf };
                                                self.stage = Stage::Payload(asm);
                                                return Err(e.into());
                                            }
                                        }
                                    }
                                    // the value repeats the message timestamp
                                    asm.cont = Continuation::None;
                                    asm.chunk_remaining =
                                        asm.chunk_size.min(asm.body.len() - asm.filled);
                                }
                            }
                            continue;
                        }

                        let end = asm.filled + asm.chunk_remaining;
                        match reader.read(&mut asm.body[asm.filled..end]).await {
                            Ok(0) => {
                                self.stage = Stage::Payload(asm);
                                return Err(RtmpError::NotEnoughData);
                            }
                            Ok(n) => {
                                asm.filled += n;
                                asm.chunk_remaining -= n;
                            }
                            Err(e) => {
                                self.stage = Stage::Payload(asm);
                                return Err(e.into());
                            }
                        }
                    }
                }
            }
        }
    }

    fn parse_fixed_header(&self, fmt: u8, csid: u8, buf: &[u8]) -> Result<Parsed, RtmpError> {
        match fmt {
            0 => {
                let timestamp = BigEndian::read_u24(&buf[0..3]);
                let body_size = BigEndian::read_u24(&buf[3..6]);
                let type_id = buf[6];
                let stream_id = BigEndian::read_u32(&buf[7..11]);
                if timestamp == EXTENDED_TIMESTAMP_MARKER {
                    Ok(Parsed::NeedsExtended(PendingHeader {
                        fmt,
                        csid,
                        base_timestamp: 0,
                        body_size,
                        type_id,
                        stream_id,
                    }))
                } else {
                    Ok(Parsed::Header(MessageHeader {
                        csid,
                        timestamp,
                        timestamp_delta: 0,
                        body_size,
                        type_id,
                        stream_id,
                        extended_timestamp: false,
                    }))
                }
            }
            1 => {
                let last = self
                    .last_headers
                    .get(&csid)
                    .ok_or(RtmpError::OtherHeaderTypeExpected)?;
                let delta = BigEndian::read_u24(&buf[0..3]);
                let body_size = BigEndian::read_u24(&buf[3..6]);
                let type_id = buf[6];
                if delta == EXTENDED_TIMESTAMP_MARKER {
                    Ok(Parsed::NeedsExtended(PendingHeader {
                        fmt,
                        csid,
                        base_timestamp: last.timestamp,
                        body_size,
                        type_id,
                        stream_id: last.stream_id,
                    }))
                } else {
                    Ok(Parsed::Header(MessageHeader {
                        csid,
                        timestamp: last.timestamp.wrapping_add(delta),
                        timestamp_delta: delta,
                        body_size,
                        type_id,
                        stream_id: last.stream_id,
                        extended_timestamp: false,
                    }))
                }
            }
            2 => {
                let last = self
                    .last_headers
                    .get(&csid)
                    .ok_or(RtmpError::OtherHeaderTypeExpected)?;
                let delta = BigEndian::read_u24(&buf[0..3]);
                if delta == EXTENDED_TIMESTAMP_MARKER {
                    Ok(Parsed::NeedsExtended(PendingHeader {
                        fmt,
                        csid,
                        base_timestamp: last.timestamp,
                        body_size: last.body_size,
                        type_id: last.type_id,
                        stream_id: last.stream_id,
                    }))
                } else {
                    Ok(Parsed::Header(MessageHeader {
                        csid,
                        timestamp: last.timestamp.wrapping_add(delta),
                        timestamp_delta: delta,
                        body_size: last.body_size,
                        type_id: last.type_id,
                        stream_id: last.stream_id,
                        extended_timestamp: false,
                    }))
                }
            }
            3 => {
                let last = self
                    .last_headers
                    .get(&csid)
                    .ok_or(RtmpError::OtherHeaderTypeExpected)?;
                if last.extended_timestamp {
                    Ok(Parsed::NeedsExtended(PendingHeader {
                        fmt,
                        csid,
                        base_timestamp: last.timestamp,
                        body_size: last.body_size,
                        type_id: last.type_id,
                        stream_id: last.stream_id,
                    }))
                } else {
                    Ok(Parsed::Header(MessageHeader {
                        csid,
                        timestamp: last.timestamp.wrapping_add(last.timestamp_delta),
                        timestamp_delta: last.timestamp_delta,
                        body_size: last.body_size,
                        type_id: last.type_id,
                        stream_id: last.stream_id,
                        extended_timestamp: false,
                    }))
                }
            }
            _ => Err(RtmpError::InvalidHeaderType),
        }
    }

    fn begin_payload(&mut self, header: MessageHeader) {
        self.last_headers.insert(header.csid, header.clone());
        self.stage = Stage::Payload(Assembly::new(header, self.chunk_size));
    }
}

fn push_u24(out: &mut Vec<u8>, value: u32) {
    out.push((value >> 16) as u8);
    out.push((value >> 8) as u8);
    out.push(value as u8);
}

/// Serializes a message as a fmt=0 chunk followed by fmt=3 continuation
/// chunks under the negotiated chunk size.
pub struct MessageWriter {
    chunk_size: u32,
}

impl MessageWriter {
    pub fn new() -> Self {
        MessageWriter {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn set_chunk_size(&mut self, chunk_size: u32) {
        self.chunk_size = chunk_size.max(1);
    }

    pub fn write(&self, message: &Message) -> Vec<u8> {
        let header = &message.header;
        let marked = header.timestamp >= EXTENDED_TIMESTAMP_MARKER;
        let extended = marked || header.extended_timestamp;

        let mut out = Vec::with_capacity(12 + message.payload.len());
        out.push(header.csid & 0x3f); // fmt = 0
        push_u24(
            &mut out,
            if marked {
                EXTENDED_TIMESTAMP_MARKER
            } else {
                header.timestamp
            },
        );
        push_u24(&mut out, header.body_size);
        out.push(header.type_id);
        out.extend_from_slice(&header.stream_id.to_be_bytes());
        if marked {
            out.extend_from_slice(&header.timestamp.to_be_bytes());
        }

        for (i, chunk) in message.payload.chunks(self.chunk_size as usize).enumerate() {
            if i > 0 {
                out.push(0b1100_0000 | (header.csid & 0x3f));
                if extended {
                    out.extend_from_slice(&header.timestamp.to_be_bytes());
                }
            }
            out.extend_from_slice(chunk);
        }
        out
    }
}
