use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::AsyncWriteExt;
use num::FromPrimitive;
use smol::net::TcpStream;

use crate::error::RtmpError;
use crate::protocol::aac;
use crate::protocol::amf0::{Pair, Value};
use crate::protocol::chunk::{Message, MessageHeader, MessageReader, MessageWriter};
use crate::protocol::flv::{self, FlvWrapper};
use crate::protocol::handshake::Handshake;
use crate::protocol::message::{
    self, AnonymousMessage, MessageSerialize, MessageType, RtmpMessage, SetChunkSizeMessage,
    SetDataFrameMessage, SetPeerBandwidthMessage, UserControlMessage, WindowAckSizeMessage,
};
use crate::server::ServerConfig;
use crate::sink::{MediaEvent, MediaSink};
use crate::util::bytes_hex_format;

/// Protocol control messages go out on chunk stream 2, command responses
/// on chunk stream 3.
pub const CONTROL_CHUNK_STREAM_ID: u8 = 2;
pub const RESPONSE_CHUNK_STREAM_ID: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionPhase {
    HandshakePending,
    Initializing,
    Authorizing,
    AwaitingMetadata,
    Streaming,
    Closed,
}

/// Embedder hooks. Both may be called concurrently from multiple
/// connection tasks.
pub struct SessionCallbacks {
    pub on_authorize: Box<dyn Fn(&str) -> bool + Send + Sync>,
    pub on_set_data_frame: Box<dyn Fn(&SetDataFrameMessage) -> bool + Send + Sync>,
}

impl Default for SessionCallbacks {
    fn default() -> Self {
        SessionCallbacks {
            on_authorize: Box::new(|_| true),
            on_set_data_frame: Box::new(|_| true),
        }
    }
}

/// One publisher connection: handshake, connect negotiation, stream-key
/// authorization, metadata exchange, then the streaming loop that feeds
/// the media sink with FLV-framed audio and video.
pub struct Session {
    stream: TcpStream,
    peer_addr: String,
    config: Arc<ServerConfig>,
    callbacks: Arc<SessionCallbacks>,
    sink: MediaSink,
    reader: MessageReader,
    writer: MessageWriter,
    phase: SessionPhase,
    last_tx_id_out: u32,
    window_ack_size: u32,
    peer_bandwidth: u32,
    stream_key: Option<String>,
    flv: Option<FlvWrapper>,
}

impl Session {
    pub fn new(
        stream: TcpStream,
        config: Arc<ServerConfig>,
        callbacks: Arc<SessionCallbacks>,
        sink: MediaSink,
    ) -> Self {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        let mut reader = MessageReader::new();
        let mut writer = MessageWriter::new();
        reader.set_chunk_size(config.initial_chunk_size);
        writer.set_chunk_size(config.initial_chunk_size);
        Session {
            stream,
            peer_addr,
            config,
            callbacks,
            sink,
            reader,
            writer,
            phase: SessionPhase::HandshakePending,
            last_tx_id_out: 1,
            window_ack_size: 0,
            peer_bandwidth: 0,
            stream_key: None,
            flv: None,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        log::info!("[peer={}] new publisher connection", self.peer_addr);

        loop {
            let step = match self.phase {
                SessionPhase::HandshakePending => self.handle_handshake().await,
                SessionPhase::Initializing => self.handle_initialization().await,
                SessionPhase::Authorizing => self.handle_authorization().await,
                SessionPhase::AwaitingMetadata => self.handle_metadata().await,
                SessionPhase::Streaming => self.handle_streaming().await,
                SessionPhase::Closed => {
                    match &self.stream_key {
                        Some(key) => {
                            log::info!("[peer={}] stream {} closed", self.peer_addr, key)
                        }
                        None => log::info!("[peer={}] closing connection", self.peer_addr),
                    }
                    return Ok(());
                }
            };

            match step {
                Ok(next) => self.phase = next,
                Err(err) => {
                    // the source draining during the streaming loop is the
                    // regular end of a publish
                    let drained = err
                        .downcast_ref::<RtmpError>()
                        .map_or(false, RtmpError::is_transient);
                    if drained && self.phase == SessionPhase::Streaming {
                        self.phase = SessionPhase::Closed;
                        continue;
                    }
                    log::error!(
                        "[peer={}] fatal in phase {:?}: {:?}",
                        self.peer_addr,
                        self.phase,
                        err
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn handle_handshake(&mut self) -> anyhow::Result<SessionPhase> {
        let timeout = self.config.read_timeout;
        let mut handshake = Handshake::new();

        with_read_deadline(timeout, handshake.receive_c0_c1(&mut self.stream)).await?;
        log::info!("[peer={}] C0/C1 received", self.peer_addr);

        let s0s1 = handshake.generate_s0_s1();
        self.stream.write_all(&s0s1).await?;
        self.stream.flush().await?;

        with_read_deadline(timeout, handshake.receive_c2(&mut self.stream)).await?;

        self.stream.write_all(handshake.s2()).await?;
        self.stream.flush().await?;
        log::info!("[peer={}] handshake complete", self.peer_addr);

        Ok(SessionPhase::Initializing)
    }

    async fn handle_initialization(&mut self) -> anyhow::Result<SessionPhase> {
        let chunk_size = match self.read_parsed().await? {
            RtmpMessage::SetChunkSize(msg) => msg.chunk_size,
            other => anyhow::bail!("expected SetChunkSize message, got {:?}", other),
        };
        self.reader.set_chunk_size(chunk_size);
        self.writer.set_chunk_size(chunk_size);
        log::info!("[peer={}] chunk size negotiated to {}", self.peer_addr, chunk_size);

        let connect = match self.read_parsed().await? {
            RtmpMessage::Connect(cmd) => cmd,
            other => anyhow::bail!("expected connect command, got {:?}", other),
        };
        log::info!(
            "[peer={}] connect: app={:?} tcUrl={:?} flashVer={:?}",
            self.peer_addr,
            connect.app,
            connect.tc_url,
            connect.flash_ver
        );

        let window_ack_size = self.config.window_ack_size;
        let peer_bandwidth = self.config.peer_bandwidth;
        self.send_message(
            CONTROL_CHUNK_STREAM_ID,
            &WindowAckSizeMessage {
                size: window_ack_size,
            },
        )
        .await?;
        self.send_message(
            CONTROL_CHUNK_STREAM_ID,
            &SetPeerBandwidthMessage {
                size: peer_bandwidth,
                limit_type: 2,
            },
        )
        .await?;
        // Stream Begin for stream 0
        self.send_message(
            CONTROL_CHUNK_STREAM_ID,
            &UserControlMessage {
                event_type: 0,
                data: vec![0x00, 0x00, 0x00, 0x00],
            },
        )
        .await?;
        self.send_message(CONTROL_CHUNK_STREAM_ID, &SetChunkSizeMessage { chunk_size })
            .await?;

        let response = connect_success_response(self.last_tx_id_out as f64);
        self.send_message(RESPONSE_CHUNK_STREAM_ID, &response).await?;
        self.last_tx_id_out += 1;

        self.send_message(RESPONSE_CHUNK_STREAM_ID, &on_bw_done_response())
            .await?;

        let release = match self.read_parsed().await? {
            RtmpMessage::ReleaseStream(cmd) => cmd,
            other => anyhow::bail!("expected releaseStream command, got {:?}", other),
        };
        self.send_message(
            RESPONSE_CHUNK_STREAM_ID,
            &AnonymousMessage {
                name: "_result".to_string(),
                tx_id: Some(release.tx_id),
                properties: vec![],
            },
        )
        .await?;

        match self.read_parsed().await? {
            RtmpMessage::FcPublish(_) => {}
            other => anyhow::bail!("expected FCPublish command, got {:?}", other),
        }
        self.send_message(
            RESPONSE_CHUNK_STREAM_ID,
            &AnonymousMessage {
                name: "onFCPublish".to_string(),
                tx_id: None,
                properties: vec![],
            },
        )
        .await?;

        let create = match self.read_parsed().await? {
            RtmpMessage::CreateStream(cmd) => cmd,
            other => anyhow::bail!("expected createStream command, got {:?}", other),
        };
        // the one stream id this server hands out
        self.send_message(
            RESPONSE_CHUNK_STREAM_ID,
            &AnonymousMessage {
                name: "_result".to_string(),
                tx_id: Some(create.tx_id),
                properties: vec![Value::Number(1.0)],
            },
        )
        .await?;

        Ok(SessionPhase::Authorizing)
    }

    async fn handle_authorization(&mut self) -> anyhow::Result<SessionPhase> {
        let publish = match self.read_parsed().await? {
            RtmpMessage::Publish(cmd) => cmd,
            other => anyhow::bail!("expected publish command, got {:?}", other),
        };
        log::info!(
            "[peer={}] publish request: stream_key={} type={}",
            self.peer_addr,
            publish.stream_key,
            publish.publish_type
        );

        if !(self.callbacks.on_authorize)(&publish.stream_key) {
            log::warn!(
                "[peer={}] stream key {:?} rejected",
                self.peer_addr,
                publish.stream_key
            );
            return Err(RtmpError::Unauthorized.into());
        }

        self.send_message(
            RESPONSE_CHUNK_STREAM_ID,
            &publish_success_response(&publish.stream_key),
        )
        .await?;

        self.sink
            .send(MediaEvent::StreamInfo {
                stream_key: publish.stream_key.clone(),
            })
            .await
            .map_err(|_| anyhow::anyhow!("media sink closed"))?;

        self.stream_key = Some(publish.stream_key);
        Ok(SessionPhase::AwaitingMetadata)
    }

    async fn handle_metadata(&mut self) -> anyhow::Result<SessionPhase> {
        let metadata = match self.read_parsed().await? {
            RtmpMessage::SetDataFrame(msg) => msg,
            other => anyhow::bail!("expected @setDataFrame, got {:?}", other),
        };
        log::info!(
            "[peer={}] onMetaData: encoder={:?} {}x{} framerate={} vcodec={} acodec={}",
            self.peer_addr,
            metadata.encoder,
            metadata.width,
            metadata.height,
            metadata.frame_rate,
            metadata.video_codec_id,
            metadata.audio_codec_id
        );

        if !(self.callbacks.on_set_data_frame)(&metadata) {
            anyhow::bail!("stream metadata rejected");
        }

        let audio_present = metadata.audio_codec_id > 0.0 || metadata.audio_sample_rate > 0.0;
        let video_present = metadata.video_codec_id > 0.0;
        self.flv = Some(FlvWrapper::new(audio_present, video_present));

        Ok(SessionPhase::Streaming)
    }

    async fn handle_streaming(&mut self) -> anyhow::Result<SessionPhase> {
        let message = self.read_message().await?;
        match MessageType::from_u8(message.header.type_id) {
            Some(MessageType::AudioMessage) => {
                self.inspect_audio_header(&message.payload);
                self.forward_media(&message).await?;
            }
            Some(MessageType::VideoMessage) => {
                if flv::is_ext_video_tag(&message.payload) {
                    return Err(RtmpError::ExtFormatUnsupported.into());
                }
                self.forward_media(&message).await?;
            }
            Some(MessageType::SetChunkSize) => {
                let msg = SetChunkSizeMessage::deserialize(&message.payload)?;
                self.reader.set_chunk_size(msg.chunk_size);
                self.writer.set_chunk_size(msg.chunk_size);
                log::info!(
                    "[peer={}] chunk size renegotiated to {}",
                    self.peer_addr,
                    msg.chunk_size
                );
            }
            Some(MessageType::WindowAcknowledgementSize) => {
                self.window_ack_size = WindowAckSizeMessage::deserialize(&message.payload)?.size;
                log::debug!(
                    "[peer={}] window ack size now {}",
                    self.peer_addr,
                    self.window_ack_size
                );
            }
            Some(MessageType::SetPeerBandwidth) => {
                self.peer_bandwidth = SetPeerBandwidthMessage::deserialize(&message.payload)?.size;
                log::debug!(
                    "[peer={}] peer bandwidth now {}",
                    self.peer_addr,
                    self.peer_bandwidth
                );
            }
            Some(MessageType::AMF0CommandMessage) | Some(MessageType::AMF0DataMessage) => {
                log::debug!(
                    "[peer={}] ignoring command while streaming\n{}",
                    self.peer_addr,
                    bytes_hex_format(&message.payload)
                );
            }
            other => {
                log::debug!(
                    "[peer={}] skipping [{}] ({:?}) len={}",
                    self.peer_addr,
                    message::message_type_desc(message.header.type_id),
                    other,
                    message.header.body_size
                );
            }
        }
        Ok(SessionPhase::Streaming)
    }

    /// Log the decoder configuration once, when the AAC sequence header
    /// passes by. Not on the media hot path.
    fn inspect_audio_header(&self, payload: &[u8]) {
        if payload.len() < 3
            || payload[0] >> 4 != flv::SOUND_FORMAT_AAC
            || payload[1] != 0x00
        {
            return;
        }
        match aac::parse_audio_specific_config(&payload[2..]) {
            Ok(format) => log::info!(
                "[peer={}] aac sequence header: {:?}, {} Hz, {} channel(s)",
                self.peer_addr,
                format.profile,
                format.sample_rate,
                format.channels
            ),
            Err(err) => log::warn!(
                "[peer={}] undecodable aac sequence header: {}",
                self.peer_addr,
                err
            ),
        }
    }

    async fn forward_media(&mut self, message: &Message) -> anyhow::Result<()> {
        let wrapper = self
            .flv
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("streaming before metadata"))?;
        let bytes = wrapper.wrap_message(message);
        self.sink
            .send(MediaEvent::StreamData { bytes })
            .await
            .map_err(|_| anyhow::anyhow!("media sink closed"))?;
        Ok(())
    }

    async fn read_message(&mut self) -> Result<Message, RtmpError> {
        let Session {
            stream,
            reader,
            config,
            ..
        } = self;
        with_read_deadline(config.read_timeout, reader.read_message(stream)).await
    }

    async fn read_parsed(&mut self) -> anyhow::Result<RtmpMessage> {
        let message = self.read_message().await?;
        log::debug!(
            "[peer={}] C->S [{}] csid={} msid={} len={}",
            self.peer_addr,
            message::message_type_desc(message.header.type_id),
            message.header.csid,
            message.header.stream_id,
            message.header.body_size
        );
        Ok(message::parse_message(&message)?)
    }

    async fn send_message(
        &mut self,
        csid: u8,
        msg: &dyn MessageSerialize,
    ) -> anyhow::Result<()> {
        let payload = msg.serialize();
        let message = Message {
            header: MessageHeader {
                csid,
                timestamp: 0,
                timestamp_delta: 0,
                body_size: payload.len() as u32,
                type_id: msg.type_id(),
                stream_id: 0,
                extended_timestamp: false,
            },
            payload,
        };
        let bytes = self.writer.write(&message);
        log::debug!(
            "[peer={}] S->C [{}]\n{}",
            self.peer_addr,
            message::message_type_desc(message.header.type_id),
            bytes_hex_format(&bytes)
        );
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

async fn with_read_deadline<T>(
    duration: Duration,
    fut: impl Future<Output = Result<T, RtmpError>>,
) -> Result<T, RtmpError> {
    smol::future::or(fut, async {
        smol::Timer::after(duration).await;
        Err(RtmpError::ReadTimeout)
    })
    .await
}

fn connect_success_response(tx_id: f64) -> AnonymousMessage {
    AnonymousMessage {
        name: "_result".to_string(),
        tx_id: Some(tx_id),
        properties: vec![
            Value::Object(vec![
                Pair::new("fmsVer", Value::String("FMS/3,0,1,123".to_string())),
                Pair::new("capabilities", Value::Number(31.0)),
            ]),
            Value::Object(vec![
                Pair::new("level", Value::String("status".to_string())),
                Pair::new("code", Value::String("NetConnection.Connect.Success".to_string())),
                Pair::new("description", Value::String("Connection succeeded.".to_string())),
                Pair::new("objectEncoding", Value::Number(0.0)),
            ]),
        ],
    }
}

fn on_bw_done_response() -> AnonymousMessage {
    AnonymousMessage {
        name: "onBWDone".to_string(),
        tx_id: Some(0.0),
        properties: vec![Value::Number(8192.0)],
    }
}

fn publish_success_response(stream_key: &str) -> AnonymousMessage {
    AnonymousMessage {
        name: "onStatus".to_string(),
        tx_id: Some(0.0),
        properties: vec![
            Value::Null,
            Value::Object(vec![
                Pair::new("level", Value::String("status".to_string())),
                Pair::new("code", Value::String("NetStream.Publish.Start".to_string())),
                Pair::new(
                    "description",
                    Value::String(format!("{} is published", stream_key)),
                ),
                Pair::new("details", Value::String(stream_key.to_string())),
            ]),
        ],
    }
}
