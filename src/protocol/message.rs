use byteorder::{BigEndian, ByteOrder};
use num::FromPrimitive;

use crate::error::RtmpError;
use crate::protocol::amf0::{self, Value};
use crate::protocol::chunk::Message;

#[derive(Debug, PartialEq, FromPrimitive, Clone, Copy)]
pub enum MessageType {
    SetChunkSize = 1,
    AbortMessage = 2,
    Acknowledgement = 3,
    UserControlMessage = 4,
    WindowAcknowledgementSize = 5,
    SetPeerBandwidth = 6,
    AudioMessage = 8,
    VideoMessage = 9,
    AMF3DataMessage = 15,
    AMF3SharedObjectMessage = 16,
    AMF3CommandMessage = 17,
    AMF0DataMessage = 18,
    AMF0SharedObjectMessage = 19,
    AMF0CommandMessage = 20,
    AggregateMessage = 22,
}

pub fn message_type_desc(type_id: u8) -> &'static str {
    match type_id {
        1 => "ProtocolControlMessages::SetChunkSize",
        2 => "ProtocolControlMessages::AbortMessage",
        3 => "ProtocolControlMessages::Acknowledgement",
        4 => "ProtocolControlMessages::UserControlMessage",
        5 => "ProtocolControlMessages::WindowAcknowledgementSize",
        6 => "ProtocolControlMessages::SetPeerBandwidth",
        8 => "CommandMessages::AudioMessage",
        9 => "CommandMessages::VideoMessage",
        15 => "CommandMessages::AMF3DataMessage",
        16 => "CommandMessages::AMF3SharedObjectMessage",
        17 => "CommandMessages::AMF3CommandMessage",
        18 => "CommandMessages::AMF0DataMessage",
        19 => "CommandMessages::AMF0SharedObjectMessage",
        20 => "CommandMessages::AMF0CommandMessage",
        22 => "CommandMessages::AggregateMessage",
        _ => "UnknownMessage",
    }
}

/// Outbound framing: the payload bytes plus the wire type byte the chunk
/// writer should stamp on the message header.
pub trait MessageSerialize: Send + Sync {
    fn type_id(&self) -> u8;
    fn serialize(&self) -> Vec<u8>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetChunkSizeMessage {
    pub chunk_size: u32,
}

impl SetChunkSizeMessage {
    pub fn deserialize(data: &[u8]) -> Result<Self, RtmpError> {
        if data.len() != 4 {
            return Err(RtmpError::InvalidMessageFormat);
        }
        // the high bit is reserved
        Ok(SetChunkSizeMessage {
            chunk_size: BigEndian::read_u32(data) & 0x7fff_ffff,
        })
    }
}

impl MessageSerialize for SetChunkSizeMessage {
    fn type_id(&self) -> u8 {
        MessageType::SetChunkSize as u8
    }

    fn serialize(&self) -> Vec<u8> {
        let mut payload = self.chunk_size.to_be_bytes().to_vec();
        payload[0] &= 0x7f;
        payload
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserControlMessage {
    pub event_type: u16,
    pub data: Vec<u8>,
}

impl UserControlMessage {
    pub fn deserialize(data: &[u8]) -> Result<Self, RtmpError> {
        if data.len() < 2 {
            return Err(RtmpError::InvalidMessageFormat);
        }
        Ok(UserControlMessage {
            event_type: BigEndian::read_u16(&data[0..2]),
            data: data[2..].to_vec(),
        })
    }
}

impl MessageSerialize for UserControlMessage {
    fn type_id(&self) -> u8 {
        MessageType::UserControlMessage as u8
    }

    fn serialize(&self) -> Vec<u8> {
        let mut payload = self.event_type.to_be_bytes().to_vec();
        payload.extend_from_slice(&self.data);
        payload
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowAckSizeMessage {
    pub size: u32,
}

impl WindowAckSizeMessage {
    pub fn deserialize(data: &[u8]) -> Result<Self, RtmpError> {
        if data.len() != 4 {
            return Err(RtmpError::InvalidMessageFormat);
        }
        Ok(WindowAckSizeMessage {
            size: BigEndian::read_u32(data),
        })
    }
}

impl MessageSerialize for WindowAckSizeMessage {
    fn type_id(&self) -> u8 {
        MessageType::WindowAcknowledgementSize as u8
    }

    fn serialize(&self) -> Vec<u8> {
        self.size.to_be_bytes().to_vec()
    }
}

/// Limit types: 0 = hard, 1 = soft, 2 = dynamic.
#[derive(Debug, Clone, PartialEq)]
pub struct SetPeerBandwidthMessage {
    pub size: u32,
    pub limit_type: u8,
}

impl SetPeerBandwidthMessage {
    pub fn deserialize(data: &[u8]) -> Result<Self, RtmpError> {
        if data.len() != 5 {
            return Err(RtmpError::InvalidMessageFormat);
        }
        Ok(SetPeerBandwidthMessage {
            size: BigEndian::read_u32(&data[0..4]),
            limit_type: data[4],
        })
    }
}

impl MessageSerialize for SetPeerBandwidthMessage {
    fn type_id(&self) -> u8 {
        MessageType::SetPeerBandwidth as u8
    }

    fn serialize(&self) -> Vec<u8> {
        let mut payload = self.size.to_be_bytes().to_vec();
        payload.push(self.limit_type);
        payload
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectCommand {
    pub tx_id: f64,
    pub app: String,
    pub type_: String,
    pub flash_ver: String,
    pub tc_url: String,
    pub supports_go_away: bool,
}

impl ConnectCommand {
    pub fn deserialize(values: &[Value]) -> Result<Self, RtmpError> {
        if values.len() != 3 || values[0].try_as_str() != Some("connect") {
            return Err(RtmpError::InvalidMessageFormat);
        }
        let tx_id = values[1]
            .try_as_f64()
            .ok_or(RtmpError::InvalidMessageFormat)?;
        let properties = match &values[2] {
            Value::Object(_) => &values[2],
            _ => return Err(RtmpError::InvalidMessageFormat),
        };

        let text = |key: &str| {
            properties
                .get(key)
                .and_then(Value::try_as_str)
                .unwrap_or_default()
                .to_string()
        };

        Ok(ConnectCommand {
            tx_id,
            app: text("app"),
            type_: text("type"),
            flash_ver: text("flashVer"),
            tc_url: text("tcUrl"),
            supports_go_away: properties
                .get("supportsGoAway")
                .and_then(Value::try_as_bool)
                .unwrap_or_default(),
        })
    }
}

impl MessageSerialize for ConnectCommand {
    fn type_id(&self) -> u8 {
        MessageType::AMF0CommandMessage as u8
    }

    fn serialize(&self) -> Vec<u8> {
        amf0::encode_all(&[
            Value::String("connect".to_string()),
            Value::Number(self.tx_id),
            Value::Object(vec![
                amf0::Pair::new("app", Value::String(self.app.clone())),
                amf0::Pair::new("type", Value::String(self.type_.clone())),
                amf0::Pair::new("flashVer", Value::String(self.flash_ver.clone())),
                amf0::Pair::new("tcUrl", Value::String(self.tc_url.clone())),
                amf0::Pair::new("supportsGoAway", Value::Boolean(self.supports_go_away)),
            ]),
        ])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseStreamCommand {
    pub tx_id: f64,
    pub stream_key: String,
}

impl ReleaseStreamCommand {
    pub fn deserialize(values: &[Value]) -> Result<Self, RtmpError> {
        if values.len() != 4 || values[0].try_as_str() != Some("releaseStream") {
            return Err(RtmpError::InvalidMessageFormat);
        }
        Ok(ReleaseStreamCommand {
            tx_id: values[1]
                .try_as_f64()
                .ok_or(RtmpError::InvalidMessageFormat)?,
            stream_key: values[3]
                .try_as_str()
                .ok_or(RtmpError::InvalidMessageFormat)?
                .to_string(),
        })
    }
}

impl MessageSerialize for ReleaseStreamCommand {
    fn type_id(&self) -> u8 {
        MessageType::AMF0CommandMessage as u8
    }

    fn serialize(&self) -> Vec<u8> {
        amf0::encode_all(&[
            Value::String("releaseStream".to_string()),
            Value::Number(self.tx_id),
            Value::Null,
            Value::String(self.stream_key.clone()),
        ])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FcPublishCommand {
    pub tx_id: f64,
    pub stream_key: String,
}

impl FcPublishCommand {
    pub fn deserialize(values: &[Value]) -> Result<Self, RtmpError> {
        if values.len() != 4 || values[0].try_as_str() != Some("FCPublish") {
            return Err(RtmpError::InvalidMessageFormat);
        }
        Ok(FcPublishCommand {
            tx_id: values[1]
                .try_as_f64()
                .ok_or(RtmpError::InvalidMessageFormat)?,
            stream_key: values[3]
                .try_as_str()
                .ok_or(RtmpError::InvalidMessageFormat)?
                .to_string(),
        })
    }
}

impl MessageSerialize for FcPublishCommand {
    fn type_id(&self) -> u8 {
        MessageType::AMF0CommandMessage as u8
    }

    fn serialize(&self) -> Vec<u8> {
        amf0::encode_all(&[
            Value::String("FCPublish".to_string()),
            Value::Number(self.tx_id),
            Value::Null,
            Value::String(self.stream_key.clone()),
        ])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateStreamCommand {
    pub tx_id: f64,
}

impl CreateStreamCommand {
    pub fn deserialize(values: &[Value]) -> Result<Self, RtmpError> {
        if values.len() != 3 || values[0].try_as_str() != Some("createStream") {
            return Err(RtmpError::InvalidMessageFormat);
        }
        Ok(CreateStreamCommand {
            tx_id: values[1]
                .try_as_f64()
                .ok_or(RtmpError::InvalidMessageFormat)?,
        })
    }
}

impl MessageSerialize for CreateStreamCommand {
    fn type_id(&self) -> u8 {
        MessageType::AMF0CommandMessage as u8
    }

    fn serialize(&self) -> Vec<u8> {
        amf0::encode_all(&[
            Value::String("createStream".to_string()),
            Value::Number(self.tx_id),
            Value::Null,
        ])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishCommand {
    pub tx_id: f64,
    pub stream_key: String,
    pub publish_type: String,
}

impl PublishCommand {
    pub fn deserialize(values: &[Value]) -> Result<Self, RtmpError> {
        if values.len() != 5 || values[0].try_as_str() != Some("publish") {
            return Err(RtmpError::InvalidMessageFormat);
        }
        Ok(PublishCommand {
            tx_id: values[1]
                .try_as_f64()
                .ok_or(RtmpError::InvalidMessageFormat)?,
            stream_key: values[3]
                .try_as_str()
                .ok_or(RtmpError::InvalidMessageFormat)?
                .to_string(),
            publish_type: values[4]
                .try_as_str()
                .ok_or(RtmpError::InvalidMessageFormat)?
                .to_string(),
        })
    }
}

impl MessageSerialize for PublishCommand {
    fn type_id(&self) -> u8 {
        MessageType::AMF0CommandMessage as u8
    }

    fn serialize(&self) -> Vec<u8> {
        amf0::encode_all(&[
            Value::String("publish".to_string()),
            Value::Number(self.tx_id),
            Value::Null,
            Value::String(self.stream_key.clone()),
            Value::String(self.publish_type.clone()),
        ])
    }
}

/// The onMetaData record published on the data channel right after a
/// successful publish.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetDataFrameMessage {
    pub encoder: String,
    pub duration: f64,
    pub file_size: f64,
    pub width: f64,
    pub height: f64,
    pub video_codec_id: f64,
    pub video_data_rate: f64,
    pub frame_rate: f64,
    pub audio_codec_id: f64,
    pub audio_sample_rate: f64,
    pub audio_sample_size: f64,
    pub stereo: bool,
}

impl SetDataFrameMessage {
    /// Encoders disagree on the shape: most send
    /// `["@setDataFrame", "onMetaData", array]`, some drop the event name.
    pub fn deserialize(values: &[Value]) -> Result<Self, RtmpError> {
        let record = match values {
            [name, event, record]
                if name.try_as_str() == Some("@setDataFrame")
                    && event.try_as_str() == Some("onMetaData") =>
            {
                record
            }
            [name, record] if name.try_as_str() == Some("@setDataFrame") => record,
            _ => return Err(RtmpError::InvalidMessageFormat),
        };

        let entries = match record {
            Value::EcmaArray(entries) | Value::Object(entries) => entries,
            _ => return Err(RtmpError::InvalidMessageFormat),
        };

        let mut msg = SetDataFrameMessage::default();
        for entry in entries {
            let number = entry.value.try_as_f64().unwrap_or_default();
            match entry.key.as_str() {
                "encoder" => {
                    msg.encoder = entry.value.try_as_str().unwrap_or_default().to_string()
                }
                "duration" => msg.duration = number,
                "filesize" => msg.file_size = number,
                "width" => msg.width = number,
                "height" => msg.height = number,
                "videocodecid" => msg.video_codec_id = number,
                "videodatarate" => msg.video_data_rate = number,
                "framerate" => msg.frame_rate = number,
                "audiocodecid" => msg.audio_codec_id = number,
                "audiosamplerate" => msg.audio_sample_rate = number,
                "audiosamplesize" => msg.audio_sample_size = number,
                "stereo" => msg.stereo = entry.value.try_as_bool().unwrap_or_default(),
                _ => {}
            }
        }
        Ok(msg)
    }
}

impl MessageSerialize for SetDataFrameMessage {
    fn type_id(&self) -> u8 {
        MessageType::AMF0DataMessage as u8
    }

    fn serialize(&self) -> Vec<u8> {
        amf0::encode_all(&[
            Value::String("@setDataFrame".to_string()),
            Value::String("onMetaData".to_string()),
            Value::EcmaArray(vec![
                amf0::Pair::new("encoder", Value::String(self.encoder.clone())),
                amf0::Pair::new("duration", Value::Number(self.duration)),
                amf0::Pair::new("filesize", Value::Number(self.file_size)),
                amf0::Pair::new("width", Value::Number(self.width)),
                amf0::Pair::new("height", Value::Number(self.height)),
                amf0::Pair::new("videocodecid", Value::Number(self.video_codec_id)),
                amf0::Pair::new("videodatarate", Value::Number(self.video_data_rate)),
                amf0::Pair::new("framerate", Value::Number(self.frame_rate)),
                amf0::Pair::new("audiocodecid", Value::Number(self.audio_codec_id)),
                amf0::Pair::new("audiosamplerate", Value::Number(self.audio_sample_rate)),
                amf0::Pair::new("audiosamplesize", Value::Number(self.audio_sample_size)),
                amf0::Pair::new("stereo", Value::Boolean(self.stereo)),
            ]),
        ])
    }
}

/// Free-form command, used for the server's `_result`/`onStatus` style
/// responses: `[name, txId | null, properties...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnonymousMessage {
    pub name: String,
    pub tx_id: Option<f64>,
    pub properties: Vec<Value>,
}

impl AnonymousMessage {
    pub fn from_values(values: &[Value]) -> Result<Self, RtmpError> {
        if values.len() < 2 {
            return Err(RtmpError::InvalidMessageFormat);
        }
        let name = values[0]
            .try_as_str()
            .ok_or(RtmpError::InvalidMessageFormat)?
            .to_string();
        let tx_id = match &values[1] {
            Value::Number(n) => Some(*n),
            Value::Null => None,
            _ => return Err(RtmpError::InvalidMessageFormat),
        };
        Ok(AnonymousMessage {
            name,
            tx_id,
            properties: values[2..].to_vec(),
        })
    }
}

impl MessageSerialize for AnonymousMessage {
    fn type_id(&self) -> u8 {
        MessageType::AMF0CommandMessage as u8
    }

    fn serialize(&self) -> Vec<u8> {
        let mut values = vec![
            Value::String(self.name.clone()),
            match self.tx_id {
                Some(tx_id) => Value::Number(tx_id),
                None => Value::Null,
            },
        ];
        values.extend(self.properties.iter().cloned());
        amf0::encode_all(&values)
    }
}

/// A parsed control, command, or media message.
#[derive(Debug, Clone, PartialEq)]
pub enum RtmpMessage {
    SetChunkSize(SetChunkSizeMessage),
    UserControl(UserControlMessage),
    WindowAckSize(WindowAckSizeMessage),
    SetPeerBandwidth(SetPeerBandwidthMessage),
    Audio(Vec<u8>),
    Video(Vec<u8>),
    Connect(ConnectCommand),
    ReleaseStream(ReleaseStreamCommand),
    FcPublish(FcPublishCommand),
    CreateStream(CreateStreamCommand),
    Publish(PublishCommand),
    SetDataFrame(SetDataFrameMessage),
}

pub fn parse_message(message: &Message) -> Result<RtmpMessage, RtmpError> {
    let message_type =
        MessageType::from_u8(message.header.type_id).ok_or(RtmpError::InvalidHeaderType)?;

    match message_type {
        MessageType::SetChunkSize => Ok(RtmpMessage::SetChunkSize(
            SetChunkSizeMessage::deserialize(&message.payload)?,
        )),
        MessageType::UserControlMessage => Ok(RtmpMessage::UserControl(
            UserControlMessage::deserialize(&message.payload)?,
        )),
        MessageType::WindowAcknowledgementSize => Ok(RtmpMessage::WindowAckSize(
            WindowAckSizeMessage::deserialize(&message.payload)?,
        )),
        MessageType::SetPeerBandwidth => Ok(RtmpMessage::SetPeerBandwidth(
            SetPeerBandwidthMessage::deserialize(&message.payload)?,
        )),
        MessageType::AudioMessage => Ok(RtmpMessage::Audio(message.payload.clone())),
        MessageType::VideoMessage => Ok(RtmpMessage::Video(message.payload.clone())),
        MessageType::AMF0DataMessage | MessageType::AMF0CommandMessage => {
            parse_amf_message(&message.payload)
        }
        _ => Err(RtmpError::InvalidHeaderType),
    }
}

/// Every AMF command payload is a flat `[name, txId, args...]` sequence;
/// dispatch is by the leading name.
fn parse_amf_message(payload: &[u8]) -> Result<RtmpMessage, RtmpError> {
    let values = amf0::decode_all(payload)?;
    let name = values
        .get(0)
        .and_then(Value::try_as_str)
        .ok_or(RtmpError::InvalidMessageFormat)?;

    match name {
        "connect" => Ok(RtmpMessage::Connect(ConnectCommand::deserialize(&values)?)),
        "releaseStream" => Ok(RtmpMessage::ReleaseStream(ReleaseStreamCommand::deserialize(
            &values,
        )?)),
        "FCPublish" => Ok(RtmpMessage::FcPublish(FcPublishCommand::deserialize(&values)?)),
        "createStream" => Ok(RtmpMessage::CreateStream(CreateStreamCommand::deserialize(
            &values,
        )?)),
        "publish" => Ok(RtmpMessage::Publish(PublishCommand::deserialize(&values)?)),
        "@setDataFrame" => Ok(RtmpMessage::SetDataFrame(SetDataFrameMessage::deserialize(
            &values,
        )?)),
        _ => Err(RtmpError::InvalidMessageFormat),
    }
}
