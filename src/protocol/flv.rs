use crate::protocol::chunk::Message;

pub const SOUND_FORMAT_PCM: u8 = 0;
pub const SOUND_FORMAT_MP3: u8 = 2;
pub const SOUND_FORMAT_G711_ALAW: u8 = 7;
pub const SOUND_FORMAT_G711_MULAW: u8 = 8;
pub const SOUND_FORMAT_AAC: u8 = 10;
pub const SOUND_FORMAT_SPEEX: u8 = 11;

pub const VIDEO_CODEC_SORENSON_H263: u8 = 2;
pub const VIDEO_CODEC_SCREEN_VIDEO: u8 = 3;
pub const VIDEO_CODEC_VP6: u8 = 4;
pub const VIDEO_CODEC_H264: u8 = 7;

/// Sound-format ids 9, 12 and 13 are reserved.
pub fn validate_sound_format(sound_format: u8) -> bool {
    sound_format <= 15 && !matches!(sound_format, 9 | 12 | 13)
}

/// Video codec id 1 is reserved, ids above 7 belong to the extended
/// families.
pub fn validate_video_codec(video_codec: u8) -> bool {
    video_codec <= 7 && video_codec != 1
}

/// True when a video tag carries the enhanced-RTMP flag bit in its
/// frame-type nibble. Those codec families (AV1, VP9, HEVC) are rejected.
pub fn is_ext_video_tag(payload: &[u8]) -> bool {
    payload.get(0).map_or(false, |b| b & 0x80 != 0)
}

/// Frames demultiplexed audio/video messages as an FLV byte stream.
///
/// The first wrapped message is preceded by the 13-byte FLV header
/// (signature, version, presence flags, data offset and the zero-length
/// previous-tag-size). The wrapper is append-only: the header is never
/// re-emitted.
pub struct FlvWrapper {
    header_emitted: bool,
    audio_present: bool,
    video_present: bool,
}

impl FlvWrapper {
    pub fn new(audio_present: bool, video_present: bool) -> Self {
        FlvWrapper {
            header_emitted: false,
            audio_present,
            video_present,
        }
    }

    pub fn wrap_message(&mut self, message: &Message) -> Vec<u8> {
        let mut out = Vec::with_capacity(13 + 11 + message.payload.len() + 4);
        if !self.header_emitted {
            self.write_header(&mut out);
            self.header_emitted = true;
        }
        write_tag(&mut out, message);
        out
    }

    fn write_header(&self, out: &mut Vec<u8>) {
        let mut flags = 0u8;
        if self.audio_present {
            flags |= 0x04;
        }
        if self.video_present {
            flags |= 0x01;
        }
        out.extend_from_slice(&[
            b'F', b'L', b'V', // signature
            0x01, // version
            flags,
            0x00, 0x00, 0x00, 0x09, // data offset
            0x00, 0x00, 0x00, 0x00, // previous tag size 0
        ]);
    }
}

fn write_tag(out: &mut Vec<u8>, message: &Message) {
    let header = &message.header;
    let tag_size = header.body_size + 11;

    out.push(header.type_id);
    out.push((header.body_size >> 16) as u8);
    out.push((header.body_size >> 8) as u8);
    out.push(header.body_size as u8);
    out.push((header.timestamp >> 16) as u8);
    out.push((header.timestamp >> 8) as u8);
    out.push(header.timestamp as u8);
    out.push((header.timestamp >> 24) as u8);
    out.push((header.stream_id >> 16) as u8);
    out.push((header.stream_id >> 8) as u8);
    out.push(header.stream_id as u8);

    out.extend_from_slice(&message.payload);
    out.extend_from_slice(&tag_size.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::chunk::MessageHeader;

    fn media_message(type_id: u8, timestamp: u32, payload: Vec<u8>) -> Message {
        Message {
            header: MessageHeader {
                csid: 4,
                timestamp,
                timestamp_delta: 0,
                body_size: payload.len() as u32,
                type_id,
                stream_id: 0,
                extended_timestamp: false,
            },
            payload,
        }
    }

    #[test]
    fn emits_header_with_presence_flags() {
        let mut wrapper = FlvWrapper::new(true, false);
        let out = wrapper.wrap_message(&media_message(0x08, 0, vec![]));
        assert_eq!(
            &out[..13],
            &[0x46, 0x4c, 0x56, 0x01, 0x04, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x00]
        );

        let mut wrapper = FlvWrapper::new(true, true);
        let out = wrapper.wrap_message(&media_message(0x09, 0, vec![]));
        assert_eq!(out[4], 0x05);
    }

    #[test]
    fn frames_tags_with_split_timestamp() {
        let mut wrapper = FlvWrapper::new(false, true);
        let payload = vec![0x17, 0x01, 0x00, 0x00, 0x00];
        let out = wrapper.wrap_message(&media_message(0x09, 0x01020304, payload.clone()));

        let tag = &out[13..];
        assert_eq!(tag[0], 0x09);
        // 24-bit body size
        assert_eq!(&tag[1..4], &[0x00, 0x00, 0x05]);
        // low timestamp then the extended byte
        assert_eq!(&tag[4..7], &[0x02, 0x03, 0x04]);
        assert_eq!(tag[7], 0x01);
        // stream id
        assert_eq!(&tag[8..11], &[0x00, 0x00, 0x00]);
        assert_eq!(&tag[11..11 + payload.len()], &payload[..]);
        // trailing tag size = 11 + body
        assert_eq!(&tag[11 + payload.len()..], &(11u32 + 5).to_be_bytes());
    }

    #[test]
    fn header_is_never_reemitted() {
        let mut wrapper = FlvWrapper::new(true, true);
        let first = wrapper.wrap_message(&media_message(0x08, 0, vec![0xaf, 0x01]));
        let second = wrapper.wrap_message(&media_message(0x09, 40, vec![0x17]));

        assert_eq!(&first[..3], b"FLV");
        assert_eq!(first.len(), 13 + 11 + 2 + 4);
        // the second call emits exactly one tag
        assert_ne!(&second[..3], b"FLV");
        assert_eq!(second.len(), 11 + 1 + 4);
        assert_eq!(second[0], 0x09);
    }

    #[test]
    fn sound_format_table_excludes_reserved_ids() {
        for id in 0..=15u8 {
            let expected = !matches!(id, 9 | 12 | 13);
            assert_eq!(validate_sound_format(id), expected, "sound format {}", id);
        }
        assert!(!validate_sound_format(16));
        assert!(validate_sound_format(SOUND_FORMAT_AAC));
    }

    #[test]
    fn video_codec_table() {
        assert!(!validate_video_codec(1));
        assert!(validate_video_codec(VIDEO_CODEC_SORENSON_H263));
        assert!(validate_video_codec(VIDEO_CODEC_H264));
        assert!(!validate_video_codec(8));
    }

    #[test]
    fn detects_enhanced_rtmp_flag() {
        assert!(is_ext_video_tag(&[0x97, 0x00]));
        assert!(!is_ext_video_tag(&[0x17, 0x00]));
        assert!(!is_ext_video_tag(&[]));
    }
}
