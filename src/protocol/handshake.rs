use futures::{AsyncRead, AsyncReadExt};

use crate::error::RtmpError;
use crate::util::gen_random_bytes;

/// Values 0-2 are deprecated, 4-31 reserved, 32-255 disallowed so RTMP can
/// be told apart from text-based protocols.
pub const RTMP_VERSION: u8 = 0x03;

/// C1/S1/C2/S2 are all 1536 bytes of opaque data.
pub const HANDSHAKE_PACKET_LENGTH: usize = 1536;

/// Server side of the three-roundtrip handshake: receive C0||C1, send
/// S0||S1, receive C2 (which must echo S1 verbatim), send S2 = C1.
///
/// Any failed step is fatal for the connection.
pub struct Handshake {
    c1: Vec<u8>,
    s1: Vec<u8>,
}

impl Handshake {
    pub fn new() -> Self {
        Handshake {
            c1: Vec::new(),
            s1: Vec::new(),
        }
    }

    pub async fn receive_c0_c1<R>(&mut self, reader: &mut R) -> Result<(), RtmpError>
    where
        R: AsyncRead + Unpin,
    {
        let mut payload = vec![0u8; 1 + HANDSHAKE_PACKET_LENGTH];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(eof_to_not_enough_data)?;

        if payload[0] != RTMP_VERSION {
            return Err(RtmpError::InvalidHandshake);
        }

        self.c1 = payload.split_off(1);
        Ok(())
    }

    /// S0 is the protocol version, S1 locally-generated random bytes kept
    /// around to verify C2 against.
    pub fn generate_s0_s1(&mut self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + HANDSHAKE_PACKET_LENGTH);
        buf.push(RTMP_VERSION);
        buf.extend_from_slice(&gen_random_bytes(HANDSHAKE_PACKET_LENGTH));

        self.s1 = buf[1..].to_vec();
        buf
    }

    pub async fn receive_c2<R>(&mut self, reader: &mut R) -> Result<(), RtmpError>
    where
        R: AsyncRead + Unpin,
    {
        let mut c2 = vec![0u8; HANDSHAKE_PACKET_LENGTH];
        reader
            .read_exact(&mut c2)
            .await
            .map_err(eof_to_not_enough_data)?;

        if c2 != self.s1 {
            return Err(RtmpError::InvalidHandshake);
        }

        Ok(())
    }

    pub fn s2(&self) -> &[u8] {
        &self.c1
    }
}

fn eof_to_not_enough_data(e: std::io::Error) -> RtmpError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        RtmpError::NotEnoughData
    } else {
        RtmpError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_c0_c1_and_echoes_it_as_s2() {
        smol::block_on(async {
            let c1 = gen_random_bytes(HANDSHAKE_PACKET_LENGTH);
            let mut payload = vec![RTMP_VERSION];
            payload.extend_from_slice(&c1);

            let mut handshake = Handshake::new();
            let mut source: &[u8] = &payload;
            handshake.receive_c0_c1(&mut source).await.unwrap();
            assert_eq!(handshake.s2(), &c1[..]);
        });
    }

    #[test]
    fn rejects_unknown_version() {
        smol::block_on(async {
            let mut payload = vec![0x06];
            payload.extend_from_slice(&[0u8; HANDSHAKE_PACKET_LENGTH]);

            let mut handshake = Handshake::new();
            let mut source: &[u8] = &payload;
            assert!(matches!(
                handshake.receive_c0_c1(&mut source).await,
                Err(RtmpError::InvalidHandshake)
            ));
        });
    }

    #[test]
    fn short_c0_c1_is_not_enough_data() {
        smol::block_on(async {
            let payload = vec![RTMP_VERSION; 100];

            let mut handshake = Handshake::new();
            let mut source: &[u8] = &payload;
            assert!(matches!(
                handshake.receive_c0_c1(&mut source).await,
                Err(RtmpError::NotEnoughData)
            ));
        });
    }

    #[test]
    fn generates_versioned_s0_s1() {
        let mut handshake = Handshake::new();
        let s0s1 = handshake.generate_s0_s1();
        assert_eq!(s0s1.len(), 1 + HANDSHAKE_PACKET_LENGTH);
        assert_eq!(s0s1[0], RTMP_VERSION);
    }

    #[test]
    fn verifies_c2_against_s1() {
        smol::block_on(async {
            let mut handshake = Handshake::new();
            let s0s1 = handshake.generate_s0_s1();

            // a well-behaved client echoes S1 verbatim
            let mut source: &[u8] = &s0s1[1..];
            handshake.receive_c2(&mut source).await.unwrap();

            // any mismatch closes the connection
            let mut tampered = s0s1[1..].to_vec();
            tampered[0] ^= 0xff;
            let mut source: &[u8] = &tampered;
            assert!(matches!(
                handshake.receive_c2(&mut source).await,
                Err(RtmpError::InvalidHandshake)
            ));
        });
    }
}
