use std::future::Future;
use std::io::Write;

use chrono::Local;
use rand::RngCore;

pub fn init_logger() {
    let env = env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info");
    env_logger::Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                buf.default_styled_level(record.level()),
                &record.args()
            )
        })
        .init();
    log::info!("env_logger initialized.");
}

/// Spawn a detached task; an `Err` outcome is logged instead of dropped.
pub fn spawn_and_log_error<F>(fut: F)
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    smol::spawn(async move {
        if let Err(e) = fut.await {
            log::error!("{:?}", e);
        }
    })
    .detach();
}

pub fn gen_random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Hex dump with an ascii gutter, 16 bytes per row.
pub fn bytes_hex_format(bytes: &[u8]) -> String {
    const WIDTH: usize = 16;
    let mut text = String::new();
    for row in bytes.chunks(WIDTH) {
        for (i, byte) in row.iter().enumerate() {
            text += &format!("{:02X} ", byte);
            if i % 8 == 7 {
                text.push(' ');
            }
        }
        for i in row.len()..WIDTH {
            text += "   ";
            if i % 8 == 7 {
                text.push(' ');
            }
        }
        text.push(' ');
        for byte in row {
            if byte.is_ascii_graphic() {
                text.push(*byte as char);
            } else {
                text.push('.');
            }
        }
        text.push('\n');
    }
    text
}

/// MSB-first big-endian bit reader over a fixed byte slice.
///
/// No read ever returns partial data: a request for more bits than remain
/// fails without consuming anything.
pub struct BitReader<'a> {
    data: &'a [u8],
    bits_read: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader { data, bits_read: 0 }
    }

    /// Read up to 64 bits into an unsigned integer. `bits == 0` is a no-op
    /// yielding `Some(0)`.
    pub fn read_bits(&mut self, bits: usize) -> Option<u64> {
        assert!(bits <= 64, "at most 64 bits can be read at once");
        if bits > self.bits_available() {
            return None;
        }

        let mut value = 0u64;
        let mut remaining = bits;
        while remaining > 0 {
            let byte = self.data[self.bits_read / 8];
            let offset = self.bits_read % 8;
            let take = (8 - offset).min(remaining);
            let chunk = ((byte << offset) as u8) >> (8 - take);
            value = (value << take) | chunk as u64;
            self.bits_read += take;
            remaining -= take;
        }
        Some(value)
    }

    pub fn skip_bits(&mut self, bits: usize) -> bool {
        if bits > self.bits_available() {
            return false;
        }
        self.bits_read += bits;
        true
    }

    /// Byte-aligned copy of `out.len()` bytes. Fails when the reader sits
    /// mid-byte or fewer than `8 * out.len()` bits remain.
    pub fn read_slice(&mut self, out: &mut [u8]) -> bool {
        if self.bits_read % 8 != 0 || 8 * out.len() > self.bits_available() {
            return false;
        }
        let start = self.bits_read / 8;
        out.copy_from_slice(&self.data[start..start + out.len()]);
        self.bits_read += 8 * out.len();
        true
    }

    pub fn bits_available(&self) -> usize {
        8 * self.data.len() - self.bits_read
    }
}
