use clap::{crate_version, Clap};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use regex::Regex;

use weir::server::{RtmpServer, ServerConfig};
use weir::session::SessionCallbacks;
use weir::sink::{media_channel, MediaEvent};
use weir::util::{init_logger, spawn_and_log_error};

/// Keys with a live publisher; duplicates are turned away at authorization.
fn live_streams() -> &'static DashMap<String, ()> {
    static INSTANCE: OnceCell<DashMap<String, ()>> = OnceCell::new();
    INSTANCE.get_or_init(|| DashMap::new())
}

fn stream_key_pattern() -> &'static Regex {
    static INSTANCE: OnceCell<Regex> = OnceCell::new();
    INSTANCE.get_or_init(|| Regex::new("^[0-9A-Za-z_-]{1,64}$").unwrap())
}

#[derive(Clap, Debug)]
#[clap(version = crate_version!())]
struct Opts {
    #[clap(long, default_value = "0.0.0.0")]
    host: String,
    #[clap(long, default_value = "1935")]
    port: u16,
}

fn main() -> anyhow::Result<()> {
    init_logger();

    let opts: Opts = Opts::parse();
    log::info!("{:?}", &opts);

    let config = ServerConfig {
        host: opts.host,
        port: opts.port,
        ..Default::default()
    };

    let callbacks = SessionCallbacks {
        on_authorize: Box::new(|stream_key| {
            if !stream_key_pattern().is_match(stream_key) {
                log::warn!("rejecting malformed stream key {:?}", stream_key);
                return false;
            }
            if live_streams().contains_key(stream_key) {
                log::warn!("rejecting duplicate publisher for {}", stream_key);
                return false;
            }
            true
        }),
        on_set_data_frame: Box::new(|metadata| {
            log::info!(
                "accepting metadata: encoder={:?} {}x{} framerate={}",
                metadata.encoder,
                metadata.width,
                metadata.height,
                metadata.frame_rate
            );
            true
        }),
    };

    let server = RtmpServer::new(config, callbacks, || {
        let (sink, source) = media_channel(64);
        spawn_and_log_error(async move {
            let mut stream_key = String::new();
            let mut media_bytes = 0usize;
            while let Ok(event) = source.recv().await {
                match event {
                    MediaEvent::StreamInfo { stream_key: key } => {
                        live_streams().insert(key.clone(), ());
                        log::info!("stream {} started", key);
                        stream_key = key;
                    }
                    MediaEvent::StreamData { bytes } => media_bytes += bytes.len(),
                }
            }
            if !stream_key.is_empty() {
                live_streams().remove(&stream_key);
                log::info!("stream {} ended after {} flv bytes", stream_key, media_bytes);
            }
            Ok(())
        });
        sink
    });

    smol::block_on(server.run())
}
