use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::atomic::AtomicCell;
use smol::net::TcpListener;
use smol::prelude::*;

use crate::session::{Session, SessionCallbacks};
use crate::sink::MediaSink;
use crate::util::spawn_and_log_error;

/// Deployment knobs, defaulting to the standard RTMP ingest values.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Deadline applied to every socket read.
    pub read_timeout: Duration,
    pub window_ack_size: u32,
    pub peer_bandwidth: u32,
    /// Chunk size assumed until the publisher negotiates its own.
    pub initial_chunk_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 1935,
            read_timeout: Duration::from_secs(10),
            window_ack_size: 2_500_000,
            peer_bandwidth: 25_000_000,
            initial_chunk_size: 128,
        }
    }
}

/// TCP accept loop. Each accepted publisher gets its own detached task and
/// its own media sink from the factory; a failing connection never impairs
/// its siblings or the acceptor.
pub struct RtmpServer {
    config: Arc<ServerConfig>,
    callbacks: Arc<SessionCallbacks>,
    sink_factory: Box<dyn Fn() -> MediaSink + Send + Sync>,
}

impl RtmpServer {
    pub fn new<F>(config: ServerConfig, callbacks: SessionCallbacks, sink_factory: F) -> Self
    where
        F: Fn() -> MediaSink + Send + Sync + 'static,
    {
        RtmpServer {
            config: Arc::new(config),
            callbacks: Arc::new(callbacks),
            sink_factory: Box::new(sink_factory),
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(addr.as_str()).await?;
        log::info!("RTMP server is listening to {}", addr);

        let conn_seq = AtomicCell::new(0u64);
        let mut incoming = listener.incoming();
        while let Some(stream) = incoming.next().await {
            let stream = stream?;
            log::info!("connection #{} accepted", conn_seq.fetch_add(1));

            let session = Session::new(
                stream,
                self.config.clone(),
                self.callbacks.clone(),
                (self.sink_factory)(),
            );
            spawn_and_log_error(session.run());
        }
        Ok(())
    }
}
