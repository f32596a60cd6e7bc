//! Local media acquisition
//!
//! The core never captures or renders anything itself. A [`MediaSource`]
//! produces the tracks; [`LocalMedia`] keeps the current stream so every
//! connection that reaches `connected` can attach it.

pub mod source;

pub use source::SampleVideoSource;

use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::track::track_local::TrackLocal;

/// Tracks captured together
#[derive(Clone)]
pub struct LocalStream {
    pub stream_id: String,
    pub tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
}

impl fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStream")
            .field("stream_id", &self.stream_id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// Camera or other producer of local tracks
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire a fresh stream
    async fn open(&self) -> Result<LocalStream>;

    /// Release a stream previously returned by `open`
    async fn release(&self, _stream: LocalStream) {}
}

/// The local stream currently in use by the call
pub struct LocalMedia {
    source: Arc<dyn MediaSource>,
    current: RwLock<Option<LocalStream>>,
}

impl LocalMedia {
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self {
            source,
            current: RwLock::new(None),
        }
    }

    /// Acquire local media, reusing the current stream while one is active
    ///
    /// Connected peers carry the current stream's tracks, so it is only
    /// released by [`LocalMedia::stop`].
    pub async fn start(&self) -> Result<LocalStream> {
        if let Some(stream) = self.current() {
            debug!("Local media already running: stream={}", stream.stream_id);
            return Ok(stream);
        }

        let stream = self.source.open().await?;
        let raced = {
            let mut current = self.current.write();
            match current.as_ref() {
                Some(existing) => Some(existing.clone()),
                None => {
                    *current = Some(stream.clone());
                    None
                }
            }
        };
        if let Some(existing) = raced {
            self.source.release(stream).await;
            return Ok(existing);
        }

        info!(
            "Local media started: stream={} tracks={}",
            stream.stream_id,
            stream.tracks.len()
        );
        Ok(stream)
    }

    pub fn current(&self) -> Option<LocalStream> {
        self.current.read().clone()
    }

    pub fn is_active(&self) -> bool {
        self.current.read().is_some()
    }

    /// Release the current stream; returns false if nothing was running
    pub async fn stop(&self) -> bool {
        let previous = self.current.write().take();
        match previous {
            Some(stream) => {
                debug!("Releasing local stream {}", stream.stream_id);
                self.source.release(stream).await;
                true
            }
            None => false,
        }
    }
}
