//! Built-in media sources

use super::{LocalStream, MediaSource};
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// One VP8 sample track per stream
///
/// The most recently opened track is available from
/// [`SampleVideoSource::current_track`] for writing samples; with no writer
/// the track negotiates but stays silent.
pub struct SampleVideoSource {
    track_id: String,
    current: Mutex<Option<Arc<TrackLocalStaticSample>>>,
}

impl SampleVideoSource {
    pub fn new(track_id: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            current: Mutex::new(None),
        }
    }

    pub fn current_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.current.lock().clone()
    }
}

impl Default for SampleVideoSource {
    fn default() -> Self {
        Self::new("video")
    }
}

#[async_trait]
impl MediaSource for SampleVideoSource {
    async fn open(&self) -> Result<LocalStream> {
        let stream_id = format!("local-{}", uuid::Uuid::new_v4());
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            self.track_id.clone(),
            stream_id.clone(),
        ));

        *self.current.lock() = Some(Arc::clone(&track));

        Ok(LocalStream {
            stream_id,
            tracks: vec![track as Arc<dyn TrackLocal + Send + Sync>],
        })
    }

    async fn release(&self, stream: LocalStream) {
        let mut current = self.current.lock();
        if current
            .as_ref()
            .is_some_and(|track| track.stream_id() == stream.stream_id)
        {
            *current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_vp8_track() {
        let source = SampleVideoSource::new("cam");
        let stream = source.open().await.unwrap();

        assert!(stream.stream_id.starts_with("local-"));
        assert_eq!(stream.tracks.len(), 1);
        assert_eq!(stream.tracks[0].id(), "cam");
        assert_eq!(stream.tracks[0].stream_id(), stream.stream_id);
        assert!(source.current_track().is_some());

        source.release(stream).await;
        assert!(source.current_track().is_none());
    }

    #[tokio::test]
    async fn test_each_open_is_a_new_stream() {
        let source = SampleVideoSource::default();
        let a = source.open().await.unwrap();
        let b = source.open().await.unwrap();
        assert_ne!(a.stream_id, b.stream_id);
    }
}
