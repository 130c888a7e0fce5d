use tracing::{debug, info};

use crate::media::MediaCaptureSession;
use crate::peer::PeerConnectionManager;
use crate::signaling::SignalingChannel;
use crate::telemetry::TelemetryScheduler;

/// Everything a session holds open, with a single owner.
///
/// `dispose` releases in a fixed order: telemetry, peer connection,
/// signaling, media. Every step is idempotent on its own, so disposal can run
/// from any state and any number of times.
pub struct SessionResources {
    pub media: MediaCaptureSession,
    pub signaling: SignalingChannel,
    pub peer: PeerConnectionManager,
    pub telemetry: TelemetryScheduler,
    disposals: usize,
}

impl SessionResources {
    pub fn new(
        media: MediaCaptureSession,
        signaling: SignalingChannel,
        peer: PeerConnectionManager,
        telemetry: TelemetryScheduler,
    ) -> Self {
        Self {
            media,
            signaling,
            peer,
            telemetry,
            disposals: 0,
        }
    }

    pub async fn dispose(&mut self) {
        self.disposals += 1;
        if self.disposals > 1 {
            debug!("Disposing session resources again (#{})", self.disposals);
        }

        self.telemetry.stop().await;
        self.peer.close().await;
        self.signaling.disconnect();
        self.media.release();

        info!(
            "Session resources released (peer={}, active tracks={})",
            self.peer.state(),
            self.media.active_tracks()
        );
    }

    /// The parts of `dispose` that need no runtime. The peer connection is
    /// left to its transport's own drop.
    fn dispose_now(&mut self) {
        self.telemetry.cancel();
        self.signaling.disconnect();
        self.media.release();
    }
}

impl Drop for SessionResources {
    fn drop(&mut self) {
        self.dispose_now();
    }
}
