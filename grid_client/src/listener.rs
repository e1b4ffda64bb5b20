//! Remote state listener.
//!
//! Runs on its own task and blocks on the socket instead of polling it.
//! Decoded frames are handed to the owning context over a channel; the
//! listener itself never touches entity or render state. A receive failure is
//! reported as [`ListenerEvent::Failed`] and ends the task, leaving the owner
//! to decide what offline means.

use grid_shared::{
    config::GridConfig,
    error::SyncError,
    framing::FrameReader,
    protocol::ServerFrame,
};
use tokio::{
    io::AsyncRead,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Message from the listener task to its owner.
#[derive(Debug)]
pub enum ListenerEvent {
    Frame(ServerFrame),
    /// The connection is unusable. Always the last event.
    Failed(SyncError),
}

/// Handle to a running listener task.
pub struct RemoteStateListener {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RemoteStateListener {
    /// Starts listening on `reader`. Probes are filtered out.
    pub fn spawn<R>(reader: R, cfg: &GridConfig) -> (Self, mpsc::UnboundedReceiver<ListenerEvent>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reader = FrameReader::new(reader, cfg.recv_buffer_size, cfg.max_frame_len);
        let handle = tokio::spawn(listen(reader, events_tx, shutdown_rx));
        (
            Self {
                shutdown: shutdown_tx,
                handle,
            },
            events_rx,
        )
    }

    /// Asks the task to stop without waiting for it.
    pub fn signal_stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stops the task and waits for it to exit.
    pub async fn stop(self) {
        self.signal_stop();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Listener task panicked");
        }
    }
}

async fn listen<R>(
    mut reader: FrameReader<R>,
    events: mpsc::UnboundedSender<ListenerEvent>,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("Listener stopping");
                return;
            }
            received = reader.read_frames() => match received {
                Ok(payloads) => {
                    for payload in payloads {
                        match ServerFrame::decode(&payload) {
                            Ok(ServerFrame::Probe) => {}
                            Ok(frame) => {
                                if events.send(ListenerEvent::Frame(frame)).is_err() {
                                    return;
                                }
                            }
                            Err(e) => warn!(
                                error = %e,
                                payload = %String::from_utf8_lossy(&payload),
                                "Dropping malformed frame"
                            ),
                        }
                    }
                }
                Err(e) => {
                    let _ = events.send(ListenerEvent::Failed(e));
                    return;
                }
            },
        }
    }
}
