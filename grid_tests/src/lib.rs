//! Helpers shared by the socket-level integration tests.

use std::{
    collections::{BTreeMap, VecDeque},
    time::Duration,
};

use anyhow::Context;
use grid_client::GridClient;
use grid_shared::{
    error::SyncError,
    framing::{FrameReader, DEFAULT_MAX_FRAME_LEN, DEFAULT_RECV_BUFFER},
    protocol::{ClientFrame, ClientId, ServerFrame},
    render::RenderSink,
};
use tokio::{
    io::AsyncWriteExt,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};

/// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(3);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Raw protocol client speaking the wire format directly.
pub struct TestPeer {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    pending: VecDeque<ServerFrame>,
}

impl TestPeer {
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: FrameReader::new(read_half, DEFAULT_RECV_BUFFER, DEFAULT_MAX_FRAME_LEN),
            writer,
            pending: VecDeque::new(),
        })
    }

    pub async fn send(&mut self, frame: ClientFrame) -> anyhow::Result<()> {
        self.send_raw(&frame.to_wire()?).await
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.writer.write_all(bytes).await.context("tcp write")?;
        Ok(())
    }

    /// Next non-probe frame from the server.
    pub async fn next_frame(&mut self) -> anyhow::Result<ServerFrame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }
            let payloads = tokio::time::timeout(WAIT, self.reader.read_frames())
                .await
                .context("timed out waiting for a frame")??;
            for payload in payloads {
                match ServerFrame::decode(&payload)? {
                    ServerFrame::Probe => {}
                    frame => self.pending.push_back(frame),
                }
            }
        }
    }

    /// Waits for the server to close the connection. Fails on any
    /// non-probe frame.
    pub async fn expect_closed(&mut self) -> anyhow::Result<()> {
        if let Some(frame) = self.pending.pop_front() {
            anyhow::bail!("unexpected frame before close: {frame:?}");
        }
        loop {
            let received = tokio::time::timeout(WAIT, self.reader.read_frames())
                .await
                .context("timed out waiting for close")?;
            match received {
                Ok(payloads) => {
                    for payload in payloads {
                        let frame = ServerFrame::decode(&payload)?;
                        if frame != ServerFrame::Probe {
                            anyhow::bail!("unexpected frame before close: {frame:?}");
                        }
                    }
                }
                Err(SyncError::Closed) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// One call made on [`RecordingRenderer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderCall {
    Add(ClientId),
    Remove(ClientId),
    Reposition(ClientId, i32, i32),
}

/// Render sink that remembers what it was asked to draw.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    pub calls: Vec<RenderCall>,
    pub visible: BTreeMap<ClientId, (i32, i32)>,
}

impl RenderSink for RecordingRenderer {
    fn add_entity(&mut self, id: ClientId) {
        self.calls.push(RenderCall::Add(id));
        self.visible.insert(id, (0, 0));
    }

    fn remove_entity(&mut self, id: ClientId) {
        self.calls.push(RenderCall::Remove(id));
        self.visible.remove(&id);
    }

    fn reposition_entity(&mut self, id: ClientId, screen_x: i32, screen_y: i32) {
        self.calls.push(RenderCall::Reposition(id, screen_x, screen_y));
        self.visible.insert(id, (screen_x, screen_y));
    }
}

/// Pumps `client` until `done` holds or [`WAIT`] passes.
pub async fn pump_until<F>(
    client: &mut GridClient,
    sink: &mut RecordingRenderer,
    mut done: F,
) -> anyhow::Result<()>
where
    F: FnMut(&GridClient, &RecordingRenderer) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            client.pump(sink);
            if done(client, sink) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .context("condition not reached while pumping")
}

/// Polls an async condition until it holds or [`WAIT`] passes.
pub async fn eventually<F, Fut>(mut check: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .context("condition not reached")
}
