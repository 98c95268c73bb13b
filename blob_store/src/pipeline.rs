use std::collections::VecDeque;

use bytes::Bytes;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info, warn};

use crate::{BlobError, ChunkWriter, StoredBlob};

/// Default write unit size, 50 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 50 * 1024;

/// Events feeding an ingestion session. Chunk arrival, end of stream and
/// transport closure come from the request transport; write completions
/// re-enter the session internally.
#[derive(Debug)]
pub enum SessionEvent {
    Chunk(Bytes),
    /// The stream reached its natural end.
    EndOfStream,
    /// The transport went away before the stream ended. Distinct from a
    /// normal end; triggers cleanup instead of a commit.
    TransportClosed,
}

/// What the drive step decided to do next.
#[derive(Debug, PartialEq)]
enum DriveAction {
    StartWrite(Bytes),
    Finalize(FinalizeKind),
    Wait,
}

#[derive(Debug, PartialEq)]
enum FinalizeKind {
    Commit,
    Discard,
}

/// Pure session state: the FIFO of pending chunks, the single in-flight
/// write slot and the terminal flags. All transitions go through
/// [`SessionState::drive`].
#[derive(Debug)]
struct SessionState {
    queue: VecDeque<Bytes>,
    write_in_flight: bool,
    end_reached: bool,
    transport_closed: bool,
    finalized: bool,
    chunk_size: usize,
}

impl SessionState {
    fn new(chunk_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            write_in_flight: false,
            end_reached: false,
            transport_closed: false,
            finalized: false,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Splits an inbound buffer into bounded chunks, preserving arrival
    /// order. Data arriving after the transport closed is dropped.
    fn enqueue(&mut self, mut bytes: Bytes) {
        if self.transport_closed {
            return;
        }
        while bytes.len() > self.chunk_size {
            self.queue.push_back(bytes.split_to(self.chunk_size));
        }
        if !bytes.is_empty() {
            self.queue.push_back(bytes);
        }
    }

    /// The drive step, re-evaluated on every event:
    /// 1. no write in flight and chunks pending: start the oldest write;
    /// 2. idle, drained and terminated: finalize exactly once, discarding
    ///    when the transport closed early;
    /// 3. otherwise wait for the next event.
    fn drive(&mut self) -> DriveAction {
        if !self.write_in_flight {
            if let Some(chunk) = self.queue.pop_front() {
                self.write_in_flight = true;
                return DriveAction::StartWrite(chunk);
            }
            if (self.end_reached || self.transport_closed) && !self.finalized {
                self.finalized = true;
                let kind = if self.transport_closed {
                    FinalizeKind::Discard
                } else {
                    FinalizeKind::Commit
                };
                return DriveAction::Finalize(kind);
            }
        }
        DriveAction::Wait
    }
}

enum Wake<W> {
    WriteDone(Result<(W, Result<(), BlobError>), tokio::task::JoinError>),
    Event(Option<SessionEvent>),
}

/// One upload. Owns the key, the pending-chunk queue and the store writer,
/// and drains the inbound stream into sequential writes. The session runs as
/// a single task, so the drive step is serialized per session no matter
/// which execution context the events come from.
pub struct IngestionSession<W> {
    key: String,
    state: SessionState,
    writer: Option<W>,
    in_flight: Option<JoinHandle<(W, Result<(), BlobError>)>>,
}

impl<W: ChunkWriter + 'static> IngestionSession<W> {
    pub fn new(key: impl Into<String>, writer: W, chunk_size: usize) -> Self {
        Self {
            key: key.into(),
            state: SessionState::new(chunk_size),
            writer: Some(writer),
            in_flight: None,
        }
    }

    /// Drains `events` until the session finalizes. Completes with the
    /// stored blob on a natural end of stream, or `TransportInterrupted`
    /// after cleaning up a broken upload. A sender dropped without an
    /// explicit end counts as a closed transport.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Result<StoredBlob, BlobError> {
        let mut events_done = false;
        loop {
            match self.state.drive() {
                DriveAction::StartWrite(chunk) => {
                    self.start_write(chunk);
                    continue;
                }
                DriveAction::Finalize(kind) => return self.finalize(kind).await,
                DriveAction::Wait => {}
            }

            // Resolve the borrow of the in-flight handle before touching
            // session state again.
            let wake = match (self.in_flight.as_mut(), events_done) {
                (Some(handle), true) => Wake::WriteDone(handle.await),
                (Some(handle), false) => {
                    tokio::select! {
                        joined = handle => Wake::WriteDone(joined),
                        event = events.recv() => Wake::Event(event),
                    }
                }
                (None, _) => Wake::Event(events.recv().await),
            };
            match wake {
                Wake::WriteDone(joined) => {
                    self.in_flight = None;
                    self.on_write_completed(joined);
                }
                Wake::Event(event) => self.on_event(event, &mut events_done),
            }
        }
    }

    fn start_write(&mut self, chunk: Bytes) {
        let Some(mut writer) = self.writer.take() else {
            // Writer lost to a panicked write task; treat as a dead
            // transport so the session resolves instead of stalling.
            self.state.write_in_flight = false;
            self.state.transport_closed = true;
            return;
        };
        self.in_flight = Some(tokio::spawn(async move {
            let result = writer.write_chunk(chunk).await;
            (writer, result)
        }));
    }

    fn on_write_completed(
        &mut self,
        joined: Result<(W, Result<(), BlobError>), tokio::task::JoinError>,
    ) {
        self.state.write_in_flight = false;
        match joined {
            Ok((writer, result)) => {
                self.writer = Some(writer);
                if let Err(err) = result {
                    // A failed write does not abort the session; later
                    // chunks are still attempted and the stream is drained
                    // to its end.
                    error!(key = %self.key, "could not write chunk: {err}");
                }
            }
            Err(join_err) => {
                error!(key = %self.key, "write task failed: {join_err}");
                self.state.transport_closed = true;
            }
        }
    }

    fn on_event(&mut self, event: Option<SessionEvent>, events_done: &mut bool) {
        match event {
            Some(SessionEvent::Chunk(bytes)) => self.state.enqueue(bytes),
            Some(SessionEvent::EndOfStream) => self.state.end_reached = true,
            Some(SessionEvent::TransportClosed) => self.state.transport_closed = true,
            None => {
                *events_done = true;
                if !self.state.end_reached {
                    self.state.transport_closed = true;
                }
            }
        }
    }

    async fn finalize(mut self, kind: FinalizeKind) -> Result<StoredBlob, BlobError> {
        let writer = self.writer.take();
        match kind {
            FinalizeKind::Commit => {
                let writer = writer.ok_or(BlobError::TransportInterrupted)?;
                let stored = writer.finish().await?;
                info!(
                    key = %stored.key,
                    size_bytes = stored.size_bytes,
                    sha256 = %stored.sha256_hash,
                    "blob stored"
                );
                Ok(stored)
            }
            FinalizeKind::Discard => {
                info!(key = %self.key, "transport closed, discarding partial upload");
                if let Some(writer) = writer {
                    if let Err(err) = writer.discard().await {
                        warn!(key = %self.key, "cleanup after interrupted upload failed: {err}");
                    }
                }
                Err(BlobError::TransportInterrupted)
            }
        }
    }
}
