//! Render tickets: a handle for one asynchronous render.
//!
//! A ticket is started when it is queued and finished exactly once per start,
//! with or without a result. Finishing wakes every waiter and notifies every
//! listener while holding the ticket lock, so a listener added at any time
//! either sees the notification or finds the ticket already finished.

use cinegraph_cache::AudioWaveform;
use cinegraph_core::{CancelAtom, CancelAtomPtr, Frame, JobTime, SampleBuffer};
use cinegraph_node::TexturePtr;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::request::RenderRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId(pub u64);

static NEXT_TICKET: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub enum TicketResult {
    Frame(Arc<Frame>),
    Texture(TexturePtr),
    Samples {
        buffer: Arc<SampleBuffer>,
        waveform: Option<AudioWaveform>,
    },
}

impl TicketResult {
    pub fn frame(&self) -> Option<&Arc<Frame>> {
        match self {
            Self::Frame(f) => Some(f),
            _ => None,
        }
    }

    pub fn texture(&self) -> Option<&TexturePtr> {
        match self {
            Self::Texture(t) => Some(t),
            _ => None,
        }
    }

    pub fn samples(&self) -> Option<&Arc<SampleBuffer>> {
        match self {
            Self::Samples { buffer, .. } => Some(buffer),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct TicketState {
    running: bool,
    result: Option<TicketResult>,
    finish_count: u32,
    listeners: Vec<Sender<TicketId>>,
}

#[derive(Debug)]
pub struct RenderTicket {
    id: TicketId,
    request: RenderRequest,
    job_time: JobTime,
    cancel: CancelAtomPtr,
    state: Mutex<TicketState>,
    finished: Condvar,
}

pub type RenderTicketPtr = Arc<RenderTicket>;

impl RenderTicket {
    pub fn new(request: RenderRequest) -> RenderTicketPtr {
        Self::with_job_time(request, JobTime::now())
    }

    pub fn with_job_time(request: RenderRequest, job_time: JobTime) -> RenderTicketPtr {
        Arc::new(Self {
            id: TicketId(NEXT_TICKET.fetch_add(1, Ordering::Relaxed)),
            request,
            job_time,
            cancel: Arc::new(CancelAtom::new()),
            state: Mutex::new(TicketState::default()),
            finished: Condvar::new(),
        })
    }

    pub fn id(&self) -> TicketId {
        self.id
    }

    pub fn request(&self) -> &RenderRequest {
        &self.request
    }

    /// Stamp taken when the work was requested.
    pub fn job_time(&self) -> JobTime {
        self.job_time
    }

    pub fn cancel_atom(&self) -> &CancelAtomPtr {
        &self.cancel
    }

    pub fn start(&self) {
        let mut state = self.state.lock();
        state.result = None;
        state.running = true;
    }

    /// Finish without a result.
    pub fn finish(&self) {
        self.finish_with(None);
    }

    pub fn finish_with(&self, result: Option<TicketResult>) {
        let mut state = self.state.lock();
        state.running = false;
        state.result = result;
        state.finish_count += 1;
        self.finished.notify_all();
        let id = self.id;
        state.listeners.retain(|tx| tx.send(id).is_ok());
        trace!(ticket = id.0, has_result = state.result.is_some(), "Ticket finished");
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn finish_count(&self) -> u32 {
        self.state.lock().finish_count
    }

    /// Block until the ticket is no longer running.
    pub fn wait_for_finished(&self) {
        let mut state = self.state.lock();
        while state.running {
            self.finished.wait(&mut state);
        }
    }

    /// Like [`wait_for_finished`](Self::wait_for_finished) with a deadline.
    /// Returns whether the ticket finished.
    pub fn wait_for_finished_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.running {
            let _ = self.finished.wait_while_for(&mut state, |s| s.running, timeout);
        }
        !state.running
    }

    /// Wait, then return the result if there is one.
    pub fn get(&self) -> Option<TicketResult> {
        let mut state = self.state.lock();
        while state.running {
            self.finished.wait(&mut state);
        }
        state.result.clone()
    }

    pub fn has_result(&self) -> bool {
        self.state.lock().result.is_some()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Send this ticket's id on `tx` when it finishes.
    ///
    /// If the ticket already finished and is not running again, the id is
    /// sent immediately.
    pub fn watch(&self, tx: Sender<TicketId>) {
        let mut state = self.state.lock();
        if state.finish_count > 0 && !state.running {
            let _ = tx.send(self.id);
        }
        state.listeners.push(tx);
    }
}

// ── Watcher ─────────────────────────────────────────────────────

/// Receives a notification when its ticket finishes.
#[derive(Debug)]
pub struct RenderTicketWatcher {
    ticket: Option<RenderTicketPtr>,
    tx: Sender<TicketId>,
    rx: Receiver<TicketId>,
}

impl Default for RenderTicketWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderTicketWatcher {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            ticket: None,
            tx,
            rx,
        }
    }

    pub fn set_ticket(&mut self, ticket: RenderTicketPtr) {
        ticket.watch(self.tx.clone());
        self.ticket = Some(ticket);
    }

    pub fn ticket(&self) -> Option<&RenderTicketPtr> {
        self.ticket.as_ref()
    }

    /// The ticket if a finish notification is pending.
    pub fn try_finished(&self) -> Option<RenderTicketPtr> {
        self.matching(self.rx.try_recv().ok())
    }

    pub fn wait_finished(&self, timeout: Duration) -> Option<RenderTicketPtr> {
        match self.rx.recv_timeout(timeout) {
            Ok(id) => self.matching(Some(id)),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    fn matching(&self, id: Option<TicketId>) -> Option<RenderTicketPtr> {
        let id = id?;
        self.ticket.as_ref().filter(|t| t.id() == id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::VideoRequest;
    use cinegraph_core::{RationalTime, VideoParams};
    use cinegraph_node::{NodeId, Project};
    use parking_lot::RwLock;
    use std::thread;
    use std::time::Instant;
    use tempfile::TempDir;

    fn ticket(dir: &TempDir) -> RenderTicketPtr {
        let project = Arc::new(RwLock::new(Project::new(dir.path())));
        RenderTicket::new(RenderRequest::Video(VideoRequest::new(
            project,
            NodeId(1),
            RationalTime::ZERO,
            VideoParams::default(),
        )))
    }

    #[test]
    fn test_watcher_after_finish_still_notified() {
        let dir = TempDir::new().unwrap();
        let t = ticket(&dir);
        t.start();
        t.finish();

        let mut w = RenderTicketWatcher::new();
        w.set_ticket(Arc::clone(&t));
        let got = w.try_finished().expect("finished signal");
        assert_eq!(got.id(), t.id());
        assert!(!got.has_result());
    }

    #[test]
    fn test_watcher_before_finish_notified_once() {
        let dir = TempDir::new().unwrap();
        let t = ticket(&dir);
        t.start();
        let mut w = RenderTicketWatcher::new();
        w.set_ticket(Arc::clone(&t));
        assert!(w.try_finished().is_none());
        t.finish_with(Some(TicketResult::Frame(Arc::new(Frame::new(VideoParams::default())))));
        assert!(w.try_finished().is_some());
        assert!(w.try_finished().is_none());
    }

    #[test]
    fn test_unfinished_restarted_ticket_not_reported() {
        let dir = TempDir::new().unwrap();
        let t = ticket(&dir);
        t.start();
        t.finish();
        t.start();
        let mut w = RenderTicketWatcher::new();
        w.set_ticket(Arc::clone(&t));
        assert!(w.try_finished().is_none());
        assert!(!t.has_result());
    }

    #[test]
    fn test_wait_wakes_on_finish_from_other_thread() {
        let dir = TempDir::new().unwrap();
        let t = ticket(&dir);
        t.start();
        let worker = {
            let t = Arc::clone(&t);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                t.finish_with(Some(TicketResult::Frame(Arc::new(Frame::new(VideoParams::default())))));
            })
        };
        let start = Instant::now();
        let result = t.get();
        assert!(result.and_then(|r| r.frame().cloned()).is_some());
        assert!(start.elapsed() < Duration::from_secs(5));
        worker.join().unwrap();
    }

    #[test]
    fn test_cancelled_ticket_finishes_without_result() {
        let dir = TempDir::new().unwrap();
        let t = ticket(&dir);
        t.start();
        t.cancel();
        assert!(t.is_cancelled());
        assert!(!t.wait_for_finished_timeout(Duration::from_millis(5)));
        t.finish();
        assert!(t.wait_for_finished_timeout(Duration::from_millis(5)));
        assert!(t.get().is_none());
        assert_eq!(t.finish_count(), 1);
    }
}
