//! In-memory spawner and transport for driving the session layer in tests.
//!
//! Every transport operation is recorded as an [`Event`] and yields to the
//! scheduler first, so a missing serialization gate shows up as interleaving.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use super::transport::{LineTransport, SpawnError, Spawner, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Spawn(usize),
    SpawnFailed,
    Write(usize, String),
    Read(usize),
    Terminate(usize),
}

/// What the fake child does with one request line.
#[derive(Debug, Clone)]
pub enum Reply {
    Line(String),
    /// Close stdout (and exit).
    Eof,
    /// Never answer.
    Hang,
    /// Fail the read with an I/O error.
    ReadError,
    /// Answer with the line once the test releases the `Notify`.
    Gated(Arc<Notify>, String),
}

type Responder = Arc<dyn Fn(&str) -> Reply + Send + Sync>;

struct Shared {
    events: StdMutex<Vec<Event>>,
    responder: Responder,
    spawns: AtomicUsize,
    fail_spawns: AtomicUsize,
    fail_writes: AtomicBool,
    alive: StdMutex<Vec<Arc<AtomicBool>>>,
}

impl Shared {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct FakeSpawner {
    shared: Arc<Shared>,
}

impl FakeSpawner {
    pub fn new(responder: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                events: StdMutex::new(Vec::new()),
                responder: Arc::new(responder),
                spawns: AtomicUsize::new(0),
                fail_spawns: AtomicUsize::new(0),
                fail_writes: AtomicBool::new(false),
                alive: StdMutex::new(Vec::new()),
            }),
        })
    }

    /// Answers every request with `{"jsonrpc":"2.0","id":1,"result":<params>}`.
    pub fn echo() -> Arc<Self> {
        Self::new(|line| Reply::Line(echo_response(line)))
    }

    pub fn fail_next_spawns(&self, n: usize) {
        self.shared.fail_spawns.store(n, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful spawns so far.
    pub fn spawn_count(&self) -> usize {
        self.shared.spawns.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<Event> {
        self.shared.events.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Write(_, line) => Some(line),
                _ => None,
            })
            .collect()
    }

    /// Poll until `event` has been recorded. Panics after about a second.
    pub async fn wait_for(&self, event: &Event) {
        for _ in 0..200 {
            if self.events().contains(event) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {event:?}; saw {:?}", self.events());
    }

    /// Simulate child `id` (1-based spawn order) exiting on its own.
    pub fn kill_child(&self, id: usize) {
        if let Some(flag) = self.shared.alive.lock().unwrap().get(id - 1) {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

pub fn echo_response(request_line: &str) -> String {
    let request: Value = serde_json::from_str(request_line).unwrap();
    let result = request.get("params").cloned().unwrap_or(Value::Null);
    json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string()
}

impl Spawner for FakeSpawner {
    fn start(&self) -> Result<Box<dyn LineTransport>, SpawnError> {
        let failing = self
            .shared
            .fail_spawns
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.shared.record(Event::SpawnFailed);
            return Err(SpawnError::NotFound {
                program: "fake-mcp-server".to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }

        let id = self.shared.spawns.fetch_add(1, Ordering::SeqCst) + 1;
        let alive = Arc::new(AtomicBool::new(true));
        self.shared.alive.lock().unwrap().push(Arc::clone(&alive));
        self.shared.record(Event::Spawn(id));

        Ok(Box::new(FakeTransport {
            id,
            shared: Arc::clone(&self.shared),
            alive,
            pending: VecDeque::new(),
        }))
    }

    fn describe(&self) -> String {
        "fake-mcp-server".to_string()
    }
}

struct FakeTransport {
    id: usize,
    shared: Arc<Shared>,
    alive: Arc<AtomicBool>,
    pending: VecDeque<String>,
}

#[async_trait]
impl LineTransport for FakeTransport {
    fn is_alive(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        tokio::task::yield_now().await;
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Write(io::Error::from(
                io::ErrorKind::BrokenPipe,
            )));
        }
        self.shared.record(Event::Write(self.id, line.to_string()));
        self.pending.push_back(line.to_string());
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        tokio::task::yield_now().await;
        self.shared.record(Event::Read(self.id));
        let Some(request) = self.pending.pop_front() else {
            return Ok(None);
        };
        match (self.shared.responder)(&request) {
            Reply::Line(line) => Ok(Some(line)),
            Reply::Eof => {
                self.alive.store(false, Ordering::SeqCst);
                Ok(None)
            }
            Reply::Hang => std::future::pending().await,
            Reply::ReadError => Err(TransportError::Read(io::Error::other("fake read failure"))),
            Reply::Gated(release, line) => {
                release.notified().await;
                Ok(Some(line))
            }
        }
    }

    async fn terminate(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.shared.record(Event::Terminate(self.id));
    }

    fn pid(&self) -> Option<u32> {
        u32::try_from(self.id).ok().map(|id| 40_000 + id)
    }
}
