use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::remote::{Transport, TransportError};

pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}

type Reply = Result<Option<String>, TransportError>;

/// Transport that records every URL and answers from a script, falling back to
/// a fixed reply once the script runs out.
pub struct StubTransport {
    script: Mutex<VecDeque<(Reply, Option<Receiver<()>>)>>,
    fallback: Reply,
    urls: Mutex<Vec<String>>,
}

impl StubTransport {
    fn with_fallback(fallback: Reply) -> Self {
        StubTransport {
            script: Mutex::new(VecDeque::new()),
            fallback,
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn body(body: &str) -> Self {
        Self::with_fallback(Ok(Some(body.to_owned())))
    }

    pub fn empty() -> Self {
        Self::with_fallback(Ok(None))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_fallback(Err(TransportError(message.to_owned())))
    }

    /// Queues a reply that is held back until the returned sender fires.
    pub fn push_held(&self, body: &str) -> Sender<()> {
        let (tx, rx) = mpsc::channel();
        self.script
            .lock()
            .unwrap()
            .push_back((Ok(Some(body.to_owned())), Some(rx)));
        tx
    }

    pub fn push(&self, body: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back((Ok(Some(body.to_owned())), None));
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.urls.lock().unwrap().len()
    }
}

impl Transport for StubTransport {
    fn get(&self, url: &str) -> Reply {
        self.urls.lock().unwrap().push(url.to_owned());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some((reply, hold)) => {
                if let Some(hold) = hold {
                    let _ = hold.recv_timeout(Duration::from_secs(5));
                }
                reply
            }
            None => self.fallback.clone(),
        }
    }
}
