// Deadline-checked gate; outcomes only become visible through `apply_outcomes`.

use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::remote::{self, Transport};
use crate::settings::Settings;

pub const COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Phase {
    Ready,
    CoolingDown { expires_at: Instant },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TriggerSource {
    Button,
    External,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Button => f.write_str("button"),
            TriggerSource::External => f.write_str("external"),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Request {
    Fired(u64),
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub enabled: bool,
    pub cooldown_remaining: Duration,
    pub result: String,
    pub result_seq: u64,
    pub since_triggered: Option<Duration>,
}

struct TriggerState {
    phase: Phase,
    last_seq: u64,
    last_triggered: Option<Instant>,
}

impl TriggerState {
    /// Moves to `Ready` once the deadline has passed and returns the current phase.
    fn settle(&mut self, now: Instant) -> Phase {
        if let Phase::CoolingDown { expires_at } = self.phase {
            if now >= expires_at {
                log::debug!("cooldown elapsed, accepting triggers");
                self.phase = Phase::Ready;
            }
        }
        self.phase
    }
}

struct Outcome {
    seq: u64,
    text: String,
}

struct Shown {
    seq: u64,
    text: String,
}

pub struct Controller {
    settings: Settings,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    state: Mutex<TriggerState>,
    result: RwLock<Shown>,
    outcome_tx: Sender<Outcome>,
    outcome_rx: Mutex<Receiver<Outcome>>,
}

impl Controller {
    pub fn new(settings: Settings, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::channel();
        Controller {
            settings,
            transport,
            clock,
            state: Mutex::new(TriggerState {
                phase: Phase::Ready,
                last_seq: 0,
                last_triggered: None,
            }),
            result: RwLock::new(Shown {
                seq: 0,
                text: String::new(),
            }),
            outcome_tx,
            outcome_rx: Mutex::new(outcome_rx),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Dropped during cooldown without touching the deadline.
    pub fn request_trigger(&self, source: TriggerSource) -> Request {
        let seq = {
            let mut state = self.lock_state();
            let now = self.clock.now();
            if let Phase::CoolingDown { expires_at } = state.settle(now) {
                log::debug!(
                    "ignoring {} trigger, {:?} of cooldown left",
                    source,
                    expires_at - now
                );
                return Request::Ignored;
            }
            state.phase = Phase::CoolingDown {
                expires_at: now + COOLDOWN,
            };
            state.last_triggered = Some(now);
            state.last_seq += 1;
            state.last_seq
        };

        log::info!("{} trigger accepted (request #{})", source, seq);
        self.dispatch(seq);
        Request::Fired(seq)
    }

    pub fn is_enabled(&self) -> bool {
        let now = self.clock.now();
        self.lock_state().settle(now) == Phase::Ready
    }

    pub fn phase(&self) -> Phase {
        let now = self.clock.now();
        self.lock_state().settle(now)
    }

    pub fn current_result(&self) -> String {
        self.read_result().text.clone()
    }

    pub fn status(&self) -> Status {
        let now = self.clock.now();
        let (phase, last_triggered) = {
            let mut state = self.lock_state();
            (state.settle(now), state.last_triggered)
        };
        let cooldown_remaining = match phase {
            Phase::Ready => Duration::ZERO,
            Phase::CoolingDown { expires_at } => expires_at - now,
        };
        let (result, result_seq) = {
            let shown = self.read_result();
            (shown.text.clone(), shown.seq)
        };
        Status {
            enabled: phase == Phase::Ready,
            cooldown_remaining,
            result,
            result_seq,
            since_triggered: last_triggered.map(|at| now.saturating_duration_since(at)),
        }
    }

    /// Waits up to `wait` for a finished request, then drains any others that are
    /// ready and publishes them. Returns how many outcomes were received.
    ///
    /// An outcome older than the one already shown is dropped.
    pub fn apply_outcomes(&self, wait: Duration) -> usize {
        let rx = self
            .outcome_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let first = match rx.recv_timeout(wait) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return 0,
        };

        let mut received = 0;
        for outcome in std::iter::once(first).chain(rx.try_iter()) {
            received += 1;
            let mut shown = self.result.write().unwrap_or_else(PoisonError::into_inner);
            if outcome.seq > shown.seq {
                *shown = Shown {
                    seq: outcome.seq,
                    text: outcome.text,
                };
            } else {
                log::debug!(
                    "discarding result of request #{}, #{} already shown",
                    outcome.seq,
                    shown.seq
                );
            }
        }
        received
    }

    fn dispatch(&self, seq: u64) {
        let url = match self.settings.load() {
            Ok(url) => url,
            Err(err) => {
                log::warn!("unable to load target URL: {}", err);
                self.publish(seq, remote::error_text(&err));
                return;
            }
        };

        let transport = Arc::clone(&self.transport);
        let tx = self.outcome_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("door-request-{}", seq))
            .spawn(move || {
                let text = remote::fire(transport.as_ref(), &url);
                // The controller may be gone by now; nobody is left to show the result.
                let _ = tx.send(Outcome { seq, text });
            });
        if let Err(err) = spawned {
            log::error!("unable to start request thread: {}", err);
            self.publish(seq, remote::error_text(&err));
        }
    }

    fn publish(&self, seq: u64, text: String) {
        let _ = self.outcome_tx.send(Outcome { seq, text });
    }

    fn lock_state(&self) -> MutexGuard<'_, TriggerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_result(&self) -> std::sync::RwLockReadGuard<'_, Shown> {
        self.result.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, StubTransport};
    use tempfile::TempDir;

    const URL: &str = "http://10.0.0.5/open";
    const WAIT: Duration = Duration::from_secs(2);

    struct Fixture {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        transport: Arc<StubTransport>,
        controller: Arc<Controller>,
    }

    fn fixture(transport: StubTransport) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::new(dir.path().join("prefs.json"));
        settings.save(URL).unwrap();
        let clock = Arc::new(ManualClock::new());
        let transport = Arc::new(transport);
        let controller = Arc::new(Controller::new(
            settings,
            transport.clone(),
            clock.clone(),
        ));
        Fixture {
            _dir: dir,
            clock,
            transport,
            controller,
        }
    }

    fn wait_for_calls(transport: &StubTransport, calls: usize) {
        let deadline = Instant::now() + WAIT;
        while transport.calls() < calls && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(transport.calls(), calls);
    }

    #[test]
    fn starts_ready_with_empty_result() {
        let f = fixture(StubTransport::body("OK"));
        assert!(f.controller.is_enabled());
        assert_eq!(f.controller.current_result(), "");
        assert_eq!(f.controller.phase(), Phase::Ready);
    }

    #[test]
    fn disabled_for_exactly_the_cooldown() {
        let f = fixture(StubTransport::body("OK"));
        assert!(matches!(
            f.controller.request_trigger(TriggerSource::Button),
            Request::Fired(1)
        ));
        assert!(!f.controller.is_enabled());

        f.clock.advance(COOLDOWN - Duration::from_millis(1));
        assert!(!f.controller.is_enabled());

        f.clock.advance(Duration::from_millis(1));
        assert!(f.controller.is_enabled());
    }

    #[test]
    fn body_becomes_current_result() {
        let f = fixture(StubTransport::body("OK"));
        f.controller.request_trigger(TriggerSource::Button);
        assert_eq!(f.controller.apply_outcomes(WAIT), 1);
        assert_eq!(f.controller.current_result(), "OK");
        assert_eq!(f.transport.urls(), vec![URL.to_owned()]);
    }

    #[test]
    fn transport_error_still_cools_down() {
        let f = fixture(StubTransport::failing("timeout"));
        f.controller.request_trigger(TriggerSource::Button);
        f.controller.apply_outcomes(WAIT);
        assert_eq!(f.controller.current_result(), "Error: timeout");
        assert!(!f.controller.is_enabled());
        assert!(matches!(
            f.controller.phase(),
            Phase::CoolingDown { .. }
        ));
    }

    #[test]
    fn requests_during_cooldown_are_dropped() {
        let f = fixture(StubTransport::body("OK"));
        f.controller.request_trigger(TriggerSource::Button);
        f.controller.apply_outcomes(WAIT);

        for _ in 0..10 {
            f.clock.advance(Duration::from_millis(400));
            assert_eq!(
                f.controller.request_trigger(TriggerSource::External),
                Request::Ignored
            );
        }
        assert_eq!(f.controller.apply_outcomes(Duration::from_millis(50)), 0);
        assert_eq!(f.transport.calls(), 1);
        assert_eq!(f.controller.current_result(), "OK");
    }

    #[test]
    fn ignored_request_does_not_extend_deadline() {
        let f = fixture(StubTransport::body("OK"));
        f.controller.request_trigger(TriggerSource::Button);
        f.clock.advance(Duration::from_secs(3));
        f.controller.request_trigger(TriggerSource::Button);
        f.clock.advance(Duration::from_secs(2));
        assert!(f.controller.is_enabled());
    }

    #[test]
    fn fires_again_after_cooldown() {
        let f = fixture(StubTransport::body("OK"));
        f.controller.request_trigger(TriggerSource::Button);
        f.clock.advance(COOLDOWN);
        assert_eq!(
            f.controller.request_trigger(TriggerSource::Button),
            Request::Fired(2)
        );
        wait_for_calls(&f.transport, 2);
    }

    #[test]
    fn reads_url_at_trigger_time() {
        let f = fixture(StubTransport::body("OK"));
        f.controller.request_trigger(TriggerSource::Button);
        wait_for_calls(&f.transport, 1);

        f.controller.settings().save("http://10.0.0.6/open").unwrap();
        f.clock.advance(COOLDOWN);
        f.controller.request_trigger(TriggerSource::Button);
        wait_for_calls(&f.transport, 2);
        assert_eq!(
            f.transport.urls(),
            vec![URL.to_owned(), "http://10.0.0.6/open".to_owned()]
        );
    }

    #[test]
    fn reenables_before_slow_request_returns_and_keeps_newest_result() {
        let f = fixture(StubTransport::body("unused"));
        let release_first = f.transport.push_held("first");
        f.transport.push("second");

        f.controller.request_trigger(TriggerSource::Button);
        wait_for_calls(&f.transport, 1);

        f.clock.advance(COOLDOWN);
        assert!(f.controller.is_enabled());
        assert_eq!(
            f.controller.request_trigger(TriggerSource::Button),
            Request::Fired(2)
        );
        assert_eq!(f.controller.apply_outcomes(WAIT), 1);
        assert_eq!(f.controller.current_result(), "second");

        release_first.send(()).unwrap();
        assert_eq!(f.controller.apply_outcomes(WAIT), 1);
        assert_eq!(f.controller.current_result(), "second");
    }

    #[test]
    fn unreadable_settings_are_reported_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "garbage").unwrap();
        let transport = Arc::new(StubTransport::body("OK"));
        let controller = Controller::new(
            Settings::new(&path),
            transport.clone(),
            Arc::new(ManualClock::new()),
        );

        controller.request_trigger(TriggerSource::Button);
        controller.apply_outcomes(WAIT);
        assert!(controller.current_result().starts_with("Error: "));
        assert!(!controller.is_enabled());
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn concurrent_requests_fire_once() {
        let f = fixture(StubTransport::body("OK"));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let controller = Arc::clone(&f.controller);
                thread::spawn(move || {
                    let source = if i % 2 == 0 {
                        TriggerSource::Button
                    } else {
                        TriggerSource::External
                    };
                    controller.request_trigger(source)
                })
            })
            .collect();
        let fired = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|request| matches!(request, Request::Fired(_)))
            .count();
        assert_eq!(fired, 1);
        f.controller.apply_outcomes(WAIT);
        assert_eq!(f.transport.calls(), 1);
    }

    #[test]
    fn status_reports_remaining_cooldown() {
        let f = fixture(StubTransport::body("OK"));
        f.controller.request_trigger(TriggerSource::Button);
        f.controller.apply_outcomes(WAIT);
        f.clock.advance(Duration::from_secs(2));

        let status = f.controller.status();
        assert!(!status.enabled);
        assert_eq!(status.cooldown_remaining, Duration::from_secs(3));
        assert_eq!(status.result, "OK");
        assert_eq!(status.result_seq, 1);
        assert_eq!(status.since_triggered, Some(Duration::from_secs(2)));
    }
}
