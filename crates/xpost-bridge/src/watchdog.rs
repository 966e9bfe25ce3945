//! Two-phase ack/response countdown for a single request.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;
use xpost_core::{WaitPhase, XpostError};

use crate::listener::ResponseListener;
use crate::window::is_window_closed;

/// Deadlines a watchdog enforces.
#[derive(Debug, Clone)]
pub struct WatchdogParams {
    /// Local origin, reported in timeout errors.
    pub origin: String,
    pub ack_timeout_ms: u64,
    /// `None` means the response may take forever once acknowledged.
    pub res_timeout_ms: Option<u64>,
    pub cycle: Duration,
}

/// Remaining budget for each phase, in milliseconds.
#[derive(Debug, Clone)]
struct Countdown {
    ack_remaining: u64,
    res_remaining: Option<u64>,
}

/// What the watchdog observed about the request on this tick.
#[derive(Debug, Clone, Copy)]
struct Observation {
    closed: bool,
    cancelled: bool,
    acked: bool,
}

impl Countdown {
    fn new(params: &WatchdogParams) -> Self {
        Self {
            ack_remaining: params.ack_timeout_ms,
            res_remaining: params.res_timeout_ms,
        }
    }

    /// Advance one cycle. Returns the error to settle with, if any.
    fn tick(&mut self, seen: Observation, name: &str, params: &WatchdogParams) -> Option<XpostError> {
        if seen.closed {
            let phase = if seen.acked {
                WaitPhase::BeforeResponse
            } else {
                WaitPhase::BeforeAck
            };
            return Some(XpostError::WindowClosed {
                name: name.to_string(),
                phase,
            });
        }
        if seen.cancelled {
            return Some(XpostError::Cancelled {
                name: name.to_string(),
            });
        }

        let cycle_ms = params.cycle.as_millis() as u64;
        self.ack_remaining = self.ack_remaining.saturating_sub(cycle_ms);
        if let Some(res) = self.res_remaining.as_mut() {
            *res = res.saturating_sub(cycle_ms);
        }

        if !seen.acked && self.ack_remaining == 0 {
            return Some(XpostError::AckTimeout {
                name: name.to_string(),
                origin: params.origin.clone(),
                timeout_ms: params.ack_timeout_ms,
            });
        }
        if self.res_remaining == Some(0) {
            return Some(XpostError::ResponseTimeout {
                name: name.to_string(),
                origin: params.origin.clone(),
                timeout_ms: params.res_timeout_ms.unwrap_or_default(),
            });
        }
        None
    }
}

/// A repeating timer bound to one listener.
///
/// Runs until the listener settles, it rejects the listener itself, or [`stop`]
/// is called. Dropping the watchdog stops it.
///
/// [`stop`]: TimeoutWatchdog::stop
pub struct TimeoutWatchdog {
    handle: Option<JoinHandle<()>>,
}

impl TimeoutWatchdog {
    pub fn start(listener: Arc<ResponseListener>, params: WatchdogParams) -> Self {
        let handle = tokio::spawn(run(listener, params));
        Self {
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TimeoutWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(listener: Arc<ResponseListener>, params: WatchdogParams) {
    let mut countdown = Countdown::new(&params);
    let mut ticker = time::interval(params.cycle);
    ticker.tick().await; // skip first immediate tick

    loop {
        ticker.tick().await;
        if listener.is_settled() {
            break;
        }

        let seen = Observation {
            closed: listener
                .window()
                .map_or(true, |w| is_window_closed(w.as_ref())),
            cancelled: listener.is_cancelled(),
            acked: listener.is_acked(),
        };
        if let Some(err) = countdown.tick(seen, listener.name(), &params) {
            debug!(name = %listener.name(), hash = %listener.hash(), error = %err, "watchdog rejecting request");
            listener.settle(Err(err));
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackNet;
    use crate::window::WindowRef;
    use xpost_core::DomainSpec;

    fn params(ack: u64, res: Option<u64>) -> WatchdogParams {
        WatchdogParams {
            origin: "https://parent.com".into(),
            ack_timeout_ms: ack,
            res_timeout_ms: res,
            cycle: Duration::from_millis(100),
        }
    }

    const IDLE: Observation = Observation {
        closed: false,
        cancelled: false,
        acked: false,
    };

    #[test]
    fn ack_timeout_fires_when_budget_runs_out() {
        let p = params(300, None);
        let mut c = Countdown::new(&p);
        assert!(c.tick(IDLE, "m", &p).is_none());
        assert!(c.tick(IDLE, "m", &p).is_none());
        assert!(matches!(
            c.tick(IDLE, "m", &p),
            Some(XpostError::AckTimeout { timeout_ms: 300, .. })
        ));
    }

    #[test]
    fn acked_request_times_out_on_response_not_ack() {
        let p = params(100, Some(300));
        let mut c = Countdown::new(&p);
        let acked = Observation { acked: true, ..IDLE };
        assert!(c.tick(acked, "m", &p).is_none());
        assert!(c.tick(acked, "m", &p).is_none());
        match c.tick(acked, "m", &p) {
            Some(XpostError::ResponseTimeout { name, origin, timeout_ms }) => {
                assert_eq!(name, "m");
                assert_eq!(origin, "https://parent.com");
                assert_eq!(timeout_ms, 300);
            }
            other => panic!("expected response timeout, got {other:?}"),
        }
    }

    #[test]
    fn unbounded_response_never_times_out() {
        let p = params(100, None);
        let mut c = Countdown::new(&p);
        let acked = Observation { acked: true, ..IDLE };
        for _ in 0..1000 {
            assert!(c.tick(acked, "m", &p).is_none());
        }
    }

    #[test]
    fn closed_window_wins_over_cancel_and_reports_phase() {
        let p = params(1000, None);
        let mut c = Countdown::new(&p);
        let seen = Observation { closed: true, cancelled: true, acked: false };
        assert!(matches!(
            c.tick(seen, "m", &p),
            Some(XpostError::WindowClosed { phase: WaitPhase::BeforeAck, .. })
        ));
        let seen = Observation { closed: true, cancelled: false, acked: true };
        assert!(matches!(
            c.tick(seen, "m", &p),
            Some(XpostError::WindowClosed { phase: WaitPhase::BeforeResponse, .. })
        ));
    }

    #[test]
    fn cancel_is_checked_before_countdown() {
        let p = params(100, None);
        let mut c = Countdown::new(&p);
        let seen = Observation { cancelled: true, ..IDLE };
        assert!(matches!(c.tick(seen, "m", &p), Some(XpostError::Cancelled { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn task_rejects_listener_after_ack_timeout() {
        let net = LoopbackNet::new();
        let win: WindowRef = net.open_window("https://child.com", None);
        let (listener, rx) = ResponseListener::new("m", "m_1", &win, DomainSpec::Wildcard);
        let start = time::Instant::now();
        let _dog = TimeoutWatchdog::start(listener, params(500, None));

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, XpostError::AckTimeout { .. }));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500) && elapsed < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_watchdog_never_settles() {
        let net = LoopbackNet::new();
        let win: WindowRef = net.open_window("https://child.com", None);
        let (listener, _rx) = ResponseListener::new("m", "m_1", &win, DomainSpec::Wildcard);
        let mut dog = TimeoutWatchdog::start(listener.clone(), params(200, None));
        dog.stop();
        dog.stop();

        time::sleep(Duration::from_millis(1000)).await;
        assert!(!listener.is_settled());
    }
}
