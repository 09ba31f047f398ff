//! Call status poller: tracks an outbound call until it finishes.
//!
//! One background task per started call: fetch immediately, then sleep for
//! the session's current interval, and repeat until the session says stop.
//! Ticks are sequential, so two status requests for the same poller are never
//! in flight at once.
//!
//! Cancellation is generation based. `start` and `cancel` bump the generation
//! under the control lock and wake the loop through a `Notify`; the loop
//! races every request and every sleep against that wake-up, and a response
//! is only published while holding the same lock with its generation still
//! current. A late response from a cancelled or superseded loop is dropped.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Notify};

use super::client::CallStatusSource;
use super::session::{clamp_base_interval, ErrorTransition, PollDecision, PollSession, StopReason};
use super::{CallStatusReport, RingCentralConfig, MAX_CONSECUTIVE_ERRORS};
use crate::error::UiError;

/// What the UI layer sees after every processed poll.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSnapshot {
    pub session: PollSession,
    pub last_report: Option<CallStatusReport>,
    pub last_error: Option<UiError>,
    pub stopped: Option<StopReason>,
    pub polls_completed: u32,
}

impl PollSnapshot {
    pub fn is_active(&self) -> bool {
        self.stopped.is_none() && !self.session.call_id().is_empty()
    }
}

struct ControlState {
    generation: u64,
    session: Option<PollSession>,
}

struct Control {
    state: Mutex<ControlState>,
    wake: Notify,
    snapshots: watch::Sender<PollSnapshot>,
}

impl Control {
    fn is_current(&self, generation: u64) -> bool {
        self.state
            .lock()
            .map(|s| s.generation == generation)
            .unwrap_or(false)
    }

    /// Resolve once `generation` has been superseded or cancelled.
    async fn superseded(&self, generation: u64) {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_current(generation) {
                return;
            }
            notified.await;
        }
    }

    /// Apply `update` to the published snapshot if `generation` is still live.
    fn publish(
        &self,
        generation: u64,
        session: &PollSession,
        update: impl FnOnce(&mut PollSnapshot),
    ) -> bool {
        let mut state = match self.state.lock() {
            Ok(g) => g,
            Err(_) => return false,
        };
        if state.generation != generation {
            return false;
        }
        state.session = Some(session.clone());
        self.snapshots.send_modify(|snap| {
            snap.session = session.clone();
            update(snap);
        });
        true
    }
}

/// Handle to a cancellable status poll loop.
///
/// Dropping the handle cancels the loop.
pub struct CallPoller {
    source: Arc<dyn CallStatusSource>,
    base_interval: Duration,
    max_consecutive_errors: u32,
    control: Arc<Control>,
}

impl CallPoller {
    /// A `base_interval` under one second is raised to one second.
    pub fn new(source: Arc<dyn CallStatusSource>, base_interval: Duration) -> Self {
        let base_interval = clamp_base_interval(base_interval);
        let (snapshots, _) = watch::channel(PollSnapshot::default());
        Self {
            source,
            base_interval,
            max_consecutive_errors: MAX_CONSECUTIVE_ERRORS,
            control: Arc::new(Control {
                state: Mutex::new(ControlState {
                    generation: 0,
                    session: None,
                }),
                wake: Notify::new(),
                snapshots,
            }),
        }
    }

    pub fn from_config(source: Arc<dyn CallStatusSource>, config: &RingCentralConfig) -> Self {
        Self::new(source, Duration::from_millis(config.poll_interval_ms))
            .with_max_consecutive_errors(config.max_consecutive_errors)
    }

    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max.max(1);
        self
    }

    /// Subscribe to poll snapshots.
    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot> {
        self.control.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.control.snapshots.borrow().clone()
    }

    /// Start polling `call_id`, superseding any loop already running.
    ///
    /// Backoff counters carry over only when `call_id` matches the previous
    /// call. Must be called from within a tokio runtime.
    pub fn start(&self, call_id: &str) {
        let call_id = call_id.trim();
        if call_id.is_empty() {
            log::warn!("Call poller: ignoring start with empty call id");
            return;
        }

        let (generation, session) = {
            let mut state = match self.control.state.lock() {
                Ok(g) => g,
                Err(_) => return,
            };
            state.generation += 1;
            let session = match state.session.take() {
                Some(prev) => prev.rearm(call_id),
                None => PollSession::new(call_id, self.base_interval),
            }
            .with_max_consecutive_errors(self.max_consecutive_errors);
            state.session = Some(session.clone());
            self.control.snapshots.send_replace(PollSnapshot {
                session: session.clone(),
                ..Default::default()
            });
            (state.generation, session)
        };
        self.control.wake.notify_waiters();

        log::info!(
            "Call poller: tracking call {} every {}s",
            call_id,
            session.poll_interval().as_secs()
        );

        let control = self.control.clone();
        let source = self.source.clone();
        tokio::spawn(run_poll_loop(control, source, generation, session));
    }

    /// Stop the active loop. In-flight responses are discarded.
    pub fn cancel(&self) {
        let cancelled = {
            let mut state = match self.control.state.lock() {
                Ok(g) => g,
                Err(_) => return,
            };
            let active = self.control.snapshots.borrow().is_active();
            state.generation += 1;
            if active {
                self.control.snapshots.send_modify(|snap| {
                    snap.stopped = Some(StopReason::Cancelled);
                });
            }
            active
        };
        self.control.wake.notify_waiters();
        if cancelled {
            log::info!("Call poller: status polling cancelled");
        }
    }
}

impl Drop for CallPoller {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_poll_loop(
    control: Arc<Control>,
    source: Arc<dyn CallStatusSource>,
    generation: u64,
    mut session: PollSession,
) {
    loop {
        let call_id = session.call_id().to_string();
        let fetched = tokio::select! {
            result = source.fetch_status(&call_id) => result,
            _ = control.superseded(generation) => return,
        };

        let mut rate_limited = false;
        let (next, decision) = match &fetched {
            Ok(report) => session.apply_success(report.phase()),
            Err(e) => {
                log::warn!("Call poller: error checking status of {}: {}", call_id, e);
                rate_limited = ErrorTransition::for_error(e) == ErrorTransition::RateLimit;
                session.apply_error(e)
            }
        };
        session = next;

        let stopped = match decision {
            PollDecision::Stop(reason) => Some(reason),
            PollDecision::Continue(_) => None,
        };
        let published = control.publish(generation, &session, |snap| {
            snap.polls_completed += 1;
            snap.stopped = stopped;
            match fetched {
                Ok(report) => {
                    snap.last_report = Some(report);
                    snap.last_error = None;
                }
                Err(e) => snap.last_error = Some(UiError::from(&e)),
            }
        });
        if !published {
            log::debug!("Call poller: discarding stale response for {}", call_id);
            return;
        }

        let delay = match decision {
            PollDecision::Continue(delay) => delay,
            PollDecision::Stop(reason) => {
                match reason {
                    StopReason::Terminal(phase) => log::info!(
                        "Call poller: call {} completed ({:?}), stopped status polling",
                        call_id,
                        phase
                    ),
                    StopReason::ResourceGone => log::info!(
                        "Call poller: call {} resource not found, stopping polling",
                        call_id
                    ),
                    StopReason::TooManyErrors => log::warn!(
                        "Call poller: too many consecutive errors for {}, stopping polling",
                        call_id
                    ),
                    StopReason::Cancelled => {}
                }
                return;
            }
        };

        if rate_limited {
            log::info!(
                "Call poller: rate limited, poll interval now {}s",
                delay.as_secs()
            );
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {},
            _ = control.superseded(generation) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelephonyError;
    use crate::ringcentral::{CallDetails, CallDetailsStatus, CallPhase};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    const BASE: Duration = Duration::from_millis(15_000);

    fn report(status: &str) -> CallStatusReport {
        CallStatusReport {
            status_description: Some(format!("Call is {}", status)),
            call_details: Some(CallDetails {
                status: Some(CallDetailsStatus {
                    call_status: Some(status.to_string()),
                }),
            }),
            ..Default::default()
        }
    }

    /// Replays scripted results; repeats `InProgress` once the script runs out.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<CallStatusReport, TelephonyError>>>,
        calls: Mutex<Vec<(String, Instant)>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<CallStatusReport, TelephonyError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
                gate: None,
            })
        }

        fn gated(
            script: Vec<Result<CallStatusReport, TelephonyError>>,
            gate: Arc<Notify>,
        ) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
                gate: Some(gate),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
        }
    }

    #[async_trait]
    impl CallStatusSource for ScriptedSource {
        async fn fetch_status(&self, call_id: &str) -> Result<CallStatusReport, TelephonyError> {
            self.calls
                .lock()
                .unwrap()
                .push((call_id.to_string(), Instant::now()));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(report("InProgress")))
        }
    }

    async fn wait_stopped(rx: &mut watch::Receiver<PollSnapshot>) -> PollSnapshot {
        loop {
            {
                let snap = rx.borrow_and_update();
                if snap.stopped.is_some() {
                    return snap.clone();
                }
            }
            rx.changed().await.expect("poller dropped");
        }
    }

    /// Paused-clock gaps land on timer ticks; allow for millisecond rounding.
    fn assert_gap(actual: Duration, expected: Duration) {
        let diff = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        assert!(
            diff <= Duration::from_millis(5),
            "expected gap {:?}, got {:?}",
            expected,
            actual
        );
    }

    fn api_error() -> TelephonyError {
        TelephonyError::Api {
            status: 500,
            message: "boom".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_status_stops_further_requests() {
        let source = ScriptedSource::new(vec![Ok(report("InProgress")), Ok(report("Success"))]);
        let poller = CallPoller::new(source.clone(), BASE);
        let mut rx = poller.subscribe();

        poller.start("call-1");
        let snap = wait_stopped(&mut rx).await;
        assert_eq!(snap.stopped, Some(StopReason::Terminal(CallPhase::Success)));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn three_generic_failures_stop_without_a_fourth_request() {
        let source = ScriptedSource::new(vec![
            Err(api_error()),
            Err(TelephonyError::Network("connection reset".into())),
            Err(api_error()),
        ]);
        let poller = CallPoller::new(source.clone(), BASE);
        let mut rx = poller.subscribe();

        poller.start("call-1");
        let snap = wait_stopped(&mut rx).await;
        assert_eq!(snap.stopped, Some(StopReason::TooManyErrors));
        assert!(snap.last_error.is_some());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(source.call_count(), 3);

        let times = source.call_times();
        assert_gap(times[1] - times[0], Duration::from_millis(20_000));
        assert_gap(times[2] - times[1], Duration::from_millis(25_000));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_stretches_the_next_interval() {
        let source = ScriptedSource::new(vec![
            Err(TelephonyError::RateLimited),
            Err(TelephonyError::RateLimited),
            Err(TelephonyError::RateLimited),
            Ok(report("Busy")),
        ]);
        let poller = CallPoller::new(source.clone(), BASE);
        let mut rx = poller.subscribe();

        poller.start("call-1");
        wait_stopped(&mut rx).await;

        let times = source.call_times();
        assert_eq!(times.len(), 4);
        assert_gap(times[1] - times[0], BASE * 3);
        assert_gap(times[2] - times[1], BASE * 8);
        assert_gap(times[3] - times[2], BASE * 8);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_failures_returns_to_base_interval() {
        let source = ScriptedSource::new(vec![
            Err(api_error()),
            Err(api_error()),
            Ok(report("InProgress")),
            Ok(report("Failed")),
        ]);
        let poller = CallPoller::new(source.clone(), BASE);
        let mut rx = poller.subscribe();

        poller.start("call-1");
        let snap = wait_stopped(&mut rx).await;
        assert_eq!(snap.stopped, Some(StopReason::Terminal(CallPhase::Failed)));
        assert_eq!(snap.session.consecutive_errors(), 0);

        let times = source.call_times();
        assert_gap(times[3] - times[2], BASE);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_stops_permanently() {
        let source = ScriptedSource::new(vec![Err(TelephonyError::NotFound(
            "Resource for parameter [ringOutId] is not found".into(),
        ))]);
        let poller = CallPoller::new(source.clone(), BASE);
        let mut rx = poller.subscribe();

        poller.start("call-1");
        let snap = wait_stopped(&mut rx).await;
        assert_eq!(snap.stopped, Some(StopReason::ResourceGone));
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_in_flight_response() {
        let gate = Arc::new(Notify::new());
        let source = ScriptedSource::gated(vec![Ok(report("Success"))], gate.clone());
        let poller = CallPoller::new(source.clone(), BASE);
        let rx = poller.subscribe();

        poller.start("call-1");
        while source.call_count() == 0 {
            tokio::task::yield_now().await;
        }

        poller.cancel();
        gate.notify_waiters();
        tokio::time::sleep(Duration::from_secs(600)).await;

        let snap = rx.borrow().clone();
        assert_eq!(snap.stopped, Some(StopReason::Cancelled));
        assert_eq!(snap.polls_completed, 0);
        assert!(snap.last_report.is_none());
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_cannot_publish() {
        let source = ScriptedSource::new(vec![]);
        let poller = CallPoller::new(source, BASE);
        poller.start("call-1");
        let stale = poller.control.state.lock().unwrap().generation;
        poller.cancel();

        let session = PollSession::new("call-1", BASE);
        let published = poller.control.publish(stale, &session, |snap| {
            snap.polls_completed = 99;
        });
        assert!(!published);
        assert_ne!(poller.snapshot().polls_completed, 99);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_with_a_new_call_resets_backoff() {
        let source = ScriptedSource::new(vec![Err(TelephonyError::RateLimited)]);
        let poller = CallPoller::new(source.clone(), BASE);
        let mut rx = poller.subscribe();

        poller.start("call-1");
        loop {
            rx.changed().await.unwrap();
            if rx.borrow().polls_completed == 1 {
                break;
            }
        }
        assert_eq!(poller.snapshot().session.backoff_multiplier(), 3);

        poller.start("call-2");
        let snap = poller.snapshot();
        assert_eq!(snap.session.call_id(), "call-2");
        assert_eq!(snap.session.backoff_multiplier(), 1);
        assert_eq!(snap.session.poll_interval(), BASE);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_polling() {
        let source = ScriptedSource::new(vec![]);
        let poller = CallPoller::new(source.clone(), BASE);
        poller.start("call-1");
        while source.call_count() == 0 {
            tokio::task::yield_now().await;
        }
        drop(poller);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_config_still_waits_between_requests() {
        let source = ScriptedSource::new(vec![]);
        let config: RingCentralConfig = serde_json::from_str(r#"{"pollIntervalMs":0}"#).unwrap();
        let poller = CallPoller::from_config(source.clone(), &config);

        poller.start("call-1");
        assert_eq!(poller.snapshot().session.poll_interval(), Duration::from_secs(1));
        for _ in 0..500 {
            tokio::task::yield_now().await;
        }
        assert_eq!(source.call_count(), 1);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(source.call_count(), 2);
        let times = source.call_times();
        assert_gap(times[1] - times[0], Duration::from_secs(1));
    }
}
