//! Press-and-hold gesture on a lead card.
//!
//! Tells a plain click (open the lead) apart from a hold-then-move (drag the
//! card to another pipeline column). The actual drag mechanics belong to the
//! board's sortable layer; this machine only decides when to hand over and
//! whether the release was a click.
//!
//! ```text
//! Idle --down--> Arming --hold elapsed--> Armed --up--> Idle
//!                  |                        |
//!                  +--up (click)--> Idle    +--leave/cancel--> Idle
//! ```

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::geometry::{Point, Rect};

/// How long the pointer must stay down before the card lifts.
pub const HOLD_THRESHOLD: Duration = Duration::from_millis(150);
/// Movement (per axis, in px) past which an armed press counts as a drag.
pub const MOVE_THRESHOLD_PX: f64 = 3.0;
/// Degrees of tilt per pixel of offset from the card centre.
const TILT_DIVISOR: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Mouse,
    Touch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Middle,
    Secondary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub meta: bool,
}

impl Modifiers {
    /// Ctrl on Windows/Linux, Cmd on macOS.
    pub fn opens_new_context(self) -> bool {
        self.ctrl || self.meta
    }
}

/// 3D tilt shown while the card is lifted, in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Tilt {
    pub rx: f64,
    pub ry: f64,
}

impl Tilt {
    fn from_offset(at: Point, bounds: &Rect) -> Self {
        let centre = bounds.centre();
        Tilt {
            rx: (at.y - centre.y) / TILT_DIVISOR,
            ry: (centre.x - at.x) / TILT_DIVISOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GestureEvent {
    PointerDown {
        input: InputKind,
        button: PointerButton,
        at: Point,
    },
    /// The hold timer for press number `press` fired.
    HoldElapsed { press: u64 },
    PointerMove { at: Point, bounds: Rect },
    PointerUp { modifiers: Modifiers },
    PointerLeave,
    PointerCancel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GesturePhase {
    Idle,
    Arming {
        press: u64,
        input: InputKind,
        origin: Point,
    },
    Armed {
        input: InputKind,
        origin: Point,
        tilt: Tilt,
        drag_started: bool,
    },
}

/// Side effects the host applies after a transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "effect")]
pub enum GestureEffect {
    StartHoldTimer {
        press: u64,
        #[serde(skip)]
        delay: Duration,
    },
    CancelHoldTimer,
    /// Show the lifted state (scale, gloss, haptic tick).
    Lift,
    /// Re-dispatch a primary pointer-down at `origin` so the sortable layer
    /// starts tracking.
    SynthesizePointerDown { origin: Point },
    SetTilt { tilt: Tilt },
    OpenDetail { lead_id: String },
    OpenInNewContext { path: String },
    /// Clear lifted visuals and tilt.
    Reset,
}

/// Gesture state for one lead card.
#[derive(Debug, Clone)]
pub struct DragGesture {
    lead_id: String,
    phase: GesturePhase,
    presses: u64,
}

impl DragGesture {
    pub fn new(lead_id: impl Into<String>) -> Self {
        Self {
            lead_id: lead_id.into(),
            phase: GesturePhase::Idle,
            presses: 0,
        }
    }

    pub fn phase(&self) -> &GesturePhase {
        &self.phase
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.phase, GesturePhase::Armed { .. })
    }

    pub fn drag_started(&self) -> bool {
        matches!(
            self.phase,
            GesturePhase::Armed {
                drag_started: true,
                ..
            }
        )
    }

    pub fn tilt(&self) -> Tilt {
        match self.phase {
            GesturePhase::Armed { tilt, .. } => tilt,
            _ => Tilt::default(),
        }
    }

    /// Path of the full lead page opened by a modified click.
    pub fn detail_path(&self) -> String {
        format!("/dashboard/leads/{}", self.lead_id)
    }

    /// Apply one event and return the effects for the host to perform.
    pub fn handle(&mut self, event: GestureEvent) -> Vec<GestureEffect> {
        let mut effects = Vec::new();
        let phase = std::mem::replace(&mut self.phase, GesturePhase::Idle);

        self.phase = match (phase, event) {
            (
                phase,
                GestureEvent::PointerDown {
                    input,
                    button,
                    at,
                },
            ) => {
                if button != PointerButton::Primary {
                    phase
                } else {
                    match phase {
                        GesturePhase::Arming { .. } => effects.push(GestureEffect::CancelHoldTimer),
                        GesturePhase::Armed { .. } => effects.push(GestureEffect::Reset),
                        GesturePhase::Idle => {}
                    }
                    self.presses += 1;
                    effects.push(GestureEffect::StartHoldTimer {
                        press: self.presses,
                        delay: HOLD_THRESHOLD,
                    });
                    GesturePhase::Arming {
                        press: self.presses,
                        input,
                        origin: at,
                    }
                }
            }

            (
                GesturePhase::Arming {
                    press,
                    input,
                    origin,
                },
                GestureEvent::HoldElapsed { press: fired },
            ) if press == fired => {
                effects.push(GestureEffect::Lift);
                if input == InputKind::Mouse {
                    effects.push(GestureEffect::SynthesizePointerDown { origin });
                }
                GesturePhase::Armed {
                    input,
                    origin,
                    tilt: Tilt::default(),
                    drag_started: false,
                }
            }

            (
                GesturePhase::Armed {
                    input,
                    origin,
                    drag_started: false,
                    ..
                },
                GestureEvent::PointerMove { at, bounds },
            ) => {
                let tilt = Tilt::from_offset(at, &bounds);
                effects.push(GestureEffect::SetTilt { tilt });
                let dx = (at.x - origin.x).abs();
                let dy = (at.y - origin.y).abs();
                GesturePhase::Armed {
                    input,
                    origin,
                    tilt,
                    drag_started: dx > MOVE_THRESHOLD_PX || dy > MOVE_THRESHOLD_PX,
                }
            }

            (GesturePhase::Arming { .. }, GestureEvent::PointerUp { modifiers }) => {
                effects.push(GestureEffect::CancelHoldTimer);
                effects.push(self.click(modifiers));
                effects.push(GestureEffect::Reset);
                GesturePhase::Idle
            }

            (GesturePhase::Armed { drag_started, .. }, GestureEvent::PointerUp { modifiers }) => {
                if !drag_started {
                    effects.push(self.click(modifiers));
                }
                effects.push(GestureEffect::Reset);
                GesturePhase::Idle
            }

            (
                GesturePhase::Arming { .. },
                GestureEvent::PointerLeave | GestureEvent::PointerCancel,
            ) => {
                effects.push(GestureEffect::CancelHoldTimer);
                effects.push(GestureEffect::Reset);
                GesturePhase::Idle
            }

            (GesturePhase::Armed { .. }, GestureEvent::PointerLeave | GestureEvent::PointerCancel) => {
                effects.push(GestureEffect::Reset);
                GesturePhase::Idle
            }

            // Stale timers, moves before arming, moves after a drag started,
            // and releases while idle change nothing.
            (phase, _) => phase,
        };

        effects
    }

    fn click(&self, modifiers: Modifiers) -> GestureEffect {
        if modifiers.opens_new_context() {
            GestureEffect::OpenInNewContext {
                path: self.detail_path(),
            }
        } else {
            GestureEffect::OpenDetail {
                lead_id: self.lead_id.clone(),
            }
        }
    }
}

/// Runs a `DragGesture` against real time.
///
/// Timer effects are handled here: `StartHoldTimer` spawns a sleep that posts
/// `HoldElapsed` onto the returned channel, `CancelHoldTimer` aborts it. Every
/// other effect is handed back to the caller. Events read from the channel
/// must be fed back through `dispatch`.
pub struct GestureDriver {
    gesture: DragGesture,
    timer: Option<JoinHandle<()>>,
    timer_tx: mpsc::UnboundedSender<GestureEvent>,
}

impl GestureDriver {
    pub fn new(lead_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<GestureEvent>) {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        (
            Self {
                gesture: DragGesture::new(lead_id),
                timer: None,
                timer_tx,
            },
            timer_rx,
        )
    }

    pub fn gesture(&self) -> &DragGesture {
        &self.gesture
    }

    /// Feed an event; returns the effects the UI has to apply.
    pub fn dispatch(&mut self, event: GestureEvent) -> Vec<GestureEffect> {
        let mut visible = Vec::new();
        for effect in self.gesture.handle(event) {
            match effect {
                GestureEffect::StartHoldTimer { press, delay } => {
                    self.cancel_timer();
                    let tx = self.timer_tx.clone();
                    self.timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(GestureEvent::HoldElapsed { press });
                    }));
                }
                GestureEffect::CancelHoldTimer => self.cancel_timer(),
                other => visible.push(other),
            }
        }
        visible
    }

    fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}

impl Drop for GestureDriver {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card() -> Rect {
        Rect::new(0.0, 0.0, 200.0, 80.0)
    }

    fn down(x: f64, y: f64) -> GestureEvent {
        GestureEvent::PointerDown {
            input: InputKind::Mouse,
            button: PointerButton::Primary,
            at: Point::new(x, y),
        }
    }

    fn mv(x: f64, y: f64) -> GestureEvent {
        GestureEvent::PointerMove {
            at: Point::new(x, y),
            bounds: card(),
        }
    }

    fn up() -> GestureEvent {
        GestureEvent::PointerUp {
            modifiers: Modifiers::default(),
        }
    }

    fn opened(effects: &[GestureEffect]) -> bool {
        effects.iter().any(|e| {
            matches!(
                e,
                GestureEffect::OpenDetail { .. } | GestureEffect::OpenInNewContext { .. }
            )
        })
    }

    #[test]
    fn quick_click_opens_detail_without_arming() {
        let mut g = DragGesture::new("lead-7");
        let effects = g.handle(down(50.0, 40.0));
        assert!(matches!(
            effects[0],
            GestureEffect::StartHoldTimer { press: 1, delay } if delay == HOLD_THRESHOLD
        ));
        assert!(!g.is_armed());

        let effects = g.handle(up());
        assert!(effects.contains(&GestureEffect::CancelHoldTimer));
        assert!(effects.contains(&GestureEffect::OpenDetail {
            lead_id: "lead-7".into()
        }));
        assert_eq!(g.phase(), &GesturePhase::Idle);
    }

    #[test]
    fn hold_then_move_starts_drag_and_suppresses_click() {
        let mut g = DragGesture::new("lead-7");
        g.handle(down(50.0, 40.0));
        let effects = g.handle(GestureEvent::HoldElapsed { press: 1 });
        assert_eq!(
            effects,
            vec![
                GestureEffect::Lift,
                GestureEffect::SynthesizePointerDown {
                    origin: Point::new(50.0, 40.0)
                }
            ]
        );
        assert!(g.is_armed());

        g.handle(mv(52.0, 41.0));
        assert!(!g.drag_started());
        g.handle(mv(54.0, 40.0));
        assert!(g.drag_started());

        let effects = g.handle(up());
        assert!(!opened(&effects));
        assert_eq!(effects, vec![GestureEffect::Reset]);
        assert_eq!(g.phase(), &GesturePhase::Idle);
    }

    #[test]
    fn hold_and_release_without_moving_is_still_a_click() {
        let mut g = DragGesture::new("lead-7");
        g.handle(down(10.0, 10.0));
        g.handle(GestureEvent::HoldElapsed { press: 1 });
        g.handle(mv(12.0, 13.0));
        let effects = g.handle(up());
        assert!(opened(&effects));
    }

    #[test]
    fn tilt_follows_offset_from_centre() {
        let mut g = DragGesture::new("lead-7");
        g.handle(down(100.0, 40.0));
        g.handle(GestureEvent::HoldElapsed { press: 1 });
        let effects = g.handle(mv(116.0, 56.0));
        assert_eq!(
            effects,
            vec![GestureEffect::SetTilt {
                tilt: Tilt { rx: 2.0, ry: -2.0 }
            }]
        );
        assert_eq!(g.tilt(), Tilt { rx: 2.0, ry: -2.0 });
    }

    #[test]
    fn secondary_button_is_ignored() {
        let mut g = DragGesture::new("lead-7");
        let effects = g.handle(GestureEvent::PointerDown {
            input: InputKind::Mouse,
            button: PointerButton::Secondary,
            at: Point::new(0.0, 0.0),
        });
        assert!(effects.is_empty());
        assert_eq!(g.phase(), &GesturePhase::Idle);
        assert!(g.handle(up()).is_empty());
    }

    #[test]
    fn modified_click_opens_new_context() {
        let mut g = DragGesture::new("lead-7");
        g.handle(down(0.0, 0.0));
        let effects = g.handle(GestureEvent::PointerUp {
            modifiers: Modifiers {
                ctrl: false,
                meta: true,
            },
        });
        assert!(effects.contains(&GestureEffect::OpenInNewContext {
            path: "/dashboard/leads/lead-7".into()
        }));
    }

    #[test]
    fn leave_resets_and_cancels_pending_timer() {
        let mut g = DragGesture::new("lead-7");
        g.handle(down(0.0, 0.0));
        let effects = g.handle(GestureEvent::PointerLeave);
        assert_eq!(
            effects,
            vec![GestureEffect::CancelHoldTimer, GestureEffect::Reset]
        );
        // The old timer firing late must not arm the card.
        assert!(g.handle(GestureEvent::HoldElapsed { press: 1 }).is_empty());
        assert_eq!(g.phase(), &GesturePhase::Idle);
    }

    #[test]
    fn stale_timer_from_previous_press_is_ignored() {
        let mut g = DragGesture::new("lead-7");
        g.handle(down(0.0, 0.0));
        g.handle(up());
        g.handle(down(0.0, 0.0));
        assert!(g.handle(GestureEvent::HoldElapsed { press: 1 }).is_empty());
        assert!(!g.is_armed());
        g.handle(GestureEvent::HoldElapsed { press: 2 });
        assert!(g.is_armed());
    }

    #[test]
    fn touch_lifts_without_synthesized_pointer() {
        let mut g = DragGesture::new("lead-7");
        g.handle(GestureEvent::PointerDown {
            input: InputKind::Touch,
            button: PointerButton::Primary,
            at: Point::new(5.0, 5.0),
        });
        let effects = g.handle(GestureEvent::HoldElapsed { press: 1 });
        assert_eq!(effects, vec![GestureEffect::Lift]);
    }

    #[test]
    fn cancel_or_leave_while_armed_resets_without_opening() {
        for ending in [GestureEvent::PointerCancel, GestureEvent::PointerLeave] {
            let mut g = DragGesture::new("lead-7");
            g.handle(down(50.0, 40.0));
            g.handle(GestureEvent::HoldElapsed { press: 1 });
            assert!(g.is_armed());

            let effects = g.handle(ending.clone());
            assert_eq!(effects, vec![GestureEffect::Reset], "{:?}", ending);
            assert_eq!(g.phase(), &GesturePhase::Idle);
            assert_eq!(g.tilt(), Tilt::default());

            // The release that follows belongs to no press.
            let effects = g.handle(up());
            assert!(!opened(&effects));
            assert!(effects.is_empty());
        }
    }

    #[test]
    fn touch_tap_opens_detail() {
        let mut g = DragGesture::new("lead-7");
        let effects = g.handle(GestureEvent::PointerDown {
            input: InputKind::Touch,
            button: PointerButton::Primary,
            at: Point::new(5.0, 5.0),
        });
        assert!(matches!(
            effects.as_slice(),
            [GestureEffect::StartHoldTimer { press: 1, .. }]
        ));

        let effects = g.handle(up());
        assert_eq!(
            effects,
            vec![
                GestureEffect::CancelHoldTimer,
                GestureEffect::OpenDetail {
                    lead_id: "lead-7".into()
                },
                GestureEffect::Reset,
            ]
        );
        assert_eq!(g.phase(), &GesturePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_fires_hold_timer_after_threshold() {
        let (mut driver, mut timer_rx) = GestureDriver::new("lead-7");
        let visible = driver.dispatch(down(20.0, 20.0));
        assert!(visible.is_empty());

        let fired = timer_rx.recv().await.expect("hold timer fired");
        assert_eq!(fired, GestureEvent::HoldElapsed { press: 1 });
        let visible = driver.dispatch(fired);
        assert!(visible.contains(&GestureEffect::Lift));
        assert!(driver.gesture().is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn driver_release_before_threshold_aborts_timer() {
        let (mut driver, mut timer_rx) = GestureDriver::new("lead-7");
        driver.dispatch(down(20.0, 20.0));
        tokio::time::sleep(Duration::from_millis(100)).await;
        let visible = driver.dispatch(up());
        assert!(opened(&visible));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(timer_rx.try_recv().is_err());
        assert!(!driver.gesture().is_armed());
    }
}
