//! Side-channel events for whoever renders or voices the session, plus the
//! cue router that turns events into throttled cue ids.

use log::{error, info};
use serde::Serialize;
use std::{collections::HashMap, io::Write};

use crate::comparator::GuidanceArrow;
use crate::pose::Vec3;

/// Why the session dropped into relaxation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelaxReason {
    PoseLost,
    WrongFacing,
    TransitionTimeout,
    HoldAbandoned,
}

impl RelaxReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PoseLost => "pose lost",
            Self::WrongFacing => "wrong facing",
            Self::TransitionTimeout => "transition timed out",
            Self::HoldAbandoned => "hold abandoned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FeedbackEvent {
    /// On-screen instruction; `key` identifies it for cue bindings.
    Hint { key: String, text: String },
    Countdown { remaining: f64 },
    Score { label: String, value: f32, threshold: f32 },
    Guidance { arrows: Vec<GuidanceArrow> },
    /// Waypoints still to visit, in image coordinates.
    Waypoints { remaining: Vec<Vec3>, coverage: f32 },
    TooFast { coverage: f32 },
    PhaseChanged { phase: String },
    RepComplete { exercise: String, count: u32, target: u32 },
    ExerciseChanged { exercise: String, target: u32 },
    WorkoutComplete,
    RelaxationEntered { reason: RelaxReason },
    RelaxationExited,
    Cue { id: String },
    Fatal { message: String },
}

impl FeedbackEvent {
    pub fn hint(key: &str, text: impl Into<String>) -> Self {
        Self::Hint {
            key: key.to_string(),
            text: text.into(),
        }
    }

    /// Binding key looked up in the profile's `[bindings]` table.
    pub fn binding_key(&self) -> Option<String> {
        let key = match self {
            Self::Hint { key, .. } => format!("hint.{key}"),
            Self::TooFast { .. } => "transition.too_fast".into(),
            Self::PhaseChanged { phase } => format!("phase.{phase}"),
            Self::RepComplete { .. } => "rep.complete".into(),
            Self::ExerciseChanged { .. } => "exercise.next".into(),
            Self::WorkoutComplete => "workout.complete".into(),
            Self::RelaxationEntered { .. } => "relaxation.enter".into(),
            Self::RelaxationExited => "relaxation.exit".into(),
            _ => return None,
        };
        Some(key)
    }
}

/// Receiver of feedback events. Emitting never fails the session.
pub trait FeedbackSink {
    fn emit(&mut self, event: FeedbackEvent);
}

impl<S: FeedbackSink + ?Sized> FeedbackSink for Box<S> {
    fn emit(&mut self, event: FeedbackEvent) {
        (**self).emit(event);
    }
}

#[derive(Debug, Default)]
pub struct NullSink;

impl FeedbackSink for NullSink {
    fn emit(&mut self, _event: FeedbackEvent) {}
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    pub events: Vec<FeedbackEvent>,
}

impl FeedbackSink for VecSink {
    fn emit(&mut self, event: FeedbackEvent) {
        self.events.push(event);
    }
}

/// Writes each event as one JSON line.
pub struct JsonLinesSink<W: Write> {
    out: W,
    failed: bool,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, failed: false }
    }
}

impl<W: Write> FeedbackSink for JsonLinesSink<W> {
    fn emit(&mut self, event: FeedbackEvent) {
        let res = serde_json::to_string(&event)
            .map_err(std::io::Error::from)
            .and_then(|line| writeln!(self.out, "{line}"));
        match res {
            Ok(()) => self.failed = false,
            Err(e) if !self.failed => {
                error!("feedback write failed: {e}");
                self.failed = true;
            }
            Err(_) => {}
        }
    }
}

/// Per-cue throttle: a cue id fires at most once per window.
#[derive(Debug, Clone, Default)]
pub struct CueCooldown {
    window: f64,
    last: HashMap<String, f64>,
}

impl CueCooldown {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window: window_ms as f64 / 1000.0,
            last: HashMap::new(),
        }
    }

    /// Record and allow the cue if its window has passed.
    pub fn try_fire(&mut self, id: &str, now: f64) -> bool {
        if let Some(last) = self.last.get(id) {
            if now - last < self.window {
                return false;
            }
        }
        self.last.insert(id.to_string(), now);
        true
    }

    pub fn reset(&mut self) {
        self.last.clear();
    }
}

/// Forwards every event to `inner` and adds a `Cue` event for events whose
/// binding maps to `cue:<id>`, subject to the cooldown.
pub struct CueRouter<S: FeedbackSink> {
    inner: S,
    bindings: HashMap<String, String>,
    cooldown: CueCooldown,
    clock: f64,
}

impl<S: FeedbackSink> CueRouter<S> {
    pub fn new(inner: S, bindings: HashMap<String, String>, cooldown_ms: u64) -> Self {
        Self {
            inner,
            bindings,
            cooldown: CueCooldown::new(cooldown_ms),
            clock: 0.0,
        }
    }

    /// Session time used for the cooldown of subsequent events.
    pub fn set_clock(&mut self, now: f64) {
        self.clock = now;
    }

    pub fn rebind(&mut self, bindings: HashMap<String, String>, cooldown_ms: u64) {
        self.bindings = bindings;
        let mut fresh = CueCooldown::new(cooldown_ms);
        std::mem::swap(&mut fresh.last, &mut self.cooldown.last);
        self.cooldown = fresh;
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: FeedbackSink> FeedbackSink for CueRouter<S> {
    fn emit(&mut self, event: FeedbackEvent) {
        let action = event
            .binding_key()
            .and_then(|k| self.bindings.get(&k).map(|a| (k, a.trim().to_string())));
        self.inner.emit(event);

        let Some((key, action)) = action else {
            return;
        };
        if let Some(id) = action.strip_prefix("cue:") {
            let id = id.trim();
            if self.cooldown.try_fire(id, self.clock) {
                self.inner.emit(FeedbackEvent::Cue { id: id.to_string() });
            }
        } else if action == "log" {
            info!("feedback: {key}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> CueRouter<VecSink> {
        let mut b = HashMap::new();
        b.insert("rep.complete".to_string(), "cue:ding".to_string());
        b.insert("hint.face".to_string(), "mute".to_string());
        CueRouter::new(VecSink::default(), b, 1500)
    }

    fn rep() -> FeedbackEvent {
        FeedbackEvent::RepComplete {
            exercise: "squat".into(),
            count: 1,
            target: 3,
        }
    }

    fn cues(sink: &VecSink) -> usize {
        sink.events
            .iter()
            .filter(|e| matches!(e, FeedbackEvent::Cue { .. }))
            .count()
    }

    #[test]
    fn cooldown_is_per_id() {
        let mut c = CueCooldown::new(1500);
        assert!(c.try_fire("a", 0.0));
        assert!(!c.try_fire("a", 1.0));
        assert!(c.try_fire("b", 1.0));
        assert!(c.try_fire("a", 1.5));
        c.reset();
        assert!(c.try_fire("a", 1.6));
    }

    #[test]
    fn router_throttles_bound_cues() {
        let mut r = router();
        r.set_clock(10.0);
        r.emit(rep());
        r.set_clock(10.5);
        r.emit(rep());
        r.set_clock(12.0);
        r.emit(rep());
        let sink = r.into_inner();
        assert_eq!(sink.events.len(), 5);
        assert_eq!(cues(&sink), 2);
        assert_eq!(sink.events[1], FeedbackEvent::Cue { id: "ding".into() });
    }

    #[test]
    fn muted_and_unbound_events_pass_through() {
        let mut r = router();
        r.emit(FeedbackEvent::hint("face", "Face front"));
        r.emit(FeedbackEvent::Countdown { remaining: 1.0 });
        assert_eq!(r.inner().events.len(), 2);
        assert_eq!(cues(r.inner()), 0);
    }

    #[test]
    fn json_lines_are_tagged() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.emit(FeedbackEvent::WorkoutComplete);
        sink.emit(FeedbackEvent::TooFast { coverage: 0.5 });
        let text = String::from_utf8(sink.out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], r#"{"event":"workout_complete"}"#);
        assert!(lines[1].starts_with(r#"{"event":"too_fast""#));
    }
}
