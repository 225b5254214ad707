//! The per-frame session state machine.
//!
//! Each [`SessionController::tick`] turns one observation into one
//! [`TickOutput`]: relaxation preempts everything, otherwise the active
//! segment's handler runs and its completion drives segment, rep and
//! exercise advancement.

use log::{debug, error, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::comparator::Comparator;
use crate::config::Tuning;
use crate::feedback::{FeedbackEvent, FeedbackSink, RelaxReason};
use crate::path_tracker::{PathTracker, reference_path};
use crate::phases::{
    Interrupt, Observation, PhaseContext, PhaseHandler, RelaxationPhase, TickInput,
};
use crate::plan::{Exercise, ExercisePlan};
use crate::pose::{
    Frame, LANDMARK_COUNT, check_visibility, detect_facing, dtw, facing_of, normalize,
};
use crate::reference::{MotionSource, ReferenceError, ReferenceMotion, SegmentKind};

pub const PHASE_RELAXATION: &str = "relaxation";
pub const PHASE_COMPLETE: &str = "complete";
pub const PHASE_ERROR: &str = "error";

/// Threshold reported with the transition score when the hold gives none.
const DEFAULT_PATH_THRESHOLD: f32 = 0.1;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot start exercise '{exercise}': {source}")]
    CannotStart {
        exercise: String,
        #[source]
        source: ReferenceError,
    },
    #[error("plan has no exercise {0}")]
    NoExercise(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickOutput {
    pub phase: String,
    pub exercise: String,
    pub reps: u32,
    pub target_reps: u32,
}

/// Mutable session bookkeeping. Times are session-clock seconds.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub exercise_idx: usize,
    pub segment_idx: usize,
    pub phase_start: f64,
    pub count: u32,
    pub last_valid_pose: f64,
    pub last_valid_hold: f64,
    /// Entry time while relaxing.
    pub relaxation: Option<f64>,
    /// Tracked-joint positions seen during the current transition.
    pub transition_path: Vec<dtw::Point>,
    pub last_holding_idx: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub exercise: String,
    pub exercises_finished: usize,
    pub exercises_total: usize,
    pub reps: u32,
    pub target_reps: u32,
    pub complete: bool,
}

pub struct SessionController<S: MotionSource> {
    plan: ExercisePlan,
    source: S,
    tuning: Tuning,
    comparator: Comparator,
    motion: ReferenceMotion,
    handlers: Vec<PhaseHandler>,
    tracker: PathTracker,
    state: SessionState,
    started: bool,
    tracker_reset: bool,
    pose_lost_warned: bool,
    missing_warned: bool,
    complete: bool,
    halted: Option<String>,
}

fn load_motion<S: MotionSource>(
    source: &S,
    exercise: &Exercise,
    tuning: &Tuning,
) -> Result<ReferenceMotion, SessionError> {
    let cannot_start = |source| SessionError::CannotStart {
        exercise: exercise.name.clone(),
        source,
    };
    let raw = source.fetch(&exercise.reference).map_err(cannot_start)?;
    ReferenceMotion::build(&raw, tuning.matching.facing()).map_err(cannot_start)
}

fn handlers_for(motion: &ReferenceMotion) -> Vec<PhaseHandler> {
    motion.segments().iter().map(PhaseHandler::for_segment).collect()
}

impl<S: MotionSource> SessionController<S> {
    /// Load the first exercise. Refuses to start when its reference yields
    /// no usable segments.
    pub fn new(plan: ExercisePlan, source: S, tuning: Tuning) -> Result<Self, SessionError> {
        let first = plan.get(0).ok_or(SessionError::NoExercise(0))?;
        let motion = load_motion(&source, first, &tuning)?;
        info!(
            "starting '{}' ({} reps, {} segments)",
            first.name,
            first.reps,
            motion.segments().len()
        );
        Ok(Self {
            handlers: handlers_for(&motion),
            comparator: Comparator::new(
                tuning.matching.default_joint_threshold,
                tuning.matching.dtw_radius,
            ),
            tracker: PathTracker::new(&tuning.transition),
            plan,
            source,
            tuning,
            motion,
            state: SessionState::default(),
            started: false,
            tracker_reset: false,
            pose_lost_warned: false,
            missing_warned: false,
            complete: false,
            halted: None,
        })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn halted(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    fn exercise(&self) -> Option<&Exercise> {
        self.plan.get(self.state.exercise_idx)
    }

    /// Swap tuning between ticks. Handler timers and waypoint progress are
    /// kept; segment facings stay as derived at load time.
    pub fn set_tuning(&mut self, tuning: Tuning) {
        self.comparator = Comparator::new(
            tuning.matching.default_joint_threshold,
            tuning.matching.dtw_radius,
        );
        self.tracker.retune(&tuning.transition);
        self.tuning = tuning;
        info!("tuning updated");
    }

    pub fn summary(&self) -> SessionSummary {
        let finished = if self.complete {
            self.plan.len()
        } else {
            self.state.exercise_idx
        };
        SessionSummary {
            exercise: self.exercise().map(|e| e.name.clone()).unwrap_or_default(),
            exercises_finished: finished,
            exercises_total: self.plan.len(),
            reps: self.state.count,
            target_reps: self.exercise().map_or(0, |e| e.reps),
            complete: self.complete,
        }
    }

    fn output(&self, phase: &str) -> TickOutput {
        TickOutput {
            phase: phase.to_string(),
            exercise: self.exercise().map(|e| e.name.clone()).unwrap_or_default(),
            reps: self.state.count,
            target_reps: self.exercise().map_or(0, |e| e.reps),
        }
    }

    /// Advance the session by one observation. `frame` is `None` when the
    /// provider saw no pose this tick.
    pub fn tick(
        &mut self,
        now: f64,
        frame: Option<&Frame>,
        sink: &mut dyn FeedbackSink,
    ) -> TickOutput {
        if self.halted.is_some() {
            return self.output(PHASE_ERROR);
        }
        if self.complete {
            return self.output(PHASE_COMPLETE);
        }
        if !self.started {
            self.started = true;
            self.state.phase_start = now;
            self.state.last_valid_pose = now;
            self.state.last_valid_hold = now;
        }

        let observation = self.observe(now, frame, sink);

        if self.state.segment_idx >= self.motion.segments().len() {
            warn!(
                "segment index {} out of range, resetting",
                self.state.segment_idx
            );
            self.state.segment_idx = 0;
        }

        if self.state.relaxation.is_some() {
            return self.relax(now, observation.as_ref(), sink);
        }
        if let Some(reason) = self.relaxation_reason(now, frame, observation.as_ref()) {
            self.enter_relaxation(now, reason, sink);
            return self.relax(now, observation.as_ref(), sink);
        }

        let idx = self.state.segment_idx;
        let kind = self.motion.segments()[idx].kind;
        let phase = self.motion.segments()[idx].phase.clone();
        if self.tracker_reset {
            self.tracker.reset();
            self.tracker_reset = false;
        }

        let input = TickInput {
            now,
            observation: observation.as_ref(),
        };
        let ctx = PhaseContext {
            motion: &self.motion,
            index: idx,
            comparator: &self.comparator,
            tuning: &self.tuning,
            segment_started: self.state.phase_start,
        };
        let outcome = self.handlers[idx].process(&ctx, &input, &mut self.tracker, sink);

        if kind == SegmentKind::Transition {
            if let Some(obs) = &observation {
                let p = obs.pose.get(self.tracker.joint());
                self.state.transition_path.push(vec![p.x, p.y]);
            }
        }
        if kind == SegmentKind::Holding {
            if outcome.matched {
                self.state.last_valid_hold = now;
            }
            if outcome.hold_reached {
                self.score_transition(idx, sink);
            }
        }

        match outcome.interrupt {
            Some(Interrupt::Abandoned) => {
                self.enter_relaxation(now, RelaxReason::HoldAbandoned, sink);
                return self.output(PHASE_RELAXATION);
            }
            Some(Interrupt::TimedOut) => {
                self.enter_relaxation(now, RelaxReason::TransitionTimeout, sink);
                return self.output(PHASE_RELAXATION);
            }
            None => {}
        }

        if outcome.completed {
            match kind {
                SegmentKind::Ending => self.complete_rep(now, sink),
                SegmentKind::Holding => {
                    self.state.last_holding_idx = Some(idx);
                    self.state.transition_path.clear();
                    self.goto(idx + 1, now, sink);
                }
                SegmentKind::Starting | SegmentKind::Transition | SegmentKind::Relaxation => {
                    self.goto(idx + 1, now, sink);
                }
            }
        } else if kind == SegmentKind::Holding
            && now - self.state.last_valid_hold > self.tuning.timing.holding_abandonment
        {
            info!("{phase}: hold lost for too long, back to the start");
            self.goto(0, now, sink);
        }

        if self.halted.is_some() {
            return self.output(PHASE_ERROR);
        }
        if self.complete {
            return self.output(PHASE_COMPLETE);
        }
        self.output(&phase)
    }

    /// Build this tick's observation; logs pose loss and missing landmarks
    /// once per episode.
    fn observe(
        &mut self,
        now: f64,
        frame: Option<&Frame>,
        sink: &mut dyn FeedbackSink,
    ) -> Option<Observation> {
        let Some(frame) = frame.filter(|f| !f.is_empty()) else {
            if !self.pose_lost_warned {
                warn!("no pose landmarks detected");
                sink.emit(FeedbackEvent::hint("pose_lost", "Step into view"));
                self.pose_lost_warned = true;
            }
            return None;
        };
        if self.pose_lost_warned {
            info!("pose landmarks regained");
            self.pose_lost_warned = false;
        }

        let visibility = check_visibility(frame);
        if !visibility.all_visible {
            if self.missing_warned {
                debug!("still missing landmarks {:?}", visibility.missing);
            } else {
                warn!("missing landmarks {:?}", visibility.missing);
                sink.emit(FeedbackEvent::hint("missing", "Keep your whole body in view"));
                self.missing_warned = true;
            }
            return None;
        }
        if self.missing_warned {
            info!("all landmarks visible again");
            self.missing_warned = false;
        }

        let (pose, hip) = normalize(frame)?;
        self.state.last_valid_pose = now;
        Some(Observation {
            facing: facing_of(&pose, self.tuning.matching.facing()),
            pose,
            hip,
        })
    }

    fn relaxation_reason(
        &self,
        now: f64,
        frame: Option<&Frame>,
        observation: Option<&Observation>,
    ) -> Option<RelaxReason> {
        let timing = &self.tuning.timing;
        if observation.is_none() && now - self.state.last_valid_pose > timing.relaxation_threshold
        {
            return Some(RelaxReason::PoseLost);
        }

        let seg = &self.motion.segments()[self.state.segment_idx];
        match seg.kind {
            SegmentKind::Starting | SegmentKind::Ending => {
                let facing = observation.map(|o| o.facing).or_else(|| {
                    frame
                        .filter(|f| f.len() >= LANDMARK_COUNT)
                        .map(|f| detect_facing(f, self.tuning.matching.facing()))
                });
                match facing {
                    Some(f) if f != seg.facing => {
                        debug!("facing {f}, {} expects {}", seg.phase, seg.facing);
                        Some(RelaxReason::WrongFacing)
                    }
                    _ => None,
                }
            }
            // transition timeout and hold abandonment come from the handlers
            _ => None,
        }
    }

    fn enter_relaxation(&mut self, now: f64, reason: RelaxReason, sink: &mut dyn FeedbackSink) {
        info!("entering relaxation: {}", reason.as_str());
        self.state.relaxation = Some(now);
        self.state.transition_path.clear();
        self.state.last_holding_idx = None;
        if matches!(
            reason,
            RelaxReason::TransitionTimeout | RelaxReason::HoldAbandoned
        ) {
            self.state.segment_idx = 0;
        }
        sink.emit(FeedbackEvent::RelaxationEntered { reason });
    }

    fn relax(
        &mut self,
        now: f64,
        observation: Option<&Observation>,
        sink: &mut dyn FeedbackSink,
    ) -> TickOutput {
        let entered = self.state.relaxation.unwrap_or(now);
        let ctx = PhaseContext {
            motion: &self.motion,
            index: 0,
            comparator: &self.comparator,
            tuning: &self.tuning,
            segment_started: entered,
        };
        let outcome = RelaxationPhase.process(&ctx, &TickInput { now, observation }, sink);
        let ceiling = now - entered > self.tuning.timing.relaxation_ceiling;
        if outcome.completed || ceiling {
            if ceiling {
                info!("relaxation ceiling reached");
            }
            self.exit_relaxation(now, sink);
        }
        self.output(PHASE_RELAXATION)
    }

    fn exit_relaxation(&mut self, now: f64, sink: &mut dyn FeedbackSink) {
        info!("exiting relaxation");
        self.state.relaxation = None;
        self.state.last_valid_pose = now;
        for h in &mut self.handlers {
            h.reset();
        }
        sink.emit(FeedbackEvent::RelaxationExited);
        self.goto(0, now, sink);
    }

    /// Enter segment `idx` (wrapping to 0 past the end) with fresh timers.
    fn goto(&mut self, idx: usize, now: f64, sink: &mut dyn FeedbackSink) {
        let idx = if idx < self.motion.segments().len() {
            idx
        } else {
            0
        };
        self.state.segment_idx = idx;
        self.state.phase_start = now;
        self.state.last_valid_hold = now;
        if idx == 0 {
            self.state.last_holding_idx = None;
        }
        self.handlers[idx].reset();

        let seg = &self.motion.segments()[idx];
        if seg.kind == SegmentKind::Starting {
            self.tracker_reset = true;
        }
        debug!("segment {idx}: {}", seg.phase);
        sink.emit(FeedbackEvent::PhaseChanged {
            phase: seg.phase.clone(),
        });
    }

    fn complete_rep(&mut self, now: f64, sink: &mut dyn FeedbackSink) {
        let Some(exercise) = self.exercise().cloned() else {
            return;
        };
        self.state.count += 1;
        info!("{}: rep {}/{}", exercise.name, self.state.count, exercise.reps);
        sink.emit(FeedbackEvent::RepComplete {
            exercise: exercise.name.clone(),
            count: self.state.count,
            target: exercise.reps,
        });

        if self.state.count >= exercise.reps {
            let next = self.state.exercise_idx + 1;
            if next >= self.plan.len() {
                info!("workout complete");
                self.complete = true;
                sink.emit(FeedbackEvent::WorkoutComplete);
                return;
            }
            if let Err(e) = self.load_exercise(next) {
                error!("{e}");
                sink.emit(FeedbackEvent::Fatal {
                    message: e.to_string(),
                });
                self.halted = Some(e.to_string());
                return;
            }
            if let Some(ex) = self.exercise() {
                info!("next exercise: {}", ex.name);
                sink.emit(FeedbackEvent::ExerciseChanged {
                    exercise: ex.name.clone(),
                    target: ex.reps,
                });
            }
        }
        self.goto(0, now, sink);
    }

    fn load_exercise(&mut self, idx: usize) -> Result<(), SessionError> {
        let exercise = self.plan.get(idx).ok_or(SessionError::NoExercise(idx))?;
        let motion = load_motion(&self.source, exercise, &self.tuning)?;
        self.handlers = handlers_for(&motion);
        self.motion = motion;
        self.tracker.reset();
        self.state.exercise_idx = idx;
        self.state.count = 0;
        self.state.segment_idx = 0;
        self.state.transition_path.clear();
        self.state.last_holding_idx = None;
        Ok(())
    }

    /// Compare the path the user took during the transition since the last
    /// completed hold with the recorded one.
    fn score_transition(&mut self, hold_idx: usize, sink: &mut dyn FeedbackSink) {
        if self.state.transition_path.is_empty() {
            return;
        }
        let segments = self.motion.segments();
        let from = self.state.last_holding_idx.map_or(0, |i| i + 1);
        let Some(t_idx) = (from..hold_idx)
            .rev()
            .find(|&i| segments[i].kind == SegmentKind::Transition)
        else {
            return;
        };
        let joint = self.tracker.joint();
        let recorded: Vec<dtw::Point> = reference_path(&self.motion, t_idx)
            .iter()
            .map(|f| {
                let p = f.get(joint);
                vec![p.x, p.y]
            })
            .collect();
        if recorded.is_empty() {
            return;
        }

        let user = std::mem::take(&mut self.state.transition_path);
        match dtw::fast_dtw(&user, &recorded, self.tuning.matching.dtw_radius) {
            Ok(alignment) => {
                let threshold = segments[hold_idx]
                    .thresholds
                    .first()
                    .copied()
                    .filter(|t| *t > 0.0)
                    .unwrap_or(DEFAULT_PATH_THRESHOLD);
                sink.emit(FeedbackEvent::Score {
                    label: "transition".into(),
                    value: alignment.mean_cost() as f32,
                    threshold,
                });
            }
            Err(e) => debug!("transition score skipped: {e}"),
        }
    }
}
