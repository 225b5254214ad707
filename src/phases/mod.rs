//! One evaluator per segment kind. Each keeps only its own hold timers; the
//! segment entry time comes through [`PhaseContext`] and the observation
//! through [`TickInput`] on every call.

mod hold_gate;
mod holding;
mod relaxation;
mod transition;

pub use hold_gate::HoldGate;
pub use holding::HoldingPhase;
pub use relaxation::RelaxationPhase;
pub use transition::TransitionPhase;

use crate::comparator::Comparator;
use crate::config::Tuning;
use crate::feedback::FeedbackSink;
use crate::path_tracker::PathTracker;
use crate::pose::{Facing, NormalizedFrame, Vec3};
use crate::reference::{ReferenceMotion, Segment, SegmentKind};

/// A usable pose for this tick.
#[derive(Debug, Clone)]
pub struct Observation {
    pub pose: NormalizedFrame,
    pub hip: Vec3,
    pub facing: Facing,
}

#[derive(Debug, Clone, Copy)]
pub struct TickInput<'a> {
    /// Session clock in seconds.
    pub now: f64,
    /// `None` when the pose was lost or incomplete this tick.
    pub observation: Option<&'a Observation>,
}

/// Read-only surroundings of the active segment.
#[derive(Clone, Copy)]
pub struct PhaseContext<'a> {
    pub motion: &'a ReferenceMotion,
    pub index: usize,
    pub comparator: &'a Comparator,
    pub tuning: &'a Tuning,
    /// Session time the active segment (or relaxation) was entered.
    pub segment_started: f64,
}

impl<'a> PhaseContext<'a> {
    pub fn segment(&self) -> &'a Segment {
        &self.motion.segments()[self.index]
    }
}

/// A handler stopped for a policy reason rather than success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    TimedOut,
    Abandoned,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseOutcome {
    pub completed: bool,
    /// The pose matched this tick's target.
    pub matched: bool,
    /// A hold reached its minimum duration on this tick.
    pub hold_reached: bool,
    pub interrupt: Option<Interrupt>,
}

impl PhaseOutcome {
    fn matched() -> Self {
        Self {
            matched: true,
            ..Self::default()
        }
    }

    fn completed(matched: bool) -> Self {
        Self {
            completed: true,
            matched,
            ..Self::default()
        }
    }

    fn interrupted(interrupt: Interrupt) -> Self {
        Self {
            completed: interrupt == Interrupt::TimedOut,
            interrupt: Some(interrupt),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum PhaseHandler {
    Starting(HoldGate),
    Transition(TransitionPhase),
    Holding(HoldingPhase),
    Ending(HoldGate),
    Relaxation(RelaxationPhase),
}

impl PhaseHandler {
    pub fn for_segment(segment: &Segment) -> Self {
        match segment.kind {
            SegmentKind::Starting => Self::Starting(HoldGate::default()),
            SegmentKind::Transition => Self::Transition(TransitionPhase::default()),
            SegmentKind::Holding => Self::Holding(HoldingPhase::default()),
            SegmentKind::Ending => Self::Ending(HoldGate::default()),
            SegmentKind::Relaxation => Self::Relaxation(RelaxationPhase),
        }
    }

    /// Forget all timers.
    pub fn reset(&mut self) {
        match self {
            Self::Starting(h) | Self::Ending(h) => h.reset(),
            Self::Holding(h) => h.reset(),
            Self::Transition(_) | Self::Relaxation(_) => {}
        }
    }

    pub fn process(
        &mut self,
        ctx: &PhaseContext<'_>,
        input: &TickInput<'_>,
        tracker: &mut PathTracker,
        sink: &mut dyn FeedbackSink,
    ) -> PhaseOutcome {
        match self {
            Self::Starting(h) => h.process(ctx, ctx.segment(), input, sink),
            // ending returns to where the repetition began
            Self::Ending(h) => h.process(ctx, ctx.motion.starting_segment(), input, sink),
            Self::Transition(h) => h.process(ctx, input, tracker, sink),
            Self::Holding(h) => h.process(ctx, input, sink),
            Self::Relaxation(h) => h.process(ctx, input, sink),
        }
    }
}
