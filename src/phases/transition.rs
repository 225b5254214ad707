use log::info;

use crate::feedback::{FeedbackEvent, FeedbackSink};
use crate::path_tracker::PathTracker;

use super::{Interrupt, PhaseContext, PhaseOutcome, TickInput};

/// Move into the next segment's pose along the recorded trajectory, within
/// `transition_timeout` of entering the segment.
#[derive(Debug, Clone, Default)]
pub struct TransitionPhase;

impl TransitionPhase {
    pub fn process(
        &mut self,
        ctx: &PhaseContext<'_>,
        input: &TickInput<'_>,
        tracker: &mut PathTracker,
        sink: &mut dyn FeedbackSink,
    ) -> PhaseOutcome {
        if input.now - ctx.segment_started > ctx.tuning.timing.transition_timeout {
            return PhaseOutcome::interrupted(Interrupt::TimedOut);
        }

        let Some(obs) = input.observation else {
            return PhaseOutcome::default();
        };

        tracker.sync(ctx.motion, ctx.comparator, ctx.index);
        let coverage = tracker.advance(&obs.pose);
        sink.emit(FeedbackEvent::Waypoints {
            remaining: tracker.remaining(obs.hip),
            coverage,
        });

        let target = ctx
            .motion
            .segment(ctx.index + 1)
            .unwrap_or_else(|| ctx.motion.starting_segment());
        let verdict = ctx
            .comparator
            .matches(&obs.pose, &target.reference, obs.hip, &target.thresholds);
        if !verdict.success {
            sink.emit(FeedbackEvent::Guidance {
                arrows: verdict.arrows,
            });
            return PhaseOutcome::default();
        }

        if coverage < ctx.tuning.transition.good_coverage {
            info!(
                "{}: reached target with {:.0}% path coverage",
                ctx.segment().phase,
                coverage * 100.0
            );
            sink.emit(FeedbackEvent::TooFast { coverage });
        }
        PhaseOutcome::completed(true)
    }
}
