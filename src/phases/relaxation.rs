use crate::feedback::{FeedbackEvent, FeedbackSink};
use crate::pose::frame_distance;

use super::{PhaseContext, PhaseOutcome, TickInput};

/// Rest until the user is back in the starting pose, facing the same way.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelaxationPhase;

impl RelaxationPhase {
    pub fn process(
        &self,
        ctx: &PhaseContext<'_>,
        input: &TickInput<'_>,
        sink: &mut dyn FeedbackSink,
    ) -> PhaseOutcome {
        sink.emit(FeedbackEvent::hint("relax", "Relax and breathe"));
        let Some(obs) = input.observation else {
            return PhaseOutcome::default();
        };
        let start = ctx.motion.starting_segment();
        let distance = frame_distance(&obs.pose, &start.reference);
        if distance < ctx.tuning.matching.relaxation_distance && obs.facing == start.facing {
            return PhaseOutcome::completed(true);
        }
        PhaseOutcome::default()
    }
}
