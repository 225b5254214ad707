use crate::feedback::{FeedbackEvent, FeedbackSink};
use crate::reference::Segment;

use super::{PhaseContext, PhaseOutcome, TickInput};

/// Starting and ending: face the expected way and match the target pose
/// continuously for `hold_duration`.
#[derive(Debug, Clone, Default)]
pub struct HoldGate {
    first_match: Option<f64>,
}

impl HoldGate {
    pub fn reset(&mut self) {
        self.first_match = None;
    }

    pub fn process(
        &mut self,
        ctx: &PhaseContext<'_>,
        target: &Segment,
        input: &TickInput<'_>,
        sink: &mut dyn FeedbackSink,
    ) -> PhaseOutcome {
        let expected = ctx.segment().facing;
        let Some(obs) = input.observation else {
            self.first_match = None;
            return PhaseOutcome::default();
        };
        if obs.facing != expected {
            self.first_match = None;
            sink.emit(FeedbackEvent::hint("face", format!("Face {expected} to start")));
            return PhaseOutcome::default();
        }

        let verdict = ctx
            .comparator
            .matches(&obs.pose, &target.reference, obs.hip, &target.thresholds);
        if !verdict.success {
            self.first_match = None;
            sink.emit(FeedbackEvent::Guidance {
                arrows: verdict.arrows,
            });
            return PhaseOutcome::default();
        }

        let first = *self.first_match.get_or_insert(input.now);
        let held = input.now - first;
        let needed = ctx.tuning.timing.hold_duration;
        if held >= needed {
            self.first_match = None;
            return PhaseOutcome::completed(true);
        }
        sink.emit(FeedbackEvent::Countdown {
            remaining: needed - held,
        });
        PhaseOutcome::matched()
    }
}
