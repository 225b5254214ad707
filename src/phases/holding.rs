use log::info;

use crate::feedback::{FeedbackEvent, FeedbackSink};

use super::{Interrupt, PhaseContext, PhaseOutcome, TickInput};

/// Hold the segment's pose for `min_hold_duration`, then finish on the first
/// deliberate departure from it.
///
/// Departure means the whole-pose deviation exceeds the mean scaled threshold
/// times `exit_threshold_multiplier`; small wobbles after a completed hold do
/// not end the phase.
#[derive(Debug, Clone, Default)]
pub struct HoldingPhase {
    hold_start: Option<f64>,
    completed_hold: bool,
    ever_matched: bool,
}

impl HoldingPhase {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn process(
        &mut self,
        ctx: &PhaseContext<'_>,
        input: &TickInput<'_>,
        sink: &mut dyn FeedbackSink,
    ) -> PhaseOutcome {
        let seg = ctx.segment();
        let timing = &ctx.tuning.timing;
        let now = input.now;

        let verdict = input.observation.map(|obs| {
            let v = ctx
                .comparator
                .matches(&obs.pose, &seg.reference, obs.hip, &seg.thresholds);
            sink.emit(FeedbackEvent::Score {
                label: seg.phase.clone(),
                value: v.deviation,
                threshold: v.tolerance,
            });
            v
        });

        match verdict {
            Some(v) if v.success => {
                self.ever_matched = true;
                let start = *self.hold_start.get_or_insert(now);
                let held = now - start;
                let mut out = PhaseOutcome::matched();
                if !self.completed_hold {
                    if held >= timing.min_hold_duration {
                        self.completed_hold = true;
                        out.hold_reached = true;
                        info!("{}: hold complete after {held:.1}s", seg.phase);
                        sink.emit(FeedbackEvent::hint(
                            "hold_done",
                            "Hold complete, release when ready",
                        ));
                    } else {
                        sink.emit(FeedbackEvent::Countdown {
                            remaining: timing.min_hold_duration - held,
                        });
                    }
                }
                out
            }
            other => {
                self.hold_start = None;
                let leaving = other.as_ref().is_some_and(|v| {
                    v.deviation > v.tolerance * ctx.tuning.matching.exit_threshold_multiplier
                });
                if self.completed_hold && leaving {
                    return PhaseOutcome::completed(false);
                }
                if let Some(v) = other {
                    sink.emit(FeedbackEvent::Guidance { arrows: v.arrows });
                }
                if !self.ever_matched && now - ctx.segment_started > timing.holding_abandonment {
                    return PhaseOutcome::interrupted(Interrupt::Abandoned);
                }
                PhaseOutcome::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::Comparator;
    use crate::config::Tuning;
    use crate::feedback::VecSink;
    use crate::phases::Observation;
    use crate::phases::tests::{arm_raise, arms_at, observe, tuning};
    use crate::reference::ReferenceMotion;

    struct Rig {
        motion: ReferenceMotion,
        comparator: Comparator,
        tuning: Tuning,
        phase: HoldingPhase,
        sink: VecSink,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                motion: arm_raise(),
                comparator: Comparator::new(0.3, 2),
                tuning: tuning(),
                phase: HoldingPhase::default(),
                sink: VecSink::default(),
            }
        }

        fn step(&mut self, now: f64, obs: Option<&Observation>) -> PhaseOutcome {
            let ctx = PhaseContext {
                motion: &self.motion,
                index: 2,
                comparator: &self.comparator,
                tuning: &self.tuning,
                segment_started: 0.0,
            };
            self.phase
                .process(&ctx, &TickInput { now, observation: obs }, &mut self.sink)
        }
    }

    #[test]
    fn completes_only_after_hold_and_departure() {
        let mut rig = Rig::new();
        let up = observe(&arms_at(0.1));
        let down = observe(&arms_at(0.6));

        assert!(rig.step(0.0, Some(&up)).matched);
        assert!(!rig.step(1.0, Some(&up)).hold_reached);
        let out = rig.step(2.0, Some(&up));
        assert!(out.hold_reached && !out.completed);
        // still holding after the minimum: stay
        assert!(!rig.step(3.0, Some(&up)).completed);
        assert!(rig.step(3.5, Some(&down)).completed);
    }

    #[test]
    fn departure_before_min_hold_does_not_complete() {
        let mut rig = Rig::new();
        let up = observe(&arms_at(0.1));
        let down = observe(&arms_at(0.6));
        rig.step(0.0, Some(&up));
        assert!(!rig.step(1.0, Some(&down)).completed);
        // timer restarted by the mismatch
        assert!(!rig.step(1.5, Some(&up)).hold_reached);
        assert!(rig.step(3.5, Some(&up)).hold_reached);
    }

    #[test]
    fn never_matching_is_abandoned() {
        let mut rig = Rig::new();
        let down = observe(&arms_at(0.6));
        rig.step(0.0, Some(&down));
        assert!(rig.step(5.0, None).interrupt.is_none());
        let out = rig.step(5.1, Some(&down));
        assert_eq!(out.interrupt, Some(Interrupt::Abandoned));
        assert!(!out.completed);
    }

    #[test]
    fn abandonment_counts_from_segment_entry() {
        // entered at 0.0, first observation only at 5.5
        let mut rig = Rig::new();
        let out = rig.step(5.5, Some(&observe(&arms_at(0.6))));
        assert_eq!(out.interrupt, Some(Interrupt::Abandoned));
    }

    #[test]
    fn a_match_rules_out_abandonment() {
        let mut rig = Rig::new();
        let up = observe(&arms_at(0.1));
        let down = observe(&arms_at(0.6));
        rig.step(0.0, Some(&up));
        let out = rig.step(6.0, Some(&down));
        assert!(out.interrupt.is_none() && !out.completed);
    }

    #[test]
    fn reset_clears_completed_hold() {
        let mut rig = Rig::new();
        let up = observe(&arms_at(0.1));
        rig.step(0.0, Some(&up));
        rig.step(2.0, Some(&up));
        assert!(rig.phase.completed_hold);
        rig.phase.reset();
        assert!(!rig.phase.completed_hold);
    }

    #[test]
    fn emits_score_per_observed_tick() {
        let mut rig = Rig::new();
        let up = observe(&arms_at(0.1));
        rig.step(0.0, Some(&up));
        rig.step(0.5, None);
        let scores = rig
            .sink
            .events
            .iter()
            .filter(|e| matches!(e, FeedbackEvent::Score { label, .. } if label == "holding_up"))
            .count();
        assert_eq!(scores, 1);
    }
}
