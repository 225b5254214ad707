//! Waypoint coverage for transitions: the tracked joint has to pass along
//! the recorded trajectory, not just arrive at the next pose.

use log::debug;
use std::collections::VecDeque;

use crate::comparator::Comparator;
use crate::config::TransitionTuning;
use crate::pose::{Landmark, NormalizedFrame, Vec3, normalize};
use crate::reference::{ReferenceMotion, Segment};

#[derive(Debug, Clone)]
pub struct PathTracker {
    joint: Landmark,
    tolerance_px: f32,
    canvas: (f32, f32),
    segment_idx: Option<usize>,
    queue: VecDeque<Vec3>,
    initial: usize,
}

/// Nearest starting, holding or ending segment before and after `idx`.
pub fn surrounding_holds(
    motion: &ReferenceMotion,
    idx: usize,
) -> (Option<&Segment>, Option<&Segment>) {
    let segs = motion.segments();
    let prev = segs[..idx.min(segs.len())]
        .iter()
        .rev()
        .find(|s| s.kind.is_held());
    let next = segs.iter().skip(idx + 1).find(|s| s.kind.is_held());
    (prev, next)
}

/// Reference frames between the held segments around `idx`, hip-relative.
pub fn reference_path(motion: &ReferenceMotion, idx: usize) -> Vec<NormalizedFrame> {
    let Some(seg) = motion.segment(idx) else {
        return Vec::new();
    };
    let (prev, next) = surrounding_holds(motion, idx);
    let from = prev.map_or(seg.start, |p| p.end);
    let to = next.map_or(seg.end + 1, |n| n.start);
    motion
        .frames_between(from, to)
        .iter()
        .filter_map(|f| normalize(f).map(|(n, _)| n))
        .collect()
}

impl PathTracker {
    pub fn new(tuning: &TransitionTuning) -> Self {
        Self {
            joint: Landmark::from_index(tuning.tracked_joint).unwrap_or(Landmark::LeftWrist),
            tolerance_px: tuning.waypoint_tolerance_px,
            canvas: (tuning.canvas_width, tuning.canvas_height),
            segment_idx: None,
            queue: VecDeque::new(),
            initial: 0,
        }
    }

    pub fn joint(&self) -> Landmark {
        self.joint
    }

    /// Apply new tuning in place. Consumed waypoints survive unless the
    /// tracked joint changes.
    pub fn retune(&mut self, tuning: &TransitionTuning) {
        self.tolerance_px = tuning.waypoint_tolerance_px;
        self.canvas = (tuning.canvas_width, tuning.canvas_height);
        let joint = Landmark::from_index(tuning.tracked_joint).unwrap_or(Landmark::LeftWrist);
        if joint != self.joint {
            debug!("tracked joint now {joint:?}, dropping waypoints");
            self.joint = joint;
            self.reset();
        }
    }

    /// Drop the queue so the next [`PathTracker::sync`] rebuilds it.
    pub fn reset(&mut self) {
        self.segment_idx = None;
        self.queue.clear();
        self.initial = 0;
    }

    /// Rebuild the queue if the active segment changed since the last build.
    pub fn sync(&mut self, motion: &ReferenceMotion, comparator: &Comparator, idx: usize) {
        if self.segment_idx == Some(idx) {
            return;
        }
        self.rebuild(motion, comparator, idx);
    }

    fn rebuild(&mut self, motion: &ReferenceMotion, comparator: &Comparator, idx: usize) {
        let (prev, _) = surrounding_holds(motion, idx);
        self.queue = reference_path(motion, idx)
            .iter()
            .filter(|frame| match prev {
                // held-pose jitter is not motion
                Some(p) => {
                    !comparator
                        .matches(frame, &p.reference, p.reference_hip, &p.thresholds)
                        .success
                }
                None => true,
            })
            .map(|frame| frame.get(self.joint))
            .collect();
        self.initial = self.queue.len();
        self.segment_idx = Some(idx);
        debug!("transition {idx}: {} waypoints", self.initial);
    }

    fn within_tolerance(&self, a: Vec3, b: Vec3) -> bool {
        let dx = (a.x - b.x) * self.canvas.0;
        let dy = (a.y - b.y) * self.canvas.1;
        dx.hypot(dy) <= self.tolerance_px
    }

    /// Consume every leading waypoint the user's joint is close to, then
    /// report coverage.
    pub fn advance(&mut self, user: &NormalizedFrame) -> f32 {
        let p = user.get(self.joint);
        while let Some(head) = self.queue.front() {
            if !self.within_tolerance(*head, p) {
                break;
            }
            self.queue.pop_front();
        }
        self.coverage()
    }

    /// Consumed / initial queue length; an empty path counts as fully covered.
    pub fn coverage(&self) -> f32 {
        if self.initial == 0 {
            return 1.0;
        }
        (self.initial - self.queue.len()) as f32 / self.initial as f32
    }

    /// Remaining waypoints placed around `hip` in image coordinates.
    pub fn remaining(&self, hip: Vec3) -> Vec<Vec3> {
        self.queue.iter().map(|p| hip + *p).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{FacingThresholds, Frame, math::tests::standing_frame};
    use crate::reference::RawReference;

    /// Both arms raised to height `y`: wrists level with it, elbows halfway.
    fn arms_at(y: f32) -> Frame {
        let mut f = standing_frame();
        let mut set = |l: Landmark, x: f32, y: f32| {
            f.points[l.index()].x = x;
            f.points[l.index()].y = y;
        };
        set(Landmark::LeftWrist, 0.7, y);
        set(Landmark::RightWrist, 0.2, y);
        set(Landmark::LeftElbow, 0.6, (0.6 + y) / 2.0);
        set(Landmark::RightElbow, 0.3, (0.6 + y) / 2.0);
        f
    }

    const SWEEP: [f32; 10] = [0.6, 0.6, 0.6, 0.5, 0.4, 0.3, 0.2, 0.1, 0.1, 0.1];

    fn motion(segments: &[(usize, usize, &str)]) -> ReferenceMotion {
        let mut raw = RawReference::default();
        for y in SWEEP {
            raw.push_frame(&arms_at(y));
        }
        for (start, end, phase) in segments {
            raw.push_segment(*start, *end, phase, &[]);
        }
        ReferenceMotion::build(&raw, FacingThresholds::default()).unwrap()
    }

    /// Arms sweep up between the starting pose and the raised hold.
    fn sweep() -> ReferenceMotion {
        motion(&[(0, 2, "starting"), (2, 7, "transition_up"), (7, 9, "holding_up")])
    }

    fn tracker() -> PathTracker {
        PathTracker::new(&TransitionTuning::default())
    }

    fn user(y: f32) -> NormalizedFrame {
        normalize(&arms_at(y)).unwrap().0
    }

    #[test]
    fn queue_skips_frames_matching_previous_hold() {
        let mut t = tracker();
        t.sync(&sweep(), &Comparator::new(0.3, 2), 1);
        // frames 2..7, and frame 2 is still the starting pose
        assert_eq!(t.initial, 4);
        assert_eq!(t.coverage(), 0.0);
        assert_eq!(t.remaining(Vec3::ZERO).len(), 4);
    }

    #[test]
    fn consecutive_close_waypoints_pop_together() {
        let mut t = tracker();
        t.sync(&sweep(), &Comparator::new(0.3, 2), 1);
        assert_eq!(t.advance(&user(0.9)), 0.0);
        assert_eq!(t.advance(&user(0.5)), 0.25);
        for y in [0.4, 0.3, 0.2, 0.1] {
            t.advance(&user(y));
        }
        assert_eq!(t.coverage(), 1.0);
        assert!(t.remaining(Vec3::ZERO).is_empty());
    }

    #[test]
    fn skipping_to_the_end_gives_low_coverage() {
        let mut t = tracker();
        t.sync(&sweep(), &Comparator::new(0.3, 2), 1);
        assert!(t.advance(&user(0.1)) < 0.85);
    }

    #[test]
    fn sync_rebuilds_only_on_change_or_reset() {
        let m = sweep();
        let c = Comparator::new(0.3, 2);
        let mut t = tracker();
        t.sync(&m, &c, 1);
        for y in [0.5, 0.4, 0.3, 0.2] {
            t.advance(&user(y));
        }
        t.sync(&m, &c, 1);
        assert_eq!(t.coverage(), 1.0);
        t.reset();
        t.sync(&m, &c, 1);
        assert_eq!(t.coverage(), 0.0);
    }

    #[test]
    fn retune_keeps_progress_for_the_same_joint() {
        let m = sweep();
        let c = Comparator::new(0.3, 2);
        let mut t = tracker();
        t.sync(&m, &c, 1);
        t.advance(&user(0.5));
        assert_eq!(t.coverage(), 0.25);

        let wider = TransitionTuning {
            waypoint_tolerance_px: 80.0,
            ..TransitionTuning::default()
        };
        t.retune(&wider);
        t.sync(&m, &c, 1);
        assert_eq!(t.coverage(), 0.25);
        assert_eq!(t.tolerance_px, 80.0);

        let other_joint = TransitionTuning {
            tracked_joint: Landmark::RightWrist.index(),
            ..TransitionTuning::default()
        };
        t.retune(&other_joint);
        assert_eq!(t.joint(), Landmark::RightWrist);
        t.sync(&m, &c, 1);
        assert_eq!(t.coverage(), 0.0);
    }

    #[test]
    fn relaxation_does_not_bound_a_path() {
        let m = motion(&[(0, 0, "relaxation"), (1, 7, "transition_up"), (7, 9, "holding_up")]);
        let (prev, next) = surrounding_holds(&m, 1);
        assert!(prev.is_none());
        assert_eq!(next.map(|s| s.phase.as_str()), Some("holding_up"));
        // frames 1..7: the path starts at the transition, not after the rest
        assert_eq!(reference_path(&m, 1).len(), 6);
    }

    #[test]
    fn empty_path_is_fully_covered() {
        let m = motion(&[(0, 3, "starting"), (3, 3, "transition_up"), (3, 5, "holding_up")]);
        let mut t = tracker();
        t.sync(&m, &Comparator::new(0.3, 2), 1);
        assert_eq!(t.initial, 0);
        assert_eq!(t.advance(&user(0.9)), 1.0);
    }
}
