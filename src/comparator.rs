//! Pose comparison: does the user's pose match a reference pose?

use serde::Serialize;

use crate::pose::{Landmark, NormalizedFrame, Vec3, dtw};
use crate::reference::joint_threshold;

/// Joints that vote on a match: shoulders, elbows, wrists, knees, ankles.
pub const TRACKED_JOINTS: [Landmark; 10] = [
    Landmark::LeftShoulder,
    Landmark::RightShoulder,
    Landmark::LeftElbow,
    Landmark::RightElbow,
    Landmark::LeftWrist,
    Landmark::RightWrist,
    Landmark::LeftKnee,
    Landmark::RightKnee,
    Landmark::LeftAnkle,
    Landmark::RightAnkle,
];

/// Votes needed out of [`TRACKED_JOINTS`].
pub const REQUIRED_PASSES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JointCheck {
    pub joint: Landmark,
    pub distance: f32,
    /// Raw threshold scaled by the joint's distance from the hip in the ideal pose.
    pub threshold: f32,
    pub passed: bool,
}

/// Arrow from where a joint is to where it should be, in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GuidanceArrow {
    pub joint: Landmark,
    pub from: Vec3,
    pub to: Vec3,
    pub on_target: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub success: bool,
    pub passes: usize,
    pub joints: Vec<JointCheck>,
    pub arrows: Vec<GuidanceArrow>,
    /// Mean aligned DTW cost between the user's and the ideal tracked-joint
    /// sequences.
    pub deviation: f32,
    /// Mean scaled threshold; the scale `deviation` is judged against.
    pub tolerance: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct Comparator {
    /// Used for joints the segment gives no usable threshold for.
    pub default_threshold: f32,
    pub dtw_radius: usize,
}

impl Comparator {
    pub fn new(default_threshold: f32, dtw_radius: usize) -> Self {
        Self {
            default_threshold,
            dtw_radius,
        }
    }

    fn raw_threshold(&self, thresholds: &[f32], joint: Landmark) -> f32 {
        joint_threshold(thresholds, joint.index(), self.default_threshold)
    }

    /// Compare `user` against `ideal`, both hip-relative. `hip` places the
    /// guidance arrows back into image coordinates.
    pub fn matches(
        &self,
        user: &NormalizedFrame,
        ideal: &NormalizedFrame,
        hip: Vec3,
        thresholds: &[f32],
    ) -> Verdict {
        let mut joints = Vec::with_capacity(TRACKED_JOINTS.len());
        let mut arrows = Vec::with_capacity(TRACKED_JOINTS.len());
        let mut user_seq = Vec::with_capacity(TRACKED_JOINTS.len());
        let mut ideal_seq = Vec::with_capacity(TRACKED_JOINTS.len());

        for joint in TRACKED_JOINTS {
            let u = user.get(joint);
            let i = ideal.get(joint);
            let up = vec![u.x, u.y];
            let ip = vec![i.x, i.y];

            let distance = dtw::distance(
                std::slice::from_ref(&up),
                std::slice::from_ref(&ip),
                self.dtw_radius,
            )
            .map(|d| d as f32)
            .unwrap_or(f32::INFINITY);
            let limb = i.planar_distance(Vec3::ZERO);
            let threshold = self.raw_threshold(thresholds, joint) * limb;
            let passed = distance < threshold;

            joints.push(JointCheck {
                joint,
                distance,
                threshold,
                passed,
            });
            arrows.push(GuidanceArrow {
                joint,
                from: hip + u,
                to: hip + i,
                on_target: passed,
            });
            user_seq.push(up);
            ideal_seq.push(ip);
        }

        let passes = joints.iter().filter(|j| j.passed).count();
        let deviation = dtw::fast_dtw(&user_seq, &ideal_seq, self.dtw_radius)
            .map(|a| a.mean_cost() as f32)
            .unwrap_or(f32::INFINITY);
        let tolerance = joints.iter().map(|j| j.threshold).sum::<f32>() / joints.len() as f32;

        Verdict {
            success: passes >= REQUIRED_PASSES,
            passes,
            joints,
            arrows,
            deviation,
            tolerance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Frame, math::tests::standing_frame, normalize};

    fn norm(f: &Frame) -> (NormalizedFrame, Vec3) {
        normalize(f).unwrap()
    }

    /// Standing frame with the tracked joints spread away from the hip so
    /// every limb length is non-zero.
    fn spread_frame() -> Frame {
        let mut f = standing_frame();
        for (n, joint) in TRACKED_JOINTS.iter().enumerate() {
            let k = &mut f.points[joint.index()];
            let side = if n % 2 == 0 { 1.0 } else { -1.0 };
            k.x = 0.45 + side * (0.1 + 0.02 * n as f32);
            k.y = 0.2 + 0.07 * n as f32;
        }
        f
    }

    fn shifted(f: &Frame, joints: &[Landmark], dx: f32) -> Frame {
        let mut out = f.clone();
        for j in joints {
            out.points[j.index()].x += dx;
        }
        out
    }

    #[test]
    fn identical_pose_passes_every_joint() {
        let (a, hip) = norm(&spread_frame());
        let c = Comparator::new(0.3, 2);
        let v = c.matches(&a, &a, hip, &[]);
        assert!(v.success);
        assert_eq!(v.passes, 10);
        assert_eq!(v.deviation, 0.0);
        assert!(v.tolerance > 0.0);
        assert_eq!(v.arrows.len(), 10);
        assert!(v.arrows.iter().all(|a| a.from == a.to && a.on_target));
    }

    #[test]
    fn two_noisy_joints_are_tolerated() {
        let base = spread_frame();
        let (ideal, _) = norm(&base);
        let (user, hip) = norm(&shifted(&base, &[Landmark::LeftWrist, Landmark::RightAnkle], 0.5));
        let v = Comparator::new(0.3, 2).matches(&user, &ideal, hip, &[]);
        assert_eq!(v.passes, 8);
        assert!(v.success);
    }

    #[test]
    fn three_off_joints_fail() {
        let base = spread_frame();
        let (ideal, _) = norm(&base);
        let off = [Landmark::LeftWrist, Landmark::RightWrist, Landmark::LeftKnee];
        let (user, hip) = norm(&shifted(&base, &off, 0.5));
        let v = Comparator::new(0.3, 2).matches(&user, &ideal, hip, &[]);
        assert_eq!(v.passes, 7);
        assert!(!v.success);
        assert!(v.deviation > 0.0);
        let wrist = v.joints.iter().find(|j| j.joint == Landmark::LeftWrist).unwrap();
        assert!(!wrist.passed);
        assert!((wrist.distance - 0.5).abs() < 1e-4);
    }

    #[test]
    fn thresholds_scale_with_limb_length() {
        let (a, hip) = norm(&spread_frame());
        let mut th = vec![0.0; 33];
        th[Landmark::LeftWrist.index()] = 0.5;
        let v = Comparator::new(0.3, 2).matches(&a, &a, hip, &th);
        let wrist = v.joints.iter().find(|j| j.joint == Landmark::LeftWrist).unwrap();
        let limb = a.get(Landmark::LeftWrist).planar_distance(Vec3::ZERO);
        assert!((wrist.threshold - 0.5 * limb).abs() < 1e-6);
        let knee = v.joints.iter().find(|j| j.joint == Landmark::LeftKnee).unwrap();
        let limb = a.get(Landmark::LeftKnee).planar_distance(Vec3::ZERO);
        assert!((knee.threshold - 0.3 * limb).abs() < 1e-6);
    }

    #[test]
    fn tightening_thresholds_never_creates_success() {
        let base = spread_frame();
        let (ideal, _) = norm(&base);
        let off = [Landmark::LeftElbow, Landmark::RightKnee, Landmark::LeftAnkle];
        let (user, hip) = norm(&shifted(&base, &off, 0.05));
        let c = Comparator::new(0.3, 2);
        let mut th = vec![1.0f32; 33];
        let mut was_success = c.matches(&user, &ideal, hip, &th).success;
        for _ in 0..12 {
            for t in th.iter_mut() {
                *t *= 0.5;
            }
            let now = c.matches(&user, &ideal, hip, &th).success;
            assert!(was_success || !now);
            was_success = now;
        }
        assert!(!was_success);
    }
}
