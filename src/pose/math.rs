//! Stateless pose geometry: hip-relative normalisation, facing detection and
//! landmark visibility.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::keypoint::{Frame, LANDMARK_COUNT, Landmark, NormalizedFrame, Vec3};

/// Visibility score a landmark needs to count as present.
pub const VISIBILITY_FLOOR: f32 = 0.5;

/// Coarse torso orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Back,
    Left,
    Right,
    Up,
    Down,
    /// No axis dominates strongly enough to name a direction.
    Random,
}

impl Facing {
    pub fn as_str(self) -> &'static str {
        match self {
            Facing::Front => "front",
            Facing::Back => "back",
            Facing::Left => "left",
            Facing::Right => "right",
            Facing::Up => "up",
            Facing::Down => "down",
            Facing::Random => "random",
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Minimum normal-vector magnitude per axis before a direction is named.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FacingThresholds {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for FacingThresholds {
    fn default() -> Self {
        Self {
            x: 0.5,
            y: 0.5,
            z: 0.5,
        }
    }
}

/// Express every landmark relative to the anchor hip.
///
/// Returns `None` when fewer than [`LANDMARK_COUNT`] landmarks are present or
/// the hip is not a finite point. Extra trailing landmarks are ignored.
pub fn normalize(frame: &Frame) -> Option<(NormalizedFrame, Vec3)> {
    if frame.len() < LANDMARK_COUNT {
        return None;
    }
    let hip = frame.points[Landmark::ANCHOR.index()].position();
    if !hip.is_finite() {
        return None;
    }
    let points = frame.points[..LANDMARK_COUNT]
        .iter()
        .map(|k| k.position() - hip)
        .collect();
    Some((NormalizedFrame::from_points(points), hip))
}

/// Unit normal of the plane through three points, or zero when degenerate.
fn plane_normal(p1: Vec3, p2: Vec3, p3: Vec3) -> Vec3 {
    let n = (p2 - p1).cross(p3 - p1);
    let len = n.length();
    if len == 0.0 || !len.is_finite() {
        return Vec3::ZERO;
    }
    Vec3::new(n.x / len, n.y / len, n.z / len)
}

/// Orientation of the torso plane (left shoulder, right shoulder, right hip).
pub fn detect_facing(frame: &Frame, th: FacingThresholds) -> Facing {
    match normalize(frame) {
        Some((norm, _)) => facing_of(&norm, th),
        None => Facing::Random,
    }
}

/// Same as [`detect_facing`] for an already normalised frame.
pub fn facing_of(norm: &NormalizedFrame, th: FacingThresholds) -> Facing {
    let n = plane_normal(
        norm.get(Landmark::LeftShoulder),
        norm.get(Landmark::RightShoulder),
        norm.get(Landmark::RightHip),
    );

    let axes = [
        (if n.x > 0.0 { Facing::Left } else { Facing::Right }, n.x.abs(), th.x),
        (if n.y > 0.0 { Facing::Up } else { Facing::Down }, n.y.abs(), th.y),
        (if n.z > 0.0 { Facing::Back } else { Facing::Front }, n.z.abs(), th.z),
    ];
    // first strictly-greatest axis wins ties
    let mut best = axes[0];
    for axis in &axes[1..] {
        if axis.1 > best.1 {
            best = *axis;
        }
    }

    let (direction, magnitude, threshold) = best;
    if magnitude > threshold {
        direction
    } else {
        Facing::Random
    }
}

/// Result of a visibility check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visibility {
    pub all_visible: bool,
    pub missing: Vec<usize>,
}

/// Which landmarks fall below [`VISIBILITY_FLOOR`].
///
/// A frame without exactly [`LANDMARK_COUNT`] entries reports every index as
/// missing.
pub fn check_visibility(frame: &Frame) -> Visibility {
    if frame.len() != LANDMARK_COUNT {
        return Visibility {
            all_visible: false,
            missing: (0..LANDMARK_COUNT).collect(),
        };
    }
    let missing: Vec<usize> = frame
        .points
        .iter()
        .enumerate()
        .filter(|(_, k)| !k.is_visible(VISIBILITY_FLOOR))
        .map(|(i, _)| i)
        .collect();
    Visibility {
        all_visible: missing.is_empty(),
        missing,
    }
}

/// Whole-frame distance in the image plane: square root of the summed squared
/// x/y offsets over every landmark.
pub fn frame_distance(a: &NormalizedFrame, b: &NormalizedFrame) -> f32 {
    a.points()
        .iter()
        .zip(b.points())
        .map(|(p, q)| {
            let dx = p.x - q.x;
            let dy = p.y - q.y;
            dx * dx + dy * dy
        })
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pose::keypoint::Keypoint;

    /// Upright figure facing the camera: shoulders and hips in the image
    /// plane, so the torso normal points along -z.
    pub(crate) fn standing_frame() -> Frame {
        let mut pts = vec![Keypoint::new(0.5, 0.5, 0.0, Some(0.9)); LANDMARK_COUNT];
        let mut set = |l: Landmark, x: f32, y: f32| {
            pts[l.index()] = Keypoint::new(x, y, 0.0, Some(0.9));
        };
        set(Landmark::LeftShoulder, 0.6, 0.3);
        set(Landmark::RightShoulder, 0.4, 0.3);
        set(Landmark::LeftHip, 0.55, 0.6);
        set(Landmark::RightHip, 0.45, 0.6);
        Frame::new(pts)
    }

    #[test]
    fn normalize_rejects_partial_frames() {
        let mut f = standing_frame();
        f.points.truncate(LANDMARK_COUNT - 1);
        assert!(normalize(&f).is_none());
        assert!(normalize(&Frame::default()).is_none());
    }

    #[test]
    fn normalize_puts_hip_at_origin() {
        let (norm, hip) = normalize(&standing_frame()).unwrap();
        assert_eq!(norm.get(Landmark::RightHip), Vec3::ZERO);
        assert_eq!(hip, Vec3::new(0.45, 0.6, 0.0));
        assert_eq!(norm.points().len(), LANDMARK_COUNT);
    }

    #[test]
    fn normalize_rejects_non_finite_hip() {
        let mut f = standing_frame();
        f.points[Landmark::RightHip.index()].x = f32::NAN;
        assert!(normalize(&f).is_none());
    }

    #[test]
    fn facing_front_for_upright_figure() {
        assert_eq!(detect_facing(&standing_frame(), FacingThresholds::default()), Facing::Front);
    }

    #[test]
    fn facing_back_when_mirrored() {
        let mut f = standing_frame();
        f.points[Landmark::LeftShoulder.index()].x = 0.4;
        f.points[Landmark::RightShoulder.index()].x = 0.6;
        assert_eq!(detect_facing(&f, FacingThresholds::default()), Facing::Back);
    }

    #[test]
    fn facing_ignores_translation() {
        let f = standing_frame();
        let moved = f.translated(Vec3::new(0.25, -0.125, 0.5));
        let th = FacingThresholds::default();
        assert_eq!(detect_facing(&f, th), detect_facing(&moved, th));
    }

    #[test]
    fn degenerate_torso_is_random() {
        let pts = vec![Keypoint::new(0.5, 0.5, 0.0, Some(1.0)); LANDMARK_COUNT];
        assert_eq!(detect_facing(&Frame::new(pts), FacingThresholds::default()), Facing::Random);
    }

    #[test]
    fn strict_thresholds_give_random() {
        let th = FacingThresholds {
            x: 1.5,
            y: 1.5,
            z: 1.5,
        };
        assert_eq!(detect_facing(&standing_frame(), th), Facing::Random);
    }

    #[test]
    fn visibility_reports_missing_indices() {
        let mut f = standing_frame();
        f.points[3].visibility = Some(0.2);
        f.points[7].visibility = None;
        let v = check_visibility(&f);
        assert!(!v.all_visible);
        assert_eq!(v.missing, vec![3, 7]);
        assert_eq!(check_visibility(&f), v);
    }

    #[test]
    fn visibility_requires_exact_count() {
        let mut f = standing_frame();
        f.points.push(Keypoint::new(0.0, 0.0, 0.0, Some(1.0)));
        let v = check_visibility(&f);
        assert!(!v.all_visible);
        assert_eq!(v.missing.len(), LANDMARK_COUNT);
        assert!(check_visibility(&standing_frame()).all_visible);
    }

    #[test]
    fn frame_distance_zero_for_same_pose() {
        let (a, _) = normalize(&standing_frame()).unwrap();
        assert_eq!(frame_distance(&a, &a), 0.0);
    }
}
