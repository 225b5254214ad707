//! Reference motion data: recorded keypoint frames plus the labelled segments
//! that split one repetition into phases.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::pose::{
    Facing, FacingThresholds, Frame, Keypoint, NormalizedFrame, Vec3, detect_facing, normalize,
};

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse reference data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame {frame}, landmark {landmark}: malformed keypoint '{text}'")]
    BadKeypoint {
        frame: usize,
        landmark: usize,
        text: String,
    },
    #[error("reference has no usable segments")]
    NoSegments,
    #[error("unknown reference '{0}'")]
    NotFound(String),
}

/// Phase family, taken from the leading `_`-separated token of a phase label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Starting,
    Transition,
    Holding,
    Ending,
    Relaxation,
}

impl SegmentKind {
    pub fn from_phase(phase: &str) -> Option<Self> {
        match phase.split('_').next()? {
            "starting" => Some(Self::Starting),
            "transition" => Some(Self::Transition),
            "holding" => Some(Self::Holding),
            "ending" => Some(Self::Ending),
            "relaxation" => Some(Self::Relaxation),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Transition => "transition",
            Self::Holding => "holding",
            Self::Ending => "ending",
            Self::Relaxation => "relaxation",
        }
    }

    /// Poses a transition path runs between. Relaxation is a rest, not a
    /// pose of the exercise.
    pub fn is_held(self) -> bool {
        matches!(self, Self::Starting | Self::Holding | Self::Ending)
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One labelled span of the reference motion. Immutable once built.
#[derive(Debug, Clone)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
    pub phase: String,
    pub kind: SegmentKind,
    /// Raw per-landmark thresholds, indexed like [`crate::pose::Landmark`].
    pub thresholds: Vec<f32>,
    /// Orientation of the midpoint frame.
    pub facing: Facing,
    /// Index of the midpoint frame.
    pub midpoint: usize,
    /// Midpoint frame, hip-relative.
    pub reference: NormalizedFrame,
    pub reference_hip: Vec3,
}

/// Threshold for landmark `index`, or `fallback` when the array is short or
/// holds a non-positive value.
pub fn joint_threshold(thresholds: &[f32], index: usize, fallback: f32) -> f32 {
    thresholds
        .get(index)
        .copied()
        .filter(|t| t.is_finite() && *t > 0.0)
        .unwrap_or(fallback)
}

impl Segment {
    pub fn threshold(&self, index: usize, fallback: f32) -> f32 {
        joint_threshold(&self.thresholds, index, fallback)
    }
}

/// Reference document exactly as stored on disk.
///
/// `frames` holds one `"x,y,z[,visibility]"` string per landmark and
/// `segments` holds `[start, end, phase, thresholds]` tuples. Segments are
/// kept as loose JSON so one malformed entry can be skipped without losing
/// the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawReference {
    #[serde(default)]
    pub frames: Vec<Vec<String>>,
    #[serde(default)]
    pub segments: Vec<Value>,
}

impl RawReference {
    pub fn from_json(text: &str) -> Result<Self, ReferenceError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn push_frame(&mut self, frame: &Frame) {
        self.frames
            .push(frame.points.iter().map(Keypoint::to_csv).collect());
    }

    pub fn push_segment(&mut self, start: usize, end: usize, phase: &str, thresholds: &[f32]) {
        self.segments
            .push(serde_json::json!([start, end, phase, thresholds]));
    }

    fn parse_frames(&self) -> Result<Vec<Frame>, ReferenceError> {
        self.frames
            .iter()
            .enumerate()
            .map(|(fi, row)| {
                row.iter()
                    .enumerate()
                    .map(|(li, text)| {
                        Keypoint::parse_csv(text).ok_or_else(|| ReferenceError::BadKeypoint {
                            frame: fi,
                            landmark: li,
                            text: text.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Frame::new)
            })
            .collect()
    }
}

struct SegmentRow<'a> {
    start: usize,
    end: usize,
    phase: &'a str,
    thresholds: Vec<f32>,
}

fn parse_segment_row(v: &Value) -> Result<SegmentRow<'_>, String> {
    let row = v.as_array().ok_or("segment is not an array")?;
    let start = row
        .first()
        .and_then(Value::as_u64)
        .ok_or("start is not a frame index")? as usize;
    let end = row
        .get(1)
        .and_then(Value::as_u64)
        .ok_or("end is not a frame index")? as usize;
    let phase = row.get(2).and_then(Value::as_str).ok_or("phase is not a string")?;
    let thresholds = match row.get(3) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(a)) => a
            .iter()
            .map(|t| t.as_f64().map(|f| f as f32).unwrap_or(0.0))
            .collect(),
        Some(Value::Number(n)) => vec![n.as_f64().unwrap_or(0.0) as f32],
        Some(_) => return Err("thresholds are not numeric".into()),
    };
    Ok(SegmentRow {
        start,
        end,
        phase,
        thresholds,
    })
}

/// Parsed reference frames with their derived segments.
#[derive(Debug, Clone)]
pub struct ReferenceMotion {
    frames: Vec<Frame>,
    segments: Vec<Segment>,
}

impl ReferenceMotion {
    /// Parse frames and derive segments. Segments that point outside the
    /// frame list, carry an unknown phase family or sit on an incomplete
    /// frame are skipped with a warning; zero survivors is an error.
    pub fn build(raw: &RawReference, facing: FacingThresholds) -> Result<Self, ReferenceError> {
        let frames = raw.parse_frames()?;
        let mut segments = Vec::with_capacity(raw.segments.len());

        for (i, v) in raw.segments.iter().enumerate() {
            let row = match parse_segment_row(v) {
                Ok(r) => r,
                Err(e) => {
                    warn!("skipping segment {i}: {e}");
                    continue;
                }
            };
            let Some(kind) = SegmentKind::from_phase(row.phase) else {
                warn!("skipping segment {i}: unknown phase '{}'", row.phase);
                continue;
            };
            if row.start > row.end {
                warn!("skipping segment {i}: start {} after end {}", row.start, row.end);
                continue;
            }
            let midpoint = (row.start + row.end) / 2;
            let Some(frame) = frames.get(midpoint) else {
                warn!(
                    "skipping segment {i}: midpoint {midpoint} outside {} frames",
                    frames.len()
                );
                continue;
            };
            let Some((reference, reference_hip)) = normalize(frame) else {
                warn!("skipping segment {i}: midpoint frame {midpoint} is incomplete");
                continue;
            };

            let seg = Segment {
                start: row.start,
                end: row.end,
                phase: row.phase.to_string(),
                kind,
                thresholds: row.thresholds,
                facing: detect_facing(frame, facing),
                midpoint,
                reference,
                reference_hip,
            };
            debug!(
                "segment {i}: {} [{}..{}] {} facing {}",
                seg.phase, seg.start, seg.end, seg.kind, seg.facing
            );
            segments.push(seg);
        }

        if segments.is_empty() {
            return Err(ReferenceError::NoSegments);
        }
        Ok(Self { frames, segments })
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, idx: usize) -> Option<&Segment> {
        self.segments.get(idx)
    }

    /// First segment of the starting family, else the first segment.
    pub fn starting_segment(&self) -> &Segment {
        self.segments
            .iter()
            .find(|s| s.kind == SegmentKind::Starting)
            .unwrap_or(&self.segments[0])
    }

    /// Frames in `[from, to)`, clamped to the recording.
    pub fn frames_between(&self, from: usize, to: usize) -> &[Frame] {
        let to = to.min(self.frames.len());
        let from = from.min(to);
        &self.frames[from..to]
    }
}

/// Where reference documents come from.
pub trait MotionSource {
    fn fetch(&self, locator: &str) -> Result<RawReference, ReferenceError>;
}

/// Reads reference documents from disk, resolving locators against `base`.
#[derive(Debug, Clone)]
pub struct FsMotionSource {
    base: PathBuf,
}

impl FsMotionSource {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn resolve(&self, locator: &str) -> PathBuf {
        self.base.join(locator)
    }
}

impl MotionSource for FsMotionSource {
    fn fetch(&self, locator: &str) -> Result<RawReference, ReferenceError> {
        load_raw(&self.resolve(locator))
    }
}

pub fn load_raw(path: &Path) -> Result<RawReference, ReferenceError> {
    let text = fs::read_to_string(path).map_err(|source| ReferenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    RawReference::from_json(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::math::tests::standing_frame;

    fn sample() -> RawReference {
        let mut raw = RawReference::default();
        for _ in 0..6 {
            raw.push_frame(&standing_frame());
        }
        raw.push_segment(0, 1, "starting", &[0.2; 33]);
        raw.push_segment(2, 3, "transition_up", &[]);
        raw.push_segment(4, 5, "holding_up", &[0.3]);
        raw
    }

    #[test]
    fn kind_comes_from_leading_token() {
        assert_eq!(SegmentKind::from_phase("holding_tree_left"), Some(SegmentKind::Holding));
        assert_eq!(SegmentKind::from_phase("ending"), Some(SegmentKind::Ending));
        assert_eq!(SegmentKind::from_phase("warmup_1"), None);
        assert!(!SegmentKind::Transition.is_held());
        assert!(!SegmentKind::Relaxation.is_held());
        assert!(SegmentKind::Ending.is_held());
    }

    #[test]
    fn builds_segments_with_midpoint_facing() {
        let motion = ReferenceMotion::build(&sample(), FacingThresholds::default()).unwrap();
        assert_eq!(motion.frames().len(), 6);
        let segs = motion.segments();
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[1].kind, SegmentKind::Transition);
        assert_eq!(segs[1].midpoint, 2);
        assert!(segs.iter().all(|s| s.facing == Facing::Front));
        assert_eq!(motion.starting_segment().phase, "starting");
    }

    #[test]
    fn threshold_falls_back_when_missing() {
        let motion = ReferenceMotion::build(&sample(), FacingThresholds::default()).unwrap();
        let hold = &motion.segments()[2];
        assert_eq!(hold.threshold(0, 0.9), 0.3);
        assert_eq!(hold.threshold(15, 0.9), 0.9);
    }

    #[test]
    fn bad_segments_are_skipped() {
        let mut raw = sample();
        raw.push_segment(40, 50, "holding_far", &[]);
        raw.push_segment(0, 1, "stretch", &[]);
        raw.segments.push(serde_json::json!("nonsense"));
        let motion = ReferenceMotion::build(&raw, FacingThresholds::default()).unwrap();
        assert_eq!(motion.segments().len(), 3);
    }

    #[test]
    fn no_usable_segments_is_an_error() {
        let mut raw = RawReference::default();
        raw.push_frame(&standing_frame());
        raw.push_segment(3, 4, "starting", &[]);
        assert!(matches!(
            ReferenceMotion::build(&raw, FacingThresholds::default()),
            Err(ReferenceError::NoSegments)
        ));
    }

    #[test]
    fn malformed_keypoint_is_reported() {
        let raw =
            RawReference::from_json(r#"{"frames": [["1,2,3", "oops"]], "segments": []}"#).unwrap();
        match ReferenceMotion::build(&raw, FacingThresholds::default()) {
            Err(ReferenceError::BadKeypoint { frame, landmark, .. }) => {
                assert_eq!((frame, landmark), (0, 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn json_round_trip_keeps_positions() {
        let raw = sample();
        let text = serde_json::to_string(&raw).unwrap();
        let back = RawReference::from_json(&text).unwrap();
        assert_eq!(back.parse_frames().unwrap()[0], standing_frame());
    }

    #[test]
    fn frames_between_clamps() {
        let motion = ReferenceMotion::build(&sample(), FacingThresholds::default()).unwrap();
        assert_eq!(motion.frames_between(2, 4).len(), 2);
        assert_eq!(motion.frames_between(5, 99).len(), 1);
        assert!(motion.frames_between(9, 3).is_empty());
    }
}
