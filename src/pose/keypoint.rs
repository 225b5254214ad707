//! Body landmarks as delivered by the pose-estimation provider.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// Number of landmarks in every complete frame.
pub const LANDMARK_COUNT: usize = 33;

/// Anatomical landmark layout (BlazePose, 33 points).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(usize)]
pub enum Landmark {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl Landmark {
    const ALL: [Landmark; LANDMARK_COUNT] = [
        Self::Nose,
        Self::LeftEyeInner,
        Self::LeftEye,
        Self::LeftEyeOuter,
        Self::RightEyeInner,
        Self::RightEye,
        Self::RightEyeOuter,
        Self::LeftEar,
        Self::RightEar,
        Self::MouthLeft,
        Self::MouthRight,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftPinky,
        Self::RightPinky,
        Self::LeftIndex,
        Self::RightIndex,
        Self::LeftThumb,
        Self::RightThumb,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
        Self::LeftHeel,
        Self::RightHeel,
        Self::LeftFootIndex,
        Self::RightFootIndex,
    ];

    /// The hip every frame is normalised against.
    pub const ANCHOR: Landmark = Landmark::RightHip;

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Plain 3-component vector used for landmark positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn cross(self, o: Vec3) -> Vec3 {
        Vec3 {
            x: self.y * o.z - self.z * o.y,
            y: self.z * o.x - self.x * o.z,
            z: self.x * o.y - self.y * o.x,
        }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Distance in the image plane, ignoring depth.
    pub fn planar_distance(self, o: Vec3) -> f32 {
        (self.x - o.x).hypot(self.y - o.y)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, o: Vec3) -> Vec3 {
        Vec3::new(self.x + o.x, self.y + o.y, self.z + o.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, o: Vec3) -> Vec3 {
        Vec3::new(self.x - o.x, self.y - o.y, self.z - o.z)
    }
}

/// One tracked body point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Provider confidence in [0,1]; absent when the provider gave none.
    #[serde(default)]
    pub visibility: Option<f32>,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, z: f32, visibility: Option<f32>) -> Self {
        Self {
            x,
            y,
            z,
            visibility,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    pub fn is_visible(&self, floor: f32) -> bool {
        self.visibility.is_some_and(|v| v >= floor)
    }

    /// Parse a reference-file entry `"x,y,z[,visibility]"`.
    pub fn parse_csv(s: &str) -> Option<Self> {
        let mut it = s.split(',').map(|t| t.trim());
        let x = it.next()?.parse::<f32>().ok()?;
        let y = it.next()?.parse::<f32>().ok()?;
        let z = it.next()?.parse::<f32>().ok()?;
        let visibility = match it.next() {
            Some(t) if !t.is_empty() => Some(t.parse::<f32>().ok()?),
            _ => None,
        };
        Some(Self::new(x, y, z, visibility))
    }

    /// Inverse of [`Keypoint::parse_csv`].
    pub fn to_csv(&self) -> String {
        match self.visibility {
            Some(v) => format!("{},{},{},{v}", self.x, self.y, self.z),
            None => format!("{},{},{}", self.x, self.y, self.z),
        }
    }
}

/// All landmarks observed at one instant. Complete frames hold exactly
/// [`LANDMARK_COUNT`] entries; partial frames are representable so that the
/// math layer can reject them explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frame {
    pub points: Vec<Keypoint>,
}

impl Frame {
    pub fn new(points: Vec<Keypoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Same frame shifted by `offset`; visibility is kept.
    pub fn translated(&self, offset: Vec3) -> Frame {
        Frame::new(
            self.points
                .iter()
                .map(|k| {
                    Keypoint::new(k.x + offset.x, k.y + offset.y, k.z + offset.z, k.visibility)
                })
                .collect(),
        )
    }
}

/// Hip-relative landmark positions. Only [`crate::pose::normalize`] builds
/// one, so it always holds [`LANDMARK_COUNT`] points with the anchor hip at
/// the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFrame {
    points: Vec<Vec3>,
}

impl NormalizedFrame {
    pub(crate) fn from_points(points: Vec<Vec3>) -> Self {
        debug_assert_eq!(points.len(), LANDMARK_COUNT);
        Self { points }
    }

    pub fn get(&self, landmark: Landmark) -> Vec3 {
        self.points[landmark.index()]
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }
}
