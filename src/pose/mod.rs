pub mod dtw;
pub mod keypoint;
pub mod math;

pub use dtw::{DtwError, distance};
pub use keypoint::{Frame, Keypoint, LANDMARK_COUNT, Landmark, NormalizedFrame, Vec3};
pub use math::{
    Facing, FacingThresholds, VISIBILITY_FLOOR, Visibility, check_visibility, detect_facing,
    facing_of, frame_distance, normalize,
};
