use serde::{Deserialize, Serialize};

/// Body model landmark indices (33 points, as produced by the analysis service).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum LandmarkIndex {
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

impl LandmarkIndex {
    pub const COUNT: usize = 33;

    const ALL: [LandmarkIndex; Self::COUNT] = [
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

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// A single landmark in normalized source-frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    /// Normalized X (0.0..1.0 of the intrinsic frame width)
    pub x: f32,
    /// Normalized Y (0.0..1.0 of the intrinsic frame height)
    pub y: f32,
    /// Relative depth; not used for drawing
    #[serde(default)]
    pub z: f32,
    /// Visibility score (0.0..1.0)
    #[serde(default)]
    pub visibility: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, visibility: f32) -> Self {
        Self { x, y, z: 0.0, visibility }
    }

    /// Strictly above the threshold; a landmark sitting exactly on it is hidden.
    pub fn is_visible(&self, threshold: f32) -> bool {
        self.visibility > threshold
    }
}

/// Looks up a landmark by body index. The service may send fewer points than
/// the full model, so the lookup is fallible.
pub fn landmark_at(landmarks: &[Landmark], index: LandmarkIndex) -> Option<&Landmark> {
    landmarks.get(index as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landmark_index_count() {
        assert_eq!(LandmarkIndex::COUNT, 33);
        assert_eq!(LandmarkIndex::RightFootIndex as usize, LandmarkIndex::COUNT - 1);
    }

    #[test]
    fn test_landmark_index_from_index() {
        assert_eq!(LandmarkIndex::from_index(0), Some(LandmarkIndex::Nose));
        assert_eq!(LandmarkIndex::from_index(23), Some(LandmarkIndex::LeftHip));
        assert_eq!(LandmarkIndex::from_index(32), Some(LandmarkIndex::RightFootIndex));
        assert_eq!(LandmarkIndex::from_index(33), None);
    }

    #[test]
    fn test_from_index_matches_discriminant() {
        for i in 0..LandmarkIndex::COUNT {
            assert_eq!(LandmarkIndex::from_index(i).map(|l| l as usize), Some(i));
        }
    }

    #[test]
    fn test_visibility_is_strict() {
        assert!(Landmark::new(0.5, 0.5, 0.51).is_visible(0.5));
        assert!(!Landmark::new(0.5, 0.5, 0.5).is_visible(0.5));
        assert!(!Landmark::new(0.5, 0.5, 0.2).is_visible(0.5));
    }

    #[test]
    fn test_landmark_deserialize_without_z() {
        let lm: Landmark = serde_json::from_str(r#"{"x":0.25,"y":0.75,"visibility":0.9}"#).unwrap();
        assert_eq!(lm.x, 0.25);
        assert_eq!(lm.y, 0.75);
        assert_eq!(lm.z, 0.0);
        assert_eq!(lm.visibility, 0.9);
    }

    #[test]
    fn test_landmark_at_short_sequence() {
        let landmarks = vec![Landmark::new(0.1, 0.2, 0.9); 12];
        assert!(landmark_at(&landmarks, LandmarkIndex::LeftShoulder).is_some());
        assert!(landmark_at(&landmarks, LandmarkIndex::LeftHip).is_none());
    }
}
