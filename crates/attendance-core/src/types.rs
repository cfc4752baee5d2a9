use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::num::ParseFloatError;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. Zero vectors
    /// compare as 0.0 against anything.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Comma-separated decimal text, the on-disk and on-wire form.
    pub fn to_csv(&self) -> String {
        self.values
            .iter()
            .map(f32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse the comma-separated form written by [`to_csv`](Self::to_csv).
    ///
    /// Whitespace around values is tolerated; an empty string is an error.
    pub fn from_csv(text: &str) -> Result<Self, ParseFloatError> {
        let values = text
            .split(',')
            .map(|v| v.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { values })
    }
}

/// An enrolled face: the user it belongs to and its embedding.
#[derive(Debug, Clone)]
pub struct EnrolledFace {
    pub user_id: i64,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best match [-1, 1].
    pub similarity: f32,
    /// User owning the best gallery entry, set only when `matched`.
    pub user_id: Option<i64>,
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[EnrolledFace], threshold: f32) -> MatchResult;
}

/// Cosine similarity matcher. Scans the whole gallery and keeps the best
/// entry; a match requires `similarity >= threshold`.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[EnrolledFace], threshold: f32) -> MatchResult {
        let best = gallery
            .iter()
            .map(|face| (face.user_id, probe.similarity(&face.embedding)))
            .fold(None, |best: Option<(i64, f32)>, (id, sim)| match best {
                Some((_, best_sim)) if best_sim >= sim => best,
                _ => Some((id, sim)),
            });

        match best {
            Some((user_id, similarity)) if similarity >= threshold => MatchResult {
                matched: true,
                similarity,
                user_id: Some(user_id),
            },
            Some((_, similarity)) => MatchResult {
                matched: false,
                similarity,
                user_id: None,
            },
            None => MatchResult {
                matched: false,
                similarity: 0.0,
                user_id: None,
            },
        }
    }
}

/// Public part of a registered user, without the embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub mobile_number: String,
    pub gender: String,
}

/// One attendance entry. `timestamp` is wall-clock time in the attendance zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub user_id: i64,
    #[serde(serialize_with = "crate::clock::serialize_timestamp")]
    pub timestamp: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(user_id: i64, values: Vec<f32>) -> EnrolledFace {
        EnrolledFace {
            user_id,
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_csv_parses_python_style_floats() {
        let e = Embedding::from_csv("-0.0912, 0.5,1e-05").unwrap();
        assert_eq!(e.values.len(), 3);
        assert!((e.values[0] + 0.0912).abs() < 1e-6);
        assert!((e.values[2] - 1e-5).abs() < 1e-9);
    }

    #[test]
    fn test_csv_rejects_garbage() {
        assert!(Embedding::from_csv("").is_err());
        assert!(Embedding::from_csv("0.1,abc").is_err());
    }

    #[test]
    fn test_csv_preserves_values() {
        let e = Embedding::new(vec![0.25, -1.5, 3.0]);
        assert_eq!(Embedding::from_csv(&e.to_csv()).unwrap(), e);
    }

    #[test]
    fn test_matcher_picks_best_entry_anywhere_in_gallery() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            face(1, vec![0.0, 1.0, 0.0]),
            face(2, vec![0.0, 0.0, 1.0]),
            face(3, vec![1.0, 0.0, 0.0]),
        ];

        let result = CosineMatcher.compare(&probe, &gallery, 0.5);
        assert!(result.matched);
        assert_eq!(result.user_id, Some(3));
        assert!((result.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_below_threshold() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![face(1, vec![0.0, 1.0, 0.0])];

        let result = CosineMatcher.compare(&probe, &gallery, 0.5);
        assert!(!result.matched);
        assert_eq!(result.user_id, None);
        assert!(result.similarity.abs() < 1e-6);
    }

    #[test]
    fn test_matcher_threshold_is_inclusive() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![face(7, vec![1.0, 0.0])];
        let result = CosineMatcher.compare(&probe, &gallery, 1.0);
        assert!(result.matched);
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let result = CosineMatcher.compare(&probe, &[], 0.5);
        assert!(!result.matched);
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_matcher_first_of_equal_scores_wins() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![face(4, vec![2.0, 0.0]), face(5, vec![1.0, 0.0])];
        let result = CosineMatcher.compare(&probe, &gallery, 0.5);
        assert_eq!(result.user_id, Some(4));
    }
}
