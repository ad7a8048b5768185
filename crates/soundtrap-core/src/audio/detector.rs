//! Energy-threshold activity detection
//!
//! Scores each chunk by the sum of absolute sample values (a cheap energy
//! proxy, no windowing or filtering) and latches once the score reaches the
//! threshold. While latched no further chunks are scored, so at most one
//! capture window is open at a time.

/// Detection result for the chunk that opened a window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Activity score of the triggering chunk
    pub score: f64,
    /// Threshold in effect when the chunk was scored
    pub threshold: f64,
}

/// Edge-triggered activity detector
///
/// # Example
/// ```
/// use soundtrap_core::audio::detector::ActivityDetector;
///
/// let mut detector = ActivityDetector::new(5.0);
///
/// // Quiet chunk
/// assert!(detector.evaluate(&[0.01; 100]).is_none());
///
/// // Loud chunk latches the detector
/// assert!(detector.evaluate(&[0.2; 50]).is_some());
/// assert!(detector.is_active());
///
/// // No second trigger until released
/// assert!(detector.evaluate(&[0.9; 50]).is_none());
/// detector.release();
/// assert!(!detector.is_active());
/// ```
#[derive(Debug, Clone)]
pub struct ActivityDetector {
    threshold: f64,
    active: bool,
}

impl ActivityDetector {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            active: false,
        }
    }

    /// Sum of absolute sample values over the whole chunk
    pub fn score(chunk: &[f32]) -> f64 {
        chunk.iter().map(|s| s.abs() as f64).sum()
    }

    /// Whether `score` reaches `threshold`
    pub fn triggers(score: f64, threshold: f64) -> bool {
        score >= threshold
    }

    /// Score a chunk unless already latched; latches on trigger
    pub fn evaluate(&mut self, chunk: &[f32]) -> Option<Detection> {
        if self.active {
            return None;
        }
        let score = Self::score(chunk);
        if Self::triggers(score, self.threshold) {
            self.active = true;
            Some(Detection {
                score,
                threshold: self.threshold,
            })
        } else {
            None
        }
    }

    /// Clear the latch once the open window is finished
    pub fn release(&mut self) {
        self.active = false;
    }

    /// Whether a window is currently open
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Change the threshold; takes effect on the next scored chunk
    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold.max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_score_sums_magnitudes() {
        let chunk = [0.5f32, -0.25, 0.0, -1.0];
        assert_relative_eq!(ActivityDetector::score(&chunk), 1.75);
        assert_eq!(ActivityDetector::score(&[]), 0.0);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert!(ActivityDetector::triggers(5.0, 5.0));
        assert!(ActivityDetector::triggers(5.1, 5.0));
        assert!(!ActivityDetector::triggers(4.99, 5.0));
    }

    #[test]
    fn test_silence_no_detection() {
        let mut detector = ActivityDetector::new(1.0);
        for _ in 0..100 {
            assert!(detector.evaluate(&[0.0; 256]).is_none());
        }
        assert!(!detector.is_active());
    }

    #[test]
    fn test_detection_reports_score_and_threshold() {
        let mut detector = ActivityDetector::new(5.0);
        let detection = detector.evaluate(&[0.2; 50]).unwrap();
        assert_relative_eq!(detection.score, 10.0, epsilon = 1e-6);
        assert_eq!(detection.threshold, 5.0);
    }

    #[test]
    fn test_latched_until_release() {
        let mut detector = ActivityDetector::new(1.0);
        assert!(detector.evaluate(&[1.0; 4]).is_some());
        for _ in 0..10 {
            assert!(detector.evaluate(&[1.0; 4]).is_none());
        }
        detector.release();
        assert!(detector.evaluate(&[1.0; 4]).is_some());
    }

    #[test]
    fn test_zero_threshold_triggers_on_silence() {
        let mut detector = ActivityDetector::new(0.0);
        assert!(detector.evaluate(&[0.0; 8]).is_some());
    }

    #[test]
    fn test_threshold_adjustment() {
        let mut detector = ActivityDetector::new(10.0);
        assert!(detector.evaluate(&[0.1; 50]).is_none());

        detector.set_threshold(2.0);
        assert!(detector.evaluate(&[0.1; 50]).is_some());

        detector.set_threshold(-3.0);
        assert_eq!(detector.threshold(), 0.0);
    }
}
