//! Stages A and B: the cheap signals.
//!
//! Stage A thresholds raw cosine similarity into hard decisions. Whatever
//! lands between the thresholds is ambiguous and gets a Stage-B hint: a
//! robust z-score of the similarity against the trailing window, using
//! median/MAD so a single outlier sentence does not wash out the scale.

use std::collections::VecDeque;

use crate::config::DetectorConfig;

/// Denominator guard for a zero MAD (constant window).
const EPSILON: f32 = 1e-6;

/// Consistency factor relating MAD to the standard deviation of a normal.
const MAD_SCALE: f32 = 1.4826;

pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

/// Sliding window over the last `k` adjacency similarities.
#[derive(Clone, Debug)]
pub(crate) struct SimilarityWindow {
    buf: VecDeque<f32>,
    cap: usize,
}

impl SimilarityWindow {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(cap.max(1)),
            cap: cap.max(1),
        }
    }

    pub fn push(&mut self, sim: f32) {
        if self.buf.len() == self.cap {
            self.buf.pop_front();
        }
        self.buf.push_back(sim);
    }

    /// Robust z-score of `sim` against the window:
    /// `(median - sim) / (1.4826 * MAD + epsilon)`.
    ///
    /// Positive when `sim` sits below the window's typical similarity, which
    /// is the boundary direction. Zero while the window is empty.
    pub fn robust_z(&self, sim: f32) -> f32 {
        if self.buf.is_empty() {
            return 0.0;
        }
        let med = median(self.buf.iter().copied());
        let mad = median(self.buf.iter().map(|x| (x - med).abs()));
        (med - sim) / (MAD_SCALE * mad + EPSILON)
    }
}

fn median(values: impl Iterator<Item = f32>) -> f32 {
    let mut sorted: Vec<f32> = values.collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Stage-A outcome for one adjacency.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Screen {
    /// `sim >= theta_high`: hard continuation.
    Continuation,
    /// `sim <= theta_low`: hard boundary.
    Boundary,
    /// In between; carries the Stage-B hint.
    Ambiguous { z: f32, likely_boundary: bool },
}

/// Run Stage A, then Stage B for the ambiguous band. Does not mutate the
/// window; the caller pushes `sim` afterwards so the score never includes the
/// adjacency being judged.
pub(crate) fn screen(sim: f32, window: &SimilarityWindow, cfg: &DetectorConfig) -> Screen {
    if sim >= cfg.theta_high {
        return Screen::Continuation;
    }
    if sim <= cfg.theta_low {
        return Screen::Boundary;
    }
    let z = window.robust_z(sim);
    Screen::Ambiguous {
        z,
        likely_boundary: z >= cfg.tau,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DetectorConfig {
        DetectorConfig::default()
    }

    #[test]
    fn cosine_of_identical_unit_vectors_is_one() {
        let v = vec![0.6, 0.8];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-6);
        assert!((cosine(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn screen_thresholds_are_inclusive() {
        let w = SimilarityWindow::new(5);
        assert_eq!(screen(0.85, &w, &cfg()), Screen::Continuation);
        assert_eq!(screen(0.55, &w, &cfg()), Screen::Boundary);
        assert!(matches!(screen(0.70, &w, &cfg()), Screen::Ambiguous { .. }));
    }

    #[test]
    fn z_is_zero_on_an_empty_window() {
        let w = SimilarityWindow::new(5);
        assert_eq!(w.robust_z(0.7), 0.0);
    }

    #[test]
    fn constant_window_makes_any_drop_anomalous() {
        let mut w = SimilarityWindow::new(5);
        for _ in 0..5 {
            w.push(0.9);
        }
        // MAD is zero, so the epsilon denominator drives z sky-high.
        assert!(w.robust_z(0.7) > 1_000.0);
        assert!(w.robust_z(0.9).abs() < 1e-3);
    }

    #[test]
    fn window_evicts_oldest() {
        let mut w = SimilarityWindow::new(2);
        w.push(0.1);
        w.push(0.8);
        w.push(0.9);
        // Window is now [0.8, 0.9]; median 0.85.
        let z = w.robust_z(0.85);
        assert!(z.abs() < 1e-3);
    }

    #[test]
    fn varied_window_keeps_modest_drops_unremarkable() {
        let mut w = SimilarityWindow::new(5);
        for sim in [0.6, 0.7, 0.8, 0.75, 0.65] {
            w.push(sim);
        }
        let z = w.robust_z(0.68);
        assert!(z.abs() < DetectorConfig::default().tau);
    }
}
