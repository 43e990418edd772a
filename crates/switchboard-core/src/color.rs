//! Team color assignment by hue bisection.

use switchboard_models::TeamColor;
use tracing::trace;

/// First hue emitted by an empty distributor.
pub const INITIAL_HUE: f64 = 180.0;

/// Hands out hues that stay far apart on the color wheel.
///
/// Each new hue is the midpoint of the widest circular gap between hues
/// already handed out. Ties go to the gap that starts at the lowest hue.
/// Saturation and lightness are fixed per distributor.
#[derive(Debug, Clone)]
pub struct ColorDistributor {
    hues: Vec<f64>,
    saturation: f64,
    lightness: f64,
}

impl ColorDistributor {
    pub fn new(saturation: f64, lightness: f64) -> Self {
        Self {
            hues: Vec::new(),
            saturation,
            lightness,
        }
    }

    /// Creates a distributor that treats `hues` as already assigned.
    pub fn with_hues(saturation: f64, lightness: f64, hues: impl IntoIterator<Item = f64>) -> Self {
        let mut distributor = Self::new(saturation, lightness);
        for hue in hues {
            distributor.insert(hue.rem_euclid(360.0));
        }
        distributor
    }

    fn insert(&mut self, hue: f64) {
        let pos = self.hues.partition_point(|h| *h < hue);
        self.hues.insert(pos, hue);
    }

    /// Computes the next hue without recording it.
    pub fn peek_hue(&self) -> f64 {
        let (first, last) = match (self.hues.first(), self.hues.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return INITIAL_HUE,
        };

        // Consecutive gaps first, then the wrap-around gap; strict `>` keeps
        // the earliest of equally wide gaps.
        let wrap = std::iter::once((last, first + 360.0 - last));
        let mut best: Option<(f64, f64)> = None;
        for (start, gap) in self
            .hues
            .windows(2)
            .map(|pair| (pair[0], pair[1] - pair[0]))
            .chain(wrap)
        {
            if best.map_or(true, |(_, widest)| gap > widest) {
                best = Some((start, gap));
            }
        }

        let (start, gap) = best.unwrap_or((last, 360.0));
        (start + gap / 2.0).rem_euclid(360.0)
    }

    /// Returns the next hue and records it.
    pub fn next_hue(&mut self) -> f64 {
        let hue = self.peek_hue();
        self.insert(hue);
        trace!(hue, assigned = self.hues.len(), "Hue assigned");
        hue
    }

    /// Returns the next color and records its hue.
    pub fn next_color(&mut self) -> TeamColor {
        TeamColor::new(self.next_hue(), self.saturation, self.lightness)
    }

    /// Hues handed out so far, sorted.
    pub fn hues(&self) -> &[f64] {
        &self.hues
    }

    /// Smallest circular distance between any two assigned hues.
    pub fn min_gap(&self) -> Option<f64> {
        if self.hues.len() < 2 {
            return None;
        }
        let wrap = self.hues[0] + 360.0 - self.hues[self.hues.len() - 1];
        Some(
            self.hues
                .windows(2)
                .map(|pair| pair[1] - pair[0])
                .fold(wrap, f64::min),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(n: usize) -> (ColorDistributor, Vec<f64>) {
        let mut distributor = ColorDistributor::new(70.0, 50.0);
        let hues = (0..n).map(|_| distributor.next_hue()).collect();
        (distributor, hues)
    }

    #[test]
    fn test_first_four_hues() {
        let (_, hues) = emit(4);
        assert_eq!(hues, vec![180.0, 0.0, 90.0, 270.0]);
    }

    #[test]
    fn test_next_bisections() {
        let (_, hues) = emit(6);
        assert_eq!(hues[4], 45.0);
        assert_eq!(hues[5], 135.0);
    }

    #[test]
    fn test_six_colors_keep_min_gap() {
        let (distributor, _) = emit(6);
        assert!(distributor.min_gap().unwrap() >= 45.0);
    }

    #[test]
    fn test_eight_colors_evenly_spaced() {
        let (distributor, _) = emit(8);
        assert_eq!(distributor.min_gap(), Some(45.0));
    }

    #[test]
    fn test_color_uses_fixed_saturation_and_lightness() {
        let mut distributor = ColorDistributor::new(65.0, 40.0);
        let color = distributor.next_color();
        assert_eq!(color, TeamColor::new(180.0, 65.0, 40.0));
    }

    #[test]
    fn test_peek_does_not_record() {
        let distributor = ColorDistributor::new(70.0, 50.0);
        assert_eq!(distributor.peek_hue(), 180.0);
        assert!(distributor.hues().is_empty());
    }

    #[test]
    fn test_seeded_distributor() {
        let mut distributor = ColorDistributor::with_hues(70.0, 50.0, [180.0, 0.0]);
        assert_eq!(distributor.next_hue(), 90.0);
        assert_eq!(distributor.hues(), &[0.0, 90.0, 180.0]);
    }

    #[test]
    fn test_seeded_with_unsorted_hues() {
        let mut distributor = ColorDistributor::with_hues(70.0, 50.0, [300.0, 60.0]);
        // gaps: 60..300 = 240, wrap 300..420 = 120
        assert_eq!(distributor.next_hue(), 180.0);
    }
}
