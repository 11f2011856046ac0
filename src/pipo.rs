// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! PIPO priority rating
//!
//! A data product's rating is `numerator / denominator` where
//!
//! ```text
//! numerator   = ws²·score + wq²·quality + wz²·size + wt²·trigger
//! denominator = age_hours · time_weight + 1
//! ```
//!
//! The numerator is fixed for a given weight set, the denominator grows
//! with the age of the source artifact so ratings decay between cycles.
//! Everything here is pure; callers pass `now` explicitly.

use crate::error::PipoError;
use std::collections::BTreeMap;

/// Bytes of every message kept free of segments
pub const DEFAULT_HEADER_RESERVE: usize = 32;

/// Numerator substituted when inputs are malformed
pub const FALLBACK_NUMERATOR: f64 = 0.0;

/// Denominator substituted when inputs are malformed
pub const FALLBACK_DENOMINATOR: f64 = 1.0;

const SECONDS_PER_HOUR: f64 = 3600.0;

fn check_finite(name: &'static str, value: f64) -> Result<f64, PipoError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PipoError::NonFinite(name))
    }
}

/// Weighting coefficients, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipoWeights {
    pub score: f64,
    pub quality: f64,
    pub size: f64,
    pub trigger: f64,
    pub time: f64,
}

impl Default for PipoWeights {
    fn default() -> Self {
        Self {
            score: 0.5,
            quality: 0.5,
            size: 0.5,
            trigger: 0.5,
            time: 1.0,
        }
    }
}

impl PipoWeights {
    /// Reject weights outside [0, 1]
    pub fn validate(&self) -> Result<(), PipoError> {
        for (name, value) in [
            ("score", self.score),
            ("quality", self.quality),
            ("size", self.size),
            ("trigger", self.trigger),
            ("time", self.time),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipoError::InvalidWeight { name, value });
            }
        }
        Ok(())
    }
}

/// Trigger score lookup keyed by wake event type
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerPolicy {
    /// Event type considered primary
    pub primary_event_type: u32,
    /// Score for the primary event type
    pub primary_score: f64,
    /// Score for every other event type
    pub secondary_score: f64,
    /// Explicit per-type scores, checked first
    pub overrides: BTreeMap<u32, f64>,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            primary_event_type: 0,
            primary_score: 1.0,
            secondary_score: 0.5,
            overrides: BTreeMap::new(),
        }
    }
}

impl TriggerPolicy {
    /// Score for a wake event type
    pub fn score(&self, wake_event_type: u32) -> f64 {
        if let Some(score) = self.overrides.get(&wake_event_type) {
            return *score;
        }
        if wake_event_type == self.primary_event_type {
            self.primary_score
        } else {
            self.secondary_score
        }
    }
}

/// Immutable engine configuration, derived once per cycle
#[derive(Debug, Clone, PartialEq)]
pub struct PipoConfig {
    pub weights: PipoWeights,
    /// Link message ceiling in bytes
    pub max_msg_size: usize,
    /// Bytes kept free of segments
    pub header_reserve: usize,
    pub trigger: TriggerPolicy,
}

impl Default for PipoConfig {
    fn default() -> Self {
        Self {
            weights: PipoWeights::default(),
            max_msg_size: 340,
            header_reserve: DEFAULT_HEADER_RESERVE,
            trigger: TriggerPolicy::default(),
        }
    }
}

/// Result of size normalization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedSize {
    /// `1 - segment / capacity`, in [0, 1]
    pub factor: f64,
    /// The change payload is the smaller one and will be sent
    pub use_change: bool,
    /// Size of the selected segment in bytes
    pub segment_size: usize,
}

/// Inputs of one rating
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipoInputs {
    /// Node identity score
    pub score: f64,
    pub quality: f64,
    pub normalized_size: f64,
    pub trigger: f64,
    /// Epoch seconds of the source artifact
    pub source_timestamp: f64,
}

/// A computed rating
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rating {
    pub numerator: f64,
    pub denominator: f64,
    pub rating: f64,
}

impl Rating {
    /// Build from parts
    pub fn new(numerator: f64, denominator: f64) -> Self {
        Self {
            numerator,
            denominator,
            rating: numerator / denominator,
        }
    }
}

/// Priority engine
#[derive(Debug, Clone)]
pub struct PipoEngine {
    config: PipoConfig,
}

impl PipoEngine {
    /// Create an engine, validating weights and capacity
    pub fn new(config: PipoConfig) -> Result<Self, PipoError> {
        config.weights.validate()?;
        if config.header_reserve >= config.max_msg_size {
            return Err(PipoError::NoCapacity {
                max_msg_size: config.max_msg_size,
                header_reserve: config.header_reserve,
            });
        }
        Ok(Self { config })
    }

    /// Engine configuration
    pub fn config(&self) -> &PipoConfig {
        &self.config
    }

    /// Bytes available to segments
    pub fn capacity(&self) -> usize {
        self.config.max_msg_size - self.config.header_reserve
    }

    /// Trigger score for a wake event type
    pub fn trigger_score(&self, wake_event_type: u32) -> f64 {
        self.config.trigger.score(wake_event_type)
    }

    /// Weighted sum of the static factors
    pub fn compute_numerator(
        &self,
        score: f64,
        quality: f64,
        normalized_size: f64,
        trigger: f64,
    ) -> Result<f64, PipoError> {
        let w = &self.config.weights;
        Ok(w.score.powi(2) * check_finite("score", score)?
            + w.quality.powi(2) * check_finite("quality", quality)?
            + w.size.powi(2) * check_finite("normalized_size", normalized_size)?
            + w.trigger.powi(2) * check_finite("trigger", trigger)?)
    }

    /// Age penalty, `age_hours · time_weight + 1`
    ///
    /// Artifacts stamped in the future count as age zero.
    pub fn compute_denominator(&self, source_timestamp: f64, now: f64) -> Result<f64, PipoError> {
        let source = check_finite("source_timestamp", source_timestamp)?;
        let now = check_finite("now", now)?;
        let age_hours = ((now - source) / SECONDS_PER_HOUR).max(0.0);
        Ok(age_hours * self.config.weights.time + 1.0)
    }

    /// Size factor of the smallest eligible payload segment
    pub fn compute_normalized_size(
        &self,
        standard_size: usize,
        change_size: Option<usize>,
        change_eligible: bool,
    ) -> Result<NormalizedSize, PipoError> {
        let (segment_size, use_change) = match change_size {
            Some(change) if change_eligible && change < standard_size => (change, true),
            _ => (standard_size, false),
        };

        let capacity = self.capacity();
        if segment_size > capacity {
            return Err(PipoError::Oversize {
                segment: segment_size,
                capacity,
            });
        }

        Ok(NormalizedSize {
            factor: 1.0 - segment_size as f64 / capacity as f64,
            use_change,
            segment_size,
        })
    }

    /// Full rating, propagating malformed input
    pub fn try_rate(&self, inputs: &PipoInputs, now: f64) -> Result<Rating, PipoError> {
        let numerator = self.compute_numerator(
            inputs.score,
            inputs.quality,
            inputs.normalized_size,
            inputs.trigger,
        )?;
        let denominator = self.compute_denominator(inputs.source_timestamp, now)?;
        Ok(Rating::new(numerator, denominator))
    }

    /// Full rating with safe fallbacks for malformed input
    pub fn rate(&self, inputs: &PipoInputs, now: f64) -> Rating {
        let numerator = self
            .compute_numerator(
                inputs.score,
                inputs.quality,
                inputs.normalized_size,
                inputs.trigger,
            )
            .unwrap_or_else(|e| {
                log::warn!("numerator fallback: {}", e);
                FALLBACK_NUMERATOR
            });
        let denominator = self
            .compute_denominator(inputs.source_timestamp, now)
            .unwrap_or_else(|e| {
                log::warn!("denominator fallback: {}", e);
                FALLBACK_DENOMINATOR
            });
        Rating::new(numerator, denominator)
    }

    /// Re-derive a rating from a stored numerator
    pub fn rerate(&self, numerator: f64, source_timestamp: f64, now: f64) -> Rating {
        let numerator = if numerator.is_finite() {
            numerator
        } else {
            FALLBACK_NUMERATOR
        };
        let denominator = self
            .compute_denominator(source_timestamp, now)
            .unwrap_or(FALLBACK_DENOMINATOR);
        Rating::new(numerator, denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const NOW: f64 = 1_709_251_200.0;

    fn engine() -> PipoEngine {
        PipoEngine::new(PipoConfig::default()).unwrap()
    }

    #[test]
    fn test_reference_scenario() {
        let e = engine();
        let inputs = PipoInputs {
            score: 10.0,
            quality: 1.0,
            normalized_size: 0.8,
            trigger: 1.0,
            source_timestamp: NOW - 2.0 * 3600.0,
        };
        let r = e.try_rate(&inputs, NOW).unwrap();
        assert_relative_eq!(r.numerator, 3.2, epsilon = 1e-12);
        assert_relative_eq!(r.denominator, 3.0, epsilon = 1e-12);
        assert_relative_eq!(r.rating, 1.0667, epsilon = 1e-4);
    }

    #[test]
    fn test_rating_is_reproducible() {
        let e = engine();
        let inputs = PipoInputs {
            score: 3.0,
            quality: 0.7,
            normalized_size: 0.41,
            trigger: 0.5,
            source_timestamp: NOW - 5000.0,
        };
        let a = e.rate(&inputs, NOW);
        let b = e.rate(&inputs, NOW);
        assert_eq!(a.rating.to_bits(), b.rating.to_bits());
        assert_eq!(a.numerator.to_bits(), b.numerator.to_bits());
    }

    #[test]
    fn test_rating_decays_with_age() {
        let e = engine();
        let mut last = f64::INFINITY;
        for hours in [0.0, 0.5, 1.0, 6.0, 48.0, 120.0] {
            let r = e.rerate(2.5, NOW - hours * 3600.0, NOW);
            assert!(r.rating < last);
            last = r.rating;
        }
    }

    #[test]
    fn test_future_timestamp_counts_as_fresh() {
        let e = engine();
        assert_eq!(e.compute_denominator(NOW + 7200.0, NOW).unwrap(), 1.0);
    }

    #[test]
    fn test_zero_weight_excludes_factor() {
        let e = PipoEngine::new(PipoConfig {
            weights: PipoWeights {
                score: 0.0,
                quality: 1.0,
                size: 0.0,
                trigger: 0.0,
                time: 1.0,
            },
            ..Default::default()
        })
        .unwrap();
        let n = e.compute_numerator(1000.0, 0.9, 1.0, 1.0).unwrap();
        assert_relative_eq!(n, 0.9);
    }

    #[test]
    fn test_invalid_weight() {
        let result = PipoEngine::new(PipoConfig {
            weights: PipoWeights {
                trigger: 1.5,
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(matches!(
            result,
            Err(PipoError::InvalidWeight {
                name: "trigger",
                ..
            })
        ));
    }

    #[test]
    fn test_reserve_must_leave_capacity() {
        let result = PipoEngine::new(PipoConfig {
            max_msg_size: 32,
            ..Default::default()
        });
        assert!(matches!(result, Err(PipoError::NoCapacity { .. })));
    }

    #[test]
    fn test_normalized_size() {
        let e = engine(); // capacity 308
        let n = e.compute_normalized_size(154, None, false).unwrap();
        assert_relative_eq!(n.factor, 0.5);
        assert!(!n.use_change);

        let n = e.compute_normalized_size(400, Some(77), true).unwrap();
        assert_relative_eq!(n.factor, 0.75);
        assert!(n.use_change);
        assert_eq!(n.segment_size, 77);
    }

    #[test]
    fn test_change_ignored_when_not_eligible() {
        let e = engine();
        let n = e.compute_normalized_size(100, Some(20), false).unwrap();
        assert_eq!(n.segment_size, 100);
        assert!(!n.use_change);
    }

    #[test]
    fn test_oversize() {
        let e = engine();
        assert_eq!(
            e.compute_normalized_size(309, None, false),
            Err(PipoError::Oversize {
                segment: 309,
                capacity: 308
            })
        );
        // exactly at capacity is still eligible
        let n = e.compute_normalized_size(308, None, false).unwrap();
        assert_eq!(n.factor, 0.0);
    }

    #[test]
    fn test_malformed_input_falls_back() {
        let e = engine();
        let inputs = PipoInputs {
            score: f64::NAN,
            quality: 1.0,
            normalized_size: 0.5,
            trigger: 1.0,
            source_timestamp: f64::INFINITY,
        };
        assert_eq!(
            e.try_rate(&inputs, NOW),
            Err(PipoError::NonFinite("score"))
        );
        let r = e.rate(&inputs, NOW);
        assert_eq!(r.numerator, FALLBACK_NUMERATOR);
        assert_eq!(r.denominator, FALLBACK_DENOMINATOR);
        assert_eq!(r.rating, 0.0);
    }

    #[test]
    fn test_trigger_policy() {
        let mut policy = TriggerPolicy::default();
        assert_eq!(policy.score(0), 1.0);
        assert_eq!(policy.score(3), 0.5);

        policy.overrides.insert(3, 0.9);
        assert_eq!(policy.score(3), 0.9);
        assert_eq!(policy.score(4), 0.5);
    }
}
