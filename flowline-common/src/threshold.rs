//! Threshold evaluation
//!
//! Pure classification of measured values against configured bounds.
//! No I/O, no clock; identical inputs always produce identical output,
//! which keeps review screens and audit replays in agreement.
//!
//! Classification for a value `v` against bounds `min..=max` with
//! tolerance `t` percent:
//!
//! 1. `band = (max - min) * t / 100`, clamped to half the span so the
//!    low and high warning bands never overlap.
//! 2. `v < min` or `v > max` -> Breach.
//! 3. `v <= min + band` or `v >= max - band` -> Warning (inclusive, so
//!    the exact boundary values warn even at `t == 0`).
//! 4. Otherwise Normal.
//!
//! Without a configured threshold a parameter is classified against its
//! instrument's hard physical range only: outside -> Breach, inside ->
//! Normal (no warning band).

use serde::{Deserialize, Serialize};

use crate::model::{FlowThreshold, MeasuredParameter, Measurements, Severity};

/// Alert level of one evaluated value, ordered for aggregation
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Normal,
    Warning,
    Breach,
}

impl AlertLevel {
    /// Notification severity a submission with this overall level escalates to
    pub fn severity(&self) -> Severity {
        match self {
            AlertLevel::Normal => Severity::Normal,
            AlertLevel::Warning => Severity::High,
            AlertLevel::Breach => Severity::Urgent,
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertLevel::Normal => "normal",
            AlertLevel::Warning => "warning",
            AlertLevel::Breach => "breach",
        };
        write!(f, "{}", s)
    }
}

/// A min/max bound pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    /// Hard physical instrument range for a parameter, used when no
    /// threshold is configured
    pub fn instrument_range(param: MeasuredParameter) -> Bounds {
        match param {
            MeasuredParameter::Pressure => Bounds { min: 0.0, max: 1000.0 },
            MeasuredParameter::Temperature => Bounds { min: -50.0, max: 150.0 },
            MeasuredParameter::FlowRate => Bounds { min: 0.0, max: 50_000.0 },
            MeasuredParameter::ContainedVolume => Bounds { min: 0.0, max: 1_000_000.0 },
        }
    }
}

/// Result of evaluating one value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub level: AlertLevel,
    /// Location of the value in the range as a percentage, clamped to
    /// [0, 100]; drives UI gauges
    pub position: f64,
}

/// Per-parameter evaluation of a whole reading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingEvaluation {
    pub parameters: Vec<ParameterEvaluation>,
    /// Maximum level across evaluated parameters; Normal when no
    /// channel is recorded
    pub overall: AlertLevel,
}

/// One parameter's evaluation within a reading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterEvaluation {
    pub parameter: MeasuredParameter,
    pub value: f64,
    pub level: AlertLevel,
    pub position: f64,
    /// Whether a configured threshold applied (false means the
    /// instrument hard range was used)
    pub configured: bool,
}

impl ReadingEvaluation {
    /// Parameters whose level is Breach
    pub fn breached_parameters(&self) -> Vec<MeasuredParameter> {
        self.parameters
            .iter()
            .filter(|p| p.level == AlertLevel::Breach)
            .map(|p| p.parameter)
            .collect()
    }
}

/// Evaluate one value against configured bounds with a warning tolerance
pub fn evaluate(value: f64, bounds: Bounds, tolerance_percent: f64) -> Evaluation {
    let span = bounds.max - bounds.min;
    // Clamp the band to half the span: at tolerance > 50 the two bands
    // would overlap and Normal would classify below the low band.
    let band = (span * tolerance_percent / 100.0).min(span / 2.0);

    let level = if value < bounds.min || value > bounds.max {
        AlertLevel::Breach
    } else if value <= bounds.min + band || value >= bounds.max - band {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    };

    Evaluation {
        level,
        position: position(value, bounds),
    }
}

/// Evaluate one value against a hard instrument range (no warning band)
pub fn evaluate_hard(value: f64, bounds: Bounds) -> Evaluation {
    let level = if value < bounds.min || value > bounds.max {
        AlertLevel::Breach
    } else {
        AlertLevel::Normal
    };
    Evaluation {
        level,
        position: position(value, bounds),
    }
}

fn position(value: f64, bounds: Bounds) -> f64 {
    let span = bounds.max - bounds.min;
    if span == 0.0 {
        // Degenerate range: report which side of the single point we are on
        return if value < bounds.min {
            0.0
        } else if value > bounds.max {
            100.0
        } else {
            50.0
        };
    }
    ((value - bounds.min) / span * 100.0).clamp(0.0, 100.0)
}

/// Evaluate every recorded channel of a reading
///
/// `threshold` is the pipeline's active threshold, if any. Channels the
/// threshold has no bounds for, and all channels when no threshold is
/// active, fall back to the instrument hard range.
pub fn evaluate_reading(
    measurements: &Measurements,
    threshold: Option<&FlowThreshold>,
) -> ReadingEvaluation {
    let mut parameters = Vec::new();
    let mut overall = AlertLevel::Normal;

    for (param, value) in measurements.present() {
        let (evaluation, configured) = match threshold.and_then(|t| t.bounds(param)) {
            Some(bounds) => (
                evaluate(
                    value,
                    bounds,
                    threshold.map(|t| t.alert_tolerance_percent).unwrap_or(0.0),
                ),
                true,
            ),
            None => (evaluate_hard(value, Bounds::instrument_range(param)), false),
        };
        overall = overall.max(evaluation.level);
        parameters.push(ParameterEvaluation {
            parameter: param,
            value,
            level: evaluation.level,
            position: evaluation.position,
            configured,
        });
    }

    ReadingEvaluation { parameters, overall }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const BOUNDS: Bounds = Bounds { min: 100.0, max: 500.0 };

    fn pressure_threshold(tolerance: f64) -> FlowThreshold {
        FlowThreshold {
            id: Uuid::new_v4(),
            pipeline_id: Uuid::new_v4(),
            pressure_min: Some(100.0),
            pressure_max: Some(500.0),
            temperature_min: None,
            temperature_max: None,
            flow_rate_min: None,
            flow_rate_max: None,
            contained_volume_min: None,
            contained_volume_max: None,
            alert_tolerance_percent: tolerance,
            active: true,
        }
    }

    #[test]
    fn value_above_max_breaches() {
        // 520 against 100..500 at 5% tolerance
        let e = evaluate(520.0, BOUNDS, 5.0);
        assert_eq!(e.level, AlertLevel::Breach);
        assert_eq!(e.position, 100.0); // clamped
    }

    #[test]
    fn value_below_min_breaches() {
        let e = evaluate(80.0, BOUNDS, 5.0);
        assert_eq!(e.level, AlertLevel::Breach);
        assert_eq!(e.position, 0.0);
    }

    #[test]
    fn value_inside_high_band_warns() {
        // band = 400 * 5% = 20; 480 >= 500 - 20
        let e = evaluate(480.0, BOUNDS, 5.0);
        assert_eq!(e.level, AlertLevel::Warning);
        assert_eq!(e.position, 95.0);
    }

    #[test]
    fn value_inside_low_band_warns() {
        let e = evaluate(115.0, BOUNDS, 5.0);
        assert_eq!(e.level, AlertLevel::Warning);
    }

    #[test]
    fn value_in_the_middle_is_normal() {
        let e = evaluate(300.0, BOUNDS, 5.0);
        assert_eq!(e.level, AlertLevel::Normal);
        assert_eq!(e.position, 50.0);
    }

    #[test]
    fn boundary_values_warn_even_at_zero_tolerance() {
        // Inclusive comparisons fire at band == 0
        assert_eq!(evaluate(100.0, BOUNDS, 0.0).level, AlertLevel::Warning);
        assert_eq!(evaluate(500.0, BOUNDS, 0.0).level, AlertLevel::Warning);
        assert_eq!(evaluate(100.01, BOUNDS, 0.0).level, AlertLevel::Normal);
    }

    #[test]
    fn band_is_clamped_to_half_the_span() {
        // At 50% tolerance the bands meet in the middle: everything
        // in range warns, but nothing below the low band can slip
        // through as Normal even for larger tolerances.
        for tolerance in [50.0, 80.0, 200.0] {
            assert_eq!(evaluate(300.0, BOUNDS, tolerance).level, AlertLevel::Warning);
            assert_eq!(evaluate(150.0, BOUNDS, tolerance).level, AlertLevel::Warning);
            assert_eq!(evaluate(520.0, BOUNDS, tolerance).level, AlertLevel::Breach);
        }
    }

    #[test]
    fn just_outside_tolerance_band_is_normal_for_all_tolerances() {
        for t in 0..=49 {
            let tolerance = t as f64;
            let band = 400.0 * tolerance / 100.0;
            let v = 100.0 + band + 1.0;
            if v < 500.0 - band {
                assert_eq!(
                    evaluate(v, BOUNDS, tolerance).level,
                    AlertLevel::Normal,
                    "tolerance {}",
                    tolerance
                );
            }
        }
    }

    #[test]
    fn degenerate_span_reports_side() {
        let point = Bounds { min: 10.0, max: 10.0 };
        assert_eq!(evaluate(9.0, point, 5.0).position, 0.0);
        assert_eq!(evaluate(11.0, point, 5.0).position, 100.0);
        assert_eq!(evaluate(10.0, point, 5.0).position, 50.0);
    }

    #[test]
    fn evaluation_is_idempotent() {
        let first = evaluate(480.0, BOUNDS, 5.0);
        for _ in 0..10 {
            assert_eq!(evaluate(480.0, BOUNDS, 5.0), first);
        }
    }

    #[test]
    fn hard_range_has_no_warning_band() {
        let bounds = Bounds::instrument_range(MeasuredParameter::Pressure);
        assert_eq!(evaluate_hard(999.9, bounds).level, AlertLevel::Normal);
        assert_eq!(evaluate_hard(1000.1, bounds).level, AlertLevel::Breach);
        assert_eq!(evaluate_hard(-1.0, bounds).level, AlertLevel::Breach);
    }

    #[test]
    fn reading_overall_is_max_of_present_parameters() {
        let threshold = pressure_threshold(5.0);
        let m = Measurements {
            pressure: Some(480.0),    // warning
            temperature: Some(20.0),  // no bounds -> hard range, normal
            flow_rate: None,
            contained_volume: None,
        };
        let eval = evaluate_reading(&m, Some(&threshold));
        assert_eq!(eval.overall, AlertLevel::Warning);
        assert_eq!(eval.parameters.len(), 2);
        assert!(eval.parameters[0].configured);
        assert!(!eval.parameters[1].configured);
    }

    #[test]
    fn breach_dominates_overall_and_is_listed() {
        let threshold = pressure_threshold(5.0);
        let m = Measurements {
            pressure: Some(520.0),
            temperature: Some(200.0), // outside instrument range
            flow_rate: Some(100.0),
            contained_volume: None,
        };
        let eval = evaluate_reading(&m, Some(&threshold));
        assert_eq!(eval.overall, AlertLevel::Breach);
        assert_eq!(
            eval.breached_parameters(),
            vec![MeasuredParameter::Pressure, MeasuredParameter::Temperature]
        );
    }

    #[test]
    fn empty_measurements_evaluate_normal() {
        let eval = evaluate_reading(&Measurements::default(), None);
        assert_eq!(eval.overall, AlertLevel::Normal);
        assert!(eval.parameters.is_empty());
    }

    #[test]
    fn no_threshold_falls_back_to_instrument_range() {
        let m = Measurements {
            pressure: Some(950.0),
            ..Default::default()
        };
        let eval = evaluate_reading(&m, None);
        // 950 bar is alarming to a human but inside instrument range:
        // without configuration there is no warning band
        assert_eq!(eval.overall, AlertLevel::Normal);
    }
}
