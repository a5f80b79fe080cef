//! Operator-level scoring.
//!
//! Per-event flags and rule hits are reduced to per-operator counts, then
//! turned into a suspicion score and risk tier by a [`ScoringStrategy`]:
//!
//! - [`WeightedScoring`]: fixed points per flag (the default)
//! - [`CoverageScoring`]: percentage of flag types an operator triggered
//! - [`ProbabilityScoring`]: sigmoid of the weighted flag rate
//!
//! [`breakdown`] holds the device and location tables.

pub mod breakdown;

use std::collections::BTreeMap;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::config::ScoringConfig;
use crate::detect::FlaggedLog;
use crate::model::{Flag, FlagCounts, OperatorScore, RiskLevel};
use crate::stats::{safe_div, sigmoid};

/// Which [`ScoringStrategy`] to build from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Weighted,
    Coverage,
    Probability,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Weighted => write!(f, "weighted"),
            Self::Coverage => write!(f, "coverage"),
            Self::Probability => write!(f, "probability"),
        }
    }
}

/// Points contributed by each flag occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagWeights {
    /// Points per flagged event, on top of the per-flag points.
    pub flagged: f64,
    pub rapid: f64,
    pub loc_conflict: f64,
    pub shared_key: f64,
    pub device_hop: f64,
    pub hourly_outlier: f64,
    pub shift_deviation: f64,
    pub shift_violation: f64,
    pub load_deviation: f64,
    pub co_location: f64,
    pub ward_mismatch: f64,
    /// Points per event a custom rule flagged.
    pub rule: f64,
}

impl Default for FlagWeights {
    fn default() -> Self {
        Self {
            flagged: 2.0,
            rapid: 1.5,
            loc_conflict: 1.25,
            shared_key: 1.25,
            device_hop: 1.0,
            hourly_outlier: 1.0,
            shift_deviation: 1.0,
            shift_violation: 1.0,
            load_deviation: 1.0,
            co_location: 1.25,
            ward_mismatch: 1.0,
            rule: 1.0,
        }
    }
}

impl FlagWeights {
    pub fn weight(&self, flag: Flag) -> f64 {
        match flag {
            Flag::Rapid => self.rapid,
            Flag::LocConflict => self.loc_conflict,
            Flag::SharedKey => self.shared_key,
            Flag::DeviceHop => self.device_hop,
            Flag::HourlyOutlier => self.hourly_outlier,
            Flag::ShiftDeviation => self.shift_deviation,
            Flag::ShiftViolation => self.shift_violation,
            Flag::LoadDeviation => self.load_deviation,
            Flag::CoLocation => self.co_location,
            Flag::WardMismatch => self.ward_mismatch,
        }
    }

    /// `flagged × flagged_events + rule × rule_flags + Σ weight × count`.
    pub fn weighted_sum(&self, tally: &OperatorTally) -> f64 {
        Flag::ALL
            .into_iter()
            .map(|flag| self.weight(flag) * tally.counts.get(flag) as f64)
            .sum::<f64>()
            + self.flagged * tally.flagged_events as f64
            + self.rule * tally.rule_flags as f64
    }

    pub fn validate(&self) -> Result<(), String> {
        let all = [("flagged", self.flagged), ("rule", self.rule)]
            .into_iter()
            .chain(Flag::ALL.into_iter().map(|f| (f.column(), self.weight(f))));
        for (name, weight) in all {
            if !weight.is_finite() || weight < 0.0 {
                return Err(format!(
                    "scoring weight for {name} must be a non-negative number, got {weight}"
                ));
            }
        }
        Ok(())
    }
}

/// Lower bounds of the Medium and High tiers. A score exactly at a cutoff
/// belongs to the higher tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskCutoffs {
    pub medium: f64,
    pub high: f64,
}

impl RiskCutoffs {
    pub fn classify(&self, score: f64) -> RiskLevel {
        if score >= self.high {
            RiskLevel::High
        } else if score >= self.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.medium.is_finite() || !self.high.is_finite() || self.medium > self.high {
            return Err(format!(
                "risk cutoffs must be finite with medium <= high, got medium={} high={}",
                self.medium, self.high
            ));
        }
        Ok(())
    }
}

/// Flag totals for one operator, as seen by a strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OperatorTally {
    pub counts: FlagCounts,
    /// Events at least one custom rule flagged.
    pub rule_flags: usize,
    /// Events a detector or a rule flagged.
    pub flagged_events: usize,
    pub total_tests: usize,
}

/// Turns an operator's flag totals into a score and a tier.
pub trait ScoringStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, tally: &OperatorTally) -> f64;

    fn risk(&self, score: f64) -> RiskLevel;
}

/// Fixed points per flag occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedScoring {
    pub weights: FlagWeights,
    pub cutoffs: RiskCutoffs,
}

impl WeightedScoring {
    pub const DEFAULT_CUTOFFS: RiskCutoffs = RiskCutoffs {
        medium: 40.0,
        high: 75.0,
    };
}

impl Default for WeightedScoring {
    fn default() -> Self {
        Self {
            weights: FlagWeights::default(),
            cutoffs: Self::DEFAULT_CUTOFFS,
        }
    }
}

impl ScoringStrategy for WeightedScoring {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn score(&self, tally: &OperatorTally) -> f64 {
        self.weights.weighted_sum(tally)
    }

    fn risk(&self, score: f64) -> RiskLevel {
        self.cutoffs.classify(score)
    }
}

/// Percentage of the considered flag types an operator triggered at least
/// once. Rule hits have no flag type and do not count.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageScoring {
    /// Flag types in the denominator (normally the enabled detectors).
    pub flags: Vec<Flag>,
    pub cutoffs: RiskCutoffs,
}

impl CoverageScoring {
    pub const DEFAULT_CUTOFFS: RiskCutoffs = RiskCutoffs {
        medium: 25.0,
        high: 50.0,
    };
}

impl Default for CoverageScoring {
    fn default() -> Self {
        Self {
            flags: Flag::ALL.to_vec(),
            cutoffs: Self::DEFAULT_CUTOFFS,
        }
    }
}

impl ScoringStrategy for CoverageScoring {
    fn name(&self) -> &'static str {
        "coverage"
    }

    fn score(&self, tally: &OperatorTally) -> f64 {
        let hit = self
            .flags
            .iter()
            .filter(|flag| tally.counts.get(**flag) > 0)
            .count();
        safe_div(hit as f64 * 100.0, self.flags.len() as f64).unwrap_or(0.0)
    }

    fn risk(&self, score: f64) -> RiskLevel {
        self.cutoffs.classify(score)
    }
}

/// Misuse probability: `sigmoid(intercept + slope × weighted_sum / total_tests)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityScoring {
    pub weights: FlagWeights,
    pub intercept: f64,
    pub slope: f64,
    pub cutoffs: RiskCutoffs,
}

impl ProbabilityScoring {
    pub const DEFAULT_CUTOFFS: RiskCutoffs = RiskCutoffs {
        medium: 0.4,
        high: 0.7,
    };
}

impl Default for ProbabilityScoring {
    fn default() -> Self {
        Self {
            weights: FlagWeights::default(),
            intercept: -3.0,
            slope: 6.0,
            cutoffs: Self::DEFAULT_CUTOFFS,
        }
    }
}

impl ScoringStrategy for ProbabilityScoring {
    fn name(&self) -> &'static str {
        "probability"
    }

    fn score(&self, tally: &OperatorTally) -> f64 {
        let weighted = self.weights.weighted_sum(tally);
        let rate = safe_div(weighted, tally.total_tests as f64).unwrap_or(0.0);
        sigmoid(self.intercept + self.slope * rate)
    }

    fn risk(&self, score: f64) -> RiskLevel {
        self.cutoffs.classify(score)
    }
}

/// Build the configured strategy. `enabled` lists the flag types whose
/// detectors run, which is what coverage is measured against.
pub fn strategy_from_config(config: &ScoringConfig, enabled: &[Flag]) -> Box<dyn ScoringStrategy> {
    match config.strategy {
        StrategyKind::Weighted => Box::new(WeightedScoring {
            weights: config.weights.clone(),
            cutoffs: config.cutoffs.unwrap_or(WeightedScoring::DEFAULT_CUTOFFS),
        }),
        StrategyKind::Coverage => Box::new(CoverageScoring {
            flags: enabled.to_vec(),
            cutoffs: config.cutoffs.unwrap_or(CoverageScoring::DEFAULT_CUTOFFS),
        }),
        StrategyKind::Probability => Box::new(ProbabilityScoring {
            weights: config.weights.clone(),
            intercept: config.probability.intercept,
            slope: config.probability.slope,
            cutoffs: config.cutoffs.unwrap_or(ProbabilityScoring::DEFAULT_CUTOFFS),
        }),
    }
}

/// Reduce a flagged log to one score per operator, sorted by score
/// descending with ties broken by operator id ascending.
pub fn aggregate(flagged: &FlaggedLog, strategy: &dyn ScoringStrategy) -> Vec<OperatorScore> {
    let mut tallies: BTreeMap<&str, OperatorTally> = BTreeMap::new();
    for (idx, (event, flags)) in flagged.iter().enumerate() {
        let tally = tallies.entry(event.operator_id.as_str()).or_default();
        tally.total_tests += 1;
        tally.counts.record(flags);
        if !flagged.rules_of(idx).is_empty() {
            tally.rule_flags += 1;
        }
        if flagged.is_flagged(idx) {
            tally.flagged_events += 1;
        }
    }

    let mut scores: Vec<OperatorScore> = tallies
        .into_iter()
        .map(|(operator_id, tally)| {
            let suspicion_score = strategy.score(&tally);
            OperatorScore {
                operator_id: operator_id.to_string(),
                counts: tally.counts,
                rule_flags: tally.rule_flags,
                flagged_events: tally.flagged_events,
                total_tests: tally.total_tests,
                suspicion_score,
                risk_level: strategy.risk(suspicion_score),
            }
        })
        .collect();
    sort_scores(&mut scores);
    scores
}

/// Score descending, operator id ascending.
pub fn sort_scores(scores: &mut [OperatorScore]) {
    scores.sort_by(|a, b| {
        b.suspicion_score
            .total_cmp(&a.suspicion_score)
            .then_with(|| a.operator_id.cmp(&b.operator_id))
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
