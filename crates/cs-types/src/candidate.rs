//! Evaluated candidates and verifier verdicts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Variable name → value. Ordered so that iteration (and hashing) is stable.
pub type Point = BTreeMap<String, f64>;

/// Opaque verifier evidence, e.g. per-constraint margins.
pub type Evidence = BTreeMap<String, serde_json::Value>;

/// Feasibility verdict issued by the external verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn is_pass(self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        }
    }
}

impl From<bool> for Verdict {
    fn from(pass: bool) -> Self {
        if pass {
            Self::Pass
        } else {
            Self::Fail
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a verifier returns for one candidate input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub verdict: Verdict,
    #[serde(with = "crate::canonical::lossless_f64")]
    pub score: f64,
    #[serde(default)]
    pub evidence: Evidence,
}

impl Evaluation {
    pub fn pass(score: f64) -> Self {
        Self {
            verdict: Verdict::Pass,
            score,
            evidence: Evidence::new(),
        }
    }

    pub fn fail(score: f64) -> Self {
        Self {
            verdict: Verdict::Fail,
            score,
            evidence: Evidence::new(),
        }
    }

    pub fn with_evidence(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.evidence.insert(key.into(), value);
        self
    }
}

/// One evaluated point of a run. Identity is `index` within that run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "i")]
    pub index: usize,
    #[serde(rename = "x")]
    pub point: Point,
    pub verdict: Verdict,
    #[serde(with = "crate::canonical::lossless_f64")]
    pub score: f64,
    #[serde(default)]
    pub evidence: Evidence,
}

impl Candidate {
    pub fn new(index: usize, point: Point, evaluation: Evaluation) -> Self {
        Self {
            index,
            point,
            verdict: evaluation.verdict,
            score: evaluation.score,
            evidence: evaluation.evidence,
        }
    }

    pub fn is_pass(&self) -> bool {
        self.verdict.is_pass()
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.point.get(name).copied()
    }

    /// Numeric evidence entry. Numeric strings (including "NaN") are accepted.
    pub fn evidence_f64(&self, key: &str) -> Option<f64> {
        self.evidence.get(key).and_then(crate::canonical::parse_f64)
    }

    /// Whether `self` should replace `current` as the best PASS candidate.
    ///
    /// Strictly greater score wins; ties keep the incumbent.
    pub fn improves_on(&self, current: Option<&Candidate>) -> bool {
        if !self.is_pass() {
            return false;
        }
        match current {
            None => true,
            Some(best) => self.score > best.score,
        }
    }
}
