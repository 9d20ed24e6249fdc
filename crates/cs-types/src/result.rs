//! Search and orchestration results with their reproducibility digests.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::candidate::{Candidate, Point};
use crate::canonical::{canonical_f64, digest};
use crate::space::{SearchMethod, SearchSpec, Variable};
use crate::stage::{OrchestratorSpec, Stage};

pub fn point_json(point: &Point) -> Value {
    let mut map = Map::new();
    for (k, v) in point {
        map.insert(k.clone(), canonical_f64(*v));
    }
    Value::Object(map)
}

fn variables_json(variables: &[Variable]) -> Value {
    Value::Array(
        variables
            .iter()
            .map(|v| {
                json!({
                    "name": v.name,
                    "lower": canonical_f64(v.lower),
                    "upper": canonical_f64(v.upper),
                })
            })
            .collect(),
    )
}

fn record_json(c: &Candidate, with_evidence: bool) -> Value {
    let mut record = json!({
        "i": c.index,
        "x": point_json(&c.point),
        "verdict": c.verdict.as_str(),
        "score": canonical_f64(c.score),
    });
    if with_evidence {
        record["evidence"] = serde_json::to_value(&c.evidence).unwrap_or(Value::Null);
    }
    record
}

/// Ordered trace of one budgeted search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub spec: SearchSpec,
    pub candidates: Vec<Candidate>,
    pub best_index: Option<usize>,
    pub digest: String,
}

impl SearchResult {
    /// Assemble a result from an index-ordered trace, selecting the best PASS
    /// candidate and sealing the digest.
    pub fn from_candidates(spec: SearchSpec, candidates: Vec<Candidate>) -> Self {
        let mut best: Option<&Candidate> = None;
        for c in &candidates {
            if c.improves_on(best) {
                best = Some(c);
            }
        }
        let best_index = best.map(|c| c.index);
        let digest = digest(&Self::payload(&spec, &candidates, best_index));
        Self {
            spec,
            candidates,
            best_index,
            digest,
        }
    }

    fn payload(spec: &SearchSpec, candidates: &[Candidate], best_index: Option<usize>) -> Value {
        json!({
            "spec": {
                "variables": variables_json(spec.variables()),
                "budget": spec.budget(),
                "seed": spec.seed(),
                "method": spec.method().as_str(),
            },
            "best_index": best_index,
            "records": candidates.iter().map(|c| record_json(c, false)).collect::<Vec<_>>(),
        })
    }

    pub fn best(&self) -> Option<&Candidate> {
        self.best_index
            .and_then(|i| self.candidates.iter().find(|c| c.index == i))
    }

    pub fn pass_count(&self) -> usize {
        self.candidates.iter().filter(|c| c.is_pass()).count()
    }

    pub fn recompute_digest(&self) -> String {
        digest(&Self::payload(&self.spec, &self.candidates, self.best_index))
    }

    /// True when the stored digest still matches the content.
    pub fn verify_digest(&self) -> bool {
        self.recompute_digest() == self.digest
    }
}

/// One executed stage of an orchestrated search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub name: String,
    /// Method declared on the stage; `result.spec.method()` is what actually ran.
    pub declared_method: SearchMethod,
    pub result: SearchResult,
    /// Why an acceptance-guided stage fell back to low-discrepancy sampling.
    pub fallback_reason: Option<String>,
}

impl StageOutcome {
    pub fn fell_back(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

/// Best PASS candidate across all stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestCandidate {
    pub stage_index: usize,
    pub stage_name: String,
    pub candidate: Candidate,
}

/// Full multi-stage trace. The digest covers every stage's digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorResult {
    pub spec: OrchestratorSpec,
    pub stages: Vec<StageOutcome>,
    pub best: Option<BestCandidate>,
    pub digest: String,
}

impl OrchestratorResult {
    pub fn new(spec: OrchestratorSpec, stages: Vec<StageOutcome>, best: Option<BestCandidate>) -> Self {
        let digest = digest(&Self::payload(&spec, &stages, best.as_ref()));
        Self {
            spec,
            stages,
            best,
            digest,
        }
    }

    fn payload(spec: &OrchestratorSpec, stages: &[StageOutcome], best: Option<&BestCandidate>) -> Value {
        let declared: Vec<Value> = spec.stages.iter().map(stage_json).collect();
        let best = match best {
            Some(b) => json!({
                "stage": b.stage_name,
                "score": canonical_f64(b.candidate.score),
                "x": point_json(&b.candidate.point),
            }),
            None => Value::Null,
        };
        let stages: Vec<Value> = stages
            .iter()
            .map(|s| {
                let r = &s.result;
                json!({
                    "name": s.name,
                    "digest": r.digest,
                    "method": r.spec.method().as_str(),
                    "budget": r.spec.budget(),
                    "seed": r.spec.seed(),
                    "best_index": r.best_index,
                    "fallback_reason": s.fallback_reason,
                    "records": r.candidates.iter().map(|c| record_json(c, true)).collect::<Vec<_>>(),
                })
            })
            .collect();
        json!({
            "spec": {
                "variables": variables_json(&spec.variables),
                "stages": declared,
            },
            "best": best,
            "stages": stages,
        })
    }

    pub fn candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.stages.iter().flat_map(|s| s.result.candidates.iter())
    }

    pub fn total_evaluations(&self) -> usize {
        self.stages.iter().map(|s| s.result.candidates.len()).sum()
    }

    pub fn recompute_digest(&self) -> String {
        digest(&Self::payload(&self.spec, &self.stages, self.best.as_ref()))
    }

    /// True when both the top-level digest and every stage digest match.
    pub fn verify_digest(&self) -> bool {
        self.stages.iter().all(|s| s.result.verify_digest()) && self.recompute_digest() == self.digest
    }
}

fn stage_json(stage: &Stage) -> Value {
    let c = &stage.acceleration;
    json!({
        "name": stage.name,
        "method": stage.method.as_str(),
        "budget": stage.budget,
        "seed": stage.seed,
        "local_refine": stage.local_refine,
        "local_shrink": canonical_f64(stage.local_shrink),
        "acceleration": {
            "pool_multiplier": c.pool_multiplier,
            "kappa": canonical_f64(c.kappa),
            "ridge_alpha": canonical_f64(c.ridge_alpha),
            "feasibility_margin_key": c.feasibility_margin_key,
        },
    })
}
