use std::fs::File;
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::engine::RetrievalEngine;
use crate::error::{EngineError, Result};
use crate::model::{Decision, EntityId};

/// One labelled question. A `null` or missing `expected_answer` expects no match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalCase {
    pub case_id: String,
    pub question: String,
    #[serde(default)]
    pub expected_answer: Option<String>,
    #[serde(default)]
    pub min_confidence: Option<f32>,
}

impl EvalCase {
    pub fn expected_decision(&self) -> Decision {
        if self.expected_answer.is_some() {
            Decision::Hit
        } else {
            Decision::Miss
        }
    }

    fn accepts(&self, decision: Decision, answer: &str, confidence: f32) -> bool {
        if decision != self.expected_decision() {
            return false;
        }
        if let Some(expected) = &self.expected_answer {
            if expected != answer {
                return false;
            }
        }
        match self.min_confidence {
            Some(min) if decision == Decision::Hit => confidence >= min,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub case_id: String,
    pub passed: bool,
    pub actual_decision: Decision,
    pub actual_answer: Option<String>,
    pub confidence: f32,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f32,
    pub outcomes: Vec<EvalOutcome>,
}

impl EvalSummary {
    pub fn meets(&self, required_pass_rate: f32) -> bool {
        self.pass_rate >= required_pass_rate
    }
}

pub fn load_cases_json(path: &Path) -> Result<Vec<EvalCase>> {
    let file = File::open(path)
        .map_err(|e| EngineError::Config(format!("open {}: {e}", path.display())))?;
    serde_json::from_reader(file)
        .map_err(|e| EngineError::Config(format!("parse eval cases {}: {e}", path.display())))
}

/// Replays `cases` against a trained entity.
pub async fn evaluate(
    engine: &RetrievalEngine,
    entity_id: EntityId,
    cases: &[EvalCase],
) -> Result<EvalSummary> {
    let mut outcomes = Vec::with_capacity(cases.len());

    for case in cases {
        let start = Instant::now();
        let result = engine.try_query(entity_id, &case.question).await?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let decision = result.decision();
        let passed = case.accepts(decision, &result.answer, result.confidence);
        outcomes.push(EvalOutcome {
            case_id: case.case_id.clone(),
            passed,
            actual_decision: decision,
            actual_answer: (decision == Decision::Hit).then_some(result.answer),
            confidence: result.confidence,
            latency_ms,
        });
    }

    let total = outcomes.len();
    let passed = outcomes.iter().filter(|o| o.passed).count();
    let failed = total.saturating_sub(passed);
    let pass_rate = if total == 0 {
        0.0
    } else {
        passed as f32 / total as f32
    };

    Ok(EvalSummary {
        total,
        passed,
        failed,
        pass_rate,
        outcomes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(expected: Option<&str>, min: Option<f32>) -> EvalCase {
        EvalCase {
            case_id: "c1".into(),
            question: "q".into(),
            expected_answer: expected.map(str::to_string),
            min_confidence: min,
        }
    }

    #[test]
    fn null_answer_expects_miss() {
        let parsed: Vec<EvalCase> = serde_json::from_str(
            r#"[{"case_id": "a", "question": "q", "expected_answer": null},
                {"case_id": "b", "question": "q"},
                {"case_id": "c", "question": "q", "expected_answer": "yes", "min_confidence": 0.9}]"#,
        )
        .unwrap();
        assert_eq!(parsed[0].expected_decision(), Decision::Miss);
        assert_eq!(parsed[1].expected_decision(), Decision::Miss);
        assert_eq!(parsed[2].expected_decision(), Decision::Hit);
        assert_eq!(parsed[2].min_confidence, Some(0.9));
    }

    #[test]
    fn acceptance_checks_answer_and_confidence() {
        let hit = case(Some("yes"), Some(0.8));
        assert!(hit.accepts(Decision::Hit, "yes", 0.85));
        assert!(!hit.accepts(Decision::Hit, "yes", 0.75));
        assert!(!hit.accepts(Decision::Hit, "no", 0.95));
        assert!(!hit.accepts(Decision::Miss, "", 0.0));

        let miss = case(None, Some(0.8));
        assert!(miss.accepts(Decision::Miss, "", 0.0));
        assert!(!miss.accepts(Decision::Hit, "yes", 0.9));
    }
}
