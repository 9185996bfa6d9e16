//! Oracle-backed confirmation that an action did what it was meant to.
use std::sync::Arc;

use crate::agent_engine::history::{AttemptLog, AttemptRecord};
use crate::agent_engine::prompts::{build_outcome_prompt, build_position_prompt};
use crate::config::VerificationConfig;
use crate::llm::oracle::Oracle;
use crate::perception::types::Snapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub confidence: u8,
    pub info: String,
    pub passed: bool,
}

/// What the verifier reported, before any threshold is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedReply {
    confidence: u8,
    info: String,
    /// Explicit `completed` / `visible` flag, when present.
    flag: Option<bool>,
}

pub struct VerificationGate {
    oracle: Arc<dyn Oracle>,
    position_threshold: u8,
    completion_threshold: u8,
    log: Arc<AttemptLog>,
}

impl VerificationGate {
    pub fn new(oracle: Arc<dyn Oracle>, cfg: &VerificationConfig, log: Arc<AttemptLog>) -> Self {
        Self {
            oracle,
            position_threshold: cfg.position_threshold,
            completion_threshold: cfg.completion_threshold,
            log,
        }
    }

    pub fn position_threshold(&self) -> u8 {
        self.position_threshold
    }

    pub fn completion_threshold(&self) -> u8 {
        self.completion_threshold
    }

    /// Is the pointer on `target`? `position` is in image space.
    pub async fn verify_position(
        &self,
        target: &str,
        snapshot: &Snapshot,
        position: (f64, f64),
        command: Option<&str>,
    ) -> Verdict {
        self.verify(&build_position_prompt(target), snapshot, self.position_threshold, position, command)
            .await
    }

    /// Did `expected_outcome` happen?
    pub async fn verify_outcome(
        &self,
        expected_outcome: &str,
        snapshot: &Snapshot,
        position: (f64, f64),
        command: Option<&str>,
    ) -> Verdict {
        self.verify(
            &build_outcome_prompt(expected_outcome),
            snapshot,
            self.completion_threshold,
            position,
            command,
        )
        .await
    }

    /// Ask `query`, apply `threshold`, and record the attempt whatever the outcome.
    pub async fn verify(
        &self,
        query: &str,
        snapshot: &Snapshot,
        threshold: u8,
        position: (f64, f64),
        command: Option<&str>,
    ) -> Verdict {
        let parsed = match self.oracle.ask(query, snapshot).await {
            Ok(reply) => parse_reply(&reply).unwrap_or_else(|| {
                tracing::warn!(reply_len = reply.len(), "unparseable verification reply");
                ParsedReply {
                    confidence: 0,
                    info: format!("unparseable reply: {}", truncate(&reply, 120)),
                    flag: None,
                }
            }),
            Err(e) => {
                tracing::warn!(error = %e, "verification oracle call failed");
                ParsedReply {
                    confidence: 0,
                    info: format!("oracle error: {e}"),
                    flag: None,
                }
            }
        };

        let passed = parsed.flag != Some(false) && parsed.confidence >= threshold;
        self.log
            .push(AttemptRecord::new(
                position,
                command.map(str::to_string),
                parsed.confidence,
                parsed.info.clone(),
            ))
            .await;
        tracing::info!(
            confidence = parsed.confidence,
            threshold,
            passed,
            info = %parsed.info,
            "verification"
        );
        Verdict {
            confidence: parsed.confidence,
            info: parsed.info,
            passed,
        }
    }
}

/// Pull `{confidence, info}` out of a reply that may be wrapped in prose or a code fence.
fn parse_reply(reply: &str) -> Option<ParsedReply> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    let json: serde_json::Value = serde_json::from_str(&reply[start..=end]).ok()?;
    let obj = json.as_object()?;

    let raw = match obj.get("confidence")? {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    let confidence = raw.round().clamp(0.0, 100.0) as u8;

    let info = obj
        .get("info")
        .or_else(|| obj.get("details"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let flag = obj
        .get("completed")
        .or_else(|| obj.get("visible"))
        .and_then(|v| v.as_bool());

    Some(ParsedReply { confidence, info, flag })
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedOracle;

    fn gate(oracle: Arc<ScriptedOracle>, log: Arc<AttemptLog>) -> VerificationGate {
        VerificationGate::new(oracle, &VerificationConfig::default(), log)
    }

    #[test]
    fn parses_fenced_and_loose_replies() {
        let fenced = "```json\n{\"confidence\": 93, \"info\": \"on the button\"}\n```";
        assert_eq!(
            parse_reply(fenced),
            Some(ParsedReply {
                confidence: 93,
                info: "on the button".into(),
                flag: None
            })
        );

        let stringy = parse_reply(r#"Sure: {"confidence": "88%", "details": "close"}"#).unwrap();
        assert_eq!((stringy.confidence, stringy.info.as_str()), (88, "close"));

        assert_eq!(parse_reply(r#"{"confidence": 250}"#).unwrap().confidence, 100);
        assert_eq!(parse_reply(r#"{"confidence": 80, "completed": false}"#).unwrap().flag, Some(false));
        assert!(parse_reply("yes").is_none());
        assert!(parse_reply(r#"{"info": "no score"}"#).is_none());
    }

    #[tokio::test]
    async fn thresholds_gate_the_verdict() {
        let log = Arc::new(AttemptLog::in_memory());
        let oracle = ScriptedOracle::new([
            r#"{"confidence": 90, "info": "exactly on it"}"#,
            r#"{"confidence": 89, "info": "a bit off"}"#,
            r#"{"confidence": 75, "completed": true}"#,
            r#"{"confidence": 99, "completed": false}"#,
        ]);
        let g = gate(oracle, log.clone());
        let snap = Snapshot::blank(10, 10);

        assert!(g.verify_position("OK", &snap, (1.0, 1.0), None).await.passed);
        assert!(!g.verify_position("OK", &snap, (1.0, 1.0), None).await.passed);
        assert!(g.verify_outcome("dialog closed", &snap, (1.0, 1.0), None).await.passed);
        assert!(!g.verify_outcome("dialog closed", &snap, (1.0, 1.0), None).await.passed);
        assert_eq!(log.len(), 4);
    }

    #[tokio::test]
    async fn garbage_and_errors_score_zero_but_are_recorded() {
        let log = Arc::new(AttemptLog::in_memory());
        let oracle = ScriptedOracle::new(["I think so!"]);
        oracle.push_error("connection reset");
        let g = gate(oracle.clone(), log.clone());
        let snap = Snapshot::blank(10, 10);

        let garbage = g.verify_position("OK", &snap, (2.0, 3.0), Some("move to (2, 3)")).await;
        assert_eq!((garbage.confidence, garbage.passed), (0, false));
        let failed = g.verify_position("OK", &snap, (2.0, 3.0), None).await;
        assert_eq!(failed.confidence, 0);
        assert!(failed.info.contains("connection reset"));

        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].command.as_deref(), Some("move to (2, 3)"));
        assert_eq!(oracle.calls(), 2);
    }
}
