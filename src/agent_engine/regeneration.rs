//! Execute an oracle-suggested command and, when any step fails, ask the
//! oracle for a corrected one. Bounded by `max_attempts` regenerations.
use std::sync::{Arc, RwLock};

use crate::agent_engine::history::AttemptLog;
use crate::agent_engine::prompts::build_regenerate_prompt;
use crate::agent_engine::state::Phase;
use crate::agent_engine::verification::VerificationGate;
use crate::config::RegenerationConfig;
use crate::errors::{SteadyhandError, SteadyhandResult};
use crate::executor::command::{Bounds, ClickAction, CommandGrammar};
use crate::executor::coordinator::CoordinateMapper;
use crate::executor::motion::MotionExecutor;
use crate::llm::oracle::Oracle;
use crate::perception::annotator::annotate_attempts;
use crate::perception::screenshot::SnapshotProvider;
use crate::perception::types::Snapshot;

/// What the command is for; feeds the verification and regeneration prompts.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub target: String,
    pub intent: String,
    /// The only click the command may carry; anything else is regenerated.
    pub required_action: ClickAction,
    pub expected_outcome: Option<String>,
}

pub struct RegenerationController {
    mapper: RwLock<CoordinateMapper>,
    motion: Arc<MotionExecutor>,
    planner: Arc<dyn Oracle>,
    gate: Arc<VerificationGate>,
    snapshots: Arc<dyn SnapshotProvider>,
    log: Arc<AttemptLog>,
    max_attempts: u32,
    smooth: bool,
}

impl RegenerationController {
    pub fn new(
        mapper: CoordinateMapper,
        motion: Arc<MotionExecutor>,
        planner: Arc<dyn Oracle>,
        gate: Arc<VerificationGate>,
        snapshots: Arc<dyn SnapshotProvider>,
        log: Arc<AttemptLog>,
        cfg: &RegenerationConfig,
    ) -> Self {
        Self {
            mapper: RwLock::new(mapper),
            motion,
            planner,
            gate,
            snapshots,
            log,
            max_attempts: cfg.max_attempts,
            smooth: true,
        }
    }

    /// Use straight single-step moves instead of eased paths.
    pub fn with_smooth(mut self, smooth: bool) -> Self {
        self.smooth = smooth;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn mapper(&self) -> CoordinateMapper {
        *self.mapper.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn log(&self) -> &Arc<AttemptLog> {
        &self.log
    }

    pub fn motion(&self) -> &Arc<MotionExecutor> {
        &self.motion
    }

    /// The surface changed size; image space stays as it is.
    pub fn resize(&self, surface_width: u32, surface_height: u32) -> SteadyhandResult<()> {
        let resized = self.mapper().with_surface(surface_width, surface_height)?;
        self.motion.resize(surface_width, surface_height)?;
        *self.mapper.write().unwrap_or_else(|e| e.into_inner()) = resized;
        tracing::info!(surface_width, surface_height, "surface resized");
        Ok(())
    }

    fn grammar(&self) -> CommandGrammar {
        let m = self.mapper().mapping();
        CommandGrammar::new(Bounds {
            width: m.image_width,
            height: m.image_height,
        })
    }

    /// Run `command` to completion. Never fabricates a coordinate: returns false
    /// once `max_attempts` regenerations have been spent.
    pub async fn execute_command(&self, command: &str, ctx: &CommandContext) -> bool {
        let mut pending = Some(command.trim().to_string());
        let mut last_command = String::new();
        let mut reason = String::new();
        let mut regenerations = 0u32;

        loop {
            if let Some(cmd) = pending.take() {
                match self.attempt(&cmd, ctx).await {
                    Ok(()) => {
                        tracing::info!(phase = Phase::Done.as_str(), command = %cmd, regenerations, "command succeeded");
                        return true;
                    }
                    Err(e) => {
                        tracing::warn!(command = %cmd, error = %e, "attempt failed");
                        reason = e.to_string();
                        last_command = cmd;
                    }
                }
            }

            if regenerations >= self.max_attempts {
                tracing::error!(
                    phase = Phase::Failed.as_str(),
                    command = %last_command,
                    attempts = regenerations,
                    "regeneration attempts exhausted"
                );
                return false;
            }
            regenerations += 1;

            match self.regenerate(&last_command, &reason, ctx).await {
                Ok(reply) => {
                    tracing::info!(phase = Phase::Regenerate.as_str(), attempt = regenerations, reply = %reply, "regenerated command");
                    pending = Some(reply);
                }
                Err(e) => {
                    tracing::warn!(attempt = regenerations, error = %e, "regeneration call failed");
                    reason = e.to_string();
                }
            }
        }
    }

    /// One pass of PARSE → VALIDATE → MOVE → CLICK → VERIFY.
    async fn attempt(&self, cmd: &str, ctx: &CommandContext) -> SteadyhandResult<()> {
        let grammar = self.grammar();

        tracing::debug!(phase = Phase::Parse.as_str(), command = %cmd);
        let parsed = grammar.parse(cmd)?;

        tracing::debug!(phase = Phase::Validate.as_str(), x = parsed.x(), y = parsed.y());
        let command = grammar.validate(parsed)?;
        let canonical = command.to_string();
        if command.action() != ctx.required_action {
            return Err(SteadyhandError::MalformedCommand(format!(
                "{canonical} (this task needs '{}')",
                ctx.required_action.template()
            )));
        }

        let mapper = self.mapper();
        let (sx, sy) = mapper.to_surface(command.x() as f64, command.y() as f64);
        let (sx, sy) = self.motion.clamp(sx.round(), sy.round());
        tracing::debug!(phase = Phase::Move.as_str(), sx, sy);
        if !self.motion.move_to(sx, sy, self.smooth).await {
            return Err(SteadyhandError::ActuationFailure(format!(
                "pointer did not reach ({sx}, {sy})"
            )));
        }

        if let Some((button, double)) = command.action().button() {
            tracing::debug!(phase = Phase::Click.as_str(), ?button, double);
            if !self.motion.click(button, double).await {
                return Err(SteadyhandError::ActuationFailure(format!(
                    "{button:?} click failed"
                )));
            }
        }

        tracing::debug!(phase = Phase::Verify.as_str());
        let pointer = self.pointer_in_image().await;
        let frame = annotate_attempts(&self.snapshots.capture().await?, Some(pointer), &[]);

        let position = self
            .gate
            .verify_position(&ctx.target, &frame, pointer, Some(&canonical))
            .await;
        if !position.passed {
            return Err(SteadyhandError::VerificationFailure {
                confidence: position.confidence,
                threshold: self.gate.position_threshold(),
                info: position.info,
            });
        }

        if let Some(expected) = &ctx.expected_outcome {
            let outcome = self
                .gate
                .verify_outcome(expected, &frame, pointer, Some(&canonical))
                .await;
            if !outcome.passed {
                return Err(SteadyhandError::VerificationFailure {
                    confidence: outcome.confidence,
                    threshold: self.gate.completion_threshold(),
                    info: outcome.info,
                });
            }
        }
        Ok(())
    }

    async fn regenerate(&self, failed: &str, reason: &str, ctx: &CommandContext) -> SteadyhandResult<String> {
        let snapshot = self.snapshots.capture().await?;
        let records = self.log.records();
        let tried: Vec<(f64, f64)> = records.iter().map(|r| r.position).collect();
        let pointer = self.pointer_in_image().await;
        let frame: Snapshot = annotate_attempts(&snapshot, Some(pointer), &tried);

        let (width, height) = frame.dimensions();
        let prompt = build_regenerate_prompt(&ctx.intent, ctx.required_action, failed, reason, width, height, &records);
        let reply = self.planner.ask(&prompt, &frame).await?;
        Ok(reply.trim().to_string())
    }

    async fn pointer_in_image(&self) -> (f64, f64) {
        let (px, py) = self.motion.get_position().await;
        self.mapper().to_image(px, py)
    }
}
