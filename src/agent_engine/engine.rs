//! Per-task pipeline run by the scheduler: look, ask, act, verify.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent_engine::history::AttemptLog;
use crate::agent_engine::prompts::{build_suggest_prompt, PLANNER_SYSTEM_PROMPT, VERIFIER_SYSTEM_PROMPT};
use crate::agent_engine::regeneration::{CommandContext, RegenerationController};
use crate::agent_engine::scheduler::TaskHandler;
use crate::agent_engine::state::{Task, TaskRequest};
use crate::agent_engine::verification::VerificationGate;
use crate::config::AppConfig;
use crate::errors::{SteadyhandError, SteadyhandResult};
use crate::executor::command::CommandGrammar;
use crate::executor::coordinator::{CoordinateMapper, ViewportMapping};
use crate::executor::input::{DesktopSurface, Typeable};
use crate::executor::motion::MotionExecutor;
use crate::llm::oracle::Oracle;
use crate::llm::registry::{OracleRole, ProviderRegistry};
use crate::perception::annotator::annotate_attempts;
use crate::perception::screenshot::{ScreenCapture, SnapshotProvider};

pub struct TaskEngine {
    controller: RegenerationController,
    planner: Arc<dyn Oracle>,
    snapshots: Arc<dyn SnapshotProvider>,
    keyboard: Arc<dyn Typeable>,
}

impl TaskEngine {
    pub fn new(
        controller: RegenerationController,
        planner: Arc<dyn Oracle>,
        snapshots: Arc<dyn SnapshotProvider>,
        keyboard: Arc<dyn Typeable>,
    ) -> Self {
        Self {
            controller,
            planner,
            snapshots,
            keyboard,
        }
    }

    /// Wire the local desktop, screen capture and configured oracles together.
    pub async fn from_config(config: &AppConfig) -> SteadyhandResult<Self> {
        let registry = ProviderRegistry::from_config(config);
        let timeout = config.oracle.timeout();
        let planner: Arc<dyn Oracle> =
            Arc::new(registry.oracle_for_role(OracleRole::Planner, PLANNER_SYSTEM_PROMPT, timeout)?);
        let verifier: Arc<dyn Oracle> =
            Arc::new(registry.oracle_for_role(OracleRole::Verifier, VERIFIER_SYSTEM_PROMPT, timeout)?);

        let desktop = Arc::new(DesktopSurface::connect().await?);
        let (surface_width, surface_height) = desktop.size().await?;
        let mapping = ViewportMapping::new(
            config.capture.image_width,
            config.capture.image_height,
            surface_width,
            surface_height,
        )?;
        tracing::info!(?mapping, "viewport mapping");

        let motion = Arc::new(MotionExecutor::start(
            desktop.clone(),
            surface_width,
            surface_height,
            &config.pointer,
        )?);
        let snapshots: Arc<dyn SnapshotProvider> = Arc::new(ScreenCapture::new(
            config.capture.image_width,
            config.capture.image_height,
            config.capture.monitor,
        )?);

        let log = Arc::new(if config.regeneration.journal {
            AttemptLog::with_session_journal()
        } else {
            AttemptLog::in_memory()
        });
        let gate = Arc::new(VerificationGate::new(verifier, &config.verification, log.clone()));
        let controller = RegenerationController::new(
            CoordinateMapper::new(mapping)?,
            motion,
            planner.clone(),
            gate,
            snapshots.clone(),
            log,
            &config.regeneration,
        )
        .with_smooth(config.pointer.smooth);

        Ok(Self::new(controller, planner, snapshots, desktop))
    }

    pub fn controller(&self) -> &RegenerationController {
        &self.controller
    }

    /// Center the pointer before the first task.
    pub async fn initialize(&self) -> bool {
        self.controller.motion().initialize().await
    }

    /// Stop the motion workers.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.controller.motion().stop(timeout).await
    }

    /// Ask the planner for a first command. Falls back to the raw reply so
    /// that an off-grammar answer goes through regeneration.
    async fn suggest(&self, task: &Task) -> SteadyhandResult<String> {
        let snapshot = self.snapshots.capture().await?;
        let (px, py) = self.controller.motion().get_position().await;
        let pointer = self.controller.mapper().to_image(px, py);
        let frame = annotate_attempts(&snapshot, Some(pointer), &[]);
        let (width, height) = frame.dimensions();

        let prompt = build_suggest_prompt(
            &task.request.intent(),
            task.request.desired_action(),
            width,
            height,
            Some(pointer),
        );
        let reply = self.planner.ask(&prompt, &frame).await?;
        let candidate = CommandGrammar::extract(&reply).unwrap_or_else(|| reply.trim().to_string());
        tracing::info!(task = %task.id, candidate = %candidate, "planner suggested command");
        Ok(candidate)
    }
}

#[async_trait]
impl TaskHandler for TaskEngine {
    async fn process(&self, task: &Task) -> SteadyhandResult<()> {
        if !self.controller.motion().is_running() {
            return Err(SteadyhandError::Cancelled);
        }
        let log = self.controller.log();
        log.clear();

        let candidate = self.suggest(task).await?;
        let ctx = CommandContext {
            target: task.request.target().to_string(),
            intent: task.request.intent(),
            required_action: task.request.desired_action(),
            expected_outcome: task.expected_outcome.clone(),
        };
        let ok = self.controller.execute_command(&candidate, &ctx).await;
        log.clear();

        if !ok {
            return Err(SteadyhandError::RegenerationExhausted {
                attempts: self.controller.max_attempts(),
                command: candidate,
            });
        }

        if let TaskRequest::Type { text, .. } = &task.request {
            if !self.keyboard.type_text(text).await {
                return Err(SteadyhandError::ActuationFailure(format!(
                    "typing into '{}' failed",
                    task.request.target()
                )));
            }
            tracing::info!(task = %task.id, chars = text.chars().count(), "text typed");
        }
        Ok(())
    }
}
