//! Engine -- wires the core onto real adapters.
//!
//! Builds the five built-in tools over the local filesystem, `reqwest`, the
//! system clock, an in-memory KV and the configured generator, then hands
//! the resulting registry to a [`WorkflowExecutor`], a [`Planner`] and a
//! [`PlanExecutor`] backed by [`FilePlanStore`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use stepwise_core::llm::box_generator::BoxGenerator;
use stepwise_core::planner::PlannerError;
use stepwise_core::planner::executor::PlanExecutor;
use stepwise_core::planner::planner::Planner;
use stepwise_core::service::http::{HttpClient, HttpError};
use stepwise_core::storage::kv_store::InMemoryKvStore;
use stepwise_core::tools::fetch::FetchTool;
use stepwise_core::tools::filesystem::FilesystemTool;
use stepwise_core::tools::memory::MemoryTool;
use stepwise_core::tools::thinking::ThinkingTool;
use stepwise_core::tools::time::TimeTool;
use stepwise_core::tools::{ToolCaller, ToolRegistry};
use stepwise_core::workflow::executor::{ExecutionFailure, ExecutorSettings, WorkflowExecutor};
use stepwise_core::workflow::generate::{GenerateError, generate_workflow};
use stepwise_types::config::StepwiseConfig;
use stepwise_types::llm::GeneratorError;
use stepwise_types::plan::Plan;
use stepwise_types::tool::ToolDescriptor;
use stepwise_types::workflow::{ExecutionResult, WorkflowSpec};
use thiserror::Error;

use crate::clock::SystemClock;
use crate::config::{load_config, plans_dir, resolve_data_dir};
use crate::filesystem::LocalFileSystem;
use crate::http::ReqwestHttpClient;
use crate::llm::openai_compat::OpenAiCompatGenerator;
use crate::plan_store::FilePlanStore;

/// Errors constructing an [`Engine`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("generator setup failed: {0}")]
    Generator(#[from] GeneratorError),

    #[error("http client setup failed: {0}")]
    Http(#[from] HttpError),
}

/// Register the five built-in tools.
pub fn builtin_registry<H: HttpClient + 'static>(
    config: &StepwiseConfig,
    http: H,
    generator: BoxGenerator,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register(
            FetchTool::new(http)
                .with_timeout(Duration::from_secs(config.fetch.timeout_secs))
                .with_user_agent(config.fetch.user_agent.clone()),
        )
        .register(FilesystemTool::new(LocalFileSystem::new()))
        .register(MemoryTool::new(InMemoryKvStore::new()))
        .register(TimeTool::new(SystemClock))
        .register(
            ThinkingTool::new(generator)
                .with_sampling(config.generator.temperature, config.generator.max_tokens),
        );
    registry
}

/// Everything needed to run workflows and plans.
pub struct Engine {
    config: StepwiseConfig,
    data_dir: PathBuf,
    generator: BoxGenerator,
    tools: Arc<ToolRegistry>,
    executor: WorkflowExecutor,
    planner: Planner<FilePlanStore>,
    plan_executor: PlanExecutor<FilePlanStore>,
}

impl Engine {
    /// Resolve the data directory, load `config.toml`, and build the engine.
    pub async fn open() -> Result<Self, EngineError> {
        let default_dir = resolve_data_dir();
        let config = load_config(&default_dir).await;
        let data_dir = config.data_dir.clone().unwrap_or(default_dir);
        Self::from_config(config, data_dir)
    }

    /// Build with the OpenAI-compatible generator and `reqwest`.
    pub fn from_config(config: StepwiseConfig, data_dir: PathBuf) -> Result<Self, EngineError> {
        let generator = BoxGenerator::new(OpenAiCompatGenerator::from_config(&config.generator)?);
        let http = ReqwestHttpClient::new()?;
        Ok(Self::assemble(config, data_dir, generator, http, None))
    }

    /// Build from explicit parts. `external` serves tool names that are not
    /// built-ins.
    pub fn assemble<H: HttpClient + 'static>(
        config: StepwiseConfig,
        data_dir: PathBuf,
        generator: BoxGenerator,
        http: H,
        external: Option<Arc<dyn ToolCaller>>,
    ) -> Self {
        let mut registry = builtin_registry(&config, http, generator.clone());
        if let Some(external) = external {
            registry = registry.with_external(external);
        }
        let tools = Arc::new(registry);
        let catalog = tools.catalog();

        let executor =
            WorkflowExecutor::with_settings(tools.clone(), ExecutorSettings::from(&config.executor));
        let store = Arc::new(FilePlanStore::new(plans_dir(&data_dir)));
        let planner = Planner::new(generator.clone(), store.clone(), catalog);
        let plan_executor = PlanExecutor::new(store, tools.clone());

        tracing::info!(
            data_dir = %data_dir.display(),
            generator = generator.name(),
            tools = ?tools.names(),
            "engine ready"
        );

        Self {
            config,
            data_dir,
            generator,
            tools,
            executor,
            planner,
            plan_executor,
        }
    }

    pub fn config(&self) -> &StepwiseConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn catalog(&self) -> Vec<ToolDescriptor> {
        self.tools.catalog()
    }

    pub fn executor(&self) -> &WorkflowExecutor {
        &self.executor
    }

    pub fn planner(&self) -> &Planner<FilePlanStore> {
        &self.planner
    }

    pub fn plan_executor(&self) -> &PlanExecutor<FilePlanStore> {
        &self.plan_executor
    }

    pub async fn run_workflow(
        &self,
        spec: &WorkflowSpec,
        inputs: &Map<String, Value>,
    ) -> Result<ExecutionResult, ExecutionFailure> {
        self.executor.execute(spec, inputs).await
    }

    /// Ask the generator for a workflow over this engine's tools.
    pub async fn generate_workflow(&self, request: &str) -> Result<WorkflowSpec, GenerateError> {
        generate_workflow(&self.generator, request, &self.catalog()).await
    }

    pub async fn create_plan(
        &self,
        goal: &str,
        inputs: Map<String, Value>,
    ) -> Result<Plan, PlannerError> {
        self.planner.create_plan(goal, inputs).await
    }

    pub async fn execute_plan(&self, plan_id: &str) -> Result<Plan, PlannerError> {
        self.plan_executor.execute(plan_id).await
    }

    pub async fn resume_plan(&self, plan_id: &str) -> Result<Plan, PlannerError> {
        self.plan_executor.resume(plan_id).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
