//! LLM-authored workflow documents.
//!
//! Prompts the generator with the request and the tool catalog, extracts the
//! JSON document from the completion, then parses and validates it exactly
//! like a hand-written workflow.

use stepwise_types::llm::{GenerationRequest, GeneratorError};
use stepwise_types::tool::ToolDescriptor;
use stepwise_types::workflow::WorkflowSpec;
use thiserror::Error;

use super::definition::{WorkflowError, normalize_workflow, validate_workflow};
use crate::llm::box_generator::BoxGenerator;
use crate::llm::extract::{ExtractError, extract_json};
use crate::planner::prompt::render_catalog;

/// Sampling temperature for workflow generation; low for stable structure.
const GENERATION_TEMPERATURE: f64 = 0.2;
const GENERATION_MAX_TOKENS: u32 = 2000;

const WORKFLOW_SYSTEM_PROMPT: &str = "You design workflows for a step-based executor. \
You reply with a single JSON workflow document and nothing else.";

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("generation failed: {0}")]
    Generation(#[from] GeneratorError),

    #[error("could not extract workflow: {0}")]
    Extraction(#[from] ExtractError),

    #[error("generated workflow is invalid: {0}")]
    Invalid(#[from] WorkflowError),
}

/// Build the workflow-generation prompt.
pub fn workflow_prompt(request: &str, catalog: &[ToolDescriptor]) -> String {
    format!(
        "Design a workflow that accomplishes the following request.\n\n\
         Request: {request}\n\n\
         Available tools:\n{catalog}\n\
         Rules:\n\
         - Every step has a unique \"id\", a \"name\", \"type\": \"tool\" and a \"tool\" from the list above.\n\
         - Bind results with \"outputs\": {{\"result\": \"<variable>\"}} and read them in later inputs as {{{{<variable>}}}}.\n\
         - Steps that read a variable run after the step that binds it; use \"dependsOn\" only for ordering without data.\n\
         - Respond with exactly one JSON object: {{\"steps\": [...], \"variables\": {{}}, \"errorPolicy\": {{\"strategy\": \"fail\"}}}}\n",
        catalog = render_catalog(catalog),
    )
}

/// Ask the generator for a workflow and validate what comes back.
pub async fn generate_workflow(
    generator: &BoxGenerator,
    request: &str,
    catalog: &[ToolDescriptor],
) -> Result<WorkflowSpec, GenerateError> {
    let generation = GenerationRequest::new(workflow_prompt(request, catalog))
        .with_system(WORKFLOW_SYSTEM_PROMPT)
        .with_temperature(GENERATION_TEMPERATURE)
        .with_max_tokens(GENERATION_MAX_TOKENS);

    let completion = generator.generate(&generation).await?;
    let document = extract_json(&completion)?;
    let mut spec: WorkflowSpec = serde_json::from_value(document)
        .map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    normalize_workflow(&mut spec);
    validate_workflow(&spec)?;

    tracing::info!(
        generator = generator.name(),
        steps = spec.steps.len(),
        "generated workflow"
    );
    Ok(spec)
}
