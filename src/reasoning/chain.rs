//! Chain-of-Thought reasoning (spec §4.5): a linear sequence of scored steps.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::Message;
use crate::model::{ChatOptions, ChatProvider};

/// One step of a linear reasoning chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// The model's stated thought for this step.
    pub thought: String,
    /// An observation of previous tool results, if any were folded in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
    /// Self-reported confidence in `[0, 1]`.
    pub confidence: f64,
}

/// An ordered Chain-of-Thought reasoning trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningChain {
    /// Steps in generation order.
    pub steps: Vec<ReasoningStep>,
}

impl ReasoningChain {
    /// The confidence of the chain overall: the last step's confidence, or 0
    /// for an empty chain (invariant: `finalConfidence == steps.last().confidence`).
    #[must_use]
    pub fn final_confidence(&self) -> f64 {
        self.steps.last().map_or(0.0, |s| s.confidence)
    }

    /// Render the chain as a compact numbered list for the next turn's prompt.
    #[must_use]
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| match &step.observation {
                Some(obs) => format!(
                    "{}. {} (observed: {obs}, confidence {:.2})",
                    i + 1,
                    step.thought,
                    step.confidence
                ),
                None => format!("{}. {} (confidence {:.2})", i + 1, step.thought, step.confidence),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Configuration knobs for the CoT engine (spec §6 "CoT knobs").
#[derive(Debug, Clone, Copy)]
pub struct ChainConfig {
    /// Stop once `steps.len() >= max_steps`.
    pub max_reasoning_steps: usize,
    /// Stop once a step's confidence is at least this and a final output is proposed.
    pub confidence_threshold: f64,
    /// Re-ask the model to critique each step before accepting it.
    pub enable_validation: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_reasoning_steps: 10,
            confidence_threshold: 0.85,
            enable_validation: false,
        }
    }
}

/// A single model-extracted reasoning step, parsed from a structured envelope.
#[derive(Debug, Deserialize)]
struct StepEnvelope {
    thought: String,
    #[serde(default)]
    observation: Option<String>,
    confidence: f64,
    #[serde(default)]
    final_output: Option<Value>,
}

/// Whether the chain should stop given its latest step and configured thresholds.
#[must_use]
pub fn should_terminate(chain: &ReasoningChain, config: &ChainConfig, proposed_final: bool) -> bool {
    if chain.steps.len() >= config.max_reasoning_steps {
        return true;
    }
    chain.final_confidence() >= config.confidence_threshold && proposed_final
}

/// Ask the model for one more reasoning step given the conversation so far.
///
/// Returns the step and whether the model proposed a final output alongside it
/// (the caller decides whether to accept that output based on [`should_terminate`]).
pub async fn next_step(
    provider: &dyn ChatProvider,
    messages: Vec<Message>,
) -> Result<(ReasoningStep, Option<Value>)> {
    let request_messages = {
        let mut m = messages;
        m.push(Message::system(
            "Respond with a JSON object: {\"thought\": str, \"observation\": str?, \
             \"confidence\": number in [0,1], \"final_output\": any?}.",
        ));
        m
    };

    let response = provider
        .generate(request_messages, ChatOptions::default())
        .await?;
    let text = response.message.content;

    let envelope: StepEnvelope = serde_json::from_str(&text).unwrap_or(StepEnvelope {
        thought: text,
        observation: None,
        confidence: 0.0,
        final_output: None,
    });

    Ok((
        ReasoningStep {
            thought: envelope.thought,
            observation: envelope.observation,
            confidence: envelope.confidence.clamp(0.0, 1.0),
        },
        envelope.final_output,
    ))
}

/// Ask the model to critique a step, returning `true` if it passes.
pub async fn validate_step(provider: &dyn ChatProvider, step: &ReasoningStep) -> Result<bool> {
    let prompt = format!(
        "Critique this reasoning step and answer only \"pass\" or \"fail\":\n{}",
        step.thought
    );
    let response = provider
        .generate(vec![Message::user(prompt)], ChatOptions::default())
        .await?;
    Ok(response
        .message
        .content
        .to_lowercase()
        .contains("pass"))
}
