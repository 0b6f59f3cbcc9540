//! Simulated agent run reported through tracewire.
//!
//! Run with: cargo run --example agent_run
//!
//! Settings come from the environment and `.env`. Without
//! `LANGFUSE_PUBLIC_KEY`/`LANGFUSE_SECRET_KEY` (or with
//! `TRACING_PROVIDER=noop`) the run falls back to the noop tracer.

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use tracewire::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    let observability = Observability::new(ObservabilityConfig::from_env());
    let tracer = observability.tracer().await;
    tracing::info!(provider = tracer.provider(), "tracer ready");

    let question = "Which files mention the retry budget?";
    let trace_id = TraceId::generate();
    run_agent(tracer.clone(), trace_id.as_str(), question)?;

    tracer.flush().await;
    observability.shutdown().await;
    Ok(())
}

fn run_agent(tracer: Arc<dyn Tracer>, trace_id: &str, question: &str) -> Result<()> {
    let model_id = "openai/gpt-4.1";
    let emit = |kind: EventKind, payload: EventPayload| {
        tracer.emit_event(&AgentEvent::new(kind, trace_id, payload))
    };

    emit(
        EventKind::AgentStart,
        AgentStart {
            agent_type: "react".to_string(),
            model_id: model_id.to_string(),
            provider: "openai".to_string(),
            question: Some(question.to_string()),
            available_tools: 4,
        }
        .into(),
    )?;
    emit(
        EventKind::ConversationStart,
        ConversationStart {
            question: question.to_string(),
            tools_count: 4,
            servers: "filesystem".to_string(),
            ..Default::default()
        }
        .into(),
    )?;

    for turn in 1..=2 {
        emit(
            EventKind::LlmGenerationStart,
            GenerationStart {
                turn,
                model_id: model_id.to_string(),
                temperature: 0.2,
                tools_count: 4,
                messages_count: turn * 2,
            }
            .into(),
        )?;
        emit(
            EventKind::ToolCallStart,
            ToolCallStart {
                turn,
                tool_name: "grep".to_string(),
                arguments: json!({"pattern": "retry_budget"}).to_string(),
                server_name: "filesystem".to_string(),
            }
            .into(),
        )?;
        emit(
            EventKind::ToolCallEnd,
            ToolCallEnd {
                turn,
                tool_name: "grep".to_string(),
                result: "src/client.rs:42".to_string(),
                server_name: "filesystem".to_string(),
                duration_ms: 12,
            }
            .into(),
        )?;
        emit(
            EventKind::LlmGenerationEnd,
            GenerationEnd {
                turn,
                content: String::new(),
                tool_calls: 1,
                usage: UsageMetrics::new(420, 36),
            }
            .into(),
        )?;
    }

    let answer = "Only src/client.rs mentions the retry budget.";
    emit(
        EventKind::ConversationEnd,
        ConversationEnd {
            question: question.to_string(),
            result: answer.to_string(),
            turns: 2,
            status: "completed".to_string(),
            error: None,
        }
        .into(),
    )?;
    emit(
        EventKind::AgentEnd,
        AgentEnd {
            agent_type: "react".to_string(),
            success: true,
            result: Some(answer.to_string()),
            error: None,
        }
        .into(),
    )?;
    Ok(())
}
