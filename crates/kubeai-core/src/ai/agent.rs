//! Pieces of the agent loop shared by every tool-capable adapter
//!
//! Each adapter owns its own conversation encoding; what it shares is the
//! sequential dispatch of tool calls and the progress markers written to
//! the host's text sink.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::provider::{TextSink, ToolExecutor};
use super::types::{ToolCall, ToolResult};
use crate::constants::ai::TOOL_OUTPUT_PREVIEW_CHARS;
use crate::error::{ProviderError, Result};

const TRUNCATION_SUFFIX: &str = "\n... (truncated)";

/// Cut `output` to at most `max_chars` characters, marking the cut
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    match output.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &output[..byte_idx], TRUNCATION_SUFFIX),
        None => output.to_string(),
    }
}

pub(crate) fn announce_tool(sink: &mut TextSink<'_>, name: &str) {
    sink(&format!("\n\n🔧 Executing: {}\n", name));
}

/// Echo a tool outcome: errors inline, output as a fenced block
pub(crate) fn report_result(sink: &mut TextSink<'_>, result: &ToolResult) {
    if result.is_error {
        sink(&format!("❌ Error: {}\n", result.content));
    } else {
        let output = truncate_output(&result.content, TOOL_OUTPUT_PREVIEW_CHARS);
        sink(&format!("```\n{}\n```\n", output));
    }
}

/// Fail fast once the host has cancelled
pub(crate) fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(ProviderError::Cancelled)
    } else {
        Ok(())
    }
}

/// Execute one turn's tool calls strictly in order
///
/// Results come back in the same order as `calls`, each tagged with the id
/// of the call it answers. Failed tools are results, never errors.
pub(crate) async fn execute_calls(
    calls: &[ToolCall],
    executor: &dyn ToolExecutor,
    sink: &mut TextSink<'_>,
    cancel: &CancellationToken,
) -> Result<Vec<ToolResult>> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        ensure_active(cancel)?;
        announce_tool(sink, call.name());
        info!(tool = call.name(), id = %call.id, "Dispatching tool call");

        let mut result = executor.execute(call).await;
        result.tool_call_id = call.id.clone();
        debug!(
            tool = call.name(),
            is_error = result.is_error,
            bytes = result.content.len(),
            "Tool call finished"
        );

        report_result(sink, &result);
        results.push(result);
    }
    ensure_active(cancel)?;
    Ok(results)
}
