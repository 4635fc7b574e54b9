//! Per-agent detail composition.
//!
//! Pulls together the agent record (pool authoritative, spawn registry
//! fallback), work-item metadata, the latest log line, and the tool
//! invocations observed in the session's event stream. Collaborator
//! failures degrade to partial errors so the client can display what
//! succeeded.

use std::collections::HashMap;

use chrono::DateTime;

use super::handlers::ServerCtx;
use crate::events::buffer::SessionEvent;
use aether_core::worksource::WorkSource;
use aether_protocol::types::AgentNameParams;
use aether_protocol::{AgentDetail, AgentState, Response, Role, ToolCallInfo};

/// Longest input summary shown per tool call.
const SUMMARY_LIMIT: usize = 80;

pub async fn status_agent(
    ctx: &ServerCtx,
    params: AgentNameParams,
    tool_limit: usize,
) -> Response {
    let name = &params.agent_name;
    let mut partial_errors = Vec::new();

    // Pool is authoritative; the spawn registry covers ad-hoc agents
    let (task_id, role, pid, state, session_id) =
        if let Some(agent) = ctx.pool.agent_by_name(name) {
            (
                Some(agent.task_id),
                Some(agent.role),
                agent.pid,
                agent.state,
                agent.session_id,
            )
        } else if let Some(entry) = ctx.spawns.get(name) {
            let state = match entry.state {
                aether_protocol::SpawnState::Running => AgentState::Running,
                aether_protocol::SpawnState::Exited => AgentState::Exited,
            };
            (None, Some(Role::Spawn), entry.pid, state, entry.session_id)
        } else {
            return Response::err(format!("agent not found: {name}"));
        };

    // Work-item title and latest log line, non-fatal on failure
    let mut title = None;
    let mut last_log_line = None;
    if let Some(task_id) = &task_id {
        match ctx.work.show(task_id).await {
            Ok(detail) => title = Some(detail.title),
            Err(e) => partial_errors.push(format!("title: {e}")),
        }
        match ctx.work.latest_log_line(task_id).await {
            Ok(line) => last_log_line = line,
            Err(e) => partial_errors.push(format!("log line: {e}")),
        }
    }

    let tool_calls = if session_id.is_empty() {
        Vec::new()
    } else {
        extract_tool_calls(&ctx.events.events(&session_id), tool_limit)
    };

    let detail = AgentDetail {
        agent_name: name.clone(),
        task_id,
        role,
        pid,
        state,
        session_id,
        title,
        last_log_line,
        tool_calls,
        partial_errors,
    };
    match serde_json::to_value(&detail) {
        Ok(value) => Response::ok(value),
        Err(e) => Response::err(format!("failed to serialize result: {e}")),
    }
}

/// Extract tool invocations from a session's events.
///
/// Each `message.part.updated` event whose part type is `tool` contributes
/// one observation, deduplicated by part id. Later observations supersede
/// earlier ones (an invocation evolves pending → running → completed) while
/// first-insertion order is preserved. When the result exceeds `limit`, the
/// most recent invocations win.
pub fn extract_tool_calls(events: &[SessionEvent], limit: usize) -> Vec<ToolCallInfo> {
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, ToolCallInfo> = HashMap::new();

    for event in events {
        if event.event_type != "message.part.updated" {
            continue;
        }
        let part = &event.data["part"];
        if part["type"].as_str() != Some("tool") {
            continue;
        }
        let Some(part_id) = part["id"].as_str() else {
            continue;
        };
        let tool = part["tool"].as_str().unwrap_or("unknown");
        let status = part["state"]["status"].as_str().unwrap_or("pending");
        let info = ToolCallInfo {
            part_id: part_id.to_string(),
            tool: tool.to_string(),
            status: status.to_string(),
            input_summary: input_summary(tool, &part["state"]["input"]),
        };
        if by_id.insert(part_id.to_string(), info).is_none() {
            order.push(part_id.to_string());
        }
    }

    let mut calls: Vec<ToolCallInfo> = order
        .into_iter()
        .filter_map(|part_id| by_id.remove(&part_id))
        .collect();
    if calls.len() > limit {
        calls.drain(..calls.len() - limit);
    }
    calls
}

/// Pick the most informative field of a tool's input JSON.
fn input_summary(tool: &str, input: &serde_json::Value) -> String {
    let keys: &[&str] = match tool {
        "read" | "edit" | "write" => &["filePath", "file_path"],
        "bash" => &["command"],
        "glob" | "grep" => &["pattern"],
        "task" => &["description"],
        _ => &[
            "filePath",
            "file_path",
            "command",
            "pattern",
            "description",
            "path",
            "url",
            "query",
        ],
    };
    for key in keys {
        if let Some(value) = input[key].as_str() {
            return truncate(value, SUMMARY_LIMIT);
        }
    }
    String::new()
}

/// One compact display line per event.
pub fn format_event_line(event: &SessionEvent) -> String {
    let time = DateTime::from_timestamp_millis(event.timestamp)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());

    let part = &event.data["part"];
    if part["type"].as_str() == Some("tool") {
        let tool = part["tool"].as_str().unwrap_or("unknown");
        let status = part["state"]["status"].as_str().unwrap_or("pending");
        let summary = input_summary(tool, &part["state"]["input"]);
        if summary.is_empty() {
            return format!("{time} {tool} [{status}]");
        }
        return format!("{time} {tool} [{status}] {summary}");
    }
    if let Some(text) = part["text"].as_str() {
        return format!("{time} {}", truncate(text, 60));
    }
    format!("{time} {}", event.event_type)
}

fn truncate(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let cut: String = value.chars().take(limit).collect();
    format!("{cut}…")
}
