//! Conversational agent
//!
//! One `complete` call handles a single user turn: load short- and
//! long-term memory, run a bounded planner/executor loop over the two
//! built-in tools, persist the turn, and summarise the conversation when
//! due. The loop never raises for a handled failure; it reports a
//! fallback reason in the result instead.

use crate::domain::{
    AgentChatRequest, AgentInputMessage, AgentLimits, AgentPlanStep, AgentRunResult,
    AgentToolEvent, ConversationMessage, MemoryHit, MemorySummary, SearchFilter, Task, TaskStatus,
};
use crate::error::{Error, Result};
use crate::ports::{
    ConversationStore, Embedder, MemoryStore, MemoryVectorStore, QueryService, TaskStore,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

const TOOL_KNOWLEDGE_SEARCH: &str = "knowledge_search";
const TOOL_TASK: &str = "task_tool";

const FALLBACK_TIMEOUT: &str = "timeout";
const FALLBACK_PLANNER_ERROR: &str = "planner_error";
const FALLBACK_PLANNER_INVALID_JSON: &str = "planner_invalid_json";
const FALLBACK_EMPTY_FINAL_ANSWER: &str = "empty_final_answer";
const FALLBACK_UNSUPPORTED_STEP: &str = "unsupported_step_type";
const FALLBACK_MAX_ITERATIONS: &str = "max_iterations";

const EMPTY_ANSWER_TEXT: &str = "I could not produce a final answer from the current context.";
const LIMITS_REACHED_TEXT: &str =
    "I reached the current execution limits. Please refine the request and try again.";

pub struct AgentChatUseCase {
    query_svc: Arc<dyn QueryService>,
    embedder: Arc<dyn Embedder>,
    conversations: Arc<dyn ConversationStore>,
    tasks: Arc<dyn TaskStore>,
    memories: Arc<dyn MemoryStore>,
    memory_vector: Arc<dyn MemoryVectorStore>,
    limits: AgentLimits,
}

impl AgentChatUseCase {
    pub fn new(
        query_svc: Arc<dyn QueryService>,
        embedder: Arc<dyn Embedder>,
        conversations: Arc<dyn ConversationStore>,
        tasks: Arc<dyn TaskStore>,
        memories: Arc<dyn MemoryStore>,
        memory_vector: Arc<dyn MemoryVectorStore>,
        limits: AgentLimits,
    ) -> Self {
        Self {
            query_svc,
            embedder,
            conversations,
            tasks,
            memories,
            memory_vector,
            limits: limits.normalize(),
        }
    }

    pub async fn complete(&self, req: AgentChatRequest) -> Result<AgentRunResult> {
        let user_id = req.user_id.trim().to_string();
        if user_id.is_empty() {
            return Err(Error::invalid_input("agent complete", "user_id is required"));
        }

        let last_user_message = latest_user_input(&req.messages).ok_or_else(|| {
            Error::invalid_input("agent complete", "at least one user message is required")
        })?;

        let conversation_id = {
            let trimmed = req.conversation_id.trim();
            if trimmed.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                trimmed.to_string()
            }
        };

        self.conversations
            .ensure_conversation(&user_id, &conversation_id)
            .await?;

        let mut short_memory = self
            .conversations
            .list_recent_messages(&user_id, &conversation_id, self.limits.short_memory_messages)
            .await?;
        // The store returns newest-first.
        short_memory.reverse();

        // Long-term memory is best-effort: any failure degrades to no hits.
        let memory_hits = match self.embedder.embed_query(&last_user_message).await {
            Ok(vector) if !vector.is_empty() => self
                .memory_vector
                .search_summaries(&user_id, "", &vector, self.limits.memory_top_k)
                .await
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        let turn = self
            .conversations
            .next_user_turn(&user_id, &conversation_id)
            .await?;

        self.conversations
            .append_message(&ConversationMessage {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.clone(),
                conversation_id: conversation_id.clone(),
                role: "user".to_string(),
                content: last_user_message.clone(),
                tool_name: String::new(),
                user_turn: turn,
                created_at: Utc::now(),
            })
            .await?;

        let loop_deadline = Instant::now() + self.limits.total_timeout;

        let mut scratchpad: Vec<String> = Vec::with_capacity(self.limits.max_iterations);
        let mut tool_events: Vec<AgentToolEvent> = Vec::with_capacity(self.limits.max_iterations);
        let mut tools_invoked: Vec<String> = Vec::new();
        let mut final_answer = String::new();
        let mut fallback_reason = String::new();
        let mut iterations = 0;

        for i in 1..=self.limits.max_iterations {
            if Instant::now() >= loop_deadline {
                fallback_reason = FALLBACK_TIMEOUT.to_string();
                break;
            }
            iterations = i;

            let prompt =
                build_planner_prompt(&last_user_message, &short_memory, &memory_hits, &scratchpad);
            let plan_raw = match self
                .planner_call(&prompt, loop_deadline)
                .await
            {
                Ok(raw) => raw,
                Err(PlannerFailure::Timeout) => {
                    fallback_reason = FALLBACK_TIMEOUT.to_string();
                    break;
                }
                Err(PlannerFailure::Other(err)) => {
                    warn!(error = %err, "planner_call_failed");
                    fallback_reason = FALLBACK_PLANNER_ERROR.to_string();
                    break;
                }
            };

            let step = match parse_agent_step(&plan_raw) {
                Ok(step) => step,
                Err(_) => {
                    // One repair attempt: ask the model to re-emit just the JSON.
                    match self
                        .planner_call(&build_planner_repair_prompt(&plan_raw), loop_deadline)
                        .await
                    {
                        Ok(repaired) => match parse_agent_step(&repaired) {
                            Ok(step) => step,
                            Err(_) => {
                                fallback_reason = FALLBACK_PLANNER_INVALID_JSON.to_string();
                                break;
                            }
                        },
                        Err(PlannerFailure::Timeout) => {
                            fallback_reason = FALLBACK_TIMEOUT.to_string();
                            break;
                        }
                        Err(PlannerFailure::Other(_)) => {
                            fallback_reason = FALLBACK_PLANNER_INVALID_JSON.to_string();
                            break;
                        }
                    }
                }
            };

            match step.step_type.as_str() {
                "final" => {
                    final_answer = step.answer.trim().to_string();
                    if final_answer.is_empty() {
                        final_answer = EMPTY_ANSWER_TEXT.to_string();
                        fallback_reason = FALLBACK_EMPTY_FINAL_ANSWER.to_string();
                    }
                }
                "tool" => {
                    let tool_budget = remaining_budget(self.limits.tool_timeout, loop_deadline);
                    let event = match timeout(
                        tool_budget,
                        self.execute_tool(&user_id, &step, &last_user_message),
                    )
                    .await
                    {
                        Ok(Ok(event)) => event,
                        Ok(Err(err)) => {
                            if matches!(err, Error::Canceled) {
                                fallback_reason = FALLBACK_TIMEOUT.to_string();
                            }
                            tool_error_event(&step.tool, &err.to_string())
                        }
                        Err(_elapsed) => {
                            fallback_reason = FALLBACK_TIMEOUT.to_string();
                            tool_error_event(&step.tool, &Error::Canceled.to_string())
                        }
                    };

                    if !event.tool.is_empty() && !tools_invoked.contains(&event.tool) {
                        tools_invoked.push(event.tool.clone());
                    }
                    scratchpad.push(format!("{}:{}", event.tool, event.output));
                    tool_events.push(event);
                }
                _ => {
                    fallback_reason = FALLBACK_UNSUPPORTED_STEP.to_string();
                }
            }

            if !final_answer.is_empty() || !fallback_reason.is_empty() {
                break;
            }
        }

        if fallback_reason.is_empty() && final_answer.is_empty() {
            fallback_reason = FALLBACK_MAX_ITERATIONS.to_string();
        }
        if final_answer.is_empty() && should_fallback_to_rag(&fallback_reason) {
            if let Ok(text) = self.answer_from_knowledge_fallback(&last_user_message).await {
                if !text.is_empty() {
                    final_answer = text;
                }
            }
        }
        if final_answer.is_empty() {
            final_answer = LIMITS_REACHED_TEXT.to_string();
        }

        for event in &tool_events {
            self.conversations
                .append_message(&ConversationMessage {
                    id: Uuid::new_v4().to_string(),
                    user_id: user_id.clone(),
                    conversation_id: conversation_id.clone(),
                    role: "tool".to_string(),
                    content: event.output.clone(),
                    tool_name: event.tool.clone(),
                    user_turn: turn,
                    created_at: Utc::now(),
                })
                .await?;
        }

        self.conversations
            .append_message(&ConversationMessage {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.clone(),
                conversation_id: conversation_id.clone(),
                role: "assistant".to_string(),
                content: final_answer.clone(),
                tool_name: String::new(),
                user_turn: turn,
                created_at: Utc::now(),
            })
            .await?;

        let summary_created = self
            .maybe_persist_summary(&user_id, &conversation_id, turn, req.session_end)
            .await?;

        Ok(AgentRunResult {
            conversation_id,
            answer: final_answer,
            iterations,
            memory_hits: memory_hits.len(),
            summary_created,
            tools_invoked,
            fallback_reason,
            tool_events,
        })
    }

    /// Call the planner in JSON mode under the per-step budget.
    async fn planner_call(
        &self,
        prompt: &str,
        loop_deadline: Instant,
    ) -> std::result::Result<String, PlannerFailure> {
        let budget = remaining_budget(self.limits.planner_timeout, loop_deadline);
        match timeout(budget, self.query_svc.generate_json_from_prompt(prompt)).await {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(Error::Canceled)) => Err(PlannerFailure::Timeout),
            Ok(Err(err)) => Err(PlannerFailure::Other(err)),
            Err(_elapsed) => Err(PlannerFailure::Timeout),
        }
    }

    async fn answer_from_knowledge_fallback(&self, question: &str) -> Result<String> {
        let answer = timeout(
            self.limits.tool_timeout,
            self.query_svc.answer(
                question,
                self.limits.knowledge_top_k as i64,
                &SearchFilter::default(),
            ),
        )
        .await
        .map_err(|_| Error::Canceled)??;

        let text = answer.text.trim().to_string();
        if text.is_empty() {
            return Err(Error::Other("rag fallback answer is empty".to_string()));
        }
        Ok(text)
    }

    async fn execute_tool(
        &self,
        user_id: &str,
        step: &AgentPlanStep,
        fallback_question: &str,
    ) -> Result<AgentToolEvent> {
        match step.tool.as_str() {
            TOOL_KNOWLEDGE_SEARCH => {
                let question = string_input(&step.input, "question", fallback_question);
                let limit = int_input(&step.input, "limit", self.limits.knowledge_top_k as i64);
                let answer = self
                    .query_svc
                    .answer(&question, limit, &SearchFilter::default())
                    .await?;
                let payload = json!({
                    "question": question,
                    "answer": answer.text,
                    "sources": answer.sources,
                });
                Ok(AgentToolEvent {
                    tool: TOOL_KNOWLEDGE_SEARCH.to_string(),
                    status: "ok".to_string(),
                    output: payload.to_string(),
                })
            }
            TOOL_TASK => self.execute_task_tool(user_id, step).await,
            other => Err(Error::Other(format!("unsupported tool: {other}"))),
        }
    }

    async fn execute_task_tool(
        &self,
        user_id: &str,
        step: &AgentPlanStep,
    ) -> Result<AgentToolEvent> {
        let action = if step.action.is_empty() {
            string_input(&step.input, "action", "").trim().to_lowercase()
        } else {
            step.action.clone()
        };

        match action.as_str() {
            "create" => {
                let title = string_input(&step.input, "title", "").trim().to_string();
                if title.is_empty() {
                    return Err(Error::Other("task create requires title".to_string()));
                }
                let now = Utc::now();
                let mut task = Task {
                    id: Uuid::new_v4().to_string(),
                    user_id: user_id.to_string(),
                    title,
                    details: string_input(&step.input, "details", "").trim().to_string(),
                    status: TaskStatus::Open,
                    due_at: None,
                    created_at: now,
                    updated_at: now,
                    deleted_at: None,
                };
                let due_raw = string_input(&step.input, "due_at", "").trim().to_string();
                if !due_raw.is_empty() {
                    let due = parse_rfc3339(&due_raw)
                        .map_err(|e| Error::Other(format!("task create due_at: {e}")))?;
                    task.due_at = Some(due);
                }
                self.tasks.create_task(&task).await?;
                Ok(task_event(&task)?)
            }
            "list" => {
                let include_deleted = bool_input(&step.input, "include_deleted", false);
                let tasks = self.tasks.list_tasks(user_id, include_deleted).await?;
                Ok(AgentToolEvent {
                    tool: TOOL_TASK.to_string(),
                    status: "ok".to_string(),
                    output: serde_json::to_string(&tasks)?,
                })
            }
            "get" => {
                let id = required_id(&step.input, "task get")?;
                let task = self.tasks.get_task_by_id(user_id, &id).await?;
                Ok(task_event(&task)?)
            }
            "update" => {
                let id = required_id(&step.input, "task update")?;
                let mut task = self.tasks.get_task_by_id(user_id, &id).await?;
                let title = string_input(&step.input, "title", "").trim().to_string();
                if !title.is_empty() {
                    task.title = title;
                }
                if let Some(details) = step.input.get("details") {
                    task.details = value_to_string(details).trim().to_string();
                }
                let status = string_input(&step.input, "status", "").trim().to_string();
                if !status.is_empty() {
                    task.status = status.parse::<TaskStatus>().map_err(|_| {
                        Error::Other(format!("unsupported task status: {status}"))
                    })?;
                }
                if let Some(due_raw) = step.input.get("due_at") {
                    let due_str = value_to_string(due_raw).trim().to_string();
                    if due_str.is_empty() || due_str.eq_ignore_ascii_case("null") {
                        task.due_at = None;
                    } else {
                        let due = parse_rfc3339(&due_str)
                            .map_err(|e| Error::Other(format!("task update due_at: {e}")))?;
                        task.due_at = Some(due);
                    }
                }
                task.updated_at = Utc::now();
                self.tasks.update_task(&task).await?;
                Ok(task_event(&task)?)
            }
            "delete" => {
                let id = required_id(&step.input, "task delete")?;
                self.tasks.soft_delete_task(user_id, &id).await?;
                Ok(AgentToolEvent {
                    tool: TOOL_TASK.to_string(),
                    status: "ok".to_string(),
                    output: json!({"id": id, "status": "deleted"}).to_string(),
                })
            }
            "complete" => {
                let id = required_id(&step.input, "task complete")?;
                let mut task = self.tasks.get_task_by_id(user_id, &id).await?;
                task.status = TaskStatus::Completed;
                task.updated_at = Utc::now();
                self.tasks.update_task(&task).await?;
                Ok(task_event(&task)?)
            }
            other => Err(Error::Other(format!("unsupported task action: {other}"))),
        }
    }

    async fn maybe_persist_summary(
        &self,
        user_id: &str,
        conversation_id: &str,
        current_turn: i64,
        force: bool,
    ) -> Result<bool> {
        let last_turn = self
            .memories
            .get_last_summary_end_turn(user_id, conversation_id)
            .await?;
        if current_turn <= last_turn {
            return Ok(false);
        }

        let turn_count = current_turn - last_turn;
        if !force && turn_count < self.limits.summary_every_turns {
            return Ok(false);
        }

        let messages = self
            .conversations
            .list_messages_by_turn_range(user_id, conversation_id, last_turn + 1, current_turn)
            .await?;
        if messages.is_empty() {
            return Ok(false);
        }

        let lines: Vec<String> = messages
            .iter()
            .filter(|msg| !msg.content.trim().is_empty())
            .map(|msg| format!("{}: {}", msg.role, msg.content.trim()))
            .collect();
        if lines.is_empty() {
            return Ok(false);
        }

        let prompt = format!(
            "Summarize the following conversation turns in concise factual form.\n\
             Include user goals, key facts, decisions, and explicit todo items.\n\
             Return plain text.\n\n{}",
            lines.join("\n")
        );

        let summary_text = self.query_svc.generate_from_prompt(&prompt).await?;
        let summary_text = summary_text.trim().to_string();
        if summary_text.is_empty() {
            return Ok(false);
        }

        let summary = MemorySummary {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            turn_from: last_turn + 1,
            turn_to: current_turn,
            summary: summary_text.clone(),
            created_at: Utc::now(),
        };
        self.memories.create_summary(&summary).await?;

        if let Ok(vector) = self.embedder.embed_query(&summary_text).await {
            if !vector.is_empty() {
                self.memory_vector.index_summary(&summary, &vector).await?;
            }
        }

        self.conversations
            .update_last_summary_end_turn(user_id, conversation_id, current_turn)
            .await?;

        debug!(
            user_id,
            conversation_id,
            turn_from = summary.turn_from,
            turn_to = summary.turn_to,
            "memory_summary_created"
        );
        Ok(true)
    }
}

enum PlannerFailure {
    Timeout,
    Other(Error),
}

fn remaining_budget(step_timeout: Duration, loop_deadline: Instant) -> Duration {
    let until_deadline = loop_deadline.saturating_duration_since(Instant::now());
    step_timeout.min(until_deadline)
}

fn should_fallback_to_rag(reason: &str) -> bool {
    matches!(
        reason,
        FALLBACK_PLANNER_INVALID_JSON | FALLBACK_PLANNER_ERROR | FALLBACK_TIMEOUT
    )
}

fn tool_error_event(tool: &str, message: &str) -> AgentToolEvent {
    AgentToolEvent {
        tool: tool.to_string(),
        status: "error".to_string(),
        output: json!({ "error": message }).to_string(),
    }
}

fn task_event(task: &Task) -> Result<AgentToolEvent> {
    Ok(AgentToolEvent {
        tool: TOOL_TASK.to_string(),
        status: "ok".to_string(),
        output: serde_json::to_string(task)?,
    })
}

fn required_id(input: &Map<String, Value>, operation: &str) -> Result<String> {
    let id = string_input(input, "id", "").trim().to_string();
    if id.is_empty() {
        return Err(Error::Other(format!("{operation} requires id")));
    }
    Ok(id)
}

fn latest_user_input(messages: &[AgentInputMessage]) -> Option<String> {
    messages.iter().rev().find_map(|msg| {
        if msg.role.trim().eq_ignore_ascii_case("user") {
            let content = msg.content.trim();
            if !content.is_empty() {
                return Some(content.to_string());
            }
        }
        None
    })
}

fn parse_agent_step(raw: &str) -> Result<AgentPlanStep> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::Other("empty planner response".to_string()));
    }
    let mut step: AgentPlanStep = serde_json::from_str(raw)
        .map_err(|e| Error::Other(format!("unmarshal planner json: {e}")))?;
    step.step_type = step.step_type.trim().to_lowercase();
    step.tool = step.tool.trim().to_lowercase();
    step.action = step.action.trim().to_lowercase();
    Ok(step)
}

fn build_planner_prompt(
    user_message: &str,
    short_memory: &[ConversationMessage],
    memory_hits: &[MemoryHit],
    scratchpad: &[String],
) -> String {
    let mut short_lines: Vec<String> = short_memory
        .iter()
        .filter(|msg| !msg.content.trim().is_empty())
        .map(|msg| format!("{}: {}", msg.role.trim(), msg.content.trim()))
        .collect();
    let mut hit_lines: Vec<String> = memory_hits
        .iter()
        .map(|hit| format!("- [score={:.3}] {}", hit.score, hit.summary.summary.trim()))
        .collect();
    if short_lines.is_empty() {
        short_lines.push("(empty)".to_string());
    }
    if hit_lines.is_empty() {
        hit_lines.push("(empty)".to_string());
    }
    let scratch_block = if scratchpad.is_empty() {
        "(no tool outputs yet)".to_string()
    } else {
        scratchpad.join("\n")
    };

    format!(
        "You are a planning component for a backend assistant.\n\
         Return ONLY valid JSON object with one step.\n\
         Schema:\n\
         {{\"type\":\"tool\",\"tool\":\"knowledge_search\",\"input\":{{\"question\":\"...\",\"limit\":5}}}}\n\
         or\n\
         {{\"type\":\"tool\",\"tool\":\"task_tool\",\"action\":\"create|list|get|update|delete|complete\",\"input\":{{...}}}}\n\
         or\n\
         {{\"type\":\"final\",\"answer\":\"...\"}}\n\n\
         Conversation short memory:\n{}\n\n\
         Relevant long-term memory summaries:\n{}\n\n\
         Scratchpad with previous tool outputs:\n{}\n\n\
         Current user request:\n{}\n",
        short_lines.join("\n"),
        hit_lines.join("\n"),
        scratch_block,
        user_message
    )
}

fn build_planner_repair_prompt(raw: &str) -> String {
    format!(
        "Convert the following text into a valid JSON object for this schema:\n\
         {{\"type\":\"tool\",\"tool\":\"knowledge_search\",\"input\":{{\"question\":\"...\",\"limit\":5}}}}\n\
         or {{\"type\":\"tool\",\"tool\":\"task_tool\",\"action\":\"create|list|get|update|delete|complete\",\"input\":{{...}}}}\n\
         or {{\"type\":\"final\",\"answer\":\"...\"}}\n\
         Return only JSON.\n\
         Text:\n{raw}"
    )
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Planner output is JSON, so strings may arrive where other scalars are
/// expected and numbers may arrive as floats.
fn string_input(input: &Map<String, Value>, key: &str, fallback: &str) -> String {
    match input.get(key) {
        None | Some(Value::Null) => fallback.to_string(),
        Some(value) => value_to_string(value),
    }
}

fn int_input(input: &Map<String, Value>, key: &str, fallback: i64) -> i64 {
    match input.get(key) {
        None | Some(Value::Null) => fallback,
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(fallback),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(fallback),
        Some(_) => fallback,
    }
}

fn bool_input(input: &Map<String, Value>, key: &str, fallback: bool) -> bool {
    match input.get(key) {
        None | Some(Value::Null) => fallback,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "1" | "t" | "true" => true,
            "0" | "f" | "false" => false,
            _ => fallback,
        },
        Some(_) => fallback,
    }
}

fn parse_rfc3339(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Answer, Conversation, RetrievalMeta};
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    // ---- mock ports -----------------------------------------------------

    struct ScriptedQueryService {
        planner_responses: Mutex<Vec<String>>,
        summary_text: String,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedQueryService {
        fn new(planner_responses: Vec<&str>) -> Self {
            Self {
                planner_responses: Mutex::new(
                    planner_responses.into_iter().map(String::from).collect(),
                ),
                summary_text: "user asked things".to_string(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl QueryService for ScriptedQueryService {
        async fn answer(
            &self,
            question: &str,
            _limit: i64,
            _filter: &SearchFilter,
        ) -> Result<Answer> {
            self.calls.lock().unwrap().push(format!("answer:{question}"));
            Ok(Answer {
                text: format!("answer to {question}"),
                sources: Vec::new(),
                retrieval: RetrievalMeta::default(),
            })
        }

        async fn generate_from_prompt(&self, _prompt: &str) -> Result<String> {
            self.calls.lock().unwrap().push("generate".to_string());
            Ok(self.summary_text.clone())
        }

        async fn generate_json_from_prompt(&self, _prompt: &str) -> Result<String> {
            self.calls.lock().unwrap().push("planner".to_string());
            let mut responses = self.planner_responses.lock().unwrap();
            if responses.is_empty() {
                Ok(r#"{"type":"final","answer":"default"}"#.to_string())
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    struct StubEmbedder;

    #[async_trait::async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.1]).collect())
        }

        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.1])
        }
    }

    #[derive(Default)]
    struct MemConversationStore {
        messages: Mutex<Vec<ConversationMessage>>,
        turn: AtomicI64,
        last_summary_end: AtomicI64,
    }

    #[async_trait::async_trait]
    impl ConversationStore for MemConversationStore {
        async fn ensure_conversation(
            &self,
            user_id: &str,
            conversation_id: &str,
        ) -> Result<Conversation> {
            Ok(Conversation {
                user_id: user_id.to_string(),
                conversation_id: conversation_id.to_string(),
                current_user_turn: self.turn.load(Ordering::SeqCst),
                last_summary_end_turn: self.last_summary_end.load(Ordering::SeqCst),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
        }

        async fn next_user_turn(&self, _user_id: &str, _conversation_id: &str) -> Result<i64> {
            Ok(self.turn.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn append_message(&self, message: &ConversationMessage) -> Result<()> {
            self.messages.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn list_recent_messages(
            &self,
            _user_id: &str,
            _conversation_id: &str,
            limit: usize,
        ) -> Result<Vec<ConversationMessage>> {
            let messages = self.messages.lock().unwrap();
            Ok(messages.iter().rev().take(limit).cloned().collect())
        }

        async fn list_messages_by_turn_range(
            &self,
            _user_id: &str,
            _conversation_id: &str,
            turn_from: i64,
            turn_to: i64,
        ) -> Result<Vec<ConversationMessage>> {
            let messages = self.messages.lock().unwrap();
            Ok(messages
                .iter()
                .filter(|m| m.user_turn >= turn_from && m.user_turn <= turn_to)
                .cloned()
                .collect())
        }

        async fn update_last_summary_end_turn(
            &self,
            _user_id: &str,
            _conversation_id: &str,
            turn: i64,
        ) -> Result<()> {
            self.last_summary_end.fetch_max(turn, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemTaskStore {
        tasks: Mutex<Vec<Task>>,
    }

    #[async_trait::async_trait]
    impl TaskStore for MemTaskStore {
        async fn create_task(&self, task: &Task) -> Result<()> {
            self.tasks.lock().unwrap().push(task.clone());
            Ok(())
        }

        async fn list_tasks(&self, user_id: &str, include_deleted: bool) -> Result<Vec<Task>> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.user_id == user_id && (include_deleted || t.deleted_at.is_none()))
                .cloned()
                .collect())
        }

        async fn get_task_by_id(&self, user_id: &str, task_id: &str) -> Result<Task> {
            self.tasks
                .lock()
                .unwrap()
                .iter()
                .find(|t| t.user_id == user_id && t.id == task_id && t.deleted_at.is_none())
                .cloned()
                .ok_or_else(|| Error::Other(format!("task not found: id={task_id}")))
        }

        async fn update_task(&self, task: &Task) -> Result<()> {
            let mut tasks = self.tasks.lock().unwrap();
            let existing = tasks
                .iter_mut()
                .find(|t| t.user_id == task.user_id && t.id == task.id)
                .ok_or_else(|| Error::Other(format!("task not found: id={}", task.id)))?;
            *existing = task.clone();
            Ok(())
        }

        async fn soft_delete_task(&self, user_id: &str, task_id: &str) -> Result<()> {
            let mut tasks = self.tasks.lock().unwrap();
            let existing = tasks
                .iter_mut()
                .find(|t| t.user_id == user_id && t.id == task_id && t.deleted_at.is_none())
                .ok_or_else(|| Error::Other(format!("task not found: id={task_id}")))?;
            existing.deleted_at = Some(Utc::now());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemMemoryStore {
        summaries: Mutex<Vec<MemorySummary>>,
    }

    #[async_trait::async_trait]
    impl MemoryStore for MemMemoryStore {
        async fn create_summary(&self, summary: &MemorySummary) -> Result<()> {
            self.summaries.lock().unwrap().push(summary.clone());
            Ok(())
        }

        async fn get_last_summary_end_turn(
            &self,
            _user_id: &str,
            _conversation_id: &str,
        ) -> Result<i64> {
            Ok(self
                .summaries
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.turn_to)
                .max()
                .unwrap_or(0))
        }
    }

    #[derive(Default)]
    struct MemMemoryVectorStore {
        indexed: Mutex<Vec<MemorySummary>>,
    }

    #[async_trait::async_trait]
    impl MemoryVectorStore for MemMemoryVectorStore {
        async fn index_summary(&self, summary: &MemorySummary, _vector: &[f32]) -> Result<()> {
            self.indexed.lock().unwrap().push(summary.clone());
            Ok(())
        }

        async fn search_summaries(
            &self,
            _user_id: &str,
            _conversation_id: &str,
            _query_vector: &[f32],
            _limit: usize,
        ) -> Result<Vec<MemoryHit>> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        agent: AgentChatUseCase,
        query: Arc<ScriptedQueryService>,
        conversations: Arc<MemConversationStore>,
        tasks: Arc<MemTaskStore>,
        memories: Arc<MemMemoryStore>,
        memory_vectors: Arc<MemMemoryVectorStore>,
    }

    fn harness(planner_responses: Vec<&str>, limits: AgentLimits) -> Harness {
        let query = Arc::new(ScriptedQueryService::new(planner_responses));
        let conversations = Arc::new(MemConversationStore::default());
        let tasks = Arc::new(MemTaskStore::default());
        let memories = Arc::new(MemMemoryStore::default());
        let memory_vectors = Arc::new(MemMemoryVectorStore::default());
        let agent = AgentChatUseCase::new(
            query.clone(),
            Arc::new(StubEmbedder),
            conversations.clone(),
            tasks.clone(),
            memories.clone(),
            memory_vectors.clone(),
            limits,
        );
        Harness {
            agent,
            query,
            conversations,
            tasks,
            memories,
            memory_vectors,
        }
    }

    fn request(message: &str) -> AgentChatRequest {
        AgentChatRequest {
            user_id: "user-1".to_string(),
            conversation_id: "conv-1".to_string(),
            session_end: false,
            messages: vec![AgentInputMessage {
                role: "user".to_string(),
                content: message.to_string(),
            }],
        }
    }

    // ---- tests ----------------------------------------------------------

    #[tokio::test]
    async fn test_final_first_completes_in_one_iteration() {
        let h = harness(vec![r#"{"type":"final","answer":"done"}"#], AgentLimits::default());

        let result = h.agent.complete(request("hello")).await.unwrap();

        assert_eq!(result.answer, "done");
        assert_eq!(result.iterations, 1);
        assert!(result.tools_invoked.is_empty());
        assert!(result.tool_events.is_empty());
        assert!(result.fallback_reason.is_empty());

        let planner_calls = h
            .query
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == "planner")
            .count();
        assert_eq!(planner_calls, 1);

        let messages = h.conversations.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].user_turn, 1);
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[1].content, "done");
        assert_eq!(messages[1].user_turn, 1);
    }

    #[tokio::test]
    async fn test_max_iterations_fallback() {
        let limits = AgentLimits {
            max_iterations: 2,
            ..AgentLimits::default()
        };
        let tool_step = r#"{"type":"tool","tool":"task_tool","action":"list","input":{}}"#;
        let h = harness(vec![tool_step, tool_step], limits);

        let result = h.agent.complete(request("do things")).await.unwrap();

        assert_eq!(result.iterations, 2);
        assert_eq!(result.fallback_reason, FALLBACK_MAX_ITERATIONS);
        assert_eq!(result.answer, LIMITS_REACHED_TEXT);
        assert_eq!(result.tool_events.len(), 2);
        assert_eq!(result.tools_invoked, vec![TOOL_TASK.to_string()]);

        // user + two tool events + assistant
        let messages = h.conversations.messages.lock().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].role, "tool");
        assert_eq!(messages[2].role, "tool");
        assert_eq!(messages[3].role, "assistant");
    }

    #[tokio::test]
    async fn test_invalid_json_repair_then_rag_fallback() {
        // Both the planner and its repair emit garbage; the run falls back
        // to RAG over the original question.
        let h = harness(vec!["not json", "still not json"], AgentLimits::default());

        let result = h.agent.complete(request("what is in my files?")).await.unwrap();

        assert_eq!(result.fallback_reason, FALLBACK_PLANNER_INVALID_JSON);
        assert_eq!(result.answer, "answer to what is in my files?");
    }

    #[tokio::test]
    async fn test_knowledge_search_records_event() {
        let h = harness(
            vec![
                r#"{"type":"tool","tool":"knowledge_search","input":{"question":"taxes","limit":"3"}}"#,
                r#"{"type":"final","answer":"all set"}"#,
            ],
            AgentLimits::default(),
        );

        let result = h.agent.complete(request("find my tax documents")).await.unwrap();

        assert_eq!(result.answer, "all set");
        assert_eq!(result.iterations, 2);
        assert_eq!(result.tools_invoked, vec![TOOL_KNOWLEDGE_SEARCH.to_string()]);
        assert_eq!(result.tool_events.len(), 1);
        assert_eq!(result.tool_events[0].status, "ok");
        assert!(result.tool_events[0].output.contains("answer to taxes"));
    }

    #[tokio::test]
    async fn test_unknown_tool_yields_error_event() {
        let h = harness(
            vec![
                r#"{"type":"tool","tool":"mystery","input":{}}"#,
                r#"{"type":"final","answer":"ok"}"#,
            ],
            AgentLimits::default(),
        );

        let result = h.agent.complete(request("hm")).await.unwrap();

        assert_eq!(result.tool_events.len(), 1);
        assert_eq!(result.tool_events[0].status, "error");
        assert!(result.tool_events[0].output.contains("unsupported tool"));
        assert_eq!(result.answer, "ok");
    }

    #[tokio::test]
    async fn test_unsupported_step_type() {
        let h = harness(vec![r#"{"type":"poem","answer":"x"}"#], AgentLimits::default());

        let result = h.agent.complete(request("hello")).await.unwrap();
        assert_eq!(result.fallback_reason, FALLBACK_UNSUPPORTED_STEP);
        // No RAG fallback for unsupported step types.
        assert_eq!(result.answer, LIMITS_REACHED_TEXT);
    }

    #[tokio::test]
    async fn test_empty_final_answer_gets_deterministic_text() {
        let h = harness(vec![r#"{"type":"final","answer":"   "}"#], AgentLimits::default());

        let result = h.agent.complete(request("hello")).await.unwrap();
        assert_eq!(result.fallback_reason, FALLBACK_EMPTY_FINAL_ANSWER);
        assert_eq!(result.answer, EMPTY_ANSWER_TEXT);
    }

    #[tokio::test]
    async fn test_task_create_with_due_date() {
        let h = harness(
            vec![
                r#"{"type":"tool","tool":"task_tool","action":"create","input":{"title":"pay rent","due_at":"2026-09-01T10:00:00Z"}}"#,
                r#"{"type":"final","answer":"created"}"#,
            ],
            AgentLimits::default(),
        );

        let result = h.agent.complete(request("remind me to pay rent")).await.unwrap();
        assert_eq!(result.answer, "created");

        let tasks = h.tasks.tasks.lock().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "pay rent");
        assert_eq!(tasks[0].status, TaskStatus::Open);
        assert!(tasks[0].due_at.is_some());
    }

    #[tokio::test]
    async fn test_session_end_creates_summary() {
        let h = harness(vec![r#"{"type":"final","answer":"bye"}"#], AgentLimits::default());

        let mut req = request("good night");
        req.session_end = true;
        let result = h.agent.complete(req).await.unwrap();

        assert!(result.summary_created);

        let summaries = h.memories.summaries.lock().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].turn_from, 1);
        assert_eq!(summaries[0].turn_to, 1);

        assert_eq!(h.memory_vectors.indexed.lock().unwrap().len(), 1);
        assert_eq!(h.conversations.last_summary_end.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_summary_skipped_below_threshold() {
        let h = harness(vec![r#"{"type":"final","answer":"hi"}"#], AgentLimits::default());

        let result = h.agent.complete(request("hello")).await.unwrap();
        assert!(!result.summary_created);
        assert!(h.memories.summaries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_summaries_do_not_overlap() {
        let tool = r#"{"type":"final","answer":"ok"}"#;
        let limits = AgentLimits {
            summary_every_turns: 2,
            ..AgentLimits::default()
        };
        let h = harness(vec![tool, tool, tool, tool], limits);

        for _ in 0..4 {
            h.agent.complete(request("hello")).await.unwrap();
        }

        let summaries = h.memories.summaries.lock().unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!((summaries[0].turn_from, summaries[0].turn_to), (1, 2));
        assert_eq!((summaries[1].turn_from, summaries[1].turn_to), (3, 4));
    }

    #[tokio::test]
    async fn test_missing_user_id_is_invalid_input() {
        let h = harness(vec![], AgentLimits::default());
        let mut req = request("hello");
        req.user_id = "  ".to_string();

        let err = h.agent.complete(req).await.unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn test_missing_user_message_is_invalid_input() {
        let h = harness(vec![], AgentLimits::default());
        let mut req = request("ignored");
        req.messages = vec![AgentInputMessage {
            role: "assistant".to_string(),
            content: "only me".to_string(),
        }];

        let err = h.agent.complete(req).await.unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn test_conversation_id_allocated_when_missing() {
        let h = harness(vec![r#"{"type":"final","answer":"hi"}"#], AgentLimits::default());
        let mut req = request("hello");
        req.conversation_id = String::new();

        let result = h.agent.complete(req).await.unwrap();
        assert!(Uuid::parse_str(&result.conversation_id).is_ok());
    }

    #[test]
    fn test_numeric_input_coercion() {
        let mut input = Map::new();
        input.insert("limit".to_string(), json!(7.9));
        assert_eq!(int_input(&input, "limit", 5), 7);

        input.insert("limit".to_string(), json!("12"));
        assert_eq!(int_input(&input, "limit", 5), 12);

        input.insert("limit".to_string(), json!("not a number"));
        assert_eq!(int_input(&input, "limit", 5), 5);

        input.insert("flag".to_string(), json!("true"));
        assert!(bool_input(&input, "flag", false));

        input.insert("flag".to_string(), json!(false));
        assert!(!bool_input(&input, "flag", true));

        assert_eq!(string_input(&input, "missing", "dflt"), "dflt");
        input.insert("n".to_string(), json!(3));
        assert_eq!(string_input(&input, "n", ""), "3");
    }

    #[test]
    fn test_parse_agent_step_normalizes_case() {
        let step = parse_agent_step(r#"{"type":" FINAL ","answer":"x"}"#).unwrap();
        assert_eq!(step.step_type, "final");
        assert!(parse_agent_step("").is_err());
        assert!(parse_agent_step("{broken").is_err());
    }

    #[test]
    fn test_planner_prompt_sections_in_order() {
        let prompt = build_planner_prompt("the question", &[], &[], &[]);
        let schema_pos = prompt.find("Schema:").unwrap();
        let memory_pos = prompt.find("Conversation short memory:").unwrap();
        let hits_pos = prompt.find("Relevant long-term memory summaries:").unwrap();
        let scratch_pos = prompt.find("Scratchpad with previous tool outputs:").unwrap();
        let request_pos = prompt.find("Current user request:").unwrap();
        assert!(schema_pos < memory_pos);
        assert!(memory_pos < hits_pos);
        assert!(hits_pos < scratch_pos);
        assert!(scratch_pos < request_pos);
        assert!(prompt.contains("(empty)"));
        assert!(prompt.contains("(no tool outputs yet)"));
        assert!(prompt.ends_with("the question\n"));
    }
}
