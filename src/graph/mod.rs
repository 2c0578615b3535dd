//! Step graph with checkpointed conversation state
//!
//! A graph is a set of named steps, one entry step and edges between them.
//! Conditional edges map a routing key computed from the state to the next
//! step; unmapped keys end the run. Every invocation loads the thread's
//! checkpoint, appends the input turn, runs steps until `END`, and saves
//! after each step.

use crate::error::OrchestrationError;
use crate::execution::ToolDispatcher;
use crate::memory::Checkpointer;
use crate::models::{ConversationState, StateUpdate, Turn};
use crate::tools::ToolRegistry;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Terminal marker
pub const END: &str = "__end__";

/// One step of the graph
#[async_trait::async_trait]
pub trait Node: Send + Sync {
    async fn run(&self, state: &ConversationState, ctx: &mut RunContext) -> Result<StateUpdate>;
}

/// Routing function of a conditional edge
pub type RouteFn = Arc<dyn Fn(&ConversationState) -> &'static str + Send + Sync>;

/// Per-invocation scratch state: step counter and the tool dispatchers,
/// which must live exactly as long as one run.
pub struct RunContext {
    thread_id: String,
    steps: usize,
    dispatchers: HashMap<String, ToolDispatcher>,
}

impl RunContext {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            steps: 0,
            dispatchers: HashMap::new(),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Steps executed so far in this run
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Dispatcher owned by the step named `key`, created on first use.
    pub fn dispatcher(
        &mut self,
        key: &str,
        registry: &Arc<ToolRegistry>,
        min_interval: Duration,
    ) -> &mut ToolDispatcher {
        self.dispatchers
            .entry(key.to_string())
            .or_insert_with(|| ToolDispatcher::new(Arc::clone(registry), min_interval))
    }

    /// Tool results produced before an aborted batch, across all dispatchers
    pub fn take_completed_results(&mut self) -> Vec<Turn> {
        self.dispatchers
            .values_mut()
            .flat_map(|d| d.take_completed())
            .collect()
    }
}

enum Edge {
    Direct(String),
    Conditional {
        route: RouteFn,
        mapping: HashMap<&'static str, String>,
    },
}

/// Graph builder
pub struct GraphBuilder {
    nodes: HashMap<String, Arc<dyn Node>>,
    edges: HashMap<String, Edge>,
    entry: Option<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            entry: None,
        }
    }

    pub fn add_node(mut self, name: &str, node: Arc<dyn Node>) -> Self {
        self.nodes.insert(name.to_string(), node);
        self
    }

    pub fn set_entry(mut self, name: &str) -> Self {
        self.entry = Some(name.to_string());
        self
    }

    pub fn add_edge(mut self, from: &str, to: &str) -> Self {
        self.edges.insert(from.to_string(), Edge::Direct(to.to_string()));
        self
    }

    pub fn add_conditional_edges<F>(
        mut self,
        from: &str,
        route: F,
        mapping: &[(&'static str, &str)],
    ) -> Self
    where
        F: Fn(&ConversationState) -> &'static str + Send + Sync + 'static,
    {
        let mapping = mapping
            .iter()
            .map(|(key, target)| (*key, target.to_string()))
            .collect();

        self.edges.insert(
            from.to_string(),
            Edge::Conditional {
                route: Arc::new(route),
                mapping,
            },
        );
        self
    }

    /// Validate the wiring and produce a runnable graph.
    pub fn compile(
        self,
        checkpointer: Arc<dyn Checkpointer>,
        max_steps: usize,
    ) -> Result<CompiledGraph> {
        let entry = self
            .entry
            .ok_or_else(|| OrchestrationError::GraphError("No entry step set".to_string()))?;

        let known = |name: &str| name == END || self.nodes.contains_key(name);

        if !self.nodes.contains_key(&entry) {
            return Err(OrchestrationError::GraphError(format!(
                "Entry step {} is not a node",
                entry
            )));
        }

        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(OrchestrationError::GraphError(format!(
                    "Edge from unknown step {}",
                    from
                )));
            }

            let targets: Vec<&String> = match edge {
                Edge::Direct(to) => vec![to],
                Edge::Conditional { mapping, .. } => mapping.values().collect(),
            };

            if let Some(bad) = targets.into_iter().find(|t| !known(t.as_str())) {
                return Err(OrchestrationError::GraphError(format!(
                    "Edge {} -> {} targets an unknown step",
                    from, bad
                )));
            }
        }

        if let Some(dead_end) = self.nodes.keys().find(|n| !self.edges.contains_key(*n)) {
            return Err(OrchestrationError::GraphError(format!(
                "Step {} has no outgoing edge",
                dead_end
            )));
        }

        if max_steps == 0 {
            return Err(OrchestrationError::GraphError(
                "Step ceiling must be at least 1".to_string(),
            ));
        }

        Ok(CompiledGraph {
            nodes: self.nodes,
            edges: self.edges,
            entry,
            checkpointer,
            max_steps,
            thread_locks: Mutex::new(HashMap::new()),
        })
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Runnable, checkpointed graph
pub struct CompiledGraph {
    nodes: HashMap<String, Arc<dyn Node>>,
    edges: HashMap<String, Edge>,
    entry: String,
    checkpointer: Arc<dyn Checkpointer>,
    max_steps: usize,
    thread_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CompiledGraph {
    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Append `input` to the thread and run the graph to completion.
    ///
    /// On failure an explanatory assistant turn is appended and persisted
    /// before the error is returned, so the thread stays usable.
    pub async fn invoke(&self, thread_id: &str, input: Turn) -> Result<ConversationState> {
        let lock = self.thread_lock(thread_id).await;
        let _guard = lock.lock().await;

        let start = Instant::now();
        let mut state = self
            .checkpointer
            .load(thread_id)
            .await?
            .unwrap_or_else(|| ConversationState::new(thread_id));

        // Routing hints belong to a single run
        state.next = None;
        state.phase = None;
        state.apply(StateUpdate::turn(input));
        self.checkpointer.save(&state).await?;

        info!(thread_id, turns = state.turns.len(), "Graph run started");

        let mut ctx = RunContext::new(thread_id);
        let mut current = self.entry.clone();

        while current != END {
            if ctx.steps >= self.max_steps {
                let err = OrchestrationError::StepLimitExceeded(format!(
                    "stopped after {} steps without reaching the end",
                    self.max_steps
                ));
                return Err(self.fail(&mut state, &mut ctx, &current, err).await);
            }

            let node = self.nodes.get(&current).ok_or_else(|| {
                OrchestrationError::GraphError(format!("Unknown step {}", current))
            })?;

            ctx.steps += 1;
            debug!(thread_id, step = %current, n = ctx.steps, "Running step");

            match node.run(&state, &mut ctx).await {
                Ok(update) => {
                    debug!(thread_id, step = %current, appended = update.turns.len(), "Step finished");
                    state.apply(update);
                }
                Err(err) => return Err(self.fail(&mut state, &mut ctx, &current, err).await),
            }

            self.checkpointer.save(&state).await?;
            current = self.next_step(&current, &state);
        }

        info!(
            thread_id,
            steps = ctx.steps,
            turns = state.turns.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Graph run complete"
        );

        Ok(state)
    }

    /// Stored state of a thread
    pub async fn get_state(&self, thread_id: &str) -> Result<Option<ConversationState>> {
        self.checkpointer.load(thread_id).await
    }

    /// Drop a thread. Returns whether it existed.
    ///
    /// Waits for a run in progress on the thread, so the run cannot save
    /// the thread back after it is deleted.
    pub async fn delete_thread(&self, thread_id: &str) -> Result<bool> {
        let lock = self.thread_lock(thread_id).await;
        let _guard = lock.lock().await;

        let existed = self.checkpointer.delete(thread_id).await?;

        let mut locks = self.thread_locks.lock().await;
        // Keep the entry if another caller is already queued on it
        if locks
            .get(thread_id)
            .is_some_and(|l| Arc::ptr_eq(l, &lock) && Arc::strong_count(l) == 2)
        {
            locks.remove(thread_id);
        }

        Ok(existed)
    }

    fn next_step(&self, from: &str, state: &ConversationState) -> String {
        match self.edges.get(from) {
            Some(Edge::Direct(to)) => to.clone(),
            Some(Edge::Conditional { route, mapping }) => {
                let key = route(state);
                match mapping.get(key) {
                    Some(target) => target.clone(),
                    None => {
                        debug!(step = from, key, "Unmapped routing key, ending run");
                        END.to_string()
                    }
                }
            }
            None => END.to_string(),
        }
    }

    async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.thread_locks.lock().await;
        Arc::clone(locks.entry(thread_id.to_string()).or_default())
    }

    /// Leave the thread well-formed after a failed step and persist it.
    async fn fail(
        &self,
        state: &mut ConversationState,
        ctx: &mut RunContext,
        step: &str,
        err: OrchestrationError,
    ) -> OrchestrationError {
        if err.is_internal() {
            error!(thread_id = %state.thread_id, step, error = %err, "Step failed (internal)");
        } else {
            warn!(thread_id = %state.thread_id, step, error = %err, "Step failed");
        }

        let mut turns = unanswered_results(state, ctx.take_completed_results(), &err);
        turns.push(Turn::assistant(explain_failure(&err)));
        state.apply(StateUpdate::turns(turns));

        if let Err(save_err) = self.checkpointer.save(state).await {
            error!(thread_id = %state.thread_id, error = %save_err, "Failed to persist failure turn");
        }

        err
    }
}

/// Results for the invocations on the last turn after a failed step, so
/// the next model call never sees a dangling request. Invocations that
/// already ran keep their real result; the rest get an error result.
fn unanswered_results(
    state: &ConversationState,
    completed: Vec<Turn>,
    err: &OrchestrationError,
) -> Vec<Turn> {
    let Some(last) = state.last_turn() else {
        return Vec::new();
    };

    let mut completed: HashMap<String, Turn> = completed
        .into_iter()
        .filter_map(|t| {
            let id = t.correlation_id()?.to_string();
            Some((id, t))
        })
        .collect();

    last.invocations()
        .iter()
        .map(|call| {
            completed.remove(&call.id).unwrap_or_else(|| {
                let content = serde_json::json!({ "error": err.to_string() }).to_string();
                Turn::tool_result(&call.id, &call.name, content)
            })
        })
        .collect()
}

/// Text of the assistant turn surfaced after a failure
pub fn explain_failure(err: &OrchestrationError) -> String {
    match err {
        OrchestrationError::StepLimitExceeded(_) => {
            "I stopped working on this request because it took too many steps without finishing. \
             Part of the work may already be saved. Please check the result and try again with a narrower request."
                .to_string()
        }
        e if e.is_internal() => format!(
            "I could not complete this request because of an internal configuration problem ({}). \
             Please report it; retrying will not help.",
            e
        ),
        e => format!(
            "I ran into a problem while processing your request ({}). Please try again.",
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCheckpointer;
    use crate::models::Role;

    /// Appends one assistant turn with a fixed text
    struct Say(&'static str);

    #[async_trait::async_trait]
    impl Node for Say {
        async fn run(&self, _: &ConversationState, _: &mut RunContext) -> Result<StateUpdate> {
            Ok(StateUpdate::turn(Turn::assistant(self.0)))
        }
    }

    struct Fail;

    #[async_trait::async_trait]
    impl Node for Fail {
        async fn run(&self, _: &ConversationState, _: &mut RunContext) -> Result<StateUpdate> {
            Err(OrchestrationError::LlmError("upstream timeout".into()))
        }
    }

    fn store() -> Arc<dyn Checkpointer> {
        Arc::new(InMemoryCheckpointer::new())
    }

    #[tokio::test]
    async fn test_linear_run_and_resume() {
        let graph = GraphBuilder::new()
            .add_node("a", Arc::new(Say("one")))
            .add_node("b", Arc::new(Say("two")))
            .set_entry("a")
            .add_edge("a", "b")
            .add_edge("b", END)
            .compile(store(), 10)
            .unwrap();

        let state = graph.invoke("t", Turn::user("hi")).await.unwrap();
        assert_eq!(state.turns.len(), 3);
        assert_eq!(state.final_reply(), Some("two"));

        let state = graph.invoke("t", Turn::user("again")).await.unwrap();
        assert_eq!(state.turns.len(), 6);
        assert_eq!(state.turns[3], Turn::user("again"));

        let stored = graph.get_state("t").await.unwrap().unwrap();
        assert_eq!(stored.turns, state.turns);
    }

    #[tokio::test]
    async fn test_conditional_edge_and_unmapped_key() {
        let graph = GraphBuilder::new()
            .add_node("router", Arc::new(Say("routing")))
            .add_node("left", Arc::new(Say("left")))
            .set_entry("router")
            .add_conditional_edges(
                "router",
                |s| {
                    if s.turns[0].content() == "go left" {
                        "left"
                    } else {
                        "nowhere"
                    }
                },
                &[("left", "left")],
            )
            .add_edge("left", END)
            .compile(store(), 10)
            .unwrap();

        let state = graph.invoke("l", Turn::user("go left")).await.unwrap();
        assert_eq!(state.final_reply(), Some("left"));

        let state = graph.invoke("r", Turn::user("stay")).await.unwrap();
        assert_eq!(state.final_reply(), Some("routing"));
    }

    #[tokio::test]
    async fn test_step_ceiling() {
        let graph = GraphBuilder::new()
            .add_node("loop", Arc::new(Say("again")))
            .set_entry("loop")
            .add_edge("loop", "loop")
            .compile(store(), 3)
            .unwrap();

        let result = graph.invoke("x", Turn::user("start")).await;
        assert!(matches!(result, Err(OrchestrationError::StepLimitExceeded(_))));

        let stored = graph.get_state("x").await.unwrap().unwrap();
        // input + 3 step turns + explanation
        assert_eq!(stored.turns.len(), 5);
        assert!(stored.final_reply().unwrap().contains("too many steps"));
    }

    #[tokio::test]
    async fn test_failure_is_surfaced_and_thread_stays_usable() {
        let graph = GraphBuilder::new()
            .add_node("broken", Arc::new(Fail))
            .set_entry("broken")
            .add_edge("broken", END)
            .compile(store(), 5)
            .unwrap();

        let result = graph.invoke("f", Turn::user("hello")).await;
        assert!(matches!(result, Err(OrchestrationError::LlmError(_))));

        let stored = graph.get_state("f").await.unwrap().unwrap();
        assert_eq!(stored.last_turn().unwrap().role(), Role::Assistant);
        assert!(stored.final_reply().unwrap().contains("upstream timeout"));

        // Next run appends to the same thread
        let _ = graph.invoke("f", Turn::user("retry")).await;
        let stored = graph.get_state("f").await.unwrap().unwrap();
        assert_eq!(stored.turns[2], Turn::user("retry"));
    }

    #[tokio::test]
    async fn test_delete_thread() {
        let graph = GraphBuilder::new()
            .add_node("a", Arc::new(Say("ok")))
            .set_entry("a")
            .add_edge("a", END)
            .compile(store(), 5)
            .unwrap();

        graph.invoke("d", Turn::user("hi")).await.unwrap();
        assert!(graph.delete_thread("d").await.unwrap());
        assert!(graph.get_state("d").await.unwrap().is_none());
    }

    #[test]
    fn test_compile_rejects_bad_wiring() {
        let missing_entry = GraphBuilder::new()
            .add_node("a", Arc::new(Say("x")))
            .add_edge("a", END)
            .compile(store(), 5);
        assert!(matches!(missing_entry, Err(OrchestrationError::GraphError(_))));

        let unknown_target = GraphBuilder::new()
            .add_node("a", Arc::new(Say("x")))
            .set_entry("a")
            .add_edge("a", "b")
            .compile(store(), 5);
        assert!(matches!(unknown_target, Err(OrchestrationError::GraphError(_))));

        let dead_end = GraphBuilder::new()
            .add_node("a", Arc::new(Say("x")))
            .add_node("b", Arc::new(Say("y")))
            .set_entry("a")
            .add_edge("a", "b")
            .compile(store(), 5);
        assert!(matches!(dead_end, Err(OrchestrationError::GraphError(_))));
    }

    #[test]
    fn test_unanswered_invocations_get_error_results() {
        use crate::models::Invocation;
        use serde_json::json;

        let mut state = ConversationState::new("u");
        state.apply(StateUpdate::turn(Turn::assistant_with_invocations(
            "",
            vec![Invocation::new("c1", "drop_tables", json!({}))],
        )));

        let err = OrchestrationError::ToolNotFound("drop_tables".into());
        let turns = unanswered_results(&state, Vec::new(), &err);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].correlation_id(), Some("c1"));
        assert!(turns[0].content().contains("drop_tables"));
    }

    #[test]
    fn test_executed_invocations_keep_their_results() {
        use crate::models::Invocation;
        use serde_json::json;

        let mut state = ConversationState::new("u");
        state.apply(StateUpdate::turn(Turn::assistant_with_invocations(
            "",
            vec![
                Invocation::new("c1", "insert_movement", json!({})),
                Invocation::new("c2", "drop_tables", json!({})),
            ],
        )));

        let done = vec![Turn::tool_result("c1", "insert_movement", r#"{"id":7}"#)];
        let err = OrchestrationError::ToolNotFound("drop_tables".into());
        let turns = unanswered_results(&state, done, &err);

        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].correlation_id(), Some("c1"));
        assert_eq!(turns[0].content(), r#"{"id":7}"#);
        assert_eq!(turns[1].correlation_id(), Some("c2"));
        assert!(turns[1].content().contains("drop_tables"));
    }

    #[tokio::test]
    async fn test_delete_waits_for_running_thread() {
        use tokio::sync::Notify;

        /// Blocks until released, then replies
        struct Gate(Arc<Notify>);

        #[async_trait::async_trait]
        impl Node for Gate {
            async fn run(&self, _: &ConversationState, _: &mut RunContext) -> Result<StateUpdate> {
                self.0.notified().await;
                Ok(StateUpdate::turn(Turn::assistant("done")))
            }
        }

        let gate = Arc::new(Notify::new());
        let graph = Arc::new(
            GraphBuilder::new()
                .add_node("gate", Arc::new(Gate(Arc::clone(&gate))))
                .set_entry("gate")
                .add_edge("gate", END)
                .compile(store(), 5)
                .unwrap(),
        );

        let running = tokio::spawn({
            let graph = Arc::clone(&graph);
            async move { graph.invoke("g", Turn::user("hi")).await }
        });
        // Let the run take the thread lock
        while graph.get_state("g").await.unwrap().is_none() {
            tokio::task::yield_now().await;
        }

        let deleting = tokio::spawn({
            let graph = Arc::clone(&graph);
            async move { graph.delete_thread("g").await }
        });
        tokio::task::yield_now().await;
        assert!(!deleting.is_finished());

        gate.notify_one();
        running.await.unwrap().unwrap();
        assert!(deleting.await.unwrap().unwrap());

        // The finished run did not bring the thread back
        assert!(graph.get_state("g").await.unwrap().is_none());
    }
}
