//! Retrieval orchestrator: the DECIDE → RETRIEVE → GENERATE state machine.
//!
//! One run processes one inbound query sequentially. Each stage appends to
//! the [`ConversationState`] and names the next stage; failures end the run
//! in `FAILED` with the error attached, never with a half-written answer.
//!
//! ```text
//!   DECIDE ──tool call──▶ RETRIEVE ──▶ GENERATE ──▶ DONE
//!     │                      │            │
//!     └──no tool call──▶ DONE│            │
//!                            └──error─────┴──▶ FAILED
//! ```

use cardwise_core::config::CardwiseConfig;
use cardwise_core::error::{CardwiseError, Result};
use cardwise_core::traits::{GenerateParams, Provider, Retriever, ToolChoice};
use cardwise_core::types::{Message, ToolCall};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::conversation::ConversationState;
use crate::prompt::{RETRIEVE_TOOL_NAME, generation_prompt, retrieval_tool, serialize_documents};

/// Orchestration stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Decide,
    Retrieve,
    Generate,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Decide => "DECIDE",
            Stage::Retrieve => "RETRIEVE",
            Stage::Generate => "GENERATE",
            Stage::Done => "DONE",
            Stage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Which edge leaves DECIDE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EdgePolicy {
    /// Retrieve only when the model asked for it.
    #[default]
    Conditional,
    /// Retrieve on every turn regardless of the model's decision.
    Always,
}

impl FromStr for EdgePolicy {
    type Err = CardwiseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "conditional" => Ok(EdgePolicy::Conditional),
            "always" => Ok(EdgePolicy::Always),
            other => Err(CardwiseError::Config(format!(
                "unknown edge_policy '{other}' (expected 'conditional' or 'always')"
            ))),
        }
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum Terminal {
    Done,
    Failed(CardwiseError),
}

/// Final state of a run plus the stages it visited.
#[derive(Debug)]
pub struct RunOutcome {
    pub state: ConversationState,
    pub terminal: Terminal,
    pub path: Vec<Stage>,
}

impl RunOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.terminal, Terminal::Failed(_))
    }

    pub fn error(&self) -> Option<&CardwiseError> {
        match &self.terminal {
            Terminal::Failed(e) => Some(e),
            Terminal::Done => None,
        }
    }

    /// Content of the final `ai` message of a successful run.
    pub fn answer(&self) -> Option<&str> {
        match self.terminal {
            Terminal::Done => self.state.final_answer(),
            Terminal::Failed(_) => None,
        }
    }
}

/// Tunables for one orchestrator instance.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub top_k: usize,
    pub edge_policy: EdgePolicy,
    pub model_timeout: Duration,
    pub search_timeout: Duration,
    pub params: GenerateParams,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            edge_policy: EdgePolicy::Conditional,
            model_timeout: Duration::from_secs(60),
            search_timeout: Duration::from_secs(10),
            params: GenerateParams::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_config(config: &CardwiseConfig) -> Result<Self> {
        Ok(Self {
            top_k: config.retrieval.top_k,
            edge_policy: config.orchestration.edge_policy.parse()?,
            model_timeout: Duration::from_secs(config.orchestration.model_timeout_secs),
            search_timeout: Duration::from_secs(config.orchestration.search_timeout_secs),
            params: GenerateParams {
                model: config.llm.model.clone(),
                temperature: config.llm.temperature,
                max_tokens: config.llm.max_tokens,
                tool_choice: ToolChoice::Auto,
            },
        })
    }
}

/// Await `fut`, mapping an elapsed deadline to `DeadlineExceeded`.
async fn with_deadline<T>(
    operation: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CardwiseError::DeadlineExceeded {
            operation,
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

/// Drives conversations through the stage machine.
///
/// The provider and retriever are injected and shared; the orchestrator holds
/// no per-conversation state, so one instance serves concurrent runs.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    retriever: Arc<dyn Retriever>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>, retriever: Arc<dyn Retriever>, config: OrchestratorConfig) -> Self {
        Self {
            provider,
            retriever,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn retriever(&self) -> &Arc<dyn Retriever> {
        &self.retriever
    }

    /// Run a fresh conversation for `query` to a terminal stage.
    pub async fn run(&self, query: &str) -> RunOutcome {
        self.run_state(ConversationState::new(query)).await
    }

    /// Run one turn over an existing state, starting at DECIDE.
    pub async fn run_state(&self, mut state: ConversationState) -> RunOutcome {
        let turn = state.begin_turn();
        let mut stage = Stage::Decide;
        let mut path = vec![stage];

        loop {
            if stage.is_terminal() {
                tracing::debug!("Turn {turn} finished: {}", stage_path(&path));
                return RunOutcome {
                    state,
                    terminal: Terminal::Done,
                    path,
                };
            }

            match self.step(stage, &mut state).await {
                Ok(next) => {
                    tracing::debug!("Turn {turn}: {stage} -> {next}");
                    stage = next;
                    path.push(stage);
                }
                Err(e) => {
                    tracing::warn!("Turn {turn} failed in {stage}: {e}");
                    path.push(Stage::Failed);
                    return RunOutcome {
                        state,
                        terminal: Terminal::Failed(e),
                        path,
                    };
                }
            }
        }
    }

    /// Execute a single stage and return the stage that follows it.
    pub async fn step(&self, stage: Stage, state: &mut ConversationState) -> Result<Stage> {
        match stage {
            Stage::Decide => self.decide(state).await,
            Stage::Retrieve => self.retrieve(state).await,
            Stage::Generate => self.generate(state).await,
            Stage::Done | Stage::Failed => Ok(stage),
        }
    }

    async fn decide(&self, state: &mut ConversationState) -> Result<Stage> {
        let tools = [retrieval_tool()];
        let mut params = self.config.params.clone();
        if self.config.edge_policy == EdgePolicy::Always {
            params.tool_choice = ToolChoice::Required;
        }

        let reply = with_deadline(
            "decide",
            self.config.model_timeout,
            self.provider.invoke_with_tools(state.messages(), &tools, &params),
        )
        .await?;
        let requested = reply.has_tool_calls();
        state.push(reply)?;

        Ok(match (requested, self.config.edge_policy) {
            (true, _) | (false, EdgePolicy::Always) => Stage::Retrieve,
            (false, EdgePolicy::Conditional) => Stage::Done,
        })
    }

    async fn retrieve(&self, state: &mut ConversationState) -> Result<Stage> {
        let call_id = match state.latest_tool_call(RETRIEVE_TOOL_NAME) {
            Some(call) => call.id.clone(),
            None => {
                // Model declined under the always-retrieve policy: announce the call ourselves
                let id = format!("call_{}", uuid::Uuid::new_v4().simple());
                let arguments = serde_json::json!({ "query": state.query() }).to_string();
                state.push(Message::ai_with_tool_calls(
                    "",
                    vec![ToolCall::new(id.clone(), RETRIEVE_TOOL_NAME, arguments)],
                ))?;
                id
            }
        };

        let documents = with_deadline(
            "search",
            self.config.search_timeout,
            self.retriever.search(state.query(), self.config.top_k),
        )
        .await?;
        tracing::info!("Retrieved {} document(s) for turn {}", documents.len(), state.turn());

        let turn = state.turn();
        state.push(Message::tool(serialize_documents(&documents), call_id, turn))?;
        Ok(Stage::Generate)
    }

    async fn generate(&self, state: &mut ConversationState) -> Result<Stage> {
        let prompt = {
            let context = state
                .tool_results_for_turn(state.turn())
                .last()
                .copied()
                .map(Message::content)
                .unwrap_or_default();
            generation_prompt(state.messages(), context)
        };

        let reply = with_deadline(
            "generate",
            self.config.model_timeout,
            self.provider.invoke(&prompt, &self.config.params),
        )
        .await?;
        state.push(reply)?;
        Ok(Stage::Done)
    }
}

fn stage_path(path: &[Stage]) -> String {
    path.iter().map(Stage::to_string).collect::<Vec<_>>().join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cardwise_core::types::{Document, ProviderResponse, Role, ToolDefinition};
    use std::sync::Mutex;

    /// Replays canned responses and records every prompt it receives.
    struct ScriptedProvider {
        replies: Mutex<Vec<ProviderResponse>>,
        prompts: Mutex<Vec<(Vec<Message>, usize, ToolChoice)>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<ProviderResponse>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<(Vec<Message>, usize, ToolChoice)> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(
            &self,
            messages: &[Message],
            tools: &[ToolDefinition],
            params: &GenerateParams,
        ) -> Result<ProviderResponse> {
            self.prompts
                .lock()
                .unwrap()
                .push((messages.to_vec(), tools.len(), params.tool_choice));
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| CardwiseError::ModelInvocation("script exhausted".into()))
        }
    }

    struct FixedRetriever(Vec<Document>);

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn search(&self, _query: &str, k: usize) -> Result<Vec<Document>> {
            Ok(self.0.iter().take(k).cloned().collect())
        }

        fn len(&self) -> usize {
            self.0.len()
        }
    }

    struct SlowRetriever;

    #[async_trait]
    impl Retriever for SlowRetriever {
        async fn search(&self, _query: &str, _k: usize) -> Result<Vec<Document>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }

        fn len(&self) -> usize {
            0
        }
    }

    fn text(content: &str) -> ProviderResponse {
        ProviderResponse {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    fn tool_call(id: &str) -> ProviderResponse {
        ProviderResponse {
            content: None,
            tool_calls: vec![ToolCall::new(id, RETRIEVE_TOOL_NAME, r#"{"query":"fee"}"#)],
            ..Default::default()
        }
    }

    fn card_docs() -> Vec<Document> {
        vec![Document::new("CardA", "No annual fee, 2% cashback").with_metadata("name", "CardA")]
    }

    fn orchestrator(
        provider: Arc<ScriptedProvider>,
        retriever: Arc<dyn Retriever>,
        edge_policy: EdgePolicy,
    ) -> Orchestrator {
        Orchestrator::new(
            provider,
            retriever,
            OrchestratorConfig {
                edge_policy,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_edge_policy_parse() {
        assert_eq!("conditional".parse::<EdgePolicy>().unwrap(), EdgePolicy::Conditional);
        assert_eq!(" Always ".parse::<EdgePolicy>().unwrap(), EdgePolicy::Always);
        assert!(matches!("sometimes".parse::<EdgePolicy>(), Err(CardwiseError::Config(_))));
    }

    #[test]
    fn test_config_from_app_config() {
        let mut app = CardwiseConfig::default();
        app.retrieval.top_k = 5;
        app.orchestration.edge_policy = "always".into();
        app.orchestration.search_timeout_secs = 2;
        let config = OrchestratorConfig::from_config(&app).unwrap();
        assert_eq!(config.top_k, 5);
        assert_eq!(config.edge_policy, EdgePolicy::Always);
        assert_eq!(config.search_timeout, Duration::from_secs(2));
        assert_eq!(config.params.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_full_retrieval_path() {
        let provider = ScriptedProvider::new(vec![tool_call("call_1"), text("CardA has no annual fee.")]);
        let orch = orchestrator(provider.clone(), Arc::new(FixedRetriever(card_docs())), EdgePolicy::Conditional);

        let outcome = orch.run("Does CardA have an annual fee?").await;
        assert_eq!(
            outcome.path,
            vec![Stage::Decide, Stage::Retrieve, Stage::Generate, Stage::Done]
        );
        assert_eq!(outcome.answer(), Some("CardA has no annual fee."));

        let roles: Vec<Role> = outcome.state.messages().iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec![Role::Human, Role::Ai, Role::Tool, Role::Ai]);
        match &outcome.state.messages()[2] {
            Message::Tool { content, tool_call_id, turn } => {
                assert_eq!(content, "Source: {name: CardA}\nContent: No annual fee, 2% cashback");
                assert_eq!(tool_call_id, "call_1");
                assert_eq!(*turn, 1);
            }
            other => panic!("expected tool message, got {other:?}"),
        }

        let prompts = provider.prompts();
        assert_eq!(prompts.len(), 2);
        // DECIDE offers the tool, GENERATE does not
        assert_eq!(prompts[0].1, 1);
        assert_eq!(prompts[1].1, 0);
        let generate_prompt = &prompts[1].0;
        assert_eq!(generate_prompt[0].role(), Role::System);
        assert!(generate_prompt[0].content().ends_with("Content: No annual fee, 2% cashback"));
        assert!(generate_prompt.iter().all(|m| m.role() != Role::Tool && !m.has_tool_calls()));
    }

    #[tokio::test]
    async fn test_conditional_skips_retrieval_without_tool_call() {
        let provider = ScriptedProvider::new(vec![text("Hello! Ask me about credit cards.")]);
        let orch = orchestrator(provider.clone(), Arc::new(FixedRetriever(card_docs())), EdgePolicy::Conditional);

        let outcome = orch.run("hi").await;
        assert_eq!(outcome.path, vec![Stage::Decide, Stage::Done]);
        assert_eq!(outcome.answer(), Some("Hello! Ask me about credit cards."));
        assert_eq!(provider.prompts().len(), 1);
        assert_eq!(provider.prompts()[0].2, ToolChoice::Auto);
    }

    #[tokio::test]
    async fn test_always_policy_synthesizes_tool_call() {
        let provider = ScriptedProvider::new(vec![text("I'll just answer."), text("CardA: 2% cashback.")]);
        let orch = orchestrator(provider.clone(), Arc::new(FixedRetriever(card_docs())), EdgePolicy::Always);

        let outcome = orch.run("cashback?").await;
        assert_eq!(
            outcome.path,
            vec![Stage::Decide, Stage::Retrieve, Stage::Generate, Stage::Done]
        );
        assert!(outcome.state.tool_invariant_holds());
        assert_eq!(provider.prompts()[0].2, ToolChoice::Required);

        let messages = outcome.state.messages();
        let roles: Vec<Role> = messages.iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec![Role::Human, Role::Ai, Role::Ai, Role::Tool, Role::Ai]);
        let announced = &messages[2].tool_calls()[0];
        assert_eq!(announced.name(), RETRIEVE_TOOL_NAME);
        match &messages[3] {
            Message::Tool { tool_call_id, .. } => assert_eq!(tool_call_id, &announced.id),
            other => panic!("expected tool message, got {other:?}"),
        }
        assert_eq!(outcome.answer(), Some("CardA: 2% cashback."));
    }

    #[tokio::test]
    async fn test_model_failure_ends_in_failed() {
        let provider = ScriptedProvider::new(Vec::new());
        let orch = orchestrator(provider, Arc::new(FixedRetriever(card_docs())), EdgePolicy::Conditional);

        let outcome = orch.run("q").await;
        assert_eq!(outcome.path, vec![Stage::Decide, Stage::Failed]);
        assert!(matches!(outcome.error(), Some(CardwiseError::ModelInvocation(_))));
        assert_eq!(outcome.state.len(), 1);
        assert!(outcome.answer().is_none());
    }

    #[tokio::test]
    async fn test_search_deadline_exceeded() {
        let provider = ScriptedProvider::new(vec![tool_call("call_1"), text("unused")]);
        let orch = Orchestrator::new(
            provider,
            Arc::new(SlowRetriever),
            OrchestratorConfig {
                search_timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );

        let outcome = orch.run("q").await;
        assert_eq!(outcome.path, vec![Stage::Decide, Stage::Retrieve, Stage::Failed]);
        assert!(matches!(
            outcome.error(),
            Some(CardwiseError::DeadlineExceeded { operation: "search", .. })
        ));
        assert_eq!(outcome.state.last().map(|m| m.role()), Some(Role::Ai));
        assert!(outcome.state.last().is_some_and(|m| m.has_tool_calls()));
    }

    /// Hangs on the answer call; DECIDE still gets a tool call.
    struct StallingProvider;

    #[async_trait]
    impl Provider for StallingProvider {
        fn name(&self) -> &str {
            "stalling"
        }

        async fn chat(
            &self,
            _messages: &[Message],
            tools: &[ToolDefinition],
            _params: &GenerateParams,
        ) -> Result<ProviderResponse> {
            if tools.is_empty() {
                tokio::time::sleep(Duration::from_secs(5)).await;
                return Ok(text("too late"));
            }
            Ok(tool_call("call_1"))
        }
    }

    #[tokio::test]
    async fn test_model_deadline_exceeded_gives_fallback() {
        let config = OrchestratorConfig {
            model_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let orch = Orchestrator::new(
            Arc::new(StallingProvider),
            Arc::new(FixedRetriever(card_docs())),
            config.clone(),
        );

        let outcome = orch.run("Does CardA have an annual fee?").await;
        assert_eq!(
            outcome.path,
            vec![Stage::Decide, Stage::Retrieve, Stage::Generate, Stage::Failed]
        );
        assert!(matches!(
            outcome.error(),
            Some(CardwiseError::DeadlineExceeded { operation: "generate", timeout_ms: 20 })
        ));
        assert_eq!(outcome.state.last().map(|m| m.role()), Some(Role::Tool));

        let agent = crate::RagAgent::new(Arc::new(StallingProvider), Arc::new(FixedRetriever(card_docs())), config);
        assert_eq!(agent.ask("Does CardA have an annual fee?", "alice").await, crate::FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn test_top_k_forwarded_to_retriever() {
        let docs: Vec<Document> = (0..5)
            .map(|i| Document::new(format!("Card{i}"), format!("desc {i}")).with_metadata("name", format!("Card{i}")))
            .collect();
        let provider = ScriptedProvider::new(vec![tool_call("c"), text("ok")]);
        let orch = Orchestrator::new(
            provider,
            Arc::new(FixedRetriever(docs)),
            OrchestratorConfig {
                top_k: 2,
                ..Default::default()
            },
        );

        let outcome = orch.run("q").await;
        let tool = outcome.state.tool_results_for_turn(1)[0].content().to_string();
        assert_eq!(tool.matches("Source:").count(), 2);
        assert!(tool.starts_with("Source: {name: Card0}"));
    }

    #[tokio::test]
    async fn test_second_turn_uses_only_its_own_results() {
        let provider = ScriptedProvider::new(vec![
            tool_call("c1"),
            text("first"),
            tool_call("c2"),
            text("second"),
        ]);
        let orch = orchestrator(provider.clone(), Arc::new(FixedRetriever(Vec::new())), EdgePolicy::Conditional);

        let first = orch.run("q1").await;
        let mut state = first.state;
        state.push(Message::human("q2")).unwrap();
        let second = orch.run_state(state).await;
        assert_eq!(second.answer(), Some("second"));
        assert_eq!(second.state.turn(), 2);
        assert_eq!(second.state.tool_results_for_turn(2).len(), 1);

        // GENERATE of turn 2 saw only human and plain ai messages
        let prompts = provider.prompts();
        let last_prompt = &prompts[3].0;
        let roles: Vec<Role> = last_prompt.iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec![Role::System, Role::Human, Role::Ai, Role::Human]);
    }
}
