use std::cmp::Reverse;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};
use uuid::Uuid;

use super::agent::Agent;
use super::errors::{AgentError, AgentResult};
use super::events::{AgentEvent, EventBus, Subscription};
use super::types::{AgentDefinition, AgentRuntimeState};
use crate::config::ModelsConfig;
use crate::domain::repositories::{RepositoryError, Stores, TaskFilter};
use crate::domain::task::{NewTask, Payload, StatusUpdate, Task, TaskStatus};
use crate::llm::{self, CompletionClient};

/// Queued tasks examined per poll tick
pub const POLL_BATCH: usize = 10;

/// What `assign` did with a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// Ran on this agent (and possibly more queued work after it)
    Ran { agent_id: String },
    /// No suitable idle agent; the task stays queued
    Queued,
    /// The named agent does not exist; the task was failed
    Failed,
    /// Another dispatcher moved the task first
    Stale,
}

/// Outcome of the claim step of an assignment
enum Claim {
    /// The task is `running` on this agent and must be resolved
    Started { agent: Arc<Agent>, task: Task },
    Settled(Assignment),
}

/// Owns the agents, picks who runs what, and fans out their events
///
/// # Business Rules
/// - An explicitly targeted task only ever runs on its target
/// - Otherwise the idle agent with the most capability matches wins,
///   ties going to the first registered
/// - An agent is claimed before any suspension point, so it never runs
///   two tasks at once
pub struct Coordinator {
    agents: RwLock<Vec<Arc<Agent>>>,
    stores: Stores,
    events: Arc<EventBus>,
}

impl Coordinator {
    pub fn new(stores: Stores) -> Self {
        Self {
            agents: RwLock::new(Vec::new()),
            stores,
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Add an agent and forward its events to coordinator subscribers
    ///
    /// # Errors
    /// [`AgentError::Configuration`] when an agent with the same id exists.
    pub fn register(&self, agent: Agent) -> AgentResult<Arc<Agent>> {
        let mut agents = self.agents.write();
        if agents.iter().any(|a| a.id() == agent.id()) {
            return Err(AgentError::Configuration(format!(
                "Agent {} is already registered",
                agent.id()
            )));
        }

        let bus = Arc::clone(&self.events);
        agent.events().subscribe(move |event| bus.emit(event));

        let agent = Arc::new(agent);
        agents.push(Arc::clone(&agent));
        tracing::info!(agent_id = %agent.id(), status = %agent.status(), "Registered agent");
        Ok(agent)
    }

    /// Register a definition with the first model that yields a client
    ///
    /// Candidates are the agent's preference, then primary, then fallback.
    /// When none can be built the agent is registered offline.
    pub fn register_definition(
        &self,
        definition: AgentDefinition,
        models: &ModelsConfig,
    ) -> AgentResult<Arc<Agent>> {
        let mut client: Option<Arc<dyn CompletionClient>> = None;
        for model in models.candidates_for(definition.model_preference.as_deref()) {
            match llm::build_client(model) {
                Ok(built) => {
                    tracing::debug!(
                        agent_id = %definition.id,
                        model = %model.id,
                        "Completion client ready",
                    );
                    client = Some(built);
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        agent_id = %definition.id,
                        model = %model.id,
                        error = %e,
                        "Cannot use model",
                    );
                }
            }
        }

        let agent = match client {
            Some(client) => Agent::new(definition, client, self.stores.clone()),
            None => {
                tracing::warn!(
                    agent_id = %definition.id,
                    "No usable model, agent registered offline",
                );
                Agent::offline(definition, self.stores.clone())
            }
        };
        self.register(agent)
    }

    pub fn agent(&self, id: &str) -> Option<Arc<Agent>> {
        self.agents.read().iter().find(|a| a.id() == id).cloned()
    }

    /// All agents in registration order
    pub fn agents(&self) -> Vec<Arc<Agent>> {
        self.agents.read().clone()
    }

    pub fn agent_states(&self) -> Vec<AgentRuntimeState> {
        self.agents.read().iter().map(|a| a.state()).collect()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.events.unsubscribe(subscription)
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Producer entry point: store the task, queue it, and try to assign it
    /// in the background
    pub async fn submit(self: &Arc<Self>, input: NewTask) -> AgentResult<Task> {
        let created = self.stores.tasks.create(input).await?;
        let task = self
            .stores
            .tasks
            .update_status(created.id, TaskStatus::Queued, StatusUpdate::default())
            .await?;
        tracing::info!(
            task_id = %task.id,
            title = %task.title,
            priority = %task.priority,
            "Task queued",
        );

        let coordinator = Arc::clone(self);
        let queued = task.clone();
        tokio::spawn(async move {
            let task_id = queued.id;
            if let Err(e) = coordinator.assign(queued).await {
                tracing::warn!(task_id = %task_id, error = %e, "Assignment failed");
            }
        });

        Ok(task)
    }

    /// Dispatch a queued task, or leave it queued when nobody can take it
    ///
    /// Runs the task to completion on the chosen agent before returning,
    /// followed by any queued work that agent picks up afterwards.
    pub async fn assign(self: &Arc<Self>, task: Task) -> AgentResult<Assignment> {
        match self.claim(&task).await? {
            Claim::Started { agent, task } => Ok(self.run(agent, task).await),
            Claim::Settled(assignment) => Ok(assignment),
        }
    }

    /// Pick an agent for `task` and move the task to `running` on it
    ///
    /// Returns without resolving anything, so callers decide whether the
    /// run is awaited or detached.
    async fn claim(&self, task: &Task) -> AgentResult<Claim> {
        let agent = match task.assigned_agent.as_deref() {
            Some(target) => {
                let Some(agent) = self.agent(target) else {
                    tracing::warn!(
                        task_id = %task.id,
                        agent_id = %target,
                        "Task targets unknown agent"
                    );
                    let error = AgentError::UnknownAgent(target.to_string()).to_string();
                    self.stores
                        .tasks
                        .update_status(
                            task.id,
                            TaskStatus::Failed,
                            StatusUpdate::output(error_output(error)),
                        )
                        .await?;
                    return Ok(Claim::Settled(Assignment::Failed));
                };
                if let Err(e) = agent.try_claim(task.id) {
                    tracing::debug!(
                        task_id = %task.id,
                        error = %e,
                        "Target agent busy, task stays queued"
                    );
                    return Ok(Claim::Settled(Assignment::Queued));
                }
                agent
            }
            None => match self.claim_best(task) {
                Some(agent) => agent,
                None => {
                    tracing::debug!(task_id = %task.id, "No idle agent, task stays queued");
                    return Ok(Claim::Settled(Assignment::Queued));
                }
            },
        };

        match self.start(&agent, task.id).await? {
            Some(running) => Ok(Claim::Started {
                agent,
                task: running,
            }),
            None => Ok(Claim::Settled(Assignment::Stale)),
        }
    }

    /// Claim the best-scoring idle agent for `task`
    fn claim_best(&self, task: &Task) -> Option<Arc<Agent>> {
        let text = format!("{} {}", task.title, task.description).to_lowercase();

        let mut candidates: Vec<(usize, Arc<Agent>)> = self
            .agents
            .read()
            .iter()
            .filter(|a| a.is_idle())
            .map(|a| (a.definition().capability_score(&text), Arc::clone(a)))
            .collect();
        // stable: equal scores keep registration order
        candidates.sort_by_key(|(score, _)| Reverse(*score));

        candidates
            .into_iter()
            .find(|(_, agent)| agent.try_claim(task.id).is_ok())
            .map(|(score, agent)| {
                tracing::debug!(
                    task_id = %task.id,
                    agent_id = %agent.id(),
                    score,
                    "Selected agent"
                );
                agent
            })
    }

    /// Move a task to `running` on an agent already claimed for it
    ///
    /// Returns `None` and releases the agent when another dispatcher moved
    /// the task first.
    async fn start(&self, agent: &Agent, task_id: Uuid) -> AgentResult<Option<Task>> {
        let update = StatusUpdate::assigned_to(agent.id());
        let running = match self
            .stores
            .tasks
            .update_status(task_id, TaskStatus::Running, update)
            .await
        {
            Ok(task) => task,
            Err(RepositoryError::Conflict(_)) | Err(RepositoryError::InvalidTransition { .. }) => {
                tracing::debug!(
                    task_id = %task_id,
                    agent_id = %agent.id(),
                    "Task taken by another dispatcher"
                );
                agent.release();
                return Ok(None);
            }
            Err(e) => {
                agent.release();
                return Err(e.into());
            }
        };

        tracing::info!(task_id = %running.id, agent_id = %agent.id(), "Task assigned");
        let details = json!({ "agentId": agent.id() });
        self.audit(agent.id(), "task:assigned", running.id, Some(details))
            .await;
        Ok(Some(running))
    }

    /// Resolve a started task, then keep feeding the agent queued work
    async fn run(&self, agent: Arc<Agent>, task: Task) -> Assignment {
        let mut running = task;

        loop {
            let outcome = agent.resolve(&running).await;
            let status = match (outcome.success, running.requires_approval) {
                (false, _) => TaskStatus::Failed,
                (true, true) => TaskStatus::Review,
                (true, false) => TaskStatus::Completed,
            };
            if let Err(e) = self
                .stores
                .tasks
                .update_status(running.id, status, StatusUpdate::output(outcome.output))
                .await
            {
                tracing::error!(
                    task_id = %running.id,
                    status = %status,
                    error = %e,
                    "Failed to record task result"
                );
            }

            let Some(next) = self.next_for(&agent).await else {
                break;
            };
            match self.start(&agent, next.id).await {
                Ok(Some(task)) => running = task,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(task_id = %next.id, error = %e, "Failed to start queued task");
                    break;
                }
            }
        }

        Assignment::Ran {
            agent_id: agent.id().to_string(),
        }
    }

    /// Next queued task the agent may take, already claimed
    async fn next_for(&self, agent: &Agent) -> Option<Task> {
        if !agent.is_idle() {
            return None;
        }

        let task = match self.stores.tasks.next_queued(Some(agent.id())).await {
            Ok(Some(task)) => task,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(agent_id = %agent.id(), error = %e, "Failed to read queue");
                return None;
            }
        };

        agent.try_claim(task.id).ok().map(|_| task)
    }

    /// One polling pass over up to [`POLL_BATCH`] queued tasks
    ///
    /// Tasks are claimed one at a time in queue order; each started run is
    /// detached, so the pass returns as soon as every claim is decided.
    /// Returns the number of queued tasks examined.
    pub async fn poll_once(self: &Arc<Self>) -> AgentResult<usize> {
        let queued = self
            .stores
            .tasks
            .list(TaskFilter::with_status(TaskStatus::Queued).limit(POLL_BATCH))
            .await?;
        let count = queued.len();

        for task in queued {
            match self.claim(&task).await {
                Ok(Claim::Started { agent, task }) => {
                    let coordinator = Arc::clone(self);
                    tokio::spawn(async move {
                        coordinator.run(agent, task).await;
                    });
                }
                Ok(Claim::Settled(_)) => {}
                Err(e) => tracing::warn!(task_id = %task.id, error = %e, "Assignment failed"),
            }
        }

        Ok(count)
    }

    /// Approve a task waiting in review
    pub async fn approve(&self, task_id: Uuid) -> AgentResult<Task> {
        self.expect_review(task_id, TaskStatus::Completed).await?;
        let task = self
            .stores
            .tasks
            .update_status(task_id, TaskStatus::Completed, StatusUpdate::default())
            .await?;

        tracing::info!(task_id = %task_id, "Task approved");
        self.audit("operator", "task:approved", task_id, None).await;
        Ok(task)
    }

    /// Reject a task waiting in review; it goes back to the queue
    pub async fn reject(&self, task_id: Uuid, reason: Option<String>) -> AgentResult<Task> {
        self.expect_review(task_id, TaskStatus::Rejected).await?;
        self.stores
            .tasks
            .update_status(task_id, TaskStatus::Rejected, StatusUpdate::default())
            .await?;
        let task = self
            .stores
            .tasks
            .update_status(task_id, TaskStatus::Queued, StatusUpdate::default())
            .await?;

        tracing::info!(task_id = %task_id, "Task rejected and requeued");
        let details = reason.map(|r| json!({ "reason": r }));
        self.audit("operator", "task:rejected", task_id, details).await;
        Ok(task)
    }

    async fn expect_review(&self, task_id: Uuid, to: TaskStatus) -> AgentResult<()> {
        let task = self
            .stores
            .tasks
            .get(task_id)
            .await?
            .ok_or(RepositoryError::NotFound(task_id))?;

        if task.status != TaskStatus::Review {
            return Err(RepositoryError::InvalidTransition {
                from: task.status,
                to,
            }
            .into());
        }
        Ok(())
    }

    /// Operator reset of an agent in `error`
    pub fn reset_agent(&self, agent_id: &str) -> AgentResult<AgentRuntimeState> {
        let agent = self
            .agent(agent_id)
            .ok_or_else(|| AgentError::UnknownAgent(agent_id.to_string()))?;
        let state = agent.reset()?;
        tracing::info!(agent_id, "Agent reset to idle");
        Ok(state)
    }

    async fn audit(&self, actor: &str, action: &str, task_id: Uuid, details: Option<Value>) {
        if let Err(e) = self
            .stores
            .audit
            .log_audit(actor, action, "task", &task_id.to_string(), details)
            .await
        {
            tracing::warn!(action, error = %e, "Failed to write audit entry");
        }
    }
}

fn error_output(message: String) -> Payload {
    let mut output = Payload::new();
    output.insert("error".to_string(), Value::String(message));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::AgentStatus;
    use crate::config::{ModelConfig, Provider};
    use crate::domain::task::{Priority, TaskType};
    use crate::infrastructure::repositories::in_memory_stores;
    use crate::llm::scripted::{ScriptStep, ScriptedClient};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn definition(id: &str, capabilities: &[&str]) -> AgentDefinition {
        AgentDefinition {
            id: id.to_string(),
            name: id.to_string(),
            role: "Test agent".to_string(),
            description: String::new(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            model_preference: None,
            max_concurrent_tasks: 1,
        }
    }

    fn coordinator() -> Arc<Coordinator> {
        Arc::new(Coordinator::new(in_memory_stores()))
    }

    fn add(
        coordinator: &Coordinator,
        id: &str,
        capabilities: &[&str],
        client: Arc<ScriptedClient>,
    ) -> Arc<Agent> {
        let agent = Agent::new(definition(id, capabilities), client, coordinator.stores().clone());
        coordinator.register(agent).unwrap()
    }

    async fn queued(coordinator: &Coordinator, input: NewTask) -> Task {
        let tasks = &coordinator.stores().tasks;
        let task = tasks.create(input).await.unwrap();
        tasks
            .update_status(task.id, TaskStatus::Queued, StatusUpdate::default())
            .await
            .unwrap()
    }

    async fn status_of(coordinator: &Coordinator, id: Uuid) -> Task {
        coordinator.stores().tasks.get(id).await.unwrap().unwrap()
    }

    async fn wait_for_status(coordinator: &Coordinator, id: Uuid, status: TaskStatus) -> Task {
        let mut task = status_of(coordinator, id).await;
        for _ in 0..400 {
            if task.status == status {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            task = status_of(coordinator, id).await;
        }
        task
    }

    #[tokio::test]
    async fn task_requiring_approval_ends_in_review() {
        let coordinator = coordinator();
        add(&coordinator, "reminders", &["reminder"], Arc::new(ScriptedClient::answering("Sent.")));
        let task = queued(&coordinator, NewTask::new("Invoice reminder", TaskType::Manual)).await;

        let assignment = coordinator.assign(task.clone()).await.unwrap();

        assert_eq!(assignment, Assignment::Ran { agent_id: "reminders".to_string() });
        let task = status_of(&coordinator, task.id).await;
        assert_eq!(task.status, TaskStatus::Review);
        assert_eq!(task.assigned_agent.as_deref(), Some("reminders"));
        assert!(task.started_at.is_some());
    }

    #[tokio::test]
    async fn task_without_approval_completes_after_one_call() {
        let coordinator = coordinator();
        let client = Arc::new(ScriptedClient::answering("Sent."));
        add(&coordinator, "reminders", &["reminder"], client.clone());
        let task = queued(
            &coordinator,
            NewTask::new("Invoice reminder", TaskType::Manual).requiring_approval(false),
        )
        .await;

        coordinator.assign(task.clone()).await.unwrap();

        let task = status_of(&coordinator, task.id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.output.unwrap()["content"], "Sent.");
        assert!(task.completed_at.is_some());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn completion_failure_fails_task_and_agent() {
        let coordinator = coordinator();
        let agent = add(
            &coordinator,
            "reminders",
            &["reminder"],
            Arc::new(ScriptedClient::new([ScriptStep::Fail("timeout".to_string())])),
        );
        let task = queued(&coordinator, NewTask::new("Invoice reminder", TaskType::Manual)).await;

        coordinator.assign(task.clone()).await.unwrap();

        let task = status_of(&coordinator, task.id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(agent.status(), AgentStatus::Error);
        assert_eq!(agent.state().error_count, 1);
    }

    #[tokio::test]
    async fn unknown_target_fails_the_task() {
        let coordinator = coordinator();
        let task = queued(
            &coordinator,
            NewTask::new("Payroll", TaskType::Manual).with_agent("payroll"),
        )
        .await;

        let assignment = coordinator.assign(task.clone()).await.unwrap();

        assert_eq!(assignment, Assignment::Failed);
        let task = status_of(&coordinator, task.id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.output.unwrap()["error"], "Agent payroll not found");
    }

    #[tokio::test]
    async fn no_idle_agent_leaves_task_queued() {
        let coordinator = coordinator();
        let task = queued(&coordinator, NewTask::new("Anything", TaskType::Manual)).await;

        assert_eq!(coordinator.assign(task.clone()).await.unwrap(), Assignment::Queued);
        assert_eq!(status_of(&coordinator, task.id).await.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn highest_score_wins_and_ties_go_to_first_registered() {
        let coordinator = coordinator();
        add(&coordinator, "writer", &["writing"], Arc::new(ScriptedClient::answering("ok")));
        add(
            &coordinator,
            "biller",
            &["invoice", "reminder"],
            Arc::new(ScriptedClient::answering("ok")),
        );
        add(&coordinator, "chaser", &["reminder"], Arc::new(ScriptedClient::answering("ok")));

        for _ in 0..3 {
            let task = queued(
                &coordinator,
                NewTask::new("Invoice reminder", TaskType::Manual),
            )
            .await;
            let assignment = coordinator.assign(task).await.unwrap();
            assert_eq!(assignment, Assignment::Ran { agent_id: "biller".to_string() });
        }

        let task = queued(&coordinator, NewTask::new("Plan the offsite", TaskType::Manual)).await;
        let assignment = coordinator.assign(task).await.unwrap();
        assert_eq!(assignment, Assignment::Ran { agent_id: "writer".to_string() });
    }

    #[tokio::test]
    async fn offline_agents_are_never_selected() {
        let coordinator = coordinator();
        let offline = Agent::offline(
            definition("reminders", &["reminder"]),
            coordinator.stores().clone(),
        );
        coordinator.register(offline).unwrap();
        let task = queued(&coordinator, NewTask::new("Invoice reminder", TaskType::Manual)).await;

        assert_eq!(coordinator.assign(task).await.unwrap(), Assignment::Queued);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let coordinator = coordinator();
        add(&coordinator, "general", &[], Arc::new(ScriptedClient::answering("ok")));
        let again = Agent::new(
            definition("general", &[]),
            Arc::new(ScriptedClient::answering("ok")),
            coordinator.stores().clone(),
        );

        assert!(matches!(coordinator.register(again), Err(AgentError::Configuration(_))));
        assert_eq!(coordinator.agents().len(), 1);
    }

    #[tokio::test]
    async fn busy_target_keeps_task_queued_until_freed() {
        let coordinator = coordinator();
        let gate = Arc::new(Notify::new());
        let client = Arc::new(ScriptedClient::answering("done").gated(Arc::clone(&gate)));
        let agent = add(&coordinator, "general", &[], client.clone());

        let first = queued(&coordinator, NewTask::new("First", TaskType::Manual)).await;
        let running = {
            let coordinator = Arc::clone(&coordinator);
            let first = first.clone();
            tokio::spawn(async move { coordinator.assign(first).await })
        };
        while client.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let targeted = queued(
            &coordinator,
            NewTask::new("Second", TaskType::Manual).with_agent("general"),
        )
        .await;
        assert_eq!(coordinator.assign(targeted.clone()).await.unwrap(), Assignment::Queued);
        assert_eq!(status_of(&coordinator, targeted.id).await.status, TaskStatus::Queued);
        assert_eq!(agent.status(), AgentStatus::Busy);

        gate.notify_one();
        while client.calls() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        gate.notify_one();
        running.await.unwrap().unwrap();

        assert_eq!(status_of(&coordinator, first.id).await.status, TaskStatus::Review);
        let targeted = status_of(&coordinator, targeted.id).await;
        assert_eq!(targeted.status, TaskStatus::Review);
        assert_eq!(targeted.assigned_agent.as_deref(), Some("general"));
        assert!(agent.is_idle());
    }

    #[tokio::test]
    async fn freed_agent_takes_queue_in_priority_order() {
        let coordinator = coordinator();
        let client = Arc::new(ScriptedClient::answering("done"));
        add(&coordinator, "general", &[], client.clone());

        let low = queued(
            &coordinator,
            NewTask::new("Low", TaskType::Manual).with_priority(Priority::LEAST_URGENT),
        )
        .await;
        let urgent = queued(
            &coordinator,
            NewTask::new("Urgent", TaskType::Manual).with_priority(Priority::MOST_URGENT),
        )
        .await;
        let first = queued(&coordinator, NewTask::new("Trigger", TaskType::Manual)).await;

        coordinator.assign(first).await.unwrap();

        let titles: Vec<String> = client
            .requests()
            .iter()
            .map(|r| r.messages[0].content.lines().next().unwrap_or_default().to_string())
            .collect();
        assert_eq!(titles, vec!["Task: Trigger", "Task: Urgent", "Task: Low"]);
        assert_eq!(status_of(&coordinator, low.id).await.status, TaskStatus::Review);
        assert_eq!(status_of(&coordinator, urgent.id).await.status, TaskStatus::Review);
    }

    #[tokio::test]
    async fn racing_assigns_never_double_book_an_agent() {
        let coordinator = coordinator();
        let gate = Arc::new(Notify::new());
        let client = Arc::new(ScriptedClient::answering("done").gated(Arc::clone(&gate)));
        add(&coordinator, "general", &[], client.clone());

        let a = queued(&coordinator, NewTask::new("A", TaskType::Manual)).await;
        let b = queued(&coordinator, NewTask::new("B", TaskType::Manual)).await;

        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.assign(a).await })
        };
        while client.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let second = coordinator.assign(b.clone()).await.unwrap();

        assert_eq!(second, Assignment::Queued);
        gate.notify_one();
        while client.calls() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        gate.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(client.calls(), 2);
        assert_eq!(status_of(&coordinator, b.id).await.status, TaskStatus::Review);
    }

    #[tokio::test]
    async fn assigning_a_task_someone_else_started_is_stale() {
        let coordinator = coordinator();
        let agent = add(&coordinator, "general", &[], Arc::new(ScriptedClient::answering("ok")));
        let task = queued(&coordinator, NewTask::new("Contested", TaskType::Manual)).await;
        coordinator
            .stores()
            .tasks
            .update_status(task.id, TaskStatus::Running, StatusUpdate::assigned_to("elsewhere"))
            .await
            .unwrap();

        assert_eq!(coordinator.assign(task).await.unwrap(), Assignment::Stale);
        assert!(agent.is_idle());
    }

    #[tokio::test]
    async fn approve_and_reject_review_tasks() {
        let coordinator = coordinator();
        add(&coordinator, "general", &[], Arc::new(ScriptedClient::answering("ok")));
        let approved = queued(&coordinator, NewTask::new("Approve me", TaskType::Manual)).await;
        coordinator.assign(approved.clone()).await.unwrap();
        let rejected = queued(&coordinator, NewTask::new("Reject me", TaskType::Manual)).await;
        coordinator.assign(rejected.clone()).await.unwrap();

        let done = coordinator.approve(approved.id).await.unwrap();
        let requeued = coordinator
            .reject(rejected.id, Some("wrong client".to_string()))
            .await
            .unwrap();

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(requeued.status, TaskStatus::Queued);
        assert!(matches!(
            coordinator.approve(approved.id).await,
            Err(AgentError::Repository(RepositoryError::InvalidTransition { .. }))
        ));
        assert!(matches!(
            coordinator.reject(Uuid::new_v4(), None).await,
            Err(AgentError::Repository(RepositoryError::NotFound(_)))
        ));

        let audit = coordinator.stores().audit.recent_audit(10).await.unwrap();
        let actions: Vec<&str> = audit.iter().map(|a| a.action.as_str()).collect();
        assert!(actions.contains(&"task:approved"));
        assert!(actions.contains(&"task:rejected"));
        assert!(actions.contains(&"task:assigned"));
    }

    #[tokio::test]
    async fn reset_agent_requires_error_state() {
        let coordinator = coordinator();
        add(
            &coordinator,
            "general",
            &[],
            Arc::new(ScriptedClient::new([ScriptStep::Fail("down".to_string())])),
        );

        assert!(matches!(coordinator.reset_agent("nobody"), Err(AgentError::UnknownAgent(_))));
        assert!(matches!(coordinator.reset_agent("general"), Err(AgentError::NotInErrorState(_))));

        let task = queued(&coordinator, NewTask::new("Doomed", TaskType::Manual)).await;
        coordinator.assign(task).await.unwrap();
        let state = coordinator.reset_agent("general").unwrap();

        assert_eq!(state.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn poll_once_rescues_queued_tasks() {
        let coordinator = coordinator();
        let a = queued(&coordinator, NewTask::new("A", TaskType::Manual)).await;
        let b = queued(&coordinator, NewTask::new("B", TaskType::Manual)).await;
        assert_eq!(coordinator.poll_once().await.unwrap(), 2);

        add(&coordinator, "one", &[], Arc::new(ScriptedClient::answering("ok")));
        add(&coordinator, "two", &[], Arc::new(ScriptedClient::answering("ok")));
        coordinator.poll_once().await.unwrap();

        let a = wait_for_status(&coordinator, a.id, TaskStatus::Review).await;
        let b = wait_for_status(&coordinator, b.id, TaskStatus::Review).await;
        assert_eq!(a.status, TaskStatus::Review);
        assert_eq!(b.status, TaskStatus::Review);
        assert_ne!(a.assigned_agent, b.assigned_agent);
        assert!(coordinator.agent_states().iter().all(|s| s.is_consistent()));
    }

    #[tokio::test]
    async fn poll_once_returns_while_runs_are_in_flight() {
        let coordinator = coordinator();
        let gate = Arc::new(Notify::new());
        let client = Arc::new(ScriptedClient::answering("done").gated(Arc::clone(&gate)));
        let agent = add(&coordinator, "general", &[], client.clone());
        let task = queued(&coordinator, NewTask::new("Slow", TaskType::Manual)).await;

        tokio::time::timeout(Duration::from_secs(1), coordinator.poll_once())
            .await
            .expect("poll pass should not wait for the run")
            .unwrap();

        assert_eq!(status_of(&coordinator, task.id).await.status, TaskStatus::Running);
        assert_eq!(agent.status(), AgentStatus::Busy);
        gate.notify_one();
        let task = wait_for_status(&coordinator, task.id, TaskStatus::Review).await;
        assert_eq!(task.status, TaskStatus::Review);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn poll_once_claims_in_priority_order() {
        for _ in 0..20 {
            let coordinator = coordinator();
            let client = Arc::new(ScriptedClient::answering("done"));
            add(&coordinator, "general", &[], client.clone());
            for i in 0..9 {
                let input = NewTask::new(format!("Low{}", i), TaskType::Manual)
                    .with_priority(Priority::LEAST_URGENT);
                queued(&coordinator, input).await;
            }
            let urgent = queued(
                &coordinator,
                NewTask::new("Urgent", TaskType::Manual).with_priority(Priority::MOST_URGENT),
            )
            .await;

            coordinator.poll_once().await.unwrap();
            wait_for_status(&coordinator, urgent.id, TaskStatus::Review).await;

            let first = client.requests()[0].messages[0].content.clone();
            assert!(first.starts_with("Task: Urgent\n"), "first run was {:?}", first);
        }
    }

    #[tokio::test]
    async fn events_are_forwarded_until_unsubscribed() {
        let coordinator = coordinator();
        add(&coordinator, "general", &[], Arc::new(ScriptedClient::answering("ok")));
        let (subscription, mut rx) = coordinator.events().channel();

        let task = queued(&coordinator, NewTask::new("Observe", TaskType::Manual)).await;
        coordinator.assign(task).await.unwrap();
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind());
        }
        assert_eq!(kinds.first(), Some(&"status_changed"));
        assert_eq!(kinds.last(), Some(&"task_completed"));

        assert!(coordinator.unsubscribe(subscription));
        let task = queued(&coordinator, NewTask::new("Unobserved", TaskType::Manual)).await;
        coordinator.assign(task).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn submit_queues_then_assigns_in_background() {
        let coordinator = coordinator();
        add(&coordinator, "general", &[], Arc::new(ScriptedClient::answering("ok")));

        let task = coordinator
            .submit(NewTask::new("Background", TaskType::Reactive).requiring_approval(false))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Queued);

        let mut status = TaskStatus::Queued;
        for _ in 0..200 {
            status = status_of(&coordinator, task.id).await.status;
            if status == TaskStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn register_definition_falls_back_to_offline() {
        let coordinator = coordinator();
        let missing_key = ModelConfig {
            id: "remote".to_string(),
            provider: Provider::Anthropic,
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "AGENTDESK_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            cost_per_input_token: 0.0,
            cost_per_output_token: 0.0,
            base_url: None,
        };
        let local = ModelConfig {
            id: "local".to_string(),
            provider: Provider::Ollama,
            model: "llama3".to_string(),
            ..missing_key.clone()
        };
        let only_remote = ModelsConfig {
            primary: "remote".to_string(),
            fallback: "remote".to_string(),
            models: HashMap::from([("remote".to_string(), missing_key.clone())]),
        };
        let with_local = ModelsConfig {
            primary: "remote".to_string(),
            fallback: "local".to_string(),
            models: HashMap::from([
                ("remote".to_string(), missing_key),
                ("local".to_string(), local),
            ]),
        };

        let offline = coordinator
            .register_definition(definition("offline", &[]), &only_remote)
            .unwrap();
        let online = coordinator
            .register_definition(definition("online", &[]), &with_local)
            .unwrap();

        assert_eq!(offline.status(), AgentStatus::Offline);
        assert_eq!(online.status(), AgentStatus::Idle);
    }
}
