//! Manager implementation: task queue and correlation engine

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::codec;
use crate::dispatch::{Dispatcher, Sender, SenderId};
use crate::domain::{
    CorrelationId, FunctionsConfiguration, ManagerKey, SharedConfiguration, TaskParameter, TaskResult,
};
use crate::error::{FunctionsError, Result};
use crate::live::{self, Context, LiveObject};

use super::submission::{Deadline, PendingTask, Submission, ValidSubmission, abandoned};

/// Registered sender and its capability table
struct SenderEntry {
    // Held so the identity key stays unique while registered
    _sender: Arc<dyn Sender>,
    dispatcher: Arc<Dispatcher>,
}

/// Waiter of one request and the deadline armed for it
struct PendingEntry {
    waiter: oneshot::Sender<TaskResult>,
    deadline: Option<Deadline>,
}

/// Pending requests and registered senders, updated together under one lock
#[derive(Default)]
struct ManagerInner {
    pending: HashMap<CorrelationId, PendingEntry>,
    senders: HashMap<SenderId, SenderEntry>,
    closed: bool,
}

struct Shared {
    key: ManagerKey,
    configuration: SharedConfiguration,
    queue_tx: mpsc::UnboundedSender<TaskParameter>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<TaskParameter>>,
    inner: Mutex<ManagerInner>,
    // Serializes sender registration; taken before `inner`, never while holding it
    registration: Mutex<()>,
}

/// Task queue and correlation engine for one (component, state machine)
///
/// Cheap to clone; all clones share the same queue and pending set.
#[derive(Clone)]
pub struct Manager {
    shared: Arc<Shared>,
}

impl Manager {
    /// Standalone manager with its own (unbounded) configuration
    pub fn new(component_name: impl Into<String>, state_machine_name: impl Into<String>) -> Self {
        Self::with_configuration(component_name, state_machine_name, SharedConfiguration::default())
    }

    /// Manager reading the given shared configuration
    pub fn with_configuration(
        component_name: impl Into<String>,
        state_machine_name: impl Into<String>,
        configuration: SharedConfiguration,
    ) -> Self {
        let key = ManagerKey::new(component_name, state_machine_name);
        debug!(%key, "Manager::with_configuration: called");
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                key,
                configuration,
                queue_tx,
                queue_rx: Mutex::new(queue_rx),
                inner: Mutex::new(ManagerInner::default()),
                registration: Mutex::new(()),
            }),
        }
    }

    pub fn key(&self) -> &ManagerKey {
        &self.shared.key
    }

    pub fn component_name(&self) -> &str {
        &self.shared.key.component_name
    }

    pub fn state_machine_name(&self) -> &str {
        &self.shared.key.state_machine_name
    }

    /// Configuration currently in force
    pub fn configuration(&self) -> FunctionsConfiguration {
        self.shared.configuration.get()
    }

    /// Whether both handles refer to the same manager
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Queue a function call and return a handle to its outcome
    ///
    /// Validation happens before anything is queued. The deadline, if any, is
    /// armed now from the configuration in force.
    pub fn submit(&self, submission: Submission) -> Result<PendingTask> {
        let submission = submission.validate()?;
        self.submit_valid(&submission)
    }

    /// Queue a function call, then apply its result to the live objects
    ///
    /// The returned future resolves after members are updated and the send
    /// instructions are dispatched.
    pub fn submit_and_apply(
        &self,
        submission: Submission,
    ) -> Result<impl Future<Output = Result<TaskResult>> + Send + 'static> {
        let submission = submission.validate()?;
        let pending = self.submit_valid(&submission)?;
        let manager = self.clone();

        Ok(async move {
            let result = pending.wait().await;
            debug!(correlation_id = %result.correlation_id, is_error = result.is_error, "submit_and_apply: applying");
            manager.apply_function_result(
                Some(&result),
                Some(submission.public_member.as_ref()),
                Some(submission.internal_member.as_ref()),
                Some(&submission.context),
                &submission.sender,
            )?;
            Ok(result)
        })
    }

    fn submit_valid(&self, submission: &ValidSubmission) -> Result<PendingTask> {
        let correlation_id = CorrelationId::generate();
        debug!(key = %self.shared.key, %correlation_id, function_name = %submission.function_name, "Manager::submit: called");

        let parameter = TaskParameter {
            correlation_id: correlation_id.clone(),
            component_name: self.component_name().to_string(),
            state_machine_name: self.state_machine_name().to_string(),
            function_name: submission.function_name.clone(),
            event: submission.event.clone(),
            public_member: submission.public_member.encode()?,
            internal_member: submission.internal_member.encode()?,
        };

        let deadline = self.shared.configuration.get().timeout_in_millis.and_then(|millis| {
            let timeout = FunctionsConfiguration::with_timeout_ms(millis).timeout()?;
            Some(Deadline {
                at: Instant::now() + timeout,
                millis,
            })
        });

        self.register_sender(&submission.sender)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.shared.inner.lock();
            if inner.closed {
                return Err(self.closed_error());
            }
            inner.pending.insert(correlation_id.clone(), PendingEntry { waiter: tx, deadline });
        }

        // Pending before queued, so a fast worker can never resolve an unknown id
        if self.shared.queue_tx.send(parameter).is_err() {
            self.shared.inner.lock().pending.remove(&correlation_id);
            return Err(FunctionsError::Validation(format!(
                "Task queue for {} is closed",
                self.shared.key
            )));
        }

        Ok(PendingTask {
            manager: self.clone(),
            correlation_id,
            rx,
            deadline,
        })
    }

    fn closed_error(&self) -> FunctionsError {
        FunctionsError::Validation(format!(
            "Manager for component '{}' and state machine '{}' is closed",
            self.component_name(),
            self.state_machine_name()
        ))
    }

    /// Build the sender's capability table once per sender identity
    ///
    /// `Sender::register` runs without the manager lock held, so it may read
    /// this manager's state. It must not submit to it.
    fn register_sender(&self, sender: &Arc<dyn Sender>) -> Result<()> {
        let id = SenderId::of(sender);
        let _registration = self.shared.registration.lock();
        {
            let inner = self.shared.inner.lock();
            if inner.closed {
                return Err(self.closed_error());
            }
            if inner.senders.contains_key(&id) {
                return Ok(());
            }
        }

        debug!(?id, "Manager::register_sender: building dispatcher");
        let dispatcher = Arc::new(Dispatcher::build(Arc::clone(sender)));
        self.shared.inner.lock().senders.entry(id).or_insert(SenderEntry {
            _sender: Arc::clone(sender),
            dispatcher,
        });
        Ok(())
    }

    /// Take the oldest queued task, if any; never blocks
    pub fn dequeue(&self) -> Option<TaskParameter> {
        let task = self.shared.queue_rx.lock().try_recv().ok();
        if let Some(ref task) = task {
            debug!(key = %self.shared.key, correlation_id = %task.correlation_id, "Manager::dequeue: handing out task");
        }
        task
    }

    /// Resolve a pending request; `None` models an absent result body
    pub fn resolve_result(&self, result: Option<TaskResult>) -> Result<()> {
        let result = result.ok_or_else(|| FunctionsError::missing("Result"))?;
        self.resolve(result)
    }

    /// Wake the one waiter registered for the result's correlation id
    pub fn resolve(&self, result: TaskResult) -> Result<()> {
        let correlation_id = result.correlation_id.clone();
        debug!(key = %self.shared.key, %correlation_id, "Manager::resolve: called");

        // Removal and delivery under one lock: the timeout path relies on it
        let mut inner = self.shared.inner.lock();
        let Some(entry) = inner.pending.remove(&correlation_id) else {
            warn!(key = %self.shared.key, %correlation_id, "Rejecting result for unknown request id");
            return Err(FunctionsError::UnknownRequest(correlation_id));
        };

        // Past the deadline the request has already timed out, whether or not its waiter noticed
        if let Some(deadline) = entry.deadline.filter(|d| Instant::now() >= d.at) {
            warn!(key = %self.shared.key, %correlation_id, timeout_ms = deadline.millis, "Rejecting result after deadline");
            let _ = entry.waiter.send(self.timed_out(&correlation_id, deadline.millis));
            return Err(FunctionsError::UnknownRequest(correlation_id));
        }

        if entry.waiter.send(result).is_err() {
            debug!(%correlation_id, "Manager::resolve: waiter already gone");
        }
        Ok(())
    }

    fn timed_out(&self, correlation_id: &CorrelationId, millis: i64) -> TaskResult {
        TaskResult {
            component_name: self.component_name().to_string(),
            state_machine_name: self.state_machine_name().to_string(),
            ..TaskResult::error(correlation_id.clone(), format!("Timeout exceeded ({millis} ms)"))
        }
    }

    /// Drop the pending entry of a request nobody waits for any more
    pub(crate) fn forget(&self, correlation_id: &CorrelationId) {
        if self.shared.inner.lock().pending.remove(correlation_id).is_some() {
            debug!(key = %self.shared.key, %correlation_id, "Manager::forget: waiter dropped before completion");
        }
    }

    /// Resolve a timed-out request, unless a result won the race
    pub(crate) fn expire(
        &self,
        correlation_id: &CorrelationId,
        millis: i64,
        rx: &mut oneshot::Receiver<TaskResult>,
    ) -> TaskResult {
        let removed = self.shared.inner.lock().pending.remove(correlation_id).is_some();
        if removed {
            warn!(key = %self.shared.key, %correlation_id, timeout_ms = millis, "Request timed out");
            return self.timed_out(correlation_id, millis);
        }

        // The resolver removed the entry first and has already sent under the lock
        match rx.try_recv() {
            Ok(result) => result,
            Err(_) => abandoned(self, correlation_id.clone()),
        }
    }

    /// Copy a result onto live members, then fire its send instructions
    ///
    /// `sender` must have been registered by a prior submit on this manager.
    pub fn apply_function_result(
        &self,
        result: Option<&TaskResult>,
        public_member: Option<&dyn LiveObject>,
        internal_member: Option<&dyn LiveObject>,
        context: Option<&Context>,
        sender: &Arc<dyn Sender>,
    ) -> Result<()> {
        let result = result.ok_or_else(|| FunctionsError::missing("Result"))?;
        debug!(key = %self.shared.key, correlation_id = %result.correlation_id, "Manager::apply_function_result: called");

        let dispatcher = self
            .shared
            .inner
            .lock()
            .senders
            .get(&SenderId::of(sender))
            .map(|entry| Arc::clone(&entry.dispatcher))
            .ok_or_else(|| {
                FunctionsError::Validation("Sender object received from worker not found in registered senders".to_string())
            })?;

        let context = context.ok_or_else(|| FunctionsError::missing("Context"))?;

        if let (Some(target), Some(payload)) = (public_member, codec::present(result.public_member.as_ref())) {
            live::apply_payload("public member", target, payload)?;
        }
        if let (Some(target), Some(payload)) = (internal_member, codec::present(result.internal_member.as_ref())) {
            live::apply_payload("internal member", target, payload)?;
        }

        dispatcher.dispatch(&result.send_instructions, context)
    }

    /// Number of requests awaiting a result
    pub fn pending_count(&self) -> usize {
        self.shared.inner.lock().pending.len()
    }

    /// Number of tasks not yet dequeued
    pub fn queued_count(&self) -> usize {
        self.shared.queue_rx.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.inner.lock().closed
    }

    /// Tear down: reject new submissions, abandon pending requests, drop queued tasks
    ///
    /// Registered senders are kept so abandoned `submit_and_apply` callers can
    /// still complete with their error result. Returns the number of abandoned
    /// requests.
    pub fn close(&self) -> usize {
        let abandoned = {
            let mut inner = self.shared.inner.lock();
            inner.closed = true;
            inner.pending.drain().count()
        };

        let mut rx = self.shared.queue_rx.lock();
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }

        info!(key = %self.shared.key, abandoned, dropped, "Manager closed");
        abandoned
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager").field("key", &self.shared.key).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::CapabilityTable;
    use crate::domain::SendInstruction;
    use crate::live::{Live, context};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct PublicMember {
        #[serde(rename = "State")]
        state: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct InternalMember {
        #[serde(rename = "Counter")]
        counter: u32,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct DoEvent {
        #[serde(rename = "Value")]
        value: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct UndoEvent {
        #[serde(rename = "Value")]
        value: String,
    }

    #[derive(Default)]
    struct TestSender {
        calls: parking_lot::Mutex<Vec<String>>,
        registrations: AtomicUsize,
    }

    impl Sender for TestSender {
        fn register(self: Arc<Self>, table: &mut CapabilityTable) {
            self.registrations.fetch_add(1, Ordering::SeqCst);
            let this = Arc::clone(&self);
            table.directed("Do", move |_: &Context, evt: Option<DoEvent>, topic: Option<&str>| {
                this.calls
                    .lock()
                    .push(format!("Do({},{topic:?})", evt.map(|e| e.value).unwrap_or_default()));
            });
            let this = Arc::clone(&self);
            table.broadcast("Undo", move |evt: Option<UndoEvent>| {
                this.calls
                    .lock()
                    .push(format!("SendEvent({})", evt.map(|e| e.value).unwrap_or_default()));
            });
            let this = Arc::clone(&self);
            table.directed("Reply", move |_: &Context, evt: Option<serde_json::Value>, _| {
                this.calls.lock().push(format!("Reply({})", evt.is_none()));
            });
        }
    }

    fn full_submission(sender: &Arc<TestSender>) -> Submission {
        let sender: Arc<dyn Sender> = sender.clone();
        Submission::new("function")
            .event(&json!({"Kind": "Start"}))
            .public_member(Live::new(PublicMember::default()))
            .internal_member(Live::new(InternalMember::default()))
            .context(context("ctx"))
            .sender(sender)
    }

    #[tokio::test]
    async fn test_submit_puts_task_on_queue() {
        let manager = Manager::new("component", "statemachine");
        let sender = Arc::new(TestSender::default());
        let public = Live::new(PublicMember {
            state: "before".to_string(),
        });
        let dyn_sender: Arc<dyn Sender> = sender.clone();

        let _pending = manager
            .submit(
                Submission::new("function")
                    .event(&json!({"Kind": "Start"}))
                    .public_member(public.clone())
                    .internal_member(Live::new(InternalMember { counter: 3 }))
                    .context(context(()))
                    .sender(dyn_sender),
            )
            .unwrap();

        let task = manager.dequeue().unwrap();
        assert_eq!(task.component_name, "component");
        assert_eq!(task.state_machine_name, "statemachine");
        assert_eq!(task.function_name, "function");
        assert_eq!(task.event, json!({"Kind": "Start"}));
        assert_eq!(task.public_member, json!({"State": "before"}));
        assert_eq!(task.internal_member, json!({"Counter": 3}));
        assert!(!task.correlation_id.as_str().is_empty());
        assert_eq!(manager.pending_count(), 1);
        assert!(manager.dequeue().is_none());
    }

    #[tokio::test]
    async fn test_queued_snapshot_ignores_later_mutation() {
        let manager = Manager::new("c", "sm");
        let sender: Arc<dyn Sender> = Arc::new(TestSender::default());
        let public = Live::new(PublicMember {
            state: "before".to_string(),
        });

        let _pending = manager
            .submit(
                Submission::new("f")
                    .event(&json!(null))
                    .public_member(public.clone())
                    .internal_member(Live::new(InternalMember::default()))
                    .context(context(()))
                    .sender(sender),
            )
            .unwrap();
        public.write().state = "mutated".to_string();

        assert_eq!(manager.dequeue().unwrap().public_member, json!({"State": "before"}));
    }

    #[test]
    fn test_missing_arguments_are_named() {
        let manager = Manager::new("component", "statemachine");
        let sender = Arc::new(TestSender::default());
        let dyn_sender: Arc<dyn Sender> = sender.clone();

        let cases: Vec<(Submission, &str)> = vec![
            (
                Submission::new("f")
                    .public_member(Live::new(PublicMember::default()))
                    .internal_member(Live::new(InternalMember::default()))
                    .context(context(()))
                    .sender(dyn_sender.clone()),
                "Event",
            ),
            (
                Submission::new("f")
                    .event(&json!({}))
                    .internal_member(Live::new(InternalMember::default()))
                    .context(context(()))
                    .sender(dyn_sender.clone()),
                "Public",
            ),
            (
                Submission::new("f")
                    .event(&json!({}))
                    .public_member(Live::new(PublicMember::default()))
                    .context(context(()))
                    .sender(dyn_sender.clone()),
                "Internal",
            ),
            (
                Submission::new("f")
                    .event(&json!({}))
                    .public_member(Live::new(PublicMember::default()))
                    .internal_member(Live::new(InternalMember::default()))
                    .sender(dyn_sender.clone()),
                "Context",
            ),
            (
                Submission::new("f")
                    .event(&json!({}))
                    .public_member(Live::new(PublicMember::default()))
                    .internal_member(Live::new(InternalMember::default()))
                    .context(context(())),
                "Sender",
            ),
        ];

        for (submission, argument) in cases {
            let err = manager.submit(submission).unwrap_err();
            assert!(err.is_validation());
            assert!(err.to_string().contains(argument), "{err} should name {argument}");
        }

        assert!(manager.dequeue().is_none());
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_returns_posted_result() {
        let manager = Manager::new("component", "statemachine");
        let sender = Arc::new(TestSender::default());

        let pending = manager.submit(full_submission(&sender)).unwrap();
        let task = manager.dequeue().unwrap();

        let posted = TaskResult::for_request(&task)
            .with_public_member(json!("{}"))
            .with_internal_member(json!("{}"));
        manager.resolve(posted.clone()).unwrap();

        assert_eq!(pending.wait().await, posted);
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn test_absent_result_is_rejected() {
        let manager = Manager::new("component", "statemachine");
        let err = manager.resolve_result(None).unwrap_err();
        assert!(err.to_string().contains("null"));
    }

    #[tokio::test]
    async fn test_unknown_request_id_is_rejected() {
        let manager = Manager::new("component", "statemachine");
        let sender = Arc::new(TestSender::default());
        let _pending = manager.submit(full_submission(&sender)).unwrap();
        manager.dequeue().unwrap();

        let forged = TaskResult {
            correlation_id: CorrelationId::from("unknown request id"),
            ..Default::default()
        };
        let err = manager.resolve(forged).unwrap_err();
        assert!(err.to_string().contains("unknown request id"));
        assert_eq!(manager.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_second_resolve_fails() {
        let manager = Manager::new("c", "sm");
        let sender = Arc::new(TestSender::default());
        let pending = manager.submit(full_submission(&sender)).unwrap();
        let task = manager.dequeue().unwrap();

        manager.resolve(TaskResult::for_request(&task)).unwrap();
        let err = manager.resolve(TaskResult::for_request(&task)).unwrap_err();
        assert!(err.to_string().contains(task.correlation_id.as_str()));
        assert!(!pending.wait().await.is_error);
    }

    #[tokio::test]
    async fn test_results_reach_only_their_waiter() {
        let manager = Manager::new("c", "sm");
        let sender = Arc::new(TestSender::default());
        let first = manager.submit(full_submission(&sender)).unwrap();
        let second = manager.submit(full_submission(&sender)).unwrap();

        let task_one = manager.dequeue().unwrap();
        let task_two = manager.dequeue().unwrap();
        assert_eq!(&task_one.correlation_id, first.correlation_id());

        manager
            .resolve(TaskResult::for_request(&task_two).with_public_member(json!({"State": "two"})))
            .unwrap();
        manager
            .resolve(TaskResult::for_request(&task_one).with_public_member(json!({"State": "one"})))
            .unwrap();

        assert_eq!(first.wait().await.public_member, Some(json!({"State": "one"})));
        assert_eq!(second.wait().await.public_member, Some(json!({"State": "two"})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resolves_with_error() {
        let configuration = SharedConfiguration::new(FunctionsConfiguration::with_timeout_ms(100)).unwrap();
        let manager = Manager::with_configuration("c", "sm", configuration);
        let sender = Arc::new(TestSender::default());

        let pending = manager.submit(full_submission(&sender)).unwrap();
        let result = pending.wait().await;

        assert!(result.is_error);
        assert!(result.error_message.unwrap().contains("100"));
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_result_is_rejected_after_timeout() {
        let configuration = SharedConfiguration::new(FunctionsConfiguration::with_timeout_ms(50)).unwrap();
        let manager = Manager::with_configuration("c", "sm", configuration);
        let sender = Arc::new(TestSender::default());

        let pending = manager.submit(full_submission(&sender)).unwrap();
        let task = manager.dequeue().unwrap();
        assert!(pending.wait().await.is_error);

        let err = manager.resolve(TaskResult::for_request(&task)).unwrap_err();
        assert!(matches!(err, FunctionsError::UnknownRequest(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_before_deadline_wins() {
        let configuration = SharedConfiguration::new(FunctionsConfiguration::with_timeout_ms(1_000)).unwrap();
        let manager = Manager::with_configuration("c", "sm", configuration);
        let sender = Arc::new(TestSender::default());

        let pending = manager.submit(full_submission(&sender)).unwrap();
        let task = manager.dequeue().unwrap();

        let worker = manager.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            worker.resolve(TaskResult::for_request(&task)).unwrap();
        });

        assert!(!pending.wait().await.is_error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_armed_at_submission() {
        let configuration = SharedConfiguration::new(FunctionsConfiguration::with_timeout_ms(100)).unwrap();
        let manager = Manager::with_configuration("c", "sm", configuration.clone());
        let sender = Arc::new(TestSender::default());

        let pending = manager.submit(full_submission(&sender)).unwrap();
        configuration.set(FunctionsConfiguration::unbounded()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), pending.wait()).await.unwrap();
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_close_abandons_pending_requests() {
        let manager = Manager::new("c", "sm");
        let sender = Arc::new(TestSender::default());
        let pending = manager.submit(full_submission(&sender)).unwrap();

        assert_eq!(manager.close(), 1);

        let result = pending.wait().await;
        assert!(result.is_error);
        assert!(result.error_message.unwrap().contains("abandoned"));
        assert!(manager.dequeue().is_none());
        assert!(manager.submit(full_submission(&sender)).is_err());
    }

    #[tokio::test]
    async fn test_submit_and_apply_updates_members_and_calls_senders() {
        let manager = Manager::new("component", "statemachine");
        let sender = Arc::new(TestSender::default());
        let dyn_sender: Arc<dyn Sender> = sender.clone();
        let public = Live::new(PublicMember {
            state: "before".to_string(),
        });
        let internal = Live::new(InternalMember { counter: 1 });

        let apply = manager
            .submit_and_apply(
                Submission::new("function")
                    .event(&json!({}))
                    .public_member(public.clone())
                    .internal_member(internal.clone())
                    .context(context("ctx"))
                    .sender(dyn_sender),
            )
            .unwrap();

        let worker = manager.clone();
        tokio::spawn(async move {
            loop {
                if let Some(task) = worker.dequeue() {
                    let result = TaskResult::for_request(&task)
                        .with_public_member(json!("{ \"State\": \"after\" }"))
                        .with_internal_member(json!({"Counter": 2}))
                        .with_instruction(SendInstruction::directed("Do", Some(json!("{ \"Value\": \"do\" }"))))
                        .with_instruction(SendInstruction::broadcast("Undo", Some(json!("{ \"Value\": \"undo\" }"))))
                        .with_instruction(SendInstruction::directed("Reply", None));
                    worker.resolve(result).unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let result = apply.await.unwrap();

        assert!(!result.is_error);
        assert_eq!(public.read().state, "after");
        assert_eq!(internal.read().counter, 2);
        assert_eq!(
            *sender.calls.lock(),
            vec!["Do(do,None)", "SendEvent(undo)", "Reply(true)"]
        );
    }

    #[tokio::test]
    async fn test_sender_registered_once_per_identity() {
        let manager = Manager::new("c", "sm");
        let sender = Arc::new(TestSender::default());

        let _a = manager.submit(full_submission(&sender)).unwrap();
        let _b = manager.submit(full_submission(&sender)).unwrap();
        assert_eq!(sender.registrations.load(Ordering::SeqCst), 1);

        let other = Arc::new(TestSender::default());
        let _c = manager.submit(full_submission(&other)).unwrap();
        assert_eq!(other.registrations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_apply_with_json_object_member() {
        let manager = Manager::new("component", "statemachine");
        let sender = Arc::new(TestSender::default());
        let dyn_sender: Arc<dyn Sender> = sender.clone();
        let _pending = manager.submit(full_submission(&sender)).unwrap();

        let public = Live::new(PublicMember {
            state: "before".to_string(),
        });
        let result = TaskResult::default().with_public_member(json!({"State": "after"}));

        manager
            .apply_function_result(Some(&result), Some(&public), None, Some(&context(())), &dyn_sender)
            .unwrap();

        assert_eq!(public.read().state, "after");
    }

    #[tokio::test]
    async fn test_apply_unknown_send_instruction() {
        let manager = Manager::new("component", "statemachine");
        let sender = Arc::new(TestSender::default());
        let dyn_sender: Arc<dyn Sender> = sender.clone();
        let _pending = manager.submit(full_submission(&sender)).unwrap();

        let result = TaskResult::default().with_instruction(SendInstruction::broadcast(
            "UnknownSender",
            Some(json!("{ \"Value\": \"undo\" }")),
        ));
        let err = manager
            .apply_function_result(Some(&result), None, None, Some(&context(())), &dyn_sender)
            .unwrap_err();

        assert!(err.to_string().contains("UnknownSender"));
    }

    #[tokio::test]
    async fn test_apply_decode_failure_names_payload() {
        let manager = Manager::new("component", "statemachine");
        let sender = Arc::new(TestSender::default());
        let dyn_sender: Arc<dyn Sender> = sender.clone();
        let _pending = manager.submit(full_submission(&sender)).unwrap();

        let public = Live::new(PublicMember {
            state: "before".to_string(),
        });
        let result = TaskResult::default().with_public_member(json!("Hello"));
        let err = manager
            .apply_function_result(Some(&result), Some(&public), None, Some(&context(())), &dyn_sender)
            .unwrap_err();

        assert!(err.to_string().contains("Hello"));
        assert_eq!(public.read().state, "before");
    }

    #[tokio::test]
    async fn test_apply_requires_result_context_and_known_sender() {
        let manager = Manager::new("component", "statemachine");
        let sender = Arc::new(TestSender::default());
        let dyn_sender: Arc<dyn Sender> = sender.clone();

        let stranger: Arc<dyn Sender> = Arc::new(TestSender::default());
        let err = manager
            .apply_function_result(Some(&TaskResult::default()), None, None, Some(&context(())), &stranger)
            .unwrap_err();
        assert!(err.to_string().contains("Sender"));

        let _pending = manager.submit(full_submission(&sender)).unwrap();

        let err = manager
            .apply_function_result(None, None, None, Some(&context(())), &dyn_sender)
            .unwrap_err();
        assert!(err.to_string().contains("Result"));

        let err = manager
            .apply_function_result(Some(&TaskResult::default()), None, None, None, &dyn_sender)
            .unwrap_err();
        assert!(err.to_string().contains("Context"));
    }

    fn timed_manager(millis: i64) -> Manager {
        let configuration = SharedConfiguration::new(FunctionsConfiguration::with_timeout_ms(millis)).unwrap();
        Manager::with_configuration("c", "sm", configuration)
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_past_deadline_is_rejected_before_waiter_wakes() {
        let manager = timed_manager(100);
        let sender = Arc::new(TestSender::default());
        let dyn_sender: Arc<dyn Sender> = sender.clone();
        let public = Live::new(PublicMember {
            state: "before".to_string(),
        });

        let apply = manager
            .submit_and_apply(
                Submission::new("function")
                    .event(&json!({}))
                    .public_member(public.clone())
                    .internal_member(Live::new(InternalMember::default()))
                    .context(context(()))
                    .sender(dyn_sender),
            )
            .unwrap();
        let task = manager.dequeue().unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        let late = TaskResult::for_request(&task)
            .with_public_member(json!({"State": "late"}))
            .with_instruction(SendInstruction::broadcast("Undo", None));
        let err = manager.resolve(late).unwrap_err();
        assert!(matches!(err, FunctionsError::UnknownRequest(_)));

        let result = apply.await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.error_message.as_deref(), Some("Timeout exceeded (100 ms)"));
        assert_eq!(public.read().state, "before");
        assert!(sender.calls.lock().is_empty());
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_holds_under_concurrent_traffic() {
        let manager = timed_manager(100);
        let sender = Arc::new(TestSender::default());

        let target = manager.submit(full_submission(&sender)).unwrap();
        let target_id = target.correlation_id().clone();

        let worker = manager.clone();
        let traffic_sender = sender.clone();
        let traffic = tokio::spawn(async move {
            let mut completed = 0;
            for _ in 0..50 {
                let pending = worker.submit(full_submission(&traffic_sender)).unwrap();
                while let Some(task) = worker.dequeue() {
                    if task.correlation_id != target_id {
                        worker.resolve(TaskResult::for_request(&task)).unwrap();
                    }
                }
                if !pending.wait().await.is_error {
                    completed += 1;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            completed
        });

        let result = target.wait().await;
        assert!(result.is_error);
        assert_eq!(result.error_message.as_deref(), Some("Timeout exceeded (100 ms)"));
        assert_eq!(traffic.await.unwrap(), 50);
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_handle_releases_pending_entry() {
        let manager = timed_manager(60_000);
        let sender = Arc::new(TestSender::default());

        let pending = manager.submit(full_submission(&sender)).unwrap();
        let task = manager.dequeue().unwrap();
        assert_eq!(manager.pending_count(), 1);

        drop(pending);
        assert_eq!(manager.pending_count(), 0);
        let err = manager.resolve(TaskResult::for_request(&task)).unwrap_err();
        assert!(matches!(err, FunctionsError::UnknownRequest(_)));

        let apply = manager.submit_and_apply(full_submission(&sender)).unwrap();
        assert_eq!(manager.pending_count(), 1);
        drop(apply);
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_close_completes_submit_and_apply_with_abandoned_result() {
        let manager = Manager::new("c", "sm");
        let sender = Arc::new(TestSender::default());

        let apply = manager.submit_and_apply(full_submission(&sender)).unwrap();
        assert_eq!(manager.close(), 1);

        let result = tokio::time::timeout(Duration::from_secs(5), apply)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_error);
        assert!(result.error_message.unwrap().contains("abandoned"));
        assert!(sender.calls.lock().is_empty());
    }

    struct ReentrantSender {
        manager: Manager,
        pending_seen: AtomicUsize,
    }

    impl Sender for ReentrantSender {
        fn register(self: Arc<Self>, table: &mut CapabilityTable) {
            self.pending_seen.store(self.manager.pending_count(), Ordering::SeqCst);
            assert!(!self.manager.is_closed());
            table.broadcast("Ping", |_: Option<serde_json::Value>| {});
        }
    }

    #[tokio::test]
    async fn test_sender_registration_may_call_back_into_manager() {
        let manager = Manager::new("c", "sm");
        let _first = manager.submit(full_submission(&Arc::new(TestSender::default()))).unwrap();

        let sender = Arc::new(ReentrantSender {
            manager: manager.clone(),
            pending_seen: AtomicUsize::new(usize::MAX),
        });
        let dyn_sender: Arc<dyn Sender> = sender.clone();

        let worker = manager.clone();
        let registering = Arc::clone(&dyn_sender);
        let submit = tokio::task::spawn_blocking(move || {
            worker.submit(
                Submission::new("f")
                    .event(&json!({}))
                    .public_member(Live::new(PublicMember::default()))
                    .internal_member(Live::new(InternalMember::default()))
                    .context(context(()))
                    .sender(registering),
            )
        });
        let _second = tokio::time::timeout(Duration::from_secs(5), submit)
            .await
            .expect("submit did not return while the sender registered")
            .unwrap()
            .unwrap();

        assert_eq!(sender.pending_seen.load(Ordering::SeqCst), 1);
        assert_eq!(manager.pending_count(), 2);

        let ping = TaskResult::default().with_instruction(SendInstruction::broadcast("Ping", None));
        manager
            .apply_function_result(Some(&ping), None, None, Some(&context(())), &dyn_sender)
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_string_members_leave_targets_unchanged() {
        let manager = Manager::new("component", "statemachine");
        let sender = Arc::new(TestSender::default());
        let dyn_sender: Arc<dyn Sender> = sender.clone();
        let _pending = manager.submit(full_submission(&sender)).unwrap();

        let public = Live::new(PublicMember {
            state: "before".to_string(),
        });
        let internal = Live::new(InternalMember { counter: 7 });
        let result = TaskResult::default()
            .with_public_member(json!(""))
            .with_internal_member(json!(""));

        manager
            .apply_function_result(Some(&result), Some(&public), Some(&internal), Some(&context(())), &dyn_sender)
            .unwrap();

        assert_eq!(public.read().state, "before");
        assert_eq!(internal.read().counter, 7);
    }

    #[tokio::test]
    async fn test_concurrent_submits_are_each_dequeued_once() {
        let manager = Manager::new("c", "sm");
        let sender = Arc::new(TestSender::default());

        let mut handles = Vec::new();
        for _ in 0..50 {
            let manager = manager.clone();
            let sender = sender.clone();
            handles.push(tokio::spawn(async move { manager.submit(full_submission(&sender)).unwrap() }));
        }
        let pending: Vec<PendingTask> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|h| h.unwrap())
            .collect();
        let submitted: HashSet<CorrelationId> = pending.iter().map(|p| p.correlation_id().clone()).collect();

        let mut seen = HashSet::new();
        while let Some(task) = manager.dequeue() {
            assert!(seen.insert(task.correlation_id));
        }

        assert_eq!(submitted.len(), 50);
        assert_eq!(seen, submitted);
        assert_eq!(manager.pending_count(), 50);
    }
}
