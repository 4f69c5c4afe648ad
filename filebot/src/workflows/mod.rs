//! Workflow state machines.
//!
//! Each workflow kind implements [`Workflow`]. The dispatcher asks every
//! workflow whether it is waiting for an event of a given shape and hands
//! the event to the first one that is.

pub mod file_convert;
pub mod image_to_pdf;
pub mod merge_pdf;
pub mod pdf_to_image;
pub mod resize;
pub mod split_pdf;
pub mod unarchive;

use crate::backends::Backends;
use crate::error::{WorkflowError, WorkflowResult};
use crate::message::{ChatId, EventShape, InboundEvent};
use crate::session::{SessionStore, WorkflowInstance, WorkflowKind, WorkflowState};
use crate::traits::{TransferObserver, Transport};
use crate::workspace::Workspace;
use async_trait::async_trait;
use filebot_common::logging::generate_instance_id;
use filebot_common::LimitsConfig;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Collaborators shared by every workflow.
pub struct WorkflowContext {
    pub transport: Arc<dyn Transport>,
    pub store: Arc<SessionStore>,
    pub workspace: Arc<Workspace>,
    pub backends: Arc<Backends>,
    pub limits: LimitsConfig,
    jobs: TaskTracker,
}

impl WorkflowContext {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<SessionStore>,
        workspace: Arc<Workspace>,
        backends: Arc<Backends>,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            transport,
            store,
            workspace,
            backends,
            limits,
            jobs: TaskTracker::new(),
        }
    }

    /// Send a plain message. Failures are logged, never returned.
    pub async fn say(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.transport.send_text(chat, text).await {
            tracing::warn!(chat_id = chat, error = %e, "Failed to send message");
        }
    }

    /// Create an instance with a fresh scratch directory.
    pub fn new_instance(&self, chat: ChatId, state: WorkflowState) -> WorkflowResult<WorkflowInstance> {
        let id = generate_instance_id();
        let scratch = self.workspace.scratch(state.kind(), chat, &id)?;
        tracing::debug!(chat_id = chat, kind = %state.kind(), instance_id = %id, "Workflow instance created");
        Ok(WorkflowInstance::new(id, state, scratch))
    }

    /// Store `instance`, cancelling whatever instance of the same kind it
    /// replaces.
    pub fn replace_instance(&self, chat: ChatId, instance: WorkflowInstance) {
        if let Some(old) = self.store.put(chat, instance) {
            tracing::info!(chat_id = chat, kind = %old.kind(), instance_id = %old.id, "Workflow restarted");
            old.cancel.cancel();
        }
    }

    /// Store `instance` unless the chat already runs one of the same kind.
    pub fn insert_exclusive(&self, chat: ChatId, instance: WorkflowInstance) -> WorkflowResult<()> {
        self.store.try_insert(chat, instance).map_err(|rejected| {
            WorkflowError::Busy(format!(
                "Sorry, another {} is currently in progress. Please wait or use /cancel.",
                rejected.kind().display_name()
            ))
        })
    }

    /// Run a workflow step in the background.
    ///
    /// Errors are reported to the chat, and the instance is removed from the
    /// store when the step ends, unless a newer instance replaced it.
    pub fn spawn_job<F>(self: &Arc<Self>, chat: ChatId, instance: &WorkflowInstance, job: F)
    where
        F: Future<Output = WorkflowResult<()>> + Send + 'static,
    {
        let ctx = Arc::clone(self);
        let kind = instance.kind();
        let instance_id = instance.id.clone();

        self.jobs.spawn(async move {
            match job.await {
                Ok(()) => {
                    tracing::info!(chat_id = chat, kind = %kind, instance_id = %instance_id, "Job finished");
                }
                Err(WorkflowError::Cancelled) => {
                    tracing::info!(chat_id = chat, kind = %kind, instance_id = %instance_id, "Job cancelled");
                }
                Err(e) => {
                    tracing::error!(
                        chat_id = chat,
                        kind = %kind,
                        instance_id = %instance_id,
                        error = %e,
                        "Job failed"
                    );
                    if let Some(msg) = e.user_message() {
                        ctx.say(chat, &msg).await;
                    }
                }
            }
            ctx.store.remove_if(chat, kind, &instance_id);
        });
    }

    /// Wait for every background job spawned so far.
    pub async fn drain_jobs(&self) {
        self.jobs.close();
        self.jobs.wait().await;
        self.jobs.reopen();
    }

    /// Download a file, giving up as soon as `cancel` fires.
    pub async fn download(
        &self,
        cancel: &CancellationToken,
        file_id: &str,
        dest: &Path,
        observer: Option<&dyn TransferObserver>,
    ) -> WorkflowResult<u64> {
        tokio::select! {
            _ = cancel.cancelled() => Err(WorkflowError::Cancelled),
            result = self.transport.download_file(file_id, dest, observer) => Ok(result?),
        }
    }
}

/// Fail with `Cancelled` once the instance has been cancelled.
pub fn checkpoint(cancel: &CancellationToken) -> WorkflowResult<()> {
    if cancel.is_cancelled() {
        Err(WorkflowError::Cancelled)
    } else {
        Ok(())
    }
}

/// One conversational workflow.
#[async_trait]
pub trait Workflow: Send + Sync {
    fn kind(&self) -> WorkflowKind;

    fn context(&self) -> &WorkflowContext;

    /// Whether this workflow is waiting for an event of `shape` from `chat`.
    fn awaits(&self, chat: ChatId, shape: EventShape) -> bool;

    /// Handle the command that starts the workflow.
    async fn start(&self, event: &InboundEvent) -> WorkflowResult<()>;

    /// Handle a follow-up event.
    async fn handle(&self, event: &InboundEvent) -> WorkflowResult<()>;

    /// Tear down the chat's instance. Returns whether there was one.
    async fn cancel(&self, chat: ChatId) -> bool {
        match self.context().store.remove(chat, self.kind()) {
            Some(instance) => {
                instance.cancel.cancel();
                tracing::info!(chat_id = chat, kind = %self.kind(), instance_id = %instance.id, "Workflow cancelled");
                true
            }
            None => false,
        }
    }
}
