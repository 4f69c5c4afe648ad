//! Collect PDFs across several messages and merge them in upload order.

use super::{checkpoint, Workflow, WorkflowContext};
use crate::backends::pdf;
use crate::error::{WorkflowError, WorkflowResult};
use crate::message::{ChatId, DocumentInfo, EventShape, InboundEvent, MessageId};
use crate::progress::ProgressCursor;
use crate::session::{WorkflowInstance, WorkflowKind, WorkflowState};
use async_trait::async_trait;
use filebot_common::util::sanitize_filename;
use std::sync::Arc;

const DEFAULT_MERGED_NAME: &str = "merged.pdf";

/// A PDF accepted for merging. Downloaded only when the merge runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeFile {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MergeState {
    pub files: Vec<MergeFile>,
    pub total_bytes: u64,
    /// Message listing the files received so far
    pub status_message: Option<MessageId>,
    /// Set once the merge has been requested
    pub merging: bool,
}

/// Output file name from user text.
pub fn clean_filename(name: &str) -> String {
    let mut cleaned = sanitize_filename(name);
    if !cleaned.to_lowercase().ends_with(".pdf") {
        cleaned.push_str(".pdf");
    }
    if cleaned.chars().count() <= 4 {
        return DEFAULT_MERGED_NAME.to_string();
    }
    cleaned
}

fn megabytes(bytes: u64) -> u64 {
    bytes / (1024 * 1024)
}

fn received_list(files: &[MergeFile]) -> String {
    let count = files.len();
    let lines: Vec<String> = files
        .iter()
        .enumerate()
        .map(|(i, file)| format!("{}. {}", i + 1, file.file_name))
        .collect();
    format!(
        "✅ {count} PDF{} received:\n{}\n\nSend more PDFs, 'DONE' for default filename, or send custom filename for the merged PDF.",
        if count > 1 { "s" } else { "" },
        lines.join("\n")
    )
}

pub struct MergePdfWorkflow {
    ctx: Arc<WorkflowContext>,
}

impl MergePdfWorkflow {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }

    fn collecting(&self, chat: ChatId) -> Option<WorkflowInstance> {
        self.ctx
            .store
            .get(chat, WorkflowKind::MergePdf)
            .filter(|instance| instance.state.merge().is_some_and(|state| !state.merging))
    }

    fn accept(&self, state: &MergeState, doc: &DocumentInfo) -> WorkflowResult<()> {
        let limits = &self.ctx.limits;
        let is_pdf = doc.mime_type.as_deref() == Some("application/pdf") || doc.is_pdf();
        if !is_pdf {
            return Err(WorkflowError::InvalidInput("❌ Please send only PDF files.".into()));
        }
        if doc.file_size > limits.merge_max_file_bytes {
            return Err(WorkflowError::ResourceLimitExceeded(format!(
                "❌ File size exceeds the limit of {} MB",
                megabytes(limits.merge_max_file_bytes)
            )));
        }
        if state.files.len() >= limits.merge_max_files {
            return Err(WorkflowError::ResourceLimitExceeded(format!(
                "❌ Maximum file limit of {} reached. Send 'DONE' or filename to merge.",
                limits.merge_max_files
            )));
        }
        if state.total_bytes + doc.file_size > limits.merge_max_total_bytes {
            return Err(WorkflowError::ResourceLimitExceeded(format!(
                "❌ Total file size exceeds {} MB limit. Send 'DONE' or filename to merge.",
                megabytes(limits.merge_max_total_bytes)
            )));
        }
        Ok(())
    }

    async fn add_pdf(&self, chat: ChatId, doc: &DocumentInfo) -> WorkflowResult<()> {
        let Some(instance) = self.collecting(chat) else {
            return Ok(());
        };
        let state = instance.state.merge().cloned().unwrap_or_default();
        self.accept(&state, doc)?;

        let file = MergeFile {
            file_id: doc.file_id.clone(),
            file_name: doc
                .file_name
                .clone()
                .unwrap_or_else(|| format!("document_{}.pdf", state.files.len() + 1)),
            file_size: doc.file_size,
        };

        let updated = self.ctx.store.update(chat, WorkflowKind::MergePdf, |instance| {
            instance.state.merge_mut().map(|state| {
                state.files.push(file);
                state.total_bytes += doc.file_size;
                (state.files.clone(), state.status_message.take())
            })
        });
        let Some((files, previous_status)) = updated.flatten() else {
            return Ok(());
        };

        if let Some(old) = previous_status {
            if let Err(e) = self.ctx.transport.delete_message(chat, old).await {
                tracing::debug!(chat_id = chat, error = %e, "Failed to delete merge status");
            }
        }
        let status = self.ctx.transport.send_text(chat, &received_list(&files)).await?;
        self.ctx.store.update(chat, WorkflowKind::MergePdf, |instance| {
            if let Some(state) = instance.state.merge_mut() {
                state.status_message = Some(status);
            }
        });
        tracing::debug!(chat_id = chat, count = files.len(), "PDF queued for merge");
        Ok(())
    }

    async fn complete(&self, chat: ChatId, text: &str) -> WorkflowResult<()> {
        let Some(instance) = self.collecting(chat) else {
            return Ok(());
        };

        let files = self
            .ctx
            .store
            .update(chat, WorkflowKind::MergePdf, |instance| {
                instance.state.merge_mut().map(|state| {
                    state.merging = true;
                    state.files.clone()
                })
            })
            .flatten()
            .unwrap_or_default();

        if files.is_empty() {
            self.ctx.store.remove_if(chat, WorkflowKind::MergePdf, &instance.id);
            return Err(WorkflowError::InvalidInput(
                "❌ No PDFs received. Please send PDFs first.".into(),
            ));
        }

        let text = text.trim();
        let output_name = if text.eq_ignore_ascii_case("done") {
            DEFAULT_MERGED_NAME.to_string()
        } else {
            clean_filename(text)
        };

        tracing::info!(chat_id = chat, count = files.len(), output = %output_name, "Merge requested");
        let job = run(Arc::clone(&self.ctx), chat, instance.clone(), files, output_name);
        self.ctx.spawn_job(chat, &instance, job);
        Ok(())
    }
}

async fn run(
    ctx: Arc<WorkflowContext>,
    chat: ChatId,
    instance: WorkflowInstance,
    files: Vec<MergeFile>,
    output_name: String,
) -> WorkflowResult<()> {
    let cursor = ProgressCursor::start(ctx.transport.clone(), chat, "🔄 Merging PDFs...").await;
    let result = merge(&ctx, chat, &instance, &files, &output_name).await;
    cursor.delete().await;
    result
}

async fn merge(
    ctx: &WorkflowContext,
    chat: ChatId,
    instance: &WorkflowInstance,
    files: &[MergeFile],
    output_name: &str,
) -> WorkflowResult<()> {
    let mut inputs = Vec::with_capacity(files.len());
    for (i, file) in files.iter().enumerate() {
        checkpoint(&instance.cancel)?;
        let dest = instance.scratch.file(&format!("temp_{i}.pdf"));
        ctx.download(&instance.cancel, &file.file_id, &dest, None).await?;
        inputs.push(dest);
    }
    checkpoint(&instance.cancel)?;

    let output = instance.scratch.file(output_name);
    let dest = output.clone();
    let pages = tokio::task::spawn_blocking(move || pdf::merge(&inputs, &dest)).await??;

    let caption = format!(
        "✅ Successfully merged {} PDFs into '{}'!",
        files.len(),
        output_name
    );
    ctx.transport.send_document(chat, &output, Some(&caption)).await?;
    tracing::info!(chat_id = chat, files = files.len(), pages, "PDFs merged");
    Ok(())
}

#[async_trait]
impl Workflow for MergePdfWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::MergePdf
    }

    fn context(&self) -> &WorkflowContext {
        &self.ctx
    }

    fn awaits(&self, chat: ChatId, shape: EventShape) -> bool {
        matches!(shape, EventShape::Document | EventShape::Text) && self.collecting(chat).is_some()
    }

    async fn start(&self, event: &InboundEvent) -> WorkflowResult<()> {
        let chat = event.chat_id;
        let instance = self
            .ctx
            .new_instance(chat, WorkflowState::MergePdf(MergeState::default()))?;
        self.ctx.insert_exclusive(chat, instance)?;

        let limits = &self.ctx.limits;
        self.ctx
            .say(
                chat,
                &format!(
                    "Please send the PDFs one by one (maximum {} files, {}MB each).\n\
                     When finished, you can either:\n\
                     • Send 'DONE' to merge with default filename\n\
                     • Send any other text to use as the merged file's name",
                    limits.merge_max_files,
                    megabytes(limits.merge_max_file_bytes)
                ),
            )
            .await;
        Ok(())
    }

    async fn handle(&self, event: &InboundEvent) -> WorkflowResult<()> {
        let chat = event.chat_id;
        if let Some(doc) = event.document() {
            return self.add_pdf(chat, doc).await;
        }
        match event.text() {
            Some(text) => self.complete(chat, &text).await,
            None => Ok(()),
        }
    }
}
