//! Split a PDF into one document per page.

use super::{checkpoint, Workflow, WorkflowContext};
use crate::backends::pdf::PageSplitter;
use crate::error::{WorkflowError, WorkflowResult};
use crate::message::{ChatId, DocumentInfo, EventShape, InboundEvent};
use crate::progress::{PercentObserver, ProgressCursor};
use crate::session::{JobState, WorkflowInstance, WorkflowKind, WorkflowState};
use async_trait::async_trait;
use std::sync::Arc;

pub struct SplitPdfWorkflow {
    ctx: Arc<WorkflowContext>,
}

impl SplitPdfWorkflow {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }

    fn validate(&self, event: &InboundEvent) -> WorkflowResult<DocumentInfo> {
        let doc = event
            .reply_to
            .as_ref()
            .and_then(|reply| reply.document.clone())
            .ok_or_else(|| {
                WorkflowError::InvalidInput("Please reply to a PDF file with the /splitpdf command.".into())
            })?;

        if !doc.is_pdf() {
            return Err(WorkflowError::InvalidInput(
                "Invalid file format. Please reply to a valid PDF file.".into(),
            ));
        }

        let limit = self.ctx.limits.split_max_bytes;
        if doc.file_size > limit {
            return Err(WorkflowError::ResourceLimitExceeded(format!(
                "Sorry, the maximum file size allowed is {} MB.",
                limit / (1024 * 1024)
            )));
        }
        Ok(doc)
    }
}

async fn run(
    ctx: Arc<WorkflowContext>,
    chat: ChatId,
    instance: WorkflowInstance,
    doc: DocumentInfo,
) -> WorkflowResult<()> {
    let cursor = ProgressCursor::start(ctx.transport.clone(), chat, "📥 Downloading PDF file...").await;

    match split(&ctx, chat, &instance, &doc, &cursor).await {
        Ok(()) => Ok(()),
        Err(WorkflowError::Cancelled) => {
            cursor.force("❌ PDF splitting cancelled.").await;
            Err(WorkflowError::Cancelled)
        }
        Err(e) => {
            cursor.delete().await;
            Err(e)
        }
    }
}

async fn split(
    ctx: &WorkflowContext,
    chat: ChatId,
    instance: &WorkflowInstance,
    doc: &DocumentInfo,
    cursor: &ProgressCursor,
) -> WorkflowResult<()> {
    let source = instance.scratch.file("source.pdf");
    let observer = PercentObserver::new(cursor, "Downloading");
    ctx.download(&instance.cancel, &doc.file_id, &source, Some(&observer))
        .await?;
    checkpoint(&instance.cancel)?;

    cursor.force("📄 Analyzing PDF file...").await;
    let path = source.clone();
    let splitter = match tokio::task::spawn_blocking(move || PageSplitter::open(&path)).await? {
        Ok(splitter) if splitter.page_count() > 0 => Arc::new(splitter),
        Ok(_) => {
            tracing::warn!(chat_id = chat, file = ?doc.file_name, "PDF has no pages");
            cursor.force("❌ Error: Could not split the PDF. It might be empty.").await;
            return Ok(());
        }
        Err(e) => {
            tracing::warn!(chat_id = chat, file = ?doc.file_name, error = %e, "PDF could not be loaded");
            cursor.force("❌ Error: Could not split the PDF. It might be empty.").await;
            return Ok(());
        }
    };
    let total = splitter.page_count();
    cursor
        .force(&format!("📑 Found {total} pages. Starting split process..."))
        .await;

    for page in 1..=total {
        checkpoint(&instance.cancel)?;

        let dest = instance.scratch.file(&format!("page_{page}.pdf"));
        let (worker, out) = (Arc::clone(&splitter), dest.clone());
        tokio::task::spawn_blocking(move || worker.write_page(page as u32, &out)).await??;

        let pct = page as f64 * 100.0 / total as f64;
        cursor
            .force(&format!("📤 Sending page {page}/{total} ({pct:.1}%)"))
            .await;
        let caption = format!("Page {page} of {total}");
        let sent = ctx.transport.send_document(chat, &dest, Some(&caption)).await;
        let _ = tokio::fs::remove_file(&dest).await;
        sent?;
    }

    ctx.say(chat, "✅ PDF splitting completed successfully!").await;
    Ok(())
}

#[async_trait]
impl Workflow for SplitPdfWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::SplitPdf
    }

    fn context(&self) -> &WorkflowContext {
        &self.ctx
    }

    fn awaits(&self, _chat: ChatId, _shape: EventShape) -> bool {
        false
    }

    async fn start(&self, event: &InboundEvent) -> WorkflowResult<()> {
        let chat = event.chat_id;
        let doc = self.validate(event)?;

        let instance = self.ctx.new_instance(
            chat,
            WorkflowState::SplitPdf(JobState {
                source_name: doc.file_name.clone().unwrap_or_default(),
            }),
        )?;
        self.ctx.insert_exclusive(chat, instance.clone())?;
        tracing::info!(chat_id = chat, instance_id = %instance.id, size = doc.file_size, "Split started");

        let job = run(Arc::clone(&self.ctx), chat, instance.clone(), doc);
        self.ctx.spawn_job(chat, &instance, job);
        Ok(())
    }

    async fn handle(&self, _event: &InboundEvent) -> WorkflowResult<()> {
        Ok(())
    }
}
