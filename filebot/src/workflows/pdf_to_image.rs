//! Render every page of a PDF to a PNG.

use super::{checkpoint, Workflow, WorkflowContext};
use crate::backends::pdf;
use crate::error::{WorkflowError, WorkflowResult};
use crate::message::{ChatId, DocumentInfo, EventShape, InboundEvent};
use crate::progress::{PercentObserver, ProgressCursor};
use crate::session::{JobState, WorkflowInstance, WorkflowKind, WorkflowState};
use async_trait::async_trait;
use std::sync::Arc;

pub struct PdfToImageWorkflow {
    ctx: Arc<WorkflowContext>,
}

impl PdfToImageWorkflow {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }

    fn validate(&self, event: &InboundEvent) -> WorkflowResult<DocumentInfo> {
        let reply = event.reply_to.as_ref().ok_or_else(|| {
            WorkflowError::InvalidInput("❌ Please reply to a PDF file with /pdf2image command.".into())
        })?;
        let doc = reply.document.clone().ok_or_else(|| {
            WorkflowError::InvalidInput("❌ Please reply to a PDF file, not a message.".into())
        })?;
        if !doc.is_pdf() {
            return Err(WorkflowError::InvalidInput("❌ The file must be a PDF document.".into()));
        }

        let limit = self.ctx.limits.pdf2image_max_bytes;
        if doc.file_size > limit {
            return Err(WorkflowError::ResourceLimitExceeded(format!(
                "❌ Sorry, the maximum file size allowed is {} MB.",
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
    match convert(&ctx, chat, &instance, &doc, &cursor).await {
        Ok(()) => {
            cursor.delete().await;
            ctx.say(chat, "✅ PDF to image conversion completed.").await;
            Ok(())
        }
        Err(WorkflowError::Cancelled) => {
            cursor.force("❌ PDF to image conversion cancelled.").await;
            Err(WorkflowError::Cancelled)
        }
        Err(e) => {
            cursor.delete().await;
            Err(e)
        }
    }
}

async fn convert(
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

    let path = source.clone();
    let total = tokio::task::spawn_blocking(move || pdf::page_count(&path)).await??;
    cursor
        .force(&format!("📑 Found {total} pages. Starting PDF to image conversion..."))
        .await;

    for page in 1..=total {
        checkpoint(&instance.cancel)?;

        let stem = instance.scratch.file(&format!("page_{page}"));
        let image = ctx.backends.rasterizer.render_page(&source, page, &stem).await?;

        let pct = page as f64 * 100.0 / total as f64;
        cursor
            .force(&format!("📤 Converting and sending page {page}/{total} ({pct:.1}%)"))
            .await;
        let caption = format!("Page {page} of {total}");
        let sent = ctx.transport.send_document(chat, &image, Some(&caption)).await;
        let _ = tokio::fs::remove_file(&image).await;
        sent?;
    }
    Ok(())
}

#[async_trait]
impl Workflow for PdfToImageWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::PdfToImage
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
            WorkflowState::PdfToImage(JobState {
                source_name: doc.file_name.clone().unwrap_or_default(),
            }),
        )?;
        self.ctx.insert_exclusive(chat, instance.clone())?;
        tracing::info!(chat_id = chat, instance_id = %instance.id, "PDF to image started");

        let job = run(Arc::clone(&self.ctx), chat, instance.clone(), doc);
        self.ctx.spawn_job(chat, &instance, job);
        Ok(())
    }

    async fn handle(&self, _event: &InboundEvent) -> WorkflowResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ReplyContext;
    use crate::workflows::testing::*;

    fn reply_with(doc: Option<crate::message::DocumentInfo>) -> InboundEvent {
        replying_to(
            command(4, "pdf2image"),
            ReplyContext {
                message_id: 2,
                photo: None,
                document: doc,
            },
        )
    }

    #[tokio::test]
    async fn test_validation_messages() {
        let h = Harness::new();
        let wf = PdfToImageWorkflow::new(h.ctx.clone());

        let err = wf.start(&command(4, "pdf2image")).await.unwrap_err();
        assert_eq!(
            err.user_message().as_deref(),
            Some("❌ Please reply to a PDF file with /pdf2image command.")
        );
        let err = wf.start(&reply_with(None)).await.unwrap_err();
        assert_eq!(
            err.user_message().as_deref(),
            Some("❌ Please reply to a PDF file, not a message.")
        );
        let err = wf
            .start(&reply_with(Some(document_info("d", "a.docx", "application/msword", 5))))
            .await
            .unwrap_err();
        assert_eq!(err.user_message().as_deref(), Some("❌ The file must be a PDF document."));
    }

    #[tokio::test]
    async fn test_one_image_per_page() {
        let h = Harness::new();
        h.transport.register_file("pdf", pdf_bytes(50, 2));
        let wf = PdfToImageWorkflow::new(h.ctx.clone());

        wf.start(&reply_with(Some(document_info("pdf", "a.pdf", "application/pdf", 100))))
            .await
            .unwrap();
        h.ctx.drain_jobs().await;

        let docs = h.transport.documents();
        let names: Vec<&str> = docs.iter().map(|d| d.0.as_str()).collect();
        assert_eq!(names, vec!["page_1.png", "page_2.png"]);
        assert_eq!(docs[1].1.as_deref(), Some("Page 2 of 2"));
        assert_eq!(
            h.transport.last_text().as_deref(),
            Some("✅ PDF to image conversion completed.")
        );
        assert!(h.ctx.store.is_empty());
        assert!(h.leftover_files().is_empty());
    }

    #[tokio::test]
    async fn test_progress_covers_download_and_page_count() {
        let h = Harness::new();
        h.transport.register_file("pdf", pdf_bytes(50, 3));
        let wf = PdfToImageWorkflow::new(h.ctx.clone());

        wf.start(&reply_with(Some(document_info("pdf", "a.pdf", "application/pdf", 100))))
            .await
            .unwrap();
        h.ctx.drain_jobs().await;

        let texts = h.transport.all_texts();
        assert_eq!(texts[0], "📥 Downloading PDF file...");
        assert!(texts.iter().any(|t| t.starts_with("Downloading: ")));
        assert!(texts.contains(&"📑 Found 3 pages. Starting PDF to image conversion...".to_string()));
        assert!(texts.contains(&"📤 Converting and sending page 3/3 (100.0%)".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_between_pages_cleans_up() {
        let h = Harness::new();
        h.transport.register_file("pdf", pdf_bytes(50, 3));
        h.cancel_after_first_document(4, WorkflowKind::PdfToImage);
        let wf = PdfToImageWorkflow::new(h.ctx.clone());

        wf.start(&reply_with(Some(document_info("pdf", "a.pdf", "application/pdf", 100))))
            .await
            .unwrap();
        h.ctx.drain_jobs().await;

        let docs = h.transport.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].0, "page_1.png");
        assert!(h
            .transport
            .all_texts()
            .contains(&"❌ PDF to image conversion cancelled.".to_string()));
        assert!(h.ctx.store.is_empty());
        assert!(h.leftover_files().is_empty());
    }

    #[tokio::test]
    async fn test_broken_pdf_reports_failure() {
        let h = Harness::new();
        h.transport.register_file("pdf", b"garbage".to_vec());
        let wf = PdfToImageWorkflow::new(h.ctx.clone());

        wf.start(&reply_with(Some(document_info("pdf", "a.pdf", "application/pdf", 7))))
            .await
            .unwrap();
        h.ctx.drain_jobs().await;

        assert!(h.transport.documents().is_empty());
        assert!(h.transport.last_text().unwrap().starts_with("❌"));
        assert!(h.ctx.store.is_empty());
    }
}
