//! Extract ZIP, RAR and 7z archives and send back every file they contain.
//!
//! Any archive document that no other workflow is waiting for starts an
//! extraction. The download runs inside the job so `/cancel` interrupts it
//! mid-transfer.

use super::{checkpoint, Workflow, WorkflowContext};
use crate::backends::archive::{self, ArchiveFormat};
use crate::error::{WorkflowError, WorkflowResult};
use crate::message::{ChatId, DocumentInfo, EventShape, InboundEvent};
use crate::progress::{ProgressCursor, TransferStatsObserver};
use crate::session::{JobState, WorkflowInstance, WorkflowKind, WorkflowState};
use async_trait::async_trait;
use std::sync::Arc;

pub struct UnarchiveWorkflow {
    ctx: Arc<WorkflowContext>,
}

impl UnarchiveWorkflow {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }

    /// Start extracting an archive document.
    pub async fn handle_archive(&self, event: &InboundEvent) -> WorkflowResult<()> {
        let chat = event.chat_id;
        let Some(doc) = event.document() else {
            return Ok(());
        };
        let Some(format) = doc.mime_type.as_deref().and_then(ArchiveFormat::from_mime) else {
            tracing::debug!(chat_id = chat, mime = ?doc.mime_type, "Ignoring non-archive document");
            return Ok(());
        };

        if doc.file_size > self.ctx.limits.archive_max_bytes {
            return Err(WorkflowError::ResourceLimitExceeded(format!(
                "File is too large. Maximum size allowed is {}GB.",
                self.ctx.limits.archive_max_bytes / (1024 * 1024 * 1024)
            )));
        }

        let instance = self.ctx.new_instance(
            chat,
            WorkflowState::Unarchive(JobState {
                source_name: doc.file_name.clone().unwrap_or_default(),
            }),
        )?;
        self.ctx.insert_exclusive(chat, instance.clone())?;
        tracing::info!(
            chat_id = chat,
            instance_id = %instance.id,
            ?format,
            size = doc.file_size,
            "Extraction started"
        );

        let job = run(Arc::clone(&self.ctx), chat, instance.clone(), doc.clone(), format);
        self.ctx.spawn_job(chat, &instance, job);
        Ok(())
    }
}

async fn run(
    ctx: Arc<WorkflowContext>,
    chat: ChatId,
    instance: WorkflowInstance,
    doc: DocumentInfo,
    format: ArchiveFormat,
) -> WorkflowResult<()> {
    let cursor = ProgressCursor::start(ctx.transport.clone(), chat, "📥 Downloading archive...").await;

    match extract_and_send(&ctx, chat, &instance, &doc, format, &cursor).await {
        Ok(()) => Ok(()),
        Err(WorkflowError::Cancelled) => {
            cursor.force("❌ Operation cancelled.").await;
            Err(WorkflowError::Cancelled)
        }
        Err(e) => {
            cursor.delete().await;
            Err(e)
        }
    }
}

async fn extract_and_send(
    ctx: &WorkflowContext,
    chat: ChatId,
    instance: &WorkflowInstance,
    doc: &DocumentInfo,
    format: ArchiveFormat,
    cursor: &ProgressCursor,
) -> WorkflowResult<()> {
    let source = instance.scratch.file(&format!("archive{}", format.extension()));
    let observer = TransferStatsObserver::new(cursor, "Downloading archive...");
    ctx.download(&instance.cancel, &doc.file_id, &source, Some(&observer))
        .await?;
    checkpoint(&instance.cancel)?;

    cursor.force("⚙️ Extracting files...").await;
    let dest = instance.scratch.subdir("extracted")?;
    archive::extract(format, &source, &dest, &ctx.backends.unrar_path, &instance.cancel).await?;
    let _ = tokio::fs::remove_file(&source).await;

    let files = archive::list_files(&dest);
    let total = files.len();
    cursor.force(&format!("📤 Sending {total} files...")).await;

    for (index, relative) in files.iter().enumerate() {
        checkpoint(&instance.cancel)?;
        cursor
            .replace(&format!("📤 Sending file {}/{total}...", index + 1))
            .await;

        let path = dest.join(relative);
        let caption = archive::location_caption(relative);
        if let Err(e) = ctx.transport.send_document(chat, &path, Some(&caption)).await {
            tracing::warn!(chat_id = chat, file = %relative.display(), error = %e, "Failed to send extracted file");
            ctx.say(chat, &format!("❌ Error sending {}: {e}", relative.display()))
                .await;
        }
        let _ = tokio::fs::remove_file(&path).await;
    }

    cursor.delete().await;
    ctx.say(chat, "✅ Extraction complete!").await;
    Ok(())
}

#[async_trait]
impl Workflow for UnarchiveWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Unarchive
    }

    fn context(&self) -> &WorkflowContext {
        &self.ctx
    }

    fn awaits(&self, _chat: ChatId, _shape: EventShape) -> bool {
        false
    }

    async fn start(&self, event: &InboundEvent) -> WorkflowResult<()> {
        let max_gb = self.ctx.limits.archive_max_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
        self.ctx
            .say(
                event.chat_id,
                &format!(
                    "Send me an archive file (ZIP/RAR/7Z) to extract.\n\
                     Maximum file size: {max_gb:.1}GB\n\
                     Use /cancel to stop the extraction process."
                ),
            )
            .await;
        Ok(())
    }

    async fn handle(&self, event: &InboundEvent) -> WorkflowResult<()> {
        self.handle_archive(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::Outbound;
    use crate::workflows::testing::*;
    use std::io::Write;

    fn zip_bytes() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("docs/readme.txt", options).unwrap();
        writer.write_all(b"hello").unwrap();
        writer.start_file("a.txt", options).unwrap();
        writer.write_all(b"a").unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn test_start_explains_limits() {
        let h = Harness::new();
        let wf = UnarchiveWorkflow::new(h.ctx.clone());
        wf.start(&command(9, "unarchive")).await.unwrap();
        assert_eq!(
            h.transport.last_text().as_deref(),
            Some(
                "Send me an archive file (ZIP/RAR/7Z) to extract.\n\
                 Maximum file size: 2.0GB\n\
                 Use /cancel to stop the extraction process."
            )
        );
        assert!(h.ctx.store.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_oversized_and_ignores_other_documents() {
        let h = Harness::new();
        let wf = UnarchiveWorkflow::new(h.ctx.clone());

        let err = wf
            .handle_archive(&document(9, "z", "big.zip", "application/zip", 3 * 1024 * 1024 * 1024))
            .await
            .unwrap_err();
        assert_eq!(
            err.user_message().as_deref(),
            Some("File is too large. Maximum size allowed is 2GB.")
        );

        wf.handle_archive(&document(9, "p", "a.pdf", "application/pdf", 10))
            .await
            .unwrap();
        assert!(h.ctx.store.is_empty());
        assert!(h.transport.actions().is_empty());
    }

    #[tokio::test]
    async fn test_extracts_and_sends_each_file() {
        let h = Harness::new();
        h.transport.register_file("zip", zip_bytes());
        let wf = UnarchiveWorkflow::new(h.ctx.clone());

        wf.handle_archive(&document(9, "zip", "bundle.zip", "application/zip", 200))
            .await
            .unwrap();
        h.ctx.drain_jobs().await;

        let docs = h.transport.documents();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].0, "a.txt");
        assert_eq!(docs[1].0, "readme.txt");
        assert_eq!(docs[1].2, b"hello");
        assert_eq!(
            docs[1].1.as_deref(),
            Some("📂 File Location:\n📁 docs\n  📄 readme.txt")
        );
        assert!(h.transport.texts().contains(&"📤 Sending file 2/2...".to_string()));
        assert_eq!(h.transport.last_text().as_deref(), Some("✅ Extraction complete!"));
        assert!(h.ctx.store.is_empty());
        assert!(h.leftover_files().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_archive_reports_failure() {
        let h = Harness::new();
        h.transport.register_file("zip", b"not a zip".to_vec());
        let wf = UnarchiveWorkflow::new(h.ctx.clone());

        wf.handle_archive(&document(9, "zip", "bad.zip", "application/zip", 9))
            .await
            .unwrap();
        h.ctx.drain_jobs().await;

        assert!(h.transport.documents().is_empty());
        assert!(h.transport.last_text().unwrap().starts_with("❌"));
        assert!(h.ctx.store.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_sending_removes_extracted_files() {
        let h = Harness::new();
        h.transport.register_file("zip", zip_bytes());
        h.cancel_after_first_document(9, WorkflowKind::Unarchive);
        let wf = UnarchiveWorkflow::new(h.ctx.clone());

        wf.handle_archive(&document(9, "zip", "bundle.zip", "application/zip", 200))
            .await
            .unwrap();
        h.ctx.drain_jobs().await;

        let docs = h.transport.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].0, "a.txt");
        assert!(!h.transport.texts().contains(&"✅ Extraction complete!".to_string()));
        assert!(h.ctx.store.is_empty());
        assert!(h.leftover_files().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_download() {
        let h = Harness::new();
        h.transport.register_file("zip", zip_bytes());
        h.transport.stall_download("zip");
        let wf = UnarchiveWorkflow::new(h.ctx.clone());

        wf.handle_archive(&document(9, "zip", "bundle.zip", "application/zip", 200))
            .await
            .unwrap();
        let err = wf
            .handle_archive(&document(9, "zip", "bundle.zip", "application/zip", 200))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Busy(_)));

        assert!(wf.cancel(9).await);
        h.ctx.drain_jobs().await;

        assert!(h.transport.documents().is_empty());
        assert!(h.transport.actions().iter().any(|action| matches!(
            action,
            Outbound::Edit { text, .. } if text == "❌ Operation cancelled."
        )));
        assert!(h.leftover_files().is_empty());
    }
}
