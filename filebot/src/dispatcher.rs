//! Event routing.
//!
//! Every chat gets a sequential worker fed by an unbounded queue, so events
//! of one chat are handled in arrival order while chats never wait on each
//! other. Each event runs in its own task; a panic is logged and the worker
//! keeps going.
//!
//! Ambiguous events are routed by fixed precedence:
//!
//! ```text
//! document → image→PDF (collecting) → merge (collecting) → file-convert (PDF) → unarchive
//! text     → merge (collecting) → image→PDF (name) → file-convert (text) → resize
//! photo    → image→PDF (collecting), otherwise ignored
//! callback → resize if it has a session, otherwise file-convert
//! ```

use crate::error::WorkflowError;
use crate::message::{ChatId, EventPayload, EventShape, InboundEvent};
use crate::session::WorkflowKind;
use crate::workflows::file_convert::FileConvertWorkflow;
use crate::workflows::image_to_pdf::ImageToPdfWorkflow;
use crate::workflows::merge_pdf::MergePdfWorkflow;
use crate::workflows::pdf_to_image::PdfToImageWorkflow;
use crate::workflows::resize::ResizeWorkflow;
use crate::workflows::split_pdf::SplitPdfWorkflow;
use crate::workflows::unarchive::UnarchiveWorkflow;
use crate::workflows::{Workflow, WorkflowContext};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// How long a chat worker waits for its next event before exiting.
pub const DEFAULT_WORKER_IDLE: Duration = Duration::from_secs(300);

pub const HELP_TEXT: &str = "🤖 Welcome to the Bot Help Center\n\n\
📑 PDF Operations:\n\
• /mergepdf - Merge multiple PDF files into one 📚\n\
• /splitpdf - Split a PDF into individual pages ✂️\n\
• /pdf2image - Convert a PDF to images (reply to a PDF file) 🖼️\n\
• /fileconv - Convert PDFs to Word/Excel or create a text file 📄\n\n\
📦 Unarchive Operations:\n\
• /unarchive - Extract compressed files (zip, rar, 7z) 📂\n\n\
🎨 Image Operations:\n\
• /resizeimage - Resize an image 🔄\n\
• /image2pdf - Convert images into a PDF 📄\n\n\
ℹ️ General Commands:\n\
• /cancel - Cancel the current operation ❌\n\
• /help - Display this help message ℹ️";

const CANCELLED_TEXT: &str = "✅ Current operation has been cancelled. You can start a new operation.";
const NOTHING_TO_CANCEL_TEXT: &str = "No active operation to cancel.";

/// Routes inbound events to the workflows.
pub struct Dispatcher {
    ctx: Arc<WorkflowContext>,
    resize: ResizeWorkflow,
    image_to_pdf: ImageToPdfWorkflow,
    split_pdf: SplitPdfWorkflow,
    pdf_to_image: PdfToImageWorkflow,
    merge_pdf: MergePdfWorkflow,
    file_convert: FileConvertWorkflow,
    unarchive: UnarchiveWorkflow,
    queues: DashMap<ChatId, mpsc::UnboundedSender<InboundEvent>>,
    workers: TaskTracker,
    worker_idle: Duration,
}

impl Dispatcher {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self {
            resize: ResizeWorkflow::new(Arc::clone(&ctx)),
            image_to_pdf: ImageToPdfWorkflow::new(Arc::clone(&ctx)),
            split_pdf: SplitPdfWorkflow::new(Arc::clone(&ctx)),
            pdf_to_image: PdfToImageWorkflow::new(Arc::clone(&ctx)),
            merge_pdf: MergePdfWorkflow::new(Arc::clone(&ctx)),
            file_convert: FileConvertWorkflow::new(Arc::clone(&ctx)),
            unarchive: UnarchiveWorkflow::new(Arc::clone(&ctx)),
            ctx,
            queues: DashMap::new(),
            workers: TaskTracker::new(),
            worker_idle: DEFAULT_WORKER_IDLE,
        }
    }

    pub fn with_worker_idle(mut self, idle: Duration) -> Self {
        self.worker_idle = idle;
        self
    }

    pub fn context(&self) -> &Arc<WorkflowContext> {
        &self.ctx
    }

    fn workflows(&self) -> [&dyn Workflow; 7] {
        [
            &self.resize,
            &self.image_to_pdf,
            &self.split_pdf,
            &self.pdf_to_image,
            &self.merge_pdf,
            &self.file_convert,
            &self.unarchive,
        ]
    }

    // ------------------------------------------------------------------------
    // Per-chat queues
    // ------------------------------------------------------------------------

    /// Queue an event on its chat's worker. Never blocks.
    pub fn submit(self: &Arc<Self>, event: InboundEvent) {
        let chat = event.chat_id;
        let queue = self
            .queues
            .entry(chat)
            .or_insert_with(|| self.spawn_worker(chat));

        if let Err(mpsc::error::SendError(event)) = queue.send(event) {
            drop(queue);
            tracing::warn!(chat_id = chat, "Chat worker gone, starting a new one");
            let fresh = self.spawn_worker(chat);
            let _ = fresh.send(event);
            self.queues.insert(chat, fresh);
        }
    }

    fn spawn_worker(self: &Arc<Self>, chat: ChatId) -> mpsc::UnboundedSender<InboundEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::clone(self);

        self.workers.spawn(async move {
            tracing::debug!(chat_id = chat, "Chat worker started");
            loop {
                match tokio::time::timeout(dispatcher.worker_idle, rx.recv()).await {
                    Ok(Some(event)) => dispatcher.run_isolated(event).await,
                    Ok(None) => break,
                    Err(_) => {
                        // Submitters hold the map entry while sending, so an
                        // empty queue here stays empty once the entry is gone.
                        if dispatcher
                            .queues
                            .remove_if(&chat, |_, _| rx.is_empty())
                            .is_some()
                        {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(chat_id = chat, "Chat worker stopped");
        });
        tx
    }

    async fn run_isolated(self: &Arc<Self>, event: InboundEvent) {
        let chat = event.chat_id;
        let dispatcher = Arc::clone(self);
        let handled = tokio::spawn(async move { dispatcher.dispatch(event).await }).await;
        if let Err(e) = handled {
            if e.is_panic() {
                tracing::error!(chat_id = chat, error = %e, "Event handler panicked");
            }
        }
    }

    /// Wait until every chat worker has gone idle and every background job
    /// has finished.
    pub async fn wait_idle(&self) {
        self.workers.close();
        self.workers.wait().await;
        self.workers.reopen();
        self.ctx.drain_jobs().await;
    }

    /// Cancel every live instance and wait for the background jobs to stop.
    pub async fn shutdown(&self) {
        for (chat, instance) in self.ctx.store.take_all() {
            tracing::debug!(chat_id = chat, kind = %instance.kind(), instance_id = %instance.id, "Cancelling on shutdown");
            instance.cancel.cancel();
        }
        self.ctx.drain_jobs().await;
    }

    // ------------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------------

    /// Handle one event to completion. Background jobs it starts keep running.
    pub async fn dispatch(&self, event: InboundEvent) {
        let chat = event.chat_id;
        let shape = event.shape();
        tracing::debug!(chat_id = chat, ?shape, "Dispatching event");

        let result = match shape {
            EventShape::Command => self.on_command(event).await,
            EventShape::Text => self.on_text(&event).await,
            EventShape::Document => self.on_document(&event).await,
            EventShape::Photo => self.on_photo(&event).await,
            EventShape::Callback => self.on_callback(&event).await,
        };

        if let Err(e) = result {
            self.report(chat, e).await;
        }
    }

    async fn on_command(&self, event: InboundEvent) -> Result<(), WorkflowError> {
        let chat = event.chat_id;
        let EventPayload::Command { name, .. } = &event.payload else {
            return Ok(());
        };

        match name.as_str() {
            "start" | "help" => {
                self.ctx.say(chat, HELP_TEXT).await;
                Ok(())
            }
            "cancel" => {
                self.cancel_all(chat).await;
                Ok(())
            }
            "skip" => self.image_to_pdf.skip(chat).await,
            "resizeimage" => self.resize.start(&event).await,
            "image2pdf" => self.image_to_pdf.start(&event).await,
            "pdf2image" => self.pdf_to_image.start(&event).await,
            "splitpdf" => self.split_pdf.start(&event).await,
            "mergepdf" => self.merge_pdf.start(&event).await,
            "unarchive" => self.unarchive.start(&event).await,
            "fileconv" => self.file_convert.start(&event).await,
            _ => self.on_text(&as_text(event)).await,
        }
    }

    async fn on_text(&self, event: &InboundEvent) -> Result<(), WorkflowError> {
        let chat = event.chat_id;
        let text = event.text().unwrap_or_default();

        if text.trim().eq_ignore_ascii_case("go") && self.image_to_pdf.is_collecting(chat) {
            return self.image_to_pdf.finish_collecting(chat).await;
        }

        let candidates: [&dyn Workflow; 3] = [&self.merge_pdf, &self.image_to_pdf, &self.file_convert];
        match candidates
            .into_iter()
            .find(|workflow| workflow.awaits(chat, EventShape::Text))
        {
            Some(workflow) => workflow.handle(event).await,
            None => self.resize.handle(event).await,
        }
    }

    async fn on_document(&self, event: &InboundEvent) -> Result<(), WorkflowError> {
        let chat = event.chat_id;
        let candidates: [&dyn Workflow; 3] = [&self.image_to_pdf, &self.merge_pdf, &self.file_convert];
        match candidates
            .into_iter()
            .find(|workflow| workflow.awaits(chat, EventShape::Document))
        {
            Some(workflow) => workflow.handle(event).await,
            None => self.unarchive.handle_archive(event).await,
        }
    }

    async fn on_photo(&self, event: &InboundEvent) -> Result<(), WorkflowError> {
        if self.image_to_pdf.awaits(event.chat_id, EventShape::Photo) {
            return self.image_to_pdf.handle(event).await;
        }
        tracing::debug!(chat_id = event.chat_id, "Ignoring photo outside image collection");
        Ok(())
    }

    async fn on_callback(&self, event: &InboundEvent) -> Result<(), WorkflowError> {
        if self.ctx.store.exists(event.chat_id, WorkflowKind::Resize) {
            self.resize.handle(event).await
        } else {
            self.file_convert.handle(event).await
        }
    }

    /// Tear down every workflow of the chat.
    pub async fn cancel_all(&self, chat: ChatId) -> bool {
        let mut cancelled = false;
        for workflow in self.workflows() {
            cancelled |= workflow.cancel(chat).await;
        }

        let reply = if cancelled {
            CANCELLED_TEXT
        } else {
            NOTHING_TO_CANCEL_TEXT
        };
        self.ctx.say(chat, reply).await;
        cancelled
    }

    async fn report(&self, chat: ChatId, err: WorkflowError) {
        match &err {
            WorkflowError::Cancelled => tracing::debug!(chat_id = chat, "Step cancelled"),
            e if e.is_user_error() => tracing::info!(chat_id = chat, error = %e, "Input rejected"),
            e => tracing::error!(chat_id = chat, error = %e, "Workflow step failed"),
        }
        if let Some(message) = err.user_message() {
            self.ctx.say(chat, &message).await;
        }
    }

    // ------------------------------------------------------------------------
    // Idle eviction
    // ------------------------------------------------------------------------

    /// Evict instances idle for longer than `timeout` and tell their chats.
    pub async fn sweep_idle(&self, timeout: Duration) -> usize {
        let evicted = self.ctx.store.evict_idle(timeout);
        let count = evicted.len();
        for (chat, instance) in evicted {
            instance.cancel.cancel();
            tracing::info!(
                chat_id = chat,
                kind = %instance.kind(),
                instance_id = %instance.id,
                "Session expired"
            );
            self.ctx
                .say(
                    chat,
                    &format!(
                        "⌛ Your {} session expired. Please start over.",
                        instance.kind().display_name()
                    ),
                )
                .await;
        }
        count
    }

    /// Run [`sweep_idle`](Self::sweep_idle) every `interval` until `shutdown` fires.
    pub fn spawn_idle_sweeper(
        self: &Arc<Self>,
        timeout: Duration,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = dispatcher.sweep_idle(timeout).await;
                        if evicted > 0 {
                            tracing::info!(evicted, "Idle sessions evicted");
                        }
                    }
                }
            }
        })
    }
}

/// Unknown commands are handled like the text they were typed as.
fn as_text(mut event: InboundEvent) -> InboundEvent {
    if let Some(text) = event.text() {
        event.payload = EventPayload::Text { text };
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::file_convert::FileConvertState;
    use crate::workflows::testing::*;

    fn dispatcher(h: &Harness) -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(h.ctx.clone()).with_worker_idle(Duration::from_millis(50)))
    }

    #[tokio::test]
    async fn test_help_and_start() {
        let h = Harness::new();
        let d = dispatcher(&h);
        d.dispatch(command(1, "help")).await;
        d.dispatch(command(1, "start")).await;
        assert_eq!(h.transport.texts(), vec![HELP_TEXT.to_string(), HELP_TEXT.to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_replies() {
        let h = Harness::new();
        let d = dispatcher(&h);

        d.dispatch(command(1, "cancel")).await;
        assert_eq!(h.transport.last_text().as_deref(), Some(NOTHING_TO_CANCEL_TEXT));

        d.dispatch(command(1, "image2pdf")).await;
        d.dispatch(command(1, "fileconv")).await;
        assert_eq!(h.ctx.store.active_kinds(1).len(), 2);

        d.dispatch(command(1, "cancel")).await;
        assert_eq!(h.transport.last_text().as_deref(), Some(CANCELLED_TEXT));
        assert!(h.ctx.store.active_kinds(1).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_is_text() {
        let h = Harness::new();
        let d = dispatcher(&h);

        d.dispatch(command(1, "fileconv")).await;
        d.dispatch(callback(1, "text_message")).await;
        d.dispatch(command(1, "notacommand")).await;

        let docs = h.transport.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].2, b"/notacommand");
    }

    #[tokio::test]
    async fn test_go_outside_collection_is_text() {
        let h = Harness::new();
        let d = dispatcher(&h);

        d.dispatch(command(1, "mergepdf")).await;
        d.dispatch(text(1, "go")).await;

        // Merge takes any text as the output name; without files it stops.
        assert_eq!(
            h.transport.last_text().as_deref(),
            Some("❌ No PDFs received. Please send PDFs first.")
        );
        assert!(h.ctx.store.is_empty());
    }

    fn file_convert_state(h: &Harness, chat: ChatId) -> Option<FileConvertState> {
        h.ctx
            .store
            .get(chat, WorkflowKind::FileConvert)
            .and_then(|instance| instance.state.file_convert().cloned())
    }

    fn merge_file_count(h: &Harness, chat: ChatId) -> Option<usize> {
        h.ctx
            .store
            .get(chat, WorkflowKind::MergePdf)
            .and_then(|instance| instance.state.merge().map(|state| state.files.len()))
    }

    #[tokio::test]
    async fn test_document_goes_to_image_collection_before_merge() {
        let h = Harness::new();
        h.transport
            .register_file("img", image_bytes(20, 20, ::image::ImageFormat::Png));
        let d = dispatcher(&h);

        d.dispatch(command(1, "mergepdf")).await;
        d.dispatch(command(1, "image2pdf")).await;
        d.dispatch(document(1, "img", "a.png", "image/png", 100)).await;

        assert_eq!(
            h.transport.last_text().as_deref(),
            Some("Received image 1. Send more or type 'go'.")
        );
        assert_eq!(merge_file_count(&h, 1), Some(0));
    }

    #[tokio::test]
    async fn test_document_goes_to_merge_before_file_convert() {
        let h = Harness::new();
        let d = dispatcher(&h);

        d.dispatch(command(1, "fileconv")).await;
        d.dispatch(callback(1, "pdf")).await;
        d.dispatch(command(1, "mergepdf")).await;
        d.dispatch(document(1, "p1", "a.pdf", "application/pdf", 100)).await;

        assert!(h
            .transport
            .last_text()
            .unwrap()
            .starts_with("✅ 1 PDF received:\n1. a.pdf"));
        assert_eq!(merge_file_count(&h, 1), Some(1));
        assert_eq!(file_convert_state(&h, 1), Some(FileConvertState::AwaitingPdf));
    }

    #[tokio::test]
    async fn test_text_goes_to_merge_before_file_convert() {
        let h = Harness::new();
        let d = dispatcher(&h);

        d.dispatch(command(1, "fileconv")).await;
        d.dispatch(callback(1, "text_message")).await;
        d.dispatch(command(1, "mergepdf")).await;
        d.dispatch(text(1, "report")).await;

        assert_eq!(
            h.transport.last_text().as_deref(),
            Some("❌ No PDFs received. Please send PDFs first.")
        );
        assert!(h.transport.documents().is_empty());
        assert_eq!(file_convert_state(&h, 1), Some(FileConvertState::AwaitingText));
    }

    #[tokio::test]
    async fn test_go_finishes_collection_while_merge_waits() {
        let h = Harness::new();
        h.transport
            .register_file("img", image_bytes(20, 20, ::image::ImageFormat::Png));
        let d = dispatcher(&h);

        d.dispatch(command(1, "mergepdf")).await;
        d.dispatch(command(1, "image2pdf")).await;
        d.dispatch(document(1, "img", "a.png", "image/png", 100)).await;
        d.dispatch(text(1, "Go")).await;

        assert_eq!(
            h.transport.last_text().as_deref(),
            Some("Please send a name for your PDF file. If you want to skip, click /skip.")
        );
        assert_eq!(merge_file_count(&h, 1), Some(0));
        assert!(h.ctx.store.exists(1, WorkflowKind::ImageToPdf));
    }

    #[tokio::test]
    async fn test_user_errors_are_reported() {
        let h = Harness::new();
        let d = dispatcher(&h);
        d.dispatch(command(1, "resizeimage")).await;
        assert_eq!(
            h.transport.last_text().as_deref(),
            Some("Please reply to an image with the /resizeimage command.")
        );
    }

    #[tokio::test]
    async fn test_submit_keeps_order_per_chat() {
        let h = Harness::new();
        let d = dispatcher(&h);

        d.submit(command(1, "fileconv"));
        d.submit(callback(1, "text_message"));
        d.submit(text(1, "first"));
        d.submit(command(2, "help"));
        d.wait_idle().await;

        let docs = h.transport.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].2, b"first");
        assert!(h.transport.texts().contains(&HELP_TEXT.to_string()));
        assert!(d.queues.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_idle_notifies_chat() {
        let h = Harness::new();
        let d = dispatcher(&h);
        d.dispatch(command(1, "image2pdf")).await;

        assert_eq!(d.sweep_idle(Duration::from_secs(3600)).await, 0);
        assert_eq!(d.sweep_idle(Duration::ZERO).await, 1);
        assert_eq!(
            h.transport.last_text().as_deref(),
            Some("⌛ Your image to PDF session expired. Please start over.")
        );
        assert!(h.ctx.store.is_empty());
        assert!(h.leftover_files().is_empty());
    }
}
