//! Convert a PDF to Word or Excel, or save a text message as a file.
//!
//! `/fileconv` offers two sources. The PDF path downloads the document and
//! then asks for the output format; the text path wraps the next message
//! into `message.txt`.

use super::{Workflow, WorkflowContext};
use crate::backends::{ConversionOutcome, OfficeFormat};
use crate::error::{WorkflowError, WorkflowResult};
use crate::message::{ChatId, EventShape, InboundEvent, InlineButton};
use crate::progress::{ChannelProgressSink, ProgressCursor};
use crate::session::{WorkflowInstance, WorkflowKind, WorkflowState};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

pub const CALLBACK_PDF: &str = "pdf";
pub const CALLBACK_TEXT: &str = "text_message";
pub const CALLBACK_WORD: &str = "word";
pub const CALLBACK_EXCEL: &str = "excel";

const INPUT_NAME: &str = "input.pdf";
const TEXT_NAME: &str = "message.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileConvertState {
    AwaitingSourceChoice,
    AwaitingPdf,
    AwaitingText,
    AwaitingFormatChoice { pdf: PathBuf },
    Converting,
}

pub struct FileConvertWorkflow {
    ctx: Arc<WorkflowContext>,
}

impl FileConvertWorkflow {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }

    fn instance(&self, chat: ChatId) -> Option<WorkflowInstance> {
        self.ctx.store.get(chat, WorkflowKind::FileConvert)
    }

    fn state(&self, chat: ChatId) -> Option<FileConvertState> {
        self.instance(chat)
            .and_then(|instance| instance.state.file_convert().cloned())
    }

    fn set_state(&self, chat: ChatId, next: FileConvertState) {
        self.ctx.store.update(chat, WorkflowKind::FileConvert, |instance| {
            if let Some(state) = instance.state.file_convert_mut() {
                *state = next;
            }
        });
    }

    fn finish(&self, chat: ChatId, instance_id: &str) {
        self.ctx
            .store
            .remove_if(chat, WorkflowKind::FileConvert, instance_id);
    }

    async fn handle_callback(&self, chat: ChatId, callback_id: &str, data: &str) -> WorkflowResult<()> {
        let transport = &self.ctx.transport;
        let Some(instance) = self.instance(chat) else {
            transport
                .answer_callback(callback_id, Some("Session expired. Please start over."), true)
                .await?;
            return Ok(());
        };
        let state = instance.state.file_convert().cloned();
        transport.answer_callback(callback_id, None, false).await?;

        match (state, data) {
            (Some(FileConvertState::AwaitingSourceChoice), CALLBACK_PDF) => {
                self.set_state(chat, FileConvertState::AwaitingPdf);
                self.ctx
                    .say(chat, "Please send me the PDF file you want to convert 📄")
                    .await;
            }
            (Some(FileConvertState::AwaitingSourceChoice), CALLBACK_TEXT) => {
                self.set_state(chat, FileConvertState::AwaitingText);
                self.ctx
                    .say(chat, "Please send me the text message you want to save in a file 📝")
                    .await;
            }
            (Some(FileConvertState::AwaitingFormatChoice { pdf }), CALLBACK_WORD) => {
                self.convert(chat, &instance, &pdf, OfficeFormat::Word).await;
            }
            (Some(FileConvertState::AwaitingFormatChoice { pdf }), CALLBACK_EXCEL) => {
                self.convert(chat, &instance, &pdf, OfficeFormat::Excel).await;
            }
            (_, other) => {
                tracing::debug!(chat_id = chat, data = %other, "Ignoring file conversion callback");
            }
        }
        Ok(())
    }

    async fn receive_pdf(&self, event: &InboundEvent) -> WorkflowResult<()> {
        let chat = event.chat_id;
        let (Some(instance), Some(doc)) = (self.instance(chat), event.document()) else {
            return Ok(());
        };
        if doc.mime_type.as_deref() != Some("application/pdf") {
            return Err(WorkflowError::InvalidInput(
                "Please send me the PDF file you want to convert 📄".into(),
            ));
        }

        let status = ProgressCursor::start(self.ctx.transport.clone(), chat, "Downloading PDF... ⏳").await;
        let dest = instance.scratch.file(INPUT_NAME);
        let downloaded = self.ctx.transport.download_file(&doc.file_id, &dest, None).await;
        status.delete().await;

        if let Err(e) = downloaded {
            tracing::error!(chat_id = chat, error = %e, "PDF download for conversion failed");
            self.finish(chat, &instance.id);
            return Err(WorkflowError::InvalidInput(
                "Sorry, there was an error processing your PDF. Please try again. 🚫".into(),
            ));
        }

        self.set_state(chat, FileConvertState::AwaitingFormatChoice { pdf: dest });
        let buttons = vec![vec![
            InlineButton::new("Word", CALLBACK_WORD),
            InlineButton::new("Excel", CALLBACK_EXCEL),
        ]];
        self.ctx
            .transport
            .send_text_with_buttons(chat, "Choose the output format:", &buttons)
            .await?;
        Ok(())
    }

    /// Run the conversion and report the outcome. Every path ends the session.
    async fn convert(&self, chat: ChatId, instance: &WorkflowInstance, pdf: &std::path::Path, format: OfficeFormat) {
        self.set_state(chat, FileConvertState::Converting);
        let initial = match format {
            OfficeFormat::Word => "Starting conversion... ⏳",
            OfficeFormat::Excel => "Converting PDF to Excel... ⏳",
        };
        let status = ProgressCursor::start(self.ctx.transport.clone(), chat, initial).await;
        let output = instance.scratch.file(format.output_name());

        let (sink, mut stages) = ChannelProgressSink::new();
        let converter = Arc::clone(&self.ctx.backends.office);
        let (source, dest) = (pdf.to_path_buf(), output.clone());
        let conversion = tokio::task::spawn_blocking(move || converter.convert(&source, format, &dest, &sink));
        let render = async {
            while let Some(stage) = stages.recv().await {
                status.force(&format!("{stage} ⏳")).await;
            }
        };
        let (outcome, ()) = tokio::join!(conversion, render);

        let sent = match outcome {
            Ok(Ok(ConversionOutcome::Converted(path))) => {
                status.force("Sending converted file... 📤").await;
                let caption = match format {
                    OfficeFormat::Word => "Converted Word document 📄",
                    OfficeFormat::Excel => "Converted Excel file 📊",
                };
                self.ctx
                    .transport
                    .send_document(chat, &path, Some(caption))
                    .await
                    .map_err(WorkflowError::from)
            }
            Ok(Ok(other)) => Err(WorkflowError::BackendFailure(format!("conversion produced {other:?}"))),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(e.into()),
        };

        if let Err(e) = sent {
            tracing::error!(chat_id = chat, ?format, error = %e, "PDF conversion failed");
            let message = match format {
                OfficeFormat::Word => "Conversion failed. Please try again with a different PDF. 🚫",
                OfficeFormat::Excel => {
                    "Conversion failed. This might be due to unrecognizable tables. Try a different PDF. 🚫"
                }
            };
            self.ctx.say(chat, message).await;
        } else {
            tracing::info!(chat_id = chat, ?format, "PDF converted");
        }

        let _ = tokio::fs::remove_file(&output).await;
        status.delete().await;
        self.finish(chat, &instance.id);
    }

    async fn save_text(&self, chat: ChatId, text: &str) -> WorkflowResult<()> {
        let Some(instance) = self.instance(chat) else {
            return Ok(());
        };
        let status = ProgressCursor::start(self.ctx.transport.clone(), chat, "Processing your text... ⏳").await;
        let output = instance.scratch.file(TEXT_NAME);

        let result = async {
            tokio::fs::write(&output, text.as_bytes()).await?;
            status.force("Text file created! Sending... 📤").await;
            self.ctx
                .transport
                .send_document(chat, &output, Some("Here's your text file 📝"))
                .await?;
            Ok::<_, WorkflowError>(())
        }
        .await;

        let _ = tokio::fs::remove_file(&output).await;
        status.delete().await;
        self.finish(chat, &instance.id);

        result.map_err(|e| {
            tracing::error!(chat_id = chat, error = %e, "Text file creation failed");
            WorkflowError::InvalidInput(
                "Sorry, there was an error creating your text file. Please try again. 🚫".into(),
            )
        })
    }
}

#[async_trait]
impl Workflow for FileConvertWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::FileConvert
    }

    fn context(&self) -> &WorkflowContext {
        &self.ctx
    }

    fn awaits(&self, chat: ChatId, shape: EventShape) -> bool {
        match (self.state(chat), shape) {
            (Some(FileConvertState::AwaitingPdf), EventShape::Document) => true,
            (Some(FileConvertState::AwaitingText), EventShape::Text) => true,
            (
                Some(FileConvertState::AwaitingSourceChoice | FileConvertState::AwaitingFormatChoice { .. }),
                EventShape::Callback,
            ) => true,
            _ => false,
        }
    }

    async fn start(&self, event: &InboundEvent) -> WorkflowResult<()> {
        let chat = event.chat_id;
        let instance = self
            .ctx
            .new_instance(chat, WorkflowState::FileConvert(FileConvertState::AwaitingSourceChoice))?;
        self.ctx.replace_instance(chat, instance);

        let buttons = vec![vec![
            InlineButton::new("PDF", CALLBACK_PDF),
            InlineButton::new("Text Message", CALLBACK_TEXT),
        ]];
        self.ctx
            .transport
            .send_text_with_buttons(chat, "What type of file do you want to convert?", &buttons)
            .await?;
        Ok(())
    }

    async fn handle(&self, event: &InboundEvent) -> WorkflowResult<()> {
        let chat = event.chat_id;
        if let Some(callback) = event.callback() {
            return self.handle_callback(chat, &callback.id, &callback.data).await;
        }
        match (self.state(chat), event.shape()) {
            (Some(FileConvertState::AwaitingPdf), EventShape::Document) => self.receive_pdf(event).await,
            (Some(FileConvertState::AwaitingText), EventShape::Text) => {
                let text = event.text().unwrap_or_default();
                self.save_text(chat, &text).await
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::testing::*;

    async fn pdf_ready(h: &Harness, wf: &FileConvertWorkflow) {
        h.transport.register_file("pdf", pdf_bytes(40, 1));
        wf.start(&command(6, "fileconv")).await.unwrap();
        wf.handle(&callback(6, CALLBACK_PDF)).await.unwrap();
        assert!(wf.awaits(6, EventShape::Document));
        wf.handle(&document(6, "pdf", "in.pdf", "application/pdf", 100))
            .await
            .unwrap();
        assert!(matches!(
            wf.state(6),
            Some(FileConvertState::AwaitingFormatChoice { .. })
        ));
    }

    #[tokio::test]
    async fn test_text_to_file() {
        let h = Harness::new();
        let wf = FileConvertWorkflow::new(h.ctx.clone());
        wf.start(&command(6, "fileconv")).await.unwrap();
        wf.handle(&callback(6, CALLBACK_TEXT)).await.unwrap();
        assert!(wf.awaits(6, EventShape::Text));

        wf.handle(&text(6, "hello there")).await.unwrap();

        let docs = h.transport.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].0, "message.txt");
        assert_eq!(docs[0].1.as_deref(), Some("Here's your text file 📝"));
        assert_eq!(docs[0].2, b"hello there");
        assert!(h.ctx.store.is_empty());
        assert!(h.leftover_files().is_empty());
    }

    #[tokio::test]
    async fn test_pdf_to_word() {
        let h = Harness::new();
        let wf = FileConvertWorkflow::new(h.ctx.clone());
        pdf_ready(&h, &wf).await;

        wf.handle(&callback(6, CALLBACK_WORD)).await.unwrap();

        let docs = h.transport.documents();
        assert_eq!(docs[0].0, "converted.docx");
        assert_eq!(docs[0].1.as_deref(), Some("Converted Word document 📄"));
        assert!(h.transport.all_texts().contains(&"Opening document ⏳".to_string()));
        assert!(h.ctx.store.is_empty());
        assert!(h.leftover_files().is_empty());
    }

    #[tokio::test]
    async fn test_no_tables_fails_explicitly() {
        let h = Harness::with_office(FakeOffice(Some(ConversionOutcome::NoTables)));
        let wf = FileConvertWorkflow::new(h.ctx.clone());
        pdf_ready(&h, &wf).await;

        wf.handle(&callback(6, CALLBACK_EXCEL)).await.unwrap();

        assert!(h.transport.documents().is_empty());
        assert_eq!(
            h.transport.last_text().as_deref(),
            Some("Conversion failed. This might be due to unrecognizable tables. Try a different PDF. 🚫")
        );
        assert!(h.ctx.store.is_empty());
        assert!(h.leftover_files().is_empty());
    }

    #[tokio::test]
    async fn test_callback_without_session() {
        let h = Harness::new();
        let wf = FileConvertWorkflow::new(h.ctx.clone());
        wf.handle(&callback(6, CALLBACK_WORD)).await.unwrap();
        assert!(matches!(
            &h.transport.actions()[0],
            crate::recording::Outbound::Answer { show_alert: true, .. }
        ));
    }
}
