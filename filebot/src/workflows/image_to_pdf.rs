//! Collect photos and image files, then bind them into one PDF.

use super::{Workflow, WorkflowContext};
use crate::backends::pdf;
use crate::error::{WorkflowError, WorkflowResult};
use crate::message::{ChatId, EventShape, InboundEvent};
use crate::session::{WorkflowInstance, WorkflowKind, WorkflowState};
use async_trait::async_trait;
use filebot_common::util::sanitize_filename;
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_PDF_NAME: &str = "images.pdf";

/// Extensions kept as-is for image documents; anything else is stored as `.jpg`.
const KNOWN_EXTENSIONS: [&str; 4] = [".jpg", ".jpeg", ".png", ".gif"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImageToPdfStage {
    #[default]
    Collecting,
    AwaitingName,
}

#[derive(Debug, Clone, Default)]
pub struct ImageToPdfState {
    pub stage: ImageToPdfStage,
    /// Received images in upload order
    pub images: Vec<PathBuf>,
}

/// PDF file name from user text. Falls back to the default name when
/// nothing usable is left after sanitizing.
pub fn pdf_name(text: &str) -> String {
    let clean = sanitize_filename(text.trim());
    let clean = clean.trim();
    if clean.is_empty() {
        return DEFAULT_PDF_NAME.to_string();
    }
    if clean.to_lowercase().ends_with(".pdf") {
        clean.to_string()
    } else {
        format!("{clean}.pdf")
    }
}

pub struct ImageToPdfWorkflow {
    ctx: Arc<WorkflowContext>,
}

impl ImageToPdfWorkflow {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }

    fn instance(&self, chat: ChatId) -> Option<WorkflowInstance> {
        self.ctx.store.get(chat, WorkflowKind::ImageToPdf)
    }

    fn stage(&self, chat: ChatId) -> Option<ImageToPdfStage> {
        self.instance(chat)
            .and_then(|instance| instance.state.image_to_pdf().map(|state| state.stage))
    }

    /// Whether the chat is sending images.
    pub fn is_collecting(&self, chat: ChatId) -> bool {
        self.stage(chat) == Some(ImageToPdfStage::Collecting)
    }

    /// Handle `go`: stop collecting and ask for a file name.
    pub async fn finish_collecting(&self, chat: ChatId) -> WorkflowResult<()> {
        let moved = self
            .ctx
            .store
            .update(chat, WorkflowKind::ImageToPdf, |instance| {
                match instance.state.image_to_pdf_mut() {
                    Some(state) if state.stage == ImageToPdfStage::Collecting && !state.images.is_empty() => {
                        state.stage = ImageToPdfStage::AwaitingName;
                        true
                    }
                    _ => false,
                }
            })
            .unwrap_or(false);

        if !moved {
            return Err(WorkflowError::InvalidInput(
                "You haven't sent any images yet.".into(),
            ));
        }

        self.ctx
            .say(chat, "Please send a name for your PDF file. If you want to skip, click /skip.")
            .await;
        Ok(())
    }

    /// Handle `/skip`: build the PDF under the default name.
    pub async fn skip(&self, chat: ChatId) -> WorkflowResult<()> {
        if self.stage(chat) != Some(ImageToPdfStage::AwaitingName) {
            return Ok(());
        }
        self.build_and_send(chat, DEFAULT_PDF_NAME).await
    }

    async fn add_image(&self, event: &InboundEvent) -> WorkflowResult<()> {
        let chat = event.chat_id;
        let Some(instance) = self.instance(chat) else {
            return Ok(());
        };
        let index = instance
            .state
            .image_to_pdf()
            .map(|state| state.images.len())
            .unwrap_or_default();

        let (file_id, extension) = if let Some(photo) = event.photo() {
            let largest = photo
                .largest()
                .ok_or_else(|| WorkflowError::InvalidInput("Please send only image files.".into()))?;
            (largest.file_id.clone(), ".jpg".to_string())
        } else if let Some(doc) = event.document() {
            let is_image = doc
                .mime_type
                .as_deref()
                .is_some_and(|mime| mime.starts_with("image/"));
            if !is_image {
                return Err(WorkflowError::InvalidInput("Please send only image files.".into()));
            }
            let extension = doc
                .extension()
                .filter(|ext| KNOWN_EXTENSIONS.contains(&ext.as_str()))
                .unwrap_or_else(|| ".jpg".to_string());
            (doc.file_id.clone(), extension)
        } else {
            return Ok(());
        };

        let dest = instance.scratch.file(&format!("{index}{extension}"));
        self.ctx.transport.download_file(&file_id, &dest, None).await?;

        let count = self
            .ctx
            .store
            .update(chat, WorkflowKind::ImageToPdf, |instance| {
                instance.state.image_to_pdf_mut().map(|state| {
                    state.images.push(dest);
                    state.images.len()
                })
            })
            .flatten();

        if let Some(count) = count {
            tracing::debug!(chat_id = chat, count, "Image received for PDF");
            self.ctx
                .say(chat, &format!("Received image {count}. Send more or type 'go'."))
                .await;
        }
        Ok(())
    }

    async fn build_and_send(&self, chat: ChatId, file_name: &str) -> WorkflowResult<()> {
        let Some(instance) = self.instance(chat) else {
            return Ok(());
        };
        let result = self.assemble(chat, &instance, file_name).await;
        self.ctx.store.remove_if(chat, WorkflowKind::ImageToPdf, &instance.id);
        result
    }

    async fn assemble(&self, chat: ChatId, instance: &WorkflowInstance, file_name: &str) -> WorkflowResult<()> {
        let images = instance
            .state
            .image_to_pdf()
            .map(|state| state.images.clone())
            .unwrap_or_default();
        if images.is_empty() {
            return Err(WorkflowError::InvalidInput("You haven't sent any images yet.".into()));
        }

        let output = instance.scratch.file(file_name);
        let dest = output.clone();
        let pages = tokio::task::spawn_blocking(move || pdf::images_to_pdf(&images, &dest)).await??;

        self.ctx.transport.send_document(chat, &output, None).await?;
        tracing::info!(chat_id = chat, pages, file_name = %file_name, "PDF created from images");
        self.ctx
            .say(chat, &format!("Your PDF has been created and sent! It contains {pages} pages."))
            .await;
        Ok(())
    }
}

#[async_trait]
impl Workflow for ImageToPdfWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::ImageToPdf
    }

    fn context(&self) -> &WorkflowContext {
        &self.ctx
    }

    fn awaits(&self, chat: ChatId, shape: EventShape) -> bool {
        match (self.stage(chat), shape) {
            (Some(ImageToPdfStage::Collecting), EventShape::Photo | EventShape::Document) => true,
            (Some(ImageToPdfStage::AwaitingName), EventShape::Text) => true,
            _ => false,
        }
    }

    async fn start(&self, event: &InboundEvent) -> WorkflowResult<()> {
        let chat = event.chat_id;
        let instance = self
            .ctx
            .new_instance(chat, WorkflowState::ImageToPdf(ImageToPdfState::default()))?;
        self.ctx.replace_instance(chat, instance);
        self.ctx
            .say(chat, "Send the images you want to convert to PDF.\nWhen you're done, type 'go'.")
            .await;
        Ok(())
    }

    async fn handle(&self, event: &InboundEvent) -> WorkflowResult<()> {
        match (self.stage(event.chat_id), event.shape()) {
            (Some(ImageToPdfStage::Collecting), EventShape::Photo | EventShape::Document) => {
                self.add_image(event).await
            }
            (Some(ImageToPdfStage::AwaitingName), EventShape::Text) => {
                let name = pdf_name(&event.text().unwrap_or_default());
                self.build_and_send(event.chat_id, &name).await
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::EventPayload;
    use crate::workflows::testing::*;
    use ::image::ImageFormat;

    fn photo(chat: ChatId, file_id: &str) -> InboundEvent {
        event(chat, EventPayload::Photo(photo_info(file_id)))
    }

    #[test]
    fn test_pdf_name() {
        assert_eq!(pdf_name("  my: report? "), "my report.pdf");
        assert_eq!(pdf_name("Scan.PDF"), "Scan.PDF");
        assert_eq!(pdf_name("<>|"), "images.pdf");
    }

    #[tokio::test]
    async fn test_go_without_images_is_rejected() {
        let h = Harness::new();
        let wf = ImageToPdfWorkflow::new(h.ctx.clone());
        wf.start(&command(3, "image2pdf")).await.unwrap();

        let err = wf.finish_collecting(3).await.unwrap_err();
        assert_eq!(err.user_message().as_deref(), Some("You haven't sent any images yet."));
        assert!(wf.is_collecting(3));
    }

    #[tokio::test]
    async fn test_non_image_document_rejected() {
        let h = Harness::new();
        let wf = ImageToPdfWorkflow::new(h.ctx.clone());
        wf.start(&command(3, "image2pdf")).await.unwrap();

        let err = wf
            .handle(&document(3, "d1", "notes.pdf", "application/pdf", 10))
            .await
            .unwrap_err();
        assert_eq!(err.user_message().as_deref(), Some("Please send only image files."));
        let state = h.ctx.store.get(3, WorkflowKind::ImageToPdf).unwrap();
        assert!(state.state.image_to_pdf().unwrap().images.is_empty());
    }

    #[tokio::test]
    async fn test_collect_name_and_build() {
        let h = Harness::new();
        h.transport.register_file("p1", image_bytes(30, 20, ImageFormat::Jpeg));
        h.transport.register_file("p2", image_bytes(40, 20, ImageFormat::Png));
        h.transport.register_file("p3", image_bytes(50, 20, ImageFormat::Png));
        let wf = ImageToPdfWorkflow::new(h.ctx.clone());

        wf.start(&command(3, "image2pdf")).await.unwrap();
        wf.handle(&photo(3, "p1")).await.unwrap();
        wf.handle(&document(3, "p2", "b.png", "image/png", 10)).await.unwrap();
        wf.handle(&document(3, "p3", "c.webp", "image/webp", 10)).await.unwrap();

        let stored = h.ctx.store.get(3, WorkflowKind::ImageToPdf).unwrap();
        let names: Vec<String> = stored
            .state
            .image_to_pdf()
            .unwrap()
            .images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["0.jpg", "1.png", "2.jpg"]);
        drop(stored);
        assert!(h.transport.texts().contains(&"Received image 3. Send more or type 'go'.".to_string()));

        wf.finish_collecting(3).await.unwrap();
        assert!(wf.awaits(3, EventShape::Text));
        assert!(!wf.awaits(3, EventShape::Photo));

        wf.handle(&text(3, "holiday")).await.unwrap();

        let docs = h.transport.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].0, "holiday.pdf");
        assert_eq!(page_widths(&docs[0].2), vec![30, 40, 50]);
        assert_eq!(
            h.transport.last_text().as_deref(),
            Some("Your PDF has been created and sent! It contains 3 pages.")
        );
        assert!(!h.ctx.store.exists(3, WorkflowKind::ImageToPdf));
        assert!(h.leftover_files().is_empty());
    }

    #[tokio::test]
    async fn test_skip_uses_default_name() {
        let h = Harness::new();
        h.transport.register_file("p1", image_bytes(30, 20, ImageFormat::Jpeg));
        let wf = ImageToPdfWorkflow::new(h.ctx.clone());

        wf.start(&command(3, "image2pdf")).await.unwrap();
        wf.skip(3).await.unwrap();
        assert!(h.transport.documents().is_empty());

        wf.handle(&photo(3, "p1")).await.unwrap();
        wf.finish_collecting(3).await.unwrap();
        wf.skip(3).await.unwrap();

        assert_eq!(h.transport.documents()[0].0, "images.pdf");
    }
}
