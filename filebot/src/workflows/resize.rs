//! Resize a photo to a target file size or to fit within given dimensions.
//!
//! `/resizeimage` (as a reply to a photo) → choose size or dimensions →
//! enter the value → the resized photo is sent back.

use super::{Workflow, WorkflowContext};
use crate::backends::image as imaging;
use crate::error::{WorkflowError, WorkflowResult};
use crate::message::{ChatId, EventShape, InboundEvent, InlineButton};
use crate::session::{WorkflowKind, WorkflowState};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

const ORIGINAL_NAME: &str = "original_image.jpg";
const OUTPUT_NAME: &str = "resized_image.jpg";

pub const CALLBACK_FILE_SIZE: &str = "modify_file_size";
pub const CALLBACK_DIMENSIONS: &str = "modify_file_dimensions";
pub const CALLBACK_CANCEL: &str = "cancel";

const SIZE_PROMPT: &str = "Please enter the desired file size in kilobytes (KB).\nFor example: 500 for 500KB";
const DIMENSIONS_PROMPT: &str =
    "Please enter the desired width and height in pixels (separated by a space).\nFor example: 800 600 for 800x600 pixels";

/// What the resize workflow is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeStep {
    AwaitingChoice,
    AwaitingSize,
    AwaitingDimensions,
}

#[derive(Debug, Clone)]
pub struct ResizeState {
    pub step: ResizeStep,
    /// Downloaded photo inside the instance's scratch directory
    pub original: PathBuf,
    pub width: u32,
    pub height: u32,
}

pub struct ResizeWorkflow {
    ctx: Arc<WorkflowContext>,
}

impl ResizeWorkflow {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }

    fn state(&self, chat: ChatId) -> Option<ResizeState> {
        self.ctx
            .store
            .get(chat, WorkflowKind::Resize)
            .and_then(|instance| instance.state.resize().cloned())
    }

    fn set_step(&self, chat: ChatId, step: ResizeStep) {
        self.ctx.store.update(chat, WorkflowKind::Resize, |instance| {
            if let Some(state) = instance.state.resize_mut() {
                state.step = step;
            }
        });
    }

    async fn handle_callback(&self, chat: ChatId, callback_id: &str, data: &str) -> WorkflowResult<()> {
        let transport = &self.ctx.transport;

        if self.state(chat).is_none() {
            transport
                .answer_callback(callback_id, Some("Session expired. Please start over."), true)
                .await?;
            return Ok(());
        }

        match data {
            CALLBACK_CANCEL => {
                self.ctx.store.remove(chat, WorkflowKind::Resize);
                self.ctx.say(chat, "Operation cancelled.").await;
            }
            CALLBACK_FILE_SIZE => {
                self.ctx.say(chat, SIZE_PROMPT).await;
                self.set_step(chat, ResizeStep::AwaitingSize);
            }
            CALLBACK_DIMENSIONS => {
                self.ctx.say(chat, DIMENSIONS_PROMPT).await;
                self.set_step(chat, ResizeStep::AwaitingDimensions);
            }
            other => {
                tracing::debug!(chat_id = chat, data = %other, "Ignoring unknown resize callback");
            }
        }

        transport.answer_callback(callback_id, None, false).await?;
        Ok(())
    }

    async fn handle_size(&self, chat: ChatId, state: &ResizeState, text: &str) -> WorkflowResult<()> {
        let Ok(target_kb) = text.trim().parse::<f64>() else {
            return Err(WorkflowError::InvalidInput(
                "Invalid file size. Please enter a valid number in kilobytes (KB).\nFor example: 500 for 500KB".into(),
            ));
        };
        if !target_kb.is_finite() || target_kb <= 0.0 {
            return Err(WorkflowError::InvalidInput(
                "Please enter a positive file size.".into(),
            ));
        }

        let result = self.shrink_and_send(chat, state, target_kb).await;
        self.finish(chat);
        result
    }

    async fn shrink_and_send(&self, chat: ChatId, state: &ResizeState, target_kb: f64) -> WorkflowResult<()> {
        let original = state.original.clone();
        let sized = tokio::task::spawn_blocking(move || {
            let img = imaging::open(&original)?;
            imaging::shrink_to_file_size(&img, target_kb)
        })
        .await??;

        let output = state.original.with_file_name(OUTPUT_NAME);
        tokio::fs::write(&output, &sized.bytes).await?;
        let caption = format!(
            "Resized Image Details:\nFile Size: {:.2} KB\nQuality: {}%\nDimensions: {}x{}px",
            sized.size_kb(),
            sized.quality,
            state.width,
            state.height
        );
        let sent = self.ctx.transport.send_photo(chat, &output, Some(&caption)).await;
        let _ = tokio::fs::remove_file(&output).await;
        sent?;

        tracing::info!(
            chat_id = chat,
            target_kb,
            quality = sized.quality,
            size_kb = sized.size_kb(),
            "Image resized to file size"
        );
        Ok(())
    }

    async fn handle_dimensions(&self, chat: ChatId, state: &ResizeState, text: &str) -> WorkflowResult<()> {
        let parsed: Vec<i64> = text
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .unwrap_or_default();
        let &[width, height] = parsed.as_slice() else {
            return Err(WorkflowError::InvalidInput(
                "Invalid dimensions. Please enter two numbers separated by a space.\nFor example: 800 600 for 800x600 pixels".into(),
            ));
        };
        if width <= 0 || height <= 0 {
            return Err(WorkflowError::InvalidInput(
                "Please enter positive dimensions.".into(),
            ));
        }
        let width = u32::try_from(width).unwrap_or(u32::MAX);
        let height = u32::try_from(height).unwrap_or(u32::MAX);

        let result = self.fit_and_send(chat, state, width, height).await;
        self.finish(chat);
        result
    }

    async fn fit_and_send(&self, chat: ChatId, state: &ResizeState, width: u32, height: u32) -> WorkflowResult<()> {
        let original = state.original.clone();
        let (bytes, out_width, out_height) = tokio::task::spawn_blocking(move || {
            let img = imaging::open(&original)?;
            let fitted = imaging::fit_within(&img, width, height);
            let bytes = imaging::encode_jpeg(&fitted, imaging::RESIZE_QUALITY)?;
            Ok::<_, crate::backends::BackendError>((bytes, fitted.width(), fitted.height()))
        })
        .await??;

        let output = state.original.with_file_name(OUTPUT_NAME);
        tokio::fs::write(&output, &bytes).await?;
        let caption = format!(
            "Resized Image Details:\nFile Size: {:.2} KB\nDimensions: {}x{}px",
            bytes.len() as f64 / 1024.0,
            out_width,
            out_height
        );
        let sent = self.ctx.transport.send_photo(chat, &output, Some(&caption)).await;
        let _ = tokio::fs::remove_file(&output).await;
        sent?;

        tracing::info!(chat_id = chat, width = out_width, height = out_height, "Image resized to dimensions");
        Ok(())
    }

    /// Drop the instance; its scratch directory goes with it.
    fn finish(&self, chat: ChatId) {
        self.ctx.store.remove(chat, WorkflowKind::Resize);
    }
}

#[async_trait]
impl Workflow for ResizeWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Resize
    }

    fn context(&self) -> &WorkflowContext {
        &self.ctx
    }

    fn awaits(&self, chat: ChatId, shape: EventShape) -> bool {
        let Some(state) = self.state(chat) else {
            return false;
        };
        match shape {
            EventShape::Callback => true,
            EventShape::Text => matches!(state.step, ResizeStep::AwaitingSize | ResizeStep::AwaitingDimensions),
            _ => false,
        }
    }

    async fn start(&self, event: &InboundEvent) -> WorkflowResult<()> {
        let chat = event.chat_id;
        let photo = event
            .reply_to
            .as_ref()
            .and_then(|reply| reply.photo.as_ref())
            .and_then(|photo| photo.largest())
            .ok_or_else(|| {
                WorkflowError::InvalidInput(
                    "Please reply to an image with the /resizeimage command.".into(),
                )
            })?;

        self.ctx.say(chat, "Processing your image...").await;

        let instance = self.ctx.new_instance(
            chat,
            WorkflowState::Resize(ResizeState {
                step: ResizeStep::AwaitingChoice,
                original: PathBuf::new(),
                width: 0,
                height: 0,
            }),
        )?;
        let original = instance.scratch.file(ORIGINAL_NAME);
        let bytes = self
            .ctx
            .transport
            .download_file(&photo.file_id, &original, None)
            .await?;

        let probe_path = original.clone();
        let dimensions = tokio::task::spawn_blocking(move || {
            imaging::open(&probe_path).map(|img| (img.width(), img.height()))
        })
        .await?;
        let (width, height) = match dimensions {
            Ok(dims) => dims,
            Err(e) => {
                tracing::warn!(chat_id = chat, error = %e, "Downloaded photo could not be decoded");
                return Err(WorkflowError::InvalidInput(
                    "Error processing the image. Please try again with a different image.".into(),
                ));
            }
        };

        let mut instance = instance;
        instance.state = WorkflowState::Resize(ResizeState {
            step: ResizeStep::AwaitingChoice,
            original,
            width,
            height,
        });
        self.ctx.replace_instance(chat, instance);

        let details = format!(
            "Image Details:\n\nFile Size: {:.2} MB ({:.2} KB)\nDimensions: {}x{}px\n\nPlease choose a modification option:",
            bytes as f64 / (1024.0 * 1024.0),
            bytes as f64 / 1024.0,
            width,
            height
        );
        let buttons = vec![
            vec![InlineButton::new("Modify File Size", CALLBACK_FILE_SIZE)],
            vec![InlineButton::new("Modify Dimensions", CALLBACK_DIMENSIONS)],
            vec![InlineButton::new("Cancel", CALLBACK_CANCEL)],
        ];
        self.ctx
            .transport
            .send_text_with_buttons(chat, &details, &buttons)
            .await?;
        Ok(())
    }

    async fn handle(&self, event: &InboundEvent) -> WorkflowResult<()> {
        let chat = event.chat_id;

        if let Some(callback) = event.callback() {
            return self.handle_callback(chat, &callback.id, &callback.data).await;
        }

        let (Some(state), Some(text)) = (self.state(chat), event.text()) else {
            return Ok(());
        };
        match state.step {
            ResizeStep::AwaitingSize => self.handle_size(chat, &state, &text).await,
            ResizeStep::AwaitingDimensions => self.handle_dimensions(chat, &state, &text).await,
            ResizeStep::AwaitingChoice => Ok(()),
        }
    }
}
