//! Integration tests for Filebot.
//!
//! Drives the dispatcher end to end over the recording transport and checks
//! the health endpoint.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use filebot::message::{CallbackInfo, DocumentInfo, PhotoInfo, PhotoSize, ReplyContext};
use filebot::{
    build_dispatcher, build_router, ChatId, Dispatcher, EventPayload, InboundEvent, Outbound,
    RecordingTransport, Workspace, WorkflowKind,
};
use filebot_common::Config;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

struct App {
    dispatcher: Arc<Dispatcher>,
    transport: Arc<RecordingTransport>,
    root: tempfile::TempDir,
}

impl App {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = build_dispatcher(
            &Config::default(),
            transport.clone(),
            Workspace::new(root.path()),
        );
        Self {
            dispatcher,
            transport,
            root,
        }
    }

    async fn send(&self, event: InboundEvent) {
        self.dispatcher.dispatch(event).await;
    }

    fn files_left(&self) -> usize {
        walkdir::WalkDir::new(self.root.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }
}

fn event(chat: ChatId, payload: EventPayload) -> InboundEvent {
    InboundEvent {
        chat_id: chat,
        message_id: 10,
        user_id: chat.to_string(),
        payload,
        reply_to: None,
    }
}

fn command(chat: ChatId, name: &str) -> InboundEvent {
    event(
        chat,
        EventPayload::Command {
            name: name.into(),
            args: String::new(),
        },
    )
}

fn text(chat: ChatId, text: &str) -> InboundEvent {
    event(chat, EventPayload::Text { text: text.into() })
}

fn document(chat: ChatId, file_id: &str, name: &str, mime: &str, size: u64) -> InboundEvent {
    event(
        chat,
        EventPayload::Document(DocumentInfo {
            file_id: file_id.into(),
            file_name: Some(name.into()),
            mime_type: Some(mime.into()),
            file_size: size,
        }),
    )
}

fn callback(chat: ChatId, data: &str) -> InboundEvent {
    event(
        chat,
        EventPayload::Callback(CallbackInfo {
            id: "cb".into(),
            data: data.into(),
        }),
    )
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    }));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, bytes) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_endpoints() {
    let app = build_router();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"running.");

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Workflows
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_resize_to_dimensions_scenario() {
    let app = App::new();
    app.transport.register_file("photo", jpeg(1000, 500));

    let mut start = command(1, "resizeimage");
    start.reply_to = Some(ReplyContext {
        message_id: 3,
        photo: Some(PhotoInfo {
            sizes: vec![PhotoSize {
                file_id: "photo".into(),
                width: 1000,
                height: 500,
                file_size: None,
            }],
        }),
        document: None,
    });

    app.send(start).await;
    app.send(callback(1, "modify_file_dimensions")).await;
    app.send(text(1, "800 600")).await;

    let photos = app.transport.photos();
    assert_eq!(photos.len(), 1);
    let resized = image::load_from_memory(&photos[0].2).unwrap();
    assert!(resized.width() <= 800 && resized.height() <= 600);
    assert_eq!((resized.width(), resized.height()), (800, 400));

    let chat_dir = app
        .root
        .path()
        .join(WorkflowKind::Resize.dir_name())
        .join("1");
    assert!(!chat_dir.exists());
    assert_eq!(app.files_left(), 0);
}

#[tokio::test]
async fn test_document_prefers_image_collection_over_merge() {
    let app = App::new();
    app.send(command(1, "mergepdf")).await;
    app.send(command(1, "image2pdf")).await;

    app.send(document(1, "pdf", "a.pdf", "application/pdf", 100)).await;
    assert_eq!(
        app.transport.last_text().as_deref(),
        Some("Please send only image files.")
    );

    // `go` belongs to the image collection, which has nothing yet.
    app.send(text(1, "GO")).await;
    assert_eq!(
        app.transport.last_text().as_deref(),
        Some("You haven't sent any images yet.")
    );
    let ctx = app.dispatcher.context();
    assert!(ctx.store.exists(1, WorkflowKind::MergePdf));
    assert!(ctx.store.exists(1, WorkflowKind::ImageToPdf));
}

#[tokio::test]
async fn test_text_prefers_merge_over_file_convert() {
    let app = App::new();
    app.send(command(1, "fileconv")).await;
    app.send(callback(1, "text_message")).await;
    app.send(command(1, "mergepdf")).await;

    app.send(text(1, "report")).await;
    assert_eq!(
        app.transport.last_text().as_deref(),
        Some("❌ No PDFs received. Please send PDFs first.")
    );
    assert!(app.transport.documents().is_empty());

    // With merge gone the next text reaches the file conversion.
    app.send(text(1, "saved text")).await;
    let docs = app.transport.documents();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].0, "message.txt");
    assert_eq!(docs[0].2, b"saved text");
}

#[tokio::test]
async fn test_unclaimed_archive_is_extracted() {
    let app = App::new();
    app.transport
        .register_file("zip", zip_with(&[("one.txt", b"1"), ("two.txt", b"2")]));

    app.send(document(2, "other", "notes.pdf", "application/pdf", 10)).await;
    assert!(app.transport.actions().is_empty());

    app.send(document(2, "zip", "bundle.zip", "application/zip", 300)).await;
    app.dispatcher.wait_idle().await;

    let names: Vec<String> = app
        .transport
        .documents()
        .into_iter()
        .map(|(name, _, _)| name)
        .collect();
    assert_eq!(names, vec!["one.txt", "two.txt"]);
    assert_eq!(
        app.transport.last_text().as_deref(),
        Some("✅ Extraction complete!")
    );
    assert_eq!(app.files_left(), 0);
}

#[tokio::test]
async fn test_cancel_tears_down_every_workflow() {
    let app = App::new();
    app.send(command(1, "cancel")).await;
    assert_eq!(
        app.transport.last_text().as_deref(),
        Some("No active operation to cancel.")
    );

    app.send(command(1, "mergepdf")).await;
    app.send(command(1, "image2pdf")).await;
    app.send(command(1, "fileconv")).await;
    app.send(command(2, "image2pdf")).await;

    app.send(command(1, "cancel")).await;
    assert_eq!(
        app.transport.last_text().as_deref(),
        Some("✅ Current operation has been cancelled. You can start a new operation.")
    );
    let ctx = app.dispatcher.context();
    assert!(ctx.store.active_kinds(1).is_empty());
    assert!(ctx.store.exists(2, WorkflowKind::ImageToPdf));
}

#[tokio::test]
async fn test_stalled_chat_does_not_block_others() {
    let root = tempfile::tempdir().unwrap();
    let transport = Arc::new(RecordingTransport::new());
    let base = build_dispatcher(&Config::default(), transport.clone(), Workspace::new(root.path()));
    let dispatcher = Arc::new(
        Dispatcher::new(Arc::clone(base.context())).with_worker_idle(Duration::from_millis(50)),
    );

    transport.register_file("zip", zip_with(&[("a.txt", b"a")]));
    transport.stall_download("zip");

    dispatcher.submit(document(1, "zip", "big.zip", "application/zip", 300));
    dispatcher.submit(command(2, "help"));
    dispatcher.submit(command(1, "cancel"));
    dispatcher.wait_idle().await;

    assert!(transport.documents().is_empty());
    assert!(transport
        .texts()
        .iter()
        .any(|t| t.starts_with("🤖 Welcome to the Bot Help Center")));
    assert!(transport.actions().iter().any(|action| matches!(
        action,
        Outbound::Edit { text, .. } if text == "❌ Operation cancelled."
    )));
    assert!(dispatcher.context().store.is_empty());
}
