use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use rust_convert_backend::config::ServiceConfig;
use rust_convert_backend::services::store::EphemeralStore;
use rust_convert_backend::{AppState, create_app};
use serde_json::Value;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "X-CONVERT-BOUNDARY";

enum Part<'a> {
    File(&'a str, &'a str, Vec<u8>),
    Text(&'a str, &'a str),
}

async fn setup(config: impl FnOnce(&mut ServiceConfig)) -> (TempDir, AppState, Router) {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = ServiceConfig::development(dir.path());
    config(&mut cfg);
    let store = Arc::new(EphemeralStore::open_dir(dir.path()).await.unwrap());
    let state = AppState::new(store, cfg);
    let app = create_app(state.clone());
    (dir, state, app)
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, _| Rgb([x as u8, 100, 200]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageOutputFormat::Jpeg(80))
        .unwrap();
    buf.into_inner()
}

fn multipart(uri: &str, parts: Vec<Part<'_>>) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File(name, filename, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&data);
            }
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}", name, value)
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn error_message(response: axum::response::Response) -> String {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    json["error"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_home_and_health() {
    let (_dir, state, app) = setup(|_| {}).await;

    let (status, body) = get_json(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Conversion backend running");

    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"], "ready");
    assert_eq!(body["renderer"], state.pipeline.renderer_name());
}

#[tokio::test]
async fn test_jpg_to_pdf_returns_pdf_attachment() {
    let (_dir, state, app) = setup(|_| {}).await;

    let response = app
        .clone()
        .oneshot(multipart(
            "/jpg_to_pdf",
            vec![
                Part::File("files", "one.jpg", jpeg(50, 40)),
                Part::File("files", "two.jpg", jpeg(20, 30)),
                Part::Text("quality", "high"),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/pdf"
    );
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment;"));
    assert!(disposition.contains("converted.pdf"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let doc = lopdf::Document::load_mem(&body).unwrap();
    assert_eq!(doc.get_pages().len(), 2);

    // Inputs are gone, only the artifact waits for the reaper
    let keys = state.store.keys().await;
    assert_eq!(keys.len(), 1);
    assert!(keys[0].ends_with("converted.pdf"));

    let (_, stats) = get_json(&app, "/stats").await;
    assert_eq!(stats["total_conversions"], 1);
    assert_eq!(stats["active_conversions"], 0);
    assert_eq!(stats["active_users"], 0);
}

#[tokio::test]
async fn test_assemble_alias_with_separate_pdfs() {
    let (_dir, _state, app) = setup(|_| {}).await;

    let response = app
        .oneshot(multipart(
            "/assemble",
            vec![
                Part::File("file", "a.jpg", jpeg(10, 10)),
                Part::File("file", "b.jpg", jpeg(12, 12)),
                Part::Text("merge_after", "false"),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/zip"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let archive = zip::ZipArchive::new(Cursor::new(body.to_vec())).unwrap();
    assert_eq!(archive.len(), 2);
}

#[tokio::test]
async fn test_jpg_to_pdf_without_files_writes_nothing() {
    let (_dir, state, app) = setup(|_| {}).await;

    let response = app
        .clone()
        .oneshot(multipart(
            "/jpg_to_pdf",
            vec![
                Part::Text("quality", "low"),
                // An empty file input from a browser form
                Part::File("files", "", Vec::new()),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "No files uploaded");
    assert!(state.store.keys().await.is_empty());

    let (_, stats) = get_json(&app, "/stats").await;
    assert_eq!(stats["total_conversions"], 0);
}

#[tokio::test]
async fn test_jpg_to_pdf_names_corrupt_file() {
    let (_dir, state, app) = setup(|_| {}).await;

    let response = app
        .oneshot(multipart(
            "/jpg_to_pdf",
            vec![
                Part::File("files", "good.jpg", jpeg(8, 8)),
                Part::File("files", "broken.jpg", b"garbage".to_vec()),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(error_message(response).await.contains("broken.jpg"));
    assert!(state.store.keys().await.is_empty());
    assert_eq!(state.counters.snapshot().active_conversions, 0);
}

#[tokio::test]
async fn test_jpg_to_pdf_rejects_unknown_quality() {
    let (_dir, state, app) = setup(|_| {}).await;

    let response = app
        .oneshot(multipart(
            "/jpg_to_pdf",
            vec![
                Part::File("files", "good.jpg", jpeg(8, 8)),
                Part::Text("quality", "ultra"),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(error_message(response).await.contains("ultra"));
    assert!(state.store.keys().await.is_empty());
}

#[tokio::test]
async fn test_pdf_to_jpg_round_trip() {
    let (_dir, state, app) = setup(|_| {}).await;

    let pdf = app
        .clone()
        .oneshot(multipart(
            "/jpg_to_pdf",
            vec![
                Part::File("files", "p1.jpg", jpeg(30, 20)),
                Part::File("files", "p2.jpg", jpeg(20, 30)),
                Part::File("files", "p3.jpg", jpeg(15, 15)),
            ],
        ))
        .await
        .unwrap()
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes();

    let response = app
        .clone()
        .oneshot(multipart(
            "/pdf_to_jpg",
            vec![Part::File("file", "doc.pdf", pdf.to_vec())],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/zip"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let mut archive = zip::ZipArchive::new(Cursor::new(body.to_vec())).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert_eq!(names, vec!["page_1.jpg", "page_2.jpg", "page_3.jpg"]);

    let mut first = Vec::new();
    archive
        .by_name("page_1.jpg")
        .unwrap()
        .read_to_end(&mut first)
        .unwrap();
    let page = image::load_from_memory(&first).unwrap();
    assert_eq!((page.width(), page.height()), (30, 20));

    assert_eq!(state.counters.snapshot().total_conversions, 2);
}

#[tokio::test]
async fn test_pdf_to_jpg_errors() {
    let (_dir, state, app) = setup(|_| {}).await;

    let response = app
        .clone()
        .oneshot(multipart("/split", vec![Part::Text("quality", "low")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "No file uploaded");

    let response = app
        .clone()
        .oneshot(multipart(
            "/pdf_to_jpg",
            vec![Part::File("file", "fake.pdf", b"just text".to_vec())],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(error_message(response).await.contains("fake.pdf"));

    assert!(state.store.keys().await.is_empty());
    assert_eq!(state.counters.snapshot().total_conversions, 0);
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let (_dir, state, app) = setup(|cfg| cfg.max_content_length = 4 * 1024).await;

    let response = app
        .oneshot(multipart(
            "/jpg_to_pdf",
            vec![Part::File("files", "big.jpg", vec![0u8; 64 * 1024])],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(state.store.keys().await.is_empty());
}

#[tokio::test]
async fn test_concurrent_requests_release_active_users() {
    let (_dir, state, app) = setup(|_| {}).await;

    let mut handles = Vec::new();
    for i in 0..12 {
        let app = app.clone();
        let request = match i % 3 {
            0 => multipart(
                "/jpg_to_pdf",
                vec![Part::File("files", "page.jpg", jpeg(16, 16))],
            ),
            1 => multipart(
                "/jpg_to_pdf",
                vec![Part::File("files", "broken.jpg", b"garbage".to_vec())],
            ),
            _ => multipart("/pdf_to_jpg", vec![Part::Text("quality", "low")]),
        };
        handles.push(tokio::spawn(async move {
            let response = app.oneshot(request).await.unwrap();
            let status = response.status();
            // Finish streaming the artifact before the request counts as over
            response.into_body().collect().await.unwrap();
            status
        }));
    }

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::BAD_REQUEST => {}
            other => panic!("unexpected status {}", other),
        }
    }
    assert_eq!(ok, 4);

    let (_, stats) = get_json(&app, "/stats").await;
    assert_eq!(stats["active_users"], 0);
    assert_eq!(stats["active_conversions"], 0);
    assert_eq!(stats["total_conversions"], 4);
    assert_eq!(state.store.keys().await.len(), 4);
}
