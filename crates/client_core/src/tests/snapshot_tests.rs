use super::*;
use axum::{extract::Path as UrlPath, http::header, response::IntoResponse, routing::get, Router};
use tokio::net::TcpListener;

fn fake_jpeg() -> Vec<u8> {
    let mut jpeg = vec![0xFF, 0xD8];
    // APP0 / JFIF
    jpeg.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
    jpeg.extend_from_slice(b"JFIF\0");
    jpeg.extend_from_slice(&[1, 1, 0, 0, 1, 0, 1, 0, 0]);
    // DQT with a tiny payload, then EOI
    jpeg.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x04, 0x00, 0x00]);
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    jpeg
}

fn part(jpeg: &[u8], extra_headers: &str) -> Vec<u8> {
    let mut part =
        format!("--frame\r\nContent-Type: image/jpeg\r\n{extra_headers}\r\n").into_bytes();
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

#[test]
fn reads_first_part_across_chunk_boundaries() {
    let jpeg = fake_jpeg();
    let body = part(&jpeg, "");
    let mut reader = MultipartFrameReader::new("frame");

    let mut frame = None;
    for chunk in body.chunks(5) {
        if let Some(found) = reader.push(chunk).expect("push") {
            frame = Some(found);
            break;
        }
    }
    assert_eq!(frame, Some(jpeg));
}

#[test]
fn honours_content_length_when_present() {
    let jpeg = fake_jpeg();
    let body = part(&jpeg, &format!("Content-Length: {}\r\n", jpeg.len()));
    let mut reader = MultipartFrameReader::new("frame");

    assert_eq!(reader.push(&body[..body.len() - 4]).expect("push"), None);
    assert_eq!(reader.push(&body[body.len() - 4..]).expect("push"), Some(jpeg));
}

#[test]
fn ends_part_at_next_delimiter() {
    let first = b"\xFF\xD8not-really-a-jpeg".to_vec();
    let mut body = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
    body.extend_from_slice(&first);
    body.extend_from_slice(b"\r\n--frame\r\n");
    let mut reader = MultipartFrameReader::new("frame");

    assert_eq!(reader.push(&body).expect("push"), Some(first));
}

#[test]
fn gives_up_on_oversized_frames() {
    let mut reader = MultipartFrameReader::with_limit("frame", 64);
    reader
        .push(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8")
        .expect("push");
    let err = reader.push(&[0u8; 64]).expect_err("too large");
    assert!(matches!(err, SnapshotError::FrameTooLarge { limit: 64 }));
}

#[test]
fn boundary_is_read_from_content_type() {
    assert_eq!(
        boundary_from_content_type("multipart/x-mixed-replace;boundary=frame").as_deref(),
        Some("frame")
    );
    assert_eq!(
        boundary_from_content_type("multipart/x-mixed-replace; Boundary=\"xyz\"").as_deref(),
        Some("xyz")
    );
    assert_eq!(boundary_from_content_type("image/jpeg"), None);
}

#[test]
fn comment_is_inserted_after_app_segments() {
    let jpeg = fake_jpeg();
    let out = embed_comment(&jpeg, "prompt: cat").expect("embed");

    // SOI (2) + APP0 (2 + 16) = 20
    assert_eq!(&out[..20], &jpeg[..20]);
    assert_eq!(&out[20..22], &[0xFF, 0xFE]);
    assert_eq!(u16::from_be_bytes([out[22], out[23]]), 2 + 11);
    assert_eq!(&out[24..35], b"prompt: cat");
    assert_eq!(&out[35..], &jpeg[20..]);
}

#[test]
fn comment_rejects_non_jpeg_and_truncates_long_text() {
    assert!(matches!(
        embed_comment(b"GIF89a", "x"),
        Err(SnapshotError::NotJpeg)
    ));

    let long = "é".repeat(40_000);
    let out = embed_comment(&fake_jpeg(), &long).expect("embed");
    let declared = u16::from_be_bytes([out[22], out[23]]) as usize;
    let payload = &out[24..24 + declared - 2];
    assert!(payload.len() <= MAX_SEGMENT_PAYLOAD);
    assert!(std::str::from_utf8(payload).is_ok());
}

async fn stream_handler(UrlPath(session_id): UrlPath<String>) -> impl IntoResponse {
    let mut body = part(&fake_jpeg(), "");
    body.extend_from_slice(session_id.as_bytes());
    (
        [(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace;boundary=frame",
        )],
        body,
    )
}

#[tokio::test]
async fn capture_reads_stream_and_writes_image_with_sidecar() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new().route("/stream/:session_id", get(stream_handler));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let url = Url::parse(&format!("http://{addr}/stream/abc")).expect("url");
    let params = SessionParameters {
        prompt: "a red fox".into(),
        seed: 11,
        guidance_scale: 4.0,
    };
    let snapshot = capture(
        &Client::new(),
        &url,
        SessionId::new("abc"),
        params.clone(),
        Duration::from_secs(5),
    )
    .await
    .expect("capture");

    assert_eq!(snapshot.metadata.description, params.describe());
    assert!(snapshot.jpeg.starts_with(&JPEG_SOI));
    let comment = params.describe().into_bytes();
    assert!(snapshot
        .jpeg
        .windows(comment.len())
        .any(|window| window == comment.as_slice()));

    let dir = tempfile::tempdir().expect("tempdir");
    let saved = snapshot.write_to(dir.path()).await.expect("write");
    assert_eq!(
        std::fs::read(&saved.image_path).expect("image"),
        snapshot.jpeg
    );
    let sidecar: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&saved.metadata_path).expect("sidecar"))
            .expect("json");
    assert_eq!(sidecar["session_id"], "abc");
    assert_eq!(sidecar["parameters"]["prompt"], "a red fox");
    assert_eq!(sidecar["parameters"]["seed"], 11);
}

#[tokio::test]
async fn capture_fails_when_stream_ends_early() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new().route(
        "/stream/:session_id",
        get(|| async { "--frame\r\nContent-Type: image/jpeg\r\n\r\n" }),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let url = Url::parse(&format!("http://{addr}/stream/abc")).expect("url");
    let err = capture(
        &Client::new(),
        &url,
        SessionId::new("abc"),
        SessionParameters::default(),
        Duration::from_secs(5),
    )
    .await
    .expect_err("must fail");
    assert!(matches!(err, SnapshotError::StreamEnded));
}
