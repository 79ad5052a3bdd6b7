//! HTTP/JSON interface of the attendance daemon.
//!
//! Application-level outcomes (no face in the image, no confident match) are
//! 200 responses with `success=false`: the browser's approval poller treats
//! every non-success payload as "keep trying" and must never have to tell
//! them apart from one another. Error statuses are reserved for malformed
//! requests (400) and genuine server faults (500).

use axum::extract::{Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use facegate_core::{CosineMatcher, EnrolledFace, Matcher};

use crate::engine::EngineHandle;
use crate::error::{ApiError, ApiResult};
use crate::store::{AttendanceRecord, Store};

const MSG_NO_FACE: &str = "No face detected in image. Please try again.";
const MSG_MULTIPLE_FACES: &str = "Multiple faces detected. Please use an image with a single face.";
const MSG_NOT_RECOGNIZED: &str = "Face not recognized. Please enroll first.";

const STATUS_PRESENT: &str = "Present";

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub store: Store,
    pub similarity_threshold: f32,
}

#[derive(Debug, Deserialize)]
pub struct EnrollWebcamRequest {
    pub name: String,
    /// Base64-encoded still, optionally a `data:` URL.
    pub image: String,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct EnrollResponse {
    pub success: bool,
    pub message: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ApproveResponse {
    pub success: bool,
    pub message: String,
    pub name: Option<String>,
    pub confidence: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_enrolled: usize,
    pub today_present: usize,
    pub today_absent: usize,
    pub absent_users: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AttendanceResponse {
    pub records: Vec<AttendanceRecord>,
}

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub users: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub enrolled_users: usize,
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/enroll/webcam", post(enroll_webcam))
        .route("/api/enroll/file", post(enroll_file))
        .route("/api/approve", post(approve))
        .route("/api/dashboard/stats", get(dashboard_stats))
        .route("/api/dashboard/attendance", get(dashboard_attendance))
        .route("/api/users", get(users))
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "message": "FaceGate API is running"
    }))
}

async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let enrolled_users = state.store.enrolled_names().await?.len();
    Ok(Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
        enrolled_users,
    }))
}

/// POST /api/enroll/webcam — JSON body with a base64-encoded still.
async fn enroll_webcam(
    State(state): State<AppState>,
    Json(req): Json<EnrollWebcamRequest>,
) -> ApiResult<Json<EnrollResponse>> {
    let name = validate_name(&req.name)?;
    let bytes = decode_base64_image(&req.image)?;
    enroll(&state, name, &bytes).await
}

/// POST /api/enroll/file — multipart form with `name` and `file` fields.
async fn enroll_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<EnrollResponse>> {
    let mut name: Option<String> = None;
    let mut file: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        let field_name = field.name().map(|s| s.to_string());
        match field_name.as_deref() {
            Some("name") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {e}")))?;
                name = Some(text);
            }
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {e}")))?;
                file = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    let name = name.ok_or_else(|| ApiError::BadRequest("Name is required".into()))?;
    let name = validate_name(&name)?;
    let file = file.ok_or_else(|| ApiError::BadRequest("Invalid image file".into()))?;

    enroll(&state, name, &file).await
}

/// Shared enrollment path for both the webcam and file endpoints.
async fn enroll(state: &AppState, name: String, image: &[u8]) -> ApiResult<Json<EnrollResponse>> {
    let frame = facegate_core::decode_image(image)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let outcome = state.engine.scan(frame).await?;

    if outcome.faces.len() > 1 {
        tracing::debug!(name = %name, faces = outcome.faces.len(), "enrollment rejected: multiple faces");
        return Ok(Json(EnrollResponse {
            success: false,
            message: MSG_MULTIPLE_FACES.to_string(),
            name,
        }));
    }

    let Some(embedding) = outcome.embedding else {
        tracing::debug!(name = %name, "enrollment rejected: no face detected");
        return Ok(Json(EnrollResponse {
            success: false,
            message: MSG_NO_FACE.to_string(),
            name,
        }));
    };

    state
        .store
        .add_face(EnrolledFace {
            id: Uuid::new_v4().to_string(),
            name: name.clone(),
            embedding,
            created_at: Utc::now().to_rfc3339(),
        })
        .await?;

    tracing::info!(name = %name, "face enrolled");

    Ok(Json(EnrollResponse {
        success: true,
        message: format!("Successfully enrolled {name}"),
        name,
    }))
}

/// POST /api/approve — one recognition attempt against the enrolled set.
async fn approve(
    State(state): State<AppState>,
    Json(req): Json<ApproveRequest>,
) -> ApiResult<Json<ApproveResponse>> {
    let bytes = decode_base64_image(&req.image)?;
    let frame = facegate_core::decode_image(&bytes)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let outcome = state.engine.scan(frame).await?;

    let Some(embedding) = outcome.embedding else {
        return Ok(Json(not_recognized(None)));
    };

    let gallery = state.store.gallery().await?;
    let result = CosineMatcher.compare(&embedding, &gallery, state.similarity_threshold);

    let Some(name) = result.name.filter(|_| result.matched) else {
        tracing::debug!(similarity = result.similarity, "approval: no confident match");
        return Ok(Json(not_recognized(Some(result.similarity))));
    };

    let now = Local::now();
    let date = now.format("%Y-%m-%d").to_string();
    let time = now.format("%H:%M:%S").to_string();

    let inserted = state
        .store
        .mark_attendance(&name, &date, &time, STATUS_PRESENT)
        .await?;

    tracing::info!(
        name = %name,
        similarity = result.similarity,
        newly_recorded = inserted,
        "entry approved"
    );

    Ok(Json(ApproveResponse {
        success: true,
        message: format!("Entry approved. Welcome, {name}!"),
        name: Some(name),
        confidence: Some(result.similarity),
    }))
}

fn not_recognized(confidence: Option<f32>) -> ApproveResponse {
    ApproveResponse {
        success: false,
        message: MSG_NOT_RECOGNIZED.to_string(),
        name: None,
        confidence,
    }
}

/// GET /api/dashboard/stats — today's attendance summary.
async fn dashboard_stats(State(state): State<AppState>) -> ApiResult<Json<DashboardStats>> {
    let enrolled = state.store.enrolled_names().await?;
    let today = Local::now().format("%Y-%m-%d").to_string();
    let present = state.store.present_on(&today).await?;

    let absent_users = absent_names(&enrolled, &present);

    Ok(Json(DashboardStats {
        total_enrolled: enrolled.len(),
        today_present: enrolled.len() - absent_users.len(),
        today_absent: absent_users.len(),
        absent_users,
    }))
}

/// GET /api/dashboard/attendance — all records, most recent first.
async fn dashboard_attendance(
    State(state): State<AppState>,
) -> ApiResult<Json<AttendanceResponse>> {
    let records = state.store.attendance_records().await?;
    Ok(Json(AttendanceResponse { records }))
}

/// GET /api/users — distinct enrolled names.
async fn users(State(state): State<AppState>) -> ApiResult<Json<UsersResponse>> {
    let users = state.store.enrolled_names().await?;
    let count = users.len();
    Ok(Json(UsersResponse { users, count }))
}

/// Reject empty or whitespace-only names; return the trimmed name otherwise.
/// The client pre-validates, but it is not trusted.
fn validate_name(name: &str) -> Result<String, ApiError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest("Name is required".into()));
    }
    Ok(trimmed.to_string())
}

/// Decode a base64 image payload, tolerating a `data:image/...;base64,` prefix.
fn decode_base64_image(payload: &str) -> Result<Vec<u8>, ApiError> {
    let encoded = match payload.split_once(',') {
        Some((_, rest)) => rest,
        None => payload,
    };
    BASE64
        .decode(encoded.trim())
        .map_err(|e| ApiError::BadRequest(format!("Invalid image format: {e}")))
}

/// Enrolled names with no attendance today, preserving enrollment order.
fn absent_names(enrolled: &[String], present: &[String]) -> Vec<String> {
    enrolled
        .iter()
        .filter(|name| !present.contains(name))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScanOutcome;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use facegate_core::{BoundingBox, Embedding};
    use image::{ImageBuffer, Luma};
    use std::io::Cursor;
    use tower::ServiceExt;

    fn bbox(confidence: f32) -> BoundingBox {
        BoundingBox {
            x: 10.0,
            y: 10.0,
            width: 50.0,
            height: 50.0,
            confidence,
            landmarks: None,
        }
    }

    fn embedding(values: Vec<f32>) -> Embedding {
        Embedding { values, model_version: Some("w600k_r50".into()) }
    }

    fn one_face_outcome(values: Vec<f32>) -> ScanOutcome {
        ScanOutcome {
            faces: vec![bbox(0.95)],
            embedding: Some(embedding(values)),
        }
    }

    fn png_base64() -> String {
        let img: ImageBuffer<Luma<u8>, Vec<u8>> = ImageBuffer::from_pixel(16, 16, Luma([120]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        BASE64.encode(out.into_inner())
    }

    async fn app(outcome: ScanOutcome) -> (Router, Store) {
        let store = Store::open_in_memory().await.unwrap();
        let state = AppState {
            engine: EngineHandle::stub(outcome),
            store: store.clone(),
            similarity_threshold: 0.5,
        };
        (build_router(state), store)
    }

    async fn post_json(router: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_validate_name_trims() {
        assert_eq!(validate_name("  Alice ").unwrap(), "Alice");
    }

    #[test]
    fn test_validate_name_rejects_whitespace() {
        assert!(validate_name("").is_err());
        assert!(validate_name("   ").is_err());
        assert!(validate_name("\t\n").is_err());
    }

    #[test]
    fn test_decode_base64_plain_and_data_url() {
        let encoded = BASE64.encode(b"hello");
        let plain = decode_base64_image(&encoded).unwrap();
        let data_url = decode_base64_image(&format!("data:image/png;base64,{encoded}")).unwrap();
        assert_eq!(plain, b"hello");
        assert_eq!(data_url, plain);
    }

    #[test]
    fn test_decode_base64_rejects_garbage() {
        assert!(decode_base64_image("!!not base64!!").is_err());
    }

    #[test]
    fn test_absent_names_preserves_order() {
        let enrolled = vec!["bob".to_string(), "alice".to_string(), "carol".to_string()];
        let present = vec!["alice".to_string()];
        assert_eq!(
            absent_names(&enrolled, &present),
            vec!["bob".to_string(), "carol".to_string()]
        );
    }

    #[tokio::test]
    async fn test_enroll_empty_name_rejected_before_detection() {
        let (router, store) = app(one_face_outcome(vec![1.0, 0.0, 0.0])).await;
        let (status, body) = post_json(
            &router,
            "/api/enroll/webcam",
            serde_json::json!({"name": "   ", "image": png_base64()}),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Name is required");
        assert!(store.gallery().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enroll_bad_base64_rejected() {
        let (router, _store) = app(one_face_outcome(vec![1.0])).await;
        let (status, body) = post_json(
            &router,
            "/api/enroll/webcam",
            serde_json::json!({"name": "Alice", "image": "@@@@"}),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().starts_with("Invalid image format"));
    }

    #[tokio::test]
    async fn test_enroll_no_face_is_success_false_not_error() {
        let outcome = ScanOutcome { faces: vec![], embedding: None };
        let (router, store) = app(outcome).await;
        let (status, body) = post_json(
            &router,
            "/api/enroll/webcam",
            serde_json::json!({"name": "Alice", "image": png_base64()}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], MSG_NO_FACE);
        // No embedding persisted for a zero-face image.
        assert!(store.gallery().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enroll_multiple_faces_rejected() {
        let outcome = ScanOutcome {
            faces: vec![bbox(0.95), bbox(0.80)],
            embedding: Some(embedding(vec![1.0, 0.0, 0.0])),
        };
        let (router, store) = app(outcome).await;
        let (status, body) = post_json(
            &router,
            "/api/enroll/webcam",
            serde_json::json!({"name": "Alice", "image": png_base64()}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], MSG_MULTIPLE_FACES);
        assert!(store.gallery().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enroll_single_face_persists_embedding() {
        let (router, store) = app(one_face_outcome(vec![1.0, 0.0, 0.0])).await;
        let (status, body) = post_json(
            &router,
            "/api/enroll/webcam",
            serde_json::json!({"name": " Alice ", "image": png_base64()}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["name"], "Alice");
        assert_eq!(body["message"], "Successfully enrolled Alice");

        let gallery = store.gallery().await.unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].name, "Alice");
        assert_eq!(gallery[0].embedding.values, vec![1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_enroll_file_multipart() {
        let (router, store) = app(one_face_outcome(vec![0.0, 1.0, 0.0])).await;

        let img: ImageBuffer<Luma<u8>, Vec<u8>> = ImageBuffer::from_pixel(16, 16, Luma([120]));
        let mut png = Cursor::new(Vec::new());
        img.write_to(&mut png, image::ImageFormat::Png).unwrap();

        let boundary = "facegate-test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nBob\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"bob.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(&png.into_inner());
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/enroll/file")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["name"], "Bob");
        assert_eq!(store.gallery().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_approve_match_records_attendance_once() {
        let (router, store) = app(one_face_outcome(vec![1.0, 0.0, 0.0])).await;
        store
            .add_face(EnrolledFace {
                id: "f1".into(),
                name: "alice".into(),
                embedding: embedding(vec![1.0, 0.0, 0.0]),
                created_at: "2026-01-01T08:00:00Z".into(),
            })
            .await
            .unwrap();

        let req = serde_json::json!({"image": png_base64()});

        // Repeated polling: two approvals on the same day.
        let (status, body) = post_json(&router, "/api/approve", req.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["name"], "alice");
        assert!((body["confidence"].as_f64().unwrap() - 1.0).abs() < 1e-5);

        let (_, body2) = post_json(&router, "/api/approve", req).await;
        assert_eq!(body2["success"], true);

        let records = store.attendance_records().await.unwrap();
        assert_eq!(records.len(), 1, "same-day approvals must not duplicate attendance");
        assert_eq!(records[0].name, "alice");
        assert_eq!(records[0].status, "Present");
    }

    #[tokio::test]
    async fn test_approve_below_threshold_not_recognized() {
        let (router, store) = app(one_face_outcome(vec![1.0, 0.0, 0.0])).await;
        store
            .add_face(EnrolledFace {
                id: "f1".into(),
                name: "bob".into(),
                embedding: embedding(vec![0.0, 1.0, 0.0]),
                created_at: "2026-01-01T08:00:00Z".into(),
            })
            .await
            .unwrap();

        let (status, body) =
            post_json(&router, "/api/approve", serde_json::json!({"image": png_base64()})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], MSG_NOT_RECOGNIZED);
        assert!(body["name"].is_null());
        assert!(store.attendance_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_approve_empty_gallery_not_recognized() {
        let (router, _store) = app(one_face_outcome(vec![1.0, 0.0, 0.0])).await;
        let (status, body) =
            post_json(&router, "/api/approve", serde_json::json!({"image": png_base64()})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_approve_no_face_silent_non_success() {
        let (router, _store) = app(ScanOutcome { faces: vec![], embedding: None }).await;
        let (status, body) =
            post_json(&router, "/api/approve", serde_json::json!({"image": png_base64()})).await;

        // Same envelope as "no match": the poller cannot and need not
        // distinguish the two.
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], MSG_NOT_RECOGNIZED);
    }

    #[tokio::test]
    async fn test_stats_invariant_and_absentees() {
        let (router, store) = app(one_face_outcome(vec![1.0, 0.0, 0.0])).await;
        store
            .add_face(EnrolledFace {
                id: "f1".into(),
                name: "alice".into(),
                embedding: embedding(vec![1.0, 0.0, 0.0]),
                created_at: "2026-01-01T08:00:00Z".into(),
            })
            .await
            .unwrap();
        store
            .add_face(EnrolledFace {
                id: "f2".into(),
                name: "bob".into(),
                embedding: embedding(vec![0.0, 1.0, 0.0]),
                created_at: "2026-01-02T08:00:00Z".into(),
            })
            .await
            .unwrap();

        let today = Local::now().format("%Y-%m-%d").to_string();
        store.mark_attendance("alice", &today, "09:00:00", "Present").await.unwrap();

        let (status, body) = get_json(&router, "/api/dashboard/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_enrolled"], 2);
        assert_eq!(body["today_present"], 1);
        assert_eq!(body["today_absent"], 1);
        assert_eq!(body["absent_users"], serde_json::json!(["bob"]));
        assert_eq!(
            body["total_enrolled"].as_u64().unwrap(),
            body["today_present"].as_u64().unwrap() + body["today_absent"].as_u64().unwrap()
        );
    }

    #[tokio::test]
    async fn test_attendance_endpoint_wraps_records() {
        let (router, store) = app(ScanOutcome { faces: vec![], embedding: None }).await;
        store.mark_attendance("alice", "2026-08-25", "09:00:00", "Present").await.unwrap();

        let (status, body) = get_json(&router, "/api/dashboard/attendance").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["records"][0]["name"], "alice");
        assert_eq!(body["records"][0]["status"], "Present");
    }

    #[tokio::test]
    async fn test_users_and_health() {
        let (router, store) = app(ScanOutcome { faces: vec![], embedding: None }).await;
        store
            .add_face(EnrolledFace {
                id: "f1".into(),
                name: "alice".into(),
                embedding: embedding(vec![1.0]),
                created_at: "2026-01-01T08:00:00Z".into(),
            })
            .await
            .unwrap();

        let (status, body) = get_json(&router, "/api/users").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["users"], serde_json::json!(["alice"]));
        assert_eq!(body["count"], 1);

        let (status, body) = get_json(&router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["enrolled_users"], 1);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_root_banner() {
        let (router, _store) = app(ScanOutcome { faces: vec![], embedding: None }).await;
        let (status, body) = get_json(&router, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
