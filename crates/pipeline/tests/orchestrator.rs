use std::sync::Arc;

use async_trait::async_trait;
use graspmind::{
    CancellationFlag, ErrorKind, ImageSource, Orchestrator, PipelineConfig, Stage, StageOutput,
};
use grasp_common::BoundingBox;
use image::{DynamicImage, Rgb, RgbImage};
use model_client::{CompletionRequest, ModelBackend, TransportError, testing::ScriptedBackend};
use serde_json::{Value, json};

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.max_dimension = 400;
    config.retry.initial_backoff_ms = 0;
    config.retry.max_backoff_ms = 0;
    config
}

/// 800x600 scene, preprocessed to 400x300
fn scene() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(800, 600, Rgb([240, 240, 240])))
}

fn detection() -> Value {
    json!({"objects": [{"label": "mug", "bbox_2d": [100, 100, 260, 260], "confidence": 0.93}]})
}

fn intent() -> Value {
    json!({"target_object_id": 1, "rationale": "A mug is used for drinking water."})
}

fn description() -> Value {
    json!({"object_id": 1, "components": [
        {"name": "handle", "description": "Loop on the side for holding"},
        {"name": "body", "description": "Holds the liquid"},
        {"name": "rim", "description": "Where the person drinks from"}
    ]})
}

fn safety(part: &str) -> Value {
    json!({"object_id": 1, "target_part_name": part, "justification": "Keeps the rim clean and away from the gripper."})
}

fn segmentation(points: Value) -> Value {
    json!({
        "object_id": 1,
        "target_part_name": "handle",
        "mask_encoding": {"type": "polygon", "points": points}
    })
}

fn handle_polygon() -> Value {
    json!([[230, 150], [260, 150], [260, 210], [230, 210]])
}

fn mug_backend() -> ScriptedBackend {
    ScriptedBackend::new()
        .reply_json("detection", detection())
        .reply_json("intent", intent())
        .reply_json("description", description())
        .reply_json("safety", safety("handle"))
        .reply_json("segmentation", segmentation(handle_polygon()))
}

fn orchestrator(backend: &Arc<ScriptedBackend>) -> Orchestrator {
    Orchestrator::new(config(), backend.clone())
}

#[tokio::test]
async fn test_mug_handle_end_to_end() {
    let backend = Arc::new(mug_backend());
    let image = scene();

    let result = orchestrator(&backend).run(ImageSource::Image(&image), "I want to drink water").await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert!(result.error.is_none());
    let stages: Vec<Stage> = result.stage_outputs.iter().map(StageOutput::stage).collect();
    assert_eq!(stages, Stage::MODEL_STAGES);

    let mask = result.final_mask.as_ref().unwrap();
    assert_eq!((mask.width(), mask.height()), (800, 600));
    assert_eq!(mask.area(), 60 * 120);
    assert_eq!(mask.bounding_box(), Some(BoundingBox::from([460.0, 300.0, 520.0, 420.0])));

    // Nothing outside the mug's original-resolution box
    for (x, y, pixel) in mask.as_image().enumerate_pixels() {
        if pixel[0] != 0 {
            assert!((200..520).contains(&x) && (200..520).contains(&y), "stray pixel at ({x}, {y})");
        }
    }

    assert_eq!(result.target_object().unwrap().label, "mug");
    assert_eq!(result.safety_decision().unwrap().target_part_name, "handle");

    let transform = result.transform.unwrap();
    assert_eq!((transform.original_width, transform.preprocessed_width), (800, 400));
    assert_eq!(result.detections().unwrap().len(), 1);
}

#[tokio::test]
async fn test_stage_requests_follow_config() {
    let backend = Arc::new(mug_backend());
    let image = scene();

    orchestrator(&backend).run(ImageSource::Image(&image), "I want to drink water").await;

    let calls = backend.calls();
    let by_stage = |stage: &str| calls.iter().find(|c| c.stage == stage).unwrap();

    assert!(by_stage("detection").has_image);
    assert_eq!(by_stage("detection").model, "gpt-4o");
    assert!(!by_stage("intent").has_image);
    assert_eq!(by_stage("intent").model, "gpt-4o-mini");
    assert!(by_stage("intent").prompt.contains("I want to drink water"));
    assert!(by_stage("safety").prompt.contains("rim"));
    assert!(by_stage("segmentation").prompt.contains("400x300"));
}

#[tokio::test]
async fn test_unknown_part_fails_at_safety_with_four_outputs() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .reply_json("detection", detection())
            .reply_json("intent", intent())
            .reply_json("description", description())
            .reply_json("safety", safety("blade"))
            .reply_json("segmentation", segmentation(handle_polygon())),
    );
    let image = scene();

    let result = orchestrator(&backend).run(ImageSource::Image(&image), "Hand me the mug").await;

    assert!(!result.success);
    assert!(result.final_mask.is_none());
    let error = result.error.as_ref().unwrap();
    assert_eq!(error.failed_stage, Stage::Safety);
    assert_eq!(error.kind, ErrorKind::ContractViolation);
    assert!(error.message.contains("blade"));
    assert_eq!(result.stage_outputs.len(), 4);
    assert_eq!(backend.call_count("segmentation"), 0);
}

#[tokio::test]
async fn test_unknown_target_never_reaches_description() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .reply_json("detection", detection())
            .reply_json("intent", json!({"target_object_id": 9, "rationale": "?"}))
            .reply_json("description", description()),
    );
    let image = scene();

    let result = orchestrator(&backend).run(ImageSource::Image(&image), "I want to drink water").await;

    let error = result.error.unwrap();
    assert_eq!(error.failed_stage, Stage::Intent);
    assert_eq!(error.kind, ErrorKind::ContractViolation);
    assert_eq!(result.stage_outputs.len(), 2);
    assert_eq!(backend.call_count("description"), 0);
}

#[tokio::test]
async fn test_exhausted_retries_make_stage_unavailable() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .fail("detection", TransportError::Timeout)
            .fail("detection", TransportError::Status { code: 429, body: "rate limited".into() })
            .fail("detection", TransportError::Connection("reset by peer".into()))
            .reply_json("detection", detection()),
    );
    let image = scene();

    let result = orchestrator(&backend).run(ImageSource::Image(&image), "I want to drink water").await;

    let error = result.error.unwrap();
    assert_eq!(error.failed_stage, Stage::Detection);
    assert_eq!(error.kind, ErrorKind::StageUnavailable);
    assert!(error.message.contains("detection"));
    assert!(result.stage_outputs.is_empty());
    assert_eq!(backend.call_count("detection"), 3);
}

#[tokio::test]
async fn test_rejected_credentials_fail_immediately() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .fail("detection", TransportError::Status { code: 401, body: "invalid api key".into() }),
    );
    let image = scene();

    let result = orchestrator(&backend).run(ImageSource::Image(&image), "I want to drink water").await;

    assert_eq!(result.error.unwrap().kind, ErrorKind::RequestRejected);
    assert_eq!(backend.call_count("detection"), 1);
}

#[tokio::test]
async fn test_malformed_reply_reports_raw_payload() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .reply_json("detection", detection())
            .reply("intent", "The user probably wants the mug."),
    );
    let image = scene();

    let result = orchestrator(&backend).run(ImageSource::Image(&image), "I want to drink water").await;

    let error = result.error.unwrap();
    assert_eq!(error.failed_stage, Stage::Intent);
    assert_eq!(error.kind, ErrorKind::MalformedResponse);
    assert_eq!(error.raw_payload.as_deref(), Some("The user probably wants the mug."));
    assert_eq!(result.stage_outputs.len(), 1);
}

#[tokio::test]
async fn test_polygon_outside_image_is_empty_mask() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .reply_json("detection", detection())
            .reply_json("intent", intent())
            .reply_json("description", description())
            .reply_json("safety", safety("handle"))
            .reply_json("segmentation", segmentation(json!([[500, 10], [600, 10], [600, 50], [500, 50]]))),
    );
    let image = scene();

    let result = orchestrator(&backend).run(ImageSource::Image(&image), "I want to drink water").await;

    let error = result.error.unwrap();
    assert_eq!(error.failed_stage, Stage::Materialization);
    assert_eq!(error.kind, ErrorKind::EmptyMask);
    assert_eq!(result.stage_outputs.len(), 5);
}

#[tokio::test]
async fn test_empty_instruction_rejected_before_any_call() {
    let backend = Arc::new(mug_backend());
    let image = scene();

    let result = orchestrator(&backend).run(ImageSource::Image(&image), "   ").await;

    let error = result.error.unwrap();
    assert_eq!(error.failed_stage, Stage::Detection);
    assert_eq!(error.kind, ErrorKind::ContractViolation);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_config_rejected_before_any_call() {
    let backend = Arc::new(mug_backend());
    let image = scene();
    let mut config = config();
    config.stages.safety.temperature = 3.0;

    let result = Orchestrator::new(config, backend.clone())
        .run(ImageSource::Image(&image), "I want to drink water")
        .await;

    let error = result.error.unwrap();
    assert_eq!(error.failed_stage, Stage::Preprocessing);
    assert_eq!(error.kind, ErrorKind::InvalidConfig);
    assert!(error.message.contains("stages.safety.temperature"));
    assert!(result.stage_outputs.is_empty());
    assert!(result.transform.is_none());
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_undecodable_image_fails_preprocessing() {
    let backend = Arc::new(mug_backend());

    let result = orchestrator(&backend)
        .run(ImageSource::Bytes(b"not an image"), "I want to drink water")
        .await;

    let error = result.error.unwrap();
    assert_eq!(error.failed_stage, Stage::Preprocessing);
    assert_eq!(error.kind, ErrorKind::UnsupportedFormat);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_encoded_bytes_input() {
    let backend = Arc::new(mug_backend());
    let mut png = Vec::new();
    scene()
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();

    let result = orchestrator(&backend).run(ImageSource::Bytes(&png), "I want to drink water").await;

    assert!(result.success);
    assert_eq!(result.mask.as_ref().unwrap().area, 7200);
}

/// Sets the flag as soon as a given stage has been answered
struct CancelAfter {
    inner: ScriptedBackend,
    stage: &'static str,
    flag: CancellationFlag,
}

#[async_trait]
impl ModelBackend for CancelAfter {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, TransportError> {
        let reply = self.inner.complete(request).await;
        if request.stage == self.stage {
            self.flag.cancel();
        }
        reply
    }
}

#[tokio::test]
async fn test_cancellation_stops_at_next_stage() {
    let flag = CancellationFlag::new();
    let backend = Arc::new(CancelAfter { inner: mug_backend(), stage: "detection", flag: flag.clone() });
    let image = scene();

    let result = Orchestrator::new(config(), backend)
        .run_with_cancel(ImageSource::Image(&image), "I want to drink water", &flag)
        .await;

    let error = result.error.unwrap();
    assert_eq!(error.failed_stage, Stage::Intent);
    assert_eq!(error.kind, ErrorKind::Cancelled);
    assert_eq!(result.stage_outputs.len(), 1);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let backend = Arc::new(mug_backend());
    let flag = CancellationFlag::new();
    flag.cancel();
    let image = scene();

    let result = orchestrator(&backend)
        .run_with_cancel(ImageSource::Image(&image), "I want to drink water", &flag)
        .await;

    assert_eq!(result.error.unwrap().kind, ErrorKind::Cancelled);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_concurrent_runs_share_one_orchestrator() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .reply_json("detection", detection())
            .reply_json("detection", detection())
            .reply_json("intent", intent())
            .reply_json("intent", intent())
            .reply_json("description", description())
            .reply_json("description", description())
            .reply_json("safety", safety("handle"))
            .reply_json("safety", safety("handle"))
            .reply_json("segmentation", segmentation(handle_polygon()))
            .reply_json("segmentation", segmentation(handle_polygon())),
    );
    let orchestrator = Arc::new(orchestrator(&backend));
    let image = Arc::new(scene());

    let spawn = |orchestrator: Arc<Orchestrator>, image: Arc<DynamicImage>| {
        tokio::spawn(async move {
            orchestrator.run(ImageSource::Image(&image), "I want to drink water").await
        })
    };
    let first = spawn(orchestrator.clone(), image.clone());
    let second = spawn(orchestrator, image);

    assert!(first.await.unwrap().success);
    assert!(second.await.unwrap().success);
}

#[tokio::test]
async fn test_result_serializes_outputs_and_error() {
    let backend = Arc::new(mug_backend());
    let image = scene();

    let result = orchestrator(&backend).run(ImageSource::Image(&image), "I want to drink water").await;
    let json: Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();

    assert_eq!(json["success"], true);
    assert_eq!(json["stage_outputs"][0]["stage"], "detection");
    assert_eq!(json["stage_outputs"][4]["output"]["mask_encoding"]["type"], "polygon");
    assert_eq!(json["mask"]["area"], 7200);
    assert_eq!(json["transform"]["scale_x"], 0.5);
    assert!(json["error"].is_null());
}
