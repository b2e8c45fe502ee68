use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use graspmind::{ConfigError, Credentials, PipelineConfig, PipelineResult, SceneObject, Stage, default_stages};
use grasp_common::BoundingBox;
use image::DynamicImage;
use mask::{MaskOutline, draw_boxes, overlay_mask};
use schemars::schema::RootSchema;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Mask(#[from] mask::MaskError),
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Expected STAGE=VALUE, got '{0}'")]
    MalformedAssignment(String),
    #[error("Unknown stage '{0}'")]
    UnknownStage(String),
    #[error("Invalid temperature '{0}'")]
    InvalidTemperature(String),
}

/// Command-line overrides applied on top of a configuration file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub max_dimension: Option<u32>,
    /// `STAGE=MODEL`
    pub models: Vec<String>,
    /// `STAGE=TEMPERATURE`
    pub temperatures: Vec<String>,
}

/// Load the configuration file, or the defaults when none is given
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig, CliError> {
    Ok(match path {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    })
}

/// Split `STAGE=VALUE` into its parts
pub fn parse_stage_assignment(assignment: &str) -> Result<(Stage, &str), CliError> {
    let (stage, value) = assignment
        .split_once('=')
        .ok_or_else(|| CliError::MalformedAssignment(assignment.to_string()))?;
    let stage = Stage::from_str(stage.trim()).map_err(|_| CliError::UnknownStage(stage.trim().to_string()))?;
    Ok((stage, value.trim()))
}

pub fn apply_overrides(config: &mut PipelineConfig, overrides: &Overrides) -> Result<(), CliError> {
    if let Some(max_dimension) = overrides.max_dimension {
        config.max_dimension = max_dimension;
    }
    for assignment in &overrides.models {
        let (stage, model) = parse_stage_assignment(assignment)?;
        config.set_model(stage, model)?;
    }
    for assignment in &overrides.temperatures {
        let (stage, value) = parse_stage_assignment(assignment)?;
        let temperature = value
            .parse::<f32>()
            .map_err(|_| CliError::InvalidTemperature(value.to_string()))?;
        config.set_temperature(stage, temperature)?;
    }
    config.validate()?;
    Ok(())
}

/// Collect API keys for every endpoint the configuration references
pub fn resolve_credentials(config: &PipelineConfig) -> Credentials {
    resolve_credentials_with(config, |name| std::env::var(name).ok())
}

pub fn resolve_credentials_with<F>(config: &PipelineConfig, lookup: F) -> Credentials
where
    F: Fn(&str) -> Option<String>,
{
    let mut credentials = Credentials::new();
    for env_var in config.api_key_envs() {
        if let Some(key) = lookup(env_var).filter(|key| !key.trim().is_empty()) {
            credentials.insert(env_var, key);
        }
    }
    credentials
}

/// Response schemas keyed by stage name
pub fn response_schemas(stage: Option<Stage>) -> BTreeMap<String, RootSchema> {
    default_stages()
        .iter()
        .filter(|s| stage.is_none_or(|wanted| s.stage() == wanted))
        .map(|s| (s.stage().to_string(), s.response_schema()))
        .collect()
}

/// Files written for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artifacts {
    pub result: PathBuf,
    pub mask: Option<PathBuf>,
    pub overlay: Option<PathBuf>,
    pub geojson: Option<PathBuf>,
    /// Detected boxes drawn on the original image
    pub detections: Option<PathBuf>,
    pub detection_summary: Option<PathBuf>,
}

const OVERLAY_COLOR: [u8; 3] = [255, 64, 64];
const OVERLAY_ALPHA: f32 = 0.5;
const BOX_THICKNESS: u32 = 2;

/// Detected objects with their boxes mapped back to the original image
pub fn original_detections(result: &PipelineResult) -> Option<Vec<(&SceneObject, BoundingBox)>> {
    let transform = result.transform?;
    let objects = result.detections()?;
    Some(
        objects
            .iter()
            .map(|object| (object, transform.bbox_to_original(&object.bounding_box)))
            .collect(),
    )
}

/// Plain-text listing of detections followed by a count per label
pub fn detection_summary(detections: &[(&SceneObject, BoundingBox)]) -> String {
    let mut text = format!("Detected {} objects\n\n", detections.len());
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();

    for (object, bbox) in detections {
        text.push_str(&format!("{:2}. {}\n", object.id, object.label));
        text.push_str(&format!(
            "    box: ({:.0}, {:.0}) - ({:.0}, {:.0})\n",
            bbox.x1, bbox.y1, bbox.x2, bbox.y2
        ));
        text.push_str(&format!("    size: {:.0} x {:.0} px\n", bbox.width(), bbox.height()));
        text.push_str(&format!("    confidence: {:.2}\n\n", object.confidence));
        *counts.entry(object.label.as_str()).or_default() += 1;
    }

    text.push_str("By label:\n");
    for (label, count) in counts {
        text.push_str(&format!("  {label}: {count}\n"));
    }
    text
}

/// Write `result.json`, the detection artifacts once detection ran, and the
/// mask artifacts for successful runs
pub fn write_artifacts(
    result: &PipelineResult,
    original: Option<&DynamicImage>,
    output_dir: &Path,
) -> Result<Artifacts, CliError> {
    fs::create_dir_all(output_dir)?;

    let mut artifacts = Artifacts {
        result: output_dir.join("result.json"),
        ..Default::default()
    };
    fs::write(&artifacts.result, result.to_json()?)?;

    if let Some(detections) = original_detections(result) {
        let summary_path = output_dir.join("detections.txt");
        fs::write(&summary_path, detection_summary(&detections))?;
        artifacts.detection_summary = Some(summary_path);

        if let Some(original) = original {
            let boxes: Vec<BoundingBox> = detections.iter().map(|(_, bbox)| *bbox).collect();
            let drawn = draw_boxes(&original.to_rgb8(), &boxes, BOX_THICKNESS);
            let detections_path = output_dir.join("detections.png");
            drawn.save(&detections_path).map_err(mask::MaskError::from)?;
            artifacts.detections = Some(detections_path);
        }
    }

    let Some(mask) = &result.final_mask else {
        return Ok(artifacts);
    };

    let mask_path = output_dir.join("mask.png");
    mask.save(&mask_path)?;
    artifacts.mask = Some(mask_path);

    let label = result.safety_decision().map(|d| d.target_part_name.clone());
    let geojson_path = output_dir.join("mask.geojson");
    MaskOutline::from_mask(mask, label)?.save_geojson(&geojson_path)?;
    artifacts.geojson = Some(geojson_path);

    if let Some(original) = original {
        let overlay = overlay_mask(&original.to_rgb8(), mask, OVERLAY_COLOR, OVERLAY_ALPHA)?;
        let overlay_path = output_dir.join("overlay.png");
        overlay.save(&overlay_path).map_err(mask::MaskError::from)?;
        artifacts.overlay = Some(overlay_path);
    }

    Ok(artifacts)
}

/// Outcome of `check`
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    pub problems: Vec<String>,
    /// `(stage, env var)` pairs without a key
    pub missing_credentials: Vec<(Stage, String)>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty() && self.missing_credentials.is_empty()
    }
}

pub fn check_config(config: &PipelineConfig, credentials: &Credentials) -> CheckReport {
    CheckReport {
        problems: config.validate().err().map(|err| err.to_string()).into_iter().collect(),
        missing_credentials: config
            .missing_credentials(credentials)
            .into_iter()
            .map(|(stage, env)| (stage, env.to_string()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grasp_common::ScaleTransform;
    use graspmind::StageOutput;

    #[test]
    fn test_parse_stage_assignment() {
        assert_eq!(parse_stage_assignment("intent=gpt-4o").unwrap(), (Stage::Intent, "gpt-4o"));
        assert_eq!(parse_stage_assignment(" Safety = 0.2 ").unwrap(), (Stage::Safety, "0.2"));
        assert!(matches!(parse_stage_assignment("gpt-4o"), Err(CliError::MalformedAssignment(_))));
        assert!(matches!(parse_stage_assignment("grip=x"), Err(CliError::UnknownStage(s)) if s == "grip"));
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = PipelineConfig::default();
        let overrides = Overrides {
            max_dimension: Some(768),
            models: vec!["detection=qwen-vl-max".into()],
            temperatures: vec!["safety=0.1".into()],
        };

        apply_overrides(&mut config, &overrides).unwrap();

        assert_eq!(config.max_dimension, 768);
        assert_eq!(config.stages.detection.model, "qwen-vl-max");
        assert_eq!(config.stages.safety.temperature, 0.1);
    }

    #[test]
    fn test_override_errors() {
        let mut config = PipelineConfig::default();

        let bad_temperature = Overrides { temperatures: vec!["intent=warm".into()], ..Default::default() };
        assert!(matches!(apply_overrides(&mut config, &bad_temperature), Err(CliError::InvalidTemperature(_))));

        let not_a_model_stage = Overrides { models: vec!["preprocessing=x".into()], ..Default::default() };
        assert!(matches!(apply_overrides(&mut config, &not_a_model_stage), Err(CliError::Config(_))));

        let out_of_range = Overrides { temperatures: vec!["intent=9".into()], ..Default::default() };
        assert!(matches!(apply_overrides(&mut config, &out_of_range), Err(CliError::Config(ConfigError::Invalid(_)))));
    }

    #[test]
    fn test_credentials_resolved_per_env_var() {
        let mut config = PipelineConfig::default();
        config.stages.safety.endpoint = Some(graspmind::EndpointConfig {
            api_key_env: "DASHSCOPE_API_KEY".into(),
            ..Default::default()
        });

        let credentials = resolve_credentials_with(&config, |name| {
            (name == "OPENAI_API_KEY").then(|| "sk-test".to_string())
        });
        let report = check_config(&config, &credentials);

        assert!(!report.is_ok());
        assert!(report.problems.is_empty());
        assert_eq!(report.missing_credentials, vec![(Stage::Safety, "DASHSCOPE_API_KEY".to_string())]);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graspmind.toml");
        fs::write(&path, "max_dimension = 640\n[stages.intent]\nmodel = \"gpt-4o\"\n").unwrap();

        let config = load_config(Some(path.as_path())).unwrap();

        assert_eq!(config.max_dimension, 640);
        assert_eq!(config.stages.intent.model, "gpt-4o");
        assert_eq!(load_config(None).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_response_schemas() {
        let all = response_schemas(None);
        assert_eq!(all.len(), 5);
        assert!(all.contains_key("segmentation"));

        let one = response_schemas(Some(Stage::Intent));
        assert_eq!(one.keys().collect::<Vec<_>>(), vec!["intent"]);
    }

    #[test]
    fn test_failed_run_writes_only_result() {
        let dir = tempfile::tempdir().unwrap();
        let error = graspmind::PipelineError::contract("part 'blade' is not among the components").at(Stage::Safety);
        let result = PipelineResult::failed(vec![], error);

        let artifacts = write_artifacts(&result, None, dir.path()).unwrap();

        assert!(artifacts.result.exists());
        assert!(artifacts.mask.is_none());
        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&artifacts.result).unwrap()).unwrap();
        assert_eq!(json["error"]["failed_stage"], "safety");
    }

    #[test]
    fn test_successful_run_writes_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut mask = mask::BinaryMask::new(20, 10);
        for x in 4..8 {
            for y in 2..6 {
                mask.set(x, y);
            }
        }
        let result = PipelineResult::completed(vec![], mask);
        let original = DynamicImage::ImageRgb8(image::RgbImage::new(20, 10));

        let artifacts = write_artifacts(&result, Some(&original), dir.path()).unwrap();

        for path in [artifacts.mask, artifacts.overlay, artifacts.geojson] {
            assert!(path.unwrap().exists());
        }
        assert!(artifacts.detections.is_none());
    }

    fn mug_detections() -> StageOutput {
        StageOutput::Detection(vec![
            SceneObject {
                id: 1,
                label: "mug".into(),
                bounding_box: BoundingBox::from([10.0, 10.0, 30.0, 20.0]),
                confidence: 0.93,
            },
            SceneObject {
                id: 2,
                label: "mug".into(),
                bounding_box: BoundingBox::from([35.0, 5.0, 45.0, 25.0]),
                confidence: 0.5,
            },
        ])
    }

    #[test]
    fn test_detections_drawn_at_original_scale() {
        let dir = tempfile::tempdir().unwrap();
        let error = graspmind::PipelineError::contract("object 7 was not detected").at(Stage::Intent);
        let transform = ScaleTransform::new((100, 60), (50, 30)).unwrap();
        let result = PipelineResult::failed(vec![mug_detections()], error).with_transform(Some(transform));
        let original = DynamicImage::ImageRgb8(image::RgbImage::new(100, 60));

        let artifacts = write_artifacts(&result, Some(&original), dir.path()).unwrap();

        let drawn = image::open(artifacts.detections.unwrap()).unwrap().to_rgb8();
        let first = image::Rgb(mask::palette_color(0));
        // [10, 10, 30, 20] preprocessed is [20, 20, 60, 40] original
        assert_eq!(drawn.get_pixel(20, 20), &first);
        assert_eq!(drawn.get_pixel(59, 39), &first);
        assert_eq!(drawn.get_pixel(21, 30), &first);
        assert_eq!(drawn.get_pixel(40, 30), &image::Rgb([0, 0, 0]));
        assert_eq!(drawn.get_pixel(70, 10), &image::Rgb(mask::palette_color(1)));
        assert_eq!(drawn.get_pixel(10, 10), &image::Rgb([0, 0, 0]));

        let summary = fs::read_to_string(artifacts.detection_summary.unwrap()).unwrap();
        assert!(summary.starts_with("Detected 2 objects"));
        assert!(summary.contains(" 1. mug\n    box: (20, 20) - (60, 40)\n    size: 40 x 20 px"));
        assert!(summary.contains("  mug: 2\n"));
        assert!(artifacts.mask.is_none());
    }

    #[test]
    fn test_no_detection_artifacts_without_transform() {
        let dir = tempfile::tempdir().unwrap();
        let error = graspmind::PipelineError::contract("bad").at(Stage::Intent);
        let result = PipelineResult::failed(vec![mug_detections()], error);

        let artifacts = write_artifacts(&result, None, dir.path()).unwrap();

        assert!(artifacts.detections.is_none());
        assert!(artifacts.detection_summary.is_none());
    }
}
