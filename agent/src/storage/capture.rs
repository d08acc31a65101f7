//! Capture settings and capture statistics
//!
//! Capture settings are owned by this agent and changed remotely through
//! settings-set. Capture statistics are written by the capture daemon and only
//! read here for the heartbeat.

use async_trait::async_trait;
use chrono::{NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::AgentError;
use crate::filesys::file::File;

/// Keys accepted by settings-set
pub const SETTINGS_KEYS: [&str; 9] = [
    "iso",
    "aperture",
    "shutter_speed",
    "start_time",
    "end_time",
    "capture_interval",
    "image_size",
    "quality",
    "format",
];

const MAX_CAPTURE_INTERVAL_MINUTES: i64 = 24 * 60;

/// Camera capture settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSettings {
    pub iso: String,
    pub aperture: String,
    pub shutter_speed: String,
    pub start_time: String,
    pub end_time: String,
    /// Minutes between captures
    pub capture_interval: u32,
    pub image_size: String,
    pub quality: u8,
    pub format: String,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            iso: "auto".to_string(),
            aperture: "f/2.8".to_string(),
            shutter_speed: "1/60".to_string(),
            start_time: "08:00".to_string(),
            end_time: "18:00".to_string(),
            capture_interval: 10,
            image_size: "1920x1080".to_string(),
            quality: 85,
            format: "jpeg".to_string(),
        }
    }
}

impl CaptureSettings {
    /// Merge a settings-set payload into a copy of these settings.
    ///
    /// Every key is checked before anything is applied; the first invalid key or
    /// value rejects the whole patch.
    pub fn apply_patch(&self, patch: &Value) -> Result<CaptureSettings, AgentError> {
        let patch = patch
            .as_object()
            .ok_or_else(|| invalid("settings payload must be a JSON object".to_string()))?;
        if patch.is_empty() {
            return Err(invalid("settings payload is empty".to_string()));
        }

        let mut merged = self.clone();
        for (key, value) in patch {
            match key.as_str() {
                "iso" => merged.iso = parse_iso(value)?,
                "aperture" => merged.aperture = parse_aperture(value)?,
                "shutter_speed" => merged.shutter_speed = parse_shutter_speed(value)?,
                "start_time" => merged.start_time = parse_time(key, value)?,
                "end_time" => merged.end_time = parse_time(key, value)?,
                "capture_interval" => merged.capture_interval = parse_capture_interval(value)?,
                "image_size" => merged.image_size = parse_image_size(value)?,
                "quality" => merged.quality = parse_quality(value)?,
                "format" => merged.format = parse_format(value)?,
                other => return Err(invalid(format!("unknown settings key: {other}"))),
            }
        }

        merged.validate()?;
        Ok(merged)
    }

    /// Check every field of an already merged settings value
    pub fn validate(&self) -> Result<(), AgentError> {
        parse_iso(&Value::String(self.iso.clone()))?;
        parse_aperture(&Value::String(self.aperture.clone()))?;
        parse_shutter_speed(&Value::String(self.shutter_speed.clone()))?;
        parse_time("start_time", &Value::String(self.start_time.clone()))?;
        parse_time("end_time", &Value::String(self.end_time.clone()))?;
        parse_capture_interval(&Value::from(self.capture_interval))?;
        parse_image_size(&Value::String(self.image_size.clone()))?;
        parse_quality(&Value::from(self.quality))?;
        parse_format(&Value::String(self.format.clone()))?;
        if self.start_time == self.end_time {
            return Err(invalid("start_time and end_time must differ".to_string()));
        }
        Ok(())
    }

    /// Number of captures the schedule plans for one day
    pub fn planned_captures(&self) -> u32 {
        let (Ok(start), Ok(end)) = (
            NaiveTime::parse_from_str(&self.start_time, "%H:%M"),
            NaiveTime::parse_from_str(&self.end_time, "%H:%M"),
        ) else {
            return 0;
        };
        if self.capture_interval == 0 {
            return 0;
        }

        let mut window = (end - start).num_minutes();
        if window < 0 {
            // window crosses midnight
            window += MAX_CAPTURE_INTERVAL_MINUTES;
        }
        (window / i64::from(self.capture_interval)) as u32 + 1
    }

    pub fn to_json_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

fn invalid(message: String) -> AgentError {
    AgentError::ValidationError(message)
}

fn as_integer(key: &str, value: &Value) -> Result<i64, AgentError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| invalid(format!("{key} must be an integer, got {n}"))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid(format!("{key} must be an integer, got {s:?}"))),
        other => Err(invalid(format!("{key} must be an integer, got {other}"))),
    }
}

fn as_text(key: &str, value: &Value) -> Result<String, AgentError> {
    match value {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(invalid(format!("{key} must be a string, got {other}"))),
    }
}

fn parse_iso(value: &Value) -> Result<String, AgentError> {
    let iso = as_text("iso", value)?;
    if iso.eq_ignore_ascii_case("auto") {
        return Ok("auto".to_string());
    }
    match iso.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n.to_string()),
        _ => Err(invalid(format!("iso must be \"auto\" or a positive integer, got {iso:?}"))),
    }
}

fn parse_aperture(value: &Value) -> Result<String, AgentError> {
    let aperture = as_text("aperture", value)?;
    let number = aperture
        .strip_prefix("f/")
        .or_else(|| aperture.strip_prefix("F/"))
        .and_then(|n| n.parse::<f64>().ok());
    match number {
        Some(n) if n > 0.0 => Ok(format!("f/{}", &aperture[2..])),
        _ => Err(invalid(format!("aperture must look like \"f/2.8\", got {aperture:?}"))),
    }
}

fn parse_shutter_speed(value: &Value) -> Result<String, AgentError> {
    let speed = as_text("shutter_speed", value)?;
    let ok = match speed.strip_prefix("1/") {
        Some(denominator) => denominator.parse::<u32>().map(|d| d > 0).unwrap_or(false),
        None => speed.parse::<f64>().map(|s| s > 0.0).unwrap_or(false),
    };
    if ok {
        Ok(speed)
    } else {
        Err(invalid(format!(
            "shutter_speed must be \"1/<n>\" or seconds, got {speed:?}"
        )))
    }
}

fn parse_time(key: &str, value: &Value) -> Result<String, AgentError> {
    let text = as_text(key, value)?;
    let time = NaiveTime::parse_from_str(&text, "%H:%M")
        .map_err(|_| invalid(format!("{key} must be HH:MM, got {text:?}")))?;
    Ok(time.format("%H:%M").to_string())
}

fn parse_capture_interval(value: &Value) -> Result<u32, AgentError> {
    let minutes = as_integer("capture_interval", value)?;
    if !(1..=MAX_CAPTURE_INTERVAL_MINUTES).contains(&minutes) {
        return Err(invalid(format!(
            "capture_interval must be between 1 and {MAX_CAPTURE_INTERVAL_MINUTES} minutes, got {minutes}"
        )));
    }
    Ok(minutes as u32)
}

fn parse_image_size(value: &Value) -> Result<String, AgentError> {
    let size = as_text("image_size", value)?;
    let dims = size
        .split_once(['x', 'X'])
        .and_then(|(w, h)| Some((w.parse::<u32>().ok()?, h.parse::<u32>().ok()?)));
    match dims {
        Some((w, h)) if w > 0 && h > 0 => Ok(format!("{w}x{h}")),
        _ => Err(invalid(format!("image_size must look like \"1920x1080\", got {size:?}"))),
    }
}

fn parse_quality(value: &Value) -> Result<u8, AgentError> {
    let quality = as_integer("quality", value)?;
    if !(1..=100).contains(&quality) {
        return Err(invalid(format!("quality must be between 1 and 100, got {quality}")));
    }
    Ok(quality as u8)
}

fn parse_format(value: &Value) -> Result<String, AgentError> {
    let format = as_text("format", value)?.to_lowercase();
    match format.as_str() {
        "jpeg" | "jpg" | "raw" => Ok(format),
        _ => Err(invalid(format!("format must be one of jpeg, jpg, raw, got {format:?}"))),
    }
}

// ================================ PERSISTENCE ==================================== //

/// Persistence of capture settings
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Load the persisted settings, defaults when nothing was saved yet
    async fn load(&self) -> Result<CaptureSettings, AgentError>;

    /// Replace the persisted settings
    async fn save(&self, settings: &CaptureSettings) -> Result<(), AgentError>;
}

/// JSON file store with write-temp-then-rename replacement
pub struct JsonSettingsStore {
    file: File,
}

impl JsonSettingsStore {
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn load(&self) -> Result<CaptureSettings, AgentError> {
        if !self.file.exists().await {
            return Ok(CaptureSettings::default());
        }
        self.file.read_json().await
    }

    async fn save(&self, settings: &CaptureSettings) -> Result<(), AgentError> {
        self.file.write_json(settings).await
    }
}

// ================================ STATISTICS ===================================== //

/// Daily capture counters written by the capture daemon
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub total_captures: u32,
    #[serde(default)]
    pub successful_captures: u32,
    #[serde(default)]
    pub missed_captures: u32,
    #[serde(default)]
    pub last_capture_time: Option<String>,
    #[serde(default)]
    pub last_successful_capture: Option<String>,
}

/// Read today's capture counters. Counters dated another day read as zero.
pub async fn read_capture_stats(stats_file: &File) -> CaptureStats {
    let stats: CaptureStats = match stats_file.read_json().await {
        Ok(stats) => stats,
        Err(e) => {
            debug!("Capture stats unavailable at {:?}: {}", stats_file.path(), e);
            return CaptureStats::default();
        }
    };

    let today = Utc::now().format("%Y-%m-%d").to_string();
    if stats.date.as_deref() == Some(today.as_str()) {
        return stats;
    }
    CaptureStats {
        date: Some(today),
        last_capture_time: stats.last_capture_time,
        last_successful_capture: stats.last_successful_capture,
        ..Default::default()
    }
}
