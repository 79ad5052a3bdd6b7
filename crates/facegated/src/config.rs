use std::path::PathBuf;

const DEFAULT_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Socket address the HTTP server binds to.
    pub bind_addr: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Origins allowed by CORS (browser client hosts).
    pub allowed_origins: Vec<String>,
    /// Request body cap for image uploads.
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACEGATE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("models"));

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facegate");

        let db_path = std::env::var("FACEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let allowed_origins = std::env::var("FACEGATE_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            bind_addr: std::env::var("FACEGATE_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            model_dir,
            db_path,
            similarity_threshold: env_f32("FACEGATE_SIMILARITY_THRESHOLD", 0.40),
            allowed_origins,
            max_upload_bytes: env_usize("FACEGATE_MAX_UPLOAD_BYTES", DEFAULT_UPLOAD_BYTES),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
