//! Librarian API types
//!
//! The uniform response envelope plus the payload types exchanged with the
//! backend: server status, catalog cards, the configuration tree, and the
//! job-control replies.

use serde::{Deserialize, Deserializer, Serialize};

/// Uniform result envelope for every API-facing operation.
///
/// `success` is always present. `data` accompanies only a success and
/// `error` only a failure; the serialized form omits whichever is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Success envelope carrying a payload
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failure envelope carrying an error message
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Deserialize a value that may arrive as a JSON number or string into an
/// optional string. The backend reports `startup_time` as an integer, but
/// older builds emitted it as a string, and hide/placeholder replies omit
/// it entirely.
fn deserialize_flexible_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct FlexibleIdVisitor;

    impl<'de> de::Visitor<'de> for FlexibleIdVisitor {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string, a number, or null")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<Self::Value, D2::Error> {
            d.deserialize_any(FlexibleIdVisitor)
        }
    }

    deserializer.deserialize_any(FlexibleIdVisitor)
}

/// Backend status report from `GET /`
#[derive(Debug, Clone, Deserialize)]
pub struct ServerStatus {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    /// Process start identifier; changes whenever the backend restarts
    #[serde(default, deserialize_with = "deserialize_flexible_id")]
    pub startup_time: Option<String>,
}

/// A single card in the file catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogCard {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub is_directory: bool,
    /// Last modified time in seconds since epoch
    #[serde(default)]
    pub modified: u64,
}

/// Connection and path settings for the backend host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub root_path: String,
    pub scripts_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_port: Option<u16>,
}

/// Settings shared by every background module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleCommon {
    pub dry_run_mode: bool,
    pub log_path: String,
    pub log_file_prefix: String,
}

/// Include/exclude rules applied while walking the catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterRules {
    #[serde(default)]
    pub included_folders: Vec<String>,
    #[serde(default)]
    pub excluded_folders: Vec<String>,
    #[serde(default)]
    pub included_files: Vec<String>,
    #[serde(default)]
    pub excluded_files: Vec<String>,
    #[serde(default)]
    pub included_extensions: Vec<String>,
    #[serde(default)]
    pub excluded_extensions: Vec<String>,
}

/// De-duplication ("weeding") module settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeedingSettings {
    #[serde(flatten)]
    pub common: ModuleCommon,
    /// Where weeded duplicates are moved instead of being deleted
    pub holding_bin: String,
    #[serde(flatten)]
    pub filters: FilterRules,
}

/// Large-file splitting ("segmenting") module settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentingSettings {
    #[serde(flatten)]
    pub common: ModuleCommon,
    pub max_mb: u64,
    pub chunk_limit: u32,
    #[serde(flatten)]
    pub filters: FilterRules,
}

/// The full backend configuration: server connection settings plus the
/// per-module sections for the weeding and segmenting jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerSettings,
    pub weeding: WeedingSettings,
    pub segmenting: SegmentingSettings,
}

/// Reply from `POST /api/config`.
///
/// The backend normally wraps the persisted configuration one level deep
/// (`{"message": ..., "data": {...}}`), but older builds echo the
/// submitted object directly. `into_config` unwraps either shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SaveConfigReply {
    Enveloped {
        #[serde(default)]
        message: Option<String>,
        data: Config,
    },
    Echoed(Config),
}

impl SaveConfigReply {
    /// The persisted configuration, unwrapped from either reply shape
    pub fn into_config(self) -> Config {
        match self {
            SaveConfigReply::Enveloped { data, .. } => data,
            SaveConfigReply::Echoed(config) => config,
        }
    }
}

/// Reply from `GET /run_script`
#[derive(Debug, Clone, Deserialize)]
pub struct JobLaunch {
    pub status: String,
    #[serde(default)]
    pub log_file_path: Option<String>,
}

/// Reply from `GET /cancel_script`
#[derive(Debug, Clone, Deserialize)]
pub struct JobCancel {
    pub status: String,
}

/// Reply from `GET /check_status`
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatus {
    pub running: bool,
    #[serde(default)]
    pub log_file_path: String,
}

/// Reply from `GET /get_output`: buffered job output plus progress counters
#[derive(Debug, Clone, Deserialize)]
pub struct JobOutput {
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default)]
    pub files_checked: u64,
    #[serde(default)]
    pub total_files: u64,
}
