use crate::model::ModelInfo;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::error;

#[derive(Serialize, Deserialize, Default, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttentionMode {
    #[default]
    Auto,
    Sdpa,
    Sage,
    Sage2,
    Flash,
    Xformers,
}

impl FromStr for AttentionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "sdpa" => Ok(Self::Sdpa),
            "sage" => Ok(Self::Sage),
            "sage2" => Ok(Self::Sage2),
            "flash" => Ok(Self::Flash),
            "xformers" => Ok(Self::Xformers),
            _ => Err(format!("Invalid attention mode: {}", s)),
        }
    }
}

impl Display for AttentionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            AttentionMode::Auto => "auto",
            AttentionMode::Sdpa => "sdpa",
            AttentionMode::Sage => "sage",
            AttentionMode::Sage2 => "sage2",
            AttentionMode::Flash => "flash",
            AttentionMode::Xformers => "xformers",
        };
        write!(f, "{}", str)
    }
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub version: String,
    pub save_path: PathBuf,
    pub inputs_path: PathBuf,
    pub attention_mode: AttentionMode,
    /// `None` picks a profile from the detected hardware.
    pub profile: Option<u8>,
    pub transformer_quantization: String,
    pub vae_config: u32,
    pub mmaudio_enabled: u32,
    pub completed_history: usize,
    /// Interpreter of the generation environment, used to probe optional
    /// attention kernels.
    pub python: String,
    pub ffmpeg: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7860,
            version: "unknown".to_string(),
            save_path: PathBuf::from("outputs"),
            inputs_path: PathBuf::from("inputs"),
            attention_mode: AttentionMode::Auto,
            profile: None,
            transformer_quantization: "int8".to_string(),
            vae_config: 0,
            mmaudio_enabled: 0,
            completed_history: 100,
            python: "python".to_string(),
            ffmpeg: "ffmpeg".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Default, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    /// Program and arguments run once per queued task. Without it the
    /// queue only accumulates tasks.
    pub command: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct InstallConfig {
    pub venv_path: PathBuf,
    pub requirements: Option<PathBuf>,
    pub torch_packages: Vec<String>,
    /// The wheel flavour (`cu124`, `cu128`) is appended to this URL.
    pub torch_index_url: String,
    /// Packages whose installation may fail without aborting the install.
    pub optional_packages: Vec<String>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        let triton = if cfg!(windows) {
            "triton-windows"
        } else {
            "triton"
        };
        Self {
            venv_path: PathBuf::from("venv"),
            requirements: Some(PathBuf::from("requirements.txt")),
            torch_packages: vec![
                "torch".to_string(),
                "torchvision".to_string(),
                "torchaudio".to_string(),
            ],
            torch_index_url: "https://download.pytorch.org/whl".to_string(),
            optional_packages: vec![triton.to_string(), "sageattention".to_string()],
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CacheMount {
    pub host: PathBuf,
    pub container: String,
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DockerConfig {
    image: String,
    /// When set, the image is built from this directory instead of pulled.
    build_context: Option<PathBuf>,
    dockerfile: String,
    container_name: String,
    port: u16,
    cache_mounts: Vec<CacheMount>,
    env: HashMap<String, String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: "deepbeepmeep/wan2gp:latest".to_string(),
            build_context: None,
            dockerfile: "Dockerfile".to_string(),
            container_name: "wan2gp".to_string(),
            port: 7860,
            cache_mounts: vec![
                CacheMount {
                    host: PathBuf::from("cache/huggingface"),
                    container: "/home/user/.cache/huggingface".to_string(),
                },
                CacheMount {
                    host: PathBuf::from("cache/ckpts"),
                    container: "/workspace/ckpts".to_string(),
                },
                CacheMount {
                    host: PathBuf::from("outputs"),
                    container: "/workspace/outputs".to_string(),
                },
            ],
            env: HashMap::new(),
        }
    }
}

impl DockerConfig {
    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn build_context(&self) -> Option<&Path> {
        self.build_context.as_deref()
    }

    pub fn dockerfile(&self) -> &str {
        &self.dockerfile
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn cache_mounts(&self) -> &[CacheMount] {
        &self.cache_mounts
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ModelDefinition {
    pub name: String,
    pub description: String,
    pub family: String,
    pub i2v: bool,
    pub t2v: bool,
    pub visible: bool,
    pub sliding_window: bool,
    pub tea_cache: bool,
    pub mag_cache: bool,
    pub default_settings: Map<String, Value>,
}

impl Default for ModelDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            family: String::new(),
            i2v: false,
            t2v: false,
            visible: true,
            sliding_window: false,
            tea_cache: false,
            mag_cache: false,
            default_settings: Map::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub generation: GenerationConfig,
    pub install: InstallConfig,
    pub docker: DockerConfig,
    pub default_model: Option<String>,
    pub models: BTreeMap<String, ModelDefinition>,
}

impl Default for Config {
    fn default() -> Self {
        let mut default_settings = Map::new();
        default_settings.insert("resolution".to_string(), Value::from("832x480"));
        default_settings.insert("video_length".to_string(), Value::from(81));
        default_settings.insert("num_inference_steps".to_string(), Value::from(30));
        default_settings.insert("guidance_scale".to_string(), Value::from(5.0));
        default_settings.insert("flow_shift".to_string(), Value::from(5.0));

        let mut models = BTreeMap::new();
        models.insert(
            "t2v".to_string(),
            ModelDefinition {
                name: "Wan2.1 Text2video 14B".to_string(),
                description: "Text to video generation with the 14B Wan2.1 model".to_string(),
                family: "wan".to_string(),
                t2v: true,
                sliding_window: true,
                tea_cache: true,
                mag_cache: true,
                default_settings,
                ..Default::default()
            },
        );
        Self {
            server: ServerConfig::default(),
            generation: GenerationConfig::default(),
            install: InstallConfig::default(),
            docker: DockerConfig::default(),
            default_model: Some("t2v".to_string()),
            models,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error reading config: {0}")]
    Confy(#[from] confy::ConfyError),
}

impl Config {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Config> {
        match Config::load_or_create(path) {
            Ok(cfg) => Some(cfg),
            Err(err) => {
                error!("Failed to load configuration: {}", err);
                None
            }
        }
    }

    fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref();

        if path.exists() {
            let cfg: Self = confy::load_path(path)?;
            Ok(cfg)
        } else {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            let cfg = Config::default();
            confy::store_path(path, &cfg)?;
            Ok(cfg)
        }
    }

    pub fn get_model(&self, model_type: &str) -> Option<ModelInfo> {
        self.models
            .get(model_type)
            .map(|definition| ModelInfo::from_definition(model_type, definition))
    }

    pub fn get_model_definition(&self, model_type: &str) -> Option<&ModelDefinition> {
        self.models.get(model_type)
    }

    pub fn get_all_models(&self) -> Vec<ModelInfo> {
        self.models
            .iter()
            .map(|(model_type, definition)| ModelInfo::from_definition(model_type, definition))
            .collect()
    }

    pub fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_default_config_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let cfg = Config::from_path(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.server.port, 7860);
        assert_eq!(cfg.default_model(), Some("t2v"));

        let reloaded = Config::from_path(&path).unwrap();
        assert_eq!(reloaded.models.len(), cfg.models.len());
        assert_eq!(reloaded.server.attention_mode, AttentionMode::Auto);
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "server:\n  port: 9000\n  attention_mode: sage2\nmodels:\n  i2v_720p:\n    name: Image2video 720p\n    i2v: true\n",
        )
        .unwrap();

        let cfg = Config::from_path(&path).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.attention_mode, AttentionMode::Sage2);
        assert_eq!(cfg.server.save_path, PathBuf::from("outputs"));

        let model = cfg.get_model("i2v_720p").unwrap();
        assert!(model.is_i2v);
        assert!(model.visible);
        assert!(cfg.get_model("t2v").is_none());
    }

    #[test]
    fn unknown_attention_mode_is_rejected() {
        assert!("sage3".parse::<AttentionMode>().is_err());
        assert_eq!("xformers".parse::<AttentionMode>(), Ok(AttentionMode::Xformers));
    }
}
