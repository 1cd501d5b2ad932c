use crate::llm::{LLMConfig, DEFAULT_MAX_HISTORY};
use crate::speech::SpeechMode;
use crate::stt::STTConfig;
use crate::tts::TTSConfig;
use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid API key format for {service}: {reason}")]
    InvalidKeyFormat { service: String, reason: String },
    #[error("Invalid value for {var}: '{value}'")]
    InvalidValue { var: String, value: String },
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

/// Configuration for API services
#[derive(Debug)]
pub struct ApiConfig {
    pub openai_key: SecretBox<String>,
    /// Absent means speech is not synthesized through Azure
    pub azure_speech_key: Option<SecretBox<String>>,
}

impl ApiConfig {
    /// Load API configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let openai_key = Self::load_api_key("OPENAI_API_KEY", "OpenAI")?;
        let azure_speech_key = match Self::load_api_key("AZURE_SPEECH_KEY", "Azure Speech") {
            Ok(key) => Some(key),
            Err(ConfigError::MissingEnvVar(_)) => None,
            Err(e) => return Err(e),
        };

        Ok(Self {
            openai_key,
            azure_speech_key,
        })
    }

    /// Load and validate a single API key from environment
    fn load_api_key(env_var: &str, service_name: &str) -> Result<SecretBox<String>, ConfigError> {
        let key = env::var(env_var).map_err(|_| ConfigError::MissingEnvVar(env_var.to_string()))?;

        if key.trim().is_empty() {
            return Err(ConfigError::InvalidKeyFormat {
                service: service_name.to_string(),
                reason: "API key cannot be empty".to_string(),
            });
        }

        Self::validate_key_format(&key, service_name)?;

        Ok(SecretBox::new(Box::new(key)))
    }

    fn validate_key_format(key: &str, service: &str) -> Result<(), ConfigError> {
        match service {
            "OpenAI" => {
                // Proxies behind OPENAI_BASE_URL issue keys in their own formats
                if !key.starts_with("sk-") {
                    log::warn!("OpenAI key does not start with 'sk-', assuming a compatible proxy");
                }
            }
            "Azure Speech" => {
                if key.len() < 20 {
                    return Err(ConfigError::InvalidKeyFormat {
                        service: service.to_string(),
                        reason: "Azure Speech keys should be at least 20 characters".to_string(),
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Get OpenAI API key (use only when making API calls)
    pub fn openai_key(&self) -> &str {
        self.openai_key.expose_secret()
    }

    /// Get Azure Speech key, if configured
    pub fn azure_speech_key(&self) -> Option<&str> {
        self.azure_speech_key
            .as_ref()
            .map(|key| key.expose_secret().as_str())
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<ApiConfig, ConfigError> {
    match ApiConfig::load() {
        Ok(config) => {
            log::info!("Successfully loaded API configuration");
            if config.azure_speech_key.is_none() {
                log::warn!("AZURE_SPEECH_KEY not set, spoken explanations will not be synthesized");
            }
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_api_key_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Non-secret settings, defaults overridable from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct TutorConfig {
    pub openai_base_url: String,
    pub model: String,
    pub azure_region: String,
    pub language: String,
    pub voice: String,
    pub video_context_url: String,
    pub max_history: usize,
    pub speech_mode: SpeechMode,
}

impl Default for TutorConfig {
    fn default() -> Self {
        let tts = TTSConfig::default();
        Self {
            openai_base_url: "https://api.openai.com/v1".to_string(),
            model: LLMConfig::default().model,
            azure_region: tts.region,
            language: tts.language,
            voice: tts.voice_name,
            video_context_url: "http://localhost:8000".to_string(),
            max_history: DEFAULT_MAX_HISTORY,
            speech_mode: SpeechMode::default(),
        }
    }
}

impl TutorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        override_with("OPENAI_BASE_URL", &mut config.openai_base_url);
        override_with("OPENAI_MODEL", &mut config.model);
        override_with("AZURE_SPEECH_REGION", &mut config.azure_region);
        override_with("TUTOR_LANGUAGE", &mut config.language);
        override_with("TUTOR_VOICE", &mut config.voice);
        override_with("VIDEO_CONTEXT_URL", &mut config.video_context_url);

        if let Some(max_history) = parse_var::<usize>("TUTOR_MAX_HISTORY")? {
            if max_history == 0 {
                return Err(ConfigError::InvalidValue {
                    var: "TUTOR_MAX_HISTORY".to_string(),
                    value: "0".to_string(),
                });
            }
            config.max_history = max_history;
        }
        if let Some(speech_mode) = parse_var::<SpeechMode>("TUTOR_SPEECH_MODE")? {
            config.speech_mode = speech_mode;
        }

        Ok(config)
    }

    pub fn llm_config(&self) -> LLMConfig {
        LLMConfig {
            model: self.model.clone(),
            ..LLMConfig::default()
        }
    }

    pub fn stt_config(&self) -> STTConfig {
        STTConfig {
            region: self.azure_region.clone(),
            language: self.language.clone(),
            ..STTConfig::default()
        }
    }

    pub fn tts_config(&self) -> TTSConfig {
        TTSConfig {
            region: self.azure_region.clone(),
            voice_name: self.voice.clone(),
            language: self.language.clone(),
            ..TTSConfig::default()
        }
    }
}

fn env_value(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn override_with(var: &str, target: &mut String) {
    if let Some(value) = env_value(var) {
        *target = value;
    }
}

fn parse_var<T: FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match env_value(var) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                value,
            }),
        None => Ok(None),
    }
}
