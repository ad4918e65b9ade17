use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

fn default_true() -> bool {
    true
}

// ============================================================
// Detection Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_high_risk_locations")]
    pub high_risk_locations: Vec<String>,
    #[serde(default)]
    pub structuring: StructuringConfig,
    #[serde(default)]
    pub layering: LayeringConfig,
    #[serde(default)]
    pub smurfing: SmurfingConfig,
    #[serde(default)]
    pub large_cash: LargeCashConfig,
    #[serde(default)]
    pub velocity: VelocityConfig,
    #[serde(default)]
    pub round_amount: RoundAmountConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            high_risk_locations: default_high_risk_locations(),
            structuring: StructuringConfig::default(),
            layering: LayeringConfig::default(),
            smurfing: SmurfingConfig::default(),
            large_cash: LargeCashConfig::default(),
            velocity: VelocityConfig::default(),
            round_amount: RoundAmountConfig::default(),
        }
    }
}

fn default_history_capacity() -> usize {
    1000
}

fn default_high_risk_locations() -> Vec<String> {
    ["North Korea", "Iran", "Afghanistan", "Myanmar", "Syria"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Amounts just under the reporting threshold, repeated by one sender.
#[derive(Debug, Deserialize, Clone)]
pub struct StructuringConfig {
    #[serde(default = "default_structuring_lower")]
    pub lower: u64,
    #[serde(default = "default_structuring_upper")]
    pub upper: u64,
    #[serde(default = "default_structuring_min_prior")]
    pub min_prior: usize,
    #[serde(default = "default_structuring_window_days")]
    pub window_days: i64,
}

impl Default for StructuringConfig {
    fn default() -> Self {
        Self {
            lower: 9000,
            upper: 10000,
            min_prior: 3,
            window_days: 7,
        }
    }
}

fn default_structuring_lower() -> u64 {
    9000
}

fn default_structuring_upper() -> u64 {
    10000
}

fn default_structuring_min_prior() -> usize {
    3
}

fn default_structuring_window_days() -> i64 {
    7
}

#[derive(Debug, Deserialize, Clone)]
pub struct LayeringConfig {
    #[serde(default = "default_layering_lookback")]
    pub lookback: usize,
    #[serde(default = "default_layering_min_locations")]
    pub min_locations: usize,
    #[serde(default = "default_layering_min_history")]
    pub min_history: usize,
}

impl Default for LayeringConfig {
    fn default() -> Self {
        Self {
            lookback: 10,
            min_locations: 5,
            min_history: 3,
        }
    }
}

fn default_layering_lookback() -> usize {
    10
}

fn default_layering_min_locations() -> usize {
    5
}

fn default_layering_min_history() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmurfingConfig {
    #[serde(default = "default_smurfing_tolerance")]
    pub amount_tolerance: u64,
    #[serde(default = "default_smurfing_window_hours")]
    pub window_hours: i64,
    #[serde(default = "default_smurfing_min_matches")]
    pub min_matches: usize,
}

impl Default for SmurfingConfig {
    fn default() -> Self {
        Self {
            amount_tolerance: 500,
            window_hours: 24,
            min_matches: 5,
        }
    }
}

fn default_smurfing_tolerance() -> u64 {
    500
}

fn default_smurfing_window_hours() -> i64 {
    24
}

fn default_smurfing_min_matches() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LargeCashConfig {
    #[serde(default = "default_large_cash_threshold")]
    pub threshold: u64,
}

impl Default for LargeCashConfig {
    fn default() -> Self {
        Self { threshold: 50000 }
    }
}

fn default_large_cash_threshold() -> u64 {
    50000
}

#[derive(Debug, Deserialize, Clone)]
pub struct VelocityConfig {
    #[serde(default = "default_velocity_window")]
    pub window_secs: i64,
    #[serde(default = "default_velocity_max")]
    pub max_transactions: usize,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            window_secs: 3600,
            max_transactions: 10,
        }
    }
}

fn default_velocity_window() -> i64 {
    3600
}

fn default_velocity_max() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoundAmountConfig {
    #[serde(default = "default_round_min_amount")]
    pub min_amount: u64,
    #[serde(default = "default_round_multiple")]
    pub multiple: u64,
}

impl Default for RoundAmountConfig {
    fn default() -> Self {
        Self {
            min_amount: 10000,
            multiple: 1000,
        }
    }
}

fn default_round_min_amount() -> u64 {
    10000
}

fn default_round_multiple() -> u64 {
    1000
}

// ============================================================
// Model Config
// ============================================================

/// Isolation forest parameters. Training is seeded so every start
/// produces the same forest.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_trees")]
    pub trees: usize,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_contamination")]
    pub contamination: f64,
    #[serde(default = "default_training_samples")]
    pub training_samples: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            trees: 100,
            sample_size: 256,
            contamination: 0.1,
            training_samples: 1000,
            seed: 42,
        }
    }
}

fn default_trees() -> usize {
    100
}

fn default_sample_size() -> usize {
    256
}

fn default_contamination() -> f64 {
    0.1
}

fn default_training_samples() -> usize {
    1000
}

fn default_seed() -> u64 {
    42
}

// ============================================================
// Stream Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    #[serde(default = "default_suspicious_fraction")]
    pub suspicious_fraction: f64,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_error_cooldown_ms")]
    pub error_cooldown_ms: u64,
    #[serde(default = "default_replay_count")]
    pub replay_count: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            suspicious_fraction: 0.2,
            min_delay_ms: 1000,
            max_delay_ms: 4000,
            error_cooldown_ms: 5000,
            replay_count: 5,
            channel_capacity: 256,
        }
    }
}

fn default_suspicious_fraction() -> f64 {
    0.2
}

fn default_min_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    4000
}

fn default_error_cooldown_ms() -> u64 {
    5000
}

fn default_replay_count() -> usize {
    5
}

fn default_channel_capacity() -> usize {
    256
}

// ============================================================
// API Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_api_host")]
    pub host: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 5000,
            host: "0.0.0.0".to_string(),
        }
    }
}

fn default_api_port() -> u16 {
    5000
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to built-in defaults.
    pub fn load_or_default(path: &str) -> eyre::Result<Self> {
        if Path::new(path).exists() {
            return Self::load(path);
        }
        tracing::warn!(path, "Config file not found, using built-in defaults");
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> eyre::Result<()> {
        let detection = &self.detection;
        if detection.history_capacity == 0 {
            return Err(eyre::eyre!("detection.history_capacity must be positive"));
        }
        if detection.structuring.lower >= detection.structuring.upper {
            return Err(eyre::eyre!(
                "Structuring band [{}, {}) is empty",
                detection.structuring.lower,
                detection.structuring.upper
            ));
        }
        if detection.round_amount.multiple == 0 {
            return Err(eyre::eyre!("detection.round_amount.multiple must be positive"));
        }

        let model = &self.model;
        if !(model.contamination > 0.0 && model.contamination <= 0.5) {
            return Err(eyre::eyre!(
                "model.contamination must be in (0, 0.5], got {}",
                model.contamination
            ));
        }
        if model.trees == 0 {
            return Err(eyre::eyre!("model.trees must be positive"));
        }
        if model.sample_size < 2 || model.training_samples < 2 {
            return Err(eyre::eyre!(
                "model.sample_size and model.training_samples must be at least 2"
            ));
        }

        let stream = &self.stream;
        if !(0.0..=1.0).contains(&stream.suspicious_fraction) {
            return Err(eyre::eyre!(
                "stream.suspicious_fraction must be in [0, 1], got {}",
                stream.suspicious_fraction
            ));
        }
        if stream.min_delay_ms > stream.max_delay_ms {
            return Err(eyre::eyre!(
                "stream.min_delay_ms ({}) exceeds stream.max_delay_ms ({})",
                stream.min_delay_ms,
                stream.max_delay_ms
            ));
        }
        if stream.channel_capacity == 0 {
            return Err(eyre::eyre!("stream.channel_capacity must be positive"));
        }
        Ok(())
    }
}
