//! Harness configuration: JSON files, positional arguments and tolerance settings.

use std::fmt;
use std::fs;
use std::str::FromStr;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::convolution_info::ConvolutionInfo;
use crate::data_generator::InitPattern;
use crate::error_metrics::ErrorMetrics;
use crate::errors::{ConvolutionError, HarnessError, HarnessResult, ValidationError, ValidationResult};
use crate::parallel_for::ParallelConfig;

/// Which passes a run exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassSelector {
    #[default]
    All,
    Forward,
    Backward,
}

impl PassSelector {
    pub fn runs_forward(self) -> bool {
        matches!(self, PassSelector::All | PassSelector::Forward)
    }

    pub fn runs_backward(self) -> bool {
        matches!(self, PassSelector::All | PassSelector::Backward)
    }
}

impl FromStr for PassSelector {
    type Err = ConvolutionError;

    fn from_str(selector: &str) -> Result<Self, Self::Err> {
        match selector.to_ascii_lowercase().as_str() {
            "a" | "all" => Ok(PassSelector::All),
            "f" | "fwd" | "forward" => Ok(PassSelector::Forward),
            "b" | "bwd" | "backward" => Ok(PassSelector::Backward),
            _ => Err(ConvolutionError::UnknownPassSelector {
                selector: selector.to_string(),
            }),
        }
    }
}

impl fmt::Display for PassSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PassSelector::All => "A",
            PassSelector::Forward => "F",
            PassSelector::Backward => "B",
        };
        write!(f, "{}", name)
    }
}

/// Everything a harness run needs besides the tolerance settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Timed invocations of the implementation under test per pass.
    pub iterations: u32,
    pub convolution: ConvolutionInfo,
    pub pass: PassSelector,
    pub seed: u64,
    pub init: InitPattern,
    /// Worker threads; `None` uses the available parallelism.
    pub threads: Option<usize>,
    /// Untimed invocations before the measurement starts.
    pub warmup_iterations: u32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            iterations: 10,
            convolution: ConvolutionInfo::default(),
            pass: PassSelector::All,
            seed: 1,
            init: InitPattern::Signed,
            threads: None,
            warmup_iterations: 0,
        }
    }
}

fn parse_arg<T: FromStr>(name: &str, value: &str) -> HarnessResult<T> {
    value.parse().map_err(|_| HarnessError::InvalidArgument {
        name: name.to_string(),
        value: value.to_string(),
    })
}

impl HarnessConfig {
    /// Positional argument order of the command line.
    pub const POSITIONAL_ARGS: [&'static str; 14] = [
        "iters",
        "inpWidth",
        "inpHeight",
        "nImg",
        "nIfm",
        "nOfm",
        "kw",
        "kh",
        "padw",
        "padh",
        "stride",
        "type",
        "format",
        "padding_mode",
    ];

    /// Builds a configuration from positional arguments; missing trailing
    /// arguments keep their defaults. `stride` sets both strides.
    pub fn from_positional_args<S: AsRef<str>>(args: &[S]) -> HarnessResult<Self> {
        let mut config = Self::default();
        let conv = &mut config.convolution;

        for (index, value) in args.iter().map(AsRef::as_ref).enumerate() {
            let name = Self::POSITIONAL_ARGS.get(index).copied().unwrap_or("extra argument");
            match index {
                0 => config.iterations = parse_arg(name, value)?,
                1 => conv.input_width = parse_arg(name, value)?,
                2 => conv.input_height = parse_arg(name, value)?,
                3 => conv.batch = parse_arg(name, value)?,
                4 => conv.input_channels = parse_arg(name, value)?,
                5 => conv.output_channels = parse_arg(name, value)?,
                6 => conv.kernel_width = parse_arg(name, value)?,
                7 => conv.kernel_height = parse_arg(name, value)?,
                8 => conv.pad_w = parse_arg(name, value)?,
                9 => conv.pad_h = parse_arg(name, value)?,
                10 => {
                    let stride = parse_arg(name, value)?;
                    conv.stride_h = stride;
                    conv.stride_w = stride;
                }
                11 => config.pass = value.parse()?,
                12 => debug!("tensor format '{}' ignored, canonical NCHW/KCRS buffers are used", value),
                13 => conv.padding_mode = parse_arg(name, value)?,
                _ => {
                    return Err(HarnessError::InvalidArgument {
                        name: name.to_string(),
                        value: value.to_string(),
                    });
                }
            }
        }

        Ok(config)
    }

    pub fn parallel_config(&self) -> ParallelConfig {
        match self.threads {
            Some(threads) => ParallelConfig::new().with_threads(threads),
            None => ParallelConfig::new(),
        }
    }
}

/// Tolerance settings of the correctness check.
///
/// A run fails when `tolerance < 100 * scale * normf_rel`. A tolerance of zero
/// disables checking; performance is still measured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub tolerance: f64,
    pub scale: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            tolerance: 1.0,
            scale: 100.0,
        }
    }
}

impl ValidationConfig {
    pub fn new(tolerance: f64, scale: f64) -> Self {
        Self { tolerance, scale }
    }

    pub fn disabled() -> Self {
        Self {
            tolerance: 0.0,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tolerance != 0.0
    }

    pub fn violates(&self, normf_rel: f64) -> bool {
        self.is_enabled() && self.tolerance < 100.0 * self.scale * normf_rel
    }

    /// Fails with the error percentage when `metrics` exceed the tolerance.
    pub fn check(&self, metrics: &ErrorMetrics) -> ValidationResult<()> {
        if self.violates(metrics.normf_rel) {
            return Err(ValidationError::ToleranceExceeded {
                error_percent: 100.0 * metrics.normf_rel,
                tolerance: self.tolerance,
                scale: self.scale,
            });
        }
        Ok(())
    }

    /// Reads the legacy `CHECK` / `CHECK_SCALE` values; absent or empty values
    /// keep the defaults and negative values are taken by magnitude. NaN and
    /// infinite values are rejected.
    pub fn from_env_values(check: Option<&str>, check_scale: Option<&str>) -> ValidationResult<Self> {
        fn parse(name: &str, value: Option<&str>, default: f64) -> ValidationResult<f64> {
            match value.map(str::trim) {
                None | Some("") => Ok(default),
                Some(value) => value
                    .parse::<f64>()
                    .ok()
                    .filter(|parsed| parsed.is_finite())
                    .map(f64::abs)
                    .ok_or_else(|| ValidationError::InvalidSetting {
                        name: name.to_string(),
                        value: value.to_string(),
                    }),
            }
        }

        let defaults = Self::default();
        Ok(Self {
            tolerance: parse("CHECK", check, defaults.tolerance)?,
            scale: parse("CHECK_SCALE", check_scale, defaults.scale)?,
        })
    }
}

/// Loads harness configurations from JSON files.
pub struct ConfigLoader;

impl ConfigLoader {
    pub const DEFAULT_PATH: &'static str = "configs/conv_layer_check.json";

    /// Loads a configuration, failing when the file cannot be read.
    pub fn load(path: &str) -> HarnessResult<HarnessConfig> {
        let content = fs::read_to_string(path).map_err(|e| HarnessError::ConfigIo {
            path: path.to_string(),
            source: e,
        })?;
        Self::parse(path, &content)
    }

    /// Loads a configuration with fallback to defaults when the file is missing.
    pub fn load_or_default(path: &str) -> HarnessResult<HarnessConfig> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(path, &content),
            Err(_) => {
                warn!("Config file '{}' not found, using default configuration", path);
                Ok(HarnessConfig::default())
            }
        }
    }

    fn parse(path: &str, content: &str) -> HarnessResult<HarnessConfig> {
        serde_json::from_str(content).map_err(|e| HarnessError::ConfigParse {
            path: path.to_string(),
            source: e,
        })
    }
}
