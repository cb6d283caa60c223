//! Pipeline configuration
//!
//! Loaded from a YAML file. Every field has a default, so an empty file (or
//! no file at all) reproduces the standard toolchain:
//!
//! ```yaml
//! workdir: .
//! log_dir: logs
//! template_dir: File
//! deploy_policy: best_effort
//!
//! fetch:
//!   timeout: 30000
//!   variants:
//!     - name: 3d
//!       url: "https://pubchem.ncbi.nlm.nih.gov/rest/pug/compound/cid/${{ cid }}/SDF?record_type=3d"
//!     - name: 2d
//!       url: "https://pubchem.ncbi.nlm.nih.gov/rest/pug/compound/cid/${{ cid }}/SDF"
//!
//! convert:
//!   program: obabel
//!   args: ["${{ input }}", "-O", "${{ output }}"]
//!   timeout: 60000
//!
//! topology:
//!   program: conda
//!   args: ["run", "-n", "gcc", "acpype", "-i", "${{ input }}", "-c", "${{ charge_method }}",
//!          "-a", "${{ force_field }}", "-n", "${{ net_charge }}", "-b", "${{ basename }}"]
//!   timeout: 3600000
//!   fallbacks:
//!     - program: acpype
//!       args: ["-i", "${{ input }}", "-c", "${{ charge_method }}", "-a", "${{ force_field }}",
//!              "-n", "${{ net_charge }}", "-b", "${{ basename }}"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {file}: {error}")]
    Io {
        file: String,
        error: std::io::Error,
    },

    #[error("YAML parse error in {file}: {error}")]
    Yaml {
        file: String,
        error: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What a failed template deployment does to the sample outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeployPolicy {
    /// Record a warning; the sample still succeeds
    #[default]
    BestEffort,
    /// Fail the sample at the Deploy stage
    Strict,
}

/// One external command with `${{ }}` argument templates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Timeout in milliseconds
    #[serde(default = "default_command_timeout")]
    pub timeout: u64,
}

fn default_command_timeout() -> u64 {
    60_000
}

impl CommandTemplate {
    pub fn new(program: &str, args: &[&str], timeout: u64) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout,
        }
    }
}

/// A command plus ordered fallback commands tried when it fails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(flatten)]
    pub command: CommandTemplate,

    #[serde(default)]
    pub fallbacks: Vec<CommandTemplate>,
}

impl ToolConfig {
    pub fn single(command: CommandTemplate) -> Self {
        Self {
            command,
            fallbacks: Vec::new(),
        }
    }

    /// Primary command followed by its fallbacks
    pub fn variants(&self) -> Vec<CommandTemplate> {
        std::iter::once(self.command.clone())
            .chain(self.fallbacks.iter().cloned())
            .collect()
    }
}

/// One structure download request variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchVariant {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Request timeout in milliseconds
    #[serde(default = "default_fetch_timeout")]
    pub timeout: u64,

    /// Tried in order until one returns 200
    #[serde(default = "default_fetch_variants")]
    pub variants: Vec<FetchVariant>,
}

fn default_fetch_timeout() -> u64 {
    30_000
}

fn default_fetch_variants() -> Vec<FetchVariant> {
    const BASE: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug/compound/cid/${{ cid }}/SDF";
    vec![
        FetchVariant {
            name: "3d".to_string(),
            url: format!("{}?record_type=3d", BASE),
        },
        FetchVariant {
            name: "2d".to_string(),
            url: BASE.to_string(),
        },
    ]
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: default_fetch_timeout(),
            variants: default_fetch_variants(),
        }
    }
}

/// Fixed settings for geometry optimization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSettings {
    #[serde(default = "default_optimizer_force_field")]
    pub force_field: String,

    #[serde(default = "default_optimizer_steps")]
    pub steps: u32,

    /// Solvent dielectric constant (water)
    #[serde(default = "default_dielectric")]
    pub dielectric: f64,
}

fn default_optimizer_force_field() -> String {
    "MMFF94".to_string()
}

fn default_optimizer_steps() -> u32 {
    1000
}

fn default_dielectric() -> f64 {
    78.0
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            force_field: default_optimizer_force_field(),
            steps: default_optimizer_steps(),
            dielectric: default_dielectric(),
        }
    }
}

/// Fixed settings for topology generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterizationSettings {
    #[serde(default = "default_charge_method")]
    pub charge_method: String,

    #[serde(default = "default_topology_force_field")]
    pub force_field: String,

    #[serde(default)]
    pub net_charge: i32,
}

fn default_charge_method() -> String {
    "bcc".to_string()
}

fn default_topology_force_field() -> String {
    "gaff2".to_string()
}

impl Default for ParameterizationSettings {
    fn default() -> Self {
        Self {
            charge_method: default_charge_method(),
            force_field: default_topology_force_field(),
            net_charge: 0,
        }
    }
}

/// Which topology section is cut out into the parameter file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSectionConfig {
    #[serde(default = "default_section")]
    pub section: String,
}

fn default_section() -> String {
    "atomtypes".to_string()
}

impl Default for ParameterSectionConfig {
    fn default() -> Self {
        Self {
            section: default_section(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory under which sample workspaces are created
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,

    #[serde(default)]
    pub deploy_policy: DeployPolicy,

    /// Skip samples whose final artifacts already exist
    #[serde(default = "default_skip_completed")]
    pub skip_completed: bool,

    /// Byte budget for captured process output and response bodies
    #[serde(default = "default_diagnostic_limit")]
    pub diagnostic_limit: usize,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default = "default_convert")]
    pub convert: ToolConfig,

    #[serde(default = "default_optimize")]
    pub optimize: ToolConfig,

    #[serde(default = "default_topology")]
    pub topology: ToolConfig,

    #[serde(default)]
    pub optimizer: OptimizerSettings,

    #[serde(default)]
    pub parameterization: ParameterizationSettings,

    #[serde(default)]
    pub parameters: ParameterSectionConfig,
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("File")
}

fn default_skip_completed() -> bool {
    true
}

fn default_diagnostic_limit() -> usize {
    4096
}

fn default_convert() -> ToolConfig {
    ToolConfig::single(CommandTemplate::new(
        "obabel",
        &["${{ input }}", "-O", "${{ output }}"],
        60_000,
    ))
}

fn default_optimize() -> ToolConfig {
    ToolConfig::single(CommandTemplate::new(
        "obabel",
        &[
            "${{ input }}",
            "-O",
            "${{ output }}",
            "--minimize",
            "--ff",
            "${{ force_field }}",
            "--steps",
            "${{ steps }}",
            "--dielectric",
            "${{ dielectric }}",
        ],
        120_000,
    ))
}

fn default_topology() -> ToolConfig {
    ToolConfig::single(CommandTemplate::new(
        "conda",
        &[
            "run",
            "-n",
            "gcc",
            "acpype",
            "-i",
            "${{ input }}",
            "-c",
            "${{ charge_method }}",
            "-a",
            "${{ force_field }}",
            "-n",
            "${{ net_charge }}",
            "-b",
            "${{ basename }}",
        ],
        3_600_000,
    ))
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            log_dir: default_log_dir(),
            template_dir: default_template_dir(),
            deploy_policy: DeployPolicy::default(),
            skip_completed: default_skip_completed(),
            diagnostic_limit: default_diagnostic_limit(),
            fetch: FetchConfig::default(),
            convert: default_convert(),
            optimize: default_optimize(),
            topology: default_topology(),
            optimizer: OptimizerSettings::default(),
            parameterization: ParameterizationSettings::default(),
            parameters: ParameterSectionConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            file: path.display().to_string(),
            error,
        })?;
        Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::Yaml { error, .. } => ConfigError::Yaml {
                file: path.display().to_string(),
                error,
            },
            other => other,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as null; treat it as all-defaults
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: PipelineConfig =
            serde_yaml::from_str(content).map_err(|error| ConfigError::Yaml {
                file: "<inline>".to_string(),
                error,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.variants.is_empty() {
            return Err(ConfigError::Invalid(
                "fetch.variants must list at least one request".to_string(),
            ));
        }
        if self.parameters.section.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "parameters.section must not be empty".to_string(),
            ));
        }
        for (name, tool) in self.tools() {
            for command in tool.variants() {
                if command.program.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "{} has a command with an empty program",
                        name
                    )));
                }
                if command.timeout == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "{} timeout must be greater than zero",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    /// External tools by role
    pub fn tools(&self) -> [(&'static str, &ToolConfig); 3] {
        [
            ("convert", &self.convert),
            ("optimize", &self.optimize),
            ("topology", &self.topology),
        ]
    }

    /// Distinct external programs the pipeline may launch
    pub fn programs(&self) -> Vec<String> {
        let mut programs: Vec<String> = Vec::new();
        for (_, tool) in self.tools() {
            for command in tool.variants() {
                if !programs.contains(&command.program) {
                    programs.push(command.program);
                }
            }
        }
        programs
    }
}
