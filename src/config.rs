//! Layered configuration for apigen.
//!
//! Settings come from `apigen.toml` in the project directory (or `--config`),
//! then environment variables, then CLI flags.
//!
//! ```toml
//! [generation]
//! max_fix_attempts = 3
//! generate = "models_and_tests"
//! template_dir = "templates/typescript"
//! checkpoint_dir = ".apigen/checkpoints"
//!
//! [commands]
//! install = "npm install --loglevel=error"
//! compile_files = "npx tsc {files} --noEmit --skipLibCheck"
//! timeout_secs = 300
//!
//! [synthesis]
//! cmd = "claude"
//! args = ["--print"]
//! timeout_secs = 600
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::pipeline::state::GenerateOptions;

pub const CONFIG_FILE: &str = "apigen.toml";
pub const APIGEN_DIR: &str = ".apigen";

/// Generation behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSection {
    /// Repair attempts for a failing check (checks run one more time than this)
    #[serde(default = "default_max_fix_attempts")]
    pub max_fix_attempts: u32,
    #[serde(default)]
    pub generate: GenerateOptions,
    /// Project skeleton copied into the destination before install
    #[serde(default)]
    pub template_dir: Option<PathBuf>,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    /// Directory of `<kind>.md` files overriding built-in instructions
    #[serde(default)]
    pub prompts_dir: Option<PathBuf>,
}

fn default_max_fix_attempts() -> u32 {
    3
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(APIGEN_DIR).join("checkpoints")
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            max_fix_attempts: default_max_fix_attempts(),
            generate: GenerateOptions::default(),
            template_dir: None,
            checkpoint_dir: default_checkpoint_dir(),
            prompts_dir: None,
        }
    }
}

/// Shell commands run inside the destination folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsSection {
    #[serde(default = "default_install")]
    pub install: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_lint")]
    pub lint: String,
    /// Whole-project compile used by the final checks
    #[serde(default = "default_compile")]
    pub compile: String,
    /// Per-item compile; `{files}` is replaced by the item's files
    #[serde(default = "default_compile_files")]
    pub compile_files: String,
    #[serde(default = "default_test")]
    pub test: String,
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
}

fn default_install() -> String {
    "npm install --loglevel=error".to_string()
}

fn default_format() -> String {
    "npm run prettify".to_string()
}

fn default_lint() -> String {
    "npm run lint:fix".to_string()
}

fn default_compile() -> String {
    "npx tsc --noEmit".to_string()
}

fn default_compile_files() -> String {
    "npx tsc {files} --noEmit --skipLibCheck --esModuleInterop".to_string()
}

fn default_test() -> String {
    "npm test".to_string()
}

fn default_command_timeout() -> u64 {
    300
}

impl Default for CommandsSection {
    fn default() -> Self {
        Self {
            install: default_install(),
            format: default_format(),
            lint: default_lint(),
            compile: default_compile(),
            compile_files: default_compile_files(),
            test: default_test(),
            timeout_secs: default_command_timeout(),
        }
    }
}

/// External synthesis command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisSection {
    #[serde(default = "default_synth_cmd")]
    pub cmd: String,
    #[serde(default = "default_synth_args")]
    pub args: Vec<String>,
    #[serde(default = "default_synth_timeout")]
    pub timeout_secs: u64,
}

fn default_synth_cmd() -> String {
    "claude".to_string()
}

fn default_synth_args() -> Vec<String> {
    vec!["--print".to_string()]
}

fn default_synth_timeout() -> u64 {
    600
}

impl Default for SynthesisSection {
    fn default() -> Self {
        Self {
            cmd: default_synth_cmd(),
            args: default_synth_args(),
            timeout_secs: default_synth_timeout(),
        }
    }
}

/// Contents of `apigen.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApigenToml {
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub commands: CommandsSection,
    #[serde(default)]
    pub synthesis: SynthesisSection,
}

impl ApigenToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse apigen.toml")
    }

    /// Load `apigen.toml` from `project_dir`, or defaults if it does not exist.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(cmd) = lookup("APIGEN_SYNTH_CMD").filter(|s| !s.trim().is_empty()) {
            self.synthesis.cmd = cmd;
        }
        if let Some(n) = lookup("APIGEN_MAX_FIX_ATTEMPTS").and_then(|s| s.trim().parse().ok()) {
            self.generation.max_fix_attempts = n;
        }
        if let Some(dir) = lookup("APIGEN_CHECKPOINT_DIR").filter(|s| !s.trim().is_empty()) {
            self.generation.checkpoint_dir = PathBuf::from(dir);
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.generation.max_fix_attempts == 0 {
            warnings.push(
                "max_fix_attempts is 0: failing checks will run once with no repair".to_string(),
            );
        }
        if !self.commands.compile_files.contains(crate::quality::commands::FILES_PLACEHOLDER) {
            warnings.push(format!(
                "commands.compile_files has no '{}' placeholder; file paths will be appended",
                crate::quality::commands::FILES_PLACEHOLDER
            ));
        }
        if self.commands.timeout_secs == 0 || self.synthesis.timeout_secs == 0 {
            warnings.push("A timeout of 0 seconds fails every command".to_string());
        }
        if self.synthesis.cmd.trim().is_empty() {
            warnings.push("synthesis.cmd is empty".to_string());
        }
        if let Some(dir) = &self.generation.template_dir
            && !dir.is_dir()
        {
            warnings.push(format!(
                "template_dir '{}' does not exist or is not a directory",
                dir.display()
            ));
        }

        warnings
    }
}

/// Resolved configuration: file, then environment, then CLI.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub toml: ApigenToml,
    pub verbose: bool,
    pub yes: bool,
}

impl Config {
    /// Load from `project_dir` (or an explicit config file) and apply the environment.
    pub fn load(project_dir: PathBuf, config_file: Option<&Path>) -> Result<Self> {
        let mut toml = match config_file {
            Some(path) => ApigenToml::load(path)?,
            None => ApigenToml::load_or_default(&project_dir)?,
        };
        toml.apply_env(|key| std::env::var(key).ok());

        Ok(Self {
            project_dir,
            toml,
            verbose: false,
            yes: false,
        })
    }

    pub fn with_cli_args(mut self, verbose: bool, yes: bool, max_fix_attempts: Option<u32>) -> Self {
        self.verbose = verbose;
        self.yes = yes;
        if let Some(n) = max_fix_attempts {
            self.toml.generation.max_fix_attempts = n;
        }
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn apigen_dir(&self) -> PathBuf {
        self.project_dir.join(APIGEN_DIR)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.resolve(&self.toml.generation.checkpoint_dir)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.apigen_dir().join("logs")
    }

    /// Prompt/output transcripts of synthesis calls.
    pub fn synthesis_log_dir(&self) -> PathBuf {
        self.log_dir().join("synthesis")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.apigen_dir().join("run.lock")
    }

    pub fn template_dir(&self) -> Option<PathBuf> {
        self.toml.generation.template_dir.as_deref().map(|p| self.resolve(p))
    }

    pub fn prompts_dir(&self) -> Option<PathBuf> {
        self.toml.generation.prompts_dir.as_deref().map(|p| self.resolve(p))
    }

    pub fn max_fix_attempts(&self) -> u32 {
        self.toml.generation.max_fix_attempts
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = ApigenToml::parse("").unwrap();
        assert_eq!(config.generation.max_fix_attempts, 3);
        assert_eq!(config.generation.generate, GenerateOptions::ModelsAndTests);
        assert_eq!(
            config.generation.checkpoint_dir,
            PathBuf::from(".apigen/checkpoints")
        );
        assert_eq!(config.commands.install, "npm install --loglevel=error");
        assert_eq!(config.synthesis.cmd, "claude");
        assert_eq!(config.synthesis.args, vec!["--print"]);
    }

    #[test]
    fn test_parse_sections() {
        let content = r#"
[generation]
max_fix_attempts = 5
generate = "models_and_first_test"

[commands]
compile = "tsc -p ."
timeout_secs = 30

[synthesis]
cmd = "my-llm"
args = []
"#;
        let config = ApigenToml::parse(content).unwrap();
        assert_eq!(config.generation.max_fix_attempts, 5);
        assert_eq!(config.generation.generate, GenerateOptions::ModelsAndFirstTest);
        assert_eq!(config.commands.compile, "tsc -p .");
        assert_eq!(config.commands.timeout_secs, 30);
        assert_eq!(config.commands.test, "npm test");
        assert_eq!(config.synthesis.cmd, "my-llm");
        assert!(config.synthesis.args.is_empty());
    }

    #[test]
    fn test_parse_invalid_is_error() {
        let err = ApigenToml::parse("[generation]\ngenerate = \"everything\"").unwrap_err();
        assert!(err.to_string().contains("Failed to parse apigen.toml"));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = ApigenToml::parse("[synthesis]\ncmd = \"from-file\"").unwrap();
        let env: HashMap<&str, &str> = [
            ("APIGEN_SYNTH_CMD", "from-env"),
            ("APIGEN_MAX_FIX_ATTEMPTS", "7"),
            ("APIGEN_CHECKPOINT_DIR", "/tmp/ckpt"),
        ]
        .into_iter()
        .collect();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.synthesis.cmd, "from-env");
        assert_eq!(config.generation.max_fix_attempts, 7);
        assert_eq!(config.generation.checkpoint_dir, PathBuf::from("/tmp/ckpt"));
    }

    #[test]
    fn test_env_ignores_unparseable_values() {
        let mut config = ApigenToml::default();
        config.apply_env(|k| (k == "APIGEN_MAX_FIX_ATTEMPTS").then(|| "lots".to_string()));
        assert_eq!(config.generation.max_fix_attempts, 3);
    }

    #[test]
    fn test_cli_overrides_env_and_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[generation]\nmax_fix_attempts = 5",
        )
        .unwrap();
        let config = Config::load(dir.path().to_path_buf(), None)
            .unwrap()
            .with_cli_args(true, false, Some(1));
        assert_eq!(config.max_fix_attempts(), 1);
        assert!(config.verbose);
    }

    #[test]
    fn test_paths_resolve_against_project_dir() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path().to_path_buf(), None).unwrap();
        assert_eq!(config.lock_file(), dir.path().join(".apigen/run.lock"));
        assert_eq!(config.log_dir(), dir.path().join(".apigen/logs"));
        assert!(config.template_dir().is_none());
    }

    #[test]
    fn test_explicit_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[commands]\nlint = \"eslint --fix .\"").unwrap();
        let config = Config::load(dir.path().to_path_buf(), Some(&path)).unwrap();
        assert_eq!(config.toml.commands.lint, "eslint --fix .");
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = ApigenToml::default();
        assert!(config.validate().is_empty());

        config.generation.max_fix_attempts = 0;
        config.commands.compile_files = "tsc".to_string();
        config.generation.template_dir = Some(PathBuf::from("/nonexistent/template"));
        let warnings = config.validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().any(|w| w.contains("max_fix_attempts")));
        assert!(warnings.iter().any(|w| w.contains("{files}")));
        assert!(warnings.iter().any(|w| w.contains("template_dir")));
    }
}
