//! Prompt assembly for synthesis requests.
//!
//! Each request kind has a built-in instruction block. A file named
//! `<kind>.md` in the prompts directory replaces it.

use std::path::{Path, PathBuf};

use super::{Artifact, SynthesisRequest};

const DOT_ENV_INSTRUCTIONS: &str = "Create a .env file for the API described below. \
Include the base URL and any credentials the API's security schemes require, \
using placeholder values.";

const MODELS_INSTRUCTIONS: &str = "Create TypeScript request and response models \
for every schema used by the paths below, plus a service class exposing one \
method per operation. Place models under src/models/.";

const FIRST_TEST_INSTRUCTIONS: &str = "Write the first test for the operation below \
using the provided models and service. Cover the main success response. Place \
tests under src/tests/.";

const ADDITIONAL_TESTS_INSTRUCTIONS: &str = "Extend the existing tests for the \
operation below with cases for the remaining documented responses. Keep the \
existing tests passing.";

const FIX_INSTRUCTIONS: &str = "The files below fail validation. Fix them so the \
diagnostics are resolved without changing the intended behaviour. Return every \
file you changed in full.";

const OUTPUT_CONTRACT: &str = r#"## OUTPUT
Respond with a single JSON object and nothing else:
{"files": [{"path": "relative/path.ts", "content": "full file content"}]}"#;

pub struct PromptBuilder {
    prompts_dir: Option<PathBuf>,
}

impl PromptBuilder {
    pub fn new(prompts_dir: Option<PathBuf>) -> Self {
        Self { prompts_dir }
    }

    pub fn build(&self, request: &SynthesisRequest) -> String {
        let instructions = self.instructions(request);
        let body = match request {
            SynthesisRequest::DotEnv { definition } | SynthesisRequest::Models { definition } => {
                definition_section(definition)
            }
            SynthesisRequest::FirstTest { definition, models } => format!(
                "{}\n{}",
                definition_section(definition),
                files_section("MODELS", models)
            ),
            SynthesisRequest::AdditionalTests {
                definition,
                tests,
                models,
            } => format!(
                "{}\n{}\n{}",
                definition_section(definition),
                files_section("MODELS", models),
                files_section("EXISTING TESTS", tests)
            ),
            SynthesisRequest::Fix { files, diagnostics } => format!(
                "{}\n## DIAGNOSTICS\n```\n{}\n```\n",
                files_section("FILES", files),
                diagnostics.trim_end()
            ),
        };

        format!(
            "## TASK\n{}\n\n{}\n{}\n",
            instructions.trim_end(),
            body,
            OUTPUT_CONTRACT
        )
    }

    fn instructions(&self, request: &SynthesisRequest) -> String {
        if let Some(custom) = self
            .prompts_dir
            .as_deref()
            .and_then(|dir| load_override(dir, request.kind()))
        {
            return custom;
        }
        match request {
            SynthesisRequest::DotEnv { .. } => DOT_ENV_INSTRUCTIONS,
            SynthesisRequest::Models { .. } => MODELS_INSTRUCTIONS,
            SynthesisRequest::FirstTest { .. } => FIRST_TEST_INSTRUCTIONS,
            SynthesisRequest::AdditionalTests { .. } => ADDITIONAL_TESTS_INSTRUCTIONS,
            SynthesisRequest::Fix { .. } => FIX_INSTRUCTIONS,
        }
        .to_string()
    }
}

fn load_override(dir: &Path, kind: &str) -> Option<String> {
    std::fs::read_to_string(dir.join(format!("{}.md", kind)))
        .ok()
        .filter(|s| !s.trim().is_empty())
}

fn definition_section(definition: &str) -> String {
    format!("## API DEFINITION\n```yaml\n{}\n```\n", definition.trim_end())
}

fn files_section(title: &str, files: &[Artifact]) -> String {
    let mut out = format!("## {}\n", title);
    for file in files {
        out.push_str(&format!(
            "### {}\n```\n{}\n```\n",
            file.relative_path(),
            file.content.trim_end()
        ));
    }
    out
}
