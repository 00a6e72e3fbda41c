// Pipeline file auto-detection. Probes the well-known provider
// locations in a fixed order and pairs each hit with its parser.

use crate::azure::AzureParser;
use crate::github::GitHubParser;
use pdk_core::error::{codes, PdkError, PdkResult};
use pdk_core::{Pipeline, PipelineParser};
use std::path::{Path, PathBuf};

/// Probe patterns, in priority order.
const PROBE_PATTERNS: &[&str] = &[
    ".github/workflows/*.yml",
    ".github/workflows/*.yaml",
    "azure-pipelines.yml",
    "azure-pipelines.yaml",
    ".azure-pipelines/*.yml",
    ".azure-pipelines/*.yaml",
    "*.pipeline.yml",
    "*.pipeline.yaml",
];

/// Find pipeline files under `root`, in probe order.
pub fn discover(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for pattern in PROBE_PATTERNS {
        let full = root.join(pattern);
        let Some(text) = full.to_str() else { continue };
        if let Ok(paths) = glob::glob(text) {
            let mut hits: Vec<PathBuf> = paths.flatten().collect();
            hits.sort();
            found.extend(hits);
        }
    }
    found
}

/// The first pipeline file under `root`, per probe order.
pub fn default_pipeline_file(root: &Path) -> Option<PathBuf> {
    discover(root).into_iter().next()
}

/// The parser that recognises `path`.
pub fn parser_for(path: &Path) -> PdkResult<Box<dyn PipelineParser>> {
    let github = GitHubParser::new();
    if github.can_parse(path) {
        return Ok(Box::new(github));
    }
    let azure = AzureParser::new();
    if azure.can_parse(path) {
        return Ok(Box::new(azure));
    }
    // `*.pipeline.yml` and unknown names: sniff the content shape.
    Ok(Box::new(SniffingParser))
}

/// Fallback parser that decides provider by document shape: `on:`/`jobs:`
/// mapping means GitHub, `stages:`/`pool:`/jobs list means Azure.
pub struct SniffingParser;

impl PipelineParser for SniffingParser {
    fn parse(&self, text: &str) -> PdkResult<Pipeline> {
        let value: serde_yaml::Value = serde_yaml::from_str(text).map_err(|e| {
            PdkError::new(codes::PARSER_INVALID_YAML, format!("invalid pipeline YAML: {e}"))
        })?;

        let is_github = value.get("on").is_some()
            || value
                .get("jobs")
                .map(|j| j.is_mapping())
                .unwrap_or(false);
        let is_azure = value.get("stages").is_some()
            || value.get("pool").is_some()
            || value
                .get("jobs")
                .map(|j| j.is_sequence())
                .unwrap_or(false)
            || value.get("steps").is_some();

        if is_github {
            GitHubParser::new().parse(text)
        } else if is_azure {
            AzureParser::new().parse(text)
        } else {
            Err(PdkError::new(
                codes::PARSER_UNKNOWN_PROVIDER,
                "cannot determine the pipeline provider from the document",
            )
            .with_suggestion(
                "Place the file under .github/workflows/ or name it azure-pipelines.yml",
            ))
        }
    }

    fn parse_file(&self, path: &Path) -> PdkResult<Pipeline> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| PdkError::file_not_found(path.to_path_buf()))?;
        self.parse(&text)
    }

    fn can_parse(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        text.ends_with(".yml") || text.ends_with(".yaml")
    }
}

/// Load a pipeline: explicit file when given, else auto-detected.
pub fn load_pipeline(root: &Path, file: Option<&Path>) -> PdkResult<(Pipeline, PathBuf)> {
    let path = match file {
        Some(path) => {
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                root.join(path)
            };
            if !path.exists() {
                return Err(PdkError::file_not_found(path));
            }
            path
        }
        None => default_pipeline_file(root).ok_or_else(|| {
            PdkError::new(
                codes::FILE_NOT_FOUND,
                format!("no pipeline file found under {}", root.display()),
            )
            .with_suggestion("Pass one explicitly with --file <path>")
        })?,
    };

    let parser = parser_for(&path)?;
    let pipeline = parser.parse_file(&path)?;
    Ok((pipeline, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_probe_order_prefers_github() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".github/workflows")).unwrap();
        std::fs::write(
            dir.path().join(".github/workflows/ci.yml"),
            "jobs:\n  a:\n    runs-on: ubuntu-latest\n    steps:\n      - run: echo hi\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("azure-pipelines.yml"), "steps:\n  - script: echo\n")
            .unwrap();

        let found = discover(dir.path());
        assert!(found[0].ends_with(".github/workflows/ci.yml"));
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_load_pipeline_auto_detects() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("azure-pipelines.yml"),
            "name: auto\njobs:\n  - job: A\n    steps:\n      - script: echo hi\n",
        )
        .unwrap();

        let (pipeline, path) = load_pipeline(dir.path(), None).unwrap();
        assert_eq!(pipeline.name, "auto");
        assert!(path.ends_with("azure-pipelines.yml"));
    }

    #[test]
    fn test_missing_file_is_exit_2() {
        let dir = TempDir::new().unwrap();
        let err = load_pipeline(dir.path(), Some(Path::new("nope.yml"))).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_sniffing_parser_github_shape() {
        let pipeline = SniffingParser
            .parse("jobs:\n  a:\n    runs-on: ubuntu-latest\n    steps:\n      - run: echo\n")
            .unwrap();
        assert_eq!(pipeline.provider, pdk_core::Provider::GitHub);
    }

    #[test]
    fn test_sniffing_parser_azure_shape() {
        let pipeline = SniffingParser
            .parse("pool:\n  vmImage: ubuntu-latest\nsteps:\n  - script: echo\n")
            .unwrap();
        assert_eq!(pipeline.provider, pdk_core::Provider::AzureDevOps);
    }

    #[test]
    fn test_sniffing_parser_unknown_provider() {
        let err = SniffingParser.parse("just: text\n").unwrap_err();
        assert_eq!(err.code, codes::PARSER_UNKNOWN_PROVIDER);
    }
}
