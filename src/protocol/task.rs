//! Task descriptions received on the task channel and the artifact paths
//! derived from them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One unit of work: run the execution engine against a single feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Test scenario/file handed to the engine as its final argument.
    pub feature: String,
    /// Report format requested from the engine.
    pub format: String,
    /// Directory receiving every artifact of this task.
    pub out: PathBuf,
    /// Passed through verbatim, between `--out` and the feature.
    #[serde(default, alias = "extraArgs")]
    pub extra_args: Vec<String>,
}

impl Task {
    /// Parse a single task line as sent by the coordinator.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }

    pub fn artifacts(&self) -> Artifacts {
        Artifacts::new(&self.out, &self.feature, &self.format)
    }

    /// Engine argument list: `--format <format> --out <report> <extra..> <feature>`.
    pub fn engine_args(&self) -> Vec<String> {
        let artifacts = self.artifacts();
        let mut args = Vec::with_capacity(5 + self.extra_args.len());
        args.push("--format".to_string());
        args.push(self.format.clone());
        args.push("--out".to_string());
        args.push(artifacts.report.to_string_lossy().into_owned());
        args.extend(self.extra_args.iter().cloned());
        args.push(self.feature.clone());
        args
    }
}

/// Files written for one task, all under the task's `out` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub dir: PathBuf,
    /// The engine's own report, `<out>/<name>.<format>`.
    pub report: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl Artifacts {
    pub fn new(out: &Path, feature: &str, format: &str) -> Self {
        let basename = sanitize_feature(feature);
        Self {
            dir: out.to_path_buf(),
            report: out.join(format!("{basename}.{format}")),
            stdout: out.join(format!("{basename}.stdout")),
            stderr: out.join(format!("{basename}.stderr")),
        }
    }
}

/// Replace every non-word character with `_`.
///
/// Word characters are ASCII letters, digits and `_`. Any other character,
/// including non-ASCII letters, becomes `_`, so applying it twice changes
/// nothing.
pub fn sanitize_feature(feature: &str) -> String {
    feature
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
