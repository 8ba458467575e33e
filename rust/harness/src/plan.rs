//! Job list construction.
//!
//! Every (relation, mode, model) combination whose probe config exists on disk
//! becomes one job. Missing configs are reported and need operator consent
//! before the remaining jobs run.

use std::{
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use crate::config::HarnessConfig;

/// One invocation of the probe executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// `{relation}/{mode}/{model}`; unique within a plan.
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    /// Failed attempts so far.
    pub retries: u32,
}

impl Job {
    #[must_use]
    pub fn new(label: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args,
            retries: 0,
        }
    }

    /// The same job with one more failed attempt recorded.
    #[must_use]
    pub fn retried(mut self) -> Self {
        self.retries += 1;
        self
    }

    /// One-based number of the attempt about to run.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.retries + 1
    }

    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Label usable as a directory name.
    #[must_use]
    pub fn log_name(&self) -> String {
        self.label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    }
}

/// A combination left out because its probe config does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedCombination {
    pub relation: String,
    pub mode: String,
    pub model: String,
    pub path: PathBuf,
}

/// Planned jobs plus the combinations that could not be planned.
#[derive(Debug, Default)]
pub struct JobPlan {
    pub jobs: Vec<Job>,
    pub skipped: Vec<SkippedCombination>,
}

/// Location of the probe config for one relation and mode.
#[must_use]
pub fn config_path(base_data_dir: &Path, relation: &str, mode: &str) -> PathBuf {
    base_data_dir
        .join("configs")
        .join(format!("{relation}_configs"))
        .join(format!("{mode}.toml"))
}

/// Build the cross product of relations, modes and models.
#[must_use]
pub fn plan_jobs(config: &HarnessConfig, probe_binary: &str) -> JobPlan {
    let settings = &config.harness;
    let mut plan = JobPlan::default();

    for relation in &settings.relations {
        for mode in &settings.modes {
            for model in &config.models {
                let path = config_path(&settings.base_data_dir, relation, mode);
                if !path.exists() {
                    tracing::warn!("Config missing: {}", path.display());
                    plan.skipped.push(SkippedCombination {
                        relation: relation.clone(),
                        mode: mode.clone(),
                        model: model.name.clone(),
                        path,
                    });
                    continue;
                }

                let mut args = vec![
                    "run".to_string(),
                    "--config-file".to_string(),
                    path.display().to_string(),
                    "--model".to_string(),
                    model.model.clone(),
                ];
                if settings.test_mode {
                    args.push("--test".into());
                }
                if settings.run_all {
                    args.push("--run-all".into());
                }
                args.extend(model.extra_args.iter().cloned());

                plan.jobs.push(Job::new(
                    format!("{relation}/{mode}/{}", model.name),
                    probe_binary,
                    args,
                ));
            }
        }
    }

    plan
}

/// Asks the operator a yes/no question.
pub trait Confirm {
    fn confirm(&mut self, question: &str) -> bool;
}

/// Reads the answer from stdin; only `y` (any case) accepts.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, question: &str) -> bool {
        eprint!("{question} (y/n): ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        answer.trim().eq_ignore_ascii_case("y")
    }
}

/// Fixed answer, for `--yes` and tests.
pub struct AutoConfirm(pub bool);

impl Confirm for AutoConfirm {
    fn confirm(&mut self, _question: &str) -> bool {
        self.0
    }
}

impl JobPlan {
    /// Jobs to run. Partial coverage needs consent; declining yields no jobs.
    pub fn confirm(self, confirm: &mut dyn Confirm) -> Vec<Job> {
        if self.skipped.is_empty() {
            return self.jobs;
        }

        tracing::warn!(
            "{} combinations were skipped due to missing configuration files:",
            self.skipped.len()
        );
        for s in &self.skipped {
            tracing::warn!(
                "- Relation: {}, Mode: {}, Model: {}",
                s.relation,
                s.mode,
                s.model
            );
        }

        if confirm.confirm("Do you want to continue executing other tasks?") {
            self.jobs
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn config(base: &Path, test_mode: bool) -> HarnessConfig {
        HarnessConfig::parse(&format!(
            r#"
[harness]
base_data_dir = "{}"
relations = ["P19", "P20"]
modes = ["qa"]
test_mode = {test_mode}

[[models]]
name = "a"
model = "org/a"

[[models]]
name = "b"
model = "org/b"
extra_args = ["--run-all"]
"#,
            base.display()
        ))
        .unwrap()
    }

    fn touch(base: &Path, relation: &str, mode: &str) {
        let path = config_path(base, relation, mode);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn test_plan_skips_missing_configs() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "P19", "qa");

        let plan = plan_jobs(&config(dir.path(), true), "probe");
        let labels: Vec<_> = plan.jobs.iter().map(|j| j.label.as_str()).collect();
        assert_eq!(labels, vec!["P19/qa/a", "P19/qa/b"]);
        assert_eq!(plan.skipped.len(), 2);
        assert!(plan.skipped.iter().all(|s| s.relation == "P20"));

        let first = &plan.jobs[0];
        assert_eq!(first.retries, 0);
        assert_eq!(first.args[0], "run");
        assert_eq!(first.args[4], "org/a");
        assert!(first.args.contains(&"--test".to_string()));
        assert!(plan.jobs[1].args.ends_with(&["--run-all".to_string()]));
    }

    #[test]
    fn test_declining_yields_no_jobs() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "P19", "qa");

        let declined = plan_jobs(&config(dir.path(), false), "probe").confirm(&mut AutoConfirm(false));
        assert!(declined.is_empty());

        let accepted = plan_jobs(&config(dir.path(), false), "probe").confirm(&mut AutoConfirm(true));
        assert_eq!(accepted.len(), 2);
    }

    #[test]
    fn test_full_coverage_needs_no_confirmation() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "P19", "qa");
        touch(dir.path(), "P20", "qa");

        let jobs = plan_jobs(&config(dir.path(), false), "probe").confirm(&mut AutoConfirm(false));
        assert_eq!(jobs.len(), 4);
    }

    #[test]
    fn test_job_helpers() {
        let job = Job::new("P19/qa/a", "probe", vec!["run".into(), "--test".into()]);
        assert_eq!(job.command_line(), "probe run --test");
        assert_eq!(job.log_name(), "P19_qa_a");
        let job = job.retried().retried();
        assert_eq!(job.retries, 2);
        assert_eq!(job.attempt(), 3);
    }
}
