#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use swarmdag::config::{load_and_validate, OrchestratorConfig};

/// Builder for one on-disk task (`tasks/<id>/task.toml` + `spec.md`).
#[derive(Debug, Clone)]
pub struct TaskSpecBuilder {
    id: String,
    name: String,
    dependencies: Vec<String>,
    lock_reads: Vec<String>,
    lock_writes: Vec<String>,
    file_reads: Vec<String>,
    file_writes: Vec<String>,
    doctor: String,
    spec_text: String,
}

impl TaskSpecBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("task {id}"),
            dependencies: Vec::new(),
            lock_reads: Vec::new(),
            lock_writes: Vec::new(),
            file_reads: Vec::new(),
            file_writes: Vec::new(),
            doctor: String::new(),
            spec_text: format!("# {id}\n\nDo the thing.\n"),
        }
    }

    pub fn dep(mut self, dep: &str) -> Self {
        self.dependencies.push(dep.to_string());
        self
    }

    pub fn reads(mut self, resource: &str) -> Self {
        self.lock_reads.push(resource.to_string());
        self
    }

    pub fn writes(mut self, resource: &str) -> Self {
        self.lock_writes.push(resource.to_string());
        self
    }

    pub fn file_write(mut self, pattern: &str) -> Self {
        self.file_writes.push(pattern.to_string());
        self
    }

    pub fn doctor(mut self, command: &str) -> Self {
        self.doctor = command.to_string();
        self
    }

    pub fn spec(mut self, text: &str) -> Self {
        self.spec_text = text.to_string();
        self
    }

    /// Write this task under `catalog_root/<id>/`.
    pub fn write_to(&self, catalog_root: &Path) {
        let dir = catalog_root.join(&self.id);
        fs::create_dir_all(&dir).expect("create task dir");

        let quote = |items: &[String]| -> String {
            items
                .iter()
                .map(|s| format!("\"{s}\""))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut toml = format!(
            "id = \"{}\"\nname = \"{}\"\ndependencies = [{}]\n\n[locks]\nreads = [{}]\nwrites = [{}]\n\n[files]\nreads = [{}]\nwrites = [{}]\n",
            self.id,
            self.name,
            quote(&self.dependencies),
            quote(&self.lock_reads),
            quote(&self.lock_writes),
            quote(&self.file_reads),
            quote(&self.file_writes),
        );
        if !self.doctor.is_empty() {
            toml.push_str(&format!("\n[verify]\ndoctor = \"{}\"\n", self.doctor));
        }

        fs::write(dir.join("task.toml"), toml).expect("write task.toml");
        fs::write(dir.join("spec.md"), &self.spec_text).expect("write spec.md");
    }
}

/// Writes a set of tasks into a catalog directory.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    tasks: Vec<TaskSpecBuilder>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task: TaskSpecBuilder) -> Self {
        self.tasks.push(task);
        self
    }

    /// Materialize the catalog under `root`.
    pub fn write(self, root: &Path) {
        fs::create_dir_all(root).expect("create catalog root");
        for task in &self.tasks {
            task.write_to(root);
        }
    }
}

/// Builder for a validated `OrchestratorConfig`, assembled as real TOML so
/// tests exercise the production deserialization and validation path.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    project: String,
    repo_path: PathBuf,
    max_parallel: usize,
    lock_mode: String,
    reuse: bool,
    cleanup_on_success: bool,
    doctor_command: String,
    doctor_timeout_secs: u64,
    scope_mode: String,
    manifest_policy: String,
    budget_lines: Vec<String>,
    validator_lines: Vec<String>,
    resources: Vec<(String, Vec<String>)>,
}

impl ConfigBuilder {
    pub fn new(project: &str, repo_path: &Path) -> Self {
        Self {
            project: project.to_string(),
            repo_path: repo_path.to_path_buf(),
            max_parallel: 4,
            lock_mode: "declared".to_string(),
            reuse: true,
            cleanup_on_success: false,
            doctor_command: "true".to_string(),
            doctor_timeout_secs: 30,
            scope_mode: "observe".to_string(),
            manifest_policy: "warn".to_string(),
            budget_lines: Vec::new(),
            validator_lines: Vec::new(),
            resources: Vec::new(),
        }
    }

    pub fn max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n;
        self
    }

    pub fn lock_mode(mut self, mode: &str) -> Self {
        self.lock_mode = mode.to_string();
        self
    }

    pub fn reuse(mut self, on: bool) -> Self {
        self.reuse = on;
        self
    }

    pub fn cleanup_on_success(mut self, on: bool) -> Self {
        self.cleanup_on_success = on;
        self
    }

    pub fn scope_mode(mut self, mode: &str) -> Self {
        self.scope_mode = mode.to_string();
        self
    }

    pub fn manifest_policy(mut self, policy: &str) -> Self {
        self.manifest_policy = policy.to_string();
        self
    }

    pub fn budget(mut self, key: &str, value: &str) -> Self {
        self.budget_lines.push(format!("{key} = {value}"));
        self
    }

    /// Enable a validator kind ("test", "style", "architecture") with a
    /// command, or set "mode".
    pub fn validator(mut self, key: &str, value: &str) -> Self {
        self.validator_lines.push(format!("{key} = \"{value}\""));
        self
    }

    pub fn resource(mut self, name: &str, patterns: &[&str]) -> Self {
        self.resources.push((
            name.to_string(),
            patterns.iter().map(|p| p.to_string()).collect(),
        ));
        self
    }

    pub fn build(self) -> OrchestratorConfig {
        let mut toml = format!(
            r#"[project]
name = "{project}"
repo_path = "{repo}"
main_branch = "main"

[run]
max_parallel = {max_parallel}
lock_mode = "{lock_mode}"
reuse = {reuse}
cleanup_on_success = {cleanup}

[doctor]
command = "{doctor}"
timeout_secs = {timeout}

[compliance]
scope_mode = "{scope_mode}"
manifest_policy = "{policy}"
"#,
            project = self.project,
            repo = self.repo_path.display(),
            max_parallel = self.max_parallel,
            lock_mode = self.lock_mode,
            reuse = self.reuse,
            cleanup = self.cleanup_on_success,
            doctor = self.doctor_command,
            timeout = self.doctor_timeout_secs,
            scope_mode = self.scope_mode,
            policy = self.manifest_policy,
        );

        if !self.budget_lines.is_empty() {
            toml.push_str("\n[budget]\n");
            for line in &self.budget_lines {
                toml.push_str(line);
                toml.push('\n');
            }
        }

        if !self.validator_lines.is_empty() {
            toml.push_str("\n[validators]\n");
            for line in &self.validator_lines {
                toml.push_str(line);
                toml.push('\n');
            }
        }

        if !self.resources.is_empty() {
            toml.push_str("\n[resources]\n");
            for (name, patterns) in &self.resources {
                let quoted: Vec<String> =
                    patterns.iter().map(|p| format!("\"{p}\"")).collect();
                toml.push_str(&format!("\"{}\" = [{}]\n", name, quoted.join(", ")));
            }
        }

        let dir = tempfile::tempdir().expect("config tempdir");
        let path = dir.path().join("Swarmdag.toml");
        std::fs::write(&path, toml).expect("write config");
        load_and_validate(&path).expect("build valid config from builder")
    }
}
