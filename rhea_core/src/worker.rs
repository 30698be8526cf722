//! # Tool Worker
//!
//! A long-lived executor bound to exactly one tool. Each `run` stages input
//! files out of the object store into a fresh scratch directory, renders the
//! command template against the parameter environment, executes the script
//! inside the tool's package environment, then discovers, packages, and
//! registers output artifacts back into the store.
//!
//! Workers are sequential: parallelism lives *across* workers, never inside
//! one. The state machine is Provisioning → Ready → Busy → Ready → … →
//! Draining → Dead, and a Busy worker refuses new invocations.

use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, Instant},
};
use tempfile::TempDir;

use crate::descriptor::{CollectionOutput, ToolDescriptor};
use crate::environment::ToolEnvironment;
use crate::error::{Result, RheaError};
use crate::params::ToolParam;
use crate::template::{CommandTemplater, TemplateEnv, TemplateValue};
use rhea_common::{ArtifactProxy, BlobStore, FileEnvelope};
use std::sync::Arc;

/// Well-known template variable pointing at the mirrored tool resources.
const TOOL_DIRECTORY_VAR: &str = "__tool_directory__";
/// Exported so collection-producing tools can target the scratch output
/// directory their artifacts are discovered in.
const OUTPUTS_DIRECTORY_VAR: &str = "__outputs_directory__";

/// Resource reservation overrides for one invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub slots: Option<i64>,
    pub memory_mb: Option<i64>,
}

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Provisioning,
    Ready,
    Busy,
    Draining,
    Dead,
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Draining | WorkerState::Dead)
    }
}

/// Structured result of one invocation. A non-zero exit code is a valid
/// result; stdout and stderr are always carried back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResult {
    #[serde(rename = "return_code")]
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub files: Vec<ArtifactProxy>,
    /// The collection specifications used for discovery, when the tool
    /// declares collection outputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collections: Vec<CollectionOutput>,
}

/// One worker, serving one tool.
#[derive(Debug)]
pub struct ToolWorker {
    tool: Arc<ToolDescriptor>,
    environment: ToolEnvironment,
    store: BlobStore,
    state: Mutex<WorkerState>,
    /// Serializes invocations dispatched through the scheduler path.
    run_lock: tokio::sync::Mutex<()>,
    created_at: Instant,
    last_used: Mutex<Instant>,
    command_timeout: Duration,
}

impl ToolWorker {
    pub fn new(
        tool: Arc<ToolDescriptor>,
        environment: ToolEnvironment,
        store: BlobStore,
        command_timeout: Duration,
    ) -> Self {
        Self {
            tool,
            environment,
            store,
            state: Mutex::new(WorkerState::Ready),
            run_lock: tokio::sync::Mutex::new(()),
            created_at: Instant::now(),
            last_used: Mutex::new(Instant::now()),
            command_timeout,
        }
    }

    pub fn tool(&self) -> &Arc<ToolDescriptor> {
        &self.tool
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn installed_packages(&self) -> &[String] {
        self.environment.installed_packages()
    }

    /// Idle time since the last invocation finished.
    pub fn idle_for(&self) -> Duration {
        self.last_used.lock().unwrap().elapsed()
    }

    /// Execute the tool. Refuses when Busy, Draining, or Dead.
    pub async fn run(&self, params: Vec<ToolParam>, options: RunOptions) -> Result<InvocationResult> {
        self.begin()?;
        let result = self.execute(params, options).await;
        self.finish(&result);
        result
    }

    /// Queueing entry point used by the session controller: invocations
    /// serialize in dispatch order instead of observing Busy.
    pub async fn run_serialized(
        &self,
        params: Vec<ToolParam>,
        options: RunOptions,
    ) -> Result<InvocationResult> {
        let _dispatch = self.run_lock.lock().await;
        self.run(params, options).await
    }

    /// Drain the worker and tear its environment down.
    pub async fn drain(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == WorkerState::Dead {
                return;
            }
            *state = WorkerState::Draining;
        }
        self.environment.destroy().await;
        *self.state.lock().unwrap() = WorkerState::Dead;
    }

    fn begin(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match *state {
            WorkerState::Ready => {
                *state = WorkerState::Busy;
                Ok(())
            }
            WorkerState::Busy => Err(RheaError::WorkerBusy(self.tool.id.clone())),
            other => Err(RheaError::WorkerCrashed(format!(
                "worker for '{}' is {:?}, not accepting invocations",
                self.tool.id, other
            ))),
        }
    }

    fn finish(&self, result: &Result<InvocationResult>) {
        *self.last_used.lock().unwrap() = Instant::now();
        let mut state = self.state.lock().unwrap();
        *state = match result {
            Ok(_) => WorkerState::Ready,
            Err(RheaError::Timeout(_)) => WorkerState::Draining,
            Err(RheaError::WorkerCrashed(_)) => WorkerState::Dead,
            // Parameter, template, and store failures leave the worker fine.
            Err(_) => WorkerState::Ready,
        };
    }

    async fn execute(&self, params: Vec<ToolParam>, options: RunOptions) -> Result<InvocationResult> {
        let input_dir = scratch_dir("rhea-in")?;
        let output_dir = scratch_dir("rhea-out")?;
        let tool_dir = self.mirror_tool_directory().await?;

        let mut env = TemplateEnv::new();
        env.set_scalar(TOOL_DIRECTORY_VAR, tool_dir.path().to_string_lossy());
        env.set_scalar(OUTPUTS_DIRECTORY_VAR, output_dir.path().to_string_lossy());

        self.stage_params(&params, input_dir.path(), &mut env).await?;
        self.apply_declared_defaults(&mut env);
        self.bind_output_env(output_dir.path(), &mut env);

        let templater = build_templater(options);
        self.write_configfiles(&templater, input_dir.path(), &mut env).await?;

        let script_path = input_dir.path().join("tool_script.sh");
        let script = templater.render_script(&self.command_with_interpreter(), &env)?;
        write_executable(&script_path, &script).await?;

        tracing::debug!(tool_id = %self.tool.id, script = %script.trim_end(), "rendered command");

        let outcome = self
            .environment
            .run_script(
                &script_path,
                &env.to_process_env(),
                tool_dir.path(),
                self.command_timeout,
            )
            .await?;

        if !outcome.success() {
            tracing::info!(
                tool_id = %self.tool.id,
                exit_code = outcome.exit_code,
                "tool exited non-zero"
            );
        }

        let mut result = InvocationResult {
            exit_code: outcome.exit_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            files: Vec::new(),
            collections: Vec::new(),
        };

        if !self.tool.outputs.data.is_empty() {
            self.collect_data_outputs(&env, &mut result).await?;
        } else if !self.tool.outputs.collection.is_empty() {
            // Collection outputs apply only when no data outputs are
            // declared; the data list wins otherwise.
            result.collections = self.tool.outputs.collection.clone();
            self.discover_collections(output_dir.path(), &mut result).await?;
        }

        // Scratch directories are removed on drop, on every exit path.
        Ok(result)
    }

    /// Run the descriptor's version command inside the environment, when
    /// one is declared.
    pub async fn run_version_command(&self) -> Result<Option<String>> {
        let Some(version_command) = self
            .tool
            .version_command
            .as_deref()
            .filter(|c| !c.is_empty())
        else {
            return Ok(None);
        };

        let dir = scratch_dir("rhea-ver")?;
        let script_path = dir.path().join("version.sh");
        write_executable(
            &script_path,
            &format!("#!/usr/bin/env bash\n{version_command}\n"),
        )
        .await?;

        let outcome = self
            .environment
            .run_script(&script_path, &[], dir.path(), self.command_timeout)
            .await?;
        if !outcome.success() {
            return Err(RheaError::WorkerCrashed(format!(
                "version command exited {}: {}",
                outcome.exit_code, outcome.stderr
            )));
        }
        Ok(Some(outcome.stdout))
    }

    fn command_with_interpreter(&self) -> String {
        match self.tool.interpreter.as_deref() {
            Some(interpreter) if !interpreter.is_empty() => {
                format!("{interpreter} {}", self.tool.command)
            }
            _ => self.tool.command.clone(),
        }
    }

    /// Mirror the tool's object-store resource prefix into a scratch
    /// directory the command runs from.
    async fn mirror_tool_directory(&self) -> Result<TempDir> {
        let dir = scratch_dir("rhea-tool")?;
        let prefix = format!("{}/", self.tool.id);
        let entries = self
            .store
            .iter_prefix(&prefix)
            .await
            .map_err(|e| RheaError::ResourcesUnavailable(format!("tool resources: {e}")))?;

        for (relative, bytes) in entries {
            let local = dir.path().join(&relative);
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| RheaError::WorkerCrashed(format!("mkdir {parent:?}: {e}")))?;
            }
            tokio::fs::write(&local, &bytes)
                .await
                .map_err(|e| RheaError::WorkerCrashed(format!("write {local:?}: {e}")))?;
        }
        Ok(dir)
    }

    /// Stage file parameters out of the store and render the rest into the
    /// template environment.
    async fn stage_params(
        &self,
        params: &[ToolParam],
        input_dir: &Path,
        env: &mut TemplateEnv,
    ) -> Result<()> {
        for param in params {
            match param {
                ToolParam::File { name, handle, .. } => {
                    let bytes =
                        self.store
                            .get(handle)
                            .await
                            .map_err(|e| match RheaError::from(e) {
                                RheaError::NotFound(key) => RheaError::NotFound(format!(
                                    "input handle '{key}' not in store"
                                )),
                                other => other,
                            })?;
                    // Uploaded files arrive as envelopes; bare handles are
                    // raw bytes. Tools always see the file contents.
                    let staged = match FileEnvelope::try_parse(&bytes) {
                        Some(envelope) => envelope.contents,
                        None => bytes,
                    };
                    let local = input_dir.join(handle.as_str());
                    tokio::fs::write(&local, &staged)
                        .await
                        .map_err(|e| RheaError::WorkerCrashed(format!("stage {name}: {e}")))?;
                    env.append_scalar(name, local.to_string_lossy());
                }
                ToolParam::MultiSelect { name, values } => {
                    env.set(name, TemplateValue::List(values.clone()));
                }
                other => {
                    if let Some(rendered) = other.render() {
                        env.set_scalar(other.name(), rendered);
                    }
                }
            }
        }
        Ok(())
    }

    /// Declared defaults of optional parameters the caller left out. A
    /// select without an explicit default falls back to the option flagged
    /// as selected.
    fn apply_declared_defaults(&self, env: &mut TemplateEnv) {
        for decl in &self.tool.inputs.params {
            let Some(name) = decl.effective_name() else {
                continue;
            };
            if !decl.optional || env.contains(&name) {
                continue;
            }
            if let Some(default) = &decl.value {
                env.set_scalar(&name, default.clone());
            } else if let Some(option) = decl.options.iter().find(|o| o.selected) {
                env.set_scalar(&name, option.value.clone());
            }
        }
    }

    /// Each declared data output maps to `output_dir/from_work_dir` when
    /// present, else `output_dir/name`. Paths are absolute under scratch.
    fn bind_output_env(&self, output_dir: &Path, env: &mut TemplateEnv) {
        for output in &self.tool.outputs.data {
            let path = match output.from_work_dir.as_deref() {
                Some(rel) if !rel.is_empty() => output_dir.join(rel),
                _ => output_dir.join(&output.name),
            };
            env.set_scalar(&output.name, path.to_string_lossy());
        }
    }

    async fn write_configfiles(
        &self,
        templater: &CommandTemplater,
        scratch: &Path,
        env: &mut TemplateEnv,
    ) -> Result<()> {
        for configfile in &self.tool.configfiles {
            let rendered = templater.render_text(&configfile.text, env)?;
            let path = scratch.join(format!("configfile_{}", configfile.name));
            write_executable(&path, &rendered).await?;
            env.set_scalar(&configfile.name, path.to_string_lossy());
        }
        Ok(())
    }

    async fn collect_data_outputs(
        &self,
        env: &TemplateEnv,
        result: &mut InvocationResult,
    ) -> Result<()> {
        for output in &self.tool.outputs.data {
            if output.from_work_dir.is_none() {
                continue;
            }
            let Some(path) = env.lookup(&output.name).map(|v| v.literal()) else {
                continue;
            };

            match self.package_file(Path::new(&path), Some(&output.name)).await {
                Ok(mut proxy) => {
                    if let Some(format) = &output.format {
                        proxy.format = format.clone();
                    }
                    result.files.push(proxy);
                }
                Err(e) if !output.filters.is_empty() => {
                    // Filtered outputs are conditional by design; a missing
                    // file just means the filter did not fire.
                    tracing::debug!(output = %output.name, error = %e, "filtered output skipped");
                }
                Err(e) => {
                    return Err(RheaError::NotFound(format!(
                        "declared output '{}' could not be packaged: {e}",
                        output.name
                    )));
                }
            }
        }
        Ok(())
    }

    async fn discover_collections(
        &self,
        output_dir: &Path,
        result: &mut InvocationResult,
    ) -> Result<()> {
        for collection in &self.tool.outputs.collection {
            let Some(spec) = &collection.discover_datasets else {
                continue;
            };
            let pattern = spec.pattern.replace("\\\\", "\\");
            let regex = regex::Regex::new(&pattern).map_err(|e| {
                RheaError::Template(format!("bad discovery pattern '{}': {e}", spec.pattern))
            })?;

            let search_root = match &spec.directory {
                Some(dir) => output_dir.join(dir),
                None => output_dir.to_path_buf(),
            };
            if !search_root.exists() {
                continue;
            }

            for path in list_files(&search_root, spec.recurse) {
                let basename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let Some(captures) = regex.captures(&basename) else {
                    continue;
                };
                if captures.get(0).map(|m| m.start()) != Some(0) {
                    continue;
                }
                let logical = captures.get(1).map(|m| m.as_str().to_string());
                let proxy = self.package_file(&path, logical.as_deref()).await?;
                result.files.push(proxy);
            }
        }
        Ok(())
    }

    async fn package_file(&self, path: &Path, name: Option<&str>) -> Result<ArtifactProxy> {
        let mut envelope = FileEnvelope::from_local(path).await?;
        if let Some(name) = name {
            envelope = envelope.with_name(name);
        }
        Ok(envelope.to_store(&self.store).await?)
    }
}

fn build_templater(options: RunOptions) -> CommandTemplater {
    let mut templater = CommandTemplater::new();
    if let Some(slots) = options.slots {
        templater = templater.with_override("GALAXY_SLOTS", slots);
    }
    if let Some(memory) = options.memory_mb {
        templater = templater
            .with_override("GALAXY_MEMORY_MB", memory)
            .with_override("GALAXY_MEMORY_MB_PER_SLOT", memory);
    }
    templater
}

fn scratch_dir(prefix: &str) -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .map_err(|e| RheaError::WorkerCrashed(format!("scratch directory: {e}")))
}

async fn write_executable(path: &Path, contents: &str) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| RheaError::WorkerCrashed(format!("write {path:?}: {e}")))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| RheaError::WorkerCrashed(format!("chmod {path:?}: {e}")))?;
    }
    Ok(())
}

fn list_files(root: &Path, recurse: bool) -> Vec<PathBuf> {
    let walker = if recurse {
        walkdir::WalkDir::new(root)
    } else {
        walkdir::WalkDir::new(root).max_depth(1)
    };
    walker
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{
        CollectionOutput, ConfigFile, DataOutput, DiscoverDatasets, Inputs, Outputs, ParamDecl,
        ParamKind, ToolDescriptor,
    };
    use bytes::Bytes;
    use rhea_common::Handle;

    fn data_param(name: &str) -> ParamDecl {
        ParamDecl {
            name: Some(name.to_string()),
            argument: None,
            kind: ParamKind::Data,
            format: None,
            label: None,
            help: None,
            optional: false,
            multiple: false,
            value: None,
            truevalue: None,
            falsevalue: None,
            checked: None,
            min: None,
            max: None,
            options: Vec::new(),
        }
    }

    fn tool(command: &str) -> ToolDescriptor {
        ToolDescriptor {
            id: "csv_tool".to_string(),
            name: "CSV Tool".to_string(),
            version: Some("1.0".to_string()),
            description: "test tool".to_string(),
            long_description: None,
            documentation: None,
            requirements: Vec::new(),
            interpreter: None,
            command: command.to_string(),
            version_command: None,
            inputs: Inputs {
                params: vec![data_param("input1")],
                conditionals: Vec::new(),
            },
            outputs: Outputs {
                data: vec![DataOutput {
                    name: "output1".to_string(),
                    format: Some("tabular".to_string()),
                    from_work_dir: Some("out.tsv".to_string()),
                    filters: Vec::new(),
                }],
                collection: Vec::new(),
            },
            configfiles: Vec::new(),
            tests: Vec::new(),
        }
    }

    fn worker_for(tool: ToolDescriptor, store: &BlobStore) -> ToolWorker {
        ToolWorker::new(
            Arc::new(tool),
            ToolEnvironment::plain("test"),
            store.clone(),
            Duration::from_secs(30),
        )
    }

    async fn seed_input(store: &BlobStore, bytes: &'static [u8]) -> Handle {
        store.put(Bytes::from_static(bytes)).await.unwrap()
    }

    fn file_param(name: &str, handle: &Handle) -> ToolParam {
        ToolParam::File {
            name: name.to_string(),
            handle: handle.clone(),
            filename: None,
            format: None,
        }
    }

    #[tokio::test]
    async fn happy_path_stages_input_and_packages_output() {
        let store = BlobStore::in_memory();
        let input = seed_input(&store, b"col1,col2\n1,2\n3,4\n").await;

        // tr turns the CSV into a TSV; the worker packages out.tsv.
        let worker = worker_for(tool("tr ',' '\\t' < $input1 > $output1"), &store);
        let result = worker
            .run(vec![file_param("input1", &input)], RunOptions::default())
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.files.len(), 1);
        let proxy = &result.files[0];
        assert_eq!(proxy.name, "output1");
        assert_eq!(proxy.format, "tabular");

        // Every returned proxy refers to bytes resident in the store, with
        // an accurate size.
        let envelope = FileEnvelope::from_handle(&proxy.handle, &store).await.unwrap();
        assert_eq!(envelope.contents, Bytes::from_static(b"col1\tcol2\n1\t2\n3\t4\n"));
        assert_eq!(proxy.size as usize, envelope.contents.len());

        assert_eq!(worker.state(), WorkerState::Ready);
    }

    #[tokio::test]
    async fn staged_input_bytes_match_store_exactly() {
        let store = BlobStore::in_memory();
        let input = seed_input(&store, b"exact bytes\x00\x01").await;

        let worker = worker_for(tool("cp $input1 $output1"), &store);
        let result = worker
            .run(vec![file_param("input1", &input)], RunOptions::default())
            .await
            .unwrap();

        let envelope = FileEnvelope::from_handle(&result.files[0].handle, &store)
            .await
            .unwrap();
        assert_eq!(envelope.contents, Bytes::from_static(b"exact bytes\x00\x01"));
    }

    #[tokio::test]
    async fn missing_input_handle_fails_before_execution() {
        let store = BlobStore::in_memory();
        let worker = worker_for(tool("cat $input1"), &store);

        let err = worker
            .run(
                vec![file_param("input1", &Handle::new("no-such-handle"))],
                RunOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RheaError::NotFound(_)));
        // A staging failure does not kill the worker.
        assert_eq!(worker.state(), WorkerState::Ready);
    }

    #[tokio::test]
    async fn nonzero_exit_still_returns_stdout_and_stderr() {
        let store = BlobStore::in_memory();
        let mut t = tool("echo out; echo err >&2; exit 2");
        t.inputs.params.clear();
        t.outputs.data.clear();

        let worker = worker_for(t, &store);
        let result = worker.run(Vec::new(), RunOptions::default()).await.unwrap();

        assert_eq!(result.exit_code, 2);
        assert!(result.stdout.contains("out"));
        assert!(result.stderr.contains("err"));
        assert_eq!(worker.state(), WorkerState::Ready);
    }

    #[tokio::test]
    async fn missing_declared_output_is_fatal_without_filters() {
        let store = BlobStore::in_memory();
        let mut t = tool("true");
        t.inputs.params.clear();

        let worker = worker_for(t, &store);
        let err = worker.run(Vec::new(), RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, RheaError::NotFound(_)));
        assert_eq!(worker.state(), WorkerState::Ready);
    }

    #[tokio::test]
    async fn filtered_output_is_best_effort() {
        let store = BlobStore::in_memory();
        let mut t = tool("true");
        t.inputs.params.clear();
        t.outputs.data[0].filters = vec![crate::descriptor::OutputFilter {
            expression: "condition".to_string(),
        }];

        let worker = worker_for(t, &store);
        let result = worker.run(Vec::new(), RunOptions::default()).await.unwrap();
        assert!(result.files.is_empty());
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn collection_outputs_discovered_by_pattern() {
        let store = BlobStore::in_memory();
        let mut t = tool(
            "mkdir -p $__outputs_directory__/splits && \
             echo a > $__outputs_directory__/splits/sample_alpha.txt && \
             echo b > $__outputs_directory__/splits/sample_beta.txt && \
             echo x > $__outputs_directory__/splits/ignore.log",
        );
        t.inputs.params.clear();
        t.outputs.data.clear();
        t.outputs.collection = vec![CollectionOutput {
            name: "splits".to_string(),
            kind: "list".to_string(),
            discover_datasets: Some(DiscoverDatasets {
                pattern: "sample_(.+)\\.txt".to_string(),
                directory: Some("splits".to_string()),
                recurse: false,
                ext: None,
            }),
        }];

        let worker = worker_for(t, &store);
        let result = worker.run(Vec::new(), RunOptions::default()).await.unwrap();

        assert_eq!(result.collections.len(), 1);
        let mut names: Vec<&str> = result.files.iter().map(|f| f.name.as_str()).collect();
        names.sort_unstable();
        // Logical names come from capture group 1 of the pattern.
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn configfile_is_rendered_and_exported() {
        let store = BlobStore::in_memory();
        let mut t = tool("cat $settings > $output1");
        t.inputs.params = vec![ParamDecl {
            name: Some("threshold".to_string()),
            argument: None,
            kind: ParamKind::Text,
            format: None,
            label: None,
            help: None,
            optional: false,
            multiple: false,
            value: None,
            truevalue: None,
            falsevalue: None,
            checked: None,
            min: None,
            max: None,
            options: Vec::new(),
        }];
        t.configfiles = vec![ConfigFile {
            name: "settings".to_string(),
            text: "#if $threshold == \"10\":\nthreshold=high\n#else\nthreshold=low\n#end if"
                .to_string(),
        }];

        let worker = worker_for(t, &store);
        let result = worker
            .run(
                vec![ToolParam::Text {
                    name: "threshold".to_string(),
                    value: "10".to_string(),
                }],
                RunOptions::default(),
            )
            .await
            .unwrap();

        let envelope = FileEnvelope::from_handle(&result.files[0].handle, &store)
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&envelope.contents).trim(),
            "threshold=high"
        );
    }

    #[tokio::test]
    async fn optional_defaults_fill_the_environment() {
        let store = BlobStore::in_memory();
        let mut t = tool("echo sep=$sep > $output1");
        t.inputs.params = vec![ParamDecl {
            name: Some("sep".to_string()),
            argument: None,
            kind: ParamKind::Text,
            format: None,
            label: None,
            help: None,
            optional: true,
            multiple: false,
            value: Some(";".to_string()),
            truevalue: None,
            falsevalue: None,
            checked: None,
            min: None,
            max: None,
            options: Vec::new(),
        }];

        let worker = worker_for(t, &store);
        let result = worker.run(Vec::new(), RunOptions::default()).await.unwrap();
        let envelope = FileEnvelope::from_handle(&result.files[0].handle, &store)
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&envelope.contents).trim(), "sep=;");
    }

    #[tokio::test]
    async fn busy_worker_refuses_and_timeout_drains() {
        let store = BlobStore::in_memory();
        let mut t = tool("sleep 5");
        t.inputs.params.clear();
        t.outputs.data.clear();

        let worker = Arc::new(ToolWorker::new(
            Arc::new(t),
            ToolEnvironment::plain("test"),
            store.clone(),
            Duration::from_millis(200),
        ));

        // Direct state-machine check: a begun worker is Busy and refuses.
        worker.begin().unwrap();
        assert_eq!(worker.state(), WorkerState::Busy);
        let err = worker.begin().unwrap_err();
        assert!(matches!(err, RheaError::WorkerBusy(_)));
        worker.finish(&Ok(InvocationResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            files: Vec::new(),
            collections: Vec::new(),
        }));
        assert_eq!(worker.state(), WorkerState::Ready);

        // A wall-clock overrun moves the worker to Draining.
        let err = worker.run(Vec::new(), RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, RheaError::Timeout(_)));
        assert_eq!(worker.state(), WorkerState::Draining);
    }

    #[tokio::test]
    async fn version_command_reports_stdout() {
        let store = BlobStore::in_memory();
        let mut t = tool("true");
        t.inputs.params.clear();
        t.outputs.data.clear();
        t.version_command = Some("echo v1.2.3".to_string());

        let worker = worker_for(t, &store);
        let version = worker.run_version_command().await.unwrap();
        assert_eq!(version.as_deref().map(str::trim), Some("v1.2.3"));

        let mut t = tool("true");
        t.version_command = None;
        let worker = worker_for(t, &store);
        assert!(worker.run_version_command().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resource_placeholder_honors_run_options() {
        let store = BlobStore::in_memory();
        let mut t = tool(r#"echo threads="\${GALAXY_SLOTS:-4}" > $output1"#);
        t.inputs.params.clear();

        let worker = worker_for(t.clone(), &store);
        let result = worker.run(Vec::new(), RunOptions::default()).await.unwrap();
        let envelope = FileEnvelope::from_handle(&result.files[0].handle, &store)
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&envelope.contents).trim(),
            "threads=4"
        );

        let worker = worker_for(t, &store);
        let result = worker
            .run(
                Vec::new(),
                RunOptions {
                    slots: Some(8),
                    memory_mb: None,
                },
            )
            .await
            .unwrap();
        let envelope = FileEnvelope::from_handle(&result.files[0].handle, &store)
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&envelope.contents).trim(),
            "threads=8"
        );
    }
}
