//! Rule bodies implemented by the engine: reading files and running processes.
//!
//! Both delegate to dedicated nodes so that file reads can be invalidated by
//! path and processes are executed once per distinct invocation.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, warn};

use super::NodeKey;
use crate::core::Context;
use crate::error::{Failure, NodeResult};
use crate::externs::{Externs, Primitive, TypeId, Value};
use crate::rules::Intrinsic;

pub(crate) async fn run(ctx: &Context, intrinsic: Intrinsic, args: Vec<Value>) -> NodeResult<Value> {
    let externs = ctx.externs();
    let Some(arg) = args.into_iter().next() else {
        return Err(Failure::throw(externs, "Intrinsic called without an argument"));
    };
    match intrinsic {
        Intrinsic::ReadFile => {
            let path = arg
                .field("path")
                .and_then(|p| p.as_str())
                .or_else(|| arg.as_str())
                .ok_or_else(|| Failure::throw(externs, format!("Not a path: {}", arg)))?;
            let path = normalize_build_path(Path::new(&path)).ok_or_else(|| {
                Failure::throw(externs, format!("Path escapes the build root: {}", path))
            })?;
            ctx.get(NodeKey::ReadFile(ReadFile { path })).await
        }
        Intrinsic::RunProcess => {
            let spec = ProcessSpec::from_value(&arg).map_err(|e| Failure::throw(externs, e))?;
            ctx.get(NodeKey::ExecuteProcess(Box::new(ExecuteProcess { spec })))
                .await
        }
    }
}

/// Lexically normalize a path relative to the build root, dropping `.` and
/// resolving `..`. `None` for absolute paths and paths that leave the root.
pub fn normalize_build_path(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => normalized.push(part),
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(normalized)
}

/// Reads one file relative to the build root.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReadFile {
    pub path: PathBuf,
}

impl ReadFile {
    pub(crate) async fn run(self, ctx: Context) -> NodeResult<Value> {
        let core = ctx.core();
        let externs = ctx.externs();
        let relative = normalize_build_path(&self.path).ok_or_else(|| {
            Failure::throw(
                externs,
                format!("Path escapes the build root: {}", self.path.display()),
            )
        })?;
        let full_path = core.config.build_root.join(relative);
        debug!(path = %full_path.display(), "Reading file");

        let content = tokio::fs::read(&full_path).await.map_err(|e| {
            Failure::throw(
                externs,
                format!("Failed to read {}: {}", self.path.display(), e),
            )
        })?;
        let digest = core
            .store
            .store_bytes(content.clone())
            .await
            .map_err(|e| Failure::throw(externs, e.to_string()))?;

        let str_type = TypeId::str();
        Ok(externs.store_dict(
            &core.rule_graph.types().file_content,
            [
                (
                    "path".to_string(),
                    externs.store_str(&str_type, self.path.to_string_lossy()),
                ),
                (
                    "content".to_string(),
                    externs.store_bytes(&TypeId::bytes(), content),
                ),
                (
                    "digest".to_string(),
                    externs.store_str(&str_type, digest.to_string()),
                ),
            ],
        ))
    }
}

/// A fully specified process invocation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProcessSpec {
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Relative to the build root.
    pub working_directory: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub description: String,
}

impl ProcessSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        ProcessSpec {
            description: argv.join(" "),
            argv,
            env: BTreeMap::new(),
            working_directory: None,
            timeout: None,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Read a `Process` value: `argv` (tuple of str) plus optional `env`,
    /// `working_directory`, `timeout_ms` and `description`.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let argv: Vec<String> = value
            .field("argv")
            .and_then(|v| v.as_tuple())
            .ok_or_else(|| format!("Process has no argv: {}", value))?
            .iter()
            .map(|arg| arg.as_str().ok_or_else(|| format!("argv entry is not a str: {}", arg)))
            .collect::<Result<_, _>>()?;
        if argv.is_empty() {
            return Err("Process argv is empty".to_string());
        }

        let mut spec = ProcessSpec::new(argv);
        if let Some(Primitive::Dict(env)) = value.field("env").and_then(|v| v.load()) {
            for (key, val) in env {
                let val = val
                    .as_str()
                    .ok_or_else(|| format!("env value for {} is not a str", key))?;
                spec.env.insert(key, val);
            }
        }
        spec.working_directory = value
            .field("working_directory")
            .and_then(|v| v.as_str())
            .map(PathBuf::from);
        spec.timeout = value
            .field("timeout_ms")
            .and_then(|v| v.as_i64())
            .map(|ms| Duration::from_millis(ms.max(0) as u64));
        if let Some(description) = value.field("description").and_then(|v| v.as_str()) {
            spec.description = description;
        }
        Ok(spec)
    }

    /// Store the spec as a value of `type_id`, readable by [`ProcessSpec::from_value`].
    pub fn to_value(&self, externs: &Externs, type_id: &TypeId) -> Value {
        let str_type = TypeId::str();
        let argv = self
            .argv
            .iter()
            .map(|arg| externs.store_str(&str_type, arg.as_str()))
            .collect();
        let env: BTreeMap<String, Value> = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), externs.store_str(&str_type, v.as_str())))
            .collect();

        let mut fields = vec![
            ("argv".to_string(), externs.store_tuple(argv)),
            ("env".to_string(), externs.store(&TypeId::new("dict"), Primitive::Dict(env))),
            (
                "description".to_string(),
                externs.store_str(&str_type, self.description.as_str()),
            ),
        ];
        if let Some(dir) = &self.working_directory {
            fields.push((
                "working_directory".to_string(),
                externs.store_str(&str_type, dir.to_string_lossy()),
            ));
        }
        if let Some(timeout) = self.timeout {
            fields.push((
                "timeout_ms".to_string(),
                externs.store_int(&TypeId::int(), timeout.as_millis() as i64),
            ));
        }
        externs.store_dict(type_id, fields)
    }
}

/// Runs one process to completion.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExecuteProcess {
    pub spec: ProcessSpec,
}

impl ExecuteProcess {
    pub(crate) async fn run(self, ctx: Context) -> NodeResult<Value> {
        let core = ctx.core();
        let externs = ctx.externs();
        let spec = &self.spec;

        let _permit = core
            .process_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Failure::Cancelled)?;

        let mut command = tokio::process::Command::new(&spec.argv[0]);
        command
            .args(&spec.argv[1..])
            .envs(&spec.env)
            .current_dir(match &spec.working_directory {
                Some(dir) => core.config.build_root.join(dir),
                None => core.config.build_root.clone(),
            })
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(process = %spec.description, "Spawning process");
        let child = command.spawn().map_err(|e| {
            Failure::throw(
                externs,
                format!("Failed to spawn {}: {}", spec.description, e),
            )
        })?;

        let timeout = spec
            .timeout
            .unwrap_or_else(|| core.config.default_process_timeout());
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| {
                Failure::throw(
                    externs,
                    format!("Failed to run {}: {}", spec.description, e),
                )
            })?,
            Err(_) => {
                warn!(process = %spec.description, ?timeout, "Process timed out");
                return Err(Failure::Timeout {
                    description: format!("{} exceeded {:?}", spec.description, timeout),
                });
            }
        };

        let stdout_digest = core
            .store
            .store_bytes(output.stdout.clone())
            .await
            .map_err(|e| Failure::throw(externs, e.to_string()))?;

        Ok(externs.store_dict(
            &core.rule_graph.types().process_result,
            [
                (
                    "exit_code".to_string(),
                    externs.store_int(&TypeId::int(), output.status.code().unwrap_or(-1) as i64),
                ),
                (
                    "stdout".to_string(),
                    externs.store_bytes(&TypeId::bytes(), output.stdout),
                ),
                (
                    "stderr".to_string(),
                    externs.store_bytes(&TypeId::bytes(), output.stderr),
                ),
                (
                    "stdout_digest".to_string(),
                    externs.store_str(&TypeId::str(), stdout_digest.to_string()),
                ),
            ],
        ))
    }
}
