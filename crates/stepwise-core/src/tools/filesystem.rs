//! `filesystem` -- read, write, append, and list files.
//!
//! When `action` is absent it is inferred: `path` with `content` (or `data`)
//! writes, `path` alone reads. Non-string content is written as JSON.

use std::path::{Component, Path, PathBuf};

use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};
use stepwise_types::tool::ToolDescriptor;

use super::{Tool, ToolContext, ToolError, opt_str, req_str};
use crate::service::fs::FileSystem;
use crate::template::value_to_string;

pub const FILESYSTEM_TOOL: &str = "filesystem";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FsAction {
    Read,
    Write,
    Append,
    List,
}

impl FsAction {
    fn resolve(inputs: &Map<String, Value>) -> Result<Self, ToolError> {
        match opt_str(inputs, "action").as_deref().map(str::trim) {
            Some("read") => Ok(FsAction::Read),
            Some("write") => Ok(FsAction::Write),
            Some("append") => Ok(FsAction::Append),
            Some("list") => Ok(FsAction::List),
            Some("") | None => {
                if content_of(inputs).is_some() {
                    Ok(FsAction::Write)
                } else {
                    Ok(FsAction::Read)
                }
            }
            Some(other) => Err(ToolError::InvalidInput(format!(
                "unknown filesystem action '{other}' (expected read, write, append, list)"
            ))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            FsAction::Read => "read",
            FsAction::Write => "write",
            FsAction::Append => "append",
            FsAction::List => "list",
        }
    }
}

fn content_of(inputs: &Map<String, Value>) -> Option<&Value> {
    inputs
        .get("content")
        .or_else(|| inputs.get("data"))
        .filter(|v| !v.is_null())
}

/// File operations over any [`FileSystem`].
pub struct FilesystemTool<F: FileSystem> {
    fs: F,
    /// Directory every path must stay inside. `None` allows any path.
    root: Option<PathBuf>,
}

impl<F: FileSystem> FilesystemTool<F> {
    pub fn new(fs: F) -> Self {
        Self { fs, root: None }
    }

    /// Confine the tool to `root`. Relative paths resolve against it;
    /// absolute paths outside it and `..` components are rejected.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    fn resolve_path(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let path = Path::new(raw);
        let Some(root) = &self.root else {
            return Ok(path.to_path_buf());
        };

        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(ToolError::InvalidInput(format!(
                "path '{raw}' must not contain '..'"
            )));
        }
        if path.is_relative() {
            return Ok(root.join(path));
        }
        if path.starts_with(root) {
            return Ok(path.to_path_buf());
        }
        Err(ToolError::InvalidInput(format!(
            "path '{raw}' is outside {}",
            root.display()
        )))
    }

    async fn run(&self, inputs: Map<String, Value>) -> Result<Value, ToolError> {
        let action = FsAction::resolve(&inputs)?;
        let raw_path = req_str(&inputs, "path")?;
        let path = self.resolve_path(&raw_path)?;
        let io_err = |e: std::io::Error| {
            ToolError::Execution(format!("{} {}: {e}", action.as_str(), path.display()))
        };

        match action {
            FsAction::Read => {
                let content = self.fs.read_file(&path).await.map_err(io_err)?;
                Ok(Value::String(content))
            }
            FsAction::Write | FsAction::Append => {
                let content = content_of(&inputs).map(value_to_string).ok_or_else(|| {
                    ToolError::InvalidInput(format!("'{}' requires 'content'", action.as_str()))
                })?;
                let full = if action == FsAction::Append {
                    match self.fs.read_file(&path).await {
                        Ok(existing) => existing + &content,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => content,
                        Err(e) => return Err(io_err(e)),
                    }
                } else {
                    content
                };
                self.fs.write_file(&path, &full).await.map_err(io_err)?;
                Ok(json!({
                    "action": action.as_str(),
                    "path": path.display().to_string(),
                    "bytes": full.len(),
                    "success": true,
                }))
            }
            FsAction::List => {
                let entries = self.fs.list_dir(&path).await.map_err(io_err)?;
                Ok(Value::Array(
                    entries
                        .into_iter()
                        .map(|e| {
                            json!({
                                "name": e.name,
                                "path": e.path.display().to_string(),
                                "is_dir": e.is_dir,
                                "size": e.size,
                            })
                        })
                        .collect(),
                ))
            }
        }
    }
}

impl<F: FileSystem> Tool for FilesystemTool<F> {
    fn name(&self) -> &str {
        FILESYSTEM_TOOL
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            FILESYSTEM_TOOL,
            "Read, write, append to, or list files. The action is inferred from the inputs when omitted.",
            json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["read", "write", "append", "list"] },
                    "path": { "type": "string" },
                    "content": { "description": "Text to write; non-strings are written as JSON" }
                },
                "required": ["path"]
            }),
        )
    }

    fn call<'a>(
        &'a self,
        ctx: &'a ToolContext,
        inputs: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, ToolError>> {
        Box::pin(async move { ctx.run_cancellable(self.run(inputs)).await })
    }
}
