//! Local filesystem application.
//!
//! Reads return the file content base64-encoded so binary files survive the
//! JSON round trip.  Writes accept either UTF-8 text or base64 data and
//! default to a fresh file under the system temp directory, which is how
//! media-producing applications hand artefacts to the caller.
//!
//! By default any path is accepted.  [`FileSystemApp::with_root`] confines
//! every path to one directory tree.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tracing::{debug, info};

use appcatalog_core::options::{optional_str, require_str};
use appcatalog_core::{
    AppCategory, AppError, Application, AuthRequirement, HealthStatus, IMPORTANT_TAG, Result,
    ToolDefinition,
};

/// Local filesystem application.
#[derive(Debug, Clone, Default)]
pub struct FileSystemApp {
    /// When set, every path must resolve inside this directory.
    root: Option<PathBuf>,
}

impl FileSystemApp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Confine all paths to `root`.  Relative paths resolve against it.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Write raw bytes to `path` (or a temp file when `None`) and return the
    /// `{status, data: {url, filename, size}}` envelope.
    pub async fn write_file(&self, data: &[u8], path: Option<&str>) -> Result<Value> {
        let target = match path {
            Some(p) => self.resolve(p, "write_file")?,
            None => self.default_target(),
        };

        if let Some(parent) = target.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, data).await?;
        info!(path = %target.display(), bytes = data.len(), "file written");

        let filename = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(json!({
            "status": "success",
            "data": {
                "url": target.display().to_string(),
                "filename": filename,
                "size": data.len(),
            }
        }))
    }

    fn default_target(&self) -> PathBuf {
        let name = uuid::Uuid::now_v7().to_string();
        match &self.root {
            Some(root) => root.join(name),
            None => std::env::temp_dir().join(name),
        }
    }

    /// Resolve `path`, enforcing the root when one is configured.
    fn resolve(&self, path: &str, tool_name: &str) -> Result<PathBuf> {
        if path.is_empty() {
            return Err(AppError::invalid_params(tool_name, "path must not be empty"));
        }
        let Some(root) = &self.root else {
            return Ok(PathBuf::from(path));
        };
        let root = normalize_path(root);
        let joined = normalize_path(&root.join(path));
        if !joined.starts_with(&root) {
            return Err(AppError::invalid_params(
                tool_name,
                format!("path `{path}` resolves outside `{}`", root.display()),
            ));
        }
        Ok(joined)
    }

    // -----------------------------------------------------------------------
    // Tool implementations
    // -----------------------------------------------------------------------

    async fn tool_read_file(&self, params: Value) -> Result<Value> {
        let path = require_str(&params, "file_path", "read_file")?;
        let full = self.resolve(path, "read_file")?;
        debug!(path = %full.display(), "reading file");

        let bytes = tokio::fs::read(&full).await?;
        let mut out = json!({
            "path": full.display().to_string(),
            "content_base64": STANDARD.encode(&bytes),
            "size": bytes.len(),
        });
        if let Ok(text) = std::str::from_utf8(&bytes) {
            out["text"] = Value::String(text.to_string());
        }
        Ok(out)
    }

    async fn tool_write_file(&self, params: Value) -> Result<Value> {
        let data = require_str(&params, "file_data", "write_file")?;
        let bytes = match optional_str(&params, "encoding").unwrap_or("utf8") {
            "utf8" | "utf-8" | "text" => data.as_bytes().to_vec(),
            "base64" => STANDARD.decode(data).map_err(|e| {
                AppError::invalid_params(
                    "write_file",
                    format!("`file_data` is not valid base64: {e}"),
                )
            })?,
            other => {
                return Err(AppError::invalid_params(
                    "write_file",
                    format!("unsupported encoding `{other}` (expected `utf8` or `base64`)"),
                ));
            }
        };
        self.write_file(&bytes, optional_str(&params, "file_path"))
            .await
    }

    async fn tool_remove_file(&self, params: Value) -> Result<Value> {
        let path = require_str(&params, "file_path", "remove_file")?;
        let full = self.resolve(path, "remove_file")?;
        debug!(path = %full.display(), "removing file");
        tokio::fs::remove_file(&full).await?;
        Ok(json!({"status": "success", "path": full.display().to_string()}))
    }

    async fn tool_move_file(&self, params: Value) -> Result<Value> {
        let (from, to) = self.source_and_destination(&params, "move_file")?;
        debug!(from = %from.display(), to = %to.display(), "moving file");
        ensure_parent(&to).await?;
        tokio::fs::rename(&from, &to).await?;
        Ok(json!({
            "status": "success",
            "source": from.display().to_string(),
            "destination": to.display().to_string(),
        }))
    }

    async fn tool_copy_file(&self, params: Value) -> Result<Value> {
        let (from, to) = self.source_and_destination(&params, "copy_file")?;
        debug!(from = %from.display(), to = %to.display(), "copying file");
        ensure_parent(&to).await?;
        let size = tokio::fs::copy(&from, &to).await?;
        Ok(json!({
            "status": "success",
            "source": from.display().to_string(),
            "destination": to.display().to_string(),
            "size": size,
        }))
    }

    fn source_and_destination(&self, params: &Value, tool: &str) -> Result<(PathBuf, PathBuf)> {
        let from = self.resolve(require_str(params, "source_path", tool)?, tool)?;
        let to = self.resolve(require_str(params, "destination_path", tool)?, tool)?;
        Ok((from, to))
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Resolve `.` and `..` lexically; the target may not exist yet.
fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                } else {
                    components.push(component);
                }
            }
            Component::CurDir => {}
            _ => components.push(component),
        }
    }
    components.iter().collect()
}

#[async_trait]
impl Application for FileSystemApp {
    fn name(&self) -> &str {
        "file_system"
    }

    fn category(&self) -> AppCategory {
        AppCategory::System
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "read_file",
                "Read a file and return its content base64-encoded, with its size in bytes",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": { "type": "string", "description": "Path of the file to read" }
                    },
                    "required": ["file_path"]
                }),
                &["file", "read", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "write_file",
                "Write data to a file. Without a path a new file is created in the temp directory",
                json!({
                    "type": "object",
                    "properties": {
                        "file_data": { "type": "string", "description": "Content to write" },
                        "file_path": { "type": "string", "description": "Destination path (default: a new temp file)" },
                        "encoding": { "type": "string", "enum": ["utf8", "base64"], "description": "How `file_data` is encoded (default: utf8)" }
                    },
                    "required": ["file_data"]
                }),
                &["file", "write", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "remove_file",
                "Delete a file",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": { "type": "string", "description": "Path of the file to delete" }
                    },
                    "required": ["file_path"]
                }),
                &["file", "delete"],
            ),
            ToolDefinition::new(
                "move_file",
                "Move or rename a file, creating the destination directory if needed",
                json!({
                    "type": "object",
                    "properties": {
                        "source_path": { "type": "string", "description": "Existing file" },
                        "destination_path": { "type": "string", "description": "New location" }
                    },
                    "required": ["source_path", "destination_path"]
                }),
                &["file", "move"],
            ),
            ToolDefinition::new(
                "copy_file",
                "Copy a file, creating the destination directory if needed",
                json!({
                    "type": "object",
                    "properties": {
                        "source_path": { "type": "string", "description": "Existing file" },
                        "destination_path": { "type": "string", "description": "Copy location" }
                    },
                    "required": ["source_path", "destination_path"]
                }),
                &["file", "copy"],
            ),
        ]
    }

    async fn execute_tool(&self, name: &str, params: Value) -> Result<Value> {
        match name {
            "read_file" => self.tool_read_file(params).await,
            "write_file" => self.tool_write_file(params).await,
            "remove_file" => self.tool_remove_file(params).await,
            "move_file" => self.tool_move_file(params).await,
            "copy_file" => self.tool_copy_file(params).await,
            _ => Err(AppError::ToolNotFound {
                app: self.name().to_string(),
                tool: name.to_string(),
            }),
        }
    }

    fn required_auth(&self) -> Option<AuthRequirement> {
        None
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let Some(root) = &self.root else {
            return Ok(HealthStatus::Healthy);
        };
        match tokio::fs::metadata(root).await {
            Ok(meta) if meta.is_dir() => Ok(HealthStatus::Healthy),
            Ok(_) => Ok(HealthStatus::Degraded),
            Err(_) => Ok(HealthStatus::Unhealthy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rooted(dir: &tempfile::TempDir) -> FileSystemApp {
        FileSystemApp::new().with_root(dir.path())
    }

    #[tokio::test]
    async fn write_then_read_text() {
        let dir = tempfile::tempdir().unwrap();
        let app = rooted(&dir);

        let written = app
            .execute_tool(
                "write_file",
                json!({"file_data": "hello", "file_path": "notes/a.txt"}),
            )
            .await
            .unwrap();
        assert_eq!(written["status"], "success");
        assert_eq!(written["data"]["filename"], "a.txt");
        assert_eq!(written["data"]["size"], 5);

        let read = app
            .execute_tool("read_file", json!({"file_path": "notes/a.txt"}))
            .await
            .unwrap();
        assert_eq!(read["content_base64"], "aGVsbG8=");
        assert_eq!(read["size"], 5);
        assert_eq!(read["text"], "hello");
    }

    #[tokio::test]
    async fn write_without_path_creates_uuid_file() {
        let dir = tempfile::tempdir().unwrap();
        let app = rooted(&dir);
        let out = app.write_file(b"\x00\x01", None).await.unwrap();
        let url = out["data"]["url"].as_str().unwrap();
        assert!(url.starts_with(dir.path().to_str().unwrap()));
        let filename = out["data"]["filename"].as_str().unwrap();
        assert!(uuid::Uuid::parse_str(filename).is_ok());
        assert_eq!(std::fs::read(url).unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn base64_write_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let app = rooted(&dir);
        app.execute_tool(
            "write_file",
            json!({"file_data": "aGk=", "file_path": "b.bin", "encoding": "base64"}),
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read(dir.path().join("b.bin")).unwrap(), b"hi");

        let err = app
            .execute_tool(
                "write_file",
                json!({"file_data": "!!", "file_path": "c.bin", "encoding": "base64"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn move_copy_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let app = rooted(&dir);
        std::fs::write(dir.path().join("src.txt"), "data").unwrap();

        app.execute_tool(
            "copy_file",
            json!({"source_path": "src.txt", "destination_path": "copy/dst.txt"}),
        )
        .await
        .unwrap();
        assert!(dir.path().join("copy/dst.txt").exists());

        app.execute_tool(
            "move_file",
            json!({"source_path": "src.txt", "destination_path": "moved.txt"}),
        )
        .await
        .unwrap();
        assert!(!dir.path().join("src.txt").exists());
        assert!(dir.path().join("moved.txt").exists());

        app.execute_tool("remove_file", json!({"file_path": "moved.txt"}))
            .await
            .unwrap();
        assert!(!dir.path().join("moved.txt").exists());
    }

    #[tokio::test]
    async fn escaping_the_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = rooted(&dir)
            .execute_tool("read_file", json!({"file_path": "../../etc/passwd"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("resolves outside"));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = rooted(&dir)
            .execute_tool("read_file", json!({"file_path": "absent"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
    }

    #[test]
    fn important_tools_are_read_and_write() {
        let names: Vec<String> = FileSystemApp::new()
            .tools_with_tag(IMPORTANT_TAG)
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["read_file", "write_file"]);
    }

    #[test]
    fn normalize_resolves_dots() {
        assert_eq!(
            normalize_path(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
    }
}
