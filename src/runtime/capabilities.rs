/// Node capability collaborators
///
/// Thin wrappers around the OS and workbook files. Action and spreadsheet nodes call
/// into these; the engine only ever sees their results as node outputs or failures.

use crate::error::ExecutorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::process::Command;

/// OS-level actions: notifications, commands, URLs
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn notify(&self, title: &str, message: &str) -> Result<Value, ExecutorError>;

    async fn run_command(
        &self,
        command: &str,
        args: &[String],
        work_dir: Option<&str>,
    ) -> Result<Value, ExecutorError>;

    async fn open_url(&self, url: &str) -> Result<Value, ExecutorError>;
}

/// Tabular read/write against workbook files
#[async_trait]
pub trait SpreadsheetStore: Send + Sync {
    async fn read_rows(&self, path: &str, sheet: Option<&str>) -> Result<Vec<Value>, ExecutorError>;

    /// Returns the sheet's row count after the write
    async fn write_rows(
        &self,
        path: &str,
        sheet: Option<&str>,
        rows: Vec<Value>,
        append: bool,
    ) -> Result<usize, ExecutorError>;
}

/// Collaborators handed to the built-in node executors
#[derive(Clone)]
pub struct Capabilities {
    pub actions: Arc<dyn ActionDispatcher>,
    pub spreadsheets: Arc<dyn SpreadsheetStore>,
}

impl Capabilities {
    /// System actions plus a workbook store rooted at `workbook_dir`
    pub fn system(workbook_dir: impl Into<PathBuf>) -> Self {
        Self {
            actions: Arc::new(SystemActions),
            spreadsheets: Arc::new(JsonWorkbookStore::new(workbook_dir)),
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}

/// Dispatches actions to the host OS through its stock utilities
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemActions;

impl SystemActions {
    async fn spawn(program: &str, args: &[&str]) -> Result<(), ExecutorError> {
        let status = Command::new(program)
            .args(args)
            .status()
            .await
            .map_err(|e| ExecutorError::failed(format!("failed to launch {}: {}", program, e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(ExecutorError::failed(format!("{} exited with {}", program, status)))
        }
    }
}

#[async_trait]
impl ActionDispatcher for SystemActions {
    async fn notify(&self, title: &str, message: &str) -> Result<Value, ExecutorError> {
        tracing::info!("🔔 Notification: {} - {}", title, message);

        if cfg!(target_os = "macos") {
            let script = format!(
                "display notification {:?} with title {:?}",
                message, title
            );
            Self::spawn("osascript", &["-e", &script]).await?;
        } else if cfg!(target_os = "linux") {
            Self::spawn("notify-send", &[title, message]).await?;
        } else {
            tracing::debug!("No native notifier on this platform, logged only");
        }

        Ok(json!({ "notified": true, "title": title, "message": message }))
    }

    async fn run_command(
        &self,
        command: &str,
        args: &[String],
        work_dir: Option<&str>,
    ) -> Result<Value, ExecutorError> {
        tracing::debug!("🖥️ Running command: {} {:?}", command, args);

        let mut cmd = Command::new(command);
        cmd.args(args).kill_on_drop(true);
        if let Some(dir) = work_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| ExecutorError::failed(format!("failed to launch {}: {}", command, e)))?;

        let exit_code = output.status.code();
        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

        if !output.status.success() {
            return Err(ExecutorError::failed(format!(
                "{} exited with {:?}: {}",
                command, exit_code, stderr
            )));
        }

        Ok(json!({ "exitCode": exit_code, "stdout": stdout, "stderr": stderr }))
    }

    async fn open_url(&self, url: &str) -> Result<Value, ExecutorError> {
        if !(url.starts_with("http://") || url.starts_with("https://") || url.starts_with("file://")) {
            return Err(ExecutorError::config(format!("refusing to open '{}'", url)));
        }

        if cfg!(target_os = "macos") {
            Self::spawn("open", &[url]).await?;
        } else if cfg!(target_os = "windows") {
            Self::spawn("cmd", &["/C", "start", "", url]).await?;
        } else {
            Self::spawn("xdg-open", &[url]).await?;
        }

        Ok(json!({ "opened": url }))
    }
}

const DEFAULT_SHEET: &str = "Sheet1";

/// On-disk workbook: named sheets of JSON rows
#[derive(Debug, Default, Serialize, Deserialize)]
struct Workbook {
    #[serde(default)]
    sheets: Map<String, Value>,
}

/// Workbook files stored as one JSON document each
///
/// Relative paths resolve under the store's base directory.
#[derive(Debug, Clone)]
pub struct JsonWorkbookStore {
    base: PathBuf,
}

impl JsonWorkbookStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ExecutorError> {
        if path.trim().is_empty() {
            return Err(ExecutorError::config("workbook path is empty"));
        }
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            Ok(candidate.to_path_buf())
        } else {
            Ok(self.base.join(candidate))
        }
    }

    async fn load(&self, path: &Path) -> Result<Workbook, ExecutorError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                ExecutorError::failed(format!("workbook {} is corrupt: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Workbook::default()),
            Err(e) => Err(ExecutorError::failed(format!(
                "failed to read workbook {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl SpreadsheetStore for JsonWorkbookStore {
    async fn read_rows(&self, path: &str, sheet: Option<&str>) -> Result<Vec<Value>, ExecutorError> {
        let file = self.resolve(path)?;
        if !tokio::fs::try_exists(&file).await.unwrap_or(false) {
            return Err(ExecutorError::failed(format!("workbook not found: {}", file.display())));
        }
        let workbook = self.load(&file).await?;
        let sheet = sheet.unwrap_or(DEFAULT_SHEET);
        match workbook.sheets.get(sheet) {
            Some(Value::Array(rows)) => Ok(rows.clone()),
            Some(_) => Err(ExecutorError::failed(format!("sheet '{}' is not a row list", sheet))),
            None => Err(ExecutorError::failed(format!("sheet '{}' not found", sheet))),
        }
    }

    async fn write_rows(
        &self,
        path: &str,
        sheet: Option<&str>,
        rows: Vec<Value>,
        append: bool,
    ) -> Result<usize, ExecutorError> {
        let file = self.resolve(path)?;
        let mut workbook = self.load(&file).await?;
        let sheet = sheet.unwrap_or(DEFAULT_SHEET).to_string();

        let mut existing = match workbook.sheets.remove(&sheet) {
            Some(Value::Array(existing)) if append => existing,
            _ => Vec::new(),
        };
        existing.extend(rows);
        let count = existing.len();
        workbook.sheets.insert(sheet, Value::Array(existing));

        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ExecutorError::failed(format!("failed to create {}: {}", parent.display(), e)))?;
        }
        let data = serde_json::to_vec_pretty(&workbook)
            .map_err(|e| ExecutorError::failed(e.to_string()))?;
        tokio::fs::write(&file, data)
            .await
            .map_err(|e| ExecutorError::failed(format!("failed to write {}: {}", file.display(), e)))?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn workbook_write_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonWorkbookStore::new(dir.path());

        let count = store
            .write_rows("report.json", None, vec![json!({"a": 1})], false)
            .await
            .unwrap();
        assert_eq!(count, 1);
        let count = store
            .write_rows("report.json", None, vec![json!({"a": 2})], true)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let rows = store.read_rows("report.json", None).await.unwrap();
        assert_eq!(rows, vec![json!({"a": 1}), json!({"a": 2})]);

        let count = store
            .write_rows("report.json", None, vec![json!({"a": 3})], false)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn missing_workbook_or_sheet_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonWorkbookStore::new(dir.path());
        assert!(store.read_rows("nope.json", None).await.is_err());

        store
            .write_rows("book.json", Some("Data"), vec![json!({})], false)
            .await
            .unwrap();
        assert!(store.read_rows("book.json", Some("Other")).await.is_err());
        assert_eq!(store.read_rows("book.json", Some("Data")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn open_url_rejects_unknown_schemes() {
        let err = SystemActions.open_url("javascript:alert(1)").await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
