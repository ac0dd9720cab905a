/// Spreadsheet nodes backed by the `SpreadsheetStore` capability
///
/// - `spreadsheet.read { path, sheet }` outputs `{ rows, count }`
/// - `spreadsheet.write { path, sheet, rows?, append }` outputs `{ written, rowCount }`;
///   without `rows` it writes the input's `rows` field, or the input itself as one row

use crate::error::ExecutorError;
use crate::runtime::{
    capabilities::{Capabilities, SpreadsheetStore},
    executor::{NodeContext, NodeExecutor},
    nodes::{optional_kind, require_string},
    registry::NodeRegistry,
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub fn register(registry: &mut NodeRegistry, capabilities: &Capabilities) {
    registry
        .register("spreadsheet.read", SpreadsheetRead::new(capabilities.spreadsheets.clone()))
        .register("spreadsheet.write", SpreadsheetWrite::new(capabilities.spreadsheets.clone()));
}

pub struct SpreadsheetRead {
    store: Arc<dyn SpreadsheetStore>,
}

impl SpreadsheetRead {
    pub fn new(store: Arc<dyn SpreadsheetStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NodeExecutor for SpreadsheetRead {
    fn validate(&self, config: &Map<String, Value>) -> Result<(), String> {
        require_string(config, "path")?;
        optional_kind(config, "sheet", "a string", Value::is_string)
    }

    async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
        let path = ctx.require_str("path")?;
        let rows = self.store.read_rows(path, ctx.str_param("sheet")).await?;
        tracing::debug!("📖 Read {} rows from {}", rows.len(), path);
        Ok(json!({ "count": rows.len(), "rows": rows }))
    }
}

pub struct SpreadsheetWrite {
    store: Arc<dyn SpreadsheetStore>,
}

impl SpreadsheetWrite {
    pub fn new(store: Arc<dyn SpreadsheetStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NodeExecutor for SpreadsheetWrite {
    fn validate(&self, config: &Map<String, Value>) -> Result<(), String> {
        require_string(config, "path")?;
        optional_kind(config, "sheet", "a string", Value::is_string)?;
        optional_kind(config, "rows", "a list", Value::is_array)?;
        optional_kind(config, "append", "a boolean", Value::is_boolean)
    }

    async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
        let path = ctx.require_str("path")?;
        let append = ctx.config.get("append").and_then(Value::as_bool).unwrap_or(true);

        let rows = match ctx.config.get("rows").or_else(|| ctx.input.get("rows")) {
            Some(Value::Array(rows)) => rows.clone(),
            Some(Value::Null) | None => vec![ctx.input_value()],
            Some(_) => return Err(ExecutorError::config("'rows' must be a list")),
        };
        let written = rows.len();

        let row_count = self
            .store
            .write_rows(path, ctx.str_param("sheet"), rows, append)
            .await?;
        tracing::debug!("💾 Wrote {} rows to {}", written, path);

        Ok(json!({ "written": written, "rowCount": row_count }))
    }
}
