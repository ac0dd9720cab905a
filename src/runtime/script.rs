/// Sandboxed Lua evaluation
///
/// Used by `logic.script` nodes and `expression` edges. Every evaluation gets a fresh
/// interpreter with the filesystem, process and module loading globals removed, and
/// runs under a `Budget` that the interpreter polls between instructions.

use mlua::{HookTriggers, Lua, LuaSerdeExt, VmState};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const MEMORY_LIMIT: usize = 32 * 1024 * 1024;

/// Instructions between budget checks
const HOOK_INTERVAL: u32 = 1_000;

/// When a running interpreter must give up
#[derive(Debug, Clone, Default)]
pub struct Budget {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
}

impl Budget {
    /// Stop once `limit` has elapsed
    pub fn within(limit: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + limit),
            cancel: None,
        }
    }

    /// Also stop as soon as `token` is cancelled
    pub fn or_cancelled(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn exceeded(&self) -> Option<&'static str> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Some("evaluation cancelled");
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Some("evaluation exceeded its time limit");
        }
        None
    }
}

fn sandbox(budget: Budget) -> mlua::Result<Lua> {
    let lua = Lua::new();
    lua.set_memory_limit(MEMORY_LIMIT)?;

    let globals = lua.globals();
    for name in ["os", "io", "debug", "package", "require", "dofile", "loadfile", "load"] {
        globals.set(name, mlua::Nil)?;
    }

    if budget.deadline.is_some() || budget.cancel.is_some() {
        // A protected call re-raises an exhausted budget so the script cannot catch it
        for name in ["pcall", "xpcall"] {
            let original: mlua::Function = globals.get(name)?;
            lua.set_named_registry_value(name, original)?;
            let guard = budget.clone();
            globals.set(
                name,
                lua.create_function(move |lua, args: mlua::MultiValue| {
                    let original: mlua::Function = lua.named_registry_value(name)?;
                    let results: mlua::MultiValue = original.call(args)?;
                    match guard.exceeded() {
                        Some(reason) => Err(mlua::Error::runtime(reason)),
                        None => Ok(results),
                    }
                })?,
            )?;
        }

        lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
            move |_, _| match budget.exceeded() {
                Some(reason) => Err(mlua::Error::runtime(reason)),
                None => Ok(VmState::Continue),
            },
        )?;
    }

    // Safe time helpers in place of `os`
    globals.set(
        "now",
        lua.create_function(|_, ()| Ok(chrono::Utc::now().to_rfc3339()))?,
    )?;
    globals.set(
        "time",
        lua.create_function(|_, ()| Ok(chrono::Utc::now().timestamp()))?,
    )?;

    Ok(lua)
}

/// Run a script with `input` bound as a global; the script's return value is the output
pub fn run_script(script: &str, input: &Value, budget: Budget) -> Result<Value, String> {
    let lua = sandbox(budget).map_err(|e| format!("failed to create Lua sandbox: {}", e))?;
    let bound = lua
        .to_value(input)
        .map_err(|e| format!("failed to bind input: {}", e))?;
    lua.globals()
        .set("input", bound)
        .map_err(|e| format!("failed to bind input: {}", e))?;

    let result: mlua::Value = lua
        .load(script)
        .set_name("script")
        .eval()
        .map_err(|e| format!("Lua script failed: {}", e))?;

    match result {
        mlua::Value::Nil => Ok(Value::Null),
        other => lua
            .from_value(other)
            .map_err(|e| format!("Lua result is not JSON-compatible: {}", e)),
    }
}

/// Evaluate a boolean expression with the source node's output bound to `output`
///
/// Lua truthiness applies: only `nil` and `false` are false.
pub fn eval_condition(expr: &str, output: &Value, budget: Budget) -> Result<bool, String> {
    let lua = sandbox(budget).map_err(|e| format!("failed to create Lua sandbox: {}", e))?;
    let bound = lua
        .to_value(output)
        .map_err(|e| format!("failed to bind output: {}", e))?;
    lua.globals()
        .set("output", bound)
        .map_err(|e| format!("failed to bind output: {}", e))?;

    let value: mlua::Value = lua
        .load(format!("return ({})", expr))
        .set_name("condition")
        .eval()
        .map_err(|e| format!("condition '{}' failed: {}", expr, e))?;

    Ok(!matches!(value, mlua::Value::Nil | mlua::Value::Boolean(false)))
}

/// Compile-only check for an edge expression
pub fn check_expression(expr: &str) -> Result<(), String> {
    let lua = sandbox(Budget::default()).map_err(|e| format!("failed to create Lua sandbox: {}", e))?;
    lua.load(format!("return ({})", expr))
        .into_function()
        .map(|_| ())
        .map_err(|e| format!("invalid expression '{}': {}", expr, e))
}

/// Compile-only check for a script body
pub fn check_script(script: &str) -> Result<(), String> {
    let lua = sandbox(Budget::default()).map_err(|e| format!("failed to create Lua sandbox: {}", e))?;
    lua.load(script)
        .into_function()
        .map(|_| ())
        .map_err(|e| format!("invalid script: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn script_reads_input_and_returns_table() {
        let out = run_script(
            "return { doubled = input.score * 2, name = input.name }",
            &json!({"score": 21, "name": "x"}),
            Budget::default(),
        )
        .unwrap();
        assert_eq!(out["doubled"], json!(42));
        assert_eq!(out["name"], json!("x"));
    }

    #[test]
    fn sandbox_hides_os_and_io() {
        assert!(run_script("return os.time()", &json!({}), Budget::default()).is_err());
        assert!(run_script("return io.open('/etc/passwd')", &json!({}), Budget::default()).is_err());
        assert!(run_script("return require('x')", &json!({}), Budget::default()).is_err());
    }

    #[test]
    fn conditions_use_lua_truthiness() {
        let output = json!({"count": 5, "label": "ok"});
        assert!(eval_condition("output.count > 3", &output, Budget::default()).unwrap());
        assert!(!eval_condition("output.count > 10", &output, Budget::default()).unwrap());
        assert!(!eval_condition("output.missing", &output, Budget::default()).unwrap());
        assert!(eval_condition("output.label", &output, Budget::default()).unwrap());
    }

    #[test]
    fn syntax_errors_are_caught_before_running() {
        assert!(check_expression("output.count >").is_err());
        assert!(check_expression("output.count > 1").is_ok());
        assert!(check_script("return {").is_err());
    }

    #[test]
    fn endless_loops_stop_at_the_deadline() {
        let started = Instant::now();
        let err = run_script("while true do end", &json!({}), Budget::within(Duration::from_millis(50))).unwrap_err();
        assert!(err.contains("time limit"), "{}", err);
        assert!(started.elapsed() < Duration::from_secs(5));

        let err = eval_condition(
            "(function() while true do end end)()",
            &json!({}),
            Budget::within(Duration::from_millis(50)),
        )
        .unwrap_err();
        assert!(err.contains("time limit"), "{}", err);
    }

    #[test]
    fn pcall_cannot_swallow_the_budget() {
        let script = "while true do pcall(function() while true do end end) end";
        assert!(run_script(script, &json!({}), Budget::within(Duration::from_millis(50))).is_err());
    }

    #[test]
    fn cancelled_token_stops_a_running_script() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trigger.cancel();
        });

        let err = run_script("while true do end", &json!({}), Budget::default().or_cancelled(token)).unwrap_err();
        assert!(err.contains("cancelled"), "{}", err);
        canceller.join().unwrap();
    }
}
