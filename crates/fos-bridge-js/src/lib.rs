//! fOS Bridge Script Bindings
//!
//! QuickJS (via rquickjs) front end for the bridge control plane.
//!
//! Features:
//! - `performance` global backed by the context's timeline
//! - `__bridge__` global: module listeners, host module calls, UI commands
//! - Host module events fanned out to script listeners

mod module_manager;
mod performance;
mod ui;

use fos_bridge::performance::{PERF_JS_NATIVE_METHOD_INIT_END, PERF_JS_NATIVE_METHOD_INIT_START};
use fos_bridge::{BridgeError, DispatchReport, ErrorKind, ExecutionContext};
use rquickjs::convert::Coerced;
use rquickjs::{Ctx, Exception, FromJs, Module, Value};
use std::rc::Rc;
use std::sync::Arc;

pub use module_manager::{install_module_manager, ListenerSet};
pub use performance::install_performance;
pub use ui::install_ui_commands;

/// JavaScript value
#[derive(Debug, Clone, PartialEq)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object,
    Array,
    Function,
}

/// JavaScript error
#[derive(Debug, thiserror::Error)]
pub enum JsError {
    #[error("JavaScript error: {0}")]
    Runtime(String),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Reference error: {0}")]
    Reference(String),

    #[error("Range error: {0}")]
    Range(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Script runtime attached to one execution context
pub struct JsBridge {
    // Field order matters: listeners hold engine values and must go before
    // the runtime.
    listeners: Rc<ListenerSet>,
    context: rquickjs::Context,
    runtime: rquickjs::Runtime,
    execution: Arc<ExecutionContext>,
}

impl JsBridge {
    /// Create a runtime for `execution` with every binding installed
    pub fn new(execution: Arc<ExecutionContext>) -> Result<Self, JsError> {
        let runtime = rquickjs::Runtime::new().map_err(|e| JsError::Runtime(e.to_string()))?;
        runtime.set_memory_limit(execution.config().memory_limit);

        let context = rquickjs::Context::full(&runtime).map_err(|e| JsError::Runtime(e.to_string()))?;
        let listeners = Rc::new(ListenerSet::new(execution.clone()));
        let profile = execution.config().profile;

        if profile {
            execution.timeline().mark(PERF_JS_NATIVE_METHOD_INIT_START, None);
        }
        context.with(|ctx| {
            performance::install_performance(&ctx, execution.clone()).map_err(|e| JsError::Runtime(e.to_string()))?;
            module_manager::install_module_manager(&ctx, listeners.clone())
                .map_err(|e| JsError::Runtime(e.to_string()))?;
            Ok::<_, JsError>(())
        })?;
        if profile {
            execution.timeline().mark(PERF_JS_NATIVE_METHOD_INIT_END, None);
        }

        tracing::debug!(context = execution.id(), "script bindings installed");
        Ok(Self { listeners, context, runtime, execution })
    }

    pub fn execution_context(&self) -> &Arc<ExecutionContext> {
        &self.execution
    }

    /// Evaluate JavaScript code
    pub fn eval(&self, code: &str) -> Result<JsValue, JsError> {
        self.context.with(|ctx| {
            let result: Value = ctx.eval(code).map_err(|e| self.uncaught(&ctx, e))?;
            Ok(convert_value(&result))
        })
    }

    /// Execute JavaScript (ignore result)
    pub fn exec(&self, code: &str) -> Result<(), JsError> {
        self.context.with(|ctx| {
            let _: Value = ctx.eval(code).map_err(|e| self.uncaught(&ctx, e))?;
            Ok(())
        })
    }

    /// Evaluate a named script; `url` shows up in stack traces.
    ///
    /// Named scripts run as module code: strict, with their own top-level
    /// scope. Shared state goes through `globalThis`.
    pub fn evaluate_script(&self, code: &str, url: &str) -> Result<(), JsError> {
        self.context.with(|ctx| {
            let module = Module::declare(ctx.clone(), url, code).map_err(|e| self.uncaught(&ctx, e))?;
            self.run_module(&ctx, module)
        })
    }

    /// Compile `code` to bytecode without running it
    pub fn dump_byte_code(&self, code: &str, url: &str) -> Result<Vec<u8>, JsError> {
        self.context.with(|ctx| {
            let module = Module::declare(ctx.clone(), url, code).map_err(|e| self.uncaught(&ctx, e))?;
            module.write_le().map_err(|e| convert_error(&ctx, e))
        })
    }

    /// Run bytecode produced by [`dump_byte_code`](Self::dump_byte_code)
    ///
    /// # Safety
    ///
    /// The engine does not validate bytecode. `bytes` must come from
    /// `dump_byte_code` of the same engine version.
    pub unsafe fn evaluate_byte_code(&self, bytes: &[u8]) -> Result<(), JsError> {
        self.context.with(|ctx| {
            // SAFETY: the caller guarantees `bytes` is engine-produced bytecode.
            let module = unsafe { Module::load(ctx.clone(), bytes) }.map_err(|e| self.uncaught(&ctx, e))?;
            self.run_module(&ctx, module)
        })
    }

    fn run_module<'js>(&self, ctx: &Ctx<'js>, module: Module<'js>) -> Result<(), JsError> {
        let (_module, promise) = module.eval().map_err(|e| self.uncaught(ctx, e))?;
        promise.finish::<()>().map_err(|e| self.uncaught(ctx, e))
    }

    /// Deliver a host module event to every script listener
    pub fn invoke_module_event(
        &self,
        module_name: &str,
        event_type: Option<&str>,
        extra_json: Option<&str>,
    ) -> Result<DispatchReport, JsError> {
        self.context
            .with(|ctx| self.listeners.dispatch(&ctx, module_name, event_type, extra_json))
            .map_err(JsError::from)
    }

    /// Number of registered module listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Run pending promise jobs
    pub fn run_pending_jobs(&self) -> Result<(), JsError> {
        while self.runtime.is_job_pending() {
            if let Err(job) = self.runtime.execute_pending_job() {
                let error = job.0.with(|ctx| convert_error(&ctx, rquickjs::Error::Exception));
                self.execution.report_error(&error.to_string());
                return Err(error);
            }
        }
        Ok(())
    }

    fn uncaught(&self, ctx: &Ctx<'_>, err: rquickjs::Error) -> JsError {
        let error = convert_error(ctx, err);
        self.execution.report_error(&error.to_string());
        error
    }
}

impl Drop for JsBridge {
    fn drop(&mut self) {
        self.context.with(|_ctx| self.listeners.clear());
    }
}

/// Convert a script value into its host summary
pub fn convert_value(value: &Value<'_>) -> JsValue {
    if value.is_undefined() {
        JsValue::Undefined
    } else if value.is_null() {
        JsValue::Null
    } else if let Some(b) = value.as_bool() {
        JsValue::Bool(b)
    } else if let Some(n) = value.as_number() {
        JsValue::Number(n)
    } else if let Some(s) = value.as_string() {
        JsValue::String(s.to_string().unwrap_or_default())
    } else if value.is_array() {
        JsValue::Array
    } else if value.is_function() {
        JsValue::Function
    } else {
        JsValue::Object
    }
}

/// Convert an engine error, collecting the pending exception if any
pub fn convert_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> JsError {
    if !matches!(err, rquickjs::Error::Exception) {
        return JsError::Runtime(err.to_string());
    }

    let thrown = ctx.catch();
    let Some(exception) = thrown.as_exception() else {
        let text = Coerced::<String>::from_js(ctx, thrown).map(|s| s.0).unwrap_or_default();
        return JsError::Runtime(text);
    };

    let name: String = exception.get("name").unwrap_or_default();
    let message = exception.message().unwrap_or_default();
    match name.as_str() {
        "SyntaxError" => JsError::Syntax(message),
        "TypeError" => JsError::TypeError(message),
        "ReferenceError" => JsError::Reference(message),
        "RangeError" => JsError::Range(message),
        "InternalError" => JsError::Internal(message),
        _ if name.is_empty() => JsError::Runtime(message),
        _ => JsError::Runtime(format!("{name}: {message}")),
    }
}

/// Throw a bridge error into script as the matching error class
pub(crate) fn throw(ctx: &Ctx<'_>, err: BridgeError) -> rquickjs::Error {
    let message = err.to_string();
    match err.kind() {
        ErrorKind::Reference => Exception::throw_reference(ctx, &message),
        ErrorKind::Type => Exception::throw_type(ctx, &message),
        ErrorKind::Range => Exception::throw_range(ctx, &message),
        ErrorKind::Internal => Exception::throw_internal(ctx, &message),
    }
}

/// Optional string argument; `undefined` and `null` count as absent
pub(crate) fn opt_string<'js>(ctx: &Ctx<'js>, value: Option<&Value<'js>>) -> rquickjs::Result<Option<String>> {
    match value {
        Some(value) if !value.is_undefined() && !value.is_null() => {
            Ok(Some(Coerced::<String>::from_js(ctx, value.clone())?.0))
        }
        _ => Ok(None),
    }
}
