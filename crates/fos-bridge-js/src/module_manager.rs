//! Module Manager
//!
//! Installs the `__bridge__` global: persistent module listeners and calls
//! into host modules.

use crate::{opt_string, throw, ui};
use fos_bridge::{
    BridgeError, DispatchReport, ExecutionContext, ListenerHandle, ModuleEvent, ModuleEventDispatcher,
    ScriptException,
};
use rquickjs::function::Rest;
use rquickjs::{Ctx, Exception, Function, Object, Persistent, Value};
use std::rc::Rc;
use std::sync::Arc;

type Listener = Persistent<Function<'static>>;

/// Script module listeners of one runtime
pub struct ListenerSet {
    dispatcher: ModuleEventDispatcher<Listener>,
}

impl ListenerSet {
    pub fn new(context: Arc<ExecutionContext>) -> Self {
        Self { dispatcher: ModuleEventDispatcher::new(context) }
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        self.dispatcher.context()
    }

    pub fn len(&self) -> usize {
        self.dispatcher.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatcher.is_empty()
    }

    /// Drop every saved listener; must run before the runtime is freed
    pub fn clear(&self) {
        self.dispatcher.clear();
    }

    /// Call each listener as `listener(moduleName, event, extra)`
    pub fn dispatch<'js>(
        &self,
        ctx: &Ctx<'js>,
        module_name: &str,
        event_type: Option<&str>,
        extra_json: Option<&str>,
    ) -> fos_bridge::Result<DispatchReport> {
        self.dispatcher.dispatch(module_name, event_type, extra_json, |listener, event| {
            call_listener(ctx, listener, event).map_err(|err| ScriptException::new(crate::convert_error(ctx, err).to_string()))
        })
    }
}

fn call_listener<'js>(ctx: &Ctx<'js>, listener: &Listener, event: &ModuleEvent<'_, str>) -> rquickjs::Result<()> {
    let function = listener.clone().restore(ctx)?;

    let event_object = match event.event {
        Some(event_type) => {
            let object = Object::new(ctx.clone())?;
            object.set("type", event_type)?;
            object.into_value()
        }
        None => Value::new_null(ctx.clone()),
    };
    let extra = match event.extra {
        Some(extra) => ctx.json_parse(extra.to_string())?,
        None => Value::new_null(ctx.clone()),
    };

    function.call::<_, ()>((event.module_name, event_object, extra))
}

/// Install the `__bridge__` global
pub fn install_module_manager<'js>(ctx: &Ctx<'js>, listeners: Rc<ListenerSet>) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    let bridge = Object::new(ctx.clone())?;
    let context = listeners.context().clone();

    // __bridge__.addModuleListener(fn) -> id
    let set = listeners.clone();
    bridge.set("addModuleListener", Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<f64> {
        let Some(first) = args.first() else {
            return Err(throw(&ctx, BridgeError::missing_argument("addModuleListener", "ModuleManager")));
        };
        let Some(function) = first.as_function() else {
            return Err(Exception::throw_type(
                &ctx,
                "Failed to execute 'addModuleListener' on 'ModuleManager': parameter 1 is not a function.",
            ));
        };
        let handle = set.dispatcher.register_listener(Persistent::save(&ctx, function.clone()));
        Ok(handle.id() as f64)
    })?)?;

    // __bridge__.removeModuleListener(id) -> bool
    let set = listeners.clone();
    bridge.set("removeModuleListener", Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<bool> {
        let Some(id) = args.first().and_then(Value::as_number) else {
            return Err(throw(&ctx, BridgeError::missing_argument("removeModuleListener", "ModuleManager")));
        };
        // Ids are whole numbers handed out by addModuleListener.
        if !id.is_finite() || id < 0.0 || id.fract() != 0.0 || id > u64::MAX as f64 {
            return Ok(false);
        }
        Ok(set.dispatcher.unregister_listener(ListenerHandle::from_id(id as u64)))
    })?)?;

    // __bridge__.invokeModule(module, method, params?) -> string | null
    let execution = context.clone();
    bridge.set("invokeModule", Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
        if args.len() < 2 {
            return Err(Exception::throw_type(
                &ctx,
                &format!(
                    "Failed to execute 'invokeModule' on 'ModuleManager': 2 arguments required, but only {} present.",
                    args.len()
                ),
            ));
        }
        let module = opt_string(&ctx, args.first())?.unwrap_or_default();
        let method = opt_string(&ctx, args.get(1))?.unwrap_or_default();
        let params = match args.get(2) {
            Some(value) if value.is_string() => opt_string(&ctx, Some(value))?,
            Some(value) if !value.is_undefined() && !value.is_null() => {
                ctx.json_stringify(value.clone())?.map(|s| s.to_string()).transpose()?
            }
            _ => None,
        };

        tracing::debug!(context = execution.id(), module = %module, method = %method, "invoking host module");
        match execution.services().invoke_module(execution.id(), &module, &method, params.as_deref()) {
            Some(reply) => Ok(rquickjs::String::from_str(ctx.clone(), &reply)?.into_value()),
            None => Ok(Value::new_null(ctx.clone())),
        }
    })?)?;

    ui::install_ui_commands(ctx, &bridge, context)?;

    globals.set("__bridge__", bridge)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fos_bridge::{BridgeConfig, HostCallGate};
    use rquickjs::{Context, Runtime};

    fn setup() -> (Runtime, Context, Rc<ListenerSet>) {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let execution = ExecutionContext::with_gate(1, BridgeConfig::default(), Arc::new(HostCallGate::new()));
        let listeners = Rc::new(ListenerSet::new(Arc::new(execution)));
        context.with(|ctx| install_module_manager(&ctx, listeners.clone()).unwrap());
        (runtime, context, listeners)
    }

    #[test]
    fn test_add_and_remove_listener() {
        let (_runtime, context, listeners) = setup();
        context.with(|ctx| {
            let id: f64 = ctx.eval("__bridge__.addModuleListener(function() {})").unwrap();
            assert_eq!(listeners.len(), 1);
            let removed: bool = ctx.eval(format!("__bridge__.removeModuleListener({id})")).unwrap();
            assert!(removed);
            assert!(listeners.is_empty());
        });
        context.with(|_ctx| listeners.clear());
    }

    #[test]
    fn test_dispatch_passes_arguments() {
        let (_runtime, context, listeners) = setup();
        context.with(|ctx| {
            let _: Value = ctx
                .eval(
                    "globalThis.seen = [];\
                     __bridge__.addModuleListener(function(m, e, x) { seen.push([m, e && e.type, x && x.lat]); });",
                )
                .unwrap();
            let report = listeners.dispatch(&ctx, "Geolocation", Some("change"), Some(r#"{"lat": 2}"#)).unwrap();
            assert_eq!(report.delivered, 1);
            let seen: String = ctx.eval("JSON.stringify(seen)").unwrap();
            assert_eq!(seen, r#"[["Geolocation","change",2]]"#);
        });
        context.with(|_ctx| listeners.clear());
    }

    #[test]
    fn test_remove_rejects_inexact_ids() {
        let (_runtime, context, listeners) = setup();
        context.with(|ctx| {
            let id: f64 = ctx.eval("__bridge__.addModuleListener(function() {})").unwrap();
            for bad in [format!("{id} + 0.5"), "NaN".to_string(), "Infinity".to_string(), "-1".to_string()] {
                let removed: bool = ctx.eval(format!("__bridge__.removeModuleListener({bad})")).unwrap();
                assert!(!removed, "{bad}");
            }
            assert_eq!(listeners.len(), 1);
        });
        context.with(|_ctx| listeners.clear());
    }

    #[test]
    fn test_invoke_module_without_reply_is_null() {
        let (_runtime, context, listeners) = setup();
        context.with(|ctx| {
            let kind: String = ctx.eval("String(__bridge__.invokeModule('Battery', 'level'))").unwrap();
            assert_eq!(kind, "null");
        });
        context.with(|_ctx| listeners.clear());
    }

    #[test]
    fn test_add_listener_requires_function() {
        let (_runtime, context, listeners) = setup();
        context.with(|ctx| {
            let kind: String = ctx
                .eval("try { __bridge__.addModuleListener(1); 'none' } catch (e) { e.name }")
                .unwrap();
            assert_eq!(kind, "TypeError");
            let kind: String = ctx
                .eval("try { __bridge__.addModuleListener(); 'none' } catch (e) { e.name }")
                .unwrap();
            assert_eq!(kind, "TypeError");
        });
        context.with(|_ctx| listeners.clear());
    }
}
