//! Performance API
//!
//! Implements the `performance` global on top of the context's timeline.

use crate::{opt_string, throw};
use fos_bridge::{BridgeError, EntryType, ExecutionContext, PerformanceEntry};
use rquickjs::function::Rest;
use rquickjs::{Ctx, Exception, Function, Object, Value};
use serde::Serialize;
use std::sync::Arc;

/// Hand a serialisable host value to script as a plain object
fn to_js<'js, T: Serialize>(ctx: &Ctx<'js>, value: &T) -> rquickjs::Result<Value<'js>> {
    let json = serde_json::to_string(value).map_err(|err| Exception::throw_internal(ctx, &err.to_string()))?;
    ctx.json_parse(json)
}

fn entries_to_js<'js>(ctx: &Ctx<'js>, entries: &[PerformanceEntry]) -> rquickjs::Result<Value<'js>> {
    to_js(ctx, &entries)
}

fn required_name<'js>(ctx: &Ctx<'js>, args: &[Value<'js>], operation: &str) -> rquickjs::Result<String> {
    if args.is_empty() {
        return Err(throw(ctx, BridgeError::missing_argument(operation, "Performance")));
    }
    Ok(opt_string(ctx, args.first())?.unwrap_or_else(|| "undefined".to_string()))
}

/// Install the `performance` global
pub fn install_performance<'js>(ctx: &Ctx<'js>, context: Arc<ExecutionContext>) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    let performance = Object::new(ctx.clone())?;

    performance.set("timeOrigin", context.timeline().time_origin())?;

    // performance.now()
    let execution = context.clone();
    performance.set("now", Function::new(ctx.clone(), move || -> rquickjs::Result<f64> {
        Ok(execution.timeline().now())
    })?)?;

    // performance.toJSON()
    let execution = context.clone();
    performance.set("toJSON", Function::new(ctx.clone(), move |ctx: Ctx<'js>| -> rquickjs::Result<Value<'js>> {
        let snapshot = execution.timeline().to_json();
        to_js(&ctx, &snapshot)
    })?)?;

    // performance.mark(name, startTime?)
    let execution = context.clone();
    performance.set("mark", Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
        let name = required_name(&ctx, &args, "mark")?;
        let start_time = args.get(1).and_then(Value::as_number);
        let entry = execution.timeline().mark(&name, start_time).clone();
        to_js(&ctx, &entry)
    })?)?;

    // performance.measure(name, startMark?, endMark?)
    let execution = context.clone();
    performance.set("measure", Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
        let name = required_name(&ctx, &args, "measure")?;
        let start_mark = opt_string(&ctx, args.get(1))?;
        let end_mark = opt_string(&ctx, args.get(2))?;
        let entry = execution
            .timeline()
            .measure(&name, start_mark.as_deref(), end_mark.as_deref())
            .cloned();
        match entry {
            Ok(entry) => to_js(&ctx, &entry),
            Err(err) => Err(throw(&ctx, err)),
        }
    })?)?;

    // performance.clearMarks(name?)
    let execution = context.clone();
    performance.set("clearMarks", Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<()> {
        let name = opt_string(&ctx, args.first())?;
        execution.timeline().clear_marks(name.as_deref());
        Ok(())
    })?)?;

    // performance.clearMeasures(name?)
    let execution = context.clone();
    performance.set("clearMeasures", Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<()> {
        let name = opt_string(&ctx, args.first())?;
        execution.timeline().clear_measures(name.as_deref());
        Ok(())
    })?)?;

    // performance.getEntries()
    let execution = context.clone();
    performance.set("getEntries", Function::new(ctx.clone(), move |ctx: Ctx<'js>| -> rquickjs::Result<Value<'js>> {
        let entries = execution.timeline().entries();
        entries_to_js(&ctx, &entries)
    })?)?;

    // performance.getEntriesByName(name)
    let execution = context.clone();
    performance.set("getEntriesByName", Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
        let name = required_name(&ctx, &args, "getEntriesByName")?;
        let entries = execution.timeline().entries_by_name(&name);
        entries_to_js(&ctx, &entries)
    })?)?;

    // performance.getEntriesByType(type)
    let execution = context.clone();
    performance.set("getEntriesByType", Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
        let kind = required_name(&ctx, &args, "getEntriesByType")?;
        let entries = match EntryType::parse(&kind) {
            Some(entry_type) => execution.timeline().entries_by_type(entry_type),
            None => Vec::new(),
        };
        entries_to_js(&ctx, &entries)
    })?)?;

    // performance.summary(), profiling builds only
    if context.config().profile {
        let execution = context.clone();
        performance.set("summary", Function::new(ctx.clone(), move || -> rquickjs::Result<f64> {
            Ok(execution.timeline().summary() as f64)
        })?)?;
    }

    globals.set("performance", performance)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fos_bridge::{BridgeConfig, HostCallGate};
    use rquickjs::{Context, Runtime};

    fn with_performance<R>(config: BridgeConfig, f: impl FnOnce(&Ctx<'_>) -> R) -> R {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let execution = Arc::new(ExecutionContext::with_gate(1, config, Arc::new(HostCallGate::new())));
        context.with(|ctx| {
            install_performance(&ctx, execution).unwrap();
            f(&ctx)
        })
    }

    #[test]
    fn test_mark_and_measure() {
        with_performance(BridgeConfig::default(), |ctx| {
            let duration: f64 = ctx
                .eval("performance.mark('a', 10); performance.mark('b', 25); performance.measure('ab', 'a', 'b').duration")
                .unwrap();
            assert_eq!(duration, 15.0);
            let count: i32 = ctx.eval("performance.getEntriesByType('measure').length").unwrap();
            assert_eq!(count, 1);
        });
    }

    #[test]
    fn test_zero_argument_type_error() {
        with_performance(BridgeConfig::default(), |ctx| {
            for call in ["mark()", "measure()", "getEntriesByName()", "getEntriesByType()"] {
                let message: String = ctx
                    .eval(format!("try {{ performance.{call}; '' }} catch (e) {{ e.name + ': ' + e.message }}"))
                    .unwrap();
                assert!(message.starts_with("TypeError"), "{call}: {message}");
                assert!(message.ends_with("1 argument required, but only 0 present."), "{call}: {message}");
            }
        });
    }

    #[test]
    fn test_missing_mark_reference_error() {
        with_performance(BridgeConfig::default(), |ctx| {
            let message: String = ctx
                .eval("try { performance.measure('m', 'nope'); '' } catch (e) { e.name + ': ' + e.message }")
                .unwrap();
            assert!(message.starts_with("ReferenceError"));
            assert!(message.contains("The mark nope does not exist"));
        });
    }

    #[test]
    fn test_entry_shape() {
        with_performance(BridgeConfig::default(), |ctx| {
            let json: String = ctx
                .eval("performance.mark('x', 3); JSON.stringify(performance.getEntriesByName('x')[0])")
                .unwrap();
            assert_eq!(json, r#"{"name":"x","entryType":"mark","startTime":3,"duration":0}"#);
        });
    }

    #[test]
    fn test_to_json_and_clear() {
        with_performance(BridgeConfig::default(), |ctx| {
            let keys: String = ctx.eval("Object.keys(performance.toJSON()).join(',')").unwrap();
            assert_eq!(keys, "now,timeOrigin");
            let left: i32 = ctx
                .eval("performance.mark('a'); performance.mark('b'); performance.clearMarks('a'); performance.getEntries().length")
                .unwrap();
            assert_eq!(left, 1);
        });
    }

    #[test]
    fn test_summary_only_when_profiling() {
        let kind: String = with_performance(BridgeConfig::default(), |ctx| ctx.eval("typeof performance.summary").unwrap());
        assert_eq!(kind, "undefined");

        let config = BridgeConfig { profile: true, ..BridgeConfig::default() };
        let recorded: f64 = with_performance(config, |ctx| ctx.eval("performance.summary()").unwrap());
        // js_context_start/js_context_end are recorded at context creation.
        assert_eq!(recorded, 1.0);
    }
}
