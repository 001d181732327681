//! Edge case tests for fos-bridge-js
//!
//! Script-facing behaviour of the bridge: module listeners, host module
//! calls, error reporting and teardown.

use fos_bridge::*;
use fos_bridge_js::*;
use std::sync::{Arc, Mutex};

fn bridge_with(gate: Arc<HostCallGate>) -> JsBridge {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let context = ExecutionContext::with_gate(1, BridgeConfig::default(), gate);
    JsBridge::new(Arc::new(context)).unwrap()
}

fn bridge() -> JsBridge {
    bridge_with(Arc::new(HostCallGate::new()))
}

fn string(bridge: &JsBridge, code: &str) -> String {
    match bridge.eval(code).unwrap() {
        JsValue::String(s) => s,
        other => panic!("Expected string, got {other:?}"),
    }
}

// ============================================================================
// MODULE LISTENER EDGE CASES
// ============================================================================

#[test]
fn test_listeners_called_in_registration_order() {
    let bridge = bridge();
    bridge
        .exec(
            "globalThis.order = [];\
             ['L1', 'L2', 'L3'].forEach(n => __bridge__.addModuleListener(() => order.push(n)));",
        )
        .unwrap();

    let report = bridge.invoke_module_event("Battery", None, None).unwrap();
    assert_eq!(report.delivered, 3);
    assert_eq!(string(&bridge, "order.join(',')"), "L1,L2,L3");
}

#[test]
fn test_unregistered_listener_skipped() {
    let bridge = bridge();
    bridge
        .exec(
            "globalThis.order = [];\
             __bridge__.addModuleListener(() => order.push('L1'));\
             const l2 = __bridge__.addModuleListener(() => order.push('L2'));\
             __bridge__.addModuleListener(() => order.push('L3'));\
             __bridge__.removeModuleListener(l2);",
        )
        .unwrap();

    bridge.invoke_module_event("Battery", None, None).unwrap();
    assert_eq!(string(&bridge, "order.join(',')"), "L1,L3");
    assert_eq!(bridge.listener_count(), 2);
}

#[test]
fn test_listener_removing_later_listener() {
    let bridge = bridge();
    bridge
        .exec(
            "globalThis.order = [];\
             let l3;\
             __bridge__.addModuleListener(() => { order.push('L1'); __bridge__.removeModuleListener(l3); });\
             __bridge__.addModuleListener(() => order.push('L2'));\
             l3 = __bridge__.addModuleListener(() => order.push('L3'));",
        )
        .unwrap();

    let report = bridge.invoke_module_event("Battery", None, None).unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(string(&bridge, "order.join(',')"), "L1,L2");
}

#[test]
fn test_malformed_extra_delivers_null() {
    let bridge = bridge();
    bridge
        .exec("globalThis.extras = []; __bridge__.addModuleListener((m, e, x) => extras.push(x));")
        .unwrap();

    bridge.invoke_module_event("Net", Some("change"), Some("{oops")).unwrap();
    bridge.invoke_module_event("Net", Some("change"), Some(r#"{"online":true}"#)).unwrap();
    assert_eq!(string(&bridge, "JSON.stringify(extras)"), r#"[null,{"online":true}]"#);
}

#[test]
fn test_throwing_listener_reported_and_fan_out_continues() {
    let gate = Arc::new(HostCallGate::new());
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    gate.register_service(
        ServiceName::OnJsError,
        Arc::new(move |_: ContextId, args: &[HostArg]| {
            if let Some(HostArg::Str(message)) = args.first() {
                sink.lock().unwrap().push(message.clone());
            }
            HostReply::Void
        }),
    )
    .unwrap();
    gate.capture_current().unwrap();

    let bridge = bridge_with(gate);
    bridge
        .exec(
            "globalThis.reached = false;\
             __bridge__.addModuleListener(() => { throw new TypeError('bad listener'); });\
             __bridge__.addModuleListener(() => { reached = true; });",
        )
        .unwrap();

    let report = bridge.invoke_module_event("M", None, None).unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(bridge.eval("reached").unwrap(), JsValue::Bool(true));

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("bad listener"));
}

#[test]
fn test_remove_listener_with_fractional_id() {
    let bridge = bridge();
    let id = match bridge.eval("__bridge__.addModuleListener(() => {})").unwrap() {
        JsValue::Number(id) => id,
        other => panic!("Expected number, got {other:?}"),
    };

    let removed = bridge.eval(&format!("__bridge__.removeModuleListener({id} + 0.5)")).unwrap();
    assert_eq!(removed, JsValue::Bool(false));
    assert_eq!(bridge.eval("__bridge__.removeModuleListener(NaN)").unwrap(), JsValue::Bool(false));
    assert_eq!(bridge.listener_count(), 1);

    let removed = bridge.eval(&format!("__bridge__.removeModuleListener({id})")).unwrap();
    assert_eq!(removed, JsValue::Bool(true));
    assert_eq!(bridge.listener_count(), 0);
}

#[test]
fn test_disposed_context_rejects_dispatch() {
    let bridge = bridge();
    bridge.exec("__bridge__.addModuleListener(() => {});").unwrap();
    bridge.execution_context().dispose();

    let err = bridge.invoke_module_event("M", None, None).unwrap_err();
    assert!(matches!(err, JsError::Bridge(BridgeError::ContextDisposed(1))));
    assert_eq!(bridge.listener_count(), 0);
}

#[test]
fn test_drop_with_live_listeners() {
    let bridge = bridge();
    bridge
        .exec("for (let i = 0; i < 10; i++) __bridge__.addModuleListener(() => i);")
        .unwrap();
    assert_eq!(bridge.listener_count(), 10);
    drop(bridge);
}

// ============================================================================
// HOST MODULE EDGE CASES
// ============================================================================

#[test]
fn test_invoke_module_on_host_thread() {
    let gate = Arc::new(HostCallGate::new());
    gate.register_service(
        ServiceName::InvokeModule,
        Arc::new(|_: ContextId, args: &[HostArg]| {
            let parts: Vec<String> = args
                .iter()
                .map(|arg| match arg {
                    HostArg::Str(s) => s.clone(),
                    other => format!("{other:?}"),
                })
                .collect();
            HostReply::Str(parts.join("|"))
        }),
    )
    .unwrap();
    gate.capture_current().unwrap();

    let bridge = bridge_with(gate);
    assert_eq!(
        string(&bridge, "__bridge__.invokeModule('Clipboard', 'writeText', {text: 'hi'})"),
        r#"Clipboard|writeText|{"text":"hi"}"#
    );
    assert_eq!(
        string(&bridge, "__bridge__.invokeModule('Clipboard', 'readText')"),
        "Clipboard|readText"
    );
}

#[test]
fn test_invoke_module_without_host_returns_null() {
    let bridge = bridge();
    assert_eq!(bridge.eval("__bridge__.invokeModule('A', 'b')").unwrap(), JsValue::Null);
    assert_eq!(string(&bridge, "typeof __bridge__.invokeModule('A', 'b', {x: 1})"), "object");
    assert_eq!(
        string(&bridge, "try { __bridge__.invokeModule('A'); '' } catch (e) { e.name }"),
        "TypeError"
    );
}

// ============================================================================
// EVALUATION EDGE CASES
// ============================================================================

#[test]
fn test_empty_code() {
    let bridge = bridge();
    assert_eq!(bridge.eval("").unwrap(), JsValue::Undefined);
}

#[test]
fn test_unicode_strings() {
    let bridge = bridge();
    assert_eq!(string(&bridge, "'Hello 世界 🌍'"), "Hello 世界 🌍");
}

#[test]
fn test_performance_measure_from_script() {
    let bridge = bridge();
    let value = bridge
        .eval("performance.mark('a', 100); performance.mark('b', 250); performance.measure('m', 'a', 'b').duration")
        .unwrap();
    assert_eq!(value, JsValue::Number(150.0));

    let err = bridge.eval("performance.measure('m', 'missing')").unwrap_err();
    assert!(matches!(err, JsError::Reference(ref message) if message.contains("missing")));
}

#[test]
fn test_named_script_error_reported() {
    let gate = Arc::new(HostCallGate::new());
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    gate.register_service(
        ServiceName::OnJsError,
        Arc::new(move |_: ContextId, args: &[HostArg]| {
            if let Some(HostArg::Str(message)) = args.first() {
                sink.lock().unwrap().push(message.clone());
            }
            HostReply::Void
        }),
    )
    .unwrap();
    gate.capture_current().unwrap();

    let bridge = bridge_with(gate);
    let err = bridge.evaluate_script("throw new RangeError('too far');", "app://main.js").unwrap_err();
    assert!(matches!(err, JsError::Range(ref message) if message == "too far"));
    assert_eq!(errors.lock().unwrap().len(), 1);
}

#[test]
fn test_byte_code_runs_in_fresh_bridge() {
    let compiled = bridge()
        .dump_byte_code("globalThis.booted = performance.now() >= 0;", "app://boot.js")
        .unwrap();

    let bridge = bridge();
    unsafe { bridge.evaluate_byte_code(&compiled) }.unwrap();
    assert_eq!(bridge.eval("booted").unwrap(), JsValue::Bool(true));
}

#[test]
fn test_promise_jobs_run() {
    let bridge = bridge();
    bridge.exec("globalThis.done = false; Promise.resolve().then(() => { done = true; });").unwrap();
    bridge.run_pending_jobs().unwrap();
    assert_eq!(bridge.eval("done").unwrap(), JsValue::Bool(true));
}
