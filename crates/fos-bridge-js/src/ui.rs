//! UI Command Helpers
//!
//! Script-side writers for the command queue: inline styles, attributes and
//! the explicit flush.

use crate::{opt_string, throw};
use fos_bridge::{BridgeError, CommandKind, ExecutionContext, StyleDeclaration};
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Inline styles by target id
type StyleMap = Rc<RefCell<HashMap<i64, StyleDeclaration>>>;

fn target_id<'js>(ctx: &Ctx<'js>, args: &[Value<'js>], operation: &str) -> rquickjs::Result<i64> {
    match args.first().and_then(Value::as_number) {
        Some(id) => Ok(id as i64),
        None => Err(throw(ctx, BridgeError::missing_argument(operation, "UICommand"))),
    }
}

fn required_string<'js>(ctx: &Ctx<'js>, args: &[Value<'js>], index: usize, operation: &str) -> rquickjs::Result<String> {
    match opt_string(ctx, args.get(index))? {
        Some(text) => Ok(text),
        None => Err(throw(ctx, BridgeError::missing_argument(operation, "UICommand"))),
    }
}

/// Install `setStyle`, `setAttribute`, `removeAttribute` and `flushUICommand`
pub fn install_ui_commands<'js>(ctx: &Ctx<'js>, target: &Object<'js>, context: Arc<ExecutionContext>) -> rquickjs::Result<()> {
    // setStyle(targetId, name, value); an empty value removes the property
    let execution = context.clone();
    let styles: StyleMap = Rc::default();
    target.set("setStyle", Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<()> {
        let id = target_id(&ctx, &args, "setStyle")?;
        let name = required_string(&ctx, &args, 1, "setStyle")?;
        let value = opt_string(&ctx, args.get(2))?.unwrap_or_default();

        let mut styles = styles.borrow_mut();
        let style = styles.entry(id).or_insert_with(|| StyleDeclaration::new(execution.clone(), id));
        let result = if value.is_empty() {
            style.remove_property(&name).map(drop)
        } else {
            style.set_property(&name, &value)
        };
        result.map_err(|err| throw(&ctx, err))
    })?)?;

    // setAttribute(targetId, name, value)
    let execution = context.clone();
    target.set("setAttribute", Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<()> {
        let id = target_id(&ctx, &args, "setAttribute")?;
        let name = execution.atoms().intern(&required_string(&ctx, &args, 1, "setAttribute")?);
        let value = opt_string(&ctx, args.get(2))?.unwrap_or_default();
        execution
            .queue()
            .append(id, CommandKind::SetAttribute, Some(name.as_str()), Some(value.as_str()), None)
            .map_err(|err| throw(&ctx, err))
    })?)?;

    // removeAttribute(targetId, name)
    let execution = context.clone();
    target.set("removeAttribute", Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<()> {
        let id = target_id(&ctx, &args, "removeAttribute")?;
        let name = execution.atoms().intern(&required_string(&ctx, &args, 1, "removeAttribute")?);
        execution
            .queue()
            .append(id, CommandKind::RemoveAttribute, Some(name.as_str()), None, None)
            .map_err(|err| throw(&ctx, err))
    })?)?;

    // flushUICommand()
    let execution = context;
    target.set("flushUICommand", Function::new(ctx.clone(), move || -> rquickjs::Result<bool> {
        let pending = execution.queue().flush();
        execution.services().flush_ui_command(execution.id());
        Ok(pending)
    })?)?;

    Ok(())
}
