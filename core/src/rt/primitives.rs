//! Selectors the process implements itself. Anything not in the table is
//! forwarded to the receiver's `perform`.

use std::cmp::Ordering;
use std::rc::Rc;

use anyhow::Result;
use once_cell::sync::Lazy;

use crate::block::{BlockKind, BlockRef, CUSTOM_BLOCK_SELECTOR};
use crate::error::EvalError;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::{ListRef, Val};

use super::context::ProcBody;
use super::process::{Outcome, Process};
use super::threads::ThreadManager;

type Primitive = fn(&mut Process, &BlockRef, &[Val], &mut ThreadManager) -> Result<Outcome>;

fn arg(inputs: &[Val], index: usize) -> Val {
    inputs.get(index).cloned().unwrap_or_default()
}

/// Arguments gathered by a variadic slot.
fn arg_list(inputs: &[Val], index: usize) -> Vec<Val> {
    match arg(inputs, index) {
        Val::List(list) => list.borrow().clone(),
        Val::Nil => Vec::new(),
        other => vec![other],
    }
}

fn param_names(inputs: &[Val], index: usize) -> Vec<Rc<str>> {
    arg_list(inputs, index)
        .iter()
        .map(|name| Rc::from(name.to_string()))
        .collect()
}

fn script_node(value: Val) -> Option<BlockRef> {
    match value {
        Val::Script(block) => Some(block),
        _ => None,
    }
}

fn number(value: f64) -> Result<Outcome> {
    Ok(Outcome::Value(Val::Num(value)))
}

fn boolean(value: bool) -> Result<Outcome> {
    Ok(Outcome::Value(Val::Bool(value)))
}

static PRIMITIVES: Lazy<FastHashMap<&'static str, Primitive>> = Lazy::new(|| {
    let mut map: FastHashMap<&'static str, Primitive> = fast_hash_map_new();
    // control
    map.insert("doIf", |p, _, a, _| Ok(p.do_if(&arg(a, 0), &arg(a, 1))));
    map.insert("doIfElse", |p, _, a, _| Ok(p.do_if_else(&arg(a, 0), &arg(a, 1), &arg(a, 2))));
    map.insert("doForever", |p, _, a, _| Ok(p.do_forever(&arg(a, 0))));
    map.insert("doRepeat", |p, _, a, _| Ok(p.do_repeat(&arg(a, 0), &arg(a, 1))));
    map.insert("doUntil", |p, _, a, _| Ok(p.do_until(&arg(a, 0), &arg(a, 1))));
    map.insert("doWaitUntil", |p, _, a, _| Ok(p.do_wait_until(&arg(a, 0))));
    map.insert("doWarp", |p, _, a, _| Ok(p.do_warp(&arg(a, 0))));
    map.insert("doWait", |p, _, a, _| Ok(p.do_wait(&arg(a, 0))));
    map.insert("doGlide", |p, _, a, _| Ok(p.do_glide(&arg(a, 0), &arg(a, 1), &arg(a, 2))));
    map.insert("doSayFor", |p, _, a, _| Ok(p.do_talk_for(&arg(a, 0), &arg(a, 1), false)));
    map.insert("doThinkFor", |p, _, a, _| Ok(p.do_talk_for(&arg(a, 0), &arg(a, 1), true)));
    map.insert("doPlaySoundUntilDone", |p, _, a, _| Ok(p.do_play_sound_until_done(&arg(a, 0))));
    map.insert("doBroadcast", |p, _, a, t| Ok(p.do_broadcast(&arg(a, 0), t)));
    map.insert("doBroadcastAndWait", |p, _, a, t| Ok(p.do_broadcast_and_wait(&arg(a, 0), t)));
    map.insert("doAsk", |p, _, a, t| Ok(p.do_ask(&arg(a, 0), t)));
    map.insert("reportLastAnswer", |_, _, _, t| Ok(Outcome::Value(t.last_answer().clone())));
    map.insert("doStop", |p, _, _, _| Ok(p.do_stop()));
    map.insert("doStopAll", |p, _, _, t| Ok(p.do_stop_all(t)));
    map.insert("doStopBlock", |p, _, _, _| Ok(p.do_report(None)));
    map.insert("doReport", |p, _, a, _| Ok(p.do_report(Some(arg(a, 0)))));
    // procedures
    map.insert("doRun", |p, _, a, _| p.evaluate(&arg(a, 0), arg_list(a, 1), true));
    map.insert("evaluate", |p, _, a, _| p.evaluate(&arg(a, 0), arg_list(a, 1), false));
    map.insert("doLaunch", |p, _, a, t| p.fork(&arg(a, 0), arg_list(a, 1), t));
    map.insert("doCallCC", |p, _, a, _| {
        let cont = p.capture_continuation(false);
        p.evaluate(&arg(a, 0), vec![cont], true)
    });
    map.insert("reportCallCC", |p, _, a, _| {
        let cont = p.capture_continuation(true);
        p.evaluate(&arg(a, 0), vec![cont], false)
    });
    map.insert("reifyScript", |p, _, a, _| {
        let proc = p.reify(script_node(arg(a, 0)).as_ref(), param_names(a, 1), ProcBody::Nothing);
        Ok(Outcome::Value(proc))
    });
    map.insert("reifyReporter", |p, _, a, _| {
        let proc = p.reify(script_node(arg(a, 0)).as_ref(), param_names(a, 1), ProcBody::Slot(1));
        Ok(Outcome::Value(proc))
    });
    map.insert("reifyPredicate", |p, _, a, _| {
        let proc = p.reify(script_node(arg(a, 0)).as_ref(), param_names(a, 1), ProcBody::Slot(1));
        Ok(Outcome::Value(proc))
    });
    map.insert(CUSTOM_BLOCK_SELECTOR, |p, b, a, _| p.evaluate_custom_block(b, a));
    // variables
    map.insert("reportGetVar", |p, _, a, _| p.get_var(&arg(a, 0)).map(Outcome::Value));
    map.insert("doSetVar", |p, _, a, _| p.set_var(&arg(a, 0), arg(a, 1)).map(|_| Outcome::Done));
    map.insert("doChangeVar", |p, _, a, _| p.change_var(&arg(a, 0), &arg(a, 1)).map(|_| Outcome::Done));
    map.insert("doDeclareVariables", |p, _, a, _| {
        p.declare_variables(&arg_list(a, 0));
        Ok(Outcome::Done)
    });
    // operators
    map.insert("reportSum", |_, _, a, _| number(arg(a, 0).to_number() + arg(a, 1).to_number()));
    map.insert("reportDifference", |_, _, a, _| number(arg(a, 0).to_number() - arg(a, 1).to_number()));
    map.insert("reportProduct", |_, _, a, _| number(arg(a, 0).to_number() * arg(a, 1).to_number()));
    map.insert("reportQuotient", |_, _, a, _| number(arg(a, 0).to_number() / arg(a, 1).to_number()));
    map.insert("reportModulus", |_, _, a, _| Ok(Outcome::Value(arg(a, 0).modulus(&arg(a, 1)))));
    map.insert("reportLessThan", |_, _, a, _| boolean(arg(a, 0).compare(&arg(a, 1)) == Some(Ordering::Less)));
    map.insert("reportGreaterThan", |_, _, a, _| boolean(arg(a, 0).compare(&arg(a, 1)) == Some(Ordering::Greater)));
    map.insert("reportEquals", |_, _, a, _| boolean(arg(a, 0).snap_equals(&arg(a, 1))));
    map.insert("reportNot", |_, _, a, _| boolean(!arg(a, 0).is_truthy()));
    map.insert("reportJoinWords", |_, _, a, _| {
        let joined: String = arg_list(a, 0).iter().map(|v| v.to_string()).collect();
        Ok(Outcome::Value(Val::from(joined)))
    });
    // lists
    map.insert("reportNewList", |_, _, a, _| Ok(Outcome::Value(Val::list(arg_list(a, 0)))));
    map.insert("reportListItem", |_, _, a, _| list_item(&arg(a, 0), &arg(a, 1)).map(Outcome::Value));
    map.insert("reportListLength", |_, _, a, _| {
        let list = expect_list(&arg(a, 0))?;
        number(list.borrow().len() as f64)
    });
    map.insert("doAddToList", |_, _, a, _| {
        let list = expect_list(&arg(a, 1))?;
        list.borrow_mut().push(arg(a, 0));
        Ok(Outcome::Done)
    });
    map
});

/// True if `selector` is evaluated by the process rather than the receiver.
pub fn is_process_primitive(selector: &str) -> bool {
    PRIMITIVES.contains_key(selector)
}

fn expect_list(value: &Val) -> Result<ListRef> {
    value
        .as_list()
        .cloned()
        .ok_or_else(|| EvalError::Primitive(format!("expecting a list but getting {}", value.type_name())).into())
}

/// One-based item access; out-of-range indices answer nothing.
fn list_item(index: &Val, list: &Val) -> Result<Val> {
    let list = expect_list(list)?;
    let items = list.borrow();
    let position = index.to_number();
    if !(position >= 1.0) {
        return Ok(Val::Nil);
    }
    Ok(items.get(position as usize - 1).cloned().unwrap_or_default())
}

impl Process {
    /// Runs the primitive behind `block` with its evaluated inputs.
    pub(super) fn invoke(&mut self, block: &BlockRef, inputs: &[Val], threads: &mut ThreadManager) -> Result<Outcome> {
        if let Some(primitive) = PRIMITIVES.get(&*block.selector) {
            return primitive(self, block, inputs, threads);
        }
        if block.kind == BlockKind::Hat {
            return Ok(Outcome::Done);
        }
        let receiver = self.current_receiver();
        let value = receiver.perform(&block.selector, inputs)?;
        if block.kind.is_reporter() {
            Ok(Outcome::Value(value))
        } else {
            Ok(Outcome::Done)
        }
    }

    fn get_var(&self, name: &Val) -> Result<Val> {
        let Some(ctx) = self.stack.last() else {
            return Ok(Val::Nil);
        };
        let dynamic = self.dynamic_frame();
        ctx.variables
            .get_var(&name.to_string(), ctx.upvars.as_deref(), dynamic.as_ref())
    }

    fn set_var(&self, name: &Val, value: Val) -> Result<()> {
        let Some(ctx) = self.stack.last() else {
            return Ok(());
        };
        let dynamic = self.dynamic_frame();
        ctx.variables
            .set_var(&name.to_string(), value, ctx.upvars.as_deref(), dynamic.as_ref())
    }

    fn change_var(&self, name: &Val, delta: &Val) -> Result<()> {
        let Some(ctx) = self.stack.last() else {
            return Ok(());
        };
        let dynamic = self.dynamic_frame();
        ctx.variables
            .change_var(&name.to_string(), delta, ctx.upvars.as_deref(), dynamic.as_ref())
    }

    /// Script variables start at zero in the frame the script runs in.
    fn declare_variables(&self, names: &[Val]) {
        if let Some(ctx) = self.stack.last() {
            for name in names {
                ctx.variables.add_var(&name.to_string(), Val::Num(0.0));
            }
        }
    }
}
