//! Variable scopes.
//!
//! A [`VariableFrame`] is a mutable name→value table chained to its lexical
//! parent. Frames are shared (`Rc`): closures, forked processes and
//! continuations all observe each other's writes, which is how scripts
//! communicate through variables.
//!
//! An [`UpvarReference`] is a separate chained table of aliases: it maps a
//! caller-visible name to a variable living in some other frame, implementing
//! call-by-reference parameters of custom blocks.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use anyhow::Result;

use crate::error::EvalError;
use crate::host::{Receiver, ReceiverRef};
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::Val;

pub type FrameRef = Rc<VariableFrame>;

pub struct VariableFrame {
    vars: RefCell<FastHashMap<Rc<str>, Val>>,
    // Positional placeholders bound when a reified procedure is called.
    slots: RefCell<FastHashMap<usize, Val>>,
    parent: Option<FrameRef>,
    owner: Option<Weak<dyn Receiver>>,
}

impl VariableFrame {
    pub fn new(parent: Option<FrameRef>) -> FrameRef {
        Rc::new(Self {
            vars: RefCell::new(fast_hash_map_new()),
            slots: RefCell::new(fast_hash_map_new()),
            parent,
            owner: None,
        })
    }

    /// A frame declared by a sprite or the stage.
    pub fn owned_by(owner: Weak<dyn Receiver>, parent: Option<FrameRef>) -> FrameRef {
        Rc::new(Self {
            vars: RefCell::new(fast_hash_map_new()),
            slots: RefCell::new(fast_hash_map_new()),
            parent,
            owner: Some(owner),
        })
    }

    pub fn parent(&self) -> Option<&FrameRef> {
        self.parent.as_ref()
    }

    pub fn owner(&self) -> Option<ReceiverRef> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }

    /// Declares `name` in this frame, overwriting any previous binding here.
    pub fn add_var(&self, name: &str, value: Val) {
        self.vars.borrow_mut().insert(Rc::from(name), value);
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    pub fn own_value(&self, name: &str) -> Option<Val> {
        self.vars.borrow().get(name).cloned()
    }

    /// Names declared directly in this frame, sorted.
    pub fn names(&self) -> Vec<Rc<str>> {
        let mut names: Vec<Rc<str>> = self.vars.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Closest frame along the lexical chain declaring `name`.
    pub fn silent_find(self: &Rc<Self>, name: &str) -> Option<FrameRef> {
        let mut cur = self;
        loop {
            if cur.has_own(name) {
                return Some(cur.clone());
            }
            match &cur.parent {
                Some(parent) => cur = parent,
                None => return None,
            }
        }
    }

    /// Lexical lookup first; when that fails and the caller supplies the
    /// frame of its dynamic caller, the lookup is retried along that chain.
    pub fn find(self: &Rc<Self>, name: &str, dynamic: Option<&FrameRef>) -> Result<FrameRef> {
        if let Some(frame) = self.silent_find(name) {
            return Ok(frame);
        }
        if let Some(frame) = dynamic.and_then(|caller| caller.silent_find(name)) {
            return Ok(frame);
        }
        Err(EvalError::UndeclaredVariable(name.to_string()).into())
    }

    pub fn get_var(self: &Rc<Self>, name: &str, upvars: Option<&UpvarReference>, dynamic: Option<&FrameRef>) -> Result<Val> {
        if let Some(value) = upvars.and_then(|table| table.get_var(name)) {
            return Ok(value);
        }
        let frame = self.find(name, dynamic)?;
        Ok(frame.own_value(name).unwrap_or_default())
    }

    /// Assigns at the frame where `name` is declared. Fails if no frame in
    /// scope declares it.
    pub fn set_var(
        self: &Rc<Self>,
        name: &str,
        value: Val,
        upvars: Option<&UpvarReference>,
        dynamic: Option<&FrameRef>,
    ) -> Result<()> {
        if let Some((real, frame)) = upvars.and_then(|table| table.find(name)) {
            frame.add_var(real, value);
            return Ok(());
        }
        let frame = self.find(name, dynamic)?;
        frame.add_var(name, value);
        Ok(())
    }

    /// Numeric increment of an existing variable.
    pub fn change_var(
        self: &Rc<Self>,
        name: &str,
        delta: &Val,
        upvars: Option<&UpvarReference>,
        dynamic: Option<&FrameRef>,
    ) -> Result<()> {
        let current = self.get_var(name, upvars, dynamic)?;
        let next = Val::Num(current.to_number() + delta.to_number());
        self.set_var(name, next, upvars, dynamic)
    }

    pub fn bind_slot(&self, id: usize, value: Val) {
        self.slots.borrow_mut().insert(id, value);
    }

    /// Value bound to placeholder `id` along the lexical chain.
    pub fn get_slot(self: &Rc<Self>, id: usize) -> Option<Val> {
        let mut cur = self;
        loop {
            if let Some(value) = cur.slots.borrow().get(&id) {
                return Some(value.clone());
            }
            match &cur.parent {
                Some(parent) => cur = parent,
                None => return None,
            }
        }
    }
}

impl std::fmt::Debug for VariableFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableFrame")
            .field("vars", &self.names())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// Chained alias table: `alias → (real name, owning frame)`.
#[derive(Default)]
pub struct UpvarReference {
    vars: FastHashMap<Rc<str>, (Rc<str>, FrameRef)>,
    parent: Option<Rc<UpvarReference>>,
}

impl UpvarReference {
    pub fn new(parent: Option<Rc<UpvarReference>>) -> Self {
        Self {
            vars: fast_hash_map_new(),
            parent,
        }
    }

    pub fn add_reference(&mut self, alias: &str, real_name: &str, frame: FrameRef) {
        self.vars.insert(Rc::from(alias), (Rc::from(real_name), frame));
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Nearest alias entry for `alias`, searching enclosing tables outward.
    pub fn find(&self, alias: &str) -> Option<(&str, &FrameRef)> {
        let mut cur = self;
        loop {
            if let Some((real, frame)) = cur.vars.get(alias) {
                return Some((&**real, frame));
            }
            match &cur.parent {
                Some(parent) => cur = parent,
                None => return None,
            }
        }
    }

    pub fn get_var(&self, alias: &str) -> Option<Val> {
        self.find(alias)
            .map(|(real, frame)| frame.own_value(real).unwrap_or_default())
    }
}

impl std::fmt::Debug for UpvarReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut aliases: Vec<(&str, &str)> = self.vars.iter().map(|(k, (v, _))| (&**k, &**v)).collect();
        aliases.sort();
        f.debug_struct("UpvarReference")
            .field("aliases", &aliases)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
