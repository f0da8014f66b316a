//! Block tree contract consumed by the evaluator.
//!
//! Blocks are built by an external editor or loader and never mutated after
//! construction; the evaluator only reads them, or makes tagged copies when a
//! block is reified into a procedure.

use std::cell::RefCell;
use std::rc::Rc;

use crate::val::Val;

pub type BlockRef = Rc<Block>;

/// Selectors whose unevaluated inputs are passed through raw so the primitive
/// can bind explicit parameter names.
pub const REIFY_SELECTORS: [&str; 3] = ["reifyScript", "reifyReporter", "reifyPredicate"];

pub const CUSTOM_BLOCK_SELECTOR: &str = "evaluateCustomBlock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Command,
    Reporter,
    Predicate,
    Hat,
}

impl BlockKind {
    /// Reporters and predicates produce a value; commands and hats do not.
    pub fn is_reporter(self) -> bool {
        matches!(self, BlockKind::Reporter | BlockKind::Predicate)
    }
}

/// An input slot of a block.
#[derive(Debug, Clone)]
pub enum Input {
    /// A literal typed into the slot.
    Value(Val),
    /// An empty slot; becomes a positional placeholder when reified.
    Empty,
    /// A nested reporter, evaluated before the owning block runs.
    Block(BlockRef),
    /// A static C-slot. Its script is handed to the primitive as-is.
    Script(Option<BlockRef>),
    /// An unevaluated slot. Its contents are reified into a procedure.
    Lambda(Option<BlockRef>),
    /// A variadic slot, evaluated into a list.
    Multi(Rc<[Input]>),
    /// An empty slot tagged with a positional binding id during reification.
    Bound(usize),
}

impl Input {
    pub fn num(n: f64) -> Self {
        Input::Value(Val::Num(n))
    }

    pub fn text(s: &str) -> Self {
        Input::Value(Val::str(s))
    }

    pub fn multi(items: Vec<Input>) -> Self {
        Input::Multi(items.into())
    }

    fn copy_tagged(&self, counter: &mut usize) -> Input {
        match self {
            Input::Empty => {
                *counter += 1;
                Input::Bound(*counter)
            }
            Input::Block(block) => Input::Block(Rc::new(block.copy_tagged(counter))),
            Input::Script(Some(block)) => Input::Script(Some(Rc::new(block.copy_tagged(counter)))),
            Input::Lambda(Some(block)) => Input::Lambda(Some(Rc::new(block.copy_tagged(counter)))),
            Input::Multi(items) => Input::Multi(items.iter().map(|item| item.copy_tagged(counter)).collect()),
            other => other.clone(),
        }
    }
}

/// Declared type of a custom block's formal parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotType {
    /// `%s`: evaluated value.
    Value,
    /// `%upvar`: the caller names a variable that aliases this parameter.
    Upvar,
    /// `%anyUE`: the argument arrives reified as a reporter.
    Unevaluated,
    /// `%cs`: the argument arrives reified as a command script.
    Script,
}

impl SlotType {
    pub fn spec(self) -> &'static str {
        match self {
            SlotType::Value => "%s",
            SlotType::Upvar => "%upvar",
            SlotType::Unevaluated => "%anyUE",
            SlotType::Script => "%cs",
        }
    }

    pub fn from_spec(spec: &str) -> Option<Self> {
        match spec {
            "%s" | "%n" | "%b" | "%txt" => Some(SlotType::Value),
            "%upvar" => Some(SlotType::Upvar),
            "%anyUE" | "%boolUE" | "%repRing" => Some(SlotType::Unevaluated),
            "%cs" | "%cmdRing" => Some(SlotType::Script),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: Rc<str>,
    pub slot: SlotType,
    pub default: Val,
}

impl ParamDecl {
    pub fn new(name: &str, slot: SlotType) -> Self {
        Self {
            name: Rc::from(name),
            slot,
            default: Val::Nil,
        }
    }

    pub fn with_default(mut self, default: Val) -> Self {
        self.default = default;
        self
    }
}

/// A user-defined block: its formal parameters and the script it runs.
///
/// The body is settable after construction so that a definition can call
/// itself.
pub struct CustomBlockDefinition {
    pub name: Rc<str>,
    pub kind: BlockKind,
    pub declarations: Vec<ParamDecl>,
    body: RefCell<Option<BlockRef>>,
}

impl CustomBlockDefinition {
    pub fn new(name: &str, kind: BlockKind, declarations: Vec<ParamDecl>, body: Option<BlockRef>) -> Rc<Self> {
        Rc::new(Self {
            name: Rc::from(name),
            kind,
            declarations,
            body: RefCell::new(body),
        })
    }

    pub fn body(&self) -> Option<BlockRef> {
        self.body.borrow().clone()
    }

    pub fn set_body(&self, body: Option<BlockRef>) {
        *self.body.borrow_mut() = body;
    }

    /// Declared type of the input slot at `index`.
    pub fn slot_at(&self, index: usize) -> Option<SlotType> {
        self.declarations.get(index).map(|decl| decl.slot)
    }
}

impl std::fmt::Debug for CustomBlockDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomBlockDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("declarations", &self.declarations)
            .field("has_body", &self.body.borrow().is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub selector: Rc<str>,
    pub kind: BlockKind,
    pub inputs: Vec<Input>,
    /// The following command in the same script.
    pub next: Option<BlockRef>,
    /// Set on custom block instances.
    pub definition: Option<Rc<CustomBlockDefinition>>,
}

impl Block {
    pub fn new(selector: &str, kind: BlockKind) -> Self {
        Self {
            selector: Rc::from(selector),
            kind,
            inputs: Vec::new(),
            next: None,
            definition: None,
        }
    }

    pub fn command(selector: &str) -> Self {
        Self::new(selector, BlockKind::Command)
    }

    pub fn reporter(selector: &str) -> Self {
        Self::new(selector, BlockKind::Reporter)
    }

    pub fn predicate(selector: &str) -> Self {
        Self::new(selector, BlockKind::Predicate)
    }

    pub fn hat(selector: &str) -> Self {
        Self::new(selector, BlockKind::Hat)
    }

    /// An instance of a custom block.
    pub fn custom(definition: &Rc<CustomBlockDefinition>) -> Self {
        let mut block = Self::new(CUSTOM_BLOCK_SELECTOR, definition.kind);
        block.definition = Some(definition.clone());
        block
    }

    /// Variable getter for `name`.
    pub fn var(name: &str) -> Self {
        Self::reporter("reportGetVar").text(name)
    }

    pub fn input(mut self, input: Input) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn num(self, n: f64) -> Self {
        self.input(Input::num(n))
    }

    pub fn text(self, s: &str) -> Self {
        self.input(Input::text(s))
    }

    pub fn value(self, v: Val) -> Self {
        self.input(Input::Value(v))
    }

    pub fn empty(self) -> Self {
        self.input(Input::Empty)
    }

    /// Nested reporter input.
    pub fn arg(self, block: Block) -> Self {
        self.input(Input::Block(Rc::new(block)))
    }

    /// Static C-slot holding `blocks` as a script.
    pub fn script(self, blocks: Vec<Block>) -> Self {
        self.input(Input::Script(chain(blocks)))
    }

    /// Unevaluated slot holding a single reporter.
    pub fn lambda(self, block: Block) -> Self {
        self.input(Input::Lambda(Some(Rc::new(block))))
    }

    /// Unevaluated slot holding a command script.
    pub fn lambda_script(self, blocks: Vec<Block>) -> Self {
        self.input(Input::Lambda(chain(blocks)))
    }

    pub fn into_ref(self) -> BlockRef {
        Rc::new(self)
    }

    pub fn is_ring(&self) -> bool {
        REIFY_SELECTORS.contains(&&*self.selector)
    }

    /// The script starting at this block, following `next` links.
    pub fn sequence(self: &Rc<Self>) -> Rc<[BlockRef]> {
        let mut seq = vec![self.clone()];
        let mut cur = self.next.clone();
        while let Some(block) = cur {
            cur = block.next.clone();
            seq.push(block);
        }
        seq.into()
    }

    /// Deep copy whose empty slots carry positional binding ids, numbered in
    /// visiting order. Rings nested inside keep their own empty slots.
    pub fn tag_empty_slots(&self) -> (BlockRef, usize) {
        let mut counter = 0;
        let copy = self.copy_tagged(&mut counter);
        (Rc::new(copy), counter)
    }

    /// Copy with the input at `index` replaced.
    pub fn with_input(&self, index: usize, input: Input) -> Block {
        let mut copy = self.clone();
        if let Some(slot) = copy.inputs.get_mut(index) {
            *slot = input;
        }
        copy
    }

    fn copy_tagged(&self, counter: &mut usize) -> Block {
        let inputs = if self.is_ring() {
            self.inputs.clone()
        } else {
            self.inputs.iter().map(|input| input.copy_tagged(counter)).collect()
        };
        Block {
            selector: self.selector.clone(),
            kind: self.kind,
            inputs,
            next: self.next.as_ref().map(|next| Rc::new(next.copy_tagged(counter))),
            definition: self.definition.clone(),
        }
    }
}

/// Links `blocks` into one script through their `next` fields and returns
/// its first block.
pub fn chain<I>(blocks: I) -> Option<BlockRef>
where
    I: IntoIterator<Item = Block>,
    I::IntoIter: DoubleEndedIterator,
{
    let mut next: Option<BlockRef> = None;
    for mut block in blocks.into_iter().rev() {
        block.next = next;
        next = Some(Rc::new(block));
    }
    next
}
