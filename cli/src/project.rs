//! JSON project files: sprites with their variables and scripts, plus custom
//! block definitions shared by every sprite.
//!
//! ```json
//! {
//!   "variables": { "score": 0 },
//!   "blocks": [
//!     { "name": "double %n", "kind": "reporter",
//!       "params": [{ "name": "n" }],
//!       "body": [{ "selector": "reportProduct", "kind": "reporter",
//!                  "inputs": [{ "var": "n" }, 2] }] }
//!   ],
//!   "sprites": [
//!     { "name": "Cat", "variables": { "x": 0 },
//!       "scripts": [[
//!         { "selector": "receiveGo" },
//!         { "selector": "bubble", "inputs": [{ "custom": "double %n", "inputs": [21] }] }
//!       ]] }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result, anyhow, bail};
use blockrt_core::block::chain;
use blockrt_core::{Block, BlockKind, BlockRef, CustomBlockDefinition, Input, ParamDecl, SlotType, Val};
use rustc_hash::FxHashMap;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectDef {
    #[serde(default)]
    pub variables: BTreeMap<String, LiteralDef>,
    #[serde(default)]
    pub blocks: Vec<CustomBlockDef>,
    pub sprites: Vec<SpriteDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpriteDef {
    pub name: String,
    #[serde(default)]
    pub variables: BTreeMap<String, LiteralDef>,
    #[serde(default)]
    pub scripts: Vec<Vec<BlockDef>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomBlockDef {
    pub name: String,
    #[serde(default)]
    pub kind: KindDef,
    #[serde(default)]
    pub params: Vec<ParamDef>,
    #[serde(default)]
    pub body: Vec<BlockDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamDef {
    pub name: String,
    #[serde(default = "default_slot", rename = "type")]
    pub slot: String,
    #[serde(default)]
    pub default: Option<LiteralDef>,
}

fn default_slot() -> String {
    SlotType::Value.spec().to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindDef {
    #[default]
    Command,
    Reporter,
    Predicate,
    Hat,
}

impl From<KindDef> for BlockKind {
    fn from(kind: KindDef) -> Self {
        match kind {
            KindDef::Command => BlockKind::Command,
            KindDef::Reporter => BlockKind::Reporter,
            KindDef::Predicate => BlockKind::Predicate,
            KindDef::Hat => BlockKind::Hat,
        }
    }
}

/// A block. Either `selector` names a primitive or `custom` names one of the
/// project's custom blocks.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockDef {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub custom: Option<String>,
    #[serde(default)]
    pub kind: Option<KindDef>,
    #[serde(default)]
    pub inputs: Vec<InputDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LiteralDef {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl From<&LiteralDef> for Val {
    fn from(literal: &LiteralDef) -> Self {
        match literal {
            LiteralDef::Number(n) => Val::Num(*n),
            LiteralDef::Bool(b) => Val::Bool(*b),
            LiteralDef::Text(s) => Val::str(s),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum InputDef {
    Literal(LiteralDef),
    Slot(SlotDef),
    /// `null`: an empty slot.
    Empty,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", deny_unknown_fields)]
pub enum SlotDef {
    /// Nested reporter.
    Block(Box<BlockDef>),
    /// Shorthand for a nested `reportGetVar`.
    Var(String),
    /// Static C-slot.
    Script(Vec<BlockDef>),
    /// Unevaluated slot (ring contents).
    Ring(Vec<BlockDef>),
    /// Variadic slot.
    Multi(Vec<InputDef>),
    /// Nested block written out directly, e.g. `{ "custom": name, "inputs": [...] }`.
    #[serde(untagged)]
    Custom(Box<BlockDef>),
}

/// A loaded sprite: its variables and the first blocks of its scripts.
#[derive(Debug)]
pub struct SpriteSource {
    pub name: String,
    pub variables: Vec<(String, Val)>,
    pub scripts: Vec<BlockRef>,
}

#[derive(Debug)]
pub struct Project {
    pub variables: Vec<(String, Val)>,
    pub sprites: Vec<SpriteSource>,
    pub definitions: Vec<Rc<CustomBlockDefinition>>,
}

impl Project {
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read project '{}'", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid project '{}'", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let def: ProjectDef = serde_json::from_str(text)?;
        Builder::default().build(def)
    }

    pub fn script_count(&self) -> usize {
        self.sprites.iter().map(|s| s.scripts.len()).sum()
    }
}

#[derive(Default)]
struct Builder {
    definitions: FxHashMap<String, Rc<CustomBlockDefinition>>,
}

impl Builder {
    fn build(mut self, def: ProjectDef) -> Result<Project> {
        // Definitions first, bodies second: a body may call any definition,
        // including its own.
        let mut ordered = Vec::with_capacity(def.blocks.len());
        for block in &def.blocks {
            let declarations = block
                .params
                .iter()
                .map(|param| {
                    let slot = SlotType::from_spec(&param.slot)
                        .ok_or_else(|| anyhow!("block '{}': unknown slot type '{}'", block.name, param.slot))?;
                    let default = param.default.as_ref().map(Val::from).unwrap_or_default();
                    Ok(ParamDecl::new(&param.name, slot).with_default(default))
                })
                .collect::<Result<Vec<_>>>()?;
            let definition = CustomBlockDefinition::new(&block.name, block.kind.into(), declarations, None);
            if self.definitions.insert(block.name.clone(), definition.clone()).is_some() {
                bail!("block '{}' is defined twice", block.name);
            }
            ordered.push(definition);
        }
        for (block, definition) in def.blocks.iter().zip(&ordered) {
            let body = self
                .script(&block.body)
                .with_context(|| format!("in the body of '{}'", block.name))?;
            definition.set_body(body);
        }

        let mut sprites = Vec::with_capacity(def.sprites.len());
        for sprite in &def.sprites {
            let mut scripts = Vec::new();
            for (index, script) in sprite.scripts.iter().enumerate() {
                let top = self
                    .script(script)
                    .with_context(|| format!("sprite '{}', script {}", sprite.name, index + 1))?;
                scripts.extend(top);
            }
            sprites.push(SpriteSource {
                name: sprite.name.clone(),
                variables: literals(&sprite.variables),
                scripts,
            });
        }

        Ok(Project {
            variables: literals(&def.variables),
            sprites,
            definitions: ordered,
        })
    }

    fn script(&self, blocks: &[BlockDef]) -> Result<Option<BlockRef>> {
        let built = blocks
            .iter()
            .map(|block| self.block(block, None))
            .collect::<Result<Vec<_>>>()?;
        Ok(chain(built))
    }

    /// `nested_kind` is the kind assumed when a nested block does not say.
    fn block(&self, def: &BlockDef, nested_kind: Option<BlockKind>) -> Result<Block> {
        let mut block = match (&def.custom, &def.selector) {
            (Some(name), None) => {
                let definition = self
                    .definitions
                    .get(name)
                    .ok_or_else(|| anyhow!("unknown custom block '{}'", name))?;
                Block::custom(definition)
            }
            (None, Some(selector)) => {
                let kind = match def.kind {
                    Some(kind) => kind.into(),
                    None if selector.starts_with("receive") => BlockKind::Hat,
                    None => nested_kind.unwrap_or(BlockKind::Command),
                };
                Block::new(selector, kind)
            }
            (Some(_), Some(_)) => bail!("a block has either a selector or a custom name, not both"),
            (None, None) => bail!("a block needs a selector or a custom name"),
        };
        let ring_kind = match &*block.selector {
            "reifyReporter" => Some(BlockKind::Reporter),
            "reifyPredicate" => Some(BlockKind::Predicate),
            _ => None,
        };
        for input in &def.inputs {
            block = block.input(self.input(input, ring_kind)?);
        }
        Ok(block)
    }

    /// `ring_kind` is the kind of a lone block in a ring slot, when the
    /// owning block reifies reporters.
    fn input(&self, def: &InputDef, ring_kind: Option<BlockKind>) -> Result<Input> {
        Ok(match def {
            InputDef::Empty => Input::Empty,
            InputDef::Literal(literal) => Input::Value(literal.into()),
            InputDef::Slot(SlotDef::Block(block)) | InputDef::Slot(SlotDef::Custom(block)) => {
                Input::Block(Rc::new(self.block(block, Some(BlockKind::Reporter))?))
            }
            InputDef::Slot(SlotDef::Var(name)) => Input::Block(Block::var(name).into_ref()),
            InputDef::Slot(SlotDef::Script(blocks)) => Input::Script(self.script(blocks)?),
            InputDef::Slot(SlotDef::Ring(blocks)) => Input::Lambda(self.ring(blocks, ring_kind)?),
            InputDef::Slot(SlotDef::Multi(items)) => Input::multi(
                items
                    .iter()
                    .map(|item| self.input(item, None))
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }

    fn ring(&self, blocks: &[BlockDef], ring_kind: Option<BlockKind>) -> Result<Option<BlockRef>> {
        match (blocks, ring_kind) {
            ([single], Some(kind)) => Ok(Some(Rc::new(self.block(single, Some(kind))?))),
            _ => self.script(blocks),
        }
    }
}

fn literals(map: &BTreeMap<String, LiteralDef>) -> Vec<(String, Val)> {
    map.iter().map(|(name, value)| (name.clone(), Val::from(value))).collect()
}

