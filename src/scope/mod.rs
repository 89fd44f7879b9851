//! Hierarchical variable scopes
//!
//! Every job, task, workflow and node owns a scope. Scopes live in a single
//! arena owned by the runtime [`Context`](crate::runner::Context) and refer to
//! each other by [`ScopeId`]. Path based access (`get`, `set`, ...) lives in
//! [`resolve`] because reads expand templates, which needs the whole context.

pub mod node;
pub mod resolve;
pub mod value;

pub use value::{Callable, NativeFn, Value, ValueMap};

use crate::runner::TaskEntry;
use indexmap::IndexMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// Index of a scope in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(usize);

impl ScopeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Basic value types a declared variable accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Mixed,
    String,
    Bool,
    Int,
    Float,
    List,
    Map,
    Callable,
}

impl FromStr for VarType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "mixed" | "" => Ok(VarType::Mixed),
            "string" => Ok(VarType::String),
            "bool" | "boolean" => Ok(VarType::Bool),
            "int" | "integer" => Ok(VarType::Int),
            "float" | "number" => Ok(VarType::Float),
            "array" | "list" => Ok(VarType::List),
            "map" | "object" => Ok(VarType::Map),
            "callable" | "callback" => Ok(VarType::Callable),
            other => Err(format!(
                "Invalid type: {}. Must be one of: string, bool, int, float, array, map, callable, mixed",
                other
            )),
        }
    }
}

/// Set of accepted types, written as `string|array` in declarations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeTag(Vec<VarType>);

impl TypeTag {
    pub fn contains(&self, ty: VarType) -> bool {
        self.0.contains(&ty)
    }

    /// True when the variable can only hold a boolean (rendered as a CLI flag)
    pub fn is_flag(&self) -> bool {
        self.0 == [VarType::Bool]
    }

    pub fn is_list(&self) -> bool {
        self.contains(VarType::List)
    }
}

impl Default for TypeTag {
    fn default() -> Self {
        TypeTag(vec![VarType::Mixed])
    }
}

impl FromStr for TypeTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let types = s
            .split('|')
            .map(VarType::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TypeTag(types))
    }
}

/// How a variable is exposed on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliBinding {
    Argument,
    Option { shortcut: Option<char> },
}

/// Declaration of a recognized variable
#[derive(Debug, Clone, Default)]
pub struct VariableSpec {
    pub required: bool,
    pub default: Option<Value>,
    pub types: TypeTag,
    pub label: String,
    pub binding: Option<CliBinding>,
}

impl VariableSpec {
    pub fn new(types: &str) -> Self {
        VariableSpec {
            types: types.parse().unwrap_or_default(),
            ..Default::default()
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn as_argument(mut self) -> Self {
        self.binding = Some(CliBinding::Argument);
        self
    }

    pub fn as_option(mut self, shortcut: Option<char>) -> Self {
        self.binding = Some(CliBinding::Option { shortcut });
        self
    }
}

#[derive(Debug, Clone)]
pub enum Declaration {
    Variable { name: String, spec: VariableSpec },
    /// Marks where a kind's own variables end and inherited ones begin
    Boundary,
}

/// Ordered variable declarations of a scope kind
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    entries: Vec<Declaration>,
}

impl Declarations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variable(mut self, name: &str, spec: VariableSpec) -> Self {
        self.entries.push(Declaration::Variable {
            name: name.to_string(),
            spec,
        });
        self
    }

    /// Append the declarations of the parent kind behind a boundary marker
    pub fn inherit(mut self, parent: Declarations) -> Self {
        self.entries.push(Declaration::Boundary);
        self.entries.extend(parent.entries);
        self
    }

    /// Look up a declaration; the first (most specific) entry wins
    pub fn get(&self, name: &str) -> Option<&VariableSpec> {
        self.variables()
            .find(|(n, _)| *n == name)
            .map(|(_, spec)| spec)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &VariableSpec)> {
        self.entries.iter().filter_map(|entry| match entry {
            Declaration::Variable { name, spec } => Some((name.as_str(), spec)),
            Declaration::Boundary => None,
        })
    }

    /// Variables declared before the first boundary
    pub fn own(&self) -> impl Iterator<Item = (&str, &VariableSpec)> {
        self.entries
            .iter()
            .take_while(|entry| !matches!(entry, Declaration::Boundary))
            .filter_map(|entry| match entry {
                Declaration::Variable { name, spec } => Some((name.as_str(), spec)),
                Declaration::Boundary => None,
            })
    }
}

/// What a scope belongs to
#[derive(Debug, Clone)]
pub enum Role {
    Plain,
    Node,
    Task(Box<TaskEntry>),
}

/// A single scope in the arena
#[derive(Debug, Clone)]
pub struct ScopeNode {
    pub parent: Option<ScopeId>,
    pub values: IndexMap<String, Value>,
    pub declared: Rc<Declarations>,
    pub children: Vec<ScopeId>,
    pub role: Role,
}

/// Arena holding every scope of one job run
#[derive(Debug, Default)]
pub struct ScopeArena {
    nodes: Vec<ScopeNode>,
}

impl ScopeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scope, seeding every optional declared variable with its default
    pub fn create(
        &mut self,
        parent: Option<ScopeId>,
        declared: Rc<Declarations>,
        role: Role,
    ) -> ScopeId {
        let mut values = IndexMap::new();
        for (name, spec) in declared.variables() {
            if !spec.required && !values.contains_key(name) {
                values.insert(
                    name.to_string(),
                    spec.default.clone().unwrap_or(Value::Null),
                );
            }
        }

        let id = ScopeId(self.nodes.len());
        self.nodes.push(ScopeNode {
            parent,
            values,
            declared,
            children: Vec::new(),
            role,
        });
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(id);
        }
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: ScopeId) -> &ScopeNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: ScopeId) -> &mut ScopeNode {
        &mut self.nodes[id.0]
    }

    pub fn parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: ScopeId) -> &[ScopeId] {
        &self.nodes[id.0].children
    }

    pub fn declared(&self, id: ScopeId) -> &Declarations {
        &self.nodes[id.0].declared
    }

    pub fn is_declared(&self, id: ScopeId, name: &str) -> bool {
        self.nodes[id.0].declared.contains(name)
    }

    pub fn local(&self, id: ScopeId, key: &str) -> Option<&Value> {
        self.nodes[id.0].values.get(key)
    }

    pub fn local_mut(&mut self, id: ScopeId, key: &str) -> Option<&mut Value> {
        self.nodes[id.0].values.get_mut(key)
    }

    pub fn contains_local(&self, id: ScopeId, key: &str) -> bool {
        self.nodes[id.0].values.contains_key(key)
    }

    pub fn insert_local(&mut self, id: ScopeId, key: &str, value: Value) {
        self.nodes[id.0].values.insert(key.to_string(), value);
    }

    pub fn remove_local(&mut self, id: ScopeId, key: &str) -> Option<Value> {
        self.nodes[id.0].values.shift_remove(key)
    }

    pub fn values(&self, id: ScopeId) -> &IndexMap<String, Value> {
        &self.nodes[id.0].values
    }

    pub fn role(&self, id: ScopeId) -> &Role {
        &self.nodes[id.0].role
    }

    pub fn is_node(&self, id: ScopeId) -> bool {
        matches!(self.nodes[id.0].role, Role::Node)
    }

    pub fn task(&self, id: ScopeId) -> Option<&TaskEntry> {
        match &self.nodes[id.0].role {
            Role::Task(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn task_mut(&mut self, id: ScopeId) -> Option<&mut TaskEntry> {
        match &mut self.nodes[id.0].role {
            Role::Task(entry) => Some(entry),
            _ => None,
        }
    }

    /// First scope walking up from `id` (inclusive) that holds `key` locally
    pub fn find_holder(&self, id: ScopeId, key: &str) -> Option<ScopeId> {
        let mut current = Some(id);
        while let Some(scope) = current {
            if self.contains_local(scope, key) {
                return Some(scope);
            }
            current = self.parent(scope);
        }
        None
    }

    /// Append an unlinked copy of `id` under `parent` and return its id.
    ///
    /// Children are not copied; callers rebuild the child list.
    pub(crate) fn duplicate(&mut self, id: ScopeId, parent: Option<ScopeId>) -> ScopeId {
        let mut copy = self.nodes[id.0].clone();
        copy.parent = parent;
        copy.children = Vec::new();
        let new_id = ScopeId(self.nodes.len());
        self.nodes.push(copy);
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(new_id);
        }
        new_id
    }
}
