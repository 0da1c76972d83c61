use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Coarse classification of a [`NodeRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Class,
    Method,
    Field,
    Variable,
}

/// Stable reference to a method: declaring class raw name plus `name(args)ret` signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodRef {
    pub class: String,
    pub signature: String,
}

impl MethodRef {
    pub fn new(class: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            signature: signature.into(),
        }
    }

    /// Method name without the descriptor part.
    pub fn name(&self) -> &str {
        match self.signature.find('(') {
            Some(idx) => &self.signature[..idx],
            None => &self.signature,
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.signature)
    }
}

/// Stable reference to a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldRef {
    pub class: String,
    pub name: String,
    pub descriptor: String,
}

impl FieldRef {
    pub fn new(
        class: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            class: class.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

/// Stable reference to a local variable.
///
/// Identity is `(method, reg, ssa)`. The display `name` and `type_name` are carried along for
/// rendering only: variables get renamed, receive synthetic names and shadow each other, so a
/// source-level name is never an identity key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarRef {
    pub method: MethodRef,
    pub reg: u32,
    pub ssa: u32,
    pub name: String,
    pub type_name: String,
}

impl VarRef {
    pub fn new(method: MethodRef, reg: u32, ssa: u32) -> Self {
        Self {
            method,
            reg,
            ssa,
            name: String::new(),
            type_name: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }
}

impl PartialEq for VarRef {
    fn eq(&self, other: &Self) -> bool {
        self.reg == other.reg && self.ssa == other.ssa && self.method == other.method
    }
}

impl Eq for VarRef {}

impl Hash for VarRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.method.hash(state);
        self.reg.hash(state);
        self.ssa.hash(state);
    }
}

/// Stable identifier for a semantic entity in decompiled code.
///
/// Node references never capture in-memory identity: they are compound keys (qualified names,
/// member signatures, register/SSA pairs) so they survive process restarts and can be persisted
/// next to cached code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRef {
    Class { name: String },
    Method(MethodRef),
    Field(FieldRef),
    Variable(VarRef),
}

impl NodeRef {
    pub fn class(name: impl Into<String>) -> Self {
        NodeRef::Class { name: name.into() }
    }

    pub fn method(class: impl Into<String>, signature: impl Into<String>) -> Self {
        NodeRef::Method(MethodRef::new(class, signature))
    }

    pub fn field(
        class: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        NodeRef::Field(FieldRef::new(class, name, descriptor))
    }

    pub fn variable(var: VarRef) -> Self {
        NodeRef::Variable(var)
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeRef::Class { .. } => NodeKind::Class,
            NodeRef::Method(_) => NodeKind::Method,
            NodeRef::Field(_) => NodeKind::Field,
            NodeRef::Variable(_) => NodeKind::Variable,
        }
    }

    /// Raw name of the class that declares this node (the class itself for class nodes).
    pub fn declaring_class(&self) -> &str {
        match self {
            NodeRef::Class { name } => name,
            NodeRef::Method(method) => &method.class,
            NodeRef::Field(field) => &field.class,
            NodeRef::Variable(var) => &var.method.class,
        }
    }

    /// Node of the declaring class.
    pub fn declaring_class_node(&self) -> NodeRef {
        NodeRef::class(self.declaring_class())
    }

    /// Human readable name including enough context to tell nodes apart.
    pub fn full_name(&self) -> String {
        match self {
            NodeRef::Class { name } => name.clone(),
            NodeRef::Method(method) => method.to_string(),
            NodeRef::Field(field) => format!("{}.{} {}", field.class, field.name, field.descriptor),
            NodeRef::Variable(var) => {
                format!("{} {} (r{}v{})", var.type_name, var.name, var.reg, var.ssa)
            }
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, NodeRef::Variable(_))
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}
