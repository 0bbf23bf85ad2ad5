//! Attributes, interned types and interned paths.

use std::collections::{BTreeMap, HashMap};

use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;

use crate::Symbol;
use crate::refs::{PathRef, TypeRef};

/// Extent of a tensor dimension whose size is not statically known.
pub const DYNAMIC_DIM: i64 = -1;

// ============================================================================
// Attribute
// ============================================================================

/// Compile-time payload attached to an operation or a type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    Unit,
    Bool(bool),
    /// Signless integer stored as raw bits.
    IntBits(u64),
    FloatBits(u64),
    String(String),
    Type(TypeRef),
    Symbol(Symbol),
    List(Vec<Attribute>),
}

impl Attribute {
    pub fn int(value: i64) -> Self {
        Attribute::IntBits(value as u64)
    }

    /// Interpret integer bits as a signed 64-bit value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Attribute::IntBits(bits) => Some(*bits as i64),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            Attribute::Symbol(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<TypeRef> {
        match self {
            Attribute::Type(ty) => Some(*ty),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Attribute]> {
        match self {
            Attribute::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<i64> for Attribute {
    fn from(value: i64) -> Self {
        Attribute::int(value)
    }
}

impl From<bool> for Attribute {
    fn from(value: bool) -> Self {
        Attribute::Bool(value)
    }
}

impl From<Symbol> for Attribute {
    fn from(value: Symbol) -> Self {
        Attribute::Symbol(value)
    }
}

impl From<TypeRef> for Attribute {
    fn from(value: TypeRef) -> Self {
        Attribute::Type(value)
    }
}

impl From<Vec<Attribute>> for Attribute {
    fn from(value: Vec<Attribute>) -> Self {
        Attribute::List(value)
    }
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Attribute::String(value.to_owned())
    }
}

// ============================================================================
// TypeData
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeData {
    pub dialect: Symbol,
    pub name: Symbol,
    pub params: SmallVec<[TypeRef; 4]>,
    pub attrs: BTreeMap<Symbol, Attribute>,
}

/// Fluent construction of `TypeData`; params and attrs default to empty.
pub struct TypeDataBuilder {
    dialect: Symbol,
    name: Symbol,
    params: SmallVec<[TypeRef; 4]>,
    attrs: BTreeMap<Symbol, Attribute>,
}

impl TypeDataBuilder {
    pub fn new(dialect: impl Into<Symbol>, name: impl Into<Symbol>) -> Self {
        Self {
            dialect: dialect.into(),
            name: name.into(),
            params: SmallVec::new(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn param(mut self, ty: TypeRef) -> Self {
        self.params.push(ty);
        self
    }

    pub fn params(mut self, tys: impl IntoIterator<Item = TypeRef>) -> Self {
        self.params.extend(tys);
        self
    }

    pub fn attr(mut self, key: impl Into<Symbol>, val: Attribute) -> Self {
        self.attrs.insert(key.into(), val);
        self
    }

    pub fn build(self) -> TypeData {
        TypeData {
            dialect: self.dialect,
            name: self.name,
            params: self.params,
            attrs: self.attrs,
        }
    }
}

/// Coarse classification used by folders and type conversion rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    Integer,
    Float,
    Index,
    Tuple,
    Tensor,
    None,
    /// The "type not yet inferred" marker. Never equal-for-folding.
    Undefined,
    /// Anything this crate does not know how to inspect.
    Opaque,
}

// ============================================================================
// TypeInterner
// ============================================================================

/// Deduplicating type interner. Same `TypeData` always yields the same `TypeRef`.
pub struct TypeInterner {
    types: PrimaryMap<TypeRef, TypeData>,
    dedup: HashMap<TypeData, TypeRef>,
}

impl TypeInterner {
    pub fn new() -> Self {
        Self {
            types: PrimaryMap::new(),
            dedup: HashMap::default(),
        }
    }

    pub fn intern(&mut self, data: TypeData) -> TypeRef {
        if let Some(&existing) = self.dedup.get(&data) {
            return existing;
        }
        let r = self.types.push(data.clone());
        self.dedup.insert(data, r);
        r
    }

    pub fn get(&self, r: TypeRef) -> &TypeData {
        &self.types[r]
    }

    pub fn is_dialect(&self, r: TypeRef, dialect: Symbol, name: Symbol) -> bool {
        let data = &self.types[r];
        data.dialect == dialect && data.name == name
    }

    pub fn category(&self, r: TypeRef) -> TypeCategory {
        let data = &self.types[r];
        if data.dialect == "plier" && data.name == "undefined" {
            return TypeCategory::Undefined;
        }
        if data.dialect != "core" {
            return TypeCategory::Opaque;
        }
        data.name.with_str(|name| match name {
            "i1" | "i8" | "i16" | "i32" | "i64" => TypeCategory::Integer,
            "f16" | "f32" | "f64" => TypeCategory::Float,
            "index" => TypeCategory::Index,
            "tuple" => TypeCategory::Tuple,
            "tensor" => TypeCategory::Tensor,
            "none" => TypeCategory::None,
            _ => TypeCategory::Opaque,
        })
    }

    /// Element types of a tuple type.
    pub fn tuple_elements(&self, r: TypeRef) -> Option<&[TypeRef]> {
        (self.category(r) == TypeCategory::Tuple).then(|| &self.types[r].params[..])
    }

    /// Element type of a ranked tensor.
    pub fn tensor_element(&self, r: TypeRef) -> Option<TypeRef> {
        if self.category(r) != TypeCategory::Tensor {
            return None;
        }
        self.types[r].params.first().copied()
    }

    /// Per-dimension extents of a ranked tensor; `DYNAMIC_DIM` marks unknown ones.
    pub fn tensor_shape(&self, r: TypeRef) -> Option<SmallVec<[i64; 4]>> {
        if self.category(r) != TypeCategory::Tensor {
            return None;
        }
        let dims = self.types[r].attrs.get(&Symbol::new("shape"))?.as_list()?;
        dims.iter().map(Attribute::as_i64).collect()
    }
}

impl Default for TypeInterner {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PathInterner
// ============================================================================

pub struct PathInterner {
    paths: PrimaryMap<PathRef, String>,
    dedup: HashMap<String, PathRef>,
}

impl PathInterner {
    pub fn new() -> Self {
        Self {
            paths: PrimaryMap::new(),
            dedup: HashMap::default(),
        }
    }

    pub fn intern(&mut self, path: String) -> PathRef {
        if let Some(&existing) = self.dedup.get(&path) {
            return existing;
        }
        let r = self.paths.push(path.clone());
        self.dedup.insert(path, r);
        r
    }

    pub fn get(&self, r: PathRef) -> &str {
        &self.paths[r]
    }
}

impl Default for PathInterner {
    fn default() -> Self {
        Self::new()
    }
}
