//! One-to-many type converter.
//!
//! A converter maps each source type to an ordered list of zero or more
//! target types: empty drops the value, one is a plain (possibly identity)
//! conversion, several is a decomposition. Rules are tried in registration
//! order and the first one that answers wins. Asking about a type no rule
//! covers is an error, never a silent identity.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Range;

use derive_more::{Display, Error};
use smallvec::{SmallVec, smallvec};

use crate::Symbol;
use crate::context::IrContext;
use crate::refs::TypeRef;

pub type TypeVec = SmallVec<[TypeRef; 4]>;

#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum TypeConversionError {
    #[display("no conversion registered for {ty}")]
    Unregistered { ty: TypeRef },
    #[display("conversion of {ty} rejected: {reason}")]
    Rejected { ty: TypeRef, reason: String },
}

/// `None` defers to the next rule.
type ConversionFn =
    dyn Fn(&IrContext, &TypeConverter, TypeRef) -> Option<Result<TypeVec, TypeConversionError>>;

/// Memoized per instance; a converter must only be used with one `IrContext`.
#[derive(Default)]
pub struct TypeConverter {
    rules: Vec<Box<ConversionFn>>,
    memo: RefCell<HashMap<TypeRef, Result<TypeVec, TypeConversionError>>>,
}

impl TypeConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a general rule. It may recurse through the converter it is given.
    pub fn add_conversion(
        &mut self,
        f: impl Fn(&IrContext, &TypeConverter, TypeRef) -> Option<Result<TypeVec, TypeConversionError>>
        + 'static,
    ) {
        self.rules.push(Box::new(f));
        self.memo.get_mut().clear();
    }

    /// Types matching `pred` convert to themselves.
    pub fn add_identity(&mut self, pred: impl Fn(&IrContext, TypeRef) -> bool + 'static) {
        self.add_conversion(move |ctx, _, ty| pred(ctx, ty).then(|| Ok(smallvec![ty])));
    }

    /// Types for which `f` answers convert to that single type.
    pub fn add_one_to_one(&mut self, f: impl Fn(&IrContext, TypeRef) -> Option<TypeRef> + 'static) {
        self.add_conversion(move |ctx, _, ty| f(ctx, ty).map(|t| Ok(smallvec![t])));
    }

    /// Types matching `pred` are dropped.
    pub fn add_drop(&mut self, pred: impl Fn(&IrContext, TypeRef) -> bool + 'static) {
        self.add_conversion(move |ctx, _, ty| pred(ctx, ty).then(|| Ok(SmallVec::new())));
    }

    /// `dialect.name` compound types flatten into their converted parameters,
    /// in parameter order. One failing parameter fails the whole type.
    pub fn add_decomposition(&mut self, dialect: impl Into<Symbol>, name: impl Into<Symbol>) {
        let (dialect, name) = (dialect.into(), name.into());
        self.add_conversion(move |ctx, converter, ty| {
            if !ctx.types.is_dialect(ty, dialect, name) {
                return None;
            }
            let params = ctx.types.get(ty).params.clone();
            Some(converter.convert_types(ctx, &params))
        });
    }

    pub fn convert_type(&self, ctx: &IrContext, ty: TypeRef) -> Result<TypeVec, TypeConversionError> {
        if let Some(cached) = self.memo.borrow().get(&ty) {
            return cached.clone();
        }
        let result = self
            .rules
            .iter()
            .find_map(|rule| rule(ctx, self, ty))
            .unwrap_or(Err(TypeConversionError::Unregistered { ty }));
        self.memo.borrow_mut().insert(ty, result.clone());
        result
    }

    /// Concatenation of each type's conversion, in order.
    pub fn convert_types(
        &self,
        ctx: &IrContext,
        types: &[TypeRef],
    ) -> Result<TypeVec, TypeConversionError> {
        let mut out = TypeVec::new();
        for &ty in types {
            out.extend(self.convert_type(ctx, ty)?);
        }
        Ok(out)
    }

    /// Legal means the type converts to exactly itself.
    pub fn is_legal(&self, ctx: &IrContext, ty: TypeRef) -> bool {
        matches!(self.convert_type(ctx, ty).as_deref(), Ok([t]) if *t == ty)
    }

    pub fn are_legal(&self, ctx: &IrContext, types: &[TypeRef]) -> bool {
        types.iter().all(|&ty| self.is_legal(ctx, ty))
    }

    pub fn compute_type_mapping(
        &self,
        ctx: &IrContext,
        types: &[TypeRef],
    ) -> Result<OneToNTypeMapping, TypeConversionError> {
        let mut mapping = OneToNTypeMapping {
            original: types.iter().copied().collect(),
            converted: TypeVec::new(),
            offsets: smallvec![0],
        };
        for &ty in types {
            mapping.converted.extend(self.convert_type(ctx, ty)?);
            mapping.offsets.push(mapping.converted.len());
        }
        Ok(mapping)
    }
}

/// Where each original type's conversion lives in the flat converted list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OneToNTypeMapping {
    original: TypeVec,
    converted: TypeVec,
    /// `offsets[i]..offsets[i + 1]` is the range of original type `i`.
    offsets: SmallVec<[usize; 5]>,
}

impl OneToNTypeMapping {
    pub fn len(&self) -> usize {
        self.original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }

    pub fn original_types(&self) -> &[TypeRef] {
        &self.original
    }

    pub fn all_converted_types(&self) -> &[TypeRef] {
        &self.converted
    }

    pub fn converted_range(&self, index: usize) -> Range<usize> {
        self.offsets[index]..self.offsets[index + 1]
    }

    pub fn converted_types(&self, index: usize) -> &[TypeRef] {
        &self.converted[self.converted_range(index)]
    }

    /// Nothing changes: every original type maps to exactly itself.
    pub fn is_identity(&self) -> bool {
        (0..self.len()).all(|i| self.converted_types(i) == [self.original[i]])
    }

    /// Some original type maps to a number of types other than one.
    pub fn changes_arity(&self) -> bool {
        (0..self.len()).any(|i| self.converted_range(i).len() != 1)
    }
}
