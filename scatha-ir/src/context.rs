//! The IR context: interner and factory for types and constants.

use hashbrown::HashMap;
use scatha_types::{ApFloat, ApInt};

use crate::entities::{Const, Type};
use crate::types::{TypeData, TypeInfo};

/// Description of an interned constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstData {
    /// Integer constant.
    Int(ApInt),
    /// Float constant.
    Float(ApFloat),
    /// Unspecified value of its type.
    Undef,
    /// The null pointer.
    Null,
    /// Aggregate constant; members are themselves constants.
    Record(Vec<Const>),
}

/// An interned constant with its type.
#[derive(Debug, Clone)]
pub struct ConstInfo {
    /// Type of the constant.
    pub ty: Type,
    /// Value of the constant.
    pub data: ConstData,
}

/// Owns every type and constant of a module tree.
///
/// Structural types and all constants are interned: constructing the same
/// entity twice yields the same key. Named structs are identity types and
/// never merged, even with identical member lists.
#[derive(Debug)]
pub struct Context {
    types: Vec<TypeInfo>,
    type_map: HashMap<TypeData, Type>,
    named_structs: HashMap<String, Type>,
    consts: Vec<ConstInfo>,
    const_map: HashMap<(Type, ConstData), Const>,
    void: Type,
    bool_: Type,
    ptr: Type,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates a context with the primitive types pre-interned.
    pub fn new() -> Self {
        let mut ctx = Self {
            types: Vec::new(),
            type_map: HashMap::new(),
            named_structs: HashMap::new(),
            consts: Vec::new(),
            const_map: HashMap::new(),
            void: Type::from_index(0),
            bool_: Type::from_index(0),
            ptr: Type::from_index(0),
        };
        ctx.void = ctx.intern_type(TypeData::Void);
        ctx.bool_ = ctx.intern_type(TypeData::Int { bits: 1 });
        ctx.ptr = ctx.intern_type(TypeData::Ptr);
        ctx
    }

    fn intern_type(&mut self, data: TypeData) -> Type {
        if let Some(&ty) = self.type_map.get(&data) {
            return ty;
        }
        let info = TypeInfo::compute(data.clone(), |member| {
            let info = &self.types[member.index()];
            (info.size, info.align)
        });
        let ty = Type::from_index(self.types.len());
        self.types.push(info);
        self.type_map.insert(data, ty);
        ty
    }

    /// The `void` type.
    pub fn void_type(&self) -> Type {
        self.void
    }

    /// The integer type of the given width.
    ///
    /// # Panics
    /// If `bits` is zero or greater than 64.
    pub fn int_type(&mut self, bits: u32) -> Type {
        assert!(bits >= 1 && bits <= 64, "unsupported integer width: {bits}");
        self.intern_type(TypeData::Int { bits })
    }

    /// The `i1` type used by compare results and branch conditions.
    pub fn bool_type(&self) -> Type {
        self.bool_
    }

    /// The float type of the given width.
    ///
    /// # Panics
    /// If `bits` is neither 32 nor 64.
    pub fn float_type(&mut self, bits: u32) -> Type {
        assert!(bits == 32 || bits == 64, "unsupported float width: {bits}");
        self.intern_type(TypeData::Float { bits })
    }

    /// The pointer type.
    pub fn ptr_type(&self) -> Type {
        self.ptr
    }

    /// The array type of `count` elements of `elem`.
    pub fn array_type(&mut self, elem: Type, count: u64) -> Type {
        self.intern_type(TypeData::Array { elem, count })
    }

    /// The anonymous struct type with the given members.
    pub fn anonymous_struct(&mut self, members: Vec<Type>) -> Type {
        self.intern_type(TypeData::Struct {
            name: String::new(),
            members,
        })
    }

    /// Registers the named struct type `name` with the given members.
    ///
    /// # Panics
    /// If a struct of that name already exists.
    pub fn declare_named_struct(&mut self, name: &str, members: Vec<Type>) -> Type {
        assert!(
            !self.named_structs.contains_key(name),
            "redefinition of struct @{name}"
        );
        let info = TypeInfo::compute(
            TypeData::Struct {
                name: name.to_owned(),
                members,
            },
            |member| {
                let info = &self.types[member.index()];
                (info.size, info.align)
            },
        );
        let ty = Type::from_index(self.types.len());
        self.types.push(info);
        self.named_structs.insert(name.to_owned(), ty);
        ty
    }

    /// Looks up a named struct.
    pub fn named_struct(&self, name: &str) -> Option<Type> {
        self.named_structs.get(name).copied()
    }

    /// The function type with the given signature.
    pub fn function_type(&mut self, ret: Type, params: Vec<Type>) -> Type {
        self.intern_type(TypeData::Function { ret, params })
    }

    /// Layout and description of a type.
    pub fn type_info(&self, ty: Type) -> &TypeInfo {
        &self.types[ty.index()]
    }

    /// Size of a type in bytes.
    pub fn size_of(&self, ty: Type) -> u64 {
        self.type_info(ty).size
    }

    /// Alignment of a type in bytes.
    pub fn align_of(&self, ty: Type) -> u64 {
        self.type_info(ty).align
    }

    /// Byte offset of member `index` of a struct type.
    pub fn member_offset(&self, ty: Type, index: usize) -> u64 {
        self.type_info(ty).member_offsets[index]
    }

    /// Width in bits of an integer or float type.
    ///
    /// # Panics
    /// If the type is not numeric.
    pub fn bitwidth(&self, ty: Type) -> u32 {
        match self.type_info(ty).data {
            TypeData::Int { bits } | TypeData::Float { bits } => bits,
            ref other => panic!("bitwidth of non-numeric type {other:?}"),
        }
    }

    fn intern_const(&mut self, ty: Type, data: ConstData) -> Const {
        if let Some(&c) = self.const_map.get(&(ty, data.clone())) {
            return c;
        }
        let c = Const::from_index(self.consts.len());
        self.consts.push(ConstInfo {
            ty,
            data: data.clone(),
        });
        self.const_map.insert((ty, data), c);
        c
    }

    /// The integer constant `value` of type `ty`.
    ///
    /// # Panics
    /// If `ty` is not an integer type.
    pub fn int_const(&mut self, value: u64, ty: Type) -> Const {
        let TypeData::Int { bits } = self.type_info(ty).data else {
            panic!("int_const of non-integer type");
        };
        self.intern_const(ty, ConstData::Int(ApInt::new(value, bits)))
    }

    /// The integer constant holding `value`.
    pub fn apint_const(&mut self, value: ApInt) -> Const {
        let ty = self.int_type(value.bitwidth());
        self.intern_const(ty, ConstData::Int(value))
    }

    /// The float constant `value` of type `ty`.
    ///
    /// # Panics
    /// If `ty` is not a float type.
    pub fn float_const(&mut self, value: f64, ty: Type) -> Const {
        let TypeData::Float { bits } = self.type_info(ty).data else {
            panic!("float_const of non-float type");
        };
        self.intern_const(ty, ConstData::Float(ApFloat::with_width(value, bits)))
    }

    /// The float constant holding `value`.
    pub fn apfloat_const(&mut self, value: ApFloat) -> Const {
        let ty = self.float_type(value.bitwidth());
        self.intern_const(ty, ConstData::Float(value))
    }

    /// The undef value of type `ty`.
    pub fn undef(&mut self, ty: Type) -> Const {
        self.intern_const(ty, ConstData::Undef)
    }

    /// The null pointer constant.
    pub fn null_ptr(&mut self) -> Const {
        let ty = self.ptr_type();
        self.intern_const(ty, ConstData::Null)
    }

    /// The aggregate constant of type `ty` with the given members.
    pub fn record_const(&mut self, ty: Type, members: Vec<Const>) -> Const {
        self.intern_const(ty, ConstData::Record(members))
    }

    /// Type and value of a constant.
    pub fn const_info(&self, c: Const) -> &ConstInfo {
        &self.consts[c.index()]
    }

    /// The integer value of a constant, if it is an integer.
    pub fn const_int(&self, c: Const) -> Option<ApInt> {
        match self.const_info(c).data {
            ConstData::Int(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_types_are_unique() {
        let mut ctx = Context::new();
        let i64t = ctx.int_type(64);
        let a = ctx.anonymous_struct(vec![i64t, i64t]);
        let b = ctx.anonymous_struct(vec![i64t, i64t]);
        assert_eq!(a, b);
        let arr = ctx.array_type(i64t, 4);
        assert_eq!(arr, ctx.array_type(i64t, 4));
    }

    #[test]
    fn named_structs_are_identity_types() {
        let mut ctx = Context::new();
        let i32t = ctx.int_type(32);
        let a = ctx.declare_named_struct("A", vec![i32t]);
        let b = ctx.declare_named_struct("B", vec![i32t]);
        assert_ne!(a, b);
        assert_eq!(ctx.named_struct("A"), Some(a));
    }

    #[test]
    fn constants_are_interned() {
        let mut ctx = Context::new();
        let i64t = ctx.int_type(64);
        assert_eq!(ctx.int_const(7, i64t), ctx.int_const(7, i64t));
        assert_ne!(ctx.int_const(7, i64t), ctx.int_const(8, i64t));
        assert_eq!(ctx.undef(i64t), ctx.undef(i64t));
    }
}
