//! Modules: the unit of compilation owning functions and globals.

use hashbrown::HashMap;

use crate::context::Context;
use crate::entities::{Const, FuncId, GlobalId, Type};
use crate::function::{Function, Visibility};
use crate::types::TypeData;

/// Declaration of a function whose implementation lives outside the module
/// and is reached through the VM's foreign function table.
#[derive(Debug, Clone)]
pub struct ForeignFunctionDecl {
    /// Symbol name.
    pub name: String,
    /// Function type.
    pub ty: Type,
}

/// A defined or foreign callable.
#[derive(Debug)]
pub enum Callable {
    /// Function defined in this module.
    Defined(Function),
    /// Foreign function declaration.
    Foreign(ForeignFunctionDecl),
}

impl Callable {
    /// The callable's name.
    pub fn name(&self) -> &str {
        match self {
            Callable::Defined(f) => f.name(),
            Callable::Foreign(f) => &f.name,
        }
    }

    /// The callable's function type.
    pub fn ty(&self) -> Type {
        match self {
            Callable::Defined(f) => f.ty(),
            Callable::Foreign(f) => f.ty,
        }
    }

    /// The defined function, if this is one.
    pub fn as_defined(&self) -> Option<&Function> {
        match self {
            Callable::Defined(f) => Some(f),
            Callable::Foreign(_) => None,
        }
    }
}

/// A global variable or constant.
#[derive(Debug, Clone)]
pub struct GlobalData {
    /// Name, unique within the module.
    pub name: String,
    /// Type of the stored value.
    pub value_ty: Type,
    /// Initializer.
    pub init: Const,
    /// `true` for `constant` globals, which may never be stored to.
    pub is_const: bool,
    /// Linkage visibility.
    pub visibility: Visibility,
}

/// A module: functions, globals, and the named struct types declared with
/// them. All names are unique within their scope.
#[derive(Debug, Default)]
pub struct Module {
    callables: Vec<Option<Callable>>,
    globals: Vec<Option<GlobalData>>,
    func_names: HashMap<String, FuncId>,
    global_names: HashMap<String, GlobalId>,
    struct_decls: Vec<Type>,
}

impl Module {
    /// Creates an empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function definition.
    ///
    /// # Panics
    /// If the name is already taken by another callable.
    pub fn add_function(&mut self, mut function: Function) -> FuncId {
        let id = FuncId::from_index(self.callables.len());
        assert!(
            self.func_names
                .insert(function.name().to_owned(), id)
                .is_none(),
            "redefinition of @{}",
            function.name()
        );
        function.set_self_id(id);
        self.callables.push(Some(Callable::Defined(function)));
        id
    }

    /// Adds a foreign function declaration.
    ///
    /// # Panics
    /// If the name is already taken by another callable.
    pub fn add_foreign_function(&mut self, decl: ForeignFunctionDecl) -> FuncId {
        let id = FuncId::from_index(self.callables.len());
        assert!(
            self.func_names.insert(decl.name.clone(), id).is_none(),
            "redefinition of @{}",
            decl.name
        );
        self.callables.push(Some(Callable::Foreign(decl)));
        id
    }

    /// Adds a global variable or constant.
    ///
    /// # Panics
    /// If the name is already taken by another global.
    pub fn add_global(&mut self, global: GlobalData) -> GlobalId {
        let id = GlobalId::from_index(self.globals.len());
        assert!(
            self.global_names.insert(global.name.clone(), id).is_none(),
            "redefinition of @{}",
            global.name
        );
        self.globals.push(Some(global));
        id
    }

    /// Records a named struct declaration for printing order.
    pub fn declare_struct(&mut self, ty: Type) {
        self.struct_decls.push(ty);
    }

    /// The declared struct types in declaration order.
    pub fn struct_decls(&self) -> &[Type] {
        &self.struct_decls
    }

    /// Looks up a callable by name.
    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        let id = *self.func_names.get(name)?;
        self.callables[id.index()].is_some().then_some(id)
    }

    /// Looks up a global by name.
    pub fn global_by_name(&self, name: &str) -> Option<GlobalId> {
        self.global_names.get(name).copied()
    }

    /// The callable with the given id.
    pub fn callable(&self, id: FuncId) -> &Callable {
        self.callables[id.index()].as_ref().expect("erased function")
    }

    /// The defined function with the given id.
    ///
    /// # Panics
    /// If the id names a foreign function.
    pub fn function(&self, id: FuncId) -> &Function {
        self.callable(id).as_defined().expect("foreign function")
    }

    /// Mutable access to the defined function with the given id.
    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        match self.callables[id.index()].as_mut().expect("erased function") {
            Callable::Defined(f) => f,
            Callable::Foreign(_) => panic!("foreign function"),
        }
    }

    /// The global with the given id.
    pub fn global(&self, id: GlobalId) -> &GlobalData {
        self.globals[id.index()].as_ref().expect("erased global")
    }

    /// Removes a global from the module.
    pub fn erase_global(&mut self, id: GlobalId) {
        let global = self.globals[id.index()].take().expect("double erase");
        self.global_names.remove(&global.name);
    }

    /// All live callable ids, in declaration order.
    pub fn callable_ids(&self) -> Vec<FuncId> {
        (0..self.callables.len())
            .map(FuncId::from_index)
            .filter(|id| self.callables[id.index()].is_some())
            .collect()
    }

    /// All defined function ids, in declaration order.
    pub fn function_ids(&self) -> Vec<FuncId> {
        self.callable_ids()
            .into_iter()
            .filter(|&id| self.callable(id).as_defined().is_some())
            .collect()
    }

    /// All live global ids, in declaration order.
    pub fn global_ids(&self) -> Vec<GlobalId> {
        (0..self.globals.len())
            .map(GlobalId::from_index)
            .filter(|id| self.globals[id.index()].is_some())
            .collect()
    }

    /// Removes a function from the module.
    pub fn erase_function(&mut self, id: FuncId) {
        let callable = self.callables[id.index()].take().expect("double erase");
        self.func_names.remove(callable.name());
    }

    /// Runs `f` over a function taken out of the module, so the pass can
    /// borrow the module immutably alongside the mutable function.
    pub fn with_function_mut<R>(&mut self, id: FuncId, f: impl FnOnce(&mut Self, &mut Function) -> R) -> R {
        let mut callable = self.callables[id.index()].take().expect("erased function");
        let result = match &mut callable {
            Callable::Defined(function) => f(self, function),
            Callable::Foreign(_) => panic!("foreign function"),
        };
        self.callables[id.index()] = Some(callable);
        result
    }

    /// The return type of a callable's signature.
    pub fn return_type(&self, ctx: &Context, id: FuncId) -> Type {
        match &ctx.type_info(self.callable(id).ty()).data {
            TypeData::Function { ret, .. } => *ret,
            _ => panic!("callable with non-function type"),
        }
    }
}
