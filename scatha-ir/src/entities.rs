//! Index types referencing entities stored in the [`Context`](crate::Context),
//! [`Module`](crate::Module), and [`Function`](crate::Function) arenas.

use core::fmt;

macro_rules! entity {
    ($(#[$doc:meta])* $name:ident, $display:expr) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Creates a key from its index.
            pub fn from_index(index: usize) -> Self {
                Self(index as u32)
            }

            /// The index this key wraps.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($display, "{}"), self.0)
            }
        }
    };
}

entity! {
    /// Key of an interned type in the [`Context`](crate::Context).
    Type, "type"
}

impl Type {
    /// `true` for the `void` type. The context interns `void` first, so its
    /// key is always index 0.
    pub fn is_void(self) -> bool {
        self.0 == 0
    }
}
entity! {
    /// Key of an interned constant in the [`Context`](crate::Context).
    Const, "const"
}
entity! {
    /// Key of a basic block within its function.
    Block, "block"
}
entity! {
    /// Key of an instruction within its function.
    Inst, "inst"
}
entity! {
    /// Key of a callable (defined or foreign function) within its module.
    FuncId, "func"
}
entity! {
    /// Key of a global variable or constant within its module.
    GlobalId, "global"
}
