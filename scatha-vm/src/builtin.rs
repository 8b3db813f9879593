//! Builtin functions reachable through the foreign function table.
//!
//! These are the host services every program may assume: heap management,
//! raw memory utilities, and terminal output. The compiler references them
//! by name in the binary's foreign function table, and
//! [`register_builtins`] installs them on a machine.

use std::io::Write;

use scatha_types::{VirtualPointer, Word};

use crate::error::VmError;
use crate::vm::VirtualMachine;

/// Names of all builtins, in a stable order.
pub const BUILTIN_NAMES: &[&str] = &[
    "abort", "memcpy", "memset", "alloc", "dealloc", "putchar", "puti64", "putf64", "putstr",
    "putln",
];

/// Installs the builtin table on `vm`.
pub fn register_builtins(vm: &mut VirtualMachine) {
    vm.register_host_function("abort", Box::new(|_, _| Err(VmError::Trap)));
    vm.register_host_function(
        "memcpy",
        Box::new(|memory, args: &[Word]| {
            let dest = VirtualPointer::from_word(args[0]);
            let src = VirtualPointer::from_word(args[1]);
            let size = args[2];
            let bytes = memory.read_bytes(src, size)?.to_vec();
            memory.write_bytes(dest, &bytes)?;
            Ok(0)
        }),
    );
    vm.register_host_function(
        "memset",
        Box::new(|memory, args: &[Word]| {
            let dest = VirtualPointer::from_word(args[0]);
            let size = args[1];
            let value = args[2] as u8;
            memory.write_bytes(dest, &vec![value; size as usize])?;
            Ok(0)
        }),
    );
    vm.register_host_function(
        "alloc",
        Box::new(|memory, args: &[Word]| {
            let pointer = memory.allocate(args[0], args[1])?;
            Ok(pointer.to_word())
        }),
    );
    vm.register_host_function(
        "dealloc",
        Box::new(|memory, args: &[Word]| {
            memory.deallocate(VirtualPointer::from_word(args[0]), args[1])?;
            Ok(0)
        }),
    );
    vm.register_host_function(
        "putchar",
        Box::new(|_, args: &[Word]| {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(&[args[0] as u8]);
            Ok(0)
        }),
    );
    vm.register_host_function(
        "puti64",
        Box::new(|_, args: &[Word]| {
            print!("{}", args[0] as i64);
            Ok(0)
        }),
    );
    vm.register_host_function(
        "putf64",
        Box::new(|_, args: &[Word]| {
            print!("{}", f64::from_bits(args[0]));
            Ok(0)
        }),
    );
    vm.register_host_function(
        "putstr",
        Box::new(|memory, args: &[Word]| {
            let pointer = VirtualPointer::from_word(args[0]);
            let bytes = memory.read_bytes(pointer, args[1])?.to_vec();
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(&bytes);
            Ok(0)
        }),
    );
    vm.register_host_function(
        "putln",
        Box::new(|_, _| {
            println!();
            Ok(0)
        }),
    );
}
