//! Static-inline liveness propagation (spec §4.3).
//!
//! A `static inline` function is parsed with `is_live == false` (see
//! `Parser::function_definition`'s `!attr.is_inline || !attr.is_static`):
//! unlike an ordinary `static` function, its address can't be taken from
//! another translation unit, so until something in *this* file actually
//! calls it, it need not be emitted at all. Everything else — externally
//! linked functions and plain `static` functions — starts live and seeds
//! the walk below.

use crate::sema::Object;
use std::collections::{HashMap, HashSet};

/// Walk the call graph from every already-live function (`FunctionObject::calls`,
/// populated by the parser as it parses each call expression) and mark every
/// `static inline` function it transitively reaches as live too. Whatever is
/// still `is_live() == false` afterward is dead and the code generator skips it.
pub fn mark_live<'a>(globals: &[&'a Object<'a>]) {
    let by_name: HashMap<&str, &'a Object<'a>> =
        globals.iter().filter(|o| o.is_function).map(|o| (o.name.as_str(), *o)).collect();

    let mut visited: HashSet<*const Object<'a>> = HashSet::new();
    let mut stack: Vec<&'a Object<'a>> =
        globals.iter().filter(|o| o.is_function && o.is_live.get()).copied().collect();

    while let Some(obj) = stack.pop() {
        if !visited.insert(obj as *const Object<'a>) {
            continue;
        }
        let Some(func) = &obj.func else { continue };
        for callee_name in func.calls.borrow().iter() {
            if let Some(&callee) = by_name.get(callee_name.as_str()) {
                if !callee.is_live.get() {
                    callee.is_live.set(true);
                }
                stack.push(callee);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::TranslationUnit;
    use crate::sema::FunctionObject;
    use crate::types::TypeArena;
    use std::cell::{Cell, RefCell};

    fn make_fn<'a>(tu: &'a TranslationUnit, ty: &'a crate::types::Type<'a>, name: &str, live: bool, calls: &[&str]) -> &'a Object<'a> {
        tu.alloc_object(Object {
            name: name.to_string(),
            ty,
            is_local: false,
            is_static: true,
            is_definition: Cell::new(true),
            is_tentative: Cell::new(false),
            is_tls: false,
            is_inline: !live,
            is_live: Cell::new(live),
            is_function: true,
            is_variadic: false,
            stack_offset: Cell::new(0),
            func: Some(FunctionObject {
                params: RefCell::new(Vec::new()),
                body: RefCell::new(None),
                locals: RefCell::new(Vec::new()),
                static_locals: RefCell::new(Vec::new()),
                calls: RefCell::new(calls.iter().map(|s| s.to_string()).collect()),
                dealloc_vla: Cell::new(false),
                vla_vars: RefCell::new(Vec::new()),
                dont_reuse_stack: Cell::new(false),
                max_call_stack_args: Cell::new(0),
            }),
            init_data: RefCell::new(None),
        })
    }

    #[test]
    fn unreferenced_static_inline_stays_dead() {
        let arena = TypeArena::new();
        let tu = TranslationUnit::default();
        let ty = arena.int();
        let main = make_fn(&tu, ty, "main", true, &[]);
        let helper = make_fn(&tu, ty, "helper", false, &[]);
        mark_live(&[main, helper]);
        assert!(main.is_live.get());
        assert!(!helper.is_live.get());
    }

    #[test]
    fn transitively_called_static_inline_becomes_live() {
        let arena = TypeArena::new();
        let tu = TranslationUnit::default();
        let ty = arena.int();
        let main = make_fn(&tu, ty, "main", true, &["a"]);
        let a = make_fn(&tu, ty, "a", false, &["b"]);
        let b = make_fn(&tu, ty, "b", false, &[]);
        let unused = make_fn(&tu, ty, "unused", false, &[]);
        mark_live(&[main, a, b, unused]);
        assert!(a.is_live.get());
        assert!(b.is_live.get());
        assert!(!unused.is_live.get());
    }
}
