//! The per-thread stack of active pipelines.
//!
//! [`Node::new`](crate::Node::new) registers the node with the pipeline on
//! top of this stack. Pipelines are pushed by
//! [`Pipeline::enter`](crate::Pipeline::enter) and popped when the returned
//! [`Scope`] guard is dropped, so scopes nest like the blocks that hold them.

use std::cell::RefCell;
use std::rc::Rc;

use crate::pipeline::Registry;

type Shared = Rc<RefCell<Registry>>;

thread_local! {
    static STACK: RefCell<Vec<Shared>> = const { RefCell::new(Vec::new()) };
}

/// Keeps a pipeline active on the current thread until dropped.
///
/// The guard cannot be sent to another thread.
#[must_use = "the pipeline is only active while the scope is alive"]
pub struct Scope {
    registry: Shared,
}

pub(crate) fn push(registry: Shared) -> Scope {
    STACK.with_borrow_mut(|stack| stack.push(Rc::clone(&registry)));
    Scope { registry }
}

/// The innermost active registry, if any.
pub(crate) fn current() -> Option<Shared> {
    STACK.with_borrow(|stack| stack.last().cloned())
}

/// Number of active scopes on the current thread.
pub fn depth() -> usize {
    STACK.with_borrow(Vec::len)
}

impl Drop for Scope {
    fn drop(&mut self) {
        // The stack may already be gone if the thread is shutting down.
        let _ = STACK.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.last() {
                Some(top) if Rc::ptr_eq(top, &self.registry) => {
                    stack.pop();
                }
                _ => {
                    tracing::warn!("pipeline scope dropped out of order");
                    if let Some(position) = stack
                        .iter()
                        .rposition(|registry| Rc::ptr_eq(registry, &self.registry))
                    {
                        stack.remove(position);
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pipeline;

    #[test]
    fn test_nested_scopes() {
        let outer = Pipeline::named("outer");
        let inner = Pipeline::named("inner");

        assert_eq!(depth(), 0);
        {
            let _outer = outer.enter();
            assert_eq!(depth(), 1);
            {
                let _inner = inner.enter();
                assert_eq!(depth(), 2);
            }
            assert_eq!(depth(), 1);
        }
        assert_eq!(depth(), 0);
        assert!(current().is_none());
    }

    #[test]
    fn test_out_of_order_drop_removes_own_entry() {
        let a = Pipeline::named("a");
        let b = Pipeline::named("b");

        let scope_a = a.enter();
        let scope_b = b.enter();
        drop(scope_a);

        assert_eq!(depth(), 1);
        let top = current().unwrap();
        assert_eq!(top.borrow().name(), "b");

        drop(scope_b);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn test_stack_is_per_thread() {
        let pipeline = Pipeline::new();
        let _scope = pipeline.enter();

        let other = std::thread::spawn(depth).join().unwrap();
        assert_eq!(other, 0);
        assert_eq!(depth(), 1);
    }
}
