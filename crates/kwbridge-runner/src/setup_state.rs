//! Owner setup and teardown bookkeeping.
//!
//! Owners (modules and classes) are set up lazily before the first item that
//! needs them and torn down once the next item no longer does. A failed owner
//! setup is remembered so every later item under that owner fails with the
//! same error without running the setup again.

use std::cell::RefCell;
use std::rc::Rc;

use crate::context::TestContext;
use crate::item::{Item, Owner};
use crate::outcome::TestError;

struct Entry {
    owner: Rc<Owner>,
    error: Option<TestError>,
}

#[derive(Default)]
pub(crate) struct SetupState {
    stack: RefCell<Vec<Entry>>,
}

impl SetupState {
    /// Set up the owners of `item` that are not set up yet, then the item.
    pub(crate) fn setup(&self, ctx: &TestContext<'_>) -> Result<(), TestError> {
        let item = ctx.item();
        let owners = item.owners();
        if let Err(error) = self.unwind_to(ctx, owners) {
            log::warn!("stale owner teardown failed before {}: {error}", item.nodeid());
        }
        for (depth, owner) in owners.iter().enumerate() {
            let cached = self
                .stack
                .borrow()
                .get(depth)
                .map(|entry| entry.error.clone());
            match cached {
                Some(Some(error)) => return Err(error),
                Some(None) => {}
                None => {
                    self.stack.borrow_mut().push(Entry {
                        owner: Rc::clone(owner),
                        error: None,
                    });
                    let Some(setup) = &owner.setup else {
                        continue;
                    };
                    log::debug!("setting up {}", owner.nodeid);
                    if let Err(error) = setup(ctx) {
                        if let Some(entry) = self.stack.borrow_mut().last_mut() {
                            entry.error = Some(error.clone());
                        }
                        return Err(error);
                    }
                }
            }
        }
        item.behavior().setup(ctx)
    }

    /// Tear down the item, then every owner `nextitem` does not share.
    pub(crate) fn teardown_exact(&self, ctx: &TestContext<'_>, nextitem: Option<&Item>) -> Result<(), TestError> {
        let mut first_error = ctx.item().behavior().teardown(ctx).err();
        let needed = nextitem.map_or(&[][..], Item::owners);
        if let Err(error) = self.unwind_to(ctx, needed) {
            first_error.get_or_insert(error);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Pop and tear down owners until the stack is a prefix of `owners`.
    fn unwind_to(&self, ctx: &TestContext<'_>, owners: &[Rc<Owner>]) -> Result<(), TestError> {
        let mut first_error = None;
        loop {
            let entry = {
                let mut stack = self.stack.borrow_mut();
                let depth = stack.len();
                let keep = stack.last().is_none_or(|top| {
                    depth
                        .checked_sub(1)
                        .and_then(|index| owners.get(index))
                        .is_some_and(|owner| owner.nodeid == top.owner.nodeid)
                });
                if keep {
                    break;
                }
                stack.pop()
            };
            let Some(entry) = entry else {
                break;
            };
            if entry.error.is_some() {
                continue;
            }
            let Some(teardown) = &entry.owner.teardown else {
                continue;
            };
            log::debug!("tearing down {}", entry.owner.nodeid);
            if let Err(error) = teardown(ctx) {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
