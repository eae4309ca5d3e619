//! Collected test items and the nodes that own them.

use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::context::TestContext;
use crate::mark::Mark;
use crate::outcome::TestError;
use crate::stash::Stash;

/// Setup or teardown function of an owner or fixture.
pub type Hook = Rc<dyn Fn(&TestContext<'_>) -> Result<(), TestError>>;

/// Where an item was defined, for reports.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    /// Source path relative to the session root.
    pub path: Utf8PathBuf,
    /// One-based line of the definition.
    pub line: Option<u32>,
    /// Human-readable name, e.g. `TestGroup.test_add`.
    pub domain: String,
}

/// Kind of an [`Owner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    /// A test module (one source file).
    Module,
    /// A class grouping functions inside a module.
    Class,
}

/// A module or class enclosing items.
///
/// Owners are shared between their items, compare by node id and carry the
/// optional setup and teardown that run once around all of their items.
pub struct Owner {
    /// Node id, e.g. `tests/test_math.rs::TestGroup`.
    pub nodeid: String,
    /// Module or class.
    pub kind: OwnerKind,
    /// Display name.
    pub name: String,
    /// Source file.
    pub path: Utf8PathBuf,
    /// Documentation.
    pub doc: String,
    /// Markers applied to every enclosed item.
    pub marks: Vec<Mark>,
    pub(crate) setup: Option<Hook>,
    pub(crate) teardown: Option<Hook>,
}

impl Owner {
    /// Owner without setup or teardown.
    #[must_use]
    pub fn new(nodeid: impl Into<String>, kind: OwnerKind, name: impl Into<String>, path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            nodeid: nodeid.into(),
            kind,
            name: name.into(),
            path: path.into(),
            doc: String::new(),
            marks: Vec::new(),
            setup: None,
            teardown: None,
        }
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("nodeid", &self.nodeid)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// What an item is, as far as other frameworks are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// A test function defined in a test module.
    Function,
    /// An item whose body lives in another framework's source file.
    External,
}

/// Phase implementations of an item.
pub trait ItemBehavior {
    /// Kind of the item.
    fn kind(&self) -> ItemKind {
        ItemKind::Function
    }

    /// Prepare the item. Owner setups have already run.
    ///
    /// # Errors
    /// A failure or skip ends the setup phase.
    fn setup(&self, ctx: &TestContext<'_>) -> Result<(), TestError> {
        let _ = ctx;
        Ok(())
    }

    /// Run the test body.
    ///
    /// # Errors
    /// A failure or skip ends the call phase.
    fn runtest(&self, ctx: &TestContext<'_>) -> Result<(), TestError>;

    /// Undo [`Self::setup`]. Owner teardowns run afterwards.
    ///
    /// # Errors
    /// A failure or skip ends the teardown phase.
    fn teardown(&self, ctx: &TestContext<'_>) -> Result<(), TestError> {
        let _ = ctx;
        Ok(())
    }
}

/// Fields of a new [`Item`].
#[derive(Debug, Clone, Default)]
pub struct ItemSpec {
    /// Unique node id.
    pub nodeid: String,
    /// Short name.
    pub name: String,
    /// Definition site.
    pub location: Location,
    /// Documentation.
    pub doc: String,
    /// Markers set directly on the item.
    pub marks: Vec<Mark>,
}

struct ItemInner {
    spec: ItemSpec,
    owners: Vec<Rc<Owner>>,
    marks: RefCell<Vec<Mark>>,
    stash: Stash,
    behavior: Rc<dyn ItemBehavior>,
    nextitem: RefCell<Weak<ItemInner>>,
}

/// A collected test.
///
/// Cloning is cheap; clones share the stash and markers.
#[derive(Clone)]
pub struct Item {
    inner: Rc<ItemInner>,
}

impl Item {
    /// Create an item owned by `owners` (outermost first).
    #[must_use]
    pub fn new(spec: ItemSpec, owners: Vec<Rc<Owner>>, behavior: Rc<dyn ItemBehavior>) -> Self {
        let marks = spec.marks.clone();
        Self {
            inner: Rc::new(ItemInner {
                spec,
                owners,
                marks: RefCell::new(marks),
                stash: Stash::default(),
                behavior,
                nextitem: RefCell::new(Weak::new()),
            }),
        }
    }

    /// Unique node id.
    #[must_use]
    pub fn nodeid(&self) -> &str {
        &self.inner.spec.nodeid
    }

    /// Short name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.spec.name
    }

    /// Definition site.
    #[must_use]
    pub fn location(&self) -> &Location {
        &self.inner.spec.location
    }

    /// Documentation.
    #[must_use]
    pub fn doc(&self) -> &str {
        &self.inner.spec.doc
    }

    /// Enclosing owners, outermost first.
    #[must_use]
    pub fn owners(&self) -> &[Rc<Owner>] {
        &self.inner.owners
    }

    /// Per-item scratch storage.
    #[must_use]
    pub fn stash(&self) -> &Stash {
        &self.inner.stash
    }

    /// Item kind.
    #[must_use]
    pub fn kind(&self) -> ItemKind {
        self.inner.behavior.kind()
    }

    pub(crate) fn behavior(&self) -> &dyn ItemBehavior {
        self.inner.behavior.as_ref()
    }

    /// Markers set on the item itself.
    #[must_use]
    pub fn own_marks(&self) -> Ref<'_, Vec<Mark>> {
        self.inner.marks.borrow()
    }

    /// Add a marker to the item.
    pub fn add_mark(&self, mark: Mark) {
        self.inner.marks.borrow_mut().push(mark);
    }

    /// Markers of the item and its owners, closest first.
    #[must_use]
    pub fn iter_marks(&self) -> Vec<Mark> {
        let mut marks = self.inner.marks.borrow().clone();
        for owner in self.inner.owners.iter().rev() {
            marks.extend(owner.marks.iter().cloned());
        }
        marks
    }

    /// Names `-k` matches against: the item, its owners and its markers.
    #[must_use]
    pub fn keywords(&self) -> Vec<String> {
        let mut names = vec![self.name().to_string()];
        names.extend(self.inner.owners.iter().map(|owner| owner.name.clone()));
        names.extend(self.iter_marks().into_iter().map(|mark| mark.name));
        names
    }

    /// The item that runs after this one, if linked.
    #[must_use]
    pub fn nextitem(&self) -> Option<Self> {
        self.inner
            .nextitem
            .borrow()
            .upgrade()
            .map(|inner| Self { inner })
    }

    /// Link the item that runs after this one.
    pub fn set_nextitem(&self, next: Option<&Self>) {
        *self.inner.nextitem.borrow_mut() = next.map_or_else(Weak::new, |item| Rc::downgrade(&item.inner));
    }

    /// `true` when both handles refer to the same item.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Item").field(&self.nodeid()).finish()
    }
}

/// Link every item to its successor.
pub fn link_items(items: &[Item]) {
    for pair in items.windows(2) {
        if let [current, next] = pair {
            current.set_nextitem(Some(next));
        }
    }
    if let Some(last) = items.last() {
        last.set_nextitem(None);
    }
}
