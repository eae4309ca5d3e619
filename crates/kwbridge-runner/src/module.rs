//! Declarative test modules.
//!
//! A [`TestModule`] plays the role of a test source file: it holds test
//! functions and classes in definition order, each with markers and docs, and
//! optional setup/teardown hooks. [`TestModule::collect`] turns it into items
//! whose node ids follow the `path::Class::function` layout.

use std::cell::Cell;
use std::rc::Rc;

use camino::Utf8PathBuf;

use crate::context::TestContext;
use crate::item::{Hook, Item, ItemBehavior, ItemSpec, Location, Owner, OwnerKind};
use crate::mark::Mark;
use crate::outcome::TestError;

fn hook(body: impl Fn(&TestContext<'_>) -> Result<(), TestError> + 'static) -> Hook {
    Rc::new(body)
}

/// A per-test fixture: setup before the test, optional teardown after it.
#[derive(Clone)]
pub struct Fixture {
    name: String,
    setup: Hook,
    teardown: Option<Hook>,
}

impl Fixture {
    /// Fixture running `setup` before each test that uses it.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        setup: impl Fn(&TestContext<'_>) -> Result<(), TestError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            setup: hook(setup),
            teardown: None,
        }
    }

    /// Run `teardown` after the test when setup succeeded.
    #[must_use]
    pub fn with_teardown(
        mut self,
        teardown: impl Fn(&TestContext<'_>) -> Result<(), TestError> + 'static,
    ) -> Self {
        self.teardown = Some(hook(teardown));
        self
    }

    /// Fixture name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A test function.
#[derive(Clone)]
pub struct TestFunction {
    name: String,
    doc: String,
    line: Option<u32>,
    marks: Vec<Mark>,
    fixtures: Vec<Fixture>,
    body: Hook,
}

impl TestFunction {
    /// Test function `name` running `body`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&TestContext<'_>) -> Result<(), TestError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            doc: String::new(),
            line: None,
            marks: Vec::new(),
            fixtures: Vec::new(),
            body: hook(body),
        }
    }

    /// Set the documentation.
    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    /// Set the definition line.
    #[must_use]
    pub fn line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Add a marker.
    #[must_use]
    pub fn mark(mut self, mark: Mark) -> Self {
        self.marks.push(mark);
        self
    }

    /// Use a fixture. Fixtures set up in the order they are added.
    #[must_use]
    pub fn fixture(mut self, fixture: Fixture) -> Self {
        self.fixtures.push(fixture);
        self
    }
}

/// A class grouping test functions.
#[derive(Clone)]
pub struct TestClass {
    name: String,
    doc: String,
    marks: Vec<Mark>,
    setup: Option<Hook>,
    teardown: Option<Hook>,
    functions: Vec<TestFunction>,
}

impl TestClass {
    /// Empty class `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: String::new(),
            marks: Vec::new(),
            setup: None,
            teardown: None,
            functions: Vec::new(),
        }
    }

    /// Set the documentation.
    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    /// Add a marker applying to every function of the class.
    #[must_use]
    pub fn mark(mut self, mark: Mark) -> Self {
        self.marks.push(mark);
        self
    }

    /// Run `setup` once before the first test of the class.
    #[must_use]
    pub fn setup(mut self, setup: impl Fn(&TestContext<'_>) -> Result<(), TestError> + 'static) -> Self {
        self.setup = Some(hook(setup));
        self
    }

    /// Run `teardown` once after the last test of the class.
    #[must_use]
    pub fn teardown(
        mut self,
        teardown: impl Fn(&TestContext<'_>) -> Result<(), TestError> + 'static,
    ) -> Self {
        self.teardown = Some(hook(teardown));
        self
    }

    /// Add a test function.
    #[must_use]
    pub fn function(mut self, function: TestFunction) -> Self {
        self.functions.push(function);
        self
    }
}

#[derive(Clone)]
enum Member {
    Function(TestFunction),
    Class(TestClass),
}

/// A test source file.
#[derive(Clone)]
pub struct TestModule {
    path: Utf8PathBuf,
    doc: String,
    marks: Vec<Mark>,
    setup: Option<Hook>,
    teardown: Option<Hook>,
    members: Vec<Member>,
}

impl TestModule {
    /// Empty module at `path`, relative to the session root.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            doc: String::new(),
            marks: Vec::new(),
            setup: None,
            teardown: None,
            members: Vec::new(),
        }
    }

    /// Module path.
    #[must_use]
    pub fn path(&self) -> &camino::Utf8Path {
        &self.path
    }

    /// Module name: the file stem.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.file_stem().unwrap_or(self.path.as_str())
    }

    /// Set the documentation.
    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    /// Add a marker applying to every test of the module.
    #[must_use]
    pub fn mark(mut self, mark: Mark) -> Self {
        self.marks.push(mark);
        self
    }

    /// Run `setup` once before the first test of the module.
    #[must_use]
    pub fn setup(mut self, setup: impl Fn(&TestContext<'_>) -> Result<(), TestError> + 'static) -> Self {
        self.setup = Some(hook(setup));
        self
    }

    /// Run `teardown` once after the last test of the module.
    #[must_use]
    pub fn teardown(
        mut self,
        teardown: impl Fn(&TestContext<'_>) -> Result<(), TestError> + 'static,
    ) -> Self {
        self.teardown = Some(hook(teardown));
        self
    }

    /// Add a module-level test function.
    #[must_use]
    pub fn function(mut self, function: TestFunction) -> Self {
        self.members.push(Member::Function(function));
        self
    }

    /// Add a class.
    #[must_use]
    pub fn class(mut self, class: TestClass) -> Self {
        self.members.push(Member::Class(class));
        self
    }

    /// Items of the module in definition order.
    #[must_use]
    pub fn collect(&self) -> Vec<Item> {
        let module = Rc::new(Owner {
            doc: self.doc.clone(),
            marks: self.marks.clone(),
            setup: self.setup.clone(),
            teardown: self.teardown.clone(),
            ..Owner::new(self.path.as_str(), OwnerKind::Module, self.name(), self.path.clone())
        });
        let mut items = Vec::new();
        for member in &self.members {
            match member {
                Member::Function(function) => {
                    items.push(self.function_item(function, vec![Rc::clone(&module)], None));
                }
                Member::Class(class) => {
                    let owner = Rc::new(Owner {
                        doc: class.doc.clone(),
                        marks: class.marks.clone(),
                        setup: class.setup.clone(),
                        teardown: class.teardown.clone(),
                        ..Owner::new(
                            format!("{}::{}", self.path, class.name),
                            OwnerKind::Class,
                            class.name.clone(),
                            self.path.clone(),
                        )
                    });
                    for function in &class.functions {
                        items.push(self.function_item(
                            function,
                            vec![Rc::clone(&module), Rc::clone(&owner)],
                            Some(&class.name),
                        ));
                    }
                }
            }
        }
        items
    }

    fn function_item(&self, function: &TestFunction, owners: Vec<Rc<Owner>>, class: Option<&str>) -> Item {
        let (nodeid, domain) = class.map_or_else(
            || (format!("{}::{}", self.path, function.name), function.name.clone()),
            |class| {
                (
                    format!("{}::{class}::{}", self.path, function.name),
                    format!("{class}.{}", function.name),
                )
            },
        );
        Item::new(
            ItemSpec {
                nodeid,
                name: function.name.clone(),
                location: Location {
                    path: self.path.clone(),
                    line: function.line,
                    domain,
                },
                doc: function.doc.clone(),
                marks: function.marks.clone(),
            },
            owners,
            Rc::new(FunctionBehavior {
                fixtures: function.fixtures.clone(),
                body: Rc::clone(&function.body),
                ready: Cell::new(0),
            }),
        )
    }
}

struct FunctionBehavior {
    fixtures: Vec<Fixture>,
    body: Hook,
    ready: Cell<usize>,
}

impl ItemBehavior for FunctionBehavior {
    fn setup(&self, ctx: &TestContext<'_>) -> Result<(), TestError> {
        self.ready.set(0);
        for fixture in &self.fixtures {
            log::debug!("setting up fixture '{}' for {}", fixture.name, ctx.item().nodeid());
            (fixture.setup)(ctx)?;
            self.ready.set(self.ready.get() + 1);
        }
        Ok(())
    }

    fn runtest(&self, ctx: &TestContext<'_>) -> Result<(), TestError> {
        (self.body)(ctx)
    }

    fn teardown(&self, ctx: &TestContext<'_>) -> Result<(), TestError> {
        let ready = self.ready.replace(0);
        let mut first_error = None;
        for fixture in self.fixtures.iter().take(ready).rev() {
            let Some(teardown) = &fixture.teardown else {
                continue;
            };
            if let Err(error) = teardown(ctx) {
                log::debug!("fixture '{}' teardown failed: {error}", fixture.name);
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
