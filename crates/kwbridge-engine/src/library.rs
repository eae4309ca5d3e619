//! Keyword libraries and name resolution.

use std::rc::Rc;

use crate::context::ExecutionContext;
use crate::model::{Arg, UserKeyword};
use crate::status::KeywordError;

/// A named collection of keywords implemented in Rust.
///
/// Implementations take `&self`; libraries that keep state use interior
/// mutability. A library can call back into the engine through the
/// [`ExecutionContext`] it receives, for example to run other keywords by
/// name or to log messages.
pub trait KeywordLibrary {
    /// Library name used in imports and `Library.Keyword` calls.
    fn name(&self) -> &str;

    /// Canonical names of the keywords this library provides.
    fn keyword_names(&self) -> Vec<String>;

    /// Run keyword `name` (one of [`Self::keyword_names`]) with `args`.
    ///
    /// # Errors
    /// Returns a [`KeywordError`] when the keyword fails or skips.
    fn run_keyword(
        &self,
        name: &str,
        args: &[Arg],
        ctx: &ExecutionContext,
    ) -> Result<(), KeywordError>;
}

/// Normalise a keyword or library name for comparison.
///
/// Case, spaces and underscores are ignored.
///
/// # Examples
///
/// ```
/// use kwbridge_engine::normalize_name;
///
/// assert_eq!(normalize_name("Should Be_Equal"), normalize_name("shouldbeequal"));
/// ```
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

pub(crate) enum Resolved {
    User(UserKeyword),
    Library {
        library: Rc<dyn KeywordLibrary>,
        keyword: String,
    },
}

#[derive(Default)]
struct Scope {
    libraries: Vec<Rc<dyn KeywordLibrary>>,
    keywords: Vec<UserKeyword>,
}

/// Libraries and user keywords visible to the running suite.
#[derive(Default)]
pub(crate) struct Namespace {
    available: Vec<Rc<dyn KeywordLibrary>>,
    global: Vec<Rc<dyn KeywordLibrary>>,
    scopes: Vec<Scope>,
}

impl Namespace {
    pub(crate) fn new(global: Vec<Rc<dyn KeywordLibrary>>, available: Vec<Rc<dyn KeywordLibrary>>) -> Self {
        Self {
            available,
            global,
            scopes: Vec::new(),
        }
    }

    pub(crate) fn find_library(&self, name: &str) -> Option<Rc<dyn KeywordLibrary>> {
        let wanted = normalize_name(name);
        self.global
            .iter()
            .chain(self.available.iter())
            .find(|library| normalize_name(library.name()) == wanted)
            .cloned()
    }

    pub(crate) fn push_scope(&mut self, keywords: Vec<UserKeyword>) {
        self.scopes.push(Scope {
            libraries: Vec::new(),
            keywords,
        });
    }

    pub(crate) fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Make `library` visible in the innermost scope.
    pub(crate) fn import(&mut self, library: Rc<dyn KeywordLibrary>) {
        if let Some(scope) = self.scopes.last_mut() {
            let name = normalize_name(library.name());
            if !scope
                .libraries
                .iter()
                .any(|existing| normalize_name(existing.name()) == name)
            {
                scope.libraries.push(library);
            }
        } else {
            self.global.push(library);
        }
    }

    fn libraries(&self) -> impl Iterator<Item = &Rc<dyn KeywordLibrary>> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.libraries.iter())
            .chain(self.global.iter())
    }

    pub(crate) fn resolve(&self, name: &str) -> Option<Resolved> {
        let wanted = normalize_name(name);
        if let Some(found) = self.resolve_qualified(name) {
            return Some(found);
        }
        for scope in self.scopes.iter().rev() {
            if let Some(keyword) = scope
                .keywords
                .iter()
                .find(|keyword| normalize_name(&keyword.name) == wanted)
            {
                return Some(Resolved::User(keyword.clone()));
            }
        }
        self.libraries().find_map(|library| {
            library
                .keyword_names()
                .into_iter()
                .find(|keyword| normalize_name(keyword) == wanted)
                .map(|keyword| Resolved::Library {
                    library: Rc::clone(library),
                    keyword,
                })
        })
    }

    fn resolve_qualified(&self, name: &str) -> Option<Resolved> {
        let (prefix, rest) = name.rsplit_once('.')?;
        let library = normalize_name(prefix);
        let wanted = normalize_name(rest);
        self.libraries()
            .filter(|candidate| normalize_name(candidate.name()) == library)
            .find_map(|candidate| {
                candidate
                    .keyword_names()
                    .into_iter()
                    .find(|keyword| normalize_name(keyword) == wanted)
                    .map(|keyword| Resolved::Library {
                        library: Rc::clone(candidate),
                        keyword,
                    })
            })
    }
}
