//! Builds the suite tree from source paths.
//!
//! Sources may be files, directories or in-memory paths advertised by a
//! parser through [`Parser::virtual_sources`]. A directory becomes a suite
//! whose children are its supported files and subdirectories; children that
//! end up without tests are dropped.

use std::collections::BTreeSet;
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;

use crate::error::EngineError;
use crate::model::{TestSuite, printable_name};
use crate::parser::Parser;

pub(crate) struct SuiteBuilder<'a> {
    parsers: &'a [Rc<dyn Parser>],
    extensions: Option<Vec<String>>,
    virtual_sources: Vec<(Utf8PathBuf, Rc<dyn Parser>)>,
    errors: Vec<String>,
}

impl<'a> SuiteBuilder<'a> {
    pub(crate) fn new(parsers: &'a [Rc<dyn Parser>], extensions: Option<Vec<String>>) -> Self {
        let virtual_sources = parsers
            .iter()
            .flat_map(|parser| {
                parser
                    .virtual_sources()
                    .into_iter()
                    .map(move |source| (source, Rc::clone(parser)))
            })
            .collect();
        Self {
            parsers,
            extensions,
            virtual_sources,
            errors: Vec::new(),
        }
    }

    /// Parse errors recorded while building; the affected files were skipped.
    pub(crate) fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }

    pub(crate) fn build(&mut self, sources: &[Utf8PathBuf]) -> Result<TestSuite, EngineError> {
        let mut suites = Vec::new();
        for source in sources {
            match self.build_source(source, true)? {
                Some(suite) => suites.push(suite),
                None => {
                    return Err(EngineError::Data(format!(
                        "Parsing '{source}' failed: File has no supported extension."
                    )));
                }
            }
        }
        match suites.len() {
            0 => Err(EngineError::Data("No sources given.".into())),
            1 => Ok(suites.remove(0)),
            _ => {
                let name = suites
                    .iter()
                    .map(|suite| suite.name.as_str())
                    .collect::<Vec<_>>()
                    .join(" & ");
                let mut root = TestSuite::new(name);
                root.suites = suites;
                Ok(root)
            }
        }
    }

    fn build_source(&mut self, path: &Utf8Path, explicit: bool) -> Result<Option<TestSuite>, EngineError> {
        if let Some(parser) = self.virtual_parser(path) {
            return Ok(self.parse_with(parser.as_ref(), path));
        }
        if path.is_file() {
            let Some(parser) = self.parser_for(path, explicit) else {
                return Ok(None);
            };
            return Ok(self.parse_with(parser.as_ref(), path));
        }
        if path.is_dir() || self.has_virtual_children(path) {
            return self.build_directory(path).map(Some);
        }
        Err(EngineError::Data(format!(
            "Parsing '{path}' failed: File or directory to execute does not exist."
        )))
    }

    fn parse_with(&mut self, parser: &dyn Parser, path: &Utf8Path) -> Option<TestSuite> {
        match parser.parse(path) {
            Ok(suite) => Some(suite),
            Err(error) => {
                log::error!("{error}");
                self.errors.push(error.to_string());
                None
            }
        }
    }

    fn build_directory(&mut self, path: &Utf8Path) -> Result<TestSuite, EngineError> {
        let mut suite = TestSuite::new(directory_name(path));
        suite.source = Some(path.to_path_buf());
        for child in self.children(path) {
            if let Some(child_suite) = self.build_source(&child, false)? {
                if child_suite.test_count() > 0 {
                    suite.suites.push(child_suite);
                }
            }
        }
        Ok(suite)
    }

    fn children(&self, path: &Utf8Path) -> BTreeSet<Utf8PathBuf> {
        let mut children = BTreeSet::new();
        if path.is_dir() {
            let entries = WalkDir::new(path)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok);
            for entry in entries {
                let Ok(child) = Utf8PathBuf::from_path_buf(entry.path().to_path_buf()) else {
                    continue;
                };
                if is_ignored(&child) {
                    continue;
                }
                if child.is_dir() || self.parser_for(&child, false).is_some() {
                    children.insert(child);
                }
            }
        }
        for (source, _) in &self.virtual_sources {
            if let Ok(relative) = source.strip_prefix(path) {
                if let Some(first) = relative.components().next() {
                    children.insert(path.join(first.as_str()));
                }
            }
        }
        children
    }

    fn virtual_parser(&self, path: &Utf8Path) -> Option<Rc<dyn Parser>> {
        self.virtual_sources
            .iter()
            .find(|(source, _)| source == path)
            .filter(|(source, _)| self.extension_allowed(source))
            .map(|(_, parser)| Rc::clone(parser))
    }

    fn has_virtual_children(&self, path: &Utf8Path) -> bool {
        self.virtual_sources
            .iter()
            .any(|(source, _)| source != path && source.starts_with(path))
    }

    fn parser_for(&self, path: &Utf8Path, explicit: bool) -> Option<Rc<dyn Parser>> {
        let extension = path.extension()?.to_ascii_lowercase();
        if !explicit && !self.extension_allowed(path) {
            return None;
        }
        self.parsers
            .iter()
            .find(|parser| parser.extensions().contains(&extension))
            .cloned()
    }

    fn extension_allowed(&self, path: &Utf8Path) -> bool {
        let Some(allowed) = &self.extensions else {
            return true;
        };
        path.extension()
            .is_some_and(|extension| allowed.contains(&extension.to_ascii_lowercase()))
    }
}

fn is_ignored(path: &Utf8Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.starts_with('.') || name.starts_with('_'))
}

fn directory_name(path: &Utf8Path) -> String {
    let name = path
        .file_name()
        .map(ToString::to_string)
        .or_else(|| {
            path.canonicalize_utf8()
                .ok()
                .and_then(|full| full.file_name().map(ToString::to_string))
        })
        .unwrap_or_else(|| path.to_string());
    printable_name(&name)
}
