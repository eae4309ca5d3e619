//! XML output files.
//!
//! The writer renders an [`ExecutionResult`] as an `<output>` document; the
//! reader turns such a document back into a result tree. Only the elements
//! this crate writes are understood; anything else is skipped.

use std::fmt::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::OutputError;
use crate::escape::write_escaped;
use crate::model::KeywordKind;
use crate::result::{
    BodyItem, ExecutionResult, KeywordResult, LogLevel, Message, Status, SuiteResult, TestResult,
};

/// Render `result` as an XML output document.
///
/// # Examples
/// ```
/// use kwbridge_engine::{ExecutionResult, SuiteResult, output};
///
/// let result = ExecutionResult::new(SuiteResult::named("Empty"));
/// let mut text = String::new();
/// output::write(&mut text, &result).unwrap();
/// assert!(text.contains("<suite name=\"Empty\">"));
/// ```
///
/// # Errors
/// Returns an error if writing to the provided formatter fails.
pub fn write<W: Write>(writer: &mut W, result: &ExecutionResult) -> fmt::Result {
    writer.write_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n")?;
    writer.write_str("<output generator=\"")?;
    write_escaped(writer, &result.generator)?;
    writer.write_str("\">\n")?;
    write_suite(writer, &result.suite)?;
    let stats = result.statistics();
    writeln!(
        writer,
        "<statistics>\n<total>\n<stat pass=\"{}\" fail=\"{}\" skip=\"{}\">All Tests</stat>\n</total>\n</statistics>",
        stats.passed, stats.failed, stats.skipped
    )?;
    writer.write_str("<errors>\n")?;
    for message in &result.errors {
        write_message(writer, message)?;
    }
    writer.write_str("</errors>\n</output>\n")
}

/// Write `result` to `path`, creating parent directories as needed.
///
/// # Errors
/// Returns [`OutputError::Write`] if the file cannot be written.
pub fn write_output(result: &ExecutionResult, path: &Utf8Path) -> Result<(), OutputError> {
    let mut text = String::new();
    write(&mut text, result).map_err(|_| OutputError::Write {
        path: path.to_path_buf(),
        source: std::io::Error::other("formatting output failed"),
    })?;
    write_file(path, &text)
}

pub(crate) fn write_file(path: &Utf8Path, text: &str) -> Result<(), OutputError> {
    let io_error = |source| OutputError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(path, text).map_err(io_error)
}

fn write_suite<W: Write>(writer: &mut W, suite: &SuiteResult) -> fmt::Result {
    writer.write_str("<suite name=\"")?;
    write_escaped(writer, &suite.name)?;
    writer.write_char('"')?;
    if let Some(source) = &suite.source {
        writer.write_str(" source=\"")?;
        write_escaped(writer, source.as_str())?;
        writer.write_char('"')?;
    }
    writer.write_str(">\n")?;
    for (name, value) in &suite.metadata {
        writer.write_str("<meta name=\"")?;
        write_escaped(writer, name)?;
        writer.write_str("\">")?;
        write_escaped(writer, value)?;
        writer.write_str("</meta>\n")?;
    }
    write_doc(writer, &suite.doc)?;
    if let Some(setup) = &suite.setup {
        write_keyword(writer, setup)?;
    }
    for child in &suite.suites {
        write_suite(writer, child)?;
    }
    for test in &suite.tests {
        write_test(writer, test)?;
    }
    if let Some(teardown) = &suite.teardown {
        write_keyword(writer, teardown)?;
    }
    write_status(writer, suite.status, &suite.message)?;
    writer.write_str("</suite>\n")
}

fn write_test<W: Write>(writer: &mut W, test: &TestResult) -> fmt::Result {
    writer.write_str("<test name=\"")?;
    write_escaped(writer, &test.name)?;
    writer.write_char('"')?;
    if let Some(line) = test.lineno {
        write!(writer, " line=\"{line}\"")?;
    }
    writer.write_str(">\n")?;
    for keyword in test.keywords() {
        write_keyword(writer, keyword)?;
    }
    write_doc(writer, &test.doc)?;
    for tag in &test.tags {
        writer.write_str("<tag>")?;
        write_escaped(writer, tag)?;
        writer.write_str("</tag>\n")?;
    }
    write_status(writer, test.status, &test.message)?;
    writer.write_str("</test>\n")
}

fn write_keyword<W: Write>(writer: &mut W, keyword: &KeywordResult) -> fmt::Result {
    writer.write_str("<kw name=\"")?;
    write_escaped(writer, &keyword.name)?;
    writer.write_char('"')?;
    if let Some(library) = &keyword.library {
        writer.write_str(" library=\"")?;
        write_escaped(writer, library)?;
        writer.write_char('"')?;
    }
    if keyword.kind != KeywordKind::Keyword {
        write!(writer, " type=\"{}\"", keyword.kind.as_str())?;
    }
    writer.write_str(">\n")?;
    for arg in &keyword.args {
        writer.write_str("<arg>")?;
        write_escaped(writer, arg)?;
        writer.write_str("</arg>\n")?;
    }
    for item in &keyword.items {
        match item {
            BodyItem::Keyword(child) => write_keyword(writer, child)?,
            BodyItem::Message(message) => write_message(writer, message)?,
        }
    }
    write_status(writer, keyword.status, &keyword.message)?;
    writer.write_str("</kw>\n")
}

fn write_message<W: Write>(writer: &mut W, message: &Message) -> fmt::Result {
    write!(writer, "<msg level=\"{}\"", message.level)?;
    if message.html {
        writer.write_str(" html=\"true\"")?;
    }
    writer.write_char('>')?;
    write_escaped(writer, &message.text)?;
    writer.write_str("</msg>\n")
}

fn write_doc<W: Write>(writer: &mut W, doc: &str) -> fmt::Result {
    if doc.is_empty() {
        return Ok(());
    }
    writer.write_str("<doc>")?;
    write_escaped(writer, doc)?;
    writer.write_str("</doc>\n")
}

fn write_status<W: Write>(writer: &mut W, status: Status, message: &str) -> fmt::Result {
    write!(writer, "<status status=\"{status}\"")?;
    if message.is_empty() {
        return writer.write_str("/>\n");
    }
    writer.write_char('>')?;
    write_escaped(writer, message)?;
    writer.write_str("</status>\n")
}

/// Read the output file at `path`.
///
/// # Errors
/// Returns [`OutputError::Read`] when the file cannot be read and
/// [`OutputError::Invalid`] when it is not an output document.
pub fn read_output(path: &Utf8Path) -> Result<ExecutionResult, OutputError> {
    let text = std::fs::read_to_string(path).map_err(|source| OutputError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_output(path, &text)
}

/// Parse output document `text`; `path` is only used in error messages.
///
/// # Errors
/// Returns [`OutputError::Invalid`] when `text` is not an output document.
pub fn parse_output(path: &Utf8Path, text: &str) -> Result<ExecutionResult, OutputError> {
    OutputReader::new(path).read(text)
}

enum Frame {
    Suite(SuiteResult),
    Test(TestResult),
    Keyword(KeywordResult),
    Errors,
    Skipped,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Leaf {
    Meta,
    Doc,
    Arg,
    Msg,
    Status,
    Tag,
}

struct OutputReader {
    path: Utf8PathBuf,
    stack: Vec<Frame>,
    root: Option<SuiteResult>,
    errors: Vec<Message>,
    generator: String,
    leaf: Option<(Leaf, Vec<(String, String)>, String)>,
}

impl OutputReader {
    fn new(path: &Utf8Path) -> Self {
        Self {
            path: path.to_path_buf(),
            stack: Vec::new(),
            root: None,
            errors: Vec::new(),
            generator: String::new(),
            leaf: None,
        }
    }

    fn invalid(&self, message: impl fmt::Display) -> OutputError {
        OutputError::Invalid {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }

    fn read(mut self, text: &str) -> Result<ExecutionResult, OutputError> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);
        let mut seen_output = false;
        loop {
            let event = reader.read_event().map_err(|error| self.invalid(error))?;
            match event {
                Event::Start(start) => {
                    let name = element_name(&start);
                    let attributes = self.attributes(&start)?;
                    seen_output |= name == "output";
                    self.start(&name, attributes)?;
                }
                Event::Empty(start) => {
                    let name = element_name(&start);
                    let attributes = self.attributes(&start)?;
                    self.start(&name, attributes)?;
                    self.end(&name)?;
                }
                Event::End(end) => {
                    let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                    self.end(&name)?;
                }
                Event::Text(content) => {
                    let content = content.unescape().map_err(|error| self.invalid(error))?;
                    if let Some((_, _, text)) = &mut self.leaf {
                        text.push_str(&content);
                    }
                }
                Event::CData(content) => {
                    if let Some((_, _, text)) = &mut self.leaf {
                        text.push_str(&String::from_utf8_lossy(&content));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        if !seen_output {
            return Err(self.invalid("Expected 'output' root element"));
        }
        let Some(suite) = self.root else {
            return Err(self.invalid("Output contains no suite"));
        };
        Ok(ExecutionResult {
            suite,
            errors: self.errors,
            generator: self.generator,
        })
    }

    fn attributes(&self, start: &BytesStart<'_>) -> Result<Vec<(String, String)>, OutputError> {
        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|error| self.invalid(error))?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute
                .unescape_value()
                .map_err(|error| self.invalid(error))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(attributes)
    }

    fn start(&mut self, name: &str, attributes: Vec<(String, String)>) -> Result<(), OutputError> {
        match name {
            "output" => {
                self.generator = attribute(&attributes, "generator").unwrap_or_default();
            }
            "suite" => {
                let mut suite = SuiteResult::named(attribute(&attributes, "name").unwrap_or_default());
                suite.source = attribute(&attributes, "source").map(Utf8PathBuf::from);
                self.stack.push(Frame::Suite(suite));
            }
            "test" => {
                let test = TestResult {
                    name: attribute(&attributes, "name").unwrap_or_default(),
                    lineno: attribute(&attributes, "line").and_then(|line| line.parse().ok()),
                    ..TestResult::default()
                };
                self.stack.push(Frame::Test(test));
            }
            "kw" => {
                let keyword = KeywordResult {
                    name: attribute(&attributes, "name").unwrap_or_default(),
                    library: attribute(&attributes, "library"),
                    kind: attribute(&attributes, "type")
                        .map_or(KeywordKind::Keyword, |kind| KeywordKind::from_output(&kind)),
                    ..KeywordResult::default()
                };
                self.stack.push(Frame::Keyword(keyword));
            }
            "errors" => self.stack.push(Frame::Errors),
            "statistics" => self.stack.push(Frame::Skipped),
            "meta" => self.leaf = Some((Leaf::Meta, attributes, String::new())),
            "doc" => self.leaf = Some((Leaf::Doc, attributes, String::new())),
            "arg" => self.leaf = Some((Leaf::Arg, attributes, String::new())),
            "msg" => self.leaf = Some((Leaf::Msg, attributes, String::new())),
            "status" => self.leaf = Some((Leaf::Status, attributes, String::new())),
            "tag" => self.leaf = Some((Leaf::Tag, attributes, String::new())),
            _ => {}
        }
        Ok(())
    }

    fn end(&mut self, name: &str) -> Result<(), OutputError> {
        match name {
            "suite" | "test" | "kw" => {
                let Some(frame) = self.stack.pop() else {
                    return Err(self.invalid(format!("Unexpected closing tag '{name}'")));
                };
                self.close_frame(frame)
            }
            "errors" | "statistics" => {
                self.stack.pop();
                Ok(())
            }
            "meta" | "doc" | "arg" | "msg" | "status" | "tag" => {
                if let Some((leaf, attributes, text)) = self.leaf.take() {
                    self.close_leaf(leaf, &attributes, text)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn close_frame(&mut self, frame: Frame) -> Result<(), OutputError> {
        match (frame, self.stack.last_mut()) {
            (Frame::Suite(suite), Some(Frame::Suite(parent))) => parent.suites.push(suite),
            (Frame::Suite(suite), None) => {
                if self.root.is_some() {
                    return Err(self.invalid("Output contains more than one top-level suite"));
                }
                self.root = Some(suite);
            }
            (Frame::Test(test), Some(Frame::Suite(parent))) => parent.tests.push(test),
            (Frame::Keyword(keyword), Some(Frame::Suite(parent))) => match keyword.kind {
                KeywordKind::Setup => parent.setup = Some(keyword),
                _ => parent.teardown = Some(keyword),
            },
            (Frame::Keyword(keyword), Some(Frame::Test(parent))) => match keyword.kind {
                KeywordKind::Setup => parent.setup = Some(keyword),
                KeywordKind::Teardown => parent.teardown = Some(keyword),
                KeywordKind::Keyword => parent.body.push(keyword),
            },
            (Frame::Keyword(keyword), Some(Frame::Keyword(parent))) => {
                parent.items.push(BodyItem::Keyword(keyword));
            }
            _ => return Err(self.invalid("Element is not allowed here")),
        }
        Ok(())
    }

    fn close_leaf(&mut self, leaf: Leaf, attributes: &[(String, String)], text: String) -> Result<(), OutputError> {
        let status = if leaf == Leaf::Status {
            attribute(attributes, "status")
                .map(|status| status.parse::<Status>())
                .transpose()
                .map_err(|error| self.invalid(error))?
                .unwrap_or_default()
        } else {
            Status::default()
        };
        match (leaf, self.stack.last_mut()) {
            (Leaf::Meta, Some(Frame::Suite(suite))) => {
                suite
                    .metadata
                    .push((attribute(attributes, "name").unwrap_or_default(), text));
            }
            (Leaf::Doc, Some(Frame::Suite(suite))) => suite.doc = text,
            (Leaf::Doc, Some(Frame::Test(test))) => test.doc = text,
            (Leaf::Tag, Some(Frame::Test(test))) => test.tags.push(text),
            (Leaf::Arg, Some(Frame::Keyword(keyword))) => keyword.args.push(text),
            (Leaf::Msg, frame) => {
                let message = message_from(attributes, text);
                match frame {
                    Some(Frame::Keyword(keyword)) => keyword.items.push(BodyItem::Message(message)),
                    Some(Frame::Errors) => self.errors.push(message),
                    _ => {}
                }
            }
            (Leaf::Status, frame) => {
                match frame {
                    Some(Frame::Suite(suite)) => (suite.status, suite.message) = (status, text),
                    Some(Frame::Test(test)) => (test.status, test.message) = (status, text),
                    Some(Frame::Keyword(keyword)) => (keyword.status, keyword.message) = (status, text),
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn element_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

fn attribute(attributes: &[(String, String)], name: &str) -> Option<String> {
    attributes
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.clone())
}

fn message_from(attributes: &[(String, String)], text: String) -> Message {
    Message {
        level: attribute(attributes, "level")
            .and_then(|level| level.parse().ok())
            .unwrap_or(LogLevel::Info),
        text,
        html: attribute(attributes, "html").is_some_and(|html| html == "true"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ExecutionResult {
        let mut keyword = KeywordResult {
            name: "Log".into(),
            library: Some("BuiltIn".into()),
            args: vec!["a < b & \"c\"".into()],
            status: Status::Pass,
            ..KeywordResult::default()
        };
        keyword
            .items
            .push(BodyItem::Message(Message::new(LogLevel::Info, "a < b")));
        let test = TestResult {
            name: "Compare".into(),
            tags: vec!["smoke".into()],
            lineno: Some(4),
            status: Status::Fail,
            message: "Setup failed:\nboom".into(),
            setup: Some(KeywordResult {
                name: "Prepare".into(),
                kind: KeywordKind::Setup,
                status: Status::Fail,
                message: "boom".into(),
                ..KeywordResult::default()
            }),
            body: vec![keyword],
            ..TestResult::default()
        };
        let mut child = SuiteResult::named("Child");
        child.tests.push(test);
        child.metadata.push(("Owner".into(), "qa".into()));
        let mut root = SuiteResult::named("Root");
        root.suites.push(child);
        root.update_status();
        let mut result = ExecutionResult::new(root);
        result.errors.push(Message::new(LogLevel::Error, "listener broke"));
        result
    }

    #[test]
    fn written_output_reads_back_as_the_same_tree() {
        let original = sample();
        let mut text = String::new();
        if write(&mut text, &original).is_err() {
            panic!("writing to a string cannot fail");
        }
        let parsed = match parse_output(Utf8Path::new("output.xml"), &text) {
            Ok(parsed) => parsed,
            Err(error) => panic!("output should parse: {error}"),
        };
        assert_eq!(parsed.suite, original.suite);
        assert_eq!(parsed.errors, original.errors);
        assert_eq!(parsed.generator, crate::GENERATOR);
    }

    #[test]
    fn statistics_are_written() {
        let mut text = String::new();
        let _ = write(&mut text, &sample());
        assert!(text.contains("<stat pass=\"0\" fail=\"1\" skip=\"0\">All Tests</stat>"));
    }

    #[test]
    fn non_output_documents_are_rejected() {
        let error = parse_output(Utf8Path::new("x.xml"), "<robot><suite name=\"a\"/></robot>").err();
        assert!(matches!(error, Some(OutputError::Invalid { .. })));
    }

    #[test]
    fn missing_files_are_read_errors() {
        let error = read_output(Utf8Path::new("/no/such/output.xml")).err();
        assert!(matches!(error, Some(OutputError::Read { .. })));
    }
}
