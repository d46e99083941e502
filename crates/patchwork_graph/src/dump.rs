// SPDX-License-Identifier: MIT OR Apache-2.0
//! Textual project format.
//!
//! ```text
//! version 1
//! nodes <count>
//! <handle> <x> <y> <name> [<type-tag> <literal> | <type-tag> out <provider> <output>]...
//! ```
//!
//! Inputs are listed in declaration order. Literals are a decimal integer, a
//! double-quoted string, or `<n> v1 .. vn` for a float buffer. `#` starts a
//! comment that runs to the end of the line. [`DumpMode::Human`] adds an
//! aligned comment header above every record; both modes read the same way.
//!
//! Reading is transactional: nodes are built into a scratch graph and
//! back-references are wired only after every node exists.

use crate::config::EngineConfig;
use crate::connection::Connection;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::node::{NodeFactory, NodeHandle};
use crate::port::{DataType, PortId, ValueRef};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Format version written by [`write`]
pub const CURRENT_VERSION: u64 = 1;

type ReadFn = fn(&mut Reader<'_>, &dyn NodeFactory, EngineConfig) -> std::result::Result<Graph, DumpError>;

/// Readers by format version
const VERSIONS: &[(u64, ReadFn)] = &[(1, read_v1)];

/// Versions this build can read
pub fn supported_versions() -> impl Iterator<Item = u64> {
    VERSIONS.iter().map(|(version, _)| *version)
}

/// Rendering style of a dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DumpMode {
    /// One line per node
    Compact,
    /// Aligned comment header above every node, blank lines between records
    #[default]
    Human,
}

/// Error reading a project
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    /// A token is not what the grammar expects here
    #[error("malformed project at line {line}, column {column}: found '{found}' ({})", .context.join(" > "))]
    Malformed {
        /// 1-based line of the offending token
        line: usize,
        /// 1-based column of the offending token
        column: usize,
        /// The offending token
        found: String,
        /// What was being parsed, outermost first
        context: Vec<String>,
    },

    /// No reader is registered for the version
    #[error("can read project versions {supported:?} only, found {found}")]
    UnsupportedVersion {
        /// Version in the project
        found: u64,
        /// Versions this build can read
        supported: Vec<u64>,
    },

    /// The factory does not know a node name
    #[error("unknown node name '{name}' at line {line}, column {column}")]
    UnknownNode {
        /// Name in the project
        name: String,
        /// 1-based line
        line: usize,
        /// 1-based column
        column: usize,
    },

    /// A back-reference could not be connected
    #[error("cannot wire {connection} referenced at line {line}, column {column}")]
    Wiring {
        /// The requested connection
        connection: Connection,
        /// 1-based line of the `out` keyword
        line: usize,
        /// 1-based column of the `out` keyword
        column: usize,
        /// Why the graph refused it
        source: GraphError,
    },

    /// The graph refused a node or a literal
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Render `graph` in the project format
pub fn write(graph: &Graph, mode: DumpMode) -> Result<String> {
    let human = mode == DumpMode::Human;
    let mut out = format!("version {CURRENT_VERSION}\n");
    if human {
        out.push('\n');
    }
    out.push_str(&format!("nodes {}\n", graph.node_count()));
    if human {
        out.push('\n');
    }

    for spec in graph.nodes() {
        let handle = spec.handle();
        let position = spec.position();
        let mut comment = String::new();
        let mut line = String::new();
        let mut field = |comment_part: &str, line_part: &str| {
            comment.push_str(comment_part);
            line.push_str(line_part);
            if human {
                align(&mut comment, &mut line);
            }
        };

        if human {
            field("# ", "");
        }
        field("idx(ui64) ", &format!("{handle} "));
        field("x(i32) ", &format!("{} ", position.x));
        field("y(i32) ", &format!("{} ", position.y));
        field(spec.name(), spec.name());

        for port in spec.inputs() {
            let value = match graph.source(handle, port.id)? {
                Some(connection) => format!("out {} {}", connection.from_node, connection.from_port),
                None => literal(graph.input_value(handle, port.id)?)?,
            };
            field(
                &format!(" {}({})", port.title, port.data_type),
                &format!(" {} {value}", port.data_type),
            );
        }

        if human {
            out.push_str(comment.trim_end());
            out.push('\n');
            out.push_str(line.trim_end());
            out.push_str("\n\n");
        } else {
            out.push_str(&line);
            out.push('\n');
        }
    }
    Ok(out)
}

/// Pad the shorter of the two lines so the next field starts in one column
fn align(comment: &mut String, line: &mut String) {
    let (c, l) = (comment.chars().count(), line.chars().count());
    if c < l {
        comment.extend(std::iter::repeat(' ').take(l - c));
    } else {
        line.extend(std::iter::repeat(' ').take(c - l));
    }
}

fn literal(value: ValueRef<'_>) -> Result<String> {
    Ok(match value {
        ValueRef::I32(v) => v.to_string(),
        ValueRef::Str(s) => {
            if s.contains('"') {
                return Err(GraphError::constraint(format!(
                    "string {s:?} contains a double quote and cannot be written"
                )));
            }
            format!("\"{s}\"")
        }
        ValueRef::FBuffer(values) => {
            let mut text = values.len().to_string();
            for v in values {
                text.push(' ');
                text.push_str(&v.to_string());
            }
            text
        }
    })
}

/// Build a graph from project text
pub(crate) fn read(text: &str, factory: &dyn NodeFactory, config: EngineConfig) -> std::result::Result<Graph, DumpError> {
    let mut reader = Reader::new(text);
    reader.with_context("parsing graph", |reader| {
        reader.expect_keyword("version")?;
        let version: u64 = reader.number("graph version number", "64-bit unsigned integer")?;
        let read_version = VERSIONS
            .iter()
            .find(|(known, _)| *known == version)
            .map(|(_, read)| *read)
            .ok_or_else(|| DumpError::UnsupportedVersion {
                found: version,
                supported: supported_versions().collect(),
            })?;
        read_version(reader, factory, config)
    })
}

/// Back-reference waiting for pass two
struct PendingLink {
    connection: Connection,
    line: usize,
    column: usize,
}

fn read_v1(
    reader: &mut Reader<'_>,
    factory: &dyn NodeFactory,
    config: EngineConfig,
) -> std::result::Result<Graph, DumpError> {
    reader.expect_keyword("nodes")?;
    let count: usize = reader.number("graph nodes count", "64-bit unsigned integer")?;

    let mut graph = Graph::with_config(config);
    let mut pending = Vec::new();
    for i in 0..count {
        reader.with_context(format!("parsing node {} out of {count}", i + 1), |reader| {
            read_node(reader, &mut graph, factory, &mut pending)
        })?;
    }

    reader.with_context("expected end of input", |reader| {
        let token = reader.token();
        if token.text.is_empty() {
            Ok(())
        } else {
            Err(reader.malformed(&token))
        }
    })?;

    wire(&mut graph, pending)?;
    Ok(graph)
}

fn read_node(
    reader: &mut Reader<'_>,
    graph: &mut Graph,
    factory: &dyn NodeFactory,
    pending: &mut Vec<PendingLink>,
) -> std::result::Result<(), DumpError> {
    let at = reader.peek_token();
    let handle = NodeHandle(reader.number("node index", "64-bit unsigned integer")?);
    if graph.node(handle).is_some() {
        reader.context.push(format!("node index {handle} is already used"));
        return Err(reader.malformed(&at));
    }
    let x: i32 = reader.number("node x", "32-bit signed integer")?;
    let y: i32 = reader.number("node y", "32-bit signed integer")?;

    let name = reader.with_context("expected node name", |reader| {
        let token = reader.token();
        if token.text.is_empty() {
            Err(reader.malformed(&token))
        } else {
            Ok(token)
        }
    })?;
    let node = factory.create(name.text).ok_or_else(|| DumpError::UnknownNode {
        name: name.text.to_string(),
        line: name.line,
        column: name.column,
    })?;
    graph.set_node(handle, node)?;
    graph.move_node(handle, x, y)?;

    let inputs = graph.input_ports(handle)?;
    let total = inputs.len();
    reader.with_context(format!("parsing node args for {}", name.text), |reader| {
        for (i, port) in inputs.into_iter().enumerate() {
            let context = format!(
                "parsing node arg #{} of {total}, named '{}' of type {} value, or 'out' keyword",
                i + 1,
                port.title,
                port.data_type
            );
            reader.with_context(context, |reader| {
                reader.with_context(format!("expected type tag '{}'", port.data_type), |reader| {
                    let tag = reader.token();
                    if DataType::from_tag(tag.text) == Some(port.data_type) {
                        Ok(())
                    } else {
                        Err(reader.malformed(&tag))
                    }
                })?;

                let keyword = reader.peek_token();
                if keyword.text == "out" {
                    reader.token();
                    reader.with_context("parsing node arg connection 'out'", |reader| {
                        let provider: usize = reader.number("provider node index", "64-bit unsigned integer")?;
                        let output: usize = reader.number("provider node output id", "64-bit unsigned integer")?;
                        pending.push(PendingLink {
                            connection: Connection::new(NodeHandle(provider), PortId(output), handle, port.id),
                            line: keyword.line,
                            column: keyword.column,
                        });
                        Ok(())
                    })
                } else {
                    match port.data_type {
                        DataType::I32 => {
                            let value: i32 = reader.number("arg i32 value", "32-bit signed integer")?;
                            graph.set_input(handle, port.id, value)?;
                        }
                        DataType::Str => {
                            let value = reader.string("arg str value")?;
                            graph.set_input(handle, port.id, value)?;
                        }
                        DataType::FBuffer => {
                            let size: usize = reader.number("arg fbuffer size", "64-bit unsigned integer")?;
                            let mut values = Vec::new();
                            for j in 0..size {
                                let what = format!("arg fbuffer value {} out of {size}", j + 1);
                                values.push(reader.number::<f32>(&what, "32-bit floating number")?);
                            }
                            graph.set_input(handle, port.id, values)?;
                        }
                    }
                    Ok(())
                }
            })?;
        }
        Ok(())
    })
}

/// Replay back-references once every node exists.
///
/// Links to outputs that already exist are wired first. Links to outputs a
/// provider only declares in `update` wait until nothing upstream of that
/// provider still has a pending link; then its upstream nodes run once,
/// providers first, so `update` sees the values its stable inputs are wired
/// to, and the provider updates.
fn wire(graph: &mut Graph, pending: Vec<PendingLink>) -> std::result::Result<(), DumpError> {
    let mut deferred = Vec::new();
    for link in pending {
        let Connection { from_node, from_port, .. } = link.connection;
        if graph.node(from_node).is_some_and(|spec| spec.has_output(from_port)) {
            connect(graph, &link)?;
        } else {
            deferred.push(link);
        }
    }

    while !deferred.is_empty() {
        let mut provider = deferred[0].connection.from_node;
        for link in &deferred {
            if is_settled(graph, link.connection.from_node, &deferred)? {
                provider = link.connection.from_node;
                break;
            }
        }

        if graph.node(provider).is_some() {
            for handle in graph.upstream(provider)? {
                if let Err(err) = graph.run(handle) {
                    tracing::warn!("node {handle} failed while settling node {provider}: {err}");
                }
            }
            graph.update(provider)?;
        }

        let (ready, rest): (Vec<_>, Vec<_>) = deferred
            .into_iter()
            .partition(|link| link.connection.from_node == provider);
        deferred = rest;
        for link in &ready {
            connect(graph, link)?;
        }
    }
    Ok(())
}

/// Whether no pending link still feeds `provider` or anything upstream of it
fn is_settled(graph: &Graph, provider: NodeHandle, deferred: &[PendingLink]) -> std::result::Result<bool, DumpError> {
    if graph.node(provider).is_none() {
        return Ok(true);
    }
    let mut chain = graph.upstream(provider)?;
    chain.push(provider);
    Ok(!deferred.iter().any(|link| chain.contains(&link.connection.to_node)))
}

fn connect(graph: &mut Graph, link: &PendingLink) -> std::result::Result<(), DumpError> {
    let Connection {
        from_node,
        from_port,
        to_node,
        to_port,
    } = link.connection;
    graph
        .connect(from_node, from_port, to_node, to_port)
        .map_err(|source| DumpError::Wiring {
            connection: link.connection,
            line: link.line,
            column: link.column,
            source,
        })
}

/// Whitespace-separated token with its 1-based position
#[derive(Debug, Clone, Copy)]
struct Token<'t> {
    text: &'t str,
    line: usize,
    column: usize,
}

/// Character-level scanner with a "what was being parsed" stack
struct Reader<'t> {
    text: &'t str,
    pos: usize,
    line: usize,
    column: usize,
    context: Vec<String>,
}

impl<'t> Reader<'t> {
    fn new(text: &'t str) -> Self {
        Self {
            text,
            pos: 0,
            line: 1,
            column: 1,
            context: Vec::new(),
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Skip whitespace and comments
    fn skip_blank(&mut self) {
        while let Some(c) = self.peek_char() {
            if c == '#' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// Next token; empty at end of input
    fn token(&mut self) -> Token<'t> {
        self.skip_blank();
        let (start, line, column) = (self.pos, self.line, self.column);
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() || c == '#' {
                break;
            }
            self.bump();
        }
        Token {
            text: &self.text[start..self.pos],
            line,
            column,
        }
    }

    fn peek_token(&mut self) -> Token<'t> {
        let saved = (self.pos, self.line, self.column);
        let token = self.token();
        (self.pos, self.line, self.column) = saved;
        token
    }

    fn malformed(&self, token: &Token<'_>) -> DumpError {
        DumpError::Malformed {
            line: token.line,
            column: token.column,
            found: if token.text.is_empty() {
                "end of input".to_string()
            } else {
                token.text.to_string()
            },
            context: self.context.clone(),
        }
    }

    /// Run `f` with `context` pushed; on error the stack is left as it was
    /// at the failure
    fn with_context<R>(
        &mut self,
        context: impl Into<String>,
        f: impl FnOnce(&mut Self) -> std::result::Result<R, DumpError>,
    ) -> std::result::Result<R, DumpError> {
        self.context.push(context.into());
        let result = f(self)?;
        self.context.pop();
        Ok(result)
    }

    fn expect_keyword(&mut self, keyword: &str) -> std::result::Result<(), DumpError> {
        self.with_context(format!("expected keyword '{keyword}'"), |reader| {
            let token = reader.token();
            if token.text == keyword {
                Ok(())
            } else {
                Err(reader.malformed(&token))
            }
        })
    }

    fn number<T: FromStr>(&mut self, what: &str, kind: &str) -> std::result::Result<T, DumpError> {
        self.with_context(format!("expected {kind} ({what})"), |reader| {
            let token = reader.token();
            token.text.parse().map_err(|_| reader.malformed(&token))
        })
    }

    /// Double-quoted string without escapes; may span lines
    fn string(&mut self, what: &str) -> std::result::Result<String, DumpError> {
        self.with_context(format!("expected string in double quotes ({what})"), |reader| {
            reader.skip_blank();
            if reader.peek_char() != Some('"') {
                let token = reader.token();
                return Err(reader.malformed(&token));
            }
            reader.bump();
            let start = reader.pos;
            loop {
                match reader.bump() {
                    Some('"') => return Ok(reader.text[start..reader.pos - 1].to_string()),
                    Some(_) => {}
                    None => {
                        let end = Token {
                            text: "",
                            line: reader.line,
                            column: reader.column,
                        };
                        return Err(reader.malformed(&end));
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{InitContext, InitContextExt, Node, NodeRegistry, RunContext};

    struct Probe;

    impl Node for Probe {
        fn init(&mut self, ctx: &mut dyn InitContext) -> Result<()> {
            ctx.set_name("probe")?;
            ctx.input(PortId(0), 2i32, "a")?;
            ctx.input(PortId(1), String::from("x y"), "label")?;
            ctx.output::<i32>(PortId(0), "out")
        }

        fn run(&mut self, _ctx: &mut dyn RunContext<'_>) -> Result<()> {
            Ok(())
        }
    }

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register("probe", || Box::new(Probe));
        registry
    }

    #[test]
    fn test_compact_layout() {
        let mut graph = Graph::new();
        let first = graph.add_node(Box::new(Probe)).unwrap();
        let second = graph.add_node(Box::new(Probe)).unwrap();
        graph.move_node(second, 10, -4).unwrap();
        graph.connect(first, PortId(0), second, PortId(0)).unwrap();

        assert_eq!(
            graph.dump(DumpMode::Compact).unwrap(),
            "version 1\nnodes 2\n0 0 0 probe i32 2 str \"x y\"\n1 10 -4 probe i32 out 0 0 str \"x y\"\n"
        );
    }

    #[test]
    fn test_human_layout() {
        let mut graph = Graph::new();
        graph.add_node(Box::new(Probe)).unwrap();
        assert_eq!(
            graph.dump(DumpMode::Human).unwrap(),
            "version 1\n\nnodes 1\n\n\
             # idx(ui64) x(i32) y(i32) probe a(i32) label(str)\n  \
             0         0      0      probe i32 2  str \"x y\"\n\n"
        );
    }

    #[test]
    fn test_comments_and_forward_references() {
        let text = "# saved by hand\nversion 1\nnodes 2\n\
                    1 0 0 probe i32 out 3 0 str \"a # not a comment\" # trailing\n\
                    3 5 5 probe i32 7 str \"\"\n";
        let mut graph = Graph::new();
        graph.read_dump(text, &registry()).unwrap();
        assert_eq!(graph.live_handles().collect::<Vec<_>>(), vec![NodeHandle(1), NodeHandle(3)]);
        assert_eq!(graph.input::<String>(NodeHandle(1), PortId(1)).unwrap(), "a # not a comment");
        assert_eq!(
            graph.source(NodeHandle(1), PortId(0)).unwrap(),
            Some(Connection::new(NodeHandle(3), PortId(0), NodeHandle(1), PortId(0)))
        );
    }

    #[test]
    fn test_unsupported_version() {
        let mut graph = Graph::new();
        let err = graph.read_dump("version 2\nnodes 0\n", &registry()).unwrap_err();
        assert!(matches!(err, DumpError::UnsupportedVersion { found: 2, .. }));
    }

    #[test]
    fn test_malformed_token_reports_position_and_context() {
        let mut graph = Graph::new();
        let err = graph
            .read_dump("version 1\nnodes 1\n0 0 0 probe i32 two str \"\"\n", &registry())
            .unwrap_err();
        match err {
            DumpError::Malformed { line, column, found, context } => {
                assert_eq!((line, column), (3, 17));
                assert_eq!(found, "two");
                assert_eq!(context.first().map(String::as_str), Some("parsing graph"));
                assert!(context.last().unwrap().contains("32-bit signed integer"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_type_tag_must_match_declaration() {
        let mut graph = Graph::new();
        let err = graph
            .read_dump("version 1\nnodes 1\n0 0 0 probe str 1 str \"\"\n", &registry())
            .unwrap_err();
        assert!(matches!(err, DumpError::Malformed { ref found, .. } if found == "str"));
    }

    #[test]
    fn test_rejected_inputs() {
        let cases = [
            "version 1\nnodes 2\n0 0 0 probe i32 1 str \"\"\n0 0 0 probe i32 1 str \"\"\n",
            "version 1\nnodes 1\n0 0 0 probe i32 1 str \"\"\nleftover\n",
            "version 1\nnodes 2\n0 0 0 probe i32 1 str \"\"\n",
            "version 1\nnodes 1\n0 0 0 probe i32 1 str \"unterminated\n",
        ];
        for text in cases {
            let mut graph = Graph::new();
            assert!(
                matches!(graph.read_dump(text, &registry()), Err(DumpError::Malformed { .. })),
                "{text:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_unknown_node_and_bad_reference() {
        let mut graph = Graph::new();
        let err = graph.read_dump("version 1\nnodes 1\n0 0 0 mystery\n", &registry()).unwrap_err();
        assert!(matches!(err, DumpError::UnknownNode { ref name, line: 3, column: 7 } if name == "mystery"));

        let err = graph
            .read_dump("version 1\nnodes 1\n0 0 0 probe i32 out 9 0 str \"\"\n", &registry())
            .unwrap_err();
        assert!(matches!(
            err,
            DumpError::Wiring { source: GraphError::NodeNotFound(NodeHandle(9)), line: 3, column: 17, .. }
        ));
    }

    #[test]
    fn test_huge_handles_stay_sparse() {
        let mut graph = Graph::new();
        graph
            .read_dump("version 1\nnodes 1\n10000000000000 0 0 probe i32 0 str \"\"\n", &registry())
            .unwrap();
        assert_eq!(graph.live_handles().collect::<Vec<_>>(), vec![NodeHandle(10_000_000_000_000)]);
        assert_eq!(graph.add_node(Box::new(Probe)).unwrap(), NodeHandle(10_000_000_000_001));

        let before = graph.dump(DumpMode::Compact).unwrap();
        let text = format!("version 1\nnodes 1\n{} 0 0 probe i32 0 str \"\"\n", usize::MAX);
        assert!(matches!(
            graph.read_dump(&text, &registry()),
            Err(DumpError::Graph(GraphError::ConstraintViolated(_)))
        ));
        assert_eq!(graph.dump(DumpMode::Compact).unwrap(), before);
    }

    #[test]
    fn test_quote_in_string_cannot_be_written() {
        let mut graph = Graph::new();
        let node = graph.add_node(Box::new(Probe)).unwrap();
        graph.set_input(node, PortId(1), "say \"hi\"").unwrap();
        assert!(matches!(graph.dump(DumpMode::Compact), Err(GraphError::ConstraintViolated(_))));
    }
}
