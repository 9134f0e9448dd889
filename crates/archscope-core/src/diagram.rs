//! Relationship extraction from D2 diagram sources.
//!
//! Only the subset that carries relationship facts is understood: arrows
//! (`a -> b: label`, `a <- b`, `a <-> b`, chains), nested blocks that scope
//! identifiers (`api: { auth -> db }`), and tooltips (`auth.tooltip: "..."`
//! or `tooltip:` inside a node block). Everything else is layout or styling
//! and is skipped.
//!
//! A bad statement is skipped with a [`ParseWarning`]. Structural damage
//! (unbalanced braces, an unterminated string) rejects the whole file, the
//! way the diagram compiler would.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{QualifiedId, Relationship, Scope};

/// Keys that open attribute blocks rather than nested nodes.
const RESERVED_KEYS: &[&str] = &[
    "style", "label", "tooltip", "shape", "icon", "near", "link", "width", "height", "direction",
    "class", "classes", "vars", "constraint", "grid-rows", "grid-columns", "layers", "scenarios",
    "steps",
];

/// A recoverable problem found while parsing a diagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParseWarning {
    pub file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub message: String,
}

impl ParseWarning {
    pub fn new(file: impl Into<PathBuf>, line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            message: message.into(),
        }
    }
}

/// Tooltip text a diagram attaches to an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tooltip {
    pub id: QualifiedId,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDiagram {
    pub relationships: Vec<Relationship>,
    pub tooltips: Vec<Tooltip>,
    pub warnings: Vec<ParseWarning>,
}

// --- Lexing ---

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Text(String),
    Open,
    Close,
}

/// Split one line into text runs and braces, outside quotes. Comments are
/// dropped; `;` separates statements.
fn lex_line(line: &str) -> std::result::Result<Vec<Event>, &'static str> {
    let mut events = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in line.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' => {
                quote = Some(c);
                current.push(c);
            }
            '#' => break,
            '{' | '}' | ';' => {
                let text = current.trim();
                if !text.is_empty() {
                    events.push(Event::Text(text.to_string()));
                }
                current.clear();
                match c {
                    '{' => events.push(Event::Open),
                    '}' => events.push(Event::Close),
                    _ => {}
                }
            }
            _ => current.push(c),
        }
    }
    if quote.is_some() {
        return Err("unterminated string");
    }
    let text = current.trim();
    if !text.is_empty() {
        events.push(Event::Text(text.to_string()));
    }
    Ok(events)
}

/// Byte offset of the first `needle` outside quotes at or after `from`.
fn find_unquoted(s: &str, needle: &str, from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if c == '"' {
            quote = Some(c);
            continue;
        }
        if i >= from && s[i..].starts_with(needle) {
            return Some(i);
        }
    }
    None
}

fn unquote(s: &str) -> (String, bool) {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        return (s[1..s.len() - 1].replace("\\\"", "\""), true);
    }
    (s.to_string(), false)
}

// --- Arrows ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connector {
    Forward,
    Backward,
    Both,
    Undirected,
}

const CONNECTORS: &[(&str, Connector)] = &[
    ("<->", Connector::Both),
    ("->", Connector::Forward),
    ("<-", Connector::Backward),
    ("--", Connector::Undirected),
];

struct Arrow {
    endpoints: Vec<String>,
    connectors: Vec<Connector>,
    label: String,
}

/// Split a statement on connectors outside quotes. Everything after the
/// first unquoted `:` is label text, so connectors there do not count.
/// Returns `None` when the statement has no connector before its label.
fn split_arrow(stmt: &str) -> Option<Arrow> {
    let mut endpoints = Vec::new();
    let mut connectors = Vec::new();
    let mut rest_start = 0;
    let mut cursor = 0;
    let label_at = find_unquoted(stmt, ":", 0).unwrap_or(stmt.len());

    loop {
        let next = CONNECTORS
            .iter()
            .filter_map(|(tok, kind)| find_unquoted(stmt, tok, cursor).map(|at| (at, *tok, *kind)))
            .filter(|(at, _, _)| *at < label_at)
            .min_by_key(|(at, tok, _)| (*at, std::cmp::Reverse(tok.len())));
        let Some((at, tok, kind)) = next else { break };
        endpoints.push(stmt[rest_start..at].to_string());
        connectors.push(kind);
        rest_start = at + tok.len();
        cursor = rest_start;
    }
    if connectors.is_empty() {
        return None;
    }

    let tail = &stmt[rest_start..];
    let (last, label) = match find_unquoted(tail, ":", 0) {
        Some(colon) => (&tail[..colon], unquote(&tail[colon + 1..]).0),
        None => (tail, String::new()),
    };
    endpoints.push(last.to_string());
    Some(Arrow {
        endpoints,
        connectors,
        label,
    })
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | '/')
}

/// Split an endpoint into relative path segments. Quoted identifiers are a
/// single segment.
fn endpoint_segments(raw: &str) -> std::result::Result<Vec<String>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("arrow has an empty side".to_string());
    }
    let (text, quoted) = unquote(raw);
    if quoted {
        return Ok(vec![text]);
    }
    if let Some(bad) = text.chars().find(|c| !is_identifier_char(*c)) {
        return Err(format!("invalid character '{bad}' in identifier '{text}'"));
    }
    if text.contains('/') {
        return Ok(vec![text]);
    }
    Ok(text.split('.').map(|s| s.to_string()).collect())
}

// --- Blocks ---

#[derive(Debug, Clone)]
enum Block {
    Node(Vec<String>),
    /// Attribute or edge block; statements inside carry no relationships.
    Opaque,
}

fn block_for_header(header: &str) -> Block {
    if split_arrow(header).is_some() {
        return Block::Opaque;
    }
    let key = match find_unquoted(header, ":", 0) {
        Some(colon) => &header[..colon],
        None => header,
    };
    let (key_text, quoted) = unquote(key);
    let last = key_text.rsplit('.').next().unwrap_or(&key_text);
    if !quoted && RESERVED_KEYS.contains(&last.trim()) {
        return Block::Opaque;
    }
    match endpoint_segments(key) {
        Ok(segments) => Block::Node(segments),
        Err(_) => Block::Opaque,
    }
}

// --- Parser ---

struct Parser<'a> {
    path: &'a Path,
    scope: &'a Scope,
    known: Option<&'a HashSet<QualifiedId>>,
    stack: Vec<Block>,
    out: ParsedDiagram,
}

impl Parser<'_> {
    fn prefix(&self) -> Option<Vec<String>> {
        let mut segments = Vec::new();
        for block in &self.stack {
            match block {
                Block::Node(s) => segments.extend(s.iter().cloned()),
                Block::Opaque => return None,
            }
        }
        Some(segments)
    }

    fn warn(&mut self, line: usize, message: impl Into<String>) {
        self.out
            .warnings
            .push(ParseWarning::new(self.path, Some(line), message));
    }

    fn resolve(&self, prefix: &[String], segments: &[String]) -> Option<QualifiedId> {
        if let [single] = segments {
            if single.contains('/') {
                return QualifiedId::parse(single);
            }
        }
        let full: Vec<&String> = prefix.iter().chain(segments.iter()).collect();
        let full: Vec<&str> = full.iter().map(|s| s.as_str()).collect();
        self.scope.resolve_segments(&full, self.known)
    }

    fn statement(&mut self, line: usize, stmt: &str) {
        let Some(prefix) = self.prefix() else { return };

        if let Some(arrow) = split_arrow(stmt) {
            self.arrow(line, &prefix, arrow);
            return;
        }

        let Some(colon) = find_unquoted(stmt, ":", 0) else { return };
        let key = stmt[..colon].trim();
        let value = unquote(&stmt[colon + 1..]).0;
        if key == "tooltip" {
            if prefix.is_empty() {
                return;
            }
            if let Some(id) = self.resolve(&prefix, &[]) {
                self.out.tooltips.push(Tooltip { id, text: value });
            }
        } else if let Some(node) = key.strip_suffix(".tooltip") {
            match endpoint_segments(node) {
                Ok(segments) => match self.resolve(&prefix, &segments) {
                    Some(id) => self.out.tooltips.push(Tooltip { id, text: value }),
                    None => self.warn(line, format!("cannot resolve '{node}'")),
                },
                Err(e) => self.warn(line, e),
            }
        }
    }

    fn arrow(&mut self, line: usize, prefix: &[String], arrow: Arrow) {
        let mut ids = Vec::with_capacity(arrow.endpoints.len());
        for endpoint in &arrow.endpoints {
            let segments = match endpoint_segments(endpoint) {
                Ok(s) => s,
                Err(e) => {
                    self.warn(line, e);
                    return;
                }
            };
            match self.resolve(prefix, &segments) {
                Some(id) => ids.push(id),
                None => {
                    self.warn(line, format!("cannot resolve '{}'", endpoint.trim()));
                    return;
                }
            }
        }

        for (i, connector) in arrow.connectors.iter().enumerate() {
            let (a, b) = (&ids[i], &ids[i + 1]);
            let pairs = match connector {
                Connector::Forward => vec![(a, b)],
                Connector::Backward => vec![(b, a)],
                Connector::Both => vec![(a, b), (b, a)],
                Connector::Undirected => Vec::new(),
            };
            for (source, target) in pairs {
                self.out.relationships.push(Relationship::new(
                    source.clone(),
                    target.clone(),
                    arrow.label.clone(),
                ));
            }
        }
    }
}

/// Parse one diagram file. `scope` is where the file is drawn; `known`, when
/// given, lets short identifiers resolve to the innermost existing entity.
pub fn parse_diagram(
    path: &Path,
    source: &str,
    scope: &Scope,
    known: Option<&HashSet<QualifiedId>>,
) -> Result<ParsedDiagram> {
    let mut parser = Parser {
        path,
        scope,
        known,
        stack: Vec::new(),
        out: ParsedDiagram::default(),
    };

    for (idx, line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let events = lex_line(line).map_err(|message| Error::Diagram {
            path: path.to_path_buf(),
            message: format!("line {line_no}: {message}"),
        })?;

        let mut iter = events.into_iter().peekable();
        while let Some(event) = iter.next() {
            match event {
                Event::Text(text) => {
                    if matches!(iter.peek(), Some(Event::Open)) {
                        iter.next();
                        if let (Some(prefix), Some(arrow)) = (parser.prefix(), split_arrow(&text)) {
                            parser.arrow(line_no, &prefix, arrow);
                        }
                        parser.stack.push(block_for_header(&text));
                    } else {
                        parser.statement(line_no, &text);
                    }
                }
                Event::Open => parser.stack.push(Block::Opaque),
                Event::Close => {
                    if parser.stack.pop().is_none() {
                        return Err(Error::Diagram {
                            path: path.to_path_buf(),
                            message: format!("line {line_no}: unmatched '}}'"),
                        });
                    }
                }
            }
        }
    }

    if !parser.stack.is_empty() {
        return Err(Error::Diagram {
            path: path.to_path_buf(),
            message: format!("{} unclosed block(s) at end of file", parser.stack.len()),
        });
    }
    Ok(parser.out)
}
