//! Indentation-based node tree for script files.
//!
//! A script file is a sequence of lines. A line whose content ends with `:`
//! (outside quotes) opens a *section*; lines indented beneath it are its
//! children. Any other line is a *simple* node. `#` starts a comment unless
//! doubled (`##` produces a literal `#`) or inside a double-quoted string,
//! where `""` is an escaped quote.
//!
//! The reader is deliberately tolerant: it records what each line *is*, not
//! what it *means*. Interpreting section headers as triggers, commands, or
//! functions is the engine's job.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// How many columns a tab counts for when comparing indentation.
const TAB_WIDTH: usize = 4;

/// One node of a parsed script tree.
#[derive(Debug, Clone)]
pub enum Node {
    /// A plain line (statement, entry, anything without a trailing colon).
    Simple(SimpleNode),
    /// A `header:` line together with its indented children.
    Section(SectionNode),
}

impl Node {
    /// The textual content of this node: the line text for simple nodes,
    /// the header (without the trailing colon) for sections.
    pub fn key(&self) -> &str {
        match self {
            Node::Simple(n) => &n.text,
            Node::Section(n) => &n.key,
        }
    }

    /// 1-based line number this node came from.
    pub fn line(&self) -> usize {
        match self {
            Node::Simple(n) => n.line,
            Node::Section(n) => n.line,
        }
    }
}

/// A non-section line with its comment stripped and indentation removed.
#[derive(Debug, Clone)]
pub struct SimpleNode {
    /// Line content, trimmed.
    pub text: String,
    /// 1-based line number.
    pub line: usize,
}

impl SimpleNode {
    /// Split this line into a `name: value` entry, if it contains a `:`
    /// outside quotes. Both halves are trimmed.
    pub fn entry(&self) -> Option<(&str, &str)> {
        let idx = find_unquoted(&self.text, ':')?;
        let (name, value) = self.text.split_at(idx);
        Some((name.trim(), value[1..].trim()))
    }
}

/// A section header line and its children.
#[derive(Debug, Clone)]
pub struct SectionNode {
    /// Header text without the trailing colon, trimmed.
    pub key: String,
    /// 1-based line number of the header (0 for the synthetic root).
    pub line: usize,
    /// Child nodes in file order.
    pub children: Vec<Node>,
}

impl SectionNode {
    fn new(key: String, line: usize) -> Self {
        Self {
            key,
            line,
            children: Vec::new(),
        }
    }

    /// Iterate over the children in file order.
    pub fn iter(&self) -> std::slice::Iter<'_, Node> {
        self.children.iter()
    }

    /// Look up the value of a `name: value` entry child, case-insensitive
    /// on the name.
    pub fn entry_value(&self, name: &str) -> Option<&str> {
        self.children.iter().find_map(|child| match child {
            Node::Simple(simple) => {
                let (k, v) = simple.entry()?;
                k.eq_ignore_ascii_case(name).then_some(v)
            }
            Node::Section(_) => None,
        })
    }

    /// Find a child section by header, case-insensitive.
    pub fn section(&self, key: &str) -> Option<&SectionNode> {
        self.children.iter().find_map(|child| match child {
            Node::Section(section) if section.key.eq_ignore_ascii_case(key) => Some(section),
            _ => None,
        })
    }
}

impl<'a> IntoIterator for &'a SectionNode {
    type Item = &'a Node;
    type IntoIter = std::slice::Iter<'a, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.children.iter()
    }
}

/// An immutable, parsed script file: its identity plus the root of its
/// node tree.
///
/// Parsed once per load attempt; the engine may retain sources in a
/// long-lived cache for later inspection.
#[derive(Debug, Clone)]
pub struct ScriptSource {
    name: String,
    path: PathBuf,
    main: SectionNode,
}

impl ScriptSource {
    /// Parse raw bytes into a node tree.
    ///
    /// `name` is the display name used in diagnostics (typically the path
    /// relative to the scripts directory); `path` is the canonical identity
    /// of the file.
    ///
    /// # Errors
    /// Returns [`ConfigError::Utf8`] for non-UTF-8 input and
    /// [`ConfigError::Malformed`] for lines that cannot be placed in the
    /// tree (e.g. a section header with an empty key).
    pub fn parse(bytes: &[u8], name: &str, path: &Path) -> Result<Self, ConfigError> {
        let text = std::str::from_utf8(bytes).map_err(|e| ConfigError::Utf8(e.valid_up_to()))?;

        // Stack of open sections: (header indent, node). The synthetic root
        // sits at the bottom with an indent smaller than any real line.
        let mut stack: Vec<(isize, SectionNode)> = vec![(-1, SectionNode::new(String::new(), 0))];

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let stripped = strip_comment(raw);
            let content = stripped.trim();
            if content.is_empty() {
                continue;
            }
            let indent = indent_width(&stripped) as isize;

            // Close sections this line is not inside of.
            while stack.len() > 1 && indent <= stack.last().expect("stack is never empty").0 {
                let (_, node) = stack.pop().expect("stack is never empty");
                attach(&mut stack, node);
            }

            match section_header(content) {
                Some(key) => {
                    if key.is_empty() {
                        return Err(ConfigError::Malformed {
                            line: line_no,
                            message: "section header has an empty key".into(),
                        });
                    }
                    stack.push((indent, SectionNode::new(key.to_string(), line_no)));
                }
                None => {
                    let (_, parent) = stack.last_mut().expect("stack is never empty");
                    parent.children.push(Node::Simple(SimpleNode {
                        text: content.to_string(),
                        line: line_no,
                    }));
                }
            }
        }

        while stack.len() > 1 {
            let (_, node) = stack.pop().expect("stack is never empty");
            attach(&mut stack, node);
        }
        let (_, main) = stack.pop().expect("stack holds the root");

        log::trace!(
            "parsed script '{}': {} top-level node(s)",
            name,
            main.children.len()
        );

        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            main,
        })
    }

    /// Read and parse a script file from disk.
    ///
    /// The display name is the path relative to `base` when the file lives
    /// underneath it, the file name otherwise.
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`] if the file cannot be read, plus any
    /// error [`ScriptSource::parse`] produces.
    pub fn load(path: &Path, base: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        let name = path
            .strip_prefix(base)
            .unwrap_or_else(|_| Path::new(path.file_name().unwrap_or(path.as_os_str())))
            .to_string_lossy()
            .into_owned();
        Self::parse(&bytes, &name, path)
    }

    /// Display name used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical identity of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Root of the node tree; its children are the file's top-level lines.
    pub fn main(&self) -> &SectionNode {
        &self.main
    }
}

impl fmt::Display for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Move a finished section into its parent's child list.
fn attach(stack: &mut [(isize, SectionNode)], node: SectionNode) {
    let (_, parent) = stack.last_mut().expect("root never pops");
    parent.children.push(Node::Section(node));
}

/// Leading indentation in columns (tab = [`TAB_WIDTH`]).
fn indent_width(line: &str) -> usize {
    let mut width = 0;
    for ch in line.chars() {
        match ch {
            ' ' => width += 1,
            '\t' => width += TAB_WIDTH,
            _ => break,
        }
    }
    width
}

/// If `content` is a section header (ends with `:` outside quotes), return
/// the key without the colon, trimmed.
fn section_header(content: &str) -> Option<&str> {
    if !content.ends_with(':') {
        return None;
    }
    // The trailing colon must not sit inside an unterminated quote.
    let colon_idx = content.len() - 1;
    match find_unquoted_from(content, ':', colon_idx) {
        Some(idx) if idx == colon_idx => Some(content[..colon_idx].trim_end()),
        _ => None,
    }
}

/// Index of the first `needle` outside double quotes (`""` escapes a quote).
fn find_unquoted(text: &str, needle: char) -> Option<usize> {
    find_unquoted_from(text, needle, 0)
}

fn find_unquoted_from(text: &str, needle: char, min_idx: usize) -> Option<usize> {
    let mut in_quotes = false;
    let mut chars = text.char_indices().peekable();
    while let Some((i, ch)) = chars.next() {
        if ch == '"' {
            if in_quotes && chars.peek().is_some_and(|&(_, next)| next == '"') {
                chars.next(); // escaped quote
            } else {
                in_quotes = !in_quotes;
            }
        } else if ch == needle && !in_quotes && i >= min_idx {
            return Some(i);
        }
    }
    None
}

/// Strip a trailing comment: `#` outside quotes ends the line, `##`
/// produces a literal `#`.
fn strip_comment(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    chars.next();
                    out.push_str("\"\"");
                } else {
                    in_quotes = !in_quotes;
                    out.push('"');
                }
            }
            '#' if !in_quotes => {
                if chars.peek() == Some(&'#') {
                    chars.next();
                    out.push('#');
                } else {
                    break;
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ScriptSource {
        ScriptSource::parse(text.as_bytes(), "test.weft", Path::new("test.weft"))
            .expect("parse should succeed")
    }

    #[test]
    fn test_flat_sections() {
        let src = parse("on load:\n    broadcast \"hi\"\non quit:\n    log \"bye\"\n");
        assert_eq!(src.main().children.len(), 2);
        let Node::Section(first) = &src.main().children[0] else {
            panic!("expected section");
        };
        assert_eq!(first.key, "on load");
        assert_eq!(first.children.len(), 1);
        assert_eq!(first.children[0].key(), "broadcast \"hi\"");
    }

    #[test]
    fn test_nested_sections() {
        let src = parse("on load:\n    if true:\n        broadcast \"deep\"\n    log \"after\"\n");
        let Node::Section(trigger) = &src.main().children[0] else {
            panic!("expected section");
        };
        assert_eq!(trigger.children.len(), 2);
        let Node::Section(cond) = &trigger.children[0] else {
            panic!("expected nested section");
        };
        assert_eq!(cond.key, "if true");
        assert_eq!(cond.children.len(), 1);
        assert_eq!(trigger.children[1].key(), "log \"after\"");
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let src = parse("# header comment\n\non load: # trailing\n    broadcast \"a ## b\"\n");
        assert_eq!(src.main().children.len(), 1);
        let Node::Section(trigger) = &src.main().children[0] else {
            panic!("expected section");
        };
        assert_eq!(trigger.key, "on load");
        // `##` inside the statement survives as a literal `#`... inside
        // quotes the `#` is kept verbatim anyway.
        assert_eq!(trigger.children[0].key(), "broadcast \"a ## b\"");
    }

    #[test]
    fn test_colon_inside_quotes_is_not_a_section() {
        let src = parse("on load:\n    broadcast \"a:\"\n");
        let Node::Section(trigger) = &src.main().children[0] else {
            panic!("expected section");
        };
        assert!(matches!(trigger.children[0], Node::Simple(_)));
    }

    #[test]
    fn test_entry_split() {
        let node = SimpleNode {
            text: "description: teleports you".into(),
            line: 1,
        };
        assert_eq!(node.entry(), Some(("description", "teleports you")));
        let plain = SimpleNode {
            text: "broadcast \"x\"".into(),
            line: 1,
        };
        assert_eq!(plain.entry(), None);
    }

    #[test]
    fn test_entry_lookup_on_section() {
        let src = parse("command /tp:\n    description: moves you\n    trigger:\n        log \"x\"\n");
        let Node::Section(cmd) = &src.main().children[0] else {
            panic!("expected section");
        };
        assert_eq!(cmd.entry_value("Description"), Some("moves you"));
        assert!(cmd.section("trigger").is_some());
        assert!(cmd.section("missing").is_none());
    }

    #[test]
    fn test_line_numbers() {
        let src = parse("\n# comment\non load:\n    log \"x\"\n");
        let Node::Section(trigger) = &src.main().children[0] else {
            panic!("expected section");
        };
        assert_eq!(trigger.line, 3);
        assert_eq!(trigger.children[0].line(), 4);
    }

    #[test]
    fn test_crlf_input() {
        let src = parse("on load:\r\n    log \"x\"\r\n");
        let Node::Section(trigger) = &src.main().children[0] else {
            panic!("expected section");
        };
        assert_eq!(trigger.children.len(), 1);
    }

    #[test]
    fn test_empty_section_key_is_malformed() {
        let err = ScriptSource::parse(b"on load:\n    :\n", "bad.weft", Path::new("bad.weft"))
            .expect_err("empty key should fail");
        assert!(matches!(err, ConfigError::Malformed { line: 2, .. }));
    }

    #[test]
    fn test_invalid_utf8() {
        let err = ScriptSource::parse(&[0x6f, 0x6e, 0xff, 0xfe], "bad.weft", Path::new("bad.weft"))
            .expect_err("invalid utf8 should fail");
        assert!(matches!(err, ConfigError::Utf8(2)));
    }

    #[test]
    fn test_dedent_closes_sections() {
        let src = parse("on load:\n    if true:\n        log \"a\"\non quit:\n    log \"b\"\n");
        assert_eq!(src.main().children.len(), 2);
        assert_eq!(src.main().children[1].key(), "on quit");
    }
}
