//! Doxygen navigation index
//!
//! Doxygen emits one `*.js` navtree file per documented page. Each is a JS
//! assignment wrapping a JSON array of entries, every entry being
//! `[ name, link, children ]` where `link` is `page.html` or
//! `page.html#anchor` (or null) and `children` is null, an inline array of
//! entries, or the name of another navtree file.
//!
//! This module reads such files, checks their structure and answers symbol
//! lookups.

use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Errors for reading an index
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed index: {}", summarize(.0))]
    Malformed(Vec<Violation>),
}

fn summarize(violations: &[Violation]) -> String {
    match violations {
        [] => "no violations".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{} (and {} more)", first, rest.len()),
    }
}

/// What is wrong with an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// Not a JSON array
    NotAnEntry,
    /// Does not have exactly three positions
    Arity(usize),
    /// Name missing, not a string, or empty
    BadName,
    /// Link neither null nor `page.html[#anchor]`
    BadLink(String),
    /// Children neither null, an array, nor a navtree reference
    BadChildren,
    /// Name already used by a sibling
    DuplicateName(String),
}

/// A structural problem found at `path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub kind: ViolationKind,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::NotAnEntry => write!(f, "{}: not an entry", self.path),
            ViolationKind::Arity(n) => write!(f, "{}: {} positions, expected 3", self.path, n),
            ViolationKind::BadName => write!(f, "{}: missing or empty name", self.path),
            ViolationKind::BadLink(link) => write!(f, "{}: invalid link {:?}", self.path, link),
            ViolationKind::BadChildren => write!(f, "{}: invalid children", self.path),
            ViolationKind::DuplicateName(name) => {
                write!(f, "{}: duplicate sibling name {:?}", self.path, name)
            }
        }
    }
}

/// Children of an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavChildren {
    Leaf,
    Inline(Vec<NavEntry>),
    /// Listed in another navtree file
    External(String),
}

/// One index entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavEntry {
    pub name: String,
    pub link: Option<String>,
    pub children: NavChildren,
}

impl NavEntry {
    pub fn leaf(name: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            link: Some(link.into()),
            children: NavChildren::Leaf,
        }
    }

    /// Page part of the link
    pub fn page(&self) -> Option<&str> {
        self.link
            .as_deref()
            .map(|link| link.split_once('#').map(|(page, _)| page).unwrap_or(link))
    }

    /// Anchor part of the link
    pub fn anchor(&self) -> Option<&str> {
        self.link
            .as_deref()
            .and_then(|link| link.split_once('#'))
            .map(|(_, anchor)| anchor)
    }
}

/// A parsed navtree file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavIndex {
    /// Name of the JS variable, when the file had one
    pub var_name: Option<String>,
    pub entries: Vec<NavEntry>,
}

fn is_ident(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `page.html` or `page.html#anchor`
pub fn is_valid_link(link: &str) -> bool {
    let (page, anchor) = match link.split_once('#') {
        Some((page, anchor)) => (page, Some(anchor)),
        None => (link, None),
    };

    let Some(stem) = page.strip_suffix(".html") else {
        return false;
    };
    let stem_ok = !stem.is_empty()
        && stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    stem_ok && anchor.map(is_ident).unwrap_or(true)
}

/// Strip the `var name =` prefix and trailing `;` of a navtree file
fn split_js(text: &str) -> (Option<String>, &str) {
    let text = text.trim();
    let (var_name, body) = match text.strip_prefix("var ") {
        Some(rest) => match rest.split_once('=') {
            Some((name, body)) => (Some(name.trim().to_string()), body),
            None => (None, text),
        },
        None => (None, text),
    };
    let body = body.trim();
    (var_name, body.strip_suffix(';').unwrap_or(body).trim_end())
}

fn entry_path(parent: &str, index: usize) -> String {
    if parent.is_empty() {
        format!("[{}]", index)
    } else {
        format!("{}/children[{}]", parent, index)
    }
}

fn check_entries(entries: &[Value], parent: &str, out: &mut Vec<Violation>) {
    let mut seen = HashSet::new();

    for (i, value) in entries.iter().enumerate() {
        let path = entry_path(parent, i);

        let Some(fields) = value.as_array() else {
            out.push(Violation {
                path,
                kind: ViolationKind::NotAnEntry,
            });
            continue;
        };

        let mut problems = Vec::new();
        if fields.len() != 3 {
            problems.push(ViolationKind::Arity(fields.len()));
        }

        match fields.first().and_then(Value::as_str) {
            Some(name) if !name.is_empty() => {
                if !seen.insert(name) {
                    problems.push(ViolationKind::DuplicateName(name.to_string()));
                }
            }
            _ => problems.push(ViolationKind::BadName),
        }

        match fields.get(1) {
            Some(Value::Null) | None => {}
            Some(Value::String(link)) if is_valid_link(link) => {}
            Some(Value::String(link)) => problems.push(ViolationKind::BadLink(link.clone())),
            Some(other) => problems.push(ViolationKind::BadLink(other.to_string())),
        }

        let mut nested = None;
        match fields.get(2) {
            Some(Value::Null) | None => {}
            Some(Value::String(reference)) if is_ident(reference) => {}
            Some(Value::Array(children)) => nested = Some(children),
            Some(_) => problems.push(ViolationKind::BadChildren),
        }

        out.extend(problems.into_iter().map(|kind| Violation {
            path: path.clone(),
            kind,
        }));
        if let Some(children) = nested {
            check_entries(children, &path, out);
        }
    }
}

/// Every violation in a raw JSON index
pub fn validate_value(value: &Value) -> Vec<Violation> {
    let mut out = Vec::new();
    match value.as_array() {
        Some(entries) => check_entries(entries, "", &mut out),
        None => out.push(Violation {
            path: String::new(),
            kind: ViolationKind::NotAnEntry,
        }),
    }
    out
}

/// Parse a navtree file and report its violations without converting it
pub fn check(text: &str) -> Result<Vec<Violation>, IndexError> {
    let (_, body) = split_js(text);
    let value: Value = serde_json::from_str(body)?;
    Ok(validate_value(&value))
}

fn convert_entries(entries: &[Value], parent: &str) -> Result<Vec<NavEntry>, Violation> {
    entries
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let path = entry_path(parent, i);
            let violation = |kind: ViolationKind| Violation {
                path: path.clone(),
                kind,
            };

            let fields = value
                .as_array()
                .ok_or_else(|| violation(ViolationKind::NotAnEntry))?;
            if fields.len() != 3 {
                return Err(violation(ViolationKind::Arity(fields.len())));
            }

            let name = fields[0]
                .as_str()
                .ok_or_else(|| violation(ViolationKind::BadName))?
                .to_string();
            let link = match &fields[1] {
                Value::Null => None,
                Value::String(link) => Some(link.clone()),
                other => return Err(violation(ViolationKind::BadLink(other.to_string()))),
            };
            let children = match &fields[2] {
                Value::Null => NavChildren::Leaf,
                Value::String(reference) => NavChildren::External(reference.clone()),
                Value::Array(children) => NavChildren::Inline(convert_entries(children, &path)?),
                _ => return Err(violation(ViolationKind::BadChildren)),
            };

            Ok(NavEntry {
                name,
                link,
                children,
            })
        })
        .collect()
}

impl NavIndex {
    pub fn new(var_name: Option<String>, entries: Vec<NavEntry>) -> Self {
        Self { var_name, entries }
    }

    /// Parse a navtree file (or a bare JSON array).
    ///
    /// Only shape errors that prevent conversion are fatal; use
    /// [`NavIndex::validate`] for the rest.
    pub fn parse(text: &str) -> Result<Self, IndexError> {
        let (var_name, body) = split_js(text);
        let value: Value = serde_json::from_str(body)?;

        let entries = value.as_array().ok_or_else(|| {
            IndexError::Malformed(vec![Violation {
                path: String::new(),
                kind: ViolationKind::NotAnEntry,
            }])
        })?;
        let entries =
            convert_entries(entries, "").map_err(|violation| IndexError::Malformed(vec![violation]))?;

        Ok(Self { var_name, entries })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Violations of link form, names and sibling uniqueness
    pub fn validate(&self) -> Vec<Violation> {
        let mut out = Vec::new();
        Self::validate_entries(&self.entries, "", &mut out);
        out
    }

    fn validate_entries(entries: &[NavEntry], parent: &str, out: &mut Vec<Violation>) {
        let mut seen = HashSet::new();
        for (i, entry) in entries.iter().enumerate() {
            let path = entry_path(parent, i);

            if entry.name.is_empty() {
                out.push(Violation {
                    path: path.clone(),
                    kind: ViolationKind::BadName,
                });
            } else if !seen.insert(entry.name.as_str()) {
                out.push(Violation {
                    path: path.clone(),
                    kind: ViolationKind::DuplicateName(entry.name.clone()),
                });
            }

            if let Some(link) = &entry.link {
                if !is_valid_link(link) {
                    out.push(Violation {
                        path: path.clone(),
                        kind: ViolationKind::BadLink(link.clone()),
                    });
                }
            }

            match &entry.children {
                NavChildren::Leaf => {}
                NavChildren::External(reference) => {
                    if !is_ident(reference) {
                        out.push(Violation {
                            path: path.clone(),
                            kind: ViolationKind::BadChildren,
                        });
                    }
                }
                NavChildren::Inline(children) => Self::validate_entries(children, &path, out),
            }
        }
    }

    /// Every entry with its path, depth first
    pub fn symbols(&self) -> Vec<(String, &NavEntry)> {
        fn walk<'a>(entries: &'a [NavEntry], parent: &str, out: &mut Vec<(String, &'a NavEntry)>) {
            for (i, entry) in entries.iter().enumerate() {
                let path = entry_path(parent, i);
                if let NavChildren::Inline(children) = &entry.children {
                    out.push((path.clone(), entry));
                    walk(children, &path, out);
                } else {
                    out.push((path, entry));
                }
            }
        }

        let mut out = Vec::new();
        walk(&self.entries, "", &mut out);
        out
    }

    /// First entry named `symbol`, depth first
    pub fn lookup(&self, symbol: &str) -> Option<&NavEntry> {
        self.symbols()
            .into_iter()
            .map(|(_, entry)| entry)
            .find(|entry| entry.name == symbol)
    }

    /// Number of entries at all depths
    pub fn len(&self) -> usize {
        self.symbols().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render in the layout Doxygen writes
    pub fn to_js(&self) -> String {
        let mut out = format!(
            "var {} =\n[\n",
            self.var_name.as_deref().unwrap_or("navtree")
        );
        Self::render(&self.entries, 0, &mut out);
        out.push_str("];\n");
        out
    }

    fn render(entries: &[NavEntry], depth: usize, out: &mut String) {
        let indent = " ".repeat(4 + 2 * depth);
        for (i, entry) in entries.iter().enumerate() {
            let sep = if i + 1 == entries.len() { "" } else { "," };
            let link = entry
                .link
                .as_deref()
                .map(json_string)
                .unwrap_or_else(|| "null".to_string());
            let head = format!("{}[ {}, {}, ", indent, json_string(&entry.name), link);

            match &entry.children {
                NavChildren::Leaf => out.push_str(&format!("{}null ]{}\n", head, sep)),
                NavChildren::External(reference) => {
                    out.push_str(&format!("{}{} ]{}\n", head, json_string(reference), sep))
                }
                NavChildren::Inline(children) => {
                    out.push_str(&format!("{}[\n", head));
                    Self::render(children, depth + 1, out);
                    out.push_str(&format!("{}] ]{}\n", indent, sep));
                }
            }
        }
    }
}

fn json_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}
