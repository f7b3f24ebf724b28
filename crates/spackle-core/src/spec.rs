//! Abstract specs and the spec string syntax.
//!
//! ```text
//! spec       := node { "^" ["[deptypes=" types "]"] node }
//! node       := [name] { "@" versions | "%" compiler ["@" versions]
//!                      | "+" variant | "~" variant | key "=" value }
//! ```
//!
//! `platform=` and `arch=` select the target platform; every other
//! `key=value` pair is a variant. A node without a name is an anonymous
//! constraint, used for `when=` conditions and conflict triggers.

use crate::compiler::CompilerConstraint;
use crate::error::{Error, Result};
use crate::hash::{ContentHash, ContentHasher};
use crate::package::DepTypes;
use crate::variant::VariantValue;
use crate::version::VersionRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Partial requirements on a single node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Constraint {
    /// Admissible versions.
    pub versions: Option<VersionRange>,
    /// Required variant values by variant name.
    pub variants: BTreeMap<String, VariantValue>,
    /// Required compiler.
    pub compiler: Option<CompilerConstraint>,
    /// Required platform.
    pub platform: Option<String>,
}

impl Constraint {
    /// Parse an anonymous constraint such as `@1.2: +mpi %gcc`.
    ///
    /// # Errors
    /// Fails on malformed input, a package name, or `^` dependencies.
    pub fn parse(input: &str) -> Result<Self> {
        let parsed = Parser::new(input).parse_parts()?;
        if parsed.name.is_some() || !parsed.dependencies.is_empty() {
            return Err(Error::invalid_spec(
                input,
                "expected an anonymous constraint without a name or dependencies",
            ));
        }
        Ok(parsed.constraint)
    }

    /// Whether the constraint requires nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_none()
            && self.variants.is_empty()
            && self.compiler.is_none()
            && self.platform.is_none()
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        for (name, value) in &self.variants {
            parts.push(value.render(name));
        }
        if let Some(compiler) = &self.compiler {
            parts.push(format!("%{compiler}"));
        }
        if let Some(platform) = &self.platform {
            parts.push(format!("platform={platform}"));
        }
        if let Some(versions) = &self.versions {
            write!(f, "@{versions}")?;
            if !parts.is_empty() {
                f.write_str(" ")?;
            }
        }
        f.write_str(&parts.join(" "))
    }
}

impl FromStr for Constraint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Constraint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Constraint> for String {
    fn from(value: Constraint) -> Self {
        value.to_string()
    }
}

/// A user-given constraint on a node somewhere below an abstract spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AbstractDependency {
    /// The constrained node.
    pub spec: AbstractSpec,
    /// Edge types the node must be reached through; empty admits any.
    pub types: DepTypes,
}

/// A partial package request, e.g. `hdf5@1.12: +mpi ^openmpi`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AbstractSpec {
    /// Package or virtual name.
    pub name: String,
    /// Requirements on the named node.
    pub constraint: Constraint,
    /// Requirements on nodes reachable from this one.
    pub dependencies: Vec<AbstractDependency>,
}

impl AbstractSpec {
    /// An unconstrained request for `name`.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: Constraint::default(),
            dependencies: Vec::new(),
        }
    }

    /// Parse a spec string.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSpec`] on malformed input or a missing name.
    pub fn parse(input: &str) -> Result<Self> {
        let parsed = Parser::new(input).parse_parts()?;
        let name = parsed
            .name
            .ok_or_else(|| Error::invalid_spec(input, "missing package name"))?;
        Ok(Self {
            name,
            constraint: parsed.constraint,
            dependencies: parsed.dependencies,
        })
    }

    /// Restrict the version.
    #[must_use]
    pub fn with_versions(mut self, versions: VersionRange) -> Self {
        self.constraint.versions = Some(versions);
        self
    }

    /// Require a variant value.
    #[must_use]
    pub fn with_variant(mut self, name: impl Into<String>, value: VariantValue) -> Self {
        self.constraint.variants.insert(name.into(), value);
        self
    }

    /// Require a compiler.
    #[must_use]
    pub fn with_compiler(mut self, compiler: CompilerConstraint) -> Self {
        self.constraint.compiler = Some(compiler);
        self
    }

    /// Require a platform.
    #[must_use]
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.constraint.platform = Some(platform.into());
        self
    }

    /// Constrain a node reachable from this one.
    #[must_use]
    pub fn with_dependency(mut self, spec: Self) -> Self {
        self.dependencies.push(AbstractDependency {
            spec,
            types: DepTypes::empty(),
        });
        self
    }

    /// Canonical rendering: children sorted, variants sorted.
    #[must_use]
    pub fn canonical_string(&self) -> String {
        let mut out = render_node(&self.name, &self.constraint);
        let mut children: Vec<String> = self
            .dependencies
            .iter()
            .map(|dep| render_dependency(&dep.spec.canonical_string(), dep.types))
            .collect();
        children.sort();
        for child in children {
            out.push(' ');
            out.push_str(&child);
        }
        out
    }

    /// Order-independent hash of the request.
    #[must_use]
    pub fn canonical_hash(&self) -> ContentHash {
        let mut hasher = ContentHasher::new();
        hasher.field(&self.canonical_string());
        hasher.finalize()
    }

    /// Every `^` constraint in this tree, depth first.
    #[must_use]
    pub fn flattened_dependencies(&self) -> Vec<&AbstractDependency> {
        let mut out = Vec::new();
        let mut stack: Vec<&AbstractDependency> = self.dependencies.iter().rev().collect();
        while let Some(dep) = stack.pop() {
            out.push(dep);
            stack.extend(dep.spec.dependencies.iter().rev());
        }
        out
    }
}

fn render_node(name: &str, constraint: &Constraint) -> String {
    let rendered = constraint.to_string();
    if rendered.is_empty() || rendered.starts_with('@') {
        format!("{name}{rendered}")
    } else {
        format!("{name} {rendered}")
    }
}

fn render_dependency(spec: &str, types: DepTypes) -> String {
    if types.is_empty() {
        format!("^{spec}")
    } else {
        format!("^[deptypes={types}] {spec}")
    }
}

impl fmt::Display for AbstractSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_node(&self.name, &self.constraint))?;
        for dep in &self.dependencies {
            write!(f, " {}", render_dependency(&dep.spec.to_string(), dep.types))?;
        }
        Ok(())
    }
}

impl FromStr for AbstractSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AbstractSpec {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<AbstractSpec> for String {
    fn from(value: AbstractSpec) -> Self {
        value.to_string()
    }
}

/// Output of the parser before the caller decides what shape it needs.
#[derive(Debug, Default)]
pub(crate) struct ParsedSpec {
    pub name: Option<String>,
    pub constraint: Constraint,
    pub dependencies: Vec<AbstractDependency>,
}

const fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

const fn is_version_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | ',' | '=')
}

const fn is_value_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ',' | ':' | '/')
}

pub(crate) struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub(crate) const fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
        &self.input[start..self.pos]
    }

    fn error(&self, message: impl fmt::Display) -> Error {
        Error::invalid_spec(self.input, format!("{message} at offset {}", self.pos))
    }

    fn ident(&mut self, what: &str) -> Result<&'a str> {
        let ident = self.take_while(is_ident_char);
        if ident.is_empty() {
            return Err(self.error(format!("expected {what}")));
        }
        Ok(ident)
    }

    fn versions(&mut self) -> Result<VersionRange> {
        let text = self.take_while(is_version_char);
        if text.is_empty() {
            return Err(self.error("expected a version list after '@'"));
        }
        VersionRange::parse(text).map_err(|e| self.error(e))
    }

    pub(crate) fn parse_parts(mut self) -> Result<ParsedSpec> {
        let (name, constraint) = self.node()?;
        let mut dependencies = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some('^') => {
                    self.bump();
                    self.skip_ws();
                    let types = if self.peek() == Some('[') {
                        self.edge_attributes()?
                    } else {
                        DepTypes::empty()
                    };
                    let (name, constraint) = self.node()?;
                    let name = name.ok_or_else(|| self.error("dependency needs a name"))?;
                    dependencies.push(AbstractDependency {
                        spec: AbstractSpec {
                            name,
                            constraint,
                            dependencies: Vec::new(),
                        },
                        types,
                    });
                }
                Some(c) => return Err(self.error(format!("unexpected '{c}'"))),
            }
        }
        Ok(ParsedSpec {
            name,
            constraint,
            dependencies,
        })
    }

    fn edge_attributes(&mut self) -> Result<DepTypes> {
        self.bump();
        let body = self.take_while(|c| c != ']');
        if self.peek() != Some(']') {
            return Err(self.error("unterminated '['"));
        }
        self.bump();
        self.skip_ws();
        let (key, value) = body
            .split_once('=')
            .ok_or_else(|| self.error("expected key=value inside '[...]'"))?;
        if key.trim() != "deptypes" {
            return Err(self.error(format!("unknown edge attribute '{}'", key.trim())));
        }
        DepTypes::parse(value).map_err(|e| self.error(e))
    }

    fn node(&mut self) -> Result<(Option<String>, Constraint)> {
        let mut name: Option<String> = None;
        let mut constraint = Constraint::default();
        loop {
            self.skip_ws();
            match self.peek() {
                None | Some('^') => break,
                Some('@') => {
                    self.bump();
                    if constraint.versions.is_some() {
                        return Err(self.error("version given twice"));
                    }
                    constraint.versions = Some(self.versions()?);
                }
                Some('%') => {
                    self.bump();
                    self.skip_ws();
                    if constraint.compiler.is_some() {
                        return Err(self.error("compiler given twice"));
                    }
                    let compiler = self.ident("compiler name")?.to_string();
                    let versions = if self.peek() == Some('@') {
                        self.bump();
                        Some(self.versions()?)
                    } else {
                        None
                    };
                    constraint.compiler = Some(CompilerConstraint {
                        name: compiler,
                        versions,
                    });
                }
                Some(sigil @ ('+' | '~')) => {
                    self.bump();
                    let variant = self.ident("variant name")?.to_string();
                    if constraint
                        .variants
                        .insert(variant, VariantValue::Bool(sigil == '+'))
                        .is_some()
                    {
                        return Err(self.error("variant given twice"));
                    }
                }
                Some(c) if is_ident_char(c) => {
                    let word = self.ident("name")?;
                    if self.peek() == Some('=') {
                        self.bump();
                        let value = self.take_while(is_value_char);
                        if value.is_empty() {
                            return Err(self.error(format!("expected a value for '{word}'")));
                        }
                        if matches!(word, "platform" | "arch") {
                            constraint.platform = Some(value.to_string());
                        } else if constraint
                            .variants
                            .insert(word.to_string(), VariantValue::parse(value))
                            .is_some()
                        {
                            return Err(self.error("variant given twice"));
                        }
                    } else if name.is_none() && constraint.is_empty() {
                        name = Some(word.to_string());
                    } else {
                        return Err(self.error(format!("unexpected name '{word}'")));
                    }
                }
                Some(c) => return Err(self.error(format!("unexpected '{c}'"))),
            }
        }
        Ok((name, constraint))
    }
}
