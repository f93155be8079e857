//! A small CSS selector engine covering what page markup recognition needs:
//! type, universal, id, class and attribute conditions joined by descendant or
//! child combinators, in comma-separated groups.

use std::str::FromStr;

use super::{Element, NodeId};
use crate::types::{AnnotatorError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrCondition {
    Exists { key: String },
    Eq { key: String, value: String },
    StartsWith { key: String, value: String },
    EndsWith { key: String, value: String },
    Contains { key: String, value: String },
    Includes { key: String, value: String },
}

impl AttrCondition {
    fn matches(&self, element: &Element) -> bool {
        match self {
            AttrCondition::Exists { key } => element.attrs.contains_key(key),
            AttrCondition::Eq { key, value } => element.attrs.get(key) == Some(value),
            AttrCondition::StartsWith { key, value } => element
                .attrs
                .get(key)
                .is_some_and(|attr| attr.starts_with(value.as_str())),
            AttrCondition::EndsWith { key, value } => element
                .attrs
                .get(key)
                .is_some_and(|attr| attr.ends_with(value.as_str())),
            AttrCondition::Contains { key, value } => element
                .attrs
                .get(key)
                .is_some_and(|attr| attr.contains(value.as_str())),
            AttrCondition::Includes { key, value } => element
                .attrs
                .get(key)
                .is_some_and(|attr| attr.split_whitespace().any(|token| token == value)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SelectorStep {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrCondition>,
}

impl SelectorStep {
    fn matches(&self, element: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if !element.tag.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if element.attrs.get("id") != Some(id) {
                return false;
            }
        }
        self.classes.iter().all(|class| element.has_class(class))
            && self.attrs.iter().all(|cond| cond.matches(element))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SelectorPart {
    step: SelectorStep,
    // Relation to the part on the left.
    combinator: Option<Combinator>,
}

/// Read access to an element tree, as needed for matching.
pub(crate) trait ElementTree {
    fn parent_of(&self, node: NodeId) -> Option<NodeId>;
    fn element_of(&self, node: NodeId) -> Option<&Element>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    groups: Vec<Vec<SelectorPart>>,
}

impl Selector {
    pub fn parse(selector: &str) -> Result<Self> {
        let mut groups = Vec::new();
        for group in split_groups(selector)? {
            groups.push(Parser::new(group, selector).parse_chain()?);
        }
        if groups.is_empty() {
            return Err(AnnotatorError::Selector(selector.to_string()));
        }
        Ok(Self { groups })
    }

    pub(crate) fn matches<T: ElementTree>(&self, tree: &T, node: NodeId) -> bool {
        self.groups.iter().any(|parts| matches_chain(tree, node, parts))
    }
}

impl FromStr for Selector {
    type Err = AnnotatorError;

    fn from_str(s: &str) -> Result<Self> {
        Selector::parse(s)
    }
}

fn matches_chain<T: ElementTree>(tree: &T, node: NodeId, parts: &[SelectorPart]) -> bool {
    let Some((last, rest)) = parts.split_last() else {
        return false;
    };
    if !tree.element_of(node).is_some_and(|el| last.step.matches(el)) {
        return false;
    }
    if rest.is_empty() {
        return true;
    }

    let combinator = last.combinator.unwrap_or(Combinator::Descendant);
    let mut cursor = tree.parent_of(node);
    while let Some(ancestor) = cursor {
        if matches_chain(tree, ancestor, rest) {
            return true;
        }
        if combinator == Combinator::Child {
            return false;
        }
        cursor = tree.parent_of(ancestor);
    }
    false
}

fn split_groups(selector: &str) -> Result<Vec<&str>> {
    let mut groups = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut start = 0;

    for (idx, ch) in selector.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                groups.push(selector[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() || depth != 0 {
        return Err(AnnotatorError::Selector(selector.to_string()));
    }
    groups.push(selector[start..].trim());

    if groups.iter().any(|group| group.is_empty()) {
        return Err(AnnotatorError::Selector(selector.to_string()));
    }
    Ok(groups)
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn new(group: &str, source: &'a str) -> Self {
        Self {
            chars: group.chars().collect(),
            pos: 0,
            source,
        }
    }

    fn error(&self) -> AnnotatorError {
        AnnotatorError::Selector(self.source.to_string())
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn parse_chain(mut self) -> Result<Vec<SelectorPart>> {
        let mut parts = Vec::new();
        self.skip_whitespace();

        while self.peek().is_some() {
            let mut combinator = None;
            if !parts.is_empty() {
                let saw_space = self.skip_whitespace();
                if self.peek() == Some('>') {
                    self.pos += 1;
                    self.skip_whitespace();
                    combinator = Some(Combinator::Child);
                } else if saw_space {
                    combinator = Some(Combinator::Descendant);
                } else {
                    return Err(self.error());
                }
                if self.peek().is_none() {
                    return Err(self.error());
                }
            }
            let step = self.parse_compound()?;
            parts.push(SelectorPart { step, combinator });
        }

        if parts.is_empty() {
            return Err(self.error());
        }
        Ok(parts)
    }

    fn parse_compound(&mut self) -> Result<SelectorStep> {
        let mut step = SelectorStep::default();
        let mut consumed = false;

        if self.peek() == Some('*') {
            self.pos += 1;
            consumed = true;
        } else if self.peek().is_some_and(is_ident_char) {
            step.tag = Some(self.parse_ident()?);
            consumed = true;
        }

        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    step.classes.push(self.parse_ident()?);
                }
                Some('#') => {
                    self.pos += 1;
                    step.id = Some(self.parse_ident()?);
                }
                Some('[') => {
                    self.pos += 1;
                    step.attrs.push(self.parse_attr()?);
                }
                Some(c) if c.is_whitespace() || c == '>' => break,
                Some(_) => return Err(self.error()),
                None => break,
            }
            consumed = true;
        }

        if consumed {
            Ok(step)
        } else {
            Err(self.error())
        }
    }

    fn parse_ident(&mut self) -> Result<String> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error());
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_attr(&mut self) -> Result<AttrCondition> {
        self.skip_whitespace();
        let key = self.parse_ident()?;
        self.skip_whitespace();

        let op = match self.peek() {
            Some(']') => {
                self.pos += 1;
                return Ok(AttrCondition::Exists { key });
            }
            Some('=') => {
                self.pos += 1;
                '='
            }
            Some(c @ ('^' | '$' | '*' | '~')) if self.chars.get(self.pos + 1) == Some(&'=') => {
                self.pos += 2;
                c
            }
            _ => return Err(self.error()),
        };

        self.skip_whitespace();
        let value = self.parse_attr_value()?;
        self.skip_whitespace();
        if self.peek() != Some(']') {
            return Err(self.error());
        }
        self.pos += 1;

        Ok(match op {
            '^' => AttrCondition::StartsWith { key, value },
            '$' => AttrCondition::EndsWith { key, value },
            '*' => AttrCondition::Contains { key, value },
            '~' => AttrCondition::Includes { key, value },
            _ => AttrCondition::Eq { key, value },
        })
    }

    fn parse_attr_value(&mut self) -> Result<String> {
        match self.peek() {
            Some(q @ ('\'' | '"')) => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c != q) {
                    self.pos += 1;
                }
                if self.peek().is_none() {
                    return Err(self.error());
                }
                let value = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                Ok(value)
            }
            _ => self.parse_ident(),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}
