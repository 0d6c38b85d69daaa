//! Minimal XML reader and writer for the row-set wire format.
//!
//! The reader builds a small element tree. It resolves namespace prefixes
//! (so `xsi:nil` can be matched by namespace URI), decodes the predefined and
//! numeric character references, keeps CDATA as text and skips comments,
//! processing instructions and a DOCTYPE. Anything else it does not
//! understand is an error; there is no recovery mode.

use std::borrow::Cow;
use std::fmt;

pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";
const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlError {
    pub position: usize,
    pub message: String,
}

impl fmt::Display for XmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.message, self.position)
    }
}

impl std::error::Error for XmlError {}

pub type XmlResult<T> = Result<T, XmlError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Local part of the attribute name.
    pub name: String,
    pub namespace: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Local part of the tag name.
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.child_elements().filter(move |element| element.name == name)
    }

    /// Unqualified attribute lookup.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attribute_ns(None, name)
    }

    pub fn attribute_ns(&self, namespace: Option<&str>, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name && attr.namespace.as_deref() == namespace)
            .map(|attr| attr.value.as_str())
    }

    /// Concatenated direct text content, untrimmed.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            if let Node::Text(text) = node {
                out.push_str(text);
            }
        }
        out
    }
}

/// Parses a complete document and returns its root element.
pub fn parse(input: &str) -> XmlResult<Element> {
    let mut reader = Reader {
        input,
        pos: 0,
        depth: 0,
        scopes: Vec::new(),
    };
    reader.skip_misc()?;
    if !reader.starts_with("<") {
        return Err(reader.error("expected root element"));
    }
    let root = reader.parse_element()?;
    reader.skip_misc()?;
    if reader.pos < input.len() {
        return Err(reader.error("content after root element"));
    }
    Ok(root)
}

/// Elements nested deeper than this are rejected instead of recursed into.
pub const MAX_DEPTH: usize = 256;

struct Reader<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
    scopes: Vec<Vec<(String, String)>>,
}

impl<'a> Reader<'a> {
    fn error(&self, message: impl Into<String>) -> XmlError {
        XmlError {
            position: self.pos,
            message: message.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.rest().starts_with(prefix)
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_whitespace(&mut self) -> bool {
        let rest = self.rest();
        let trimmed = rest.trim_start_matches(is_xml_whitespace);
        let skipped = rest.len() - trimmed.len();
        self.pos += skipped;
        skipped > 0
    }

    fn skip_past(&mut self, terminator: &str, what: &str) -> XmlResult<&'a str> {
        match self.rest().find(terminator) {
            Some(offset) => {
                let skipped = &self.rest()[..offset];
                self.pos += offset + terminator.len();
                Ok(skipped)
            }
            None => Err(self.error(format!("unterminated {what}"))),
        }
    }

    fn skip_misc(&mut self) -> XmlResult<()> {
        loop {
            self.skip_whitespace();
            if self.starts_with("<?") {
                self.skip_past("?>", "processing instruction")?;
            } else if self.starts_with("<!--") {
                self.skip_past("-->", "comment")?;
            } else if self.starts_with("<!DOCTYPE") {
                self.skip_doctype()?;
            } else {
                return Ok(());
            }
        }
    }

    fn skip_doctype(&mut self) -> XmlResult<()> {
        let mut depth = 0usize;
        for (offset, ch) in self.rest().char_indices() {
            match ch {
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                '>' if depth == 0 => {
                    self.pos += offset + 1;
                    return Ok(());
                }
                _ => {}
            }
        }
        Err(self.error("unterminated DOCTYPE"))
    }

    fn read_name(&mut self) -> XmlResult<&'a str> {
        let rest = self.rest();
        let end = rest
            .char_indices()
            .find(|(_, ch)| is_xml_whitespace(*ch) || "/>=<'\"!?&;".contains(*ch))
            .map_or(rest.len(), |(offset, _)| offset);
        let name = &rest[..end];
        match name.chars().next() {
            None => Err(self.error("expected a name")),
            Some(first) if first.is_ascii_digit() || first == '-' || first == '.' => {
                Err(self.error(format!("invalid name '{name}'")))
            }
            Some(_) => {
                self.pos += end;
                Ok(name)
            }
        }
    }

    fn read_attribute_value(&mut self) -> XmlResult<String> {
        let quote = match self.peek() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error("expected quoted attribute value")),
        };
        self.pos += 1;
        let start = self.pos;
        let Some(len) = self.rest().find(quote) else {
            return Err(self.error("unterminated attribute value"));
        };
        let raw = &self.rest()[..len];
        if raw.contains('<') {
            return Err(self.error("'<' in attribute value"));
        }
        self.pos += len + 1;
        let normalized = raw.replace(['\t', '\n', '\r'], " ");
        decode_references(&normalized, start)
    }

    fn resolve(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_NAMESPACE);
        }
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter())
            .find(|(bound, _)| bound == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    fn parse_element(&mut self) -> XmlResult<Element> {
        let open_at = self.pos;
        if self.depth >= MAX_DEPTH {
            return Err(self.error(format!("elements nested deeper than {MAX_DEPTH}")));
        }
        self.depth += 1;
        self.pos += 1;
        let raw_name = self.read_name()?;
        let mut raw_attributes: Vec<(&'a str, String, usize)> = Vec::new();
        let empty;
        loop {
            let spaced = self.skip_whitespace();
            if self.starts_with("/>") {
                self.pos += 2;
                empty = true;
                break;
            }
            if self.starts_with(">") {
                self.pos += 1;
                empty = false;
                break;
            }
            if self.pos >= self.input.len() {
                return Err(self.error(format!("unterminated start tag <{raw_name}>")));
            }
            if !spaced {
                return Err(self.error("expected whitespace before attribute"));
            }
            let attr_at = self.pos;
            let attr_name = self.read_name()?;
            self.skip_whitespace();
            if !self.starts_with("=") {
                return Err(self.error(format!("expected '=' after attribute '{attr_name}'")));
            }
            self.pos += 1;
            self.skip_whitespace();
            let value = self.read_attribute_value()?;
            if raw_attributes.iter().any(|(name, _, _)| *name == attr_name) {
                return Err(XmlError {
                    position: attr_at,
                    message: format!("duplicate attribute '{attr_name}'"),
                });
            }
            raw_attributes.push((attr_name, value, attr_at));
        }

        let mut scope = Vec::new();
        for (name, value, _) in &raw_attributes {
            if let Some(prefix) = name.strip_prefix("xmlns:") {
                scope.push((prefix.to_string(), value.clone()));
            }
        }
        self.scopes.push(scope);

        let (element_prefix, local_name) = split_qname(raw_name);
        if let Some(prefix) = element_prefix {
            if self.resolve(prefix).is_none() {
                return Err(XmlError {
                    position: open_at,
                    message: format!("unbound namespace prefix '{prefix}'"),
                });
            }
        }

        let mut attributes = Vec::with_capacity(raw_attributes.len());
        for (name, value, attr_at) in raw_attributes {
            if name == "xmlns" || name.starts_with("xmlns:") {
                continue;
            }
            let (prefix, local) = split_qname(name);
            let namespace = match prefix {
                None => None,
                Some(prefix) => match self.resolve(prefix) {
                    Some(uri) => Some(uri.to_string()),
                    None => {
                        return Err(XmlError {
                            position: attr_at,
                            message: format!("unbound namespace prefix '{prefix}'"),
                        });
                    }
                },
            };
            attributes.push(Attribute {
                name: local.to_string(),
                namespace,
                value,
            });
        }

        let children = if empty {
            Vec::new()
        } else {
            self.parse_content(raw_name)?
        };
        self.scopes.pop();
        self.depth -= 1;

        Ok(Element {
            name: local_name.to_string(),
            attributes,
            children,
        })
    }

    fn parse_content(&mut self, raw_name: &str) -> XmlResult<Vec<Node>> {
        let mut children = Vec::new();
        let mut text = String::new();
        loop {
            if self.pos >= self.input.len() {
                return Err(self.error(format!("unclosed element <{raw_name}>")));
            }
            if self.starts_with("</") {
                self.pos += 2;
                let closing = self.read_name()?;
                self.skip_whitespace();
                if !self.starts_with(">") {
                    return Err(self.error(format!("malformed end tag </{closing}")));
                }
                self.pos += 1;
                if closing != raw_name {
                    return Err(self.error(format!(
                        "mismatched end tag </{closing}>, expected </{raw_name}>"
                    )));
                }
                flush_text(&mut children, &mut text);
                return Ok(children);
            } else if self.starts_with("<!--") {
                self.skip_past("-->", "comment")?;
            } else if self.starts_with("<![CDATA[") {
                self.pos += "<![CDATA[".len();
                let data = self.skip_past("]]>", "CDATA section")?;
                text.push_str(data);
            } else if self.starts_with("<?") {
                self.skip_past("?>", "processing instruction")?;
            } else if self.starts_with("<") {
                flush_text(&mut children, &mut text);
                children.push(Node::Element(self.parse_element()?));
            } else {
                let start = self.pos;
                let rest = self.rest();
                let len = rest.find('<').unwrap_or(rest.len());
                self.pos += len;
                let raw = rest[..len].replace("\r\n", "\n");
                text.push_str(&decode_references(&raw, start)?);
            }
        }
    }
}

fn flush_text(children: &mut Vec<Node>, text: &mut String) {
    if !text.is_empty() {
        children.push(Node::Text(std::mem::take(text)));
    }
}

fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

fn is_xml_whitespace(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n' | '\r')
}

fn decode_references(raw: &str, base: usize) -> XmlResult<String> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let position = base + (raw.len() - rest.len()) + amp;
        let Some(semi) = after.find(';') else {
            return Err(XmlError {
                position,
                message: "unterminated character reference".to_string(),
            });
        };
        let entity = &after[..semi];
        let decoded = match entity {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse::<u32>().ok()
                } else {
                    None
                };
                match code.and_then(char::from_u32) {
                    Some(ch) => ch,
                    None => {
                        return Err(XmlError {
                            position,
                            message: format!("unknown entity '&{entity};'"),
                        });
                    }
                }
            }
        };
        out.push(decoded);
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Escapes character data. `\r` is written as a reference so that line-end
/// normalization on read leaves it intact.
pub fn escape_text(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '\r']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(ch),
        }
    }
    Cow::Owned(out)
}

/// Escapes an attribute value for either quote style.
pub fn escape_attr(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '\'', '"', '\t', '\n', '\r']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(ch),
        }
    }
    Cow::Owned(out)
}

/// Whether `name` can be written as an unprefixed element name.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.'))
}
