//! Typed view over SOAP responses.
//!
//! The telemetry service nests the variable we want at varying depths and
//! spells field names inconsistently, so responses are parsed into a small
//! element tree and searched by (case-insensitive) local names.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use time::{macros::format_description, OffsetDateTime, PrimitiveDateTime};

const NAME_KEYS: &[&str] = &["name", "variablename", "varname"];
const VALUE_KEYS: &[&str] = &["value", "val", "valore"];
const TIME_KEYS: &[&str] = &["timestamp", "time", "datetime", "date", "dataora"];
const SERIAL_KEYS: &[&str] = &["serialnumber", "serial", "serialno", "matricola"];
const ONLINE_KEYS: &[&str] = &["online", "isonline", "connected"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    fn named(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    pub fn is(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.name.eq_ignore_ascii_case(n))
    }

    pub fn child(&self, names: &[&str]) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.is(names))
    }

    /// Text of a direct child or value of an attribute with one of `names`.
    pub fn field(&self, names: &[&str]) -> Option<&str> {
        if let Some(child) = self.child(names) {
            return Some(child.text.as_str());
        }
        self.attributes
            .iter()
            .find(|(k, _)| names.iter().any(|n| k.eq_ignore_ascii_case(n)))
            .map(|(_, v)| v.as_str())
    }

    /// Depth-first search, self included.
    pub fn find<'a, P>(&'a self, pred: &P) -> Option<&'a XmlElement>
    where
        P: Fn(&XmlElement) -> bool,
    {
        if pred(self) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(pred))
    }
}

#[derive(thiserror::Error, Debug)]
#[error("malformed xml: {0}")]
pub struct XmlParseError(String);

fn start_element(e: &BytesStart<'_>) -> Result<XmlElement, XmlParseError> {
    let mut el = XmlElement::named(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
    for attr in e.attributes() {
        let attr = attr.map_err(|err| XmlParseError(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| XmlParseError(err.to_string()))?
            .into_owned();
        el.attributes.push((key, value));
    }
    Ok(el)
}

/// Parse a document into a tree rooted at a synthetic `#document` element.
pub fn parse(xml: &str) -> Result<XmlElement, XmlParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack = vec![XmlElement::named("#document".to_string())];

    loop {
        match reader.read_event().map_err(|e| XmlParseError(e.to_string()))? {
            Event::Start(e) => stack.push(start_element(&e)?),
            Event::Empty(e) => {
                let el = start_element(&e)?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(el);
                }
            }
            Event::End(_) => {
                if stack.len() < 2 {
                    return Err(XmlParseError("unexpected closing tag".to_string()));
                }
                if let Some(el) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(el);
                    }
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| XmlParseError(e.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Event::CData(c) => {
                let raw = c.into_inner();
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&raw));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(XmlParseError("unclosed element at end of document".to_string()));
    }
    stack
        .pop()
        .ok_or_else(|| XmlParseError("empty document".to_string()))
}

/// A variable located in a response tree, still as raw text.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedVariable {
    pub value: Option<String>,
    pub timestamp: Option<String>,
}

/// Locate the variable called `name` anywhere in `tree`.
///
/// Matches either a record carrying a name field (`<Name>LIVELLO</Name>` or
/// `Name="LIVELLO"`) with sibling value/timestamp fields, or a leaf element
/// named after the variable itself.
pub fn resolve_named_variable(tree: &XmlElement, name: &str) -> Option<NamedVariable> {
    let record = tree.find(&|el: &XmlElement| {
        el.field(NAME_KEYS)
            .map(|n| n.trim().eq_ignore_ascii_case(name))
            .unwrap_or(false)
    });
    if let Some(record) = record {
        return Some(NamedVariable {
            value: record.field(VALUE_KEYS).map(str::to_string),
            timestamp: record.field(TIME_KEYS).map(str::to_string),
        });
    }

    let leaf = tree.find(&|el: &XmlElement| el.children.is_empty() && el.name.eq_ignore_ascii_case(name))?;
    Some(NamedVariable {
        value: Some(leaf.text.clone()),
        timestamp: None,
    })
}

pub fn resolve_serial(tree: &XmlElement) -> Option<String> {
    tree.find(&|el: &XmlElement| el.is(SERIAL_KEYS) && !el.text.trim().is_empty())
        .map(|el| el.text.trim().to_string())
}

/// `Some(false)` when the response explicitly reports the device offline.
pub fn resolve_online(tree: &XmlElement) -> Option<bool> {
    let el = tree.find(&|el: &XmlElement| el.is(ONLINE_KEYS) && !el.text.trim().is_empty())?;
    match el.text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Fault string of a SOAP fault, if the response is one.
pub fn resolve_fault(tree: &XmlElement) -> Option<String> {
    let fault = tree.find(&|el: &XmlElement| el.name.eq_ignore_ascii_case("fault"))?;
    let reason = fault
        .find(&|el: &XmlElement| el.is(&["faultstring", "text", "reason"]) && !el.text.trim().is_empty())
        .map(|el| el.text.trim().to_string())
        .unwrap_or_else(|| "unspecified SOAP fault".to_string());
    Some(reason)
}

/// Lenient level parsing: accepts a decimal comma and a trailing `%`.
pub fn parse_level(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().trim_end_matches('%').trim().replace(',', ".");
    let value: f64 = cleaned.parse().ok()?;
    value.is_finite().then_some(value)
}

/// RFC 3339, or a naive `YYYY-MM-DD[ T]HH:MM:SS` / `DD/MM/YYYY HH:MM:SS` taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if let Ok(ts) = OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339) {
        return Some(ts);
    }

    let iso_space = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    let iso_t = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    let european = format_description!("[day]/[month]/[year] [hour]:[minute]:[second]");

    [iso_space, iso_t, european]
        .iter()
        .find_map(|fmt| PrimitiveDateTime::parse(raw, fmt).ok())
        .map(PrimitiveDateTime::assume_utc)
}
