//! Minimal FetchXML document tree: an ordered element with attributes and
//! children, parsed and re-serialized with `quick-xml`. We model FetchXML
//! generically as a tree rather than a typed struct-per-tag scheme, since
//! the rewrite rules in [`super::rewrite`] only ever add/remove/inspect
//! attributes on a handful of tag shapes (`fetch`, `entity`, `attribute`,
//! `link-entity`, `all-attributes`).

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

use crate::error::{CoreError, CoreResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: Option<String>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
            text: None,
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(existing) = self.attrs.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            existing.1 = value;
        } else {
            self.attrs.push((key.to_string(), value));
        }
    }

    pub fn remove_attr(&mut self, key: &str) {
        self.attrs.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn first_child_named(&self, name: &str) -> Option<&Element> {
        self.children_named(name).next()
    }

    /// Stable, attribute-ordered serialization: attributes are sorted by
    /// name so identical logical documents always produce identical bytes.
    pub fn to_stable_xml(&self) -> String {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        write_element(&mut writer, self);
        let bytes = writer.into_inner().into_inner();
        String::from_utf8(bytes).expect("fetchxml output must be valid utf-8")
    }
}

fn write_element(writer: &mut Writer<Cursor<Vec<u8>>>, el: &Element) {
    let mut sorted_attrs = el.attrs.clone();
    sorted_attrs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut start = BytesStart::new(el.name.clone());
    for (k, v) in &sorted_attrs {
        start.push_attribute((k.as_str(), v.as_str()));
    }

    if el.children.is_empty() && el.text.is_none() {
        writer.write_event(Event::Empty(start)).expect("in-memory write cannot fail");
        return;
    }

    writer.write_event(Event::Start(start)).expect("in-memory write cannot fail");
    if let Some(text) = &el.text {
        writer
            .write_event(Event::Text(BytesText::new(text)))
            .expect("in-memory write cannot fail");
    }
    for child in &el.children {
        write_element(writer, child);
    }
    writer
        .write_event(Event::End(BytesEnd::new(el.name.clone())))
        .expect("in-memory write cannot fail");
}

/// Parse a FetchXML document into its tree form. Faults `InvalidFetchXml`
/// on malformed XML or a missing root `<fetch>` element.
pub fn parse(xml: &str) -> CoreResult<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                stack.push(element_from_start(&e)?);
            }
            Ok(Event::Empty(e)) => {
                let el = element_from_start(&e)?;
                push_completed(&mut stack, &mut root, el);
            }
            Ok(Event::End(_)) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| invalid("unbalanced closing tag in FetchXML document"))?;
                push_completed(&mut stack, &mut root, el);
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    let txt = t.unescape().map_err(|e| invalid(&e.to_string()))?;
                    if !txt.trim().is_empty() {
                        top.text = Some(txt.into_owned());
                    }
                }
            }
            Ok(_) => {}
            Err(e) => return Err(invalid(&e.to_string())),
        }
    }

    let root = root.ok_or_else(|| invalid("missing root <fetch> element"))?;
    if !root.name.eq_ignore_ascii_case("fetch") {
        return Err(invalid("root element must be <fetch>"));
    }
    if root.first_child_named("entity").is_none() {
        return Err(invalid("missing required <entity> element"));
    }
    if root
        .first_child_named("entity")
        .and_then(|e| e.attr("name"))
        .is_none()
    {
        return Err(invalid("<entity> element missing required name attribute"));
    }
    Ok(root)
}

fn push_completed(stack: &mut Vec<Element>, root: &mut Option<Element>, el: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None => *root = Some(el),
    }
}

fn element_from_start(e: &BytesStart) -> CoreResult<Element> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut el = Element::new(name);
    for attr in e.attributes() {
        let attr = attr.map_err(|e| invalid(&e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| invalid(&e.to_string()))?
            .into_owned();
        el.attrs.push((key, value));
    }
    Ok(el)
}

fn invalid(detail: &str) -> CoreError {
    CoreError::new(crate::error::ErrorCode::InvalidFetchXml, "invalid FetchXML document").with_details(detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_fetch() {
        let xml = r#"<fetch><entity name="account"><attribute name="name"/></entity></fetch>"#;
        let doc = parse(xml).unwrap();
        assert_eq!(doc.name, "fetch");
        let entity = doc.first_child_named("entity").unwrap();
        assert_eq!(entity.attr("name"), Some("account"));
    }

    #[test]
    fn missing_entity_name_faults() {
        let xml = r#"<fetch><entity></entity></fetch>"#;
        assert!(parse(xml).is_err());
    }

    #[test]
    fn missing_root_faults() {
        assert!(parse("not xml at all <<<").is_err());
    }

    #[test]
    fn stable_serialization_sorts_attributes() {
        let mut el = Element::new("entity");
        el.set_attr("name", "account");
        el.set_attr("alias", "a");
        let xml = el.to_stable_xml();
        assert!(xml.find("alias").unwrap() < xml.find("name").unwrap());
    }
}
