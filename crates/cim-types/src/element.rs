//! Generic XML element tree (the "tuple tree").
//!
//! An [`Element`] is a name, an attribute list and an ordered list of child
//! elements and text fragments. The `cimxml` tokenizer produces these trees
//! from response bytes; the object model builds them to serialize requests.

use std::fmt::Write as _;

use quick_xml::escape::escape;

/// Child of an [`Element`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Content>,
}

impl Element {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder: set an attribute.
    pub fn attr<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder: set an attribute when a value is present.
    pub fn opt_attr<K: Into<String>, V: Into<String>>(self, key: K, value: Option<V>) -> Self {
        match value {
            Some(value) => self.attr(key, value),
            None => self,
        }
    }

    /// Builder: set a boolean attribute (`true`/`false`) when present.
    pub fn bool_attr<K: Into<String>>(self, key: K, value: Option<bool>) -> Self {
        self.opt_attr(key, value.map(|b| if b { "true" } else { "false" }))
    }

    /// Builder: append a child element.
    pub fn child(mut self, child: Element) -> Self {
        self.children.push(Content::Element(child));
        self
    }

    /// Builder: append several child elements.
    pub fn children<I: IntoIterator<Item = Element>>(mut self, children: I) -> Self {
        self.children
            .extend(children.into_iter().map(Content::Element));
        self
    }

    /// Builder: append a text fragment.
    pub fn text<S: Into<String>>(mut self, text: S) -> Self {
        self.push_text(text.into());
        self
    }

    pub fn set_attr<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let key = key.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key, value)),
        }
    }

    /// Append text, coalescing with a trailing text fragment.
    pub fn push_text(&mut self, text: String) {
        if let Some(Content::Text(last)) = self.children.last_mut() {
            last.push_str(&text);
        } else {
            self.children.push(Content::Text(text));
        }
    }

    pub fn get_attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Child elements, skipping text fragments.
    pub fn element_children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            Content::Element(e) => Some(e),
            Content::Text(_) => None,
        })
    }

    /// Consume the element and return its child elements.
    pub fn into_element_children(self) -> impl Iterator<Item = Element> {
        self.children.into_iter().filter_map(|c| match c {
            Content::Element(e) => Some(e),
            Content::Text(_) => None,
        })
    }

    /// Concatenated text content of the direct children.
    pub fn text_content(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                Content::Text(t) => Some(t.as_str()),
                Content::Element(_) => None,
            })
            .collect()
    }

    /// Serialize to a compact XML string.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attrs {
            // Writing into a String cannot fail.
            let _ = write!(out, " {key}=\"{}\"", escape(value.as_str()));
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                Content::Element(e) => e.write_xml(out),
                Content::Text(t) => out.push_str(&escape(t.as_str())),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_escapes_text_and_attributes() {
        let e = Element::new("VALUE")
            .attr("NAME", "a\"b")
            .text("<x> & y");
        assert_eq!(
            e.to_xml(),
            "<VALUE NAME=\"a&quot;b\">&lt;x&gt; &amp; y</VALUE>"
        );
    }

    #[test]
    fn text_fragments_coalesce() {
        let mut e = Element::new("VALUE");
        e.push_text("ab".into());
        e.push_text("cd".into());
        assert_eq!(e.children.len(), 1);
        assert_eq!(e.text_content(), "abcd");
        assert_eq!(Element::new("X").attr("A", "1").to_xml(), "<X A=\"1\"/>");
    }
}
