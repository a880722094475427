//! Streaming XML driver
//!
//! Both codecs are written as SAX-style state machines: the driver walks
//! the quick-xml event stream and hands element-start, element-end and
//! character callbacks to a handler in document order. A handler aborts
//! parsing by returning an error, which the driver propagates unchanged.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::Result;

/// Unescaped attributes of one element, in document order
pub(crate) struct Attributes {
    pairs: Vec<(String, String)>,
}

impl Attributes {
    fn from_start(element: &BytesStart<'_>) -> Result<Self> {
        let mut pairs = Vec::new();
        for attr in element.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            pairs.push((key, value));
        }
        Ok(Self { pairs })
    }

    /// Value of the attribute named `name`, if present
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// All attributes as `(name, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

/// Callbacks delivered by [`parse_str`] in document order
pub(crate) trait SaxHandler {
    /// An opening tag, with its attributes
    fn element_start(&mut self, name: &str, attrs: &Attributes) -> Result<()>;
    /// A closing tag
    fn element_end(&mut self, name: &str) -> Result<()>;
    /// Character data between tags, whitespace-trimmed
    fn characters(&mut self, text: &str) -> Result<()>;
}

/// Drive `handler` over the document in `xml`
pub(crate) fn parse_str<H: SaxHandler>(xml: &str, handler: &mut H) -> Result<()> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let attrs = Attributes::from_start(e)?;
                handler.element_start(&name, &attrs)?;
            }
            Event::Empty(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let attrs = Attributes::from_start(e)?;
                handler.element_start(&name, &attrs)?;
                handler.element_end(&name)?;
            }
            Event::End(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                handler.element_end(&name)?;
            }
            Event::Text(ref t) => {
                let text = t.unescape()?;
                if !text.is_empty() {
                    handler.characters(&text)?;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl SaxHandler for Recorder {
        fn element_start(&mut self, name: &str, attrs: &Attributes) -> Result<()> {
            let attrs: Vec<String> = attrs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            self.events.push(format!("+{}[{}]", name, attrs.join(",")));
            Ok(())
        }

        fn element_end(&mut self, name: &str) -> Result<()> {
            if name == "bad" {
                return Err(Error::invalid("aborted"));
            }
            self.events.push(format!("-{}", name));
            Ok(())
        }

        fn characters(&mut self, text: &str) -> Result<()> {
            self.events.push(format!("#{}", text));
            Ok(())
        }
    }

    #[test]
    fn events_arrive_in_document_order() {
        let mut recorder = Recorder::default();
        parse_str(
            r#"<root a="1"><child b="x &amp; y"/>text</root>"#,
            &mut recorder,
        )
        .unwrap();
        assert_eq!(
            recorder.events,
            [
                "+root[a=1]",
                "+child[b=x & y]",
                "-child",
                "#text",
                "-root"
            ]
        );
    }

    #[test]
    fn handler_error_aborts_parsing() {
        let mut recorder = Recorder::default();
        let result = parse_str("<root><bad/><more/></root>", &mut recorder);
        assert!(result.is_err());
        // Nothing after the abort point was delivered.
        assert_eq!(recorder.events, ["+root[]", "+bad[]"]);
    }

    #[test]
    fn malformed_xml_is_reported() {
        let mut recorder = Recorder::default();
        assert!(parse_str("<root><child></root>", &mut recorder).is_err());
    }
}
