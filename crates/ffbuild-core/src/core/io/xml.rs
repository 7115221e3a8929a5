use crate::core::error::LoadError;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// An element of a parsed definition source.
///
/// Attributes keep their document order. Text content of the element (not of
/// its children) is concatenated into `text`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlNode {
    pub name: String,
    attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Builder-style attribute setter, mainly for programmatic definitions.
    pub fn with_attr(mut self, key: &str, value: impl ToString) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_child(mut self, child: XmlNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn set_attr(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    /// Parses a document and returns its root element.
    ///
    /// # Arguments
    ///
    /// * `origin` - Name of the source, used in error messages.
    /// * `content` - The XML text.
    pub fn parse_str(origin: &str, content: &str) -> Result<XmlNode, LoadError> {
        let xml_error = |source: quick_xml::Error| LoadError::Xml {
            origin: origin.to_string(),
            source,
        };

        let mut reader = Reader::from_str(content);
        reader.trim_text(true);

        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            match reader.read_event().map_err(xml_error)? {
                Event::Start(ref e) => stack.push(Self::from_start(e).map_err(xml_error)?),
                Event::Empty(ref e) => {
                    let node = Self::from_start(e).map_err(xml_error)?;
                    Self::attach(&mut stack, &mut root, node, origin)?;
                }
                Event::End(_) => {
                    let node = stack.pop().ok_or_else(|| LoadError::Malformed {
                        origin: origin.to_string(),
                        reason: "unbalanced closing tag".to_string(),
                    })?;
                    Self::attach(&mut stack, &mut root, node, origin)?;
                }
                Event::Text(e) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&e.unescape().map_err(xml_error)?);
                    }
                }
                Event::CData(e) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&e));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(LoadError::Malformed {
                origin: origin.to_string(),
                reason: "unexpected end of document".to_string(),
            });
        }
        root.ok_or_else(|| LoadError::Malformed {
            origin: origin.to_string(),
            reason: "document has no root element".to_string(),
        })
    }

    fn from_start(e: &BytesStart) -> Result<XmlNode, quick_xml::Error> {
        let mut node = XmlNode::new(&String::from_utf8_lossy(e.name().as_ref()));
        for attr in e.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            node.attributes.push((key, value));
        }
        Ok(node)
    }

    fn attach(
        stack: &mut [XmlNode],
        root: &mut Option<XmlNode>,
        node: XmlNode,
        origin: &str,
    ) -> Result<(), LoadError> {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None if root.is_none() => *root = Some(node),
            None => {
                return Err(LoadError::Malformed {
                    origin: origin.to_string(),
                    reason: "multiple root elements".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, key: &str) -> bool {
        self.attr(key).is_some()
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn required_attr(&self, key: &str) -> Result<&str, LoadError> {
        self.attr(key).ok_or_else(|| LoadError::MissingAttribute {
            element: self.name.clone(),
            attribute: key.to_string(),
        })
    }

    /// Returns the first present attribute among `keys`.
    pub fn attr_either<'a, 'k>(&'a self, keys: &[&'k str]) -> Option<(&'k str, &'a str)> {
        keys.iter()
            .find_map(|&k| self.attr(k).map(|v| (k, v)))
    }

    pub fn attr_f64(&self, key: &str) -> Result<Option<f64>, LoadError> {
        self.attr(key)
            .map(|v| {
                v.trim()
                    .parse::<f64>()
                    .map_err(|e| LoadError::invalid_value(&self.name, key, v, e.to_string()))
            })
            .transpose()
    }

    pub fn required_f64(&self, key: &str) -> Result<f64, LoadError> {
        let value = self.required_attr(key)?;
        value
            .trim()
            .parse::<f64>()
            .map_err(|e| LoadError::invalid_value(&self.name, key, value, e.to_string()))
    }

    pub fn attr_usize(&self, key: &str) -> Result<Option<usize>, LoadError> {
        self.attr(key)
            .map(|v| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|e| LoadError::invalid_value(&self.name, key, v, e.to_string()))
            })
            .transpose()
    }

    /// Parses a boolean attribute, accepting `true`/`false` in any case and `1`/`0`.
    pub fn attr_bool(&self, key: &str) -> Result<Option<bool>, LoadError> {
        self.attr(key)
            .map(|v| match v.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(LoadError::invalid_value(
                    &self.name,
                    key,
                    v,
                    "expected a boolean",
                )),
            })
            .transpose()
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }
}
