//! 轻量 XML 元素树。读取时保留根元素内的元素、属性、文本、CDATA 与注释；
//! 根元素之外的注释、处理指令与 DOCTYPE 会被丢弃。
//! 写回时声明始终位于最前，其余内容按两空格缩进输出。

use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error(transparent)]
    Syntax(#[from] quick_xml::Error),
    #[error("malformed XML: {0}")]
    Malformed(String),
}

impl XmlError {
    fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

/// `<?xml ...?>` 声明。
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<String>,
}

impl Default for Declaration {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            encoding: Some("UTF-8".to_string()),
            standalone: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// 构造仅含文本内容的元素，例如 `<name>Tile_0_0</name>`。
    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        let mut element = Self::new(name);
        element.children.push(XmlNode::Text(text.into()));
        element
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(XmlNode::Element(child));
    }

    /// 去掉命名空间前缀后的名称。
    #[inline]
    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    #[inline]
    pub fn is(&self, name: &str) -> bool {
        self.local_name() == name
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|element| element.is(name))
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements_mut().find(|element| element.is(name))
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.elements().filter(move |element| element.is(name))
    }

    /// 沿直接子元素路径查找，例如 `["Location", "longitude"]`。
    pub fn path(&self, path: &[&str]) -> Option<&Element> {
        let mut current = self;
        for segment in path {
            current = current.child(segment)?;
        }
        Some(current)
    }

    /// 深度优先查找第一个同名后代（不含自身）。
    pub fn descendant(&self, name: &str) -> Option<&Element> {
        for element in self.elements() {
            if element.is(name) {
                return Some(element);
            }
            if let Some(found) = element.descendant(name) {
                return Some(found);
            }
        }
        None
    }

    /// 按文档顺序收集所有同名后代（不含自身，不进入已匹配元素内部）。
    pub fn descendants_named<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        for element in self.elements() {
            if element.is(name) {
                out.push(element);
            } else {
                element.descendants_named(name, out);
            }
        }
    }

    /// 拼接直接文本与 CDATA 子节点，去除首尾空白；没有文本时返回 `None`。
    pub fn text(&self) -> Option<String> {
        let mut buffer = String::new();
        for node in &self.children {
            match node {
                XmlNode::Text(text) | XmlNode::CData(text) => buffer.push_str(text),
                _ => {}
            }
        }
        let trimmed = buffer.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    pub fn path_text(&self, path: &[&str]) -> Option<String> {
        self.path(path).and_then(Element::text)
    }
}

#[inline]
fn local_name(name: &str) -> &str {
    match name.rsplit_once(':') {
        Some((_, local)) => local,
        None => name,
    }
}

/// 完整的 XML 文档：声明 + 根元素。
#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    pub declaration: Declaration,
    pub root: Element,
}

impl XmlDocument {
    pub fn new(root: Element) -> Self {
        Self {
            declaration: Declaration::default(),
            root,
        }
    }

    pub fn parse(source: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(source);
        reader.trim_text(true);

        let mut declaration: Option<Declaration> = None;
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Eof => break,
                Event::Decl(decl) => {
                    declaration = Some(read_declaration(&decl)?);
                }
                Event::Start(start) => {
                    stack.push(read_start(&reader, &start)?);
                }
                Event::Empty(start) => {
                    let element = read_start(&reader, &start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(end) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| XmlError::malformed("unexpected closing tag"))?;
                    let end_qname = end.name();
                    let end_name = reader.decoder().decode(end_qname.as_ref())?;
                    if end_name != element.name {
                        return Err(XmlError::malformed(format!(
                            "closing tag </{end_name}> does not match <{}>",
                            element.name
                        )));
                    }
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let value = text.unescape()?.into_owned();
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(XmlNode::Text(value)),
                        None => {
                            return Err(XmlError::malformed(format!(
                                "text outside of root element: {value}"
                            )));
                        }
                    }
                }
                Event::CData(data) => {
                    let value = reader.decoder().decode(&data)?.into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode::CData(value));
                    }
                }
                Event::Comment(comment) => {
                    let value = reader.decoder().decode(&comment)?.into_owned();
                    // 根元素之外的注释直接丢弃
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode::Comment(value));
                    }
                }
                Event::PI(_) | Event::DocType(_) => {}
            }
        }

        if !stack.is_empty() {
            return Err(XmlError::malformed(format!(
                "unclosed element <{}>",
                stack.last().map(|e| e.name.as_str()).unwrap_or_default()
            )));
        }
        let root = root.ok_or_else(|| XmlError::malformed("document has no root element"))?;
        Ok(Self {
            declaration: declaration.unwrap_or_default(),
            root,
        })
    }

    pub fn to_xml_string(&self) -> Result<String, XmlError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new(
            &self.declaration.version,
            self.declaration.encoding.as_deref(),
            self.declaration.standalone.as_deref(),
        )))?;
        write_element(&mut writer, &self.root)?;
        let mut bytes = writer.into_inner();
        bytes.push(b'\n');
        String::from_utf8(bytes).map_err(|err| XmlError::malformed(err.to_string()))
    }
}

fn read_declaration(decl: &BytesDecl<'_>) -> Result<Declaration, XmlError> {
    let version = String::from_utf8_lossy(&decl.version()?).into_owned();
    let encoding = match decl.encoding() {
        Some(value) => Some(String::from_utf8_lossy(&value?).into_owned()),
        None => None,
    };
    let standalone = match decl.standalone() {
        Some(value) => Some(String::from_utf8_lossy(&value?).into_owned()),
        None => None,
    };
    Ok(Declaration {
        version,
        encoding,
        standalone,
    })
}

fn read_start(reader: &Reader<&[u8]>, start: &BytesStart<'_>) -> Result<Element, XmlError> {
    let name = reader.decoder().decode(start.name().as_ref())?.into_owned();
    let mut element = Element::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = reader.decoder().decode(attr.key.as_ref())?.into_owned();
        let value = attr.unescape_value()?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(XmlNode::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(XmlError::malformed(format!(
            "second root element <{}>",
            element.name
        ))),
    }
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<(), XmlError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if element.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    for node in &element.children {
        match node {
            XmlNode::Element(child) => write_element(writer, child)?,
            XmlNode::Text(text) => writer.write_event(Event::Text(BytesText::new(text)))?,
            XmlNode::CData(text) => writer.write_event(Event::CData(BytesCData::new(text)))?,
            XmlNode::Comment(text) => {
                writer.write_event(Event::Comment(BytesText::from_escaped(text)))?
            }
        }
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
    Ok(())
}
