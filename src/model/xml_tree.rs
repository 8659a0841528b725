//! Owned output tree for one decoded record.
//!
//! Elements live in a flat arena and refer to each other by index. A parent owns its
//! children in document order, and every element owns its attributes and text.
//!
//! Values typed `NullType` are remembered as such and are suppressed by every serializer,
//! which is what distinguishes `<Correlation />` from `<Correlation ActivityID="" />`.

use crate::binxml::value_variant::BinXmlValueType;

/// Index of an element in its [`XmlTree`].
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub name: String,
    pub value: Option<String>,
    pub value_type: BinXmlValueType,
}

impl XmlAttribute {
    /// `false` for attributes whose value is null or was never set.
    pub fn has_value(&self) -> bool {
        !self.value_type.is_null() && self.value.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub text: Option<String>,
    pub text_type: BinXmlValueType,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
}

impl XmlElement {
    /// Text that serializers should emit, if any.
    pub fn visible_text(&self) -> Option<&str> {
        match self.text_type {
            BinXmlValueType::NullType => None,
            _ => self.text.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlTree {
    nodes: Vec<XmlElement>,
    roots: Vec<NodeId>,
}

impl XmlTree {
    pub fn new() -> Self {
        XmlTree::default()
    }

    /// Allocates a detached element.
    pub fn new_element(&mut self, name: impl Into<String>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(XmlElement {
            name: name.into(),
            text: None,
            text_type: BinXmlValueType::NullType,
            attributes: Vec::new(),
            children: Vec::new(),
            parent: None,
        });
        id
    }

    /// Makes a detached element a top-level element of the tree.
    pub fn add_root(&mut self, node: NodeId) {
        self.roots.push(node);
    }

    /// Appends `child` as the last child of `parent`.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
    }

    /// Replaces the text of `node`. A `NullType` value clears it.
    pub fn set_text(&mut self, node: NodeId, text: impl Into<String>, text_type: BinXmlValueType) {
        let element = &mut self.nodes[node];
        element.text_type = text_type;
        element.text = if text_type.is_null() {
            None
        } else {
            Some(text.into())
        };
    }

    /// Appends to the text of `node`, or sets it when it has none.
    pub fn append_text(&mut self, node: NodeId, text: &str, text_type: BinXmlValueType) {
        if text_type.is_null() {
            return;
        }
        let element = &mut self.nodes[node];
        match element.text.as_mut() {
            Some(existing) => existing.push_str(text),
            None => {
                element.text = Some(text.to_owned());
                element.text_type = text_type;
            }
        }
    }

    /// Adds an attribute holding `value` and returns its index within `node`.
    pub fn add_attribute(
        &mut self,
        node: NodeId,
        name: impl Into<String>,
        value: &str,
        value_type: BinXmlValueType,
    ) -> usize {
        let index = self.open_attribute(node, name);
        self.append_attribute_value(node, index, value, value_type);
        index
    }

    /// Adds an attribute without a value and returns its index within `node`.
    ///
    /// The value is filled in by [`XmlTree::append_attribute_value`] as the tokens following the
    /// attribute name are decoded.
    pub fn open_attribute(&mut self, node: NodeId, name: impl Into<String>) -> usize {
        let attributes = &mut self.nodes[node].attributes;
        attributes.push(XmlAttribute {
            name: name.into(),
            value: None,
            value_type: BinXmlValueType::NullType,
        });
        attributes.len() - 1
    }

    /// Appends to an attribute value. Null values leave the attribute untouched.
    pub fn append_attribute_value(
        &mut self,
        node: NodeId,
        attribute: usize,
        value: &str,
        value_type: BinXmlValueType,
    ) {
        if value_type.is_null() {
            return;
        }
        if let Some(attr) = self.nodes[node].attributes.get_mut(attribute) {
            match attr.value.as_mut() {
                Some(existing) => existing.push_str(value),
                None => attr.value = Some(value.to_owned()),
            }
            attr.value_type = value_type;
        }
    }

    /// First child of `parent` named `name`.
    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child].name == name)
    }

    /// Follows `path` from the first root, whose name must be `path[0]`.
    pub fn find_path(&self, path: &[&str]) -> Option<NodeId> {
        let (first, rest) = path.split_first()?;
        let root = self.root().filter(|&r| self.nodes[r].name == *first)?;
        rest.iter()
            .try_fold(root, |node, name| self.find_child(node, name))
    }

    pub fn element(&self, node: NodeId) -> &XmlElement {
        &self.nodes[node]
    }

    pub fn get(&self, node: NodeId) -> Option<&XmlElement> {
        self.nodes.get(node)
    }

    pub fn root(&self) -> Option<NodeId> {
        self.roots.first().copied()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
