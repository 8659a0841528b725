use log::{debug, trace, warn};

use crate::ParserSettings;
use crate::binxml::element_stack::ElementStack;
use crate::binxml::name::BinXmlName;
use crate::binxml::name_cache::NameCache;
use crate::binxml::tokens::{
    BinXmlRawToken, TEMPLATE_MARKER_WINDOW, TemplateDefinitionHeader, TemplateInstance,
    find_template_marker,
};
use crate::binxml::value_table::{ValueDescriptor, ValueTable};
use crate::binxml::value_variant::{BinXmlValue, BinXmlValueType};
use crate::err::{DeserializationError, DeserializationResult as Result};
use crate::messages;
use crate::model::xml_tree::{NodeId, XmlTree};
use crate::utils::{ByteCursor, bytes};

/// Decodes BinXML streams of one chunk into [`XmlTree`]s.
///
/// The name cache is borrowed for the lifetime of the deserializer; callers decoding a whole
/// chunk keep one cache and hand it to a deserializer per record.
pub struct BinXmlDeserializer<'a, 'c> {
    chunk: &'a [u8],
    name_cache: &'c mut NameCache,
    settings: &'c ParserSettings,
    /// Tokens and instantiations spent on the current record.
    steps: usize,
}

/// Where the token stream currently writes into the tree.
struct StreamState {
    stack: ElementStack,
    pending_attribute: Option<(NodeId, usize)>,
    /// Element receiving top-level elements of this stream, `None` for tree roots.
    attach_to: Option<NodeId>,
}

impl StreamState {
    fn new(attach_to: Option<NodeId>) -> Self {
        StreamState {
            stack: ElementStack::new(),
            pending_attribute: None,
            attach_to,
        }
    }

    fn current_element(&self) -> Option<NodeId> {
        self.stack.peek().map(|open| open.node).or(self.attach_to)
    }
}

impl<'a, 'c> BinXmlDeserializer<'a, 'c> {
    pub fn new(
        chunk: &'a [u8],
        name_cache: &'c mut NameCache,
        settings: &'c ParserSettings,
    ) -> Self {
        BinXmlDeserializer {
            chunk,
            name_cache,
            settings,
            steps: 0,
        }
    }

    /// Decodes the BinXML of a record, which must start with a template instance.
    ///
    /// `offset` and `size` delimit the record's BinXML within the chunk.
    pub fn deserialize_record(&mut self, offset: usize, size: usize) -> Result<XmlTree> {
        let mut tree = XmlTree::new();
        self.steps = 0;
        self.deserialize_binxml(&mut tree, None, offset, size, 0, true)?;
        Ok(tree)
    }

    /// Decodes a self-contained token stream that does not start with a template instance.
    pub fn deserialize_fragment(&mut self, offset: usize, size: usize) -> Result<XmlTree> {
        let mut tree = XmlTree::new();
        self.steps = 0;
        let end = self.span_end(offset, size, "binxml fragment")?;
        self.deserialize_stream(&mut tree, None, offset, end, None, 0)?;
        Ok(tree)
    }

    fn span_end(&self, offset: usize, size: usize, what: &'static str) -> Result<usize> {
        bytes::span_r(self.chunk, offset, size, what)?;
        Ok(offset + size)
    }

    fn check_depth(&self, depth: usize, offset: usize) -> Result<()> {
        if depth > self.settings.get_max_recursion_depth() {
            return Err(DeserializationError::RecursionLimitExceeded {
                offset: offset as u64,
                limit: self.settings.get_max_recursion_depth(),
            });
        }
        Ok(())
    }

    fn spend_step(&mut self, offset: usize) -> Result<()> {
        self.steps += 1;
        if self.steps > self.settings.get_max_decode_steps() {
            return Err(DeserializationError::DecodeBudgetExceeded {
                offset: offset as u64,
                limit: self.settings.get_max_decode_steps(),
            });
        }
        Ok(())
    }

    /// Decodes `[offset, offset + size)`, instantiating the template it starts with.
    ///
    /// Spans without a template instance marker are an error when `require_template` is set,
    /// and are otherwise decoded as plain token streams.
    fn deserialize_binxml(
        &mut self,
        tree: &mut XmlTree,
        attach_to: Option<NodeId>,
        offset: usize,
        size: usize,
        depth: usize,
        require_template: bool,
    ) -> Result<()> {
        self.check_depth(depth, offset)?;
        let end = self.span_end(offset, size, "binxml")?;

        let Some(marker) = find_template_marker(self.chunk, offset, end) else {
            if require_template {
                return Err(DeserializationError::MissingTemplateMarker {
                    offset: offset as u64,
                    window: TEMPLATE_MARKER_WINDOW,
                });
            }
            return self.deserialize_stream(tree, attach_to, offset, end, None, depth);
        };

        let mut cursor = ByteCursor::with_pos(&self.chunk[..end], marker + 1)?;
        let instance = TemplateInstance::from_binxml_stream(&mut cursor)?;
        let definition = TemplateDefinitionHeader::read_at(self.chunk, instance.template_offset)?;

        let template_offset = instance.template_offset as usize;
        let is_inline = offset < template_offset && template_offset < end;
        if is_inline != (template_offset == instance.header_end) {
            debug!(
                "Offset `0x{offset:08x}`: template at 0x{template_offset:08x} is {} by range but {} by position",
                if is_inline { "inline" } else { "remote" },
                if is_inline { "remote" } else { "inline" },
            );
        }

        let values_offset = if is_inline {
            let body_end = definition.body_end();
            ensure_within("inline template body", body_end, offset, end)?;
            instance.header_end + TemplateDefinitionHeader::SIZE + definition.data_size as usize
        } else {
            instance.header_end
        };

        let values = ValueTable::parse(self.chunk, values_offset)?;
        ensure_within("value table", values.end(), offset, end)?;
        self.instantiate(tree, attach_to, &instance, &definition, &values, depth)
    }

    fn instantiate(
        &mut self,
        tree: &mut XmlTree,
        attach_to: Option<NodeId>,
        instance: &TemplateInstance,
        definition: &TemplateDefinitionHeader,
        values: &ValueTable,
        depth: usize,
    ) -> Result<()> {
        self.spend_step(instance.header_end)?;
        trace!(
            "Instantiating template {} (definition id {}) at 0x{:08x} with {} values",
            instance.template_id,
            definition.template_id,
            definition.offset,
            values.len()
        );

        let body_start = definition.body_start();
        let body_end = self.span_end(body_start, definition.data_size as usize, "template body")?;

        self.deserialize_stream(tree, attach_to, body_start, body_end, Some(values), depth)
    }

    /// Decodes the tokens in `[start, end)`.
    fn deserialize_stream(
        &mut self,
        tree: &mut XmlTree,
        attach_to: Option<NodeId>,
        start: usize,
        end: usize,
        values: Option<&ValueTable>,
        depth: usize,
    ) -> Result<()> {
        let chunk = self.chunk;
        let mut cursor = ByteCursor::with_pos(&chunk[..end], start)?;
        let mut state = StreamState::new(attach_to);

        while !cursor.is_at_end() {
            let token_offset = cursor.pos();
            self.spend_step(token_offset)?;
            let token = BinXmlRawToken::from_u8(cursor.u8_named("token")?);
            trace!("Offset `0x{token_offset:08x}`: {token:?}");

            match token {
                BinXmlRawToken::EndOfStream => {}
                BinXmlRawToken::FragmentHeader => {
                    // major version, minor version, flags
                    cursor.advance(3, "fragment header")?;
                }
                BinXmlRawToken::OpenStartElement { has_attributes } => {
                    let _dependency_id = cursor.u16_named("element dependency id")?;
                    let _data_size = cursor.u32_named("element data size")?;
                    let name = BinXmlName::from_binxml_stream(&mut cursor, chunk, self.name_cache)?;
                    if has_attributes {
                        let _attribute_list_size = cursor.u32_named("attribute list size")?;
                    }

                    let node = tree.new_element(name.as_str());
                    match state.current_element() {
                        Some(parent) => tree.add_child(parent, node),
                        None => tree.add_root(node),
                    }
                    state.stack.push(name.into(), node);
                    state.pending_attribute = None;
                }
                BinXmlRawToken::Attribute { has_unknown_prefix } => {
                    if has_unknown_prefix {
                        cursor.advance(4, "attribute prefix")?;
                    }
                    let name = BinXmlName::from_binxml_stream(&mut cursor, chunk, self.name_cache)?;
                    let owner = state.stack.peek().map(|open| open.node).ok_or(
                        DeserializationError::ElementStackUnderflow {
                            offset: token_offset as u64,
                        },
                    )?;
                    let index = tree.open_attribute(owner, name.as_str());
                    state.pending_attribute = Some((owner, index));
                }
                BinXmlRawToken::CloseStartElement => {
                    state.pending_attribute = None;
                }
                BinXmlRawToken::CloseEmptyElement => {
                    state.stack.pop(token_offset)?;
                    state.pending_attribute = None;
                }
                BinXmlRawToken::CloseElement => {
                    let closed = state.stack.pop(token_offset)?;
                    trace!("Offset `0x{token_offset:08x}`: </{}>", closed.name);
                    state.pending_attribute = None;
                }
                BinXmlRawToken::Value => {
                    let value_type = BinXmlValueType::from_u8(cursor.u8_named("value type")?);
                    let text = match value_type {
                        BinXmlValueType::StringType => {
                            cursor.len_prefixed_utf16_string("value string")?
                        }
                        BinXmlValueType::NullType => String::new(),
                        other => {
                            warn!(
                                "Offset `0x{token_offset:08x}`: value token of type {other:?} is not supported"
                            );
                            BinXmlValue::Unsupported {
                                raw_type: other.to_u8(),
                                size: 0,
                            }
                            .to_string()
                        }
                    };
                    self.apply_text(tree, &state, &text, value_type);
                }
                BinXmlRawToken::NormalSubstitution | BinXmlRawToken::OptionalSubstitution => {
                    let optional = token == BinXmlRawToken::OptionalSubstitution;
                    let index = cursor.u16_named("substitution index")?;
                    let _declared_type = cursor.u8_named("substitution value type")?;

                    match values.and_then(|v| v.get(index)) {
                        Some(slot) if optional && slot.is_empty() => {}
                        Some(slot) => {
                            let slot = *slot;
                            self.apply_slot(tree, &state, &slot, depth)?;
                        }
                        None if optional => {}
                        None => {
                            return Err(DeserializationError::SubstitutionOutOfRange {
                                offset: token_offset as u64,
                                index,
                                count: values.map_or(0, ValueTable::len),
                            });
                        }
                    }
                }
                BinXmlRawToken::TemplateInstance => {
                    let next = self.deserialize_nested_instance(
                        tree,
                        state.current_element(),
                        &mut cursor,
                        depth + 1,
                    )?;
                    cursor.set_pos(next, "template instance values")?;
                }
                BinXmlRawToken::CDataSection
                | BinXmlRawToken::CharReference
                | BinXmlRawToken::EntityReference
                | BinXmlRawToken::ProcessingInstructionTarget
                | BinXmlRawToken::ProcessingInstructionData => {
                    debug!("Offset `0x{token_offset:08x}`: skipping unsupported token {token:?}");
                }
                BinXmlRawToken::Unknown(raw) => {
                    warn!("Offset `0x{token_offset:08x}`: unknown BinXML token 0x{raw:02x}, skipping");
                }
            }
        }

        let unclosed = state.stack.len();
        if unclosed > 0 {
            debug!(
                "BinXML stream [0x{start:08x}, 0x{end:08x}) ended with {unclosed} unclosed elements"
            );
        }

        Ok(())
    }

    /// Instantiates a template met inside a token stream, with the cursor right after `0x0C`.
    ///
    /// Returns the offset where the stream continues, past the instance's values.
    fn deserialize_nested_instance(
        &mut self,
        tree: &mut XmlTree,
        attach_to: Option<NodeId>,
        cursor: &mut ByteCursor<'_>,
        depth: usize,
    ) -> Result<usize> {
        self.check_depth(depth, cursor.pos())?;

        let instance = TemplateInstance::from_binxml_stream(cursor)?;
        let definition = TemplateDefinitionHeader::read_at(self.chunk, instance.template_offset)?;

        let values_offset = if instance.template_offset as usize == instance.header_end {
            definition.body_end()
        } else {
            instance.header_end
        };

        let values = ValueTable::parse(self.chunk, values_offset)?;
        self.instantiate(tree, attach_to, &instance, &definition, &values, depth)?;
        Ok(values.end())
    }

    fn apply_slot(
        &mut self,
        tree: &mut XmlTree,
        state: &StreamState,
        slot: &ValueDescriptor,
        depth: usize,
    ) -> Result<()> {
        let chunk = self.chunk;
        let value = BinXmlValue::deserialize(
            slot.bytes(chunk),
            slot.value_type,
            slot.offset,
            self.settings.get_ansi_codec(),
        )?;

        match value {
            BinXmlValue::BinXmlType { offset, size } => {
                trace!("Offset `0x{offset:08x}`: decoding {size} bytes of embedded BinXML");
                self.deserialize_binxml(
                    tree,
                    state.current_element(),
                    offset as usize,
                    usize::from(size),
                    depth + 1,
                    false,
                )
            }
            BinXmlValue::StringType(ref s) if self.settings.should_resolve_messages() => {
                self.apply_text(tree, state, &messages::resolve(s), slot.value_type);
                Ok(())
            }
            other => {
                self.apply_text(tree, state, &other.to_string(), slot.value_type);
                Ok(())
            }
        }
    }

    /// Routes a value to the pending attribute, or to the text of the current element.
    fn apply_text(
        &self,
        tree: &mut XmlTree,
        state: &StreamState,
        text: &str,
        value_type: BinXmlValueType,
    ) {
        if let Some((node, index)) = state.pending_attribute {
            tree.append_attribute_value(node, index, text, value_type);
        } else if let Some(node) = state.current_element() {
            tree.append_text(node, text, value_type);
        } else if !value_type.is_null() {
            debug!("Dropping value `{text}` outside of any element");
        }
    }
}

/// Rejects an item of a BinXML span `[start, end)` that ends past `end`.
fn ensure_within(what: &'static str, item_end: usize, start: usize, end: usize) -> Result<()> {
    if item_end > end {
        return Err(DeserializationError::OffsetOutOfBounds {
            what,
            offset: item_end as u64,
            len: end - start,
        });
    }
    Ok(())
}

/// Decodes a template-free token stream found at `[offset, offset + size)` of `chunk`.
pub fn decode_fragment(
    chunk: &[u8],
    offset: usize,
    size: usize,
    settings: &ParserSettings,
) -> Result<XmlTree> {
    let mut name_cache = NameCache::new();
    BinXmlDeserializer::new(chunk, &mut name_cache, settings).deserialize_fragment(offset, size)
}
