use crate::ChunkOffset;
use crate::err::DeserializationResult;
use crate::utils::{ByteCursor, bytes};

#[derive(Debug, PartialOrd, PartialEq, Eq, Clone, Copy)]
pub enum BinXmlRawToken {
    EndOfStream,
    OpenStartElement { has_attributes: bool },
    CloseStartElement,
    CloseEmptyElement,
    CloseElement,
    Value,
    /// `has_unknown_prefix` is set for the `0x36` form, which carries 4 extra bytes.
    Attribute { has_unknown_prefix: bool },
    CDataSection,
    CharReference,
    EntityReference,
    ProcessingInstructionTarget,
    ProcessingInstructionData,
    TemplateInstance,
    NormalSubstitution,
    OptionalSubstitution,
    FragmentHeader,
    Unknown(u8),
}

impl BinXmlRawToken {
    pub fn from_u8(byte: u8) -> BinXmlRawToken {
        match byte {
            0x00 => BinXmlRawToken::EndOfStream,
            // <Event>
            0x01 => BinXmlRawToken::OpenStartElement {
                has_attributes: false,
            },
            0x41 => BinXmlRawToken::OpenStartElement {
                has_attributes: true,
            },
            // Indicates end of start element
            0x02 => BinXmlRawToken::CloseStartElement,
            0x03 => BinXmlRawToken::CloseEmptyElement,
            // </Event>
            0x04 => BinXmlRawToken::CloseElement,
            0x05 | 0x45 => BinXmlRawToken::Value,
            0x06 | 0x46 => BinXmlRawToken::Attribute {
                has_unknown_prefix: false,
            },
            0x36 => BinXmlRawToken::Attribute {
                has_unknown_prefix: true,
            },
            0x07 | 0x47 => BinXmlRawToken::CDataSection,
            0x08 | 0x48 => BinXmlRawToken::CharReference,
            0x09 | 0x49 => BinXmlRawToken::EntityReference,
            0x0a => BinXmlRawToken::ProcessingInstructionTarget,
            0x0b => BinXmlRawToken::ProcessingInstructionData,
            0x0c => BinXmlRawToken::TemplateInstance,
            0x0d => BinXmlRawToken::NormalSubstitution,
            0x0e => BinXmlRawToken::OptionalSubstitution,
            0x0f => BinXmlRawToken::FragmentHeader,
            other => BinXmlRawToken::Unknown(other),
        }
    }
}

/// Template instance marker: the `0x0C` token followed by the `0x01` byte of its header.
pub(crate) const TEMPLATE_INSTANCE_MARKER: [u8; 2] = [0x0c, 0x01];
/// How far into a BinXML span the template instance marker is searched for.
pub(crate) const TEMPLATE_MARKER_WINDOW: usize = 10;

/// Fixed part of a template instance following the `0x0C` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateInstance {
    pub template_id: u32,
    pub template_offset: ChunkOffset,
    /// Chunk offset right after the 9-byte header.
    pub header_end: usize,
}

impl TemplateInstance {
    pub(crate) const HEADER_SIZE: usize = 9;

    /// Reads the header at the cursor, which must be positioned right after the `0x0C` token.
    pub(crate) fn from_binxml_stream(
        cursor: &mut ByteCursor<'_>,
    ) -> DeserializationResult<TemplateInstance> {
        let _unknown = cursor.u8_named("template instance unknown")?;
        let template_id = cursor.u32_named("template id")?;
        let template_offset = cursor.u32_named("template definition offset")?;

        Ok(TemplateInstance {
            template_id,
            template_offset,
            header_end: cursor.pos(),
        })
    }
}

/// Finds the template instance marker in the first bytes of `[start, end)`.
///
/// Returns the offset of the `0x0C` byte.
pub(crate) fn find_template_marker(chunk: &[u8], start: usize, end: usize) -> Option<usize> {
    let end = end.min(chunk.len());
    let window_end = start.saturating_add(TEMPLATE_MARKER_WINDOW).min(end);

    (start..window_end).find(|&i| {
        i + 1 < end && chunk.get(i..i + 2) == Some(&TEMPLATE_INSTANCE_MARKER[..])
    })
}

/// The 24-byte header preceding a template body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDefinitionHeader {
    pub offset: ChunkOffset,
    pub next_template_offset: u32,
    pub template_id: u32,
    pub data_size: u32,
}

impl TemplateDefinitionHeader {
    pub const SIZE: usize = 24;

    pub fn read_at(chunk: &[u8], offset: ChunkOffset) -> DeserializationResult<Self> {
        let raw = bytes::span_r(chunk, offset as usize, Self::SIZE, "template definition")?;
        let u32_at = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);

        // Bytes 8..20 are opaque.
        Ok(TemplateDefinitionHeader {
            offset,
            next_template_offset: u32_at(0),
            template_id: u32_at(4),
            data_size: u32_at(20),
        })
    }

    pub fn body_start(&self) -> usize {
        self.offset as usize + Self::SIZE
    }

    pub fn body_end(&self) -> usize {
        self.body_start() + self.data_size as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_is_searched_in_a_short_window() {
        let mut span = vec![0x0f, 0x01, 0x01, 0x00, 0x0c, 0x01];
        assert_eq!(find_template_marker(&span, 0, span.len()), Some(4));

        span.splice(0..0, [0_u8; 8]);
        assert_eq!(find_template_marker(&span, 0, span.len()), None);
        assert_eq!(find_template_marker(&span, 8, span.len()), Some(12));

        // The second byte must lie inside the span.
        assert_eq!(find_template_marker(&span, 8, 13), None);
    }

    #[test]
    fn test_template_definition_header() {
        let mut chunk = vec![0_u8; 4];
        chunk.extend_from_slice(&0_u32.to_le_bytes());
        chunk.extend_from_slice(&7_u32.to_le_bytes());
        chunk.extend_from_slice(&[0xee; 12]);
        chunk.extend_from_slice(&40_u32.to_le_bytes());

        let header = TemplateDefinitionHeader::read_at(&chunk, 4).unwrap();
        assert_eq!(header.template_id, 7);
        assert_eq!(header.data_size, 40);
        assert_eq!(header.body_start(), 28);
        assert_eq!(header.body_end(), 68);

        assert!(TemplateDefinitionHeader::read_at(&chunk, 5).is_err());
    }

    #[test]
    fn test_unknown_tokens_are_kept() {
        assert_eq!(BinXmlRawToken::from_u8(0x10), BinXmlRawToken::Unknown(0x10));
        assert_eq!(
            BinXmlRawToken::from_u8(0x36),
            BinXmlRawToken::Attribute {
                has_unknown_prefix: true
            }
        );
    }
}
