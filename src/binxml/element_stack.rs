use crate::err::{DeserializationError, DeserializationResult};
use crate::model::xml_tree::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OpenElement {
    pub name: String,
    pub node: NodeId,
}

/// LIFO of the elements opened by the token stream and not yet closed.
#[derive(Debug, Default)]
pub(crate) struct ElementStack {
    open: Vec<OpenElement>,
}

impl ElementStack {
    pub(crate) fn new() -> Self {
        ElementStack::default()
    }

    pub(crate) fn push(&mut self, name: String, node: NodeId) {
        self.open.push(OpenElement { name, node });
    }

    /// `offset` is the offset of the closing token, used for the underflow error.
    pub(crate) fn pop(&mut self, offset: usize) -> DeserializationResult<OpenElement> {
        self.open
            .pop()
            .ok_or(DeserializationError::ElementStackUnderflow {
                offset: offset as u64,
            })
    }

    pub(crate) fn peek(&self) -> Option<&OpenElement> {
        self.open.last()
    }

    pub(crate) fn len(&self) -> usize {
        self.open.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifo_and_underflow() {
        let mut stack = ElementStack::new();
        stack.push("Event".to_owned(), 0);
        stack.push("System".to_owned(), 1);
        assert_eq!(stack.peek().map(|e| e.name.as_str()), Some("System"));

        assert_eq!(stack.pop(10).unwrap().name, "System");
        assert_eq!(stack.pop(11).unwrap().node, 0);
        assert_eq!(stack.len(), 0);

        assert!(matches!(
            stack.pop(12),
            Err(DeserializationError::ElementStackUnderflow { offset: 12 })
        ));
    }
}
