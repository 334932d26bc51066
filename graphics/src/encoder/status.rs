//! Binding validity tracking for graphics translation.

use bitflags::bitflags;

use crate::error::GraphicsError;

bitflags! {
    /// What has been validly set while translating a graphics encoder.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EncodeStatus: u32 {
        const VIEWPORT = 1 << 0;
        const SCISSOR = 1 << 1;
        const TARGET = 1 << 2;
        const STATE = 1 << 3;
        const VERTEX_BUFFER = 1 << 4;
        const INDEX_BUFFER = 1 << 5;
    }
}

impl Default for EncodeStatus {
    fn default() -> Self {
        Self::empty()
    }
}

impl EncodeStatus {
    /// Required before a non-indexed draw.
    pub const DRAW: Self = Self::VIEWPORT
        .union(Self::SCISSOR)
        .union(Self::TARGET)
        .union(Self::STATE)
        .union(Self::VERTEX_BUFFER);

    /// Required before an indexed draw.
    pub const DRAW_INDEXED: Self = Self::DRAW.union(Self::INDEX_BUFFER);

    /// Bits of `required` that are not set.
    pub fn missing(&self, required: Self) -> Self {
        required.difference(*self)
    }

    /// Fail with a validation error naming what `operation` is missing.
    pub fn require(&self, required: Self, operation: &str) -> Result<(), GraphicsError> {
        let missing = self.missing(required);
        if missing.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = missing.iter_names().map(|(name, _)| name).collect();
        Err(GraphicsError::Validation(format!(
            "{operation} without {}",
            names.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_requirements() {
        assert!(!EncodeStatus::DRAW.contains(EncodeStatus::INDEX_BUFFER));
        assert!(EncodeStatus::DRAW_INDEXED.contains(EncodeStatus::DRAW));
        assert_eq!(EncodeStatus::all(), EncodeStatus::DRAW_INDEXED);
    }

    #[test]
    fn test_progressive_requirements() {
        let steps = [
            EncodeStatus::VIEWPORT,
            EncodeStatus::SCISSOR,
            EncodeStatus::TARGET,
            EncodeStatus::STATE,
            EncodeStatus::VERTEX_BUFFER,
        ];
        let mut status = EncodeStatus::empty();
        for step in steps {
            assert!(status.require(EncodeStatus::DRAW, "draw").is_err());
            status |= step;
        }
        assert!(status.require(EncodeStatus::DRAW, "draw").is_ok());
        assert!(status.require(EncodeStatus::DRAW_INDEXED, "draw_indexed").is_err());
    }

    #[test]
    fn test_error_names_missing_bits() {
        let status = EncodeStatus::VIEWPORT | EncodeStatus::SCISSOR | EncodeStatus::TARGET;
        let err = status.require(EncodeStatus::DRAW, "draw").unwrap_err();
        assert_eq!(
            err,
            GraphicsError::Validation("draw without STATE, VERTEX_BUFFER".to_string())
        );
    }
}
