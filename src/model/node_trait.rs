//! NodeTrait — a qualifier string with set semantics on the node.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeTrait(String);

impl NodeTrait {
    /// Standard traits are bare uppercase identifiers (`HW_CPU_X86_VMX`);
    /// anything else must carry the `CUSTOM_` prefix.
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Err("trait must not be empty".to_string());
        }
        if !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':') {
            return Err(format!("trait '{raw}' contains invalid characters"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_custom(&self) -> bool {
        self.0.starts_with("CUSTOM_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_trait_detected() {
        let t = NodeTrait::parse("CUSTOM_GPU_CAPABLE").unwrap();
        assert!(t.is_custom());
    }

    #[test]
    fn test_standard_trait_not_custom() {
        let t = NodeTrait::parse("HW_CPU_X86_VMX").unwrap();
        assert!(!t.is_custom());
    }

    #[test]
    fn test_rejects_invalid_characters() {
        assert!(NodeTrait::parse("bad trait!").is_err());
    }
}
