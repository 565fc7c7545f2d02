//! DeployTemplate — named reusable ordered step list, selectable at deploy
//! time via a node trait matching the template's `CUSTOM_`-prefixed name.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::step::Step;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployTemplate {
    pub uuid: Uuid,
    pub name: String,
    pub steps: Vec<Step>,
}

impl DeployTemplate {
    /// A deploy template's `name` must be a `CUSTOM_`-prefixed trait.
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Result<Self, String> {
        let name = name.into();
        if !name.starts_with("CUSTOM_") {
            return Err(format!(
                "deploy template name '{name}' must start with CUSTOM_"
            ));
        }
        Ok(Self {
            uuid: Uuid::new_v4(),
            name,
            steps,
        })
    }
}

/// Resolve the deploy templates whose name matches one of the node's traits.
pub fn matching_templates<'a>(
    templates: &'a [DeployTemplate],
    node_traits: &[String],
) -> Vec<&'a DeployTemplate> {
    templates
        .iter()
        .filter(|t| node_traits.iter().any(|nt| nt == &t.name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::step::InterfaceKind;

    #[test]
    fn test_rejects_non_custom_name() {
        assert!(DeployTemplate::new("not_custom", vec![]).is_err());
    }

    #[test]
    fn test_matching_templates_by_trait() {
        let t1 = DeployTemplate::new(
            "CUSTOM_HYPERCONVERGED",
            vec![Step::new(InterfaceKind::Raid, "apply_configuration", 0)],
        )
        .unwrap();
        let t2 = DeployTemplate::new("CUSTOM_OTHER", vec![]).unwrap();

        let node_traits = vec!["CUSTOM_HYPERCONVERGED".to_string()];
        let matches = matching_templates(&[t1.clone(), t2], &node_traits);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "CUSTOM_HYPERCONVERGED");
    }
}
