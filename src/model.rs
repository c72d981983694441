use crate::config::config::ModelDefinition;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub family: String,
    pub is_i2v: bool,
    pub is_t2v: bool,
    pub visible: bool,
}

impl ModelInfo {
    pub fn from_definition(model_type: &str, definition: &ModelDefinition) -> Self {
        let name = if definition.name.is_empty() {
            model_type.to_string()
        } else {
            definition.name.clone()
        };
        Self {
            id: model_type.to_string(),
            name,
            description: definition.description.clone(),
            family: definition.family.clone(),
            is_i2v: definition.i2v,
            is_t2v: definition.t2v,
            visible: definition.visible,
        }
    }
}
