//! §3 Rule (temporal) and §6 trigger shape. The processor only ever sees
//! rules whose trigger is `Temporal`; the surface DSL/YAML loaders that
//! produce these objects are external collaborators (§1, out of scope).

use serde::{Deserialize, Serialize};

use crate::pattern::Pattern;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Trigger {
    Temporal { pattern: Pattern },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub id: String,
    pub enabled: bool,
    pub trigger: Trigger,
}

impl Rule {
    pub fn pattern(&self) -> &Pattern {
        let Trigger::Temporal { pattern } = &self.trigger;
        pattern
    }
}
