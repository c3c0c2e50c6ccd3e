use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{CategoryId, DomainError, DomainResult, Entity};

/// Input for creating a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
    pub description: Option<String>,
}

/// Product category. Names are unique (case-insensitive) within a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    id: CategoryId,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl Category {
    pub const NAME_MAX_LEN: usize = 100;

    pub fn create(id: CategoryId, input: NewCategory, now: DateTime<Utc>) -> DomainResult<Self> {
        let name = validate_name(&input.name)?;
        Ok(Self {
            id,
            name,
            description: normalize_optional(input.description),
            created_at: now,
        })
    }

    pub fn rename(&mut self, name: &str) -> DomainResult<()> {
        self.name = validate_name(name)?;
        Ok(())
    }

    pub fn set_description(&mut self, description: Option<String>) {
        self.description = normalize_optional(description);
    }

    pub fn id_typed(&self) -> CategoryId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowercased name used for uniqueness checks.
    pub fn name_key(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Entity for Category {
    type Id = CategoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn validate_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("category name cannot be empty"));
    }
    if name.chars().count() > Category::NAME_MAX_LEN {
        return Err(DomainError::validation(format!(
            "category name longer than {} characters",
            Category::NAME_MAX_LEN
        )));
    }
    Ok(name.to_string())
}

pub(crate) fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
