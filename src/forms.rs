//! Request payloads for every write, and their validation.
//!
//! Validation happens before any store call. Text is trimmed, a blank
//! optional field becomes `None`, and failures are reported per field.

use serde::{Deserialize, Deserializer};
use uuid::Uuid;

use crate::db::models::{
    NewFunFact, NewLikeItem, NewTag, Role, UpdateFunFact, UpdateLikeItem, UpdateTag,
};
use crate::error::FieldErrors;

pub const NAME_MIN_CHARS: usize = 2;
pub const NAME_MAX_CHARS: usize = 200;
pub const DESCRIPTION_MAX_CHARS: usize = 2000;

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn default_true() -> bool {
    true
}

fn required_text(
    errors: &mut FieldErrors,
    field: &'static str,
    label: &str,
    value: &str,
) -> String {
    let value = value.trim();
    let chars = value.chars().count();
    if chars < NAME_MIN_CHARS {
        errors.insert(
            field,
            format!("{} must be at least {} characters.", label, NAME_MIN_CHARS),
        );
    } else if chars > NAME_MAX_CHARS {
        errors.insert(
            field,
            format!("{} must be at most {} characters.", label, NAME_MAX_CHARS),
        );
    }
    value.to_string()
}

fn optional_text(
    errors: &mut FieldErrors,
    field: &'static str,
    value: Option<&str>,
) -> Option<String> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    if value.chars().count() > DESCRIPTION_MAX_CHARS {
        errors.insert(
            field,
            format!("Description must be at most {} characters.", DESCRIPTION_MAX_CHARS),
        );
    }
    Some(value.to_string())
}

fn finish<T>(errors: FieldErrors, value: T) -> Result<T, FieldErrors> {
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(errors)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeForm {
    pub item_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_like: bool,
    #[serde(default)]
    pub tag_ids: Vec<Uuid>,
}

impl LikeForm {
    pub fn validate(&self) -> Result<(NewLikeItem, Vec<Uuid>), FieldErrors> {
        let mut errors = FieldErrors::new();
        let item_name = required_text(&mut errors, "itemName", "Item name", &self.item_name);
        let description = optional_text(&mut errors, "description", self.description.as_deref());

        let mut tag_ids = self.tag_ids.clone();
        tag_ids.sort();
        tag_ids.dedup();

        finish(
            errors,
            (
                NewLikeItem {
                    item_name,
                    description,
                    is_like: self.is_like,
                },
                tag_ids,
            ),
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLikeForm {
    #[serde(default)]
    pub item_name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub is_like: Option<bool>,
}

impl UpdateLikeForm {
    pub fn validate(&self) -> Result<UpdateLikeItem, FieldErrors> {
        let mut errors = FieldErrors::new();
        let item_name = self
            .item_name
            .as_deref()
            .map(|name| required_text(&mut errors, "itemName", "Item name", name));
        let description = self
            .description
            .as_ref()
            .map(|d| optional_text(&mut errors, "description", d.as_deref()));

        finish(
            errors,
            UpdateLikeItem {
                item_name,
                description,
                is_like: self.is_like,
            },
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagForm {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl TagForm {
    pub fn validate(&self) -> Result<NewTag, FieldErrors> {
        let mut errors = FieldErrors::new();
        let name = required_text(&mut errors, "name", "Tag name", &self.name);
        let description = optional_text(&mut errors, "description", self.description.as_deref());
        finish(errors, NewTag { name, description })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTagForm {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
}

impl UpdateTagForm {
    pub fn validate(&self) -> Result<UpdateTag, FieldErrors> {
        let mut errors = FieldErrors::new();
        let name = self
            .name
            .as_deref()
            .map(|name| required_text(&mut errors, "name", "Tag name", name));
        let description = self
            .description
            .as_ref()
            .map(|d| optional_text(&mut errors, "description", d.as_deref()));
        finish(errors, UpdateTag { name, description })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunFactForm {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl FunFactForm {
    pub fn validate(&self) -> Result<NewFunFact, FieldErrors> {
        let mut errors = FieldErrors::new();
        let title = required_text(&mut errors, "title", "Title", &self.title);
        let description = optional_text(&mut errors, "description", self.description.as_deref());
        finish(errors, NewFunFact { title, description })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFunFactForm {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
}

impl UpdateFunFactForm {
    pub fn validate(&self) -> Result<UpdateFunFact, FieldErrors> {
        let mut errors = FieldErrors::new();
        let title = self
            .title
            .as_deref()
            .map(|title| required_text(&mut errors, "title", "Title", title));
        let description = self
            .description
            .as_ref()
            .map(|d| optional_text(&mut errors, "description", d.as_deref()));
        finish(errors, UpdateFunFact { title, description })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleForm {
    pub role: String,
}

impl RoleForm {
    pub fn validate(&self) -> Result<Role, FieldErrors> {
        self.role.parse().map_err(|_| {
            let mut errors = FieldErrors::new();
            errors.insert("role", "Role must be either user or admin.".to_string());
            errors
        })
    }
}
