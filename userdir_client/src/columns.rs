//! Column visibility preferences.
//!
//! Loaded once at startup. A missing or unreadable file means every column
//! is shown.

use std::path::Path;

use serde::{Deserialize, Serialize};
use userdir_common::record::UserRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id,
    FullName,
    Post,
    Address,
    Age,
    Salary,
}

impl Column {
    pub const ALL: [Column; 6] = [
        Column::Id,
        Column::FullName,
        Column::Post,
        Column::Address,
        Column::Age,
        Column::Salary,
    ];

    pub fn header(&self) -> &'static str {
        match self {
            Column::Id => "Id",
            Column::FullName => "Full name",
            Column::Post => "Post",
            Column::Address => "Address",
            Column::Age => "Age",
            Column::Salary => "Salary",
        }
    }

    pub fn cell(&self, user: &UserRecord) -> String {
        match self {
            Column::Id => user.id.to_string(),
            Column::FullName => user.full_name.clone(),
            Column::Post => user.post.clone(),
            Column::Address => user.address.clone(),
            Column::Age => user.age.to_string(),
            Column::Salary => user.salary.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColumnVisibility {
    pub id: bool,
    #[serde(alias = "FIO")]
    pub full_name: bool,
    pub post: bool,
    pub address: bool,
    pub age: bool,
    pub salary: bool,
}

impl Default for ColumnVisibility {
    fn default() -> Self {
        Self {
            id: true,
            full_name: true,
            post: true,
            address: true,
            age: true,
            salary: true,
        }
    }
}

impl ColumnVisibility {
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                log::debug!(
                    "No column preferences at {}: {e}",
                    path.display()
                );
                return Self::default();
            }
        };

        serde_json::from_str(&text).unwrap_or_else(|e| {
            log::warn!(
                "Ignoring malformed column preferences {}: {e}",
                path.display()
            );
            Self::default()
        })
    }

    pub fn is_visible(&self, column: Column) -> bool {
        match column {
            Column::Id => self.id,
            Column::FullName => self.full_name,
            Column::Post => self.post,
            Column::Address => self.address,
            Column::Age => self.age,
            Column::Salary => self.salary,
        }
    }

    pub fn visible_columns(&self) -> Vec<Column> {
        Column::ALL
            .into_iter()
            .filter(|c| self.is_visible(*c))
            .collect()
    }
}
