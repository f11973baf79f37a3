//! The user record and collection helpers

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Stable identifier of a user record. Assigned externally, never reused.
pub type UserID = u64;

/// A single row of the user directory.
///
/// `tax_id` is only meaningful when `has_tax_id` is `Some(true)`; see
/// [UserRecord::tax_id_consistent].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: UserID,
    #[serde(alias = "FIO")]
    pub full_name: String,
    pub post: String,
    pub address: String,
    pub age: u32,
    pub salary: f64,
    #[serde(alias = "haveINN", default)]
    pub has_tax_id: Option<bool>,
    #[serde(alias = "INN", default)]
    pub tax_id: Option<i64>,
}

impl UserRecord {
    /// True when `tax_id` is set exactly when `has_tax_id` is true.
    pub fn tax_id_consistent(&self) -> bool {
        match self.has_tax_id {
            Some(true) => self.tax_id.is_some(),
            _ => self.tax_id.is_none(),
        }
    }
}

/// Find the first id that appears more than once in a collection.
pub fn find_duplicate_id(records: &[UserRecord]) -> Option<UserID> {
    let mut seen = HashSet::with_capacity(records.len());

    records.iter().map(|r| r.id).find(|id| !seen.insert(*id))
}

/// Compute the slice of the collection covered by page `page`.
///
/// Pages past the end produce an empty slice.
pub fn page_slice(
    records: &[UserRecord],
    page: usize,
    page_size: usize,
) -> &[UserRecord] {
    let start = page.saturating_mul(page_size).min(records.len());
    let end = start.saturating_add(page_size).min(records.len());
    &records[start..end]
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn make_user(id: UserID) -> UserRecord {
        UserRecord {
            id,
            full_name: format!("User {id}"),
            post: "Engineer".to_string(),
            address: "1 Main St".to_string(),
            age: 30,
            salary: 1000.0,
            has_tax_id: Some(false),
            tax_id: None,
        }
    }

    #[test]
    fn legacy_field_names() {
        let text = r#"{
            "id": 3,
            "FIO": "Ivanov Ivan",
            "post": "Manager",
            "address": "Moscow",
            "age": 41,
            "salary": 52000.5,
            "haveINN": true,
            "INN": 123456
        }"#;

        let user: UserRecord = serde_json::from_str(text).unwrap();

        assert_eq!(user.full_name, "Ivanov Ivan");
        assert_eq!(user.has_tax_id, Some(true));
        assert_eq!(user.tax_id, Some(123456));
        assert!(user.tax_id_consistent());

        let out = serde_json::to_value(&user).unwrap();
        assert_eq!(out["fullName"], "Ivanov Ivan");
        assert_eq!(out["hasTaxId"], true);
        assert_eq!(out["taxId"], 123456);
    }

    #[test]
    fn unknown_tax_state() {
        let text = r#"{"id": 1, "fullName": "A", "post": "B",
            "address": "C", "age": 1, "salary": 2, "hasTaxId": null}"#;

        let user: UserRecord = serde_json::from_str(text).unwrap();
        assert_eq!(user.has_tax_id, None);
        assert_eq!(user.tax_id, None);
        assert!(user.tax_id_consistent());

        let bad = UserRecord {
            tax_id: Some(5),
            ..user
        };
        assert!(!bad.tax_id_consistent());
    }

    #[test]
    fn duplicates() {
        let list: Vec<_> = [1, 2, 3, 2].into_iter().map(make_user).collect();
        assert_eq!(find_duplicate_id(&list), Some(2));
        assert_eq!(find_duplicate_id(&list[..3]), None);
    }

    #[test]
    fn page_bounds() {
        let list: Vec<_> = (0..16).map(make_user).collect();

        assert_eq!(page_slice(&list, 0, 15).len(), 15);
        assert_eq!(page_slice(&list, 1, 15).len(), 1);
        assert_eq!(page_slice(&list, 1, 15)[0].id, 15);
        assert!(page_slice(&list, 2, 15).is_empty());
        assert!(page_slice(&list, usize::MAX, 15).is_empty());
    }
}
