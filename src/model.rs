// Roster data model - classes, students, the selection cursor and the
// persisted snapshot shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel stored in the snapshot for the "all classes" view.
pub const ALL_CLASSES: &str = "all_classes";

/// Label shown for the "all classes" view.
pub const ALL_CLASSES_LABEL: &str = "所有班级";

/// Label shown when a student references a class that no longer exists.
pub const UNKNOWN_CLASS_LABEL: &str = "未知班级";

/// Generate a fresh opaque id.
///
/// UUID v4 strings can never equal [`ALL_CLASSES`] or the empty string.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// CLASS
// ============================================================================

/// A named group of students. Identity is `id`; `name` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Class {
    pub id: String,
    pub name: String,
}

impl Class {
    /// Create a class with a freshly generated id
    pub fn new(name: impl Into<String>) -> Self {
        Class {
            id: generate_id(),
            name: name.into(),
        }
    }

    /// Create a class with a caller-supplied id (seed data, tests)
    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        Class {
            id: id.into(),
            name: name.into(),
        }
    }
}

// ============================================================================
// STUDENT
// ============================================================================

/// A student with a signed coin balance. `(name, class_id)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub class_id: String,
    /// Negative balances are debts, never clamped.
    pub coins: i64,
}

impl Student {
    pub fn new(name: impl Into<String>, class_id: impl Into<String>, coins: i64) -> Self {
        Student {
            id: generate_id(),
            name: name.into(),
            class_id: class_id.into(),
            coins,
        }
    }

    /// Case-insensitive substring match on the name
    pub fn matches(&self, search_term: &str) -> bool {
        let term = search_term.trim().to_lowercase();
        term.is_empty() || self.name.to_lowercase().contains(&term)
    }
}

// ============================================================================
// SELECTION
// ============================================================================

/// The current view cursor.
///
/// Persisted as `""`, `"all_classes"` or a class id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Selection {
    /// Nothing selected
    #[default]
    None,
    /// Aggregate view over every student; never a student's class
    AllClasses,
    /// A concrete class id
    Class(String),
}

impl Selection {
    pub fn class(id: impl Into<String>) -> Self {
        Selection::Class(id.into())
    }

    /// The concrete class id, if any
    pub fn class_id(&self) -> Option<&str> {
        match self {
            Selection::Class(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_concrete(&self) -> bool {
        matches!(self, Selection::Class(_))
    }

    /// Whether a student belonging to `class_id` is visible in this view
    pub fn includes(&self, class_id: &str) -> bool {
        match self {
            Selection::None => false,
            Selection::AllClasses => true,
            Selection::Class(id) => id == class_id,
        }
    }
}

impl From<String> for Selection {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "" => Selection::None,
            ALL_CLASSES => Selection::AllClasses,
            _ => Selection::Class(raw),
        }
    }
}

impl From<&str> for Selection {
    fn from(raw: &str) -> Self {
        Selection::from(raw.to_string())
    }
}

impl From<Selection> for String {
    fn from(selection: Selection) -> Self {
        match selection {
            Selection::None => String::new(),
            Selection::AllClasses => ALL_CLASSES.to_string(),
            Selection::Class(id) => id,
        }
    }
}

// ============================================================================
// SNAPSHOT (persisted blob)
// ============================================================================

/// Entire roster state, rewritten after every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub classes: Vec<Class>,
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub current_class: Selection,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_round_trips_through_strings() {
        assert_eq!(Selection::from(""), Selection::None);
        assert_eq!(Selection::from("all_classes"), Selection::AllClasses);
        assert_eq!(Selection::from("summer1030"), Selection::class("summer1030"));
        assert_eq!(String::from(Selection::AllClasses), "all_classes");
        assert_eq!(String::from(Selection::None), "");
    }

    #[test]
    fn test_selection_includes() {
        assert!(!Selection::None.includes("a"));
        assert!(Selection::AllClasses.includes("a"));
        assert!(Selection::class("a").includes("a"));
        assert!(!Selection::class("a").includes("b"));
    }

    #[test]
    fn test_generated_ids_never_collide_with_sentinel() {
        for _ in 0..100 {
            let id = generate_id();
            assert_ne!(id, ALL_CLASSES);
            assert!(!id.is_empty());
        }
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snapshot = Snapshot {
            classes: vec![Class::with_id("c1", "一班")],
            students: vec![Student {
                id: "s1".to_string(),
                name: "Tom".to_string(),
                class_id: "c1".to_string(),
                coins: -3,
            }],
            current_class: Selection::AllClasses,
            last_updated: Utc::now(),
        };

        let json: serde_json::Value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["currentClass"], "all_classes");
        assert_eq!(json["students"][0]["classId"], "c1");
        assert_eq!(json["students"][0]["coins"], -3);
        assert!(json["lastUpdated"].is_string());
    }

    #[test]
    fn test_snapshot_tolerates_missing_fields() {
        let snapshot: Snapshot = serde_json::from_str(r#"{"classes": []}"#).unwrap();
        assert!(snapshot.students.is_empty());
        assert_eq!(snapshot.current_class, Selection::None);
    }

    #[test]
    fn test_student_matches_is_case_insensitive() {
        let student = Student::new("Amy Chen", "c1", 0);
        assert!(student.matches("amy"));
        assert!(student.matches("CHEN"));
        assert!(student.matches(""));
        assert!(!student.matches("tom"));
    }
}
