// Roster Store - in-memory classes and students with their mutation rules
//
// Invariants kept by every operation:
// - class names are unique (exact match)
// - (student name, class id) pairs are unique
// - a student's class id references an existing class
// - validation runs before mutation, so a failed call changes nothing

use crate::error::{Result, RosterError};
use crate::model::{
    Class, Selection, Snapshot, Student, ALL_CLASSES, ALL_CLASSES_LABEL, UNKNOWN_CLASS_LABEL,
};
use chrono::Utc;
use icu_collator::{Collator, CollatorOptions};
use icu_locid::locale;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, warn};

// ============================================================================
// OPERATION PARAMETERS & OUTCOMES
// ============================================================================

/// What happens to the students of a class being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStrategy {
    /// Move every student to another class (all-or-nothing)
    Transfer,
    /// Delete the students together with the class
    Force,
}

/// Result of a successful class deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassDeletion {
    /// The class had no students
    Empty { name: String },
    /// Students were moved to `target`
    Transferred { name: String, count: usize, target: String },
    /// Students were deleted with the class
    Cascaded { name: String, count: usize },
}

/// Who receives a batch coin adjustment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchTarget {
    /// Every student of the current (concrete) class
    CurrentClass,
    /// An explicit set of student ids
    Students(Vec<String>),
}

/// Ordering for [`Roster::query`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Name,
    CoinsDesc,
    CoinsAsc,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::CoinsDesc => "coins-desc",
            SortKey::CoinsAsc => "coins-asc",
        }
    }

    /// Next key in UI cycling order
    pub fn next(&self) -> Self {
        match self {
            SortKey::Name => SortKey::CoinsDesc,
            SortKey::CoinsDesc => SortKey::CoinsAsc,
            SortKey::CoinsAsc => SortKey::Name,
        }
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "name" => Ok(SortKey::Name),
            "coins-desc" => Ok(SortKey::CoinsDesc),
            "coins-asc" => Ok(SortKey::CoinsAsc),
            other => Err(format!(
                "unknown sort key '{}' (expected name, coins-desc or coins-asc)",
                other
            )),
        }
    }
}

/// One exported spreadsheet row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRow {
    #[serde(rename = "姓名")]
    pub name: String,

    #[serde(rename = "班级")]
    pub class_name: String,

    #[serde(rename = "星币数量")]
    pub coins: i64,
}

// ============================================================================
// ROSTER
// ============================================================================

/// The roster store.
///
/// Owned by one context and passed explicitly to whoever needs it. Reads
/// hand out borrows, so a query result can never observe a later mutation.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    pub(crate) classes: Vec<Class>,
    pub(crate) students: Vec<Student>,
    pub(crate) current: Selection,
    /// Bumped on every successful mutation; used to detect stale import plans
    pub(crate) revision: u64,
}

impl Roster {
    /// Create an empty roster
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a roster pre-loaded with the demo classes and students
    pub fn with_defaults() -> Self {
        let mut roster = Roster::new();
        roster.register_defaults();
        roster
    }

    fn register_defaults(&mut self) {
        self.classes = vec![
            Class::with_id("summer1030", "暑假1030"),
            Class::with_id("spring2024", "春季2024"),
        ];

        let seed = [
            ("谭靖宜", "summer1030", 106),
            ("李明华", "summer1030", 85),
            ("张小雅", "summer1030", 72),
            ("王大伟", "summer1030", 45),
            ("刘晓敏", "summer1030", 38),
            ("陈思涵", "spring2024", 92),
            ("林志强", "spring2024", 67),
        ];
        self.students = seed
            .iter()
            .map(|(name, class_id, coins)| Student::new(*name, *class_id, *coins))
            .collect();

        self.current = Selection::AllClasses;
    }

    /// Rebuild a roster from a persisted snapshot.
    ///
    /// Fails with `CorruptState` when a class id is empty or equals the
    /// "all classes" sentinel, or when the selection points at an unknown
    /// class. An empty selection is promoted to the "all classes" view.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let mut ids = HashSet::new();
        for class in &snapshot.classes {
            if class.id.is_empty() || class.id == ALL_CLASSES {
                return Err(RosterError::CorruptState(format!(
                    "class '{}' has reserved id '{}'",
                    class.name, class.id
                )));
            }
            if !ids.insert(class.id.as_str()) {
                return Err(RosterError::CorruptState(format!(
                    "class id '{}' appears twice",
                    class.id
                )));
            }
        }

        let current = match snapshot.current_class {
            Selection::None => Selection::AllClasses,
            Selection::Class(id) if !ids.contains(id.as_str()) => {
                return Err(RosterError::CorruptState(format!(
                    "current class '{}' does not exist",
                    id
                )))
            }
            other => other,
        };

        Ok(Roster {
            classes: snapshot.classes,
            students: snapshot.students,
            current,
            revision: 0,
        })
    }

    /// Capture the whole state for persistence
    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            classes: self.classes.clone(),
            students: self.students.clone(),
            current_class: self.current.clone(),
            last_updated: Utc::now(),
        }
    }

    // ========================================================================
    // READ ACCESS
    // ========================================================================

    pub fn classes(&self) -> &[Class] {
        &self.classes
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn current_selection(&self) -> &Selection {
        &self.current
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn class(&self, id: &str) -> Option<&Class> {
        self.classes.iter().find(|c| c.id == id)
    }

    pub fn class_by_name(&self, name: &str) -> Option<&Class> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn student(&self, id: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.id == id)
    }

    /// Class name for display, or the unknown-class label for dangling ids
    pub fn class_name(&self, class_id: &str) -> &str {
        self.class(class_id)
            .map(|c| c.name.as_str())
            .unwrap_or(UNKNOWN_CLASS_LABEL)
    }

    /// Human-readable label of a selection ("" for nothing selected)
    pub fn selection_label(&self, selection: &Selection) -> String {
        match selection {
            Selection::None => String::new(),
            Selection::AllClasses => ALL_CLASSES_LABEL.to_string(),
            Selection::Class(id) => self.class(id).map(|c| c.name.clone()).unwrap_or_default(),
        }
    }

    /// Students of one class, in stored order
    pub fn students_in(&self, class_id: &str) -> impl Iterator<Item = &Student> + '_ {
        let class_id = class_id.to_string();
        self.students.iter().filter(move |s| s.class_id == class_id)
    }

    /// Resolve a selection that must name an existing concrete class
    pub fn concrete_class(&self, selection: &Selection) -> Result<&Class> {
        match selection {
            Selection::None => Err(RosterError::InvalidSelection(
                "no class selected".to_string(),
            )),
            Selection::AllClasses => Err(RosterError::InvalidSelection(
                "a concrete class is required, not all classes".to_string(),
            )),
            Selection::Class(id) => self
                .class(id)
                .ok_or_else(|| RosterError::NotFound(format!("class '{}'", id))),
        }
    }

    fn student_index(&self, id: &str) -> Result<usize> {
        self.students
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| RosterError::NotFound(format!("student '{}'", id)))
    }

    fn name_taken(&self, name: &str, class_id: &str, except_id: Option<&str>) -> bool {
        self.students.iter().any(|s| {
            s.class_id == class_id && s.name == name && Some(s.id.as_str()) != except_id
        })
    }

    pub(crate) fn touch(&mut self) {
        self.revision += 1;
    }

    // ========================================================================
    // CLASS OPERATIONS
    // ========================================================================

    /// Add a class and select it. Returns the new class id.
    pub fn create_class(&mut self, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RosterError::EmptyName);
        }
        if self.class_by_name(name).is_some() {
            return Err(RosterError::duplicate(name));
        }

        let class = Class::new(name);
        let id = class.id.clone();
        self.classes.push(class);
        self.current = Selection::Class(id.clone());
        self.touch();

        debug!(class_id = %id, name, "class created");
        Ok(id)
    }

    /// Delete a class, resolving its students according to `strategy`.
    ///
    /// `transfer_target` is only consulted for [`DeleteStrategy::Transfer`]
    /// when the class actually has students.
    pub fn delete_class(
        &mut self,
        class: &Selection,
        strategy: DeleteStrategy,
        transfer_target: Option<&str>,
    ) -> Result<ClassDeletion> {
        let source = self.concrete_class(class)?.clone();
        let affected: Vec<usize> = self
            .students
            .iter()
            .enumerate()
            .filter(|(_, s)| s.class_id == source.id)
            .map(|(i, _)| i)
            .collect();

        let outcome = if affected.is_empty() {
            ClassDeletion::Empty {
                name: source.name.clone(),
            }
        } else {
            match strategy {
                DeleteStrategy::Transfer => {
                    let target_id = transfer_target.filter(|t| !t.is_empty()).ok_or_else(|| {
                        RosterError::InvalidSelection(
                            "a target class is required to transfer students".to_string(),
                        )
                    })?;
                    if target_id == source.id {
                        return Err(RosterError::InvalidSelection(
                            "cannot transfer students into the class being deleted".to_string(),
                        ));
                    }
                    let target = self
                        .class(target_id)
                        .ok_or_else(|| RosterError::NotFound(format!("class '{}'", target_id)))?
                        .clone();

                    let collisions: Vec<String> = affected
                        .iter()
                        .map(|&i| &self.students[i].name)
                        .filter(|name| self.name_taken(name, &target.id, None))
                        .cloned()
                        .collect();
                    if !collisions.is_empty() {
                        return Err(RosterError::DuplicateName { names: collisions });
                    }

                    for &i in &affected {
                        self.students[i].class_id = target.id.clone();
                    }
                    ClassDeletion::Transferred {
                        name: source.name.clone(),
                        count: affected.len(),
                        target: target.name,
                    }
                }
                DeleteStrategy::Force => {
                    self.students.retain(|s| s.class_id != source.id);
                    ClassDeletion::Cascaded {
                        name: source.name.clone(),
                        count: affected.len(),
                    }
                }
            }
        };

        self.classes.retain(|c| c.id != source.id);
        self.current = self
            .classes
            .first()
            .map(|c| Selection::Class(c.id.clone()))
            .unwrap_or(Selection::None);
        self.touch();

        debug!(class_id = %source.id, ?outcome, "class deleted");
        Ok(outcome)
    }

    /// Change the current selection
    pub fn select_class(&mut self, selection: Selection) -> Result<()> {
        if let Selection::Class(id) = &selection {
            if self.class(id).is_none() {
                return Err(RosterError::NotFound(format!("class '{}'", id)));
            }
        }
        self.current = selection;
        self.touch();
        Ok(())
    }

    // ========================================================================
    // STUDENT OPERATIONS
    // ========================================================================

    /// Add a student to a concrete class. Returns the new student id.
    pub fn add_student(&mut self, name: &str, class: &Selection, coins: i64) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RosterError::EmptyName);
        }
        let class_id = self.concrete_class(class)?.id.clone();
        if self.name_taken(name, &class_id, None) {
            return Err(RosterError::duplicate(name));
        }

        let student = Student::new(name, class_id, coins);
        let id = student.id.clone();
        debug!(student_id = %id, name, class_id = %student.class_id, coins, "student added");
        self.students.push(student);
        self.touch();
        Ok(id)
    }

    /// Remove a student. Returns the removed record.
    pub fn delete_student(&mut self, student_id: &str) -> Result<Student> {
        let index = self.student_index(student_id)?;
        let student = self.students.remove(index);
        self.touch();

        debug!(student_id, name = %student.name, "student deleted");
        Ok(student)
    }

    /// Overwrite name, coins and class of a student in one step
    pub fn edit_student(
        &mut self,
        student_id: &str,
        name: &str,
        coins: i64,
        new_class: &Selection,
    ) -> Result<()> {
        let index = self.student_index(student_id)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(RosterError::EmptyName);
        }
        let class_id = self.concrete_class(new_class)?.id.clone();
        if self.name_taken(name, &class_id, Some(student_id)) {
            return Err(RosterError::duplicate(name));
        }

        let student = &mut self.students[index];
        student.name = name.to_string();
        student.coins = coins;
        student.class_id = class_id;
        self.touch();

        debug!(student_id, "student edited");
        Ok(())
    }

    /// Add `delta` (either sign) to one balance. Returns the new balance.
    pub fn adjust_coins(&mut self, student_id: &str, delta: i64) -> Result<i64> {
        let index = self.student_index(student_id)?;
        let student = &mut self.students[index];
        let coins = checked_coins(student, delta)?;
        student.coins = coins;
        self.touch();

        debug!(student_id, delta, coins, "coins adjusted");
        Ok(coins)
    }

    /// Add `delta` to every targeted student. Returns how many were changed.
    pub fn batch_adjust(&mut self, target: &BatchTarget, delta: i64) -> Result<usize> {
        if delta == 0 {
            return Err(RosterError::InvalidAmount(
                "amount must not be zero".to_string(),
            ));
        }

        let indices: Vec<usize> = match target {
            BatchTarget::CurrentClass => {
                let class_id = self.concrete_class(&self.current)?.id.clone();
                self.students
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.class_id == class_id)
                    .map(|(i, _)| i)
                    .collect()
            }
            BatchTarget::Students(ids) => {
                if ids.is_empty() {
                    return Err(RosterError::InvalidSelection(
                        "no students selected".to_string(),
                    ));
                }
                let mut seen = HashSet::new();
                let mut indices = Vec::new();
                for id in ids {
                    if seen.insert(id.as_str()) {
                        indices.push(self.student_index(id)?);
                    }
                }
                indices
            }
        };

        let updated: Vec<i64> = indices
            .iter()
            .map(|&i| checked_coins(&self.students[i], delta))
            .collect::<Result<_>>()?;

        for (&i, coins) in indices.iter().zip(updated) {
            self.students[i].coins = coins;
        }
        if !indices.is_empty() {
            self.touch();
        }

        debug!(count = indices.len(), delta, "batch adjustment applied");
        Ok(indices.len())
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Students visible in `selection`, optionally filtered by a
    /// case-insensitive name search, ordered by `sort`.
    pub fn query<'a>(
        &'a self,
        selection: &Selection,
        search_term: Option<&str>,
        sort: SortKey,
    ) -> impl Iterator<Item = &'a Student> + 'a {
        let mut rows: Vec<&Student> = self
            .students
            .iter()
            .filter(|s| selection.includes(&s.class_id))
            .filter(|s| search_term.map_or(true, |term| s.matches(term)))
            .collect();

        match sort {
            SortKey::Name => match name_collator() {
                Some(collator) => rows.sort_by(|a, b| collator.compare(&a.name, &b.name)),
                None => rows.sort_by(|a, b| a.name.cmp(&b.name)),
            },
            SortKey::CoinsDesc => rows.sort_by(|a, b| b.coins.cmp(&a.coins)),
            SortKey::CoinsAsc => rows.sort_by(|a, b| a.coins.cmp(&b.coins)),
        }

        rows.into_iter()
    }

    /// Spreadsheet rows for a concrete class or all classes
    pub fn export_snapshot<'a>(
        &'a self,
        selection: &'a Selection,
    ) -> Result<impl Iterator<Item = ExportRow> + 'a> {
        match selection {
            Selection::None => {
                return Err(RosterError::InvalidSelection(
                    "select a class to export".to_string(),
                ))
            }
            Selection::Class(id) if self.class(id).is_none() => {
                return Err(RosterError::NotFound(format!("class '{}'", id)))
            }
            _ => {}
        }

        Ok(self
            .students
            .iter()
            .filter(move |s| selection.includes(&s.class_id))
            .map(move |s| ExportRow {
                name: s.name.clone(),
                class_name: self.class_name(&s.class_id).to_string(),
                coins: s.coins,
            }))
    }
}

fn checked_coins(student: &Student, delta: i64) -> Result<i64> {
    student.coins.checked_add(delta).ok_or_else(|| {
        RosterError::InvalidAmount(format!(
            "adding {} to {}'s balance of {} overflows",
            delta, student.name, student.coins
        ))
    })
}

/// Chinese (zh-CN) collation: Han names in pinyin order
fn name_collator() -> Option<Collator> {
    Collator::try_new(&locale!("zh-CN").into(), CollatorOptions::new())
        .map_err(|e| warn!(error = ?e, "zh-CN collation unavailable, sorting by code point"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Class A {Tom: 10, Amy: 5}, class B {Tom: 3}
    fn two_class_roster() -> (Roster, String, String) {
        let mut roster = Roster::new();
        let a = roster.create_class("A").unwrap();
        let b = roster.create_class("B").unwrap();
        roster.add_student("Tom", &Selection::class(&a), 10).unwrap();
        roster.add_student("Amy", &Selection::class(&a), 5).unwrap();
        roster.add_student("Tom", &Selection::class(&b), 3).unwrap();
        (roster, a, b)
    }

    fn coins_of(roster: &Roster, name: &str, class_id: &str) -> i64 {
        roster
            .students_in(class_id)
            .find(|s| s.name == name)
            .map(|s| s.coins)
            .unwrap()
    }

    #[test]
    fn test_defaults_are_seeded() {
        let roster = Roster::with_defaults();
        assert_eq!(roster.classes().len(), 2);
        assert_eq!(roster.students().len(), 7);
        assert_eq!(roster.current_selection(), &Selection::AllClasses);
        assert_eq!(roster.students_in("summer1030").count(), 5);
    }

    #[test]
    fn test_create_class_selects_it() {
        let mut roster = Roster::new();
        let id = roster.create_class("  三年级A班 ").unwrap();
        assert_eq!(roster.current_selection(), &Selection::class(&id));
        assert_eq!(roster.class(&id).unwrap().name, "三年级A班");
    }

    #[test]
    fn test_create_class_rejects_duplicates_and_blank() {
        let mut roster = Roster::new();
        roster.create_class("A").unwrap();
        assert_eq!(roster.create_class("A"), Err(RosterError::duplicate("A")));
        assert_eq!(roster.create_class("   "), Err(RosterError::EmptyName));
        // Case-sensitive
        assert!(roster.create_class("a").is_ok());
        assert_eq!(roster.classes().len(), 2);
    }

    #[test]
    fn test_add_student_duplicate_scenario() {
        let mut roster = Roster::new();
        let a = roster.create_class("A").unwrap();
        let b = roster.create_class("B").unwrap();

        roster.add_student("Tom", &Selection::class(&a), 10).unwrap();
        let err = roster.add_student("Tom", &Selection::class(&a), 0).unwrap_err();
        assert_eq!(err, RosterError::duplicate("Tom"));
        assert!(roster.add_student("Tom", &Selection::class(&b), 0).is_ok());
        assert_eq!(roster.students().len(), 2);
    }

    #[test]
    fn test_add_student_requires_concrete_class() {
        let mut roster = Roster::new();
        roster.create_class("A").unwrap();

        assert!(matches!(
            roster.add_student("Tom", &Selection::AllClasses, 0),
            Err(RosterError::InvalidSelection(_))
        ));
        assert!(matches!(
            roster.add_student("Tom", &Selection::None, 0),
            Err(RosterError::InvalidSelection(_))
        ));
        assert!(matches!(
            roster.add_student("Tom", &Selection::class("missing"), 0),
            Err(RosterError::NotFound(_))
        ));
        assert!(roster.students().is_empty());
    }

    #[test]
    fn test_roster_never_holds_duplicate_pairs() {
        let mut roster = Roster::new();
        let a = Selection::class(roster.create_class("A").unwrap());
        let names = ["Tom", "Amy", "Tom", "Li", "Amy", "Tom"];

        for (i, name) in names.iter().enumerate() {
            let _ = roster.add_student(name, &a, i as i64);
            if i % 3 == 2 {
                let id = roster.students()[0].id.clone();
                roster.delete_student(&id).unwrap();
            }
        }

        let mut pairs = HashSet::new();
        for s in roster.students() {
            assert!(pairs.insert((s.name.clone(), s.class_id.clone())));
        }
    }

    #[test]
    fn test_delete_student() {
        let (mut roster, a, _) = two_class_roster();
        let id = roster.students_in(&a).next().unwrap().id.clone();

        let removed = roster.delete_student(&id).unwrap();
        assert_eq!(removed.name, "Tom");
        assert_eq!(roster.students().len(), 2);
        assert!(matches!(roster.delete_student(&id), Err(RosterError::NotFound(_))));
    }

    #[test]
    fn test_transfer_aborts_on_any_collision() {
        let (mut roster, a, b) = two_class_roster();
        let before = roster.students().to_vec();

        let err = roster
            .delete_class(&Selection::class(&a), DeleteStrategy::Transfer, Some(&b))
            .unwrap_err();

        assert_eq!(
            err,
            RosterError::DuplicateName {
                names: vec!["Tom".to_string()]
            }
        );
        assert!(roster.class(&a).is_some());
        assert_eq!(roster.students(), before.as_slice());
    }

    #[test]
    fn test_transfer_moves_every_student() {
        let (mut roster, a, b) = two_class_roster();
        let tom_b = roster.students_in(&b).next().unwrap().id.clone();
        roster.delete_student(&tom_b).unwrap();

        let outcome = roster
            .delete_class(&Selection::class(&a), DeleteStrategy::Transfer, Some(&b))
            .unwrap();

        assert_eq!(
            outcome,
            ClassDeletion::Transferred {
                name: "A".to_string(),
                count: 2,
                target: "B".to_string()
            }
        );
        assert!(roster.class(&a).is_none());
        assert_eq!(roster.students_in(&b).count(), 2);
        assert_eq!(roster.current_selection(), &Selection::class(&b));
    }

    #[test]
    fn test_transfer_requires_valid_target() {
        let (mut roster, a, _) = two_class_roster();
        let source = Selection::class(&a);

        assert!(matches!(
            roster.delete_class(&source, DeleteStrategy::Transfer, None),
            Err(RosterError::InvalidSelection(_))
        ));
        assert!(matches!(
            roster.delete_class(&source, DeleteStrategy::Transfer, Some(&a)),
            Err(RosterError::InvalidSelection(_))
        ));
        assert!(matches!(
            roster.delete_class(&source, DeleteStrategy::Transfer, Some("nope")),
            Err(RosterError::NotFound(_))
        ));
        assert_eq!(roster.classes().len(), 2);
    }

    #[test]
    fn test_force_delete_cascades() {
        let (mut roster, a, b) = two_class_roster();

        let outcome = roster
            .delete_class(&Selection::class(&a), DeleteStrategy::Force, None)
            .unwrap();

        assert_eq!(
            outcome,
            ClassDeletion::Cascaded {
                name: "A".to_string(),
                count: 2
            }
        );
        assert_eq!(roster.students().len(), 1);
        assert_eq!(roster.students()[0].class_id, b);
    }

    #[test]
    fn test_delete_empty_class_and_selection_fallback() {
        let mut roster = Roster::new();
        let a = roster.create_class("A").unwrap();

        let outcome = roster
            .delete_class(&Selection::class(&a), DeleteStrategy::Transfer, None)
            .unwrap();
        assert_eq!(outcome, ClassDeletion::Empty { name: "A".to_string() });
        assert_eq!(roster.current_selection(), &Selection::None);
    }

    #[test]
    fn test_delete_class_rejects_sentinel() {
        let (mut roster, _, _) = two_class_roster();
        assert!(matches!(
            roster.delete_class(&Selection::AllClasses, DeleteStrategy::Force, None),
            Err(RosterError::InvalidSelection(_))
        ));
        assert!(matches!(
            roster.delete_class(&Selection::None, DeleteStrategy::Force, None),
            Err(RosterError::InvalidSelection(_))
        ));
    }

    #[test]
    fn test_select_class_validates_ids() {
        let (mut roster, a, _) = two_class_roster();
        roster.select_class(Selection::AllClasses).unwrap();
        roster.select_class(Selection::class(&a)).unwrap();
        assert_eq!(roster.current_selection(), &Selection::class(&a));
        assert!(matches!(
            roster.select_class(Selection::class("ghost")),
            Err(RosterError::NotFound(_))
        ));
        assert_eq!(roster.current_selection(), &Selection::class(&a));
    }

    #[test]
    fn test_edit_student_moves_class_atomically() {
        let (mut roster, a, b) = two_class_roster();
        let amy = roster.students_in(&a).find(|s| s.name == "Amy").unwrap().id.clone();

        roster.edit_student(&amy, "Amy", 42, &Selection::class(&b)).unwrap();
        let edited = roster.student(&amy).unwrap();
        assert_eq!(edited.class_id, b);
        assert_eq!(edited.coins, 42);
    }

    #[test]
    fn test_edit_student_rejects_collision_without_changes() {
        let (mut roster, a, b) = two_class_roster();
        let tom_a = roster.students_in(&a).find(|s| s.name == "Tom").unwrap().clone();

        let err = roster
            .edit_student(&tom_a.id, "Tom", 99, &Selection::class(&b))
            .unwrap_err();
        assert_eq!(err, RosterError::duplicate("Tom"));
        assert_eq!(roster.student(&tom_a.id), Some(&tom_a));

        // Keeping its own name in its own class is not a collision
        roster.edit_student(&tom_a.id, "Tom", 11, &Selection::class(&a)).unwrap();
        assert_eq!(coins_of(&roster, "Tom", &a), 11);
    }

    #[test]
    fn test_edit_student_errors() {
        let (mut roster, a, _) = two_class_roster();
        let tom = roster.students_in(&a).next().unwrap().id.clone();

        assert!(matches!(
            roster.edit_student("ghost", "X", 0, &Selection::class(&a)),
            Err(RosterError::NotFound(_))
        ));
        assert!(matches!(
            roster.edit_student(&tom, "Tom", 0, &Selection::None),
            Err(RosterError::InvalidSelection(_))
        ));
        assert_eq!(
            roster.edit_student(&tom, " ", 0, &Selection::class(&a)),
            Err(RosterError::EmptyName)
        );
    }

    #[test]
    fn test_adjust_coins_allows_negative() {
        let (mut roster, a, _) = two_class_roster();
        let amy = roster.students_in(&a).find(|s| s.name == "Amy").unwrap().id.clone();

        assert_eq!(roster.adjust_coins(&amy, -8).unwrap(), -3);
        assert_eq!(roster.adjust_coins(&amy, 1).unwrap(), -2);
        assert!(matches!(roster.adjust_coins("ghost", 1), Err(RosterError::NotFound(_))));
    }

    #[test]
    fn test_adjust_coins_rejects_overflow() {
        let mut roster = Roster::new();
        let a = Selection::class(roster.create_class("A").unwrap());
        let id = roster.add_student("Max", &a, i64::MAX).unwrap();

        assert!(matches!(roster.adjust_coins(&id, 1), Err(RosterError::InvalidAmount(_))));
        assert_eq!(roster.student(&id).unwrap().coins, i64::MAX);
    }

    #[test]
    fn test_batch_adjust_current_class() {
        let (mut roster, a, b) = two_class_roster();
        roster.select_class(Selection::class(&a)).unwrap();

        let count = roster.batch_adjust(&BatchTarget::CurrentClass, 5).unwrap();

        assert_eq!(count, 2);
        assert_eq!(coins_of(&roster, "Tom", &a), 15);
        assert_eq!(coins_of(&roster, "Amy", &a), 10);
        assert_eq!(coins_of(&roster, "Tom", &b), 3);
    }

    #[test]
    fn test_batch_adjust_rejects_zero_and_sentinel() {
        let (mut roster, _, _) = two_class_roster();
        roster.select_class(Selection::AllClasses).unwrap();

        assert!(matches!(
            roster.batch_adjust(&BatchTarget::CurrentClass, 0),
            Err(RosterError::InvalidAmount(_))
        ));
        assert!(matches!(
            roster.batch_adjust(&BatchTarget::CurrentClass, 1),
            Err(RosterError::InvalidSelection(_))
        ));
    }

    #[test]
    fn test_batch_adjust_explicit_set() {
        let (mut roster, a, b) = two_class_roster();
        let tom_a = roster.students_in(&a).find(|s| s.name == "Tom").unwrap().id.clone();
        let tom_b = roster.students_in(&b).next().unwrap().id.clone();

        let ids = vec![tom_a.clone(), tom_b.clone(), tom_a.clone()];
        let count = roster.batch_adjust(&BatchTarget::Students(ids), -4).unwrap();

        assert_eq!(count, 2);
        assert_eq!(roster.student(&tom_a).unwrap().coins, 6);
        assert_eq!(roster.student(&tom_b).unwrap().coins, -1);
        assert_eq!(coins_of(&roster, "Amy", &a), 5);
    }

    #[test]
    fn test_batch_adjust_unknown_id_changes_nothing() {
        let (mut roster, a, _) = two_class_roster();
        let tom_a = roster.students_in(&a).next().unwrap().id.clone();
        let before = roster.students().to_vec();

        let ids = vec![tom_a, "ghost".to_string()];
        assert!(matches!(
            roster.batch_adjust(&BatchTarget::Students(ids), 3),
            Err(RosterError::NotFound(_))
        ));
        assert_eq!(roster.students(), before.as_slice());
        assert!(matches!(
            roster.batch_adjust(&BatchTarget::Students(vec![]), 3),
            Err(RosterError::InvalidSelection(_))
        ));
    }

    #[test]
    fn test_query_filters_and_sorts() {
        let (roster, a, _) = two_class_roster();

        let names: Vec<&str> = roster
            .query(&Selection::class(&a), None, SortKey::Name)
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["Amy", "Tom"]);

        let coins: Vec<i64> = roster
            .query(&Selection::AllClasses, None, SortKey::CoinsDesc)
            .map(|s| s.coins)
            .collect();
        assert_eq!(coins, vec![10, 5, 3]);

        let coins: Vec<i64> = roster
            .query(&Selection::AllClasses, Some("TOM"), SortKey::CoinsAsc)
            .map(|s| s.coins)
            .collect();
        assert_eq!(coins, vec![3, 10]);

        assert_eq!(roster.query(&Selection::None, None, SortKey::Name).count(), 0);
    }

    #[test]
    fn test_name_sort_uses_pinyin_order() {
        let mut roster = Roster::new();
        let class = Selection::class(roster.create_class("三年级A班").unwrap());
        for name in ["张三", "李四", "王五"] {
            roster.add_student(name, &class, 0).unwrap();
        }

        let names: Vec<&str> = roster
            .query(&class, None, SortKey::Name)
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["李四", "王五", "张三"]);
    }

    #[test]
    fn test_seed_names_sort_by_pinyin() {
        let roster = Roster::with_defaults();
        let summer = Selection::class("summer1030");

        let names: Vec<&str> = roster
            .query(&summer, None, SortKey::Name)
            .map(|s| s.name.as_str())
            .collect();
        // li, liu, tan, wang, zhang
        assert_eq!(names, vec!["李明华", "刘晓敏", "谭靖宜", "王大伟", "张小雅"]);
    }

    #[test]
    fn test_sort_key_parsing() {
        assert_eq!("coins-desc".parse::<SortKey>(), Ok(SortKey::CoinsDesc));
        assert_eq!(SortKey::CoinsAsc.next(), SortKey::Name);
        assert!("coins".parse::<SortKey>().is_err());
    }

    #[test]
    fn test_export_resolves_class_names() {
        let (roster, a, _) = two_class_roster();

        let rows: Vec<ExportRow> = roster
            .export_snapshot(&Selection::AllClasses)
            .unwrap()
            .collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].class_name, "B");

        let selection = Selection::class(&a);
        let rows: Vec<ExportRow> = roster.export_snapshot(&selection).unwrap().collect();
        assert_eq!(
            rows[0],
            ExportRow {
                name: "Tom".to_string(),
                class_name: "A".to_string(),
                coins: 10
            }
        );

        assert!(roster.export_snapshot(&Selection::None).is_err());
    }

    #[test]
    fn test_from_snapshot_rejects_reserved_ids() {
        let mut snapshot = Roster::with_defaults().to_snapshot();
        snapshot.classes.push(Class::with_id(ALL_CLASSES, "bogus"));

        assert!(matches!(
            Roster::from_snapshot(snapshot),
            Err(RosterError::CorruptState(_))
        ));
    }

    #[test]
    fn test_from_snapshot_promotes_empty_selection() {
        let mut snapshot = Roster::with_defaults().to_snapshot();
        snapshot.current_class = Selection::None;

        let roster = Roster::from_snapshot(snapshot).unwrap();
        assert_eq!(roster.current_selection(), &Selection::AllClasses);
    }

    #[test]
    fn test_failed_operations_keep_revision() {
        let (mut roster, _, _) = two_class_roster();
        let revision = roster.revision();

        let _ = roster.create_class("A");
        let _ = roster.adjust_coins("ghost", 1);
        assert_eq!(roster.revision(), revision);

        roster.create_class("C").unwrap();
        assert_eq!(roster.revision(), revision + 1);
    }
}
