// Import reconciliation - validate spreadsheet rows against the roster,
// summarize, then commit.
//
// Planning never mutates. The plan remembers the roster revision it was
// computed against so a confirmation step can sit between plan and commit
// without risking a stale write.

use crate::error::{Result, RosterError};
use crate::model::{Class, Student};
use crate::roster::Roster;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::info;

/// One raw row from the spreadsheet collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRow {
    pub name: Option<String>,
    /// Raw cell text, parsed leniently
    pub coins: Option<String>,
    pub class_name: Option<String>,
}

impl ImportRow {
    pub fn new(name: &str, coins: Option<&str>, class_name: Option<&str>) -> Self {
        ImportRow {
            name: Some(name.to_string()),
            coins: coins.map(str::to_string),
            class_name: class_name.map(str::to_string),
        }
    }
}

/// Whether existing students survive an import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportMode {
    /// Keep every existing student, skip rows that collide with them
    Append,
    /// Discard every existing student in every class first
    Replace,
}

impl ImportMode {
    pub fn label(&self) -> &'static str {
        match self {
            ImportMode::Append => "追加模式",
            ImportMode::Replace => "覆盖模式",
        }
    }
}

impl FromStr for ImportMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "append" => Ok(ImportMode::Append),
            "replace" => Ok(ImportMode::Replace),
            other => Err(format!(
                "unknown import mode '{}' (expected append or replace)",
                other
            )),
        }
    }
}

/// Parse a coin cell by its leading integer: `"12abc"` is 12, `"3.9"` is 3,
/// `"1e3"` is 1, a `0x` prefix reads hex. No digits or overflow gives 0.
pub fn parse_coins(raw: Option<&str>) -> i64 {
    let Some(raw) = raw.map(str::trim_start) else {
        return 0;
    };
    let (negative, rest) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };
    let (radix, rest) = match rest.get(..2) {
        Some("0x") | Some("0X") => (16, &rest[2..]),
        _ => (10, rest),
    };

    let end = rest.find(|c: char| !c.is_digit(radix)).unwrap_or(rest.len());
    let magnitude = match i64::from_str_radix(&rest[..end], radix) {
        Ok(value) => value,
        Err(_) => return 0,
    };
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

// ============================================================================
// PLAN
// ============================================================================

/// Where a planned student goes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlannedClass {
    Existing(String),
    /// Created on commit
    New(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStudent {
    pub name: String,
    pub coins: i64,
    pub class: PlannedClass,
    pub class_name: String,
}

/// Validated import, ready to be confirmed and committed.
///
/// Fields are read-only outside this module; a plan can only come from
/// [`Roster::plan_import`].
#[derive(Debug, Clone)]
pub struct ImportPlan {
    mode: ImportMode,
    students: Vec<PlannedStudent>,
    /// Names of classes that will be created, in first-appearance order
    new_classes: Vec<String>,
    /// Rows skipped for a missing name or an unresolvable class
    invalid_rows: usize,
    /// Rows skipped for a name collision
    duplicate_rows: usize,
    /// Per-class student counts, in first-appearance order
    per_class: Vec<(String, usize)>,
    /// Label of the selection the plan was made under
    selection_label: String,
    revision: u64,
}

impl ImportPlan {
    pub fn mode(&self) -> ImportMode {
        self.mode
    }

    pub fn students(&self) -> &[PlannedStudent] {
        &self.students
    }

    pub fn new_classes(&self) -> &[String] {
        &self.new_classes
    }

    pub fn invalid_rows(&self) -> usize {
        self.invalid_rows
    }

    pub fn duplicate_rows(&self) -> usize {
        self.duplicate_rows
    }

    pub fn per_class(&self) -> &[(String, usize)] {
        &self.per_class
    }

    pub fn selection_label(&self) -> &str {
        &self.selection_label
    }

    pub fn imported(&self) -> usize {
        self.students.len()
    }

    pub fn skipped(&self) -> usize {
        self.invalid_rows + self.duplicate_rows
    }

    /// `班级(n人)、...`
    pub fn class_breakdown(&self) -> String {
        format_breakdown(&self.per_class)
    }

    /// Confirmation text for the caller to show before committing
    pub fn summary(&self) -> String {
        let mut text = format!(
            "{}：准备导入 {} 名学生到以下班级：\n{}\n\n",
            self.mode.label(),
            self.imported(),
            self.class_breakdown()
        );
        match self.mode {
            ImportMode::Append => text.push_str("将保留所有班级的现有学生数据。"),
            ImportMode::Replace => text.push_str("警告：所有班级的现有学生数据将被清空！"),
        }
        if !self.new_classes.is_empty() {
            text.push_str(&format!("\n\n将新建班级：{}", self.new_classes.join("、")));
        }
        if self.skipped() > 0 {
            text.push_str(&format!("\n\n跳过 {} 条无效数据。", self.skipped()));
        }
        text
    }
}

/// Outcome of a committed import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub mode: ImportMode,
    pub imported: usize,
    pub skipped: usize,
    /// Students discarded by a replace import
    pub replaced: usize,
    pub created_classes: Vec<String>,
    pub per_class: Vec<(String, usize)>,
}

impl ImportSummary {
    pub fn message(&self) -> String {
        let mut text = match self.mode {
            ImportMode::Append => format!("{}：", self.mode.label()),
            ImportMode::Replace => format!(
                "{}：已清空所有 {} 名原有学生，",
                self.mode.label(),
                self.replaced
            ),
        };
        text.push_str(&format!(
            "成功导入 {} 名学生到 {}",
            self.imported,
            format_breakdown(&self.per_class)
        ));
        if self.skipped > 0 {
            text.push_str(&format!("，跳过 {} 条无效数据", self.skipped));
        }
        text
    }
}

fn format_breakdown(per_class: &[(String, usize)]) -> String {
    per_class
        .iter()
        .map(|(name, count)| format!("{}({}人)", name, count))
        .collect::<Vec<_>>()
        .join("、")
}

// ============================================================================
// RECONCILIATION
// ============================================================================

impl Roster {
    /// Validate `rows` against the current roster without changing it
    pub fn plan_import(&self, rows: &[ImportRow], mode: ImportMode) -> Result<ImportPlan> {
        let mut plan = ImportPlan {
            mode,
            students: Vec::new(),
            new_classes: Vec::new(),
            invalid_rows: 0,
            duplicate_rows: 0,
            per_class: Vec::new(),
            selection_label: self.selection_label(&self.current),
            revision: self.revision,
        };
        // (name, class key) pairs already planned in this import
        let mut planned: HashSet<(String, PlannedClass)> = HashSet::new();

        for row in rows {
            let Some(name) = row.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
                plan.invalid_rows += 1;
                continue;
            };
            let coins = parse_coins(row.coins.as_deref());

            let class_name = row
                .class_name
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty());
            let (class, class_name) = match class_name {
                Some(class_name) => match self.class_by_name(class_name) {
                    Some(existing) => (
                        PlannedClass::Existing(existing.id.clone()),
                        existing.name.clone(),
                    ),
                    None => {
                        if !plan.new_classes.iter().any(|c| c == class_name) {
                            plan.new_classes.push(class_name.to_string());
                        }
                        (PlannedClass::New(class_name.to_string()), class_name.to_string())
                    }
                },
                None => match self.concrete_class(&self.current) {
                    Ok(current) => (
                        PlannedClass::Existing(current.id.clone()),
                        current.name.clone(),
                    ),
                    Err(_) => {
                        plan.invalid_rows += 1;
                        continue;
                    }
                },
            };

            let collides_with_roster = mode == ImportMode::Append
                && matches!(&class, PlannedClass::Existing(id)
                    if self.students.iter().any(|s| &s.class_id == id && s.name == name));
            if collides_with_roster || !planned.insert((name.to_string(), class.clone())) {
                plan.duplicate_rows += 1;
                continue;
            }

            match plan.per_class.iter_mut().find(|(n, _)| *n == class_name) {
                Some((_, count)) => *count += 1,
                None => plan.per_class.push((class_name.clone(), 1)),
            }
            plan.students.push(PlannedStudent {
                name: name.to_string(),
                coins,
                class,
                class_name,
            });
        }

        if plan.students.is_empty() {
            return Err(RosterError::NothingToImport {
                errors: plan.skipped(),
            });
        }
        Ok(plan)
    }

    /// Apply a plan produced by [`Roster::plan_import`] on this same state.
    ///
    /// Every class is resolved and every `(name, class)` pair checked before
    /// the roster is touched.
    pub fn commit_import(&mut self, plan: ImportPlan) -> Result<ImportSummary> {
        if plan.revision != self.revision {
            return Err(RosterError::StalePlan);
        }

        let mut created: Vec<Class> = Vec::with_capacity(plan.new_classes.len());
        for name in &plan.new_classes {
            if self.class_by_name(name).is_some() || created.iter().any(|c| &c.name == name) {
                return Err(RosterError::duplicate(name.clone()));
            }
            created.push(Class::new(name));
        }

        let mut pairs: HashSet<(&str, String)> = HashSet::new();
        let mut incoming = Vec::with_capacity(plan.students.len());
        for planned in &plan.students {
            let class_id = match &planned.class {
                PlannedClass::Existing(id) => self
                    .class(id)
                    .map(|c| c.id.clone())
                    .ok_or_else(|| RosterError::NotFound(format!("class '{}'", id)))?,
                PlannedClass::New(name) => created
                    .iter()
                    .find(|c| &c.name == name)
                    .map(|c| c.id.clone())
                    .ok_or_else(|| RosterError::NotFound(format!("planned class '{}'", name)))?,
            };

            let collides_with_roster = plan.mode == ImportMode::Append
                && self
                    .students
                    .iter()
                    .any(|s| s.class_id == class_id && s.name == planned.name);
            if collides_with_roster || !pairs.insert((planned.name.as_str(), class_id.clone())) {
                return Err(RosterError::duplicate(planned.name.clone()));
            }
            incoming.push(Student::new(&planned.name, class_id, planned.coins));
        }

        let replaced = match plan.mode {
            ImportMode::Replace => std::mem::take(&mut self.students).len(),
            ImportMode::Append => 0,
        };
        self.students.extend(incoming);
        self.classes.extend(created);
        self.touch();

        let summary = ImportSummary {
            mode: plan.mode,
            imported: plan.imported(),
            skipped: plan.skipped(),
            replaced,
            created_classes: plan.new_classes,
            per_class: plan.per_class,
        };
        info!(
            mode = ?summary.mode,
            imported = summary.imported,
            skipped = summary.skipped,
            replaced = summary.replaced,
            "import committed"
        );
        Ok(summary)
    }

    /// Plan and commit in one step
    pub fn import_reconcile(
        &mut self,
        rows: &[ImportRow],
        mode: ImportMode,
    ) -> Result<ImportSummary> {
        let plan = self.plan_import(rows, mode)?;
        self.commit_import(plan)
    }
}
