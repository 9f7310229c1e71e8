// Read-only view-model for renderers (CLI table, TUI)

use crate::model::{Selection, Student};
use crate::roster::{Roster, SortKey};
use serde::Serialize;

/// One rendered table row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentRow {
    pub id: String,
    pub name: String,
    pub class_name: String,
    pub coins: i64,
}

/// Highest balance in the current view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopStudent {
    pub name: String,
    pub class_name: String,
    pub coins: i64,
}

/// Header statistics for a selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterStats {
    pub total_students: usize,
    pub top_student: Option<TopStudent>,
    /// Rounded half-up
    pub average_coins: i64,
}

impl RosterStats {
    /// `姓名（班级），n星币` in the aggregate view, `姓名，n星币` otherwise
    pub fn top_student_text(&self, selection: &Selection) -> String {
        match &self.top_student {
            None => "暂无数据".to_string(),
            Some(top) if *selection == Selection::AllClasses => {
                format!("{}（{}），{}星币", top.name, top.class_name, top.coins)
            }
            Some(top) => format!("{}，{}星币", top.name, top.coins),
        }
    }
}

/// Build table rows from a query
pub fn student_rows(
    roster: &Roster,
    selection: &Selection,
    search_term: Option<&str>,
    sort: SortKey,
) -> Vec<StudentRow> {
    roster
        .query(selection, search_term, sort)
        .map(|s| StudentRow {
            id: s.id.clone(),
            name: s.name.clone(),
            class_name: roster.class_name(&s.class_id).to_string(),
            coins: s.coins,
        })
        .collect()
}

/// Statistics over every student visible in `selection`
pub fn stats(roster: &Roster, selection: &Selection) -> RosterStats {
    let students: Vec<&Student> = roster
        .students()
        .iter()
        .filter(|s| selection.includes(&s.class_id))
        .collect();

    // First student wins ties
    let top_student = students
        .iter()
        .copied()
        .fold(None::<&Student>, |best, s| match best {
            Some(b) if b.coins >= s.coins => Some(b),
            _ => Some(s),
        })
        .map(|s| TopStudent {
            name: s.name.clone(),
            class_name: roster.class_name(&s.class_id).to_string(),
            coins: s.coins,
        });

    let average_coins = if students.is_empty() {
        0
    } else {
        let total: i128 = students.iter().map(|s| s.coins as i128).sum();
        (total as f64 / students.len() as f64 + 0.5).floor() as i64
    };

    RosterStats {
        total_students: students.len(),
        top_student,
        average_coins,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_for_default_roster() {
        let roster = Roster::with_defaults();
        let stats = stats(&roster, &Selection::AllClasses);

        assert_eq!(stats.total_students, 7);
        // (106 + 85 + 72 + 45 + 38 + 92 + 67) / 7 = 72.14
        assert_eq!(stats.average_coins, 72);
        assert_eq!(
            stats.top_student_text(&Selection::AllClasses),
            "谭靖宜（暑假1030），106星币"
        );
    }

    #[test]
    fn test_stats_for_one_class() {
        let roster = Roster::with_defaults();
        let selection = Selection::class("spring2024");
        let stats = stats(&roster, &selection);

        assert_eq!(stats.total_students, 2);
        // (92 + 67) / 2 = 79.5 rounds up
        assert_eq!(stats.average_coins, 80);
        assert_eq!(stats.top_student_text(&selection), "陈思涵，92星币");
    }

    #[test]
    fn test_stats_rounding_and_ties() {
        let mut roster = Roster::new();
        let a = Selection::class(roster.create_class("A").unwrap());
        roster.add_student("First", &a, -3).unwrap();
        roster.add_student("Second", &a, -3).unwrap();
        roster.add_student("Third", &a, -4).unwrap();

        let stats = stats(&roster, &a);
        // -10 / 3 = -3.33
        assert_eq!(stats.average_coins, -3);
        assert_eq!(stats.top_student.unwrap().name, "First");
    }

    #[test]
    fn test_empty_selection_stats() {
        let roster = Roster::with_defaults();
        let stats = stats(&roster, &Selection::None);

        assert_eq!(stats.total_students, 0);
        assert_eq!(stats.average_coins, 0);
        assert_eq!(stats.top_student_text(&Selection::None), "暂无数据");
    }

    #[test]
    fn test_student_rows_carry_class_names() {
        let roster = Roster::with_defaults();
        let rows = student_rows(&roster, &Selection::AllClasses, Some("林"), SortKey::Name);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].class_name, "春季2024");
        assert_eq!(rows[0].coins, 67);
    }
}
