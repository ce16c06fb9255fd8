//! Student allow-list (`Students.csv`, no header)

use crate::error::{KioskError, KioskResult};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::{debug, info};

pub const ADMIN_ID: &str = "iamadmin";
const ADMIN_NAME: &str = "Admin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub student_id: String,
    pub lastname: String,
    pub firstname: String,
    #[serde(default)]
    pub middlename: String,
    #[serde(default)]
    pub course: String,
}

/// Allowed ids with their display names.
#[derive(Debug, Clone)]
pub struct Roster {
    students: HashMap<String, String>,
}

impl Roster {
    /// Load the allow-list. A missing file leaves only the admin id; a later
    /// row with the same id replaces the earlier one.
    pub fn load(path: &Path) -> KioskResult<Self> {
        let mut students = HashMap::new();
        students.insert(ADMIN_ID.to_string(), ADMIN_NAME.to_string());

        if path.exists() {
            let mut reader = ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .trim(csv::Trim::All)
                .from_path(path)?;
            for record in reader.records() {
                let record = record?;
                let Some(id) = record.get(0).filter(|id| !id.is_empty()) else {
                    continue;
                };
                students.insert(id.to_string(), record.get(1).unwrap_or_default().to_string());
            }
        }
        debug!("Loaded {} allowed ids", students.len());
        Ok(Self { students })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.students.contains_key(id)
    }

    /// Display name for a login greeting, the id itself when unnamed.
    pub fn display_name<'a>(&'a self, id: &'a str) -> Option<&'a str> {
        self.students
            .get(id)
            .map(|name| if name.is_empty() { id } else { name.as_str() })
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}

/// Append a student. The id, last name, first name and course are
/// required, and the id must not be registered yet.
pub fn register(path: &Path, student: &StudentRecord) -> KioskResult<()> {
    let required = [
        &student.student_id,
        &student.lastname,
        &student.firstname,
        &student.course,
    ];
    if required.iter().any(|field| field.trim().is_empty()) {
        return Err(KioskError::Config(
            "Student ID, Firstname, Lastname, and Course are required".into(),
        ));
    }

    let roster = Roster::load(path)?;
    if roster.contains(&student.student_id) {
        return Err(KioskError::Config(format!(
            "Student ID {} is already registered",
            student.student_id
        )));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
    writer.serialize(student)?;
    writer.flush()?;

    info!("Student registered: {}", student.student_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(id: &str) -> StudentRecord {
        StudentRecord {
            student_id: id.into(),
            lastname: "Dela Cruz".into(),
            firstname: "Juan".into(),
            middlename: String::new(),
            course: "BSCS".into(),
        }
    }

    #[test]
    fn test_admin_always_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let roster = Roster::load(&dir.path().join("Students.csv")).unwrap();
        assert!(roster.contains(ADMIN_ID));
        assert_eq!(roster.display_name(ADMIN_ID), Some("Admin"));
        assert!(!roster.contains("2021-0001"));
    }

    #[test]
    fn test_register_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("Students.csv");
        register(&path, &student("2021-0001")).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), "2021-0001,Dela Cruz,Juan,,BSCS");

        let roster = Roster::load(&path).unwrap();
        assert!(roster.contains("2021-0001"));
        assert_eq!(roster.display_name("2021-0001"), Some("Dela Cruz"));
    }

    #[test]
    fn test_register_rejects_duplicates_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Students.csv");
        register(&path, &student("2021-0001")).unwrap();

        let err = register(&path, &student("2021-0001")).unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert!(register(&path, &student(ADMIN_ID)).is_err());

        let mut blank = student("2021-0002");
        blank.course = " ".into();
        assert!(register(&path, &blank).is_err());
    }

    #[test]
    fn test_load_is_permissive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Students.csv");
        std::fs::write(&path, "7,First\n7,Second,X,,BSIT\n8\n,ghost\n").unwrap();

        let roster = Roster::load(&path).unwrap();
        assert_eq!(roster.display_name("7"), Some("Second"));
        assert_eq!(roster.display_name("8"), Some("8"));
        assert_eq!(roster.len(), 3);
    }
}
