//! Person directory records and the user's watched selection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::detection::Classification;
use crate::error::CoreError;
use crate::types::PersonId;

/// A person enrolled on the backend, as returned by `GET /persons`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    #[serde(default)]
    pub is_criminal: bool,
    /// Detailed category (`"criminal"`, `"missing"`, `"child"`, ...).
    #[serde(default)]
    pub person_type: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub info: serde_json::Value,
}

impl Person {
    /// The person's category, looked up top-level first and then inside
    /// `info`.
    pub fn category(&self) -> Option<&str> {
        self.person_type
            .as_deref()
            .or_else(|| self.info.get("category").and_then(|v| v.as_str()))
            .or_else(|| self.info.get("person_type").and_then(|v| v.as_str()))
            .filter(|c| !c.is_empty())
    }
}

/// Human-readable category text for a directory record.
///
/// Known categories map to fixed labels; custom categories are shown
/// verbatim; records without a category fall back to the criminal flag.
pub fn category_label(person: &Person) -> String {
    match person.category() {
        Some("criminal") => "범죄자".to_string(),
        Some("missing") => "실종자".to_string(),
        Some("dementia") => "치매환자".to_string(),
        Some("child") => "미아".to_string(),
        Some("wanted") => "수배자".to_string(),
        Some(custom) => custom.to_string(),
        None => Classification::from_criminal_flag(person.is_criminal)
            .label()
            .to_string(),
    }
}

/// Image types the backend accepts for enrollment.
const ENROLL_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Payload for `POST /enroll`.
#[derive(Debug, Clone)]
pub struct EnrollRequest {
    pub person_id: PersonId,
    pub name: String,
    pub person_type: String,
    pub file_name: String,
    pub image: Vec<u8>,
}

impl EnrollRequest {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.person_id.trim().is_empty() {
            return Err(CoreError::Validation("person id is required".into()));
        }
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("name is required".into()));
        }
        if self.image.is_empty() {
            return Err(CoreError::Validation("image is required".into()));
        }
        let extension = self
            .file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if !ENROLL_EXTENSIONS.contains(&extension.as_str()) {
            return Err(CoreError::Validation(format!(
                "unsupported image type: {}",
                self.file_name
            )));
        }
        Ok(())
    }
}

/// A person the user chose to monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedPerson {
    pub id: PersonId,
    pub display_name: String,
    /// `None` when nothing is known about the person beyond the id.
    pub is_criminal: Option<bool>,
    /// Full directory record, when the selection came from the directory.
    pub person: Option<Person>,
}

impl SelectedPerson {
    pub fn new(id: impl Into<PersonId>, display_name: impl Into<String>, is_criminal: bool) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_criminal: Some(is_criminal),
            person: None,
        }
    }

    /// A watched id with no directory record. Its classification comes
    /// from each detection.
    pub fn unlisted(id: impl Into<PersonId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_criminal: None,
            person: None,
        }
    }

    /// Build a selection entry from a directory record. `display_names`
    /// overrides the directory name for matching ids.
    pub fn from_person(person: Person, display_names: &HashMap<PersonId, String>) -> Self {
        let display_name = display_names
            .get(&person.id)
            .cloned()
            .unwrap_or_else(|| person.name.clone());
        Self {
            id: person.id.clone(),
            display_name,
            is_criminal: Some(person.is_criminal),
            person: Some(person),
        }
    }

    /// Authoritative classification for detections of this person, when
    /// the criminal flag is known.
    pub fn classification(&self) -> Option<Classification> {
        self.is_criminal.map(Classification::from_criminal_flag)
    }
}

/// The ordered set of watched persons. Ids are unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    persons: Vec<SelectedPerson>,
}

impl Selection {
    /// Build a selection, keeping the first entry for any repeated id.
    pub fn new(persons: Vec<SelectedPerson>) -> Self {
        let mut selection = Self::default();
        for person in persons {
            if !selection.contains(&person.id) {
                selection.persons.push(person);
            }
        }
        selection
    }

    pub fn ids(&self) -> Vec<PersonId> {
        self.persons.iter().map(|p| p.id.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&SelectedPerson> {
        self.persons.iter().find(|p| p.id == id)
    }

    /// Match by display name, the fallback for detections whose id names
    /// nobody in the selection.
    pub fn find_by_name(&self, name: &str) -> Option<&SelectedPerson> {
        self.persons.iter().find(|p| p.display_name == name)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SelectedPerson> {
        self.persons.iter()
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }
}
