//! Building the watched selection from the person directory.

use std::collections::HashMap;

use eyesis_core::person::{Person, SelectedPerson, Selection};
use eyesis_core::types::PersonId;

/// Select `ids` from `directory`, in the order given.
///
/// Ids the directory does not know are still watched, named by their
/// display-name override or the id itself, and classified by whatever the
/// backend reports for them.
pub fn build_selection(
    directory: Vec<Person>,
    ids: &[PersonId],
    display_names: &HashMap<PersonId, String>,
) -> Selection {
    let mut by_id: HashMap<PersonId, Person> = directory
        .into_iter()
        .map(|person| (person.id.clone(), person))
        .collect();

    let persons = ids
        .iter()
        .map(|id| match by_id.remove(id) {
            Some(person) => SelectedPerson::from_person(person, display_names),
            None => {
                tracing::warn!(person_id = %id, "Person not in directory, watching by id only");
                let name = display_names.get(id).cloned().unwrap_or_else(|| id.clone());
                SelectedPerson::unlisted(id.clone(), name)
            }
        })
        .collect();

    Selection::new(persons)
}
