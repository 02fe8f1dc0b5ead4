/// All wall-clock timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Backend identifier of an enrolled person (e.g. `"yh"`).
pub type PersonId = String;

/// A position within the source video, in seconds.
pub type VideoSeconds = f64;
