//! Field-map change detection between a stored record and an incoming
//! payload.
//!
//! Records and payloads do not share a shape, so both sides are compared
//! as JSON maps through an explicit field map: for each stored field, the
//! map names the incoming key that feeds it, or a projection that computes
//! the comparable value. A missing key and an explicit `null` are the same
//! thing; `null` is never equal to `0`, `""` or `false`.

use serde_json::Value;

/// Where the incoming side of a comparison comes from.
pub enum FieldSource {
    /// A top-level key of the incoming map.
    Key(&'static str),
    /// A computed projection of the incoming map.
    With(fn(&Value) -> Value),
}

pub type FieldMap = &'static [(&'static str, FieldSource)];

/// `true` when any mapped field differs, or when there is no existing
/// record at all (the creation path).
pub fn has_changes(existing: Option<&Value>, incoming: &Value, fields: FieldMap) -> bool {
    let Some(existing) = existing else {
        return true;
    };
    fields.iter().any(|(field, source)| {
        let old = existing.get(*field).cloned().unwrap_or(Value::Null);
        let new = match source {
            FieldSource::Key(key) => incoming.get(*key).cloned().unwrap_or(Value::Null),
            FieldSource::With(project) => project(incoming),
        };
        old != new
    })
}
