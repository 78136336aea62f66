use uuid::Uuid;

/// Deterministic UUIDv5 for a normalized file path.
///
/// The same path always maps to the same point, so an upsert for a path
/// replaces its previous vector instead of adding a second entry.
pub fn point_id(normalized_path: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, normalized_path.as_bytes())
}
