/// Queue key for one spatial operation on one owner record,
/// `"{owner_type}/{owner_id}/{operation}"`.
pub fn queue_key(owner_type: &str, owner_id: i64, operation: &str) -> String {
    format!("{}{operation}", queue_prefix(owner_type, owner_id))
}

/// Prefix shared by every queue key of one owner record.
pub fn queue_prefix(owner_type: &str, owner_id: i64) -> String {
    format!("{owner_type}/{owner_id}/")
}
