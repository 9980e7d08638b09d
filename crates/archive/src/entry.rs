//! Archive entry names: `<database>/<unique id as hex> <record type>`.

/// Name under which a record is stored, or `None` if the database name
/// cannot be stored unambiguously.
pub(crate) fn entry_name(database: &str, unique_id: u64, record_type: u8) -> Option<String> {
    if database.is_empty() || database.contains('/') || database.contains('\0') {
        return None;
    }
    Some(format!("{database}/{unique_id:08x} {record_type}"))
}

/// Split an entry name back into `(database, unique id, record type)`.
pub(crate) fn parse_entry_name(name: &str) -> Option<(&str, u64, u8)> {
    let (database, rest) = name.split_once('/')?;
    let (unique_id, record_type) = rest.split_once(' ')?;
    if database.is_empty() || unique_id.is_empty() {
        return None;
    }
    let unique_id = u64::from_str_radix(unique_id, 16).ok()?;
    let record_type = record_type.parse().ok()?;
    Some((database, unique_id, record_type))
}
