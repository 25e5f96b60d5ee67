//! Decoding of the `ASCEND_VISIBLE_DEVICES` value into device indices.
//!
//! Four encodings are in use, detected by their shape in this order:
//!
//! 1. name-indexed, e.g. `Ascend910-0,Ascend910-1`
//! 2. mixed comma/range, e.g. `0,2-4`
//! 3. pure range, e.g. `0-3`
//! 4. plain comma list, e.g. `0,1,2`
//!
//! Malformed entries are logged and dropped. Decoding never fails as a whole.

use super::VISIBLE_DEVICES_ENV;

/// Values longer than this are rejected without being parsed.
pub const MAX_ENV_VALUE_LEN: usize = 1024;

const COMMA: char = ',';
const MINUS: char = '-';
/// Number of parts in `<name>-<index>` and `<low>-<high>`.
const PAIR_PARTS: usize = 2;

/// Decodes the value of the visibility variable into device indices.
///
/// # Arguments
///
/// * `value` - The raw value, i.e. everything after `ASCEND_VISIBLE_DEVICES=`.
/// * `container_id` - Used for diagnostics only.
///
/// # Returns
///
/// The device indices in declaration order. Empty if nothing valid was found.
///
/// # Examples
///
/// ```
/// # use npu_monitor::devices::decode_visible_devices;
/// assert_eq!(decode_visible_devices("0,2-4", "c1"), vec![0, 2, 3, 4]);
/// assert_eq!(decode_visible_devices("Ascend-0,Ascend-1", "c1"), vec![0, 1]);
/// ```
pub fn decode_visible_devices(value: &str, container_id: &str) -> Vec<u32> {
    if value.len() > MAX_ENV_VALUE_LEN {
        log::warn!(
            "container `{}` has a {} value of {} bytes (max {}), ignoring it",
            container_id,
            VISIBLE_DEVICES_ENV,
            value.len(),
            MAX_ENV_VALUE_LEN
        );
        return Vec::new();
    }

    if is_name_indexed(value) {
        return decode_name_indexed(value, container_id);
    }
    if value.contains(MINUS) && value.contains(COMMA) {
        return decode_comma_range(value, container_id);
    }
    if value.contains(MINUS) {
        return decode_range(value, container_id);
    }
    decode_comma_list(value, container_id)
}

/// Returns true if any comma separated entry looks like `<name>-<index>` with an alphabetic name.
fn is_name_indexed(value: &str) -> bool {
    value.split(COMMA).any(|entry| {
        entry
            .trim()
            .split_once(MINUS)
            .is_some_and(|(name, _)| name.starts_with(|c: char| c.is_ascii_alphabetic()))
    })
}

fn decode_name_indexed(value: &str, container_id: &str) -> Vec<u32> {
    let mut ids = Vec::with_capacity(value.split(COMMA).count());
    for entry in value.split(COMMA) {
        let parts: Vec<&str> = entry.trim().split(MINUS).collect();
        if parts.len() != PAIR_PARTS {
            warn_invalid(container_id, entry, "expected `<name>-<index>`");
            continue;
        }
        match parse_id(parts[1]) {
            Some(id) => ids.push(id),
            None => warn_invalid(container_id, parts[1], "not a device index"),
        }
    }
    ids
}

fn decode_comma_range(value: &str, container_id: &str) -> Vec<u32> {
    let mut ids = Vec::new();
    for entry in value.split(COMMA) {
        if entry.contains(MINUS) {
            ids.extend(decode_range(entry, container_id));
        } else {
            ids.extend(decode_comma_list(entry, container_id));
        }
    }
    ids
}

fn decode_range(value: &str, container_id: &str) -> Vec<u32> {
    let bounds: Vec<&str> = value.split(MINUS).collect();
    if bounds.len() != PAIR_PARTS {
        warn_invalid(container_id, value, "expected `<low>-<high>`");
        return Vec::new();
    }
    let Some(low) = parse_id(bounds[0]) else {
        warn_invalid(container_id, bounds[0], "not a device index");
        return Vec::new();
    };
    let Some(high) = parse_id(bounds[1]) else {
        warn_invalid(container_id, bounds[1], "not a device index");
        return Vec::new();
    };
    if low > high {
        warn_invalid(container_id, value, "lower bound is bigger than upper bound");
        return Vec::new();
    }
    if high > i16::MAX as u32 {
        warn_invalid(container_id, value, "upper bound is out of range");
        return Vec::new();
    }

    (low..=high).collect()
}

fn decode_comma_list(value: &str, container_id: &str) -> Vec<u32> {
    let mut ids = Vec::with_capacity(value.split(COMMA).count());
    for entry in value.split(COMMA) {
        match parse_id(entry) {
            Some(id) => ids.push(id),
            None => warn_invalid(container_id, entry, "not a device index"),
        }
    }
    ids
}

#[inline]
fn parse_id(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok()
}

fn warn_invalid(container_id: &str, entry: &str, reason: &str) {
    log::warn!(
        "container `{}` has an invalid device ID `{}` in {}: {}",
        container_id,
        entry,
        VISIBLE_DEVICES_ENV,
        reason
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(value: &str) -> Vec<u32> {
        decode_visible_devices(value, "test")
    }

    #[test]
    fn test_name_indexed() {
        assert_eq!(decode("Name-0,Name-1,Name-2"), vec![0, 1, 2]);
        assert_eq!(decode("Ascend910-7,Ascend910-3"), vec![7, 3]);
    }

    #[test]
    fn test_name_indexed_skips_malformed_entries() {
        assert_eq!(decode("Ascend-0,Ascend-x,Ascend-1-2,Ascend-4"), vec![0, 4]);
    }

    #[test]
    fn test_range() {
        assert_eq!(decode("0-3"), vec![0, 1, 2, 3]);
        assert_eq!(decode("5-5"), vec![5]);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        assert!(decode("3-0").is_empty());
    }

    #[test]
    fn test_range_above_i16_max_is_empty() {
        assert!(decode("0-32768").is_empty());
        assert_eq!(decode("32766-32767"), vec![32766, 32767]);
    }

    #[test]
    fn test_range_with_invalid_bounds_is_empty() {
        assert!(decode("0-").is_empty());
        assert!(decode("1-2-3").is_empty());
    }

    #[test]
    fn test_mixed_comma_range() {
        assert_eq!(decode("0,2-4"), vec![0, 2, 3, 4]);
        assert_eq!(decode("4-5,x,0"), vec![4, 5, 0]);
    }

    #[test]
    fn test_comma_list_skips_invalid_tokens() {
        assert_eq!(decode("0,x,2"), vec![0, 2]);
        assert_eq!(decode("1"), vec![1]);
        assert!(decode("").is_empty());
    }

    #[test]
    fn test_oversized_value_is_rejected() {
        let value = vec!["1"; MAX_ENV_VALUE_LEN].join(",");
        assert!(value.len() > MAX_ENV_VALUE_LEN);
        assert!(decode(&value).is_empty());
    }

    #[test]
    fn test_precedence_prefers_name_indexed() {
        // Contains both `,` and `-`, but the name prefix wins and `2-3` is read as `<name>-<index>`.
        assert_eq!(decode("Ascend-1,2-3"), vec![1, 3]);
    }
}
