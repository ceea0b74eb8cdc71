//! JSON output.

use serde::Serialize;

/// Print any serializable value as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    let json = serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string());
    println!("{}", json);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::queries::QueueStats;

    #[test]
    fn test_print_json_empty_list() {
        let empty: Vec<QueueStats> = Vec::new();
        print_json(&empty);
    }

    #[test]
    fn test_stats_json_shape() {
        let stats = QueueStats {
            queue: "relax".to_string(),
            total: 3,
            pending: 3,
            ..Default::default()
        };
        print_json(&stats);
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["queue"], "relax");
        assert_eq!(value["pending"], 3);
        assert!(value["oldest_lock"].is_null());
    }
}
