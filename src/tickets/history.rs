//! Append-only audit log. Every mutating lifecycle action records exactly
//! one row: actor, action label, and before/after snapshots. There is no
//! update or delete path.

use crate::core::error::ApiError;
use crate::core::schema::ticket_histories;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = ticket_histories)]
pub struct TicketHistory {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    pub action: String,
    pub old_values: Value,
    pub new_values: Value,
    pub created_at: DateTime<Utc>,
}

/// Reduce full before/after snapshots to just the fields that changed.
/// `created` and `updated` keep the whole entity; everything else is
/// bounded to the delta.
pub fn changed_fields(old: &Value, new: &Value) -> (Value, Value) {
    let (Some(old_map), Some(new_map)) = (old.as_object(), new.as_object()) else {
        return (old.clone(), new.clone());
    };
    let mut old_changed = serde_json::Map::new();
    let mut new_changed = serde_json::Map::new();
    for (key, new_value) in new_map {
        let old_value = old_map.get(key).unwrap_or(&Value::Null);
        if old_value != new_value {
            old_changed.insert(key.clone(), old_value.clone());
            new_changed.insert(key.clone(), new_value.clone());
        }
    }
    (Value::Object(old_changed), Value::Object(new_changed))
}

pub fn record(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    user_id: Uuid,
    action: &str,
    old_values: Value,
    new_values: Value,
) -> Result<(), ApiError> {
    // `created`/`updated` store the broader full-entity snapshot.
    let (old_values, new_values) = if action == "created" || action == "updated" {
        (old_values, new_values)
    } else {
        changed_fields(&old_values, &new_values)
    };

    let entry = TicketHistory {
        id: Uuid::new_v4(),
        ticket_id,
        user_id,
        action: action.to_string(),
        old_values,
        new_values,
        created_at: Utc::now(),
    };
    diesel::insert_into(ticket_histories::table)
        .values(&entry)
        .execute(conn)?;
    Ok(())
}

pub fn for_ticket(conn: &mut PgConnection, ticket_id: Uuid) -> Result<Vec<TicketHistory>, ApiError> {
    Ok(ticket_histories::table
        .filter(ticket_histories::ticket_id.eq(ticket_id))
        .order(ticket_histories::created_at.asc())
        .load(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_changed_fields_keeps_only_the_delta() {
        let old = json!({"status_id": 1, "assigned_to": null, "title": "Printer down"});
        let new = json!({"status_id": 2, "assigned_to": "abc", "title": "Printer down"});
        let (old_changed, new_changed) = changed_fields(&old, &new);
        assert_eq!(old_changed, json!({"status_id": 1, "assigned_to": null}));
        assert_eq!(new_changed, json!({"status_id": 2, "assigned_to": "abc"}));
    }

    #[test]
    fn test_identical_snapshots_produce_empty_delta() {
        let snapshot = json!({"status_id": 1});
        let (old_changed, new_changed) = changed_fields(&snapshot, &snapshot);
        assert_eq!(old_changed, json!({}));
        assert_eq!(new_changed, json!({}));
    }

    #[test]
    fn test_non_object_snapshots_pass_through() {
        let (old, new) = changed_fields(&json!(null), &json!({"a": 1}));
        assert_eq!(old, json!(null));
        assert_eq!(new, json!({"a": 1}));
    }
}
