//! Ticket-number allocation. Numbers are human-facing, immutable, and
//! unique: `TKT-` plus an 8-digit zero-padded sequence drawn from a
//! single-row counter table updated atomically, the serialization point
//! for concurrent creates.

use crate::core::error::ApiError;
use crate::core::schema::ticket_counter;
use diesel::prelude::*;

pub fn format_ticket_number(sequence: i64) -> String {
    format!("TKT-{sequence:08}")
}

/// Allocate the next ticket number. The counter row is incremented and read
/// in one statement, so two concurrent creates can never share a number.
pub fn next_ticket_number(conn: &mut PgConnection) -> Result<String, ApiError> {
    let sequence: i64 = diesel::update(ticket_counter::table.filter(ticket_counter::id.eq(1)))
        .set(ticket_counter::value.eq(ticket_counter::value + 1))
        .returning(ticket_counter::value)
        .get_result(conn)?;
    Ok(format_ticket_number(sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_padding_to_eight_digits() {
        assert_eq!(format_ticket_number(1), "TKT-00000001");
        assert_eq!(format_ticket_number(423), "TKT-00000423");
        assert_eq!(format_ticket_number(12_345_678), "TKT-12345678");
    }

    #[test]
    fn test_format_matches_expected_pattern() {
        let number = format_ticket_number(77);
        let (prefix, digits) = number.split_at(4);
        assert_eq!(prefix, "TKT-");
        assert_eq!(digits.len(), 8);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }
}
