//! Account-row matching policy for pre-check verification.

use crate::panel::AccountRow;

/// Find the row whose identifying cell matches the requested account.
///
/// Panels pad cell text with incidental whitespace and newlines, so a
/// trimmed exact match or a containment match both count. No match means
/// the mutating step must not run.
pub fn match_account<'a>(rows: &'a [AccountRow], target: &str) -> Option<&'a AccountRow> {
    let want = target.trim();
    if want.is_empty() {
        return None;
    }
    rows.iter().find(|row| {
        let cell = row.account.trim();
        cell == want || cell.contains(want)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        let rows = vec![AccountRow::new("PlayerOne"), AccountRow::new("PlayerTwo")];
        let hit = match_account(&rows, "PlayerTwo").unwrap();
        assert_eq!(hit.account, "PlayerTwo");
    }

    #[test]
    fn tolerates_whitespace_padding() {
        let rows = vec![AccountRow::new("  PlayerOne\n")];
        assert!(match_account(&rows, "PlayerOne").is_some());
    }

    #[test]
    fn containment_counts_as_match() {
        let rows = vec![AccountRow::new("PlayerOne (vip)")];
        assert!(match_account(&rows, "PlayerOne").is_some());
    }

    #[test]
    fn no_rows_no_match() {
        assert!(match_account(&[], "PlayerOne").is_none());
    }

    #[test]
    fn different_account_does_not_match() {
        let rows = vec![AccountRow::new("SomeoneElse")];
        assert!(match_account(&rows, "PlayerOne").is_none());
    }

    #[test]
    fn empty_target_never_matches() {
        let rows = vec![AccountRow::new("PlayerOne")];
        assert!(match_account(&rows, "   ").is_none());
    }
}
