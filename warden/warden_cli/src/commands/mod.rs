//! Subcommands of the `warden` binary.

pub mod check;
pub mod lookup;

use warden_core::types::AuthStatus;

/// Exit code for errors outside of authorization, such as an unreadable
/// policy.
pub const EXIT_ERROR: u8 = 64;

/// Exit code reporting `status`. Only `Allow` is zero.
pub fn exit_code(status: AuthStatus) -> u8 {
    match status {
        AuthStatus::Allow => 0,
        AuthStatus::Deny => 1,
        AuthStatus::InteractionNotAllowed => 2,
        AuthStatus::Canceled => 3,
        AuthStatus::Internal => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let statuses = [
            AuthStatus::Allow,
            AuthStatus::Deny,
            AuthStatus::InteractionNotAllowed,
            AuthStatus::Canceled,
            AuthStatus::Internal,
        ];
        let mut codes: Vec<u8> = statuses.iter().map(|s| exit_code(*s)).collect();
        codes.dedup();
        assert_eq!(codes.len(), statuses.len());
        assert_eq!(exit_code(AuthStatus::Allow), 0);
        assert!(!codes.contains(&EXIT_ERROR));
    }
}
