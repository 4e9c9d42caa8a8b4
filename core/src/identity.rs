//! Identity and election-token generation

use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

/// Length of a generated election token
const TOKEN_LEN: usize = 12;

/// Generate a fresh local identity for a swarm instance.
///
/// Identities are opaque strings; any unique-per-process string a caller
/// supplies instead works just as well.
pub fn generate_peer_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate an election token for a swarm instance.
///
/// The token is only ever compared lexicographically against other tokens to
/// break initiator symmetry, so all that matters is that it is random and
/// drawn from a totally ordered alphabet. Generated once per swarm, not per
/// announcement.
pub fn generate_election_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_ids_unique() {
        let a = generate_peer_id();
        let b = generate_peer_id();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_election_token_shape() {
        let token = generate_election_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_token_distinct_from_identity() {
        // Sanity: the two generators draw from different shapes entirely.
        let id = generate_peer_id();
        let token = generate_election_token();
        assert_ne!(id.len(), token.len());
    }
}
