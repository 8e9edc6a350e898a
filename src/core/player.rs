//! Player identification for two-player games.
//!
//! ## PlayerId
//!
//! Type-safe player identifier. The engine only searches two-player games,
//! so every player has exactly one opponent.

use serde::{Deserialize, Serialize};

/// Player identifier.
///
/// Player indices are 0-based: the first player is `PlayerId(0)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u8);

impl PlayerId {
    /// Number of players the search engine supports.
    pub const COUNT: usize = 2;

    /// Create a new player ID.
    #[must_use]
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Get the raw player index (0-based).
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// The other player.
    #[must_use]
    pub const fn opponent(self) -> Self {
        Self(1 - self.0)
    }

    /// Iterate over all player IDs for a game with `player_count` players.
    ///
    /// ```
    /// use rust_vlzero::core::PlayerId;
    ///
    /// let players: Vec<_> = PlayerId::all(2).collect();
    /// assert_eq!(players, vec![PlayerId::new(0), PlayerId::new(1)]);
    /// ```
    pub fn all(player_count: usize) -> impl Iterator<Item = PlayerId> {
        (0..player_count as u8).map(PlayerId)
    }

    /// Returns vector for a finished game won by `self`: +1 for the winner,
    /// -1 for every other player.
    #[must_use]
    pub fn win_returns(self, player_count: usize) -> Vec<f32> {
        PlayerId::all(player_count)
            .map(|p| if p == self { 1.0 } else { -1.0 })
            .collect()
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Player {}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_id_basics() {
        let p0 = PlayerId::new(0);
        let p1 = PlayerId::new(1);

        assert_eq!(p0.index(), 0);
        assert_eq!(p1.index(), 1);
        assert_eq!(format!("{}", p0), "Player 0");
    }

    #[test]
    fn test_opponent() {
        assert_eq!(PlayerId::new(0).opponent(), PlayerId::new(1));
        assert_eq!(PlayerId::new(1).opponent(), PlayerId::new(0));
        assert_eq!(PlayerId::new(1).opponent().opponent(), PlayerId::new(1));
    }

    #[test]
    fn test_win_returns() {
        assert_eq!(PlayerId::new(0).win_returns(2), vec![1.0, -1.0]);
        assert_eq!(PlayerId::new(1).win_returns(2), vec![-1.0, 1.0]);
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&PlayerId::new(1)).unwrap();
        let deserialized: PlayerId = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, PlayerId::new(1));
    }
}
