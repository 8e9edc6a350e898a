//! Tic-Tac-Toe implementation.

use std::fmt;

use crate::core::{EngineError, PlayerId, Result};
use crate::game::{Action, Game, State};

const CELLS: usize = 9;
const PLANES: usize = 4;

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// Cell of the transformed board at `index` reads from the returned source
/// cell of the original board. Covers the 8 symmetries of the square.
fn source_cell(transformation: usize, index: usize) -> usize {
    let (r, c) = (index / 3, index % 3);
    let (sr, sc) = match transformation {
        1 => (2 - c, r),     // rotate right
        2 => (2 - r, 2 - c), // rotate 180
        3 => (c, 2 - r),     // rotate left
        4 => (c, r),         // transpose
        5 => (2 - c, 2 - r), // anti-transpose
        6 => (r, 2 - c),     // mirror left-right
        7 => (2 - r, c),     // mirror top-bottom
        _ => (r, c),
    };
    sr * 3 + sc
}

/// A Tic-Tac-Toe position. Player 0 plays `O` and moves first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicTacToeState {
    board: [Option<PlayerId>; CELLS],
    turn: usize,
    winner: Option<PlayerId>,
    history: Vec<Action>,
}

impl Default for TicTacToeState {
    fn default() -> Self {
        Self::new()
    }
}

impl TicTacToeState {
    /// Empty board.
    pub fn new() -> Self {
        Self {
            board: [None; CELLS],
            turn: 0,
            winner: None,
            history: Vec::new(),
        }
    }

    /// Actions played so far.
    pub fn history(&self) -> &[Action] {
        &self.history
    }

    /// Whether `player` owns a full line.
    pub fn has_line(&self, player: PlayerId) -> bool {
        LINES
            .iter()
            .any(|line| line.iter().all(|&cell| self.board[cell] == Some(player)))
    }

    /// Empty cells that would complete a line for `player`.
    fn winning_cells(&self, player: PlayerId) -> Vec<usize> {
        let mut cells: Vec<usize> = LINES
            .iter()
            .filter_map(|line| {
                let owned = line.iter().filter(|&&c| self.board[c] == Some(player)).count();
                let empty: Vec<_> = line.iter().copied().filter(|&c| self.board[c].is_none()).collect();
                (owned == 2 && empty.len() == 1).then(|| empty[0])
            })
            .collect();
        cells.sort_unstable();
        cells.dedup();
        cells
    }
}

impl State for TicTacToeState {
    fn current_player(&self) -> PlayerId {
        PlayerId::new((self.turn % 2) as u8)
    }

    fn legal_actions(&self) -> Vec<Action> {
        if self.is_terminal() {
            return Vec::new();
        }
        (0..CELLS).filter(|&cell| self.board[cell].is_none()).collect()
    }

    fn apply_action(&mut self, action: Action) {
        debug_assert!(action < CELLS && self.board[action].is_none(), "illegal action {action}");
        let player = self.current_player();
        self.board[action] = Some(player);
        self.turn += 1;
        if self.has_line(player) {
            self.winner = Some(player);
        }
        self.history.push(action);
    }

    fn is_terminal(&self) -> bool {
        self.turn == CELLS || self.winner.is_some()
    }

    fn winner(&self) -> Option<PlayerId> {
        self.winner
    }

    fn returns(&self) -> Vec<f32> {
        match self.winner {
            Some(player) => player.win_returns(PlayerId::COUNT),
            None => vec![0.0; PlayerId::COUNT],
        }
    }

    fn observation_tensor(&self) -> Vec<f32> {
        let mut tensor = Vec::with_capacity(PLANES * CELLS);
        for owner in [Some(PlayerId::new(0)), Some(PlayerId::new(1)), None] {
            tensor.extend(self.board.iter().map(|&cell| f32::from(u8::from(cell == owner))));
        }
        let to_move = self.current_player().index() as f32;
        tensor.extend(std::iter::repeat(to_move).take(CELLS));
        tensor
    }

    fn clone_box(&self) -> Box<dyn State> {
        Box::new(self.clone())
    }

    fn serialize(&self) -> String {
        self.history
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn fingerprint(&self) -> u64 {
        self.board.iter().rev().fold(0u64, |acc, cell| {
            let digit = match cell {
                None => 0,
                Some(player) => player.index() as u64 + 1,
            };
            acc * 3 + digit
        })
    }

    fn check_can_block(&self) -> bool {
        if self.is_terminal() {
            return true;
        }
        let mover = self.current_player();
        if !self.winning_cells(mover).is_empty() {
            return true;
        }
        self.winning_cells(mover.opponent()).len() < 2
    }
}

impl fmt::Display for TicTacToeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..3 {
            let line: String = (0..3)
                .map(|col| match self.board[row * 3 + col] {
                    Some(PlayerId(0)) => 'O',
                    Some(_) => 'X',
                    None => '.',
                })
                .collect();
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// The Tic-Tac-Toe game description.
#[derive(Clone, Copy, Debug, Default)]
pub struct TicTacToe;

impl TicTacToe {
    /// Registry name.
    pub const NAME: &'static str = "tic_tac_toe";

    fn transform_plane(plane: &[f32], transformation: usize) -> Vec<f32> {
        (0..CELLS).map(|i| plane[source_cell(transformation, i)]).collect()
    }
}

impl Game for TicTacToe {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn num_distinct_actions(&self) -> usize {
        CELLS
    }

    fn observation_shape(&self) -> Vec<usize> {
        vec![PLANES, 3, 3]
    }

    fn new_initial_state(&self) -> Box<dyn State> {
        Box::new(TicTacToeState::new())
    }

    fn deserialize_state(&self, input: &str) -> Result<Box<dyn State>> {
        let mut state = TicTacToeState::new();
        for token in input.split_whitespace() {
            let action: Action = token.parse().map_err(|_| EngineError::Deserialize {
                input: input.to_string(),
                message: format!("'{token}' is not an action"),
            })?;
            if !state.legal_actions().contains(&action) {
                return Err(EngineError::Deserialize {
                    input: input.to_string(),
                    message: format!("action {action} is illegal at ply {}", state.turn),
                });
            }
            state.apply_action(action);
        }
        Ok(Box::new(state))
    }

    fn num_transformations(&self) -> usize {
        8
    }

    fn transform_observation(&self, observation: &[f32], transformation: usize) -> Vec<f32> {
        observation
            .chunks(CELLS)
            .flat_map(|plane| Self::transform_plane(plane, transformation))
            .collect()
    }

    fn restore_policy(&self, policy: &[f32], transformation: usize) -> Vec<f32> {
        let mut restored = vec![0.0; CELLS];
        for (i, &p) in policy.iter().take(CELLS).enumerate() {
            restored[source_cell(transformation, i)] = p;
        }
        restored
    }

    fn action_to_string(&self, action: Action) -> String {
        format!("({}, {})", action / 3, action % 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(actions: &[Action]) -> TicTacToeState {
        let mut state = TicTacToeState::new();
        for &a in actions {
            state.apply_action(a);
        }
        state
    }

    #[test]
    fn test_initial_state() {
        let state = TicTacToeState::new();
        assert_eq!(state.current_player(), PlayerId::new(0));
        assert_eq!(state.legal_actions().len(), 9);
        assert!(!state.is_terminal());
        assert_eq!(state.returns(), vec![0.0, 0.0]);
        assert_eq!(state.fingerprint(), 0);
    }

    #[test]
    fn test_row_win() {
        let state = play(&[0, 3, 1, 4, 2]);
        assert!(state.is_terminal());
        assert_eq!(state.winner(), Some(PlayerId::new(0)));
        assert_eq!(state.returns(), vec![1.0, -1.0]);
        assert!(state.legal_actions().is_empty());
    }

    #[test]
    fn test_draw() {
        let state = play(&[0, 1, 2, 4, 3, 5, 7, 6, 8]);
        assert!(state.is_terminal());
        assert_eq!(state.winner(), None);
        assert_eq!(state.returns(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_fingerprint_distinguishes_owners() {
        let a = play(&[0, 1]);
        let b = play(&[1, 0]);
        assert_ne!(a.fingerprint(), b.fingerprint());

        // Transposed move orders reach the same position
        let c = play(&[0, 4, 8]);
        let d = play(&[8, 4, 0]);
        assert_eq!(c.fingerprint(), d.fingerprint());
    }

    #[test]
    fn test_observation_planes() {
        let state = play(&[4]);
        let obs = state.observation_tensor();
        assert_eq!(obs.len(), 36);
        assert_eq!(obs[4], 1.0); // O plane
        assert_eq!(obs[9 + 4], 0.0); // X plane
        assert_eq!(obs[18 + 4], 0.0); // empty plane
        assert_eq!(obs[18], 1.0);
        assert!(obs[27..].iter().all(|&v| v == 1.0)); // X to move
    }

    #[test]
    fn test_serialize_roundtrip() {
        let state = play(&[4, 0, 8]);
        let text = state.serialize();
        assert_eq!(text, "4 0 8");

        let restored = TicTacToe.deserialize_state(&text).unwrap();
        assert_eq!(restored.fingerprint(), state.fingerprint());
        assert_eq!(restored.legal_actions(), state.legal_actions());
    }

    #[test]
    fn test_deserialize_rejects_illegal() {
        assert!(TicTacToe.deserialize_state("4 4").is_err());
        assert!(TicTacToe.deserialize_state("x").is_err());
        assert!(TicTacToe.deserialize_state("").is_ok());
    }

    #[test]
    fn test_restore_inverts_transform() {
        let policy: Vec<f32> = (0..9).map(|i| i as f32).collect();
        for t in 0..8 {
            let transformed = TicTacToe::transform_plane(&policy, t);
            assert_eq!(TicTacToe.restore_policy(&transformed, t), policy, "transformation {t}");
        }
    }

    #[test]
    fn test_transforms_are_distinct() {
        let plane: Vec<f32> = (0..9).map(|i| i as f32).collect();
        let mut images: Vec<Vec<f32>> = (0..8).map(|t| TicTacToe::transform_plane(&plane, t)).collect();
        images.sort_by(|a, b| a.partial_cmp(b).unwrap());
        images.dedup();
        assert_eq!(images.len(), 8);
    }

    #[test]
    fn test_check_can_block() {
        // O holds 0 and 4 and 2; X cannot stop both 1-line and diagonal threats
        let fork = play(&[0, 3, 4, 8, 2]);
        assert_eq!(fork.current_player(), PlayerId::new(1));
        assert!(!fork.check_can_block());

        // A single threat can be blocked
        let single = play(&[0, 3, 1]);
        assert!(single.check_can_block());
    }
}
