//! Serialized positions and trajectories.

use proptest::prelude::*;

use rust_vlzero::core::{GameRng, PlayerId};
use rust_vlzero::game::{Game, State};
use rust_vlzero::games::TicTacToe;
use rust_vlzero::training::{Ply, Trajectory};

/// Random playout of up to `moves` moves.
fn random_state(seed: u64, moves: usize) -> Box<dyn State> {
    let mut rng = GameRng::new(seed);
    let mut state = TicTacToe.new_initial_state();
    for _ in 0..moves {
        let actions = state.legal_actions();
        if actions.is_empty() {
            break;
        }
        state.apply_action(actions[rng.gen_index(actions.len())]);
    }
    state
}

proptest! {
    #[test]
    fn test_serialized_state_reloads(seed in any::<u64>(), moves in 0usize..10) {
        let state = random_state(seed, moves);
        let reloaded = TicTacToe.deserialize_state(&state.serialize()).unwrap();

        prop_assert_eq!(reloaded.legal_actions(), state.legal_actions());
        prop_assert_eq!(reloaded.fingerprint(), state.fingerprint());
        prop_assert_eq!(reloaded.current_player(), state.current_player());
        prop_assert_eq!(reloaded.winner(), state.winner());
        prop_assert_eq!(reloaded.observation_tensor(), state.observation_tensor());
    }

    #[test]
    fn test_symmetry_restores_policy(transformation in 0usize..8, cell in 0usize..9) {
        let game = TicTacToe;
        let mut policy = vec![0.0f32; 9];
        policy[cell] = 1.0;

        // A one-hot board plane maps the same way as a one-hot policy.
        let mut observation = vec![0.0f32; 36];
        observation[cell] = 1.0;
        let transformed = game.transform_observation(&observation, transformation);
        let restored = game.restore_policy(&transformed[..9], transformation);
        prop_assert_eq!(restored, policy);
    }
}

#[test]
fn test_trajectory_bytes_keep_optional_fields() {
    let state = random_state(1, 2);
    let mut trajectory = Trajectory::new();
    trajectory.push(Ply {
        player: PlayerId::new(0),
        action: 4,
        value: 0.25,
        policy: vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        observation: Some(state.observation_tensor()),
        serialized_state: Some(state.serialize()),
    });
    trajectory.set_returns(vec![-1.0, 1.0]);

    let bytes = trajectory.to_bytes().unwrap();
    let decoded = Trajectory::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, trajectory);

    let samples = decoded.to_training_samples(&TicTacToe.observation_shape());
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].value, -1.0);
}

#[test]
fn test_garbage_bytes_are_rejected() {
    assert!(Trajectory::from_bytes(&[0xff, 0x01]).is_err());
}
