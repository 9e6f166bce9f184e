use rand::Rng;

use aurora::movegen::{self, MoveList};
use aurora::nnue::{Accumulator, NnueWeights};
use aurora::state::{GameState, NO_PIECE, START_FEN};

fn init() {
    aurora::zobrist::init_zobrist();
    aurora::bitboard::init_attack_tables();
}

fn patterned_net() -> NnueWeights {
    let mut net = NnueWeights::zeroed();
    for (i, w) in net.feature_weights.iter_mut().enumerate() {
        *w = ((i * 11 + 5) % 19) as i16 - 9;
    }
    for (i, bias) in net.feature_biases.iter_mut().enumerate() {
        *bias = (i % 13) as i16 - 6;
    }
    net
}

fn assert_board_bitboard_consistency(state: &GameState) {
    for sq in 0..64u8 {
        let piece = state.board[sq as usize] as usize;
        if piece == NO_PIECE {
            assert!(
                !state.occupancies[2].get_bit(sq),
                "mailbox empty but occupancy set on {}",
                sq
            );
        } else {
            assert!(
                state.bitboards[piece].get_bit(sq),
                "mailbox piece {} missing from bitboard on {}",
                piece,
                sq
            );
        }
    }
}

/// Random walk through legal moves, continuously cross-checking the
/// incremental state against from-scratch recomputation: hash, mailbox vs
/// bitboards, FEN round trip, and the NNUE accumulator deltas.
#[test]
fn random_walk_keeps_incremental_state_consistent() {
    init();
    let net = patterned_net();

    let mut state = GameState::parse_fen(START_FEN);
    let mut acc = Accumulator::new();
    state.refresh_accumulator(&mut acc, &net);

    let mut rng = rand::rng();

    for step in 0..3000 {
        let mut list = MoveList::new();
        movegen::get_pseudo_legal_moves(&state, &mut list);

        let legal: Vec<_> = (0..list.count)
            .map(|i| list.moves[i])
            .filter(|&mv| state.is_legal(mv))
            .collect();

        if legal.is_empty() || state.halfmove_clock >= 100 {
            state = GameState::parse_fen(START_FEN);
            state.refresh_accumulator(&mut acc, &net);
            continue;
        }

        let mv = legal[rng.random_range(0..legal.len())];
        state.do_move(mv, Some((&mut acc, &net)));

        // Incremental hash equals a from-scratch one
        let mut rehashed = state;
        rehashed.compute_hash();
        assert_eq!(state.hash, rehashed.hash, "hash divergence at step {}", step);

        assert_board_bitboard_consistency(&state);

        if step % 64 == 0 {
            let mut fresh = Accumulator::new();
            state.refresh_accumulator(&mut fresh, &net);
            assert_eq!(acc, fresh, "accumulator divergence at step {}", step);
        }

        if step % 128 == 0 {
            let reparsed = GameState::parse_fen(&state.to_fen());
            assert_eq!(reparsed, state, "FEN round-trip divergence at step {}", step);
        }
    }
}
