#![allow(non_upper_case_globals)]

use crate::nnue::{self, Accumulator, NnueWeights};
use crate::search::{Value, VALUE_TB_LOSS_IN_MAX_PLY, VALUE_TB_WIN_IN_MAX_PLY};
use crate::state::{b, n, q, r, GameState, B, N, Q, R};

/// Map the raw network output to a search score: scale by remaining
/// material phase, taper toward zero as the 50-move counter climbs, and
/// keep the result clear of the guaranteed win/loss bands.
pub fn evaluate(state: &GameState, acc: &Accumulator, net: &NnueWeights) -> Value {
    let mut score = nnue::evaluate(acc, state.side_to_move, net);

    let phase = 3 * (state.bitboards[N] | state.bitboards[n]).count_bits() as i32
        + 3 * (state.bitboards[B] | state.bitboards[b]).count_bits() as i32
        + 5 * (state.bitboards[R] | state.bitboards[r]).count_bits() as i32
        + 10 * (state.bitboards[Q] | state.bitboards[q]).count_bits() as i32;

    score = score * (206 + phase) / 256;

    score = score * (200 - state.halfmove_clock as i32) / 200;

    score.clamp(VALUE_TB_LOSS_IN_MAX_PLY + 1, VALUE_TB_WIN_IN_MAX_PLY - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::START_FEN;

    #[test]
    fn evaluation_stays_inside_tb_bounds() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_attack_tables();

        let mut net = NnueWeights::zeroed();
        net.output_bias = i16::MAX;

        let state = GameState::parse_fen(START_FEN);
        let mut acc = Accumulator::new();
        state.refresh_accumulator(&mut acc, &net);

        let v = evaluate(&state, &acc, &net);
        assert!(v > VALUE_TB_LOSS_IN_MAX_PLY);
        assert!(v < VALUE_TB_WIN_IN_MAX_PLY);
    }

    #[test]
    fn evaluation_tapers_with_halfmove_clock() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_attack_tables();

        let mut net = NnueWeights::zeroed();
        net.output_bias = 4000; // 100 after the output divisor

        let mut state = GameState::parse_fen(START_FEN);
        let mut acc = Accumulator::new();
        state.refresh_accumulator(&mut acc, &net);

        let fresh = evaluate(&state, &acc, &net);
        state.halfmove_clock = 90;
        let stale = evaluate(&state, &acc, &net);
        assert!(stale < fresh);
        assert!(stale > 0);
    }
}
