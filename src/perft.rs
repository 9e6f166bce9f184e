use std::time::Instant;

use crate::movegen::{self, MoveList};
use crate::state::GameState;
use crate::uci;

/// Legal move path count via make-then-check over pseudo-legal moves.
pub fn perft(state: &GameState, depth: u8) -> u64 {
    if depth == 0 {
        return 1;
    }

    let mut list = MoveList::new();
    movegen::get_pseudo_legal_moves(state, &mut list);

    if depth == 1 {
        let mut n = 0;
        for i in 0..list.count {
            if state.is_legal(list.moves[i]) {
                n += 1;
            }
        }
        return n;
    }

    let mut nodes = 0;
    for i in 0..list.count {
        let mv = list.moves[i];
        if !state.is_legal(mv) {
            continue;
        }
        let mut next = *state;
        next.do_move(mv, None);
        nodes += perft(&next, depth - 1);
    }
    nodes
}

pub fn perft_divide(state: &GameState, depth: u8) {
    println!("--- perft divide, depth {} ---", depth);
    let mut list = MoveList::new();
    movegen::get_pseudo_legal_moves(state, &mut list);

    let mut total = 0;
    for i in 0..list.count {
        let mv = list.moves[i];
        if !state.is_legal(mv) {
            continue;
        }
        let mut next = *state;
        next.do_move(mv, None);
        let count = perft(&next, depth - 1);
        println!("{}: {}", uci::format_move(mv), count);
        total += count;
    }
    println!("total: {}", total);
}

pub fn run_perft_suite() {
    println!("--- Aurora perft suite ---");

    let positions: [(&str, &str, [u64; 6]); 5] = [
        (
            "start position",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            [1, 20, 400, 8902, 197281, 4865609],
        ),
        (
            "kiwipete",
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            [1, 48, 2039, 97862, 4085603, 193690690],
        ),
        (
            "position 3",
            "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
            [1, 14, 191, 2812, 43238, 674624],
        ),
        (
            "position 4",
            "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1",
            [1, 6, 264, 9467, 422333, 15833292],
        ),
        (
            "position 5",
            "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
            [1, 44, 1486, 62379, 2103487, 89941194],
        ),
    ];

    let mut total_nodes = 0u64;
    let mut total_time = 0u128;

    for (name, fen, expected) in positions.iter() {
        println!("\ntesting: {}", name);
        let state = GameState::parse_fen(fen);

        let depth = 5;
        let start = Instant::now();
        let nodes = perft(&state, depth as u8);
        let elapsed = start.elapsed().as_millis();

        total_nodes += nodes;
        total_time += elapsed;

        println!("depth {}: {} nodes in {}ms", depth, nodes, elapsed);
        if nodes == expected[depth] {
            println!("result: PASS");
        } else {
            println!("result: FAIL (expected {})", expected[depth]);
            perft_divide(&state, depth as u8);
        }
    }

    println!("\ntotal nodes: {}", total_nodes);
    println!("total time:  {}ms", total_time);
    if total_time > 0 {
        println!("nps:         {}", total_nodes as u128 * 1000 / total_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::START_FEN;

    fn init() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_attack_tables();
    }

    #[test]
    fn perft_startpos() {
        init();
        let state = GameState::parse_fen(START_FEN);
        assert_eq!(perft(&state, 1), 20);
        assert_eq!(perft(&state, 2), 400);
        assert_eq!(perft(&state, 3), 8902);
        assert_eq!(perft(&state, 4), 197281);
    }

    #[test]
    #[ignore = "slow; run with --ignored for the full count"]
    fn perft_startpos_depth_5() {
        init();
        let state = GameState::parse_fen(START_FEN);
        assert_eq!(perft(&state, 5), 4865609);
    }

    #[test]
    fn perft_kiwipete() {
        init();
        let state = GameState::parse_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        );
        assert_eq!(perft(&state, 1), 48);
        assert_eq!(perft(&state, 2), 2039);
        assert_eq!(perft(&state, 3), 97862);
    }

    #[test]
    #[ignore = "slow; run with --ignored for the full count"]
    fn perft_kiwipete_depth_4() {
        init();
        let state = GameState::parse_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        );
        assert_eq!(perft(&state, 4), 4085603);
    }

    #[test]
    fn perft_en_passant_and_promotion_position() {
        init();
        let state = GameState::parse_fen(
            "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1",
        );
        assert_eq!(perft(&state, 1), 6);
        assert_eq!(perft(&state, 2), 264);
        assert_eq!(perft(&state, 3), 9467);
    }

    #[test]
    fn perft_pins_and_checks_position() {
        init();
        let state = GameState::parse_fen("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1");
        assert_eq!(perft(&state, 1), 14);
        assert_eq!(perft(&state, 2), 191);
        assert_eq!(perft(&state, 3), 2812);
        assert_eq!(perft(&state, 4), 43238);
    }

    #[test]
    fn perft_castling_rights_position() {
        init();
        let state = GameState::parse_fen(
            "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
        );
        assert_eq!(perft(&state, 1), 44);
        assert_eq!(perft(&state, 2), 1486);
        assert_eq!(perft(&state, 3), 62379);
    }
}
