use std::io::{self, BufRead};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::engine::{self, EngineShared, SearchJob};
use crate::eval;
use crate::movegen::{self, MoveList};
use crate::nnue::{Accumulator, NnueWeights};
use crate::perft;
use crate::search::{Value, IDLE, RUNNING, STOP_PENDING, VALUE_MATE, VALUE_MATE_IN_MAX_PLY};
use crate::state::{GameState, Move, START_FEN};
use crate::time::SearchLimits;

pub fn square_name(sq: u8) -> String {
    let file = (b'a' + sq % 8) as char;
    let rank = (b'1' + sq / 8) as char;
    format!("{}{}", file, rank)
}

pub fn format_move(mv: Move) -> String {
    let mut s = format!("{}{}", square_name(mv.source()), square_name(mv.target()));
    if let Some(promo) = mv.promotion() {
        s.push(match promo % 6 {
            crate::state::Q => 'q',
            crate::state::R => 'r',
            crate::state::B => 'b',
            _ => 'n',
        });
    }
    s
}

/// `cp V`, or `mate N` counted in moves once inside the mate band.
pub fn format_value(value: Value) -> String {
    if value >= VALUE_MATE_IN_MAX_PLY {
        format!("mate {}", (VALUE_MATE - value + 1) / 2)
    } else if value <= -VALUE_MATE_IN_MAX_PLY {
        format!("mate -{}", (VALUE_MATE + value + 1) / 2)
    } else {
        format!("cp {}", value)
    }
}

fn square_from_str(s: &str) -> Option<u8> {
    let bytes = s.as_bytes();
    if bytes.len() != 2 {
        return None;
    }
    if !(b'a'..=b'h').contains(&bytes[0]) || !(b'1'..=b'8').contains(&bytes[1]) {
        return None;
    }
    Some((bytes[1] - b'1') * 8 + (bytes[0] - b'a'))
}

/// Match coordinate notation against the generated move list, so the
/// engine's own encoding (including the capture flag) is what gets played.
pub fn parse_move(state: &GameState, move_str: &str) -> Option<Move> {
    if move_str.len() < 4 {
        return None;
    }
    let src = square_from_str(&move_str[0..2])?;
    let tgt = square_from_str(&move_str[2..4])?;
    let promo = move_str.chars().nth(4).and_then(|c| match c {
        'q' => Some(crate::state::Q),
        'r' => Some(crate::state::R),
        'b' => Some(crate::state::B),
        'n' => Some(crate::state::N),
        _ => None,
    });

    let mut list = MoveList::new();
    movegen::get_pseudo_legal_moves(state, &mut list);

    for i in 0..list.count {
        let mv = list.moves[i];
        if mv.source() == src && mv.target() == tgt && mv.promotion() == promo {
            return Some(mv);
        }
    }
    None
}

pub fn uci_loop(net: Arc<NnueWeights>) {
    let shared = EngineShared::new();
    let worker = engine::spawn_worker(net.clone(), shared.clone());

    let mut game_state = GameState::parse_fen(START_FEN);
    let mut key_history: Vec<u64> = Vec::new();

    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        match stdin.lock().read_line(&mut buffer) {
            Ok(0) => break,
            Ok(_) => {}
            Err(_) => break,
        }

        let cmd = buffer.trim();
        if cmd.is_empty() {
            continue;
        }
        let parts: Vec<&str> = cmd.split_whitespace().collect();

        match parts[0] {
            "uci" => {
                println!("id name Aurora");
                println!("id author the Aurora developers");
                println!("option name Hash type spin default {} min 1 max 32768", engine::DEFAULT_HASH_MB);
                println!("uciok");
            }
            "isready" => println!("readyok"),
            "ucinewgame" => {
                wait_until_idle(&shared);
                shared.config.lock().unwrap().clear = true;
                game_state = GameState::parse_fen(START_FEN);
                key_history.clear();
            }
            "position" => {
                handle_position(&mut game_state, &mut key_history, &parts);
            }
            "go" => {
                wait_until_idle(&shared);
                let limits = parse_go(&parts);
                *shared.job.lock().unwrap() = Some(SearchJob {
                    position: game_state,
                    history: key_history.clone(),
                    limits,
                });
                shared.search_state.store(RUNNING, Ordering::Release);
            }
            "stop" => {
                request_stop(&shared);
            }
            "setoption" => {
                if parts.len() >= 5 && parts[1] == "name" && parts[2] == "Hash" && parts[3] == "value" {
                    if let Ok(mb) = parts[4].parse::<usize>() {
                        shared.config.lock().unwrap().hash_mb = Some(mb.clamp(1, 32768));
                    }
                }
            }
            "perft" => {
                let depth: u8 = parts.get(1).and_then(|d| d.parse().ok()).unwrap_or(5);
                let start = Instant::now();
                let nodes = perft::perft(&game_state, depth);
                let elapsed = start.elapsed().as_millis().max(1);
                println!(
                    "info string perft({}) = {} nodes in {}ms ({} nps)",
                    depth,
                    nodes,
                    elapsed,
                    nodes as u128 * 1000 / elapsed
                );
            }
            "eval" => {
                let mut acc = Accumulator::new();
                game_state.refresh_accumulator(&mut acc, &net);
                let v = eval::evaluate(&game_state, &acc, &net);
                println!("info string static eval {}", format_value(v));
            }
            "quit" => break,
            _ => {}
        }
    }

    request_stop(&shared);
    shared.quit.store(true, Ordering::Release);
    let _ = worker.join();
}

fn request_stop(shared: &EngineShared) {
    let _ = shared.search_state.compare_exchange(
        RUNNING,
        STOP_PENDING,
        Ordering::AcqRel,
        Ordering::Acquire,
    );
}

fn wait_until_idle(shared: &EngineShared) {
    while shared.search_state.load(Ordering::Acquire) != IDLE {
        thread::sleep(Duration::from_millis(1));
    }
}

fn handle_position(state: &mut GameState, key_history: &mut Vec<u64>, parts: &[&str]) {
    if parts.len() < 2 {
        return;
    }

    let mut move_index = 0;
    if parts[1] == "startpos" {
        *state = GameState::parse_fen(START_FEN);
        if parts.len() > 2 && parts[2] == "moves" {
            move_index = 3;
        }
    } else if parts[1] == "fen" {
        let mut fen = String::new();
        let mut i = 2;
        while i < parts.len() && parts[i] != "moves" {
            fen.push_str(parts[i]);
            fen.push(' ');
            i += 1;
        }
        *state = GameState::parse_fen(&fen);
        if i < parts.len() && parts[i] == "moves" {
            move_index = i + 1;
        }
    } else {
        return;
    }

    key_history.clear();
    if move_index > 0 {
        for move_str in &parts[move_index..] {
            if let Some(mv) = parse_move(state, move_str) {
                key_history.push(state.hash);
                state.do_move(mv, None);
            }
        }
    }
}

fn parse_go(parts: &[&str]) -> SearchLimits {
    let mut limits = SearchLimits::new();
    limits.start_time = Instant::now();

    let mut i = 1;
    while i < parts.len() {
        let arg = parts.get(i + 1).copied().unwrap_or("");
        match parts[i] {
            "wtime" => {
                limits.time[0] = arg.parse().unwrap_or(0);
                i += 1;
            }
            "btime" => {
                limits.time[1] = arg.parse().unwrap_or(0);
                i += 1;
            }
            "winc" => {
                limits.inc[0] = arg.parse().unwrap_or(0);
                i += 1;
            }
            "binc" => {
                limits.inc[1] = arg.parse().unwrap_or(0);
                i += 1;
            }
            "movestogo" => {
                limits.moves_to_go = arg.parse().unwrap_or(0);
                i += 1;
            }
            "movetime" => {
                limits.movetime = arg.parse().unwrap_or(0);
                i += 1;
            }
            "depth" => {
                limits.depth = arg.parse().unwrap_or(0);
                i += 1;
            }
            "nodes" => {
                limits.nodes = arg.parse().unwrap_or(0);
                i += 1;
            }
            "infinite" => limits.infinite = true,
            _ => {}
        }
        i += 1;
    }
    limits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_attack_tables();
    }

    #[test]
    fn value_formatting() {
        assert_eq!(format_value(35), "cp 35");
        assert_eq!(format_value(-121), "cp -121");
        assert_eq!(format_value(VALUE_MATE - 1), "mate 1");
        assert_eq!(format_value(VALUE_MATE - 3), "mate 2");
        assert_eq!(format_value(-(VALUE_MATE - 2)), "mate -1");
    }

    #[test]
    fn move_formatting_round_trips_through_parsing() {
        init();
        let state = GameState::parse_fen(START_FEN);
        let mv = parse_move(&state, "e2e4").unwrap();
        assert_eq!(format_move(mv), "e2e4");
        assert!(parse_move(&state, "e2e5").is_none());
        assert!(parse_move(&state, "xyzw").is_none());

        let state = GameState::parse_fen("8/P7/8/8/8/8/k6K/8 w - - 0 1");
        let mv = parse_move(&state, "a7a8q").unwrap();
        assert_eq!(mv.promotion(), Some(crate::state::Q));
        assert_eq!(format_move(mv), "a7a8q");
    }

    #[test]
    fn position_command_tracks_key_history() {
        init();
        let mut state = GameState::parse_fen(START_FEN);
        let mut history = Vec::new();

        let cmd = ["position", "startpos", "moves", "e2e4", "e7e5", "g1f3"];
        handle_position(&mut state, &mut history, &cmd);

        assert_eq!(history.len(), 3);
        assert_eq!(state.fullmove_number, 2);
        // First recorded key is the start position's own hash.
        assert_eq!(history[0], GameState::parse_fen(START_FEN).hash);
    }

    #[test]
    fn go_parsing_fills_limits() {
        let cmd = [
            "go", "wtime", "60000", "btime", "58000", "winc", "1000", "binc", "900", "depth", "20",
        ];
        let limits = parse_go(&cmd);
        assert_eq!(limits.time, [60000, 58000]);
        assert_eq!(limits.inc, [1000, 900]);
        assert_eq!(limits.depth, 20);
        assert!(limits.has_time_limit());

        let limits = parse_go(&["go", "infinite"]);
        assert!(!limits.has_time_limit());
    }
}
