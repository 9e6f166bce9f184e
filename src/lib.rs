pub mod bitboard;
pub mod engine;
pub mod eval;
pub mod history;
pub mod logging;
pub mod movegen;
pub mod nnue;
pub mod parameters;
pub mod perft;
pub mod search;
pub mod state;
pub mod time;
pub mod tt;
pub mod uci;
pub mod zobrist;

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::AtomicU8;
use std::sync::Arc;

use nnue::NnueWeights;
use search::{Searcher, RUNNING};

const DEFAULT_EVAL_FILE: &str = "aurora.nnue";

pub fn run_cli() {
    logging::init_logging();

    zobrist::init_zobrist();
    bitboard::init_attack_tables();

    let args: Vec<String> = env::args().collect();
    if args.len() > 1 {
        match args[1].as_str() {
            "perft" => {
                perft::run_perft_suite();
                return;
            }
            "bench" => {
                run_bench();
                return;
            }
            _ => {}
        }
    }

    let net = Arc::new(load_network_or_exit());
    uci::uci_loop(net);
}

/// The weights file sits next to the binary or in the working directory;
/// AURORA_EVALFILE overrides both.
fn resolve_network_path() -> PathBuf {
    if let Ok(path) = env::var("AURORA_EVALFILE") {
        return PathBuf::from(path);
    }
    let path = PathBuf::from(DEFAULT_EVAL_FILE);
    if path.exists() {
        return path;
    }
    if let Ok(exe_path) = env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let alt_path = exe_dir.join(DEFAULT_EVAL_FILE);
            if alt_path.exists() {
                return alt_path;
            }
        }
    }
    path
}

fn load_network_or_exit() -> NnueWeights {
    let path = resolve_network_path();
    match NnueWeights::load(&path) {
        Ok(net) => {
            log::info!("NNUE weights loaded from {}", path.display());
            net
        }
        Err(err) => {
            eprintln!(
                "fatal: cannot load NNUE weights from {}: {}",
                path.display(),
                err
            );
            log::error!("NNUE load failed: {}", err);
            process::exit(1);
        }
    }
}

/// Fixed-depth searches over a couple of reference positions; prints total
/// nodes and nps. Uses the real network when available so numbers are
/// comparable across runs, an empty one otherwise.
fn run_bench() {
    let net = match NnueWeights::load(&resolve_network_path()) {
        Ok(net) => Arc::new(net),
        Err(_) => {
            println!("info string bench running without weights");
            Arc::new(NnueWeights::zeroed())
        }
    };

    let positions = [
        state::START_FEN,
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
    ];

    let search_state = Arc::new(AtomicU8::new(RUNNING));
    let mut searcher = Searcher::new(net, 16, search_state);
    searcher.printing_enabled = false;

    let start = std::time::Instant::now();
    let mut total_nodes = 0u64;

    for fen in positions {
        searcher.new_game();
        searcher.set_position(state::GameState::parse_fen(fen), Vec::new());
        searcher.limits = time::SearchLimits::new();
        searcher.limits.depth = 12;
        searcher.start_search();
        total_nodes += searcher.nodes();
        println!(
            "bench position done: {} nodes, best {}",
            searcher.nodes(),
            uci::format_move(searcher.last_best_move)
        );
    }

    let elapsed = start.elapsed();
    println!("===========================");
    println!("total nodes: {}", total_nodes);
    println!(
        "nps: {}",
        (total_nodes as f64 / elapsed.as_secs_f64().max(0.001)) as u64
    );
}
