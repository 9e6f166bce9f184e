use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::nnue::NnueWeights;
use crate::search::{Searcher, IDLE, RUNNING};
use crate::state::GameState;
use crate::time::SearchLimits;

pub const DEFAULT_HASH_MB: usize = 64;

/// One `go` command's worth of work, handed from the UCI thread to the
/// worker under the mutex.
pub struct SearchJob {
    pub position: GameState,
    pub history: Vec<u64>,
    pub limits: SearchLimits,
}

/// Settings the worker applies between searches; the UCI thread never
/// touches the searcher itself.
#[derive(Default)]
pub struct EngineConfig {
    pub hash_mb: Option<usize>,
    pub clear: bool,
}

pub struct EngineShared {
    pub search_state: Arc<AtomicU8>,
    pub quit: AtomicBool,
    pub job: Mutex<Option<SearchJob>>,
    pub config: Mutex<EngineConfig>,
}

impl EngineShared {
    pub fn new() -> Arc<EngineShared> {
        Arc::new(EngineShared {
            search_state: Arc::new(AtomicU8::new(IDLE)),
            quit: AtomicBool::new(false),
            job: Mutex::new(None),
            config: Mutex::new(EngineConfig::default()),
        })
    }
}

/// The dedicated search worker. Owns the `Searcher` (transposition table,
/// histories, position stack) outright; spins on the shared state flag and
/// runs one search per RUNNING transition.
pub fn spawn_worker(net: Arc<NnueWeights>, shared: Arc<EngineShared>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("search_worker".into())
        .stack_size(32 * 1024 * 1024)
        .spawn(move || worker_loop(net, shared))
        .expect("failed to spawn search worker")
}

fn worker_loop(net: Arc<NnueWeights>, shared: Arc<EngineShared>) {
    let mut searcher = Searcher::new(net, DEFAULT_HASH_MB, shared.search_state.clone());

    loop {
        while shared.search_state.load(Ordering::Acquire) != RUNNING {
            if shared.quit.load(Ordering::Acquire) {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }

        {
            let mut config = shared.config.lock().unwrap();
            if let Some(mb) = config.hash_mb.take() {
                searcher.tt.resize(mb);
            }
            if config.clear {
                searcher.new_game();
                config.clear = false;
            }
        }

        let job = shared.job.lock().unwrap().take();
        match job {
            Some(job) => {
                searcher.set_position(job.position, job.history);
                searcher.limits = job.limits;
                // start_search parks the state back at IDLE when done
                searcher.start_search();
            }
            None => shared.search_state.store(IDLE, Ordering::Release),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::STOP_PENDING;
    use crate::state::START_FEN;

    #[test]
    fn worker_runs_one_search_and_goes_idle() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_attack_tables();

        let shared = EngineShared::new();
        let net = Arc::new(NnueWeights::zeroed());
        let handle = spawn_worker(net, shared.clone());

        let mut limits = SearchLimits::new();
        limits.depth = 3;
        *shared.job.lock().unwrap() = Some(SearchJob {
            position: GameState::parse_fen(START_FEN),
            history: Vec::new(),
            limits,
        });
        shared.search_state.store(RUNNING, Ordering::Release);

        let mut waited = 0;
        while shared.search_state.load(Ordering::Acquire) != IDLE && waited < 20_000 {
            thread::sleep(Duration::from_millis(1));
            waited += 1;
        }
        assert_eq!(shared.search_state.load(Ordering::Acquire), IDLE);

        shared.quit.store(true, Ordering::Release);
        handle.join().unwrap();
    }

    #[test]
    fn stop_pending_cancels_promptly() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_attack_tables();

        let shared = EngineShared::new();
        let net = Arc::new(NnueWeights::zeroed());
        let handle = spawn_worker(net, shared.clone());

        // No depth limit: only the stop flag can end this search.
        *shared.job.lock().unwrap() = Some(SearchJob {
            position: GameState::parse_fen(START_FEN),
            history: Vec::new(),
            limits: SearchLimits::new(),
        });
        shared.search_state.store(RUNNING, Ordering::Release);
        thread::sleep(Duration::from_millis(50));
        shared.search_state.store(STOP_PENDING, Ordering::Release);

        let mut waited = 0;
        while shared.search_state.load(Ordering::Acquire) != IDLE && waited < 20_000 {
            thread::sleep(Duration::from_millis(1));
            waited += 1;
        }
        assert_eq!(shared.search_state.load(Ordering::Acquire), IDLE);

        shared.quit.store(true, Ordering::Release);
        handle.join().unwrap();
    }
}
