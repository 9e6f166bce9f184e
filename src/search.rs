use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::eval;
use crate::history::{piece_to_slot, HistoryTables};
use crate::movegen::{self, MoveList};
use crate::nnue::{Accumulator, NnueWeights};
use crate::parameters::SearchParameters;
use crate::state::{GameState, Move, NO_PIECE, SEE_VALUES};
use crate::time::{self, SearchLimits};
use crate::tt::{TranspositionTable, FLAG_EXACT, FLAG_LOWER, FLAG_NONE, FLAG_UPPER};
use crate::uci;

pub type Value = i32;

pub const MAX_PLY: usize = 128;

pub const VALUE_DRAW: Value = 0;
pub const VALUE_MATE: Value = 32000;
pub const VALUE_NONE: Value = 32001;
pub const VALUE_INFINITE: Value = 32100;
pub const VALUE_MATE_IN_MAX_PLY: Value = VALUE_MATE - MAX_PLY as Value;
pub const VALUE_TB_WIN_IN_MAX_PLY: Value = VALUE_MATE_IN_MAX_PLY - MAX_PLY as Value;
pub const VALUE_TB_LOSS_IN_MAX_PLY: Value = -VALUE_TB_WIN_IN_MAX_PLY;

// Cross-thread search lifecycle; the only state the UCI thread touches
// while the worker runs.
pub const IDLE: u8 = 0;
pub const RUNNING: u8 = 1;
pub const STOP_PENDING: u8 = 2;

// Sentinel frames below the root so ss-4 is always readable.
const SS_OFFSET: usize = 4;
const STACK_SIZE: usize = MAX_PLY + SS_OFFSET + 2;

/// Compile-time node classification; gates about twenty behavioral
/// differences in `negamax` without runtime branching.
trait NodeType {
    const ROOT: bool;
    const PV: bool;
}

struct RootNode;
impl NodeType for RootNode {
    const ROOT: bool = true;
    const PV: bool = true;
}

struct PvNode;
impl NodeType for PvNode {
    const ROOT: bool = false;
    const PV: bool = true;
}

struct NonPvNode;
impl NodeType for NonPvNode {
    const ROOT: bool = false;
    const PV: bool = false;
}

#[derive(Clone, Copy)]
struct SearchFrame {
    static_eval: Value,
    played_move: Move,
    killers: [Move; 2],
    excluded_move: Move,
    /// Continuation-history arena slot of the move played to reach the
    /// frame below this one. Slot 0 after a null move.
    cont_slot: usize,
    pv: [Move; MAX_PLY],
    pv_length: usize,
}

impl Default for SearchFrame {
    fn default() -> Self {
        SearchFrame {
            static_eval: VALUE_NONE,
            played_move: Move::NONE,
            killers: [Move::NONE; 2],
            excluded_move: Move::NONE,
            cont_slot: 0,
            pv: [Move::NONE; MAX_PLY],
            pv_length: 0,
        }
    }
}

/// The search worker's whole world: live position, the snapshot stacks it
/// pushes and pops, the transposition table and histories it owns, and the
/// shared read-only network.
pub struct Searcher {
    pub position: GameState,
    pos_stack: Vec<GameState>,
    acc_stack: Vec<Accumulator>,
    stack: Vec<SearchFrame>,
    ply: usize,

    pub tt: TranspositionTable,
    pub history: HistoryTables,
    pub params: SearchParameters,
    net: Arc<NnueWeights>,

    pub limits: SearchLimits,
    search_state: Arc<AtomicU8>,

    nodes: u64,
    sel_depth: usize,
    root_depth: i32,
    root_color: usize,
    root_moves: MoveList,
    /// Zobrist keys of the game positions before the search root, oldest
    /// first; repetition detection walks from the stack into this.
    game_history: Vec<u64>,

    pub printing_enabled: bool,
    pub last_best_move: Move,
    pub last_score: Value,
}

const PROMOTION_SCORES: [i32; 6] = [0, 400000, -100001, -100000, 410000, 0];

#[inline(always)]
fn mvv_lva(captured: usize, attacker: usize) -> i32 {
    SEE_VALUES[captured % 6] * 100 - SEE_VALUES[attacker % 6]
}

#[inline(always)]
fn bound_for(fails_high: bool) -> u8 {
    if fails_high {
        FLAG_LOWER
    } else {
        FLAG_UPPER
    }
}

/// One selection-sort step over `[i, count)`: swap the best-scored
/// remaining move into slot `i` and return it. Cheap when a cutoff ends
/// the loop early.
fn next_best_move(moves: &mut MoveList, i: usize) -> (Move, i32) {
    let mut best = i;
    for j in (i + 1)..moves.count {
        if moves.scores[j] > moves.scores[best] {
            best = j;
        }
    }
    moves.moves.swap(i, best);
    moves.scores.swap(i, best);
    (moves.moves[i], moves.scores[i])
}

impl Searcher {
    pub fn new(net: Arc<NnueWeights>, hash_mb: usize, search_state: Arc<AtomicU8>) -> Searcher {
        Searcher {
            position: GameState::parse_fen(crate::state::START_FEN),
            pos_stack: vec![GameState::new(); MAX_PLY],
            acc_stack: vec![Accumulator::new(); MAX_PLY + 1],
            stack: vec![SearchFrame::default(); STACK_SIZE],
            ply: 0,
            tt: TranspositionTable::new(hash_mb),
            history: HistoryTables::new(),
            params: SearchParameters::default(),
            net,
            limits: SearchLimits::new(),
            search_state,
            nodes: 0,
            sel_depth: 0,
            root_depth: 0,
            root_color: 0,
            root_moves: MoveList::new(),
            game_history: Vec::new(),
            printing_enabled: true,
            last_best_move: Move::NONE,
            last_score: 0,
        }
    }

    pub fn set_position(&mut self, state: GameState, history: Vec<u64>) {
        self.position = state;
        self.game_history = history;
        self.ply = 0;
        self.position
            .refresh_accumulator(&mut self.acc_stack[0], &self.net);
    }

    /// `ucinewgame`: wipe everything learned from the previous game.
    pub fn new_game(&mut self) {
        self.tt.clear();
        self.history.clear();
    }

    pub fn nodes(&self) -> u64 {
        self.nodes
    }

    #[inline(always)]
    fn stopped(&self) -> bool {
        self.search_state.load(Ordering::Acquire) == STOP_PENDING
    }

    fn used_most_of_time(&self) -> bool {
        if self.limits.movetime > 0 {
            return self.limits.elapsed() + 10 >= self.limits.movetime;
        }
        // never use more than 70~80% of the clock
        let mut d = 0.7;
        if self.limits.inc[self.root_color] > 0 {
            d += 0.1;
        }
        self.limits.elapsed() as f64 >= d * self.limits.time[self.root_color] as f64 - 10.0
    }

    fn check_time(&self) {
        if !self.limits.has_time_limit() {
            return;
        }
        if self.used_most_of_time() {
            self.search_state.store(STOP_PENDING, Ordering::Release);
        }
    }

    #[inline(always)]
    fn make_draw_value(&self) -> Value {
        (self.nodes % 3) as Value - 1
    }

    fn play_move(&mut self, mv: Move, ss: usize) {
        self.nodes += 1;
        if self.nodes % 32768 == 0 {
            self.check_time();
        }

        self.stack[ss].cont_slot = piece_to_slot(&self.position, mv);
        self.stack[ss].played_move = mv;

        self.pos_stack[self.ply] = self.position;
        let parent_acc = self.acc_stack[self.ply];
        self.acc_stack[self.ply + 1] = parent_acc;
        self.ply += 1;

        self.position
            .do_move(mv, Some((&mut self.acc_stack[self.ply], &self.net)));
    }

    fn play_null_move(&mut self, ss: usize) {
        self.nodes += 1;
        if self.nodes % 32768 == 0 {
            self.check_time();
        }

        self.stack[ss].cont_slot = 0;
        self.stack[ss].played_move = Move::NONE;

        self.pos_stack[self.ply] = self.position;
        let parent_acc = self.acc_stack[self.ply];
        self.acc_stack[self.ply + 1] = parent_acc;
        self.ply += 1;

        self.position.do_null_move();
    }

    fn cancel_move(&mut self) {
        self.ply -= 1;
        self.position = self.pos_stack[self.ply];
    }

    /// Two occurrences of the same key, counting the current position, draw
    /// the game here. Walks same-parity ancestors through the search stack
    /// and on into the pre-root game history.
    fn is_2fold_repetition(&self) -> bool {
        if self.position.halfmove_clock < 4 {
            return false;
        }

        let key = self.position.hash;
        let history_len = self.game_history.len() as i32;

        let mut i = self.ply as i32 - 2;
        while i >= -history_len {
            let ancestor = if i >= 0 {
                self.pos_stack[i as usize].hash
            } else {
                self.game_history[(history_len + i) as usize]
            };
            if ancestor == key {
                return true;
            }
            i -= 2;
        }
        false
    }

    fn evaluate(&self) -> Value {
        eval::evaluate(&self.position, &self.acc_stack[self.ply], &self.net)
    }

    fn stat_bonus(&self, depth: i32) -> i32 {
        (self.params.stat_bonus_quad * depth * depth + self.params.stat_bonus_linear * depth)
            .min(self.params.stat_bonus_max)
    }

    fn history_score(&self, mv: Move, ss: usize) -> i32 {
        let mut score = self.history.main_get(self.position.side_to_move, mv);

        let slot = piece_to_slot(&self.position, mv);
        if !self.stack[ss - 1].played_move.is_null() {
            score += self.history.cont_get(self.stack[ss - 1].cont_slot, slot);
        }
        if !self.stack[ss - 2].played_move.is_null() {
            score += self.history.cont_get(self.stack[ss - 2].cont_slot, slot);
        }
        score
    }

    fn score_moves(&self, moves: &mut MoveList, tt_move: Move, ss: usize) {
        let killer0 = self.stack[ss].killers[0];
        let killer1 = self.stack[ss].killers[1];

        let prev_move = self.stack[ss - 1].played_move;
        let counter_move = if prev_move.is_null() {
            Move::NONE
        } else {
            let prev_sq = prev_move.target();
            self.history.counter_get(self.position.piece_on(prev_sq), prev_sq)
        };

        for i in 0..moves.count {
            let mv = moves.moves[i];
            let moved = self.position.piece_on(mv.source());
            let captured = self.position.piece_on(mv.target());

            moves.scores[i] = if mv == tt_move && !mv.is_null() {
                i32::MAX
            } else if let Some(pt) = mv.promotion() {
                PROMOTION_SCORES[pt] + SEE_VALUES[captured % 6] * (captured != NO_PIECE) as i32
            } else if mv.is_capture() && captured == NO_PIECE {
                // en passant
                300000 + mvv_lva(0, 0)
            } else if mv.is_capture() {
                if self.position.see_ge(mv, -50) {
                    300000 + mvv_lva(captured, moved)
                } else {
                    -200000 + mvv_lva(captured, moved)
                }
            } else if mv == killer0 {
                200001
            } else if mv == killer1 {
                200000
            } else if mv == counter_move {
                100000
            } else {
                self.history_score(mv, ss)
            };
        }
    }

    fn update_pv(&mut self, ss: usize, mv: Move) {
        let ply = self.ply;
        let (parents, children) = self.stack.split_at_mut(ss + 1);
        let frame = &mut parents[ss];
        let child = &children[0];

        frame.pv[ply] = mv;
        for i in (ply + 1)..child.pv_length {
            frame.pv[i] = child.pv[i];
        }
        frame.pv_length = child.pv_length;
    }

    fn update_histories(
        &mut self,
        depth: i32,
        best_move: Move,
        best_value: Value,
        beta: Value,
        quiets: &[Move],
        ss: usize,
    ) {
        let bonus = if best_value > beta + self.params.stat_bonus_boost_at {
            self.stat_bonus(depth + 1)
        } else {
            self.stat_bonus(depth)
        };

        let stm = self.position.side_to_move;
        let best_slot = piece_to_slot(&self.position, best_move);
        let prev_played = self.stack[ss - 1].played_move;
        let prev_slot = self.stack[ss - 1].cont_slot;
        let prev2_played = self.stack[ss - 2].played_move;
        let prev2_slot = self.stack[ss - 2].cont_slot;

        self.history.main_update(stm, best_move, bonus);
        if !prev_played.is_null() {
            self.history.cont_update(prev_slot, best_slot, bonus);
        }
        if !prev2_played.is_null() {
            self.history.cont_update(prev2_slot, best_slot, bonus);
        }

        for &other in quiets {
            if other == best_move {
                continue;
            }
            let other_slot = piece_to_slot(&self.position, other);
            self.history.main_update(stm, other, -bonus);
            if !prev_played.is_null() {
                self.history.cont_update(prev_slot, other_slot, -bonus);
            }
            if !prev2_played.is_null() {
                self.history.cont_update(prev2_slot, other_slot, -bonus);
            }
        }

        if !prev_played.is_null() {
            let prev_sq = prev_played.target();
            self.history
                .counter_set(self.position.piece_on(prev_sq), prev_sq, best_move);
        }

        if best_move != self.stack[ss].killers[0] {
            self.stack[ss].killers[1] = self.stack[ss].killers[0];
            self.stack[ss].killers[0] = best_move;
        }
    }

    fn qsearch<NT: NodeType>(&mut self, mut alpha: Value, beta: Value, ss: usize) -> Value {
        if self.position.halfmove_clock >= 100 {
            return self.make_draw_value();
        }

        if self.stopped() {
            return self.make_draw_value();
        }

        if self.ply >= MAX_PLY - 1 {
            return if self.position.in_check() {
                VALUE_DRAW
            } else {
                self.evaluate()
            };
        }

        let tt_data = self.tt.probe(self.position.hash, self.ply);
        let tt_flag = tt_data.map_or(FLAG_NONE, |d| d.flag);
        let tt_value = tt_data.map_or(VALUE_NONE, |d| d.value);
        let tt_move = tt_data.map_or(Move::NONE, |d| d.mv);

        if !NT::PV && tt_flag & bound_for(tt_value >= beta) != 0 {
            return tt_value;
        }

        let in_check = self.position.in_check();

        let mut best_move = Move::NONE;
        let mut best_value;

        if in_check {
            best_value = -VALUE_INFINITE;
            self.stack[ss].static_eval = VALUE_NONE;
        } else {
            best_value = match tt_data {
                Some(d) if d.static_eval != VALUE_NONE => d.static_eval,
                _ => self.evaluate(),
            };
            self.stack[ss].static_eval = best_value;

            if tt_flag & bound_for(tt_value > best_value) != 0 {
                best_value = tt_value;
            }

            if best_value >= beta {
                return best_value;
            }
            if best_value > alpha {
                alpha = best_value;
            }
        }

        let generate_all_moves = in_check;
        let mut moves = MoveList::new();
        if generate_all_moves {
            movegen::get_pseudo_legal_moves(&self.position, &mut moves);
        } else {
            movegen::get_aggressive_moves(&self.position, &mut moves);
        }
        self.score_moves(&mut moves, tt_move, ss);

        let mut found_legal_moves = false;

        for i in 0..moves.count {
            let (mv, move_score) = next_best_move(&mut moves, i);

            if !self.position.is_legal(mv) {
                continue;
            }

            found_legal_moves = true;

            // Once ordering reaches the bad captures, stop: standing pat
            // already bounds this node.
            if best_value > VALUE_TB_LOSS_IN_MAX_PLY
                && !generate_all_moves
                && move_score < -50000
            {
                break;
            }

            self.play_move(mv, ss);
            let value = -self.qsearch::<NT>(-beta, -alpha, ss + 1);
            self.cancel_move();

            if value > best_value {
                best_value = value;

                if best_value > alpha {
                    best_move = mv;

                    // Always true in NonPV nodes
                    if best_value >= beta {
                        break;
                    }
                    alpha = best_value;
                }
            }
        }

        if in_check && !found_legal_moves {
            return self.ply as Value - VALUE_MATE;
        }

        self.tt.store(
            self.position.hash,
            bound_for(best_value >= beta),
            0,
            best_move,
            best_value,
            self.stack[ss].static_eval,
            false,
            self.ply,
        );

        best_value
    }

    fn negamax<NT: NodeType>(
        &mut self,
        mut alpha: Value,
        mut beta: Value,
        mut depth: i32,
        cut_node: bool,
        ss: usize,
    ) -> Value {
        if NT::PV {
            self.stack[ss].pv_length = self.ply;
            if self.ply > self.sel_depth {
                self.sel_depth = self.ply;
            }
        }

        if self.stopped() {
            return self.make_draw_value();
        }

        self.stack[ss + 1].killers = [Move::NONE; 2];

        if !NT::ROOT {
            if self.is_2fold_repetition() || self.position.halfmove_clock >= 100 {
                return self.make_draw_value();
            }

            if self.ply >= MAX_PLY - 1 {
                return if self.position.in_check() {
                    VALUE_DRAW
                } else {
                    self.evaluate()
                };
            }

            // mate distance pruning
            alpha = alpha.max(self.ply as Value - VALUE_MATE);
            beta = beta.min(VALUE_MATE - self.ply as Value - 1);
            if alpha >= beta {
                return alpha;
            }
        }

        let excluded_move = self.stack[ss].excluded_move;

        let tt_data = self.tt.probe(self.position.hash, self.ply);
        let tt_hit = tt_data.is_some();
        let tt_flag = tt_data.map_or(FLAG_NONE, |d| d.flag);
        let tt_value = tt_data.map_or(VALUE_NONE, |d| d.value);
        let tt_depth = tt_data.map_or(0, |d| d.depth);
        let mut tt_move = tt_data.map_or(Move::NONE, |d| d.mv);
        let tt_move_noisy = !tt_move.is_null() && !self.position.is_quiet(tt_move);

        if NT::ROOT && tt_move.is_null() {
            tt_move = self.root_moves.moves[0];
        }

        let in_check = self.position.in_check();

        if in_check && !NT::ROOT {
            depth = (depth + 1).max(1);
        }

        if !NT::PV && excluded_move.is_null() && tt_depth >= depth {
            if tt_flag & bound_for(tt_value >= beta) != 0 {
                return tt_value;
            }
        }

        if depth <= 0 {
            return if NT::PV {
                self.qsearch::<PvNode>(alpha, beta, ss)
            } else {
                self.qsearch::<NonPvNode>(alpha, beta, ss)
            };
        }

        let mut eval_value = VALUE_NONE;
        let mut improving = false;

        if in_check {
            // skip every pre-move pruning idea while in check
            self.stack[ss].static_eval = VALUE_NONE;
        } else {
            if !excluded_move.is_null() {
                eval_value = self.stack[ss].static_eval;
            } else if tt_hit {
                let stored = tt_data.map_or(VALUE_NONE, |d| d.static_eval);
                eval_value = if stored != VALUE_NONE {
                    stored
                } else {
                    self.evaluate()
                };
                self.stack[ss].static_eval = eval_value;
            } else {
                eval_value = self.evaluate();
                self.stack[ss].static_eval = eval_value;
            }

            if tt_flag & bound_for(tt_value > eval_value) != 0 {
                eval_value = tt_value;
            }

            if self.stack[ss - 2].static_eval != VALUE_NONE {
                improving = self.stack[ss].static_eval > self.stack[ss - 2].static_eval;
            } else if self.stack[ss - 4].static_eval != VALUE_NONE {
                improving = self.stack[ss].static_eval > self.stack[ss - 4].static_eval;
            }

            // Razoring: hopeless static eval, confirm with a qsearch
            if eval_value < alpha - self.params.razoring_depth_mul * depth {
                let value = self.qsearch::<NonPvNode>(alpha - 1, alpha, ss);
                if value < alpha {
                    return value;
                }
            }

            // Reverse futility pruning
            if !NT::PV
                && depth < 9
                && eval_value.abs() < VALUE_TB_WIN_IN_MAX_PLY
                && eval_value >= beta
                && eval_value - self.params.rfp_depth_mul * (depth - improving as i32) >= beta
            {
                return eval_value;
            }

            // Null move pruning
            if !NT::PV
                && excluded_move.is_null()
                && !self.stack[ss - 1].played_move.is_null()
                && eval_value >= beta
                && self.position.has_non_pawns(self.position.side_to_move)
                && beta > VALUE_TB_LOSS_IN_MAX_PLY
            {
                let r = ((eval_value - beta) / self.params.nmp_eval_div)
                    .min(self.params.nmp_eval_div_min)
                    + depth / self.params.nmp_depth_div
                    + self.params.nmp_base;

                self.play_null_move(ss);
                let null_value =
                    -self.negamax::<NonPvNode>(-beta, -beta + 1, depth - r, !cut_node, ss + 1);
                self.cancel_move();

                if null_value >= beta && null_value.abs() < VALUE_TB_WIN_IN_MAX_PLY {
                    return null_value;
                }
            }

            // Internal iterative reduction
            if (NT::PV || cut_node) && depth >= 4 && tt_move.is_null() {
                depth -= 1;
            }
        }

        let was_in_check = in_check;

        let mut moves;
        if NT::ROOT {
            moves = self.root_moves;
            for i in 0..self.root_moves.count {
                self.root_moves.scores[i] = -VALUE_INFINITE;
            }
        } else {
            moves = MoveList::new();
            movegen::get_pseudo_legal_moves(&self.position, &mut moves);
            self.score_moves(&mut moves, tt_move, ss);
        }

        let mut best_move = Move::NONE;
        let mut best_value = -VALUE_INFINITE;
        let mut found_legal_move = false;
        let mut played_moves: i32 = 0;

        let mut quiet_moves = [Move::NONE; 64];
        let mut quiet_count = 0usize;
        let mut skip_quiets = false;

        for i in 0..moves.count {
            let (mv, move_score) = next_best_move(&mut moves, i);

            if mv == excluded_move {
                continue;
            }
            if !self.position.is_legal(mv) {
                continue;
            }

            let is_quiet = self.position.is_quiet(mv);

            if is_quiet {
                if quiet_count < 64 {
                    quiet_moves[quiet_count] = mv;
                    quiet_count += 1;
                }
                if skip_quiets {
                    continue;
                }
            }

            found_legal_move = true;

            if !NT::ROOT
                && self.position.has_non_pawns(self.position.side_to_move)
                && best_value > VALUE_TB_LOSS_IN_MAX_PLY
            {
                // Late move pruning
                if quiet_count as i32
                    > (self.params.lmp_quad * depth * depth + self.params.lmp_base)
                        / (2 - improving as i32)
                {
                    skip_quiets = true;
                }

                // SEE pruning of losing captures
                if self.position.piece_on(mv.target()) != NO_PIECE
                    && !self
                        .position
                        .see_ge(mv, self.params.pvs_see_margin * depth)
                {
                    continue;
                }

                // Futility pruning
                if is_quiet
                    && depth <= 8
                    && !was_in_check
                    && eval_value + self.params.futility_base + self.params.futility_depth_mul * depth
                        <= alpha
                {
                    skip_quiets = true;
                }
            }

            // Singular extension: is the TT move forced?
            let mut extension = 0;
            if !NT::ROOT
                && (self.ply as i32) < 2 * self.root_depth
                && depth >= 6
                && excluded_move.is_null()
                && mv == tt_move
                && tt_value.abs() < VALUE_TB_WIN_IN_MAX_PLY
                && (tt_flag & FLAG_LOWER) != 0
                && tt_depth >= depth - 3
            {
                let singular_beta = tt_value - depth;

                self.stack[ss].excluded_move = mv;
                let se_value = self.negamax::<NonPvNode>(
                    singular_beta - 1,
                    singular_beta,
                    (depth - 1) / 2,
                    cut_node,
                    ss,
                );
                self.stack[ss].excluded_move = Move::NONE;

                if se_value < singular_beta {
                    extension = 1;
                } else if singular_beta >= beta {
                    // Multicut: two refutations above beta
                    return singular_beta;
                } else if tt_value >= beta {
                    extension = -1 + NT::PV as i32;
                }
            }

            self.play_move(mv, ss);

            let new_depth = depth + extension - 1;
            let mut value = -VALUE_INFINITE;

            // Late move reductions, with a verification re-search
            let need_full_search;
            if !was_in_check && depth >= 3 && played_moves > 1 + 2 * NT::PV as i32 {
                let mut r = self.params.lmr(depth, played_moves + 1);

                if is_quiet {
                    // Reduce more when the hash move is noisy
                    r += tt_move_noisy as i32;

                    // Let this move's history pull the reduction around
                    if move_score > -50000 && move_score < 50000 {
                        r -= (move_score / self.params.lmr_history_div).clamp(-2, 2);
                    }
                } else {
                    r /= 2;
                }

                r += !improving as i32;
                r -= NT::PV as i32;
                r += cut_node as i32;

                // Clamp so the child neither drops to qsearch nor extends
                let reduced_depth = (new_depth - r).clamp(1, new_depth + 1);

                value = -self.negamax::<NonPvNode>(-alpha - 1, -alpha, reduced_depth, true, ss + 1);

                need_full_search = value > alpha && reduced_depth < new_depth;
            } else {
                need_full_search = !NT::PV || played_moves >= 1;
            }

            if need_full_search {
                value = -self.negamax::<NonPvNode>(-alpha - 1, -alpha, new_depth, !cut_node, ss + 1);
            }

            if NT::PV && (played_moves == 0 || value > alpha) {
                value = -self.negamax::<PvNode>(-beta, -alpha, new_depth, false, ss + 1);
            }

            self.cancel_move();

            played_moves += 1;

            if NT::ROOT {
                if let Some(idx) = self.root_moves.index_of(mv) {
                    self.root_moves.scores[idx] = value;
                }
            }

            if value > best_value {
                best_value = value;

                if best_value > alpha {
                    best_move = mv;

                    if NT::PV {
                        self.update_pv(ss, mv);
                    }

                    // Always true in NonPV nodes
                    if best_value >= beta {
                        break;
                    }
                    alpha = best_value;
                }
            }
        }

        if !found_legal_move {
            if !excluded_move.is_null() {
                return alpha;
            }
            return if in_check {
                self.ply as Value - VALUE_MATE
            } else {
                VALUE_DRAW
            };
        }

        if best_value >= beta && self.position.is_quiet(best_move) {
            self.update_histories(
                depth,
                best_move,
                best_value,
                beta,
                &quiet_moves[..quiet_count.min(64)],
                ss,
            );
        }

        if excluded_move.is_null() {
            let flag = if best_value >= beta {
                FLAG_LOWER
            } else if NT::PV && !best_move.is_null() {
                FLAG_EXACT
            } else {
                FLAG_UPPER
            };
            self.tt.store(
                self.position.hash,
                flag,
                depth,
                best_move,
                best_value,
                self.stack[ss].static_eval,
                NT::PV,
                self.ply,
            );
        }

        best_value
    }

    fn pv_string(&self, ss: usize) -> String {
        let frame = &self.stack[ss];
        let mut out = String::new();
        for i in 0..frame.pv_length {
            let mv = frame.pv[i];
            if mv.is_null() {
                break;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&uci::format_move(mv));
        }
        out
    }

    /// Iterative deepening with aspiration windows. Emits `info` per
    /// completed depth, then a single `bestmove`, then parks the shared
    /// state back at IDLE.
    pub fn start_search(&mut self) {
        self.ply = 0;
        self.nodes = 0;
        self.sel_depth = 0;
        self.root_color = self.position.side_to_move;
        self.tt.new_search();

        let optimum_time = if self.limits.has_time_limit() {
            time::calc_optimum_time(&self.limits, self.root_color)
        } else {
            0
        };

        for frame in self.stack.iter_mut() {
            *frame = SearchFrame::default();
        }
        let ss = SS_OFFSET;

        // Root moves: pseudo-legal, filtered through isLegal, pre-scored
        self.root_moves = MoveList::new();
        let mut pseudo = MoveList::new();
        movegen::get_pseudo_legal_moves(&self.position, &mut pseudo);
        for i in 0..pseudo.count {
            if self.position.is_legal(pseudo.moves[i]) {
                self.root_moves.add(pseudo.moves[i]);
            }
        }
        let mut scored_roots = self.root_moves;
        self.score_moves(&mut scored_roots, Move::NONE, ss);
        self.root_moves = scored_roots;

        log::info!(
            "search start: {} root moves, depth limit {}, nodes limit {}",
            self.root_moves.count,
            self.limits.depth,
            self.limits.nodes
        );

        let max_depth = if self.limits.depth > 0 {
            self.limits.depth.min(MAX_PLY as i32 - 1)
        } else {
            MAX_PLY as i32 - 1
        };

        let mut iter_score = [0 as Value; MAX_PLY];
        let mut iter_best = [Move::NONE; MAX_PLY];
        let mut best_move = Move::NONE;
        let mut search_stability = 0;

        if self.root_moves.count == 0 {
            self.last_score = if self.position.in_check() {
                -VALUE_MATE
            } else {
                VALUE_DRAW
            };
        }

        if self.root_moves.count > 0 {
            'deepening: for root_depth in 1..=max_depth {
                self.root_depth = root_depth;

                if self.limits.nodes > 0 && self.nodes >= self.limits.nodes {
                    break;
                }

                self.sel_depth = 0;

                let mut score;
                if root_depth >= self.params.asp_window_start_depth {
                    let mut window = self.params.asp_window_start_delta;
                    let prev = iter_score[(root_depth - 1) as usize];
                    let mut alpha = (prev - window).max(-VALUE_INFINITE);
                    let mut beta = (prev + window).min(VALUE_INFINITE);
                    let mut failed_high_cnt = 0;

                    loop {
                        let adjusted_depth = (root_depth - failed_high_cnt).max(1);
                        score = self.negamax::<RootNode>(alpha, beta, adjusted_depth, false, ss);

                        if self.stopped() {
                            break 'deepening;
                        }

                        // keep the partial result so the info line shows it
                        if self.limits.nodes > 0 && self.nodes >= self.limits.nodes {
                            break;
                        }

                        if score >= VALUE_MATE_IN_MAX_PLY {
                            beta = VALUE_INFINITE;
                            failed_high_cnt = 0;
                        }

                        if score <= alpha {
                            beta = (alpha + beta) / 2;
                            alpha = (alpha - window).max(-VALUE_INFINITE);
                            failed_high_cnt = 0;
                        } else if score >= beta {
                            beta = (beta + window).min(VALUE_INFINITE);
                            failed_high_cnt = (failed_high_cnt + 1)
                                .min(self.params.asp_fail_high_reduction_max);
                        } else {
                            break;
                        }

                        window += window / 3;
                    }
                } else {
                    score = self.negamax::<RootNode>(-VALUE_INFINITE, VALUE_INFINITE, root_depth, false, ss);
                }

                // Never publish a move from an interrupted iteration
                if self.stopped() {
                    break;
                }

                iter_score[root_depth as usize] = score;
                best_move = self.stack[ss].pv[0];
                iter_best[root_depth as usize] = best_move;
                self.last_score = score;

                let elapsed = self.limits.elapsed();
                if self.printing_enabled {
                    println!(
                        "info depth {} seldepth {} score {} nodes {} nps {} time {} pv {}",
                        root_depth,
                        self.sel_depth,
                        uci::format_value(score),
                        self.nodes,
                        self.nodes * 1000 / elapsed.max(1),
                        elapsed,
                        self.pv_string(ss)
                    );
                }

                if best_move == iter_best[(root_depth - 1) as usize] {
                    search_stability = (search_stability + 1).min(8);
                } else {
                    search_stability = 0;
                }

                // A forced mate for us won't improve; a mate against us
                // might still be escapable at higher depth, keep going.
                if score >= VALUE_MATE_IN_MAX_PLY {
                    break;
                }

                if self.limits.has_time_limit() && root_depth >= 4 {
                    if root_depth >= 40 && score.abs() < 5 {
                        break; // dead draw
                    }
                    if self.used_most_of_time() {
                        break;
                    }
                    let opt_scale = 1.1 - 0.05 * search_stability as f64;
                    if elapsed as f64 > opt_scale * optimum_time as f64 {
                        break;
                    }
                }
            }
        }

        // Cancelled before depth 1 completed: fall back to the first move
        // of the pre-scored root list, which is still a legal move.
        if best_move.is_null() && self.root_moves.count > 0 {
            best_move = self.root_moves.moves[0];
        }

        self.last_best_move = best_move;

        if self.printing_enabled {
            if best_move.is_null() {
                println!("bestmove (none)");
            } else {
                println!("bestmove {}", uci::format_move(best_move));
            }
        }

        debug_assert!(self.ply == 0);
        self.search_state.store(IDLE, Ordering::Release);
    }
}
