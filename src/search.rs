//! Iterative-deepening PVS alpha-beta search over a [`Position`], with
//! a transposition table, heuristic move-ordering tables, and
//! quiescence search at the leaves.
//!
//! Unlike a `DeepeningSearcher`/`AspirationSearcher`
//! executor chain (built around worker threads and
//! `mpsc` report channels so a GUI can poll progress asynchronously),
//! this module runs the whole iterative-deepening loop as one
//! ordinary recursive call on the caller's thread: the search itself
//! never spawns a thread, matching "single-thread, recursive
//! alpha-beta" exactly. Cancellation is cooperative instead of
//! channel-based -- every 1024 visited nodes the search polls a node
//! budget, a deadline, and a shared `stop` flag the UCI front-end can
//! set from its own stdin-reader thread, and unwinds via `Result`'s
//! `?` short-circuiting rather than a panic/catch_unwind non-local
//! jump.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::basetypes::*;
use crate::bitsets::BB_ALL;
use crate::eval;
use crate::history::{CounterMoves, History, Killers};
use crate::move_predicates::{is_check, is_pawn_threat, see, CHECK_DIRECT, CHECK_DISCOVERED, CHECK_NONE};
use crate::movegen;
use crate::moves::Move;
use crate::ordering::{self, NodeType};
use crate::pawn_cache::PawnCache;
use crate::position::Position;
use crate::tt::{Tt, BOUND_EXACT, BOUND_LOWER, BOUND_NONE, BOUND_UPPER};
use crate::zobrist::Key;

/// How many plies quiescence is allowed to go below the point it was
/// entered at before it gives up on recursion and falls back to
/// `eval + see(m)`.
const QS_LIMIT: i32 = -8;

const NODES_PER_POLL: u64 = 1024;

/// A margin (`vEP`) used by both eval-pruning in the main search and
/// the per-move futility test in quiescence.
const VALUE_EP: Value = 120;

/// Time/depth/node limits for one `go` command.
#[derive(Clone, Copy, Default)]
pub struct Limits {
    pub depth: Option<u8>,
    pub nodes: Option<NodeCount>,
    pub movetime: Option<Duration>,
    pub wtime: Option<Duration>,
    pub btime: Option<Duration>,
    pub winc: Duration,
    pub binc: Duration,
    pub movestogo: Option<u32>,
}

impl Limits {
    /// Derives the wall-clock budget for the side to move: `movetime`
    /// if given outright, else `time/movestogo + inc`, clamped so at
    /// least 1 ms remains on the clock and at most `time - 100ms` is
    /// spent planning this move.
    fn time_budget(&self, us: Color) -> Option<Duration> {
        if let Some(mt) = self.movetime {
            return Some(mt);
        }
        let (time, inc) = if us == WHITE {
            (self.wtime, self.winc)
        } else {
            (self.btime, self.binc)
        };
        let time = time?;
        let moves_left = self.movestogo.unwrap_or(30).max(1) as u32;
        let share = time / moves_left + inc;
        let safety = Duration::from_millis(100);
        let cap = time.saturating_sub(safety).max(Duration::from_millis(1));
        Some(share.min(cap))
    }
}

/// One `info`-line snapshot, emitted after each completed
/// iterative-deepening depth.
pub struct Info {
    pub depth: u8,
    pub score: Value,
    pub nodes: NodeCount,
    pub time: Duration,
    pub pv: Vec<Move>,
    pub bound: BoundHint,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum BoundHint {
    Exact,
    Lower,
    Upper,
}

pub struct SearchResult {
    pub best_move: Move,
    pub ponder_move: Option<Move>,
}

/// Internal signal used to unwind the recursive search when a node or
/// time budget is exhausted. Never escapes [`Searcher::go`].
struct Aborted;
type SResult<T> = Result<T, Aborted>;

/// Persistent search state: the transposition table and the
/// move-ordering heuristic tables, which outlive any single `go` and
/// are only reset by `ucinewgame`/`Clear Hash`.
pub struct Searcher {
    pub tt: Tt,
    history: History,
    killers: Killers,
    counter_moves: CounterMoves,
    pawn_cache: PawnCache,
    nodes: NodeCount,
    node_limit: Option<NodeCount>,
    deadline: Option<Instant>,
    started: Instant,
    /// The position key at entry to each ply, used to derive
    /// counter-move lookup keys (two plies apart) without re-deriving
    /// them from a move history.
    ply_keys: Vec<Key>,
}

impl Searcher {
    pub fn new(hash_mb: usize) -> Searcher {
        Searcher {
            tt: Tt::new(hash_mb),
            history: History::new(),
            killers: Killers::new(),
            counter_moves: CounterMoves::new(),
            pawn_cache: PawnCache::new(1 << 16),
            nodes: 0,
            node_limit: None,
            deadline: None,
            started: Instant::now(),
            ply_keys: vec![0; MAX_PLY + 2],
        }
    }

    pub fn new_game(&mut self) {
        debug!("clearing tt/history/killers/counter-moves/pawn-cache for a new game");
        self.tt.clear();
        self.history.clear();
        self.killers.clear();
        self.counter_moves.clear();
        self.pawn_cache.clear();
    }

    /// Runs the full iterative-deepening loop on `pos`, reporting each
    /// completed depth to `report`, and returns the best move found
    /// (or the best move so far, if cut off by `stop`/time/nodes).
    pub fn go(&mut self, pos: &mut Position, limits: Limits, stop: &AtomicBool, mut report: impl FnMut(&Info)) -> SearchResult {
        self.nodes = 0;
        self.node_limit = limits.nodes;
        self.started = Instant::now();
        self.deadline = limits.time_budget(pos.to_move()).map(|d| self.started + d);
        self.tt.new_search();

        let max_depth = limits.depth.unwrap_or(MAX_PLY as u8 - 1).min(MAX_PLY as u8 - 1);
        pos.set_unwind_mark();

        let legal = movegen::gen_moves(pos);
        if legal.is_empty() {
            return SearchResult { best_move: Move::NULL, ponder_move: None };
        }
        if legal.len() == 1 {
            return SearchResult { best_move: legal[0], ponder_move: None };
        }

        let mut best_move = legal[0];
        let mut best_score = VALUE_UNKNOWN;
        let mut alpha = VALUE_MIN;
        let mut beta = VALUE_MAX;
        let mut depth: u8 = 1;

        while depth <= max_depth {
            if depth >= 5 && !is_mate_value(best_score) {
                alpha = (best_score - 16).max(VALUE_MIN);
                beta = (best_score + 16).min(VALUE_MAX);
            } else {
                alpha = VALUE_MIN;
                beta = VALUE_MAX;
            }
            let mut half_width: i32 = 16;

            let score = loop {
                match self.search_root(pos, depth, alpha, beta, stop) {
                    Ok(s) if s <= alpha && alpha > VALUE_MIN => {
                        half_width = widen(half_width);
                        alpha = (s as i32 - half_width).max(VALUE_MIN as i32) as Value;
                    }
                    Ok(s) if s >= beta && beta < VALUE_MAX => {
                        half_width = widen(half_width);
                        beta = (s as i32 + half_width).min(VALUE_MAX as i32) as Value;
                    }
                    Ok(s) => break Some(s),
                    Err(Aborted) => break None,
                };
            };

            let Some(score) = score else { break };
            best_score = score;
            if let Some(entry) = self.tt.probe(pos.get_key(), 0) {
                if !entry.m.is_null() {
                    best_move = entry.m;
                }
            }
            let pv = extract_pv(&self.tt, pos, depth);
            report(&Info {
                depth,
                score,
                nodes: self.nodes,
                time: self.started.elapsed(),
                pv,
                bound: BoundHint::Exact,
            });
            depth += 1;
        }

        SearchResult { best_move, ponder_move: None }
    }

    fn should_stop(&self, stop: &AtomicBool) -> bool {
        if stop.load(Ordering::Relaxed) {
            return true;
        }
        if let Some(limit) = self.node_limit {
            if self.nodes >= limit {
                return true;
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        false
    }

    fn poll(&self, stop: &AtomicBool) -> SResult<()> {
        if self.nodes % NODES_PER_POLL == 0 && self.should_stop(stop) {
            return Err(Aborted);
        }
        Ok(())
    }

    fn search_root(&mut self, pos: &mut Position, depth: u8, alpha: Value, beta: Value, stop: &AtomicBool) -> SResult<Value> {
        self.search(pos, depth as i8, 0, alpha, beta, NodeType::Pv, stop)
    }

    /// The main PVS alpha-beta recursion.
    fn search(
        &mut self,
        pos: &mut Position,
        depth: i8,
        ply: u32,
        mut alpha: Value,
        mut beta: Value,
        node_type: NodeType,
        stop: &AtomicBool,
    ) -> SResult<Value> {
        if depth <= 0 || ply as usize >= MAX_PLY {
            return self.qsearch(pos, 0, ply, alpha, beta, stop);
        }
        self.nodes += 1;
        self.poll(stop)?;

        let root = ply == 0;
        if !root && pos.is_draw() {
            return Ok(0);
        }

        // Mate distance pruning.
        alpha = alpha.max(mated_in(ply));
        beta = beta.min(mate_in(ply + 1));
        if alpha >= beta {
            return Ok(alpha);
        }

        let in_check = pos.is_check();
        let key = pos.get_key();
        self.ply_keys[ply as usize] = key;
        let is_pv = node_type != NodeType::All;

        let tt_entry = self.tt.probe(key, ply);
        if !root {
            if let Some(e) = tt_entry {
                let usable_depth = e.depth as i32 >= depth as i32 || is_mate_value(e.score);
                if usable_depth {
                    let bound_ok = match e.bound {
                        BOUND_EXACT => !is_pv || e.depth as i32 >= depth as i32,
                        BOUND_LOWER => e.score >= beta,
                        BOUND_UPPER => e.score <= alpha,
                        _ => false,
                    };
                    if bound_ok && e.bound != BOUND_NONE {
                        return Ok(e.score);
                    }
                }
            }
        }

        let static_eval = if in_check {
            VALUE_UNKNOWN
        } else {
            eval::eval(pos, &mut self.pawn_cache)
        };

        if !in_check && !is_pv && depth <= 3 && !is_mate_value(beta) {
            // Razoring.
            let margin = razor_margin(depth);
            if static_eval < beta - margin {
                let v = self.qsearch(pos, 0, ply, beta - margin - 1, beta - margin, stop)?;
                if v < beta - margin {
                    return Ok(v);
                }
            }
            // Eval pruning.
            if static_eval - depth as Value * VALUE_EP >= beta && pos.non_pawn_material(pos.to_move()) > 0 {
                return Ok(static_eval - depth as Value * VALUE_EP);
            }
        }

        if !is_pv && !in_check && static_eval >= beta && pos.non_pawn_material(pos.to_move()) > 0 {
            // Null-move pruning.
            let reduction = 3 + depth as i32 / 4 + (static_eval - SEE_PAWN >= beta) as i32;
            let reduced = (depth as i32 - reduction).max(0) as i8;
            pos.play(Move::NULL);
            let v = -self.search(pos, reduced, ply + 1, -beta, -beta + 1, NodeType::All, stop)?;
            pos.undo();
            if v >= beta {
                return Ok(if is_mate_value(v) { beta } else { v });
            }
        }

        let mut tt_move = tt_entry.map(|e| e.m).unwrap_or(Move::NULL);
        if tt_move.is_null() && ((is_pv && depth >= 7) || (!is_pv && !in_check && depth >= 4 && static_eval + 200 >= beta)) {
            let iid_depth = depth - if is_pv { 2 } else { 4 };
            if iid_depth > 0 {
                self.search(pos, iid_depth, ply, alpha, beta, node_type, stop)?;
                tt_move = self.tt.probe(key, ply).map(|e| e.m).unwrap_or(Move::NULL);
            }
        }

        let killers = self.killers.get(ply as usize);
        let counter_move = if ply >= 2 {
            self.counter_moves.get(self.ply_keys[ply as usize] ^ self.ply_keys[ply as usize - 2])
        } else {
            Move::NULL
        };
        let mut list = ordering::order_moves(pos, node_type, tt_move, killers, counter_move, &self.history);

        let mut best_score = VALUE_MIN;
        let mut best_move = Move::NULL;
        let mut move_count = 0;
        let mut quiets_tried: Vec<(PieceType, Square)> = Vec::new();
        let orig_alpha = alpha;

        while let Some(m) = list.pick_best() {
            move_count += 1;
            let check = is_check(pos, m);
            let gives_check = check != CHECK_NONE;
            let is_capture = pos.piece_on(m.dest_square()).is_some() || m.is_en_passant() || m.is_promotion();

            let mut extension = 0;
            if check == CHECK_DISCOVERED || (check == CHECK_DIRECT && see(pos, m) >= 0) {
                extension = 1;
            }

            pos.play(m);
            let gives_mate_only_reply = movegen::gen_moves(pos).len() == 1;
            if gives_mate_only_reply {
                extension = extension.max(1);
            }

            let dangerous = gives_check
                || extension > 0
                || m == killers[0]
                || m == killers[1]
                || (!is_capture && is_pawn_threat(pos, m) && see(pos, m) >= 0)
                || m.is_castling();

            if !root && depth as i32 + extension - 1 <= 1 && !is_capture && !dangerous && !in_check {
                let s = see(pos, m);
                if s < 0 {
                    pos.undo();
                    continue;
                }
            }

            let new_depth = depth - 1 + extension as i8;
            let mut reduction = 0i8;
            if move_count > 1 && !dangerous && new_depth > 0 {
                let hist = self.history.get(pos.to_move(), pos.piece_on(m.dest_square()).map(|(_, p)| p).unwrap_or(PAWN), m.dest_square());
                let bad_quiet = !is_capture && (hist < 0 || (hist == 0 && see(pos, m) < 0));
                let bad_capture = is_capture && see(pos, m) < 0;
                if bad_quiet || bad_capture {
                    reduction = 1;
                    if move_count > 6 && !is_capture {
                        reduction += 1;
                    }
                }
            }

            let score = if move_count == 1 {
                -self.search(pos, new_depth, ply + 1, -beta, -alpha, NodeType::Pv, stop)?
            } else {
                let reduced_depth = (new_depth - reduction).max(0);
                let mut s = -self.search(pos, reduced_depth, ply + 1, -alpha - 1, -alpha, opponent_node(node_type), stop)?;
                if s > alpha && reduction > 0 {
                    s = -self.search(pos, new_depth, ply + 1, -alpha - 1, -alpha, opponent_node(node_type), stop)?;
                }
                if s > alpha && is_pv {
                    s = -self.search(pos, new_depth, ply + 1, -beta, -alpha, NodeType::Pv, stop)?;
                }
                s
            };

            pos.undo();

            if !is_capture {
                quiets_tried.push((pos.piece_on(m.orig_square()).map(|(_, p)| p).unwrap_or(PAWN), m.dest_square()));
            }

            if score > best_score {
                best_score = score;
                best_move = m;
            }
            if score > alpha {
                alpha = score;
            }
            if alpha >= beta {
                if !is_capture {
                    self.killers.update(ply as usize, m);
                    let piece = pos.piece_on(m.orig_square()).map(|(_, p)| p).unwrap_or(PAWN);
                    self.history.update(pos.to_move(), piece, m.dest_square(), depth, &quiets_tried);
                    if ply >= 2 {
                        let dm_key = self.ply_keys[ply as usize] ^ self.ply_keys[ply as usize - 2];
                        self.counter_moves.update(dm_key, m);
                    }
                }
                break;
            }
        }

        if best_move.is_null() {
            return Ok(if in_check { mated_in(ply) } else { 0 });
        }

        let bound = if best_score <= orig_alpha {
            BOUND_UPPER
        } else if best_score >= beta {
            BOUND_LOWER
        } else {
            BOUND_EXACT
        };
        self.tt.store(key, bound, depth, best_score, static_eval, best_move, ply);

        Ok(best_score)
    }

    /// Quiescence search: captures, promotions, and (at `depth == 0`)
    /// quiet checks, or the full evasion generator when in check.
    fn qsearch(&mut self, pos: &mut Position, depth: i32, ply: u32, mut alpha: Value, beta: Value, stop: &AtomicBool) -> SResult<Value> {
        self.nodes += 1;
        self.poll(stop)?;

        if ply as usize >= MAX_PLY {
            return Ok(eval::eval(pos, &mut self.pawn_cache));
        }

        let in_check = pos.is_check();
        let mut best_score;
        if in_check {
            best_score = VALUE_MIN;
        } else {
            let stand_pat = eval::eval(pos, &mut self.pawn_cache);
            best_score = stand_pat;
            if stand_pat >= beta {
                return Ok(stand_pat);
            }
            if stand_pat > alpha {
                alpha = stand_pat;
            }
        }

        if depth < QS_LIMIT {
            return Ok(best_score);
        }

        let mut buf = Vec::new();
        if in_check {
            movegen::gen_evasions(pos, &mut buf);
        } else {
            let us = pos.to_move();
            let enemy = pos.color_bb(1 - us);
            // `targets = BB_ALL` so quiet promotions survive the pawn
            // generator too; the retain below keeps only captures,
            // en-passant, and promotions.
            movegen::gen_pawn_moves(pos, BB_ALL, true, &mut buf);
            // `include_king = true` so king captures aren't missed; the
            // retain below strips every quiet (non-capturing) move,
            // king moves included.
            movegen::gen_piece_moves(pos, enemy, true, &mut buf);
            buf.retain(|m| pos.piece_on(m.dest_square()).is_some() || m.is_en_passant() || m.is_promotion());
            if depth == 0 {
                movegen::gen_quiet_checks(pos, &mut buf);
            }
        }

        let current_eval = if in_check { 0 } else { eval::eval(pos, &mut self.pawn_cache) };
        let mut list = ordering::order_qmoves(pos, &buf);

        while let Some(m) = list.pick_best() {
            if !in_check {
                let gives_check = is_check(pos, m) != CHECK_NONE;
                if depth < 0 {
                    let s = see(pos, m);
                    if s <= 0 && current_eval + VALUE_EP / 2 <= alpha && !gives_check {
                        continue;
                    }
                }
                let captured_value = pos.piece_on(m.dest_square()).map(|(_, p)| eval::piece_value(p)).unwrap_or(0);
                let futility = current_eval + VALUE_EP / 2 + captured_value;
                if futility <= alpha && !gives_check && !m.is_promotion() {
                    continue;
                }
                if !gives_check && see(pos, m) < 0 {
                    continue;
                }
            }

            if depth <= QS_LIMIT - 1 {
                best_score = best_score.max(current_eval + see(pos, m));
                continue;
            }

            pos.play(m);
            let score = -self.qsearch(pos, depth - 1, ply + 1, -beta, -alpha, stop)?;
            pos.undo();

            if score > best_score {
                best_score = score;
            }
            if score > alpha {
                alpha = score;
            }
            if alpha >= beta {
                break;
            }
        }

        if in_check && best_score == VALUE_MIN {
            return Ok(mated_in(ply));
        }
        Ok(best_score)
    }
}

const SEE_PAWN: Value = 80;

fn widen(half_width: i32) -> i32 {
    let next = half_width + 3 * half_width / 8;
    if next > 1500 {
        1_000_000
    } else {
        next
    }
}

fn razor_margin(depth: i8) -> Value {
    200 + 160 * depth as Value
}

fn opponent_node(node_type: NodeType) -> NodeType {
    match node_type {
        NodeType::Pv => NodeType::Cut,
        NodeType::Cut => NodeType::All,
        NodeType::All => NodeType::Cut,
    }
}

/// Extracts the principal variation by walking exact-bound entries
/// forward from `pos` through the transposition table.
pub fn extract_pv(tt: &Tt, pos: &Position, max_len: u8) -> Vec<Move> {
    let mut pv = Vec::new();
    let mut p = pos.clone();
    let mut ply = 0u32;
    while pv.len() < max_len as usize {
        let Some(entry) = tt.probe(p.get_key(), ply) else { break };
        if entry.m.is_null() {
            break;
        }
        let legal = movegen::gen_moves(&p);
        if !legal.contains(&entry.m) {
            break;
        }
        pv.push(entry.m);
        p.play(entry.m);
        ply += 1;
        if entry.bound != BOUND_EXACT {
            break;
        }
    }
    for _ in 0..pv.len() {
        p.undo();
    }
    pv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forced_move_returns_immediately() {
        let mut pos = Position::from_fen("7k/8/5NK1/8/8/8/8/6R1 b - - 0 1").unwrap();
        let mut searcher = Searcher::new(1);
        let stop = AtomicBool::new(false);
        let limits = Limits { depth: Some(4), ..Default::default() };
        let result = searcher.go(&mut pos, limits, &stop, |_| {});
        assert_eq!(result.best_move.notation(), "h8g8");
    }

    #[test]
    fn test_finds_mate_in_one() {
        // Black to move, white queen+rook deliver mate next move is
        // irrelevant here: set up a position where white has a mate
        // in one (back-rank).
        let mut pos = Position::from_fen("6k1/5ppp/8/8/8/8/8/R5K1 w - - 0 1").unwrap();
        let mut searcher = Searcher::new(1);
        let stop = AtomicBool::new(false);
        let limits = Limits { depth: Some(3), ..Default::default() };
        let result = searcher.go(&mut pos, limits, &stop, |_| {});
        assert_eq!(result.best_move.notation(), "a1a8");
    }

    #[test]
    fn test_node_limit_terminates_search() {
        let mut pos = Position::startpos();
        let mut searcher = Searcher::new(1);
        let stop = AtomicBool::new(false);
        let limits = Limits { nodes: Some(500), depth: Some(20), ..Default::default() };
        let result = searcher.go(&mut pos, limits, &stop, |_| {});
        assert!(!result.best_move.is_null());
    }
}
