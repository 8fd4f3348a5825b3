//! Exact king-and-pawn-vs-king endgame recognizer.
//!
//! A full win/draw bitbase for the 24 reachable pawn squares (files
//! A-D, ranks 2-7; the rest follow by the board's left-right
//! symmetry) crossed with both kings' squares and the side to move --
//! 196608 positions, classified by backward induction exactly the way
//! Stockfish's well-known KPK bitbase does (the C++ engine this table
//! was ported from itself ports that same table). Built once, lazily,
//! on first use.

use crate::attacks::ATTACKS;
use crate::basetypes::*;
use crate::bitsets::bitscan_forward_and_reset;
use crate::position::Position;

const INDEX_MAX: usize = 2 * 24 * 64 * 64;

#[derive(Clone, Copy, PartialEq, Eq)]
struct Result(u8);

const INVALID: Result = Result(0);
const UNKNOWN: Result = Result(1);
const DRAW: Result = Result(2);
const WIN: Result = Result(4);

impl std::ops::BitOrAssign for Result {
    fn bitor_assign(&mut self, rhs: Result) {
        self.0 |= rhs.0;
    }
}

fn kdist(a: Square, b: Square) -> i32 {
    let df = (file(a) as i32 - file(b) as i32).abs();
    let dr = (rank(a) as i32 - rank(b) as i32).abs();
    df.max(dr)
}

/// `wpsq`'s file must be in `0..=3` (callers mirror horizontally
/// first); `us` is `WHITE`/`BLACK` relative to White always being the
/// side with the pawn.
fn index(us: Color, bksq: Square, wksq: Square, psq: Square) -> usize {
    wksq
        | (bksq << 6)
        | (us << 12)
        | (file(psq) << 13)
        | ((6 - rank(psq)) << 15)
}

fn decode_psq(idx: usize) -> Square {
    let file_bits = (idx >> 13) & 0x3;
    let rank_val = 6 - ((idx >> 15) & 0x7);
    square(file_bits, rank_val)
}

fn classify_leaf(idx: usize) -> Result {
    let wksq = idx & 0x3f;
    let bksq = (idx >> 6) & 0x3f;
    let us = (idx >> 12) & 0x1;
    let psq = decode_psq(idx);

    if wksq == psq
        || wksq == bksq
        || bksq == psq
        || ATTACKS.king_attacks(wksq) & (1u64 << bksq) != 0
        || (us == WHITE && ATTACKS.pawn_attacks(WHITE, psq) & (1u64 << bksq) != 0)
    {
        return INVALID;
    }

    if us == WHITE {
        if rank(psq) == RANK_7
            && wksq != psq + 8
            && (kdist(bksq, psq + 8) > 1 || ATTACKS.king_attacks(wksq) & (1u64 << (psq + 8)) != 0)
        {
            return WIN;
        }
    } else {
        let battacks = ATTACKS.king_attacks(bksq);
        if battacks & !(ATTACKS.king_attacks(wksq) | ATTACKS.king_attacks(psq)) == 0
            || battacks & !ATTACKS.king_attacks(wksq) & (1u64 << psq) != 0
        {
            return DRAW;
        }
    }
    UNKNOWN
}

fn classify(idx: usize, db: &[Result]) -> Result {
    let wksq = idx & 0x3f;
    let bksq = (idx >> 6) & 0x3f;
    let us = (idx >> 12) & 0x1;
    let psq = decode_psq(idx);

    let mut r = INVALID;
    let mut b = ATTACKS.king_attacks(if us == WHITE { wksq } else { bksq });
    while b != 0 {
        let sq = bitscan_forward_and_reset(&mut b);
        r |= if us == WHITE {
            db[index(BLACK, bksq, sq, psq)]
        } else {
            db[index(WHITE, sq, wksq, psq)]
        };
    }

    if us == WHITE && rank(psq) < RANK_7 {
        let s = psq + 8;
        r |= db[index(BLACK, bksq, wksq, s)];
        if rank(s) == RANK_3 && s != wksq && s != bksq {
            r |= db[index(BLACK, bksq, wksq, s + 8)];
        }
    }

    if us == WHITE {
        if r.0 & WIN.0 != 0 {
            WIN
        } else if r.0 & UNKNOWN.0 != 0 {
            UNKNOWN
        } else {
            DRAW
        }
    } else if r.0 & DRAW.0 != 0 {
        DRAW
    } else if r.0 & UNKNOWN.0 != 0 {
        UNKNOWN
    } else {
        WIN
    }
}

fn build_bitbase() -> Vec<u32> {
    let mut db = vec![UNKNOWN; INDEX_MAX];
    for (idx, slot) in db.iter_mut().enumerate() {
        *slot = classify_leaf(idx);
    }
    let mut changed = true;
    while changed {
        changed = false;
        for idx in 0..INDEX_MAX {
            if db[idx] == UNKNOWN {
                let r = classify(idx, &db);
                if r != UNKNOWN {
                    db[idx] = r;
                    changed = true;
                }
            }
        }
    }
    let mut bitbase = vec![0u32; INDEX_MAX / 32];
    for (idx, slot) in db.iter().enumerate() {
        if *slot == WIN {
            bitbase[idx / 32] |= 1 << (idx % 32);
        }
    }
    bitbase
}

lazy_static! {
    static ref BITBASE: Vec<u32> = build_bitbase();
}

/// `wpsq`'s file must already be mirrored into `0..=3`.
fn probe(us: Color, wksq: Square, wpsq: Square, bksq: Square) -> bool {
    let idx = index(us, bksq, wksq, wpsq);
    BITBASE[idx / 32] & (1 << (idx % 32)) != 0
}

/// `true` if `pos` is a king-and-pawn-vs-king ending recognized as a
/// draw with best play on both sides. Any other material
/// configuration (including KBPK with a wrong-colored rook pawn,
/// which the bitbase does not model) returns `false` and is left to
/// ordinary evaluation.
pub fn is_recognized_draw(pos: &Position) -> bool {
    let white_pawns = crate::bitsets::pop_count(pos.pieces(WHITE, PAWN));
    let black_pawns = crate::bitsets::pop_count(pos.pieces(BLACK, PAWN));
    if white_pawns + black_pawns != 1 {
        return false;
    }
    for &color in &[WHITE, BLACK] {
        for &piece in &[KNIGHT, BISHOP, ROOK, QUEEN] {
            if pos.pieces(color, piece) != 0 {
                return false;
            }
        }
    }

    let strong = if white_pawns == 1 { WHITE } else { BLACK };
    let pawn_sq = crate::bitsets::bitscan_forward(pos.pieces(strong, PAWN));

    // The bitbase always has White holding the pawn; when Black is
    // actually the strong side, flip the board vertically and swap
    // the side-to-move label to match.
    let (mut wksq, mut wpsq, mut bksq, us) = if strong == WHITE {
        (pos.king_square(WHITE), pawn_sq, pos.king_square(BLACK), pos.to_move())
    } else {
        (
            mirror_rank(pos.king_square(BLACK)),
            mirror_rank(pawn_sq),
            mirror_rank(pos.king_square(WHITE)),
            1 - pos.to_move(),
        )
    };

    if file(wpsq) > FILE_D {
        wksq = mirror_file(wksq);
        bksq = mirror_file(bksq);
        wpsq = mirror_file(wpsq);
    }

    !probe(us, wksq, wpsq, bksq)
}

fn mirror_rank(sq: Square) -> Square {
    square(file(sq), 7 - rank(sq))
}

fn mirror_file(sq: Square) -> Square {
    square(7 - file(sq), rank(sq))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_draw_position() {
        // White king boxed in front of its own pawn, black king
        // directly opposing it on the queening file: a known draw
        // regardless of the side to move.
        let pos = Position::from_fen("8/8/8/8/4k3/8/4P3/4K3 w - - 0 1").unwrap();
        assert!(is_recognized_draw(&pos));
    }

    #[test]
    fn test_winning_position_not_reported_as_draw() {
        // White king supporting its pawn well ahead of a far-off
        // black king: a textbook win, must not be reported as a
        // recognized draw.
        let winning = Position::from_fen("8/8/1k6/8/8/2P5/2K5/8 w - - 0 1").unwrap();
        assert!(!is_recognized_draw(&winning));
    }

    #[test]
    fn test_non_kpk_material_not_recognized() {
        let pos = Position::startpos();
        assert!(!is_recognized_draw(&pos));
    }
}
