//! Zobrist hashing tables.
//!
//! The tables are filled once, at process start, from a deterministic
//! PRNG (see [`crate::prng`]) and are read-only afterwards. `Position`
//! keeps three running hashes built out of these tables:
//!
//! * `key` -- XOR of the per-(piece, color, square) keys of every
//!   piece on the board, plus the turn key when black is to move.
//!   `get_key()` additionally folds in the en-passant and
//!   castling-rights keys, which are kept separate here so that
//!   castling-rights and ep changes can be un-XORed independently
//!   during `undo_move`.
//! * `pawn_key` (`kpkey`) -- as `key`, but only pawns and kings (plus
//!   the turn key) contribute. Used to index the pawn-structure
//!   cache.
//! * `material_key` -- not a hash at all: a 64-bit word holding, for
//!   each of the 12 (piece, color) combinations, a 4-bit count
//!   (nibble) of how many such pieces are on the board. Two positions
//!   with the same material key have the same material balance.

use crate::basetypes::{Color, PieceType, Square, BLACK, KING, NO_PIECE, PAWN, WHITE};
use crate::prng::Prng;

/// 64-bit Zobrist hash value.
pub type Key = u64;

pub struct ZobristArrays {
    /// `pieces[color][piece_type][square]`
    pub pieces: [[[Key; 64]; 6]; 2],
    /// One key per castling-rights nibble value (0..16).
    pub castling: [Key; 16],
    /// One key per en-passant file (0..8), plus index 8 for "no ep".
    pub en_passant: [Key; 9],
    /// XORed in when it is black's move.
    pub turn: Key,
}

impl ZobristArrays {
    fn new() -> ZobristArrays {
        let mut prng = Prng::default();
        let mut pieces = [[[0u64; 64]; 6]; 2];
        for color in 0..2 {
            for piece in 0..6 {
                for square in 0..64 {
                    pieces[color][piece][square] = prng.next_u64();
                }
            }
        }
        let mut castling = [0u64; 16];
        for entry in castling.iter_mut() {
            *entry = prng.next_u64();
        }
        castling[0] = 0;
        let mut en_passant = [0u64; 9];
        for entry in en_passant.iter_mut() {
            *entry = prng.next_u64();
        }
        en_passant[8] = 0;
        let turn = prng.next_u64();
        ZobristArrays {
            pieces,
            castling,
            en_passant,
            turn,
        }
    }

    #[inline(always)]
    pub fn piece(&self, color: Color, piece: PieceType, square: Square) -> Key {
        debug_assert!(piece != NO_PIECE);
        self.pieces[color][piece][square]
    }

    #[inline(always)]
    pub fn castling_rights(&self, rights: usize) -> Key {
        self.castling[rights & 0xf]
    }

    #[inline(always)]
    pub fn en_passant_file(&self, file: Option<usize>) -> Key {
        match file {
            Some(f) => self.en_passant[f],
            None => self.en_passant[8],
        }
    }
}

lazy_static! {
    /// The single, process-wide, lazily-initialized table of Zobrist
    /// keys.
    pub static ref ZOBRIST: ZobristArrays = ZobristArrays::new();
}

/// Returns whether `piece` (a `KING` or a `PAWN`) contributes to the
/// pawn-king key.
#[inline(always)]
pub fn contributes_to_pawn_key(piece: PieceType) -> bool {
    piece == KING || piece == PAWN
}

/// Packs a piece count into the material key's nibble for
/// `(color, piece)`.
#[inline(always)]
pub fn material_key_nibble_shift(color: Color, piece: PieceType) -> u32 {
    ((color * 6 + piece) * 4) as u32
}

/// Adds one piece of kind `(color, piece)` to a material key.
#[inline(always)]
pub fn material_key_add(key: u64, color: Color, piece: PieceType) -> u64 {
    key + (1u64 << material_key_nibble_shift(color, piece))
}

/// Removes one piece of kind `(color, piece)` from a material key.
#[inline(always)]
pub fn material_key_remove(key: u64, color: Color, piece: PieceType) -> u64 {
    key - (1u64 << material_key_nibble_shift(color, piece))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_distinct() {
        let z = &*ZOBRIST;
        assert_ne!(z.piece(WHITE, PAWN, 8), z.piece(BLACK, PAWN, 8));
        assert_ne!(z.piece(WHITE, PAWN, 8), z.piece(WHITE, PAWN, 9));
        assert_ne!(z.turn, 0);
    }

    #[test]
    fn test_material_key_roundtrip() {
        use crate::basetypes::QUEEN;
        let mut k: u64 = 0;
        k = material_key_add(k, WHITE, PAWN);
        k = material_key_add(k, WHITE, PAWN);
        k = material_key_add(k, BLACK, QUEEN);
        let shift = material_key_nibble_shift(WHITE, PAWN);
        assert_eq!((k >> shift) & 0xf, 2);
        k = material_key_remove(k, WHITE, PAWN);
        assert_eq!((k >> shift) & 0xf, 1);
    }
}
