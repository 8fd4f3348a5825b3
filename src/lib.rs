//! A chess rules engine and alpha-beta search engine, exposed to the
//! outside world through a UCI adapter.
//!
//! The crate is organized bottom-up: `basetypes` and `bitsets` define
//! the primitive vocabulary, `attacks` builds the magic-bitboard
//! sliding-attack database and the other precomputed tables, `moves`
//! and `position` implement the board and its incremental state,
//! `movegen` and `move_predicates` generate and classify moves,
//! `eval` and `kpk` score a position, and `search` ties everything
//! together under iterative deepening. `uci` is the only module aware
//! of the text protocol.

#[macro_use]
extern crate lazy_static;
extern crate regex;
#[macro_use]
extern crate log;

pub mod basetypes;
pub mod bitsets;
pub mod prng;
pub mod zobrist;
pub mod castling;
pub mod attacks;
pub mod moves;
pub mod position;
pub mod movegen;
pub mod move_predicates;
pub mod kpk;
pub mod pawn_cache;
pub mod eval;
pub mod tt;
pub mod history;
pub mod ordering;
pub mod search;
pub mod uci;
pub mod error;

pub use basetypes::*;
pub use error::{EngineError, ErrorKind};
pub use position::Position;
