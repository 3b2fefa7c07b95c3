//! The game adapter trait and its Bobail implementation.
//!
//! The retrograde engine is parametric in the game: it only ever sees packed
//! 64-bit states, a terminal classifier, and move generation. Everything
//! else — bitboards, rays, symmetries — stays behind this seam.

use crate::board::{self, GameResult, State};
use crate::movegen::{self, Move, Rules};
use crate::symmetry;

/// Terminal classification from the perspective of the side to move.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    Ongoing,
    /// The side to move has already won.
    MoverWins,
    /// The side to move has already lost.
    MoverLoses,
}

/// What the engine needs from a game.
///
/// All states crossing this boundary are packed `u64` values. States handed
/// to the engine must be canonical; `canonicalize` must be idempotent and
/// must not change a state's terminal classification.
pub trait Game: Sync {
    /// The move representation used by [`legal_moves`](Game::legal_moves)
    /// and [`apply`](Game::apply).
    type Move: Copy + PartialEq;

    /// The canonical packed starting state.
    fn starting_state(&self) -> u64;

    /// Representative of the state's symmetry orbit.
    fn canonicalize(&self, packed: u64) -> u64;

    /// Terminal classification for the side to move.
    fn status(&self, packed: u64) -> Status;

    /// Legal moves. Empty for positions where the mover is stuck (which the
    /// engine scores as a loss) and for terminal positions.
    fn legal_moves(&self, packed: u64) -> Vec<Self::Move>;

    /// Apply a move. The result is *not* canonicalized.
    fn apply(&self, packed: u64, mv: Self::Move) -> u64;

    /// Canonical successors of a state.
    fn successors(&self, packed: u64) -> Vec<u64> {
        self.legal_moves(packed)
            .into_iter()
            .map(|m| self.canonicalize(self.apply(packed, m)))
            .collect()
    }
}

/// The Bobail game under a chosen rules variant.
#[derive(Clone, Copy, Debug, Default)]
pub struct Bobail {
    pub rules: Rules,
}

impl Bobail {
    pub fn new(rules: Rules) -> Self {
        Bobail { rules }
    }
}

impl Game for Bobail {
    type Move = Move;

    fn starting_state(&self) -> u64 {
        symmetry::canonical_packed(State::starting_position().pack())
    }

    fn canonicalize(&self, packed: u64) -> u64 {
        symmetry::canonical_packed(packed)
    }

    fn status(&self, packed: u64) -> Status {
        let s = State::unpack(packed);
        match board::check_terminal(&s) {
            GameResult::Ongoing => Status::Ongoing,
            GameResult::WhiteWins => {
                if s.white_to_move {
                    Status::MoverWins
                } else {
                    Status::MoverLoses
                }
            }
            GameResult::BlackWins => {
                if s.white_to_move {
                    Status::MoverLoses
                } else {
                    Status::MoverWins
                }
            }
        }
    }

    fn legal_moves(&self, packed: u64) -> Vec<Move> {
        movegen::generate_moves(&State::unpack(packed), self.rules)
    }

    fn apply(&self, packed: u64, mv: Move) -> u64 {
        movegen::apply_move(&State::unpack(packed), &mv).pack()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_state_is_canonical_and_ongoing() {
        let game = Bobail::default();
        let start = game.starting_state();
        assert_eq!(game.canonicalize(start), start);
        assert_eq!(game.status(start), Status::Ongoing);
    }

    #[test]
    fn successors_are_canonical() {
        let game = Bobail::default();
        let start = game.starting_state();
        for child in game.successors(start) {
            assert_eq!(game.canonicalize(child), child);
        }
    }

    #[test]
    fn status_respects_side_to_move() {
        // Bobail on row 0 = White has won; it is a win exactly when White is
        // the one to move.
        let s = State {
            white_pawns: 0b00111 << 5,
            black_pawns: 0b11111 << 20,
            bobail: 2,
            white_to_move: true,
        };
        let game = Bobail::default();
        assert_eq!(game.status(s.pack()), Status::MoverWins);

        let mut t = s;
        t.white_to_move = false;
        assert_eq!(game.status(t.pack()), Status::MoverLoses);
    }
}
