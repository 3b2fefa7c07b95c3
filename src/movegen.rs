//! Move generation: Bobail steps, pawn slides, and complete turns.
//!
//! A full move has two parts played by the same side: the Bobail steps to an
//! empty adjacent square (skipped on the very first turn), then one of the
//! mover's pawns slides along a ray. Ray and neighbor tables are precomputed
//! once for all 25 squares.

use std::sync::LazyLock;

use crate::board::{self, GameResult, State, BOARD_SIZE, NUM_SQUARES};

/// Pawn slide behavior.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Rules {
    /// Pawns must slide to the furthest empty square along the ray
    /// (tournament rules).
    #[default]
    Official,
    /// Pawns may stop on any empty square along the ray.
    Flexible,
}

/// One complete turn.
///
/// On the first turn (and on immediately winning Bobail moves) the pawn part
/// is a placeholder with `pawn_from == pawn_to`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Move {
    /// Bobail destination square (its current square when it does not move).
    pub bobail_to: u8,
    /// Square of the sliding pawn.
    pub pawn_from: u8,
    /// Destination of the sliding pawn.
    pub pawn_to: u8,
}

impl std::fmt::Display for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "B->{} P:{}->{}",
            self.bobail_to, self.pawn_from, self.pawn_to
        )
    }
}

/// The eight movement directions as (row, column) deltas.
const DIRECTIONS: [(i8, i8); 8] = [
    (-1, 0),
    (1, 0),
    (0, 1),
    (0, -1),
    (-1, 1),
    (-1, -1),
    (1, 1),
    (1, -1),
];

struct Tables {
    /// `rays[sq][dir]` — squares along `dir` from `sq` in walking order.
    rays: [[Vec<u8>; 8]; NUM_SQUARES],
    /// `neighbors[sq]` — the adjacent squares (Bobail destinations).
    neighbors: [Vec<u8>; NUM_SQUARES],
}

static TABLES: LazyLock<Tables> = LazyLock::new(|| {
    let mut rays: [[Vec<u8>; 8]; NUM_SQUARES] = std::array::from_fn(|_| std::array::from_fn(|_| Vec::new()));
    let mut neighbors: [Vec<u8>; NUM_SQUARES] = std::array::from_fn(|_| Vec::new());

    for sq in 0..NUM_SQUARES as u8 {
        for (di, &(dr, dc)) in DIRECTIONS.iter().enumerate() {
            let mut r = board::row(sq) as i8 + dr;
            let mut c = board::col(sq) as i8 + dc;
            while (0..BOARD_SIZE as i8).contains(&r) && (0..BOARD_SIZE as i8).contains(&c) {
                rays[sq as usize][di].push(board::square(r as u8, c as u8));
                r += dr;
                c += dc;
            }
            if let Some(&first) = rays[sq as usize][di].first() {
                neighbors[sq as usize].push(first);
            }
        }
    }

    Tables { rays, neighbors }
});

/// Empty adjacent squares the Bobail can step to.
pub fn bobail_destinations(s: &State) -> Vec<u8> {
    let occ = s.occupied();
    TABLES.neighbors[s.bobail as usize]
        .iter()
        .copied()
        .filter(|&d| occ & (1 << d) == 0)
        .collect()
}

/// All pawn slides for the given piece set against an occupancy mask.
pub fn pawn_moves(pawns: u32, occupied: u32, rules: Rules) -> Vec<(u8, u8)> {
    let mut moves = Vec::new();
    let mut remaining = pawns;
    while remaining != 0 {
        let sq = remaining.trailing_zeros() as u8;
        remaining &= remaining - 1;

        for ray in &TABLES.rays[sq as usize] {
            match rules {
                Rules::Flexible => {
                    for &dest in ray {
                        if occupied & (1 << dest) != 0 {
                            break;
                        }
                        moves.push((sq, dest));
                    }
                }
                Rules::Official => {
                    let mut furthest = None;
                    for &dest in ray {
                        if occupied & (1 << dest) != 0 {
                            break;
                        }
                        furthest = Some(dest);
                    }
                    if let Some(dest) = furthest {
                        moves.push((sq, dest));
                    }
                }
            }
        }
    }
    moves
}

/// True for the exact starting position, where the Bobail does not move.
pub fn is_starting_position(s: &State) -> bool {
    *s == State::starting_position()
}

/// All legal turns from `s`.
///
/// Returns an empty vector when the Bobail is boxed in, which loses for the
/// side to move. Should not be called on terminal positions.
pub fn generate_moves(s: &State, rules: Rules) -> Vec<Move> {
    let mut moves = Vec::new();
    let our_pawns = if s.white_to_move {
        s.white_pawns
    } else {
        s.black_pawns
    };

    // First turn: pawn move only, Bobail stays put.
    if is_starting_position(s) {
        for (from, to) in pawn_moves(our_pawns, s.occupied(), rules) {
            moves.push(Move {
                bobail_to: s.bobail,
                pawn_from: from,
                pawn_to: to,
            });
        }
        return moves;
    }

    for bobail_to in bobail_destinations(s) {
        let r = board::row(bobail_to);
        if r == 0 || r as usize == BOARD_SIZE - 1 {
            // The Bobail reaches a home row: the game ends at once, the pawn
            // part of the turn is never played.
            let first_pawn = our_pawns.trailing_zeros() as u8;
            moves.push(Move {
                bobail_to,
                pawn_from: first_pawn,
                pawn_to: first_pawn,
            });
        } else {
            let occupied = s.white_pawns | s.black_pawns | (1u32 << bobail_to);
            for (from, to) in pawn_moves(our_pawns, occupied, rules) {
                moves.push(Move {
                    bobail_to,
                    pawn_from: from,
                    pawn_to: to,
                });
            }
        }
    }

    moves
}

/// Apply a move, flipping the side to move.
pub fn apply_move(s: &State, m: &Move) -> State {
    let mut ns = *s;
    ns.bobail = m.bobail_to;

    let from_bit = 1u32 << m.pawn_from;
    let to_bit = 1u32 << m.pawn_to;
    if s.white_to_move {
        ns.white_pawns = (ns.white_pawns & !from_bit) | to_bit;
    } else {
        ns.black_pawns = (ns.black_pawns & !from_bit) | to_bit;
    }

    ns.white_to_move = !ns.white_to_move;
    ns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corner_has_three_neighbors() {
        assert_eq!(TABLES.neighbors[0].len(), 3);
        assert_eq!(TABLES.neighbors[12].len(), 8);
        assert_eq!(TABLES.neighbors[24].len(), 3);
    }

    #[test]
    fn ray_lengths_from_corner() {
        // From square 0: south and east rays have 4 squares, south-east 4,
        // everything else empty.
        let total: usize = TABLES.rays[0].iter().map(Vec::len).sum();
        assert_eq!(total, 12);
    }

    #[test]
    fn first_turn_keeps_bobail() {
        let s = State::starting_position();
        let moves = generate_moves(&s, Rules::Official);
        assert!(!moves.is_empty());
        assert!(moves.iter().all(|m| m.bobail_to == s.bobail));
    }

    #[test]
    fn apply_flips_side() {
        let s = State::starting_position();
        let moves = generate_moves(&s, Rules::Official);
        let ns = apply_move(&s, &moves[0]);
        assert!(!ns.white_to_move);
        assert!(ns.is_valid());
    }

    #[test]
    fn winning_bobail_move_has_placeholder_pawn() {
        // Bobail adjacent to row 0 with an empty goal square: White can end
        // the game in one step.
        let s = State {
            white_pawns: 0b11111 << 15, // row 3
            black_pawns: 0b11111 << 20, // row 4
            bobail: 7,                  // row 1
            white_to_move: true,
        };
        let moves = generate_moves(&s, Rules::Official);
        let winning: Vec<_> = moves
            .iter()
            .filter(|m| crate::board::row(m.bobail_to) == 0)
            .collect();
        assert!(!winning.is_empty());
        assert!(winning.iter().all(|m| m.pawn_from == m.pawn_to));
    }

    #[test]
    fn flexible_allows_more_moves_than_official() {
        let s = State::starting_position();
        let official = generate_moves(&s, Rules::Official).len();
        let flexible = generate_moves(&s, Rules::Flexible).len();
        assert!(flexible >= official);
    }
}
