//! Standard chess on top of the `chess` crate.
//!
//! The library's `Board` knows piece placement, side to move, castling
//! rights and en passant, but not the move counters. [`ChessPosition`]
//! carries those alongside the board so a position survives a FEN round
//! trip unchanged.

use std::fmt;
use std::str::FromStr;

use ::chess::{Board, BoardStatus, ChessMove, MoveGen, Piece, Rank, Square};
use rookline_protocol::Color;

use crate::{AppliedMove, PieceKind, Promotion, RulesEngine, RulesError};

/// FEN of the standard starting position.
pub const STANDARD_START: &str =
    "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Half-moves without a capture or pawn move after which the game is
/// drawn.
const FIFTY_MOVE_LIMIT: u32 = 100;

/// A chess position with its move counters.
#[derive(Clone, Copy)]
pub struct ChessPosition {
    board: Board,
    halfmove_clock: u32,
    fullmove_number: u32,
}

impl ChessPosition {
    /// The underlying library board.
    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.halfmove_clock
    }
}

impl fmt::Debug for ChessPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChessPosition")
            .field(&to_fen(self))
            .finish()
    }
}

/// [`RulesEngine`] for standard chess.
///
/// Draws cover insufficient material and the fifty-move rule. Threefold
/// repetition is not detected: a position carries no history.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChessRules;

impl ChessRules {
    pub fn new() -> Self {
        Self
    }
}

impl RulesEngine for ChessRules {
    type Position = ChessPosition;

    fn initial_position(&self) -> ChessPosition {
        ChessPosition {
            board: Board::default(),
            halfmove_clock: 0,
            fullmove_number: 1,
        }
    }

    fn load_position(&self, serialized: &str) -> Result<ChessPosition, RulesError> {
        let invalid = || RulesError::InvalidPosition(serialized.to_string());

        let fields: Vec<&str> = serialized.split_whitespace().collect();
        if fields.len() < 4 || fields.len() > 6 {
            return Err(invalid());
        }
        // The library ignores the counters, so hand it fixed ones.
        let board = Board::from_str(&format!("{} 0 1", fields[..4].join(" ")))
            .map_err(|e| {
                RulesError::InvalidPosition(format!("{serialized}: {e}"))
            })?;

        let halfmove_clock = match fields.get(4) {
            Some(field) => field.parse().map_err(|_| invalid())?,
            None => 0,
        };
        let fullmove_number = match fields.get(5) {
            Some(field) => field.parse::<u32>().map_err(|_| invalid())?.max(1),
            None => 1,
        };

        Ok(ChessPosition {
            board,
            halfmove_clock,
            fullmove_number,
        })
    }

    fn apply_move(
        &self,
        position: &ChessPosition,
        from: &str,
        to: &str,
        promotion: Option<Promotion>,
    ) -> Result<AppliedMove<ChessPosition>, RulesError> {
        if self.outcome(position).is_some() {
            return Err(RulesError::GameOver);
        }

        let board = &position.board;
        let src = parse_square(from)?;
        let dst = parse_square(to)?;
        let illegal = || RulesError::IllegalMove {
            from: from.to_string(),
            to: to.to_string(),
        };

        let piece = board
            .piece_on(src)
            .ok_or_else(|| RulesError::EmptySquare(from.to_string()))?;
        let mover = board.side_to_move();
        if board.color_on(src) != Some(mover) {
            return Err(illegal());
        }

        let promotes = piece == Piece::Pawn && dst.get_rank() == last_rank(mover);
        let promote_to = promotes
            .then(|| to_library_piece(promotion.unwrap_or_default().piece()));
        let mv = ChessMove::new(src, dst, promote_to);
        if !MoveGen::new_legal(board).any(|legal| legal == mv) {
            return Err(illegal());
        }

        let captured = captured_piece(board, mv, piece);
        let mut san = san(board, mv, piece, captured.is_some());

        let next = board.make_move_new(mv);
        let halfmove_clock = if piece == Piece::Pawn || captured.is_some() {
            0
        } else {
            position.halfmove_clock.saturating_add(1)
        };
        let fullmove_number = match mover {
            ::chess::Color::White => position.fullmove_number,
            ::chess::Color::Black => position.fullmove_number.saturating_add(1),
        };
        let next = ChessPosition {
            board: next,
            halfmove_clock,
            fullmove_number,
        };

        if self.is_checkmate(&next) {
            san.push('#');
        } else if self.is_check(&next) {
            san.push('+');
        }

        Ok(AppliedMove {
            outcome: self.outcome(&next),
            position: next,
            mover: to_color(mover),
            piece: to_kind(piece),
            from: src.to_string(),
            to: dst.to_string(),
            san,
            captured: captured.map(to_kind),
        })
    }

    fn side_to_move(&self, position: &ChessPosition) -> Color {
        to_color(position.board.side_to_move())
    }

    fn piece_at(
        &self,
        position: &ChessPosition,
        square: &str,
    ) -> Result<Option<(Color, PieceKind)>, RulesError> {
        let sq = parse_square(square)?;
        let board = &position.board;
        Ok(board
            .piece_on(sq)
            .zip(board.color_on(sq))
            .map(|(piece, color)| (to_color(color), to_kind(piece))))
    }

    fn is_check(&self, position: &ChessPosition) -> bool {
        position.board.checkers().popcnt() > 0
    }

    fn is_checkmate(&self, position: &ChessPosition) -> bool {
        position.board.status() == BoardStatus::Checkmate
    }

    fn is_stalemate(&self, position: &ChessPosition) -> bool {
        position.board.status() == BoardStatus::Stalemate
    }

    fn is_draw(&self, position: &ChessPosition) -> bool {
        position.halfmove_clock >= FIFTY_MOVE_LIMIT
            || insufficient_material(&position.board)
    }

    fn serialize(&self, position: &ChessPosition) -> String {
        to_fen(position)
    }

    fn ply_count(&self, position: &ChessPosition) -> u32 {
        let black_to_move = position.board.side_to_move() == ::chess::Color::Black;
        (position.fullmove_number - 1)
            .saturating_mul(2)
            .saturating_add(u32::from(black_to_move))
    }

    fn fullmove_number(&self, position: &ChessPosition) -> u32 {
        position.fullmove_number
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn to_fen(position: &ChessPosition) -> String {
    let board_fen = position.board.to_string();
    let fields: Vec<&str> = board_fen.split_whitespace().take(4).collect();
    format!(
        "{} {} {}",
        fields.join(" "),
        position.halfmove_clock,
        position.fullmove_number
    )
}

fn parse_square(square: &str) -> Result<Square, RulesError> {
    Square::from_str(&square.to_ascii_lowercase())
        .map_err(|_| RulesError::InvalidSquare(square.to_string()))
}

fn last_rank(color: ::chess::Color) -> Rank {
    match color {
        ::chess::Color::White => Rank::Eighth,
        ::chess::Color::Black => Rank::First,
    }
}

fn to_color(color: ::chess::Color) -> Color {
    match color {
        ::chess::Color::White => Color::White,
        ::chess::Color::Black => Color::Black,
    }
}

fn to_kind(piece: Piece) -> PieceKind {
    match piece {
        Piece::Pawn => PieceKind::Pawn,
        Piece::Knight => PieceKind::Knight,
        Piece::Bishop => PieceKind::Bishop,
        Piece::Rook => PieceKind::Rook,
        Piece::Queen => PieceKind::Queen,
        Piece::King => PieceKind::King,
    }
}

fn to_library_piece(kind: PieceKind) -> Piece {
    match kind {
        PieceKind::Pawn => Piece::Pawn,
        PieceKind::Knight => Piece::Knight,
        PieceKind::Bishop => Piece::Bishop,
        PieceKind::Rook => Piece::Rook,
        PieceKind::Queen => Piece::Queen,
        PieceKind::King => Piece::King,
    }
}

/// The piece removed by `mv`, including a pawn taken en passant.
fn captured_piece(board: &Board, mv: ChessMove, piece: Piece) -> Option<Piece> {
    let src = mv.get_source();
    let dst = mv.get_dest();
    match board.piece_on(dst) {
        Some(target) => Some(target),
        None if piece == Piece::Pawn && src.get_file() != dst.get_file() => {
            Some(Piece::Pawn)
        }
        None => None,
    }
}

fn file_char(square: Square) -> char {
    (b'a' + square.get_file().to_index() as u8) as char
}

fn rank_char(square: Square) -> char {
    (b'1' + square.get_rank().to_index() as u8) as char
}

/// Standard algebraic notation for a legal move, without the check
/// suffix.
fn san(board: &Board, mv: ChessMove, piece: Piece, capture: bool) -> String {
    let src = mv.get_source();
    let dst = mv.get_dest();

    if piece == Piece::King {
        let distance =
            dst.get_file().to_index() as i32 - src.get_file().to_index() as i32;
        match distance {
            2 => return "O-O".to_string(),
            -2 => return "O-O-O".to_string(),
            _ => {}
        }
    }

    let mut san = String::new();
    if piece == Piece::Pawn {
        if capture {
            san.push(file_char(src));
            san.push('x');
        }
        san.push_str(&dst.to_string());
        if let Some(promoted) = mv.get_promotion() {
            san.push('=');
            san.push(to_kind(promoted).letter().to_ascii_uppercase());
        }
        return san;
    }

    san.push(to_kind(piece).letter().to_ascii_uppercase());

    // Other pieces of the same kind that could also reach `dst`.
    let rivals: Vec<Square> = MoveGen::new_legal(board)
        .filter(|other| {
            other.get_dest() == dst
                && other.get_source() != src
                && board.piece_on(other.get_source()) == Some(piece)
        })
        .map(|other| other.get_source())
        .collect();
    if !rivals.is_empty() {
        let shares_file = rivals.iter().any(|sq| sq.get_file() == src.get_file());
        let shares_rank = rivals.iter().any(|sq| sq.get_rank() == src.get_rank());
        if !shares_file {
            san.push(file_char(src));
        } else if !shares_rank {
            san.push(rank_char(src));
        } else {
            san.push(file_char(src));
            san.push(rank_char(src));
        }
    }

    if capture {
        san.push('x');
    }
    san.push_str(&dst.to_string());
    san
}

/// Neither side can possibly mate: bare kings, a single minor piece, or
/// only bishops all on one square color.
fn insufficient_material(board: &Board) -> bool {
    let majors_and_pawns = board.pieces(Piece::Pawn).popcnt()
        + board.pieces(Piece::Rook).popcnt()
        + board.pieces(Piece::Queen).popcnt();
    if majors_and_pawns > 0 {
        return false;
    }

    let knights = board.pieces(Piece::Knight).popcnt();
    let bishops = *board.pieces(Piece::Bishop);
    if knights + bishops.popcnt() <= 1 {
        return true;
    }
    if knights > 0 {
        return false;
    }

    let mut shades =
        bishops.map(|sq| (sq.get_rank().to_index() + sq.get_file().to_index()) % 2);
    match shades.next() {
        Some(first) => shades.all(|shade| shade == first),
        None => true,
    }
}
