//! The `RulesEngine` trait: what the synchronizer asks of a game's rules.
//!
//! Squares are algebraic names (`"e2"`) and positions round-trip through
//! [`RulesEngine::serialize`] / [`RulesEngine::load_position`] so they can
//! be stored on the room row as plain text.

use std::fmt;

use rookline_protocol::{Color, RoomStatus};

use crate::RulesError;

/// A kind of piece, independent of color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceKind {
    /// Lowercase letter as stored in a move row (`p n b r q k`).
    pub fn letter(self) -> char {
        match self {
            Self::Pawn => 'p',
            Self::Knight => 'n',
            Self::Bishop => 'b',
            Self::Rook => 'r',
            Self::Queen => 'q',
            Self::King => 'k',
        }
    }

    /// Parses the lowercase or uppercase letter.
    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'p' => Some(Self::Pawn),
            'n' => Some(Self::Knight),
            'b' => Some(Self::Bishop),
            'r' => Some(Self::Rook),
            'q' => Some(Self::Queen),
            'k' => Some(Self::King),
            _ => None,
        }
    }
}

impl fmt::Display for PieceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// The piece a pawn turns into on the last rank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Promotion {
    #[default]
    Queen,
    Rook,
    Bishop,
    Knight,
}

impl Promotion {
    pub fn piece(self) -> PieceKind {
        match self {
            Self::Queen => PieceKind::Queen,
            Self::Rook => PieceKind::Rook,
            Self::Bishop => PieceKind::Bishop,
            Self::Knight => PieceKind::Knight,
        }
    }

    /// Parses `q r b n` in either case.
    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'q' => Some(Self::Queen),
            'r' => Some(Self::Rook),
            'b' => Some(Self::Bishop),
            'n' => Some(Self::Knight),
            _ => None,
        }
    }
}

/// How a decided game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Checkmate { winner: Color },
    Stalemate,
    Draw,
}

impl Outcome {
    /// The terminal room status this outcome maps to.
    pub fn status(&self) -> RoomStatus {
        match self {
            Self::Checkmate { .. } => RoomStatus::Checkmate,
            Self::Stalemate => RoomStatus::Stalemate,
            Self::Draw => RoomStatus::Draw,
        }
    }

    pub fn winner(&self) -> Option<Color> {
        match self {
            Self::Checkmate { winner } => Some(*winner),
            Self::Stalemate | Self::Draw => None,
        }
    }
}

/// The result of applying one legal move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove<P> {
    /// Position after the move.
    pub position: P,
    /// The side that moved.
    pub mover: Color,
    /// The piece that moved (a promoting pawn is still a pawn).
    pub piece: PieceKind,
    pub from: String,
    pub to: String,
    /// Standard algebraic notation, including `+`/`#` suffixes.
    pub san: String,
    pub captured: Option<PieceKind>,
    /// Set when the move ended the game.
    pub outcome: Option<Outcome>,
}

/// The contract between the synchronizer and a game's rules.
///
/// Implementations are pure: every method takes a position by reference
/// and returns a new value, so a caller can keep an authoritative
/// position and a speculative one side by side.
pub trait RulesEngine: Send + Sync + 'static {
    /// An in-memory position. Cheap to clone.
    type Position: Clone + fmt::Debug + Send + Sync;

    /// The position a new room starts from.
    fn initial_position(&self) -> Self::Position;

    /// Parses a serialized position.
    fn load_position(&self, serialized: &str) -> Result<Self::Position, RulesError>;

    /// Validates and applies a move.
    ///
    /// `promotion` is only consulted when the move is a promotion; a
    /// promoting move without one promotes to a queen.
    fn apply_move(
        &self,
        position: &Self::Position,
        from: &str,
        to: &str,
        promotion: Option<Promotion>,
    ) -> Result<AppliedMove<Self::Position>, RulesError>;

    fn side_to_move(&self, position: &Self::Position) -> Color;

    /// Returns the color and kind of the piece on `square`, if any.
    fn piece_at(
        &self,
        position: &Self::Position,
        square: &str,
    ) -> Result<Option<(Color, PieceKind)>, RulesError>;

    fn is_check(&self, position: &Self::Position) -> bool;

    fn is_checkmate(&self, position: &Self::Position) -> bool;

    fn is_stalemate(&self, position: &Self::Position) -> bool;

    /// Draws other than stalemate (material, move-count rules).
    fn is_draw(&self, position: &Self::Position) -> bool;

    fn serialize(&self, position: &Self::Position) -> String;

    /// Number of half-moves played to reach `position` from the start of
    /// its game.
    fn ply_count(&self, position: &Self::Position) -> u32;

    fn fullmove_number(&self, position: &Self::Position) -> u32;

    /// Returns `true` if the move would be accepted by
    /// [`apply_move`](Self::apply_move).
    fn is_legal(
        &self,
        position: &Self::Position,
        from: &str,
        to: &str,
        promotion: Option<Promotion>,
    ) -> bool {
        self.apply_move(position, from, to, promotion).is_ok()
    }

    /// Returns how the game ended, or `None` while it is still running.
    ///
    /// The winner of a checkmate is the side that just moved.
    fn outcome(&self, position: &Self::Position) -> Option<Outcome> {
        if self.is_checkmate(position) {
            Some(Outcome::Checkmate {
                winner: self.side_to_move(position).opponent(),
            })
        } else if self.is_stalemate(position) {
            Some(Outcome::Stalemate)
        } else if self.is_draw(position) {
            Some(Outcome::Draw)
        } else {
            None
        }
    }
}
