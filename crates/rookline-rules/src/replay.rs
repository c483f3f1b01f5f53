use rookline_protocol::MoveRecord;

use crate::{Outcome, RulesEngine, RulesError, movelog};

/// A position rebuilt from committed move rows.
#[derive(Debug, Clone)]
pub struct Replay<P> {
    pub position: P,
    pub move_log: String,
    pub outcome: Option<Outcome>,
}

/// Replays `moves` from the engine's initial position.
///
/// Rows must be ordered by `move_number` starting at 1 with no gaps or
/// duplicates, and each must be legal for the side to move.
pub fn replay<E: RulesEngine>(
    engine: &E,
    moves: &[MoveRecord],
) -> Result<Replay<E::Position>, RulesError> {
    let mut position = engine.initial_position();
    let mut move_log = String::new();

    for (index, mv) in moves.iter().enumerate() {
        let expected = index as u32 + 1;
        if mv.move_number != expected {
            return Err(RulesError::BrokenSequence {
                expected,
                found: mv.move_number,
            });
        }
        if mv.color != engine.side_to_move(&position) {
            return Err(RulesError::IllegalMove {
                from: mv.from_square.clone(),
                to: mv.to_square.clone(),
            });
        }

        let fullmove = engine.fullmove_number(&position);
        let applied = engine.apply_move(
            &position,
            &mv.from_square,
            &mv.to_square,
            movelog::promotion(&mv.notation),
        )?;
        move_log = movelog::append(&move_log, applied.mover, fullmove, &applied.san);
        position = applied.position;
    }

    Ok(Replay {
        outcome: engine.outcome(&position),
        position,
        move_log,
    })
}
