//! Hosts a store, seats two players through it, and plays Scholar's mate.
//!
//! ```text
//! RUST_LOG=debug cargo run -p scholars-mate
//! ```

use std::time::Duration;

use rookline::prelude::*;

type Player = SessionSync<RemoteStore, ChessRules>;

const MOVES: [(&str, &str); 7] = [
    ("e2", "e4"),
    ("e7", "e5"),
    ("f1", "c4"),
    ("b8", "c6"),
    ("d1", "h5"),
    ("g8", "f6"),
    ("h5", "f7"),
];

async fn player(url: &str, name: &str) -> Result<Player, RooklineError> {
    let store = RemoteStore::connect(url).await?;
    Ok(SessionSync::new(
        store,
        ChessRules::new(),
        ParticipantToken(name.to_string()),
        SessionConfig::default(),
    ))
}

/// Applies notifications until `done` holds.
async fn catch_up(
    player: &mut Player,
    done: impl Fn(&Player) -> bool,
) -> Result<(), RooklineError> {
    while !done(player) {
        match tokio::time::timeout(Duration::from_secs(5), player.next_change()).await {
            Ok(Some(event)) => {
                event?;
            }
            Ok(None) => {
                return Err(SyncError::Persistence("change feeds closed".into()).into());
            }
            Err(_) => {
                return Err(SyncError::Persistence("no change within 5s".into()).into());
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging("info");

    let server = StoreServer::builder().bind("127.0.0.1:0").build().await?;
    let url = format!("ws://{}", server.local_addr()?);
    tokio::spawn(server.run());

    let room = RoomManager::new(RemoteStore::connect(&url).await?)
        .create_room()
        .await?;
    tracing::info!(code = %room.code, "room ready");

    let mut white = player(&url, "white-player").await?;
    let mut black = player(&url, "black-player").await?;
    white.open(&room.code).await?;
    black.open(&room.code).await?;
    catch_up(&mut white, |p| p.phase() == SessionPhase::Active).await?;

    for (ply, (from, to)) in MOVES.iter().enumerate() {
        let (mover, opponent) = if ply % 2 == 0 {
            (&mut white, &mut black)
        } else {
            (&mut black, &mut white)
        };
        let record = mover.submit_move(from, to, None).await?;
        println!("{:>2}. {:<6} {}", record.move_number, record.notation, record.color);

        let seen = record.move_number as usize;
        catch_up(opponent, |p| {
            p.moves().len() >= seen
                && (p.input_enabled() || p.phase() == SessionPhase::Terminal)
        })
        .await?;
    }

    if let Some(room) = black.authoritative_room() {
        println!("{}", room.move_log);
        match room.winner {
            Some(winner) => println!("{} ({winner} wins)", room.status),
            None => println!("{}", room.status),
        }
    }

    Ok(())
}
