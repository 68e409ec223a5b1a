use std::env;
use std::io;
use std::path::PathBuf;

#[allow(dead_code)]
#[path = "../board.rs"]
mod board;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::Session;

const DEFAULT_PATH: &str = "transcripts/emulator-session.log";

/// Replays a scripted session covering the coordination features and writes
/// the transcript.
fn main() -> io::Result<()> {
    let path = env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_PATH), PathBuf::from);
    let (mut session, _) = Session::new(2_500, Some(&path))?;

    for command in [
        "status",
        "press e5",
        "press light",
        "speed 192",
        "press ent",
        "speed 192",
        "throttle 120",
        "serial on",
        "speed 168",
        "serial off",
        "tick 1000",
        "save manual",
        "save auto",
        "reboot",
        "load",
        "newgame",
        "corrupt 16",
        "reboot",
        "crystal fail",
        "speed 144",
        "crystal ok",
        "mode computer",
        "press pos",
        "mode user",
        "fault usage",
        "battery 1500",
        "tick 500",
        "status",
    ] {
        let _ = session.handle_command(command)?;
    }

    println!("transcript written to {}", path.display());
    Ok(())
}
