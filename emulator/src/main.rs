mod board;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use session::Session;

/// Battery reading of a fresh pair of cells.
const DEFAULT_BATTERY_RAW: u16 = 2_500;

struct Options {
    battery_raw: u16,
    transcript: Option<PathBuf>,
}

fn main() -> io::Result<()> {
    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: chess-emulator [--battery <raw>] [--transcript <path>]");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let (mut session, boot) = Session::new(options.battery_raw, options.transcript.as_deref())?;
    let mut line = String::new();

    writeln!(
        writer,
        "Chess computer emulator ready. Type `help` for commands or `exit` to quit."
    )?;
    for response in boot {
        writeln!(writer, "{response}")?;
    }

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options() -> Result<Options, String> {
    let mut options = Options {
        battery_raw: DEFAULT_BATTERY_RAW,
        transcript: None,
    };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let value = match inline {
            Some(value) => value,
            None => args
                .next()
                .ok_or_else(|| format!("Expected value after {flag}"))?,
        };
        match flag.as_str() {
            "--battery" => {
                options.battery_raw = value
                    .parse()
                    .map_err(|_| format!("Invalid battery reading `{value}`"))?;
            }
            "--transcript" => options.transcript = Some(PathBuf::from(value)),
            other => return Err(format!("Unknown option `{other}`")),
        }
    }
    Ok(options)
}
