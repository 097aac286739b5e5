mod backend;

use std::path::PathBuf;
use std::process::exit;

use clap::{Args, Parser, Subcommand};
use crossbeam::channel;

use backend::AnyTransport;
use lf_protocol::engine::{load_dump, DetectOptions, Detection, Engine};
use lf_protocol::recover::{self, CancelToken};
use lf_protocol::sniff::{self, SniffOptions};
use lf_protocol::{block0, DownlinkMode};

#[derive(Parser, Debug)]
#[command(name = "t55-tool")]
#[command(about = "T55xx/Q5 tag tool: detection, block I/O, password recovery, command sniffing")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Backend selection shared by the tag-facing commands. Captures are
/// replayed from disk; the simulated tag stands in where a write-capable
/// transport is needed and no reader hardware is attached.
#[derive(Args, Debug)]
struct BackendArgs {
    /// Raw i8 capture file to replay as the tag's response
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,

    /// Use a simulated tag with the given block 0 (hex) instead of a capture
    #[arg(long, value_parser = parse_hex)]
    sim: Option<u32>,

    /// Simulated tag is a Q5/T5555
    #[arg(long)]
    q5: bool,
}

#[derive(Args, Debug)]
struct PasswordArgs {
    /// Access password (hex)
    #[arg(long, value_parser = parse_hex)]
    pwd: Option<u32>,

    /// Safety override: 1 skips the password check with a warning, 2 silently
    #[arg(long, default_value = "0")]
    r#override: u8,
}

#[derive(Args, Debug)]
struct ModeArgs {
    /// Downlink mode: 0 fixed, 1 long-leading-reference, 2 leading-zero, 3 one-of-four
    #[arg(long, default_value = "0")]
    mode: u8,

    /// Probe all four downlink modes in ascending order
    #[arg(long)]
    all_modes: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect the tag configuration from its response
    Detect {
        #[command(flatten)]
        backend: BackendArgs,
        #[command(flatten)]
        pwd: PasswordArgs,
        #[command(flatten)]
        mode: ModeArgs,
        /// Hypothesized block 0 (hex) to break candidate ties
        #[arg(long, value_parser = parse_hex)]
        wanted: Option<u32>,
    },
    /// Read one block
    Read {
        #[command(flatten)]
        backend: BackendArgs,
        #[command(flatten)]
        pwd: PasswordArgs,
        #[command(flatten)]
        mode: ModeArgs,
        /// Block number (0-7)
        #[arg(short, long)]
        block: u8,
        /// Page (0 or 1)
        #[arg(short, long, default_value = "0")]
        page: u8,
    },
    /// Write one block and verify it
    Write {
        #[command(flatten)]
        backend: BackendArgs,
        #[command(flatten)]
        pwd: PasswordArgs,
        #[command(flatten)]
        mode: ModeArgs,
        #[arg(short, long)]
        block: u8,
        #[arg(short, long, default_value = "0")]
        page: u8,
        /// Data word (hex)
        #[arg(short, long, value_parser = parse_hex)]
        data: u32,
        /// Test-mode write
        #[arg(long)]
        test_mode: bool,
        /// Skip the read-back verification
        #[arg(long)]
        no_verify: bool,
    },
    /// Read all 12 blocks to a dump file
    Dump {
        #[command(flatten)]
        backend: BackendArgs,
        #[command(flatten)]
        pwd: PasswordArgs,
        #[command(flatten)]
        mode: ModeArgs,
        /// Output file (12 big-endian words)
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Re-flash a tag from a dump file
    Restore {
        #[command(flatten)]
        backend: BackendArgs,
        #[command(flatten)]
        pwd: PasswordArgs,
        #[command(flatten)]
        mode: ModeArgs,
        /// Dump file (12 big-endian words)
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Enable or disable password protection
    Protect {
        #[command(flatten)]
        backend: BackendArgs,
        #[command(flatten)]
        pwd: PasswordArgs,
        #[command(flatten)]
        mode: ModeArgs,
        /// Clear protection instead of setting it
        #[arg(long)]
        disable: bool,
        /// New password (hex)
        #[arg(long, value_parser = parse_hex)]
        new_pwd: u32,
    },
    /// Brute-force a password range
    Bruteforce {
        #[command(flatten)]
        backend: BackendArgs,
        #[command(flatten)]
        mode: ModeArgs,
        /// First password (hex)
        #[arg(long, value_parser = parse_hex)]
        start: u32,
        /// Last password (hex, inclusive)
        #[arg(long, value_parser = parse_hex)]
        end: u32,
    },
    /// Check passwords from a dictionary
    Chk {
        #[command(flatten)]
        backend: BackendArgs,
        #[command(flatten)]
        mode: ModeArgs,
        /// Dictionary file (hex words, # comments); built-in list otherwise
        #[arg(long)]
        dict: Option<PathBuf>,
        /// Also try the password a white-label cloner derives from this
        /// EM4100 id (hex)
        #[arg(long, value_parser = parse_hex)]
        em_id: Option<u32>,
    },
    /// Recover a corrupted/truncated password by bit mutation
    Recoverpw {
        #[command(flatten)]
        backend: BackendArgs,
        #[command(flatten)]
        mode: ModeArgs,
        /// Expected password (hex)
        #[arg(long, value_parser = parse_hex)]
        pwd: u32,
    },
    /// Reconstruct programmer commands from a raw capture
    Sniff {
        /// Raw i8 capture file
        #[arg(short = 'f', long)]
        file: PathBuf,
        /// Reference width of a zero pulse (samples)
        #[arg(long)]
        w0: Option<usize>,
        /// Reference width of a one pulse (samples)
        #[arg(long)]
        w1: Option<usize>,
        /// Emit packets as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Send an AOR wake-up sequence
    Wakeup {
        #[command(flatten)]
        backend: BackendArgs,
        #[command(flatten)]
        mode: ModeArgs,
        /// Wake-up password (hex)
        #[arg(long, value_parser = parse_hex)]
        pwd: u32,
    },
}

fn parse_hex(s: &str) -> Result<u32, String> {
    let hex = s.strip_prefix("0x").unwrap_or(s);
    u32::from_str_radix(hex, 16).map_err(|e| format!("not a 32-bit hex value: {}", e))
}

fn parse_mode(index: u8) -> DownlinkMode {
    match DownlinkMode::try_from(index) {
        Ok(m) => m,
        Err(_) => {
            eprintln!("downlink mode {} out of range 0-3", index);
            exit(2);
        }
    }
}

fn engine_for(backend: &BackendArgs) -> Engine<AnyTransport> {
    match AnyTransport::from_args(backend) {
        Ok(t) => Engine::new(t),
        Err(e) => {
            eprintln!("error: {}", e);
            exit(1);
        }
    }
}

/// Establish a session configuration before block I/O.
fn detect_session(engine: &mut Engine<AnyTransport>, opts: &DetectOptions) {
    match engine.detect_config(opts) {
        Ok(Detection::Single(_)) => print!("{}", engine.config),
        Ok(Detection::Ambiguous(cands)) => {
            println!("ambiguous detection, {} candidates:", cands.len());
            for c in &cands {
                let name = block0::known_config_match(c.block0)
                    .map(|n| format!(" [{}]", n))
                    .unwrap_or_default();
                println!(
                    "  {} RF/{} inverted={} offset={} block0={:#010x}{}{}",
                    c.modulation,
                    c.bitrate.clock(),
                    c.inverted,
                    c.offset,
                    c.block0,
                    if c.is_q5 { " (Q5)" } else { "" },
                    name
                );
            }
            println!("session kept on the last candidate; pass --wanted to disambiguate");
        }
        Err(e) => {
            eprintln!("detection failed: {}", e);
            exit(1);
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Detect {
            backend,
            pwd,
            mode,
            wanted,
        } => {
            let mut engine = engine_for(&backend);
            let opts = DetectOptions {
                use_password: pwd.pwd.is_some(),
                password: pwd.pwd.unwrap_or(0),
                try_all_modes: mode.all_modes,
                wanted,
                mode: parse_mode(mode.mode),
            };
            detect_session(&mut engine, &opts);
            if let Some(name) = block0::known_config_match(engine.config.block0) {
                println!("known configuration: {}", name);
            }
        }

        Command::Read {
            backend,
            pwd,
            mode,
            block,
            page,
        } => {
            let mut engine = engine_for(&backend);
            let dl = parse_mode(mode.mode);
            detect_session(
                &mut engine,
                &DetectOptions {
                    use_password: pwd.pwd.is_some(),
                    password: pwd.pwd.unwrap_or(0),
                    try_all_modes: mode.all_modes,
                    wanted: None,
                    mode: dl,
                },
            );
            match engine.read_block(
                block,
                page,
                pwd.pwd.is_some(),
                pwd.r#override,
                pwd.pwd.unwrap_or(0),
                engine.config.downlink_mode,
            ) {
                Ok(word) => println!("page {} block {}: {:#010x}", page, block, word),
                Err(e) => {
                    eprintln!("read failed: {}", e);
                    exit(1);
                }
            }
        }

        Command::Write {
            backend,
            pwd,
            mode,
            block,
            page,
            data,
            test_mode,
            no_verify,
        } => {
            let mut engine = engine_for(&backend);
            let dl = parse_mode(mode.mode);
            detect_session(
                &mut engine,
                &DetectOptions {
                    use_password: pwd.pwd.is_some(),
                    password: pwd.pwd.unwrap_or(0),
                    try_all_modes: mode.all_modes,
                    wanted: None,
                    mode: dl,
                },
            );
            let dl = engine.config.downlink_mode;
            if let Err(e) = engine.write_block(
                block,
                page,
                pwd.pwd.is_some(),
                test_mode,
                pwd.pwd.unwrap_or(0),
                dl,
                data,
            ) {
                eprintln!("write failed: {}", e);
                exit(1);
            }
            if no_verify {
                println!("wrote {:#010x} to page {} block {} (not verified)", data, page, block);
                return;
            }
            match engine.verify_write(
                block,
                page,
                pwd.pwd.is_some(),
                pwd.r#override,
                pwd.pwd.unwrap_or(0),
                dl,
                data,
            ) {
                Ok(true) => println!("wrote and verified {:#010x} on page {} block {}", data, page, block),
                Ok(false) => {
                    eprintln!("verify failed: tag holds different data");
                    exit(1);
                }
                Err(e) => {
                    eprintln!("verify failed: {}", e);
                    exit(1);
                }
            }
        }

        Command::Dump {
            backend,
            pwd,
            mode,
            output,
        } => {
            let mut engine = engine_for(&backend);
            let dl = parse_mode(mode.mode);
            detect_session(
                &mut engine,
                &DetectOptions {
                    use_password: pwd.pwd.is_some(),
                    password: pwd.pwd.unwrap_or(0),
                    try_all_modes: mode.all_modes,
                    wanted: None,
                    mode: dl,
                },
            );
            match engine.dump(
                &output,
                pwd.pwd.is_some(),
                pwd.r#override,
                pwd.pwd.unwrap_or(0),
                engine.config.downlink_mode,
            ) {
                Ok(words) => {
                    for (i, w) in words.iter().enumerate() {
                        let (page, block) = if i < 8 { (0, i) } else { (1, i - 8) };
                        println!("page {} block {}: {:#010x}", page, block, w);
                    }
                    println!("dump written to {}", output.display());
                }
                Err(e) => {
                    eprintln!("dump failed: {}", e);
                    exit(1);
                }
            }
        }

        Command::Restore {
            backend,
            pwd,
            mode,
            input,
        } => {
            let mut engine = engine_for(&backend);
            let words = match load_dump(&input) {
                Ok(w) => w,
                Err(e) => {
                    eprintln!("cannot load {}: {}", input.display(), e);
                    exit(1);
                }
            };
            let dl = parse_mode(mode.mode);
            detect_session(
                &mut engine,
                &DetectOptions {
                    use_password: pwd.pwd.is_some(),
                    password: pwd.pwd.unwrap_or(0),
                    try_all_modes: mode.all_modes,
                    wanted: None,
                    mode: dl,
                },
            );
            match engine.restore(&words, pwd.pwd.is_some(), pwd.pwd.unwrap_or(0), dl) {
                Ok(()) => println!("restored {} blocks from {}", words.len(), input.display()),
                Err(e) => {
                    eprintln!("restore failed: {}", e);
                    exit(1);
                }
            }
        }

        Command::Protect {
            backend,
            pwd,
            mode,
            disable,
            new_pwd,
        } => {
            let mut engine = engine_for(&backend);
            let dl = parse_mode(mode.mode);
            detect_session(
                &mut engine,
                &DetectOptions {
                    use_password: pwd.pwd.is_some(),
                    password: pwd.pwd.unwrap_or(0),
                    try_all_modes: mode.all_modes,
                    wanted: None,
                    mode: dl,
                },
            );
            println!("warning: an interrupted protect leaves the tag partially configured");
            if engine.protect(
                !disable,
                pwd.pwd.is_some(),
                pwd.r#override,
                pwd.pwd.unwrap_or(0),
                engine.config.downlink_mode,
                new_pwd,
            ) {
                println!(
                    "password protection {}",
                    if disable { "disabled" } else { "enabled" }
                );
            } else {
                eprintln!("protect failed; the tag may be partially reconfigured");
                exit(1);
            }
        }

        Command::Bruteforce {
            backend,
            mode,
            start,
            end,
        } => {
            let mut engine = engine_for(&backend);
            let dl = parse_mode(mode.mode);
            match recover::brute_force(&mut engine, start, end, dl, mode.all_modes, &CancelToken::new()) {
                Ok(Some((pwd, found_mode))) => {
                    println!("password found: {:#010x} (downlink mode: {})", pwd, found_mode)
                }
                Ok(None) => println!("range exhausted, no password found"),
                Err(e) => {
                    eprintln!("bruteforce aborted: {}", e);
                    exit(1);
                }
            }
        }

        Command::Chk {
            backend,
            mode,
            dict,
            em_id,
        } => {
            let mut engine = engine_for(&backend);
            let dl = parse_mode(mode.mode);
            let mut candidates: Vec<u32> = match &dict {
                Some(path) => match recover::load_dictionary(path) {
                    Ok(d) => d,
                    Err(e) => {
                        eprintln!("cannot load dictionary: {}", e);
                        exit(1);
                    }
                },
                None => recover::DEFAULT_PASSWORDS.to_vec(),
            };
            if let Some(id) = em_id {
                candidates.insert(0, recover::cloner_password(id));
            }
            println!("checking {} candidate passwords", candidates.len());
            match recover::dictionary(&mut engine, &candidates, dl, mode.all_modes, &CancelToken::new()) {
                Ok(Some((pwd, found_mode))) => {
                    println!("password found: {:#010x} (downlink mode: {})", pwd, found_mode)
                }
                Ok(None) => println!("dictionary exhausted, no password found"),
                Err(e) => {
                    eprintln!("check aborted: {}", e);
                    exit(1);
                }
            }
        }

        Command::Recoverpw { backend, mode, pwd } => {
            let mut engine = engine_for(&backend);
            let dl = parse_mode(mode.mode);
            match recover::recover_password(&mut engine, pwd, dl, mode.all_modes, &CancelToken::new()) {
                Ok(Some((found, found_mode))) => {
                    println!("password found: {:#010x} (downlink mode: {})", found, found_mode)
                }
                Ok(None) => println!("mutations exhausted, no password found"),
                Err(e) => {
                    eprintln!("recovery aborted: {}", e);
                    exit(1);
                }
            }
        }

        Command::Sniff { file, w0, w1, json } => {
            let source = match lf_reader::replay::ReplaySource::open(&file) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("cannot open {}: {}", file.display(), e);
                    exit(1);
                }
            };
            let opts = SniffOptions {
                width_zero: w0,
                width_one: w1,
            };
            let (tx, rx) = channel::unbounded();
            let count = sniff::scan(source.all_samples(), &opts, &tx);
            drop(tx);
            for pkt in rx.iter() {
                if json {
                    match serde_json::to_string(&pkt) {
                        Ok(line) => println!("{}", line),
                        Err(e) => log::error!("packet serialization: {}", e),
                    }
                } else {
                    let pwd = pkt
                        .password
                        .map(|p| format!(" pwd={:#010x}", p))
                        .unwrap_or_default();
                    let data = pkt
                        .data
                        .map(|d| format!(" data={:#010x}", d))
                        .unwrap_or_default();
                    println!(
                        "{}: page {} block {}{}{} [{}]",
                        pkt.kind.describe(),
                        pkt.page,
                        pkt.block,
                        pwd,
                        data,
                        pkt.raw
                    );
                }
            }
            println!("{} packets reconstructed", count);
        }

        Command::Wakeup { backend, mode, pwd } => {
            let mut engine = engine_for(&backend);
            let dl = parse_mode(mode.mode);
            match engine.wakeup(pwd, dl) {
                Ok(()) => println!("wake-up sent"),
                Err(e) => {
                    eprintln!("wakeup failed: {}", e);
                    exit(1);
                }
            }
        }
    }
}
