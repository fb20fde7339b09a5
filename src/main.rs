use anyhow::{Context, Result};
use boardsight::capture::{load_depth, load_frame};
use boardsight::config::{DEFAULT_CONFIG_PATH, load_config, save_config};
use boardsight::{DepthImage, Perception, format_matrix};
use clap::{Arg, ArgAction, Command};
use dialoguer::Input;
use log::info;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse CLI arguments
    let matches = Command::new("boardsight")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Tracks piece occupancy on a physical chessboard from camera frames")
        .arg(
            Arg::new("empty")
                .long("empty")
                .value_name("PATH")
                .help("Photo of the empty board used for calibration")
                .required(true),
        )
        .arg(
            Arg::new("depth")
                .long("depth")
                .value_name("PATH")
                .help("Depth frame aligned with the empty-board photo"),
        )
        .arg(
            Arg::new("populated")
                .long("populated")
                .value_name("PATH")
                .help("Photo of the board set up in the starting position")
                .required(true),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Tunables file (defaults are used when it does not exist)")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("write-config")
                .long("write-config")
                .help("Write the effective config back to --config before starting")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("frames")
                .value_name("FRAME")
                .help("Frames taken after each move; prompts for paths when omitted")
                .num_args(0..),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);
    let config = load_config(config_path)?;
    if matches.get_flag("write-config") {
        save_config(&config, config_path)?;
        info!("Config written to {}", config_path);
    }

    // Step 1: Calibrate against the empty board
    let empty_path = matches.get_one::<String>("empty").context("--empty is required")?;
    let empty = load_frame(empty_path)?;
    let depth = match matches.get_one::<String>("depth") {
        Some(path) => load_depth(path)?,
        None => DepthImage::new(empty.width(), empty.height()),
    };
    let mut perception = Perception::calibrate(config, &empty, &depth)
        .context("Calibration failed, retake the empty-board photo")?;

    // Step 2: Populated board in starting position becomes the first reference
    let populated_path = matches
        .get_one::<String>("populated")
        .context("--populated is required")?;
    perception.set_reference(load_frame(populated_path)?);
    println!("{}\n", format_matrix(&perception.occupancy_matrix()));

    // Step 3: One update per move
    let mut frames = matches
        .get_many::<String>("frames")
        .map(|v| v.cloned().collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter();
    let interactive = frames.len() == 0;

    loop {
        let next = if interactive {
            let path: String = Input::new()
                .with_prompt("Frame after the move (blank to quit)")
                .allow_empty(true)
                .interact_text()
                .context("Failed to read frame path")?;
            (!path.trim().is_empty()).then(|| path.trim().to_string())
        } else {
            frames.next()
        };
        let Some(path) = next else { break };

        let frame = match load_frame(&path) {
            Ok(frame) => frame,
            Err(e) => {
                eprintln!("{:#}", e);
                continue;
            }
        };

        let update = perception.update(frame).context("Failed to update board")?;
        println!("{}\n", format_matrix(&update.matrix));
        if update.success {
            println!("BWE: {}", perception.bwe_string());
        } else {
            println!("Move has not been recognised. Please try the move again!");
        }
    }

    Ok(())
}
