use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::rc::Rc;

use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use viewport_camera::input::zoom_about;
use viewport_camera::{Camera, CameraConfig, CameraError, ConfigError, Point};


#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid camera config: {0}")]
    Config(#[from] ConfigError),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("failed to read {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("line {line}: {message}")]
    Script { line: usize, message: String },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "camera-cli", about = "Probe a viewport camera: transforms, zoom bounds and scripted moves")]
struct Cli {
    #[command(flatten)]
    state: StateArgs,

    #[command(subcommand)]
    command: Command,
}

/// Initial camera state. Limits come from `CAMERA_*` environment variables.
#[derive(Args, Debug, Clone, Copy)]
struct StateArgs {
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    x: f64,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    y: f64,
    #[arg(long, default_value_t = 1.0)]
    zoom: f64,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    rotation: f64,
    /// Keep the whole viewport inside the boundary, not just the camera origin.
    #[arg(long)]
    whole_viewport: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a viewport-space point to world space.
    ToWorld {
        #[arg(allow_negative_numbers = true)]
        x: f64,
        #[arg(allow_negative_numbers = true)]
        y: f64,
    },
    /// Convert a world-space point to viewport space.
    ToViewport {
        #[arg(allow_negative_numbers = true)]
        x: f64,
        #[arg(allow_negative_numbers = true)]
        y: f64,
    },
    /// Smallest zoom that keeps the viewport inside the boundary.
    MinZoom {
        #[arg(long)]
        rotation_aware: bool,
    },
    /// Apply camera commands line by line and print every notification.
    Replay {
        #[arg(long, default_value = "-", help = "Script file path, or - for stdin")]
        input: String,
    },
}

/// One line of a replay script.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ScriptCommand {
    Move(Point),
    Pan(Point),
    PanPath(Point),
    Zoom(f64),
    ZoomBy(f64),
    ZoomAt { anchor: Point, delta: f64 },
    Rotate(f64),
    RotateBy(f64),
}

fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let cli = Cli::parse();
    let mut camera = build_camera(cli.state)?;

    match cli.command {
        Command::ToWorld { x, y } => print_json(&camera.transform_viewport_to_world(Point::new(x, y))),
        Command::ToViewport { x, y } => print_json(&camera.transform_world_to_viewport(Point::new(x, y))),
        Command::MinZoom { rotation_aware } => {
            print_json(&json!({ "minZoomLevel": camera.min_zoom_level(rotation_aware) }))
        }
        Command::Replay { input } => run_replay(&mut camera, &input),
    }
}

fn build_camera(state: StateArgs) -> Result<Camera, CliError> {
    let mut config = CameraConfig::from_env()?;
    if state.whole_viewport {
        config.restrict_whole_viewport = true;
    }
    let mut camera = Camera::with_config(&config);
    camera.set_zoom_level(state.zoom);
    camera.set_rotation(state.rotation);
    camera.set_position(Point::new(state.x, state.y));

    let actual = camera.state();
    if actual.position != Point::new(state.x, state.y) || actual.zoom_level.to_bits() != state.zoom.to_bits() {
        tracing::warn!(
            requested_x = state.x,
            requested_y = state.y,
            requested_zoom = state.zoom,
            ?actual,
            "initial camera state rejected by limits"
        );
    }
    Ok(camera)
}

fn run_replay(camera: &mut Camera, input: &str) -> Result<(), CliError> {
    let reader: Box<dyn BufRead> = if input == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(input).map_err(|source| CliError::Read { path: input.to_owned(), source })?;
        Box::new(BufReader::new(file))
    };

    let log: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    camera.on_pan(move |event, state| {
        sink.borrow_mut().push(json!({ "event": "pan", "origin": event.origin, "destination": event.destination, "state": state }));
    });
    let sink = Rc::clone(&log);
    camera.on_zoom(move |event, state| {
        sink.borrow_mut().push(json!({ "event": "zoom", "origin": event.origin, "destination": event.destination, "state": state }));
    });
    let sink = Rc::clone(&log);
    camera.on_rotate(move |event, state| {
        sink.borrow_mut().push(json!({ "event": "rotate", "origin": event.origin, "destination": event.destination, "state": state }));
    });

    let mut applied = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| CliError::Read { path: input.to_owned(), source })?;
        let command =
            parse_command(&line).map_err(|message| CliError::Script { line: index + 1, message })?;
        let Some(command) = command else {
            continue;
        };

        apply_command(camera, command)?;
        camera.flush_notifications();
        for entry in log.borrow_mut().drain(..) {
            println!("{}", serde_json::to_string(&entry)?);
        }
        applied = applied.saturating_add(1);
    }

    eprintln!("replay complete: commands={applied}");
    print_json(&json!({ "state": camera.state() }))
}

fn apply_command(camera: &mut Camera, command: ScriptCommand) -> Result<(), CameraError> {
    match command {
        ScriptCommand::Move(to) => camera.set_position(to),
        ScriptCommand::Pan(by) => camera.set_position_by(by),
        ScriptCommand::PanPath(by) => camera.set_position_by_along_path(by)?,
        ScriptCommand::Zoom(z) => camera.set_zoom_level(z),
        ScriptCommand::ZoomBy(dz) => camera.set_zoom_level_by(dz),
        ScriptCommand::ZoomAt { anchor, delta } => zoom_about(camera, anchor, delta),
        ScriptCommand::Rotate(r) => camera.set_rotation(r),
        ScriptCommand::RotateBy(dr) => camera.set_rotation_by(dr),
    }
    Ok(())
}

/// Parse one script line. Blank lines and `#` comments yield `None`.
fn parse_command(line: &str) -> Result<Option<ScriptCommand>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut parts = line.split_whitespace();
    let Some(name) = parts.next() else {
        return Ok(None);
    };
    let args = parts
        .map(|raw| raw.parse::<f64>().map_err(|_| format!("invalid number `{raw}`")))
        .collect::<Result<Vec<_>, _>>()?;

    let command = match (name, args.as_slice()) {
        ("move", [x, y]) => ScriptCommand::Move(Point::new(*x, *y)),
        ("pan", [dx, dy]) => ScriptCommand::Pan(Point::new(*dx, *dy)),
        ("pan-path", [dx, dy]) => ScriptCommand::PanPath(Point::new(*dx, *dy)),
        ("zoom", [z]) => ScriptCommand::Zoom(*z),
        ("zoom-by", [dz]) => ScriptCommand::ZoomBy(*dz),
        ("zoom-at", [x, y, dz]) => ScriptCommand::ZoomAt { anchor: Point::new(*x, *y), delta: *dz },
        ("rotate", [r]) => ScriptCommand::Rotate(*r),
        ("rotate-by", [dr]) => ScriptCommand::RotateBy(*dr),
        (
            "move" | "pan" | "pan-path" | "zoom" | "zoom-by" | "zoom-at" | "rotate" | "rotate-by",
            _,
        ) => return Err(format!("wrong number of arguments for `{name}`")),
        _ => return Err(format!("unknown command `{name}`")),
    };
    Ok(Some(command))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
