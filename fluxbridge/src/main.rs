use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use console::style;
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use fluxbridge_core::device::SerialPort;
use fluxbridge_core::engine::STANDARD_TRACKS;
use fluxbridge_core::format::Direction;
use fluxbridge_core::recovery::{Anomaly, Decision, FixedDecision, UserDecisionSource};
use fluxbridge_core::sim::SimulatedDrive;
use fluxbridge_core::track::{Surface, TRACK_COUNT, TrackSnapshot, TrackStatus};
use fluxbridge_core::transport::FirmwareVersion;
use fluxbridge_core::{ResultCode, TransferController, TransferError, TransferRequest};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{IsTerminal, stderr, stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use libc::ECHOCTL;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
#[cfg(unix)]
use termios::{TCSANOW, Termios, tcsetattr};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "fluxbridge")]
#[command(about = "Transfer floppy disk images through a USB drive interface", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// How to handle track errors: ask, or answer them all the same way
    #[arg(long, value_enum, default_value_t = OnError::Ask, global = true)]
    on_error: OnError,

    /// Firmware version reported by the simulated drive interface
    #[arg(long, default_value = "1.9", value_parser = parse_firmware, global = true)]
    sim_firmware: FirmwareVersion,

    /// Time the simulated drive spends on each track, in milliseconds
    #[arg(long, default_value_t = 20, global = true)]
    sim_delay_ms: u64,

    /// Make a track fail once on the simulated drive, e.g. `12:lower`
    #[arg(long = "sim-bad-track", value_parser = parse_track, global = true)]
    sim_bad_tracks: Vec<(usize, Surface)>,

    /// Log engine activity to stderr (repeat for more detail)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an image file to the disk in the drive
    Write {
        /// Image file to write (.adf, .img, .ima, .st, .scp, .ipf)
        #[arg(required = true)]
        image: PathBuf,

        /// Serial port of the drive interface
        #[arg(short, long)]
        port: Option<String>,

        /// Skip write verification
        #[arg(short = 'n', long = "no-verify")]
        no_verify: bool,

        /// Enable write precompensation
        #[arg(long)]
        precomp: bool,

        /// Do not ask for confirmation before overwriting the disk
        #[arg(short, long)]
        yes: bool,
    },
    /// Read the disk in the drive to an image file
    Read {
        /// Output image file (.adf, .img, .ima, .st, .scp)
        #[arg(required = true)]
        image: PathBuf,

        /// Serial port of the drive interface
        #[arg(short, long)]
        port: Option<String>,

        /// Read 82 tracks instead of 80
        #[arg(long)]
        tracks82: bool,

        /// Read the disk as high density
        #[arg(long)]
        hd: bool,
    },
    /// List serial ports a drive interface may be attached to
    Ports,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OnError {
    Ask,
    Retry,
    Skip,
    Abort,
}

fn parse_firmware(s: &str) -> Result<FirmwareVersion, String> {
    let (major, minor) = s
        .split_once('.')
        .ok_or_else(|| format!("'{s}' is not a MAJOR.MINOR version"))?;
    let major = major.parse().map_err(|_| format!("bad major version in '{s}'"))?;
    let minor = minor.parse().map_err(|_| format!("bad minor version in '{s}'"))?;
    Ok(FirmwareVersion::new(major, minor))
}

fn parse_track(s: &str) -> Result<(usize, Surface), String> {
    let (track, surface) = s
        .split_once(':')
        .ok_or_else(|| format!("'{s}' is not TRACK:SIDE"))?;
    let track = track.parse().map_err(|_| format!("bad track number in '{s}'"))?;
    let surface = match surface.to_ascii_lowercase().as_str() {
        "upper" | "u" | "0" => Surface::Upper,
        "lower" | "l" | "1" => Surface::Lower,
        other => return Err(format!("unknown side '{other}', use upper or lower")),
    };
    Ok((track, surface))
}

/// A helper struct that, on Unix, disables `ECHOCTL` for the terminal while a
/// transfer runs, so Ctrl+C does not print `^C` over the progress bar. The
/// saved settings are put back on drop.
struct EchoGuard {
    #[cfg(unix)]
    saved: Option<Termios>,
}

impl EchoGuard {
    #[cfg(unix)]
    fn install() -> Self {
        let out = stdout();
        if !out.is_terminal() {
            return Self { saved: None };
        }

        let fd = out.as_raw_fd();
        let saved = Termios::from_fd(fd).ok().filter(|original| {
            let mut quiet = *original;
            quiet.c_lflag &= !ECHOCTL;
            tcsetattr(fd, TCSANOW, &quiet).is_ok()
        });
        Self { saved }
    }

    #[cfg(not(unix))]
    fn install() -> Self {
        Self {}
    }
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(saved) = &self.saved {
            tcsetattr(stdout().as_raw_fd(), TCSANOW, saved).ok();
        }
    }
}

/// An anomaly waiting for the operator, with the channel the worker is
/// blocked on.
struct DecisionRequest {
    anomaly: Anomaly,
    reply: mpsc::Sender<Decision>,
}

/// Hands anomalies to the main thread, which prompts between polls and sends
/// the answer back. The worker blocks; the progress bar does not.
struct PromptDecisions {
    requests: mpsc::Sender<DecisionRequest>,
}

impl UserDecisionSource for PromptDecisions {
    fn decide(&self, anomaly: &Anomaly) -> Decision {
        let (reply, answer) = mpsc::channel();
        let request = DecisionRequest {
            anomaly: *anomaly,
            reply,
        };
        if self.requests.send(request).is_err() {
            tracing::warn!(%anomaly, "nobody left to ask, aborting");
            return Decision::Abort;
        }
        answer.recv().unwrap_or(Decision::Abort)
    }
}

/// Prompts for one pending anomaly on the calling thread. dialoguer draws on
/// stderr, so that is the stream that has to be a terminal.
fn answer(bar: &ProgressBar, request: DecisionRequest) {
    let decision = if stderr().is_terminal() {
        bar.suspend(|| ask_operator(&request.anomaly))
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "prompt failed, aborting");
                Decision::Abort
            })
    } else {
        tracing::warn!(anomaly = %request.anomaly, "no terminal to ask on, aborting");
        Decision::Abort
    };
    // The worker may already be gone after a panic.
    let _ = request.reply.send(decision);
}

fn ask_operator(anomaly: &Anomaly) -> Result<Decision> {
    const CHOICES: &[&str] = &["Retry", "Skip and mark the track bad", "Abort"];

    println!("{} {}", style("TRACK ERROR:").red().bold(), anomaly);
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("How do you want to continue?")
        .items(CHOICES)
        .default(0)
        .interact()?;

    Ok(match selection {
        0 => Decision::Retry,
        1 => Decision::SkipAndMarkBad,
        _ => Decision::Abort,
    })
}

/// Presents an interactive menu for the user to select a port.
fn select_port(ports: &[SerialPort]) -> Result<String> {
    if ports.is_empty() {
        return Err(anyhow!(
            "No serial ports found. Connect the drive interface or name one with --port."
        ));
    }
    if ports.len() == 1 {
        return Ok(ports[0].path.display().to_string());
    }

    let items: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the port the drive interface is on")
        .items(&items)
        .default(0)
        .interact()?;

    Ok(ports[selection].path.display().to_string())
}

fn resolve_port(port: Option<String>) -> Result<String> {
    match port {
        Some(port) => Ok(port),
        None => select_port(&fluxbridge_core::platform::get_serial_ports()?),
    }
}

/// Presents a final "Yes/No" confirmation to the user.
fn confirm_operation(prompt: &str) -> Result<bool> {
    let confirmation = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(confirmation)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fluxbridge={level},fluxbridge_core={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

struct Session {
    on_error: OnError,
    drive: SimulatedDrive,
}

impl Session {
    fn from_cli(cli: &Cli) -> Self {
        let firmware = cli.sim_firmware;
        let drive = cli.sim_bad_tracks.iter().fold(
            SimulatedDrive::new()
                .with_firmware(firmware.major, firmware.minor)
                .with_track_delay(Duration::from_millis(cli.sim_delay_ms)),
            |drive, &(track, surface)| drive.with_fault(track, surface, 1),
        );
        Self {
            on_error: cli.on_error,
            drive,
        }
    }

    fn decisions(&self, requests: mpsc::Sender<DecisionRequest>) -> Arc<dyn UserDecisionSource> {
        match self.on_error {
            OnError::Ask => Arc::new(PromptDecisions { requests }),
            OnError::Retry => Arc::new(FixedDecision(Decision::Retry)),
            OnError::Skip => Arc::new(FixedDecision(Decision::SkipAndMarkBad)),
            OnError::Abort => Arc::new(FixedDecision(Decision::Abort)),
        }
    }

    /// Runs one transfer to completion, drawing progress until it finishes.
    fn run(&self, request: TransferRequest, expected_tracks: u8) -> Result<()> {
        let _echo_guard = EchoGuard::install();

        let verb = match request.direction {
            Direction::Read => "Reading",
            Direction::Write => "Writing",
        };
        let path = request.path.clone();

        let bar = ProgressBar::new(u64::from(expected_tracks) * 2);
        bar.set_prefix(verb);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{prefix:12} [{elapsed_precise}] [{bar:40.green/black}] {pos}/{len} tracks {msg}",
                )?
                .progress_chars("■ "),
        );

        let (requests, pending) = mpsc::channel();
        let controller =
            TransferController::new(Arc::new(self.drive.clone()), self.decisions(requests));

        let c = controller.clone();
        ctrlc::set_handler(move || c.request_cancel())
            .context("Could not install the Ctrl+C handler.")?;

        let mode = controller.start(request)?;
        tracing::info!(%mode, "transfer started");

        while controller.is_running() {
            while let Ok(request) = pending.try_recv() {
                answer(&bar, request);
            }
            update_bar(&bar, &controller.snapshot());
            thread::sleep(POLL_INTERVAL);
        }

        let snapshot = controller.snapshot();
        update_bar(&bar, &snapshot);
        let result = controller
            .wait()
            .ok_or_else(|| anyhow!("The transfer finished without reporting a result."))?;

        match &result {
            ResultCode::Success => bar.finish_with_message("done."),
            ResultCode::SuccessWithErrors { .. } => bar.finish_with_message("done, with errors."),
            ResultCode::Failed(_) => bar.abandon_with_message("❌ Operation failed."),
        }

        println!();
        print_track_map(&snapshot);
        println!();

        match result {
            ResultCode::Success => {
                println!(
                    "✨ {} {} image {}.",
                    verb,
                    mode,
                    style(path.display()).cyan()
                );
                Ok(())
            }
            ResultCode::SuccessWithErrors { .. } => {
                println!(
                    "{} {} {} {result}.",
                    style("WARNING:").yellow().bold(),
                    style(path.display()).cyan(),
                    verb.to_lowercase()
                );
                Ok(())
            }
            ResultCode::Failed(TransferError::UserAbort) => {
                Err(anyhow!("Transfer of '{}' was aborted.", path.display()))
            }
            ResultCode::Failed(e) => Err(e.into()),
        }
    }
}

fn update_bar(bar: &ProgressBar, snapshot: &TrackSnapshot) {
    let processed = snapshot.processed() as u64;
    if processed > bar.length().unwrap_or(0) {
        bar.set_length(processed);
    }
    bar.set_position(processed);

    let bad = snapshot.count(TrackStatus::BadAccepted);
    if bad > 0 {
        bar.set_message(format!("({bad} bad)"));
    }
}

/// Prints one row per surface: green for good tracks, red for tracks
/// accepted as bad, a dot for tracks not reached.
fn print_track_map(snapshot: &TrackSnapshot) {
    let ruler: String = (0..TRACK_COUNT)
        .map(|t| {
            if t % 10 == 0 {
                char::from_digit((t / 10 % 10) as u32, 10).unwrap_or(' ')
            } else {
                ' '
            }
        })
        .collect();
    println!("  {:<6} {}", "", style(ruler).dim());

    for surface in Surface::ALL {
        let row: String = (0..TRACK_COUNT)
            .map(|t| match snapshot.get(t, surface) {
                TrackStatus::Untouched => style("·").dim().to_string(),
                TrackStatus::Good => style("■").green().to_string(),
                TrackStatus::BadAccepted => style("■").red().to_string(),
            })
            .collect();
        println!("  {:<6} {row}", surface.to_string());
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let session = Session::from_cli(&cli);

    match cli.command {
        Commands::Write {
            image,
            port,
            no_verify,
            precomp,
            yes,
        } => {
            let port = resolve_port(port)?;

            println!(
                "{} This will overwrite the disk in the drive on '{}'.",
                style("WARNING:").red().bold(),
                port,
            );
            println!("  Image: {}", style(image.display()).cyan());
            if no_verify {
                println!("  Verification is off.");
            }
            println!();

            if !yes && !confirm_operation("Are you sure you want to proceed?")? {
                println!("Write operation cancelled.");
                return Ok(());
            }

            let request = TransferRequest::write(image, port)
                .with_verify(!no_verify)
                .with_precompensation(precomp);
            session.run(request, STANDARD_TRACKS)?;
        }
        Commands::Read {
            image,
            port,
            tracks82,
            hd,
        } => {
            let port = resolve_port(port)?;
            let request = TransferRequest::read(image, port)
                .with_extended_tracks(tracks82)
                .with_high_density(hd);
            let tracks = request.tracks();
            session.run(request, tracks)?;
        }
        Commands::Ports => {
            let ports = fluxbridge_core::platform::get_serial_ports()?;
            if ports.is_empty() {
                println!("No serial ports found.");
                return Ok(());
            }

            println!("Found {} serial ports:", ports.len());
            println!("\n  {:<15} {:<11} {}", "PORT", "USB ID", "DRIVER");
            println!("  {:-<15} {:-<11} {:-<12}", "", "", "");
            for port in ports {
                let usb_id = port
                    .usb_id
                    .map(|(vendor, product)| format!("{vendor:04x}:{product:04x}"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {:<15} {:<11} {}",
                    port.path.display(),
                    usb_id,
                    port.driver.as_deref().unwrap_or("-")
                );
            }
        }
    }

    Ok(())
}
