mod ui;

use anyhow::{Context, Result};
use cardflash_core::device::TargetDevice;
use cardflash_core::partition_table::TableEvent;
use cardflash_core::progress::{FALLBACK_TERMINAL_WIDTH, ProgressReporter};
use cardflash_core::repair::{self, RepairEvent, RepairOptions, RepairReport, RepairStatus};
use cardflash_core::system::{HostSystem, System, tools};
use cardflash_core::verify::Verification;
use cardflash_core::write::FlashSession;
use cardflash_core::{Error, platform, preflight};
use clap::{CommandFactory, Parser};
use console::Term;
use dialoguer::theme::{ColorfulTheme, SimpleTheme, Theme};
use dialoguer::Input;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::cell::{Cell, RefCell};
use std::io::{IsTerminal, stderr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use ui::Palette;

#[cfg(unix)]
use libc::ECHOCTL;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
#[cfg(unix)]
use termios::{TCSANOW, Termios, tcsetattr};

const EXIT_INTERRUPTED: u8 = 130;
const MIB: u64 = 1024 * 1024;
/// Time for the kernel to notice the partitions of a freshly written image.
const SETTLE_AFTER_FLASH: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "cardflash")]
#[command(about = "Flash an image file to an SD card and repair filesystem issues", version)]
#[command(after_help = "Examples:
  cardflash archlinux.img /dev/sdb
  cardflash --force --verify raspios.img /dev/mmcblk0
  cardflash --fix-only /dev/sdb1")]
struct Cli {
    /// Path to the image file to flash
    image: Option<PathBuf>,

    /// Target device (e.g., /dev/sdb, /dev/mmcblk0)
    device: Option<PathBuf>,

    /// Skip confirmation prompts and recreate a corrupted partition table
    #[arg(short = 'f', long)]
    force: bool,

    /// Skip filesystem repair after flashing
    #[arg(short = 'n', long = "no-repair")]
    no_repair: bool,

    /// Verify write after flashing
    #[arg(short = 'v', long)]
    verify: bool,

    /// Only repair filesystems, don't flash
    #[arg(long = "fix-only")]
    fix_only: bool,
}

/// The terminal settings in force before `ECHOCTL` was cleared.
///
/// Kept separate from [`TermRestorer`] so the Ctrl+C handler, which may exit
/// the process without unwinding, can put the terminal back itself.
#[derive(Clone, Copy, Default)]
struct SavedTerm {
    #[cfg(unix)]
    original_termios: Option<Termios>,
}

impl SavedTerm {
    fn restore(&self) {
        #[cfg(unix)]
        if let Some(ref original_termios) = self.original_termios {
            tcsetattr(stderr().as_raw_fd(), TCSANOW, original_termios).ok();
        }
    }
}

/// A helper struct that, on Unix, disables `ECHOCTL` for the terminal.
///
/// `ECHOCTL` is the terminal flag that causes Ctrl+C to be printed as `^C`.
/// Disabling it keeps the cancellation notice on a clean line. The original
/// terminal state is restored when this struct is dropped.
struct TermRestorer {
    saved: SavedTerm,
}

impl TermRestorer {
    fn new() -> Self {
        #[cfg(unix)]
        {
            let fd = stderr().as_raw_fd();
            let original_termios = stderr()
                .is_terminal()
                .then(|| Termios::from_fd(fd).ok())
                .flatten()
                .filter(|original| {
                    let mut quiet = *original;
                    quiet.c_lflag &= !ECHOCTL;
                    tcsetattr(fd, TCSANOW, &quiet).is_ok()
                });
            Self {
                saved: SavedTerm { original_termios },
            }
        }
        #[cfg(not(unix))]
        {
            Self {
                saved: SavedTerm::default(),
            }
        }
    }

    fn saved(&self) -> SavedTerm {
        self.saved
    }
}

impl Drop for TermRestorer {
    fn drop(&mut self) {
        self.saved.restore();
    }
}

/// What an interrupt should do.
#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// The copy loop will stop after its current block.
    Cancel,
    /// Nothing can stop cleanly; leave now.
    Exit,
}

/// Routes Ctrl+C either to the copy loop or straight to process exit.
///
/// While armed, an interrupt clears the `running` flag so the copy can finish
/// its current block and sync before stopping. When disarmed, or on a second
/// interrupt, the process exits at once.
struct Cancellation {
    running: Arc<AtomicBool>,
    armed: Arc<AtomicBool>,
}

/// Keeps the interrupt routed to the copy loop until dropped.
struct Armed<'a>(&'a Cancellation);

impl Drop for Armed<'_> {
    fn drop(&mut self) {
        self.0.armed.store(false, Ordering::SeqCst);
    }
}

fn route_interrupt(armed: &AtomicBool, running: &AtomicBool) -> Interrupt {
    if armed.load(Ordering::SeqCst) && running.swap(false, Ordering::SeqCst) {
        Interrupt::Cancel
    } else {
        Interrupt::Exit
    }
}

impl Cancellation {
    fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            armed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Installs the process-wide handler. `terminal` is restored before an
    /// immediate exit, since destructors do not run on that path.
    fn install(palette: Palette, terminal: SavedTerm) -> Result<Self> {
        let cancel = Self::new();
        let (r, a) = (cancel.running.clone(), cancel.armed.clone());

        ctrlc::set_handler(move || match route_interrupt(&a, &r) {
            Interrupt::Cancel => {
                log::info!("Cancellation requested, finishing the current block");
            }
            Interrupt::Exit => {
                eprintln!();
                palette.warning("Operation cancelled by user");
                terminal.restore();
                std::process::exit(EXIT_INTERRUPTED.into());
            }
        })
        .context("Failed to install the Ctrl+C handler")?;

        Ok(cancel)
    }

    fn arm(&self) -> Armed<'_> {
        self.armed.store(true, Ordering::SeqCst);
        Armed(self)
    }
}

fn init_logging() {
    // Respect RUST_LOG if set; user-facing output does not go through the log.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
}

/// Shows what is about to be overwritten.
fn show_summary(system: &HostSystem, target: &TargetDevice, image_size: u64, palette: Palette) {
    palette.msg2(format!(
        "Image size: {}MB ({})",
        image_size / MIB,
        HumanBytes(image_size)
    ));
    palette.msg2(format!("Target device: {target}"));

    let dev = target.path.to_string_lossy().into_owned();
    palette.msg2("Target device info:");
    match system.run(tools::LSBLK, &[dev.as_str()]) {
        Ok(out) if out.success() => palette.detail(&out.stdout),
        _ => palette.detail("Unable to list device"),
    }

    palette.msg2("Current partition table:");
    match system.run(tools::PARTED, &["-s", dev.as_str(), "print"]) {
        Ok(out) if out.success() => palette.detail(&out.stdout),
        Ok(_) => palette.detail("No valid partition table found"),
        Err(_) => palette.detail("Unable to read partition table"),
    }
}

/// Asks for an explicit "y" or "yes" before anything is overwritten.
fn confirm_overwrite(device: &Path, palette: Palette) -> Result<bool> {
    palette.warning(format!("This will completely overwrite {}!", device.display()));

    let colorful = ColorfulTheme::default();
    let theme: &dyn Theme = if palette.color { &colorful } else { &SimpleTheme };
    let response: String = Input::with_theme(theme)
        .with_prompt("Are you sure you want to continue? (y/N)")
        .allow_empty(true)
        .interact_text()?;

    Ok(matches!(response.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn flash_image(
    system: &HostSystem,
    image: &Path,
    device: &Path,
    image_size: u64,
    verify: bool,
    cancel: &Cancellation,
    palette: Palette,
) -> Result<Verification> {
    palette.msg(format!("Flashing {} to {}", image.display(), device.display()));
    palette.msg2("Unmounting any mounted partitions...");

    let columns = Term::stderr()
        .size_checked()
        .map(|(_, cols)| cols as usize)
        .unwrap_or(FALLBACK_TERMINAL_WIDTH);
    let reporter = RefCell::new(ProgressReporter::new(image_size, columns, Instant::now()));
    let drawn = Cell::new(false);
    let finished = Cell::new(false);

    let finish_write = || {
        if !finished.replace(true) {
            palette.status(&reporter.borrow().finish().render(palette.color));
            eprintln!();
            palette.msg("Image flashed successfully");
            palette.msg2("Syncing filesystem...");
        }
    };

    let verify_pb = if verify {
        ProgressBar::new(0)
    } else {
        ProgressBar::hidden()
    };
    let verify_style = ProgressStyle::default_bar()
        .template(concat!(
            "{prefix:12} [{elapsed_precise}] [{bar:40.magenta/black}] ",
            "{bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        ))?
        .progress_chars("■ ");

    let session = FlashSession::new(image, device, verify, cancel.running.clone());

    palette.msg2("Flashing image with progress...");
    let result = {
        let _armed = cancel.arm();
        session.run(
            system,
            |_| {},
            |bytes| {
                if let Some(frame) = reporter.borrow_mut().sample(bytes, Instant::now()) {
                    palette.status(&frame.render(palette.color));
                    drawn.set(true);
                }
            },
            |len| {
                finish_write();
                palette.msg2("Verifying write...");
                verify_pb.set_length(len);
                verify_pb.set_prefix("Verifying");
                verify_pb.set_style(verify_style.clone());
            },
            |bytes| verify_pb.set_position(bytes),
        )
    };

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            verify_pb.finish_and_clear();
            if drawn.get() && !finished.get() {
                eprintln!();
            }
            if e.is_cancellation() {
                return Err(e.into());
            }
            return Err(anyhow::Error::new(e).context("Failed to flash image"));
        }
    };

    finish_write();
    match &report.verification {
        Verification::Passed => {
            verify_pb.finish_and_clear();
            palette.msg2("Verification successful");
        }
        Verification::Failed { offset } => {
            verify_pb.abandon();
            palette.warning(format!(
                "Verification failed at byte {offset} - data may be corrupted"
            ));
        }
        Verification::Unreadable { offset, reason } => {
            verify_pb.abandon();
            palette.warning(format!(
                "Verification failed: cannot read device at byte {offset}: {reason}"
            ));
        }
        Verification::Skipped => {}
    }
    Ok(report.verification)
}

fn show_repair_event(event: &RepairEvent, palette: Palette) {
    match event {
        RepairEvent::Refreshing(_) => palette.msg2("Refreshing partition table..."),
        RepairEvent::Table(TableEvent::Probing) => {
            palette.msg2("Checking partition table...")
        }
        RepairEvent::Table(TableEvent::Corrupted) => {
            palette.warning("Partition table appears corrupted")
        }
        RepairEvent::Table(TableEvent::Creating(kind)) => {
            palette.msg2(format!("Creating new {kind} partition table..."))
        }
        RepairEvent::Table(TableEvent::CreateFailed(kind)) => {
            palette.msg2(format!("{kind} failed"))
        }
        RepairEvent::Scanning(_) => palette.msg2("Scanning for partitions..."),
        RepairEvent::NoPartitions(base) => {
            palette.warning(format!("No partitions found on {}", base.display()))
        }
        RepairEvent::Found(partitions) => {
            let names: Vec<String> = partitions
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            palette.msg2(format!(
                "Found {} partition(s): {}",
                partitions.len(),
                names.join(" ")
            ));
        }
        RepairEvent::Checking {
            partition,
            fstype,
            tool,
        } => {
            palette.msg2(format!("Checking partition: {}", partition.display()));
            match tool {
                Some(tool) => palette.msg2(format!("  Filesystem: {fstype} - running {tool}")),
                None => palette.msg2(format!(
                    "  Filesystem: {fstype} - no specific repair tool"
                )),
            }
        }
        RepairEvent::Checked(outcome) => match (&outcome.status, outcome.tool) {
            (RepairStatus::ToolFailed { code: Some(code) }, Some(tool)) => {
                palette.warning(format!("  {tool} exited with status {code}"))
            }
            (RepairStatus::ToolFailed { code: None }, Some(tool)) => {
                palette.warning(format!("  {tool} did not complete"))
            }
            (RepairStatus::ToolUnavailable, Some(tool)) => palette.warning(format!(
                "  Filesystem: {} - {tool} not available",
                outcome.fstype
            )),
            _ => {}
        },
    }
}

fn repair_device(
    system: &HostSystem,
    device: &Path,
    force: bool,
    palette: Palette,
) -> Result<ExitCode> {
    palette.msg(format!("Repairing filesystem on {}", device.display()));

    let options = RepairOptions {
        force,
        ..RepairOptions::default()
    };
    let outcome = repair::run(system, device, &options, |event| {
        show_repair_event(&event, palette)
    });
    let report: RepairReport = match outcome {
        Ok(report) => report,
        Err(Error::TableCorrupted(base)) => {
            palette.warning(format!(
                "Partition table on {} is corrupted. Use --force to recreate it.",
                base.display()
            ));
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    palette.msg(format!(
        "Filesystem repair completed for {}",
        report.base_device.display()
    ));
    let failures = report.failures();
    if failures > 0 {
        palette.msg2(format!(
            "{failures} of {} partition check(s) reported problems",
            report.outcomes.len()
        ));
    }
    Ok(ExitCode::SUCCESS)
}

fn usage_error(palette: Palette, message: &str) -> Result<ExitCode> {
    palette.error(message);
    Cli::command().print_help()?;
    Ok(ExitCode::FAILURE)
}

fn run(cli: Cli, palette: Palette, terminal: SavedTerm) -> Result<ExitCode> {
    let cancel = Cancellation::install(palette, terminal)?;
    preflight::require_root()?;
    let system = HostSystem::new();

    if cli.fix_only {
        let Some(device) = cli.device.or(cli.image) else {
            return usage_error(palette, "Device not specified for --fix-only mode");
        };
        preflight::require_block_device(&device)?;
        preflight::require_tools(&system, &tools::REPAIR_REQUIRED)?;
        return repair_device(&system, &device, cli.force, palette);
    }

    let (Some(image), Some(device)) = (cli.image, cli.device) else {
        return usage_error(palette, "Both image file and device must be specified");
    };

    let image_size = preflight::require_image(&image)?;
    preflight::require_block_device(&device)?;
    if !cli.no_repair {
        preflight::require_tools(&system, &tools::REPAIR_REQUIRED)?;
    }

    let target = platform::probe_device(&device);
    preflight::require_capacity(&device, image_size, target.size_bytes)?;
    show_summary(&system, &target, image_size, palette);

    if !cli.force && !confirm_overwrite(&device, palette)? {
        palette.msg2("Operation cancelled");
        return Ok(ExitCode::SUCCESS);
    }

    let verification = flash_image(
        &system,
        &image,
        &device,
        image_size,
        cli.verify,
        &cancel,
        palette,
    )?;
    if verification.is_failed() {
        return Ok(ExitCode::FAILURE);
    }

    if cli.no_repair {
        return Ok(ExitCode::SUCCESS);
    }
    system.settle(SETTLE_AFTER_FLASH);
    repair_device(&system, &device, cli.force, palette)
}

fn main() -> ExitCode {
    init_logging();
    let palette = Palette::detect();
    // This guard will be dropped when main() returns, restoring the terminal.
    let term_restorer = TermRestorer::new();

    let cli = Cli::parse();
    match run(cli, palette, term_restorer.saved()) {
        Ok(code) => code,
        Err(e) => {
            let cancelled = e
                .downcast_ref::<Error>()
                .is_some_and(Error::is_cancellation);
            if cancelled {
                palette.warning(e);
                ExitCode::from(EXIT_INTERRUPTED)
            } else {
                palette.error(format!("{e:#}"));
                ExitCode::FAILURE
            }
        }
    }
}
