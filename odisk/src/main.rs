use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use odisk_core::announce::{AnnouncingNotifier, LogPublisher, ServiceRecord};
use odisk_core::config::ServerConfig;
use odisk_core::registry::DiskRegistry;
use odisk_core::service::{DiskService, disk_basename, parse_range_header};
use odisk_core::{DiskError, DiskInfo, DiskKind, DriveState, platform};
use std::fs::File;
use std::io::{BufWriter, IsTerminal, Write, stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const BAR_TEMPLATE: &str =
    "{prefix:12} [{elapsed_precise}] [{bar:40.green/black}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

#[derive(Parser)]
#[command(name = "odisk")]
#[command(about = "Share optical drives and disk images over the network", version)]
struct Cli {
    /// Configuration file
    #[arg(long, short, env = "ODISK_CONFIG", default_value = "/etc/odisk/odisk.toml", global = true)]
    config: PathBuf,

    /// Directory holding the shared disk images
    #[arg(long, env = "ODISK_ROOT", global = true)]
    root: Option<PathBuf>,

    /// Address announced to discovery clients
    #[arg(long, env = "ODISK_HOST", global = true)]
    host: Option<String>,

    /// Port the disk server listens on
    #[arg(long, env = "ODISK_PORT", global = true)]
    port: Option<u16>,

    /// Also share removable block devices
    #[arg(long, env = "ODISK_INCLUDE_REMOVABLE", global = true)]
    include_removable: bool,

    /// Log filter, used when RUST_LOG is unset
    #[arg(long, env = "ODISK_LOG", default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the shared disks
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one disk
    Stat {
        /// Session id (disk1) or stable id
        #[arg(required = true)]
        disk: String,

        #[arg(long)]
        json: bool,
    },
    /// Copy a byte range of a disk to a file
    Read {
        /// Disk to read; asks interactively when omitted
        disk: Option<String>,

        /// HTTP-style range, e.g. bytes=0-2047
        #[arg(short, long, default_value = "bytes=0-")]
        range: String,

        /// Output file
        #[arg(short, long, required = true)]
        output: PathBuf,
    },
    /// Store an image file in the image root
    Ingest {
        /// Image file to store
        #[arg(required = true)]
        image: PathBuf,

        /// Name to store it under; defaults to the file name
        #[arg(long)]
        name: Option<String>,
    },
    /// Print the discovery record for the current disks
    Announce {
        #[arg(long)]
        json: bool,
    },
    /// Eject the media from a drive
    Eject {
        /// Drive to eject; asks interactively when omitted
        disk: Option<String>,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

impl Cli {
    /// The configuration file with command-line overrides applied.
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = ServerConfig::load(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        if let Some(host) = &self.host {
            config.host = Some(host.clone());
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config.include_removable |= self.include_removable;
        Ok(config)
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_service(config: &ServerConfig) -> (DiskService, Arc<AnnouncingNotifier<LogPublisher>>) {
    let notifier = Arc::new(AnnouncingNotifier::new(LogPublisher, config));
    let registry = DiskRegistry::new(&config.root, platform::system_probe(), notifier.clone())
        .with_removable_drives(config.include_removable);
    (DiskService::new(Arc::new(registry)), notifier)
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn styled_state(state: DriveState) -> String {
    match state {
        DriveState::Ready => style(state).green().to_string(),
        DriveState::NotReady => style(state).yellow().to_string(),
        DriveState::Open | DriveState::Empty => style(state).dim().to_string(),
    }
}

fn describe(disk: &DiskInfo) -> String {
    let label = if disk.label.is_empty() {
        "(no media)"
    } else {
        disk.label.as_str()
    };
    format!(
        "{} {} [{}] {}",
        disk.id,
        label,
        disk.kind,
        format_size(disk.size)
    )
}

/// Presents an interactive menu for the user to select a disk.
fn select_disk(disks: &[DiskInfo], prompt: &str) -> Result<String> {
    if disks.is_empty() {
        return Err(anyhow!("No disks found."));
    }
    if !stdout().is_terminal() {
        return Err(anyhow!("No disk given and no terminal to ask on."));
    }

    let items: Vec<String> = disks.iter().map(describe).collect();
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(&items)
        .default(0)
        .interact()?;

    Ok(disks[selection].id.clone())
}

fn confirm_operation(prompt: &str) -> Result<bool> {
    let confirmation = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(confirmation)
}

fn progress_bar(prefix: &'static str) -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_prefix(prefix);
    if let Ok(bar_style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
        bar.set_style(bar_style.progress_chars("■ "));
    }
    bar
}

fn print_table(disks: &[DiskInfo]) {
    println!(
        "\n  {:<8} {:<14} {:<10} {:<26} {:>10}  {}",
        "ID", "STABLE ID", "KIND", "LABEL", "SIZE", "STATE"
    );
    println!("  {:-<8} {:-<14} {:-<10} {:-<26} {:->10}  {:-<9}", "", "", "", "", "", "");
    for disk in disks {
        println!(
            "  {:<8} {:<14} {:<10} {:<26} {:>10}  {}",
            disk.id,
            disk.stable_id,
            disk.kind.to_string(),
            disk.label,
            format_size(disk.size),
            styled_state(disk.state)
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    // Cleared by Ctrl+C so long copies stop cleanly.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let config = cli.server_config()?;
    debug!("configuration: {:?}", config);
    let (service, notifier) = open_service(&config);

    match cli.command {
        Commands::List { json } => {
            let disks = service
                .list()
                .with_context(|| format!("listing {}", config.root.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&disks)?);
            } else if disks.is_empty() {
                println!("No disks found in {}.", config.root.display());
            } else {
                println!("Found {} disks:", disks.len());
                print_table(&disks);
            }
        }
        Commands::Stat { disk, json } => {
            let info = service.stat(&disk)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("  Id:        {}", style(&info.id).cyan());
                println!("  Stable id: {}", info.stable_id);
                println!("  Kind:      {}", info.kind);
                println!("  Label:     {}", info.label);
                println!("  Size:      {} ({} bytes)", format_size(info.size), info.size);
                println!("  Path:      {}", info.path.display());
                println!("  State:     {}", styled_state(info.state));
            }
        }
        Commands::Read {
            disk,
            range,
            output,
        } => {
            let (start, end) = parse_range_header(&range)?;
            let id = match disk {
                Some(id) => disk_basename(&id).to_string(),
                None => select_disk(&service.list()?, "Select the disk to READ from")?,
            };
            let disk = service.registry().get(&id)?;
            let state = disk.state();
            if state != DriveState::Ready {
                return Err(DiskError::DeviceNotReady { id, state }.into());
            }

            println!("  Disk:   {}", style(disk.path().display()).cyan());
            println!("  Output: {}", style(output.display()).cyan());
            println!();

            let file = File::create(&output)
                .with_context(|| format!("creating {}", output.display()))?;
            let mut writer = BufWriter::new(file);

            let read_pb = progress_bar("Reading");
            let on_read_start = |len| read_pb.set_length(len);
            let on_progress = |bytes| read_pb.set_position(bytes);

            match disk.copy_to(start, end, &mut writer, running, on_read_start, on_progress) {
                Ok(window) => {
                    writer.flush()?;
                    read_pb.finish_with_message("Read complete.");
                    println!(
                        "\n✨ Read {} of {} to {}.",
                        window.content_range(disk.size()?),
                        style(&id).cyan(),
                        style(output.display()).cyan()
                    );
                }
                Err(e) => {
                    read_pb.finish_with_message("❌ Operation failed.");
                    return Err(e.into());
                }
            }
        }
        Commands::Ingest { image, name } => {
            let name = match name {
                Some(name) => name,
                None => image
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .ok_or_else(|| anyhow!("{} has no file name", image.display()))?,
            };
            let file = File::open(&image).with_context(|| format!("opening {}", image.display()))?;
            let len = file.metadata()?.len();

            let ingest_pb = progress_bar("Storing");
            ingest_pb.set_length(len);
            let result = service.ingest(&name, file, running, |bytes| ingest_pb.set_position(bytes));

            match result {
                Ok(report) => {
                    ingest_pb.finish_with_message("Stored.");
                    println!(
                        "\n✨ Stored {} ({}, sha256 {}).",
                        style(report.path.display()).cyan(),
                        format_size(report.size),
                        report.sha256
                    );
                }
                Err(e) => {
                    ingest_pb.finish_with_message("❌ Operation failed.");
                    return Err(e.into());
                }
            }
        }
        Commands::Announce { json } => {
            service.registry().update()?;
            let record: ServiceRecord = notifier
                .current()
                .ok_or_else(|| anyhow!("no announcement was published"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("{} port {}", style(record.full_name()).cyan(), record.port);
                for (key, value) in &record.txt {
                    println!("  {key}={value}");
                }
            }
        }
        Commands::Eject { disk, yes } => {
            let id = match disk {
                Some(id) => disk_basename(&id).to_string(),
                None => {
                    let drives: Vec<DiskInfo> = service
                        .list()?
                        .into_iter()
                        .filter(|disk| disk.kind != DiskKind::ImageFile)
                        .collect();
                    select_disk(&drives, "Select the drive to EJECT")?
                }
            };
            let disk = service.registry().get(&id)?;

            if !yes && !confirm_operation(&format!("Eject {}?", disk.path().display()))? {
                println!("Eject cancelled.");
                return Ok(());
            }
            disk.eject()
                .with_context(|| format!("ejecting {}", disk.path().display()))?;
            service.registry().update()?;
            println!("Ejected {}.", style(disk.path().display()).cyan());
        }
    }

    Ok(())
}
