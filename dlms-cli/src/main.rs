use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use dlms_client::trace::TRACE_FILE;
use dlms_client::{
    AttributeDescriptor, Authentication, DlmsClient, FileTrace, ProfileTable, SessionConfig,
    TraceSink,
};
use dlms_core::ObisCode;
use dlms_transport::{
    SerialSettings, SerialTransport, TcpSettings, TcpTransport, Transport, DEFAULT_DLMS_PORT,
};
use std::path::{Path, PathBuf};
use std::process;

mod reader;

/// Baud rate of a serial line that starts directly in DLMS mode
const DLMS_START_BAUD: u32 = 9600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StartProtocol {
    /// IEC 62056-21 sign-on at 300 baud, then switch to DLMS
    Iec,
    /// Line is already in DLMS mode
    Dlms,
}

/// Read DLMS/COSEM meters over TCP or a serial line
#[derive(Parser, Debug)]
#[command(name = "dlms-reader", author, version, about)]
struct Args {
    /// Manufacturer identification, e.g. lgz
    #[arg(short, long, required_unless_present = "update_settings")]
    manufacturer: Option<String>,

    /// Meter host name or IP address
    #[arg(long, conflicts_with = "serial")]
    host: Option<String>,

    /// TCP port of the meter
    #[arg(short, long, default_value_t = DEFAULT_DLMS_PORT)]
    port: u16,

    /// Serial port, e.g. /dev/ttyUSB0
    #[arg(short, long)]
    serial: Option<String>,

    /// Start protocol of a serial line
    #[arg(long, value_enum, default_value_t = StartProtocol::Iec)]
    start: StartProtocol,

    /// Authentication level: none, low or high
    #[arg(short, long, default_value = "none")]
    auth: Authentication,

    /// Password for low and high authentication
    #[arg(long, default_value = "")]
    password: String,

    /// Append every frame to trace.txt and show frames and read progress
    #[arg(short, long)]
    trace: bool,

    /// Copy the read-out to FILE, logFile.txt when no FILE is given
    #[arg(
        long = "log",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = reader::LOG_FILE
    )]
    log_file: Option<PathBuf>,

    /// Manufacturer settings file (JSON)
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Write the built-in manufacturer settings to FILE and exit
    #[arg(long, value_name = "FILE")]
    update_settings: Option<PathBuf>,

    /// Attribute to read as CLASS:OBIS:ATTRIBUTE, may be repeated
    #[arg(short, long = "read", value_name = "ATTRIBUTE")]
    reads: Vec<AttributeDescriptor>,

    /// Profile generic whose rows are read, may be repeated
    #[arg(long = "profile", value_name = "OBIS")]
    profiles: Vec<ObisCode>,
}

fn init_logging(trace: bool) {
    let level = if trace { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Frame trace for `--trace`: appended to `path` and echoed on stdout
fn trace_sink(path: &Path) -> Result<Box<dyn TraceSink>> {
    let file = FileTrace::create(path)
        .with_context(|| format!("Cannot open {}", path.display()))?
        .with_echo(true);
    Ok(Box::new(file))
}

fn open_transport(args: &Args) -> Result<(Transport, bool)> {
    match (&args.serial, &args.host) {
        (Some(port), _) => {
            let settings = match args.start {
                StartProtocol::Iec => SerialSettings::iec(port.clone()),
                StartProtocol::Dlms => SerialSettings::new(port.clone(), DLMS_START_BAUD),
            };
            Ok((SerialTransport::new(settings).into(), false))
        }
        (None, Some(host)) => {
            let settings = TcpSettings::new(host.clone(), args.port);
            Ok((TcpTransport::new(settings).into(), true))
        }
        (None, None) => bail!("Either --host or --serial is required"),
    }
}

fn session_config(args: &Args, table: &ProfileTable, network: bool) -> Result<SessionConfig> {
    let manufacturer = args
        .manufacturer
        .as_deref()
        .context("--manufacturer is required")?;
    let profile = table
        .find(manufacturer)
        .with_context(|| format!("Unknown manufacturer {}", manufacturer))?;
    Ok(SessionConfig::from_profile(profile, args.auth, network)
        .with_password(&args.password)
        .with_iec_sign_on(args.start == StartProtocol::Iec))
}

async fn run(args: Args) -> Result<()> {
    if let Some(path) = &args.update_settings {
        ProfileTable::builtin().save(path)?;
        println!("Manufacturer settings written to {}", path.display());
        return Ok(());
    }

    let table = match &args.settings {
        Some(path) => ProfileTable::load(path)?,
        None => ProfileTable::builtin(),
    };
    let (transport, network) = open_transport(&args)?;
    let config = session_config(&args, &table, network)?;
    log::debug!("session: {:?}", config);

    let mut client = DlmsClient::cosem(transport, config)?;
    if args.trace {
        client = client.with_trace(trace_sink(Path::new(TRACE_FILE))?);
    }

    let mut report = reader::Report::default();
    if let Some(path) = &args.log_file {
        report = report.with_log_file(path)?;
    }

    let result = reader::read_meter(&mut client, &mut report, &args.reads, &args.profiles).await;
    if let Err(e) = client.close().await {
        log::warn!("closing the connection failed: {}", e);
    }
    result
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.trace);

    if let Err(e) = run(args).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
