use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use serde_json::Value;
use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use whatsminer_lib::commands::{LedColor, LedSetting, NetConfig, Pool, PrePowerOnMessage};
use whatsminer_lib::{ClientConfig, Command, CommandName, DEFAULT_PORT, LogFile, Whatsminer};

/// Command-line client for the Whatsminer btminer API.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Miner address (IP or hostname).
    #[arg(long, global = true, default_value = "127.0.0.1")]
    host: String,
    #[arg(short, long, global = true, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Admin password, needed for privileged commands.
    #[arg(long, global = true, env = "WHATSMINER_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Connect and read timeout in seconds; 0 waits forever.
    #[arg(short, long, global = true, default_value_t = 10)]
    timeout: u64,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long, global = true)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    Summary,
    Pools,
    Edevs,
    Devdetails,
    GetPsu,
    GetVersion,
    GetToken,
    Status,
    GetMinerInfo {
        /// Comma-separated fields, e.g. `ip,mac`.
        #[arg(long)]
        info: Option<String>,
    },
    GetErrorCode,
    /// Replace the pool list; pass each pool as `url,worker,password`.
    UpdatePools {
        #[arg(required = true, num_args = 1..=3, value_parser = parse_pool)]
        pools: Vec<Pool>,
    },
    RestartBtminer,
    PowerOff {
        /// Ask the miner to answer before acting.
        #[arg(long)]
        respond_before: bool,
    },
    PowerOn {
        #[arg(long)]
        respond_before: bool,
    },
    SetLed {
        /// Leave the LEDs to the firmware.
        #[arg(long, conflicts_with = "color")]
        auto: bool,
        #[arg(long, value_enum, required_unless_present = "auto")]
        color: Option<Color>,
        #[arg(long, default_value_t = 1000)]
        period: u32,
        #[arg(long, default_value_t = 500)]
        duration: u32,
        #[arg(long, default_value_t = 0)]
        start: u32,
    },
    SetLowPower,
    Reboot,
    FactoryReset,
    UpdatePwd {
        #[arg(long)]
        new: String,
    },
    /// Switch to DHCP, or to a static address when `--ip` is given.
    NetConfig {
        #[arg(long, requires_all = ["mask", "gate", "dns", "hostname"])]
        ip: Option<String>,
        #[arg(long)]
        mask: Option<String>,
        #[arg(long)]
        gate: Option<String>,
        #[arg(long)]
        dns: Option<String>,
        #[arg(long)]
        hostname: Option<String>,
    },
    DownloadLogs {
        /// Directory to save the archive in.
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        /// File name without extension; defaults to a timestamped name.
        #[arg(long)]
        name: Option<String>,
    },
    SetTargetFreq {
        #[arg(allow_hyphen_values = true)]
        percent: i32,
    },
    EnableBtminerFastBoot,
    DisableBtminerFastBoot,
    EnableWebPools,
    DisableWebPools,
    SetHostname {
        hostname: String,
    },
    SetZone {
        /// POSIX TZ string, e.g. `CST-8`.
        timezone: String,
        /// Zone name, e.g. `Asia/Shanghai`.
        zonename: String,
    },
    /// Forward the miner's logs to a remote collector.
    LoadLog {
        ip: String,
        #[arg(value_name = "PORT")]
        collector_port: u16,
        #[arg(default_value = "udp")]
        proto: String,
    },
    SetPowerPct {
        percent: u8,
    },
    PrePowerOn {
        #[arg(long)]
        complete: bool,
        #[arg(long, value_enum, default_value_t = PowerOnMessage::WaitForAdjustTemp)]
        msg: PowerOnMessage,
    },
    /// Send any command; privileged ones go through the token handshake.
    Raw {
        cmd: String,
        /// Extra parameters as a JSON object.
        #[arg(long)]
        params: Option<String>,
        /// Force the encrypted path for commands this tool does not know.
        #[arg(long)]
        privileged: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Color {
    Red,
    Green,
}

impl From<Color> for LedColor {
    fn from(color: Color) -> Self {
        match color {
            Color::Red => LedColor::Red,
            Color::Green => LedColor::Green,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PowerOnMessage {
    WaitForAdjustTemp,
    AdjustComplete,
    AdjustContinue,
}

impl From<PowerOnMessage> for PrePowerOnMessage {
    fn from(msg: PowerOnMessage) -> Self {
        match msg {
            PowerOnMessage::WaitForAdjustTemp => PrePowerOnMessage::WaitForAdjustTemp,
            PowerOnMessage::AdjustComplete => PrePowerOnMessage::AdjustComplete,
            PowerOnMessage::AdjustContinue => PrePowerOnMessage::AdjustContinue,
        }
    }
}

fn parse_pool(s: &str) -> Result<Pool, String> {
    match s.splitn(3, ',').collect::<Vec<_>>().as_slice() {
        [url, worker, password] => Ok(Pool::new(*url, *worker, *password)),
        _ => Err(format!("expected `url,worker,password`, got `{s}`")),
    }
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    // Results go to stdout; keep logs on stderr.
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    match run(cli).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    }
}

fn client_config(timeout: u64) -> ClientConfig {
    match timeout {
        0 => ClientConfig::without_timeouts(),
        secs => ClientConfig::default().with_timeout(Duration::from_secs(secs)),
    }
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).context("Failed to render result")
}

async fn run(cli: Cli) -> Result<Value> {
    let mut miner = Whatsminer::new(cli.host.clone(), cli.port).with_config(client_config(cli.timeout));
    if let Some(password) = cli.password.clone() {
        miner = miner.with_password(password);
    }
    let target = format!("{}:{}", cli.host, cli.port);

    let output = match cli.command {
        Cmd::Summary => to_json(miner.summary().await?)?,
        Cmd::Pools => to_json(miner.pools().await?)?,
        Cmd::Edevs => to_json(miner.edevs().await?)?,
        Cmd::Devdetails => to_json(miner.devdetails().await?)?,
        Cmd::GetPsu => to_json(miner.get_psu().await?)?,
        Cmd::GetVersion => to_json(miner.get_version().await?)?,
        Cmd::GetToken => to_json(miner.get_token().await?)?,
        Cmd::Status => to_json(miner.status().await?)?,
        Cmd::GetMinerInfo { info } => to_json(miner.get_miner_info(info.as_deref()).await?)?,
        Cmd::GetErrorCode => to_json(miner.get_error_code().await?)?,
        Cmd::UpdatePools { pools } => to_json(miner.update_pools(&pools).await?)?,
        Cmd::RestartBtminer => to_json(miner.restart_btminer().await?)?,
        Cmd::PowerOff { respond_before } => to_json(miner.power_off(respond_before).await?)?,
        Cmd::PowerOn { respond_before } => to_json(miner.power_on(respond_before).await?)?,
        Cmd::SetLed {
            auto,
            color,
            period,
            duration,
            start,
        } => {
            let setting = match (auto, color) {
                (true, _) => LedSetting::Auto,
                (false, Some(color)) => LedSetting::Manual {
                    color: color.into(),
                    period,
                    duration,
                    start,
                },
                (false, None) => bail!("set-led needs --auto or --color"),
            };
            to_json(miner.set_led(&setting).await?)?
        }
        Cmd::SetLowPower => to_json(miner.set_low_power().await?)?,
        Cmd::Reboot => to_json(miner.reboot().await?)?,
        Cmd::FactoryReset => to_json(miner.factory_reset().await?)?,
        Cmd::UpdatePwd { new } => {
            let old = cli.password.as_deref().context("update-pwd needs the current --password")?;
            to_json(miner.update_password(old, &new).await?)?
        }
        Cmd::NetConfig {
            ip,
            mask,
            gate,
            dns,
            hostname,
        } => {
            let config = match (ip, mask, gate, dns, hostname) {
                (None, ..) => NetConfig::Dhcp,
                (Some(ip), Some(mask), Some(gate), Some(dns), Some(host)) => NetConfig::Static {
                    ip,
                    mask,
                    gate,
                    dns,
                    host,
                },
                _ => bail!("a static address needs --ip, --mask, --gate, --dns and --hostname"),
            };
            to_json(miner.net_config(&config).await?)?
        }
        Cmd::DownloadLogs { dir, name } => {
            let mut file = LogFile::new(dir);
            if let Some(name) = name {
                file = file.with_name(name);
            }
            let download = miner
                .download_logs(&file)
                .await
                .with_context(|| format!("Log download from {target} failed"))?;
            serde_json::json!({
                "path": download.path.display().to_string(),
                "bytes_written": download.bytes_written,
                "header": to_json(download.header)?,
            })
        }
        Cmd::SetTargetFreq { percent } => to_json(miner.set_target_freq(percent).await?)?,
        Cmd::EnableBtminerFastBoot => to_json(miner.enable_btminer_fast_boot().await?)?,
        Cmd::DisableBtminerFastBoot => to_json(miner.disable_btminer_fast_boot().await?)?,
        Cmd::EnableWebPools => to_json(miner.enable_web_pools().await?)?,
        Cmd::DisableWebPools => to_json(miner.disable_web_pools().await?)?,
        Cmd::SetHostname { hostname } => to_json(miner.set_hostname(&hostname).await?)?,
        Cmd::SetZone { timezone, zonename } => to_json(miner.set_zone(&timezone, &zonename).await?)?,
        Cmd::LoadLog {
            ip,
            collector_port,
            proto,
        } => to_json(miner.load_log(&ip, collector_port, &proto).await?)?,
        Cmd::SetPowerPct { percent } => to_json(miner.set_power_pct(percent).await?)?,
        Cmd::PrePowerOn { complete, msg } => to_json(miner.pre_power_on(complete, msg.into()).await?)?,
        Cmd::Raw { cmd, params, privileged } => {
            let command = match params {
                Some(params) => {
                    let params: Value = serde_json::from_str(&params).context("--params must be valid JSON")?;
                    Command::with_params(cmd, &params)?
                }
                None => Command::new(cmd),
            };
            let known_privileged = CommandName::from_wire(command.name()).is_some_and(|c| c.requires_auth());
            let response = if privileged || known_privileged {
                miner.send_privileged(command).await?
            } else {
                miner.send_plain(&command).await?
            };
            to_json(response)?
        }
    };
    Ok(output)
}
