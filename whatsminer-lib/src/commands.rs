//! Typed wrappers for the btminer API commands.
//!
//! Read-only commands go out in plaintext. Everything that changes the
//! miner is privileged and goes through [`Whatsminer::send_privileged`].
//! The typed wrappers reject `STATUS: "E"` replies with
//! [`WMError::Protocol`].

use crate::constants::DEFAULT_MINER_INFO_FIELDS;
use crate::device::Whatsminer;
use crate::error::WMError;
use crate::logs::{LogDownload, LogFile};
use crate::message::{Command, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum CommandName {
    // Plaintext
    Summary,
    Pools,
    Edevs,
    Devdetails,
    GetPsu,
    GetVersion,
    GetToken,
    Status,
    GetMinerInfo,
    GetErrorCode,

    // Token + encryption
    UpdatePools,
    RestartBtminer,
    PowerOff,
    PowerOn,
    SetLed,
    SetLowPower,
    Reboot,
    FactoryReset,
    UpdatePwd,
    NetConfig,
    DownloadLogs,
    SetTargetFreq,
    EnableBtminerFastBoot,
    DisableBtminerFastBoot,
    EnableWebPools,
    DisableWebPools,
    SetHostname,
    SetZone,
    LoadLog,
    SetPowerPct,
    PrePowerOn,
}

impl CommandName {
    pub const ALL: [CommandName; 31] = [
        CommandName::Summary,
        CommandName::Pools,
        CommandName::Edevs,
        CommandName::Devdetails,
        CommandName::GetPsu,
        CommandName::GetVersion,
        CommandName::GetToken,
        CommandName::Status,
        CommandName::GetMinerInfo,
        CommandName::GetErrorCode,
        CommandName::UpdatePools,
        CommandName::RestartBtminer,
        CommandName::PowerOff,
        CommandName::PowerOn,
        CommandName::SetLed,
        CommandName::SetLowPower,
        CommandName::Reboot,
        CommandName::FactoryReset,
        CommandName::UpdatePwd,
        CommandName::NetConfig,
        CommandName::DownloadLogs,
        CommandName::SetTargetFreq,
        CommandName::EnableBtminerFastBoot,
        CommandName::DisableBtminerFastBoot,
        CommandName::EnableWebPools,
        CommandName::DisableWebPools,
        CommandName::SetHostname,
        CommandName::SetZone,
        CommandName::LoadLog,
        CommandName::SetPowerPct,
        CommandName::PrePowerOn,
    ];

    /// Whether the command needs the token handshake and encryption.
    pub fn requires_auth(&self) -> bool {
        !matches!(
            self,
            CommandName::Summary
                | CommandName::Pools
                | CommandName::Edevs
                | CommandName::Devdetails
                | CommandName::GetPsu
                | CommandName::GetVersion
                | CommandName::GetToken
                | CommandName::Status
                | CommandName::GetMinerInfo
                | CommandName::GetErrorCode
        )
    }

    /// Look up a command by its wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_ref() == name)
    }
}

impl From<CommandName> for Command {
    fn from(name: CommandName) -> Self {
        Command::new(name.to_string())
    }
}

// --- Msg payloads ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PsuInfo {
    pub name: String,
    pub hw_version: String,
    pub sw_version: String,
    pub model: String,
    #[serde(rename = "iin")]
    pub input_current: String,
    pub vin: String,
    pub fan_speed: String,
    pub version: String,
    pub serial_no: String,
    pub vendor: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionInfo {
    pub api_ver: String,
    pub fw_ver: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerStatus {
    pub btmineroff: String,
    #[serde(rename = "Firmware Version")]
    pub firmware_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerInfo {
    pub ip: Option<String>,
    pub proto: Option<String>,
    pub netmask: Option<String>,
    pub gateway: Option<String>,
    pub dns: Option<String>,
    pub hostname: Option<String>,
    pub mac: Option<String>,
    pub ledstat: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorCodes {
    pub error_code: Vec<Value>,
}

// --- Parameters ---

/// One pool slot of `update_pools`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    pub url: String,
    pub worker: String,
    pub password: String,
}

impl Pool {
    pub fn new(url: impl Into<String>, worker: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            worker: worker.into(),
            password: password.into(),
        }
    }
}

pub const MAX_POOLS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedColor {
    Red,
    Green,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedSetting {
    /// Let the firmware drive the LEDs.
    Auto,
    /// Blink `color`; times are in milliseconds.
    Manual {
        color: LedColor,
        period: u32,
        duration: u32,
        start: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetConfig {
    Dhcp,
    Static {
        ip: String,
        mask: String,
        gate: String,
        dns: String,
        host: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrePowerOnMessage {
    #[serde(rename = "wait for adjust temp")]
    WaitForAdjustTemp,
    #[serde(rename = "adjust complete")]
    AdjustComplete,
    #[serde(rename = "adjust continue")]
    AdjustContinue,
}

fn flag(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

impl Whatsminer {
    async fn query<T: DeserializeOwned>(&self, command: Command) -> Result<T, WMError> {
        self.send_plain(&command).await?.into_result()?.msg_as()
    }

    async fn query_raw(&self, command: Command) -> Result<Response, WMError> {
        self.send_plain(&command).await?.into_result()
    }

    async fn control(&self, command: Command) -> Result<Response, WMError> {
        self.send_privileged(command).await?.into_result()
    }

    pub async fn summary(&self) -> Result<Response, WMError> {
        self.query_raw(CommandName::Summary.into()).await
    }

    pub async fn pools(&self) -> Result<Response, WMError> {
        self.query_raw(CommandName::Pools.into()).await
    }

    pub async fn edevs(&self) -> Result<Response, WMError> {
        self.query_raw(CommandName::Edevs.into()).await
    }

    pub async fn devdetails(&self) -> Result<Response, WMError> {
        self.query_raw(CommandName::Devdetails.into()).await
    }

    pub async fn get_psu(&self) -> Result<PsuInfo, WMError> {
        self.query(CommandName::GetPsu.into()).await
    }

    pub async fn get_version(&self) -> Result<VersionInfo, WMError> {
        self.query(CommandName::GetVersion.into()).await
    }

    pub async fn status(&self) -> Result<MinerStatus, WMError> {
        self.query(CommandName::Status.into()).await
    }

    /// `info` is a comma-separated field list; `None` asks for all of them.
    pub async fn get_miner_info(&self, info: Option<&str>) -> Result<MinerInfo, WMError> {
        let info = info.unwrap_or(DEFAULT_MINER_INFO_FIELDS);
        self.query(Command::from(CommandName::GetMinerInfo).param("info", info))
            .await
    }

    pub async fn get_error_code(&self) -> Result<ErrorCodes, WMError> {
        self.query(CommandName::GetErrorCode.into()).await
    }

    pub async fn update_pools(&self, pools: &[Pool]) -> Result<Response, WMError> {
        if pools.is_empty() || pools.len() > MAX_POOLS {
            return Err(WMError::InvalidParameter(format!(
                "update_pools takes 1 to {MAX_POOLS} pools, got {}",
                pools.len()
            )));
        }
        let mut command = Command::from(CommandName::UpdatePools);
        for (i, pool) in pools.iter().enumerate() {
            let n = i + 1;
            command = command
                .param(format!("pool{n}"), pool.url.as_str())
                .param(format!("worker{n}"), pool.worker.as_str())
                .param(format!("passwd{n}"), pool.password.as_str());
        }
        self.control(command).await
    }

    pub async fn restart_btminer(&self) -> Result<Response, WMError> {
        self.control(CommandName::RestartBtminer.into()).await
    }

    /// Stop mining. With `respond_before`, the miner answers before acting.
    pub async fn power_off(&self, respond_before: bool) -> Result<Response, WMError> {
        self.control(Command::from(CommandName::PowerOff).param("respbefore", flag(respond_before)))
            .await
    }

    pub async fn power_on(&self, respond_before: bool) -> Result<Response, WMError> {
        self.control(Command::from(CommandName::PowerOn).param("respbefore", flag(respond_before)))
            .await
    }

    pub async fn set_led(&self, setting: &LedSetting) -> Result<Response, WMError> {
        let command = Command::from(CommandName::SetLed);
        let command = match setting {
            LedSetting::Auto => command.param("param", "auto"),
            LedSetting::Manual {
                color,
                period,
                duration,
                start,
            } => command
                .param("color", serde_json::to_value(color).map_err(WMError::Encode)?)
                .param("period", *period)
                .param("duration", *duration)
                .param("start", *start),
        };
        self.control(command).await
    }

    pub async fn set_low_power(&self) -> Result<Response, WMError> {
        self.control(CommandName::SetLowPower.into()).await
    }

    pub async fn reboot(&self) -> Result<Response, WMError> {
        self.control(CommandName::Reboot.into()).await
    }

    pub async fn factory_reset(&self) -> Result<Response, WMError> {
        self.control(CommandName::FactoryReset.into()).await
    }

    /// Change the admin password. Later calls on this handle still use the
    /// old one; build a new handle with [`Whatsminer::with_password`].
    pub async fn update_password(&self, old: &str, new: &str) -> Result<Response, WMError> {
        self.control(
            Command::from(CommandName::UpdatePwd)
                .param("old", old)
                .param("new", new),
        )
        .await
    }

    pub async fn net_config(&self, config: &NetConfig) -> Result<Response, WMError> {
        let command = Command::from(CommandName::NetConfig);
        let command = match config {
            NetConfig::Dhcp => command.param("param", "dhcp"),
            NetConfig::Static {
                ip,
                mask,
                gate,
                dns,
                host,
            } => command
                .param("ip", ip.as_str())
                .param("mask", mask.as_str())
                .param("gate", gate.as_str())
                .param("dns", dns.as_str())
                .param("host", host.as_str()),
        };
        self.control(command).await
    }

    /// Download the miner's log archive into `file`.
    pub async fn download_logs(&self, file: &LogFile) -> Result<LogDownload, WMError> {
        self.session()
            .download_logs(CommandName::DownloadLogs.into(), file)
            .await
    }

    /// Adjust the target frequency by `percent`, from -100 to 100.
    pub async fn set_target_freq(&self, percent: i32) -> Result<Response, WMError> {
        if !(-100..=100).contains(&percent) {
            return Err(WMError::InvalidParameter(format!(
                "target frequency percent must be within -100..=100, got {percent}"
            )));
        }
        self.control(Command::from(CommandName::SetTargetFreq).param("percent", percent.to_string()))
            .await
    }

    pub async fn enable_btminer_fast_boot(&self) -> Result<Response, WMError> {
        self.control(CommandName::EnableBtminerFastBoot.into()).await
    }

    pub async fn disable_btminer_fast_boot(&self) -> Result<Response, WMError> {
        self.control(CommandName::DisableBtminerFastBoot.into()).await
    }

    pub async fn enable_web_pools(&self) -> Result<Response, WMError> {
        self.control(CommandName::EnableWebPools.into()).await
    }

    pub async fn disable_web_pools(&self) -> Result<Response, WMError> {
        self.control(CommandName::DisableWebPools.into()).await
    }

    pub async fn set_hostname(&self, hostname: &str) -> Result<Response, WMError> {
        self.control(Command::from(CommandName::SetHostname).param("hostname", hostname))
            .await
    }

    /// `timezone` is a POSIX TZ string (e.g. `CST-8`), `zonename` its name
    /// (e.g. `Asia/Shanghai`).
    pub async fn set_zone(&self, timezone: &str, zonename: &str) -> Result<Response, WMError> {
        self.control(
            Command::from(CommandName::SetZone)
                .param("timezone", timezone)
                .param("zonename", zonename),
        )
        .await
    }

    /// Forward the miner's logs to a remote collector.
    pub async fn load_log(&self, ip: &str, port: u16, proto: &str) -> Result<Response, WMError> {
        self.control(
            Command::from(CommandName::LoadLog)
                .param("ip", ip)
                .param("port", port.to_string())
                .param("proto", proto),
        )
        .await
    }

    pub async fn set_power_pct(&self, percent: u8) -> Result<Response, WMError> {
        if percent > 100 {
            return Err(WMError::InvalidParameter(format!(
                "power percent must be within 0..=100, got {percent}"
            )));
        }
        self.control(Command::from(CommandName::SetPowerPct).param("percent", percent.to_string()))
            .await
    }

    pub async fn pre_power_on(&self, complete: bool, msg: PrePowerOnMessage) -> Result<Response, WMError> {
        let msg = serde_json::to_value(msg).map_err(WMError::Encode)?;
        self.control(
            Command::from(CommandName::PrePowerOn)
                .param("complete", flag(complete))
                .param("msg", msg),
        )
        .await
    }
}
