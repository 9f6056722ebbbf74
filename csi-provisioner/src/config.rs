//! Process configuration.
//!
//! Flags mirror the historical provisioner command line; every flag that
//! names an external location can also come from the environment:
//! - `KUBECONFIG`: kubeconfig path when running out of cluster.
//! - `CSI_ENDPOINT`: path of the plugin's Unix socket.
//!
//! The parsed [`Args`] are validated once into a [`ProvisionerConfig`] of
//! plain values that is handed to the components at construction.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::controller::ControllerConfig;
use crate::error::ConfigError;
use crate::reconciler::{DeletionPolicy, ProvisionerOptions};
use crate::retry::RetryConfig;

#[derive(Debug, Parser)]
#[command(name = "csi-provisioner", version, about = "External CSI volume provisioner")]
pub struct Args {
    /// Name of the provisioner. The provisioner will only provision volumes
    /// for claims that request a StorageClass with a provisioner field set
    /// equal to this name.
    #[arg(long, default_value = "k8s.io/default")]
    pub provisioner: String,

    /// Master URL to build a client config from. Either this or kubeconfig
    /// needs to be set if the provisioner is being run out of cluster.
    #[arg(long)]
    pub master: Option<String>,

    /// Absolute path to the kubeconfig file. Either this or master needs to
    /// be set if the provisioner is being run out of cluster.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Unix socket of the target CSI plugin.
    #[arg(
        long,
        alias = "CSI-Endpoint",
        env = "CSI_ENDPOINT",
        default_value = "/tmp/csi.sock"
    )]
    pub csi_endpoint: PathBuf,

    /// Upper bound for every CSI call.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Prefix of the names volumes are created under.
    #[arg(long, default_value = "pvc")]
    pub volume_name_prefix: String,

    /// Number of concurrent reconciliation workers.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Only delete volumes created by this very process.
    #[arg(long)]
    pub strict_ownership: bool,

    /// Delay before the first retry of a failed reconciliation.
    #[arg(long, default_value = "500ms", value_parser = parse_duration)]
    pub retry_initial_delay: Duration,

    /// Cap on the delay between retries.
    #[arg(long, default_value = "5m", value_parser = parse_duration)]
    pub retry_max_delay: Duration,

    /// Attempts before a failing claim or volume is reported as permanently
    /// failed (0 retries forever).
    #[arg(long, default_value_t = 15)]
    pub max_retries: u32,

    /// Attempts to reach the CSI plugin at startup.
    #[arg(long, default_value_t = 10)]
    pub connect_attempts: u32,

    /// Log line format on stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Where the cluster client configuration comes from.  Consumed by the
/// cluster client, which lives outside this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterSource {
    InCluster,
    External {
        master: Option<String>,
        kubeconfig: Option<PathBuf>,
    },
}

/// Validated startup configuration.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    pub provisioner: ProvisionerOptions,
    pub controller: ControllerConfig,
    pub csi_endpoint: PathBuf,
    pub cluster: ClusterSource,
    pub connect_retry: RetryConfig,
}

impl TryFrom<Args> for ProvisionerConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        if args.provisioner.trim().is_empty() {
            return Err(ConfigError::Empty("provisioner name"));
        }
        if args.csi_endpoint.as_os_str().is_empty() {
            return Err(ConfigError::Empty("CSI endpoint"));
        }
        if args.volume_name_prefix.is_empty() {
            return Err(ConfigError::Empty("volume name prefix"));
        }

        let master = args.master.filter(|m| !m.is_empty());
        let kubeconfig = args.kubeconfig.filter(|k| !k.as_os_str().is_empty());
        let cluster = if master.is_some() || kubeconfig.is_some() {
            ClusterSource::External { master, kubeconfig }
        } else {
            ClusterSource::InCluster
        };

        let provisioner = ProvisionerOptions {
            provisioner_name: args.provisioner,
            volume_name_prefix: args.volume_name_prefix,
            timeout: args.timeout,
            deletion_policy: if args.strict_ownership {
                DeletionPolicy::StrictOwnership
            } else {
                DeletionPolicy::IgnoreIdentity
            },
            supports_topology: false,
        };
        let controller = ControllerConfig {
            workers: args.workers.max(1),
            retry: RetryConfig {
                max_attempts: args.max_retries,
                initial_delay: args.retry_initial_delay,
                max_delay: args.retry_max_delay.max(args.retry_initial_delay),
                ..RetryConfig::default()
            },
        };

        Ok(Self {
            provisioner,
            controller,
            csi_endpoint: args.csi_endpoint,
            cluster,
            connect_retry: RetryConfig {
                max_attempts: args.connect_attempts.max(1),
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(10),
                ..RetryConfig::default()
            },
        })
    }
}

/// Parse durations such as `500ms`, `10s`, `5m` or `1h`.  A bare number is
/// taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let err = |reason: &str| ConfigError::Duration {
        value: s.to_owned(),
        reason: reason.to_owned(),
    };
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(err("missing number"));
    }
    let value: u64 = digits.parse().map_err(|_| err("number out of range"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        "h" => Ok(Duration::from_secs(value.saturating_mul(3600))),
        _ => Err(err("unknown unit, expected ms, s, m or h")),
    }
}
