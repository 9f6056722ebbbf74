//! Startup handshake with the CSI plugin.

use libcsi::{CsiError, CsiIdentity, PluginCapability};
use tracing::info;

use crate::error::ConfigError;
use crate::retry::{RetryConfig, retry_with_backoff};

/// What the provisioner learned about the plugin at startup.
#[derive(Debug, Clone)]
pub struct PluginDriver {
    pub name: String,
    pub vendor_version: String,
    pub supports_topology: bool,
}

/// Wait for the plugin behind `plugin` to become ready and check that it
/// can provision volumes.
///
/// Connection problems are retried according to `retry`; a plugin that stays
/// unreachable, or that lacks the controller service, is a fatal
/// configuration error.
pub async fn discover<P: CsiIdentity>(
    plugin: &P,
    endpoint: &str,
    retry: &RetryConfig,
) -> Result<PluginDriver, ConfigError> {
    let unreachable = |source: CsiError| ConfigError::PluginUnreachable {
        endpoint: endpoint.to_owned(),
        source,
    };

    retry_with_backoff(retry, "csi_probe", || async {
        match plugin.probe().await? {
            true => Ok(()),
            false => Err(CsiError::Unavailable("plugin reports not ready".to_owned())),
        }
    })
    .await
    .map_err(unreachable)?;

    let info = retry_with_backoff(retry, "csi_get_plugin_info", || plugin.get_plugin_info())
        .await
        .map_err(unreachable)?;
    let caps = retry_with_backoff(retry, "csi_get_plugin_capabilities", || {
        plugin.get_plugin_capabilities()
    })
    .await
    .map_err(unreachable)?;

    if !caps.contains(&PluginCapability::ControllerService) {
        return Err(ConfigError::NoControllerService { plugin: info.name });
    }

    let driver = PluginDriver {
        supports_topology: caps.contains(&PluginCapability::VolumeAccessibilityConstraints),
        name: info.name,
        vendor_version: info.vendor_version,
    };
    info!(
        plugin = %driver.name,
        version = %driver.vendor_version,
        topology = driver.supports_topology,
        "CSI plugin discovered"
    );
    Ok(driver)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use libcsi::PluginInfo;
    use libcsi::backend::MemoryBackend;

    use super::*;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        }
    }

    struct NodeOnlyPlugin;

    #[async_trait]
    impl CsiIdentity for NodeOnlyPlugin {
        async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
            Ok(PluginInfo {
                name: "node.only".into(),
                vendor_version: "1".into(),
            })
        }

        async fn probe(&self) -> Result<bool, CsiError> {
            Ok(true)
        }

        async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn discovers_memory_plugin() {
        let driver = discover(&MemoryBackend::new().with_topology(), "mem", &fast())
            .await
            .unwrap();
        assert_eq!(driver.name, "rk8s.memory.csi");
        assert!(driver.supports_topology);
    }

    #[tokio::test]
    async fn plugin_without_controller_is_rejected() {
        let err = discover(&NodeOnlyPlugin, "node", &fast()).await.unwrap_err();
        assert!(matches!(err, ConfigError::NoControllerService { plugin } if plugin == "node.only"));
    }

    #[tokio::test]
    async fn unreachable_plugin_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let client = libcsi::CsiClient::new(tmp.path().join("csi.sock"));
        let err = discover(&client, "csi.sock", &fast()).await.unwrap_err();
        assert!(matches!(err, ConfigError::PluginUnreachable { .. }));
    }
}
