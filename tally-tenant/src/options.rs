// Tenant context options.

use serde::{Deserialize, Serialize};
use tally_core::config::keys as config_keys;
use tally_core::{ClientConfigSnapshot, DataKind};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantOptions {
    /// Warm the cache for the new tenant right after a switch
    pub preload: bool,
    /// Tell the backend about every switch (`POST /company/switch`)
    pub notify_backend: bool,
}

impl Default for TenantOptions {
    fn default() -> Self {
        Self {
            preload: true,
            notify_backend: true,
        }
    }
}

impl TenantOptions {
    pub fn from_config(cfg: &ClientConfigSnapshot) -> Self {
        let defaults = Self::default();
        Self {
            preload: cfg
                .get_bool(config_keys::TENANT_PRELOAD)
                .unwrap_or(defaults.preload),
            notify_backend: defaults.notify_backend,
        }
    }

    pub fn builder() -> TenantOptionsBuilder {
        TenantOptionsBuilder::default()
    }

    pub(crate) fn preload_kinds(&self) -> Vec<DataKind> {
        if self.preload {
            DataKind::preloaded().to_vec()
        } else {
            Vec::new()
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TenantOptionsBuilder {
    preload: Option<bool>,
    notify_backend: Option<bool>,
}

impl TenantOptionsBuilder {
    pub fn preload(mut self, enabled: bool) -> Self {
        self.preload = Some(enabled);
        self
    }

    pub fn notify_backend(mut self, enabled: bool) -> Self {
        self.notify_backend = Some(enabled);
        self
    }

    pub fn build(self) -> TenantOptions {
        let defaults = TenantOptions::default();
        TenantOptions {
            preload: self.preload.unwrap_or(defaults.preload),
            notify_backend: self.notify_backend.unwrap_or(defaults.notify_backend),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::ClientConfig;

    #[test]
    fn preload_can_be_switched_off_by_config() {
        let mut cfg = ClientConfig::new();
        cfg.set(config_keys::TENANT_PRELOAD, "false");
        let options = TenantOptions::from_config(&cfg.snapshot());
        assert!(!options.preload);
        assert!(options.preload_kinds().is_empty());
        assert_eq!(TenantOptions::default().preload_kinds().len(), 3);
    }
}
