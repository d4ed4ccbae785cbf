//! Bridge configuration
//!
//! One TOML document describes the whole bridge. Every table is optional;
//! anything left out falls back to the defaults below.
//!
//! ```toml
//! alloc_policy = "free_list"
//!
//! [[pools]]
//! pool = "VRA"
//! kva_base = 0x7000_0000
//! dva_base = 0xD000_0000
//! size = 0x20_0000
//!
//! [host.reg_addrs]
//! isp0 = 0x1410_0000
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use copro_abi::{HostConfig, PoolId};
use copro_arena::{AllocPolicy, BackingRegion, DeviceAddr, KernelAddr, DEFAULT_ALIGNMENT};
use copro_loader::ImageConfig;
use copro_sched::SchedulerConfig;
use copro_vra::VraConfig;

use crate::{BridgeError, Result};

fn default_alignment() -> usize {
    DEFAULT_ALIGNMENT
}

/// Backing storage for one firmware-visible pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PoolConfig {
    pub pool: PoolId,
    pub kva_base: KernelAddr,
    pub dva_base: DeviceAddr,
    pub size: usize,
    #[serde(default = "default_alignment")]
    pub alignment: usize,
}

impl PoolConfig {
    pub fn backing(&self) -> BackingRegion {
        BackingRegion::new(self.kva_base, self.dva_base, self.size)
    }

    /// Reserved carve-outs of the reference platform
    pub fn defaults() -> Vec<PoolConfig> {
        let pool = |pool, kva_base, dva_base, size| PoolConfig {
            pool,
            kva_base,
            dva_base,
            size,
            alignment: DEFAULT_ALIGNMENT,
        };

        vec![
            pool(PoolId::TaaIsp, 0x5000_0000, 0xB000_0000, 0x80_0000),
            pool(PoolId::Medrc, 0x5080_0000, 0xB080_0000, 0x20_0000),
            pool(PoolId::Tnr, 0x50A0_0000, 0xB0A0_0000, 0x40_0000),
            pool(PoolId::Vra, 0x50E0_0000, 0xB0E0_0000, 0x10_0000),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub alloc_policy: AllocPolicy,
    pub pools: Vec<PoolConfig>,
    pub scheduler: SchedulerConfig,
    pub host: HostConfig,
    pub primary: ImageConfig,
    pub auxiliary: ImageConfig,
    pub accelerator: ImageConfig,
    pub vra: VraConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            alloc_policy: AllocPolicy::default(),
            pools: PoolConfig::defaults(),
            scheduler: SchedulerConfig::default(),
            host: HostConfig::default(),
            primary: ImageConfig::primary(),
            auxiliary: ImageConfig::auxiliary(),
            accelerator: ImageConfig::accelerator(),
            vra: VraConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Parse and check a TOML document
    ///
    /// # Errors
    /// - `Config` if the document does not parse
    /// - `Pool` if a pool is listed twice or missing
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: BridgeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| BridgeError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&text)
    }

    /// Every firmware-visible pool needs exactly one backing region
    pub fn validate(&self) -> Result<()> {
        for id in PoolId::ALL {
            match self.pools.iter().filter(|p| p.pool == id).count() {
                1 => {}
                0 => {
                    return Err(BridgeError::Pool {
                        pool: id.name(),
                        reason: "no backing region".into(),
                    })
                }
                n => {
                    return Err(BridgeError::Pool {
                        pool: id.name(),
                        reason: format!("listed {} times", n),
                    })
                }
            }
        }

        if let Some(empty) = self.pools.iter().find(|p| p.size == 0) {
            return Err(BridgeError::Pool {
                pool: empty.pool.name(),
                reason: "zero size".into(),
            });
        }

        Ok(())
    }

    pub fn pool(&self, id: PoolId) -> Option<&PoolConfig> {
        self.pools.iter().find(|p| p.pool == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copro_abi::HwipChain;

    #[test]
    fn test_defaults_cover_every_pool() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.pools.len(), PoolId::ALL.len());
        assert_eq!(config.alloc_policy, AllocPolicy::Bump);
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(BridgeConfig::from_toml_str("").unwrap(), BridgeConfig::default());
    }

    #[test]
    fn test_partial_document() {
        let text = r#"
            alloc_policy = "free_list"

            [[pools]]
            pool = "DMA_TAAISP"
            kva_base = 0x10000000
            dva_base = 0x90000000
            size = 0x100000

            [[pools]]
            pool = "DMA_MEDRC"
            kva_base = 0x10100000
            dva_base = 0x90100000
            size = 0x100000

            [[pools]]
            pool = "DMA_TNR"
            kva_base = 0x10200000
            dva_base = 0x90200000
            size = 0x100000

            [[pools]]
            pool = "VRA"
            kva_base = 0x10300000
            dva_base = 0x90300000
            size = 0x100000
            alignment = 64

            [host]
            log_capacity = 4096

            [host.reg_addrs]
            isp0 = 0x14100000

            [vra]
            instances = 2
        "#;

        let config = BridgeConfig::from_toml_str(text).unwrap();
        assert_eq!(config.alloc_policy, AllocPolicy::FreeList);
        assert_eq!(config.pool(PoolId::Vra).unwrap().alignment, 64);
        assert_eq!(config.pool(PoolId::Tnr).unwrap().alignment, DEFAULT_ALIGNMENT);
        assert_eq!(config.host.log_capacity, 4096);
        assert_eq!(config.host.reg_addrs.get(&HwipChain::Isp0), Some(&0x1410_0000));
        assert_eq!(config.vra.instances, 2);
        assert_eq!(config.primary, ImageConfig::primary());
    }

    #[test]
    fn test_missing_pool_rejected() {
        let text = r#"
            [[pools]]
            pool = "VRA"
            kva_base = 0x10300000
            dva_base = 0x90300000
            size = 0x100000
        "#;

        let err = BridgeConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, BridgeError::Pool { pool: "DMA_TAAISP", .. }));
    }

    #[test]
    fn test_duplicate_pool_rejected() {
        let mut config = BridgeConfig::default();
        config.pools.push(config.pools[0]);
        assert!(matches!(config.validate(), Err(BridgeError::Pool { .. })));
    }

    #[test]
    fn test_malformed_document() {
        let err = BridgeConfig::from_toml_str("alloc_policy = \"slab\"").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }
}
