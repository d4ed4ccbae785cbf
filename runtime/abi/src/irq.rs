//! Interrupt routing for firmware handlers
//!
//! Hardware-IP interrupts are addressed by `(chain, id)`. Each chain owns a
//! window of `INTR_ID_BASE_OFFSET` ids, so the local index is
//! `id - INTR_ID_BASE_OFFSET * chain_ordinal` and must fall inside
//! `0..INTR_HWIP_MAX`. Anything else is rejected before the table is
//! indexed.
//!
//! General interrupts (PDAF/PDP statistics) are a separate, flat table.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;

use crate::sync::enter_irq;
use crate::{AbiError, Result};

/// Id window per chain
pub const INTR_ID_BASE_OFFSET: u32 = 3;

/// Handler slots per chain
pub const INTR_HWIP_MAX: usize = 3;

/// Number of hardware-IP chains
pub const CHAIN_COUNT: usize = 8;

/// Hardware-IP subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HwipChain {
    #[serde(rename = "3aa0")]
    Taa0 = 0,
    #[serde(rename = "3aa1")]
    Taa1 = 1,
    Isp0 = 2,
    Isp1 = 3,
    Tpu0 = 4,
    Tpu1 = 5,
    Dcp = 6,
    Vpp = 7,
}

impl HwipChain {
    pub const ALL: [HwipChain; CHAIN_COUNT] = [
        HwipChain::Taa0,
        HwipChain::Taa1,
        HwipChain::Isp0,
        HwipChain::Isp1,
        HwipChain::Tpu0,
        HwipChain::Tpu1,
        HwipChain::Dcp,
        HwipChain::Vpp,
    ];

    pub fn from_raw(raw: u32) -> Result<Self> {
        Self::ALL
            .get(raw as usize)
            .copied()
            .ok_or(AbiError::InvalidChain(raw))
    }

    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// Local handler slot for a chain-global interrupt id
    pub fn local_index(self, id: u32) -> Result<usize> {
        let index = id as i64 - (INTR_ID_BASE_OFFSET as i64) * (self.ordinal() as i64);
        if (0..INTR_HWIP_MAX as i64).contains(&index) {
            Ok(index as usize)
        } else {
            Err(AbiError::InvalidIrqIndex {
                chain: self as u32,
                id,
                index,
            })
        }
    }
}

/// Firmware interrupt handler, called with `(id, ctx)`
pub type IrqHandler = Arc<dyn Fn(u32, usize) + Send + Sync>;

/// Registration request from firmware
#[derive(Clone)]
pub struct HwipRegistration {
    pub chain: u32,
    pub id: u32,
    pub priority: u32,
    pub ctx: usize,
    pub handler: IrqHandler,
}

#[derive(Clone)]
struct HwipSlot {
    id: u32,
    priority: u32,
    ctx: usize,
    handler: IrqHandler,
}

/// `{chain, local_index} -> handler`
pub struct InterruptTable {
    slots: RwLock<[[Option<HwipSlot>; INTR_HWIP_MAX]; CHAIN_COUNT]>,
}

impl InterruptTable {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Default::default()),
        }
    }

    /// Install a handler, replacing any previous one in the slot
    ///
    /// # Errors
    /// - `InvalidChain` for an unknown chain
    /// - `InvalidIrqIndex` if `id` falls outside the chain's window
    pub fn register(&self, info: HwipRegistration) -> Result<()> {
        let chain = HwipChain::from_raw(info.chain)?;
        let index = chain.local_index(info.id)?;

        self.slots.write()[chain.ordinal()][index] = Some(HwipSlot {
            id: info.id,
            priority: info.priority,
            ctx: info.ctx,
            handler: info.handler,
        });

        log::debug!("Register interrupt {:?} id {} (slot {})", chain, info.id, index);
        Ok(())
    }

    pub fn unregister(&self, id: u32, chain: u32) -> Result<()> {
        let chain = HwipChain::from_raw(chain)?;
        let index = chain.local_index(id)?;

        self.slots.write()[chain.ordinal()][index] = None;

        log::debug!("Unregister interrupt {:?} id {}", chain, id);
        Ok(())
    }

    pub fn is_registered(&self, chain: HwipChain, id: u32) -> bool {
        chain
            .local_index(id)
            .map(|index| self.slots.read()[chain.ordinal()][index].is_some())
            .unwrap_or(false)
    }

    /// Priority recorded at registration
    pub fn priority(&self, chain: HwipChain, id: u32) -> Option<u32> {
        let index = chain.local_index(id).ok()?;
        self.slots.read()[chain.ordinal()][index]
            .as_ref()
            .map(|slot| slot.priority)
    }

    /// Run the handler for `(chain, id)` in interrupt context
    ///
    /// # Returns
    /// `true` if a handler ran, `false` if the slot is empty
    ///
    /// # Errors
    /// Index errors as for `register`; `IrqMasked` if this thread has
    /// interrupts masked
    pub fn dispatch(&self, chain: HwipChain, id: u32) -> Result<bool> {
        let index = chain.local_index(id)?;
        let slot = self.slots.read()[chain.ordinal()][index].clone();

        let Some(slot) = slot else {
            log::warn!("Spurious interrupt {:?} id {}", chain, id);
            return Ok(false);
        };

        let _irq = enter_irq()?;
        (slot.handler)(slot.id, slot.ctx);
        Ok(true)
    }
}

impl Default for InterruptTable {
    fn default() -> Self {
        Self::new()
    }
}

/// General interrupt sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneralIrq {
    PreprocPdaf = 0,
    Pdp0Stat = 1,
    Pdp1Stat = 2,
}

/// Number of general interrupt sources
pub const GENERAL_IRQ_COUNT: usize = 3;

impl GeneralIrq {
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(GeneralIrq::PreprocPdaf),
            1 => Ok(GeneralIrq::Pdp0Stat),
            2 => Ok(GeneralIrq::Pdp1Stat),
            _ => Err(AbiError::InvalidGeneralIrq(raw)),
        }
    }

    /// Name the line is requested under
    pub fn irq_name(self) -> &'static str {
        match self {
            GeneralIrq::PreprocPdaf => "preproc-pdaf-irq",
            GeneralIrq::Pdp0Stat => "pdp0-irq",
            GeneralIrq::Pdp1Stat => "pdp1-irq",
        }
    }
}

/// General interrupt handler (no arguments)
pub type GeneralIrqFn = Arc<dyn Fn() + Send + Sync>;

pub struct GeneralIrqTable {
    slots: RwLock<[Option<GeneralIrqFn>; GENERAL_IRQ_COUNT]>,
}

impl GeneralIrqTable {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Default::default()),
        }
    }

    /// Request the line for `id`
    ///
    /// # Errors
    /// - `InvalidGeneralIrq` for an unknown id
    /// - `IrqBusy` if the line is already requested
    pub fn register(&self, id: u32, handler: GeneralIrqFn) -> Result<()> {
        let irq = GeneralIrq::from_raw(id)?;
        let mut slots = self.slots.write();
        let slot = &mut slots[irq as usize];

        if slot.is_some() {
            log::error!("Failed to register {}: already requested", irq.irq_name());
            return Err(AbiError::IrqBusy(irq.irq_name()));
        }

        *slot = Some(handler);
        log::debug!("Requested {}", irq.irq_name());
        Ok(())
    }

    /// Release the line for `id`; an unknown id is logged and ignored
    pub fn unregister(&self, id: u32) {
        match GeneralIrq::from_raw(id) {
            Ok(irq) => {
                self.slots.write()[irq as usize] = None;
            }
            Err(e) => log::error!("{}", e),
        }
    }

    pub fn dispatch(&self, irq: GeneralIrq) -> Result<bool> {
        let handler = self.slots.read()[irq as usize].clone();
        let Some(handler) = handler else {
            return Ok(false);
        };

        let _irq = enter_irq()?;
        handler();
        Ok(true)
    }
}

impl Default for GeneralIrqTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::in_irq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registration(chain: u32, id: u32, hits: &Arc<AtomicUsize>) -> HwipRegistration {
        let hits = hits.clone();
        HwipRegistration {
            chain,
            id,
            priority: 0,
            ctx: 0x77,
            handler: Arc::new(move |_, ctx| {
                assert!(in_irq());
                assert_eq!(ctx, 0x77);
                hits.fetch_add(1, Ordering::SeqCst);
            }),
        }
    }

    #[test]
    fn test_local_index_window() {
        assert_eq!(HwipChain::Taa0.local_index(0).unwrap(), 0);
        assert_eq!(HwipChain::Taa0.local_index(2).unwrap(), 2);
        assert!(HwipChain::Taa0.local_index(3).is_err());
        assert_eq!(HwipChain::Isp0.local_index(7).unwrap(), 1);
        assert!(HwipChain::Isp0.local_index(5).is_err());
        assert_eq!(HwipChain::Vpp.local_index(21).unwrap(), 0);
    }

    #[test]
    fn test_register_and_dispatch() {
        let table = InterruptTable::new();
        let hits = Arc::new(AtomicUsize::new(0));

        table.register(registration(1, 4, &hits)).unwrap();
        assert!(table.is_registered(HwipChain::Taa1, 4));
        assert!(table.dispatch(HwipChain::Taa1, 4).unwrap());
        assert!(!table.dispatch(HwipChain::Taa1, 3).unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!in_irq());
    }

    #[test]
    fn test_invalid_combinations_rejected() {
        let table = InterruptTable::new();
        let hits = Arc::new(AtomicUsize::new(0));

        assert!(matches!(
            table.register(registration(9, 0, &hits)),
            Err(AbiError::InvalidChain(9))
        ));
        assert!(matches!(
            table.register(registration(2, 1, &hits)),
            Err(AbiError::InvalidIrqIndex { index: -5, .. })
        ));
        assert!(table.unregister(0, 42).is_err());
    }

    #[test]
    fn test_unregister_clears_slot() {
        let table = InterruptTable::new();
        let hits = Arc::new(AtomicUsize::new(0));

        table.register(registration(0, 1, &hits)).unwrap();
        table.unregister(1, 0).unwrap();
        assert!(!table.dispatch(HwipChain::Taa0, 1).unwrap());
    }

    #[test]
    fn test_general_irq_names_and_busy() {
        assert_eq!(GeneralIrq::PreprocPdaf.irq_name(), "preproc-pdaf-irq");
        assert_eq!(GeneralIrq::Pdp1Stat.irq_name(), "pdp1-irq");

        let table = GeneralIrqTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let handler: GeneralIrqFn = {
            let hits = hits.clone();
            Arc::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        table.register(1, handler.clone()).unwrap();
        assert!(matches!(table.register(1, handler.clone()), Err(AbiError::IrqBusy("pdp0-irq"))));
        assert!(table.register(5, handler).is_err());

        assert!(table.dispatch(GeneralIrq::Pdp0Stat).unwrap());
        table.unregister(1);
        table.unregister(5);
        assert!(!table.dispatch(GeneralIrq::Pdp0Stat).unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
