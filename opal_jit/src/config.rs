//! Per-compilation code-generation configuration.
//!
//! Every policy toggle the emitters consult lives here, frozen at
//! `CodeGenerator` construction. Nothing reads global state during
//! emission, so two compilations with different policies can proceed
//! concurrently from the same layout oracle.

use crate::error::ConfigError;
use opal_runtime::{BarrierMode, HeapGeometry};

// =============================================================================
// CodegenConfig
// =============================================================================

/// Policy knobs for one compilation unit.
#[derive(Debug, Clone)]
pub struct CodegenConfig {
    /// Which write-barrier sequence reference stores receive.
    pub barrier_mode: BarrierMode,
    /// Emit the reservation-aware monitor sequences.
    pub lock_reservation: bool,
    /// Emit inline allocation fast paths at all. When false every
    /// allocation takes the helper-only shape.
    pub inline_allocation: bool,
    /// Emit inline monitor fast paths at all.
    pub inline_monitors: bool,
    /// Use the shared-cursor CAS allocation shape instead of the
    /// thread-local bump shape.
    pub shared_cursor_cas: bool,
    /// Real-time collector policy: only sizes up to this limit may be
    /// allocated inline, and reservation is unavailable.
    pub realtime_size_limit: Option<usize>,
    /// Generational modes only: test the remembered bit in the object
    /// header before calling the barrier helper.
    pub check_remembered: bool,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        CodegenConfig {
            barrier_mode: BarrierMode::CardMark,
            lock_reservation: false,
            inline_allocation: true,
            inline_monitors: true,
            shared_cursor_cas: false,
            realtime_size_limit: None,
            check_remembered: false,
        }
    }
}

impl CodegenConfig {
    /// Reject combinations the emitters cannot honor. Called once, at
    /// `CodeGenerator::new`.
    pub fn validate(&self, geometry: &HeapGeometry) -> Result<(), ConfigError> {
        if self.shared_cursor_cas {
            if geometry.tlh_prezeroed {
                return Err(ConfigError::PrezeroRequiresTlh);
            }
            if geometry.shared_cursor.is_none() {
                return Err(ConfigError::MissingSharedCursor);
            }
        }
        if let Some(limit) = self.realtime_size_limit {
            if limit == 0 {
                return Err(ConfigError::ZeroSizeClassLimit);
            }
            if self.lock_reservation {
                return Err(ConfigError::ReservationWithRealtime);
            }
        }
        Ok(())
    }

    /// Largest size allowed on the inline allocation path under the
    /// current policy.
    pub fn inline_size_limit(&self, layout_limit: usize) -> usize {
        match self.realtime_size_limit {
            Some(limit) => limit.min(layout_limit),
            None => layout_limit,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use opal_runtime::AddressQuery;

    fn geometry() -> HeapGeometry {
        HeapGeometry::standard()
    }

    #[test]
    fn default_config_is_valid() {
        assert!(CodegenConfig::default().validate(&geometry()).is_ok());
    }

    #[test]
    fn shared_cursor_needs_an_address() {
        let mut geo = geometry();
        geo.tlh_prezeroed = false;
        geo.shared_cursor = None;
        let config = CodegenConfig {
            shared_cursor_cas: true,
            ..CodegenConfig::default()
        };
        assert_eq!(
            config.validate(&geo),
            Err(ConfigError::MissingSharedCursor)
        );
        geo.shared_cursor = Some(AddressQuery::NeedsPatch);
        assert!(config.validate(&geo).is_ok());
    }

    #[test]
    fn prezero_conflicts_with_shared_cursor() {
        let mut geo = geometry();
        geo.tlh_prezeroed = true;
        geo.shared_cursor = Some(AddressQuery::NeedsPatch);
        let config = CodegenConfig {
            shared_cursor_cas: true,
            ..CodegenConfig::default()
        };
        assert_eq!(
            config.validate(&geo),
            Err(ConfigError::PrezeroRequiresTlh)
        );
    }

    #[test]
    fn realtime_rules() {
        let config = CodegenConfig {
            realtime_size_limit: Some(0),
            ..CodegenConfig::default()
        };
        assert_eq!(
            config.validate(&geometry()),
            Err(ConfigError::ZeroSizeClassLimit)
        );

        let config = CodegenConfig {
            realtime_size_limit: Some(512),
            lock_reservation: true,
            ..CodegenConfig::default()
        };
        assert_eq!(
            config.validate(&geometry()),
            Err(ConfigError::ReservationWithRealtime)
        );

        let config = CodegenConfig {
            realtime_size_limit: Some(512),
            ..CodegenConfig::default()
        };
        assert!(config.validate(&geometry()).is_ok());
        assert_eq!(config.inline_size_limit(0x4000), 512);
    }
}
