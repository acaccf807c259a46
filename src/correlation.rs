// =============================================================================
// Correlation Groups — static symbol partition used by the CorrelationGate
// =============================================================================

use crate::types::CorrelationGroup;
use std::collections::HashMap;

/// Static lookup table mapping a symbol to its correlation group. Membership
/// is configuration, not computed — mirrors the teacher's preference for
/// static tables over runtime classification for anything that doesn't need
/// live market data (see `regime::detector`'s use of fixed thresholds).
pub struct CorrelationTable {
    groups: HashMap<String, CorrelationGroup>,
    default_group: CorrelationGroup,
}

impl CorrelationTable {
    pub fn new(groups: HashMap<String, CorrelationGroup>) -> Self {
        Self {
            groups,
            default_group: CorrelationGroup::Other,
        }
    }

    pub fn group_for(&self, symbol: &str) -> CorrelationGroup {
        self.groups.get(symbol).copied().unwrap_or(self.default_group)
    }
}

impl Default for CorrelationTable {
    /// A sensible default table covering common majors/layer-1s/defi/meme
    /// symbols; engines can override via configuration.
    fn default() -> Self {
        let mut groups = HashMap::new();
        for sym in ["BTCUSDT", "ETHUSDT"] {
            groups.insert(sym.to_string(), CorrelationGroup::Major);
        }
        for sym in ["SOLUSDT", "ADAUSDT", "AVAXUSDT", "NEARUSDT", "DOTUSDT"] {
            groups.insert(sym.to_string(), CorrelationGroup::Layer1);
        }
        for sym in ["UNIUSDT", "AAVEUSDT", "CRVUSDT", "MKRUSDT"] {
            groups.insert(sym.to_string(), CorrelationGroup::Defi);
        }
        for sym in ["DOGEUSDT", "SHIBUSDT", "PEPEUSDT", "WIFUSDT"] {
            groups.insert(sym.to_string(), CorrelationGroup::Meme);
        }
        Self::new(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_symbol_resolves_group() {
        let table = CorrelationTable::default();
        assert_eq!(table.group_for("BTCUSDT"), CorrelationGroup::Major);
        assert_eq!(table.group_for("SOLUSDT"), CorrelationGroup::Layer1);
    }

    #[test]
    fn unknown_symbol_falls_back_to_other() {
        let table = CorrelationTable::default();
        assert_eq!(table.group_for("ZZZUSDT"), CorrelationGroup::Other);
    }
}
