//! Packs compiled scripts and assets into fixed-size ROM banks.
//!
//! First-fit decreasing: symbols are placed largest first (ties broken by
//! name) into the lowest bank with room, so identical inputs always produce
//! identical layouts.

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::config::BuildConfig;
use crate::error::CapacityError;

/// A named, indivisible blob of bytes to place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub bytes: Vec<u8>,
    /// Required start alignment inside the bank (1 = none).
    pub align: usize,
}

impl Symbol {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, align: usize) -> Self {
        Self {
            name: name.into(),
            bytes,
            align: align.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placed {
    pub name: String,
    pub offset: u16,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bank {
    pub index: u16,
    /// In ascending offset order.
    pub symbols: Vec<Placed>,
    /// Bytes consumed including alignment padding.
    pub used: usize,
}

impl Bank {
    fn new(index: u16) -> Self {
        Self {
            index,
            symbols: Vec::new(),
            used: 0,
        }
    }

    /// Offset at which `size` bytes aligned to `align` would go, if they fit.
    fn fit(&self, size: usize, align: usize, capacity: usize) -> Option<u16> {
        let offset = self.used.div_ceil(align).checked_mul(align)?;
        if offset.checked_add(size)? > capacity {
            return None;
        }
        u16::try_from(offset).ok()
    }

    /// Contents with zero-filled alignment gaps, `used` bytes long.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.used];
        for s in &self.symbols {
            let start = usize::from(s.offset);
            out[start..start + s.bytes.len()].copy_from_slice(&s.bytes);
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    pub capacity: usize,
    pub first_bank: u16,
    pub banks: Vec<Bank>,
    /// Symbol name → (bank, offset).
    pub addresses: IndexMap<String, (u16, u16)>,
}

impl Allocation {
    pub fn address(&self, name: &str) -> Option<(u16, u16)> {
        self.addresses.get(name).copied()
    }

    pub fn used(&self) -> usize {
        self.banks.iter().map(|b| b.used).sum()
    }
}

pub fn allocate(
    mut symbols: Vec<Symbol>,
    cfg: &BuildConfig,
) -> Result<Allocation, CapacityError> {
    let available = cfg.data_budget()?;
    let capacity = cfg.bank_capacity;
    let ceiling = cfg.bank_ceiling;

    let oversized: Vec<(String, usize)> = symbols
        .iter()
        .filter(|s| s.bytes.len() > capacity)
        .map(|s| (s.name.clone(), s.bytes.len()))
        .collect();
    if !oversized.is_empty() {
        return Err(CapacityError::SymbolTooLarge {
            symbols: oversized,
            capacity,
        });
    }

    let required: usize = symbols.iter().map(|s| s.bytes.len()).sum();
    if required > available {
        return Err(CapacityError::TotalExceeded {
            required,
            available,
            shortfall: required - available,
        });
    }

    symbols.sort_by(|a, b| {
        b.bytes
            .len()
            .cmp(&a.bytes.len())
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut banks: Vec<Bank> = Vec::new();
    for sym in symbols {
        let size = sym.bytes.len();
        let slot = banks
            .iter()
            .enumerate()
            .find_map(|(i, b)| b.fit(size, sym.align, capacity).map(|off| (i, off)));

        let (i, offset) = match slot {
            Some(slot) => slot,
            None => {
                if banks.len() >= ceiling {
                    return Err(CapacityError::BankCeilingExceeded {
                        symbol: sym.name,
                        size,
                        needed: banks.len() + 1,
                        ceiling,
                    });
                }
                // Checked against the ceiling, so the number fits u16.
                banks.push(Bank::new(cfg.first_bank + banks.len() as u16));
                (banks.len() - 1, 0)
            }
        };

        let bank = &mut banks[i];
        debug!("{} ({size} bytes) -> bank {} @ {offset:#06x}", sym.name, bank.index);
        bank.used = usize::from(offset) + size;
        bank.symbols.push(Placed {
            name: sym.name,
            offset,
            bytes: sym.bytes,
        });
    }

    let mut addresses = IndexMap::new();
    for bank in &banks {
        for s in &bank.symbols {
            addresses.insert(s.name.clone(), (bank.index, s.offset));
        }
    }

    info!(
        "allocated {} symbols into {} banks ({} bytes used)",
        addresses.len(),
        banks.len(),
        banks.iter().map(|b| b.used).sum::<usize>()
    );

    Ok(Allocation {
        capacity,
        first_bank: cfg.first_bank,
        banks,
        addresses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(capacity: usize, ceiling: usize) -> BuildConfig {
        BuildConfig {
            bank_capacity: capacity,
            bank_ceiling: ceiling,
            ..BuildConfig::default()
        }
    }

    fn sym(name: &str, size: usize) -> Symbol {
        Symbol::new(name, vec![0xAB; size], 1)
    }

    #[test]
    fn largest_first_lowest_bank() {
        let alloc = allocate(
            vec![sym("a", 30), sym("b", 60), sym("c", 50), sym("d", 40)],
            &cfg(100, 8),
        )
        .unwrap();
        // b(60) bank1, c(50) bank2, d(40) bank1, a(30) bank2
        assert_eq!(alloc.address("b"), Some((1, 0)));
        assert_eq!(alloc.address("c"), Some((2, 0)));
        assert_eq!(alloc.address("d"), Some((1, 60)));
        assert_eq!(alloc.address("a"), Some((2, 50)));
        assert_eq!(alloc.banks.len(), 2);
    }

    #[test]
    fn every_symbol_placed_once_and_no_bank_overflows() {
        let symbols: Vec<Symbol> = (0..200)
            .map(|i| {
                Symbol::new(format!("s{i:03}"), vec![i as u8; 1 + (i * 37) % 900], 1 + i % 3)
            })
            .collect();
        let alloc = allocate(symbols.clone(), &cfg(0x400, 255)).unwrap();

        assert_eq!(alloc.addresses.len(), symbols.len());
        for bank in &alloc.banks {
            assert!(bank.used <= 0x400);
            let mut end = 0;
            for s in &bank.symbols {
                assert!(usize::from(s.offset) >= end, "overlap in bank {}", bank.index);
                end = usize::from(s.offset) + s.bytes.len();
            }
        }
        for s in &symbols {
            let (bank, offset) = alloc.address(&s.name).unwrap();
            assert_eq!(usize::from(offset) % s.align, 0);
            let bank = &alloc.banks[usize::from(bank - 1)];
            let bytes = bank.bytes();
            let start = usize::from(offset);
            assert_eq!(&bytes[start..start + s.bytes.len()], &s.bytes[..]);
        }
    }

    #[test]
    fn input_order_does_not_change_layout() {
        let forward = vec![sym("x", 10), sym("y", 10), sym("z", 70), sym("w", 25)];
        let mut reversed = forward.clone();
        reversed.reverse();
        assert_eq!(
            allocate(forward, &cfg(80, 4)).unwrap(),
            allocate(reversed, &cfg(80, 4)).unwrap()
        );
    }

    #[test]
    fn alignment_inserts_padding() {
        let alloc = allocate(
            vec![sym("odd", 5), Symbol::new("tiles", vec![1; 4], 16)],
            &cfg(64, 1),
        )
        .unwrap();
        assert_eq!(alloc.address("odd"), Some((1, 0)));
        assert_eq!(alloc.address("tiles"), Some((1, 16)));
        assert_eq!(alloc.banks[0].used, 20);
        assert_eq!(&alloc.banks[0].bytes()[5..16], &[0u8; 11]);
    }

    #[test]
    fn oversized_symbols_are_all_reported() {
        let symbols = vec![sym("big", 101), sym("ok", 10), sym("huge", 500)];
        let err = allocate(symbols, &cfg(100, 4)).unwrap_err();
        assert_eq!(
            err,
            CapacityError::SymbolTooLarge {
                symbols: vec![("big".into(), 101), ("huge".into(), 500)],
                capacity: 100,
            }
        );
    }

    #[test]
    fn total_over_capacity_fails_before_packing() {
        let symbols = vec![sym("a", 90), sym("b", 90), sym("c", 90)];
        let err = allocate(symbols, &cfg(100, 2)).unwrap_err();
        assert_eq!(
            err,
            CapacityError::TotalExceeded {
                required: 270,
                available: 200,
                shortfall: 70,
            }
        );
    }

    #[test]
    fn fragmentation_can_hit_the_ceiling() {
        // 3 x 60 = 180 <= 200, but no two fit in one bank.
        let symbols = vec![sym("a", 60), sym("b", 60), sym("c", 60)];
        let err = allocate(symbols, &cfg(100, 2)).unwrap_err();
        assert!(matches!(
            err,
            CapacityError::BankCeilingExceeded { ref symbol, needed: 3, ceiling: 2, .. }
                if symbol == "c"
        ));
    }

    #[test]
    fn oversized_bank_capacity_is_rejected_before_placing() {
        // Offsets past 0xFFFF would wrap in the far-pointer table.
        let symbols = vec![sym("a", 70_000), sym("b", 50_000)];
        let err = allocate(symbols, &cfg(0x20000, 4)).unwrap_err();
        assert!(matches!(err, CapacityError::InvalidGeometry(_)), "{err}");
    }

    #[test]
    fn full_16_bit_bank_keeps_offsets_exact() {
        let alloc = allocate(vec![sym("a", 0x8000), sym("b", 0x7FFF)], &cfg(0x10000, 1)).unwrap();
        assert_eq!(alloc.address("a"), Some((1, 0)));
        assert_eq!(alloc.address("b"), Some((1, 0x8000)));
        assert_eq!(alloc.banks[0].used, 0xFFFF);
    }

    #[test]
    fn bank_numbers_past_u16_are_rejected() {
        let cfg = BuildConfig {
            first_bank: 65500,
            ..cfg(100, 255)
        };
        let err = allocate(vec![sym("a", 10)], &cfg).unwrap_err();
        assert!(matches!(err, CapacityError::InvalidGeometry(_)), "{err}");
    }

    #[test]
    fn nothing_to_place() {
        let alloc = allocate(Vec::new(), &cfg(100, 2)).unwrap();
        assert!(alloc.banks.is_empty());
        assert_eq!(alloc.used(), 0);
    }
}
