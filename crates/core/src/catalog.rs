//! Plan limit catalog: (tier, platform, operation) → ceilings.
//!
//! The catalog is read-only at request time. Operators replace it at deploy
//! time (for example through the server's TOML configuration); nothing on the
//! request path mutates it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Operation, Platform, Tier};

/// Ceilings for one dimension at both window granularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ceilings {
    /// Maximum admissions per short window.
    pub short: u64,
    /// Maximum admissions per billing-cycle window.
    pub cycle: u64,
}

impl Ceilings {
    #[must_use]
    pub const fn new(short: u64, cycle: u64) -> Self {
        Self { short, cycle }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("fallback tier {0} is not defined in the catalog")]
    MissingFallbackTier(String),

    #[error("tier {tier} references undeclared platform {platform}")]
    UndeclaredPlatform { tier: String, platform: String },

    #[error(
        "fallback ceilings {short}/{cycle} exceed the fallback tier's smallest \
         ceilings {max_short}/{max_cycle}"
    )]
    FallbackTooGenerous {
        short: u64,
        cycle: u64,
        max_short: u64,
        max_cycle: u64,
    },
}

type OperationLimits = BTreeMap<Operation, Ceilings>;
type TierLimits = BTreeMap<Platform, OperationLimits>;

/// Serialized form of a [`LimitCatalog`], validated on conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDef {
    /// Platforms the product integrates with. Anything else is rejected.
    pub platforms: BTreeSet<Platform>,
    /// The most restrictive tier; used for unrecognized tiers.
    pub fallback_tier: Tier,
    /// Ceilings for operations the catalog does not list.
    pub fallback_ceilings: Ceilings,
    /// Per-tier, per-platform, per-operation ceilings.
    #[serde(default)]
    pub tiers: BTreeMap<Tier, TierLimits>,
}

/// Deterministic mapping from (tier, platform, operation) to [`Ceilings`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CatalogDef", into = "CatalogDef")]
pub struct LimitCatalog {
    platforms: BTreeSet<Platform>,
    fallback_tier: Tier,
    fallback_ceilings: Ceilings,
    tiers: BTreeMap<Tier, TierLimits>,
}

impl TryFrom<CatalogDef> for LimitCatalog {
    type Error = CatalogError;

    fn try_from(def: CatalogDef) -> Result<Self, Self::Error> {
        let Some(fallback_limits) = def.tiers.get(&def.fallback_tier) else {
            return Err(CatalogError::MissingFallbackTier(
                def.fallback_tier.to_string(),
            ));
        };
        let bound = smallest_granted(fallback_limits);
        for (tier, limits) in &def.tiers {
            if let Some(platform) = limits.keys().find(|p| !def.platforms.contains(*p)) {
                return Err(CatalogError::UndeclaredPlatform {
                    tier: tier.to_string(),
                    platform: platform.to_string(),
                });
            }
        }
        let fallback = def.fallback_ceilings;
        if fallback.short > bound.short || fallback.cycle > bound.cycle {
            return Err(CatalogError::FallbackTooGenerous {
                short: fallback.short,
                cycle: fallback.cycle,
                max_short: bound.short,
                max_cycle: bound.cycle,
            });
        }
        Ok(Self {
            platforms: def.platforms,
            fallback_tier: def.fallback_tier,
            fallback_ceilings: def.fallback_ceilings,
            tiers: def.tiers,
        })
    }
}

/// The smallest non-zero ceilings granted anywhere in `limits`, per window.
/// A window the tier never grants bounds to zero.
fn smallest_granted(limits: &TierLimits) -> Ceilings {
    let granted = |pick: fn(&Ceilings) -> u64| {
        limits
            .values()
            .flat_map(BTreeMap::values)
            .map(pick)
            .filter(|c| *c > 0)
            .min()
            .unwrap_or(0)
    };
    Ceilings::new(granted(|c| c.short), granted(|c| c.cycle))
}

impl From<LimitCatalog> for CatalogDef {
    fn from(catalog: LimitCatalog) -> Self {
        Self {
            platforms: catalog.platforms,
            fallback_tier: catalog.fallback_tier,
            fallback_ceilings: catalog.fallback_ceilings,
            tiers: catalog.tiers,
        }
    }
}

impl Default for LimitCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

const BUILTIN_PLATFORMS: [&str; 7] = [
    "facebook",
    "instagram",
    "linkedin",
    "twitter",
    "tiktok",
    "youtube",
    "pinterest",
];

// (tier, post, api_call, video_generate), each as (short, cycle).
const BUILTIN_TIERS: [(&str, Ceilings, Ceilings, Ceilings); 4] = [
    (
        "free",
        Ceilings::new(2, 10),
        Ceilings::new(20, 200),
        Ceilings::new(0, 0),
    ),
    (
        "starter",
        Ceilings::new(5, 12),
        Ceilings::new(100, 2_000),
        Ceilings::new(1, 5),
    ),
    (
        "pro",
        Ceilings::new(20, 150),
        Ceilings::new(500, 20_000),
        Ceilings::new(5, 50),
    ),
    (
        "agency",
        Ceilings::new(60, 1_000),
        Ceilings::new(2_000, 100_000),
        Ceilings::new(20, 300),
    ),
];

impl LimitCatalog {
    /// Validate and build a catalog from its serialized form.
    pub fn new(def: CatalogDef) -> Result<Self, CatalogError> {
        Self::try_from(def)
    }

    /// The catalog shipped with the product.
    ///
    /// `free` is the fallback tier; operations it does not list resolve to
    /// one post-sized unit per hour and three per cycle.
    #[must_use]
    pub fn builtin() -> Self {
        let platforms: BTreeSet<Platform> =
            BUILTIN_PLATFORMS.iter().copied().map(Platform::from).collect();

        let tiers = BUILTIN_TIERS
            .iter()
            .map(|(tier, post, api_call, video)| {
                let ops: OperationLimits = [
                    (Operation::from(Operation::POST), *post),
                    (Operation::from(Operation::API_CALL), *api_call),
                    (Operation::from(Operation::VIDEO_GENERATE), *video),
                ]
                .into_iter()
                .collect();
                let per_platform: TierLimits =
                    platforms.iter().map(|p| (p.clone(), ops.clone())).collect();
                (Tier::from(*tier), per_platform)
            })
            .collect();

        Self {
            platforms,
            fallback_tier: Tier::from("free"),
            fallback_ceilings: Ceilings::new(1, 3),
            tiers,
        }
    }

    /// Resolve the ceilings for a dimension under a tier.
    ///
    /// Unknown tiers resolve through the fallback tier. Operations the
    /// resolved tier does not list get the fallback ceilings, never
    /// "unlimited". Only an unknown platform is an error.
    pub fn limits_for(
        &self,
        tier: &Tier,
        platform: &Platform,
        operation: &Operation,
    ) -> Result<Ceilings, CatalogError> {
        if !self.platforms.contains(platform) {
            return Err(CatalogError::UnknownPlatform(platform.to_string()));
        }
        let ceilings = self
            .tier_limits(tier)
            .and_then(|limits| limits.get(platform))
            .and_then(|ops| ops.get(operation))
            .copied()
            .unwrap_or(self.fallback_ceilings);
        Ok(ceilings)
    }

    /// The tier actually used for `tier` (itself, or the fallback tier).
    #[must_use]
    pub fn effective_tier<'a>(&'a self, tier: &'a Tier) -> &'a Tier {
        if self.tiers.contains_key(tier) {
            tier
        } else {
            &self.fallback_tier
        }
    }

    /// Whether `platform` is known to the catalog.
    #[must_use]
    pub fn knows_platform(&self, platform: &Platform) -> bool {
        self.platforms.contains(platform)
    }

    /// All known platforms, in sorted order.
    pub fn platforms(&self) -> impl Iterator<Item = &Platform> {
        self.platforms.iter()
    }

    /// Operations configured for `tier` on `platform`, with their ceilings.
    pub fn operations_for(
        &self,
        tier: &Tier,
        platform: &Platform,
    ) -> impl Iterator<Item = (&Operation, &Ceilings)> {
        self.tier_limits(tier)
            .and_then(|limits| limits.get(platform))
            .into_iter()
            .flat_map(|ops| ops.iter())
    }

    #[must_use]
    pub fn fallback_tier(&self) -> &Tier {
        &self.fallback_tier
    }

    #[must_use]
    pub fn fallback_ceilings(&self) -> Ceilings {
        self.fallback_ceilings
    }

    fn tier_limits(&self, tier: &Tier) -> Option<&TierLimits> {
        self.tiers.get(self.effective_tier(tier))
    }
}
