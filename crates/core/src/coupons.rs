//! Discount-code definitions and the process-wide cache in front of them.
//!
//! Definitions come from an external configuration value (a JSON list). The
//! resolver reloads that list lazily once the TTL has passed and swaps in a
//! whole new snapshot, so concurrent readers observe either the old or the new
//! set of coupons and never a half-built one.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::Clock;

pub const DEFAULT_TTL_SECS: u64 = 60;
pub const MIN_TTL_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouponKind {
    Percentage { percent: u32 },
    Fixed { amount_cents: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coupon {
    pub code: String,
    pub kind: CouponKind,
    /// Uppercased SKUs. Empty means the coupon applies to every SKU.
    pub allowed_skus: HashSet<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub min_order_cents: Option<i64>,
}

impl Coupon {
    pub fn allows_sku(&self, sku: &str) -> bool {
        let sku = sku.trim();
        if sku.is_empty() {
            return false;
        }
        self.allowed_skus.is_empty() || self.allowed_skus.contains(&sku.to_uppercase())
    }

    pub fn active_at(&self, now: DateTime<Utc>) -> bool {
        self.starts_at.map_or(true, |start| now >= start)
            && self.ends_at.map_or(true, |end| now <= end)
    }

    pub fn meets_minimum(&self, subtotal_cents: i64) -> bool {
        self.min_order_cents.map_or(true, |min| subtotal_cents >= min)
    }
}

/// Coupon used whenever the configured list yields nothing usable, so a broken
/// config never takes checkout down.
pub fn fallback_coupon() -> Coupon {
    Coupon {
        code: "VCWIEN".to_string(),
        kind: CouponKind::Percentage { percent: 20 },
        allowed_skus: ["FAMILY-BASIC", "FAMILY-PREMIUM", "FAMILY-DELUXE"]
            .into_iter()
            .map(str::to_string)
            .collect(),
        starts_at: None,
        ends_at: None,
        min_order_cents: None,
    }
}

#[async_trait]
pub trait CouponSource: Send + Sync {
    /// Raw JSON text of the coupon list, or `None` when it cannot be read.
    async fn fetch(&self) -> Option<String>;
}

/// A configuration value captured once at startup.
#[derive(Debug, Clone)]
pub struct StaticCouponSource {
    raw: Option<String>,
}

impl StaticCouponSource {
    pub fn new(raw: Option<String>) -> Self {
        Self { raw }
    }
}

#[async_trait]
impl CouponSource for StaticCouponSource {
    async fn fetch(&self) -> Option<String> {
        self.raw.clone()
    }
}

/// A JSON file re-read on every refresh, so edits land without a restart.
#[derive(Debug, Clone)]
pub struct FileCouponSource {
    path: String,
}

impl FileCouponSource {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CouponSource for FileCouponSource {
    async fn fetch(&self) -> Option<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Some(raw),
            Err(err) => {
                warn!(path = %self.path, error = %err, "coupon file unreadable");
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCoupon {
    code: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    value: Option<serde_json::Number>,
    #[serde(alias = "allowedSkus")]
    skus: Option<Vec<String>>,
    #[serde(alias = "starts_at")]
    starts_at: Option<String>,
    #[serde(alias = "ends_at")]
    ends_at: Option<String>,
    #[serde(alias = "min_order_amount")]
    min_order_amount: Option<i64>,
}

/// Parse a JSON coupon list, dropping every entry that is malformed instead of
/// rejecting the whole list.
pub fn parse_coupons(raw: &str) -> Vec<Coupon> {
    let entries: Vec<serde_json::Value> = match serde_json::from_str(raw) {
        Ok(serde_json::Value::Array(entries)) => entries,
        Ok(_) => {
            warn!("coupon config is not a JSON list");
            return Vec::new();
        }
        Err(err) => {
            warn!(error = %err, "coupon config is not valid JSON");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match parse_entry(entry) {
            Ok(coupon) => Some(coupon),
            Err(reason) => {
                warn!(index, reason, "dropping coupon entry");
                None
            }
        })
        .collect()
}

fn parse_entry(entry: serde_json::Value) -> Result<Coupon, &'static str> {
    let raw: RawCoupon = serde_json::from_value(entry).map_err(|_| "malformed entry")?;

    let code = raw
        .code
        .map(|code| code.trim().to_uppercase())
        .filter(|code| !code.is_empty())
        .ok_or("missing code")?;
    let kind = raw.kind.ok_or("missing type")?;
    let value = raw.value.ok_or("missing value")?;
    let skus = raw.skus.ok_or("missing sku list")?;

    let value = whole_number(&value).ok_or("value is not a whole number")?;
    if value <= 0 {
        return Err("value must be positive");
    }

    let kind = match kind.trim().to_lowercase().as_str() {
        "percentage" | "percent" => {
            if value > 100 {
                return Err("percentage above 100");
            }
            CouponKind::Percentage {
                percent: value as u32,
            }
        }
        "fixed" | "fixed_amount" | "amount" => CouponKind::Fixed {
            amount_cents: value,
        },
        _ => return Err("unknown type"),
    };

    let starts_at = parse_instant(raw.starts_at.as_deref())?;
    let ends_at = parse_instant(raw.ends_at.as_deref())?;

    Ok(Coupon {
        code,
        kind,
        allowed_skus: skus
            .iter()
            .map(|sku| sku.trim().to_uppercase())
            .filter(|sku| !sku.is_empty())
            .collect(),
        starts_at,
        ends_at,
        min_order_cents: raw.min_order_amount.filter(|min| *min > 0),
    })
}

fn whole_number(value: &serde_json::Number) -> Option<i64> {
    if let Some(v) = value.as_i64() {
        return Some(v);
    }
    value
        .as_f64()
        .filter(|v| v.fract() == 0.0 && v.abs() < i64::MAX as f64)
        .map(|v| v as i64)
}

fn parse_instant(value: Option<&str>) -> Result<Option<DateTime<Utc>>, &'static str> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => DateTime::parse_from_rfc3339(v)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| "unparsable date"),
    }
}

#[derive(Debug)]
struct CouponSnapshot {
    coupons: HashMap<String, Coupon>,
    loaded_at: Option<DateTime<Utc>>,
}

pub struct CouponResolver {
    source: Arc<dyn CouponSource>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    snapshot: RwLock<Arc<CouponSnapshot>>,
}

impl CouponResolver {
    pub fn new(source: Arc<dyn CouponSource>, clock: Arc<dyn Clock>, ttl_secs: u64) -> Self {
        let ttl_secs = ttl_secs.max(MIN_TTL_SECS);
        Self {
            source,
            clock,
            ttl: Duration::seconds(ttl_secs as i64),
            snapshot: RwLock::new(Arc::new(CouponSnapshot {
                coupons: HashMap::new(),
                loaded_at: None,
            })),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Case-insensitive lookup. Reloads the list first if the cache expired.
    pub async fn find_coupon(&self, code: &str) -> Option<Coupon> {
        let code = code.trim().to_uppercase();
        if code.is_empty() {
            return None;
        }
        let snapshot = self.current().await;
        snapshot.coupons.get(&code).cloned()
    }

    pub fn is_active(&self, coupon: &Coupon) -> bool {
        coupon.active_at(self.clock.now())
    }

    /// Reload unconditionally and return the number of coupons now cached.
    pub async fn force_refresh(&self) -> usize {
        let snapshot = self.load().await;
        let count = snapshot.coupons.len();
        *self.snapshot.write().await = snapshot;
        count
    }

    async fn current(&self) -> Arc<CouponSnapshot> {
        let now = self.clock.now();
        {
            let snapshot = self.snapshot.read().await;
            if !self.expired(&snapshot, now) {
                return snapshot.clone();
            }
        }

        let mut guard = self.snapshot.write().await;
        // another reader may have refreshed while we waited for the lock
        if !self.expired(&guard, now) {
            return guard.clone();
        }
        let fresh = self.load().await;
        *guard = fresh.clone();
        fresh
    }

    fn expired(&self, snapshot: &CouponSnapshot, now: DateTime<Utc>) -> bool {
        snapshot
            .loaded_at
            .map_or(true, |loaded| now - loaded >= self.ttl)
    }

    async fn load(&self) -> Arc<CouponSnapshot> {
        let mut coupons = match self.source.fetch().await {
            Some(raw) => parse_coupons(&raw),
            None => Vec::new(),
        };

        if coupons.is_empty() {
            info!("no valid coupons configured, using fallback coupon");
            coupons.push(fallback_coupon());
        }

        debug!(count = coupons.len(), "coupon cache refreshed");

        Arc::new(CouponSnapshot {
            coupons: coupons
                .into_iter()
                .map(|coupon| (coupon.code.clone(), coupon))
                .collect(),
            loaded_at: Some(self.clock.now()),
        })
    }
}
