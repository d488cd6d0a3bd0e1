use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Days, NaiveDate, Utc};
use log::debug;
use serde::Serialize;

use crate::config::Config;
use crate::normalize::status::OrderStatus;
use crate::providers::canonical_vendor_slug;
use crate::reconcile::legacy;
use crate::storage::{Order, OrderStore, OriginTable};

const UNKNOWN_PROVIDER: &str = "unknown";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AggregateReport {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_provider: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
    pub expiring_soon: usize,
    pub expired: usize,
    pub recent: Vec<Order>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderFilter {
    pub vendor: Option<String>,
    pub status: Option<String>,
    pub domain_contains: Option<String>,
    pub offset: usize,
    /// Zero means no limit.
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrderPage {
    pub items: Vec<Order>,
    /// Matches before paging.
    pub total: usize,
}

/// Unified view over the canonical table and the two legacy tables.
/// Legacy rows already claimed are represented by their canonical row only.
pub struct Aggregator {
    store: Arc<dyn OrderStore>,
    expiring_days: u32,
    recent_limit: usize,
}

impl Aggregator {
    pub fn new(store: Arc<dyn OrderStore>, config: &Config) -> Self {
        Self {
            store,
            expiring_days: config.expiring_days,
            recent_limit: config.recent_limit,
        }
    }

    pub fn report(&self) -> Result<AggregateReport> {
        self.report_as_of(Utc::now().date_naive())
    }

    pub fn report_as_of(&self, today: NaiveDate) -> Result<AggregateReport> {
        let mut orders = self.collect_orders()?;
        let horizon = today
            .checked_add_days(Days::new(u64::from(self.expiring_days)))
            .unwrap_or(NaiveDate::MAX);

        let mut report = AggregateReport {
            total: orders.len(),
            by_status: BTreeMap::new(),
            by_provider: BTreeMap::new(),
            by_source: BTreeMap::new(),
            expiring_soon: 0,
            expired: 0,
            recent: Vec::new(),
        };

        for order in &orders {
            *report
                .by_status
                .entry(order.status.as_key().to_string())
                .or_default() += 1;
            *report
                .by_provider
                .entry(order.vendor_slug.clone().unwrap_or_else(|| UNKNOWN_PROVIDER.to_string()))
                .or_default() += 1;
            *report
                .by_source
                .entry(order.origin_table.as_str().to_string())
                .or_default() += 1;

            match order.end_date {
                Some(end) if end < today => report.expired += 1,
                Some(end) if end <= horizon => report.expiring_soon += 1,
                Some(_) => {}
                None if order.status == OrderStatus::Expired => report.expired += 1,
                None => {}
            }
        }

        sort_recent_first(&mut orders);
        orders.truncate(self.recent_limit);
        report.recent = orders;

        debug!(
            "[aggregate] {} orders, {} expiring within {} days, {} expired",
            report.total, report.expiring_soon, self.expiring_days, report.expired
        );
        Ok(report)
    }

    pub fn list_orders(&self, filter: &OrderFilter) -> Result<OrderPage> {
        let wanted_vendor = filter.vendor.as_deref().map(|raw| {
            canonical_vendor_slug(raw)
                .map(str::to_string)
                .unwrap_or_else(|| raw.trim().to_ascii_lowercase())
        });
        let wanted_status = filter.status.as_deref().map(|raw| raw.trim().to_ascii_lowercase());
        let wanted_domain = filter
            .domain_contains
            .as_deref()
            .map(|raw| raw.trim().to_ascii_lowercase())
            .filter(|raw| !raw.is_empty());

        let mut matches: Vec<Order> = self
            .collect_orders()?
            .into_iter()
            .filter(|order| {
                wanted_vendor
                    .as_deref()
                    .is_none_or(|vendor| order.vendor_slug.as_deref() == Some(vendor))
            })
            .filter(|order| {
                wanted_status
                    .as_deref()
                    .is_none_or(|status| order.status.as_key().eq_ignore_ascii_case(status))
            })
            .filter(|order| {
                wanted_domain.as_deref().is_none_or(|needle| {
                    order
                        .domain
                        .as_deref()
                        .is_some_and(|domain| domain.to_ascii_lowercase().contains(needle))
                })
            })
            .collect();

        sort_recent_first(&mut matches);
        let total = matches.len();
        let limit = if filter.limit == 0 { usize::MAX } else { filter.limit };
        let items = matches.into_iter().skip(filter.offset).take(limit).collect();
        Ok(OrderPage { items, total })
    }

    fn collect_orders(&self) -> Result<Vec<Order>> {
        let claimed = self.store.claimed_keys()?;
        let mut orders = self.store.canonical_orders()?;

        for table in OriginTable::LEGACY {
            let mut skipped = 0usize;
            for row in self.store.legacy_rows(table)? {
                if claimed.contains(&row.key) {
                    skipped += 1;
                    continue;
                }
                orders.push(legacy::extract(&row).into_order());
            }
            if skipped > 0 {
                debug!("[aggregate] skipped {skipped} claimed rows from {table}");
            }
        }
        Ok(orders)
    }
}

fn sort_recent_first(orders: &mut [Order]) {
    orders.sort_by_key(|order| (Reverse(order.created_at), order.origin_table, Reverse(order.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::claim::ClaimEngine;
    use crate::storage::{Db, SqliteOrderStore};
    use rusqlite::params;

    fn setup() -> Result<(Db, Arc<dyn OrderStore>)> {
        let db = Db::open_in_memory()?;
        let store: Arc<dyn OrderStore> = Arc::new(SqliteOrderStore::initialize(db.clone())?);
        Ok((db, store))
    }

    fn config() -> Config {
        Config {
            expiring_days: 30,
            recent_limit: 2,
            ..Config::default()
        }
    }

    #[test]
    fn claimed_legacy_rows_are_not_double_counted() -> Result<()> {
        let (db, store) = setup()?;
        {
            let conn = db.lock_conn()?;
            conn.execute(
                "INSERT INTO legacy_b_orders (id, provider, cert_id, common_name, order_status, valid_until, created_on)
                 VALUES (42, 'nicsrs', 'CERT-42', 'example.com', 'complete', '2026-01-20', '2025-01-01')",
                [],
            )?;
            conn.execute(
                "INSERT INTO legacy_a_orders (id, module, status, config_data, created_at)
                 VALUES (1, 'gogetssl', 'active', ?1, '2025-02-01 08:00:00')",
                params![r#"{"domain":"shop.example.com","valid_till":"2025-12-01"}"#],
            )?;
        }

        let aggregator = Aggregator::new(store.clone(), &config());
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).ok_or_else(|| anyhow::anyhow!("date"))?;
        let before = aggregator.report_as_of(today)?;
        assert_eq!(before.total, 2);
        assert_eq!(before.by_source.get("legacy_b"), Some(&1));

        let claim = ClaimEngine::new(store.clone()).claim(OriginTable::LegacyB, 42);
        assert!(claim.success, "{}", claim.message);

        let after = aggregator.report_as_of(today)?;
        assert_eq!(after.total, 2);
        assert_eq!(after.by_source.get("legacy_b"), None);
        assert_eq!(after.by_source.get("canonical"), Some(&1));
        assert_eq!(after.by_provider.get("nicsrs"), Some(&1));
        assert_eq!(after.by_status.get("issued"), Some(&2));
        assert_eq!(after.expiring_soon, 1);
        assert_eq!(after.expired, 1);
        Ok(())
    }

    #[test]
    fn zero_dates_are_not_expired() -> Result<()> {
        let (db, store) = setup()?;
        db.lock_conn()?.execute(
            "INSERT INTO legacy_b_orders (provider, common_name, order_status, valid_until)
             VALUES ('nicsrs', 'example.com', 'pending', '0000-00-00 00:00:00')",
            [],
        )?;

        let report = Aggregator::new(store, &config()).report()?;
        assert_eq!(report.total, 1);
        assert_eq!(report.expired, 0);
        assert_eq!(report.expiring_soon, 0);
        assert_eq!(report.recent[0].end_date, None);
        Ok(())
    }

    #[test]
    fn listing_filters_and_pages() -> Result<()> {
        let (db, store) = setup()?;
        {
            let conn = db.lock_conn()?;
            for (id, provider, domain, created) in [
                (1, "nicsrs", "alpha.example.com", "2025-01-01"),
                (2, "nicsrs", "beta.example.com", "2025-02-01"),
                (3, "gogetssl", "gamma.example.org", "2025-03-01"),
                (4, "nicsrs", "delta.example.com", "2025-04-01"),
            ] {
                conn.execute(
                    "INSERT INTO legacy_b_orders (id, provider, common_name, order_status, created_on)
                     VALUES (?1, ?2, ?3, 'complete', ?4)",
                    params![id, provider, domain, created],
                )?;
            }
        }
        let aggregator = Aggregator::new(store, &config());

        let page = aggregator.list_orders(&OrderFilter {
            vendor: Some("NicSRS_SSL".into()),
            domain_contains: Some("EXAMPLE.COM".into()),
            limit: 2,
            ..OrderFilter::default()
        })?;
        assert_eq!(page.total, 3);
        let ids: Vec<i64> = page.items.iter().map(|order| order.id).collect();
        assert_eq!(ids, vec![4, 2]);

        let rest = aggregator.list_orders(&OrderFilter {
            vendor: Some("nicsrs".into()),
            offset: 2,
            ..OrderFilter::default()
        })?;
        assert_eq!(rest.items.len(), 1);
        assert_eq!(rest.items[0].id, 1);

        let pending = aggregator.list_orders(&OrderFilter {
            status: Some("pending".into()),
            ..OrderFilter::default()
        })?;
        assert_eq!(pending.total, 0);

        let report = aggregator.report()?;
        assert_eq!(report.recent.len(), 2);
        assert_eq!(report.recent[0].id, 4);
        Ok(())
    }
}
