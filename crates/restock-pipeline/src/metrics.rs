//! Replenishment metrics
//!
//! Pure calculation from one merged stock row to safety stock, reorder point,
//! days of cover and the PO quantities derived from them. Quantities are
//! clamped at zero before rounding; "how much do we need" quantities round up.
//! Emergency quantity is the exception: when an order is already in flight
//! the raw value is truncated instead of rounded up.

use serde::Serialize;
use std::collections::HashSet;

use crate::normalize::RawRow;

/// Days of cover targeted for ordinary SKUs
pub const STANDARD_TARGET_DAYS: i64 = 30;

/// Days of cover targeted for SKUs flagged as special
pub const EXTENDED_TARGET_DAYS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InventoryMetrics {
    pub safety_stock: i64,
    pub reorder_point: i64,
    pub target_days_cover: i64,
    pub qty_for_target_cover: i64,
    pub current_days_cover: f64,
    pub is_open_po: bool,
    pub initial_po_qty: i64,
    pub emergency_po_qty: i64,
    pub regular_po_qty: i64,
    pub final_regular_po_qty: i64,
    pub emergency_po_cost: f64,
    pub final_regular_po_cost: f64,
}

fn ceil_non_negative(value: f64) -> i64 {
    value.max(0.0).ceil() as i64
}

/// Compute metrics for `row`; `special_skus` get extended target cover.
pub fn calculate(row: &RawRow, special_skus: &HashSet<String>) -> InventoryMetrics {
    let daily = row.daily_sales;

    let safety_stock =
        ceil_non_negative(row.max_daily_sales * row.max_lead_time - daily * row.lead_time);
    let reorder_point = ceil_non_negative(daily * row.lead_time + safety_stock as f64);

    let target_days_cover = if special_skus.contains(&row.sku) {
        EXTENDED_TARGET_DAYS
    } else {
        STANDARD_TARGET_DAYS
    };
    let qty_for_target_cover = ceil_non_negative(daily * target_days_cover as f64);

    let current_days_cover = if daily > 0.0 { row.stock / daily } else { 0.0 };

    let is_open_po =
        current_days_cover < target_days_cover as f64 && row.stock <= reorder_point as f64;

    let initial_po_qty = if is_open_po {
        ceil_non_negative(qty_for_target_cover as f64 - row.stock - row.qty_on_order)
    } else {
        0
    };

    let raw_emergency = (row.max_lead_time - current_days_cover) * daily;
    let emergency_po_qty = if row.qty_on_order > 0.0 {
        raw_emergency.max(0.0).trunc() as i64
    } else {
        ceil_non_negative(raw_emergency)
    };

    let regular_po_qty = (initial_po_qty - emergency_po_qty).max(0);

    let final_regular_po_qty = if regular_po_qty > 0 && (regular_po_qty as f64) < row.min_order {
        row.min_order.trunc() as i64
    } else {
        regular_po_qty
    };

    InventoryMetrics {
        safety_stock,
        reorder_point,
        target_days_cover,
        qty_for_target_cover,
        current_days_cover,
        is_open_po,
        initial_po_qty,
        emergency_po_qty,
        regular_po_qty,
        final_regular_po_qty,
        emergency_po_cost: emergency_po_qty as f64 * row.cost_price,
        final_regular_po_cost: final_regular_po_qty as f64 * row.cost_price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row(stock: f64, daily: f64, max_daily: f64, lead: f64, max_lead: f64) -> RawRow {
        RawRow {
            brand: "Wardah".to_string(),
            sku: "W-01".to_string(),
            name: "Lip Cream".to_string(),
            store: "PEKANBARU".to_string(),
            stock,
            daily_sales: daily,
            max_daily_sales: max_daily,
            lead_time: lead,
            max_lead_time: max_lead,
            qty_on_order: 0.0,
            min_order: 0.0,
            cost_price: 1000.0,
            sell_price: 1500.0,
            contribution: 100.0,
        }
    }

    #[test]
    fn test_well_stocked_sku_needs_no_po() {
        let m = calculate(&row(100.0, 5.0, 8.0, 3.0, 5.0), &HashSet::new());
        assert_eq!(m.safety_stock, 25);
        assert_eq!(m.reorder_point, 40);
        assert_eq!(m.current_days_cover, 20.0);
        assert_eq!(m.target_days_cover, 30);
        assert_eq!(m.qty_for_target_cover, 150);
        assert!(!m.is_open_po);
        assert_eq!(m.initial_po_qty, 0);
        assert_eq!(m.regular_po_qty, 0);
        assert_eq!(m.final_regular_po_qty, 0);
    }

    #[test]
    fn test_low_stock_opens_po() {
        let mut r = row(10.0, 5.0, 8.0, 3.0, 5.0);
        r.qty_on_order = 20.0;
        let m = calculate(&r, &HashSet::new());

        assert_eq!(m.current_days_cover, 2.0);
        assert!(m.is_open_po);
        // ceil(150 - 10 - 20)
        assert_eq!(m.initial_po_qty, 120);
        // (5 - 2) * 5, order in flight
        assert_eq!(m.emergency_po_qty, 15);
        assert_eq!(m.regular_po_qty, 105);
        assert_eq!(m.final_regular_po_qty, 105);
        assert_eq!(m.emergency_po_cost, 15_000.0);
        assert_eq!(m.final_regular_po_cost, 105_000.0);
    }

    #[test]
    fn test_special_sku_gets_sixty_days() {
        let special: HashSet<String> = ["W-01".to_string()].into_iter().collect();
        let m = calculate(&row(100.0, 5.0, 8.0, 3.0, 5.0), &special);
        assert_eq!(m.target_days_cover, 60);
        assert_eq!(m.qty_for_target_cover, 300);
    }

    #[test]
    fn test_emergency_rounding_depends_on_open_orders() {
        // raw emergency = (4 - 2.5) * 1.5 = 2.25
        let mut r = row(3.75, 1.5, 1.5, 4.0, 4.0);
        let without_order = calculate(&r, &HashSet::new());
        assert_eq!(without_order.emergency_po_qty, 3);

        r.qty_on_order = 1.0;
        let with_order = calculate(&r, &HashSet::new());
        assert_eq!(with_order.emergency_po_qty, 2);
    }

    #[test]
    fn test_negative_emergency_clamped() {
        let mut r = row(100.0, 1.0, 1.0, 2.0, 2.0);
        let m = calculate(&r, &HashSet::new());
        assert_eq!(m.emergency_po_qty, 0);

        r.qty_on_order = 5.0;
        let m = calculate(&r, &HashSet::new());
        assert_eq!(m.emergency_po_qty, 0);
    }

    #[test]
    fn test_min_order_floor() {
        // initial = ceil(30 - 27) = 3, no emergency, regular = 3 < 10
        let mut r = row(27.0, 1.0, 1.0, 30.0, 0.0);
        r.min_order = 10.0;
        let m = calculate(&r, &HashSet::new());
        assert!(m.is_open_po);
        assert_eq!(m.regular_po_qty, 3);
        assert_eq!(m.final_regular_po_qty, 10);
        assert_eq!(m.final_regular_po_cost, 10_000.0);

        // nothing needed: the floor does not apply
        let mut r = row(100.0, 5.0, 8.0, 3.0, 5.0);
        r.min_order = 10.0;
        let m = calculate(&r, &HashSet::new());
        assert_eq!(m.regular_po_qty, 0);
        assert_eq!(m.final_regular_po_qty, 0);
    }

    #[test]
    fn test_fractional_min_order_truncates() {
        let mut r = row(27.0, 1.0, 1.0, 30.0, 0.0);
        r.min_order = 10.7;
        let m = calculate(&r, &HashSet::new());
        assert_eq!(m.regular_po_qty, 3);
        assert_eq!(m.final_regular_po_qty, 10);
    }

    #[test]
    fn test_zero_daily_sales() {
        let m = calculate(&row(0.0, 0.0, 2.0, 3.0, 4.0), &HashSet::new());
        assert_eq!(m.current_days_cover, 0.0);
        assert_eq!(m.safety_stock, 8);
        assert_eq!(m.reorder_point, 8);
        assert!(m.is_open_po);
        assert_eq!(m.initial_po_qty, 0);
        assert_eq!(m.emergency_po_qty, 0);
    }

    proptest! {
        #[test]
        fn prop_quantities_never_negative(
            stock in 0.0f64..10_000.0,
            daily in 0.0f64..500.0,
            max_daily in 0.0f64..800.0,
            lead in 0.0f64..60.0,
            max_lead in 0.0f64..90.0,
            on_order in 0.0f64..1_000.0,
            min_order in 0.0f64..100.0,
        ) {
            let mut r = row(stock, daily, max_daily, lead, max_lead);
            r.qty_on_order = on_order;
            r.min_order = min_order;
            let m = calculate(&r, &HashSet::new());

            for qty in [
                m.safety_stock,
                m.reorder_point,
                m.qty_for_target_cover,
                m.initial_po_qty,
                m.emergency_po_qty,
                m.regular_po_qty,
                m.final_regular_po_qty,
            ] {
                prop_assert!(qty >= 0);
            }
            prop_assert!(m.final_regular_po_qty >= m.regular_po_qty);
            prop_assert_eq!(m.emergency_po_cost, m.emergency_po_qty as f64 * r.cost_price);
        }
    }
}
