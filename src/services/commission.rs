use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{Shipment, ShipmentStatus, TripStation};
use crate::services::currency::{normalize_currency, round2};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommissionLine {
    pub station: String,
    pub currency: String,
    pub shipment_count: i64,
    pub collected: f64,
    pub rate: f64,
    pub amount: f64,
}

fn station_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Driver commission per station and currency over the delivered shipments
/// of one trip. Lines come out in station order, currencies sorted.
pub fn compute_commissions(stations: &[TripStation], shipments: &[Shipment]) -> Vec<CommissionLine> {
    let mut lines = Vec::new();

    for station in stations {
        let key = station_key(&station.governorate);
        let mut per_currency: BTreeMap<String, (i64, f64)> = BTreeMap::new();

        for s in shipments
            .iter()
            .filter(|s| s.status == ShipmentStatus::Delivered && station_key(&s.governorate) == key)
        {
            let slot = per_currency
                .entry(normalize_currency(Some(&s.currency)))
                .or_insert((0, 0.0));
            slot.0 += 1;
            slot.1 += s.shipping_fee;
        }

        for (currency, (count, collected)) in per_currency {
            let collected = round2(collected);
            lines.push(CommissionLine {
                station: station.governorate.trim().to_string(),
                currency,
                shipment_count: count,
                collected,
                rate: station.commission_rate,
                amount: round2(collected * station.commission_rate / 100.0),
            });
        }
    }

    lines
}
