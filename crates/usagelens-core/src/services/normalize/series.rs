//! Daily-series aliasing, synthesis and point normalization

use std::collections::{BTreeMap, HashMap};

use crate::models::{Snapshot, TimePoint};

/// Alternate spellings copied into canonical series names
const SERIES_ALIASES: &[(&str, &str)] = &[
    ("analytics_cost", "cost"),
    ("daily_cost", "cost"),
    ("analytics_tokens", "tokens_total"),
    ("tokens", "tokens_total"),
    ("analytics_requests", "requests"),
];

/// Prefixes of per-model series spelled differently by some providers
const MODEL_SERIES_PREFIXES: &[&str] = &["tokens_model_", "usage_model_"];

/// Metric keys that are genuinely scoped to the current day
const DAY_SCOPED_METRICS: &[(&str, &[&str])] = &[
    (
        "cost",
        &[
            "today_api_cost",
            "today_cost",
            "cost_today",
            "daily_cost_usd",
            "usage_daily",
        ],
    ),
    ("tokens_total", &["today_tokens", "tokens_today", "daily_tokens"]),
    (
        "requests",
        &["today_requests", "requests_today", "daily_requests"],
    ),
];

/// Drop blank dates and non-positive values, sum duplicate dates and sort
/// ascending
pub fn normalize_series_points(points: &[TimePoint]) -> Vec<TimePoint> {
    let mut by_date: BTreeMap<&str, f64> = BTreeMap::new();
    for point in points {
        let date = point.date.trim();
        if date.is_empty() || !point.value.is_finite() || point.value <= 0.0 {
            continue;
        }
        *by_date.entry(date).or_insert(0.0) += point.value;
    }
    by_date
        .into_iter()
        .map(|(date, value)| TimePoint::new(date, value))
        .collect()
}

/// Whether a metric window spans more than one calendar day
pub fn is_multi_day_window(window: &str) -> bool {
    let window = window.trim().to_lowercase();
    if window.is_empty() {
        return false;
    }
    if matches!(
        window.as_str(),
        "week" | "weekly" | "month" | "monthly" | "cycle" | "billing_cycle" | "all" | "all_time" | "lifetime"
    ) {
        return true;
    }

    let digits_end = window
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(window.len());
    let Ok(count) = window[..digits_end].parse::<u32>() else {
        return false;
    };
    match window[digits_end..].trim() {
        "d" | "day" | "days" => count > 1,
        "w" | "wk" | "week" | "weeks" | "m" | "mo" | "month" | "months" => count >= 1,
        "h" | "hr" | "hours" => count > 24,
        _ => false,
    }
}

/// Series-safe key for a raw model ID
pub fn series_model_key(raw_model_id: &str) -> String {
    let mut key = String::with_capacity(raw_model_id.len());
    let mut pending_sep = false;
    for c in raw_model_id.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !key.is_empty() {
                key.push('_');
            }
            pending_sep = false;
            key.push(c);
        } else {
            pending_sep = true;
        }
    }
    key
}

fn has_points(series: &HashMap<String, Vec<TimePoint>>, key: &str) -> bool {
    series.get(key).is_some_and(|points| !points.is_empty())
}

fn apply_aliases(series: &mut HashMap<String, Vec<TimePoint>>) {
    for (alternate, canonical) in SERIES_ALIASES {
        if has_points(series, canonical) {
            continue;
        }
        if let Some(points) = series.get(*alternate).filter(|p| !p.is_empty()).cloned() {
            series.insert(canonical.to_string(), points);
        }
    }

    let mut model_keys: Vec<String> = series
        .keys()
        .filter(|k| MODEL_SERIES_PREFIXES.iter().any(|p| k.starts_with(p)))
        .cloned()
        .collect();
    model_keys.sort();
    for key in model_keys {
        let Some(model) = MODEL_SERIES_PREFIXES
            .iter()
            .find_map(|prefix| key.strip_prefix(prefix))
        else {
            continue;
        };
        let model = series_model_key(model);
        if model.is_empty() {
            continue;
        }
        let canonical = format!("tokens_{}", model);
        if has_points(series, &canonical) {
            continue;
        }
        if let Some(points) = series.get(&key).filter(|p| !p.is_empty()).cloned() {
            series.insert(canonical, points);
        }
    }
}

fn synthesize_today_points(snapshot: &mut Snapshot) {
    let day = snapshot.day();
    for (series, keys) in DAY_SCOPED_METRICS {
        if has_points(&snapshot.daily_series, series) {
            continue;
        }
        let value = keys.iter().find_map(|key| {
            snapshot
                .metrics
                .get(*key)
                .filter(|m| !is_multi_day_window(&m.window))
                .and_then(|m| m.value())
                .filter(|v| *v > 0.0)
        });
        if let Some(value) = value {
            snapshot
                .daily_series
                .insert(series.to_string(), vec![TimePoint::new(day.clone(), value)]);
        }
    }
}

fn synthesize_model_series(snapshot: &mut Snapshot) {
    let day = snapshot.day();
    let mut synthesized: BTreeMap<String, f64> = BTreeMap::new();

    for record in &snapshot.model_usage {
        if is_multi_day_window(&record.window) {
            continue;
        }
        let Some(total) = record.total_tokens.filter(|t| *t > 0.0) else {
            continue;
        };
        let model = series_model_key(&record.raw_model_id);
        if model.is_empty() {
            continue;
        }
        let key = format!("tokens_{}", model);
        if has_points(&snapshot.daily_series, &key) {
            continue;
        }
        *synthesized.entry(key).or_insert(0.0) += total;
    }

    for (key, total) in synthesized {
        snapshot
            .daily_series
            .insert(key, vec![TimePoint::new(day.clone(), total)]);
    }
}

/// Alias, synthesize and normalize every daily series of a snapshot
pub fn normalize_daily_series(snapshot: &mut Snapshot) {
    apply_aliases(&mut snapshot.daily_series);
    synthesize_today_points(snapshot);
    synthesize_model_series(snapshot);

    snapshot.daily_series = std::mem::take(&mut snapshot.daily_series)
        .into_iter()
        .map(|(key, points)| {
            let points = normalize_series_points(&points);
            (key, points)
        })
        .filter(|(_, points)| !points.is_empty())
        .collect();
}
