//! Merge-then-aggregate pipeline: two time-ordered streams are merged into one
//! series, then grouped into fixed-width buckets.

use crate::types::{Candle, PricePoint};

/// Merge two time-ordered streams into one. On equal timestamps the point from
/// `primary` is kept and the one from `secondary` dropped, unless only the
/// secondary point carries a price.
pub fn merge_by_time(primary: Vec<PricePoint>, secondary: Vec<PricePoint>) -> Vec<PricePoint> {
    let mut merged = Vec::with_capacity(primary.len() + secondary.len());
    let mut a = primary.into_iter().peekable();
    let mut b = secondary.into_iter().peekable();

    loop {
        match (a.peek().map(|p| p.time), b.peek().map(|p| p.time)) {
            (Some(ta), Some(tb)) => {
                if ta < tb {
                    merged.extend(a.next());
                } else if tb < ta {
                    merged.extend(b.next());
                } else {
                    let (pa, pb) = (a.next(), b.next());
                    match (pa, pb) {
                        (Some(x), Some(y)) if x.price <= 0 && y.price > 0 => merged.push(y),
                        (x, _) => merged.extend(x),
                    }
                }
            }
            (Some(_), None) => merged.extend(a.by_ref()),
            (None, Some(_)) => merged.extend(b.by_ref()),
            (None, None) => break,
        }
    }

    merged
}

/// Start of the bucket `time` falls into.
#[inline]
pub fn bucket_start(time: i64, width_secs: i64) -> i64 {
    time.div_euclid(width_secs) * width_secs
}

/// Group a time-ordered series into `width_secs` buckets. Every bucket that
/// holds a point yields a candle, priced or not, so volume is never lost.
pub fn aggregate(points: &[PricePoint], width_secs: i64) -> Vec<Candle> {
    if points.is_empty() || width_secs <= 0 {
        return Vec::new();
    }

    let mut candles = Vec::new();
    let mut group_start = 0usize;
    let mut current = bucket_start(points[0].time, width_secs);

    for (i, p) in points.iter().enumerate().skip(1) {
        let b = bucket_start(p.time, width_secs);
        if b != current {
            candles.extend(aggregate_bucket(current, &points[group_start..i]));
            group_start = i;
            current = b;
        }
    }
    candles.extend(aggregate_bucket(current, &points[group_start..]));

    candles
}

/// open/close = first/last value by time, high/low = max/min ignoring zero
/// (zero when nothing in the bucket is priced), volume = sum. `None` only for
/// an empty slice.
pub fn aggregate_bucket(start: i64, points: &[PricePoint]) -> Option<Candle> {
    let first = points.first()?;
    let last = points.last()?;

    let priced = points.iter().map(|p| p.price).filter(|p| *p > 0);
    let high = priced.clone().max().unwrap_or(0);
    let low = priced.min().unwrap_or(0);

    Some(Candle {
        time: start,
        open: first.price,
        high,
        low,
        close: last.price,
        volume: points.iter().map(|p| p.volume).sum(),
        samples: points.len() as u32,
    })
}

/// One candle per nonzero point, for spans short enough to return raw rows.
pub fn raw_candles(points: &[PricePoint]) -> Vec<Candle> {
    points
        .iter()
        .filter(|p| p.price > 0)
        .map(|p| Candle {
            time: p.time,
            open: p.price,
            high: p.price,
            low: p.price,
            close: p.price,
            volume: p.volume,
            samples: 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(time: i64, price: i64) -> PricePoint {
        PricePoint { time, price, volume: 1 }
    }

    #[test]
    fn merge_interleaves_and_prefers_primary_on_ties() {
        let live = vec![pt(60, 10), pt(180, 30)];
        let backfilled = vec![pt(0, 1), pt(60, 999), pt(120, 20)];

        let merged = merge_by_time(live, backfilled);
        let times: Vec<i64> = merged.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![0, 60, 120, 180]);
        assert_eq!(merged[1].price, 10);
    }

    #[test]
    fn unpriced_primary_does_not_hide_a_priced_secondary() {
        let merged = merge_by_time(vec![pt(60, 0), pt(120, 0)], vec![pt(60, 45), pt(120, 0)]);
        let prices: Vec<i64> = merged.iter().map(|p| p.price).collect();
        assert_eq!(prices, vec![45, 0]);
    }

    #[test]
    fn hourly_buckets_over_two_hours_of_minutes() {
        let start = 1_700_000_000 - 1_700_000_000 % 3600;
        let points: Vec<PricePoint> = (0..120)
            .map(|i| {
                let price = match i {
                    17 => 500,
                    42 => 5,
                    95 => 700,
                    110 => 2,
                    _ => 100 + i,
                };
                pt(start + i * 60, price)
            })
            .collect();

        let candles = aggregate(&points, 3600);
        assert_eq!(candles.len(), 2);

        assert_eq!(candles[0].time, start);
        assert_eq!(candles[0].open, 100);
        assert_eq!(candles[0].high, 500);
        assert_eq!(candles[0].low, 5);
        assert_eq!(candles[0].close, 159);
        assert_eq!(candles[0].volume, 60);

        assert_eq!(candles[1].time, start + 3600);
        assert_eq!(candles[1].open, 160);
        assert_eq!(candles[1].high, 700);
        assert_eq!(candles[1].low, 2);
        assert_eq!(candles[1].close, 219);
    }

    #[test]
    fn zero_prices_are_ignored_for_extremes() {
        let points = vec![pt(0, 0), pt(60, 50), pt(120, 0), pt(180, 40)];
        let candle = aggregate_bucket(0, &points).expect("non-empty bucket");
        assert_eq!(candle.open, 0);
        assert_eq!(candle.high, 50);
        assert_eq!(candle.low, 40);
        assert_eq!(candle.close, 40);
        assert_eq!(candle.volume, 4);
        assert_eq!(candle.samples, 4);
    }

    #[test]
    fn unpriced_buckets_keep_their_volume() {
        let points = vec![pt(0, 30), pt(300, 0), pt(360, 0)];
        let candles = aggregate(&points, 300);
        assert_eq!(candles.len(), 2);
        let quiet = &candles[1];
        assert_eq!((quiet.time, quiet.open, quiet.high, quiet.low, quiet.close), (300, 0, 0, 0, 0));
        assert_eq!(quiet.volume, 2);
    }

    #[test]
    fn empty_input_yields_no_candles() {
        assert!(aggregate(&[], 300).is_empty());
        assert!(aggregate_bucket(0, &[]).is_none());
    }
}
