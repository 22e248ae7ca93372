//! The `ob.*` key language: dot-separated symbolic keys naming order-book
//! quantities, with an optional trailing `.per`/`.agg` view selector.
//!
//! The formatter round-trips semantically: parsing its output yields an
//! equivalent key even when tokens are re-rendered.

use crate::book::types::Side;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum KeyError {
    #[error("not an ob key: {0}")]
    NotObKey(String),
    #[error("unrecognised key shape: {0}")]
    BadShape(String),
    #[error("bad token `{token}` in {key}")]
    BadToken { key: String, token: String },
    #[error("out-of-range bounds in {0}")]
    BadRange(String),
}

/// Per-order vs aggregated ladder view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Per,
    Agg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduce {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Price,
    Size,
    Orders,
    Notional,
}

/// Inclusive 1-based level range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelRange {
    pub a: usize,
    pub b: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Spread,
    Mid,
    Best {
        side: Side,
        attr: Target,
    },
    LevelIdx {
        side: Side,
        n: usize,
        attr: Target,
    },
    LevelPx {
        side: Side,
        px: f64,
        attr: Target,
    },
    Cum {
        side: Side,
        n: usize,
        target: Target,
    },
    VwapLevels {
        side: Side,
        lv: LevelRange,
    },
    VwapBand {
        side: Side,
        p1: f64,
        p2: f64,
    },
    ImbalanceLevels {
        lv: LevelRange,
    },
    ImbalanceBand {
        p1: f64,
        p2: f64,
    },
    RangeIdx {
        side: Side,
        lv: LevelRange,
        reduce: Reduce,
        target: Option<Target>,
    },
    RangePx {
        side: Side,
        p1: f64,
        p2: f64,
        reduce: Reduce,
        target: Option<Target>,
    },
    Meta {
        field: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObKey {
    pub metric: Metric,
    pub mode: Mode,
}

pub fn is_ob_key(key: &str) -> bool {
    key.split('.').next() == Some("ob")
}

fn parse_side(tok: &str, key: &str) -> Result<Side, KeyError> {
    match tok {
        "bid" => Ok(Side::Bid),
        "ask" => Ok(Side::Ask),
        _ => Err(KeyError::BadToken {
            key: key.to_string(),
            token: tok.to_string(),
        }),
    }
}

fn parse_target(tok: &str, key: &str) -> Result<Target, KeyError> {
    match tok {
        "price" => Ok(Target::Price),
        "size" => Ok(Target::Size),
        "orders" => Ok(Target::Orders),
        "notional" => Ok(Target::Notional),
        _ => Err(KeyError::BadToken {
            key: key.to_string(),
            token: tok.to_string(),
        }),
    }
}

fn parse_reduce(tok: &str, key: &str) -> Result<Reduce, KeyError> {
    match tok {
        "sum" => Ok(Reduce::Sum),
        "avg" => Ok(Reduce::Avg),
        "min" => Ok(Reduce::Min),
        "max" => Ok(Reduce::Max),
        "count" => Ok(Reduce::Count),
        _ => Err(KeyError::BadToken {
            key: key.to_string(),
            token: tok.to_string(),
        }),
    }
}

fn parse_index(tok: &str, key: &str) -> Result<usize, KeyError> {
    let n: usize = tok.parse().map_err(|_| KeyError::BadToken {
        key: key.to_string(),
        token: tok.to_string(),
    })?;
    if n < 1 {
        return Err(KeyError::BadRange(key.to_string()));
    }
    Ok(n)
}

fn parse_price(tok: &str, key: &str) -> Result<f64, KeyError> {
    tok.parse().map_err(|_| KeyError::BadToken {
        key: key.to_string(),
        token: tok.to_string(),
    })
}

fn parse_level_range(tok: &str, key: &str) -> Result<LevelRange, KeyError> {
    let (a, b) = tok.split_once('-').ok_or_else(|| KeyError::BadToken {
        key: key.to_string(),
        token: tok.to_string(),
    })?;
    let a = parse_index(a, key)?;
    let b = parse_index(b, key)?;
    if b < a {
        return Err(KeyError::BadRange(key.to_string()));
    }
    Ok(LevelRange { a, b })
}

fn parse_price_band(tok: &str, key: &str) -> Result<(f64, f64), KeyError> {
    let (p1, p2) = tok.split_once('-').ok_or_else(|| KeyError::BadToken {
        key: key.to_string(),
        token: tok.to_string(),
    })?;
    let p1 = parse_price(p1, key)?;
    let p2 = parse_price(p2, key)?;
    if p2 < p1 {
        return Err(KeyError::BadRange(key.to_string()));
    }
    Ok((p1, p2))
}

pub fn parse(key: &str) -> Result<ObKey, KeyError> {
    let mut toks: Vec<&str> = key.split('.').filter(|t| !t.is_empty()).collect();
    if toks.first() != Some(&"ob") {
        return Err(KeyError::NotObKey(key.to_string()));
    }

    let mut mode = Mode::Per;
    if toks.len() >= 2 {
        match *toks.last().expect("len checked") {
            "per" => {
                mode = Mode::Per;
                toks.pop();
            }
            "agg" => {
                mode = Mode::Agg;
                toks.pop();
            }
            _ => {}
        }
    }

    let bad = || KeyError::BadShape(key.to_string());

    let metric = match (toks.len(), toks.get(1).copied()) {
        (2, Some("spread")) => Metric::Spread,
        (2, Some("mid")) => Metric::Mid,

        // ob.best.(bid|ask).(price|size)
        (4, Some("best")) => {
            let side = parse_side(toks[2], key)?;
            let attr = parse_target(toks[3], key)?;
            if !matches!(attr, Target::Price | Target::Size) {
                return Err(bad());
            }
            Metric::Best { side, attr }
        }

        // ob.level.(bid|ask).N.(price|size|orders|notional)
        (5, Some("level")) => Metric::LevelIdx {
            side: parse_side(toks[2], key)?,
            n: parse_index(toks[3], key)?,
            attr: parse_target(toks[4], key)?,
        },

        // ob.at.(bid|ask).P.(price|size|orders|notional)
        (5, Some("at")) => Metric::LevelPx {
            side: parse_side(toks[2], key)?,
            px: parse_price(toks[3], key)?,
            attr: parse_target(toks[4], key)?,
        },

        // ob.cum.(bid|ask).levels.N.(size|notional|orders|price)
        (6, Some("cum")) if toks[3] == "levels" => Metric::Cum {
            side: parse_side(toks[2], key)?,
            n: parse_index(toks[4], key)?,
            target: parse_target(toks[5], key)?,
        },

        // ob.vwap.(bid|ask).levels.N | .levels.A-B | .price.P1-P2
        (5, Some("vwap")) if toks[3] == "levels" => {
            let lv = if toks[4].contains('-') {
                parse_level_range(toks[4], key)?
            } else {
                LevelRange {
                    a: 1,
                    b: parse_index(toks[4], key)?,
                }
            };
            Metric::VwapLevels {
                side: parse_side(toks[2], key)?,
                lv,
            }
        }
        (5, Some("vwap")) if toks[3] == "price" => {
            let (p1, p2) = parse_price_band(toks[4], key)?;
            Metric::VwapBand {
                side: parse_side(toks[2], key)?,
                p1,
                p2,
            }
        }

        // ob.imbalance.levels.N | .levels.A-B | .price.P1-P2
        (4, Some("imbalance")) if toks[2] == "levels" => {
            let lv = if toks[3].contains('-') {
                parse_level_range(toks[3], key)?
            } else {
                LevelRange {
                    a: 1,
                    b: parse_index(toks[3], key)?,
                }
            };
            Metric::ImbalanceLevels { lv }
        }
        (4, Some("imbalance")) if toks[2] == "price" => {
            let (p1, p2) = parse_price_band(toks[3], key)?;
            Metric::ImbalanceBand { p1, p2 }
        }

        // ob.range.(bid|ask).levels.A-B.REDUCE[.TARGET]
        // ob.range.(bid|ask).price.P1-P2.REDUCE[.TARGET]
        (6 | 7, Some("range")) => {
            let side = parse_side(toks[2], key)?;
            let reduce = parse_reduce(toks[5], key)?;
            let target = match (reduce, toks.get(6)) {
                (Reduce::Count, None) => None,
                (Reduce::Count, Some(_)) => return Err(bad()),
                (_, Some(t)) => Some(parse_target(t, key)?),
                (_, None) => return Err(bad()),
            };
            match toks[3] {
                "levels" => Metric::RangeIdx {
                    side,
                    lv: parse_level_range(toks[4], key)?,
                    reduce,
                    target,
                },
                "price" => {
                    let (p1, p2) = parse_price_band(toks[4], key)?;
                    Metric::RangePx {
                        side,
                        p1,
                        p2,
                        reduce,
                        target,
                    }
                }
                _ => return Err(bad()),
            }
        }

        // ob.meta.(seq|epoch|is_stale|last_change_ms) | ob.meta.levels.(bid|ask)
        (3, Some("meta")) => {
            let field = toks[2];
            if !matches!(field, "seq" | "epoch" | "is_stale" | "last_change_ms") {
                return Err(bad());
            }
            Metric::Meta {
                field: field.to_string(),
            }
        }
        (4, Some("meta")) if toks[2] == "levels" => {
            parse_side(toks[3], key)?;
            Metric::Meta {
                field: format!("levels.{}", toks[3]),
            }
        }

        _ => return Err(bad()),
    };

    Ok(ObKey { metric, mode })
}

fn target_str(t: Target) -> &'static str {
    match t {
        Target::Price => "price",
        Target::Size => "size",
        Target::Orders => "orders",
        Target::Notional => "notional",
    }
}

fn reduce_str(r: Reduce) -> &'static str {
    match r {
        Reduce::Sum => "sum",
        Reduce::Avg => "avg",
        Reduce::Min => "min",
        Reduce::Max => "max",
        Reduce::Count => "count",
    }
}

pub fn format(k: &ObKey) -> String {
    let mut out = String::from("ob.");
    match &k.metric {
        Metric::Spread => out.push_str("spread"),
        Metric::Mid => out.push_str("mid"),
        Metric::Best { side, attr } => {
            out.push_str(&format!("best.{}.{}", side.as_str(), target_str(*attr)));
        }
        Metric::LevelIdx { side, n, attr } => {
            out.push_str(&format!("level.{}.{}.{}", side.as_str(), n, target_str(*attr)));
        }
        Metric::LevelPx { side, px, attr } => {
            out.push_str(&format!("at.{}.{}.{}", side.as_str(), px, target_str(*attr)));
        }
        Metric::Cum { side, n, target } => {
            out.push_str(&format!(
                "cum.{}.levels.{}.{}",
                side.as_str(),
                n,
                target_str(*target)
            ));
        }
        Metric::VwapLevels { side, lv } => {
            out.push_str(&format!("vwap.{}.levels.{}-{}", side.as_str(), lv.a, lv.b));
        }
        Metric::VwapBand { side, p1, p2 } => {
            out.push_str(&format!("vwap.{}.price.{}-{}", side.as_str(), p1, p2));
        }
        Metric::ImbalanceLevels { lv } => {
            out.push_str(&format!("imbalance.levels.{}-{}", lv.a, lv.b));
        }
        Metric::ImbalanceBand { p1, p2 } => {
            out.push_str(&format!("imbalance.price.{}-{}", p1, p2));
        }
        Metric::RangeIdx {
            side,
            lv,
            reduce,
            target,
        } => {
            out.push_str(&format!(
                "range.{}.levels.{}-{}.{}",
                side.as_str(),
                lv.a,
                lv.b,
                reduce_str(*reduce)
            ));
            if let Some(t) = target {
                out.push('.');
                out.push_str(target_str(*t));
            }
        }
        Metric::RangePx {
            side,
            p1,
            p2,
            reduce,
            target,
        } => {
            out.push_str(&format!(
                "range.{}.price.{}-{}.{}",
                side.as_str(),
                p1,
                p2,
                reduce_str(*reduce)
            ));
            if let Some(t) = target {
                out.push('.');
                out.push_str(target_str(*t));
            }
        }
        Metric::Meta { field } => {
            out.push_str("meta.");
            out.push_str(field);
        }
    }
    if k.mode == Mode::Agg {
        out.push_str(".agg");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_keys() {
        assert_eq!(parse("ob.spread").unwrap().metric, Metric::Spread);
        assert_eq!(parse("ob.mid").unwrap().metric, Metric::Mid);
        assert_eq!(parse("ob.mid").unwrap().mode, Mode::Per);
        assert_eq!(parse("ob.mid.agg").unwrap().mode, Mode::Agg);
        assert_eq!(parse("ob.mid.per").unwrap().mode, Mode::Per);
    }

    #[test]
    fn test_best_and_level() {
        let k = parse("ob.best.bid.price").unwrap();
        assert_eq!(
            k.metric,
            Metric::Best {
                side: Side::Bid,
                attr: Target::Price
            }
        );
        // best only exposes price/size
        assert!(parse("ob.best.bid.orders").is_err());

        let k = parse("ob.level.ask.3.notional").unwrap();
        assert_eq!(
            k.metric,
            Metric::LevelIdx {
                side: Side::Ask,
                n: 3,
                attr: Target::Notional
            }
        );
        assert!(parse("ob.level.ask.0.size").is_err());
    }

    #[test]
    fn test_at_price() {
        let k = parse("ob.at.bid.1.25.size");
        // "1.25" splits on dots: shape mismatch is an error, not a panic
        assert!(k.is_err());
        let k = parse("ob.at.bid.125.size").unwrap();
        assert_eq!(
            k.metric,
            Metric::LevelPx {
                side: Side::Bid,
                px: 125.0,
                attr: Target::Size
            }
        );
    }

    #[test]
    fn test_vwap_forms() {
        let k = parse("ob.vwap.bid.levels.2-8").unwrap();
        assert_eq!(
            k.metric,
            Metric::VwapLevels {
                side: Side::Bid,
                lv: LevelRange { a: 2, b: 8 }
            }
        );
        let k = parse("ob.vwap.ask.levels.5").unwrap();
        assert_eq!(
            k.metric,
            Metric::VwapLevels {
                side: Side::Ask,
                lv: LevelRange { a: 1, b: 5 }
            }
        );
        assert!(parse("ob.vwap.bid.levels.8-2").is_err());
        let k = parse("ob.vwap.bid.price.99-101").unwrap();
        assert_eq!(
            k.metric,
            Metric::VwapBand {
                side: Side::Bid,
                p1: 99.0,
                p2: 101.0
            }
        );
    }

    #[test]
    fn test_imbalance_forms() {
        assert_eq!(
            parse("ob.imbalance.levels.10").unwrap().metric,
            Metric::ImbalanceLevels {
                lv: LevelRange { a: 1, b: 10 }
            }
        );
        assert_eq!(
            parse("ob.imbalance.levels.2-4").unwrap().metric,
            Metric::ImbalanceLevels {
                lv: LevelRange { a: 2, b: 4 }
            }
        );
        assert_eq!(
            parse("ob.imbalance.price.99-101").unwrap().metric,
            Metric::ImbalanceBand { p1: 99.0, p2: 101.0 }
        );
    }

    #[test]
    fn test_range_forms() {
        let k = parse("ob.range.bid.levels.1-5.sum.size").unwrap();
        assert_eq!(
            k.metric,
            Metric::RangeIdx {
                side: Side::Bid,
                lv: LevelRange { a: 1, b: 5 },
                reduce: Reduce::Sum,
                target: Some(Target::Size)
            }
        );
        // count takes no target
        let k = parse("ob.range.ask.levels.1-5.count").unwrap();
        assert_eq!(
            k.metric,
            Metric::RangeIdx {
                side: Side::Ask,
                lv: LevelRange { a: 1, b: 5 },
                reduce: Reduce::Count,
                target: None
            }
        );
        assert!(parse("ob.range.ask.levels.1-5.count.size").is_err());
        assert!(parse("ob.range.ask.levels.1-5.sum").is_err());
        let k = parse("ob.range.ask.price.100-105.avg.notional").unwrap();
        assert!(matches!(k.metric, Metric::RangePx { .. }));
    }

    #[test]
    fn test_meta_forms() {
        assert!(parse("ob.meta.seq").is_ok());
        assert!(parse("ob.meta.epoch").is_ok());
        assert!(parse("ob.meta.is_stale").is_ok());
        assert!(parse("ob.meta.last_change_ms").is_ok());
        assert_eq!(
            parse("ob.meta.levels.bid").unwrap().metric,
            Metric::Meta {
                field: "levels.bid".to_string()
            }
        );
        assert!(parse("ob.meta.bogus").is_err());
    }

    #[test]
    fn test_rejects_non_ob() {
        assert!(matches!(parse("ta.spread"), Err(KeyError::NotObKey(_))));
        assert!(parse("ob.unknown.thing").is_err());
        assert!(!is_ob_key("spread"));
        assert!(is_ob_key("ob.spread"));
    }

    #[test]
    fn test_format_round_trip() {
        let keys = [
            "ob.spread",
            "ob.mid.agg",
            "ob.best.bid.price",
            "ob.best.ask.size.agg",
            "ob.level.bid.2.orders",
            "ob.at.ask.125.notional",
            "ob.cum.bid.levels.10.size",
            "ob.vwap.bid.levels.2-8",
            "ob.vwap.ask.price.99-101",
            "ob.imbalance.levels.1-10",
            "ob.imbalance.price.99-101",
            "ob.range.bid.levels.1-5.sum.size",
            "ob.range.ask.levels.1-5.count",
            "ob.range.ask.price.100-105.max.price.agg",
            "ob.meta.seq",
            "ob.meta.levels.ask",
        ];
        for raw in keys {
            let k = parse(raw).unwrap_or_else(|e| panic!("parse {raw}: {e}"));
            let rendered = format(&k);
            let reparsed =
                parse(&rendered).unwrap_or_else(|e| panic!("reparse {rendered}: {e}"));
            assert_eq!(k, reparsed, "round trip of {raw} via {rendered}");
        }
    }

    #[test]
    fn test_vwap_n_round_trips_as_range() {
        // ob.vwap.bid.levels.5 renders as 1-5; both parse to the same key
        let k = parse("ob.vwap.bid.levels.5").unwrap();
        let rendered = format(&k);
        assert_eq!(rendered, "ob.vwap.bid.levels.1-5");
        assert_eq!(parse(&rendered).unwrap(), k);
    }
}
