//! Wire format parsing
//!
//! Two envelopes are accepted:
//! - combined stream: `{"stream": "btcusdt@trade", "data": {...}}`, routed
//!   by the stream name (`trade` / `depth`)
//! - direct stream: the payload itself, routed by `"e": "trade"` or the
//!   presence of `bids`/`asks`
//!
//! Trades carry `T` (exec time, ms), `p`/`q` (decimal strings), `m`
//! (buyer is maker) and `t` (trade id). Depth payloads carry best-first
//! `[price, qty]` string pairs and are stamped with the receive time.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::WireError;
use crate::models::{BookLevel, DepthSnapshot, Trade};

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Trade(Trade),
    Depth(DepthSnapshot),
    /// Subscription acknowledgement or other control frame
    Control,
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    #[serde(rename = "T")]
    exec_time_ms: Option<i64>,
    #[serde(rename = "p")]
    price: Option<String>,
    #[serde(rename = "q")]
    qty: Option<String>,
    #[serde(rename = "m")]
    is_buyer_maker: Option<bool>,
    #[serde(rename = "t", alias = "a")]
    trade_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawDepth {
    bids: Option<Vec<[String; 2]>>,
    asks: Option<Vec<[String; 2]>>,
}

pub fn parse_message(text: &str, received_at: DateTime<Utc>) -> Result<FeedMessage, WireError> {
    let value: Value = serde_json::from_str(text).map_err(|e| WireError::Json(e.to_string()))?;

    if let Some(stream) = value.get("stream").and_then(Value::as_str) {
        let data = value.get("data").ok_or(WireError::MissingField("data"))?;
        return if stream.contains("trade") {
            parse_trade(data).map(FeedMessage::Trade)
        } else if stream.contains("depth") {
            parse_depth(data, received_at).map(FeedMessage::Depth)
        } else {
            Err(WireError::UnknownEnvelope)
        };
    }

    let event = value.get("e").and_then(Value::as_str);
    if matches!(event, Some("trade") | Some("aggTrade")) {
        return parse_trade(&value).map(FeedMessage::Trade);
    }
    if value.get("bids").is_some() || value.get("asks").is_some() {
        return parse_depth(&value, received_at).map(FeedMessage::Depth);
    }
    if value.get("result").is_some() && value.get("id").is_some() {
        return Ok(FeedMessage::Control);
    }

    Err(WireError::UnknownEnvelope)
}

fn parse_trade(data: &Value) -> Result<Trade, WireError> {
    let raw = RawTrade::deserialize(data).map_err(|e| WireError::Json(e.to_string()))?;

    let exec_ms = raw.exec_time_ms.ok_or(WireError::MissingField("T"))?;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(exec_ms).ok_or(
        WireError::InvalidNumber {
            field: "T",
            value: exec_ms.to_string(),
        },
    )?;
    let price = parse_decimal("p", raw.price.as_deref())?;
    let quantity = parse_decimal("q", raw.qty.as_deref())?;
    let is_buyer_maker = raw.is_buyer_maker.ok_or(WireError::MissingField("m"))?;
    let trade_id = raw.trade_id.ok_or(WireError::MissingField("t"))?;

    if price <= 0.0 {
        return Err(WireError::NonPositive {
            field: "p",
            value: price,
        });
    }
    if quantity <= 0.0 {
        return Err(WireError::NonPositive {
            field: "q",
            value: quantity,
        });
    }

    Ok(Trade::new(timestamp, price, quantity, is_buyer_maker, trade_id))
}

fn parse_depth(data: &Value, received_at: DateTime<Utc>) -> Result<DepthSnapshot, WireError> {
    let raw = RawDepth::deserialize(data).map_err(|e| WireError::Json(e.to_string()))?;

    let bids = parse_levels("bids", raw.bids.ok_or(WireError::MissingField("bids"))?)?;
    let asks = parse_levels("asks", raw.asks.ok_or(WireError::MissingField("asks"))?)?;

    let snapshot = DepthSnapshot::from_levels(received_at, bids, asks);
    if !snapshot.bids.is_empty()
        && !snapshot.asks.is_empty()
        && snapshot.best_bid > snapshot.best_ask
    {
        return Err(WireError::CrossedBook {
            bid: snapshot.best_bid,
            ask: snapshot.best_ask,
        });
    }

    Ok(snapshot)
}

fn parse_levels(field: &'static str, raw: Vec<[String; 2]>) -> Result<Vec<BookLevel>, WireError> {
    raw.iter()
        .map(|[price, qty]| {
            let price = parse_decimal(field, Some(price))?;
            let quantity = parse_decimal(field, Some(qty))?;
            if price <= 0.0 {
                return Err(WireError::NonPositive { field, value: price });
            }
            if quantity < 0.0 {
                return Err(WireError::NonPositive {
                    field,
                    value: quantity,
                });
            }
            Ok(BookLevel::new(price, quantity))
        })
        .collect()
}

fn parse_decimal(field: &'static str, raw: Option<&str>) -> Result<f64, WireError> {
    let raw = raw.ok_or(WireError::MissingField(field))?;
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(WireError::InvalidNumber {
            field,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRADE: &str = r#"{"stream":"btcusdt@trade","data":{"e":"trade","E":1700000000001,"s":"BTCUSDT","t":12345,"p":"42000.50","q":"0.015","T":1700000000000,"m":true}}"#;
    const DEPTH: &str = r#"{"stream":"btcusdt@depth10@100ms","data":{"lastUpdateId":1,"bids":[["42000.00","1.5"],["41999.00","2.0"]],"asks":[["42001.00","0.5"]]}}"#;

    #[test]
    fn parses_combined_trade() {
        let trade = match parse_message(TRADE, Utc::now()).unwrap() {
            FeedMessage::Trade(trade) => trade,
            other => panic!("expected trade, got {other:?}"),
        };
        assert_eq!(trade.price, 42000.50);
        assert_eq!(trade.quantity, 0.015);
        assert!(trade.is_buyer_maker);
        assert_eq!(trade.trade_id, 12345);
        assert_eq!(trade.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn parses_combined_depth_with_receive_time() {
        let now = Utc::now();
        let depth = match parse_message(DEPTH, now).unwrap() {
            FeedMessage::Depth(depth) => depth,
            other => panic!("expected depth, got {other:?}"),
        };
        assert_eq!(depth.timestamp, now);
        assert_eq!(depth.best_bid, 42000.0);
        assert_eq!(depth.best_ask, 42001.0);
        assert_eq!(depth.bid_volume, 3.5);
        assert_eq!(depth.ask_volume, 0.5);
    }

    #[test]
    fn parses_direct_envelopes() {
        let trade = r#"{"e":"trade","t":1,"p":"10","q":"1","T":1700000000000,"m":false}"#;
        assert!(matches!(
            parse_message(trade, Utc::now()),
            Ok(FeedMessage::Trade(_))
        ));

        let depth = r#"{"bids":[["10","1"]],"asks":[["11","1"]]}"#;
        assert!(matches!(
            parse_message(depth, Utc::now()),
            Ok(FeedMessage::Depth(_))
        ));
    }

    #[test]
    fn subscription_ack_is_control() {
        let ack = r#"{"result":null,"id":1}"#;
        assert_eq!(parse_message(ack, Utc::now()), Ok(FeedMessage::Control));
    }

    #[test]
    fn rejects_malformed_payloads() {
        let now = Utc::now();
        assert!(matches!(parse_message("{not json", now), Err(WireError::Json(_))));
        assert_eq!(
            parse_message(r#"{"foo":1}"#, now),
            Err(WireError::UnknownEnvelope)
        );
        assert_eq!(
            parse_message(r#"{"stream":"btcusdt@trade"}"#, now),
            Err(WireError::MissingField("data"))
        );
        assert_eq!(
            parse_message(
                r#"{"e":"trade","t":1,"q":"1","T":1700000000000,"m":false}"#,
                now
            ),
            Err(WireError::MissingField("p"))
        );
        assert!(matches!(
            parse_message(
                r#"{"e":"trade","t":1,"p":"abc","q":"1","T":1700000000000,"m":false}"#,
                now
            ),
            Err(WireError::InvalidNumber { field: "p", .. })
        ));
    }

    #[test]
    fn rejects_invalid_values() {
        let now = Utc::now();
        assert!(matches!(
            parse_message(
                r#"{"e":"trade","t":1,"p":"0","q":"1","T":1700000000000,"m":false}"#,
                now
            ),
            Err(WireError::NonPositive { field: "p", .. })
        ));
        assert!(matches!(
            parse_message(r#"{"bids":[["12","1"]],"asks":[["11","1"]]}"#, now),
            Err(WireError::CrossedBook { .. })
        ));
        assert!(matches!(
            parse_message(r#"{"bids":[["10","-1"]],"asks":[]}"#, now),
            Err(WireError::NonPositive { .. })
        ));
    }
}
