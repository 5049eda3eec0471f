//! Command dispatcher (§4.15): maps each [`HandlerKind`] to the real
//! `OrderManager`/`RiskEngine`/algorithm calls it names. `router::run` drives
//! this through its `handle` closure; this module holds no queue-consumption
//! logic of its own, only the per-command business logic.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc::UnboundedSender, Mutex};
use tokio::task::AbortHandle;

use crate::algo::chase::{self, ChaseParams, StalkMode};
use crate::algo::scalper::{self, ScalperParams, StartSide};
use crate::algo::trail_stop::{self, TrailStopParams};
use crate::algo::twap::{self, TwapParams};
use crate::events::{Event, SequenceCounter};
use crate::marketdata::MarketDataFanout;
use crate::orders::manager::{OrderCallbacks, OrderManager};
use crate::orders::types::{Origin, PositionSide, Side};
use crate::risk::position_book::VirtualPosition;
use crate::risk::RiskEngine;

use super::{normalize_side, normalize_symbol, CommandEnvelope, CommandReply, HandlerKind};

pub struct CommandDispatcher {
    manager: Arc<OrderManager>,
    risk: Arc<Mutex<RiskEngine>>,
    fanout: Arc<MarketDataFanout>,
    seq: Arc<SequenceCounter>,
    events: UnboundedSender<Event>,
    running_algos: DashMap<String, AbortHandle>,
    watched_symbols: DashMap<String, ()>,
}

impl CommandDispatcher {
    pub fn new(manager: Arc<OrderManager>, risk: Arc<Mutex<RiskEngine>>, fanout: Arc<MarketDataFanout>, seq: Arc<SequenceCounter>, events: UnboundedSender<Event>) -> Self {
        Self { manager, risk, fanout, seq, events, running_algos: DashMap::new(), watched_symbols: DashMap::new() }
    }

    /// Subscribes `symbol` to the liquidation tick the first time a command
    /// touches it, so every traded symbol gets a mark-price driven
    /// [`crate::risk::handle_liquidation_tick`] call without the caller
    /// having to pre-declare a symbol universe.
    fn ensure_liquidation_watch(&self, symbol: &str) {
        if self.watched_symbols.insert(symbol.to_string(), ()).is_some() {
            return;
        }
        let manager = self.manager.clone();
        let risk = self.risk.clone();
        let seq = self.seq.clone();
        let events = self.events.clone();
        self.fanout.subscribe(
            symbol.to_string(),
            Arc::new(move |sym, _bid, _ask, mid| {
                let manager = manager.clone();
                let risk = risk.clone();
                let seq = seq.clone();
                let events = events.clone();
                let sym = sym.to_string();
                tokio::spawn(async move {
                    crate::risk::handle_liquidation_tick(&risk, &manager, &seq, &events, &sym, mid).await;
                });
            }),
        );
    }

    pub async fn dispatch(&self, kind: HandlerKind, envelope: CommandEnvelope) -> CommandReply {
        match self.dispatch_inner(kind, &envelope).await {
            Ok(reply) => reply,
            Err(message) => CommandReply::error(message),
        }
    }

    async fn dispatch_inner(&self, kind: HandlerKind, envelope: &CommandEnvelope) -> Result<CommandReply, String> {
        let account_id = envelope.sub_account_id.clone();
        let payload = &envelope.payload;

        match kind {
            HandlerKind::Trade => {
                let symbol = normalize_symbol(field_str(payload, "symbol")?);
                self.ensure_liquidation_watch(&symbol);
                let side = field_side(payload, "side")?;
                let qty = field_f64(payload, "quantity")?;
                let leverage = field_u32(payload, "leverage").unwrap_or(1);
                let reduce_only = field_bool(payload, "reduce_only", false);
                let order = self.manager.place_market(&account_id, &symbol, side, qty, leverage, Origin::Manual, None, reduce_only, OrderCallbacks::default()).await;
                Ok(CommandReply::ok(serde_json::json!({ "client_order_id": order.client_order_id, "status": format!("{:?}", order.status) })))
            }
            HandlerKind::Limit => {
                let symbol = normalize_symbol(field_str(payload, "symbol")?);
                self.ensure_liquidation_watch(&symbol);
                let side = field_side(payload, "side")?;
                let qty = field_f64(payload, "quantity")?;
                let price = field_f64(payload, "price")?;
                let leverage = field_u32(payload, "leverage").unwrap_or(1);
                let reduce_only = field_bool(payload, "reduce_only", false);
                let order = self.manager.place_limit(&account_id, &symbol, side, qty, price, leverage, Origin::Manual, None, reduce_only, OrderCallbacks::default()).await;
                Ok(CommandReply::ok(serde_json::json!({ "client_order_id": order.client_order_id, "status": format!("{:?}", order.status) })))
            }
            HandlerKind::Scale => {
                let symbol = normalize_symbol(field_str(payload, "symbol")?);
                self.ensure_liquidation_watch(&symbol);
                let side = field_side(payload, "side")?;
                let leverage = field_u32(payload, "leverage").unwrap_or(1);
                let levels = field_levels(payload, "levels")?;
                let orders = self.manager.place_batch_limits(&account_id, &symbol, side, levels, leverage, Origin::Manual, None).await;
                Ok(CommandReply::ok(serde_json::json!({ "client_order_ids": orders.into_iter().map(|o| o.client_order_id).collect::<Vec<_>>() })))
            }
            HandlerKind::Close => {
                let position_id = field_str(payload, "position_id")?;
                let position = self.position(&account_id, position_id).await?;
                let order = self.close_position(&account_id, &position).await;
                Ok(CommandReply::ok(serde_json::json!({ "client_order_id": order.client_order_id })))
            }
            HandlerKind::CloseAll => {
                let positions: Vec<VirtualPosition> = {
                    let risk = self.risk.lock().await;
                    risk.book().positions_for_account(&account_id).into_iter().cloned().collect()
                };
                let mut closed = Vec::with_capacity(positions.len());
                for position in positions {
                    let order = self.close_position(&account_id, &position).await;
                    closed.push(order.client_order_id);
                }
                Ok(CommandReply::ok(serde_json::json!({ "closed": closed })))
            }
            HandlerKind::Cancel => {
                let client_order_id = field_str(payload, "client_order_id")?;
                let cancelled = self.manager.cancel(client_order_id).await;
                Ok(CommandReply::ok(serde_json::json!({ "cancelled": cancelled })))
            }
            HandlerKind::CancelAll => {
                match payload.get("symbol").and_then(Value::as_str) {
                    Some(symbol) => self.manager.cancel_all_for_symbol(&normalize_symbol(symbol)).await,
                    None => self.manager.cancel_all_for_account(&account_id).await,
                }
                Ok(CommandReply::ok(serde_json::json!({ "cancelled": true })))
            }
            HandlerKind::Basket => {
                let symbol = normalize_symbol(field_str(payload, "symbol")?);
                self.ensure_liquidation_watch(&symbol);
                let side = field_side(payload, "side")?;
                let leverage = field_u32(payload, "leverage").unwrap_or(1);
                let levels = field_levels(payload, "levels")?;
                let basket_id = envelope.request_id.clone();
                let orders = self.manager.place_batch_limits(&account_id, &symbol, side, levels, leverage, Origin::Basket, Some(basket_id.clone())).await;
                Ok(CommandReply::ok(serde_json::json!({ "basket_id": basket_id, "client_order_ids": orders.into_iter().map(|o| o.client_order_id).collect::<Vec<_>>() })))
            }
            HandlerKind::Chase => {
                let params = chase_params_from(payload)?;
                self.ensure_liquidation_watch(&params.symbol);
                let chase_id = envelope.request_id.clone();
                let handle = chase::start(self.manager.clone(), self.fanout.clone(), self.seq.clone(), self.events.clone(), account_id, chase_id.clone(), params)
                    .ok_or_else(|| "no market data yet for chase symbol".to_string())?;
                self.running_algos.insert(chase_id.clone(), handle.abort_handle());
                Ok(CommandReply::ok(serde_json::json!({ "chase_id": chase_id })))
            }
            HandlerKind::ChaseCancel => self.cancel_algo(payload, "chase_id").await,
            HandlerKind::Scalper => {
                let params = scalper_params_from(payload)?;
                self.ensure_liquidation_watch(&params.symbol);
                let scalper_id = envelope.request_id.clone();
                let handle = scalper::start(self.manager.clone(), self.fanout.clone(), self.seq.clone(), self.events.clone(), account_id, scalper_id.clone(), params)
                    .ok_or_else(|| "no market data yet for scalper symbol".to_string())?;
                self.running_algos.insert(scalper_id.clone(), handle.abort_handle());
                Ok(CommandReply::ok(serde_json::json!({ "scalper_id": scalper_id })))
            }
            HandlerKind::ScalperCancel => self.cancel_algo(payload, "scalper_id").await,
            HandlerKind::Twap => {
                let params = twap_params_from(payload)?;
                self.ensure_liquidation_watch(&params.symbol);
                let twap_id = envelope.request_id.clone();
                let handle = twap::start(self.manager.clone(), self.fanout.clone(), self.seq.clone(), self.events.clone(), account_id, twap_id.clone(), params);
                self.running_algos.insert(twap_id.clone(), handle.abort_handle());
                Ok(CommandReply::ok(serde_json::json!({ "twap_id": twap_id })))
            }
            HandlerKind::TwapCancel => self.cancel_algo(payload, "twap_id").await,
            HandlerKind::TwapBasket => {
                let legs = payload.get("legs").and_then(Value::as_array).ok_or_else(|| "missing array field 'legs'".to_string())?;
                let mut twap_ids = Vec::with_capacity(legs.len());
                for (i, leg) in legs.iter().enumerate() {
                    let params = twap_params_from(leg)?;
                    self.ensure_liquidation_watch(&params.symbol);
                    let twap_id = format!("{}-{i}", envelope.request_id);
                    let handle = twap::start(self.manager.clone(), self.fanout.clone(), self.seq.clone(), self.events.clone(), account_id.clone(), twap_id.clone(), params);
                    self.running_algos.insert(twap_id.clone(), handle.abort_handle());
                    twap_ids.push(twap_id);
                }
                Ok(CommandReply::ok(serde_json::json!({ "twap_ids": twap_ids })))
            }
            HandlerKind::TrailStop => {
                let params = trail_stop_params_from(payload)?;
                self.ensure_liquidation_watch(&params.symbol);
                let trail_stop_id = envelope.request_id.clone();
                let handle = trail_stop::start(self.manager.clone(), self.fanout.clone(), self.seq.clone(), self.events.clone(), account_id, trail_stop_id.clone(), params)
                    .ok_or_else(|| "no market data yet for trail-stop symbol".to_string())?;
                self.running_algos.insert(trail_stop_id.clone(), handle.abort_handle());
                Ok(CommandReply::ok(serde_json::json!({ "trail_stop_id": trail_stop_id })))
            }
            HandlerKind::TrailStopCancel => self.cancel_algo(payload, "trail_stop_id").await,
            HandlerKind::Validate => {
                let symbol = normalize_symbol(field_str(payload, "symbol")?);
                let side = field_position_side(payload, "side")?;
                let qty = field_f64(payload, "quantity")?;
                let leverage = field_u32(payload, "leverage").unwrap_or(1);
                let price = field_opt_f64(payload, "price").or_else(|| self.fanout.latest(&symbol).map(|q| q.mid));
                let result = {
                    let risk = self.risk.lock().await;
                    crate::risk::validate(risk.book(), &account_id, &symbol, side, qty, leverage, price)
                };
                Ok(CommandReply::ok(serde_json::json!({
                    "valid": result.valid,
                    "errors": result.errors.iter().map(|e| format!("{e:?}")).collect::<Vec<_>>(),
                    "notional": result.computed.notional,
                    "margin_required": result.computed.margin_required,
                    "margin_usage_ratio": result.computed.margin_usage_ratio,
                })))
            }
        }
    }

    async fn position(&self, account_id: &str, position_id: &str) -> Result<VirtualPosition, String> {
        self.risk.lock().await.position(account_id, position_id).ok_or_else(|| format!("no open position '{position_id}' for account '{account_id}'"))
    }

    async fn close_position(&self, account_id: &str, position: &VirtualPosition) -> crate::orders::types::Order {
        self.manager
            .place_market(account_id, &position.symbol, position.side.closing_side(), position.quantity, position.leverage, Origin::Manual, None, true, OrderCallbacks::default())
            .await
    }

    async fn cancel_algo(&self, payload: &Value, id_field: &str) -> Result<CommandReply, String> {
        let id = field_str(payload, id_field)?.to_string();
        if let Some((_, handle)) = self.running_algos.remove(&id) {
            handle.abort();
        }
        self.manager.cancel_all_children(&id).await;
        Ok(CommandReply::ok(serde_json::json!({ id_field: id, "cancelled": true })))
    }
}

fn field_str<'a>(payload: &'a Value, key: &str) -> Result<&'a str, String> {
    payload.get(key).and_then(Value::as_str).ok_or_else(|| format!("missing or non-string field '{key}'"))
}

fn field_f64(payload: &Value, key: &str) -> Result<f64, String> {
    payload.get(key).and_then(Value::as_f64).ok_or_else(|| format!("missing or non-numeric field '{key}'"))
}

fn field_opt_f64(payload: &Value, key: &str) -> Option<f64> {
    payload.get(key).and_then(Value::as_f64)
}

fn field_u32(payload: &Value, key: &str) -> Result<u32, String> {
    payload.get(key).and_then(Value::as_u64).map(|v| v as u32).ok_or_else(|| format!("missing or non-numeric field '{key}'"))
}

fn field_bool(payload: &Value, key: &str, default: bool) -> bool {
    payload.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn field_side(payload: &Value, key: &str) -> Result<Side, String> {
    let raw = field_str(payload, key)?;
    normalize_side(raw).ok_or_else(|| format!("unrecognized side '{raw}'"))
}

fn field_position_side(payload: &Value, key: &str) -> Result<PositionSide, String> {
    match field_side(payload, key)? {
        Side::Buy => Ok(PositionSide::Long),
        Side::Sell => Ok(PositionSide::Short),
    }
}

fn field_start_side(payload: &Value, key: &str) -> Result<StartSide, String> {
    match field_side(payload, key)? {
        Side::Buy => Ok(StartSide::Long),
        Side::Sell => Ok(StartSide::Short),
    }
}

fn field_levels(payload: &Value, key: &str) -> Result<Vec<(f64, f64)>, String> {
    let arr = payload.get(key).and_then(Value::as_array).ok_or_else(|| format!("missing array field '{key}'"))?;
    arr.iter()
        .map(|level| {
            let pair = level.as_array().filter(|p| p.len() == 2).ok_or_else(|| "each level must be a [price, quantity] pair".to_string())?;
            let price = pair[0].as_f64().ok_or_else(|| "level price must be numeric".to_string())?;
            let qty = pair[1].as_f64().ok_or_else(|| "level quantity must be numeric".to_string())?;
            Ok((price, qty))
        })
        .collect()
}

fn field_stalk_mode(payload: &Value, key: &str) -> StalkMode {
    match payload.get(key).and_then(Value::as_str).unwrap_or("none").to_ascii_lowercase().as_str() {
        "maintain" => StalkMode::Maintain,
        "trail" => StalkMode::Trail,
        _ => StalkMode::None,
    }
}

fn chase_params_from(payload: &Value) -> Result<ChaseParams, String> {
    Ok(ChaseParams {
        symbol: normalize_symbol(field_str(payload, "symbol")?),
        side: field_side(payload, "side")?,
        quantity: field_f64(payload, "quantity")?,
        leverage: field_u32(payload, "leverage").unwrap_or(1),
        stalk_mode: field_stalk_mode(payload, "stalk_mode"),
        stalk_offset_pct: field_opt_f64(payload, "stalk_offset_pct").unwrap_or(0.0),
        max_distance_pct: field_opt_f64(payload, "max_distance_pct").unwrap_or(0.0),
        reduce_only: field_bool(payload, "reduce_only", false),
    })
}

fn scalper_params_from(payload: &Value) -> Result<ScalperParams, String> {
    Ok(ScalperParams {
        symbol: normalize_symbol(field_str(payload, "symbol")?),
        start_side: field_start_side(payload, "side")?,
        num_layers: field_u32(payload, "num_layers").unwrap_or(1) as usize,
        base_offset_pct: field_opt_f64(payload, "base_offset_pct").unwrap_or(0.1),
        skew: field_opt_f64(payload, "skew").unwrap_or(0.0),
        size_usd: field_f64(payload, "size_usd")?,
        leverage: field_u32(payload, "leverage").unwrap_or(1),
        reduce_only: field_bool(payload, "reduce_only", false),
        min_notional_usd: field_opt_f64(payload, "min_notional_usd").unwrap_or(5.0),
        min_spread_pct: field_opt_f64(payload, "min_spread_pct").unwrap_or(0.1),
        half_life_ms: payload.get("half_life_ms").and_then(Value::as_u64).unwrap_or(60_000),
        max_fills_per_minute: field_u32(payload, "max_fills_per_minute").unwrap_or(6),
        min_refill_delay_ms: payload.get("min_refill_delay_ms").and_then(Value::as_u64).unwrap_or(1_000),
        long_max_price: field_opt_f64(payload, "long_max_price"),
        short_min_price: field_opt_f64(payload, "short_min_price"),
    })
}

fn twap_params_from(payload: &Value) -> Result<TwapParams, String> {
    Ok(TwapParams {
        symbol: normalize_symbol(field_str(payload, "symbol")?),
        side: field_side(payload, "side")?,
        total_quantity: field_f64(payload, "total_quantity")?,
        num_lots: field_u32(payload, "num_lots")?,
        interval_seconds: field_opt_f64(payload, "interval_seconds").unwrap_or(10.0),
        jitter_pct: field_opt_f64(payload, "jitter_pct").unwrap_or(30.0),
        irregular: field_bool(payload, "irregular", false),
        price_limit: field_opt_f64(payload, "price_limit"),
        leverage: field_u32(payload, "leverage").unwrap_or(1),
    })
}

fn trail_stop_params_from(payload: &Value) -> Result<TrailStopParams, String> {
    Ok(TrailStopParams {
        symbol: normalize_symbol(field_str(payload, "symbol")?),
        position_side: field_position_side(payload, "side")?,
        quantity: field_f64(payload, "quantity")?,
        leverage: field_u32(payload, "leverage").unwrap_or(1),
        trail_pct: field_f64(payload, "trail_pct")?,
        activation_price: field_opt_f64(payload, "activation_price"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_levels_parses_price_quantity_pairs() {
        let payload = serde_json::json!({ "levels": [[100.0, 0.1], [101.5, 0.2]] });
        let levels = field_levels(&payload, "levels").unwrap();
        assert_eq!(levels, vec![(100.0, 0.1), (101.5, 0.2)]);
    }

    #[test]
    fn field_levels_rejects_malformed_pairs() {
        let payload = serde_json::json!({ "levels": [[100.0]] });
        assert!(field_levels(&payload, "levels").is_err());
    }

    #[test]
    fn chase_params_from_applies_defaults_for_optional_fields() {
        let payload = serde_json::json!({ "symbol": "BTC/USDT:USDT", "side": "long", "quantity": 0.01 });
        let params = chase_params_from(&payload).unwrap();
        assert_eq!(params.symbol, "BTCUSDT");
        assert_eq!(params.side, Side::Buy);
        assert_eq!(params.stalk_mode, StalkMode::None);
        assert_eq!(params.reduce_only, false);
    }

    #[test]
    fn field_side_rejects_unknown_token() {
        let payload = serde_json::json!({ "side": "sideways" });
        assert!(field_side(&payload, "side").is_err());
    }
}
