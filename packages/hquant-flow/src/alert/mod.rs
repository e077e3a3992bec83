//! Rule-based alerting over per-symbol metrics.

mod expr;
mod parser;

use core::fmt;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

pub use expr::{ArithOp, CmpOp, Condition, Expr, Func, MetricsContext, Value};

use crate::error::{AlertError, EvalError};

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Invoked synchronously for every triggered rule.
pub type AlertCallback = Arc<dyn Fn(&AlertRule, &MetricsContext) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub condition: Condition,
    /// Only contexts for this symbol are considered when set.
    pub symbol: Option<String>,
    pub enabled: bool,
    /// Milliseconds since epoch.
    pub last_triggered: Option<i64>,
    pub trigger_count: u64,
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        condition: &str,
    ) -> Result<Self, AlertError> {
        Ok(Self {
            id: id.into(),
            name: name.into(),
            condition: Condition::parse(condition)?,
            symbol: None,
            enabled: true,
            last_triggered: None,
            trigger_count: 0,
        })
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn applies_to(&self, ctx: &MetricsContext) -> bool {
        match &self.symbol {
            Some(s) => ctx.symbol() == Some(s.as_str()),
            None => true,
        }
    }

    /// False without evaluating when disabled or scoped to another symbol.
    pub fn evaluate(&self, ctx: &MetricsContext) -> Result<bool, EvalError> {
        if !self.enabled || !self.applies_to(ctx) {
            return Ok(false);
        }
        self.condition.evaluate(ctx)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub rule_id: String,
    pub name: String,
    pub symbol: Option<String>,
    pub timestamp: i64,
    pub context: MetricsContext,
}

/// Partial update for [`AlertEngine::update_rule`]; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleUpdate {
    pub name: Option<String>,
    pub condition: Option<String>,
    /// `Some(None)` clears the symbol filter.
    pub symbol: Option<Option<String>>,
    pub enabled: Option<bool>,
}

#[derive(Default)]
struct Inner {
    rules: BTreeMap<String, AlertRule>,
    history: VecDeque<AlertEvent>,
}

pub struct AlertEngine {
    inner: Mutex<Inner>,
    history_capacity: usize,
    callback: RwLock<Option<AlertCallback>>,
}

impl fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("AlertEngine")
            .field("rules", &inner.rules.len())
            .field("history", &inner.history.len())
            .field("history_capacity", &self.history_capacity)
            .finish()
    }
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl AlertEngine {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            history_capacity,
            callback: RwLock::new(None),
        }
    }

    pub fn with_callback<F>(self, callback: F) -> Self
    where
        F: Fn(&AlertRule, &MetricsContext) + Send + Sync + 'static,
    {
        self.set_callback(callback);
        self
    }

    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&AlertRule, &MetricsContext) + Send + Sync + 'static,
    {
        *self.callback.write() = Some(Arc::new(callback));
    }

    pub fn clear_callback(&self) {
        *self.callback.write() = None;
    }

    /// Inserts a rule, replacing any rule with the same id.
    pub fn add_rule(&self, rule: AlertRule) {
        let id = rule.id.clone();
        let name = rule.name.clone();
        let replaced = self.inner.lock().rules.insert(id.clone(), rule).is_some();
        info!(rule_id = %id, %name, replaced, "alert rule added");
    }

    pub fn remove_rule(&self, id: &str) -> Option<AlertRule> {
        let removed = self.inner.lock().rules.remove(id);
        if removed.is_some() {
            info!(rule_id = %id, "alert rule removed");
        }
        removed
    }

    /// Applies `update` atomically; an invalid condition leaves the rule untouched.
    pub fn update_rule(&self, id: &str, update: RuleUpdate) -> Result<AlertRule, AlertError> {
        let condition = update.condition.as_deref().map(Condition::parse).transpose()?;
        let mut inner = self.inner.lock();
        let rule = inner
            .rules
            .get_mut(id)
            .ok_or_else(|| AlertError::UnknownRule(id.to_string()))?;
        if let Some(name) = update.name {
            rule.name = name;
        }
        if let Some(condition) = condition {
            rule.condition = condition;
        }
        if let Some(symbol) = update.symbol {
            rule.symbol = symbol;
        }
        if let Some(enabled) = update.enabled {
            rule.enabled = enabled;
        }
        debug!(rule_id = %id, "alert rule updated");
        Ok(rule.clone())
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), AlertError> {
        let mut inner = self.inner.lock();
        let rule = inner
            .rules
            .get_mut(id)
            .ok_or_else(|| AlertError::UnknownRule(id.to_string()))?;
        rule.enabled = enabled;
        Ok(())
    }

    pub fn rule(&self, id: &str) -> Option<AlertRule> {
        self.inner.lock().rules.get(id).cloned()
    }

    /// All rules ordered by id.
    pub fn rules(&self) -> Vec<AlertRule> {
        self.inner.lock().rules.values().cloned().collect()
    }

    /// Up to `limit` most recent events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<AlertEvent> {
        let inner = self.inner.lock();
        let skip = inner.history.len().saturating_sub(limit);
        inner.history.iter().skip(skip).cloned().collect()
    }

    /// Adds `default_zscore_high` (`zscore > 2`) and `default_zscore_low`
    /// (`zscore < -2`).
    pub fn install_default_rules(&self) -> Result<(), AlertError> {
        self.add_rule(AlertRule::new("default_zscore_high", "Z-Score > 2", "zscore > 2")?);
        self.add_rule(AlertRule::new("default_zscore_low", "Z-Score < -2", "zscore < -2")?);
        Ok(())
    }

    pub fn evaluate(&self, ctx: &MetricsContext) -> Vec<AlertEvent> {
        self.evaluate_at(ctx, chrono::Utc::now().timestamp_millis())
    }

    /// Evaluates every rule against `ctx`, stamping triggers with `now_ms`.
    ///
    /// A rule that fails to evaluate is logged and counts as not triggered.
    /// The callback runs after the rule map is released.
    pub fn evaluate_at(&self, ctx: &MetricsContext, now_ms: i64) -> Vec<AlertEvent> {
        let mut fired = Vec::new();
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            let Inner { rules, history } = &mut *inner;
            for rule in rules.values_mut() {
                match rule.evaluate(ctx) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        warn!(rule_id = %rule.id, symbol = ?ctx.symbol(), error = %e, "alert rule evaluation failed");
                        continue;
                    }
                }
                rule.trigger_count += 1;
                rule.last_triggered = Some(now_ms);
                let event = AlertEvent {
                    rule_id: rule.id.clone(),
                    name: rule.name.clone(),
                    symbol: ctx.symbol().map(str::to_string),
                    timestamp: now_ms,
                    context: ctx.clone(),
                };
                history.push_back(event.clone());
                while history.len() > self.history_capacity {
                    history.pop_front();
                }
                events.push(event);
                fired.push(rule.clone());
            }
        }

        if fired.is_empty() {
            return events;
        }
        info!(symbol = ?ctx.symbol(), count = fired.len(), "alerts triggered");
        let callback = self.callback.read().clone();
        if let Some(cb) = callback {
            for rule in &fired {
                if catch_unwind(AssertUnwindSafe(|| cb(rule, ctx))).is_err() {
                    error!(rule_id = %rule.id, "alert callback panicked");
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn ctx(symbol: &str, z: f64) -> MetricsContext {
        let mut c = MetricsContext::for_symbol(symbol);
        c.insert_number("zscore", z).insert_number("price", 100.0);
        c
    }

    #[test]
    fn triggers_record_history_and_counts() {
        let engine = AlertEngine::default();
        engine.install_default_rules().unwrap();
        let events = engine.evaluate_at(&ctx("btcusdt", 2.5), 1_000);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].rule_id, "default_zscore_high");
        assert_eq!(events[0].symbol.as_deref(), Some("btcusdt"));
        assert_eq!(events[0].context.number("zscore"), Some(2.5));

        let rule = engine.rule("default_zscore_high").unwrap();
        assert_eq!(rule.trigger_count, 1);
        assert_eq!(rule.last_triggered, Some(1_000));
        assert_eq!(engine.rule("default_zscore_low").unwrap().trigger_count, 0);
        assert!(engine.evaluate_at(&ctx("btcusdt", 0.0), 2_000).is_empty());
    }

    #[test]
    fn disabled_rule_never_triggers() {
        let engine = AlertEngine::default();
        engine.add_rule(AlertRule::new("r", "r", "zscore > 2").unwrap().with_enabled(false));
        for i in 0..10 {
            assert!(engine.evaluate_at(&ctx("btcusdt", 5.0), i).is_empty());
        }
        assert_eq!(engine.rules().len(), 1);
        engine.set_enabled("r", true).unwrap();
        assert_eq!(engine.evaluate_at(&ctx("btcusdt", 5.0), 10).len(), 1);
    }

    #[test]
    fn symbol_scoped_rule_ignores_other_symbols() {
        let engine = AlertEngine::default();
        engine.add_rule(AlertRule::new("eth", "eth", "zscore > 2").unwrap().with_symbol("ethusdt"));
        assert!(engine.evaluate_at(&ctx("btcusdt", 5.0), 0).is_empty());
        assert_eq!(engine.evaluate_at(&ctx("ethusdt", 5.0), 0).len(), 1);
    }

    #[test]
    fn failing_rule_does_not_abort_the_cycle() {
        let engine = AlertEngine::default();
        engine.add_rule(AlertRule::new("a_bad", "bad", "missing > 1").unwrap());
        engine.add_rule(AlertRule::new("b_good", "good", "zscore > 2").unwrap());
        let events = engine.evaluate_at(&ctx("btcusdt", 3.0), 0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].rule_id, "b_good");
    }

    #[test]
    fn history_is_capped_oldest_first_out() {
        let engine = AlertEngine::new(3);
        engine.add_rule(AlertRule::new("r", "r", "zscore > 0").unwrap());
        for ts in 0..5 {
            engine.evaluate_at(&ctx("btcusdt", 1.0), ts);
        }
        let ts: Vec<i64> = engine.recent_events(10).iter().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![2, 3, 4]);
        let ts: Vec<i64> = engine.recent_events(2).iter().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![3, 4]);
        assert_eq!(engine.rule("r").unwrap().trigger_count, 5);
    }

    #[test]
    fn callback_sees_rule_and_survives_panics() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let engine = AlertEngine::default().with_callback(move |rule, ctx| {
            seen.fetch_add(1, Ordering::SeqCst);
            assert_eq!(ctx.symbol(), Some("btcusdt"));
            if rule.id == "boom" {
                panic!("callback failure");
            }
        });
        engine.add_rule(AlertRule::new("boom", "boom", "zscore > 1").unwrap());
        engine.add_rule(AlertRule::new("ok", "ok", "zscore > 1").unwrap());
        let events = engine.evaluate_at(&ctx("btcusdt", 2.0), 0);
        assert_eq!(events.len(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rule_administration() {
        let engine = AlertEngine::default();
        engine.add_rule(AlertRule::new("r", "first", "zscore > 2").unwrap());
        engine.add_rule(AlertRule::new("r", "second", "zscore > 3").unwrap());
        assert_eq!(engine.rules().len(), 1);
        assert_eq!(engine.rule("r").unwrap().name, "second");

        let err = engine.update_rule(
            "r",
            RuleUpdate {
                condition: Some("zscore >".into()),
                name: Some("ignored".into()),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(AlertError::InvalidCondition { .. })));
        assert_eq!(engine.rule("r").unwrap().name, "second");

        let updated = engine
            .update_rule(
                "r",
                RuleUpdate {
                    condition: Some("price > 50".into()),
                    symbol: Some(Some("btcusdt".into())),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.condition.source(), "price > 50");
        assert_eq!(updated.symbol.as_deref(), Some("btcusdt"));

        assert!(matches!(
            engine.set_enabled("nope", false),
            Err(AlertError::UnknownRule(_))
        ));
        assert!(engine.remove_rule("r").is_some());
        assert!(engine.remove_rule("r").is_none());
    }
}
